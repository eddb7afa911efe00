//! Typed network tool commands (`ip`, `iwctl`, `dhcpcd`).

use crate::tool_traits::ToolCommand;

/// One line per link: `ip -o link show`.
#[derive(Debug, Clone, Default)]
pub struct ListLinks;

impl ToolCommand for ListLinks {
    fn program(&self) -> &'static str {
        "ip"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-o".into(), "link".into(), "show".into()]
    }

    fn is_destructive(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct LinkUp {
    pub interface: String,
}

impl ToolCommand for LinkUp {
    fn program(&self) -> &'static str {
        "ip"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["link".into(), "set".into(), self.interface.clone(), "up".into()]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct WirelessScan {
    pub interface: String,
}

impl ToolCommand for WirelessScan {
    fn program(&self) -> &'static str {
        "iwctl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["station".into(), self.interface.clone(), "scan".into()]
    }

    fn is_destructive(&self) -> bool {
        false
    }
}

/// Listing of scanned networks. The output is meant for a terminal and
/// carries colour escapes.
#[derive(Debug, Clone)]
pub struct WirelessNetworks {
    pub interface: String,
}

impl ToolCommand for WirelessNetworks {
    fn program(&self) -> &'static str {
        "iwctl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["station".into(), self.interface.clone(), "get-networks".into()]
    }

    fn is_destructive(&self) -> bool {
        false
    }
}

/// Associate with a network. `iwctl` only takes the passphrase on argv, so
/// it is redacted from everything but the real invocation.
#[derive(Clone)]
pub struct WirelessConnect {
    pub interface: String,
    pub ssid: String,
    pub passphrase: Option<String>,
}

impl std::fmt::Debug for WirelessConnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WirelessConnect")
            .field("interface", &self.interface)
            .field("ssid", &self.ssid)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "********"))
            .finish()
    }
}

impl WirelessConnect {
    fn args_with(&self, passphrase: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(p) = passphrase {
            args.push("--passphrase".to_string());
            args.push(p.to_string());
        }
        args.extend([
            "station".to_string(),
            self.interface.clone(),
            "connect".to_string(),
            self.ssid.clone(),
        ]);
        args
    }
}

impl ToolCommand for WirelessConnect {
    fn program(&self) -> &'static str {
        "iwctl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        self.args_with(self.passphrase.as_deref())
    }

    fn redacted_args(&self) -> Vec<String> {
        self.args_with(self.passphrase.as_ref().map(|_| "********"))
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// Request a DHCP lease and return once one is bound.
#[derive(Debug, Clone)]
pub struct DhcpLease {
    pub interface: String,
}

impl ToolCommand for DhcpLease {
    fn program(&self) -> &'static str {
        "dhcpcd"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-w".into(), self.interface.clone()]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}
