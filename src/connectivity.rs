//! Connectivity Establisher
//!
//! Makes sure the host can reach the internet before anything is downloaded
//! or any disk is touched.
//!
//! # Design
//!
//! 1. Probe first. A reachable host passes straight through `connecting` to
//!    `connected` without a single interface being enumerated.
//! 2. Otherwise the operator picks wireless or wired, and the matching
//!    interfaces are read from `ip -o link show`. Having none is fatal before
//!    anything else runs.
//! 3. Wireless goes through `iwd` (scan, list, connect), wired through
//!    `dhcpcd`. Either way the probe is repeated after the settle delay and a
//!    second miss is fatal. There are no automatic retries.
//!
//! Every failure takes the [`NetworkState`] back to `disconnected`.

use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::dialog::{Dialog, MenuItem};
use crate::error::{InterfaceKind, ProvisionError, Result};
use crate::hardware::ReachabilityProbe;
use crate::network_state::{NetworkState, NetworkTransitionError};
use crate::runner::{CommandRunner, run_checked};
use crate::tool_traits::ToolCommand;
use crate::tools::network::{
    DhcpLease, LinkUp, ListLinks, WirelessConnect, WirelessNetworks, WirelessScan,
};

const TITLE: &str = "Network";

// ============================================================================
// Interface discovery
// ============================================================================

/// Interface names found in `ip -o link show` output, by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interfaces {
    pub wireless: Vec<String>,
    pub wired: Vec<String>,
}

impl Interfaces {
    pub fn of_kind(&self, kind: InterfaceKind) -> &[String] {
        match kind {
            InterfaceKind::Wireless => &self.wireless,
            InterfaceKind::Wired => &self.wired,
        }
    }
}

/// Classify links: `wl*` is wireless, `en*` and `eth*` are wired, the rest
/// (loopback, bridges, tunnels) is ignored.
pub fn parse_interfaces(output: &str) -> Interfaces {
    let mut found = Interfaces::default();
    for line in output.lines() {
        // "2: enp3s0: <BROADCAST,...> mtu 1500 ..."; veth pairs read "eth0@if7"
        let Some(name) = line.split(": ").nth(1) else {
            continue;
        };
        let name = name.split('@').next().unwrap_or(name).trim();
        if name.starts_with("wl") {
            found.wireless.push(name.to_string());
        } else if name.starts_with("en") || name.starts_with("eth") {
            found.wired.push(name.to_string());
        }
    }
    found
}

// ============================================================================
// Wireless network listing
// ============================================================================

/// One row of `iwctl station <if> get-networks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirelessNetwork {
    pub ssid: String,
    pub security: String,
}

impl WirelessNetwork {
    pub fn is_open(&self) -> bool {
        self.security.eq_ignore_ascii_case("open")
    }
}

/// Render terminal output through a virtual screen and return the plain text.
pub fn strip_terminal_formatting(raw: &str) -> String {
    let rows = u16::try_from(raw.lines().count() + 1).unwrap_or(u16::MAX);
    let mut parser = vt100::Parser::new(rows, 512, 0);
    // a bare line feed keeps the column on a virtual terminal
    parser.process(raw.replace('\n', "\r\n").as_bytes());
    parser.screen().contents()
}

/// Parse the network listing. Headers, rulers and the "connected" marker are
/// skipped; columns are separated by runs of at least two spaces.
pub fn parse_networks(raw: &str) -> Vec<WirelessNetwork> {
    let text = strip_terminal_formatting(raw);
    let mut networks = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.chars().all(|c| c == '-')
            || trimmed.starts_with("Available networks")
            || trimmed.starts_with("Network name")
            || trimmed.starts_with("No networks")
        {
            continue;
        }
        let row = trimmed.trim_start_matches('>').trim_start();
        let columns: Vec<&str> = row
            .split("  ")
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        if let [ssid, security, ..] = columns.as_slice() {
            networks.push(WirelessNetwork {
                ssid: ssid.to_string(),
                security: security.to_string(),
            });
        }
    }
    networks
}

// ============================================================================
// Establisher
// ============================================================================

pub struct ConnectivityEstablisher<P: ReachabilityProbe> {
    probe: P,
    settle: Duration,
    state: NetworkState,
}

impl<P: ReachabilityProbe> ConnectivityEstablisher<P> {
    pub fn new(probe: P, settle: Duration) -> Self {
        Self {
            probe,
            settle,
            state: NetworkState::new(),
        }
    }

    pub fn state(&self) -> &NetworkState {
        &self.state
    }

    /// Reach `connected`, configuring a link through `dialog` if needed.
    pub fn ensure_connectivity(
        &mut self,
        dialog: &mut dyn Dialog,
        runner: &mut dyn CommandRunner,
    ) -> Result<()> {
        if self.state.is_connected() {
            if self.probe.is_reachable() {
                return Ok(());
            }
            warn!("Connectivity to {} lost", self.probe.target());
            self.state.fail();
        }

        self.transition(NetworkState::begin)?;
        if self.probe.is_reachable() {
            info!("{} is reachable; no link setup needed", self.probe.target());
            return self.transition(NetworkState::complete);
        }

        match self.configure_link(dialog, runner) {
            Ok(()) => self.transition(NetworkState::complete),
            Err(e) => {
                warn!("Connectivity failed: {}", e);
                self.state.fail();
                Err(e)
            }
        }
    }

    fn transition(
        &mut self,
        step: fn(&mut NetworkState) -> std::result::Result<(), NetworkTransitionError>,
    ) -> Result<()> {
        step(&mut self.state).map_err(|e| ProvisionError::Unreachable(e.to_string()))
    }

    fn configure_link(
        &mut self,
        dialog: &mut dyn Dialog,
        runner: &mut dyn CommandRunner,
    ) -> Result<()> {
        let kind = choose_kind(dialog)?;
        let listing = run_checked(runner, &ListLinks.invocation(), ProvisionError::Unreachable)?;
        let interfaces = parse_interfaces(&listing.stdout);
        let candidates = interfaces.of_kind(kind);
        if candidates.is_empty() {
            return Err(ProvisionError::NoInterface {
                kind,
                detail: "ip link lists none".to_string(),
            });
        }

        let interface = choose_interface(dialog, kind, candidates)?;
        self.select_interface(&interface)?;
        let activate = LinkUp {
            interface: interface.clone(),
        };
        run_checked(runner, &activate.invocation(), |detail| {
            ProvisionError::NoInterface { kind, detail }
        })?;

        match kind {
            InterfaceKind::Wireless => self.associate(dialog, runner, &interface)?,
            InterfaceKind::Wired => {
                dialog.info(TITLE, &format!("Requesting an address on {}...", interface))?;
                let lease = DhcpLease {
                    interface: interface.clone(),
                };
                run_checked(runner, &lease.invocation(), ProvisionError::Unreachable)?;
            }
        }

        dialog.info(TITLE, "Waiting for the link to settle...")?;
        thread::sleep(self.settle);
        if !self.probe.is_reachable() {
            return Err(ProvisionError::Unreachable(format!(
                "{} still unreachable through {}",
                self.probe.target(),
                interface
            )));
        }
        info!("Connected through {}", interface);
        Ok(())
    }

    fn associate(
        &mut self,
        dialog: &mut dyn Dialog,
        runner: &mut dyn CommandRunner,
        interface: &str,
    ) -> Result<()> {
        dialog.info(TITLE, &format!("Scanning on {}...", interface))?;
        let scan = WirelessScan {
            interface: interface.to_string(),
        };
        run_checked(runner, &scan.invocation(), ProvisionError::Unreachable)?;

        let list = WirelessNetworks {
            interface: interface.to_string(),
        };
        let listing = run_checked(runner, &list.invocation(), ProvisionError::Unreachable)?;
        let networks = parse_networks(&listing.stdout);
        if networks.is_empty() {
            return Err(ProvisionError::NoNetworkFound {
                interface: interface.to_string(),
            });
        }

        let network = choose_network(dialog, &networks)?;
        self.select_network(&network.ssid)?;

        let passphrase = if network.is_open() {
            None
        } else {
            let prompt = format!("Passphrase for {}", network.ssid);
            match dialog.password(TITLE, &prompt)? {
                Some(p) => Some(p),
                None => {
                    return Err(ProvisionError::Authentication {
                        network: network.ssid.clone(),
                        detail: "no passphrase entered".to_string(),
                    });
                }
            }
        };

        let connect = WirelessConnect {
            interface: interface.to_string(),
            ssid: network.ssid.clone(),
            passphrase,
        };
        let ssid = network.ssid.clone();
        run_checked(runner, &connect.invocation(), move |detail| {
            ProvisionError::Authentication {
                network: ssid.clone(),
                detail,
            }
        })
        .map(|_| ())
    }

    fn select_interface(&mut self, name: &str) -> Result<()> {
        self.state
            .select_interface(name)
            .map_err(|e| ProvisionError::Unreachable(e.to_string()))
    }

    fn select_network(&mut self, ssid: &str) -> Result<()> {
        self.state
            .select_network(ssid)
            .map_err(|e| ProvisionError::Unreachable(e.to_string()))
    }
}

fn choose_kind(dialog: &mut dyn Dialog) -> Result<InterfaceKind> {
    let items = [
        MenuItem::new("wireless", "Wireless (iwd)"),
        MenuItem::new("wired", "Wired (DHCP)"),
    ];
    loop {
        let choice = dialog.menu(
            TITLE,
            "No internet connection detected. How should the host connect?",
            &items,
            None,
        )?;
        match choice.as_deref() {
            Some("wireless") => return Ok(InterfaceKind::Wireless),
            Some("wired") => return Ok(InterfaceKind::Wired),
            _ => continue,
        }
    }
}

fn choose_interface(
    dialog: &mut dyn Dialog,
    kind: InterfaceKind,
    candidates: &[String],
) -> Result<String> {
    if let [only] = candidates {
        info!("Using the only {} interface, {}", kind, only);
        return Ok(only.clone());
    }
    let items: Vec<MenuItem> = candidates
        .iter()
        .map(|name| MenuItem::new(name.clone(), name.clone()))
        .collect();
    loop {
        let text = format!("Select the {} interface", kind);
        if let Some(choice) = dialog.menu(TITLE, &text, &items, None)? {
            if candidates.contains(&choice) {
                return Ok(choice);
            }
        }
    }
}

fn choose_network<'n>(
    dialog: &mut dyn Dialog,
    networks: &'n [WirelessNetwork],
) -> Result<&'n WirelessNetwork> {
    let items: Vec<MenuItem> = networks
        .iter()
        .map(|n| MenuItem::new(n.ssid.clone(), format!("{}  [{}]", n.ssid, n.security)))
        .collect();
    loop {
        if let Some(choice) = dialog.menu(TITLE, "Select a wireless network", &items, None)? {
            if let Some(network) = networks.iter().find(|n| n.ssid == choice) {
                return Ok(network);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::path::Path;

    use super::*;
    use crate::network_state::LinkState;
    use crate::runner::CommandOutput;
    use crate::runner::fake::FakeRunner;

    const IP_LINKS: &str = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN mode DEFAULT
2: enp3s0: <BROADCAST,MULTICAST> mtu 1500 qdisc noop state DOWN mode DEFAULT
3: wlan0: <BROADCAST,MULTICAST> mtu 1500 qdisc noop state DOWN mode DORMANT
4: eth1@if9: <BROADCAST,MULTICAST,UP> mtu 1500 qdisc noqueue state UP
";

    const GET_NETWORKS: &str = "\
                               Available networks\x1b[0m
--------------------------------------------------------------------------------
\x1b[1;90m      Network name                      Security            Signal\x1b[0m
--------------------------------------------------------------------------------
\x1b[0m  \x1b[1;90m> \x1b[0m  HomeNet                           psk                 \x1b[1;90m****\x1b[0m
      Corner Cafe                       open                **\x1b[1;90m**\x1b[0m
";

    struct SeqProbe(Cell<usize>, Vec<bool>);

    impl SeqProbe {
        fn new(answers: &[bool]) -> Self {
            Self(Cell::new(0), answers.to_vec())
        }
    }

    impl ReachabilityProbe for SeqProbe {
        fn is_reachable(&self) -> bool {
            let i = self.0.get();
            self.0.set(i + 1);
            self.1.get(i).copied().unwrap_or(false)
        }

        fn target(&self) -> String {
            "probe.test:443".to_string()
        }
    }

    /// Answers menus and passwords from a queue; everything else is a no-op.
    #[derive(Default)]
    struct Answers(VecDeque<Option<String>>);

    impl Answers {
        fn with(answers: &[Option<&str>]) -> Self {
            Self(answers.iter().map(|a| a.map(str::to_string)).collect())
        }
    }

    impl Dialog for Answers {
        fn menu(&mut self, _: &str, _: &str, _: &[MenuItem], _: Option<&str>) -> Result<Option<String>> {
            Ok(self.0.pop_front().expect("scripted answer"))
        }
        fn input(&mut self, _: &str, _: &str, _: &str) -> Result<Option<String>> {
            Ok(self.0.pop_front().expect("scripted answer"))
        }
        fn password(&mut self, _: &str, _: &str) -> Result<Option<String>> {
            Ok(self.0.pop_front().expect("scripted answer"))
        }
        fn confirm(&mut self, _: &str, _: &str) -> Result<bool> {
            Ok(true)
        }
        fn message(&mut self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        fn info(&mut self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        fn text_file(&mut self, _: &str, _: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn establisher(answers: &[bool]) -> ConnectivityEstablisher<SeqProbe> {
        ConnectivityEstablisher::new(SeqProbe::new(answers), Duration::ZERO)
    }

    #[test]
    fn test_parse_interfaces() {
        let found = parse_interfaces(IP_LINKS);
        assert_eq!(found.wireless, vec!["wlan0"]);
        assert_eq!(found.wired, vec!["enp3s0", "eth1"]);
    }

    #[test]
    fn test_parse_networks_strips_formatting() {
        let networks = parse_networks(GET_NETWORKS);
        assert_eq!(
            networks,
            vec![
                WirelessNetwork { ssid: "HomeNet".into(), security: "psk".into() },
                WirelessNetwork { ssid: "Corner Cafe".into(), security: "open".into() },
            ]
        );
        assert!(networks[1].is_open());
    }

    #[test]
    fn test_empty_listing_has_no_networks() {
        let raw = "                  Available networks\n----------\n  No networks available\n";
        assert!(parse_networks(raw).is_empty());
    }

    #[test]
    fn test_reachable_host_skips_enumeration() {
        let mut est = establisher(&[true]);
        let mut dialog = Answers::default();
        let mut runner = FakeRunner::new();
        est.ensure_connectivity(&mut dialog, &mut runner).expect("connected");

        assert!(runner.calls.is_empty());
        assert_eq!(
            est.state().history(),
            &[LinkState::Connecting, LinkState::Connected]
        );
    }

    #[test]
    fn test_no_wireless_interface_fails_before_scan() {
        let mut est = establisher(&[false]);
        let mut dialog = Answers::with(&[Some("wireless")]);
        let mut runner = FakeRunner::new().respond(
            "ip",
            "show",
            CommandOutput::ok("1: lo: <LOOPBACK> mtu 65536\n2: enp3s0: <BROADCAST> mtu 1500\n"),
        );
        let err = est
            .ensure_connectivity(&mut dialog, &mut runner)
            .expect_err("no wifi"); // test: expected error

        assert!(matches!(
            err,
            ProvisionError::NoInterface { kind: InterfaceKind::Wireless, .. }
        ));
        assert!(!runner.called("iwctl"));
        assert_eq!(est.state().current(), LinkState::Disconnected);
    }

    #[test]
    fn test_wireless_association_then_reprobe() {
        let mut est = establisher(&[false, true]);
        // cancelled kind menu is shown again
        let mut dialog = Answers::with(&[None, Some("wireless"), Some("HomeNet"), Some("hunter22")]);
        let mut runner = FakeRunner::new()
            .respond("ip", "show", CommandOutput::ok(IP_LINKS))
            .respond("iwctl", "get-networks", CommandOutput::ok(GET_NETWORKS));
        est.ensure_connectivity(&mut dialog, &mut runner).expect("connected"); // test: known-good input

        assert!(est.state().is_connected());
        assert_eq!(est.state().interface(), Some("wlan0"));
        assert_eq!(est.state().network(), Some("HomeNet"));
        let connect = runner
            .calls
            .iter()
            .find(|c| c.mentions("connect"))
            .expect("connect call");
        assert!(connect.args.contains(&"hunter22".to_string()));
        assert!(!connect.display_line().contains("hunter22"));
    }

    #[test]
    fn test_open_network_needs_no_passphrase() {
        let mut est = establisher(&[false, true]);
        let mut dialog = Answers::with(&[Some("wireless"), Some("Corner Cafe")]);
        let mut runner = FakeRunner::new()
            .respond("ip", "show", CommandOutput::ok(IP_LINKS))
            .respond("iwctl", "get-networks", CommandOutput::ok(GET_NETWORKS));
        est.ensure_connectivity(&mut dialog, &mut runner).expect("connected");
        assert!(dialog.0.is_empty());
    }

    #[test]
    fn test_rejected_passphrase_is_authentication_error() {
        let mut est = establisher(&[false]);
        let mut dialog = Answers::with(&[Some("wireless"), Some("HomeNet"), Some("wrong")]);
        let mut runner = FakeRunner::new()
            .respond("ip", "show", CommandOutput::ok(IP_LINKS))
            .respond("iwctl", "get-networks", CommandOutput::ok(GET_NETWORKS))
            .respond("iwctl", "connect", CommandOutput::failed(1, "Operation failed"));
        let err = est
            .ensure_connectivity(&mut dialog, &mut runner)
            .expect_err("bad key"); // test: expected error
        assert!(matches!(err, ProvisionError::Authentication { ref network, .. } if network == "HomeNet"));
        assert_eq!(est.state().network(), None);
    }

    #[test]
    fn test_empty_scan_is_no_network_found() {
        let mut est = establisher(&[false]);
        let mut dialog = Answers::with(&[Some("wireless")]);
        let mut runner = FakeRunner::new().respond("ip", "show", CommandOutput::ok(IP_LINKS));
        let err = est.ensure_connectivity(&mut dialog, &mut runner).expect_err("empty");
        assert!(matches!(err, ProvisionError::NoNetworkFound { .. }));
    }

    #[test]
    fn test_wired_still_unreachable_is_fatal() {
        let mut est = establisher(&[false, false]);
        let mut dialog = Answers::with(&[Some("wired"), Some("enp3s0")]);
        let mut runner = FakeRunner::new().respond("ip", "show", CommandOutput::ok(IP_LINKS));
        let err = est.ensure_connectivity(&mut dialog, &mut runner).expect_err("offline");

        assert!(matches!(err, ProvisionError::Unreachable(_)));
        assert!(runner.called("dhcpcd"));
        assert_eq!(est.state().current(), LinkState::Disconnected);
    }
}
