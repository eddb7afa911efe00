//! Host environment facts.
//!
//! Firmware mode, memory size and internet reachability, detected without
//! shelling out.
//!
//! # Design
//!
//! - **Injectable paths**: every probe reads the path it is given, so tests
//!   point them at temporary files instead of `/sys` and `/proc`.
//! - **TCP, not ICMP**: reachability is a `connect_timeout` to an HTTPS port,
//!   which firewalls almost always allow.
//! - **Trait seam**: the flow depends on [`ReachabilityProbe`], not on the
//!   network, so connectivity logic is testable offline.

use std::fmt;
use std::fs;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Settings;

/// Firmware interface the machine booted through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareMode {
    Uefi,
    Bios,
}

impl FirmwareMode {
    pub fn is_uefi(self) -> bool {
        matches!(self, Self::Uefi)
    }
}

impl fmt::Display for FirmwareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uefi => write!(f, "UEFI"),
            Self::Bios => write!(f, "BIOS"),
        }
    }
}

/// The kernel exposes the EFI variables directory only on UEFI boots.
pub fn detect_firmware_mode(efivars: &Path) -> FirmwareMode {
    if efivars.is_dir() {
        debug!("UEFI firmware detected ({:?} exists)", efivars);
        FirmwareMode::Uefi
    } else {
        info!("No EFI variables at {:?}, assuming legacy BIOS boot", efivars);
        FirmwareMode::Bios
    }
}

const KIB_PER_GIB: u64 = 1024 * 1024;

/// Total memory in whole GiB, rounded to nearest.
///
/// Reads `MemTotal` (kB) from a meminfo file. Returns `None` if the file or
/// the field is missing.
pub fn system_memory_gb(meminfo: &Path) -> Option<u64> {
    let content = match fs::read_to_string(meminfo) {
        Ok(c) => c,
        Err(e) => {
            warn!("Cannot read {:?}: {}", meminfo, e);
            return None;
        }
    };
    parse_mem_total_gb(&content)
}

fn parse_mem_total_gb(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: u64 = line
        .trim_start_matches("MemTotal:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some((kib + KIB_PER_GIB / 2) / KIB_PER_GIB)
}

// ============================================================================
// Reachability
// ============================================================================

/// Answers "can we reach the internet right now".
pub trait ReachabilityProbe {
    fn is_reachable(&self) -> bool;

    /// Human-readable target, for logs and error messages.
    fn target(&self) -> String;
}

/// TCP connect to a well-known host.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.probe_host.clone(),
            settings.probe_port,
            settings.probe_timeout,
        )
    }
}

impl ReachabilityProbe for TcpProbe {
    /// Fails closed: a DNS failure, refusal or timeout on every resolved
    /// address means unreachable.
    fn is_reachable(&self) -> bool {
        let addrs = match (self.host.as_str(), self.port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!("Cannot resolve {}: {}", self.host, e);
                return false;
            }
        };
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(_) => {
                    info!("Reachability confirmed ({} via {})", self.target(), addr);
                    return true;
                }
                Err(e) => debug!("Connect to {} failed: {}", addr, e),
            }
        }
        warn!("{} is not reachable", self.target());
        false
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_firmware_mode_follows_efivars_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(detect_firmware_mode(dir.path()), FirmwareMode::Uefi);
        assert_eq!(
            detect_firmware_mode(&dir.path().join("missing")),
            FirmwareMode::Bios
        );
    }

    #[test]
    fn test_mem_total_rounds_to_nearest_gib() {
        // 7.76 GiB reported by a typical "8 GB" machine
        assert_eq!(parse_mem_total_gb("MemTotal:        8137752 kB\nMemFree: 1 kB\n"), Some(8));
        assert_eq!(parse_mem_total_gb("MemTotal: 1572864 kB\n"), Some(2));
        assert_eq!(parse_mem_total_gb("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn test_system_memory_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("meminfo");
        fs::write(&path, "MemTotal:       16384000 kB\n").expect("write");
        assert_eq!(system_memory_gb(&path), Some(16));
        assert_eq!(system_memory_gb(&dir.path().join("absent")), None);
    }

    #[test]
    fn test_tcp_probe_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let probe = TcpProbe::new("127.0.0.1", port, Duration::from_secs(1));
        assert!(probe.is_reachable());
        assert_eq!(probe.target(), format!("127.0.0.1:{}", port));

        drop(listener);
        let closed = TcpProbe::new("127.0.0.1", port, Duration::from_millis(200));
        assert!(!closed.is_reachable());
    }
}
