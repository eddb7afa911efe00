//! Pre-flight checks that gate every destructive path.
//!
//! Fact gathering ([`HostFacts::detect`]) is kept apart from the decision
//! ([`PreconditionChecker::check`]) so the decision is a pure function. A
//! passing check yields a [`VerifiedHost`], and an installation session can
//! only be built from one.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{ProvisionError, Result};
use crate::hardware::{self, FirmwareMode};
use crate::kv;

/// Tools the disk and network paths shell out to.
pub const REQUIRED_TOOLS: &[&str] = &[
    "lsblk", "sfdisk", "sgdisk", "mkfs.fat", "mkswap", "swapon", "mount", "cryptsetup", "ip",
];

/// Only needed for the wireless/wired branches.
const OPTIONAL_TOOLS: &[&str] = &["iwctl", "dhcpcd"];

/// Facts about the running host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
    pub euid: u32,
    pub distro_id: Option<String>,
    pub distro_like: Vec<String>,
    pub firmware: FirmwareMode,
    pub memory_gb: Option<u64>,
    pub missing_tools: Vec<String>,
}

impl HostFacts {
    /// Read the facts from the paths named in `settings`.
    pub fn detect(settings: &Settings) -> Self {
        let (distro_id, distro_like) = read_os_release(&settings.os_release_path);
        let facts = Self {
            euid: nix::unistd::geteuid().as_raw(),
            distro_id,
            distro_like,
            firmware: hardware::detect_firmware_mode(&settings.efivars_path),
            memory_gb: hardware::system_memory_gb(&settings.meminfo_path),
            missing_tools: REQUIRED_TOOLS
                .iter()
                .filter(|t| !tool_on_path(t))
                .map(|t| t.to_string())
                .collect(),
        };
        for tool in OPTIONAL_TOOLS.iter().filter(|t| !tool_on_path(t)) {
            debug!("Optional tool not found: {}", tool);
        }
        info!(
            "Host facts: euid={} distro={:?} firmware={} memory={:?}GiB",
            facts.euid, facts.distro_id, facts.firmware, facts.memory_gb
        );
        facts
    }
}

fn read_os_release(path: &Path) -> (Option<String>, Vec<String>) {
    match fs::read_to_string(path) {
        Ok(content) => {
            let map = kv::parse(&content);
            let like = map
                .get("ID_LIKE")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            (map.get("ID").cloned(), like)
        }
        Err(e) => {
            warn!("Cannot read {:?}: {}", path, e);
            (None, Vec::new())
        }
    }
}

fn tool_on_path(name: &str) -> bool {
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| dir.join(name).is_file()))
        .unwrap_or(false)
}

/// Proof that the host passed every precondition.
///
/// Cannot be constructed outside this module except through
/// [`PreconditionChecker::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedHost {
    memory_gb: Option<u64>,
    missing_tools: Vec<String>,
}

impl VerifiedHost {
    /// Installed memory in GiB, if `MemTotal` could be read.
    pub fn memory_gb(&self) -> Option<u64> {
        self.memory_gb
    }

    pub fn missing_tools(&self) -> &[String] {
        &self.missing_tools
    }
}

/// Decides whether provisioning may start.
#[derive(Debug, Clone)]
pub struct PreconditionChecker {
    expected_distro: String,
    efivars_path: PathBuf,
}

impl PreconditionChecker {
    pub fn new(expected_distro: impl Into<String>, efivars_path: impl Into<PathBuf>) -> Self {
        Self {
            expected_distro: expected_distro.into(),
            efivars_path: efivars_path.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.expected_distro.clone(), settings.efivars_path.clone())
    }

    /// Check privilege, then distribution, then firmware mode.
    ///
    /// All failures are fatal. Missing tools are only warned about; the
    /// command that needs one will fail with its own diagnostic.
    pub fn check(&self, facts: &HostFacts) -> Result<VerifiedHost> {
        if facts.euid != 0 {
            return Err(ProvisionError::Privilege { euid: facts.euid });
        }

        let matches_distro = facts.distro_id.as_deref() == Some(self.expected_distro.as_str())
            || facts.distro_like.iter().any(|l| *l == self.expected_distro);
        if !matches_distro {
            return Err(ProvisionError::Platform(format!(
                "expected a {} system, found {}",
                self.expected_distro,
                facts.distro_id.as_deref().unwrap_or("an unidentified distribution")
            )));
        }

        if !facts.firmware.is_uefi() {
            return Err(ProvisionError::FirmwareMode(self.efivars_path.clone()));
        }

        if !facts.missing_tools.is_empty() {
            warn!("Missing tools: {}", facts.missing_tools.join(", "));
        }

        if facts.memory_gb.is_none() {
            warn!("Installed memory is unknown; swap recommendations assume 0 GiB");
        }

        Ok(VerifiedHost {
            memory_gb: facts.memory_gb,
            missing_tools: facts.missing_tools.clone(),
        })
    }

    /// Detect facts from the host and check them.
    pub fn verify(&self, settings: &Settings) -> Result<VerifiedHost> {
        self.check(&HostFacts::detect(settings))
    }
}
