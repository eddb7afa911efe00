//! Orchestrator settings.
//!
//! Every path and tunable a component needs lives in one `Settings` value that
//! the session owns and hands to each component at construction. Nothing reads
//! process-wide files behind the caller's back.
//!
//! Settings are persisted as `KEY=value` lines. A missing file means defaults;
//! unknown keys are logged and ignored; malformed values are a hard error.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ProvisionError, Result};
use crate::kv;
use crate::types::{Filesystem, Toggle};

/// Where device-mapper exposes unlocked containers.
pub const MAPPER_DIR: &str = "/dev/mapper";

/// Default location of the settings file.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/archstrap/settings.conf";

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Append-only log file
    pub log_file: PathBuf,
    /// Stage configuration handed to later stages
    pub stage_config: PathBuf,
    /// Where the new root is mounted
    pub mount_root: PathBuf,
    /// Filesystem for the root volume
    pub filesystem: Filesystem,
    /// Whether quick install encrypts the root partition
    pub encrypt: Toggle,
    /// Device-mapper name for the unlocked root
    pub mapper_name: String,
    /// Host used by the reachability probe
    pub probe_host: String,
    /// TCP port used by the reachability probe
    pub probe_port: u16,
    /// Reachability probe timeout
    pub probe_timeout: Duration,
    /// Wait after association or DHCP before re-probing
    pub settle: Duration,
    /// Distribution id accepted by the precondition check
    pub expected_distro: String,
    /// EFI variables directory (present only on UEFI boots)
    pub efivars_path: PathBuf,
    /// os-release file identifying the host distribution
    pub os_release_path: PathBuf,
    /// meminfo file used for the swap recommendation
    pub meminfo_path: PathBuf,
    /// Directory for short-lived LUKS key files
    pub keyfile_dir: PathBuf,
    /// Command run for the "Install Base" stage
    pub base_stage_command: Option<String>,
    /// Command run for the "Configure System" stage
    pub system_stage_command: Option<String>,
    /// Command run for the "Install Desktop" stage
    pub desktop_stage_command: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("/var/log/archstrap.log"),
            stage_config: PathBuf::from("/root/.archstrap/stage.conf"),
            mount_root: PathBuf::from("/mnt"),
            filesystem: Filesystem::Ext4,
            encrypt: Toggle::No,
            mapper_name: "cryptroot".to_string(),
            probe_host: "archlinux.org".to_string(),
            probe_port: 443,
            probe_timeout: Duration::from_secs(5),
            settle: Duration::from_secs(5),
            expected_distro: "arch".to_string(),
            efivars_path: PathBuf::from("/sys/firmware/efi/efivars"),
            os_release_path: PathBuf::from("/etc/os-release"),
            meminfo_path: PathBuf::from("/proc/meminfo"),
            keyfile_dir: PathBuf::from("/tmp"),
            base_stage_command: None,
            system_stage_command: None,
            desktop_stage_command: None,
        }
    }
}

impl Settings {
    /// Load settings from a `KEY=value` file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(ProvisionError::config(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Parse settings from `KEY=value` text on top of the defaults.
    pub fn parse(content: &str) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in kv::parse(content) {
            settings.apply(&key, &value)?;
        }
        Ok(settings)
    }

    /// Set one key. Unknown keys are ignored with a warning.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "LOG_FILE" => self.log_file = non_empty_path(key, value)?,
            "STAGE_CONFIG" => self.stage_config = non_empty_path(key, value)?,
            "MOUNT_ROOT" => self.mount_root = non_empty_path(key, value)?,
            "FILESYSTEM" => {
                self.filesystem = value
                    .parse()
                    .map_err(|_| invalid(key, value, "ext4, btrfs or xfs"))?
            }
            "ENCRYPT" => self.encrypt = value.parse().map_err(|_| invalid(key, value, "yes or no"))?,
            "MAPPER_NAME" => {
                if value.is_empty() || value.contains('/') {
                    return Err(invalid(key, value, "a device-mapper name without '/'"));
                }
                self.mapper_name = value.to_string();
            }
            "PROBE_HOST" => {
                if value.is_empty() {
                    return Err(invalid(key, value, "a host name"));
                }
                self.probe_host = value.to_string();
            }
            "PROBE_PORT" => self.probe_port = value.parse().map_err(|_| invalid(key, value, "a port number"))?,
            "PROBE_TIMEOUT_SECS" => self.probe_timeout = seconds(key, value)?,
            "SETTLE_SECS" => self.settle = seconds(key, value)?,
            "EXPECTED_DISTRO" => self.expected_distro = value.to_string(),
            "EFIVARS_PATH" => self.efivars_path = non_empty_path(key, value)?,
            "OS_RELEASE_PATH" => self.os_release_path = non_empty_path(key, value)?,
            "MEMINFO_PATH" => self.meminfo_path = non_empty_path(key, value)?,
            "KEYFILE_DIR" => self.keyfile_dir = non_empty_path(key, value)?,
            "BASE_STAGE_COMMAND" => self.base_stage_command = optional(value),
            "SYSTEM_STAGE_COMMAND" => self.system_stage_command = optional(value),
            "DESKTOP_STAGE_COMMAND" => self.desktop_stage_command = optional(value),
            _ => warn!("Ignoring unknown settings key {}", key),
        }
        Ok(())
    }

    /// Render all settings as `KEY=value` lines in a fixed order.
    pub fn to_kv_string(&self) -> String {
        let pairs = self.pairs();
        kv::render(
            Some("archstrap settings"),
            pairs.iter().map(|(k, v)| (*k, v.as_str())),
        )
    }

    /// Write the settings file, creating its directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ProvisionError::config(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        fs::write(path, self.to_kv_string())
            .map_err(|e| ProvisionError::config(format!("cannot write {}: {}", path.display(), e)))
    }

    fn pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("LOG_FILE", self.log_file.display().to_string()),
            ("STAGE_CONFIG", self.stage_config.display().to_string()),
            ("MOUNT_ROOT", self.mount_root.display().to_string()),
            ("FILESYSTEM", self.filesystem.to_string()),
            ("ENCRYPT", self.encrypt.to_string()),
            ("MAPPER_NAME", self.mapper_name.clone()),
            ("PROBE_HOST", self.probe_host.clone()),
            ("PROBE_PORT", self.probe_port.to_string()),
            ("PROBE_TIMEOUT_SECS", self.probe_timeout.as_secs().to_string()),
            ("SETTLE_SECS", self.settle.as_secs().to_string()),
            ("EXPECTED_DISTRO", self.expected_distro.clone()),
            ("EFIVARS_PATH", self.efivars_path.display().to_string()),
            ("OS_RELEASE_PATH", self.os_release_path.display().to_string()),
            ("MEMINFO_PATH", self.meminfo_path.display().to_string()),
            ("KEYFILE_DIR", self.keyfile_dir.display().to_string()),
            ("BASE_STAGE_COMMAND", self.base_stage_command.clone().unwrap_or_default()),
            ("SYSTEM_STAGE_COMMAND", self.system_stage_command.clone().unwrap_or_default()),
            ("DESKTOP_STAGE_COMMAND", self.desktop_stage_command.clone().unwrap_or_default()),
        ]
    }

    /// Mapped block device exposed once the encrypted root is unlocked.
    pub fn mapped_root_device(&self) -> PathBuf {
        PathBuf::from(MAPPER_DIR).join(&self.mapper_name)
    }

    /// Boot mount point under the new root.
    pub fn boot_mount(&self) -> PathBuf {
        self.mount_root.join("boot")
    }
}

fn invalid(key: &str, value: &str, expected: &str) -> ProvisionError {
    ProvisionError::config(format!("{}='{}' is invalid, expected {}", key, value, expected))
}

fn non_empty_path(key: &str, value: &str) -> Result<PathBuf> {
    if value.is_empty() {
        Err(invalid(key, value, "a path"))
    } else {
        Ok(PathBuf::from(value))
    }
}

fn seconds(key: &str, value: &str) -> Result<Duration> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| invalid(key, value, "a whole number of seconds"))
}

fn optional(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.trim().to_string())
    }
}
