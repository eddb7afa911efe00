//! Stage Configuration Store
//!
//! Persists the partitioning outcome so a later stage, possibly after a
//! reboot, can find the target devices.
//!
//! The file is `KEY=value` lines in a fixed key order. It is only ever written
//! whole: content goes to a sibling temporary file which is then renamed over
//! the target, so a reader never sees a partial file and persisting the same
//! layout twice yields byte-identical content.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{ProvisionError, Result};
use crate::executor::AppliedLayout;
use crate::kv;
use crate::types::{Filesystem, Toggle};

const HEADER: &str = "written by archstrap; do not edit";

/// Keys in the order they are written.
pub const KEYS: [&str; 8] = [
    "TARGET_DISK",
    "EFI_PARTITION",
    "SWAP_PARTITION",
    "ROOT_PARTITION",
    "ROOT_DEVICE",
    "ENCRYPTED",
    "MOUNT_ROOT",
    "FILESYSTEM",
];

/// Partitioning outcome as seen by later stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    pub target_disk: PathBuf,
    pub efi_partition: PathBuf,
    pub swap_partition: PathBuf,
    /// The partition itself (the LUKS container when encrypted)
    pub root_partition: PathBuf,
    /// What gets mounted as `/`: the mapper device when encrypted
    pub root_device: PathBuf,
    pub encrypted: bool,
    pub mount_root: PathBuf,
    pub filesystem: Filesystem,
}

impl From<&AppliedLayout> for StageConfig {
    fn from(applied: &AppliedLayout) -> Self {
        Self {
            target_disk: applied.target_disk.clone(),
            efi_partition: applied.efi_partition.clone(),
            swap_partition: applied.swap_partition.clone(),
            root_partition: applied.root_partition.clone(),
            root_device: applied.root_device.clone(),
            encrypted: applied.encrypted,
            mount_root: applied.mount_root.clone(),
            filesystem: applied.filesystem,
        }
    }
}

impl StageConfig {
    fn values(&self) -> [String; 8] {
        [
            self.target_disk.display().to_string(),
            self.efi_partition.display().to_string(),
            self.swap_partition.display().to_string(),
            self.root_partition.display().to_string(),
            self.root_device.display().to_string(),
            Toggle::from(self.encrypted).to_string(),
            self.mount_root.display().to_string(),
            self.filesystem.to_string(),
        ]
    }

    /// Serialize in the fixed key order.
    pub fn render(&self) -> String {
        let values = self.values();
        kv::render(
            Some(HEADER),
            KEYS.iter().copied().zip(values.iter().map(String::as_str)),
        )
    }

    /// Parse stage configuration text. Every key is required.
    pub fn parse(content: &str) -> Result<Self> {
        let map = kv::parse(content);
        let get = |key: &str| -> Result<&String> {
            map.get(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ProvisionError::config(format!("stage configuration lacks {}", key)))
        };
        let path = |key: &str| get(key).map(PathBuf::from);

        Ok(Self {
            target_disk: path("TARGET_DISK")?,
            efi_partition: path("EFI_PARTITION")?,
            swap_partition: path("SWAP_PARTITION")?,
            root_partition: path("ROOT_PARTITION")?,
            root_device: path("ROOT_DEVICE")?,
            encrypted: get("ENCRYPTED")?
                .parse::<Toggle>()
                .map_err(|_| ProvisionError::config("ENCRYPTED must be yes or no"))?
                .is_yes(),
            mount_root: path("MOUNT_ROOT")?,
            filesystem: get("FILESYSTEM")?
                .parse()
                .map_err(|_| ProvisionError::config("FILESYSTEM is not ext4, btrfs or xfs"))?,
        })
    }

    /// All pairs, for display.
    pub fn pairs(&self) -> BTreeMap<&'static str, String> {
        KEYS.iter().copied().zip(self.values()).collect()
    }
}

/// File-backed store at a fixed path.
#[derive(Debug, Clone)]
pub struct StageConfigStore {
    path: PathBuf,
}

impl StageConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the stage configuration with `applied`.
    pub fn persist(&self, applied: &AppliedLayout) -> Result<()> {
        self.write(&StageConfig::from(applied))
    }

    /// Overwrite the stage configuration.
    pub fn write(&self, config: &StageConfig) -> Result<()> {
        let write_err = |source| ProvisionError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let tmp = self.temp_path();
        let result = (|| {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(config.render().as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(e));
        }
        info!("Stage configuration written to {:?}", self.path);
        Ok(())
    }

    /// Read the stage configuration.
    pub fn load(&self) -> Result<StageConfig> {
        match fs::read_to_string(&self.path) {
            Ok(content) => StageConfig::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ProvisionError::NotFound(self.path.clone()))
            }
            Err(e) => Err(ProvisionError::config(format!(
                "cannot read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
