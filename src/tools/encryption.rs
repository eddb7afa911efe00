//! LUKS commands and the key file they read the passphrase from.
//!
//! # Security Model
//!
//! The passphrase never appears on argv (visible in `ps`). It is written to a
//! 0600 key file under the configured key-file directory (tmpfs on the live
//! medium), the path is handed to `cryptsetup --key-file`, and the file is
//! overwritten with zeros and unlinked when the [`SecretFile`] is dropped.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::tool_traits::ToolCommand;

static KEYFILE_COUNTER: AtomicU64 = AtomicU64::new(0);

// ============================================================================
// SecretFile - RAII key file
// ============================================================================

/// Short-lived key file that is wiped and removed on drop.
#[derive(Debug)]
pub struct SecretFile {
    path: PathBuf,
    size: usize,
}

impl SecretFile {
    /// Write `secret` to a new 0600 file inside `dir`.
    ///
    /// The file is created with `create_new`, so an existing file at the
    /// chosen name is an error rather than something we write through.
    pub fn create_in(dir: &Path, secret: &str) -> std::io::Result<Self> {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let seq = KEYFILE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!(
            ".archstrap_key_{}_{}_{:08x}",
            std::process::id(),
            seq,
            nanos
        ));

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)?;
        file.write_all(secret.as_bytes())?;
        file.sync_all()?;

        debug!("Key file created at {:?}", path);
        Ok(Self {
            path,
            size: secret.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn wipe(&self) {
        if let Ok(mut file) = OpenOptions::new().write(true).open(&self.path) {
            let _ = file.write_all(&vec![0u8; self.size]);
            let _ = file.sync_all();
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove key file {:?}: {}", self.path, e);
        }
    }
}

impl Drop for SecretFile {
    fn drop(&mut self) {
        self.wipe();
    }
}

// ============================================================================
// cryptsetup
// ============================================================================

/// `cryptsetup luksFormat` with LUKS2 defaults and a key file.
#[derive(Debug, Clone)]
pub struct LuksFormat {
    pub device: PathBuf,
    pub key_file: PathBuf,
}

impl ToolCommand for LuksFormat {
    fn program(&self) -> &'static str {
        "cryptsetup"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "luksFormat".to_string(),
            "--type".to_string(),
            "luks2".to_string(),
            "--batch-mode".to_string(),
            "--key-file".to_string(),
            self.key_file.display().to_string(),
            self.device.display().to_string(),
        ]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `cryptsetup open`; the unlocked device appears at `/dev/mapper/<name>`.
#[derive(Debug, Clone)]
pub struct LuksOpen {
    pub device: PathBuf,
    pub mapper_name: String,
    pub key_file: PathBuf,
}

impl ToolCommand for LuksOpen {
    fn program(&self) -> &'static str {
        "cryptsetup"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "open".to_string(),
            "--key-file".to_string(),
            self.key_file.display().to_string(),
            self.device.display().to_string(),
            self.mapper_name.clone(),
        ]
    }

    fn is_destructive(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_secret_file_is_private_and_removed_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = {
            let secret = SecretFile::create_in(dir.path(), "correct horse").expect("create");
            let meta = fs::metadata(secret.path()).expect("metadata");
            assert_eq!(meta.permissions().mode() & 0o777, 0o600);
            assert_eq!(fs::read_to_string(secret.path()).expect("read"), "correct horse");
            secret.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_secret_files_get_distinct_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = SecretFile::create_in(dir.path(), "a").expect("first");
        let b = SecretFile::create_in(dir.path(), "b").expect("second");
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_luks_format_never_carries_passphrase() {
        let cmd = LuksFormat {
            device: PathBuf::from("/dev/sda3"),
            key_file: PathBuf::from("/tmp/.archstrap_key"),
        };
        let args = cmd.to_cli_args();
        assert_eq!(args.first().map(String::as_str), Some("luksFormat"));
        assert!(args.contains(&"--key-file".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/dev/sda3"));
    }

    #[test]
    fn test_luks_open_args() {
        let cmd = LuksOpen {
            device: PathBuf::from("/dev/sda3"),
            mapper_name: "cryptroot".to_string(),
            key_file: PathBuf::from("/tmp/k"),
        };
        assert_eq!(
            cmd.to_cli_args(),
            vec!["open", "--key-file", "/tmp/k", "/dev/sda3", "cryptroot"]
        );
    }
}
