//! Typed disk tool commands.
//!
//! Partition geometry is always passed to `sgdisk` in MiB (`M` suffix), the
//! unit the planner computes in, so no rounding happens at this boundary.

use std::path::PathBuf;

use crate::tool_traits::ToolCommand;
use crate::types::Filesystem;

/// GPT type code for an EFI system partition.
pub const TYPE_EFI: &str = "ef00";
/// GPT type code for Linux swap.
pub const TYPE_SWAP: &str = "8200";
/// GPT type code for a plain Linux root.
pub const TYPE_LINUX: &str = "8300";
/// GPT type code for a LUKS container.
pub const TYPE_LUKS: &str = "8309";

fn path_arg(path: &std::path::Path) -> String {
    path.display().to_string()
}

// ============================================================================
// Discovery
// ============================================================================

/// `lsblk` listing of whole disks, in bytes, as JSON.
#[derive(Debug, Clone, Default)]
pub struct ListBlockDevices;

impl ToolCommand for ListBlockDevices {
    fn program(&self) -> &'static str {
        "lsblk"
    }

    fn to_cli_args(&self) -> Vec<String> {
        ["-J", "-b", "-d", "-o", "NAME,PATH,SIZE,MODEL,TYPE,RM,RO,TRAN"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn is_destructive(&self) -> bool {
        false
    }
}

/// `sfdisk --json` dump of a disk's partition table.
#[derive(Debug, Clone)]
pub struct DumpPartitionTable {
    pub disk: PathBuf,
}

impl ToolCommand for DumpPartitionTable {
    fn program(&self) -> &'static str {
        "sfdisk"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--json".to_string(), path_arg(&self.disk)]
    }

    fn is_destructive(&self) -> bool {
        false
    }
}

// ============================================================================
// Partition table
// ============================================================================

/// Destroy GPT and MBR structures on the whole disk.
#[derive(Debug, Clone)]
pub struct ZapDisk {
    pub disk: PathBuf,
}

impl ToolCommand for ZapDisk {
    fn program(&self) -> &'static str {
        "sgdisk"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--zap-all".to_string(), path_arg(&self.disk)]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// Write a fresh, empty GPT.
#[derive(Debug, Clone)]
pub struct NewGptTable {
    pub disk: PathBuf,
}

impl ToolCommand for NewGptTable {
    fn program(&self) -> &'static str {
        "sgdisk"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--clear".to_string(), path_arg(&self.disk)]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// Create one partition at an absolute MiB offset.
///
/// | Field       | Flag                                  |
/// |-------------|---------------------------------------|
/// | `number`    | `--new=<n>:<start>M:+<size>M`         |
/// | `typecode`  | `--typecode=<n>:<code>`               |
/// | `label`     | `--change-name=<n>:<label>`           |
#[derive(Debug, Clone)]
pub struct NewPartition {
    pub disk: PathBuf,
    pub number: u32,
    pub start_mib: u64,
    pub size_mib: u64,
    pub typecode: &'static str,
    pub label: &'static str,
}

impl ToolCommand for NewPartition {
    fn program(&self) -> &'static str {
        "sgdisk"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            format!("--new={}:{}M:+{}M", self.number, self.start_mib, self.size_mib),
            format!("--typecode={}:{}", self.number, self.typecode),
            format!("--change-name={}:{}", self.number, self.label),
            path_arg(&self.disk),
        ]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

// ============================================================================
// Filesystems and swap
// ============================================================================

/// FAT32 filesystem for the EFI system partition.
#[derive(Debug, Clone)]
pub struct FormatFat32 {
    pub device: PathBuf,
}

impl ToolCommand for FormatFat32 {
    fn program(&self) -> &'static str {
        "mkfs.fat"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-F".to_string(), "32".to_string(), path_arg(&self.device)]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// Root filesystem.
#[derive(Debug, Clone)]
pub struct FormatFilesystem {
    pub filesystem: Filesystem,
    pub device: PathBuf,
}

impl ToolCommand for FormatFilesystem {
    fn program(&self) -> &'static str {
        self.filesystem.mkfs_program()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            self.filesystem.force_flag().to_string(),
            path_arg(&self.device),
        ]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct MakeSwap {
    pub device: PathBuf,
}

impl ToolCommand for MakeSwap {
    fn program(&self) -> &'static str {
        "mkswap"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![path_arg(&self.device)]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct SwapOn {
    pub device: PathBuf,
}

impl ToolCommand for SwapOn {
    fn program(&self) -> &'static str {
        "swapon"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![path_arg(&self.device)]
    }

    fn is_destructive(&self) -> bool {
        false
    }
}

// ============================================================================
// Mounting
// ============================================================================

/// `mkdir -p`
#[derive(Debug, Clone)]
pub struct MakeDir {
    pub path: PathBuf,
}

impl ToolCommand for MakeDir {
    fn program(&self) -> &'static str {
        "mkdir"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-p".to_string(), path_arg(&self.path)]
    }

    fn is_destructive(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct Mount {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl ToolCommand for Mount {
    fn program(&self) -> &'static str {
        "mount"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![path_arg(&self.source), path_arg(&self.target)]
    }

    fn is_destructive(&self) -> bool {
        false
    }
}
