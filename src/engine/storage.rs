//! Storage operation sequencing.
//!
//! Translates a [`PartitionPlan`] and its [`PlannedLayout`] into the ordered
//! list of [`DiskOp`]s the partition executor runs.
//!
//! | EFI      | Encryption | Operations |
//! |----------|------------|------------|
//! | create   | no         | Zap → GPT → EFI → FAT32 → Swap → mkswap → swapon → Root → mkfs → mount → boot |
//! | create   | yes        | ... → Root → luksFormat → open → mkfs(mapper) → mount → boot |
//! | reuse    | either     | same, minus Zap, GPT, EFI creation and FAT32 |
//!
//! # Design
//!
//! - **Pure logic**: no I/O; the executor owns execution.
//! - **Typed output**: each `DiskOp` lowers to exactly one `ToolCommand`.
//! - **Categorised failure**: each op knows which error a failure becomes.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{MAPPER_DIR, Settings};
use crate::engine::planner::{PartitionPlan, PlannedLayout, PlannedPartition};
use crate::error::ProvisionError;
use crate::stage_config::StageConfig;
use crate::tool_traits::{Invocation, ToolCommand};
use crate::tools::disk::{
    self, FormatFat32, FormatFilesystem, MakeDir, MakeSwap, Mount, NewGptTable, NewPartition,
    SwapOn, ZapDisk,
};
use crate::tools::encryption::{LuksFormat, LuksOpen};
use crate::types::Filesystem;

// ============================================================================
// Disk operation types
// ============================================================================

/// One step of applying a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskOp {
    /// Destroy existing partition structures
    ZapDisk { disk: PathBuf },
    /// Write an empty GPT
    NewGptTable { disk: PathBuf },
    /// Create one partition
    CreatePartition {
        disk: PathBuf,
        number: u32,
        start_mib: u64,
        size_mib: u64,
        typecode: &'static str,
        label: &'static str,
    },
    FormatFat32 { device: PathBuf },
    MakeSwap { device: PathBuf },
    SwapOn { device: PathBuf },
    /// Initialise a LUKS2 container; the key comes from the executor
    LuksFormat { device: PathBuf },
    /// Unlock a LUKS container to `/dev/mapper/<mapper_name>`
    LuksOpen { device: PathBuf, mapper_name: String },
    FormatFs { device: PathBuf, filesystem: Filesystem },
    MakeDir { path: PathBuf },
    Mount { device: PathBuf, mountpoint: PathBuf },
}

impl DiskOp {
    /// Error category a failure of this step is reported as.
    pub fn category(&self) -> fn(String) -> ProvisionError {
        match self {
            Self::ZapDisk { .. } | Self::NewGptTable { .. } | Self::CreatePartition { .. } => {
                ProvisionError::Partition
            }
            Self::FormatFat32 { .. } | Self::MakeSwap { .. } | Self::FormatFs { .. } => {
                ProvisionError::Format
            }
            Self::LuksFormat { .. } | Self::LuksOpen { .. } => ProvisionError::Encryption,
            Self::SwapOn { .. } | Self::MakeDir { .. } | Self::Mount { .. } => ProvisionError::Mount,
        }
    }

    /// True for steps that need the LUKS key file.
    pub fn needs_key(&self) -> bool {
        matches!(self, Self::LuksFormat { .. } | Self::LuksOpen { .. })
    }

    /// Alters the partition table itself.
    pub fn alters_table(&self) -> bool {
        matches!(
            self,
            Self::ZapDisk { .. } | Self::NewGptTable { .. } | Self::CreatePartition { .. }
        )
    }

    /// Lower to a runnable invocation. `key_file` is required for LUKS steps.
    pub fn invocation(&self, key_file: Option<&Path>) -> Result<Invocation, ProvisionError> {
        let key = || {
            key_file
                .map(Path::to_path_buf)
                .ok_or_else(|| ProvisionError::encryption("no passphrase was supplied"))
        };
        Ok(match self {
            Self::ZapDisk { disk } => ZapDisk { disk: disk.clone() }.invocation(),
            Self::NewGptTable { disk } => NewGptTable { disk: disk.clone() }.invocation(),
            Self::CreatePartition { disk, number, start_mib, size_mib, typecode, label } => {
                NewPartition {
                    disk: disk.clone(),
                    number: *number,
                    start_mib: *start_mib,
                    size_mib: *size_mib,
                    typecode: *typecode,
                    label: *label,
                }
                .invocation()
            }
            Self::FormatFat32 { device } => FormatFat32 { device: device.clone() }.invocation(),
            Self::MakeSwap { device } => MakeSwap { device: device.clone() }.invocation(),
            Self::SwapOn { device } => SwapOn { device: device.clone() }.invocation(),
            Self::LuksFormat { device } => LuksFormat {
                device: device.clone(),
                key_file: key()?,
            }
            .invocation(),
            Self::LuksOpen { device, mapper_name } => LuksOpen {
                device: device.clone(),
                mapper_name: mapper_name.clone(),
                key_file: key()?,
            }
            .invocation(),
            Self::FormatFs { device, filesystem } => FormatFilesystem {
                filesystem: *filesystem,
                device: device.clone(),
            }
            .invocation(),
            Self::MakeDir { path } => MakeDir { path: path.clone() }.invocation(),
            Self::Mount { device, mountpoint } => Mount {
                source: device.clone(),
                target: mountpoint.clone(),
            }
            .invocation(),
        })
    }
}

impl fmt::Display for DiskOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZapDisk { disk } => write!(f, "Wipe partition table on {}", disk.display()),
            Self::NewGptTable { disk } => write!(f, "Create GPT on {}", disk.display()),
            Self::CreatePartition { disk, number, size_mib, label, .. } => write!(
                f,
                "Create {} partition {} on {} ({} MiB)",
                label,
                number,
                disk.display(),
                size_mib
            ),
            Self::FormatFat32 { device } => write!(f, "Format {} as FAT32", device.display()),
            Self::MakeSwap { device } => write!(f, "Initialise swap on {}", device.display()),
            Self::SwapOn { device } => write!(f, "Enable swap on {}", device.display()),
            Self::LuksFormat { device } => write!(f, "Encrypt {}", device.display()),
            Self::LuksOpen { device, mapper_name } => {
                write!(f, "Unlock {} as /dev/mapper/{}", device.display(), mapper_name)
            }
            Self::FormatFs { device, filesystem } => {
                write!(f, "Format {} as {}", device.display(), filesystem)
            }
            Self::MakeDir { path } => write!(f, "Create {}", path.display()),
            Self::Mount { device, mountpoint } => {
                write!(f, "Mount {} at {}", device.display(), mountpoint.display())
            }
        }
    }
}

// ============================================================================
// Sequencing
// ============================================================================

fn create(disk: &Path, p: &PlannedPartition, typecode: &'static str, label: &'static str) -> DiskOp {
    DiskOp::CreatePartition {
        disk: disk.to_path_buf(),
        number: p.number,
        start_mib: p.start_mib,
        size_mib: p.size_mib,
        typecode,
        label,
    }
}

/// Ordered operations that apply `plan` as laid out by `layout`.
pub fn disk_operations(plan: &PartitionPlan, layout: &PlannedLayout, settings: &Settings) -> Vec<DiskOp> {
    let disk = layout.disk.as_path();
    let mut ops = Vec::new();

    if layout.efi.created {
        ops.push(DiskOp::ZapDisk { disk: disk.to_path_buf() });
        ops.push(DiskOp::NewGptTable { disk: disk.to_path_buf() });
        ops.push(create(disk, &layout.efi, disk::TYPE_EFI, "EFI"));
        ops.push(DiskOp::FormatFat32 { device: layout.efi.path.clone() });
    }

    ops.push(create(disk, &layout.swap, disk::TYPE_SWAP, "swap"));
    ops.push(DiskOp::MakeSwap { device: layout.swap.path.clone() });
    ops.push(DiskOp::SwapOn { device: layout.swap.path.clone() });

    let root_type = if plan.encrypt() { disk::TYPE_LUKS } else { disk::TYPE_LINUX };
    ops.push(create(disk, &layout.root, root_type, "root"));

    let root_device = if plan.encrypt() {
        ops.push(DiskOp::LuksFormat { device: layout.root.path.clone() });
        ops.push(DiskOp::LuksOpen {
            device: layout.root.path.clone(),
            mapper_name: settings.mapper_name.clone(),
        });
        settings.mapped_root_device()
    } else {
        layout.root.path.clone()
    };

    ops.push(DiskOp::FormatFs {
        device: root_device.clone(),
        filesystem: plan.filesystem(),
    });
    ops.extend(mount_hierarchy(&root_device, &layout.efi.path, &settings.mount_root));
    ops
}

/// Root first, then the boot directory inside it, then EFI on top.
fn mount_hierarchy(root_device: &Path, efi: &Path, mount_root: &Path) -> [DiskOp; 3] {
    let boot = mount_root.join("boot");
    [
        DiskOp::Mount {
            device: root_device.to_path_buf(),
            mountpoint: mount_root.to_path_buf(),
        },
        DiskOp::MakeDir { path: boot.clone() },
        DiskOp::Mount {
            device: efi.to_path_buf(),
            mountpoint: boot,
        },
    ]
}

/// Operations that bring a persisted layout back online after a reboot.
///
/// Nothing here formats or repartitions. An encrypted root is opened under
/// the mapper name recorded in `stage.root_device`, which may differ from
/// the one currently configured.
pub fn remount_operations(stage: &StageConfig, settings: &Settings) -> Vec<DiskOp> {
    let mut ops = Vec::new();
    if stage.encrypted {
        let mapper_name = stage
            .root_device
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|_| stage.root_device.starts_with(MAPPER_DIR))
            .map_or_else(|| settings.mapper_name.clone(), str::to_string);
        ops.push(DiskOp::LuksOpen {
            device: stage.root_partition.clone(),
            mapper_name,
        });
    }
    ops.extend(mount_hierarchy(
        &stage.root_device,
        &stage.efi_partition,
        &stage.mount_root,
    ));
    ops.push(DiskOp::SwapOn { device: stage.swap_partition.clone() });
    ops
}

/// Multi-line numbered listing for logs and the `plan` subcommand.
pub fn describe(ops: &[DiskOp]) -> String {
    ops.iter()
        .enumerate()
        .map(|(i, op)| format!("{:>2}. {}", i + 1, op))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::planner::{BlockDevice, ExistingPartition, GIB, MIB, PlanRequest};

    fn disk() -> BlockDevice {
        BlockDevice {
            path: PathBuf::from("/dev/sda"),
            name: "sda".into(),
            size_bytes: 250 * GIB,
            model: String::new(),
        }
    }

    fn ops_for(encrypt: bool) -> Vec<DiskOp> {
        let plan = PartitionPlan::recommended(&disk(), 8, encrypt, Filesystem::Ext4)
            .expect("plan fits"); // test: known-good input
        let layout = plan.layout().expect("layout"); // test: known-good input
        disk_operations(&plan, &layout, &Settings::default())
    }

    #[test]
    fn test_plain_sequence_order() {
        let ops = ops_for(false);
        assert!(matches!(ops[0], DiskOp::ZapDisk { .. }));
        assert!(matches!(ops[1], DiskOp::NewGptTable { .. }));
        assert!(matches!(ops[2], DiskOp::CreatePartition { number: 1, typecode: "ef00", .. }));
        assert!(matches!(ops[3], DiskOp::FormatFat32 { .. }));
        assert!(matches!(ops[4], DiskOp::CreatePartition { number: 2, typecode: "8200", .. }));
        assert!(matches!(ops[5], DiskOp::MakeSwap { .. }));
        assert!(matches!(ops[6], DiskOp::SwapOn { .. }));
        assert!(matches!(ops[7], DiskOp::CreatePartition { number: 3, typecode: "8300", .. }));
        assert_eq!(
            ops[8],
            DiskOp::FormatFs { device: PathBuf::from("/dev/sda3"), filesystem: Filesystem::Ext4 }
        );
        assert_eq!(
            ops[9],
            DiskOp::Mount { device: PathBuf::from("/dev/sda3"), mountpoint: PathBuf::from("/mnt") }
        );
        assert_eq!(ops[10], DiskOp::MakeDir { path: PathBuf::from("/mnt/boot") });
        assert_eq!(
            ops[11],
            DiskOp::Mount { device: PathBuf::from("/dev/sda1"), mountpoint: PathBuf::from("/mnt/boot") }
        );
        assert_eq!(ops.len(), 12);
    }

    #[test]
    fn test_encrypted_root_is_formatted_through_mapper() {
        let ops = ops_for(true);
        let format_pos = ops
            .iter()
            .position(|op| matches!(op, DiskOp::LuksFormat { .. }))
            .expect("luksFormat present"); // test: known-good input
        let open_pos = ops
            .iter()
            .position(|op| matches!(op, DiskOp::LuksOpen { .. }))
            .expect("open present"); // test: known-good input
        assert!(format_pos < open_pos);
        assert!(ops.contains(&DiskOp::FormatFs {
            device: PathBuf::from("/dev/mapper/cryptroot"),
            filesystem: Filesystem::Ext4,
        }));
        assert!(ops.contains(&DiskOp::Mount {
            device: PathBuf::from("/dev/mapper/cryptroot"),
            mountpoint: PathBuf::from("/mnt"),
        }));
        assert!(!ops.contains(&DiskOp::FormatFs {
            device: PathBuf::from("/dev/sda3"),
            filesystem: Filesystem::Ext4,
        }));
    }

    #[test]
    fn test_reused_efi_never_touches_table_or_efi() {
        let d = disk();
        let existing = vec![ExistingPartition {
            device: PathBuf::from("/dev/sda1"),
            number: 1,
            start_bytes: MIB,
            size_bytes: 512 * MIB,
            is_esp: true,
        }];
        let plan = PartitionPlan::new(PlanRequest {
            disk: &d,
            existing: &existing,
            reuse_efi: Some(1),
            swap_gb: 4,
            root_gb: 50,
            encrypt: false,
            filesystem: Filesystem::Xfs,
        })
        .expect("fits"); // test: known-good input
        let layout = plan.layout().expect("layout"); // test: known-good input
        let ops = disk_operations(&plan, &layout, &Settings::default());

        assert!(!ops.iter().any(|op| matches!(op, DiskOp::ZapDisk { .. } | DiskOp::NewGptTable { .. })));
        assert!(!ops.iter().any(|op| matches!(op, DiskOp::FormatFat32 { .. })));
        assert!(!ops.iter().any(|op| matches!(op, DiskOp::CreatePartition { number: 1, .. })));
        assert!(ops.contains(&DiskOp::Mount {
            device: PathBuf::from("/dev/sda1"),
            mountpoint: PathBuf::from("/mnt/boot"),
        }));
    }

    #[test]
    fn test_categories() {
        assert!(matches!(
            (DiskOp::ZapDisk { disk: "/dev/sda".into() }.category())("x".into()),
            ProvisionError::Partition(_)
        ));
        assert!(matches!(
            (DiskOp::SwapOn { device: "/dev/sda2".into() }.category())("x".into()),
            ProvisionError::Mount(_)
        ));
        assert!(matches!(
            (DiskOp::LuksOpen { device: "/dev/sda3".into(), mapper_name: "c".into() }.category())("x".into()),
            ProvisionError::Encryption(_)
        ));
    }

    #[test]
    fn test_luks_op_without_key_is_encryption_error() {
        let op = DiskOp::LuksFormat { device: "/dev/sda3".into() };
        assert!(matches!(op.invocation(None), Err(ProvisionError::Encryption(_))));
        let inv = op.invocation(Some(Path::new("/tmp/k"))).expect("key given"); // test: known-good input
        assert_eq!(inv.program, "cryptsetup");
    }

    #[test]
    fn test_remount_opens_the_recorded_mapper_name() {
        let stage = StageConfig {
            target_disk: "/dev/sda".into(),
            efi_partition: "/dev/sda1".into(),
            swap_partition: "/dev/sda2".into(),
            root_partition: "/dev/sda3".into(),
            root_device: "/dev/mapper/oldroot".into(),
            encrypted: true,
            mount_root: "/mnt".into(),
            filesystem: Filesystem::Ext4,
        };
        let settings = Settings {
            mapper_name: "cryptroot".into(),
            ..Settings::default()
        };

        let ops = remount_operations(&stage, &settings);
        assert_eq!(
            ops[0],
            DiskOp::LuksOpen { device: "/dev/sda3".into(), mapper_name: "oldroot".into() }
        );
        assert_eq!(
            ops[1],
            DiskOp::Mount { device: "/dev/mapper/oldroot".into(), mountpoint: "/mnt".into() }
        );
    }

    #[test]
    fn test_describe_numbers_steps() {
        let text = describe(&ops_for(false));
        assert!(text.starts_with(" 1. Wipe partition table on /dev/sda"));
        assert!(text.contains("12. Mount /dev/sda1 at /mnt/boot"));
    }
}
