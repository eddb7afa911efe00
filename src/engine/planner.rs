//! Disk Planner
//!
//! Turns raw disk geometry and memory size into a partition plan.
//!
//! # Units
//!
//! Sizes offered to the operator are whole GiB (the unit `sgdisk`'s `G`
//! suffix uses). Disk capacity is floored to GiB for recommendations; all
//! placement arithmetic is done in MiB against the exact byte capacity.
//!
//! # Design
//!
//! - **Pure arithmetic**: [`recommend`] and [`PartitionPlan::layout`] do no
//!   I/O, so every size rule is unit-tested without a disk.
//! - **Immutable plans**: a [`PartitionPlan`] is validated once at
//!   construction and never edited; a different choice means a new plan.
//! - **Discovered, never recomputed**: a reused EFI partition keeps the
//!   number and position the partition table reports.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};
use crate::runner::{CommandRunner, run_checked};
use crate::tool_traits::ToolCommand;
use crate::tools::disk::{DumpPartitionTable, ListBlockDevices};
use crate::types::Filesystem;

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;
const MIB_PER_GIB: u64 = 1024;

/// Free space kept for the operating system beyond root.
pub const HEADROOM_GB: u64 = 32;
/// Swap beyond installed memory.
pub const SWAP_EXTRA_GB: u64 = 2;
/// Fixed window of a newly created EFI system partition.
pub const EFI_SIZE_MIB: u64 = 512;
/// First usable offset; also the alignment of every partition we create.
pub const ALIGN_MIB: u64 = 1;
/// Reserved at the end of the disk for the backup GPT.
const GPT_BACKUP_MIB: u64 = 1;
const GPT_MAX_PARTITIONS: u32 = 128;

/// GPT type GUID of an EFI system partition.
pub const ESP_TYPE_GUID: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";

// ============================================================================
// Block devices
// ============================================================================

/// A whole disk that may be partitioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockDevice {
    pub path: PathBuf,
    pub name: String,
    pub size_bytes: u64,
    pub model: String,
}

impl BlockDevice {
    /// Capacity in whole GiB, floored.
    pub fn capacity_gb(&self) -> u64 {
        self.size_bytes / GIB
    }

    /// One-line label for menus: `/dev/sda  250 GiB  Samsung SSD`.
    pub fn label(&self) -> String {
        let model = if self.model.is_empty() { "unknown model" } else { &self.model };
        format!("{} GiB  {}", self.capacity_gb(), model)
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default, deserialize_with = "flex_u64")]
    size: Option<u64>,
    #[serde(default)]
    model: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default, deserialize_with = "flex_bool")]
    rm: bool,
    #[serde(default, deserialize_with = "flex_bool")]
    ro: bool,
}

/// Older util-linux prints numbers and flags as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Flex {
    Bool(bool),
    Num(u64),
    Str(String),
}

fn flex_bool<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    Ok(match Option::<Flex>::deserialize(d)? {
        Some(Flex::Bool(b)) => b,
        Some(Flex::Num(n)) => n != 0,
        Some(Flex::Str(s)) => matches!(s.trim(), "1" | "true"),
        None => false,
    })
}

fn flex_u64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<u64>, D::Error> {
    Ok(match Option::<Flex>::deserialize(d)? {
        Some(Flex::Num(n)) => Some(n),
        Some(Flex::Str(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Kernel names of disks we are willing to partition.
///
/// `sd*`, `vd*`, `hd*` and `xvd*` followed by letters, `nvme<N>n<M>` and
/// `mmcblk<N>`. Optical drives, loop, zram and device-mapper nodes never match.
pub fn is_candidate_name(name: &str) -> bool {
    let letters_after = |prefix: &str| {
        name.strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_lowercase()))
    };
    let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    if letters_after("xvd") || letters_after("sd") || letters_after("vd") || letters_after("hd") {
        return true;
    }
    if let Some(rest) = name.strip_prefix("nvme") {
        return rest
            .split_once('n')
            .is_some_and(|(ctrl, ns)| digits(ctrl) && digits(ns));
    }
    if let Some(rest) = name.strip_prefix("mmcblk") {
        return digits(rest);
    }
    false
}

/// Parse `lsblk -J -b -d` output into candidate disks.
pub fn parse_candidates(lsblk_json: &str) -> Result<Vec<BlockDevice>> {
    let output: LsblkOutput = serde_json::from_str(lsblk_json)
        .map_err(|e| ProvisionError::partition(format!("cannot parse lsblk output: {}", e)))?;

    let devices = output
        .blockdevices
        .into_iter()
        .filter(|d| d.kind.as_deref() == Some("disk") && !d.rm && !d.ro)
        .filter(|d| is_candidate_name(&d.name))
        .filter_map(|d| {
            let size_bytes = d.size.filter(|s| *s > 0)?;
            Some(BlockDevice {
                path: d
                    .path
                    .map(PathBuf::from)
                    .unwrap_or_else(|| Path::new("/dev").join(&d.name)),
                model: d.model.map(|m| m.trim().to_string()).unwrap_or_default(),
                name: d.name,
                size_bytes,
            })
        })
        .collect();
    Ok(devices)
}

/// Enumerate candidate disks, fresh on every call.
pub fn list_candidates(runner: &mut dyn CommandRunner) -> Result<Vec<BlockDevice>> {
    let output = run_checked(runner, &ListBlockDevices.invocation(), ProvisionError::Partition)?;
    let devices = parse_candidates(&output.stdout)?;
    info!("Found {} candidate disk(s)", devices.len());
    Ok(devices)
}

// ============================================================================
// Existing partitions
// ============================================================================

/// A partition already present on the target disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistingPartition {
    pub device: PathBuf,
    pub number: u32,
    pub start_bytes: u64,
    pub size_bytes: u64,
    pub is_esp: bool,
}

impl ExistingPartition {
    pub fn end_bytes(&self) -> u64 {
        self.start_bytes + self.size_bytes
    }
}

#[derive(Debug, Deserialize)]
struct SfdiskOutput {
    partitiontable: SfdiskTable,
}

#[derive(Debug, Deserialize)]
struct SfdiskTable {
    #[serde(default)]
    sectorsize: Option<u64>,
    #[serde(default)]
    partitions: Vec<SfdiskPartition>,
}

#[derive(Debug, Deserialize)]
struct SfdiskPartition {
    node: String,
    start: u64,
    size: u64,
    #[serde(rename = "type", default)]
    kind: String,
}

fn trailing_number(node: &str) -> Option<u32> {
    let digits: String = node
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// Parse `sfdisk --json` output.
pub fn parse_partition_table(sfdisk_json: &str) -> Result<Vec<ExistingPartition>> {
    let output: SfdiskOutput = serde_json::from_str(sfdisk_json)
        .map_err(|e| ProvisionError::partition(format!("cannot parse sfdisk output: {}", e)))?;
    let sector = output.partitiontable.sectorsize.unwrap_or(512);

    output
        .partitiontable
        .partitions
        .into_iter()
        .map(|p| {
            let number = trailing_number(&p.node).ok_or_else(|| {
                ProvisionError::partition(format!("cannot tell partition number of {}", p.node))
            })?;
            Ok(ExistingPartition {
                is_esp: p.kind.eq_ignore_ascii_case(ESP_TYPE_GUID)
                    || p.kind.eq_ignore_ascii_case("ef"),
                device: PathBuf::from(p.node),
                number,
                start_bytes: p.start * sector,
                size_bytes: p.size * sector,
            })
        })
        .collect()
}

/// Read the current partition table of `disk`.
///
/// A disk without a recognizable table has no partitions.
pub fn existing_partitions(
    runner: &mut dyn CommandRunner,
    disk: &Path,
) -> Result<Vec<ExistingPartition>> {
    let inv = DumpPartitionTable { disk: disk.to_path_buf() }.invocation();
    let output = runner
        .run(&inv)
        .map_err(|e| ProvisionError::partition(format!("cannot run sfdisk: {}", e)))?;
    if !output.success {
        debug!("No readable partition table on {:?}: {}", disk, output.stderr.trim());
        return Ok(Vec::new());
    }
    parse_partition_table(&output.stdout)
}

// ============================================================================
// Recommendation
// ============================================================================

/// Recommended sizes in GiB. `root_gb` may be non-positive, which marks the
/// recommendation invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub root_gb: i64,
    pub swap_gb: u64,
}

impl Recommendation {
    pub fn is_valid(&self) -> bool {
        self.root_gb > 0
    }
}

/// Root = capacity - 32 GiB, swap = memory + 2 GiB.
///
/// When swap would not fit in the 32 GiB headroom, root gives way so root,
/// swap and the EFI window still fit on the disk.
pub fn recommend(capacity_bytes: u64, memory_gb: u64) -> Recommendation {
    let capacity_gb = (capacity_bytes / GIB) as i64;
    let swap_gb = memory_gb.saturating_add(SWAP_EXTRA_GB);
    let reserve = HEADROOM_GB.max(swap_gb.saturating_add(1));
    let root_gb = capacity_gb.saturating_sub(i64::try_from(reserve).unwrap_or(i64::MAX));
    Recommendation { root_gb, swap_gb }
}

/// Why a size typed by the operator was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizeInputError {
    #[error("a size is required")]
    Empty,
    #[error("'{0}' is not a whole number of GiB")]
    NotNumeric(String),
    #[error("size must be greater than zero")]
    NotPositive,
}

/// Parse a positive whole number of GiB. An optional `G`/`GiB` suffix is
/// accepted.
pub fn parse_size_gb(input: &str) -> std::result::Result<u64, SizeInputError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SizeInputError::Empty);
    }
    let number = trimmed
        .strip_suffix("GiB")
        .or_else(|| trimmed.strip_suffix(['G', 'g']))
        .unwrap_or(trimmed)
        .trim();
    match number.parse::<u64>() {
        Ok(0) => Err(SizeInputError::NotPositive),
        Ok(n) => Ok(n),
        Err(_) => Err(SizeInputError::NotNumeric(trimmed.to_string())),
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Where the EFI system partition comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum EfiPartition {
    /// New 512 MiB partition at 1 MiB on a fresh table
    Create,
    /// Keep an existing partition as discovered
    Reuse { device: PathBuf, number: u32 },
}

impl EfiPartition {
    pub fn is_reused(&self) -> bool {
        matches!(self, Self::Reuse { .. })
    }
}

/// A validated partitioning decision for one disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionPlan {
    disk: BlockDevice,
    efi: EfiPartition,
    existing: Vec<ExistingPartition>,
    swap_gb: u64,
    root_gb: u64,
    encrypt: bool,
    filesystem: Filesystem,
}

/// Inputs to [`PartitionPlan::new`].
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub disk: &'a BlockDevice,
    pub existing: &'a [ExistingPartition],
    /// Number of an existing EFI system partition to keep
    pub reuse_efi: Option<u32>,
    pub swap_gb: u64,
    pub root_gb: u64,
    pub encrypt: bool,
    pub filesystem: Filesystem,
}

impl PartitionPlan {
    /// Build and validate a plan. The layout must fit the disk.
    pub fn new(req: PlanRequest<'_>) -> Result<Self> {
        if req.swap_gb == 0 || req.root_gb == 0 {
            return Err(ProvisionError::partition("swap and root sizes must be positive"));
        }

        let (efi, existing) = match req.reuse_efi {
            None => (EfiPartition::Create, Vec::new()),
            Some(number) => {
                let esp = req
                    .existing
                    .iter()
                    .find(|p| p.number == number)
                    .ok_or_else(|| {
                        ProvisionError::partition(format!(
                            "partition {} does not exist on {}",
                            number,
                            req.disk.path.display()
                        ))
                    })?;
                if !esp.is_esp {
                    return Err(ProvisionError::partition(format!(
                        "{} is not an EFI system partition",
                        esp.device.display()
                    )));
                }
                (
                    EfiPartition::Reuse {
                        device: esp.device.clone(),
                        number,
                    },
                    req.existing.to_vec(),
                )
            }
        };

        let plan = Self {
            disk: req.disk.clone(),
            efi,
            existing,
            swap_gb: req.swap_gb,
            root_gb: req.root_gb,
            encrypt: req.encrypt,
            filesystem: req.filesystem,
        };
        plan.layout()?;
        Ok(plan)
    }

    /// Plan with the recommended sizes on a freshly partitioned disk.
    pub fn recommended(
        disk: &BlockDevice,
        memory_gb: u64,
        encrypt: bool,
        filesystem: Filesystem,
    ) -> Result<Self> {
        let rec = recommend(disk.size_bytes, memory_gb);
        if !rec.is_valid() {
            return Err(ProvisionError::partition(format!(
                "{} is too small: {} GiB leaves no room for root after {} GiB of headroom",
                disk.path.display(),
                disk.capacity_gb(),
                HEADROOM_GB.max(rec.swap_gb + 1)
            )));
        }
        Self::new(PlanRequest {
            disk,
            existing: &[],
            reuse_efi: None,
            swap_gb: rec.swap_gb,
            root_gb: rec.root_gb as u64,
            encrypt,
            filesystem,
        })
    }

    pub fn disk(&self) -> &BlockDevice {
        &self.disk
    }

    pub fn efi(&self) -> &EfiPartition {
        &self.efi
    }

    pub fn swap_gb(&self) -> u64 {
        self.swap_gb
    }

    pub fn root_gb(&self) -> u64 {
        self.root_gb
    }

    pub fn encrypt(&self) -> bool {
        self.encrypt
    }

    pub fn filesystem(&self) -> Filesystem {
        self.filesystem
    }

    /// Compute partition numbers and MiB offsets, checking fit and overlap.
    pub fn layout(&self) -> Result<PlannedLayout> {
        let disk = &self.disk.path;
        let capacity_mib = self.disk.size_bytes / MIB;
        let swap_mib = self.swap_gb.checked_mul(MIB_PER_GIB);
        let root_mib = self.root_gb.checked_mul(MIB_PER_GIB);
        let (Some(swap_mib), Some(root_mib)) = (swap_mib, root_mib) else {
            return Err(ProvisionError::partition("requested sizes are too large"));
        };

        let (efi, first_free_mib, next_number) = match &self.efi {
            EfiPartition::Create => (
                PlannedPartition {
                    number: 1,
                    path: partition_path(disk, 1),
                    start_mib: ALIGN_MIB,
                    size_mib: EFI_SIZE_MIB,
                    created: true,
                },
                ALIGN_MIB + EFI_SIZE_MIB,
                2,
            ),
            EfiPartition::Reuse { device, number } => {
                let esp = self
                    .existing
                    .iter()
                    .find(|p| p.number == *number)
                    .ok_or_else(|| ProvisionError::partition("reused EFI partition vanished"))?;
                let last_end = self.existing.iter().map(|p| p.end_bytes()).max().unwrap_or(0);
                let max_number = self.existing.iter().map(|p| p.number).max().unwrap_or(0);
                (
                    PlannedPartition {
                        number: *number,
                        path: device.clone(),
                        start_mib: esp.start_bytes / MIB,
                        size_mib: esp.size_bytes / MIB,
                        created: false,
                    },
                    last_end.div_ceil(MIB).max(ALIGN_MIB),
                    max_number + 1,
                )
            }
        };

        if next_number + 1 > GPT_MAX_PARTITIONS {
            return Err(ProvisionError::partition("partition table has no free entries"));
        }

        let swap = PlannedPartition {
            number: next_number,
            path: partition_path(disk, next_number),
            start_mib: first_free_mib,
            size_mib: swap_mib,
            created: true,
        };
        let root_start = swap
            .end_mib()
            .ok_or_else(|| ProvisionError::partition("requested sizes are too large"))?;
        let root = PlannedPartition {
            number: next_number + 1,
            path: partition_path(disk, next_number + 1),
            start_mib: root_start,
            size_mib: root_mib,
            created: true,
        };

        let usable_end = capacity_mib.saturating_sub(GPT_BACKUP_MIB);
        let root_end = root
            .end_mib()
            .ok_or_else(|| ProvisionError::partition("requested sizes are too large"))?;
        if root_end > usable_end {
            return Err(ProvisionError::partition(format!(
                "{} GiB swap and {} GiB root need {} MiB from offset {} MiB but {} has {} MiB",
                self.swap_gb,
                self.root_gb,
                swap_mib + root_mib,
                first_free_mib,
                disk.display(),
                capacity_mib
            )));
        }

        for new in [&swap, &root] {
            if let Some(hit) = self.existing.iter().find(|p| new.overlaps_bytes(p)) {
                return Err(ProvisionError::partition(format!(
                    "partition {} would overlap {}",
                    new.number,
                    hit.device.display()
                )));
            }
        }

        let layout = PlannedLayout {
            disk: disk.clone(),
            efi,
            swap,
            root,
        };
        debug!("Planned layout:\n{}", layout);
        Ok(layout)
    }

    /// Multi-line summary for the confirmation dialog.
    pub fn summary(&self) -> String {
        let efi = match &self.efi {
            EfiPartition::Create => "create new (512 MiB, FAT32)".to_string(),
            EfiPartition::Reuse { device, .. } => format!("reuse {}", device.display()),
        };
        let mut lines = vec![
            format!("Target disk: {} ({})", self.disk.path.display(), self.disk.label()),
            format!("EFI partition: {}", efi),
            format!("Swap: {} GiB", self.swap_gb),
            format!("Root: {} GiB ({})", self.root_gb, self.filesystem),
            format!("Encryption: {}", if self.encrypt { "LUKS2" } else { "none" }),
        ];
        if !self.efi.is_reused() {
            lines.push(String::new());
            lines.push(format!("ALL DATA ON {} WILL BE ERASED.", self.disk.path.display()));
        }
        lines.join("\n")
    }
}

/// One partition of a computed layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedPartition {
    pub number: u32,
    pub path: PathBuf,
    pub start_mib: u64,
    pub size_mib: u64,
    /// False for a reused partition
    pub created: bool,
}

impl PlannedPartition {
    pub fn end_mib(&self) -> Option<u64> {
        self.start_mib.checked_add(self.size_mib)
    }

    fn overlaps_bytes(&self, other: &ExistingPartition) -> bool {
        let start = self.start_mib.saturating_mul(MIB);
        let end = self.start_mib.saturating_add(self.size_mib).saturating_mul(MIB);
        start < other.end_bytes() && other.start_bytes < end
    }
}

/// Partition numbers, paths and offsets for a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedLayout {
    pub disk: PathBuf,
    pub efi: PlannedPartition,
    pub swap: PlannedPartition,
    pub root: PlannedPartition,
}

impl fmt::Display for PlannedLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (role, p) in [("efi", &self.efi), ("swap", &self.swap), ("root", &self.root)] {
            writeln!(
                f,
                "  {:<4} #{} {} start={}MiB size={}MiB{}",
                role,
                p.number,
                p.path.display(),
                p.start_mib,
                p.size_mib,
                if p.created { "" } else { " (reused)" }
            )?;
        }
        Ok(())
    }
}

/// Device path of partition `number` on `disk`.
///
/// Disks whose name ends in a digit (`nvme0n1`, `mmcblk0`, `loop0`) use a
/// `p` separator.
pub fn partition_path(disk: &Path, number: u32) -> PathBuf {
    let disk_str = disk.display().to_string();
    if disk_str.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{}p{}", disk_str, number))
    } else {
        PathBuf::from(format!("{}{}", disk_str, number))
    }
}
