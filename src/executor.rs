//! Partition Executor
//!
//! Runs the operations computed by [`disk_operations`] against the target disk
//! in a single pass. There is no resume and no undo: the first failing step
//! ends the run with the error category of that step.
//!
//! Everything that can be rejected without touching the disk (passphrase
//! pair, layout fit) is rejected before the first command runs.

use std::fmt;
use std::path::PathBuf;

use tracing::{error, info};

use crate::config::Settings;
use crate::engine::planner::PartitionPlan;
use crate::engine::storage::{DiskOp, describe, disk_operations, remount_operations};
use crate::error::{ProvisionError, Result};
use crate::runner::{CommandRunner, run_checked};
use crate::stage_config::StageConfig;
use crate::tools::encryption::SecretFile;
use crate::types::Filesystem;

/// A confirmed encryption passphrase. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(String);

impl Passphrase {
    /// Accept a passphrase only if both entries are identical and non-empty.
    pub fn confirm(first: &str, second: &str) -> Result<Self> {
        if first != second {
            return Err(ProvisionError::encryption("passphrases do not match"));
        }
        if first.is_empty() {
            return Err(ProvisionError::encryption("passphrase must not be empty"));
        }
        Ok(Self(first.to_string()))
    }

    /// A single entry, used to unlock an existing container.
    pub fn unlock(value: &str) -> Result<Self> {
        Self::confirm(value, value)
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(********)")
    }
}

/// Device paths produced by a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedLayout {
    pub target_disk: PathBuf,
    pub efi_partition: PathBuf,
    pub swap_partition: PathBuf,
    pub root_partition: PathBuf,
    pub root_device: PathBuf,
    pub encrypted: bool,
    pub mount_root: PathBuf,
    pub filesystem: Filesystem,
}

/// Progress notification: step index (1-based), total steps and description.
pub type Progress<'a> = &'a mut dyn FnMut(usize, usize, &DiskOp);

/// Applies partition plans.
pub struct PartitionExecutor<'a> {
    runner: &'a mut dyn CommandRunner,
    settings: &'a Settings,
}

impl<'a> PartitionExecutor<'a> {
    pub fn new(runner: &'a mut dyn CommandRunner, settings: &'a Settings) -> Self {
        Self { runner, settings }
    }

    /// Apply `plan` to its disk.
    ///
    /// `passphrase` is required exactly when the plan encrypts root.
    pub fn apply(
        &mut self,
        plan: &PartitionPlan,
        passphrase: Option<&Passphrase>,
        progress: Progress<'_>,
    ) -> Result<AppliedLayout> {
        if plan.encrypt() && passphrase.is_none() {
            return Err(ProvisionError::encryption("no passphrase was supplied"));
        }
        let layout = plan.layout()?;
        let ops = disk_operations(plan, &layout, self.settings);
        info!(
            "Applying partition plan to {}:\n{}",
            layout.disk.display(),
            describe(&ops)
        );

        let root_device = if plan.encrypt() {
            self.settings.mapped_root_device()
        } else {
            layout.root.path.clone()
        };

        self.run_ops(&ops, passphrase, progress)?;

        let applied = AppliedLayout {
            target_disk: layout.disk.clone(),
            efi_partition: layout.efi.path.clone(),
            swap_partition: layout.swap.path.clone(),
            root_partition: layout.root.path.clone(),
            root_device,
            encrypted: plan.encrypt(),
            mount_root: self.settings.mount_root.clone(),
            filesystem: plan.filesystem(),
        };
        info!("Partitioning of {} complete", applied.target_disk.display());
        Ok(applied)
    }

    /// Mount a previously applied layout again.
    pub fn remount(
        &mut self,
        stage: &StageConfig,
        passphrase: Option<&Passphrase>,
        progress: Progress<'_>,
    ) -> Result<()> {
        if stage.encrypted && passphrase.is_none() {
            return Err(ProvisionError::encryption("no passphrase was supplied"));
        }
        let ops = remount_operations(stage, self.settings);
        self.run_ops(&ops, passphrase, progress)
    }

    fn run_ops(
        &mut self,
        ops: &[DiskOp],
        passphrase: Option<&Passphrase>,
        progress: Progress<'_>,
    ) -> Result<()> {
        // The key file lives exactly as long as the run.
        let key_file = match passphrase {
            Some(p) if ops.iter().any(DiskOp::needs_key) => Some(
                SecretFile::create_in(&self.settings.keyfile_dir, p.expose()).map_err(|e| {
                    ProvisionError::encryption(format!(
                        "cannot create key file in {}: {}",
                        self.settings.keyfile_dir.display(),
                        e
                    ))
                })?,
            ),
            _ => None,
        };

        let total = ops.len();
        for (i, op) in ops.iter().enumerate() {
            progress(i + 1, total, op);
            let invocation = op.invocation(key_file.as_ref().map(SecretFile::path))?;
            if let Err(e) = run_checked(&mut *self.runner, &invocation, op.category()) {
                error!("Step {}/{} failed ({}): {}", i + 1, total, op, e);
                return Err(e);
            }
        }
        Ok(())
    }
}
