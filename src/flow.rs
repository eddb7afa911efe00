//! Installation Flow Controller
//!
//! Menu-driven state machine composing the components in their fixed order:
//! connectivity, disk planning, partitioning, then later stages.
//!
//! # States
//!
//! ```text
//! MainMenu -> QuickInstall ------------------------------> Exit
//!          -> CustomInstall(step) <-> (step runs) -> MainMenu
//!          -> SystemSettings -> MainMenu
//!          -> Exit
//! ```
//!
//! Cancelled or unrecognised menu answers redisplay the same menu. Every
//! component failure is fatal: [`InstallationSession::run`] returns it and the
//! caller reports it. The only exception is a missing stage configuration in
//! the custom steps that need one, which sends the operator back to the step
//! menu.

use std::path::{Path, PathBuf};

use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use tracing::{info, warn};

use crate::config::Settings;
use crate::connectivity::ConnectivityEstablisher;
use crate::dialog::{Dialog, MenuItem};
use crate::engine::planner::{
    self, BlockDevice, PartitionPlan, PlanRequest, existing_partitions, list_candidates,
    parse_size_gb,
};
use crate::error::{ProvisionError, Result};
use crate::executor::{AppliedLayout, PartitionExecutor, Passphrase};
use crate::hardware::ReachabilityProbe;
use crate::network_state::NetworkState;
use crate::preconditions::VerifiedHost;
use crate::runner::{CommandRunner, run_checked};
use crate::stage_config::StageConfigStore;
use crate::tool_traits::ToolCommand;
use crate::tools::stage::StageCommand;
use crate::types::{Filesystem, Toggle};

// ============================================================================
// Screens and menu entries
// ============================================================================

/// Where the session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    MainMenu,
    QuickInstall,
    /// `step_index` is the first custom step not yet run.
    CustomInstall { step_index: usize },
    SystemSettings,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum MainMenuEntry {
    #[strum(to_string = "Quick Install")]
    QuickInstall,
    #[strum(to_string = "Custom Install")]
    CustomInstall,
    #[strum(to_string = "Configure Network")]
    ConfigureNetwork,
    #[strum(to_string = "System Settings")]
    SystemSettings,
    #[strum(to_string = "Exit")]
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum CustomStep {
    #[strum(to_string = "Partition")]
    Partition,
    #[strum(to_string = "Mount")]
    Mount,
    #[strum(to_string = "Install Base")]
    InstallBase,
    #[strum(to_string = "Configure System")]
    ConfigureSystem,
    #[strum(to_string = "Install Desktop")]
    InstallDesktop,
    #[strum(to_string = "Return")]
    Return,
}

impl CustomStep {
    /// Runnable steps, in the order they are meant to be run.
    pub const ORDER: [CustomStep; 5] = [
        Self::Partition,
        Self::Mount,
        Self::InstallBase,
        Self::ConfigureSystem,
        Self::InstallDesktop,
    ];

    /// Later stages handed off to an external command.
    pub const LATER_STAGES: [CustomStep; 3] =
        [Self::InstallBase, Self::ConfigureSystem, Self::InstallDesktop];

    /// Last step a successful run of `self` accounts for. Partitioning
    /// leaves the layout mounted, so it covers Mount as well.
    fn completes(self) -> Self {
        match self {
            Self::Partition => Self::Mount,
            other => other,
        }
    }

    fn position(self) -> Option<usize> {
        Self::ORDER.iter().position(|s| *s == self)
    }

    fn description(self) -> &'static str {
        match self {
            Self::Partition => "Plan and apply the disk layout",
            Self::Mount => "Re-mount a layout partitioned earlier",
            Self::InstallBase => "Run the base installation stage",
            Self::ConfigureSystem => "Run the system configuration stage",
            Self::InstallDesktop => "Run the desktop installation stage",
            Self::Return => "Back to the main menu",
        }
    }
}

fn entries<E: IntoEnumIterator + ToString>() -> Vec<MenuItem> {
    E::iter()
        .map(|e| {
            let label = e.to_string();
            MenuItem::new(label.clone(), label)
        })
        .collect()
}

// ============================================================================
// Session
// ============================================================================

/// One interactive run. Owns the settings and every component's seams.
pub struct InstallationSession<D: Dialog, R: CommandRunner, P: ReachabilityProbe> {
    host: VerifiedHost,
    settings: Settings,
    settings_path: PathBuf,
    dialog: D,
    runner: R,
    network: ConnectivityEstablisher<P>,
    store: StageConfigStore,
    screen: Screen,
    next_step: usize,
}

impl<D: Dialog, R: CommandRunner, P: ReachabilityProbe> InstallationSession<D, R, P> {
    /// A session can only exist for a host that passed the preconditions.
    pub fn new(
        host: VerifiedHost,
        settings: Settings,
        settings_path: impl Into<PathBuf>,
        dialog: D,
        runner: R,
        probe: P,
    ) -> Self {
        let network = ConnectivityEstablisher::new(probe, settings.settle);
        let store = StageConfigStore::new(settings.stage_config.clone());
        Self {
            host,
            settings,
            settings_path: settings_path.into(),
            dialog,
            runner,
            network,
            store,
            screen: Screen::MainMenu,
            next_step: 0,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn network_state(&self) -> &NetworkState {
        self.network.state()
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn dialog(&self) -> &D {
        &self.dialog
    }

    /// Custom steps not run yet, in order.
    pub fn remaining_steps(&self) -> &[CustomStep] {
        &CustomStep::ORDER[self.next_step.min(CustomStep::ORDER.len())..]
    }

    /// Drive the state machine until Exit or the first fatal error.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let next = match self.screen {
                Screen::MainMenu => self.main_menu()?,
                Screen::QuickInstall => self.quick_install()?,
                Screen::CustomInstall { step_index } => self.custom_install(step_index)?,
                Screen::SystemSettings => self.system_settings()?,
                Screen::Exit => {
                    info!("Session finished");
                    return Ok(());
                }
            };
            if next != self.screen {
                info!("Screen: {:?} -> {:?}", self.screen, next);
            }
            self.screen = next;
        }
    }

    // ------------------------------------------------------------------------
    // Main menu
    // ------------------------------------------------------------------------

    fn main_menu(&mut self) -> Result<Screen> {
        let items = entries::<MainMenuEntry>();
        let choice = self.dialog.menu(
            "archstrap",
            "Prepare this machine for an Arch Linux installation",
            &items,
            None,
        )?;
        let Some(entry) = choice.and_then(|c| c.parse::<MainMenuEntry>().ok()) else {
            return Ok(Screen::MainMenu);
        };
        Ok(match entry {
            MainMenuEntry::QuickInstall => Screen::QuickInstall,
            MainMenuEntry::CustomInstall => Screen::CustomInstall {
                step_index: self.next_step,
            },
            MainMenuEntry::ConfigureNetwork => {
                self.ensure_connectivity()?;
                self.dialog.message("Network", "The host is online.")?;
                Screen::MainMenu
            }
            MainMenuEntry::SystemSettings => Screen::SystemSettings,
            MainMenuEntry::Exit => Screen::Exit,
        })
    }

    // ------------------------------------------------------------------------
    // Quick install
    // ------------------------------------------------------------------------

    fn quick_install(&mut self) -> Result<Screen> {
        let mut text = String::from(
            "Quick Install erases the selected disk and creates an EFI, swap and root \
             partition with the recommended sizes.",
        );
        if self.host.memory_gb().is_none() {
            text.push_str(&format!(
                "\n\nWarning: installed memory could not be read, so swap will be only {} GiB.",
                planner::SWAP_EXTRA_GB
            ));
        }
        text.push_str("\n\nContinue?");
        let proceed = self.dialog.confirm("Quick Install", &text)?;
        if !proceed {
            return Ok(Screen::MainMenu);
        }

        self.ensure_connectivity()?;
        let disk = self.select_disk()?;
        let encrypt = self.settings.encrypt.is_yes();
        let passphrase = if encrypt {
            Some(self.new_passphrase()?)
        } else {
            None
        };
        let plan = PartitionPlan::recommended(
            &disk,
            self.memory_gb(),
            encrypt,
            self.settings.filesystem,
        )?;
        info!("Quick install plan:\n{}", plan.summary());

        self.apply_and_persist(&plan, passphrase.as_ref())?;
        for step in CustomStep::LATER_STAGES {
            self.run_later_stage(step)?;
        }
        self.dialog.message(
            "Quick Install",
            &format!(
                "Provisioning complete.\nStage configuration: {}",
                self.store.path().display()
            ),
        )?;
        Ok(Screen::Exit)
    }

    // ------------------------------------------------------------------------
    // Custom install
    // ------------------------------------------------------------------------

    fn custom_install(&mut self, step_index: usize) -> Result<Screen> {
        let items: Vec<MenuItem> = CustomStep::iter()
            .map(|s| MenuItem::new(s.to_string(), format!("{:<18}{}", s.to_string(), s.description())))
            .collect();
        let highlighted = CustomStep::ORDER
            .get(step_index)
            .copied()
            .unwrap_or(CustomStep::Return)
            .to_string();
        let choice = self
            .dialog
            .menu("Custom Install", "Run the steps in order", &items, Some(highlighted.as_str()))?;
        let Some(step) = choice.and_then(|c| c.parse::<CustomStep>().ok()) else {
            return Ok(Screen::CustomInstall { step_index });
        };

        let done = match step {
            CustomStep::Return => return Ok(Screen::MainMenu),
            CustomStep::Partition => self.custom_partition()?,
            CustomStep::Mount => self.mount_step()?,
            later => self.later_stage_step(later)?,
        };
        if done {
            if let Some(pos) = step.completes().position() {
                self.next_step = self.next_step.max(pos + 1);
            }
        }
        Ok(Screen::CustomInstall {
            step_index: self.next_step,
        })
    }

    /// Returns false if the operator declined the final confirmation.
    fn custom_partition(&mut self) -> Result<bool> {
        self.ensure_connectivity()?;
        let disk = self.select_disk()?;
        let existing = existing_partitions(&mut self.runner, &disk.path)?;

        let mut reuse_efi = None;
        if let Some(esp) = existing.iter().find(|p| p.is_esp) {
            let question = format!(
                "{} is an existing EFI system partition.\n\nKeep it and leave the rest of the \
                 partition table intact?",
                esp.device.display()
            );
            if self.dialog.confirm("EFI Partition", &question)? {
                reuse_efi = Some(esp.number);
            }
        }

        let rec = planner::recommend(disk.size_bytes, self.memory_gb());
        let swap_gb = self.ask_size("Swap size (GiB)", rec.swap_gb.to_string())?;
        let root_default = if rec.is_valid() { rec.root_gb.to_string() } else { String::new() };
        let root_gb = self.ask_size("Root size (GiB)", root_default)?;

        let encrypt = self.dialog.confirm(
            "Encryption",
            "Encrypt the root partition with LUKS2?",
        )?;
        let passphrase = if encrypt {
            Some(self.new_passphrase()?)
        } else {
            None
        };

        let plan = PartitionPlan::new(PlanRequest {
            disk: &disk,
            existing: &existing,
            reuse_efi,
            swap_gb,
            root_gb,
            encrypt,
            filesystem: self.settings.filesystem,
        })?;
        if !self.dialog.confirm("Confirm Partitioning", &plan.summary())? {
            info!("Partitioning declined at confirmation");
            return Ok(false);
        }

        self.apply_and_persist(&plan, passphrase.as_ref())?;
        Ok(true)
    }

    fn mount_step(&mut self) -> Result<bool> {
        let stage = match self.store.load() {
            Ok(stage) => stage,
            Err(ProvisionError::NotFound(path)) => {
                self.dialog.message(
                    "Mount",
                    &format!("No stage configuration at {}. Run Partition first.", path.display()),
                )?;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let passphrase = if stage.encrypted {
            let prompt = format!("Passphrase for {}", stage.root_partition.display());
            let value = self
                .dialog
                .password("Unlock", &prompt)?
                .ok_or_else(|| ProvisionError::encryption("passphrase entry cancelled"))?;
            Some(Passphrase::unlock(&value)?)
        } else {
            None
        };

        let dialog = &mut self.dialog;
        PartitionExecutor::new(&mut self.runner, &self.settings).remount(
            &stage,
            passphrase.as_ref(),
            &mut |i, n, op| show_progress(&mut *dialog, "Mount", i, n, &op.to_string()),
        )?;
        self.dialog.message(
            "Mount",
            &format!("{} is mounted at {}.", stage.target_disk.display(), stage.mount_root.display()),
        )?;
        Ok(true)
    }

    fn later_stage_step(&mut self, step: CustomStep) -> Result<bool> {
        if !self.store.exists() {
            self.dialog.message(
                &step.to_string(),
                &format!(
                    "No stage configuration at {}. Run Partition first.",
                    self.store.path().display()
                ),
            )?;
            return Ok(false);
        }
        self.run_later_stage(step)?;
        Ok(true)
    }

    /// Run the configured command for `step`, or report that there is none.
    fn run_later_stage(&mut self, step: CustomStep) -> Result<()> {
        let (command, key) = match step {
            CustomStep::InstallBase => (&self.settings.base_stage_command, "BASE_STAGE_COMMAND"),
            CustomStep::ConfigureSystem => {
                (&self.settings.system_stage_command, "SYSTEM_STAGE_COMMAND")
            }
            CustomStep::InstallDesktop => {
                (&self.settings.desktop_stage_command, "DESKTOP_STAGE_COMMAND")
            }
            CustomStep::Partition | CustomStep::Mount | CustomStep::Return => return Ok(()),
        };
        let Some(command) = command.clone() else {
            info!("{} skipped: {} is not set", step, key);
            self.dialog.message(
                &step.to_string(),
                &format!("{} is not configured ({} in {}); skipped.", step, key, self.settings_path.display()),
            )?;
            return Ok(());
        };

        info!("Running stage '{}': {}", step, command);
        let invocation = StageCommand {
            command,
            stage_config: self.store.path().to_path_buf(),
        }
        .invocation();
        self.dialog.suspend()?;
        let stage = step.to_string();
        run_checked(&mut self.runner, &invocation, |detail| ProvisionError::Stage {
            stage: stage.clone(),
            detail,
        })?;
        info!("Stage '{}' finished", step);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // System settings
    // ------------------------------------------------------------------------

    fn system_settings(&mut self) -> Result<Screen> {
        let items = vec![
            MenuItem::new("filesystem", format!("Root filesystem      {}", self.settings.filesystem)),
            MenuItem::new("encrypt", format!("Encrypt by default   {}", self.settings.encrypt)),
            MenuItem::new("log", "View log"),
            MenuItem::new("stage", "View stage configuration"),
            MenuItem::new("save", format!("Save to {}", self.settings_path.display())),
            MenuItem::new("back", "Back"),
        ];
        let choice = self.dialog.menu("System Settings", "", &items, None)?;
        match choice.as_deref() {
            Some("filesystem") => {
                let options: Vec<MenuItem> = Filesystem::iter()
                    .map(|fs| MenuItem::new(fs.to_string(), fs.to_string()))
                    .collect();
                let current = self.settings.filesystem.to_string();
                let picked = self
                    .dialog
                    .menu("Root filesystem", "", &options, Some(current.as_str()))?;
                if let Some(fs) = picked.and_then(|p| p.parse::<Filesystem>().ok()) {
                    info!("Root filesystem set to {}", fs);
                    self.settings.filesystem = fs;
                }
            }
            Some("encrypt") => {
                self.settings.encrypt = Toggle::from(!self.settings.encrypt.is_yes());
                info!("Default encryption set to {}", self.settings.encrypt);
            }
            Some("log") => {
                let log = self.settings.log_file.clone();
                self.dialog.text_file("Log", &log)?;
            }
            Some("stage") => {
                let path = self.store.path().to_path_buf();
                self.dialog.text_file("Stage configuration", &path)?;
            }
            Some("save") => self.save_settings()?,
            Some("back") => return Ok(Screen::MainMenu),
            _ => {}
        }
        Ok(Screen::SystemSettings)
    }

    fn save_settings(&mut self) -> Result<()> {
        let text = match self.settings.save(&self.settings_path) {
            Ok(()) => format!("Settings saved to {}.", self.settings_path.display()),
            Err(e) => {
                warn!("Saving settings failed: {}", e);
                format!("Settings were not saved: {}", e)
            }
        };
        self.dialog.message("System Settings", &text)
    }

    // ------------------------------------------------------------------------
    // Shared steps
    // ------------------------------------------------------------------------

    fn ensure_connectivity(&mut self) -> Result<()> {
        self.network
            .ensure_connectivity(&mut self.dialog, &mut self.runner)
    }

    /// Unknown memory counts as none.
    fn memory_gb(&self) -> u64 {
        self.host.memory_gb().unwrap_or(0)
    }

    /// Cancelling the disk menu ends the session.
    fn select_disk(&mut self) -> Result<BlockDevice> {
        let disks = list_candidates(&mut self.runner)?;
        if disks.is_empty() {
            return Err(ProvisionError::partition("no candidate disks found"));
        }
        let items: Vec<MenuItem> = disks
            .iter()
            .map(|d| MenuItem::new(d.path.display().to_string(), format!("{}  {}", d.path.display(), d.label())))
            .collect();
        loop {
            let choice = self
                .dialog
                .menu("Target Disk", "Select the disk to install to", &items, None)?;
            let Some(choice) = choice else {
                return Err(ProvisionError::partition("no disk selected"));
            };
            if let Some(disk) = disks.iter().find(|d| Path::new(&choice) == d.path) {
                info!("Target disk: {}", disk.path.display());
                return Ok(disk.clone());
            }
        }
    }

    /// Ask twice; the two entries must match exactly.
    fn new_passphrase(&mut self) -> Result<Passphrase> {
        let cancelled = || ProvisionError::encryption("passphrase entry cancelled");
        let first = self
            .dialog
            .password("Encryption", "Passphrase for the encrypted root")?
            .ok_or_else(cancelled)?;
        let second = self
            .dialog
            .password("Encryption", "Repeat the passphrase")?
            .ok_or_else(cancelled)?;
        Passphrase::confirm(&first, &second)
    }

    /// Re-prompt until a positive whole number is entered.
    fn ask_size(&mut self, prompt: &str, initial: String) -> Result<u64> {
        let mut text = prompt.to_string();
        loop {
            let answer = self.dialog.input("Partition Sizes", &text, &initial)?;
            match parse_size_gb(answer.as_deref().unwrap_or("")) {
                Ok(gb) => return Ok(gb),
                Err(e) => text = format!("{} ({})", prompt, e),
            }
        }
    }

    fn apply_and_persist(
        &mut self,
        plan: &PartitionPlan,
        passphrase: Option<&Passphrase>,
    ) -> Result<AppliedLayout> {
        let dialog = &mut self.dialog;
        let applied = PartitionExecutor::new(&mut self.runner, &self.settings).apply(
            plan,
            passphrase,
            &mut |i, n, op| show_progress(&mut *dialog, "Partitioning", i, n, &op.to_string()),
        )?;
        self.store.persist(&applied)?;
        Ok(applied)
    }
}

fn show_progress(dialog: &mut impl Dialog, title: &str, step: usize, total: usize, what: &str) {
    if let Err(e) = dialog.info(title, &format!("Step {}/{}: {}", step, total, what)) {
        warn!("Cannot show progress: {}", e);
    }
}
