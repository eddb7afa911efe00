use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_SETTINGS_PATH;

/// archstrap - prepare a bare machine for an Arch Linux installation
#[derive(Parser, Debug)]
#[command(name = "archstrap")]
#[command(about = "Checks the host, brings the network up and partitions the target disk")]
#[command(version)]
pub struct Cli {
    /// Settings file (`KEY=value` lines)
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_PATH)]
    pub settings: PathBuf,

    /// Override the log file from the settings
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Override the stage configuration path from the settings
    #[arg(long, global = true)]
    pub stage_config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the interactive installer (default)
    Install,
    /// Run the precondition checks and report
    Check,
    /// List candidate target disks
    Disks,
    /// Show the recommended layout for a disk without touching it
    Plan {
        /// Disk device (e.g., /dev/sda)
        #[arg(short, long)]
        disk: PathBuf,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the persisted stage configuration
    Stage,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
