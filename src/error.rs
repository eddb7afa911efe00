//! Error handling module for archstrap
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Every failure a component contract names has its own variant, so the flow
//! controller can match on the cause while the operator always sees the same
//! diagnostic shape: a short cause plus a pointer to the log.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Kind of network interface the operator asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    Wireless,
    Wired,
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wireless => write!(f, "wireless"),
            Self::Wired => write!(f, "wired"),
        }
    }
}

/// Main error type for archstrap
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Not running as the superuser
    #[error("Root privileges required (effective uid is {euid})")]
    Privilege { euid: u32 },

    /// Host is not the expected distribution
    #[error("Unsupported host: {0}")]
    Platform(String),

    /// EFI variables are missing, i.e. the machine booted in legacy mode
    #[error("EFI variables not found at {}: legacy BIOS boot is not supported", .0.display())]
    FirmwareMode(PathBuf),

    /// No interface of the requested kind could be used
    #[error("No usable {kind} interface: {detail}")]
    NoInterface { kind: InterfaceKind, detail: String },

    /// A wireless scan came back empty
    #[error("No wireless networks found on {interface}")]
    NoNetworkFound { interface: String },

    /// Association with a wireless network was refused
    #[error("Could not associate with '{network}': {detail}")]
    Authentication { network: String, detail: String },

    /// Reachability probe still fails after configuring the link
    #[error("Network unreachable: {0}")]
    Unreachable(String),

    /// Partition table or partition creation failed, or the plan does not fit
    #[error("Partitioning failed: {0}")]
    Partition(String),

    /// Filesystem or swap initialisation failed
    #[error("Formatting failed: {0}")]
    Format(String),

    /// Encrypted volume setup failed, including passphrase mismatch
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Mounting, mount point creation or swap activation failed
    #[error("Mount failed: {0}")]
    Mount(String),

    /// Stage configuration could not be written
    #[error("Could not write stage configuration {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stage configuration does not exist yet
    #[error("Stage configuration not found at {}", .0.display())]
    NotFound(PathBuf),

    /// Settings file could not be read or contains invalid values
    #[error("Configuration error: {0}")]
    Config(String),

    /// A later-stage command failed
    #[error("Stage '{stage}' failed: {detail}")]
    Stage { stage: String, detail: String },

    /// Terminal/UI errors
    #[error("Terminal error: {0}")]
    Terminal(#[from] std::io::Error),
}

/// Result type alias for archstrap operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    /// Create a partitioning error
    pub fn partition(msg: impl Into<String>) -> Self {
        Self::Partition(msg.into())
    }

    /// Create a formatting error
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Create an encryption error
    pub fn encryption(msg: impl Into<String>) -> Self {
        Self::Encryption(msg.into())
    }

    /// Create a mount error
    pub fn mount(msg: impl Into<String>) -> Self {
        Self::Mount(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Operator-facing message for a fatal error.
    ///
    /// Always the cause followed by a pointer to the append-only log.
    pub fn diagnostic(&self, log_file: &Path) -> String {
        format!("{}. See {} for details.", self, log_file.display())
    }

    /// Returns true for the precondition failures that stop the program
    /// before any terminal UI is shown.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Privilege { .. } | Self::Platform(_) | Self::FirmwareMode(_)
        )
    }
}
