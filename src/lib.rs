//! archstrap library
//!
//! Provisioning orchestrator for bare machines: precondition checks,
//! network bring-up, disk planning and partitioning, and the hand-off to
//! later installation stages.

pub mod cli;
pub mod config;
pub mod connectivity;
pub mod dialog;
pub mod engine;
pub mod error;
pub mod executor;
pub mod flow;
pub mod hardware;
pub mod kv;
pub mod logging;
pub mod network_state;
pub mod preconditions;
pub mod process_guard;
pub mod runner;
pub mod stage_config;
pub mod theme;
pub mod tool_traits;
pub mod tools;
pub mod types;
pub mod ui;

// Re-export main types for convenience
pub use config::Settings;
pub use connectivity::ConnectivityEstablisher;
pub use dialog::{Dialog, MenuItem};
pub use engine::planner::{BlockDevice, PartitionPlan, PlanRequest, Recommendation};
pub use error::{ProvisionError, Result};
pub use executor::{AppliedLayout, PartitionExecutor, Passphrase};
pub use flow::{InstallationSession, Screen};
pub use hardware::{FirmwareMode, ReachabilityProbe, TcpProbe};
pub use network_state::{LinkState, NetworkState};
pub use preconditions::{HostFacts, PreconditionChecker, VerifiedHost};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
pub use stage_config::{StageConfig, StageConfigStore};
pub use types::{Filesystem, Toggle};
