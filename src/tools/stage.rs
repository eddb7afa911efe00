//! Hand-off to a later installation stage.

use std::path::PathBuf;

use crate::tool_traits::ToolCommand;

/// Environment variable carrying the stage configuration path.
pub const STAGE_CONFIG_ENV: &str = "ARCHSTRAP_STAGE_CONFIG";

/// Run an operator-configured stage command through `sh -c`.
///
/// The stage owns the terminal while it runs and finds the partitioning
/// outcome through [`STAGE_CONFIG_ENV`].
#[derive(Debug, Clone)]
pub struct StageCommand {
    pub command: String,
    pub stage_config: PathBuf,
}

impl ToolCommand for StageCommand {
    fn program(&self) -> &'static str {
        "sh"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-c".to_string(), self.command.clone()]
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![(
            STAGE_CONFIG_ENV.to_string(),
            self.stage_config.display().to_string(),
        )]
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn is_interactive(&self) -> bool {
        true
    }
}
