//! Type-safe external tool contracts.
//!
//! Every external program the orchestrator runs (`sgdisk`, `cryptsetup`,
//! `iwctl`, ...) is described by a struct implementing [`ToolCommand`]. The
//! struct is the single place where fields become argv, so a misspelled flag is
//! a one-line fix in one file, and the flow logic never builds argv by hand.
//!
//! # Design
//!
//! 1. **Typed in, argv out**: callers fill in paths and numbers; the impl
//!    decides flag spelling and order.
//! 2. **Redaction**: commands that must carry a secret on argv (only `iwctl`
//!    does) override [`ToolCommand::redacted_args`] so logs never see it.
//! 3. **Runner-agnostic**: a command lowers to a plain [`Invocation`] that any
//!    [`CommandRunner`](crate::runner::CommandRunner) can execute or record.

use std::fmt;

/// Trait for typed tool invocations.
///
/// # Contract
///
/// - `program()`: binary name, resolved through `PATH` at execution time.
/// - `to_cli_args()`: argv after the program name, exactly as the tool expects.
/// - `get_env_vars()`: extra environment for the child.
/// - `is_destructive()`: true when the tool mutates disks or host state.
pub trait ToolCommand {
    fn program(&self) -> &'static str;

    fn to_cli_args(&self) -> Vec<String>;

    fn get_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn is_destructive(&self) -> bool;

    /// Arguments as they may appear in logs and on screen.
    fn redacted_args(&self) -> Vec<String> {
        self.to_cli_args()
    }

    /// True when the tool needs the operator's terminal instead of captured
    /// output.
    fn is_interactive(&self) -> bool {
        false
    }

    /// Lower the typed command into a runnable invocation.
    fn invocation(&self) -> Invocation {
        Invocation {
            program: self.program().to_string(),
            args: self.to_cli_args(),
            env: self.get_env_vars(),
            destructive: self.is_destructive(),
            interactive: self.is_interactive(),
            display_args: self.redacted_args(),
        }
    }
}

/// A fully resolved command line.
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub destructive: bool,
    pub interactive: bool,
    display_args: Vec<String>,
}

impl Invocation {
    /// Command line with secrets replaced, for logs and progress text.
    pub fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.display_args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// True if the real argv contains `needle` as a whole argument or a
    /// substring of one.
    pub fn mentions(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a.contains(needle))
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.display_args)
            .field("env", &self.env)
            .field("destructive", &self.destructive)
            .finish()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_line())
    }
}
