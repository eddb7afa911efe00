//! Tool execution.
//!
//! [`SystemRunner`] is the only place in the crate that spawns processes. Every
//! component takes a `&mut dyn CommandRunner` instead, so the flow can be
//! driven end to end against a recording runner in tests.
//!
//! # Lifetime rule
//!
//! Every child gets a parent-death signal and is tracked in the
//! [`ChildRegistry`] while it runs (see
//! [`process_guard`](crate::process_guard)). Background tools run in their
//! own process group; interactive ones stay in ours so they can read the
//! terminal.

use std::io;
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::error::{ProvisionError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use crate::tool_traits::Invocation;

/// Output from a finished tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` if the tool was killed by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    /// Successful run with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    /// Failed run with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(code),
            success: false,
        }
    }

    /// Turn a non-zero exit into the error category the caller names.
    pub fn ensure_success(
        &self,
        context: &str,
        category: impl Fn(String) -> ProvisionError,
    ) -> Result<()> {
        if self.success {
            return Ok(());
        }
        let code = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            Err(category(format!("{} exited with status {}", context, code)))
        } else {
            Err(category(format!(
                "{} exited with status {}: {}",
                context, code, stderr
            )))
        }
    }
}

/// Executes invocations. Implementations must not retry.
pub trait CommandRunner {
    fn run(&mut self, invocation: &Invocation) -> io::Result<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &mut R {
    fn run(&mut self, invocation: &Invocation) -> io::Result<CommandOutput> {
        (**self).run(invocation)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for Box<R> {
    fn run(&mut self, invocation: &Invocation) -> io::Result<CommandOutput> {
        (**self).run(invocation)
    }
}

/// Run `invocation` and require success, mapping both spawn failures and
/// non-zero exits into `category`.
pub fn run_checked(
    runner: &mut dyn CommandRunner,
    invocation: &Invocation,
    category: impl Fn(String) -> ProvisionError,
) -> Result<CommandOutput> {
    let output = runner
        .run(invocation)
        .map_err(|e| category(format!("cannot run {}: {}", invocation.program, e)))?;
    output.ensure_success(&invocation.program, category)?;
    Ok(output)
}

/// Spawns real processes.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&mut self, invocation: &Invocation) -> io::Result<CommandOutput> {
        if invocation.destructive {
            info!("exec (destructive): {}", invocation);
        } else {
            info!("exec: {}", invocation);
        }

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        if invocation.interactive {
            cmd.with_parent_death_signal()
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        } else {
            cmd.in_new_process_group()
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }

        let child = cmd.spawn()?;
        let pid = child.id();
        with_registry(|r| r.register(pid));
        let result = child.wait_with_output();
        with_registry(|r| r.unregister(pid));
        let output = result?;

        let out = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            success: output.status.success(),
        };

        if out.success {
            debug!("{} exited 0", invocation.program);
        } else {
            warn!(
                "{} failed with exit code {:?}: {}",
                invocation.program,
                out.exit_code,
                out.stderr.trim()
            );
        }
        Ok(out)
    }
}

fn with_registry(f: impl FnOnce(&mut ChildRegistry)) {
    match ChildRegistry::global().lock() {
        Ok(mut guard) => f(&mut guard),
        Err(poisoned) => f(&mut poisoned.into_inner()),
    }
}
