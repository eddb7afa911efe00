//! Logging setup.
//!
//! Everything goes to one append-only file, without colour codes, so the
//! terminal stays free for the dialogs. `RUST_LOG` overrides the default
//! `info` filter.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber writing to `log_file`.
///
/// If the file cannot be opened (for example when an unprivileged user runs
/// a read-only subcommand), warnings and errors go to stderr instead and the
/// returned error says why.
pub fn init(log_file: &Path) -> anyhow::Result<()> {
    match open_log(log_file) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
                .try_init()
                .map_err(|e| anyhow::anyhow!("cannot install log subscriber: {}", e))?;
            Ok(())
        }
        Err(e) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new("warn"))
                .with_writer(std::io::stderr)
                .with_target(false)
                .try_init();
            Err(e)
        }
    }
}

fn open_log(log_file: &Path) -> anyhow::Result<fs::File> {
    if let Some(dir) = log_file.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create log directory {}", dir.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("cannot open log file {}", log_file.display()))
}
