//! Lifetime coupling between the orchestrator and the tools it spawns.
//!
//! Disk tools must never outlive the orchestrator: an `sgdisk --zap-all` or a
//! `cryptsetup luksFormat` left running after the operator hit Ctrl+C would
//! keep mutating the target disk with nobody watching.
//!
//! # Design
//! - Every tool receives SIGTERM if the orchestrator dies
//!   (`PR_SET_PDEATHSIG`).
//! - Background tools also lead their own process group. Interactive ones
//!   stay in the foreground group of the terminal: a child in another group
//!   that reads the tty is stopped by SIGTTIN and never finishes.
//! - Running tool PIDs are tracked in a global [`ChildRegistry`].
//! - SIGINT, SIGTERM and SIGHUP terminate every tracked group (SIGTERM, then
//!   SIGKILL after a grace period) and exit with `128 + signal`.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Grace period between SIGTERM and SIGKILL on signal-driven shutdown.
const SIGNAL_GRACE: Duration = Duration::from_secs(3);

/// PIDs of tool processes that are currently running
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: BTreeSet<u32>,
    terminating: bool,
}

impl ChildRegistry {
    /// Shared registry used by the system command runner.
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!(pid, "tracking tool process");
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!(pid, "tool process finished");
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    /// Terminate every tracked process group.
    ///
    /// Sends SIGTERM, waits up to `grace` for the groups to exit, then sends
    /// SIGKILL to whatever is left. Only the first call does anything.
    pub fn terminate_all(&mut self, grace: Duration) {
        if self.terminating {
            return;
        }
        self.terminating = true;

        if self.pids.is_empty() {
            return;
        }

        let pids: Vec<u32> = self.pids.iter().copied().collect();
        info!("Terminating {} running tool process(es)", pids.len());

        for &pid in &pids {
            if let Err(e) = signal_group(pid, Signal::SIGTERM) {
                warn!(pid, "SIGTERM to process group failed: {}", e);
                let _ = signal_pid(pid, Signal::SIGTERM);
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace {
            if pids.iter().all(|&pid| !is_alive(pid)) {
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in pids.iter().filter(|&&pid| is_alive(pid)) {
            warn!(pid, "tool process ignored SIGTERM, sending SIGKILL");
            if signal_group(pid, Signal::SIGKILL).is_err() {
                let _ = signal_pid(pid, Signal::SIGKILL);
            }
        }
        self.pids.clear();
    }
}

fn signal_pid(pid: u32, sig: Signal) -> nix::Result<()> {
    signal::kill(Pid::from_raw(pid as i32), sig)
}

/// Negative PID addresses the whole process group led by `pgid`.
fn signal_group(pgid: u32, sig: Signal) -> nix::Result<()> {
    signal::kill(Pid::from_raw(-(pgid as i32)), sig)
}

/// A zombie counts as dead.
fn is_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // The state is the first field after the parenthesised command name.
        Ok(stat) => match stat.rsplit_once(')') {
            Some((_, rest)) => !matches!(rest.split_whitespace().next(), Some("Z" | "X")),
            None => true,
        },
        Err(_) => true,
    }
}

/// Install SIGINT/SIGTERM/SIGHUP handlers that reap running tools and exit.
///
/// Call once, before the first tool is spawned.
pub fn init_signal_handlers() -> std::io::Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                _ => "SIGHUP",
            };
            info!("Received {}, stopping running tools", name);
            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(SIGNAL_GRACE);
            }
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension for `std::process::Command` that ties the child to our lifetime.
pub trait CommandProcessGroup {
    /// Run the child as leader of a new process group that is sent SIGTERM
    /// when the orchestrator dies.
    fn in_new_process_group(&mut self) -> &mut Self;

    /// Only the parent-death signal; the child keeps our process group and
    /// with it access to the controlling terminal.
    fn with_parent_death_signal(&mut self) -> &mut Self;
}

fn set_parent_death_signal() -> std::io::Result<()> {
    // SAFETY: prctl is async-signal-safe.
    if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the hook only calls async-signal-safe setpgid and prctl.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::from)?;
                set_parent_death_signal()
            });
        }
        self
    }

    fn with_parent_death_signal(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the hook only calls async-signal-safe prctl.
        unsafe {
            self.pre_exec(set_parent_death_signal);
        }
        self
    }
}
