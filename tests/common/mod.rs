//! Shared fixtures for the session-level tests: a scripted dialog, a
//! recording command runner and a probe with fixed answers.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use archstrap::config::Settings;
use archstrap::dialog::{Dialog, MenuItem};
use archstrap::engine::planner::GIB;
use archstrap::error::Result;
use archstrap::hardware::{FirmwareMode, ReachabilityProbe};
use archstrap::preconditions::{HostFacts, PreconditionChecker, VerifiedHost};
use archstrap::runner::{CommandOutput, CommandRunner};
use archstrap::tool_traits::Invocation;

// =============================================================================
// Tool output fixtures
// =============================================================================

pub fn lsblk_single_disk() -> String {
    format!(
        r#"{{"blockdevices":[
            {{"name":"sda","path":"/dev/sda","size":{},"model":"QEMU HARDDISK","type":"disk","rm":false,"ro":false,"tran":"sata"}},
            {{"name":"sr0","path":"/dev/sr0","size":1073741312,"model":"DVD","type":"rom","rm":true,"ro":false,"tran":"sata"}}
        ]}}"#,
        250 * GIB
    )
}

/// Existing table on /dev/sda: an EFI system partition and a Linux partition.
pub const SFDISK_WITH_ESP: &str = r#"{"partitiontable":{"label":"gpt","device":"/dev/sda","unit":"sectors","sectorsize":512,
    "partitions":[
      {"node":"/dev/sda1","start":2048,"size":1048576,"type":"C12A7328-F81F-11D2-BA4B-00A0C93EC93B"},
      {"node":"/dev/sda2","start":1050624,"size":41943040,"type":"0FC63DAF-8483-4772-8E79-3D69D8477DE4"}
    ]}}"#;

pub const IP_WIRED_ONLY: &str = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN mode DEFAULT
2: enp3s0: <BROADCAST,MULTICAST> mtu 1500 qdisc noop state DOWN mode DEFAULT
";

// =============================================================================
// Recording runner
// =============================================================================

/// Records invocations and answers from `(program, argument substring)`
/// rules. Unmatched calls succeed with empty output.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    pub calls: Vec<Invocation>,
    rules: Vec<(String, String, CommandOutput)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner that knows one 250 GiB disk with an empty partition table.
    pub fn with_disk() -> Self {
        Self::new()
            .respond("lsblk", "", CommandOutput::ok(lsblk_single_disk()))
            .respond("sfdisk", "--json", CommandOutput::failed(1, "does not contain a recognized partition table"))
    }

    pub fn respond(mut self, program: &str, arg_contains: &str, output: CommandOutput) -> Self {
        self.rules.push((program.to_string(), arg_contains.to_string(), output));
        self
    }

    pub fn called(&self, program: &str) -> bool {
        self.calls.iter().any(|c| c.program == program)
    }

    pub fn called_with(&self, program: &str, arg: &str) -> bool {
        self.calls.iter().any(|c| c.program == program && c.mentions(arg))
    }

    /// Calls that may change a disk or a link.
    pub fn destructive_calls(&self) -> Vec<&Invocation> {
        self.calls.iter().filter(|c| c.destructive).collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&mut self, invocation: &Invocation) -> io::Result<CommandOutput> {
        self.calls.push(invocation.clone());
        let hit = self.rules.iter().find(|(program, needle, _)| {
            *program == invocation.program && (needle.is_empty() || invocation.mentions(needle))
        });
        Ok(hit.map(|(_, _, out)| out.clone()).unwrap_or_else(|| CommandOutput::ok("")))
    }
}

// =============================================================================
// Scripted dialog
// =============================================================================

/// One scripted operator answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Menu(Option<&'static str>),
    Input(Option<&'static str>),
    Password(Option<&'static str>),
    Confirm(bool),
}

/// Plays back answers in order and panics on anything unexpected, so a test
/// fails loudly when the flow asks something the script does not foresee.
#[derive(Debug, Default)]
pub struct ScriptedDialog {
    script: VecDeque<Answer>,
    pub messages: Vec<(String, String)>,
    pub menus: Vec<(String, Option<String>)>,
    pub confirms: Vec<(String, String)>,
    pub suspends: usize,
}

impl ScriptedDialog {
    pub fn new(script: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.script.is_empty()
    }

    fn next(&mut self, asked: &str, title: &str) -> Answer {
        match self.script.pop_front() {
            Some(answer) => answer,
            None => panic!("script exhausted: {} '{}' was not expected", asked, title),
        }
    }
}

impl Dialog for ScriptedDialog {
    fn menu(
        &mut self,
        title: &str,
        _text: &str,
        items: &[MenuItem],
        default: Option<&str>,
    ) -> Result<Option<String>> {
        self.menus.push((title.to_string(), default.map(str::to_string)));
        match self.next("menu", title) {
            Answer::Menu(choice) => {
                if let Some(tag) = choice {
                    assert!(
                        items.iter().any(|i| i.tag == tag),
                        "menu '{}' has no entry '{}'",
                        title,
                        tag
                    );
                }
                Ok(choice.map(str::to_string))
            }
            other => panic!("menu '{}' asked, script has {:?}", title, other),
        }
    }

    fn input(&mut self, title: &str, _prompt: &str, _initial: &str) -> Result<Option<String>> {
        match self.next("input", title) {
            Answer::Input(value) => Ok(value.map(str::to_string).filter(|v| !v.trim().is_empty())),
            other => panic!("input '{}' asked, script has {:?}", title, other),
        }
    }

    fn password(&mut self, title: &str, _prompt: &str) -> Result<Option<String>> {
        match self.next("password", title) {
            Answer::Password(value) => Ok(value.map(str::to_string).filter(|v| !v.is_empty())),
            other => panic!("password '{}' asked, script has {:?}", title, other),
        }
    }

    fn confirm(&mut self, title: &str, text: &str) -> Result<bool> {
        self.confirms.push((title.to_string(), text.to_string()));
        match self.next("confirm", title) {
            Answer::Confirm(yes) => Ok(yes),
            other => panic!("confirm '{}' asked, script has {:?}", title, other),
        }
    }

    fn message(&mut self, title: &str, text: &str) -> Result<()> {
        self.messages.push((title.to_string(), text.to_string()));
        Ok(())
    }

    fn info(&mut self, _title: &str, _text: &str) -> Result<()> {
        Ok(())
    }

    fn text_file(&mut self, title: &str, path: &Path) -> Result<()> {
        self.messages
            .push((title.to_string(), path.display().to_string()));
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        self.suspends += 1;
        Ok(())
    }
}

// =============================================================================
// Probe and host
// =============================================================================

/// Answers from a fixed sequence; once exhausted, repeats the last answer.
#[derive(Debug)]
pub struct FixedProbe {
    answers: Vec<bool>,
    asked: Cell<usize>,
}

impl FixedProbe {
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: answers.to_vec(),
            asked: Cell::new(0),
        }
    }

    pub fn online() -> Self {
        Self::new(&[true])
    }
}

impl ReachabilityProbe for FixedProbe {
    fn is_reachable(&self) -> bool {
        let i = self.asked.get();
        self.asked.set(i + 1);
        self.answers
            .get(i)
            .or(self.answers.last())
            .copied()
            .unwrap_or(false)
    }

    fn target(&self) -> String {
        "probe.invalid:443".to_string()
    }
}

/// A host that passed the checks with `memory_gb` of RAM (`None`: unreadable).
pub fn verified_host(memory_gb: Option<u64>) -> VerifiedHost {
    PreconditionChecker::new("arch", "/sys/firmware/efi/efivars")
        .check(&HostFacts {
            euid: 0,
            distro_id: Some("arch".to_string()),
            distro_like: Vec::new(),
            firmware: FirmwareMode::Uefi,
            memory_gb,
            missing_tools: Vec::new(),
        })
        .expect("verified host")
}

/// Settings rooted in a temporary directory, with no settle delay.
pub fn settings_in(dir: &Path) -> Settings {
    Settings {
        log_file: dir.join("archstrap.log"),
        stage_config: dir.join("state/stage.conf"),
        keyfile_dir: dir.to_path_buf(),
        settle: Duration::ZERO,
        ..Settings::default()
    }
}

pub fn settings_path(dir: &Path) -> PathBuf {
    dir.join("settings.conf")
}
