//! Session-level tests: the whole menu flow against a scripted operator, a
//! recording runner and a fixed reachability probe.

mod common;

use archstrap::config::Settings;
use archstrap::error::{InterfaceKind, ProvisionError};
use archstrap::flow::{InstallationSession, Screen};
use archstrap::network_state::LinkState;
use archstrap::preconditions::VerifiedHost;
use archstrap::runner::CommandOutput;
use archstrap::stage_config::StageConfigStore;
use archstrap::types::Toggle;

use common::{
    Answer, FixedProbe, IP_WIRED_ONLY, RecordingRunner, SFDISK_WITH_ESP, ScriptedDialog,
    settings_in, settings_path, verified_host,
};

type Session = InstallationSession<ScriptedDialog, RecordingRunner, FixedProbe>;

fn session(
    dir: &std::path::Path,
    settings: Settings,
    script: Vec<Answer>,
    runner: RecordingRunner,
    probe: FixedProbe,
) -> Session {
    session_on(verified_host(Some(8)), dir, settings, script, runner, probe)
}

fn session_on(
    host: VerifiedHost,
    dir: &std::path::Path,
    settings: Settings,
    script: Vec<Answer>,
    runner: RecordingRunner,
    probe: FixedProbe,
) -> Session {
    InstallationSession::new(
        host,
        settings,
        settings_path(dir),
        ScriptedDialog::new(script),
        runner,
        probe,
    )
}

// ============================================================================
// Main menu
// ============================================================================

#[test]
fn test_exit_ends_the_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = session(
        dir.path(),
        settings_in(dir.path()),
        vec![Answer::Menu(Some("Exit"))],
        RecordingRunner::new(),
        FixedProbe::online(),
    );

    // test: known-good input
    s.run().expect("exit is not an error");
    assert_eq!(s.screen(), Screen::Exit);
    assert!(s.runner().calls.is_empty());
}

#[test]
fn test_cancelled_main_menu_redisplays() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = session(
        dir.path(),
        settings_in(dir.path()),
        vec![Answer::Menu(None), Answer::Menu(Some("Exit"))],
        RecordingRunner::new(),
        FixedProbe::online(),
    );

    s.run().expect("run");
    assert_eq!(s.dialog().menus.len(), 2);
    assert!(s.dialog().is_exhausted());
}

#[test]
fn test_configure_network_when_already_online_runs_no_tools() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = session(
        dir.path(),
        settings_in(dir.path()),
        vec![
            Answer::Menu(Some("Configure Network")),
            Answer::Menu(Some("Exit")),
        ],
        RecordingRunner::new(),
        FixedProbe::online(),
    );

    s.run().expect("run");
    assert_eq!(s.network_state().current(), LinkState::Connected);
    assert!(!s.runner().called("ip"));
    assert!(
        s.dialog()
            .messages
            .iter()
            .any(|(title, _)| title == "Network")
    );
}

// ============================================================================
// Quick install
// ============================================================================

#[test]
fn test_quick_install_online_host_partitions_and_persists() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings_in(dir.path());
    let stage_path = settings.stage_config.clone();
    let mut s = session(
        dir.path(),
        settings,
        vec![
            Answer::Menu(Some("Quick Install")),
            Answer::Confirm(true),
            Answer::Menu(Some("/dev/sda")),
        ],
        RecordingRunner::with_disk(),
        FixedProbe::online(),
    );

    // test: known-good input
    s.run().expect("quick install");
    assert_eq!(s.screen(), Screen::Exit);

    // probe succeeded, so no link was touched
    assert!(!s.runner().called("ip"));
    assert!(!s.runner().called("iwctl"));
    assert!(s.runner().called_with("sgdisk", "--zap-all"));
    assert!(s.runner().called("mkfs.ext4"));
    assert!(!s.runner().called("cryptsetup"));

    let stage = StageConfigStore::new(stage_path).load().expect("stage config");
    assert_eq!(stage.target_disk, std::path::PathBuf::from("/dev/sda"));
    assert_eq!(stage.root_partition, std::path::PathBuf::from("/dev/sda3"));
    assert!(!stage.encrypted);

    // no later-stage commands are configured
    assert_eq!(s.dialog().suspends, 0);
    let skipped = s
        .dialog()
        .messages
        .iter()
        .filter(|(_, text)| text.contains("skipped"))
        .count();
    assert_eq!(skipped, 3);
}

#[test]
fn test_quick_install_declined_returns_to_main_menu() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = session(
        dir.path(),
        settings_in(dir.path()),
        vec![
            Answer::Menu(Some("Quick Install")),
            Answer::Confirm(false),
            Answer::Menu(Some("Exit")),
        ],
        RecordingRunner::with_disk(),
        FixedProbe::online(),
    );

    s.run().expect("run");
    assert!(s.runner().calls.is_empty());
}

#[test]
fn test_mismatched_passphrases_touch_no_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = settings_in(dir.path());
    settings.encrypt = Toggle::Yes;
    let stage_path = settings.stage_config.clone();
    let mut s = session(
        dir.path(),
        settings,
        vec![
            Answer::Menu(Some("Quick Install")),
            Answer::Confirm(true),
            Answer::Menu(Some("/dev/sda")),
            Answer::Password(Some("abc")),
            Answer::Password(Some("abd")),
        ],
        RecordingRunner::with_disk(),
        FixedProbe::online(),
    );

    // test: expected error
    let err = s.run().expect_err("mismatch must abort");
    assert!(matches!(err, ProvisionError::Encryption(_)), "{:?}", err);
    assert!(s.runner().destructive_calls().is_empty());
    assert!(!s.runner().called("sgdisk"));
    assert!(!s.runner().called("cryptsetup"));
    assert!(!stage_path.exists());
}

#[test]
fn test_quick_install_warns_when_memory_is_unknown() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = session_on(
        verified_host(None),
        dir.path(),
        settings_in(dir.path()),
        vec![
            Answer::Menu(Some("Quick Install")),
            Answer::Confirm(false),
            Answer::Menu(Some("Exit")),
        ],
        RecordingRunner::with_disk(),
        FixedProbe::online(),
    );

    s.run().expect("run");
    let (_, text) = &s.dialog().confirms[0];
    assert!(text.contains("memory could not be read"), "{}", text);
    assert!(text.contains("only 2 GiB"), "{}", text);
}

#[test]
fn test_quick_install_memory_known_has_no_warning() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = session(
        dir.path(),
        settings_in(dir.path()),
        vec![
            Answer::Menu(Some("Quick Install")),
            Answer::Confirm(false),
            Answer::Menu(Some("Exit")),
        ],
        RecordingRunner::with_disk(),
        FixedProbe::online(),
    );

    s.run().expect("run");
    assert!(!s.dialog().confirms[0].1.contains("Warning"));
}

#[test]
fn test_cancelled_passphrase_is_reported_as_cancelled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = settings_in(dir.path());
    settings.encrypt = Toggle::Yes;
    let mut s = session(
        dir.path(),
        settings,
        vec![
            Answer::Menu(Some("Quick Install")),
            Answer::Confirm(true),
            Answer::Menu(Some("/dev/sda")),
            Answer::Password(None),
        ],
        RecordingRunner::with_disk(),
        FixedProbe::online(),
    );

    // test: expected error
    let err = s.run().expect_err("cancel aborts");
    match err {
        ProvisionError::Encryption(detail) => assert!(detail.contains("cancelled"), "{}", detail),
        other => panic!("expected an encryption error, got {:?}", other),
    }
    assert!(s.runner().destructive_calls().is_empty());
}

#[test]
fn test_missing_wireless_interface_fails_before_iwctl() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = RecordingRunner::with_disk().respond(
        "ip",
        "link",
        CommandOutput::ok(IP_WIRED_ONLY),
    );
    let mut s = session(
        dir.path(),
        settings_in(dir.path()),
        vec![
            Answer::Menu(Some("Quick Install")),
            Answer::Confirm(true),
            Answer::Menu(Some("wireless")),
        ],
        runner,
        FixedProbe::new(&[false]),
    );

    // test: expected error
    let err = s.run().expect_err("no wireless interface");
    assert!(
        matches!(
            err,
            ProvisionError::NoInterface {
                kind: InterfaceKind::Wireless,
                ..
            }
        ),
        "{:?}",
        err
    );
    assert!(!s.runner().called("iwctl"));
    assert!(!s.runner().called("lsblk"));
    assert_eq!(s.network_state().current(), LinkState::Disconnected);
}

#[test]
fn test_later_stage_failure_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = settings_in(dir.path());
    settings.base_stage_command = Some("run-base-stage".to_string());
    let runner = RecordingRunner::with_disk().respond(
        "sh",
        "run-base-stage",
        CommandOutput::failed(2, "pacstrap: target not mounted"),
    );
    let mut s = session(
        dir.path(),
        settings,
        vec![
            Answer::Menu(Some("Quick Install")),
            Answer::Confirm(true),
            Answer::Menu(Some("/dev/sda")),
        ],
        runner,
        FixedProbe::online(),
    );

    // test: expected error
    let err = s.run().expect_err("stage failure");
    match err {
        ProvisionError::Stage { stage, .. } => assert_eq!(stage, "Install Base"),
        other => panic!("expected a stage error, got {:?}", other),
    }
    assert_eq!(s.dialog().suspends, 1);
    // the layout was persisted before the stage ran
    assert!(s.settings().stage_config.is_file());
}

// ============================================================================
// Custom install
// ============================================================================

#[test]
fn test_custom_partition_reusing_efi_keeps_the_table() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = RecordingRunner::new()
        .respond("lsblk", "", CommandOutput::ok(common::lsblk_single_disk()))
        .respond("sfdisk", "--json", CommandOutput::ok(SFDISK_WITH_ESP));
    let mut s = session(
        dir.path(),
        settings_in(dir.path()),
        vec![
            Answer::Menu(Some("Custom Install")),
            Answer::Menu(Some("Partition")),
            Answer::Menu(Some("/dev/sda")),
            Answer::Confirm(true),
            Answer::Input(Some("4")),
            Answer::Input(Some("40")),
            Answer::Confirm(false),
            Answer::Confirm(true),
            Answer::Menu(Some("Return")),
            Answer::Menu(Some("Exit")),
        ],
        runner,
        FixedProbe::online(),
    );

    // test: known-good input
    s.run().expect("custom partition");
    assert!(!s.runner().called_with("sgdisk", "--zap-all"));
    assert!(!s.runner().called_with("sgdisk", "--clear"));
    assert!(!s.runner().called("mkfs.fat"));
    assert!(s.runner().called_with("sgdisk", "--new=3:"));
    assert!(s.runner().called_with("sgdisk", "--new=4:"));

    let stage = StageConfigStore::new(s.settings().stage_config.clone())
        .load()
        .expect("stage config");
    assert_eq!(stage.efi_partition, std::path::PathBuf::from("/dev/sda1"));
    assert_eq!(s.remaining_steps().len(), 3);
}

#[test]
fn test_partition_then_highlighted_step_does_not_mount_again() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = session(
        dir.path(),
        settings_in(dir.path()),
        vec![
            Answer::Menu(Some("Custom Install")),
            Answer::Menu(Some("Partition")),
            Answer::Menu(Some("/dev/sda")),
            Answer::Input(Some("10")),
            Answer::Input(Some("200")),
            Answer::Confirm(false),
            Answer::Confirm(true),
            Answer::Menu(Some("Install Base")),
            Answer::Menu(Some("Return")),
            Answer::Menu(Some("Exit")),
        ],
        RecordingRunner::with_disk(),
        FixedProbe::online(),
    );

    // test: known-good input
    s.run().expect("partition then next step");
    let (_, highlighted) = &s.dialog().menus[2];
    assert_eq!(highlighted.as_deref(), Some("Install Base"));

    let count = |program: &str| s.runner().calls.iter().filter(|c| c.program == program).count();
    assert_eq!(count("mount"), 2);
    assert_eq!(count("swapon"), 1);
    assert_eq!(s.remaining_steps().len(), 2);
}

#[test]
fn test_custom_size_prompt_repeats_until_valid() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = session(
        dir.path(),
        settings_in(dir.path()),
        vec![
            Answer::Menu(Some("Custom Install")),
            Answer::Menu(Some("Partition")),
            Answer::Menu(Some("/dev/sda")),
            Answer::Input(Some("lots")),
            Answer::Input(Some("0")),
            Answer::Input(Some("8")),
            Answer::Input(Some("100")),
            Answer::Confirm(false),
            // declined at the summary: nothing applied, step not done
            Answer::Confirm(false),
            Answer::Menu(Some("Return")),
            Answer::Menu(Some("Exit")),
        ],
        RecordingRunner::with_disk(),
        FixedProbe::online(),
    );

    s.run().expect("run");
    assert!(s.runner().destructive_calls().is_empty());
    assert_eq!(s.remaining_steps().len(), 5);
}

#[test]
fn test_mount_without_stage_config_returns_to_step_menu() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = session(
        dir.path(),
        settings_in(dir.path()),
        vec![
            Answer::Menu(Some("Custom Install")),
            Answer::Menu(Some("Mount")),
            Answer::Menu(Some("Return")),
            Answer::Menu(Some("Exit")),
        ],
        RecordingRunner::new(),
        FixedProbe::online(),
    );

    // test: known-good input
    s.run().expect("missing stage config is not fatal");
    assert!(s.runner().calls.is_empty());
    assert!(
        s.dialog()
            .messages
            .iter()
            .any(|(title, text)| title == "Mount" && text.contains("Run Partition first"))
    );
    // the step menu still highlights Partition
    let (_, default) = &s.dialog().menus[2];
    assert_eq!(default.as_deref(), Some("Partition"));
}

#[test]
fn test_later_stage_without_stage_config_is_not_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = settings_in(dir.path());
    settings.system_stage_command = Some("configure-system".to_string());
    let mut s = session(
        dir.path(),
        settings,
        vec![
            Answer::Menu(Some("Custom Install")),
            Answer::Menu(Some("Configure System")),
            Answer::Menu(Some("Return")),
            Answer::Menu(Some("Exit")),
        ],
        RecordingRunner::new(),
        FixedProbe::online(),
    );

    s.run().expect("run");
    assert!(!s.runner().called("sh"));
    assert_eq!(s.dialog().suspends, 0);
}

// ============================================================================
// System settings
// ============================================================================

#[test]
fn test_settings_changes_are_saved() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = session(
        dir.path(),
        settings_in(dir.path()),
        vec![
            Answer::Menu(Some("System Settings")),
            Answer::Menu(Some("filesystem")),
            Answer::Menu(Some("btrfs")),
            Answer::Menu(Some("encrypt")),
            Answer::Menu(Some("save")),
            Answer::Menu(Some("back")),
            Answer::Menu(Some("Exit")),
        ],
        RecordingRunner::new(),
        FixedProbe::online(),
    );

    s.run().expect("run");
    let saved = Settings::load(&settings_path(dir.path())).expect("load saved settings");
    assert_eq!(saved.filesystem.to_string(), "btrfs");
    assert!(saved.encrypt.is_yes());
}
