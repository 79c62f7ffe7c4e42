#![cfg(unix)]

use std::time::{Duration, Instant};

use termreel::action::CommandSpec;
use termreel::command::{CommandRunner, CommandStatus, ProcessRunner};
use termreel::config::CommandConfig;

fn shell(script: &str) -> CommandSpec {
    CommandSpec::new("sh", vec!["-c".to_owned(), script.to_owned()])
}

fn runner() -> ProcessRunner {
    // `sh -c script --local` would pass the flag as $0; keep the argv clean.
    ProcessRunner::new(&CommandConfig {
        mode_flag: None,
        ..CommandConfig::default()
    })
}

#[test]
fn stdout_then_stderr() {
    let output = runner().run(&shell("echo one; echo two >&2; echo three"));
    assert_eq!(output.lines, vec!["one", "three", "two"]);
    assert_eq!(output.status, CommandStatus::Exited(0));
}

#[test]
fn non_zero_exit_still_reveals_output() {
    let output = runner().run(&shell("echo partial; echo broke >&2; exit 3"));
    assert_eq!(output.lines, vec!["partial", "broke"]);
    assert_eq!(output.status, CommandStatus::Exited(3));
    assert!(!output.succeeded());
}

#[test]
fn timeout_kills_and_keeps_partial_output() {
    let started = Instant::now();
    let output = runner()
        .with_timeout(Duration::from_millis(300))
        .run(&shell("echo early; sleep 5; echo late"));

    assert_eq!(output.status, CommandStatus::TimedOut);
    assert_eq!(output.lines, vec!["early"]);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test]
fn mode_flag_reaches_the_program() {
    let spec = CommandSpec::new(
        "sh",
        vec!["-c".to_owned(), "echo \"$1\"".to_owned(), "sh".to_owned()],
    );
    let output = ProcessRunner::new(&CommandConfig::default()).run(&spec);
    assert_eq!(output.lines, vec!["--local"]);
}

#[test]
fn runs_in_configured_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("marker.txt"), "here\n").expect("write marker");
    let output = ProcessRunner::new(&CommandConfig {
        mode_flag: None,
        cwd: Some(dir.path().to_path_buf()),
        ..CommandConfig::default()
    })
    .run(&shell("cat marker.txt"));
    assert_eq!(output.lines, vec!["here"]);
}

#[test]
fn blank_lines_survive_capture_but_not_reveal() {
    let output = runner().run(&shell("printf 'a\\n\\nb\\n\\n'"));
    assert_eq!(output.lines, vec!["a", "", "b"]);
    assert_eq!(output.visible_lines().collect::<Vec<_>>(), vec!["a", "b"]);
}
