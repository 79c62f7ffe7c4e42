use std::fs;
use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tempfile::tempdir;

fn write_script(path: &Path, yaml: &str) {
    fs::write(path, yaml).expect("script should write");
}

fn run_termreel(cwd: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_termreel"))
        .current_dir(cwd)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("termreel command should run")
}

fn command_available(name: &str, version_arg: &str) -> bool {
    Command::new(name)
        .arg(version_arg)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

const DEMO: &str = r#"
config:
  width: 128
  height: 80
  fps: 10
scenes:
  - title: intro
    trailing_ms: 500
    actions:
      - do: type
        text: "ls"
      - do: line
        text: "  ✓ ready"
  - title: deploy
    actions:
      - do: command
        text: "deploy"
        program: definitely-not-run-during-check
"#;

#[test]
fn check_prints_scene_summary_without_running_commands() {
    let dir = tempdir().expect("tempdir should create");
    write_script(&dir.path().join("demo.yaml"), DEMO);

    let output = run_termreel(dir.path(), &["check", "demo.yaml"]);
    assert!(
        output.status.success(),
        "check should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("OK: demo.yaml (128x80, 10 fps, 2 scene(s))"), "{stdout}");
    assert!(stdout.contains("#0 'intro'"), "{stdout}");
    assert!(stdout.contains("#1 'deploy'"), "{stdout}");
    assert!(stdout.contains("1 command(s), >= "), "{stdout}");
}

#[test]
fn check_json_is_machine_readable() {
    let dir = tempdir().expect("tempdir should create");
    write_script(&dir.path().join("demo.yaml"), DEMO);

    let output = run_termreel(dir.path(), &["check", "demo.yaml", "--json"]);
    assert!(output.status.success(), "check --json should succeed");
    let report: Value = serde_json::from_slice(&output.stdout).expect("stdout should be json");

    assert_eq!(report["fps"], 10);
    let scenes = report["scenes"].as_array().expect("scenes array");
    assert_eq!(scenes.len(), 2);
    assert_eq!(scenes[0]["title"], "intro");
    assert_eq!(scenes[0]["commands"], 0);
    assert_eq!(scenes[0]["exact"], true);
    assert_eq!(scenes[1]["commands"], 1);
    assert_eq!(scenes[1]["exact"], false);
}

#[test]
fn config_file_layers_under_script_block() {
    let dir = tempdir().expect("tempdir should create");
    write_script(&dir.path().join("demo.yaml"), DEMO);
    fs::write(dir.path().join("base.yaml"), "fps: 60\nheight: 200\n").expect("config should write");

    let output = run_termreel(
        dir.path(),
        &["check", "demo.yaml", "--config", "base.yaml", "--json"],
    );
    assert!(output.status.success(), "check with --config should succeed");
    let report: Value = serde_json::from_slice(&output.stdout).expect("stdout should be json");
    // The script's own `config:` block wins over the file.
    assert_eq!(report["fps"], 10);
    assert_eq!(report["height"], 80);
}

#[test]
fn malformed_scene_fails_before_any_frame() {
    let dir = tempdir().expect("tempdir should create");
    write_script(
        &dir.path().join("bad.yaml"),
        r#"
scenes:
  - title: rows
    actions:
      - do: finish_command
"#,
    );

    let output = run_termreel(dir.path(), &["render", "bad.yaml", "-o", "out.mp4"]);
    assert!(!output.status.success(), "invalid scene must fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("scene #0 'rows'"), "{stderr}");
    assert!(stderr.contains("no command is being typed"), "{stderr}");
    assert!(!dir.path().join("out.mp4").exists());
}

#[test]
fn unknown_config_keys_are_rejected() {
    let dir = tempdir().expect("tempdir should create");
    write_script(
        &dir.path().join("typo.yaml"),
        "config: { fsp: 30 }\nscenes:\n  - title: t\n",
    );
    let output = run_termreel(dir.path(), &["check", "typo.yaml"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("fsp"));
}

#[test]
fn version_includes_build_hash() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_termreel(dir.path(), &["--version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with(&format!("termreel {} (", env!("CARGO_PKG_VERSION"))), "{stdout}");
}

#[test]
fn render_writes_video_when_ffmpeg_is_available() {
    if !command_available("ffmpeg", "-version") {
        eprintln!("skipping: ffmpeg not on PATH");
        return;
    }
    let dir = tempdir().expect("tempdir should create");
    write_script(
        &dir.path().join("demo.yaml"),
        r#"
config: { width: 128, height: 80, fps: 10 }
scenes:
  - title: intro
    duration_ms: 500
    actions:
      - do: type
        text: "ls"
"#,
    );

    let output = run_termreel(
        dir.path(),
        &["render", "demo.yaml", "-o", "demo.mp4", "--jobs", "2", "--digest"],
    );
    assert!(
        output.status.success(),
        "render should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Wrote demo.mp4 (5 frames"), "{stdout}");
    assert!(stdout.contains("sequence sha256: "), "{stdout}");
    assert!(fs::metadata(dir.path().join("demo.mp4")).map(|meta| meta.len() > 0).unwrap_or(false));
}

#[test]
fn png_staging_keeps_frames_when_asked() {
    if !command_available("ffmpeg", "-version") {
        eprintln!("skipping: ffmpeg not on PATH");
        return;
    }
    let dir = tempdir().expect("tempdir should create");
    write_script(
        &dir.path().join("demo.yaml"),
        concat!(
            "config: { width: 128, height: 80, fps: 10 }\n",
            "scenes:\n  - { title: t, duration_ms: 300 }\n",
        ),
    );

    let output = run_termreel(
        dir.path(),
        &["render", "demo.yaml", "-o", "demo.mp4", "--frames-dir", "frames"],
    );
    assert!(
        output.status.success(),
        "png render should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    for index in 0..3 {
        assert!(dir.path().join(format!("frames/frame_{index:05}.png")).is_file());
    }
    assert!(dir.path().join("demo.mp4").is_file());
}
