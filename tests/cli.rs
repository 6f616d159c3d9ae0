use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn capturecast_cmd() -> Command {
    Command::cargo_bin("capturecast").expect("binary exists")
}

/// Writes a config that saves small captures into `dir` under a fixed name.
fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(
        &path,
        format!(
            r#"
[capture]
width = 64
height = 48

[file]
save_directory = "{}"
filename_template = "shot"

[notifications]
enabled = false
"#,
            dir.join("out").display()
        ),
    )
    .unwrap();
    path
}

#[test]
fn capturecast_help_prints_usage() {
    capturecast_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Capture the screen once and deliver it to every configured output",
        ));
}

#[test]
fn sinks_lists_builtin_destinations() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    capturecast_cmd()
        .arg("--config")
        .arg(&config)
        .arg("sinks")
        .assert()
        .success()
        .stdout(predicate::str::contains("clipboard"))
        .stdout(predicate::str::contains("file"))
        .stdout(predicate::str::contains("upload").not());
}

#[test]
fn capture_to_file_reports_success_as_json() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    capturecast_cmd()
        .arg("--config")
        .arg(&config)
        .args(["--no-notify", "capture", "--sinks", "file", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""classification": "all_succeeded""#))
        .stdout(predicate::str::contains("Capture saved"));

    let saved = temp.path().join("out").join("shot.ppm");
    let bytes = std::fs::read(&saved).unwrap();
    assert!(bytes.starts_with(b"P6\n64 48\n255\n"));
}

#[test]
fn capture_to_unknown_sink_exits_with_failure() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    capturecast_cmd()
        .arg("--config")
        .arg(&config)
        .args(["--no-notify", "capture", "--sinks", "nope"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("nope"));
}

#[test]
fn record_with_duration_writes_frame_stream() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    capturecast_cmd()
        .arg("--config")
        .arg(&config)
        .args(["--no-notify", "record", "--sinks", "file", "--duration", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Capture saved"));

    let saved = temp.path().join("out").join("shot.ccfs");
    let bytes = std::fs::read(&saved).unwrap();
    assert!(bytes.starts_with(b"CCFS"));
}

#[test]
fn invalid_config_is_reported() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("config.toml");
    std::fs::write(&config, "[capture\nsinks = 3").unwrap();

    capturecast_cmd()
        .arg("--config")
        .arg(&config)
        .arg("sinks")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config"));
}
