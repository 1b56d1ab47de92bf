use std::fs;
use std::path::Path;

use assert_cmd::Command;
use tempfile::tempdir;

const CONFIG: &str = r#"
version: 1
output:
  directory: package
video:
  frame_rate: 24
  width: 32
  height: 16
encoding:
  local_threads: 2
playlist:
  content:
    - id: countdown
      source: { kind: test_pattern }
      frame_rate: 24
      length: 12
    - id: reel
      source: { kind: test_pattern, color: [20, 80, 160] }
      frame_rate: 25
      length: 10
"#;

fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("session.yaml");
    fs::write(&path, content).expect("write config");
    path
}

fn dcp_forge() -> Command {
    Command::cargo_bin("dcp-forge").expect("binary present")
}

#[test]
fn validate_accepts_a_good_config() {
    let temp = tempdir().unwrap();
    let config = write_config(temp.path(), CONFIG);
    dcp_forge().arg("validate").arg(&config).assert().success();
}

#[test]
fn validate_rejects_a_bad_config() {
    let temp = tempdir().unwrap();
    let config = write_config(temp.path(), &CONFIG.replace("version: 1", "version: 7"));
    dcp_forge().arg("validate").arg(&config).assert().failure();
}

#[test]
fn playlist_prints_timing() {
    let temp = tempdir().unwrap();
    let config = write_config(temp.path(), CONFIG);
    let output = dcp_forge()
        .arg("playlist")
        .arg(&config)
        .output()
        .expect("run playlist");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Frame rate:  24 fps"), "{stdout}");
    assert!(stdout.contains("countdown ["), "{stdout}");
    assert!(stdout.contains("96.0%"), "{stdout}");
}

#[test]
fn playlist_window_limits_the_listing() {
    let temp = tempdir().unwrap();
    let config = write_config(temp.path(), CONFIG);
    let output = dcp_forge()
        .arg("playlist")
        .arg(&config)
        .args(["--from", "0.6"])
        .output()
        .expect("run playlist");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("countdown ["), "{stdout}");
    assert!(stdout.contains("reel ["), "{stdout}");
}

#[test]
fn encode_writes_a_package_and_metrics() {
    let temp = tempdir().unwrap();
    let config = write_config(temp.path(), CONFIG);
    let metrics = temp.path().join("metrics/encode.json");
    let prometheus = temp.path().join("metrics/encode.prom");

    dcp_forge()
        .arg("encode")
        .arg(&config)
        .arg("--metrics-json")
        .arg(&metrics)
        .arg("--metrics-prometheus")
        .arg(&prometheus)
        .assert()
        .success();

    let package = temp.path().join("package");
    assert!(package.join("picture.essence").is_file());
    assert!(package.join("manifest.yaml").is_file());

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&metrics).unwrap()).unwrap();
    assert_eq!(json["frames_written"], 22);
    assert!(
        fs::read_to_string(&prometheus)
            .unwrap()
            .contains("dcp_forge_frames_written_total 22")
    );
}

#[test]
fn probe_fails_for_unreachable_servers() {
    dcp_forge()
        .args(["probe", "127.0.0.1:1", "--timeout-ms", "200"])
        .assert()
        .failure();
}
