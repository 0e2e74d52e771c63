//! Exercises `updata-determine-strategy` end to end through its CLI
//! surface, against a fabricated `--test-sysroot`.

use assert_cmd::Command;
use std::fs;
use tempfile::tempdir;

fn bin() -> Command {
    Command::cargo_bin("updata-determine-strategy").unwrap()
}

fn write_strbo_release(etc_dir: &std::path::Path, version: &str, release_line: &str, flavor: &str) {
    fs::create_dir_all(etc_dir).unwrap();
    fs::write(
        etc_dir.join("strbo-release"),
        format!(
            "STRBO_VERSION=\"{version}\"\n\
             STRBO_RELEASE_LINE=\"{release_line}\"\n\
             STRBO_FLAVOR=\"{flavor}\"\n\
             STRBO_DATETIME=\"2026-01-01T00:00:00\"\n\
             STRBO_GIT_COMMIT=\"deadbeef\"\n"
        ),
    )
    .unwrap();
}

#[test]
fn plan_is_a_no_op_when_already_at_target_version() {
    let sysroot = tempdir().unwrap();
    write_strbo_release(&sysroot.path().join("etc"), "3.0.1", "V3", "");

    let output_file = sysroot.path().join("plan.json");

    bin()
        .arg("--test-sysroot")
        .arg(sysroot.path())
        .arg("--test-version")
        .arg("7.0.0")
        .arg("--base-url")
        .arg("https://updates.example/streamingboard")
        .arg("--target-version")
        .arg("3.0.1")
        .arg("--output-file")
        .arg(&output_file)
        .assert()
        .success();

    let plan: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output_file).unwrap()).unwrap();
    let steps = plan.as_array().unwrap();

    let actions: Vec<&str> = steps
        .iter()
        .map(|s| s["action"].as_str().unwrap())
        .collect();

    // System already at 3.0.1: plan is nop, manage-repos, reboot-system —
    // no dnf-install, since handle_version_change short-circuits on an
    // unchanged version.
    assert_eq!(actions, vec!["nop", "manage-repos", "reboot-system"]);
}

#[test]
fn plan_written_to_stdout_when_no_output_file_given() {
    let sysroot = tempdir().unwrap();
    write_strbo_release(&sysroot.path().join("etc"), "1.2.0", "V3", "");

    let assert = bin()
        .arg("--test-sysroot")
        .arg(sysroot.path())
        .arg("--test-version")
        .arg("7.0.0")
        .arg("--base-url")
        .arg("https://updates.example/streamingboard")
        .arg("--target-version")
        .arg("1.2.0")
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let plan: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert!(plan.is_array());
}

#[test]
fn missing_main_system_version_exits_23() {
    // Empty sysroot: neither strbo-release nor os-release present.
    let sysroot = tempdir().unwrap();
    fs::create_dir_all(sysroot.path().join("etc")).unwrap();

    bin()
        .arg("--test-sysroot")
        .arg(sysroot.path())
        .arg("--test-version")
        .arg("7.0.0")
        .arg("--base-url")
        .arg("https://updates.example/streamingboard")
        .assert()
        .code(23);
}
