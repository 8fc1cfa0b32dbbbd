//! CLI end-to-end tests for the histsan binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SECRET: &str = "s3cr3t-Passw0rd";

/// histsan isolated from the caller's environment and config directory.
fn histsan(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("histsan").unwrap();
    cmd.env_remove("HISTSAN_RULES")
        .env_remove("HISTSAN_KEY")
        .env_remove("HISTSAN_LOG")
        .env_remove("HISTSAN_LOG_FORMAT")
        .env_remove("RUST_LOG")
        .env("HISTSAN_CONFIG", dir.join("no-config"));
    cmd
}

fn write_history(dir: &Path) -> PathBuf {
    let path = dir.join(".resh_history.json");
    let lines = [
        format!(
            r#"{{"cmdLine":"mysql -u root --password={} prod","exitCode":0,"pwd":"/home/alice"}}"#,
            SECRET
        ),
        r#"{"cmdLine":"ls -la","exitCode":0}"#.to_string(),
    ];
    fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}

#[test]
fn version_prints_name() {
    let dir = TempDir::new().unwrap();
    histsan(dir.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("histsan"));
}

#[test]
fn sanitize_writes_both_artifacts_and_guidance() {
    let dir = TempDir::new().unwrap();
    let input = write_history(dir.path());
    let out = dir.path().join("out");

    histsan(dir.path())
        .args(["sanitize", "--input"])
        .arg(&input)
        .arg("--output-dir")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("HOW IT WORKS"))
        .stdout(predicate::str::contains("jq '.cmdLine'"))
        .stdout(predicate::str::contains(SECRET).not());

    let full = fs::read_to_string(out.join("resh_history_sanitized.json")).unwrap();
    let trimmed = fs::read_to_string(out.join("resh_history_sanitized_trim12.json")).unwrap();
    assert_eq!(full.lines().count(), 2);
    assert_eq!(trimmed.lines().count(), 2);
    assert!(!full.contains(SECRET));
    assert!(!trimmed.contains(SECRET));
    assert!(trimmed.contains("ls -la"));
}

#[test]
fn sanitize_hashes_uncommon_words_by_default() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("history.json");
    fs::write(
        &input,
        "{\"cmdLine\":\"ssh alice@db.internal.corp\",\"exitCode\":0}\n",
    )
    .unwrap();
    let out = dir.path().join("out");

    histsan(dir.path())
        .args(["sanitize", "--input"])
        .arg(&input)
        .arg("--output-dir")
        .arg(&out)
        .assert()
        .success();

    for name in ["resh_history_sanitized.json", "resh_history_sanitized_trim12.json"] {
        let content = fs::read_to_string(out.join(name)).unwrap();
        let record: serde_json::Value = serde_json::from_str(content.trim_end()).unwrap();
        let cmd_line = record["cmdLine"].as_str().unwrap();
        assert!(cmd_line.starts_with("ssh "), "{}", cmd_line);
        assert!(!cmd_line.contains("alice"), "{}", cmd_line);
        assert!(!cmd_line.contains("internal.corp"), "{}", cmd_line);
    }
}

#[test]
fn sanitize_guidance_lists_only_published_passes() {
    let dir = TempDir::new().unwrap();
    let input = write_history(dir.path());
    let out = dir.path().join("out");
    // A directory squatting on the trimmed artifact's name makes that pass fail.
    let squatter = out.join("resh_history_sanitized_trim12.json");
    fs::create_dir_all(&squatter).unwrap();
    fs::write(squatter.join("keep"), "").unwrap();

    let assert = histsan(dir.path())
        .args(["sanitize", "--input"])
        .arg(&input)
        .arg("--output-dir")
        .arg(&out)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("HOW IT WORKS"))
        .stdout(predicate::str::contains("resh_history_sanitized.json"));

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let guidance = &stdout[stdout.find("HOW IT WORKS").unwrap()..];
    assert!(!guidance.contains("trim12"), "{}", guidance);
    assert!(guidance.contains("jq '.cmdLine'"));
    assert!(out.join("resh_history_sanitized.json").exists());
}

#[test]
fn sanitize_defaults_to_home_directory() {
    let dir = TempDir::new().unwrap();
    write_history(dir.path());

    histsan(dir.path())
        .env("HOME", dir.path())
        .arg("sanitize")
        .assert()
        .success();

    assert!(dir.path().join("resh_history_sanitized.json").exists());
    assert!(dir.path().join("resh_history_sanitized_trim12.json").exists());
}

#[test]
fn sanitize_custom_trims() {
    let dir = TempDir::new().unwrap();
    let input = write_history(dir.path());

    histsan(dir.path())
        .args(["sanitize", "--trim", "8", "--trim", "20", "--input"])
        .arg(&input)
        .arg("--output-dir")
        .arg(dir.path())
        .assert()
        .success();

    assert!(dir.path().join("resh_history_sanitized_trim8.json").exists());
    assert!(dir.path().join("resh_history_sanitized_trim20.json").exists());
    assert!(!dir.path().join("resh_history_sanitized.json").exists());
}

#[test]
fn run_single_pass_json_report() {
    let dir = TempDir::new().unwrap();
    let input = write_history(dir.path());
    let output = dir.path().join("clean.json");

    let assert = histsan(dir.path())
        .args(["--format", "json", "run", "--trim-hashes", "12", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let payload: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["job"]["passes"][0]["state"], "succeeded");
    assert_eq!(payload["job"]["passes"][0]["records_written"], 2);
    assert_eq!(payload["config"]["rules_source"], "builtin");
}

#[test]
fn negative_trim_is_config_error() {
    let dir = TempDir::new().unwrap();
    let input = write_history(dir.path());

    histsan(dir.path())
        .args(["run", "--trim-hashes", "-1", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(dir.path().join("out.json"))
        .assert()
        .code(11);
}

#[test]
fn oversized_trim_is_config_error() {
    let dir = TempDir::new().unwrap();
    let input = write_history(dir.path());

    histsan(dir.path())
        .args(["run", "--trim-hashes", "65", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(dir.path().join("out.json"))
        .assert()
        .code(11);
    assert!(!dir.path().join("out.json").exists());
}

#[test]
fn output_equal_to_input_is_config_error() {
    let dir = TempDir::new().unwrap();
    let input = write_history(dir.path());

    histsan(dir.path())
        .args(["run", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&input)
        .assert()
        .code(11);
    assert!(fs::read_to_string(&input).unwrap().contains(SECRET));
}

#[test]
fn missing_input_fails_the_pass() {
    let dir = TempDir::new().unwrap();

    histsan(dir.path())
        .args(["run", "--input"])
        .arg(dir.path().join("absent.json"))
        .arg("--output")
        .arg(dir.path().join("out.json"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("FAILED"));
}

#[test]
fn malformed_abort_publishes_nothing() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("history.json");
    fs::write(&input, "{\"cmdLine\":\"ls\"}\nnot json\n").unwrap();
    let output = dir.path().join("out.json");

    histsan(dir.path())
        .args(["--on-malformed", "abort", "run", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .code(1);
    assert!(!output.exists());

    histsan(dir.path())
        .args(["run", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 malformed skipped"));
}

#[test]
fn jsonl_logs_never_carry_history_values() {
    let dir = TempDir::new().unwrap();
    let input = write_history(dir.path());

    histsan(dir.path())
        .args(["--log-format", "jsonl", "-vv", "run", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(dir.path().join("out.json"))
        .assert()
        .success()
        .stderr(predicate::str::contains("pass.succeeded"))
        .stderr(predicate::str::contains(SECRET).not())
        .stderr(predicate::str::contains("alice").not());
}

#[test]
fn rules_list_and_check() {
    let dir = TempDir::new().unwrap();

    histsan(dir.path())
        .args(["rules", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bearer-token"));

    let good = dir.path().join("rules.json");
    fs::write(
        &good,
        r#"{"schema_version":"1.0.0","preset":"strict","rules":[{"name":"internal","fields":["@cmd_line"],"match":{"kind":"pattern","pattern":"corp-[0-9]+"},"scope":"span","priority":45}]}"#,
    )
    .unwrap();
    histsan(dir.path())
        .args(["rules", "check"])
        .arg(&good)
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));

    let bad = dir.path().join("bad.json");
    fs::write(
        &bad,
        r#"{"schema_version":"1.0.0","rules":[{"name":"broken","fields":["*"],"match":{"kind":"pattern","pattern":"(unclosed"},"scope":"span","priority":1}]}"#,
    )
    .unwrap();
    histsan(dir.path())
        .args(["rules", "check"])
        .arg(&bad)
        .assert()
        .code(11);

    histsan(dir.path())
        .args(["rules", "check"])
        .arg(dir.path().join("absent.json"))
        .assert()
        .code(11);
}

#[test]
fn keyed_hashing_round_trip() {
    let dir = TempDir::new().unwrap();
    let input = write_history(dir.path());
    let key = dir.path().join("key.json");

    histsan(dir.path())
        .args(["keygen", "--output"])
        .arg(&key)
        .assert()
        .success()
        .stdout(predicate::str::contains("k1"));

    // Never overwrites an existing key.
    histsan(dir.path())
        .args(["keygen", "--output"])
        .arg(&key)
        .assert()
        .failure();

    histsan(dir.path())
        .args(["--algorithm", "hmac-sha256", "--key"])
        .arg(&key)
        .args(["run", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(dir.path().join("keyed.json"))
        .assert()
        .success();

    histsan(dir.path())
        .args(["--algorithm", "hmac-sha256", "run", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(dir.path().join("unkeyed.json"))
        .assert()
        .code(11);
}
