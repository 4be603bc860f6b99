//! CLI integration tests for vri-pg-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for error conditions that need no database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the vri-pg-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("vri-pg-migrate").unwrap()
}

fn config_file(extra: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
sources:
  absmain:
    host: localhost
    database: absmain
    user: root
  pilar3:
    host: localhost
    database: pilar3
    user: root
target:
  host: localhost
  database: vriunap
  user: postgres
{}"#,
        extra
    )
    .unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("prepare"))
        .stdout(predicate::str::contains("clean"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("resume"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--unit"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vri-pg-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--state-file"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "list"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "list"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "list"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_target_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "sources:").unwrap();
    writeln!(file, "  absmain:").unwrap();
    writeln!(file, "    host: localhost").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "list"])
        .assert()
        .code(1);
}

#[test]
fn test_unknown_unit_in_config_exits_with_code_1() {
    let file = config_file("migration:\n  units: [tbl_inexistente]\n");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "list"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("tbl_inexistente"));
}

#[test]
fn test_resume_requires_state_file() {
    let file = config_file("");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "resume"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--state-file"));
}

// =============================================================================
// List Tests
// =============================================================================

#[test]
fn test_list_prints_units_in_order() {
    let file = config_file("");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("  1. system_user -> tbl_usuarios"))
        .stdout(predicate::str::contains("tbl_correcciones_jurados"));
}

#[test]
fn test_list_json() {
    let file = config_file("");

    let output = cmd()
        .args(["--config", file.path().to_str().unwrap(), "--output-json", "list"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let plan = plan.as_array().unwrap();
    assert_eq!(plan[0]["name"], "system_user");
    let tramites = plan.iter().find(|u| u["name"] == "tbl_tramites").unwrap();
    assert_eq!(tramites["depends_on"][0], "tbl_sublineas_vri");
}

// =============================================================================
// No Subcommand Tests
// =============================================================================

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
