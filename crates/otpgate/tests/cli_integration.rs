//! CLI integration tests for the otpgate command-line interface.
//!
//! These tests cover help output, argument parsing and the configuration
//! errors that must stop `run` before any upstream traffic. None of them
//! needs a reachable upstream.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the otpgate binary, isolated from the real user config
/// and from credentials in the environment.
fn otpgate(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("otpgate").unwrap();
    cmd.current_dir(dir.path())
        .env("OTPGATE_CONFIG_DIR", dir.path())
        .env_remove("OTPGATE_USERNAME")
        .env_remove("OTPGATE_SECRET")
        .env_remove("OTPGATE_AUTH_KEY");
    cmd
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    otpgate(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("code"));
}

#[test]
fn test_version_displays() {
    let dir = TempDir::new().unwrap();
    otpgate(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("otpgate"));
}

#[test]
fn test_run_help_lists_flags() {
    let dir = TempDir::new().unwrap();
    otpgate(&dir)
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--username"))
        .stdout(predicate::str::contains("--secret"))
        .stdout(predicate::str::contains("--auth-key"))
        .stdout(predicate::str::contains("--skip-auth"))
        .stdout(predicate::str::contains("--retry-on-auth-failure"))
        .stdout(predicate::str::contains("--max-retries"))
        .stdout(predicate::str::contains("--retry-delay"))
        .stdout(predicate::str::contains("--timeout"));
}

#[test]
fn test_unknown_subcommand_fails() {
    let dir = TempDir::new().unwrap();
    otpgate(&dir).arg("serve").assert().failure();
}

// ─────────────────────────────────────────────────────────────────────────────
// Startup Validation Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_run_requires_username() {
    let dir = TempDir::new().unwrap();
    otpgate(&dir)
        .args(["run", "--secret", "JBSWY3DPEHPK3PXP"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("'username'"));
}

#[test]
fn test_run_requires_secret() {
    let dir = TempDir::new().unwrap();
    otpgate(&dir)
        .args(["run", "-u", "alice"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("'secret'"));
}

#[test]
fn test_run_rejects_invalid_secret() {
    let dir = TempDir::new().unwrap();
    otpgate(&dir)
        .args(["run", "-u", "alice", "-s", "not base32!"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not valid Base32"));
}

#[test]
fn test_run_rejects_invalid_access_key() {
    let dir = TempDir::new().unwrap();
    otpgate(&dir)
        .args(["run", "-u", "alice", "-s", "JBSWY3DPEHPK3PXP", "-k", "bad key!"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("access key"));
}

#[test]
fn test_run_rejects_invalid_target() {
    let dir = TempDir::new().unwrap();
    otpgate(&dir)
        .args([
            "run",
            "-u",
            "alice",
            "-s",
            "JBSWY3DPEHPK3PXP",
            "-t",
            "ftp://files.example.edu",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("http(s)"));
}

#[test]
fn test_run_reads_credentials_from_env() {
    let dir = TempDir::new().unwrap();
    // Credentials come from the environment; the bad key proves parsing got that far.
    otpgate(&dir)
        .env("OTPGATE_USERNAME", "alice")
        .env("OTPGATE_SECRET", "JBSWY3DPEHPK3PXP")
        .env("OTPGATE_AUTH_KEY", "no/slashes")
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("access key"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Code Command Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_code_prints_six_digits() {
    let dir = TempDir::new().unwrap();
    otpgate(&dir)
        .args(["code", "--secret", "jbsw y3dp ehpk 3pxp"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^\d{6}\n$").unwrap());
}

#[test]
fn test_code_reads_secret_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, "[credentials]\nsecret = \"JBSWY3DPEHPK3PXP\"\n").unwrap();

    otpgate(&dir)
        .args(["--config", path.to_str().unwrap(), "code"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^\d{6}\n$").unwrap())
        .stderr(predicate::str::contains("plaintext"));
}

#[test]
fn test_code_reads_project_config() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("otpgate.toml"),
        "[credentials]\nsecret = \"JBSWY3DPEHPK3PXP\"\n",
    )
    .unwrap();

    otpgate(&dir)
        .arg("code")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^\d{6}\n$").unwrap());
}

#[test]
fn test_code_missing_config_file_fails() {
    let dir = TempDir::new().unwrap();
    otpgate(&dir)
        .args(["--config", "does-not-exist.toml", "code"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does-not-exist.toml"));
}

#[test]
fn test_code_requires_secret() {
    let dir = TempDir::new().unwrap();
    otpgate(&dir)
        .arg("code")
        .assert()
        .failure()
        .stderr(predicate::str::contains("'secret'"));
}
