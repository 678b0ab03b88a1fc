//! Integration tests for the autopost-accounts CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Isolated config, account state and session directory
struct TestEnv {
    temp_dir: TempDir,
    config_path: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let path = |name: &str| {
            temp_dir
                .path()
                .join(name)
                .to_string_lossy()
                .replace('\\', "\\\\")
        };

        let config_content = format!(
            r#"
[database]
path = "{}"

[accounts]
state_file = "{}"
session_dir = "{}"
"#,
            path("records.db"),
            path("accounts.toml"),
            path("sessions")
        );

        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, config_content).unwrap();

        Self {
            temp_dir,
            config_path,
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("autopost-accounts").unwrap();
        cmd.env("AUTOPOST_CONFIG", &self.config_path);
        cmd
    }

    fn accounts(&self) -> Vec<serde_json::Value> {
        let output = self
            .cmd()
            .args(["list", "--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        serde_json::from_slice(&output.stdout).unwrap()
    }

    fn add(&self, name: &str) -> String {
        self.cmd().args(["add", name]).assert().success();
        self.accounts()
            .into_iter()
            .find(|a| a["display_name"] == name)
            .and_then(|a| a["id"].as_str().map(str::to_string))
            .unwrap()
    }
}

#[test]
fn test_add_creates_account_needing_login() {
    let env = TestEnv::new();

    env.cmd()
        .args(["add", "Clone 01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added Clone 01"));

    let accounts = env.accounts();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["eligibility"], "needs_login");
    assert_eq!(accounts[0]["session_validity"], "expired");
    assert!(env.temp_dir.path().join("accounts.toml").exists());
}

#[test]
fn test_add_with_proxy() {
    let env = TestEnv::new();

    env.cmd()
        .args(["add", "Clone 02", "--proxy", "203.0.113.7:8080"])
        .assert()
        .success();

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("proxy:203.0.113.7:8080"));
}

#[test]
fn test_add_rejects_bad_proxy() {
    let env = TestEnv::new();

    env.cmd()
        .args(["add", "Clone 03", "--proxy", "not-a-proxy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("proxy"));

    assert!(env.accounts().is_empty());
}

#[test]
fn test_list_empty() {
    let env = TestEnv::new();

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No accounts"));
}

#[test]
fn test_enable_and_disable_by_name() {
    let env = TestEnv::new();
    env.add("Clone 01");

    env.cmd()
        .args(["enable", "Clone 01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is active"));
    assert_eq!(env.accounts()[0]["eligibility"], "active");

    env.cmd()
        .args(["disable", "Clone 01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is inactive"));
    assert_eq!(env.accounts()[0]["eligibility"], "inactive");
}

#[test]
fn test_enable_by_id() {
    let env = TestEnv::new();
    let id = env.add("Clone 01");

    env.cmd().args(["enable", &id]).assert().success();
    assert_eq!(env.accounts()[0]["eligibility"], "active");
}

#[test]
fn test_unknown_account_fails() {
    let env = TestEnv::new();

    env.cmd()
        .args(["enable", "ghost"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn test_duplicate_names_need_an_id() {
    let env = TestEnv::new();
    env.add("Clone 01");
    env.cmd().args(["add", "Clone 01"]).assert().success();

    env.cmd()
        .args(["disable", "Clone 01"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("use the account id"));
}

#[test]
fn test_proxy_set_and_clear() {
    let env = TestEnv::new();
    env.add("Clone 01");

    env.cmd()
        .args(["proxy", "Clone 01", "198.51.100.2:3128"])
        .assert()
        .success()
        .stdout(predicate::str::contains("now uses 198.51.100.2:3128"));
    assert_eq!(env.accounts()[0]["proxy"], "198.51.100.2:3128");

    env.cmd()
        .args(["proxy", "Clone 01", "--clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("connects directly"));
    assert!(env.accounts()[0]["proxy"].is_null());
}

#[test]
fn test_remove_account() {
    let env = TestEnv::new();
    env.add("Clone 01");
    env.add("Clone 02");

    env.cmd()
        .args(["remove", "Clone 01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed Clone 01"));

    let accounts = env.accounts();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["display_name"], "Clone 02");
}

#[test]
fn test_logout_marks_session_expired() {
    let env = TestEnv::new();
    env.add("Clone 01");

    env.cmd()
        .args(["logout", "Clone 01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Session cleared"));
    assert_eq!(env.accounts()[0]["session_validity"], "expired");
}

#[cfg(not(feature = "browser"))]
#[test]
fn test_login_without_browser_support() {
    let env = TestEnv::new();
    env.add("Clone 01");

    env.cmd()
        .args(["login", "Clone 01"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--features browser"));
}

#[test]
fn test_missing_config_is_a_config_error() {
    let temp_dir = TempDir::new().unwrap();

    Command::cargo_bin("autopost-accounts")
        .unwrap()
        .env("AUTOPOST_CONFIG", temp_dir.path().join("absent.toml"))
        .arg("list")
        .assert()
        .code(2);
}
