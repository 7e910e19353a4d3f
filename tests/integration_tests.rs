//! CLI integration tests for changescribe.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a changescribe Command
fn changescribe() -> Command {
    let mut cmd = cargo_bin_cmd!("changescribe");
    cmd.env_remove("CHANGESCRIBE_PORT")
        .env_remove("CHANGESCRIBE_SCHEME");
    cmd
}

mod cli_basics {
    use super::*;

    #[test]
    fn help_succeeds() {
        changescribe().arg("--help").assert().success();
    }

    #[test]
    fn version_succeeds() {
        changescribe().arg("--version").assert().success();
    }

    #[test]
    fn serve_help_mentions_port_and_dev() {
        changescribe()
            .args(["serve", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--port"))
            .stdout(predicate::str::contains("--dev"));
    }
}

mod config_command {
    use super::*;

    #[test]
    fn config_show_renders_defaults_without_a_file() {
        let dir = TempDir::new().unwrap();
        changescribe()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[server]"))
            .stdout(predicate::str::contains("scheme = \"changescribe\""))
            .stdout(predicate::str::contains("fast_fail_secs = 20"));
    }

    #[test]
    fn config_validate_accepts_a_good_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("changescribe.toml"),
            "[server]\nport = 9000\n\n[timeouts]\nfast_fail_secs = 10\n",
        )
        .unwrap();
        changescribe()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration OK"));
    }

    #[test]
    fn config_validate_rejects_inverted_deadlines() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("changescribe.toml"),
            "[timeouts]\nfast_fail_secs = 700\nlong_deadline_secs = 600\n",
        )
        .unwrap();
        changescribe()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("must exceed"));
    }

    #[test]
    fn config_show_honors_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[server]\nport = 4242\n").unwrap();
        changescribe()
            .args(["--config", path.to_str().unwrap(), "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 4242"));
    }

    #[test]
    fn malformed_config_file_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("changescribe.toml"), "[server\nport=").unwrap();
        changescribe()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure();
    }
}
