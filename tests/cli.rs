use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use tempfile::TempDir;

const DISABLED_CONFIG: &str = r#"
[reporting]
enabled = false
service_url = "http://127.0.0.1:9/zafira-ws"
"#;

fn relay() -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("zafira-relay")?;
    cmd.env_remove("RUST_LOG");
    Ok(cmd)
}

#[test]
fn validate_accepts_valid_config() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = dir.path().join("zafira.toml");
    std::fs::write(&path, DISABLED_CONFIG)?;

    relay()?
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("Reporting: disabled"))
        .stdout(predicate::str::contains("Exchange: logs (history 1000)"));
    Ok(())
}

#[test]
fn validate_rejects_missing_reporting_section() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = dir.path().join("zafira.toml");
    std::fs::write(&path, "[artifacts]\nsave_screenshots = true\n")?;

    relay()?
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
    Ok(())
}

#[test]
fn init_writes_valid_config_once() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = dir.path().join("zafira.toml");

    relay()?
        .arg("--config")
        .arg(&path)
        .args(["init", "--service-url", "https://zafira.example.com/zafira-ws"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    let written = std::fs::read_to_string(&path)?;
    assert!(written.contains("https://zafira.example.com/zafira-ws"));

    relay()?
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .assert()
        .success();

    relay()?
        .arg("--config")
        .arg(&path)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    Ok(())
}

#[test]
fn probe_reports_disabled_broker() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = dir.path().join("zafira.toml");
    std::fs::write(&path, DISABLED_CONFIG)?;

    relay()?
        .arg("--config")
        .arg(&path)
        .arg("probe")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Broker enabled: false"))
        .stdout(predicate::str::contains("Broker state: disconnected"));
    Ok(())
}

#[test]
fn emit_fails_when_broker_disabled() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = dir.path().join("zafira.toml");
    std::fs::write(&path, DISABLED_CONFIG)?;

    relay()?
        .arg("--config")
        .arg(&path)
        .args(["emit", "hello", "--level", "warn", "--run-id", "run-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to publish record"));
    Ok(())
}

#[test]
fn emit_rejects_unknown_level() -> Result<(), Box<dyn std::error::Error>> {
    relay()?
        .args(["emit", "hello", "--level", "verbose"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown level"));
    Ok(())
}

#[test]
fn missing_config_file_is_reported() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;

    relay()?
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("probe")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
    Ok(())
}
