// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![cfg(feature = "engine")]

use assert_cmd::Command;
use predicates::prelude::predicate;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// installer-storage parser tests

#[test]
// Test installer-storage -V produces version string.
fn test_installer_storage_version() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("installer-storage")?;
    cmd.arg("-V");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(VERSION));
    Ok(())
}

#[test]
// Test installer-storage when no subcommand is given.
fn test_installer_storage_no_subcommand() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("installer-storage")?;
    cmd.assert().failure().code(2);
    Ok(())
}

#[test]
// Test installer-storage rejects an unknown log level.
fn test_installer_storage_log_level() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("installer-storage")?;
    cmd.arg("--log-level")
        .arg("nosuchlevel")
        .arg("plan")
        .arg("--sim-disk")
        .arg("sda:8000");
    cmd.assert().failure().code(2);
    Ok(())
}

#[test]
// Test plan requires at least one simulated disk.
fn test_installer_storage_plan_no_disk() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("installer-storage")?;
    cmd.arg("plan");
    cmd.assert().failure().code(2);
    Ok(())
}

#[test]
// Test plan rejects a malformed simulated disk.
fn test_installer_storage_plan_bad_disk() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("installer-storage")?;
    cmd.arg("plan").arg("--sim-disk").arg("sda");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("NAME:SIZE_MB"));
    Ok(())
}

#[test]
// Test plan lays out a root filesystem on a single disk.
fn test_installer_storage_plan() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("installer-storage")?;
    cmd.arg("plan")
        .arg("--sim-disk")
        .arg("sda:8000")
        .arg("--mem")
        .arg("2048");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("create device"))
        .stdout(predicate::str::contains("/boot"));
    Ok(())
}

#[test]
// Test plan emits JSON listing the queued actions.
fn test_installer_storage_plan_json() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("installer-storage")?;
    cmd.arg("plan")
        .arg("--sim-disk")
        .arg("sda:8000")
        .arg("--sim-disk")
        .arg("sdb:4000")
        .arg("--strategy")
        .arg("largest")
        .arg("--json");
    let output = cmd.assert().success().get_output().stdout.clone();
    let value = serde_json::from_slice::<serde_json::Value>(&output)?;
    assert!(value["actions"].as_array().map(|a| !a.is_empty()).unwrap_or(false));
    assert!(value["fstab"].as_str().map(|f| f.contains("swap")).unwrap_or(false));
    Ok(())
}
