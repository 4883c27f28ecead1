use assert_cmd::prelude::*;
use assert_fs::assert::PathAssert;
use assert_fs::fixture::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;

/// `fbk` pointed at a throwaway config file inside `dir`.
fn fbk(dir: &assert_fs::TempDir) -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("fbk")?;
    cmd.arg("--config").arg(dir.child("config.toml").path());
    Ok(cmd)
}

#[test]
fn run_file_backup() -> Result<(), Box<dyn std::error::Error>> {
    let temp = assert_fs::TempDir::new()?;
    temp.child("a/x.txt").write_str("A test\nActual content")?;
    let out = temp.child("out");

    fbk(&temp)?
        .arg("run")
        .arg("-s")
        .arg(temp.child("a").path())
        .arg("-d")
        .arg(out.path())
        .arg("-t")
        .arg("x.txt")
        .assert()
        .success()
        .stdout(predicate::str::contains("x-BACKUP-").and(predicate::str::contains(".txt")));

    let entries: Vec<_> = fs::read_dir(out.path())?.collect::<Result<_, _>>()?;
    assert_eq!(entries.len(), 1);
    assert_eq!(fs::read_to_string(entries[0].path())?, "A test\nActual content");
    Ok(())
}

#[test]
fn run_reads_request_from_config() -> Result<(), Box<dyn std::error::Error>> {
    let temp = assert_fs::TempDir::new()?;
    temp.child("site/index.html").write_str("<html/>")?;
    let config = format!(
        "[backup]\nsource_path = {:?}\ndestination_path = {:?}\nbackup_name = \"nightly\"\n",
        temp.child("site").path().display().to_string(),
        temp.child("out").path().display().to_string(),
    );
    temp.child("config.toml").write_str(&config)?;

    fbk(&temp)?
        .arg("run")
        .arg("-c")
        .assert()
        .success()
        .stdout(predicate::str::contains("nightly.zip"));

    temp.child("out/nightly.zip").assert(predicate::path::is_file());
    temp.child("out/nightly").assert(predicate::path::missing());
    Ok(())
}

#[test]
fn missing_target_reports_stage() -> Result<(), Box<dyn std::error::Error>> {
    let temp = assert_fs::TempDir::new()?;
    temp.child("a").create_dir_all()?;

    fbk(&temp)?
        .arg("run")
        .arg("-s")
        .arg(temp.child("a").path())
        .arg("-d")
        .arg(temp.child("out").path())
        .arg("-t")
        .arg("x.txt")
        .assert()
        .code(66)
        .stderr(predicate::str::contains("Backup failed during path check"));

    temp.child("out").assert(predicate::path::missing());
    Ok(())
}

#[test]
fn missing_destination_is_usage_error() -> Result<(), Box<dyn std::error::Error>> {
    let temp = assert_fs::TempDir::new()?;
    temp.child("a").create_dir_all()?;

    fbk(&temp)?
        .arg("run")
        .arg("-s")
        .arg(temp.child("a").path())
        .assert()
        .code(64)
        .stderr(predicate::str::contains("destination"));
    Ok(())
}

#[test]
fn unknown_cloud_target_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let temp = assert_fs::TempDir::new()?;
    temp.child("a/x.txt").write_str("x")?;

    fbk(&temp)?
        .arg("run")
        .arg("-s")
        .arg(temp.child("a").path())
        .arg("-d")
        .arg(temp.child("out").path())
        .arg("--cloud")
        .arg("google_drive,dropbox")
        .assert()
        .code(64)
        .stderr(predicate::str::contains("Unknown cloud target 'dropbox'"));

    temp.child("out").assert(predicate::path::missing());
    Ok(())
}

#[test]
fn config_reset_writes_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let temp = assert_fs::TempDir::new()?;
    let config = temp.child("config.toml");
    config.write_str("[backup]\nsource_path = \"/data\"\n")?;

    fbk(&temp)?
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));

    fbk(&temp)?
        .arg("config")
        .arg("--reset")
        .assert()
        .success()
        .stdout(predicate::str::contains("reset successfully"));

    config.assert(predicate::str::contains("source_path = \"\""));
    config.assert(predicate::str::contains("quiet_period_ms = 2000"));
    Ok(())
}

#[test]
fn invalid_config_is_reported() -> Result<(), Box<dyn std::error::Error>> {
    let temp = assert_fs::TempDir::new()?;
    temp.child("config.toml").write_str("[backup\n")?;

    fbk(&temp)?
        .arg("run")
        .assert()
        .code(78)
        .stderr(predicate::str::contains("Error parsing config file"));
    Ok(())
}

#[test]
fn no_command() -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("fbk")?
        .assert()
        .code(2)
        .stderr(predicate::str::contains("requires at least one command"));
    Ok(())
}
