#![allow(clippy::unwrap_used, clippy::expect_used)]
//! `rbutils` integration tests
//!
//! ## Exit Codes
//! - 0: Success
//! - 1: Input rejected, database unchanged
//! - 2: Missing configuration or service

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Result;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::Value as JsonValue;
use tempfile::TempDir;

fn rbutils() -> Result<assert_cmd::Command> {
    let mut cmd = assert_cmd::Command::cargo_bin("rbutils")?;
    cmd.env_remove("BOOSTER_CONFIG");
    cmd.env_remove("RUST_LOG");
    Ok(cmd)
}

/// `rbutils id-gen --db <tmp>/ids.db <args>`
fn id_gen(dir: &TempDir, args: &[&str]) -> Result<assert_cmd::Command> {
    let mut cmd = rbutils()?;
    cmd.arg("id-gen")
        .arg("--db")
        .arg(dir.path().join("ids.db"))
        .args(args);
    Ok(cmd)
}

fn write_file(dir: &TempDir, name: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.path().join(name);
    fs::write(&path, contents)?;
    Ok(path)
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn export(dir: &TempDir) -> Result<String> {
    let output = id_gen(dir, &["export", "16894"])?.output()?;
    assert!(output.status.success());
    Ok(String::from_utf8(output.stdout)?)
}

fn seed_map(dir: &TempDir) -> Result<()> {
    let map = write_file(dir, "map.csv", "id,record\nA,r1\nB,r2\nC,r3\n")?;
    id_gen(dir, &["import", "16894", path_arg(&map)])?
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 3 assignments"));
    Ok(())
}

fn write_config(dir: &TempDir) -> Result<PathBuf> {
    let data = dir.path().join("data");
    let toml = format!(
        r#"
        data_dir = "{}"

        [services.id_gen]
        kind = "id_gen"

        [services.id_gen.projects.16894]
        id_field = "study_id"

        [services.jcoin_sae]
        kind = "document_archive"

        [services.jcoin_sae.projects.2311]
        archive_dir = "/tmp/archive"
        dags = {{ site_a = "Site A" }}
        "#,
        data.display()
    );
    write_file(dir, "booster.toml", &toml)
}

#[test]
fn load_then_stats() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ids = write_file(&dir, "ids.txt", "A\nB\n\n  C  \n")?;

    id_gen(&dir, &["load", "16894", path_arg(&ids)])?
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Loaded 3 identifiers into project 16894 (0 already present)",
        ));

    // Reloading skips what is already there
    id_gen(&dir, &["load", "16894", path_arg(&ids)])?
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded 0 identifiers").and(
            predicate::str::contains("(3 already present)"),
        ));

    id_gen(&dir, &["stats", "16894"])?
        .assert()
        .success()
        .stdout("Project 16894: 3 total, 0 bound, 3 available\n");

    assert_eq!(export(&dir)?, "id,record\nA,\nB,\nC,\n");
    Ok(())
}

#[test]
fn duplicate_load_exits_with_input_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ids = write_file(&dir, "ids.txt", "A\nA\nB\n")?;

    id_gen(&dir, &["load", "16894", path_arg(&ids)])?
        .assert()
        .code(1)
        .stderr(predicate::str::contains("duplicate identifiers in input: A"));

    id_gen(&dir, &["stats", "16894"])?
        .assert()
        .success()
        .stdout(predicate::str::contains("0 total"));
    Ok(())
}

#[test]
fn import_export_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    seed_map(&dir)?;

    assert_eq!(export(&dir)?, "id,record\nA,r1\nB,r2\nC,r3\n");

    let out = dir.path().join("out.csv");
    id_gen(&dir, &["export", "16894", "--output", path_arg(&out)])?
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 3 rows"));
    assert_eq!(fs::read_to_string(&out)?, "id,record\nA,r1\nB,r2\nC,r3\n");

    // A second import into a non-empty project is refused
    let again = write_file(&dir, "again.csv", "id,record\nD,r4\n")?;
    id_gen(&dir, &["import", "16894", path_arg(&again)])?
        .assert()
        .code(1)
        .stderr(predicate::str::contains("state error"));
    Ok(())
}

#[test]
fn bound_only_export_skips_available() -> Result<()> {
    let dir = tempfile::tempdir()?;
    seed_map(&dir)?;
    let extra = write_file(&dir, "extra.txt", "D\n")?;
    id_gen(&dir, &["load", "16894", path_arg(&extra)])?
        .assert()
        .success();

    assert_eq!(export(&dir)?, "id,record\nA,r1\nB,r2\nC,r3\nD,\n");
    id_gen(&dir, &["export", "16894", "--bound-only"])?
        .assert()
        .success()
        .stdout("id,record\nA,r1\nB,r2\nC,r3\n")
        .stderr(predicate::str::contains("Exported 3 rows"));
    Ok(())
}

#[test]
fn correct_swaps_records() -> Result<()> {
    let dir = tempfile::tempdir()?;
    seed_map(&dir)?;
    let batch = write_file(&dir, "fix.csv", "current_id,corrected_id\nA,B\nB,A\n")?;

    id_gen(&dir, &["correct", "16894", path_arg(&batch)])?
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Applied 2 corrections to project 16894")
                .and(predicate::str::contains("A -> B: r1"))
                .and(predicate::str::contains("B -> A: r2")),
        );

    assert_eq!(export(&dir)?, "id,record\nA,r2\nB,r1\nC,r3\n");
    Ok(())
}

#[test]
fn correct_dry_run_leaves_pool_unchanged() -> Result<()> {
    let dir = tempfile::tempdir()?;
    seed_map(&dir)?;
    let batch = write_file(&dir, "fix.csv", "current_id,corrected_id\nA,B\nB,A\n")?;

    id_gen(&dir, &["correct", "16894", path_arg(&batch), "--dry-run"])?
        .assert()
        .success()
        .stdout(predicate::str::contains("Would apply 2 corrections"));

    assert_eq!(export(&dir)?, "id,record\nA,r1\nB,r2\nC,r3\n");
    Ok(())
}

#[test]
fn unknown_identifier_warns_unless_strict() -> Result<()> {
    let dir = tempfile::tempdir()?;
    seed_map(&dir)?;
    let batch = write_file(
        &dir,
        "fix.csv",
        "current_id,corrected_id\nGHOST,C\nA,B\nB,A\n",
    )?;

    id_gen(&dir, &["correct", "16894", path_arg(&batch), "--strict"])?
        .assert()
        .code(1)
        .stderr(predicate::str::contains("validation error"));
    assert_eq!(export(&dir)?, "id,record\nA,r1\nB,r2\nC,r3\n");

    id_gen(&dir, &["correct", "16894", path_arg(&batch)])?
        .assert()
        .success()
        .stderr(predicate::str::contains("warning: current_id 'GHOST' not found"))
        .stdout(predicate::str::contains("Applied 2 corrections"));
    assert_eq!(export(&dir)?, "id,record\nA,r2\nB,r1\nC,r3\n");
    Ok(())
}

#[test]
fn bad_correction_header_is_input_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    seed_map(&dir)?;
    let batch = write_file(&dir, "fix.csv", "old,new\nA,B\n")?;

    id_gen(&dir, &["correct", "16894", path_arg(&batch)])?
        .assert()
        .code(1)
        .stderr(predicate::str::contains("validation error"));
    Ok(())
}

#[test]
fn update_records_rewrites_keys() -> Result<()> {
    let dir = tempfile::tempdir()?;
    seed_map(&dir)?;
    let updates = write_file(&dir, "updates.csv", "id,record\nA,r1-new\n")?;

    id_gen(&dir, &["update-records", "16894", path_arg(&updates), "--dry-run"])?
        .assert()
        .success()
        .stdout(predicate::str::contains("Would update 1 records"));
    assert_eq!(export(&dir)?, "id,record\nA,r1\nB,r2\nC,r3\n");

    id_gen(&dir, &["update-records", "16894", path_arg(&updates)])?
        .assert()
        .success()
        .stdout(predicate::str::contains("A: r1 -> r1-new"));
    assert_eq!(export(&dir)?, "id,record\nA,r1-new\nB,r2\nC,r3\n");
    Ok(())
}

#[test]
fn list_projects_json() -> Result<()> {
    let dir = tempfile::tempdir()?;
    seed_map(&dir)?;

    let output = id_gen(&dir, &["list-projects", "--json"])?.output()?;
    assert!(output.status.success());
    let parsed: JsonValue = serde_json::from_slice(&output.stdout)?;
    assert_eq!(
        parsed,
        serde_json::json!([
            {"project": "16894", "total": 3, "bound": 3, "available": 0}
        ])
    );
    Ok(())
}

#[test]
fn invalid_project_id_is_rejected_by_parser() -> Result<()> {
    let dir = tempfile::tempdir()?;
    id_gen(&dir, &["stats", "abc"])?
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid project id"));
    Ok(())
}

#[test]
fn service_resolves_database_from_config() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = write_config(&dir)?;
    let ids = write_file(&dir, "ids.txt", "A\nB\n")?;

    rbutils()?
        .arg("--config")
        .arg(&config)
        .args(["id-gen", "--service", "id_gen", "load", "16894"])
        .arg(&ids)
        .assert()
        .success();

    assert!(dir.path().join("data").join("id_gen.db").exists());
    Ok(())
}

#[test]
fn unknown_or_poolless_service_is_config_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = write_config(&dir)?;

    rbutils()?
        .arg("--config")
        .arg(&config)
        .args(["id-gen", "--service", "nope", "stats", "16894"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("service 'nope' is not configured"));

    rbutils()?
        .arg("--config")
        .arg(&config)
        .args(["id-gen", "--service", "jcoin_sae", "stats", "2311"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("does not use an identifier pool"));
    Ok(())
}

#[test]
fn missing_explicit_config_is_config_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    rbutils()?
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("list-services")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
    Ok(())
}

#[test]
fn list_services_shows_kinds() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = write_config(&dir)?;

    rbutils()?
        .arg("--config")
        .arg(&config)
        .arg("list-services")
        .assert()
        .success()
        .stdout("id_gen\tid_gen\t16894\njcoin_sae\tdocument_archive\t2311\n");
    Ok(())
}

#[test]
fn log_file_records_operations() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ids = write_file(&dir, "ids.txt", "A\nB\n")?;
    let log = dir.path().join("logs").join("rbutils.log");

    rbutils()?
        .arg("--log-file")
        .arg(&log)
        .arg("id-gen")
        .arg("--db")
        .arg(dir.path().join("ids.db"))
        .args(["load", "16894"])
        .arg(&ids)
        .assert()
        .success();

    let contents = fs::read_to_string(&log)?;
    assert!(contents.contains("loaded identifiers"), "log was: {contents}");
    Ok(())
}
