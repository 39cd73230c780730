mod common;

use assert_cmd::Command;
use common::*;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tilestitch::{ErrorKind, StitchOptions, StitchReport, StitchRequest, TileEntry};

fn write_request(dir: &Path, options: StitchOptions) -> PathBuf {
    let records = row_of_three(&dir.join("tiles"));
    let request = StitchRequest {
        tiles: records.into_iter().map(TileEntry::Record).collect(),
        pattern: PATTERN.to_string(),
        options,
    };
    let path = dir.join("request.json");
    request.write_json(&path).expect("request written");
    path
}

fn quick_options() -> StitchOptions {
    StitchOptions {
        filter_sigma: 0.0,
        ..StitchOptions::default()
    }
}

fn tilestitch() -> Command {
    Command::cargo_bin("tilestitch").expect("binary built")
}

#[test]
fn stitches_a_request_and_writes_a_report() {
    let dir = TempDir::new().expect("tempdir");
    let request = write_request(dir.path(), quick_options());
    let out = dir.path().join("out");
    let report = dir.path().join("report.json");

    tilestitch()
        .arg("--request")
        .arg(&request)
        .arg("--output-dir")
        .arg(&out)
        .arg("--report")
        .arg(&report)
        .args(["--log-level", "warn"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stitched 3 tiles into 260x100 px"))
        .stdout(predicate::str::contains("stitched_0.tif"));

    assert_eq!(files_in(&out), ["stitched_0.tif", "thumbnail_0.tif"]);
    let report = StitchReport::load_json(&report).expect("report");
    assert!(report.error.is_none());
    let summary = report.summary.expect("summary");
    assert_eq!(summary.canvas_width, 260);
    assert_eq!(summary.tiles.len(), 3);
}

#[test]
fn dry_run_writes_nothing() {
    let dir = TempDir::new().expect("tempdir");
    let request = write_request(dir.path(), quick_options());
    let out = dir.path().join("out");

    tilestitch()
        .arg("--request")
        .arg(&request)
        .arg("--output-dir")
        .arg(&out)
        .arg("--dry-run")
        .assert()
        .success();

    assert!(!out.exists());
    assert_eq!(files_in(&dir.path().join("tiles")).len(), 3);
}

#[test]
fn failed_job_exits_with_one_and_reports_the_error() {
    let dir = TempDir::new().expect("tempdir");
    let request = write_request(dir.path(), quick_options());
    std::fs::remove_file(dir.path().join("tiles").join(tile_name(0, 1))).expect("removed");
    let report = dir.path().join("report.json");

    tilestitch()
        .arg("--request")
        .arg(&request)
        .arg("--report")
        .arg(&report)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("io_error"));

    let report = StitchReport::load_json(&report).expect("report");
    let error = report.error.expect("error recorded");
    assert_eq!(error.kind, ErrorKind::Io);
    assert_eq!(error.tile_ids, ["t1"]);
}

#[test]
fn unreadable_request_exits_with_two() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("request.json"), "{\"tiles\": 3}").expect("written");

    tilestitch()
        .arg("--request")
        .arg(dir.path().join("request.json"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to read request"));

    tilestitch()
        .arg("--request")
        .arg(dir.path().join("absent.json"))
        .assert()
        .code(2);
}

#[test]
fn rejects_unknown_log_level() {
    tilestitch()
        .args(["--request", "job.json", "--log-level", "loud"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown log level"));
}
