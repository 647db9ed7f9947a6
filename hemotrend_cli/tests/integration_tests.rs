//! Integration tests for the hemotrend binary.
//!
//! These tests verify end-to-end behavior including:
//! - Recording and querying measurements
//! - Rejection of invalid input
//! - Dashboard, forecast and recommendation output
//! - CSV rollup operations

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a test data directory with an empty config file
fn setup_test_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::write(dir.path().join("config.toml"), "").expect("Failed to write config");
    dir
}

/// Helper to get the CLI binary pointed at a test data directory
fn cli(data_dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("hemotrend"));
    cmd.arg("--data-dir")
        .arg(data_dir)
        .arg("--config")
        .arg(data_dir.join("config.toml"));
    cmd
}

fn record(data_dir: &Path, metric: &str, taken_at: &str, value: &str) {
    cli(data_dir)
        .args(["record", "--patient", "sarah", "--metric", metric])
        .args(["--taken-at", taken_at, "--value", value])
        .assert()
        .success();
}

fn record_hemoglobin_history(data_dir: &Path) {
    for (date, value) in [
        ("2025-01-15", "8.2"),
        ("2025-02-12", "7.9"),
        ("2025-03-10", "8.5"),
        ("2025-04-08", "8.1"),
        ("2025-05-06", "7.8"),
        ("2025-06-03", "8.3"),
    ] {
        record(data_dir, "hemoglobin", date, value);
    }
}

#[test]
fn test_cli_help() {
    Command::new(assert_cmd::cargo::cargo_bin!("hemotrend"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Lab trend tracking and transfusion forecasting",
        ));
}

#[test]
fn test_record_creates_wal() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli(data_dir)
        .args(["record", "--patient", "sarah", "--metric", "ferritin"])
        .args(["--value", "1850", "--taken-at", "2025-03-01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded ferritin 1850 ng/mL"));

    let wal_path = data_dir.join("wal/measurements.wal");
    let wal_content = fs::read_to_string(&wal_path).expect("Failed to read WAL");
    assert_eq!(wal_content.lines().count(), 1);
    assert!(wal_content.contains("\"ferritin\""));
}

#[test]
fn test_record_then_query_round_trip() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    record(data_dir, "hemoglobin", "2025-02-12T09:30:00Z", "7.9");

    cli(data_dir)
        .args(["query", "--patient", "sarah", "--metric", "hemoglobin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2025-02-12 09:30"))
        .stdout(predicate::str::contains("7.9"))
        .stdout(predicate::str::contains("below normal"));

    // Another patient sees nothing
    cli(data_dir)
        .args(["query", "--patient", "other", "--metric", "hemoglobin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No measurements"));
}

#[test]
fn test_negative_value_rejected_and_nothing_stored() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli(data_dir)
        .args(["record", "--patient", "sarah", "--metric", "hemoglobin"])
        .args(["--value", "-5", "--taken-at", "2025-06-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("InvalidMeasurement"));

    cli(data_dir)
        .args(["query", "--patient", "sarah", "--metric", "hemoglobin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No measurements"));
}

#[test]
fn test_wrong_unit_rejected() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli(data_dir)
        .args(["record", "--patient", "sarah", "--metric", "hemoglobin"])
        .args(["--value", "80", "--unit", "g/L", "--taken-at", "2025-06-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("InvalidMeasurement"));
}

#[test]
fn test_duplicate_timestamp_rejected() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    record(data_dir, "hemoglobin", "2025-06-01", "8.0");

    cli(data_dir)
        .args(["record", "--patient", "sarah", "--metric", "hemoglobin"])
        .args(["--value", "8.4", "--taken-at", "2025-06-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("DuplicateMeasurement"));

    let wal_content = fs::read_to_string(data_dir.join("wal/measurements.wal")).unwrap();
    assert_eq!(wal_content.lines().count(), 1);
}

#[test]
fn test_unknown_metric_rejected_by_parser() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["record", "--patient", "sarah", "--metric", "glucose", "--value", "5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown metric"));
}

#[test]
fn test_scenario_dashboard_reports_no_imminent_need() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    record_hemoglobin_history(data_dir);

    cli(data_dir)
        .args(["dashboard", "--patient", "sarah", "--as-of", "2025-06-03"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No transfusion projected within horizon"))
        .stdout(predicate::str::contains("6 samples"));
}

#[test]
fn test_dashboard_json_is_stable() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    record_hemoglobin_history(data_dir);

    let run = || {
        let output = cli(data_dir)
            .args(["dashboard", "--patient", "sarah", "--as-of", "2025-06-03", "--json"])
            .output()
            .expect("Failed to run dashboard");
        assert!(output.status.success());
        output.stdout
    };

    let first = run();
    let second = run();
    assert_eq!(first, second);

    let summary: serde_json::Value = serde_json::from_slice(&first).unwrap();
    assert_eq!(
        summary["transfusion_prediction"]["status"],
        "no_imminent_need"
    );
    assert!(summary["transfusion_prediction"]["predicted_date"].is_null());
    assert_eq!(summary["trends"]["hemoglobin"]["status"], "available");
}

#[test]
fn test_dashboard_without_data_says_insufficient() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["dashboard", "--patient", "nobody", "--as-of", "2025-06-03"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No data yet"))
        .stdout(predicate::str::contains("insufficient data"))
        .stdout(predicate::str::contains("Insufficient hemoglobin data"));
}

#[test]
fn test_single_ferritin_forecast_is_insufficient() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    record(data_dir, "ferritin", "2025-03-01", "1200");

    cli(data_dir)
        .args(["forecast", "--patient", "sarah", "--metric", "ferritin"])
        .args(["--as-of", "2025-03-02"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("InsufficientData"));

    cli(data_dir)
        .args(["dashboard", "--patient", "sarah", "--as-of", "2025-03-02"])
        .assert()
        .success()
        .stdout(predicate::str::contains("insufficient data (1 sample)"));
}

#[test]
fn test_forecast_prints_weekly_points() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    record_hemoglobin_history(data_dir);

    let output = cli(data_dir)
        .args(["forecast", "--patient", "sarah", "--metric", "hb"])
        .args(["--as-of", "2025-06-03", "--json"])
        .output()
        .expect("Failed to run forecast");
    assert!(output.status.success());

    let points: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(points.len(), 6);
    for p in &points {
        let lower = p["lower_bound"].as_f64().unwrap();
        let predicted = p["predicted_value"].as_f64().unwrap();
        let upper = p["upper_bound"].as_f64().unwrap();
        assert!(lower <= predicted && predicted <= upper);
    }
}

#[test]
fn test_forecast_horizon_is_bounded() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    record_hemoglobin_history(data_dir);

    // Past the configured maximum of 365 days
    cli(data_dir)
        .args(["forecast", "--patient", "sarah", "--metric", "hb"])
        .args(["--as-of", "2025-06-03", "--horizon-days", "400"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("HorizonTooLong"));

    // Past any representable horizon
    cli(data_dir)
        .args(["forecast", "--patient", "sarah", "--metric", "hb"])
        .args(["--as-of", "2025-06-03", "--horizon-days", "200000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--horizon-days"));
}

#[test]
fn test_threshold_override_changes_prediction() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    record_hemoglobin_history(data_dir);

    cli(data_dir)
        .args(["threshold", "--patient", "sarah", "--value", "9"])
        .assert()
        .success();
    assert!(data_dir.join("profiles.json").exists());

    cli(data_dir)
        .args(["recommend", "--patient", "sarah", "--as-of", "2025-06-03"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1. [High] Schedule Blood Transfusion"));
}

#[test]
fn test_implausible_threshold_rejected() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["threshold", "--patient", "sarah", "--value", "40"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("State"));
}

#[test]
fn test_rollup_moves_wal_to_csv() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    record(data_dir, "hemoglobin", "2025-05-06", "7.8");
    record(data_dir, "hemoglobin", "2025-06-03", "8.3");

    cli(data_dir)
        .arg("rollup")
        .assert()
        .success()
        .stdout(predicate::str::contains("Rolled up 2 measurements"));

    let csv_path = data_dir.join("measurements.csv");
    let csv_content = fs::read_to_string(&csv_path).expect("Failed to read CSV");
    assert!(csv_content.starts_with("id,"));
    assert_eq!(csv_content.lines().count(), 3);
    assert!(!data_dir.join("wal/measurements.wal").exists());
    assert!(data_dir.join("wal/measurements.wal.processed").exists());

    // Archived records are still visible
    cli(data_dir)
        .args(["query", "--patient", "sarah", "--metric", "hemoglobin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("7.8"))
        .stdout(predicate::str::contains("8.3"));
}

#[test]
fn test_rollup_with_cleanup() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    record(data_dir, "ferritin", "2025-03-01", "1200");

    cli(data_dir)
        .args(["rollup", "--cleanup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleaned up 1 processed WAL files"));

    assert!(!data_dir.join("wal/measurements.wal.processed").exists());
}

#[test]
fn test_rollup_without_wal() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .arg("rollup")
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to roll up"));
}

#[test]
fn test_duplicate_detected_across_rollup() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    record(data_dir, "hemoglobin", "2025-06-01", "8.0");

    cli(data_dir).arg("rollup").assert().success();

    cli(data_dir)
        .args(["record", "--patient", "sarah", "--metric", "hemoglobin"])
        .args(["--value", "8.1", "--taken-at", "2025-06-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("DuplicateMeasurement"));
}
