//! CSV rollup for archiving WAL measurements.
//!
//! WAL records are appended to a long-lived CSV archive, the archive is
//! synced, and only then is the WAL renamed to `.wal.processed`.

use crate::wal::WalLock;
use crate::{Measurement, Metric, PatientId, Result, Source};
use chrono::{DateTime, Utc};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;
use uuid::Uuid;

/// A row in the CSV archive
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    id: String,
    patient_id: String,
    metric: Metric,
    value: f64,
    unit: String,
    taken_at: String,
    source: Source,
    recorded_at: String,
}

impl From<&Measurement> for CsvRow {
    fn from(m: &Measurement) -> Self {
        CsvRow {
            id: m.id.to_string(),
            patient_id: m.patient_id.to_string(),
            metric: m.metric,
            value: m.value,
            unit: m.unit.clone(),
            taken_at: m.taken_at.to_rfc3339(),
            source: m.source,
            recorded_at: m.recorded_at.to_rfc3339(),
        }
    }
}

impl TryFrom<CsvRow> for Measurement {
    type Error = crate::Error;

    fn try_from(row: CsvRow) -> Result<Self> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| crate::Error::Other(format!("Invalid UUID: {}", e)))?;

        Ok(Measurement {
            id,
            patient_id: PatientId(row.patient_id),
            metric: row.metric,
            value: row.value,
            unit: row.unit,
            taken_at: parse_rfc3339(&row.taken_at)?,
            source: row.source,
            recorded_at: parse_rfc3339(&row.recorded_at)?,
        })
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Other(format!("Invalid date '{}': {}", s, e)))
}

/// Roll up WAL measurements into the CSV archive and archive the WAL
///
/// Returns the number of measurements written. The CSV is fsynced before
/// the WAL is renamed (not deleted) so a crash never loses records; any
/// overlap is removed by id when history is loaded.
///
/// The sidecar WAL lock is held from the read through the rename, so no
/// append can land in the file that becomes `.wal.processed`.
pub fn wal_to_csv_and_archive(wal_path: &Path, csv_path: &Path) -> Result<usize> {
    let _lock = WalLock::exclusive(wal_path)?;
    let measurements = crate::wal::read_measurements(wal_path)?;

    if measurements.is_empty() {
        tracing::info!("No measurements in WAL to roll up");
        return Ok(0);
    }

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)?;

    // Headers only for a fresh archive
    let needs_headers = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);

    for m in &measurements {
        writer.serialize(CsvRow::from(m))?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    file.sync_all()?;

    tracing::info!("Wrote {} measurements to CSV", measurements.len());

    let processed_path = wal_path.with_extension("wal.processed");
    std::fs::rename(wal_path, &processed_path)?;

    tracing::info!("Archived WAL to {:?}", processed_path);

    Ok(measurements.len())
}

/// Load all measurements from a CSV archive
///
/// Rows that fail to parse are skipped with a warning.
pub fn read_csv_archive(path: &Path) -> Result<Vec<Measurement>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;

    let mut measurements = Vec::new();
    for result in reader.deserialize::<CsvRow>() {
        match result {
            Ok(row) => match Measurement::try_from(row) {
                Ok(m) => measurements.push(m),
                Err(e) => tracing::warn!("Failed to parse CSV row: {}", e),
            },
            Err(e) => tracing::warn!("Failed to deserialize CSV row: {}", e),
        }
    }

    tracing::debug!("Read {} measurements from CSV", measurements.len());
    Ok(measurements)
}

/// Clean up old processed WAL files
///
/// This removes all .wal.processed files in the given directory.
pub fn cleanup_processed_wals(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if path.extension().is_some_and(|ext| ext == "processed") {
            std::fs::remove_file(&path)?;
            tracing::debug!("Removed processed WAL: {:?}", path);
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Cleaned up {} processed WAL files", count);
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::{JsonlSink, MeasurementSink};
    use crate::MeasurementInput;
    use chrono::{Duration, TimeZone};
    use std::fs::File;
    use std::sync::mpsc;
    use std::time::Duration as StdDuration;

    fn create_test_measurement(patient: &str, day: i64) -> Measurement {
        let base = Utc.with_ymd_and_hms(2025, 1, 15, 8, 30, 0).unwrap();
        MeasurementInput {
            patient_id: patient.into(),
            metric: Metric::Hemoglobin,
            value: 8.1,
            unit: None,
            taken_at: base + Duration::days(day),
            source: Source::SelfReport,
        }
        .into_measurement(base + Duration::days(day))
    }

    #[test]
    fn test_wal_to_csv_creates_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let wal_path = temp_dir.path().join("measurements.wal");
        let csv_path = temp_dir.path().join("measurements.csv");

        let mut sink = JsonlSink::new(&wal_path);
        for i in 0..3 {
            sink.append(&create_test_measurement("p1", i)).unwrap();
        }

        let count = wal_to_csv_and_archive(&wal_path, &csv_path).unwrap();
        assert_eq!(count, 3);

        assert!(csv_path.exists());
        assert!(!wal_path.exists());
        assert!(wal_path.with_extension("wal.processed").exists());
    }

    #[test]
    fn test_wal_to_csv_appends_and_reads_back() {
        let temp_dir = tempfile::tempdir().unwrap();
        let wal_path = temp_dir.path().join("measurements.wal");
        let csv_path = temp_dir.path().join("measurements.csv");

        let first = create_test_measurement("p1", 0);
        let second = create_test_measurement("p2", 1);

        let mut sink = JsonlSink::new(&wal_path);
        sink.append(&first).unwrap();
        assert_eq!(wal_to_csv_and_archive(&wal_path, &csv_path).unwrap(), 1);

        let mut sink = JsonlSink::new(&wal_path);
        sink.append(&second).unwrap();
        assert_eq!(wal_to_csv_and_archive(&wal_path, &csv_path).unwrap(), 1);

        let archived = read_csv_archive(&csv_path).unwrap();
        assert_eq!(archived, vec![first, second]);
    }

    #[test]
    fn test_empty_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let wal_path = temp_dir.path().join("empty.wal");
        let csv_path = temp_dir.path().join("measurements.csv");

        File::create(&wal_path).unwrap();

        let count = wal_to_csv_and_archive(&wal_path, &csv_path).unwrap();
        assert_eq!(count, 0);
        assert!(!csv_path.exists());
    }

    #[test]
    fn test_cleanup_processed_wals() {
        let temp_dir = tempfile::tempdir().unwrap();

        File::create(temp_dir.path().join("m1.wal.processed")).unwrap();
        File::create(temp_dir.path().join("m2.wal.processed")).unwrap();
        File::create(temp_dir.path().join("keep.wal")).unwrap();

        let count = cleanup_processed_wals(temp_dir.path()).unwrap();
        assert_eq!(count, 2);

        assert!(!temp_dir.path().join("m1.wal.processed").exists());
        assert!(temp_dir.path().join("keep.wal").exists());
    }

    #[test]
    fn test_rollup_waits_for_in_flight_append() {
        let temp_dir = tempfile::tempdir().unwrap();
        let wal_path = temp_dir.path().join("measurements.wal");
        let csv_path = temp_dir.path().join("measurements.csv");

        let mut sink = JsonlSink::new(&wal_path);
        sink.append(&create_test_measurement("p1", 0)).unwrap();

        // A writer holds the lock between its duplicate check and its write
        let writer_lock = WalLock::exclusive(&wal_path).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let (rollup_wal, rollup_csv) = (wal_path.clone(), csv_path.clone());
        let rollup = std::thread::spawn(move || {
            let count = wal_to_csv_and_archive(&rollup_wal, &rollup_csv).unwrap();
            done_tx.send(count).unwrap();
        });

        assert!(done_rx.recv_timeout(StdDuration::from_millis(200)).is_err());
        assert!(wal_path.exists());

        // The writer finishes its append before releasing the lock
        {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&wal_path)
                .unwrap();
            let line = serde_json::to_string(&create_test_measurement("p1", 1)).unwrap();
            std::io::Write::write_all(&mut file, format!("{}\n", line).as_bytes()).unwrap();
        }
        drop(writer_lock);

        assert_eq!(done_rx.recv_timeout(StdDuration::from_secs(5)).unwrap(), 2);
        rollup.join().unwrap();

        assert_eq!(read_csv_archive(&csv_path).unwrap().len(), 2);
        assert!(!wal_path.exists());
    }

    #[test]
    fn test_append_after_rollup_starts_fresh_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let wal_path = temp_dir.path().join("measurements.wal");
        let csv_path = temp_dir.path().join("measurements.csv");

        let mut sink = JsonlSink::new(&wal_path);
        sink.append(&create_test_measurement("p1", 0)).unwrap();
        wal_to_csv_and_archive(&wal_path, &csv_path).unwrap();

        let late = create_test_measurement("p1", 1);
        sink.append(&late).unwrap();

        // The late record is live, not in the processed file
        assert_eq!(crate::wal::read_measurements(&wal_path).unwrap(), vec![late]);
        let processed = wal_path.with_extension("wal.processed");
        assert_eq!(crate::wal::read_measurements(&processed).unwrap().len(), 1);
    }
}
