//! Write-Ahead Log (WAL) for measurement persistence.
//!
//! Measurements are appended to a JSONL (JSON Lines) file with file locking
//! to ensure safe concurrent access. The WAL is the durable form of the
//! append-only measurement log.
//!
//! Writers and the CSV rollup also serialize on a sidecar lock file
//! (`<wal>.lock`). The WAL file itself is renamed by rollup, so a lock on
//! its inode cannot keep an append from landing in the renamed file.

use crate::store::{MeasurementLog, MeasurementStore};
use crate::{Error, Measurement, Metric, PatientId, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Path of the sidecar lock file guarding `wal_path`
pub fn lock_path(wal_path: &Path) -> PathBuf {
    let mut name = wal_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Advisory lock on the sidecar file next to a WAL.
///
/// Held exclusively for an append (re-read, check, write) and for a whole
/// rollup (read, archive, rename). Released on drop.
pub struct WalLock {
    file: File,
}

impl WalLock {
    pub fn exclusive(wal_path: &Path) -> Result<Self> {
        let file = Self::open(wal_path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }

    pub fn shared(wal_path: &Path) -> Result<Self> {
        let file = Self::open(wal_path)?;
        file.lock_shared()?;
        Ok(Self { file })
    }

    fn open(wal_path: &Path) -> Result<File> {
        let path = lock_path(wal_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        Ok(file)
    }
}

impl Drop for WalLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release WAL lock: {}", e);
        }
    }
}

/// Measurement sink trait for persisting records
pub trait MeasurementSink {
    fn append(&mut self, measurement: &Measurement) -> Result<()>;
}

/// JSONL-based measurement sink with file locking
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    /// Create a new JSONL sink for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Append one line. The caller must hold the sidecar [`WalLock`].
    fn write_locked(&self, measurement: &Measurement) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(measurement)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);
        file.sync_data()?;

        file.unlock()?;

        tracing::debug!("Appended measurement {} to WAL", measurement.id);
        Ok(())
    }
}

impl MeasurementSink for JsonlSink {
    fn append(&mut self, measurement: &Measurement) -> Result<()> {
        let _lock = WalLock::exclusive(&self.path)?;
        self.write_locked(measurement)
    }
}

/// Read all measurements from a WAL file
///
/// Lines that fail to parse are skipped with a warning.
pub fn read_measurements(path: &Path) -> Result<Vec<Measurement>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut measurements = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Measurement>(&line) {
            Ok(m) => measurements.push(m),
            Err(e) => {
                tracing::warn!("Failed to parse measurement at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} measurements from WAL", measurements.len());
    Ok(measurements)
}

/// Measurement store backed by an in-memory log and a WAL file.
///
/// Each append takes the sidecar lock, folds in records other writers
/// persisted since the log was loaded, validates, and only then writes.
/// A rejected record never reaches disk, and two stores loaded from the
/// same state cannot both accept the same `(patient, metric, taken_at)`.
pub struct WalStore {
    log: MeasurementLog,
    sink: JsonlSink,
    archive: Option<PathBuf>,
}

impl WalStore {
    pub fn new(log: MeasurementLog, wal_path: impl Into<PathBuf>) -> Self {
        Self {
            log,
            sink: JsonlSink::new(wal_path),
            archive: None,
        }
    }

    /// Also re-read this CSV archive before each append, so records moved
    /// there by a concurrent rollup still count as duplicates
    pub fn with_archive(mut self, csv_path: impl Into<PathBuf>) -> Self {
        self.archive = Some(csv_path.into());
        self
    }

    pub fn log(&self) -> &MeasurementLog {
        &self.log
    }

    pub fn into_log(self) -> MeasurementLog {
        self.log
    }

    /// Replay persisted records this log has not seen. Caller holds the lock.
    fn refresh(&mut self) -> Result<()> {
        let mut persisted = match &self.archive {
            Some(csv_path) => crate::csv_rollup::read_csv_archive(csv_path)?,
            None => Vec::new(),
        };
        persisted.extend(read_measurements(self.sink.path())?);

        let mut known: HashSet<_> = self.log.iter().map(|m| m.id).collect();
        let mut added = 0usize;
        for m in persisted {
            if !known.insert(m.id) {
                continue;
            }
            match self.log.replay(m) {
                Ok(()) => added += 1,
                Err(Error::InvalidMeasurement(_) | Error::DuplicateMeasurement { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if added > 0 {
            tracing::debug!("Picked up {} measurements written by other writers", added);
        }
        Ok(())
    }
}

impl MeasurementStore for WalStore {
    fn append(&mut self, measurement: Measurement, now: DateTime<Utc>) -> Result<()> {
        let _lock = WalLock::exclusive(self.sink.path())?;
        self.refresh()?;
        self.log.check_append(&measurement, now)?;
        self.sink.write_locked(&measurement)?;
        self.log.insert(measurement);
        Ok(())
    }

    fn query(
        &self,
        patient_id: &PatientId,
        metric: Metric,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<Measurement> {
        self.log.query(patient_id, metric, from, to)
    }
}
