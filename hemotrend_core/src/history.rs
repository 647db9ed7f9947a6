//! Measurement history loading.
//!
//! Rebuilds the in-memory log from the CSV archive and the live WAL.

use crate::store::MeasurementLog;
use crate::{Error, Result};
use chrono::Duration;
use std::collections::HashSet;
use std::path::Path;

/// Load every measurement from the CSV archive and the WAL
///
/// Records are deduplicated by id (a crash between rollup and WAL rename
/// leaves the same record in both files). Records that fail validation or
/// collide on `(patient, metric, taken_at)` are skipped with a warning.
pub fn load_measurement_log(
    wal_path: &Path,
    csv_path: &Path,
    clock_skew: Duration,
) -> Result<MeasurementLog> {
    let mut log = MeasurementLog::with_clock_skew(clock_skew);
    let mut seen_ids = HashSet::new();
    let mut skipped = 0usize;

    // A rollup between the two reads would hide records from both
    let _lock = match wal_path.parent() {
        Some(dir) if dir.is_dir() => Some(crate::wal::WalLock::shared(wal_path)?),
        _ => None,
    };

    let archived = crate::csv_rollup::read_csv_archive(csv_path)?;
    let live = crate::wal::read_measurements(wal_path)?;
    let archived_count = archived.len();

    for m in archived.into_iter().chain(live) {
        if !seen_ids.insert(m.id) {
            tracing::debug!("Skipping already loaded measurement {}", m.id);
            continue;
        }

        match log.replay(m) {
            Ok(()) => {}
            Err(e @ (Error::InvalidMeasurement(_) | Error::DuplicateMeasurement { .. })) => {
                tracing::warn!("Skipping stored measurement: {}", e);
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        "Loaded {} measurements ({} archived, {} skipped)",
        log.len(),
        archived_count,
        skipped
    );

    Ok(log)
}
