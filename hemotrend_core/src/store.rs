//! Append-only measurement store.
//!
//! Records are kept per `(patient, metric)` in `taken_at` order. A record is
//! never edited or removed; a correction is a new record.

use crate::{ranges, Error, Measurement, Metric, PatientId, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Store trait for measurement logs
pub trait MeasurementStore {
    /// Validate and append a record. On error the store is unchanged.
    fn append(&mut self, measurement: Measurement, now: DateTime<Utc>) -> Result<()>;

    /// Chronological records for one series, bounds inclusive
    fn query(
        &self,
        patient_id: &PatientId,
        metric: Metric,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<Measurement>;
}

/// In-memory append-only log
#[derive(Clone, Debug)]
pub struct MeasurementLog {
    series: BTreeMap<(PatientId, Metric), Vec<Measurement>>,
    clock_skew: Duration,
}

impl Default for MeasurementLog {
    fn default() -> Self {
        Self::with_clock_skew(Duration::minutes(5))
    }
}

impl MeasurementLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock_skew(clock_skew: Duration) -> Self {
        Self {
            series: BTreeMap::new(),
            clock_skew,
        }
    }

    /// Total number of records across all series
    pub fn len(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(Vec::is_empty)
    }

    /// All records in series order (patient, metric, taken_at)
    pub fn iter(&self) -> impl Iterator<Item = &Measurement> {
        self.series.values().flatten()
    }

    /// Run every ingestion check without modifying the log
    pub fn check_append(&self, measurement: &Measurement, now: DateTime<Utc>) -> Result<()> {
        validate_record(measurement)?;

        let latest_allowed = now
            .checked_add_signed(self.clock_skew)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if measurement.taken_at > latest_allowed {
            return Err(Error::InvalidMeasurement(format!(
                "taken_at {} is in the future (now {})",
                measurement.taken_at, now
            )));
        }

        self.check_duplicate(measurement)
    }

    /// Insert a record loaded from durable storage.
    ///
    /// Skips the future-time check (the record was accepted when written) but
    /// still rejects malformed and duplicate records.
    pub fn replay(&mut self, measurement: Measurement) -> Result<()> {
        validate_record(&measurement)?;
        self.check_duplicate(&measurement)?;
        self.insert(measurement);
        Ok(())
    }

    /// Whether a record with this id is already present
    pub fn contains_id(&self, id: &uuid::Uuid) -> bool {
        self.iter().any(|m| &m.id == id)
    }

    fn check_duplicate(&self, measurement: &Measurement) -> Result<()> {
        let key = (measurement.patient_id.clone(), measurement.metric);
        let exists = self
            .series
            .get(&key)
            .map(|records| {
                records
                    .binary_search_by(|m| m.taken_at.cmp(&measurement.taken_at))
                    .is_ok()
            })
            .unwrap_or(false);

        if exists {
            return Err(Error::DuplicateMeasurement {
                patient_id: measurement.patient_id.clone(),
                metric: measurement.metric,
                taken_at: measurement.taken_at,
            });
        }
        Ok(())
    }

    /// Insert keeping `taken_at` order; equal timestamps keep insertion order
    pub(crate) fn insert(&mut self, measurement: Measurement) {
        let records = self
            .series
            .entry((measurement.patient_id.clone(), measurement.metric))
            .or_default();
        let idx = records.partition_point(|m| m.taken_at <= measurement.taken_at);
        records.insert(idx, measurement);
    }
}

impl MeasurementStore for MeasurementLog {
    fn append(&mut self, measurement: Measurement, now: DateTime<Utc>) -> Result<()> {
        self.check_append(&measurement, now)?;
        tracing::debug!(
            "Appended {} = {} {} for {} at {}",
            measurement.metric,
            measurement.value,
            measurement.unit,
            measurement.patient_id,
            measurement.taken_at
        );
        self.insert(measurement);
        Ok(())
    }

    fn query(
        &self,
        patient_id: &PatientId,
        metric: Metric,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<Measurement> {
        self.series
            .get(&(patient_id.clone(), metric))
            .map(|records| {
                records
                    .iter()
                    .filter(|m| from.map_or(true, |f| m.taken_at >= f))
                    .filter(|m| to.map_or(true, |t| m.taken_at <= t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Time-independent checks on a single record
fn validate_record(measurement: &Measurement) -> Result<()> {
    if measurement.patient_id.as_str().trim().is_empty() {
        return Err(Error::InvalidMeasurement("patient id is empty".into()));
    }

    let profile = ranges::profile(measurement.metric);

    if !measurement.value.is_finite() {
        return Err(Error::InvalidMeasurement(format!(
            "{} value {} is not a finite number",
            measurement.metric, measurement.value
        )));
    }

    if !profile.is_plausible(measurement.value) {
        return Err(Error::InvalidMeasurement(format!(
            "{} value {} is outside the plausible range [{}, {}] {}",
            measurement.metric,
            measurement.value,
            profile.plausible.0,
            profile.plausible.1,
            profile.unit
        )));
    }

    if !profile.unit_matches(&measurement.unit) {
        return Err(Error::InvalidMeasurement(format!(
            "{} unit '{}' does not match expected '{}'",
            measurement.metric, measurement.unit, profile.unit
        )));
    }

    Ok(())
}
