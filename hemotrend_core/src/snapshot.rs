//! Immutable view of one patient's history as of a point in time.

use crate::store::MeasurementStore;
use crate::{Measurement, Metric, PatientId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Every measurement of one patient with `taken_at <= as_of`, per metric
#[derive(Clone, Debug)]
pub struct PatientSnapshot {
    pub patient_id: PatientId,
    pub as_of: DateTime<Utc>,
    histories: BTreeMap<Metric, Vec<Measurement>>,
}

impl PatientSnapshot {
    pub fn capture<S: MeasurementStore + ?Sized>(
        store: &S,
        patient_id: &PatientId,
        as_of: DateTime<Utc>,
    ) -> Self {
        let histories = Metric::ALL
            .iter()
            .map(|&metric| (metric, store.query(patient_id, metric, None, Some(as_of))))
            .filter(|(_, records)| !records.is_empty())
            .collect();

        Self {
            patient_id: patient_id.clone(),
            as_of,
            histories,
        }
    }

    /// Chronological history of one metric (empty if none recorded)
    pub fn history(&self, metric: Metric) -> &[Measurement] {
        self.histories.get(&metric).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn latest(&self, metric: Metric) -> Option<&Measurement> {
        self.history(metric).last()
    }

    /// Metrics with at least one measurement
    pub fn metrics(&self) -> impl Iterator<Item = Metric> + '_ {
        self.histories.keys().copied()
    }
}
