//! Request-level entry points over a measurement store.
//!
//! Every call captures a snapshot of one patient's history at an explicit
//! `as_of` time and runs the stages in order: trend, forecast, risk,
//! transfusion prediction, recommendations. Nothing derived is cached.

use crate::profiles::PatientProfiles;
use crate::risk::{MetricOutlook, RiskScorer};
use crate::snapshot::PatientSnapshot;
use crate::store::MeasurementStore;
use crate::{
    forecast, ranges, recommend, transfusion, trend, Config, CurrentValue, DashboardSummary,
    Error, ForecastPoint, Measurement, MeasurementInput, Metric, PatientId, Recommendation,
    Result, RiskAssessment, TransfusionPrediction, TrendModel, TrendView,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Validate and append a new measurement, returning the stored record
pub fn record_measurement<S: MeasurementStore + ?Sized>(
    store: &mut S,
    input: MeasurementInput,
    now: DateTime<Utc>,
) -> Result<Measurement> {
    let measurement = input.into_measurement(now);
    store.append(measurement.clone(), now)?;
    tracing::info!(
        "Recorded {} = {} {} for {} at {}",
        measurement.metric,
        measurement.value,
        measurement.unit,
        measurement.patient_id,
        measurement.taken_at
    );
    Ok(measurement)
}

/// Read-only analysis pipeline bound to a configuration and patient profiles
pub struct Pipeline<'a> {
    config: &'a Config,
    profiles: &'a PatientProfiles,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, profiles: &'a PatientProfiles) -> Self {
        Self { config, profiles }
    }

    /// Transfusion threshold in effect for a patient
    pub fn threshold(&self, patient_id: &PatientId) -> f64 {
        self.profiles
            .transfusion_threshold(patient_id, self.config.transfusion.default_threshold_g_dl)
    }

    fn fit(&self, snapshot: &PatientSnapshot, metric: Metric) -> Result<TrendModel> {
        trend::fit_trend(
            metric,
            snapshot.history(metric),
            self.config.trend.min_span_days,
        )
    }

    fn outlook(
        &self,
        snapshot: &PatientSnapshot,
        metric: Metric,
        horizon_days: u32,
    ) -> Result<MetricOutlook> {
        let trend = self.fit(snapshot, metric)?;
        let targets =
            forecast::horizon(snapshot.as_of, horizon_days, self.config.forecast.step_days)?;
        let points = forecast::forecast(&trend, &targets);
        Ok(MetricOutlook {
            trend,
            forecast: points,
        })
    }

    /// An outlook over the configured horizon, or `None` if no trend can be fitted
    fn default_outlook(&self, snapshot: &PatientSnapshot, metric: Metric) -> Option<MetricOutlook> {
        match self.outlook(snapshot, metric, self.config.forecast.horizon_days) {
            Ok(outlook) => Some(outlook),
            Err(e) => {
                tracing::debug!("No {} outlook: {}", metric, e);
                None
            }
        }
    }

    /// Forecast one metric at `step_days` intervals up to `horizon_days`
    ///
    /// Fails with `InsufficientData` when fewer than two samples exist, and
    /// with `HorizonTooLong` past the configured `max_horizon_days`.
    pub fn forecast<S: MeasurementStore + ?Sized>(
        &self,
        store: &S,
        patient_id: &PatientId,
        metric: Metric,
        as_of: DateTime<Utc>,
        horizon_days: u32,
    ) -> Result<Vec<ForecastPoint>> {
        if metric == Metric::Transfusion {
            return Err(Error::Other(
                "transfusion records are events and cannot be forecast".into(),
            ));
        }
        let max_days = self.config.forecast.max_horizon_days;
        if horizon_days > max_days {
            return Err(Error::HorizonTooLong {
                horizon_days,
                max_days,
            });
        }
        let snapshot = PatientSnapshot::capture(store, patient_id, as_of);
        Ok(self.outlook(&snapshot, metric, horizon_days)?.forecast)
    }

    fn assess(
        &self,
        snapshot: &PatientSnapshot,
    ) -> (Vec<RiskAssessment>, TransfusionPrediction) {
        let threshold = self.threshold(&snapshot.patient_id);
        let hemoglobin = self.default_outlook(snapshot, Metric::Hemoglobin);
        let ferritin = self.default_outlook(snapshot, Metric::Ferritin);

        let assessments = RiskScorer::new(self.config, threshold).assess_all(
            snapshot,
            hemoglobin.as_ref(),
            ferritin.as_ref(),
        );
        let prediction = transfusion::predict_transfusion(
            hemoglobin.as_ref(),
            snapshot.as_of,
            threshold,
            &self.config.transfusion,
            self.config.trend.low_confidence_dampening,
        );
        (assessments, prediction)
    }

    /// Current values, trends, risk and transfusion outlook for one patient
    pub fn dashboard_summary<S: MeasurementStore + ?Sized>(
        &self,
        store: &S,
        patient_id: &PatientId,
        as_of: DateTime<Utc>,
    ) -> DashboardSummary {
        let snapshot = PatientSnapshot::capture(store, patient_id, as_of);

        let current_values: BTreeMap<Metric, CurrentValue> = snapshot
            .metrics()
            .filter_map(|metric| snapshot.latest(metric))
            .map(|m| {
                (
                    m.metric,
                    CurrentValue {
                        measurement: m.clone(),
                        range: ranges::classify(m.metric, m.value),
                    },
                )
            })
            .collect();

        let trends: BTreeMap<Metric, TrendView> = snapshot
            .metrics()
            .filter(|metric| *metric != Metric::Transfusion)
            .map(|metric| {
                let view = match self.fit(&snapshot, metric) {
                    Ok(model) => TrendView::Available(model),
                    Err(_) => TrendView::InsufficientData {
                        sample_count: snapshot.history(metric).len(),
                    },
                };
                (metric, view)
            })
            .collect();

        let (risk_assessments, transfusion_prediction) = self.assess(&snapshot);

        tracing::info!(
            "Dashboard for {} as of {}: {} metrics, {} trends",
            patient_id,
            as_of,
            current_values.len(),
            trends
                .values()
                .filter(|t| matches!(t, TrendView::Available(_)))
                .count()
        );

        DashboardSummary {
            patient_id: patient_id.clone(),
            as_of,
            current_values,
            trends,
            risk_assessments,
            transfusion_prediction,
        }
    }

    /// Ranked recommendations for one patient
    pub fn recommendations<S: MeasurementStore + ?Sized>(
        &self,
        store: &S,
        patient_id: &PatientId,
        as_of: DateTime<Utc>,
    ) -> Vec<Recommendation> {
        let snapshot = PatientSnapshot::capture(store, patient_id, as_of);
        let (assessments, prediction) = self.assess(&snapshot);
        let recs = recommend::recommend(&assessments, &prediction);
        tracing::info!("{} recommendations for {}", recs.len(), patient_id);
        recs
    }
}
