//! Core domain types for the Hemotrend engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Patients, metrics and recorded measurements
//! - Derived trend and forecast models
//! - Risk assessments, transfusion predictions and recommendations
//! - The dashboard summary handed to presentation collaborators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Signed number of (fractional) days from `from` to `to`.
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / MILLIS_PER_DAY
}

// ============================================================================
// Patients and Metrics
// ============================================================================

/// Opaque patient identifier
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct PatientId(pub String);

impl PatientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PatientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Type of lab or clinical observation
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Hemoglobin,
    Ferritin,
    Alt,
    Ast,
    Alp,
    HeartRate,
    Spo2,
    /// Units of blood transfused at `taken_at`
    Transfusion,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::Hemoglobin,
        Metric::Ferritin,
        Metric::Alt,
        Metric::Ast,
        Metric::Alp,
        Metric::HeartRate,
        Metric::Spo2,
        Metric::Transfusion,
    ];

    /// Liver enzymes used for the iron-overload elevation flag
    pub const LIVER_ENZYMES: [Metric; 3] = [Metric::Alt, Metric::Ast, Metric::Alp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Hemoglobin => "hemoglobin",
            Metric::Ferritin => "ferritin",
            Metric::Alt => "alt",
            Metric::Ast => "ast",
            Metric::Alp => "alp",
            Metric::HeartRate => "heart_rate",
            Metric::Spo2 => "spo2",
            Metric::Transfusion => "transfusion",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "hemoglobin" | "hb" => Ok(Metric::Hemoglobin),
            "ferritin" => Ok(Metric::Ferritin),
            "alt" => Ok(Metric::Alt),
            "ast" => Ok(Metric::Ast),
            "alp" => Ok(Metric::Alp),
            "heart_rate" | "hr" => Ok(Metric::HeartRate),
            "spo2" => Ok(Metric::Spo2),
            "transfusion" => Ok(Metric::Transfusion),
            other => Err(crate::Error::Other(format!("Unknown metric: {}", other))),
        }
    }
}

/// Where a measurement came from
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    #[default]
    Lab,
    SelfReport,
}

impl FromStr for Source {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "lab" => Ok(Source::Lab),
            "self_report" | "self" => Ok(Source::SelfReport),
            other => Err(crate::Error::Other(format!("Unknown source: {}", other))),
        }
    }
}

/// Classification of a value against a metric's clinical normal range
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RangeClass {
    Below,
    Within,
    Above,
}

// ============================================================================
// Measurements
// ============================================================================

/// A recorded observation. Immutable once appended.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    pub id: Uuid,
    pub patient_id: PatientId,
    pub metric: Metric,
    pub value: f64,
    pub unit: String,
    pub taken_at: DateTime<Utc>,
    pub source: Source,
    pub recorded_at: DateTime<Utc>,
}

/// Caller-supplied fields for a new measurement
#[derive(Clone, Debug)]
pub struct MeasurementInput {
    pub patient_id: PatientId,
    pub metric: Metric,
    pub value: f64,
    /// `None` takes the metric's canonical unit
    pub unit: Option<String>,
    pub taken_at: DateTime<Utc>,
    pub source: Source,
}

impl MeasurementInput {
    /// Stamp the input with a record id and the ingestion time
    pub fn into_measurement(self, now: DateTime<Utc>) -> Measurement {
        let unit = self
            .unit
            .unwrap_or_else(|| crate::ranges::profile(self.metric).unit.to_string());
        Measurement {
            id: Uuid::new_v4(),
            patient_id: self.patient_id,
            metric: self.metric,
            value: self.value,
            unit,
            taken_at: self.taken_at,
            source: self.source,
            recorded_at: now,
        }
    }
}

// ============================================================================
// Derived Models
// ============================================================================

/// Least-squares trend fitted over one metric's history
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrendModel {
    pub metric: Metric,
    /// Timestamp of the most recent sample used in the fit
    pub as_of: DateTime<Utc>,
    pub slope_per_day: f64,
    pub level_at_as_of: f64,
    pub sample_count: usize,
    pub span_days: f64,
    /// Undefined for exactly two samples
    pub residual_std_dev: Option<f64>,
    pub low_confidence: bool,
}

impl TrendModel {
    /// Evaluate the fitted line at an arbitrary time
    pub fn value_at(&self, at: DateTime<Utc>) -> f64 {
        self.level_at_as_of + self.slope_per_day * days_between(self.as_of, at)
    }
}

/// A single extrapolated value with its confidence interval
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ForecastPoint {
    pub metric: Metric,
    pub target_time: DateTime<Utc>,
    pub days_ahead: f64,
    pub predicted_value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// Outside the metric's plausible physiological range
    pub implausible: bool,
}

impl ForecastPoint {
    pub fn interval_width(&self) -> f64 {
        self.upper_bound - self.lower_bound
    }
}

// ============================================================================
// Risk Assessment
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskDomain {
    Anemia,
    IronOverload,
    Cardiac,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Fixed score thresholds: <30 Low, 30-59 Medium, 60-79 High, >=80 Critical
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=29 => RiskLevel::Low,
            30..=59 => RiskLevel::Medium,
            60..=79 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }
}

/// How much of a domain's input data was available
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Sufficiency {
    Complete,
    Partial,
    Insufficient,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub domain: RiskDomain,
    pub score: u8,
    pub level: RiskLevel,
    /// Factors whose share of the score passes the reporting threshold
    pub contributing_factors: Vec<String>,
    /// Normalized value in [0, 1] of every factor with data, reported or not
    pub factor_values: BTreeMap<String, f64>,
    pub timeframe: String,
    pub sufficiency: Sufficiency,
    pub missing_inputs: Vec<String>,
}

impl RiskAssessment {
    pub fn has_data(&self) -> bool {
        self.sufficiency != Sufficiency::Insufficient
    }

    pub fn factor_value(&self, label: &str) -> Option<f64> {
        self.factor_values.get(label).copied()
    }
}

// ============================================================================
// Transfusion Prediction
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    /// Forecast crosses the threshold from above within the horizon
    Predicted,
    /// Hemoglobin is already below the threshold at the as-of time
    BelowThreshold,
    NoImminentNeed,
    InsufficientData,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransfusionPrediction {
    pub status: PredictionStatus,
    pub predicted_date: Option<DateTime<Utc>>,
    pub days_until: Option<i64>,
    pub confidence: u8,
    pub threshold: f64,
    pub basis: Option<TrendModel>,
}

// ============================================================================
// Recommendations
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub title: String,
    pub priority: Priority,
    pub description: String,
    pub suggested_action: String,
    pub confidence: u8,
    /// Name of the rule that produced this entry
    pub rule: String,
}

// ============================================================================
// Dashboard
// ============================================================================

/// Latest value of a metric with its normal-range classification
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CurrentValue {
    pub measurement: Measurement,
    pub range: Option<RangeClass>,
}

/// Trend slot on the dashboard: either a fitted model or an explicit gap
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrendView {
    Available(TrendModel),
    InsufficientData { sample_count: usize },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DashboardSummary {
    pub patient_id: PatientId,
    pub as_of: DateTime<Utc>,
    pub current_values: BTreeMap<Metric, CurrentValue>,
    pub trends: BTreeMap<Metric, TrendView>,
    pub risk_assessments: Vec<RiskAssessment>,
    pub transfusion_prediction: TransfusionPrediction,
}
