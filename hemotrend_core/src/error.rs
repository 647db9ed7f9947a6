//! Error types for the hemotrend_core library.

use crate::{Metric, PatientId};
use chrono::{DateTime, Utc};
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for hemotrend_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Patient profile state error
    #[error("State error: {0}")]
    State(String),

    /// Malformed or physiologically impossible input, rejected at ingestion
    #[error("Invalid measurement: {0}")]
    InvalidMeasurement(String),

    /// A record with the same (patient, metric, taken_at) already exists
    #[error("Duplicate measurement: {metric} for patient {patient_id} at {taken_at}")]
    DuplicateMeasurement {
        patient_id: PatientId,
        metric: Metric,
        taken_at: DateTime<Utc>,
    },

    /// Fewer than two usable samples for a trend
    #[error("Insufficient data: {metric} has {samples} usable sample(s), need at least 2")]
    InsufficientData { metric: Metric, samples: usize },

    /// A forecast horizon longer than the configured maximum
    #[error("Horizon too long: {horizon_days} days requested, at most {max_days} allowed")]
    HorizonTooLong { horizon_days: u32, max_days: u32 },

    /// Generic error
    #[error("{0}")]
    Other(String),
}
