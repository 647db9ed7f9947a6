#![forbid(unsafe_code)]

//! Core domain model and analysis pipeline for Hemotrend.
//!
//! This crate provides:
//! - Domain types (measurements, trends, forecasts, risk, recommendations)
//! - Reference ranges per metric
//! - Append-only measurement store
//! - Trend fitting, forecasting, risk scoring and transfusion prediction
//! - Rule-based recommendations
//! - Persistence (WAL, CSV archive, patient profiles)

pub mod types;
pub mod error;
pub mod ranges;
pub mod config;
pub mod logging;
pub mod store;
pub mod wal;
pub mod csv_rollup;
pub mod history;
pub mod profiles;
pub mod snapshot;
pub mod trend;
pub mod forecast;
pub mod risk;
pub mod transfusion;
pub mod recommend;
pub mod pipeline;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use store::{MeasurementLog, MeasurementStore};
pub use wal::{JsonlSink, MeasurementSink, WalStore};
pub use history::load_measurement_log;
pub use profiles::{PatientProfile, PatientProfiles};
pub use pipeline::{record_measurement, Pipeline};
