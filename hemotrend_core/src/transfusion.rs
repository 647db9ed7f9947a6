//! Transfusion need prediction from the hemoglobin forecast.

use crate::config::TransfusionConfig;
use crate::forecast;
use crate::risk::MetricOutlook;
use crate::{PredictionStatus, TransfusionPrediction};
use chrono::{DateTime, Utc};

/// Predict when hemoglobin first drops below `threshold`
///
/// The earliest forecast point under the threshold gives the date. A value
/// already under the threshold at `as_of` is reported as `BelowThreshold`
/// rather than as a crossing in the past.
pub fn predict_transfusion(
    hemoglobin: Option<&MetricOutlook>,
    as_of: DateTime<Utc>,
    threshold: f64,
    config: &TransfusionConfig,
    low_confidence_dampening: f64,
) -> TransfusionPrediction {
    let Some(outlook) = hemoglobin else {
        return TransfusionPrediction {
            status: PredictionStatus::InsufficientData,
            predicted_date: None,
            days_until: None,
            confidence: 0,
            threshold,
            basis: None,
        };
    };
    let trend = &outlook.trend;

    let current = forecast::forecast_at(trend, as_of);
    let crossing = outlook
        .forecast
        .iter()
        .find(|p| p.predicted_value < threshold);

    let (status, predicted_date, width) = if current.predicted_value < threshold {
        (
            PredictionStatus::BelowThreshold,
            Some(as_of),
            current.interval_width(),
        )
    } else if let Some(point) = crossing {
        (
            PredictionStatus::Predicted,
            Some(point.target_time),
            point.interval_width(),
        )
    } else {
        let width = outlook
            .forecast
            .last()
            .map(|p| p.interval_width())
            .unwrap_or_else(|| current.interval_width());
        (PredictionStatus::NoImminentNeed, None, width)
    };

    let mut confidence = width_confidence(width, config.confidence_width_scale);
    if trend.low_confidence {
        confidence *= low_confidence_dampening;
    }

    let prediction = TransfusionPrediction {
        status,
        predicted_date,
        days_until: predicted_date.map(|d| (d - as_of).num_days()),
        confidence: confidence.round().clamp(0.0, 100.0) as u8,
        threshold,
        basis: Some(trend.clone()),
    };

    tracing::debug!(
        "Transfusion prediction: {:?} (threshold {} g/dL, confidence {})",
        prediction.status,
        threshold,
        prediction.confidence
    );
    prediction
}

/// 100 for a zero-width interval, halving when the width equals `scale`
fn width_confidence(width: f64, scale: f64) -> f64 {
    if scale <= 0.0 {
        return 0.0;
    }
    100.0 / (1.0 + width.max(0.0) / scale)
}
