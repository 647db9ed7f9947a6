//! Forward extrapolation of a fitted trend.
//!
//! `predicted = level + slope * days_ahead`, with a confidence half-width of
//! `base_error * sqrt(days_ahead / span_days)`. Values are never clamped;
//! out-of-range predictions are flagged `implausible` instead.

use crate::{days_between, ranges, Error, ForecastPoint, Result, TrendModel};
use chrono::{DateTime, Duration, Utc};

/// Hard ceiling on any forecast horizon (one hundred years)
pub const MAX_HORIZON_DAYS: u32 = 36_500;

/// Target timestamps every `step_days` after `as_of`, up to `horizon_days`
///
/// The horizon end is always included, even when it is not a whole number
/// of steps. Horizons beyond [`MAX_HORIZON_DAYS`], or ending past the last
/// representable date, fail with `HorizonTooLong`.
pub fn horizon(
    as_of: DateTime<Utc>,
    horizon_days: u32,
    step_days: u32,
) -> Result<Vec<DateTime<Utc>>> {
    if horizon_days == 0 || step_days == 0 {
        return Ok(Vec::new());
    }

    let too_long = || Error::HorizonTooLong {
        horizon_days,
        max_days: MAX_HORIZON_DAYS,
    };
    if horizon_days > MAX_HORIZON_DAYS {
        return Err(too_long());
    }
    let offset = |days: u32| {
        as_of
            .checked_add_signed(Duration::days(i64::from(days)))
            .ok_or_else(too_long)
    };

    // k * step_days <= horizon_days, so the product cannot overflow
    let mut targets = (1..=horizon_days / step_days)
        .map(|k| offset(k * step_days))
        .collect::<Result<Vec<_>>>()?;

    if horizon_days % step_days != 0 {
        targets.push(offset(horizon_days)?);
    }
    Ok(targets)
}

/// Residual standard deviation, or the metric default for two-point trends
pub fn base_error(trend: &TrendModel) -> f64 {
    trend
        .residual_std_dev
        .unwrap_or_else(|| ranges::profile(trend.metric).default_base_error)
}

/// Forecast a single target time
pub fn forecast_at(trend: &TrendModel, target: DateTime<Utc>) -> ForecastPoint {
    let days_ahead = days_between(trend.as_of, target).max(0.0);
    let predicted = trend.level_at_as_of + trend.slope_per_day * days_ahead;

    // span_days > 0 for any fitted trend
    let half_width = base_error(trend) * (days_ahead / trend.span_days).sqrt();

    let profile = ranges::profile(trend.metric);

    ForecastPoint {
        metric: trend.metric,
        target_time: target,
        days_ahead,
        predicted_value: predicted,
        lower_bound: predicted - half_width,
        upper_bound: predicted + half_width,
        implausible: !profile.is_plausible(predicted),
    }
}

/// Forecast every target, in the order given
pub fn forecast(trend: &TrendModel, targets: &[DateTime<Utc>]) -> Vec<ForecastPoint> {
    let points: Vec<_> = targets.iter().map(|t| forecast_at(trend, *t)).collect();

    let implausible = points.iter().filter(|p| p.implausible).count();
    if implausible > 0 {
        tracing::debug!(
            "{} of {} {} forecast points fall outside the plausible range",
            implausible,
            points.len(),
            trend.metric
        );
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Metric;
    use chrono::TimeZone;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap()
    }

    fn trend(slope: f64, residual: Option<f64>) -> TrendModel {
        TrendModel {
            metric: Metric::Hemoglobin,
            as_of: as_of(),
            slope_per_day: slope,
            level_at_as_of: 8.3,
            sample_count: if residual.is_some() { 6 } else { 2 },
            span_days: 139.0,
            residual_std_dev: residual,
            low_confidence: false,
        }
    }

    #[test]
    fn test_default_horizon_is_six_weekly_points() {
        let targets = horizon(as_of(), 42, 7).unwrap();
        assert_eq!(targets.len(), 6);
        assert_eq!(targets[0], as_of() + Duration::days(7));
        assert_eq!(targets[5], as_of() + Duration::days(42));
    }

    #[test]
    fn test_horizon_includes_unaligned_end() {
        let targets = horizon(as_of(), 10, 7).unwrap();
        assert_eq!(
            targets,
            vec![as_of() + Duration::days(7), as_of() + Duration::days(10)]
        );
        assert!(horizon(as_of(), 0, 7).unwrap().is_empty());
    }

    #[test]
    fn test_oversized_horizon_is_an_error() {
        let result = horizon(as_of(), 200_000_000, 7);
        assert!(matches!(
            result,
            Err(Error::HorizonTooLong {
                horizon_days: 200_000_000,
                ..
            })
        ));
        assert!(horizon(as_of(), u32::MAX, 1).is_err());
        assert_eq!(horizon(as_of(), MAX_HORIZON_DAYS, 7).unwrap().len(), 5215);
    }

    #[test]
    fn test_horizon_past_last_date_is_an_error() {
        let near_end = DateTime::<Utc>::MAX_UTC - Duration::days(3);
        assert!(matches!(
            horizon(near_end, 14, 7),
            Err(Error::HorizonTooLong { .. })
        ));
    }

    #[test]
    fn test_prediction_follows_slope() {
        let t = trend(-0.02, Some(0.3));
        let point = forecast_at(&t, as_of() + Duration::days(14));
        assert!((point.predicted_value - (8.3 - 0.28)).abs() < 1e-9);
        assert!((point.days_ahead - 14.0).abs() < 1e-9);
        assert!(!point.implausible);
    }

    #[test]
    fn test_bounds_contain_prediction_and_widen() {
        let t = trend(0.01, Some(0.3));
        let points = forecast(&t, &horizon(as_of(), 84, 7).unwrap());

        let mut last_width = 0.0;
        for p in &points {
            assert!(p.lower_bound <= p.predicted_value);
            assert!(p.predicted_value <= p.upper_bound);
            assert!(p.interval_width() >= last_width);
            last_width = p.interval_width();
        }
        // half-width = 0.3 * sqrt(days / 139)
        let last = points.last().unwrap();
        let expected = 0.3 * (84.0f64 / 139.0).sqrt();
        assert!((last.upper_bound - last.predicted_value - expected).abs() < 1e-9);
    }

    #[test]
    fn test_two_point_trend_uses_default_error() {
        let t = trend(0.0, None);
        let point = forecast_at(&t, as_of() + Duration::days(139));
        let expected = ranges::profile(Metric::Hemoglobin).default_base_error;
        assert!((point.upper_bound - point.predicted_value - expected).abs() < 1e-9);
    }

    #[test]
    fn test_implausible_values_are_flagged_not_clamped() {
        let t = trend(-0.5, Some(0.3));
        let point = forecast_at(&t, as_of() + Duration::days(42));
        assert!(point.predicted_value < 0.0);
        assert!(point.implausible);
    }
}
