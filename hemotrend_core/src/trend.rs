//! Linear trend fitting over a single metric's history.
//!
//! Ordinary least squares of value against time in days, every sample
//! weighted equally. The model is recomputed on every request and never
//! stored.

use crate::{days_between, Error, Measurement, Metric, Result, TrendModel};

/// Fit a trend to the samples of one `(patient, metric)` series
///
/// Samples may arrive in any order; they are sorted by `taken_at` before
/// fitting so the result depends only on the timestamps and values.
/// Fewer than two samples (or no spread in time) is `InsufficientData`.
pub fn fit_trend(metric: Metric, samples: &[Measurement], min_span_days: f64) -> Result<TrendModel> {
    if samples.len() < 2 {
        return Err(Error::InsufficientData {
            metric,
            samples: samples.len(),
        });
    }

    let mut ordered: Vec<&Measurement> = samples.iter().collect();
    ordered.sort_by(|a, b| {
        a.taken_at
            .cmp(&b.taken_at)
            .then_with(|| a.value.total_cmp(&b.value))
    });

    let first = ordered[0].taken_at;
    let last = ordered[ordered.len() - 1].taken_at;

    let xs: Vec<f64> = ordered.iter().map(|m| days_between(first, m.taken_at)).collect();
    let ys: Vec<f64> = ordered.iter().map(|m| m.value).collect();
    let n = xs.len() as f64;

    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let (sxx, sxy) = xs
        .iter()
        .zip(&ys)
        .fold((0.0, 0.0), |(sxx, sxy), (x, y)| {
            let dx = x - mean_x;
            (sxx + dx * dx, sxy + dx * (y - mean_y))
        });

    if sxx <= 0.0 {
        // All samples at the same instant: no slope can be fitted
        return Err(Error::InsufficientData {
            metric,
            samples: 1,
        });
    }

    let slope = sxy / sxx;
    let fitted = |x: f64| mean_y + slope * (x - mean_x);

    let span_days = days_between(first, last);
    let level_at_as_of = fitted(span_days);

    let residual_std_dev = if ordered.len() > 2 {
        let ssr: f64 = xs
            .iter()
            .zip(&ys)
            .map(|(x, y)| (y - fitted(*x)).powi(2))
            .sum();
        Some((ssr / (n - 2.0)).sqrt())
    } else {
        None
    };

    let low_confidence = span_days < min_span_days;
    if low_confidence {
        tracing::debug!(
            "{} trend spans {:.1} days (< {}), flagged low-confidence",
            metric,
            span_days,
            min_span_days
        );
    }

    Ok(TrendModel {
        metric,
        as_of: last,
        slope_per_day: slope,
        level_at_as_of,
        sample_count: ordered.len(),
        span_days,
        residual_std_dev,
        low_confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MeasurementInput, Source};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, 0, 0, 0).unwrap()
    }

    fn sample(taken_at: DateTime<Utc>, value: f64) -> Measurement {
        MeasurementInput {
            patient_id: "p1".into(),
            metric: Metric::Hemoglobin,
            value,
            unit: None,
            taken_at,
            source: Source::Lab,
        }
        .into_measurement(taken_at)
    }

    fn dashboard_history() -> Vec<Measurement> {
        vec![
            sample(at(1, 15), 8.2),
            sample(at(2, 12), 7.9),
            sample(at(3, 10), 8.5),
            sample(at(4, 8), 8.1),
            sample(at(5, 6), 7.8),
            sample(at(6, 3), 8.3),
        ]
    }

    #[test]
    fn test_exact_line_is_recovered() {
        let start = at(1, 1);
        let samples: Vec<_> = (0..5)
            .map(|i| sample(start + Duration::days(i * 10), 10.0 - 0.05 * (i * 10) as f64))
            .collect();

        let trend = fit_trend(Metric::Hemoglobin, &samples, 7.0).unwrap();
        assert!((trend.slope_per_day + 0.05).abs() < 1e-9);
        assert!((trend.level_at_as_of - 8.0).abs() < 1e-9);
        assert_eq!(trend.as_of, start + Duration::days(40));
        assert_eq!(trend.sample_count, 5);
        assert!((trend.span_days - 40.0).abs() < 1e-9);
        assert!(trend.residual_std_dev.unwrap() < 1e-9);
        assert!(!trend.low_confidence);
    }

    #[test]
    fn test_dashboard_history_is_nearly_flat() {
        let trend = fit_trend(Metric::Hemoglobin, &dashboard_history(), 7.0).unwrap();
        assert!(trend.slope_per_day.abs() < 0.005);
        assert!(trend.level_at_as_of > 7.9 && trend.level_at_as_of < 8.4);
        assert_eq!(trend.as_of, at(6, 3));
        assert!(trend.residual_std_dev.is_some());
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let forward = dashboard_history();
        let mut shuffled = forward.clone();
        shuffled.reverse();
        shuffled.swap(1, 4);

        let a = fit_trend(Metric::Hemoglobin, &forward, 7.0).unwrap();
        let b = fit_trend(Metric::Hemoglobin, &shuffled, 7.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_sample_is_insufficient() {
        let samples = vec![sample(at(2, 1), 8.0)];
        let result = fit_trend(Metric::Ferritin, &samples, 7.0);
        assert!(matches!(
            result,
            Err(Error::InsufficientData {
                metric: Metric::Ferritin,
                samples: 1
            })
        ));
        assert!(fit_trend(Metric::Ferritin, &[], 7.0).is_err());
    }

    #[test]
    fn test_two_samples_have_no_residual() {
        let samples = vec![sample(at(2, 1), 8.0), sample(at(3, 1), 7.0)];
        let trend = fit_trend(Metric::Hemoglobin, &samples, 7.0).unwrap();
        assert_eq!(trend.residual_std_dev, None);
        assert!((trend.level_at_as_of - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_span_flagged_low_confidence() {
        let samples = vec![sample(at(2, 1), 8.0), sample(at(2, 4), 7.8)];
        let trend = fit_trend(Metric::Hemoglobin, &samples, 7.0).unwrap();
        assert!(trend.low_confidence);
        assert!(trend.slope_per_day < 0.0);
    }

    #[test]
    fn test_value_at_extrapolates_along_slope() {
        let samples = vec![sample(at(2, 1), 9.0), sample(at(2, 11), 8.0)];
        let trend = fit_trend(Metric::Hemoglobin, &samples, 7.0).unwrap();
        let later = trend.value_at(at(2, 21));
        assert!((later - 7.0).abs() < 1e-9);
    }
}
