//! Static reference table of per-metric ranges.
//!
//! Each metric has a canonical unit, an optional clinical normal range, a
//! wider plausible physiological range (used to reject input and to flag
//! forecasts) and a default forecast error for two-point trends.

use crate::types::{Metric, RangeClass};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Reference data for one metric
#[derive(Clone, Debug, PartialEq)]
pub struct MetricProfile {
    pub metric: Metric,
    pub unit: &'static str,
    /// Clinical normal range (low, high), inclusive
    pub normal: Option<(f64, f64)>,
    /// Physiologically plausible range (min, max), inclusive
    pub plausible: (f64, f64),
    /// Forecast base error used when residuals are undefined
    pub default_base_error: f64,
}

impl MetricProfile {
    pub fn is_plausible(&self, value: f64) -> bool {
        value.is_finite() && value >= self.plausible.0 && value <= self.plausible.1
    }

    pub fn clamp_plausible(&self, value: f64) -> f64 {
        value.clamp(self.plausible.0, self.plausible.1)
    }

    pub fn classify(&self, value: f64) -> Option<RangeClass> {
        let (low, high) = self.normal?;
        Some(if value < low {
            RangeClass::Below
        } else if value > high {
            RangeClass::Above
        } else {
            RangeClass::Within
        })
    }

    pub fn unit_matches(&self, unit: &str) -> bool {
        unit.trim().eq_ignore_ascii_case(self.unit)
    }
}

static REFERENCE_TABLE: Lazy<BTreeMap<Metric, MetricProfile>> = Lazy::new(build_reference_table);

/// Look up the reference profile for a metric
pub fn profile(metric: Metric) -> &'static MetricProfile {
    // Every Metric variant is inserted by build_reference_table
    &REFERENCE_TABLE[&metric]
}

/// Classify a value against the metric's normal range
pub fn classify(metric: Metric, value: f64) -> Option<RangeClass> {
    profile(metric).classify(value)
}

fn build_reference_table() -> BTreeMap<Metric, MetricProfile> {
    let entries = [
        MetricProfile {
            metric: Metric::Hemoglobin,
            unit: "g/dL",
            normal: Some((12.0, 16.0)),
            plausible: (1.0, 25.0),
            default_base_error: 0.5,
        },
        MetricProfile {
            metric: Metric::Ferritin,
            unit: "ng/mL",
            normal: Some((20.0, 300.0)),
            plausible: (0.0, 50_000.0),
            default_base_error: 200.0,
        },
        MetricProfile {
            metric: Metric::Alt,
            unit: "U/L",
            normal: Some((7.0, 56.0)),
            plausible: (0.0, 10_000.0),
            default_base_error: 10.0,
        },
        MetricProfile {
            metric: Metric::Ast,
            unit: "U/L",
            normal: Some((10.0, 40.0)),
            plausible: (0.0, 10_000.0),
            default_base_error: 10.0,
        },
        MetricProfile {
            metric: Metric::Alp,
            unit: "U/L",
            normal: Some((44.0, 147.0)),
            plausible: (0.0, 5_000.0),
            default_base_error: 15.0,
        },
        MetricProfile {
            metric: Metric::HeartRate,
            unit: "bpm",
            normal: Some((60.0, 100.0)),
            plausible: (20.0, 300.0),
            default_base_error: 8.0,
        },
        MetricProfile {
            metric: Metric::Spo2,
            unit: "%",
            normal: Some((95.0, 100.0)),
            plausible: (50.0, 100.0),
            default_base_error: 1.5,
        },
        MetricProfile {
            metric: Metric::Transfusion,
            unit: "units",
            normal: None,
            plausible: (0.5, 10.0),
            default_base_error: 1.0,
        },
    ];

    entries.into_iter().map(|p| (p.metric, p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_metric_has_profile() {
        for metric in Metric::ALL {
            let p = profile(metric);
            assert_eq!(p.metric, metric);
            assert!(p.plausible.0 < p.plausible.1);
            assert!(p.default_base_error > 0.0);
            if let Some((low, high)) = p.normal {
                assert!(low < high, "{} normal range inverted", metric);
                assert!(p.is_plausible(low) && p.is_plausible(high));
            }
        }
    }

    #[test]
    fn test_classify_hemoglobin() {
        assert_eq!(classify(Metric::Hemoglobin, 8.3), Some(RangeClass::Below));
        assert_eq!(classify(Metric::Hemoglobin, 13.0), Some(RangeClass::Within));
        assert_eq!(classify(Metric::Hemoglobin, 17.2), Some(RangeClass::Above));
    }

    #[test]
    fn test_transfusion_has_no_normal_range() {
        assert_eq!(classify(Metric::Transfusion, 2.0), None);
    }

    #[test]
    fn test_negative_values_never_plausible() {
        for metric in Metric::ALL {
            assert!(!profile(metric).is_plausible(-5.0));
        }
        assert!(!profile(Metric::Hemoglobin).is_plausible(f64::NAN));
    }

    #[test]
    fn test_unit_matching_is_case_insensitive() {
        assert!(profile(Metric::Hemoglobin).unit_matches("g/dl"));
        assert!(profile(Metric::Ferritin).unit_matches(" NG/ML "));
        assert!(!profile(Metric::Ferritin).unit_matches("ug/L"));
    }
}
