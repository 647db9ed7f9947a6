//! Multi-factor risk scoring per clinical domain.
//!
//! Each domain score is a weighted mean of sub-factors normalized to
//! `[0, 1]`, scaled to 0-100 and rounded before level mapping. Factors whose
//! inputs are missing contribute nothing and are listed in
//! `missing_inputs`; a domain with no inputs at all is `Insufficient`.

use crate::config::RiskConfig;
use crate::snapshot::PatientSnapshot;
use crate::{
    days_between, ranges, Config, ForecastPoint, Metric, RangeClass, RiskAssessment, RiskDomain,
    RiskLevel, Sufficiency, TrendModel,
};
use chrono::{DateTime, Duration, Utc};

pub const FACTOR_HB_DECLINE: &str = "Declining Hb trend";
pub const FACTOR_PROJECTED_HB: &str = "Projected Hb near threshold";
pub const FACTOR_DAYS_SINCE_TRANSFUSION: &str = "Time since last transfusion";
pub const FACTOR_INTERVAL_VARIABILITY: &str = "Historical pattern";
pub const FACTOR_FERRITIN_RISE: &str = "Rising ferritin levels";
pub const FACTOR_FERRITIN_LEVEL: &str = "Ferritin above normal range";
pub const FACTOR_LIVER_ENZYMES: &str = "Liver enzyme elevation";
pub const FACTOR_SUSTAINED_FERRITIN: &str = "Iron deposition risk";
pub const FACTOR_MONITORING_GAPS: &str = "Regular monitoring needed";

/// A fitted trend together with its forecast over the configured horizon
#[derive(Clone, Debug)]
pub struct MetricOutlook {
    pub trend: TrendModel,
    pub forecast: Vec<ForecastPoint>,
}

/// One named sub-factor. `value` is `None` when its inputs are missing.
#[derive(Clone, Debug)]
struct Factor {
    label: &'static str,
    weight: f64,
    value: Option<f64>,
}

/// Scores the anemia, iron-overload and cardiac domains for one patient
pub struct RiskScorer<'a> {
    config: &'a Config,
    threshold: f64,
}

impl<'a> RiskScorer<'a> {
    /// `threshold` is the patient's transfusion threshold in g/dL
    pub fn new(config: &'a Config, threshold: f64) -> Self {
        Self { config, threshold }
    }

    fn risk(&self) -> &RiskConfig {
        &self.config.risk
    }

    /// Assess every domain, ordered by score descending (ties in domain order)
    pub fn assess_all(
        &self,
        snapshot: &PatientSnapshot,
        hemoglobin: Option<&MetricOutlook>,
        ferritin: Option<&MetricOutlook>,
    ) -> Vec<RiskAssessment> {
        let mut assessments = vec![
            self.anemia(snapshot, hemoglobin),
            self.iron_overload(snapshot, ferritin),
            self.cardiac(snapshot),
        ];
        assessments.sort_by(|a, b| b.score.cmp(&a.score));

        for a in &assessments {
            tracing::debug!(
                "{:?} risk: score {} ({:?}, {:?})",
                a.domain,
                a.score,
                a.level,
                a.sufficiency
            );
        }
        assessments
    }

    pub fn anemia(
        &self,
        snapshot: &PatientSnapshot,
        hemoglobin: Option<&MetricOutlook>,
    ) -> RiskAssessment {
        let risk = self.risk();
        let w = &risk.weights.anemia;
        let transfusions: Vec<DateTime<Utc>> = snapshot
            .history(Metric::Transfusion)
            .iter()
            .map(|m| m.taken_at)
            .collect();

        let factors = [
            Factor {
                label: FACTOR_HB_DECLINE,
                weight: w.hb_decline,
                value: hemoglobin.map(|o| {
                    decline_factor(
                        &o.trend,
                        risk.hb_decline_saturation_per_day,
                        self.config.trend.low_confidence_dampening,
                    )
                }),
            },
            Factor {
                label: FACTOR_PROJECTED_HB,
                weight: w.projected_hb,
                value: hemoglobin
                    .and_then(|o| o.forecast.last())
                    .map(|p| projected_hb_factor(p, self.threshold, risk.projected_hb_margin)),
            },
            Factor {
                label: FACTOR_DAYS_SINCE_TRANSFUSION,
                weight: w.days_since_transfusion,
                value: days_since_transfusion_factor(
                    &transfusions,
                    snapshot.as_of,
                    risk.default_transfusion_interval_days,
                ),
            },
            Factor {
                label: FACTOR_INTERVAL_VARIABILITY,
                weight: w.interval_variability,
                value: interval_variability_factor(&transfusions, risk.interval_cv_saturation),
            },
        ];

        assess(RiskDomain::Anemia, &factors, risk.reporting_threshold)
    }

    pub fn iron_overload(
        &self,
        snapshot: &PatientSnapshot,
        ferritin: Option<&MetricOutlook>,
    ) -> RiskAssessment {
        let risk = self.risk();
        let w = &risk.weights.iron_overload;
        let normal_high = ranges::profile(Metric::Ferritin)
            .normal
            .map(|(_, high)| high)
            .unwrap_or(0.0);

        let factors = [
            Factor {
                label: FACTOR_FERRITIN_RISE,
                weight: w.ferritin_rise,
                value: ferritin.map(|o| {
                    rise_factor(
                        &o.trend,
                        risk.ferritin_rise_saturation_per_day,
                        self.config.trend.low_confidence_dampening,
                    )
                }),
            },
            Factor {
                label: FACTOR_FERRITIN_LEVEL,
                weight: w.ferritin_level,
                value: snapshot.latest(Metric::Ferritin).map(|m| {
                    ferritin_level_factor(m.value, normal_high, risk.ferritin_severe_level)
                }),
            },
            Factor {
                label: FACTOR_LIVER_ENZYMES,
                weight: w.liver_enzymes,
                value: liver_enzyme_factor(snapshot),
            },
        ];

        assess(RiskDomain::IronOverload, &factors, risk.reporting_threshold)
    }

    pub fn cardiac(&self, snapshot: &PatientSnapshot) -> RiskAssessment {
        let risk = self.risk();
        let w = &risk.weights.cardiac;

        let mut lab_times: Vec<DateTime<Utc>> = snapshot
            .history(Metric::Hemoglobin)
            .iter()
            .chain(snapshot.history(Metric::Ferritin))
            .map(|m| m.taken_at)
            .collect();
        lab_times.sort();

        let factors = [
            Factor {
                label: FACTOR_SUSTAINED_FERRITIN,
                weight: w.sustained_ferritin,
                value: sustained_ferritin_factor(
                    snapshot,
                    risk.cardiac_ferritin_threshold,
                    risk.sustained_ferritin_saturation_days,
                ),
            },
            Factor {
                label: FACTOR_MONITORING_GAPS,
                weight: w.monitoring_gaps,
                value: monitoring_gap_factor(
                    &lab_times,
                    snapshot.as_of,
                    risk.monitoring_gap_allowance_days,
                    Duration::days(risk.monitoring_lookback_days),
                ),
            },
        ];

        assess(RiskDomain::Cardiac, &factors, risk.reporting_threshold)
    }
}

// ============================================================================
// Sub-factors
// ============================================================================

/// Negative slope relative to a saturation rate; rising trends score 0
pub fn decline_factor(trend: &TrendModel, saturation_per_day: f64, dampening: f64) -> f64 {
    let f = (-trend.slope_per_day / saturation_per_day).clamp(0.0, 1.0);
    if trend.low_confidence {
        f * dampening
    } else {
        f
    }
}

/// Positive slope relative to a saturation rate; falling trends score 0
pub fn rise_factor(trend: &TrendModel, saturation_per_day: f64, dampening: f64) -> f64 {
    let f = (trend.slope_per_day / saturation_per_day).clamp(0.0, 1.0);
    if trend.low_confidence {
        f * dampening
    } else {
        f
    }
}

/// Proximity of the projected hemoglobin to the threshold.
///
/// 0 at `threshold + margin` or above, 1 at or below the threshold.
/// Implausible projections are clamped into the plausible range first.
pub fn projected_hb_factor(point: &ForecastPoint, threshold: f64, margin: f64) -> f64 {
    let projected = if point.implausible {
        ranges::profile(point.metric).clamp_plausible(point.predicted_value)
    } else {
        point.predicted_value
    };
    ((threshold + margin - projected) / margin).clamp(0.0, 1.0)
}

/// Days since the last transfusion relative to the usual interval
pub fn days_since_transfusion_factor(
    transfusions: &[DateTime<Utc>],
    as_of: DateTime<Utc>,
    default_interval_days: f64,
) -> Option<f64> {
    let last = *transfusions.last()?;
    let expected = mean(&intervals(transfusions)).unwrap_or(default_interval_days);
    if expected <= 0.0 {
        return Some(1.0);
    }
    Some((days_between(last, as_of) / expected).clamp(0.0, 1.0))
}

/// Coefficient of variation of past inter-transfusion intervals
pub fn interval_variability_factor(transfusions: &[DateTime<Utc>], cv_saturation: f64) -> Option<f64> {
    let intervals = intervals(transfusions);
    if intervals.len() < 2 {
        return None;
    }
    let mean = mean(&intervals)?;
    if mean <= 0.0 {
        return None;
    }
    let variance =
        intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
    Some((variance.sqrt() / mean / cv_saturation).clamp(0.0, 1.0))
}

/// Ferritin above the normal high, saturating at `severe`
pub fn ferritin_level_factor(level: f64, normal_high: f64, severe: f64) -> f64 {
    ((level - normal_high) / (severe - normal_high)).clamp(0.0, 1.0)
}

/// Fraction of recorded liver enzymes whose latest value is above normal
pub fn liver_enzyme_factor(snapshot: &PatientSnapshot) -> Option<f64> {
    let classes: Vec<Option<RangeClass>> = Metric::LIVER_ENZYMES
        .iter()
        .filter_map(|&metric| snapshot.latest(metric))
        .map(|m| ranges::classify(m.metric, m.value))
        .collect();

    if classes.is_empty() {
        return None;
    }
    let elevated = classes
        .iter()
        .filter(|c| **c == Some(RangeClass::Above))
        .count();
    Some(elevated as f64 / classes.len() as f64)
}

/// How long ferritin has stayed at or above `threshold`, up to `as_of`
///
/// Only the trailing run of samples counts; a single sample below the
/// threshold resets the duration to zero.
pub fn sustained_ferritin_factor(
    snapshot: &PatientSnapshot,
    threshold: f64,
    saturation_days: f64,
) -> Option<f64> {
    let history = snapshot.history(Metric::Ferritin);
    if history.is_empty() {
        return None;
    }

    let run_start = history
        .iter()
        .rev()
        .take_while(|m| m.value >= threshold)
        .last()
        .map(|m| m.taken_at);

    Some(match run_start {
        Some(start) => (days_between(start, snapshot.as_of) / saturation_days).clamp(0.0, 1.0),
        None => 0.0,
    })
}

/// Longest gap between labs within the lookback window, including the gap
/// from the latest lab to `as_of`, beyond an allowance
pub fn monitoring_gap_factor(
    lab_times: &[DateTime<Utc>],
    as_of: DateTime<Utc>,
    allowance_days: f64,
    lookback: Duration,
) -> Option<f64> {
    let last = *lab_times.last()?;
    let window_start = as_of
        .checked_sub_signed(lookback)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let longest_gap = lab_times
        .windows(2)
        .filter(|pair| pair[1] >= window_start)
        .map(|pair| days_between(pair[0], pair[1]))
        .fold(days_between(last, as_of), f64::max);

    Some(((longest_gap - allowance_days) / allowance_days).clamp(0.0, 1.0))
}

fn intervals(times: &[DateTime<Utc>]) -> Vec<f64> {
    times
        .windows(2)
        .map(|pair| days_between(pair[0], pair[1]))
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

// ============================================================================
// Aggregation
// ============================================================================

fn assess(domain: RiskDomain, factors: &[Factor], reporting_threshold: f64) -> RiskAssessment {
    let total_weight: f64 = factors.iter().map(|f| f.weight).sum();

    let contributions: Vec<(&'static str, f64)> = factors
        .iter()
        .filter_map(|f| {
            f.value.map(|v| {
                let share = if total_weight > 0.0 {
                    100.0 * f.weight * v / total_weight
                } else {
                    0.0
                };
                (f.label, share)
            })
        })
        .collect();

    let missing_inputs: Vec<String> = factors
        .iter()
        .filter(|f| f.value.is_none())
        .map(|f| f.label.to_string())
        .collect();

    let sufficiency = if contributions.is_empty() {
        Sufficiency::Insufficient
    } else if missing_inputs.is_empty() {
        Sufficiency::Complete
    } else {
        Sufficiency::Partial
    };

    let raw: f64 = contributions.iter().map(|(_, c)| c).sum();
    let score = raw.round().clamp(0.0, 100.0) as u8;
    let level = RiskLevel::from_score(score);

    let mut reported: Vec<(&'static str, f64)> = contributions
        .into_iter()
        .filter(|(_, c)| *c > 0.0 && *c > reporting_threshold * raw)
        .collect();
    // Stable: equal contributions keep declaration order
    reported.sort_by(|a, b| b.1.total_cmp(&a.1));

    let factor_values = factors
        .iter()
        .filter_map(|f| f.value.map(|v| (f.label.to_string(), v)))
        .collect();

    RiskAssessment {
        domain,
        score,
        level,
        contributing_factors: reported.into_iter().map(|(l, _)| l.to_string()).collect(),
        factor_values,
        timeframe: timeframe(domain, level, sufficiency).to_string(),
        sufficiency,
        missing_inputs,
    }
}

fn timeframe(domain: RiskDomain, level: RiskLevel, sufficiency: Sufficiency) -> &'static str {
    if sufficiency == Sufficiency::Insufficient {
        return "Unknown (insufficient data)";
    }
    match (domain, level) {
        (RiskDomain::Anemia, RiskLevel::Critical) => "Within 7 days",
        (RiskDomain::Anemia, RiskLevel::High) => "10-14 days",
        (RiskDomain::Anemia, RiskLevel::Medium) => "2-4 weeks",
        (RiskDomain::IronOverload, RiskLevel::Low) => "Next routine check",
        (RiskDomain::IronOverload, _) => "Ongoing",
        (RiskDomain::Cardiac, RiskLevel::Critical | RiskLevel::High) => "3-6 months",
        (RiskDomain::Cardiac, RiskLevel::Medium) => "6-12 months",
        (RiskDomain::Cardiac, RiskLevel::Low) => "Annual review",
        (RiskDomain::Anemia, RiskLevel::Low) => "Next routine check",
    }
}
