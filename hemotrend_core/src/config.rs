//! Configuration file support for Hemotrend.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/hemotrend/config.toml`.
//! Every value has a default, so partial files are fine. The defaults are
//! a starting point and are not clinically validated.

use crate::forecast::MAX_HORIZON_DAYS;
use crate::{ranges, Error, Metric, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One day
pub const MAX_CLOCK_SKEW_MINUTES: i64 = 24 * 60;

/// One hundred years
pub const MAX_MONITORING_LOOKBACK_DAYS: i64 = 36_500;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub trend: TrendConfig,

    #[serde(default)]
    pub forecast: ForecastConfig,

    #[serde(default)]
    pub transfusion: TransfusionConfig,

    #[serde(default)]
    pub risk: RiskConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Measurement ingestion rules
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// How far in the future `taken_at` may be before it is rejected
    #[serde(default = "default_clock_skew_minutes")]
    pub clock_skew_minutes: i64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            clock_skew_minutes: default_clock_skew_minutes(),
        }
    }
}

/// Trend fitting parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrendConfig {
    /// Trends spanning fewer days are flagged low-confidence
    #[serde(default = "default_min_span_days")]
    pub min_span_days: f64,

    /// Multiplier applied to slope-driven risk factors of low-confidence trends
    #[serde(default = "default_low_confidence_dampening")]
    pub low_confidence_dampening: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            min_span_days: default_min_span_days(),
            low_confidence_dampening: default_low_confidence_dampening(),
        }
    }
}

/// Forecast horizon configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForecastConfig {
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,

    #[serde(default = "default_step_days")]
    pub step_days: u32,

    /// Longest horizon a forecast request may ask for
    #[serde(default = "default_max_horizon_days")]
    pub max_horizon_days: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon_days: default_horizon_days(),
            step_days: default_step_days(),
            max_horizon_days: default_max_horizon_days(),
        }
    }
}

/// Transfusion prediction configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransfusionConfig {
    /// Hemoglobin threshold (g/dL) used when a patient has no override
    #[serde(default = "default_threshold_g_dl")]
    pub default_threshold_g_dl: f64,

    /// Interval width (g/dL) at which prediction confidence halves
    #[serde(default = "default_confidence_width_scale")]
    pub confidence_width_scale: f64,
}

impl Default for TransfusionConfig {
    fn default() -> Self {
        Self {
            default_threshold_g_dl: default_threshold_g_dl(),
            confidence_width_scale: default_confidence_width_scale(),
        }
    }
}

/// Risk scoring configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Minimum share of the total score for a factor to be reported
    #[serde(default = "default_reporting_threshold")]
    pub reporting_threshold: f64,

    /// Hemoglobin decline (g/dL/day) that saturates the decline factor
    #[serde(default = "default_hb_decline_saturation")]
    pub hb_decline_saturation_per_day: f64,

    /// Distance above the threshold (g/dL) within which projected Hb scores
    #[serde(default = "default_projected_hb_margin")]
    pub projected_hb_margin: f64,

    #[serde(default = "default_transfusion_interval_days")]
    pub default_transfusion_interval_days: f64,

    /// Coefficient of variation of transfusion intervals that saturates
    #[serde(default = "default_interval_cv_saturation")]
    pub interval_cv_saturation: f64,

    /// Ferritin rise (ng/mL/day) that saturates the rise factor
    #[serde(default = "default_ferritin_rise_saturation")]
    pub ferritin_rise_saturation_per_day: f64,

    /// Ferritin level (ng/mL) that saturates the level factor
    #[serde(default = "default_ferritin_severe_level")]
    pub ferritin_severe_level: f64,

    /// Ferritin level (ng/mL) above which cardiac iron loading is assumed
    #[serde(default = "default_cardiac_ferritin_threshold")]
    pub cardiac_ferritin_threshold: f64,

    #[serde(default = "default_sustained_ferritin_saturation_days")]
    pub sustained_ferritin_saturation_days: f64,

    /// Gap between labs (days) tolerated before the gap factor rises
    #[serde(default = "default_monitoring_gap_allowance_days")]
    pub monitoring_gap_allowance_days: f64,

    #[serde(default = "default_monitoring_lookback_days")]
    pub monitoring_lookback_days: i64,

    #[serde(default)]
    pub weights: RiskWeights,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            reporting_threshold: default_reporting_threshold(),
            hb_decline_saturation_per_day: default_hb_decline_saturation(),
            projected_hb_margin: default_projected_hb_margin(),
            default_transfusion_interval_days: default_transfusion_interval_days(),
            interval_cv_saturation: default_interval_cv_saturation(),
            ferritin_rise_saturation_per_day: default_ferritin_rise_saturation(),
            ferritin_severe_level: default_ferritin_severe_level(),
            cardiac_ferritin_threshold: default_cardiac_ferritin_threshold(),
            sustained_ferritin_saturation_days: default_sustained_ferritin_saturation_days(),
            monitoring_gap_allowance_days: default_monitoring_gap_allowance_days(),
            monitoring_lookback_days: default_monitoring_lookback_days(),
            weights: RiskWeights::default(),
        }
    }
}

/// Per-domain sub-factor weights (relative within a domain)
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct RiskWeights {
    #[serde(default)]
    pub anemia: AnemiaWeights,

    #[serde(default)]
    pub iron_overload: IronOverloadWeights,

    #[serde(default)]
    pub cardiac: CardiacWeights,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnemiaWeights {
    #[serde(default = "default_w_hb_decline")]
    pub hb_decline: f64,
    #[serde(default = "default_w_projected_hb")]
    pub projected_hb: f64,
    #[serde(default = "default_w_days_since_transfusion")]
    pub days_since_transfusion: f64,
    #[serde(default = "default_w_interval_variability")]
    pub interval_variability: f64,
}

impl Default for AnemiaWeights {
    fn default() -> Self {
        Self {
            hb_decline: default_w_hb_decline(),
            projected_hb: default_w_projected_hb(),
            days_since_transfusion: default_w_days_since_transfusion(),
            interval_variability: default_w_interval_variability(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IronOverloadWeights {
    #[serde(default = "default_w_ferritin_rise")]
    pub ferritin_rise: f64,
    #[serde(default = "default_w_ferritin_level")]
    pub ferritin_level: f64,
    #[serde(default = "default_w_liver_enzymes")]
    pub liver_enzymes: f64,
}

impl Default for IronOverloadWeights {
    fn default() -> Self {
        Self {
            ferritin_rise: default_w_ferritin_rise(),
            ferritin_level: default_w_ferritin_level(),
            liver_enzymes: default_w_liver_enzymes(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CardiacWeights {
    #[serde(default = "default_w_sustained_ferritin")]
    pub sustained_ferritin: f64,
    #[serde(default = "default_w_monitoring_gaps")]
    pub monitoring_gaps: f64,
}

impl Default for CardiacWeights {
    fn default() -> Self {
        Self {
            sustained_ferritin: default_w_sustained_ferritin(),
            monitoring_gaps: default_w_monitoring_gaps(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    base.join("hemotrend")
}

fn default_clock_skew_minutes() -> i64 {
    5
}

fn default_min_span_days() -> f64 {
    7.0
}

fn default_low_confidence_dampening() -> f64 {
    0.5
}

fn default_horizon_days() -> u32 {
    42
}

fn default_step_days() -> u32 {
    7
}

fn default_max_horizon_days() -> u32 {
    365
}

fn default_threshold_g_dl() -> f64 {
    7.5
}

fn default_confidence_width_scale() -> f64 {
    1.0
}

fn default_reporting_threshold() -> f64 {
    0.10
}

fn default_hb_decline_saturation() -> f64 {
    0.05
}

fn default_projected_hb_margin() -> f64 {
    2.0
}

fn default_transfusion_interval_days() -> f64 {
    28.0
}

fn default_interval_cv_saturation() -> f64 {
    0.5
}

fn default_ferritin_rise_saturation() -> f64 {
    10.0
}

fn default_ferritin_severe_level() -> f64 {
    2500.0
}

fn default_cardiac_ferritin_threshold() -> f64 {
    2500.0
}

fn default_sustained_ferritin_saturation_days() -> f64 {
    365.0
}

fn default_monitoring_gap_allowance_days() -> f64 {
    45.0
}

fn default_monitoring_lookback_days() -> i64 {
    365
}

fn default_w_hb_decline() -> f64 {
    35.0
}

fn default_w_projected_hb() -> f64 {
    20.0
}

fn default_w_days_since_transfusion() -> f64 {
    25.0
}

fn default_w_interval_variability() -> f64 {
    20.0
}

fn default_w_ferritin_rise() -> f64 {
    30.0
}

fn default_w_ferritin_level() -> f64 {
    45.0
}

fn default_w_liver_enzymes() -> f64 {
    25.0
}

fn default_w_sustained_ferritin() -> f64 {
    60.0
}

fn default_w_monitoring_gaps() -> f64 {
    40.0
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        base.join("hemotrend").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Check that every parameter is usable by the pipeline
    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_CLOCK_SKEW_MINUTES).contains(&self.ingestion.clock_skew_minutes) {
            return Err(Error::Config(format!(
                "clock_skew_minutes must be within [0, {}]",
                MAX_CLOCK_SKEW_MINUTES
            )));
        }
        if !(self.trend.min_span_days >= 0.0) {
            return Err(Error::Config("min_span_days must be >= 0".into()));
        }
        if !(0.0..=1.0).contains(&self.trend.low_confidence_dampening) {
            return Err(Error::Config(
                "low_confidence_dampening must be within [0, 1]".into(),
            ));
        }
        let f = &self.forecast;
        if f.max_horizon_days == 0 || f.max_horizon_days > MAX_HORIZON_DAYS {
            return Err(Error::Config(format!(
                "forecast max_horizon_days must be within [1, {}]",
                MAX_HORIZON_DAYS
            )));
        }
        if f.horizon_days == 0 || f.horizon_days > f.max_horizon_days {
            return Err(Error::Config(format!(
                "forecast horizon_days must be within [1, {}]",
                f.max_horizon_days
            )));
        }
        if self.forecast.step_days == 0 {
            return Err(Error::Config("forecast step_days must be > 0".into()));
        }
        validate_threshold(self.transfusion.default_threshold_g_dl)?;
        if !(self.transfusion.confidence_width_scale > 0.0) {
            return Err(Error::Config("confidence_width_scale must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.risk.reporting_threshold) {
            return Err(Error::Config(
                "reporting_threshold must be within [0, 1]".into(),
            ));
        }

        let r = &self.risk;
        let positives = [
            ("hb_decline_saturation_per_day", r.hb_decline_saturation_per_day),
            ("projected_hb_margin", r.projected_hb_margin),
            ("default_transfusion_interval_days", r.default_transfusion_interval_days),
            ("interval_cv_saturation", r.interval_cv_saturation),
            ("ferritin_rise_saturation_per_day", r.ferritin_rise_saturation_per_day),
            ("sustained_ferritin_saturation_days", r.sustained_ferritin_saturation_days),
            ("monitoring_gap_allowance_days", r.monitoring_gap_allowance_days),
        ];
        for (name, value) in positives {
            if !(value > 0.0) {
                return Err(Error::Config(format!("{} must be > 0", name)));
            }
        }
        if !(1..=MAX_MONITORING_LOOKBACK_DAYS).contains(&r.monitoring_lookback_days) {
            return Err(Error::Config(format!(
                "monitoring_lookback_days must be within [1, {}]",
                MAX_MONITORING_LOOKBACK_DAYS
            )));
        }
        let ferritin_high = ranges::profile(Metric::Ferritin)
            .normal
            .map(|(_, high)| high)
            .unwrap_or(0.0);
        if !(r.ferritin_severe_level > ferritin_high) {
            return Err(Error::Config(format!(
                "ferritin_severe_level must exceed the normal high of {} ng/mL",
                ferritin_high
            )));
        }

        let w = &r.weights;
        let domains = [
            (
                "anemia",
                vec![
                    w.anemia.hb_decline,
                    w.anemia.projected_hb,
                    w.anemia.days_since_transfusion,
                    w.anemia.interval_variability,
                ],
            ),
            (
                "iron_overload",
                vec![
                    w.iron_overload.ferritin_rise,
                    w.iron_overload.ferritin_level,
                    w.iron_overload.liver_enzymes,
                ],
            ),
            (
                "cardiac",
                vec![w.cardiac.sustained_ferritin, w.cardiac.monitoring_gaps],
            ),
        ];
        for (domain, weights) in domains {
            if weights.iter().any(|w| !(*w >= 0.0) || !w.is_finite()) {
                return Err(Error::Config(format!(
                    "{} weights must be finite and >= 0",
                    domain
                )));
            }
            if weights.iter().sum::<f64>() <= 0.0 {
                return Err(Error::Config(format!(
                    "{} weights must not all be zero",
                    domain
                )));
            }
        }

        Ok(())
    }
}

/// A transfusion threshold must be a plausible hemoglobin value
pub fn validate_threshold(threshold: f64) -> Result<()> {
    if ranges::profile(Metric::Hemoglobin).is_plausible(threshold) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "transfusion threshold {} g/dL is outside the plausible hemoglobin range",
            threshold
        )))
    }
}
