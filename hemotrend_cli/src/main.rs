use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use hemotrend_core::*;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "hemotrend")]
#[command(about = "Lab trend tracking and transfusion forecasting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use a specific config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log pipeline details to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a new measurement
    Record {
        #[arg(long)]
        patient: String,

        /// hemoglobin, ferritin, alt, ast, alp, heart_rate, spo2, transfusion
        #[arg(long, value_parser = parse_metric)]
        metric: Metric,

        #[arg(long, allow_hyphen_values = true)]
        value: f64,

        /// Defaults to the metric's canonical unit
        #[arg(long)]
        unit: Option<String>,

        /// RFC 3339 timestamp or YYYY-MM-DD (defaults to now)
        #[arg(long, value_parser = parse_timestamp)]
        taken_at: Option<DateTime<Utc>>,

        /// lab or self_report
        #[arg(long, default_value = "lab", value_parser = parse_source)]
        source: Source,
    },

    /// List recorded measurements for one metric
    Query {
        #[arg(long)]
        patient: String,

        #[arg(long, value_parser = parse_metric)]
        metric: Metric,

        #[arg(long, value_parser = parse_timestamp)]
        from: Option<DateTime<Utc>>,

        #[arg(long, value_parser = parse_timestamp)]
        to: Option<DateTime<Utc>>,
    },

    /// Show current values, trends, risk and transfusion outlook
    Dashboard {
        #[arg(long)]
        patient: String,

        #[arg(long, value_parser = parse_timestamp)]
        as_of: Option<DateTime<Utc>>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Forecast one metric forward
    Forecast {
        #[arg(long)]
        patient: String,

        #[arg(long, value_parser = parse_metric)]
        metric: Metric,

        #[arg(long, value_parser = parse_timestamp)]
        as_of: Option<DateTime<Utc>>,

        /// Defaults to the configured horizon
        #[arg(
            long,
            value_parser = clap::value_parser!(u32)
                .range(1..=i64::from(hemotrend_core::forecast::MAX_HORIZON_DAYS))
        )]
        horizon_days: Option<u32>,

        #[arg(long)]
        json: bool,
    },

    /// Show ranked recommendations
    Recommend {
        #[arg(long)]
        patient: String,

        #[arg(long, value_parser = parse_timestamp)]
        as_of: Option<DateTime<Utc>>,

        #[arg(long)]
        json: bool,
    },

    /// Set a patient's transfusion threshold (g/dL)
    Threshold {
        #[arg(long)]
        patient: String,

        #[arg(long)]
        value: f64,
    },

    /// Roll up WAL measurements to CSV
    Rollup {
        /// Clean up processed WAL files after rollup
        #[arg(long)]
        cleanup: bool,
    },
}

/// File locations under the data directory
struct DataPaths {
    wal_dir: PathBuf,
    wal: PathBuf,
    csv: PathBuf,
    profiles: PathBuf,
}

impl DataPaths {
    fn new(data_dir: &Path) -> Self {
        let wal_dir = data_dir.join("wal");
        Self {
            wal: wal_dir.join("measurements.wal"),
            wal_dir,
            csv: data_dir.join("measurements.csv"),
            profiles: data_dir.join("profiles.json"),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        hemotrend_core::logging::init_with_level("debug");
    } else {
        hemotrend_core::logging::init();
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let paths = DataPaths::new(&data_dir);
    tracing::debug!("Using data directory {:?}", data_dir);

    match cli.command {
        Commands::Record {
            patient,
            metric,
            value,
            unit,
            taken_at,
            source,
        } => {
            let now = Utc::now();
            let input = MeasurementInput {
                patient_id: PatientId::new(patient),
                metric,
                value,
                unit,
                taken_at: taken_at.unwrap_or(now),
                source,
            };
            cmd_record(&paths, &config, input, now)
        }
        Commands::Query {
            patient,
            metric,
            from,
            to,
        } => cmd_query(&paths, &config, &PatientId::new(patient), metric, from, to),
        Commands::Dashboard {
            patient,
            as_of,
            json,
        } => cmd_dashboard(
            &paths,
            &config,
            &PatientId::new(patient),
            as_of.unwrap_or_else(Utc::now),
            json,
        ),
        Commands::Forecast {
            patient,
            metric,
            as_of,
            horizon_days,
            json,
        } => cmd_forecast(
            &paths,
            &config,
            &PatientId::new(patient),
            metric,
            as_of.unwrap_or_else(Utc::now),
            horizon_days.unwrap_or(config.forecast.horizon_days),
            json,
        ),
        Commands::Recommend {
            patient,
            as_of,
            json,
        } => cmd_recommend(
            &paths,
            &config,
            &PatientId::new(patient),
            as_of.unwrap_or_else(Utc::now),
            json,
        ),
        Commands::Threshold { patient, value } => {
            cmd_threshold(&paths, &PatientId::new(patient), value)
        }
        Commands::Rollup { cleanup } => cmd_rollup(&paths, cleanup),
    }
}

fn load_log(paths: &DataPaths, config: &Config) -> Result<MeasurementLog> {
    load_measurement_log(
        &paths.wal,
        &paths.csv,
        chrono::Duration::minutes(config.ingestion.clock_skew_minutes),
    )
}

fn cmd_record(
    paths: &DataPaths,
    config: &Config,
    input: MeasurementInput,
    now: DateTime<Utc>,
) -> Result<()> {
    std::fs::create_dir_all(&paths.wal_dir)?;

    let log = load_log(paths, config)?;
    let mut store = WalStore::new(log, &paths.wal).with_archive(&paths.csv);
    let m = record_measurement(&mut store, input, now)?;

    println!(
        "✓ Recorded {} {} {} for {} at {}",
        m.metric,
        m.value,
        m.unit,
        m.patient_id,
        m.taken_at.to_rfc3339()
    );
    Ok(())
}

fn cmd_query(
    paths: &DataPaths,
    config: &Config,
    patient: &PatientId,
    metric: Metric,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<()> {
    let log = load_log(paths, config)?;
    let records = log.query(patient, metric, from, to);

    if records.is_empty() {
        println!("No measurements");
        return Ok(());
    }

    for m in &records {
        let range = match ranges::classify(m.metric, m.value) {
            Some(class) => range_label(class),
            None => "",
        };
        println!(
            "{}  {:<11} {:>8} {:<6} {:<11} {}",
            m.taken_at.format("%Y-%m-%d %H:%M"),
            m.metric,
            m.value,
            m.unit,
            source_label(m.source),
            range
        );
    }
    Ok(())
}

fn cmd_dashboard(
    paths: &DataPaths,
    config: &Config,
    patient: &PatientId,
    as_of: DateTime<Utc>,
    json: bool,
) -> Result<()> {
    let log = load_log(paths, config)?;
    let profiles = PatientProfiles::load(&paths.profiles)?;
    let summary = Pipeline::new(config, &profiles).dashboard_summary(&log, patient, as_of);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    display_dashboard(&summary);
    Ok(())
}

fn cmd_forecast(
    paths: &DataPaths,
    config: &Config,
    patient: &PatientId,
    metric: Metric,
    as_of: DateTime<Utc>,
    horizon_days: u32,
    json: bool,
) -> Result<()> {
    let log = load_log(paths, config)?;
    let profiles = PatientProfiles::load(&paths.profiles)?;
    let points =
        Pipeline::new(config, &profiles).forecast(&log, patient, metric, as_of, horizon_days)?;
    tracing::debug!("Forecast {} points over {} days", points.len(), horizon_days);

    if json {
        println!("{}", serde_json::to_string_pretty(&points)?);
        return Ok(());
    }

    let unit = ranges::profile(metric).unit;
    println!("{} forecast for {} from {}", metric, patient, as_of.format("%Y-%m-%d"));
    for p in &points {
        println!(
            "  {}  {:>8.2} {}  [{:.2} - {:.2}]{}",
            p.target_time.format("%Y-%m-%d"),
            p.predicted_value,
            unit,
            p.lower_bound,
            p.upper_bound,
            if p.implausible { "  (implausible)" } else { "" }
        );
    }
    Ok(())
}

fn cmd_recommend(
    paths: &DataPaths,
    config: &Config,
    patient: &PatientId,
    as_of: DateTime<Utc>,
    json: bool,
) -> Result<()> {
    let log = load_log(paths, config)?;
    let profiles = PatientProfiles::load(&paths.profiles)?;
    let recs = Pipeline::new(config, &profiles).recommendations(&log, patient, as_of);

    if json {
        println!("{}", serde_json::to_string_pretty(&recs)?);
        return Ok(());
    }

    if recs.is_empty() {
        println!("No recommendations");
        return Ok(());
    }

    for (i, r) in recs.iter().enumerate() {
        println!(
            "{}. [{:?}] {} ({}% confidence)",
            i + 1,
            r.priority,
            r.title,
            r.confidence
        );
        println!("   {}", r.description);
        println!("   → {}", r.suggested_action);
    }
    Ok(())
}

fn cmd_threshold(paths: &DataPaths, patient: &PatientId, value: f64) -> Result<()> {
    PatientProfiles::update(&paths.profiles, |p| {
        p.set_transfusion_threshold(patient, value)
    })?;
    println!("✓ Transfusion threshold for {} set to {} g/dL", patient, value);
    Ok(())
}

fn cmd_rollup(paths: &DataPaths, cleanup: bool) -> Result<()> {
    if !paths.wal.exists() {
        tracing::debug!("No WAL at {:?}", paths.wal);
        println!("No WAL file found - nothing to roll up.");
        return Ok(());
    }

    let count = hemotrend_core::csv_rollup::wal_to_csv_and_archive(&paths.wal, &paths.csv)?;
    tracing::info!("Rolled up {:?} into {:?}", paths.wal, paths.csv);

    println!("✓ Rolled up {} measurements to CSV", count);
    println!("  CSV: {}", paths.csv.display());

    if cleanup {
        let cleaned = hemotrend_core::csv_rollup::cleanup_processed_wals(&paths.wal_dir)?;
        if cleaned > 0 {
            println!("✓ Cleaned up {} processed WAL files", cleaned);
        }
    }

    Ok(())
}

fn display_dashboard(summary: &DashboardSummary) {
    println!("\n╭─────────────────────────────────────────╮");
    println!("│  {} as of {}", summary.patient_id, summary.as_of.format("%Y-%m-%d"));
    println!("╰─────────────────────────────────────────╯");

    println!("\nCurrent values");
    if summary.current_values.is_empty() {
        println!("  No data yet");
    }
    for (metric, current) in &summary.current_values {
        let m = &current.measurement;
        println!(
            "  {:<12} {:>8} {:<6} {}  {}",
            metric,
            m.value,
            m.unit,
            m.taken_at.format("%Y-%m-%d"),
            current.range.map(range_label).unwrap_or("")
        );
    }

    println!("\nTrends");
    for (metric, view) in &summary.trends {
        match view {
            TrendView::Available(t) => println!(
                "  {:<12} {:+.3} {}/day over {:.0} days ({} samples){}",
                metric,
                t.slope_per_day,
                ranges::profile(*metric).unit,
                t.span_days,
                t.sample_count,
                if t.low_confidence { ", low confidence" } else { "" }
            ),
            TrendView::InsufficientData { sample_count } => println!(
                "  {:<12} insufficient data ({} sample{})",
                metric,
                sample_count,
                if *sample_count == 1 { "" } else { "s" }
            ),
        }
    }

    println!("\nRisk");
    for a in &summary.risk_assessments {
        if !a.has_data() {
            println!("  {:<14} insufficient data", domain_label(a.domain));
            continue;
        }
        println!(
            "  {:<14} {:>3} {:?}  ({})",
            domain_label(a.domain),
            a.score,
            a.level,
            a.timeframe
        );
        if !a.contributing_factors.is_empty() {
            println!("  {:<14} {}", "", a.contributing_factors.join(", "));
        }
        if !a.missing_inputs.is_empty() {
            println!("  {:<14} missing: {}", "", a.missing_inputs.join(", "));
        }
    }

    println!("\nTransfusion");
    let p = &summary.transfusion_prediction;
    match (p.status, p.predicted_date) {
        (PredictionStatus::Predicted, Some(date)) => println!(
            "  Hb projected below {} g/dL on {} ({} days, {}% confidence)",
            p.threshold,
            date.format("%Y-%m-%d"),
            p.days_until.unwrap_or(0),
            p.confidence
        ),
        (PredictionStatus::BelowThreshold, _) => println!(
            "  Hb is already below {} g/dL ({}% confidence)",
            p.threshold, p.confidence
        ),
        (PredictionStatus::InsufficientData, _) => {
            println!("  Insufficient hemoglobin data for a prediction")
        }
        _ => println!(
            "  No transfusion projected within horizon (threshold {} g/dL, {}% confidence)",
            p.threshold, p.confidence
        ),
    }
    println!();
}

fn domain_label(domain: RiskDomain) -> &'static str {
    match domain {
        RiskDomain::Anemia => "Anemia",
        RiskDomain::IronOverload => "Iron overload",
        RiskDomain::Cardiac => "Cardiac",
    }
}

fn range_label(class: RangeClass) -> &'static str {
    match class {
        RangeClass::Below => "below normal",
        RangeClass::Within => "normal",
        RangeClass::Above => "above normal",
    }
}

fn source_label(source: Source) -> &'static str {
    match source {
        Source::Lab => "lab",
        Source::SelfReport => "self-report",
    }
}

fn parse_metric(s: &str) -> std::result::Result<Metric, String> {
    s.parse().map_err(|e: Error| e.to_string())
}

fn parse_source(s: &str) -> std::result::Result<Source, String> {
    s.parse().map_err(|e: Error| e.to_string())
}

/// Accepts RFC 3339 or a bare date (midnight UTC)
fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid timestamp '{}': expected RFC 3339 or YYYY-MM-DD", s))
}
