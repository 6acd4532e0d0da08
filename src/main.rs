use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use target_repartition::batch::recalculate_year_parallel;
use target_repartition::config::Config;
use target_repartition::kpi::{
    AnnualTarget, CalculationType, DistributionProfile, Granularity, PeriodicRecord,
    ProfileParams, RepartitionLevel, RepartitionWeights, TargetKey, TargetSlot,
};
use target_repartition::output::json::{render_json, PreviewDocument};
use target_repartition::output::table::{
    render_period_table, render_records_table, render_report_table,
};
use target_repartition::recalc::{RecalcReport, Recalculator};
use target_repartition::repartition::compute_slot;
use target_repartition::store::{SqliteTargetStore, TargetStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "target-repartition",
    about = "Spread annual KPI targets into daily, weekly, monthly and quarterly values"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the pipeline on an ad-hoc target without touching the store.
    Preview {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        target: f64,
        #[arg(long, default_value = "incremental")]
        calc: String,
        #[arg(long, default_value = "year")]
        level: String,
        #[arg(long, default_value = "even")]
        profile: String,
        /// Comma separated `period=percentage` pairs, e.g. `Q1=25,Q2=30`.
        #[arg(long)]
        weights: Option<String>,
        /// Raw profile parameters as a JSON object.
        #[arg(long)]
        params: Option<String>,
        #[arg(long, default_value = "month")]
        granularity: String,
    },
    Recalc {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        site: Option<i64>,
        #[arg(long)]
        kpi: Option<i64>,
        #[arg(long)]
        parallel: bool,
    },
    Show {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        site: i64,
        #[arg(long)]
        kpi: i64,
        #[arg(long)]
        slot: Option<String>,
        #[arg(long, default_value = "month")]
        granularity: String,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(Some(&config_path))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Config { init, show } => {
            if *init {
                Config::write_template(&config_path)?;
                println!("Wrote config template to {}", config_path.display());
            }
            if *show || !*init {
                println!("{}", render_json(&config)?);
            }
        }
        Commands::Preview {
            year,
            target,
            calc,
            level,
            profile,
            weights,
            params,
            granularity,
        } => {
            let calculation_type = CalculationType::from_str(calc)?;
            let granularity = Granularity::from_str(granularity)?;
            let annual = AnnualTarget::blank(TargetKey::new(*year, 0, 0))
                .with_target(TargetSlot::One, *target)
                .with_repartition(
                    RepartitionLevel::from_str(level)?,
                    weights
                        .as_deref()
                        .map(parse_weight_pairs)
                        .transpose()?
                        .unwrap_or_default(),
                )
                .with_profile(
                    DistributionProfile::from_str(profile)?,
                    params
                        .as_deref()
                        .map(ProfileParams::from_json_lenient)
                        .unwrap_or_default(),
                );
            let outcome =
                compute_slot(&config.distribution, calculation_type, &annual, TargetSlot::One);
            let values = outcome.periodic_values();
            let rows = values.get(granularity);
            match cli.output {
                OutputFormat::Table => {
                    println!("{}", render_period_table(granularity, calculation_type, rows))
                }
                OutputFormat::Json => println!(
                    "{}",
                    render_json(&PreviewDocument {
                        year: *year,
                        target: *target,
                        calculation_type,
                        repartition_level: annual.repartition_level,
                        distribution_profile: annual.distribution_profile,
                        granularity,
                        values: rows,
                        outcome: &outcome,
                    })?
                ),
            }
        }
        Commands::Recalc {
            year,
            site,
            kpi,
            parallel,
        } => {
            let store = SqliteTargetStore::open(&config.resolved_db_path())?;
            let report = match kpi {
                Some(kpi) => {
                    let site = site.ok_or_else(|| anyhow!("--kpi requires --site"))?;
                    Recalculator::new(&store, &config.distribution)
                        .recalculate(TargetKey::new(*year, site, *kpi))?
                }
                None if *parallel => {
                    let distribution = Arc::new(config.distribution.clone());
                    recalculate_year_parallel(&store, distribution, *year, *site).await?
                }
                None => Recalculator::new(&store, &config.distribution)
                    .recalculate_year(*year, *site)?,
            };
            print_report(&report, cli.output)?;
        }
        Commands::Show {
            year,
            site,
            kpi,
            slot,
            granularity,
        } => {
            let store = SqliteTargetStore::open(&config.resolved_db_path())?;
            let granularity = Granularity::from_str(granularity)?;
            let slots = match slot.as_deref() {
                Some(raw) => vec![TargetSlot::from_str(raw)?],
                None => TargetSlot::ALL.to_vec(),
            };
            let mut records = Vec::new();
            for slot in slots {
                let key = TargetKey::new(*year, *site, *kpi).with_slot(slot);
                records.extend(store.periodic_values(&key, granularity)?);
            }
            print_records(&records, cli.output)?;
        }
    }

    Ok(())
}

/// Parses `Q1=25,Q2=30` style pairs; values may carry a trailing `%`.
fn parse_weight_pairs(raw: &str) -> Result<RepartitionWeights> {
    let mut weights = RepartitionWeights::new();
    for piece in raw.split(',') {
        let trimmed = piece.trim();
        if trimmed.is_empty() {
            continue;
        }
        let (period, value) = trimmed
            .split_once('=')
            .ok_or_else(|| anyhow!("weight `{trimmed}` is not of the form period=value"))?;
        let value: f64 = value
            .trim()
            .trim_end_matches('%')
            .parse()
            .with_context(|| format!("invalid weight value for {period}"))?;
        weights.insert(period.trim(), value);
    }
    Ok(weights)
}

fn print_report(report: &RecalcReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_report_table(report)),
        OutputFormat::Json => println!("{}", render_json(report)?),
    }
    info!(
        "{} recalculated, {} skipped",
        report.recalculated.len(),
        report.skipped.len()
    );
    Ok(())
}

fn print_records(records: &[PeriodicRecord], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_records_table(records)),
        OutputFormat::Json => println!("{}", render_json(records)?),
    }
    Ok(())
}
