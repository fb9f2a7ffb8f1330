use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

mod aggregate;
mod config;
mod db;
mod delta;
mod engine;
mod error;
mod loader;
mod models;
mod period;
mod registry;
mod report;

use config::{AppConfig, Overrides};
use loader::Datasets;
use registry::Registry;

#[derive(Parser)]
#[command(name = "crisis-metrics")]
#[command(about = "Pre-crisis vs crisis business metric comparison for food delivery data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct AnalysisArgs {
    /// JSON config file with periods, targets and data location
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory holding the fact and dimension CSV files
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Pre-crisis window as YEAR:START-END
    #[arg(long)]
    pre: Option<String>,
    /// Crisis window as YEAR:START-END
    #[arg(long)]
    crisis: Option<String>,
    /// Minimum pre-crisis row count for a segment to be listed
    #[arg(long)]
    min_baseline: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare every registered metric across the two periods
    Compare {
        #[command(flatten)]
        analysis: AnalysisArgs,
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,
        /// Segment fields to break completed orders down by
        #[arg(long = "by")]
        segments: Vec<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Compare one metric per segment (city, cuisine_type, ...)
    Breakdown {
        #[command(flatten)]
        analysis: AnalysisArgs,
        #[arg(long, default_value = "completed_orders")]
        metric: String,
        #[arg(long = "by", default_value = "city")]
        segment: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show one metric month by month
    Trend {
        #[command(flatten)]
        analysis: AnalysisArgs,
        #[arg(long, default_value = "completed_orders")]
        metric: String,
    },
    /// List loyal customers active before the crisis and gone during it
    Churn {
        #[command(flatten)]
        analysis: AnalysisArgs,
        /// Completed pre-crisis orders needed to count as loyal
        #[arg(long, default_value_t = engine::DEFAULT_LOYAL_ORDERS)]
        min_orders: usize,
        #[arg(long, default_value_t = 15)]
        limit: usize,
    },
    /// List the metric registry
    Metrics,
    /// Create or upgrade the snapshot schema
    InitDb,
    /// Compare and store the result in Postgres
    Snapshot {
        #[command(flatten)]
        analysis: AnalysisArgs,
    },
    /// List stored snapshots of one metric
    History {
        #[arg(long)]
        metric: String,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

struct Session {
    config: AppConfig,
    registry: Registry,
    datasets: Datasets,
}

fn open_session(args: AnalysisArgs) -> anyhow::Result<Session> {
    let config = AppConfig::load(
        args.config.as_deref(),
        Overrides {
            data_dir: args.data_dir,
            pre: args.pre,
            crisis: args.crisis,
            min_baseline: args.min_baseline,
        },
    )?;
    let mut registry = Registry::builtin().context("invalid metric registry")?;
    registry
        .apply_targets(&config.targets)
        .context("invalid metric targets")?;

    info!(
        pre = %config.periods.pre(),
        crisis = %config.periods.crisis(),
        data_dir = %config.data_dir.display(),
        "loading datasets"
    );
    let datasets = loader::load_datasets(&config.data_dir, &registry)?;

    Ok(Session {
        config,
        registry,
        datasets,
    })
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = config::database_url()?;
    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sqlx=warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compare {
            analysis,
            format,
            segments,
            out,
        } => {
            let session = open_session(analysis)?;
            let comparison =
                engine::compare(&session.datasets, &session.registry, &session.config.periods);

            let metric = session.registry.metric("completed_orders")?;
            let mut breakdowns = Vec::new();
            for field in segments {
                let rows = engine::breakdown(
                    &session.datasets,
                    &session.registry,
                    metric,
                    &field,
                    &session.config.periods,
                    session.config.min_baseline,
                )?;
                breakdowns.push((field, metric, rows));
            }

            let rendered = match format {
                Format::Json => report::to_json(&comparison, &breakdowns)?,
                Format::Markdown => {
                    report::build_report(&comparison, &session.registry, &breakdowns)
                }
            };

            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    println!("Report written to {}.", path.display());
                }
                None => println!("{rendered}"),
            }
        }
        Commands::Breakdown {
            analysis,
            metric,
            segment,
            limit,
        } => {
            let session = open_session(analysis)?;
            let metric = session.registry.metric(&metric)?;
            let rows = engine::breakdown(
                &session.datasets,
                &session.registry,
                metric,
                &segment,
                &session.config.periods,
                session.config.min_baseline,
            )?;

            if rows.is_empty() {
                println!("No {segment} segments with enough pre-crisis volume.");
                return Ok(());
            }

            println!("Most affected {segment} segments for {}:", metric.label);
            for row in rows.iter().take(limit) {
                println!(
                    "- {}: {} -> {} ({}, {})",
                    row.segment,
                    report::format_value(row.delta.pre_value, metric),
                    report::format_value(row.delta.crisis_value, metric),
                    report::format_change(&row.delta, metric),
                    report::favorable_marker(row.delta.favorable)
                );
            }
        }
        Commands::Trend { analysis, metric } => {
            let session = open_session(analysis)?;
            let metric = session.registry.metric(&metric)?;
            let points = engine::monthly_trend(
                &session.datasets,
                &session.registry,
                metric,
                &session.config.periods,
            )?;
            print!("{}", report::build_trend(metric, &points));
        }
        Commands::Churn {
            analysis,
            min_orders,
            limit,
        } => {
            let session = open_session(analysis)?;
            let summary = engine::churned_customers(
                &session.datasets,
                &session.registry,
                &session.config.periods,
                min_orders.max(1),
            )?;
            print!("{}", report::build_churn(&summary, limit));
        }
        Commands::Metrics => {
            let registry = Registry::builtin()?;
            for metric in registry.metrics() {
                println!(
                    "- {} ({}): {} on {}, {}{}",
                    metric.name,
                    metric.label,
                    serde_json::to_string(&metric.aggregation)?,
                    metric.source,
                    serde_json::to_string(&metric.polarity)?,
                    metric
                        .target
                        .map(|target| format!(", target {target}"))
                        .unwrap_or_default()
                );
            }
        }
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Snapshot { analysis } => {
            let session = open_session(analysis)?;
            let comparison =
                engine::compare(&session.datasets, &session.registry, &session.config.periods);
            let pool = connect().await?;
            let run_id = db::save_comparison(&pool, &comparison).await?;
            println!("Stored {} metrics as run {run_id}.", comparison.metrics.len());
        }
        Commands::History { metric, limit } => {
            let pool = connect().await?;
            let history = db::fetch_history(&pool, &metric, limit.max(1)).await?;

            if history.is_empty() {
                println!("No snapshots stored for {metric}.");
                return Ok(());
            }

            println!("Recent snapshots of {metric}:");
            for row in history {
                let change = row
                    .point_delta
                    .map(|points| format!("{points:+.1}pp"))
                    .or_else(|| row.percent_delta.map(|percent| format!("{percent:+.1}%")))
                    .unwrap_or_else(|| "no data".to_string());
                println!(
                    "- {} run {} [{} vs {}]: {} -> {} ({}, {})",
                    row.created_at.format("%Y-%m-%d %H:%M"),
                    row.run_id,
                    row.pre_period,
                    row.crisis_period,
                    report::format_plain(row.pre_value),
                    report::format_plain(row.crisis_value),
                    change,
                    report::favorable_marker(row.favorable)
                );
            }
        }
    }

    Ok(())
}
