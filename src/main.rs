//! CLI entry point for the pickup layer pipeline.
//!
//! Provides subcommands for rebuilding the derived tables (once or on a fixed
//! cadence), listing the jobs, and reading the hotspot, recommendation and
//! popular-road tables.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pickup_layers::config::PipelineConfig;
use pickup_layers::layers::{JobContext, JobKind};
use pickup_layers::pipeline::{plan, run_pipeline};
use pickup_layers::query;
use pickup_layers::store::{MemoryStore, PgStore, SnapshotStore};
use serde::Serialize;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "pickup_layers")]
#[command(about = "Rebuilds layered pickup statistics tables in PostGIS", long_about = None)]
struct Cli {
    /// JSON pipeline configuration; defaults apply when omitted
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild derived tables in layer order
    Run {
        /// Job to run; repeat for several. All jobs when omitted
        #[arg(short, long = "job", value_name = "NAME")]
        jobs: Vec<String>,

        /// Repeat the round every N seconds instead of exiting
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,

        /// Maximum number of jobs running at once within a layer
        #[arg(short, long, default_value_t = 4)]
        concurrency: usize,

        /// Compute aggregates but keep the results in memory. Source tables
        /// are still read from the database; the hot grid job reads this
        /// round's in-memory grid statistics
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// List jobs with their layer and target table
    Jobs,
    /// Hot grid centroids for a workday flag and hour, as JSON
    Hotspots {
        #[arg(long, action = clap::ArgAction::Set)]
        workday: bool,

        #[arg(long, value_parser = clap::value_parser!(i32).range(0..24))]
        hour: i32,
    },
    /// Top pickup roads for a workday flag and hour, as JSON
    Recommend {
        #[arg(long, action = clap::ArgAction::Set)]
        workday: bool,

        #[arg(long, value_parser = clap::value_parser!(i32).range(0..24))]
        hour: i32,

        #[arg(short, long, default_value_t = 5)]
        limit: i64,
    },
    /// Most traversed named roads, as JSON or a CSV file
    PopularRoads {
        #[arg(short, long, default_value_t = 50)]
        limit: i64,

        /// Write a CSV export here instead of printing JSON
        #[arg(long, value_name = "PATH")]
        csv: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/pickup_layers.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("pickup_layers.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            jobs,
            every,
            concurrency,
            dry_run,
        } => {
            let jobs = select_jobs(&jobs)?;
            run_rounds(config, &jobs, every, concurrency, dry_run).await?;
        }
        Commands::Jobs => {
            for (layer, jobs) in plan(&JobKind::ALL) {
                for job in jobs {
                    println!("{:<24}{:<14}{}", job.name(), layer, job.table().name);
                }
            }
        }
        Commands::Hotspots { workday, hour } => {
            let pg = connect(&config).await?;
            print_json(&query::hotspots(pg.pool(), workday, hour).await?)?;
        }
        Commands::Recommend {
            workday,
            hour,
            limit,
        } => {
            let pg = connect(&config).await?;
            print_json(&query::recommendations(pg.pool(), workday, hour, limit).await?)?;
        }
        Commands::PopularRoads { limit, csv } => {
            let pg = connect(&config).await?;
            let roads = query::popular_roads(pg.pool(), limit).await?;
            match csv {
                Some(path) => query::export_popular_roads_csv(&path, &roads)?,
                None => print_json(&roads)?,
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&str>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    info!(
        batch_size = config.batch_size,
        max_connections = config.max_connections,
        timezone = %config.timezone,
        "Configuration loaded"
    );
    Ok(config)
}

async fn connect(config: &PipelineConfig) -> Result<PgStore> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    PgStore::connect(&database_url, config).await
}

/// Resolves job names; no names selects every job.
fn select_jobs(names: &[String]) -> Result<Vec<JobKind>> {
    if names.is_empty() {
        return Ok(JobKind::ALL.to_vec());
    }
    names
        .iter()
        .map(|name| match JobKind::from_name(name) {
            Some(kind) => Ok(kind),
            None => {
                let known: Vec<&str> = JobKind::ALL.iter().map(|k| k.name()).collect();
                bail!("unknown job '{name}', expected one of: {}", known.join(", "))
            }
        })
        .collect()
}

/// Runs pipeline rounds, forever when `every` is set.
#[tracing::instrument(skip(config, jobs), fields(jobs = jobs.len()))]
async fn run_rounds(
    config: PipelineConfig,
    jobs: &[JobKind],
    every: Option<u64>,
    concurrency: usize,
    dry_run: bool,
) -> Result<()> {
    let pg = connect(&config).await?;
    let store: Arc<dyn SnapshotStore> = if dry_run {
        warn!("Dry run: derived tables are left untouched");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(pg.clone())
    };
    let ctx = JobContext {
        pool: pg.pool().clone(),
        store,
        config: Arc::new(config),
    };

    let mut round: u64 = 0;
    loop {
        round += 1;
        info!(round, "Starting pipeline round");
        let outcome = run_pipeline(&ctx, jobs, concurrency).await?;

        let Some(secs) = every else {
            print_json(&outcome)?;
            if !outcome.is_success() {
                bail!(
                    "{} of {} jobs failed",
                    outcome.failures.len(),
                    outcome.failures.len() + outcome.reports.len()
                );
            }
            return Ok(());
        };

        if !outcome.is_success() {
            error!(round, failed = outcome.failures.len(), "Round finished with failures");
        }
        info!(every_secs = secs, "Waiting before next round");
        tokio::time::sleep(tokio::time::Duration::from_secs(secs)).await;
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
