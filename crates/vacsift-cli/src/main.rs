use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use vacsift_adapters::FixtureSource;
use vacsift_storage::{MemoryStore, PgPostingStore, PostingStore};
use vacsift_sync::{
    deduplicate, maybe_build_scheduler, prune, run_daily_chain, ReferenceSource, SyncConfig,
    SyncPipeline,
};

#[derive(Debug, Parser)]
#[command(name = "vacsift")]
#[command(about = "Job-posting enrichment and normalization pipeline")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, enrich, and persist one batch of postings.
    Sync(RunArgs),
    /// Remove duplicate postings that share a detail URL.
    Dedup,
    /// Delete postings older than the retention horizon.
    Prune {
        /// Override the configured horizon.
        #[arg(long)]
        days: Option<i64>,
    },
    /// Sync, dedup, and prune in sequence.
    Daily(RunArgs),
    /// Apply database migrations.
    Migrate,
    /// Run the daily chain on the configured cron until interrupted.
    Schedule,
}

#[derive(Debug, Clone, Default, Args)]
struct RunArgs {
    /// Read listings and details from a captured bundle instead of the live API.
    #[arg(long)]
    fixture: Option<PathBuf>,
    /// Rate table JSON file used instead of the rates API.
    #[arg(long, requires = "areas_file")]
    rates_file: Option<PathBuf>,
    /// Geography catalog JSON file used instead of the areas API.
    #[arg(long, requires = "rates_file")]
    areas_file: Option<PathBuf>,
    /// Keep postings in memory for this process only.
    #[arg(long)]
    memory: bool,
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "vacsift=info",
        1 => "vacsift=debug",
        _ => "vacsift=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => fmt().with_env_filter(env_filter).with_target(false).init(),
        LogFormat::Json => fmt().json().with_env_filter(env_filter).init(),
    }
}

async fn open_store(config: &SyncConfig, memory: bool) -> Result<Arc<dyn PostingStore>> {
    if memory {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = PgPostingStore::connect(&config.database_url)
        .await
        .context("connecting to postings database")?;
    store.migrate().await.context("applying migrations")?;
    Ok(Arc::new(store))
}

async fn build_pipeline(config: SyncConfig, args: &RunArgs) -> Result<SyncPipeline> {
    let settings = config.load_settings().await?;
    let store = open_store(&config, args.memory).await?;
    let mut pipeline = SyncPipeline::new(config, settings, store)?;
    if let Some(path) = &args.fixture {
        pipeline = pipeline.with_source(Box::new(FixtureSource::from_path(path)?));
    }
    if let (Some(rates_path), Some(areas_path)) = (&args.rates_file, &args.areas_file) {
        pipeline = pipeline.with_reference(ReferenceSource::Files {
            rates_path: rates_path.clone(),
            areas_path: areas_path.clone(),
        });
    }
    Ok(pipeline)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync(RunArgs::default())) {
        Commands::Sync(args) => {
            let pipeline = build_pipeline(config, &args).await?;
            let summary = pipeline.run_once().await?;
            println!(
                "sync complete: run_id={} fetched={} persisted={} details_unavailable={} reports={}",
                summary.run_id,
                summary.postings_fetched,
                summary.persisted,
                summary.details_degraded,
                summary.reports_dir
            );
        }
        Commands::Dedup => {
            let store = open_store(&config, false).await?;
            let report = deduplicate(store.as_ref()).await?;
            println!(
                "dedup complete: scanned={} groups={} deleted={} failed_groups={}",
                report.postings_scanned, report.duplicate_groups, report.deleted, report.failed_groups
            );
        }
        Commands::Prune { days } => {
            let mut settings = config.load_settings().await?;
            if let Some(days) = days {
                settings.retention.horizon_days = days;
            }
            let store = open_store(&config, false).await?;
            let report = prune(store.as_ref(), Utc::now(), &settings.retention).await?;
            println!(
                "prune complete: cutoff={} examined={} deleted={} failed={}",
                report.cutoff, report.examined, report.deleted, report.failed
            );
            if let Some(err) = report.enumeration_error {
                bail!("prune pass ended early: {err}");
            }
        }
        Commands::Daily(args) => {
            let pipeline = build_pipeline(config, &args).await?;
            let report = run_daily_chain(&pipeline).await?;
            println!(
                "daily chain complete: run_id={} persisted={} deduplicated={} pruned={}",
                report.sync.run_id,
                report.sync.persisted,
                report.dedup.as_ref().map(|d| d.deleted).unwrap_or(0),
                report.prune.deleted
            );
        }
        Commands::Migrate => {
            open_store(&config, false).await?;
            println!("migrations applied");
        }
        Commands::Schedule => {
            let pipeline = Arc::new(build_pipeline(config, &RunArgs::default()).await?);
            let Some(mut sched) = maybe_build_scheduler(pipeline).await? else {
                bail!("scheduler disabled; set VACSIFT_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running; press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}
