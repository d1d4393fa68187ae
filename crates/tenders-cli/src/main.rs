use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tenders_core::{Source, StatusFilter, TenderFilters};
use tenders_sync::{
    maybe_build_scheduler, open_store, IngestPipeline, SyncConfig, TenderService,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "tenders-cli")]
#[command(about = "Kenyan public tender ingestion and query tool")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingestion cycle across all sources.
    Sync,
    /// Serve the JSON read API.
    Serve,
    /// Run ingestion on the configured cron schedule until interrupted.
    Schedule,
    /// Print aggregate counts.
    Stats,
    /// Print formatted tenders matching the given filters.
    Query {
        #[arg(long)]
        status: Option<StatusFilter>,
        #[arg(long)]
        source: Option<Source>,
        #[arg(long)]
        entity: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        days_remaining: Option<i64>,
    },
    /// Print tenders not yet handed to downstream consumers.
    Unprocessed,
    /// Flag a stored tender as processed.
    MarkProcessed { id: i64 },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("TENDERS_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().compact().with_writer(std::io::stderr)))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let report = tenders_sync::run_sync_once_from_env().await?;
            for source in report.sources() {
                println!(
                    "{}: fetched={} parsed={} inserted={} updated={} unchanged={} failed={}",
                    source.source,
                    source.fetched,
                    source.parsed,
                    source.inserted,
                    source.updated,
                    source.unchanged,
                    source.failed
                );
            }
            if let Some(dir) = &report.reports_dir {
                println!("reports={dir}");
            }
        }
        Commands::Serve => tenders_web::serve_from_env().await?,
        Commands::Schedule => {
            let mut config = SyncConfig::from_env();
            config.scheduler_enabled = true;
            let store = open_store(&config).await?;
            let result = run_scheduler(config, store.clone()).await;
            store.close().await;
            result?;
        }
        Commands::Stats => {
            with_service(|service| async move { print_json(&service.stats().await?) }).await?
        }
        Commands::Query {
            status,
            source,
            entity,
            category,
            days_remaining,
        } => {
            let filters = TenderFilters {
                status,
                category,
                entity,
                days_remaining,
                source,
            };
            with_service(|service| async move { print_json(&service.query(&filters).await?) })
                .await?
        }
        Commands::Unprocessed => {
            with_service(|service| async move { print_json(&service.list_unprocessed().await?) })
                .await?
        }
        Commands::MarkProcessed { id } => {
            with_service(|service| async move {
                if !service.mark_processed(id).await? {
                    bail!("no tender with id {id}");
                }
                println!("tender {id} marked processed");
                anyhow::Ok(())
            })
            .await?
        }
    }

    Ok(())
}

async fn run_scheduler(config: SyncConfig, store: Arc<tenders_storage::TenderStore>) -> Result<()> {
    let pipeline = Arc::new(IngestPipeline::new(config, store)?);
    let Some(mut sched) = maybe_build_scheduler(pipeline).await? else {
        return Ok(());
    };
    sched.start().await?;
    info!("scheduler started; waiting for ctrl-c");
    tokio::signal::ctrl_c().await?;
    sched.shutdown().await?;
    Ok(())
}

/// Open the configured store, run `f` against it, and close the pool either way.
async fn with_service<F, Fut>(f: F) -> Result<()>
where
    F: FnOnce(TenderService) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let config = SyncConfig::from_env();
    let store = open_store(&config).await?;
    let result = f(TenderService::new(store.clone())).await;
    store.close().await;
    result
}
