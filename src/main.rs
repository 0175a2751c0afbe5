use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use decap::{
    fetch::Source,
    pipeline::{convert_csv, http_client, FeedPipeline, TablePipeline},
    task::ResultCache,
    PipelineConfig,
};
use std::{path::PathBuf, time::Duration};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "decap", version, about = "Asset feed and CSV table ETL")]
struct Cli {
    /// YAML pipeline configuration; defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Revision string recorded in the run summary.
    #[arg(long, global = true)]
    revision: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// extract → transform → write (→ upload) ∥ warehouse insert
    Run,
    /// extract → transform → warehouse insert
    Warehouse,
    /// CSV table: select columns, fill nulls, write flat CSV
    Table,
    /// Transform and load a saved raw payload
    Replay { raw: PathBuf },
    /// Convert a CSV file or URL into a JSON records file
    Convert { csv: Source, json: PathBuf },
    /// Delete expired task cache entries
    CachePrune,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── logging ─────────────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,decap=info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();
    let mut cfg = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(rev) = cli.revision {
        cfg = cfg.with_revision(rev);
    }
    info!(revision = %cfg.revision, "startup");

    if let Err(e) = dispatch(cli.command, cfg).await {
        error!(error = %format!("{:#}", e), "run failed");
        return Err(e);
    }
    Ok(())
}

async fn dispatch(command: Command, cfg: PipelineConfig) -> Result<()> {
    match command {
        Command::Run => {
            let summary = FeedPipeline::new(cfg).await?.run().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Warehouse => {
            let summary = FeedPipeline::new(cfg).await?.run_warehouse().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Table => {
            let summary = TablePipeline::new(cfg)?.run().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Replay { raw } => {
            let summary = FeedPipeline::new(cfg).await?.replay(&raw).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Convert { csv, json } => {
            let rows = convert_csv(&http_client()?, &csv, &json).await?;
            info!(rows, dest = %json.display(), "done");
        }
        Command::CachePrune => {
            // with caching disabled every entry counts as expired
            let ttl = cfg
                .extract
                .cache_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(Duration::ZERO);
            let removed = ResultCache::new(&cfg.cache_dir)?.prune(ttl, Utc::now())?;
            println!("removed {removed} cache entries");
        }
    }
    Ok(())
}
