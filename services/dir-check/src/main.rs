//! AFD directory-check daemon.
//!
//! Watches configured spool directories and feeds arriving files through
//! the ingestion pipeline into the staging pool, splitting WMO bulletin
//! containers where configured.

mod config;
mod watcher;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use afd_common::events::TracingEventSink;
use config::DirCheckConfig;
use ingestion::pipeline::IngestContext;
use watcher::DirWatcher;

#[derive(Parser, Debug)]
#[command(name = "dir-check")]
#[command(about = "AFD source directory watcher and ingestion daemon")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/afd/dir-check.yaml")]
    config: String,

    /// Work directory override (otherwise config or AFD_WORK_DIR)
    #[arg(short, long)]
    work_dir: Option<PathBuf>,

    /// Scan every directory once and exit (vs continuous watching)
    #[arg(long)]
    once: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting dir-check");

    let config = DirCheckConfig::from_yaml(args.config.as_ref())?;
    let work_dir = match args.work_dir {
        Some(dir) => dir,
        None => config.work_dir()?,
    };
    let entries = config.entries()?;
    info!(
        work_dir = %work_dir.display(),
        directories = entries.len(),
        bulletins = config.bulletins.len(),
        "Loaded configuration"
    );

    let mut ctx = IngestContext::new(
        &work_dir,
        Box::new(TracingEventSink),
        config.bulletins.clone(),
        config.reports.clone(),
    )?;
    ctx.default_transfer_timeout = config.default_transfer_timeout;
    ctx.maintainer = config.maintainer();

    let scan_interval = Duration::from_secs(config.scan_interval_secs);
    let mut watcher = DirWatcher::new(ctx, entries, scan_interval);

    if args.once {
        let published = watcher.scan_once()?;
        info!(published, "Single scan finished");
        return Ok(());
    }

    watcher.run().await
}
