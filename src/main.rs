//! # vaultdl
//!
//! Command line front end: parses arguments, wires the http transport, filesystem storage
//! and record store into the download service and renders progress until every item is done.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use vaultdl::application::services::download_service::DownloadService;
use vaultdl::application::services::progress_service::CliProgressTracker;
use vaultdl::domain::ports::progress_tracker::EventSink;
use vaultdl::domain::services::batch::BatchOutcome;
use vaultdl::domain::services::download::FileDownloader;
use vaultdl::infra::config::DirConfig;
use vaultdl::infra::network::http_adapter::HttpAdapter;
use vaultdl::infra::storage::fs_adapter::LocalFsBuilder;
use vaultdl::infra::storage::record_store::JsonRecordStore;
use vaultdl::interfaces::cli::{Cli, Command, download_item};
use vaultdl::utils::logger_init;

#[tokio::main]
async fn main() -> Result<()> {
    human_panic::setup_panic!();
    let cli = Cli::parse();
    logger_init(cli.verbose);

    let dirs = DirConfig::resolve(cli.output_dir.as_deref()).context("Can't resolve download directories")?;
    let engine_config = cli.engine_config();
    engine_config.validate()?;
    let storage = LocalFsBuilder::new().root_path(dirs.download_dir().clone()).build()?;
    let transport = HttpAdapter::new(&cli.http, &cli.http.retry)?;
    let records = Arc::new(JsonRecordStore::new(dirs.records_file()));
    info!(download_dir = %dirs.download_dir().display(), records = %records.path().display(), "Starting.");

    let (sink, rx) = EventSink::channel();
    let tracker = tokio::spawn(CliProgressTracker::new()?.run(rx));
    let engine = FileDownloader::new(Arc::new(transport), Arc::new(storage), engine_config, sink);
    let service = DownloadService::new(engine, records);

    match &cli.command {
        Command::Download { item, title, urls } => {
            service.submit(download_item(*item, title.clone(), urls)).await?;
        }
        Command::Resume => {
            if service.resume_pending().await? == 0 {
                info!("No interrupted downloads to resume.");
            }
        }
    }

    let outcomes = tokio::select! {
        outcomes = service.join_all() => outcomes?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping downloads. Partial data is kept for the next run.");
            service.shutdown().await;
            service.join_all().await?
        }
    };
    // Dropping the service closes the event channel and ends the tracker.
    drop(service);
    tracker.await.context("Progress tracker panicked")?;

    let failed = outcomes
        .iter()
        .filter(|(_, outcome)| matches!(outcome, BatchOutcome::Failed { .. }))
        .count();
    if failed > 0 {
        bail!("{failed} item(s) failed to download, run the same command again to resume");
    }
    Ok(())
}
