//! Process runtime: tracing, engine bootstrap, batch and serve modes.

use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dlmanager_core::download::DownloadState;
use dlmanager_core::store::DownloadStore;
use dlmanager_core::{AddOutcome, ChannelSink, Database, Download, DownloadEngine, EngineError};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::config_manager::{self, ResolvedConfig};
use crate::app::ipc::{self, Event, EventSink};
use crate::app::progress_manager::ProgressRenderer;
use crate::cli::{Cli, Command};

pub(crate) async fn run() -> Result<ProcessExit> {
    let cli = Cli::parse();
    let resolved = config_manager::resolve_config(&cli)?;
    init_tracing(resolved.log_level, no_color_env_requested());

    debug!(?cli, "CLI arguments parsed");
    info!(state_dir = %resolved.state_dir.display(), "dlmanager starting");

    let store = open_store(&resolved, cli.no_persist).await?;
    match cli.command {
        Some(Command::Serve) => serve(resolved, store).await,
        None => batch(&cli, resolved, store).await,
    }
}

pub(crate) fn no_color_env_requested() -> bool {
    std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty())
}

/// Logs go to stderr; stdout carries JSON events.
pub(crate) fn init_tracing(default_level: &str, no_color: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_env_filter(filter)
        .try_init();
}

async fn open_store(resolved: &ResolvedConfig, no_persist: bool) -> Result<DownloadStore> {
    let db = if no_persist {
        debug!("using in-memory state");
        Database::new_in_memory().await?
    } else {
        std::fs::create_dir_all(&resolved.state_dir).with_context(|| {
            format!(
                "Failed to create state directory '{}'",
                resolved.state_dir.display()
            )
        })?;
        let path = resolved.database_path();
        Database::new(&path)
            .await
            .with_context(|| format!("Failed to open state database '{}'", path.display()))?
    };
    Ok(DownloadStore::new(db))
}

async fn serve(resolved: ResolvedConfig, store: DownloadStore) -> Result<ProcessExit> {
    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let writer = tokio::spawn(ipc::write_events(rx, tokio::io::stdout()));

    let engine = DownloadEngine::start(
        resolved.settings,
        Arc::new(store),
        Arc::new(EventSink::new(tx.clone())),
    )
    .await
    .context("Failed to start download engine")?;
    let save_dir = resolved.save_dir.unwrap_or_else(|| PathBuf::from("."));

    let stdin = BufReader::new(tokio::io::stdin());
    let outcome = tokio::select! {
        result = ipc::serve_commands(&engine, stdin, &tx, &save_dir) => {
            info!("command stream closed");
            result.context("Failed to read commands")
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    };

    engine.shutdown().await;
    drop(engine);
    drop(tx);
    match writer.await {
        Ok(Err(error)) => warn!(error = %error, "failed to write events"),
        Err(error) => warn!(error = %error, "event writer ended abnormally"),
        Ok(Ok(())) => {}
    }
    outcome.map(|()| ProcessExit::Success)
}

async fn batch(cli: &Cli, resolved: ResolvedConfig, store: DownloadStore) -> Result<ProcessExit> {
    let (sink, mut snapshots) = ChannelSink::channel();
    let engine = DownloadEngine::start(resolved.settings, Arc::new(store), Arc::new(sink))
        .await
        .context("Failed to start download engine")?;

    for url in &cli.urls {
        match engine.add(url) {
            AddOutcome::Added => debug!(url = %url, "queued"),
            AddOutcome::AlreadyPresent => {
                if engine.get(url).is_some_and(|r| r.state == DownloadState::Paused) {
                    engine.set_paused(url, false)?;
                    info!(url = %url, "resuming paused download");
                }
            }
            AddOutcome::Rejected { reason } => warn!(url = %url, %reason, "skipping invalid URL"),
        }
    }

    if engine.snapshot().is_empty() {
        info!("Nothing to download. Pass URLs as arguments, or run `dlmanager serve`.");
        engine.shutdown().await;
        return Ok(ProcessExit::Success);
    }

    let json = cli.json;
    let use_bars = !json && !cli.quiet && io::stderr().is_terminal();
    let render = tokio::spawn(async move {
        let mut renderer = if use_bars {
            ProgressRenderer::new()
        } else {
            ProgressRenderer::hidden()
        };
        while let Some(snapshot) = snapshots.recv().await {
            if json {
                let event = Event::UpdateDownloads { data: snapshot };
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(error) => warn!(error = %error, "failed to encode snapshot"),
                }
            } else {
                renderer.render(&snapshot);
            }
        }
        renderer.finish();
    });

    engine.front_end_ready();
    let interrupted = tokio::select! {
        () = engine.wait_until(batch_finished) => false,
        _ = tokio::signal::ctrl_c() => true,
    };

    let mut save_failures = 0usize;
    if !interrupted && let Some(dir) = &resolved.save_dir {
        save_failures = save_completed(&engine, dir, cli.overwrite).await;
    }

    let records = engine.snapshot();
    engine.shutdown().await;
    drop(engine);
    let _ = render.await;

    if interrupted {
        warn!("Interrupted. Run again to resume.");
        return Ok(ProcessExit::Failure);
    }

    let completed = records.iter().filter(|r| r.complete).count();
    let failed = records
        .iter()
        .filter(|r| r.state == DownloadState::Failed)
        .count()
        + save_failures;
    info!(completed, failed, total = records.len(), "Download complete");
    Ok(determine_exit_outcome(completed, failed))
}

/// Batch runs end once nothing is left moving; paused entries wait for a later run.
fn batch_finished(records: &[Download]) -> bool {
    records
        .iter()
        .all(|r| r.state.is_settled() || r.state == DownloadState::Paused)
}

/// Saves every complete download into `dir`; returns the number of failures.
async fn save_completed(engine: &DownloadEngine, dir: &Path, overwrite: bool) -> usize {
    let mut failures = 0;
    for record in engine.snapshot().into_iter().filter(|r| r.complete) {
        let result = match engine.default_save_path(&record.url, dir) {
            Ok(destination) => engine.save(&record.url, &destination, overwrite).await,
            Err(error) => Err(error),
        };
        match result {
            Ok(path) => info!(url = %record.url, path = %path.display(), "saved"),
            Err(EngineError::DestinationExists { path }) => {
                warn!(
                    url = %record.url,
                    path = %path.display(),
                    "destination exists; pass --overwrite to replace it"
                );
                failures += 1;
            }
            Err(error) => {
                warn!(url = %record.url, error = %error, "save failed");
                failures += 1;
            }
        }
    }
    failures
}

/// Determines the process exit outcome from completed and failed download counts.
pub(crate) fn determine_exit_outcome(completed: usize, failed: usize) -> ProcessExit {
    if failed == 0 {
        ProcessExit::Success
    } else if completed > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
