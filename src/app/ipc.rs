//! JSON-lines host boundary for `dlmanager serve`.
//!
//! Commands arrive one per line on stdin; every command is answered with a
//! `commandResult` event, and snapshots are pushed as `updateDownloads`
//! events once the front end has sent `frontEndReady`.

use std::path::{Path, PathBuf};

use dlmanager_core::{AddOutcome, DownloadEngine, DownloadSnapshot, EngineError, SnapshotSink};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A command sent by the front end.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub(crate) enum Command {
    Add {
        url: String,
    },
    Delete {
        url: String,
    },
    Pause {
        url: String,
        paused: bool,
    },
    Save {
        url: String,
        #[serde(default)]
        overwrite: bool,
        #[serde(default)]
        path: Option<PathBuf>,
    },
    FrontEndReady,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Delete { .. } => "delete",
            Self::Pause { .. } => "pause",
            Self::Save { .. } => "save",
            Self::FrontEndReady => "frontEndReady",
        }
    }

    fn url(&self) -> Option<&str> {
        match self {
            Self::Add { url }
            | Self::Delete { url }
            | Self::Pause { url, .. }
            | Self::Save { url, .. } => Some(url),
            Self::FrontEndReady => None,
        }
    }
}

/// An event pushed to the front end.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub(crate) enum Event {
    UpdateDownloads {
        data: Vec<DownloadSnapshot>,
    },
    CommandResult {
        cmd: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(rename = "errorKind", skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
    },
}

impl Event {
    fn result(cmd: &Command, outcome: Result<(), (String, &'static str)>) -> Self {
        let (ok, error, error_kind) = match outcome {
            Ok(()) => (true, None, None),
            Err((message, kind)) => (false, Some(message), Some(kind.to_string())),
        };
        Self::CommandResult {
            cmd: cmd.name().to_string(),
            url: cmd.url().map(str::to_string),
            ok,
            error,
            error_kind,
        }
    }

    fn parse_error(message: String) -> Self {
        Self::CommandResult {
            cmd: "unknown".to_string(),
            url: None,
            ok: false,
            error: Some(message),
            error_kind: Some("badCommand".to_string()),
        }
    }
}

/// Snapshot sink that wraps each snapshot in an `updateDownloads` event.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }
}

impl SnapshotSink for EventSink {
    fn publish(&self, snapshot: &[DownloadSnapshot]) {
        let _ = self.tx.send(Event::UpdateDownloads {
            data: snapshot.to_vec(),
        });
    }
}

fn engine_failure(error: &EngineError) -> (String, &'static str) {
    (error.to_string(), error.kind())
}

/// Runs one command against the engine and builds its reply.
pub(crate) async fn handle_command(
    engine: &DownloadEngine,
    command: &Command,
    save_dir: &Path,
) -> Event {
    let outcome = match command {
        Command::Add { url } => match engine.add(url) {
            AddOutcome::Added | AddOutcome::AlreadyPresent => Ok(()),
            AddOutcome::Rejected { reason } => Err((reason, "invalidUrl")),
        },
        Command::Delete { url } => engine.delete(url).await.map_err(|e| engine_failure(&e)),
        Command::Pause { url, paused } => engine
            .set_paused(url, *paused)
            .map_err(|e| engine_failure(&e)),
        Command::Save {
            url,
            overwrite,
            path,
        } => {
            let destination = match path {
                Some(path) => Ok(path.clone()),
                None => engine.default_save_path(url, save_dir),
            };
            match destination {
                Ok(destination) => engine
                    .save(url, &destination, *overwrite)
                    .await
                    .map(|_| ())
                    .map_err(|e| engine_failure(&e)),
                Err(error) => Err(engine_failure(&error)),
            }
        }
        Command::FrontEndReady => {
            engine.front_end_ready();
            Ok(())
        }
    };
    Event::result(command, outcome)
}

/// Reads commands until EOF, replying through `events`.
pub(crate) async fn serve_commands<R>(
    engine: &DownloadEngine,
    input: R,
    events: &mpsc::UnboundedSender<Event>,
    save_dir: &Path,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<Command>(line) {
            Ok(command) => {
                debug!(cmd = command.name(), url = ?command.url(), "command received");
                handle_command(engine, &command, save_dir).await
            }
            Err(error) => {
                warn!(error = %error, "ignoring malformed command");
                Event::parse_error(error.to_string())
            }
        };
        if events.send(reply).is_err() {
            break;
        }
    }
    Ok(())
}

/// Writes events as JSON lines until every sender is dropped.
pub(crate) async fn write_events<W>(
    mut rx: mpsc::UnboundedReceiver<Event>,
    mut out: W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = rx.recv().await {
        let mut line = serde_json::to_vec(&event).map_err(std::io::Error::other)?;
        line.push(b'\n');
        out.write_all(&line).await?;
        out.flush().await?;
    }
    Ok(())
}
