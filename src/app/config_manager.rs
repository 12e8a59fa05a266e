//! Configuration lifecycle: load file config, merge CLI, resolve engine settings.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use dlmanager_core::{EngineSettings, RetryPolicy};

use crate::app_config::{FileConfig, load_default_file_config, resolve_default_state_dir};
use crate::cli::Cli;

/// Name of the SQLite file inside the state directory.
const STATE_DB_FILE: &str = "state.db";

/// Partial artifacts live in this subdirectory of the state directory.
const PARTS_DIR: &str = "parts";

/// Resolved configuration bundle used by the runtime.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
    pub(crate) state_dir: PathBuf,
    pub(crate) save_dir: Option<PathBuf>,
    pub(crate) log_level: &'static str,
    pub(crate) settings: EngineSettings,
}

impl ResolvedConfig {
    /// Path of the state database.
    pub(crate) fn database_path(&self) -> PathBuf {
        self.state_dir.join(STATE_DB_FILE)
    }
}

/// Loads the default config file and merges the CLI over it.
pub(crate) fn resolve_config(cli: &Cli) -> Result<ResolvedConfig> {
    let loaded = load_default_file_config()?;
    Ok(merge(cli, loaded.config.as_ref()))
}

/// CLI flags win over file values; file values win over built-in defaults.
pub(crate) fn merge(cli: &Cli, file: Option<&FileConfig>) -> ResolvedConfig {
    let state_dir = cli
        .state_dir
        .clone()
        .or_else(|| file.and_then(|f| f.state_dir.clone()))
        .unwrap_or_else(resolve_default_state_dir);
    let save_dir = cli
        .save_dir
        .clone()
        .or_else(|| file.and_then(|f| f.save_dir.clone()));

    let mut settings = EngineSettings::new(state_dir.join(PARTS_DIR));
    settings.max_active = cli
        .max_active
        .or_else(|| file.and_then(|f| f.max_active))
        .map(usize::from);

    if let Some(file) = file {
        if let Some(secs) = file.connect_timeout_secs {
            settings.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.read_timeout_secs {
            settings.read_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = file.publish_interval_ms {
            settings.publish_interval = Duration::from_millis(ms);
        }
        if file.retry_base_delay_ms.is_some() || file.retry_max_delay_ms.is_some() {
            let defaults = RetryPolicy::default();
            let base = file
                .retry_base_delay_ms
                .map_or(defaults.base_delay(), Duration::from_millis);
            let max = file
                .retry_max_delay_ms
                .map_or(defaults.max_delay(), Duration::from_millis);
            settings.retry_policy = RetryPolicy::new(base, max.max(base));
        }
    }

    ResolvedConfig {
        state_dir,
        save_dir,
        log_level: resolve_default_log_level(cli, file),
        settings,
    }
}

/// Priority: `-q` > `-v`/`-vv` > config `verbosity` > info.
///
/// `RUST_LOG` still overrides the result when tracing is initialised.
pub(crate) fn resolve_default_log_level(cli: &Cli, file: Option<&FileConfig>) -> &'static str {
    if cli.quiet {
        return "error";
    }
    match cli.verbose {
        0 => file
            .and_then(|f| f.verbosity)
            .map_or("info", |v| v.log_level()),
        1 => "debug",
        _ => "trace",
    }
}
