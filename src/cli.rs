//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Resumable HTTP download manager.
///
/// Without a subcommand, downloads the given URLs, showing live progress,
/// and optionally saves completed files into `--save-dir`. Interrupted runs
/// pick up where they left off.
#[derive(Parser, Debug)]
#[command(name = "dlmanager")]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// URLs to download
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,

    /// Directory where completed downloads are saved
    #[arg(short = 'o', long, global = true)]
    pub save_dir: Option<PathBuf>,

    /// Replace files that already exist in the save directory
    #[arg(long, global = true)]
    pub overwrite: bool,

    /// Print snapshots as JSON lines instead of progress bars
    #[arg(long)]
    pub json: bool,

    /// Keep state in memory only; nothing survives the process
    #[arg(long, global = true)]
    pub no_persist: bool,

    /// Directory for the state database and partial files
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Maximum simultaneously running transfers (1-256, unbounded by default)
    #[arg(long, global = true, value_parser = clap::value_parser!(u16).range(1..=256))]
    pub max_active: Option<u16>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Read JSON-line commands on stdin and stream events on stdout
    Serve,
}
