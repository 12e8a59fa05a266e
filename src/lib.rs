//! dlmanager core library
//!
//! This library provides a resumable HTTP download manager engine: a
//! registry of downloads keyed by URL, supervised transfers that survive
//! pauses, network failures and restarts, and coalesced snapshots for a
//! front end.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - SQLite connection and schema management
//! - [`store`] - Persisted download records and the ordered writer task
//! - [`download`] - Registry, transfers, scheduler, publisher and engine
//! - [`humanize`] - Byte and rate formatting for displays

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod db;
pub mod download;
pub mod humanize;
pub mod store;
mod user_agent;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use db::{Database, DbError};
pub use download::{
    AddOutcome, ChannelSink, Download, DownloadEngine, DownloadError, DownloadSnapshot,
    DownloadState, EngineError, EngineSettings, HttpClient, RetryPolicy, SnapshotSink,
};
pub use store::{DownloadRepository, DownloadStore, StoreError};
