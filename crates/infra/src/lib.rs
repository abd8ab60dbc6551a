//! # Mailsync Infrastructure
//!
//! Infrastructure implementations of the core ports.
//!
//! This crate contains:
//! - The SQLite store (rusqlite + r2d2) for accounts, items and
//!   transmission records
//! - Configuration loading and tracing setup
//! - Microsoft Graph mailbox and identity adapters, and the HTTP sink
//! - Background workers for periodic sync and queue draining
//!
//! ## Architecture
//! - Implements traits defined in `mailsync-core`
//! - Contains all "impure" code (I/O, network, spawned tasks)

pub mod config;
pub mod database;
pub mod errors;
pub mod http;
pub mod integrations;
pub mod observability;
pub mod workers;

// Re-export commonly used items
pub use database::{
    DbManager, SqliteAccountRepository, SqliteItemRepository, SqliteTransmissionRepository,
};
pub use errors::InfraError;
pub use http::HttpClient;
pub use integrations::{GraphIdentity, GraphMailbox, HttpSink};
pub use observability::init_tracing;
pub use workers::{SyncScheduler, TransmissionWorker, WorkerError};
