//! # Mailsync App
//!
//! Process wiring for the `mailsync` daemon.
//!
//! This crate contains:
//! - Application context (dependency injection)
//! - Health reporting over the store, the workers and the circuit breakers
//! - Main entry point
//!
//! ## Architecture
//! - Depends on `common`, `domain`, `core`, and `infra`
//! - Wires the ports in `core` to the adapters in `infra`

pub mod context;
pub mod utils;

pub use context::AppContext;
pub use utils::health::{ComponentHealth, HealthStatus};
