//! Operations exposed to the presentation layer

pub mod health;
pub mod service;

pub use health::assess_health;
pub use service::{SyncControlService, SyncDefaults};
