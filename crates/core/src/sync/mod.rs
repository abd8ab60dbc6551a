//! Change detection and multi-account sync

pub mod delta;
pub mod orchestrator;
pub mod periodic;
pub mod ports;

pub use delta::{DeltaSyncEngine, SyncMode};
pub use orchestrator::SyncOrchestrator;
pub use periodic::{PeriodicSchedule, PeriodicSync};
pub use ports::{ItemRepository, MailboxApi};
