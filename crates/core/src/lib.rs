//! # Mailsync Core
//!
//! Sync orchestration and delivery logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) for the store, the identity provider, the
//!   remote mailbox API and the sink API
//! - The token lifecycle, change detection, transmission and orchestration
//!   services built on top of them
//!
//! ## Architecture Principles
//! - Only depends on `mailsync-common` and `mailsync-domain`
//! - No database or HTTP code
//! - Every outbound call goes through a [`mailsync_common::ResiliencePolicy`]

pub mod accounts;
pub mod control;
pub mod resilience;
pub mod sync;
pub mod transmission;

pub use accounts::ports::{AccountRepository, IdentityProvider};
pub use accounts::TokenLifecycleManager;
pub use control::{assess_health, SyncControlService, SyncDefaults};
pub use resilience::{build_policy, transmission_backoff, DependencyPolicies};
pub use sync::ports::{ItemRepository, MailboxApi};
pub use sync::{DeltaSyncEngine, PeriodicSchedule, PeriodicSync, SyncMode, SyncOrchestrator};
pub use transmission::ports::{SinkApi, SinkResponse, TransmissionRepository};
pub use transmission::{PipelineSettings, TransmissionPipeline};
