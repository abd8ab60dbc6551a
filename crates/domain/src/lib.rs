//! # Mailsync Domain
//!
//! Business domain types for mailbox synchronization.
//!
//! This crate contains:
//! - Accounts, detected items and transmission records
//! - Sync requests and the reports returned to callers
//! - `MailSyncError` and the `Result` alias
//! - Configuration structures and domain constants
//!
//! ## Architecture
//! - Depends only on the foundation tier of `mailsync-common`
//! - No I/O; persistence and HTTP live in `mailsync-infra`

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
