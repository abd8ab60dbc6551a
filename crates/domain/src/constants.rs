//! Application constants
//!
//! Centralized location for domain-level constants shared by the core
//! services and the adapters.

// Dependency names used as circuit breaker keys
pub const DEPENDENCY_MAILBOX: &str = "remote-mailbox-api";
pub const DEPENDENCY_IDENTITY: &str = "identity-provider";
pub const DEPENDENCY_SINK: &str = "sink-api";

// Token lifecycle
pub const DEFAULT_TOKEN_SAFETY_WINDOW_SECS: u64 = 300;

// Health checks
pub const SYNC_OVERDUE_HOURS: i64 = 24;

// Orchestration
pub const DEFAULT_MAX_CONCURRENT_SYNCS: usize = 5;
pub const DEFAULT_ERROR_BACKOFF_SECS: u64 = 60;

// Bulk account operations
pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;
pub const MAX_BATCH_CONCURRENCY: usize = 20;

// Item listings
pub const MAX_ITEM_PAGE_SIZE: usize = 1000;

// Transmission pipeline
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_DRAIN_BATCH_SIZE: usize = 50;
pub const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 60;
pub const DEFAULT_RETRY_MAX_DELAY_SECS: u64 = 1800;
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const CANCELLED_BY_OPERATOR: &str = "cancelled by operator";

// Remote mailbox paging guard
pub const MAX_DELTA_PAGES: usize = 200;
