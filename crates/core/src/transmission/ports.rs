//! Port interfaces for the transmission queue and the sink

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailsync_domain::{Priority, Result, TransmissionRecord, TransmissionStatus};

/// Trait for persisting transmission records
#[async_trait]
pub trait TransmissionRepository: Send + Sync {
    // Core CRUD
    /// Insert a record unless its item already has a non-terminal one.
    ///
    /// Returns `false` when the insert was skipped.
    async fn insert(&self, record: &TransmissionRecord) -> Result<bool>;

    /// Get a record by its ID
    async fn get(&self, id: &str) -> Result<Option<TransmissionRecord>>;

    /// The non-terminal record of an item, if any
    async fn find_active_for_item(&self, item_id: &str) -> Result<Option<TransmissionRecord>>;

    /// Write back every mutable field of a record
    async fn update(&self, record: &TransmissionRecord) -> Result<()>;

    /// Replace the payload of the item's `pending`/`retrying` record and
    /// raise its priority to `priority` when that is higher.
    ///
    /// Returns `false` when the item has no such record; an `in_progress`
    /// record is never touched.
    async fn refresh_queued(
        &self,
        item_id: &str,
        payload: &serde_json::Value,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    // State transitions
    /// Atomically move a ready record to `in_progress`.
    ///
    /// Succeeds only from `pending`, or from `retrying` once `next_retry_at`
    /// is at or before `now`. Exactly one of any number of concurrent callers
    /// gets `true`.
    async fn claim(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Move a `pending`/`retrying` record to `cancelled` with `reason` as its
    /// last error. Returns `false` if it was in any other status.
    async fn cancel(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Put up to `limit` `failed` records back to `pending` with a fresh
    /// retry budget; returns the records that were reset.
    async fn reset_failed(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<TransmissionRecord>>;

    /// Return `in_progress` records claimed before `started_before` to
    /// `pending` (their worker died). Returns how many were recovered.
    async fn recover_stale(&self, started_before: DateTime<Utc>) -> Result<u64>;

    // Queries
    /// Claimable records in drain order: priority descending, then oldest
    /// first
    async fn list_ready(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        account_id: Option<&str>,
    ) -> Result<Vec<TransmissionRecord>>;

    /// Record counts per status
    async fn count_by_status(&self) -> Result<BTreeMap<TransmissionStatus, u64>>;

    /// Record counts per priority
    async fn count_by_priority(&self) -> Result<BTreeMap<Priority, u64>>;

    // Cleanup
    /// Delete terminal records last updated before `cutoff`
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Raw answer from the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkResponse {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header
    pub retry_after: Option<Duration>,
}

impl SinkResponse {
    /// Response without a `Retry-After` header
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into(), retry_after: None }
    }

    /// 2xx
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// External sink service
#[async_trait]
pub trait SinkApi: Send + Sync {
    /// Post `payload` to `endpoint` (the configured default when `None`).
    ///
    /// Any HTTP response is `Ok`; only transport failures are errors.
    /// `idempotency_key` is stable across retries of the same record.
    async fn send(
        &self,
        payload: &serde_json::Value,
        endpoint: Option<&str>,
        idempotency_key: &str,
    ) -> Result<SinkResponse>;
}
