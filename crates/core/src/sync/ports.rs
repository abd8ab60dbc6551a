//! Port interfaces for change detection

use std::collections::HashMap;

use async_trait::async_trait;
use mailsync_domain::{DeltaBatch, Item, ProcessingStatus, Result};

/// Remote mailbox API
#[async_trait]
pub trait MailboxApi: Send + Sync {
    /// Fetch every change since `cursor` (all messages when `None`) for
    /// `mailbox`, following pagination until the provider hands out the
    /// next cursor.
    async fn fetch_delta(
        &self,
        mailbox: &str,
        access_token: &str,
        cursor: Option<&str>,
    ) -> Result<DeltaBatch>;
}

/// Trait for persisting detected items
#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Look up existing items of one account by remote key
    async fn find_by_remote_keys(
        &self,
        account_id: &str,
        remote_keys: &[String],
    ) -> Result<HashMap<String, Item>>;

    /// Insert or update items keyed by `(account_id, remote_key)`.
    ///
    /// All-or-nothing: either every item is stored or none is.
    async fn upsert_batch(&self, items: &[Item]) -> Result<()>;

    /// Get an item by its ID
    async fn get(&self, id: &str) -> Result<Option<Item>>;

    /// Update the processing status (and error) of an item
    async fn set_processing_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Number of items stored for an account
    async fn count_for_account(&self, account_id: &str) -> Result<u64>;

    /// Items in `status`, oldest first, optionally for one account only
    async fn list_by_status(
        &self,
        account_id: Option<&str>,
        status: ProcessingStatus,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Item>>;

    async fn count_by_status(&self, account_id: Option<&str>, status: ProcessingStatus) -> Result<u64>;
}
