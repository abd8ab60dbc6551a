//! In-memory implementations of the store ports
//!
//! Each fake keeps its state behind an `Arc<Mutex<..>>` so clones share it;
//! tests keep one clone for assertions and hand another to the services.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailsync_core::{AccountRepository, ItemRepository, TransmissionRepository};
use mailsync_domain::{
    Account, AccountStatus, Credential, Item, MailSyncError, Priority, ProcessingStatus,
    Result as DomainResult, TransmissionRecord, TransmissionStatus,
};
use parking_lot::Mutex;

// ============================================================================
// Accounts
// ============================================================================

/// In-memory `AccountRepository` that also logs every cursor write.
#[derive(Default, Clone)]
pub struct InMemoryAccounts {
    accounts: Arc<Mutex<BTreeMap<String, Account>>>,
    cursor_log: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl InMemoryAccounts {
    pub fn insert(&self, account: Account) {
        self.accounts.lock().insert(account.id.clone(), account);
    }

    pub fn snapshot(&self, id: &str) -> Account {
        self.accounts.lock().get(id).cloned().expect("account exists")
    }

    /// Cursor values written for `id`, in write order (`None` = reset)
    pub fn cursor_history(&self, id: &str) -> Vec<Option<String>> {
        self.cursor_log
            .lock()
            .iter()
            .filter(|(account_id, _)| account_id == id)
            .map(|(_, cursor)| cursor.clone())
            .collect()
    }

    /// Mutate a stored account in place, e.g. to simulate a concurrent writer
    pub fn modify(&self, id: &str, f: impl FnOnce(&mut Account)) {
        if let Some(account) = self.accounts.lock().get_mut(id) {
            f(account);
        }
    }

    fn with_account<T>(&self, id: &str, f: impl FnOnce(&mut Account) -> T) -> DomainResult<T> {
        let mut accounts = self.accounts.lock();
        let account =
            accounts.get_mut(id).ok_or_else(|| MailSyncError::NotFound(format!("account {id}")))?;
        Ok(f(account))
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccounts {
    async fn get(&self, id: &str) -> DomainResult<Option<Account>> {
        Ok(self.accounts.lock().get(id).cloned())
    }

    async fn list(&self) -> DomainResult<Vec<Account>> {
        Ok(self.accounts.lock().values().cloned().collect())
    }

    async fn list_by_user(&self, user_id: &str) -> DomainResult<Vec<Account>> {
        Ok(self.accounts.lock().values().filter(|a| a.user_id == user_id).cloned().collect())
    }

    async fn list_active_sync_enabled(&self) -> DomainResult<Vec<Account>> {
        Ok(self
            .accounts
            .lock()
            .values()
            .filter(|a| a.status == AccountStatus::Active && a.sync_enabled)
            .cloned()
            .collect())
    }

    async fn list_expiring(&self, before: DateTime<Utc>) -> DomainResult<Vec<Account>> {
        Ok(self
            .accounts
            .lock()
            .values()
            .filter(|a| a.status == AccountStatus::Active)
            .filter(|a| a.credential.as_ref().is_some_and(|c| c.expires_at <= before))
            .cloned()
            .collect())
    }

    async fn save(&self, account: &Account) -> DomainResult<()> {
        self.insert(account.clone());
        Ok(())
    }

    async fn update_credential(&self, id: &str, credential: &Credential) -> DomainResult<()> {
        self.with_account(id, |account| {
            account.credential = Some(credential.clone());
            account.error_count = 0;
            account.last_error = None;
        })
    }

    async fn record_error(
        &self,
        id: &str,
        error: &str,
        status: Option<AccountStatus>,
    ) -> DomainResult<u32> {
        self.with_account(id, |account| {
            account.error_count += 1;
            account.last_error = Some(error.to_string());
            if let Some(status) = status {
                account.status = status;
            }
            account.error_count
        })
    }

    async fn clear_errors(&self, id: &str) -> DomainResult<()> {
        self.with_account(id, |account| {
            account.error_count = 0;
            account.last_error = None;
        })
    }

    async fn set_activation(
        &self,
        id: &str,
        status: AccountStatus,
        sync_enabled: bool,
    ) -> DomainResult<()> {
        self.with_account(id, |account| {
            account.status = status;
            account.sync_enabled = sync_enabled;
        })
    }

    async fn advance_cursor(
        &self,
        id: &str,
        expected_version: i64,
        cursor: Option<&str>,
        synced_at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let advanced = self.with_account(id, |account| {
            if account.cursor_version != expected_version {
                return false;
            }
            account.delta_cursor = cursor.map(str::to_string);
            account.cursor_version += 1;
            account.last_sync_at = Some(synced_at);
            true
        })?;
        if advanced {
            self.cursor_log.lock().push((id.to_string(), cursor.map(str::to_string)));
        }
        Ok(advanced)
    }

    async fn touch_last_sync(&self, id: &str, synced_at: DateTime<Utc>) -> DomainResult<()> {
        self.with_account(id, |account| account.last_sync_at = Some(synced_at))
    }

    async fn reset_cursor(&self, id: &str) -> DomainResult<i64> {
        let version = self.with_account(id, |account| {
            account.delta_cursor = None;
            account.cursor_version += 1;
            account.cursor_version
        })?;
        self.cursor_log.lock().push((id.to_string(), None));
        Ok(version)
    }
}

// ============================================================================
// Items
// ============================================================================

/// In-memory `ItemRepository` keyed by `(account_id, remote_key)`.
#[derive(Default, Clone)]
pub struct InMemoryItems {
    items: Arc<Mutex<HashMap<(String, String), Item>>>,
    fail_next_upsert: Arc<AtomicBool>,
}

impl InMemoryItems {
    /// Make the next `upsert_batch` fail without storing anything
    pub fn fail_next_upsert(&self) {
        self.fail_next_upsert.store(true, Ordering::SeqCst);
    }

    pub fn all_for(&self, account_id: &str) -> Vec<Item> {
        let mut items: Vec<Item> =
            self.items.lock().values().filter(|i| i.account_id == account_id).cloned().collect();
        items.sort_by(|a, b| a.remote_key.cmp(&b.remote_key));
        items
    }

    pub fn by_id(&self, id: &str) -> Option<Item> {
        self.items.lock().values().find(|i| i.id == id).cloned()
    }
}

#[async_trait]
impl ItemRepository for InMemoryItems {
    async fn find_by_remote_keys(
        &self,
        account_id: &str,
        remote_keys: &[String],
    ) -> DomainResult<HashMap<String, Item>> {
        let items = self.items.lock();
        Ok(remote_keys
            .iter()
            .filter_map(|key| {
                items
                    .get(&(account_id.to_string(), key.clone()))
                    .map(|item| (key.clone(), item.clone()))
            })
            .collect())
    }

    async fn upsert_batch(&self, batch: &[Item]) -> DomainResult<()> {
        if self.fail_next_upsert.swap(false, Ordering::SeqCst) {
            return Err(MailSyncError::Database("disk I/O error".into()));
        }
        let mut items = self.items.lock();
        for item in batch {
            items.insert((item.account_id.clone(), item.remote_key.clone()), item.clone());
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Item>> {
        Ok(self.by_id(id))
    }

    async fn set_processing_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> DomainResult<()> {
        let mut items = self.items.lock();
        if let Some(item) = items.values_mut().find(|i| i.id == id) {
            item.processing_status = status;
            item.processing_error = error.map(str::to_string);
        }
        Ok(())
    }

    async fn count_for_account(&self, account_id: &str) -> DomainResult<u64> {
        Ok(self.items.lock().values().filter(|i| i.account_id == account_id).count() as u64)
    }

    async fn list_by_status(
        &self,
        account_id: Option<&str>,
        status: ProcessingStatus,
        limit: usize,
        offset: usize,
    ) -> DomainResult<Vec<Item>> {
        let mut matching: Vec<Item> = self
            .items
            .lock()
            .values()
            .filter(|i| i.processing_status == status)
            .filter(|i| account_id.map_or(true, |id| i.account_id == id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_by_status(
        &self,
        account_id: Option<&str>,
        status: ProcessingStatus,
    ) -> DomainResult<u64> {
        Ok(self.list_by_status(account_id, status, usize::MAX, 0).await?.len() as u64)
    }
}

// ============================================================================
// Transmissions
// ============================================================================

/// In-memory `TransmissionRepository`; the mutex makes `claim` atomic.
#[derive(Default, Clone)]
pub struct InMemoryTransmissions {
    records: Arc<Mutex<BTreeMap<String, TransmissionRecord>>>,
}

impl InMemoryTransmissions {
    pub fn record(&self, id: &str) -> TransmissionRecord {
        self.records.lock().get(id).cloned().expect("record exists")
    }

    pub fn all(&self) -> Vec<TransmissionRecord> {
        self.records.lock().values().cloned().collect()
    }

    pub fn put(&self, record: TransmissionRecord) {
        self.records.lock().insert(record.id.clone(), record);
    }
}

fn is_ready(record: &TransmissionRecord, now: DateTime<Utc>) -> bool {
    record.is_ready(now)
}

#[async_trait]
impl TransmissionRepository for InMemoryTransmissions {
    async fn insert(&self, record: &TransmissionRecord) -> DomainResult<bool> {
        let mut records = self.records.lock();
        if records.values().any(|r| r.item_id == record.item_id && !r.status.is_terminal()) {
            return Ok(false);
        }
        records.insert(record.id.clone(), record.clone());
        Ok(true)
    }

    async fn get(&self, id: &str) -> DomainResult<Option<TransmissionRecord>> {
        Ok(self.records.lock().get(id).cloned())
    }

    async fn find_active_for_item(&self, item_id: &str) -> DomainResult<Option<TransmissionRecord>> {
        Ok(self
            .records
            .lock()
            .values()
            .find(|r| r.item_id == item_id && !r.status.is_terminal())
            .cloned())
    }

    async fn update(&self, record: &TransmissionRecord) -> DomainResult<()> {
        self.put(record.clone());
        Ok(())
    }

    async fn refresh_queued(
        &self,
        item_id: &str,
        payload: &serde_json::Value,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let mut records = self.records.lock();
        let queued = records.values_mut().find(|r| {
            r.item_id == item_id
                && matches!(r.status, TransmissionStatus::Pending | TransmissionStatus::Retrying)
        });
        match queued {
            Some(record) => {
                record.payload = payload.clone();
                if priority.rank() > record.priority.rank() {
                    record.priority = priority;
                }
                record.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn claim(&self, id: &str, now: DateTime<Utc>) -> DomainResult<bool> {
        let mut records = self.records.lock();
        match records.get_mut(id) {
            Some(record) if is_ready(record, now) => {
                record.status = TransmissionStatus::InProgress;
                record.started_at = Some(now);
                record.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel(&self, id: &str, reason: &str, now: DateTime<Utc>) -> DomainResult<bool> {
        let mut records = self.records.lock();
        match records.get_mut(id) {
            Some(record) if record.status.is_cancellable() => {
                record.status = TransmissionStatus::Cancelled;
                record.last_error = Some(reason.to_string());
                record.next_retry_at = None;
                record.completed_at = Some(now);
                record.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_failed(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<TransmissionRecord>> {
        let mut records = self.records.lock();
        let active: Vec<String> = records
            .values()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.item_id.clone())
            .collect();
        let mut reset = Vec::new();
        for record in records.values_mut() {
            if reset.len() >= limit {
                break;
            }
            if record.status != TransmissionStatus::Failed || active.contains(&record.item_id) {
                continue;
            }
            record.status = TransmissionStatus::Pending;
            record.retry_count = 0;
            record.next_retry_at = None;
            record.last_error = None;
            record.completed_at = None;
            record.updated_at = now;
            reset.push(record.clone());
        }
        Ok(reset)
    }

    async fn recover_stale(&self, started_before: DateTime<Utc>) -> DomainResult<u64> {
        let mut recovered = 0;
        for record in self.records.lock().values_mut() {
            if record.status == TransmissionStatus::InProgress
                && record.started_at.is_some_and(|at| at < started_before)
            {
                record.status = TransmissionStatus::Pending;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn list_ready(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        account_id: Option<&str>,
    ) -> DomainResult<Vec<TransmissionRecord>> {
        let mut ready: Vec<TransmissionRecord> = self
            .records
            .lock()
            .values()
            .filter(|r| is_ready(r, now))
            .filter(|r| account_id.map_or(true, |id| r.account_id == id))
            .cloned()
            .collect();
        ready.sort_by(|a, b| {
            b.priority.rank().cmp(&a.priority.rank()).then_with(|| a.created_at.cmp(&b.created_at))
        });
        ready.truncate(limit);
        Ok(ready)
    }

    async fn count_by_status(&self) -> DomainResult<BTreeMap<TransmissionStatus, u64>> {
        let mut counts = BTreeMap::new();
        for record in self.records.lock().values() {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn count_by_priority(&self) -> DomainResult<BTreeMap<Priority, u64>> {
        let mut counts = BTreeMap::new();
        for record in self.records.lock().values() {
            *counts.entry(record.priority).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, r| !(r.status.is_terminal() && r.updated_at < cutoff));
        Ok((before - records.len()) as u64)
    }
}
