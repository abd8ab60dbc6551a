//! Incremental change detection against the remote mailbox

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use mailsync_common::ResiliencePolicy;
use mailsync_domain::{
    Account, ChangeKind, DeltaBatch, DetectionOutcome, Item, MailSyncError, Result,
};
use tracing::{debug, info, instrument, warn};

use super::ports::{ItemRepository, MailboxApi};
use crate::accounts::ports::AccountRepository;

/// Where detection starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Resume from the stored cursor
    Delta,
    /// Drop the stored cursor and fetch everything
    Full,
}

/// Detects changes for one account and keeps its cursor
///
/// Items are persisted before the cursor moves. A crash in between only
/// means the same batch is fetched again next time, and dedup on
/// `(account_id, remote_key)` absorbs it.
pub struct DeltaSyncEngine {
    accounts: Arc<dyn AccountRepository>,
    items: Arc<dyn ItemRepository>,
    mailbox: Arc<dyn MailboxApi>,
    policy: ResiliencePolicy,
}

impl DeltaSyncEngine {
    /// Engine reading through `mailbox` under `policy`
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        items: Arc<dyn ItemRepository>,
        mailbox: Arc<dyn MailboxApi>,
        policy: ResiliencePolicy,
    ) -> Self {
        Self { accounts, items, mailbox, policy }
    }

    /// Fetch, classify and persist the account's changes, then advance its
    /// cursor.
    ///
    /// `account` must carry a valid credential. Returns every item written by
    /// this pass in remote batch order.
    #[instrument(skip(self, account), fields(account_id = %account.id))]
    pub async fn detect_changes(&self, account: &Account, mode: SyncMode) -> Result<DetectionOutcome> {
        let access_token = account
            .credential
            .as_ref()
            .map(|c| c.access_token.clone())
            .ok_or_else(|| MailSyncError::Fatal("no credential stored; authorization required".into()))?;

        let (cursor, version) = match mode {
            SyncMode::Delta => (account.delta_cursor.clone(), account.cursor_version),
            SyncMode::Full => {
                let version = self.accounts.reset_cursor(&account.id).await?;
                info!("cursor reset for full resync");
                (None, version)
            }
        };

        let batch = self.fetch(&account.email, &access_token, cursor.as_deref()).await?;
        debug!(changes = batch.changes.len(), "delta fetched");

        let mut outcome = self.classify(account, &batch).await?;
        if !outcome.items.is_empty() {
            self.items.upsert_batch(&outcome.items).await?;
        }

        let now = Utc::now();
        match batch.next_cursor.as_deref() {
            Some(next) if cursor.as_deref() != Some(next) => {
                let advanced =
                    self.accounts.advance_cursor(&account.id, version, Some(next), now).await?;
                if !advanced {
                    warn!(expected_version = version, "cursor moved concurrently, keeping stored value");
                    return Err(MailSyncError::Conflict(format!(
                        "cursor for account {} changed during sync",
                        account.id
                    )));
                }
                outcome.cursor_advanced = true;
            }
            _ => self.accounts.touch_last_sync(&account.id, now).await?,
        }

        info!(
            created = outcome.created,
            updated = outcome.updated,
            deleted = outcome.deleted,
            cursor_advanced = outcome.cursor_advanced,
            "changes detected"
        );
        Ok(outcome)
    }

    async fn fetch(&self, mailbox: &str, access_token: &str, cursor: Option<&str>) -> Result<DeltaBatch> {
        let api = Arc::clone(&self.mailbox);
        self.policy
            .execute(|| {
                let api = Arc::clone(&api);
                let mailbox = mailbox.to_string();
                let access_token = access_token.to_string();
                let cursor = cursor.map(str::to_string);
                async move { api.fetch_delta(&mailbox, &access_token, cursor.as_deref()).await }
            })
            .await
            .map_err(MailSyncError::from)
    }

    /// Turn raw changes into items, merging repeats of the same remote key.
    async fn classify(&self, account: &Account, batch: &DeltaBatch) -> Result<DetectionOutcome> {
        let mut keys: Vec<String> = batch.changes.iter().map(|c| c.remote_key.clone()).collect();
        keys.sort_unstable();
        keys.dedup();
        let existing = if keys.is_empty() {
            HashMap::new()
        } else {
            self.items.find_by_remote_keys(&account.id, &keys).await?
        };

        let mut order: Vec<String> = Vec::new();
        let mut working: HashMap<String, Item> = HashMap::new();
        let mut outcome = DetectionOutcome::default();

        for change in &batch.changes {
            let known = working.get(&change.remote_key).or_else(|| existing.get(&change.remote_key));
            let kind = if change.removed {
                ChangeKind::Deleted
            } else if known.is_some() {
                ChangeKind::Updated
            } else {
                ChangeKind::Created
            };
            match kind {
                ChangeKind::Created => outcome.created += 1,
                ChangeKind::Updated => outcome.updated += 1,
                ChangeKind::Deleted => outcome.deleted += 1,
            }

            let item = match known.cloned() {
                Some(mut item) => {
                    item.apply_change(kind, change.message.clone());
                    item
                }
                None => Item::detected(&account.id, &change.remote_key, kind, change.message.clone()),
            };
            if !working.contains_key(&change.remote_key) {
                order.push(change.remote_key.clone());
            }
            working.insert(change.remote_key.clone(), item);
        }

        outcome.items = order.iter().filter_map(|key| working.remove(key)).collect();
        Ok(outcome)
    }
}
