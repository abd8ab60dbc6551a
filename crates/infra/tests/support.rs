//! Shared helpers for the infra integration tests.

#![allow(dead_code, clippy::expect_used)]

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use mailsync_core::{AccountRepository, ItemRepository};
use mailsync_domain::{Account, ChangeKind, Credential, Item, MessageFields, ResilienceSettings};
use mailsync_infra::database::{
    DbManager, SqliteAccountRepository, SqliteItemRepository, SqliteTransmissionRepository,
};
use tempfile::TempDir;

/// Temporary database that keeps its directory alive for the test.
pub struct TestDatabase {
    pub manager: Arc<DbManager>,
    _temp_dir: TempDir,
}

impl TestDatabase {
    /// Fresh database file with the schema applied.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let manager = DbManager::new(temp_dir.path().join("mailsync-test.db"), 8)
            .expect("db manager should be created");
        manager.run_migrations().expect("schema should apply");

        Self { manager: Arc::new(manager), _temp_dir: temp_dir }
    }

    pub fn accounts(&self) -> Arc<SqliteAccountRepository> {
        Arc::new(SqliteAccountRepository::new(Arc::clone(&self.manager)))
    }

    pub fn items(&self) -> Arc<SqliteItemRepository> {
        Arc::new(SqliteItemRepository::new(Arc::clone(&self.manager)))
    }

    pub fn transmissions(&self) -> Arc<SqliteTransmissionRepository> {
        Arc::new(SqliteTransmissionRepository::new(Arc::clone(&self.manager)))
    }

    /// Store an active account with a credential valid for an hour.
    pub async fn seed_account(&self, email: &str) -> Account {
        let account = Account::new("user-1", email).with_credential(Credential {
            access_token: format!("access-{email}"),
            refresh_token: Some(format!("refresh-{email}")),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        });
        self.accounts().save(&account).await.expect("account should be stored");
        account
    }

    /// Store `count` freshly detected items for `account`.
    pub async fn seed_items(&self, account: &Account, count: usize) -> Vec<Item> {
        let items: Vec<Item> = (0..count)
            .map(|i| {
                let fields =
                    MessageFields { subject: Some(format!("message {i}")), ..Default::default() };
                Item::detected(&account.id, format!("remote-{i}"), ChangeKind::Created, Some(fields))
            })
            .collect();
        self.items().upsert_batch(&items).await.expect("items should be stored");
        items
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// One attempt per call and millisecond delays.
pub fn fast_settings() -> ResilienceSettings {
    ResilienceSettings {
        max_attempts: 1,
        base_delay_ms: 1,
        max_delay_ms: 5,
        jitter: false,
        call_timeout_secs: 5,
        ..ResilienceSettings::default()
    }
}
