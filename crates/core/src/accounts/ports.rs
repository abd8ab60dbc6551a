//! Port interfaces for accounts and their credentials

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailsync_domain::{Account, AccountStatus, Credential, Result};

/// Trait for persisting accounts
#[async_trait]
pub trait AccountRepository: Send + Sync {
    // Core CRUD
    /// Get an account by its ID
    async fn get(&self, id: &str) -> Result<Option<Account>>;

    /// List every account
    async fn list(&self) -> Result<Vec<Account>>;

    /// List the accounts owned by one user
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Account>>;

    /// List accounts that are active and have sync enabled
    async fn list_active_sync_enabled(&self) -> Result<Vec<Account>>;

    /// List active accounts whose credential expires at or before `before`
    async fn list_expiring(&self, before: DateTime<Utc>) -> Result<Vec<Account>>;

    /// Insert or replace an account
    async fn save(&self, account: &Account) -> Result<()>;

    // Credential and error bookkeeping
    /// Store a fresh credential and clear `error_count` / `last_error`
    async fn update_credential(&self, id: &str, credential: &Credential) -> Result<()>;

    /// Record a failure; returns the new `error_count`.
    ///
    /// `status` replaces the account status when given.
    async fn record_error(
        &self,
        id: &str,
        error: &str,
        status: Option<AccountStatus>,
    ) -> Result<u32>;

    /// Reset `error_count` and `last_error`
    async fn clear_errors(&self, id: &str) -> Result<()>;

    /// Set `status` and `sync_enabled` without touching the cursor
    async fn set_activation(&self, id: &str, status: AccountStatus, sync_enabled: bool) -> Result<()>;

    // Cursor
    /// Atomically replace the delta cursor if `cursor_version` still equals
    /// `expected_version`.
    ///
    /// Bumps the version and sets `last_sync_at`. Returns `false` when the
    /// version moved underneath the caller.
    async fn advance_cursor(
        &self,
        id: &str,
        expected_version: i64,
        cursor: Option<&str>,
        synced_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Set `last_sync_at` without touching the cursor
    async fn touch_last_sync(&self, id: &str, synced_at: DateTime<Utc>) -> Result<()>;

    /// Drop the cursor for a full resync; returns the new `cursor_version`
    async fn reset_cursor(&self, id: &str) -> Result<i64>;
}

/// OAuth identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL the user visits to grant access; `state` is echoed back
    fn authorization_url(&self, state: &str) -> Result<String>;

    /// Exchange an authorization code for a credential
    async fn exchange_code(&self, code: &str) -> Result<Credential>;

    /// Obtain a new access token.
    ///
    /// Fails with `InvalidGrant` when the refresh token was revoked. The
    /// returned credential may omit the refresh token, in which case the old
    /// one stays valid.
    async fn refresh(&self, refresh_token: &str) -> Result<Credential>;
}
