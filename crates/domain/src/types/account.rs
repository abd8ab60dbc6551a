//! Mailbox accounts and their credentials

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
    Expired,
    /// Needs operator action (revoked grant, broken configuration)
    Error,
}

crate::impl_domain_status_conversions!(AccountStatus {
    Active => "active",
    Inactive => "inactive",
    Expired => "expired",
    Error => "error",
});

/// OAuth credential for one account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// True when the access token expires within `window` of `now`
    /// (or already has).
    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        self.expires_at <= now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the access token is past its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// Tokens never reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// An independently authorized remote mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub status: AccountStatus,
    pub sync_enabled: bool,
    pub credential: Option<Credential>,
    /// Opaque continuation token from the remote mailbox API
    pub delta_cursor: Option<String>,
    /// Bumped on every cursor write; the compare-and-set key
    pub cursor_version: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// New active, sync-enabled account without a credential
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            email: email.into(),
            display_name: None,
            status: AccountStatus::Active,
            sync_enabled: true,
            credential: None,
            delta_cursor: None,
            cursor_version: 0,
            last_sync_at: None,
            last_error: None,
            error_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a credential
    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Why this account cannot be synced right now, if it cannot.
    pub fn ineligibility_reason(&self) -> Option<String> {
        if !self.sync_enabled {
            return Some("sync disabled".to_string());
        }
        match self.status {
            AccountStatus::Active => None,
            AccountStatus::Error => Some(format!(
                "account in error state: {}",
                self.last_error.as_deref().unwrap_or("requires re-authorization")
            )),
            other => Some(format!("account is {other}")),
        }
    }

    /// Active, sync enabled and holding a credential
    pub fn is_sync_eligible(&self) -> bool {
        self.ineligibility_reason().is_none()
    }
}
