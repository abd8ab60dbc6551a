//! Requests and reports exchanged with the orchestration layer

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::AccountStatus;
use super::item::{Item, ProcessingStatus};
use super::transmission::{Priority, TransmissionStatus};
use crate::errors::{ErrorKind, MailSyncError, Result};

// ============================================================================
// Sync requests
// ============================================================================

/// Which accounts a sync run covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AccountSelector {
    /// Exactly these accounts; ineligible ones are reported as skipped
    Ids(Vec<String>),
    /// Every eligible account owned by this user
    User(String),
    /// Every active, sync-enabled account
    AllActive,
}

/// Input to one orchestrator run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub selector: AccountSelector,
    pub max_concurrent: usize,
    /// Resume from the stored cursor; `false` forces a full resync
    pub use_delta: bool,
    /// Drain the account's new items right after detection
    pub transmit: bool,
}

impl SyncRequest {
    /// Every eligible account, delta mode, transmitting
    pub fn all_active(max_concurrent: usize) -> Self {
        Self { selector: AccountSelector::AllActive, max_concurrent, use_delta: true, transmit: true }
    }

    /// Exactly these accounts, delta mode, transmitting
    pub fn for_accounts(ids: Vec<String>, max_concurrent: usize) -> Self {
        Self { selector: AccountSelector::Ids(ids), max_concurrent, use_delta: true, transmit: true }
    }

    /// Reject malformed requests before any work starts
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(MailSyncError::Validation("max_concurrent must be at least 1".into()));
        }
        match &self.selector {
            AccountSelector::Ids(ids) if ids.is_empty() => {
                Err(MailSyncError::Validation("account id list is empty".into()))
            }
            AccountSelector::Ids(ids) if ids.iter().any(|id| id.trim().is_empty()) => {
                Err(MailSyncError::Validation("account ids must not be blank".into()))
            }
            AccountSelector::User(user) if user.trim().is_empty() => {
                Err(MailSyncError::Validation("user id must not be blank".into()))
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Per-account and per-run results
// ============================================================================

/// How one account's sync ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Failed,
    Skipped,
}

crate::impl_domain_status_conversions!(SyncOutcome {
    Success => "success",
    Failed => "failed",
    Skipped => "skipped",
});

/// Result of syncing one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSyncResult {
    pub account_id: String,
    pub email: Option<String>,
    pub outcome: SyncOutcome,
    pub detected: usize,
    pub transmitted: usize,
    /// Error message or skip reason
    pub message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: u64,
}

impl AccountSyncResult {
    pub fn skipped(account_id: impl Into<String>, email: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            email,
            outcome: SyncOutcome::Skipped,
            detected: 0,
            transmitted: 0,
            message: Some(reason.into()),
            error_kind: None,
            duration_ms: 0,
        }
    }

    pub fn failed(
        account_id: impl Into<String>,
        email: Option<String>,
        error: &MailSyncError,
        duration_ms: u64,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            email,
            outcome: SyncOutcome::Failed,
            detected: 0,
            transmitted: 0,
            message: Some(error.to_string()),
            error_kind: Some(error.kind()),
            duration_ms,
        }
    }
}

/// Aggregate of one orchestrator run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub detected: usize,
    pub transmitted: usize,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub results: Vec<AccountSyncResult>,
}

impl SyncRunReport {
    /// Tally per-account results
    pub fn from_results(
        results: Vec<AccountSyncResult>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        let count = |outcome| results.iter().filter(|r| r.outcome == outcome).count();
        Self {
            total: results.len(),
            succeeded: count(SyncOutcome::Success),
            failed: count(SyncOutcome::Failed),
            skipped: count(SyncOutcome::Skipped),
            detected: results.iter().map(|r| r.detected).sum(),
            transmitted: results.iter().map(|r| r.transmitted).sum(),
            duration_ms,
            started_at,
            results,
        }
    }

    /// A run is only successful when no account failed
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Results of the accounts that failed
    pub fn failures(&self) -> impl Iterator<Item = &AccountSyncResult> {
        self.results.iter().filter(|r| r.outcome == SyncOutcome::Failed)
    }
}

/// Summary of a periodic run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicReport {
    pub cycles: u32,
    pub failed_cycles: u32,
    pub cancelled: bool,
    pub duration_ms: u64,
    pub last_report: Option<SyncRunReport>,
}

// ============================================================================
// Change detection and delivery
// ============================================================================

/// What one detection pass produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionOutcome {
    /// Created or updated items, in remote batch order
    pub items: Vec<Item>,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// The stored cursor moved to a new value
    pub cursor_advanced: bool,
}

/// What one drain pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Records claimed and sent
    pub attempted: usize,
    pub succeeded: usize,
    /// Scheduled for another attempt
    pub retried: usize,
    /// Ended in terminal `failed`
    pub failed: usize,
    /// Lost the claim to another worker
    pub claim_conflicts: usize,
}

impl DrainReport {
    /// Add another pass's counters to this one
    pub fn merge(&mut self, other: &Self) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.retried += other.retried;
        self.failed += other.failed;
        self.claim_conflicts += other.claim_conflicts;
    }
}

/// Result of processing a single claimed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    RetryScheduled,
    Failed,
    NotClaimed,
}

/// Status and priority breakdown of the transmission queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransmissionSummary {
    pub total: u64,
    pub by_status: BTreeMap<TransmissionStatus, u64>,
    pub by_priority: BTreeMap<Priority, u64>,
    /// success / (success + failed); 0 when nothing finished yet
    pub success_rate: f64,
}

impl TransmissionSummary {
    pub fn new(
        by_status: BTreeMap<TransmissionStatus, u64>,
        by_priority: BTreeMap<Priority, u64>,
    ) -> Self {
        let get = |status| by_status.get(&status).copied().unwrap_or(0);
        let finished = get(TransmissionStatus::Success) + get(TransmissionStatus::Failed);
        let success_rate = if finished == 0 {
            0.0
        } else {
            get(TransmissionStatus::Success) as f64 / finished as f64
        };
        Self { total: by_status.values().sum(), by_status, by_priority, success_rate }
    }

    /// Records in `status`, zero when absent
    pub fn count(&self, status: TransmissionStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

// ============================================================================
// Tokens and health
// ============================================================================

/// Account that a sweep could not handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFailure {
    pub account_id: String,
    pub error: String,
}

/// Result of a proactive token refresh sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRefreshSummary {
    pub checked: usize,
    pub refreshed: usize,
    pub failed: usize,
    /// Accounts moved to `error` by an invalid grant
    pub deactivated: usize,
    pub failures: Vec<AccountFailure>,
}

/// Problem found by an account health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum HealthIssue {
    MissingCredential,
    TokenExpired,
    TokenExpiringSoon { expires_at: DateTime<Utc> },
    NeverSynced,
    SyncOverdue { hours_since_sync: i64 },
    RecentErrors { count: u32, last_error: Option<String> },
    NotActive { status: AccountStatus },
    SyncDisabled,
}

impl fmt::Display for HealthIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredential => write!(f, "no credential stored"),
            Self::TokenExpired => write!(f, "access token expired"),
            Self::TokenExpiringSoon { expires_at } => {
                write!(f, "access token expires at {}", expires_at.to_rfc3339())
            }
            Self::NeverSynced => write!(f, "never synced"),
            Self::SyncOverdue { hours_since_sync } => {
                write!(f, "last sync {hours_since_sync}h ago")
            }
            Self::RecentErrors { count, last_error } => match last_error {
                Some(last) => write!(f, "{count} errors, last: {last}"),
                None => write!(f, "{count} errors"),
            },
            Self::NotActive { status } => write!(f, "status is {status}"),
            Self::SyncDisabled => write!(f, "sync disabled"),
        }
    }
}

/// Health verdict for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountHealth {
    pub account_id: String,
    pub email: String,
    pub status: AccountStatus,
    pub healthy: bool,
    pub issues: Vec<HealthIssue>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Breaker state as shown in status reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: String,
    pub state: String,
    pub consecutive_failures: u32,
    pub open_for_secs: Option<u64>,
    pub rejected_calls: u64,
}

/// Answer to get-sync-status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatusReport {
    pub generated_at: DateTime<Utc>,
    pub accounts_total: usize,
    pub accounts_by_status: BTreeMap<AccountStatus, usize>,
    pub sync_enabled: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub transmissions: TransmissionSummary,
    pub dependencies: Vec<DependencyStatus>,
}

// ============================================================================
// Account administration and item listings
// ============================================================================

/// Bulk action applied to a list of accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountOperation {
    /// Back to `active` with sync enabled and the error streak cleared
    Activate,
    /// `inactive` with sync disabled
    Deactivate,
    /// Force a token refresh whatever the expiry
    RefreshToken,
}

crate::impl_domain_status_conversions!(AccountOperation {
    Activate => "activate",
    Deactivate => "deactivate",
    RefreshToken => "refresh_token",
});

/// Per-account result of a bulk operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOperationResult {
    pub account_id: String,
    pub success: bool,
    pub error: Option<String>,
}

impl AccountOperationResult {
    pub fn succeeded(account_id: impl Into<String>) -> Self {
        Self { account_id: account_id.into(), success: true, error: None }
    }

    pub fn failed(account_id: impl Into<String>, error: &MailSyncError) -> Self {
        Self { account_id: account_id.into(), success: false, error: Some(error.to_string()) }
    }
}

/// Outcome of one bulk account operation, results in request order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOperationReport {
    pub operation: AccountOperation,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<AccountOperationResult>,
}

impl BatchOperationReport {
    /// Count successes and failures
    pub fn from_results(operation: AccountOperation, results: Vec<AccountOperationResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self { operation, total: results.len(), succeeded, failed: results.len() - succeeded, results }
    }
}

/// One page of items in a processing status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsByStatus {
    pub status: ProcessingStatus,
    /// Items in the status overall, not just on this page
    pub total: u64,
    pub items: Vec<Item>,
}
