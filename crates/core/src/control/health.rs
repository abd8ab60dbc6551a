//! Account health checks

use std::time::Duration;

use chrono::{DateTime, Utc};
use mailsync_domain::constants::SYNC_OVERDUE_HOURS;
use mailsync_domain::{Account, AccountHealth, AccountStatus, HealthIssue};

/// Inspect one account at `now`.
///
/// An account is healthy when it has none of the listed issues.
pub fn assess_health(account: &Account, now: DateTime<Utc>, safety_window: Duration) -> AccountHealth {
    let mut issues = Vec::new();

    if account.status != AccountStatus::Active {
        issues.push(HealthIssue::NotActive { status: account.status });
    }
    if !account.sync_enabled {
        issues.push(HealthIssue::SyncDisabled);
    }

    match &account.credential {
        None => issues.push(HealthIssue::MissingCredential),
        Some(credential) if credential.is_expired(now) => issues.push(HealthIssue::TokenExpired),
        Some(credential) if credential.expires_within(safety_window, now) => {
            issues.push(HealthIssue::TokenExpiringSoon { expires_at: credential.expires_at });
        }
        Some(_) => {}
    }

    match account.last_sync_at {
        None => issues.push(HealthIssue::NeverSynced),
        Some(last) => {
            let hours = (now - last).num_hours();
            if hours >= SYNC_OVERDUE_HOURS {
                issues.push(HealthIssue::SyncOverdue { hours_since_sync: hours });
            }
        }
    }

    if account.error_count > 0 {
        issues.push(HealthIssue::RecentErrors {
            count: account.error_count,
            last_error: account.last_error.clone(),
        });
    }

    AccountHealth {
        account_id: account.id.clone(),
        email: account.email.clone(),
        status: account.status,
        healthy: issues.is_empty(),
        issues,
        last_sync_at: account.last_sync_at,
    }
}
