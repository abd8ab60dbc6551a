//! Integration tests for `SyncOrchestrator` and `PeriodicSync`

mod support;

use std::time::Duration;

use mailsync_core::{PeriodicSchedule, PeriodicSync};
use mailsync_domain::{
    AccountStatus, DeltaBatch, ErrorKind, MailSyncError, SyncOutcome, SyncRequest,
    TransmissionStatus,
};
use support::{account, expiring_credential, message, Harness};
use tokio_util::sync::CancellationToken;

fn batch(keys: &[&str], cursor: &str) -> DeltaBatch {
    DeltaBatch {
        changes: keys.iter().map(|key| message(key, "subject")).collect(),
        next_cursor: Some(cursor.to_string()),
    }
}

/// Validates failure isolation across accounts.
///
/// Scenario: A, B and C sync together; B's refresh token was revoked.
///
/// Assertions:
/// - The run reports `{total: 3, succeeded: 2, failed: 1, skipped: 0}`.
/// - A's and C's items and cursors are persisted.
/// - B is moved to `error` and its failure is reported as fatal.
#[tokio::test]
async fn one_fatal_account_does_not_affect_siblings() {
    let harness = Harness::new();
    let a = harness.add_account(account("a@example.com"));
    let mut b = account("b@example.com");
    b.credential = Some(expiring_credential("b"));
    let b = harness.add_account(b);
    let c = harness.add_account(account("c@example.com"));
    harness.identity.fail_refresh("refresh-b", MailSyncError::InvalidGrant("revoked".into()));
    harness.mailbox.push(&a.email, Ok(batch(&["a1", "a2"], "ca")));
    harness.mailbox.push(&c.email, Ok(batch(&["c1"], "cc")));

    let report = harness
        .orchestrator
        .sync_all(SyncRequest::for_accounts(vec![a.id.clone(), b.id.clone(), c.id.clone()], 2))
        .await
        .expect("run completes");

    assert_eq!((report.total, report.succeeded, report.failed, report.skipped), (3, 2, 1, 0));
    assert!(!report.is_success());
    assert_eq!(report.detected, 3);
    assert_eq!(report.transmitted, 3);

    assert_eq!(harness.items.all_for(&a.id).len(), 2);
    assert_eq!(harness.items.all_for(&c.id).len(), 1);
    assert_eq!(harness.accounts.snapshot(&a.id).delta_cursor.as_deref(), Some("ca"));
    assert_eq!(harness.accounts.snapshot(&c.id).delta_cursor.as_deref(), Some("cc"));

    let failure = report.failures().next().expect("one failure");
    assert_eq!(failure.account_id, b.id);
    assert_eq!(failure.error_kind, Some(ErrorKind::Fatal));
    let stored_b = harness.accounts.snapshot(&b.id);
    assert_eq!(stored_b.status, AccountStatus::Error);
    assert_eq!(stored_b.error_count, 1);
}

#[tokio::test]
async fn ineligible_and_unknown_ids_are_skipped() {
    let harness = Harness::new();
    let mut disabled = account("off@example.com");
    disabled.sync_enabled = false;
    let disabled = harness.add_account(disabled);
    let mut broken = account("broken@example.com");
    broken.status = AccountStatus::Error;
    let broken = harness.add_account(broken);

    let report = harness
        .orchestrator
        .sync_all(SyncRequest::for_accounts(
            vec![disabled.id.clone(), broken.id.clone(), "ghost".into()],
            4,
        ))
        .await
        .expect("run completes");

    assert_eq!((report.total, report.skipped, report.failed), (3, 3, 0));
    assert!(report.is_success());
    let reasons: Vec<_> = report.results.iter().filter_map(|r| r.message.clone()).collect();
    assert!(reasons.iter().any(|r| r == "sync disabled"));
    assert!(reasons.iter().any(|r| r == "account not found"));
    assert!(harness.mailbox.calls().is_empty());
}

#[tokio::test]
async fn invalid_request_is_rejected_synchronously() {
    let harness = Harness::new();
    let err = harness.orchestrator.sync_all(SyncRequest::all_active(0)).await.expect_err("invalid");
    assert!(matches!(err, MailSyncError::Validation(_)));
}

/// Validates the single token refresh after an authentication failure.
///
/// Assertions:
/// - A 401 from the mailbox triggers one refresh and one more fetch with
///   the new token.
/// - The account syncs successfully.
#[tokio::test]
async fn mailbox_auth_failure_refreshes_once() {
    let harness = Harness::new();
    let acc = harness.add_account(account("d@example.com"));
    harness.mailbox.push(&acc.email, Err(MailSyncError::Authentication("401".into())));
    harness.mailbox.push(&acc.email, Ok(batch(&["d1"], "cd")));

    let report = harness
        .orchestrator
        .sync_all(SyncRequest::all_active(2))
        .await
        .expect("run completes");

    assert_eq!(report.succeeded, 1);
    assert_eq!(harness.identity.refresh_calls(), 1);
    let tokens: Vec<String> = harness.mailbox.calls().into_iter().map(|(_, token, _)| token).collect();
    assert_eq!(tokens, ["access-d@example.com", "refreshed-refresh-d@example.com"]);
}

#[tokio::test]
async fn transient_failure_is_recorded_on_account() {
    let harness = Harness::new();
    let acc = harness.add_account(account("e@example.com"));
    harness.mailbox.push(&acc.email, Err(MailSyncError::Transient("503".into())));

    let report = harness.orchestrator.sync_all(SyncRequest::all_active(1)).await.expect("run");

    assert_eq!(report.failed, 1);
    assert_eq!(report.results[0].outcome, SyncOutcome::Failed);
    let stored = harness.accounts.snapshot(&acc.id);
    assert_eq!(stored.error_count, 1);
    assert_eq!(stored.status, AccountStatus::Active);

    // The next successful run clears the error counter.
    harness.orchestrator.sync_all(SyncRequest::all_active(1)).await.expect("run");
    assert_eq!(harness.accounts.snapshot(&acc.id).error_count, 0);
}

#[tokio::test]
async fn detection_without_transmit_leaves_records_pending() {
    let harness = Harness::new();
    let acc = harness.add_account(account("f@example.com"));
    harness.mailbox.push(&acc.email, Ok(batch(&["f1", "f2"], "cf")));

    let request = SyncRequest { transmit: false, ..SyncRequest::all_active(1) };
    let report = harness.orchestrator.sync_all(request).await.expect("run");

    assert_eq!((report.detected, report.transmitted), (2, 0));
    assert!(harness.records.all().iter().all(|r| r.status == TransmissionStatus::Pending));
    assert!(harness.sink.sent().is_empty());
}

/// Validates the periodic loop under paused time.
///
/// Assertions:
/// - Cycles repeat on the interval until the duration budget is spent.
/// - A failing cycle is counted and does not end the loop.
#[tokio::test(start_paused = true)]
async fn periodic_runs_until_budget_is_spent() {
    let harness = Harness::new();
    harness.add_account(account("g@example.com"));
    let periodic = PeriodicSync::new(harness.orchestrator.clone());
    let schedule = PeriodicSchedule {
        interval: Duration::from_secs(60),
        max_duration: Duration::from_secs(150),
        error_backoff: Duration::from_secs(60),
    };

    let report = periodic.run(SyncRequest::all_active(1), schedule, CancellationToken::new()).await;

    assert_eq!(report.cycles, 3);
    assert_eq!(report.failed_cycles, 0);
    assert!(!report.cancelled);
    assert_eq!(report.last_report.map(|r| r.succeeded), Some(1));

    let failing = periodic.run(SyncRequest::all_active(0), schedule, CancellationToken::new()).await;
    assert_eq!(failing.failed_cycles, failing.cycles);
    assert_eq!(failing.cycles, 2);
}

#[tokio::test]
async fn periodic_stops_when_cancelled() {
    let harness = Harness::new();
    let periodic = PeriodicSync::new(harness.orchestrator.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = periodic
        .run(
            SyncRequest::all_active(1),
            PeriodicSchedule {
                interval: Duration::from_secs(1),
                max_duration: Duration::from_secs(3600),
                error_backoff: Duration::from_secs(1),
            },
            cancel,
        )
        .await;

    assert!(report.cancelled);
    assert_eq!(report.cycles, 0);
}
