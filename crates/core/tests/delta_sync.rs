//! Integration tests for `DeltaSyncEngine`
//!
//! Covers dedup idempotence, cursor ordering and the items-before-cursor
//! persistence rule.

mod support;

use mailsync_common::CircuitState;
use mailsync_core::SyncMode;
use mailsync_domain::{ChangeKind, DeltaBatch, MailSyncError, RawChange};
use support::{account, message, Harness};

fn batch(changes: Vec<RawChange>, cursor: &str) -> DeltaBatch {
    DeltaBatch { changes, next_cursor: Some(cursor.to_string()) }
}

/// Validates dedup idempotence.
///
/// Assertions:
/// - Two runs over the same batch leave one item per remote key.
/// - The second run reports only updates and keeps item ids.
#[tokio::test]
async fn same_batch_twice_updates_in_place() {
    let harness = Harness::new();
    let acc = harness.add_account(account("a@example.com"));
    let changes = vec![message("m1", "hello"), message("m2", "world"), message("m3", "again")];
    harness.mailbox.push(&acc.email, Ok(batch(changes.clone(), "c1")));
    harness.mailbox.push(&acc.email, Ok(batch(changes, "c1")));

    let first = harness.engine.detect_changes(&acc, SyncMode::Delta).await.expect("first run");
    let first_ids: Vec<String> = harness.items.all_for(&acc.id).into_iter().map(|i| i.id).collect();
    assert_eq!(first.created, 3);
    assert!(first.cursor_advanced);

    let acc = harness.accounts.snapshot(&acc.id);
    let second = harness.engine.detect_changes(&acc, SyncMode::Delta).await.expect("second run");

    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 3);
    assert!(!second.cursor_advanced);
    let items = harness.items.all_for(&acc.id);
    assert_eq!(items.len(), 3);
    assert_eq!(items.into_iter().map(|i| i.id).collect::<Vec<_>>(), first_ids);
}

#[tokio::test]
async fn classification_and_batch_order() {
    let harness = Harness::new();
    let acc = harness.add_account(account("b@example.com"));
    harness.mailbox.push(
        &acc.email,
        Ok(batch(vec![message("m2", "second"), message("m1", "first"), message("m2", "edited")], "c1")),
    );
    harness.mailbox.push(&acc.email, Ok(batch(vec![RawChange::removal("m1")], "c2")));

    let outcome = harness.engine.detect_changes(&acc, SyncMode::Delta).await.expect("detect");
    let keys: Vec<&str> = outcome.items.iter().map(|i| i.remote_key.as_str()).collect();
    assert_eq!(keys, ["m2", "m1"]);
    assert_eq!((outcome.created, outcome.updated), (2, 1));
    assert_eq!(
        outcome.items[0].message.as_ref().and_then(|m| m.subject.as_deref()),
        Some("edited")
    );

    let acc = harness.accounts.snapshot(&acc.id);
    let outcome = harness.engine.detect_changes(&acc, SyncMode::Delta).await.expect("detect");
    assert_eq!(outcome.deleted, 1);
    assert_eq!(outcome.items[0].change_kind, ChangeKind::Deleted);
    // Deletions keep the last known fields.
    assert_eq!(outcome.items[0].message.as_ref().and_then(|m| m.subject.as_deref()), Some("first"));
}

/// Validates cursor ordering across runs and a full resync.
///
/// Assertions:
/// - Each run resumes from the previously stored cursor.
/// - Cursor writes only ever move forward, except for the explicit reset.
#[tokio::test]
async fn cursor_moves_forward_and_resets_on_full_resync() {
    let harness = Harness::new();
    let acc = harness.add_account(account("c@example.com"));
    harness.mailbox.push(&acc.email, Ok(batch(vec![message("m1", "a")], "c1")));
    harness.mailbox.push(&acc.email, Ok(batch(vec![message("m2", "b")], "c2")));
    harness.mailbox.push(&acc.email, Ok(batch(vec![message("m1", "a"), message("m2", "b")], "c3")));

    for mode in [SyncMode::Delta, SyncMode::Delta, SyncMode::Full] {
        let current = harness.accounts.snapshot(&acc.id);
        harness.engine.detect_changes(&current, mode).await.expect("detect");
    }

    let cursors: Vec<Option<String>> =
        harness.mailbox.calls().into_iter().map(|(_, _, cursor)| cursor).collect();
    assert_eq!(cursors, [None, Some("c1".into()), None]);
    assert_eq!(
        harness.accounts.cursor_history(&acc.id),
        [Some("c1".into()), Some("c2".into()), None, Some("c3".into())]
    );
    assert_eq!(harness.items.all_for(&acc.id).len(), 2);
}

#[tokio::test]
async fn failed_persistence_keeps_cursor() {
    let harness = Harness::new();
    let acc = harness.add_account(account("d@example.com"));
    harness.mailbox.push(&acc.email, Ok(batch(vec![message("m1", "a")], "c1")));
    harness.items.fail_next_upsert();

    let err = harness.engine.detect_changes(&acc, SyncMode::Delta).await.expect_err("store down");

    assert!(matches!(err, MailSyncError::Database(_)));
    let stored = harness.accounts.snapshot(&acc.id);
    assert_eq!(stored.delta_cursor, None);
    assert_eq!(stored.cursor_version, acc.cursor_version);
    assert!(harness.accounts.cursor_history(&acc.id).is_empty());
}

/// Validates the cursor compare-and-set.
///
/// Assertions:
/// - A concurrent cursor write makes detection fail with `Conflict`.
/// - The items are still stored and the other writer's cursor survives.
#[tokio::test]
async fn concurrent_cursor_write_is_a_conflict() {
    let harness = Harness::new();
    let acc = harness.add_account(account("e@example.com"));
    harness.mailbox.push(&acc.email, Ok(batch(vec![message("m1", "a")], "c1")));
    harness.accounts.modify(&acc.id, |stored| {
        stored.delta_cursor = Some("other".into());
        stored.cursor_version += 1;
    });

    let err = harness.engine.detect_changes(&acc, SyncMode::Delta).await.expect_err("lost CAS");

    assert!(matches!(err, MailSyncError::Conflict(_)));
    assert_eq!(harness.items.all_for(&acc.id).len(), 1);
    assert_eq!(harness.accounts.snapshot(&acc.id).delta_cursor.as_deref(), Some("other"));
}

#[tokio::test]
async fn mailbox_outage_opens_shared_breaker() {
    let harness = Harness::new();
    let acc = harness.add_account(account("f@example.com"));
    for _ in 0..3 {
        harness.mailbox.push(&acc.email, Err(MailSyncError::Transient("503".into())));
    }

    for _ in 0..3 {
        let err = harness.engine.detect_changes(&acc, SyncMode::Delta).await.expect_err("down");
        assert!(matches!(err, MailSyncError::Transient(_)));
    }
    let err = harness.engine.detect_changes(&acc, SyncMode::Delta).await.expect_err("open");

    assert!(matches!(err, MailSyncError::CircuitOpen(_)));
    assert_eq!(harness.mailbox.calls().len(), 3);
    let breaker = harness.registry.get("remote-mailbox-api").expect("registered");
    assert_eq!(breaker.state(), CircuitState::Open);
}
