//! Detected mailbox changes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to a remote message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

crate::impl_domain_status_conversions!(ChangeKind {
    Created => "created",
    Updated => "updated",
    Deleted => "deleted",
});

/// Delivery state of an item as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processed,
    Failed,
    Ignored,
}

crate::impl_domain_status_conversions!(ProcessingStatus {
    Pending => "pending",
    Processed => "processed",
    Failed => "failed",
    Ignored => "ignored",
});

/// Message fields carried by a change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFields {
    pub subject: Option<String>,
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub body_preview: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub has_attachments: bool,
}

/// One remote message, unique per `(account_id, remote_key)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub account_id: String,
    /// Dedup key assigned by the remote mailbox
    pub remote_key: String,
    pub change_kind: ChangeKind,
    pub processing_status: ProcessingStatus,
    pub retry_count: u32,
    pub message: Option<MessageFields>,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// First sighting of a remote message
    pub fn detected(
        account_id: impl Into<String>,
        remote_key: impl Into<String>,
        change_kind: ChangeKind,
        message: Option<MessageFields>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            account_id: account_id.into(),
            remote_key: remote_key.into(),
            change_kind,
            processing_status: ProcessingStatus::Pending,
            retry_count: 0,
            message,
            processing_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a later sighting of the same remote message.
    ///
    /// Fields are overwritten, the item goes back to `pending` so the change
    /// is delivered again. A deletion keeps the last known message fields.
    pub fn apply_change(&mut self, change_kind: ChangeKind, message: Option<MessageFields>) {
        self.change_kind = change_kind;
        if message.is_some() {
            self.message = message;
        }
        self.processing_status = ProcessingStatus::Pending;
        self.processing_error = None;
        self.updated_at = Utc::now();
    }
}

/// A change as returned by the remote mailbox API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChange {
    pub remote_key: String,
    /// Provider deletion marker
    #[serde(default)]
    pub removed: bool,
    pub message: Option<MessageFields>,
}

impl RawChange {
    /// New or changed message
    pub fn message(remote_key: impl Into<String>, message: MessageFields) -> Self {
        Self { remote_key: remote_key.into(), removed: false, message: Some(message) }
    }

    /// Deletion marker for `remote_key`
    pub fn removal(remote_key: impl Into<String>) -> Self {
        Self { remote_key: remote_key.into(), removed: true, message: None }
    }
}

/// One full delta response: every page's changes plus the cursor to resume
/// from next time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaBatch {
    pub changes: Vec<RawChange>,
    pub next_cursor: Option<String>,
}
