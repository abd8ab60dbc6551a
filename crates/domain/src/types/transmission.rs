//! Delivery tracking for detected items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::item::Item;

/// State of one delivery attempt series
///
/// ```text
/// pending ──claim──▶ in_progress ──2xx──▶ success
///                        │  └──non-retriable / exhausted──▶ failed
///                        └──retriable──▶ retrying ──next_retry_at──▶ (claimable)
/// pending | retrying ──cancel──▶ cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Retrying,
    Cancelled,
}

crate::impl_domain_status_conversions!(TransmissionStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Success => "success",
    Failed => "failed",
    Retrying => "retrying",
    Cancelled => "cancelled",
});

impl TransmissionStatus {
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::InProgress,
        Self::Success,
        Self::Failed,
        Self::Retrying,
        Self::Cancelled,
    ];

    /// No further automatic transition happens from this status
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    /// Operators may cancel from here
    pub const fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Retrying)
    }
}

/// Drain priority; `Ord` follows drain order (urgent is greatest)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
/// Drain order tier; higher tiers are always sent first
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

crate::impl_domain_status_conversions!(Priority {
    Low => "low",
    Normal => "normal",
    High => "high",
    Urgent => "urgent",
});

impl Priority {
    pub const ALL: [Self; 4] = [Self::Urgent, Self::High, Self::Normal, Self::Low];

    /// Numeric rank stored alongside the record so the store can sort on it
    pub const fn rank(&self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }
}

/// Delivery of one item to the sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionRecord {
    pub id: String,
    pub item_id: String,
    pub account_id: String,
    pub status: TransmissionStatus,
    pub priority: Priority,
    /// Body sent to the sink, captured at enqueue time
    pub payload: serde_json::Value,
    /// Sink path; `None` uses the configured default
    pub endpoint: Option<String>,
    /// Retries scheduled so far
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub response_status: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransmissionRecord {
    pub fn new(
        item: &Item,
        payload: serde_json::Value,
        priority: Priority,
        max_retries: u32,
        endpoint: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            item_id: item.id.clone(),
            account_id: item.account_id.clone(),
            status: TransmissionStatus::Pending,
            priority,
            payload,
            endpoint,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
            last_error: None,
            response_status: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Claimable at `now`
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            TransmissionStatus::Pending => true,
            TransmissionStatus::Retrying => self.next_retry_at.map_or(true, |at| at <= now),
            _ => false,
        }
    }

    /// Another retry may still be scheduled
    pub const fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
