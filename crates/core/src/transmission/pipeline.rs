//! Transmission queue state machine

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mailsync_common::{Backoff, ErrorClassification, ResiliencePolicy};
use mailsync_domain::constants::{CANCELLED_BY_OPERATOR, DEFAULT_DRAIN_BATCH_SIZE, DEFAULT_MAX_RETRIES};
use mailsync_domain::{
    DeliveryOutcome, DrainReport, Item, MailSyncError, Priority, ProcessingStatus, Result,
    TransmissionConfig, TransmissionRecord, TransmissionStatus, TransmissionSummary,
};
use tracing::{debug, info, instrument, warn};

use super::payload::{build_payload, carries_current_change, classify_response};
use super::ports::{SinkApi, TransmissionRepository};
use crate::resilience::transmission_backoff;
use crate::sync::ports::ItemRepository;

/// Knobs for the queue
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Retries scheduled before a record fails for good
    pub max_retries: u32,
    /// Records claimed per drain pass
    pub batch_size: usize,
    /// Delay before retry number `n` (1-based)
    pub backoff: Backoff,
    /// Sink path for records enqueued without one
    pub default_endpoint: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&TransmissionConfig::default())
    }
}

impl From<&TransmissionConfig> for PipelineSettings {
    fn from(config: &TransmissionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            batch_size: config.batch_size,
            backoff: transmission_backoff(config),
            default_endpoint: None,
        }
    }
}

impl PipelineSettings {
    /// Settings with the built-in defaults and the given backoff
    pub fn with_backoff(backoff: Backoff) -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            batch_size: DEFAULT_DRAIN_BATCH_SIZE,
            backoff,
            default_endpoint: None,
        }
    }
}

/// Drives records from `pending` to a terminal status
///
/// Every delivery starts with a claim on the record in the store, so any
/// number of pipelines can drain the same queue without sending a record
/// twice at the same time. Delivery is at-least-once: the sink gets the
/// record id as idempotency key.
pub struct TransmissionPipeline {
    records: Arc<dyn TransmissionRepository>,
    items: Arc<dyn ItemRepository>,
    sink: Arc<dyn SinkApi>,
    policy: ResiliencePolicy,
    settings: PipelineSettings,
}

impl TransmissionPipeline {
    /// Pipeline over the given store and sink; `policy` wraps every send
    pub fn new(
        records: Arc<dyn TransmissionRepository>,
        items: Arc<dyn ItemRepository>,
        sink: Arc<dyn SinkApi>,
        policy: ResiliencePolicy,
        settings: PipelineSettings,
    ) -> Self {
        Self { records, items, sink, policy, settings }
    }

    /// Settings in use
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Enqueue
    // ------------------------------------------------------------------

    /// Enqueue items in order; returns how many records were created.
    ///
    /// An item whose record is still waiting gets that record's payload
    /// replaced with its latest state. An item whose record is being
    /// delivered gets a follow-up record once that delivery finishes.
    pub async fn enqueue(&self, items: &[Item], priority: Priority) -> Result<usize> {
        self.enqueue_bulk(items, priority, None).await
    }

    /// Enqueue many items for one endpoint in a single call.
    #[instrument(skip(self, items), fields(items = items.len(), priority = %priority))]
    pub async fn enqueue_bulk(
        &self,
        items: &[Item],
        priority: Priority,
        endpoint: Option<&str>,
    ) -> Result<usize> {
        let endpoint = endpoint.map(str::to_string).or_else(|| self.settings.default_endpoint.clone());
        let mut created = 0;
        let mut refreshed = 0;
        for item in items {
            let record = TransmissionRecord::new(
                item,
                build_payload(item),
                priority,
                self.settings.max_retries,
                endpoint.clone(),
            );
            if self.records.insert(&record).await? {
                created += 1;
            } else if self.records.refresh_queued(&item.id, &record.payload, priority, Utc::now()).await? {
                refreshed += 1;
            } else if self.records.insert(&record).await? {
                // The active record finished between the two calls.
                created += 1;
            } else {
                debug!(item_id = %item.id, "item in flight; follow-up after delivery");
            }
        }
        if created > 0 || refreshed > 0 {
            debug!(created, refreshed, "records enqueued");
        }
        Ok(created)
    }

    /// Queue a follow-up when the item changed while `record` was being
    /// delivered. Returns `true` when the item is queued again.
    async fn requeue_if_changed(&self, record: &TransmissionRecord) -> Result<bool> {
        let Some(item) = self.items.get(&record.item_id).await? else {
            return Ok(false);
        };
        if carries_current_change(&record.payload, &item) {
            return Ok(false);
        }
        let follow_up = TransmissionRecord::new(
            &item,
            build_payload(&item),
            record.priority,
            self.settings.max_retries,
            record.endpoint.clone(),
        );
        if self.records.insert(&follow_up).await? {
            debug!(item_id = %item.id, record_id = %follow_up.id, "item changed during delivery; requeued");
        }
        self.items.set_processing_status(&item.id, ProcessingStatus::Pending, None).await?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Drain
    // ------------------------------------------------------------------

    /// Deliver up to `limit` ready records across all accounts
    pub async fn drain(&self, limit: usize) -> Result<DrainReport> {
        self.drain_at(Utc::now(), limit, None).await
    }

    /// Deliver up to `limit` ready records of one account
    pub async fn drain_account(&self, account_id: &str, limit: usize) -> Result<DrainReport> {
        self.drain_at(Utc::now(), limit, Some(account_id)).await
    }

    /// Drain as if the current time were `now`.
    ///
    /// Records are processed one after another in drain order, so a higher
    /// priority record is never sent after a lower one from the same pass.
    #[instrument(skip(self))]
    pub async fn drain_at(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        account_id: Option<&str>,
    ) -> Result<DrainReport> {
        let ready = self.records.list_ready(now, limit, account_id).await?;
        let mut report = DrainReport::default();

        for record in ready {
            match self.process_record_at(&record.id, now).await {
                Ok(outcome) => tally(&mut report, outcome),
                Err(err) => {
                    warn!(record_id = %record.id, error = %err, "record processing failed");
                    report.failed += 1;
                }
            }
        }

        if report.attempted > 0 || report.claim_conflicts > 0 {
            info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                retried = report.retried,
                failed = report.failed,
                claim_conflicts = report.claim_conflicts,
                "drain pass finished"
            );
        }
        Ok(report)
    }

    /// Claim and deliver one record
    pub async fn process_record(&self, id: &str) -> Result<DeliveryOutcome> {
        self.process_record_at(id, Utc::now()).await
    }

    /// Claim and deliver one record as if the current time were `now`.
    #[instrument(skip(self))]
    pub async fn process_record_at(&self, id: &str, now: DateTime<Utc>) -> Result<DeliveryOutcome> {
        if !self.records.claim(id, now).await? {
            debug!("record not claimable");
            return Ok(DeliveryOutcome::NotClaimed);
        }
        let mut record = self
            .records
            .get(id)
            .await?
            .ok_or_else(|| MailSyncError::NotFound(format!("transmission {id}")))?;

        match self.deliver(&record).await {
            Ok(status) => {
                record.status = TransmissionStatus::Success;
                record.response_status = Some(status);
                record.next_retry_at = None;
                record.last_error = None;
                record.completed_at = Some(now);
                record.updated_at = now;
                self.records.update(&record).await?;
                if !self.requeue_if_changed(&record).await? {
                    self.items
                        .set_processing_status(&record.item_id, ProcessingStatus::Processed, None)
                        .await?;
                }
                debug!(status, "record delivered");
                Ok(DeliveryOutcome::Delivered)
            }
            Err(err) => self.handle_failure(record, &err, now).await,
        }
    }

    async fn deliver(&self, record: &TransmissionRecord) -> Result<u16> {
        let sink = Arc::clone(&self.sink);
        let response = self
            .policy
            .execute(|| {
                let sink = Arc::clone(&sink);
                let payload = record.payload.clone();
                let endpoint = record.endpoint.clone();
                let key = record.id.clone();
                async move {
                    let response = sink.send(&payload, endpoint.as_deref(), &key).await?;
                    classify_response(response)
                }
            })
            .await
            .map_err(MailSyncError::from)?;
        Ok(response.status)
    }

    /// Apply the retry rules to a failed delivery.
    ///
    /// - open circuit: nothing was sent, so the record waits one backoff
    ///   step without spending a retry
    /// - retriable with budget left: `retry_count += 1`, `retrying`, next
    ///   attempt after `max(backoff(retry_count), retry_after)`
    /// - anything else: terminal `failed`
    async fn handle_failure(
        &self,
        mut record: TransmissionRecord,
        err: &MailSyncError,
        now: DateTime<Utc>,
    ) -> Result<DeliveryOutcome> {
        record.last_error = Some(err.to_string());
        record.response_status = response_status(err);
        record.updated_at = now;

        let outcome = if matches!(err, MailSyncError::CircuitOpen(_)) {
            record.status = TransmissionStatus::Retrying;
            record.next_retry_at = Some(now + to_chrono(self.settings.backoff.delay(record.retry_count.max(1))));
            DeliveryOutcome::RetryScheduled
        } else if err.is_retryable() && record.has_retries_left() {
            record.retry_count += 1;
            let delay = self.settings.backoff.delay(record.retry_count);
            let delay = err.retry_after().map_or(delay, |floor| delay.max(floor));
            record.status = TransmissionStatus::Retrying;
            record.next_retry_at = Some(now + to_chrono(delay));
            DeliveryOutcome::RetryScheduled
        } else {
            record.status = TransmissionStatus::Failed;
            record.next_retry_at = None;
            record.completed_at = Some(now);
            DeliveryOutcome::Failed
        };

        self.records.update(&record).await?;
        match outcome {
            DeliveryOutcome::Failed => {
                warn!(
                    record_id = %record.id,
                    retry_count = record.retry_count,
                    error = %err,
                    "record failed permanently"
                );
                if !self.requeue_if_changed(&record).await? {
                    self.items
                        .set_processing_status(&record.item_id, ProcessingStatus::Failed, Some(&err.to_string()))
                        .await?;
                }
            }
            _ => debug!(
                record_id = %record.id,
                retry_count = record.retry_count,
                next_retry_at = ?record.next_retry_at,
                error = %err,
                "retry scheduled"
            ),
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Operator actions
    // ------------------------------------------------------------------

    /// Cancel a `pending` or `retrying` record.
    pub async fn cancel(&self, id: &str, reason: Option<&str>) -> Result<TransmissionRecord> {
        let reason = reason.unwrap_or(CANCELLED_BY_OPERATOR);
        if !self.records.cancel(id, reason, Utc::now()).await? {
            return match self.records.get(id).await? {
                None => Err(MailSyncError::NotFound(format!("transmission {id}"))),
                Some(record) => Err(MailSyncError::Conflict(format!(
                    "transmission {id} is {} and cannot be cancelled",
                    record.status
                ))),
            };
        }
        info!(record_id = id, reason, "transmission cancelled");
        self.records
            .get(id)
            .await?
            .ok_or_else(|| MailSyncError::NotFound(format!("transmission {id}")))
    }

    /// Give up to `limit` failed records a fresh retry budget; returns how
    /// many were reset.
    pub async fn retry_failed(&self, limit: usize) -> Result<usize> {
        let reset = self.records.reset_failed(limit, Utc::now()).await?;
        for record in &reset {
            self.items.set_processing_status(&record.item_id, ProcessingStatus::Pending, None).await?;
        }
        info!(count = reset.len(), "failed transmissions reset");
        Ok(reset.len())
    }

    /// Status and priority breakdown of the queue
    pub async fn summary(&self) -> Result<TransmissionSummary> {
        let by_status = self.records.count_by_status().await?;
        let by_priority = self.records.count_by_priority().await?;
        Ok(TransmissionSummary::new(by_status, by_priority))
    }

    /// Delete terminal records older than `older_than`
    pub async fn cleanup(&self, older_than: Duration) -> Result<u64> {
        let cutoff = cutoff_before(older_than);
        let deleted = self.records.delete_terminal_before(cutoff).await?;
        info!(deleted, "old transmissions removed");
        Ok(deleted)
    }

    /// Return records stuck `in_progress` longer than `stale_after` to the
    /// queue
    pub async fn recover_stale(&self, stale_after: Duration) -> Result<u64> {
        let recovered = self.records.recover_stale(cutoff_before(stale_after)).await?;
        if recovered > 0 {
            warn!(recovered, "requeued records left in progress");
        }
        Ok(recovered)
    }
}

fn tally(report: &mut DrainReport, outcome: DeliveryOutcome) {
    match outcome {
        DeliveryOutcome::Delivered => {
            report.attempted += 1;
            report.succeeded += 1;
        }
        DeliveryOutcome::RetryScheduled => {
            report.attempted += 1;
            report.retried += 1;
        }
        DeliveryOutcome::Failed => {
            report.attempted += 1;
            report.failed += 1;
        }
        DeliveryOutcome::NotClaimed => report.claim_conflicts += 1,
    }
}

fn response_status(err: &MailSyncError) -> Option<u16> {
    match err {
        MailSyncError::Rejected { status, .. } => Some(*status),
        MailSyncError::RateLimited { .. } => Some(429),
        _ => None,
    }
}

fn cutoff_before(age: Duration) -> DateTime<Utc> {
    Utc::now().checked_sub_signed(to_chrono(age)).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
