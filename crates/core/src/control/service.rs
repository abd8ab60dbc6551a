//! Sync control service - the operations an operator or API can invoke

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use mailsync_common::{BreakerRegistry, Bulkhead};
use mailsync_domain::constants::{MAX_BATCH_CONCURRENCY, MAX_ITEM_PAGE_SIZE};
use mailsync_domain::{
    AccountHealth, AccountOperation, AccountOperationResult, AccountSelector, AccountStatus,
    BatchOperationReport, DependencyStatus, ItemsByStatus, MailSyncError, ProcessingStatus, Result,
    SyncConfig, SyncRequest, SyncRunReport, SyncStatusReport, TokenRefreshSummary,
    TransmissionRecord, TransmissionSummary,
};
use tracing::{info, instrument, warn};

use super::health::assess_health;
use crate::accounts::ports::AccountRepository;
use crate::accounts::TokenLifecycleManager;
use crate::sync::ports::ItemRepository;
use crate::sync::SyncOrchestrator;
use crate::transmission::TransmissionPipeline;

/// Request defaults for operator-triggered runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncDefaults {
    pub max_concurrent: usize,
    pub use_delta: bool,
    pub transmit: bool,
}

impl From<&SyncConfig> for SyncDefaults {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            use_delta: config.use_delta,
            transmit: config.transmit_after_detect,
        }
    }
}

impl Default for SyncDefaults {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

/// Facade over the sync services
pub struct SyncControlService {
    accounts: Arc<dyn AccountRepository>,
    items: Arc<dyn ItemRepository>,
    orchestrator: SyncOrchestrator,
    pipeline: Arc<TransmissionPipeline>,
    tokens: Arc<TokenLifecycleManager>,
    registry: BreakerRegistry,
    defaults: SyncDefaults,
}

impl SyncControlService {
    /// Wire the facade; run defaults come from `SyncConfig::default()`
    /// until [`with_defaults`](Self::with_defaults) replaces them.
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        items: Arc<dyn ItemRepository>,
        orchestrator: SyncOrchestrator,
        pipeline: Arc<TransmissionPipeline>,
        tokens: Arc<TokenLifecycleManager>,
        registry: BreakerRegistry,
    ) -> Self {
        Self {
            accounts,
            items,
            orchestrator,
            pipeline,
            tokens,
            registry,
            defaults: SyncDefaults::default(),
        }
    }

    /// Replace the defaults used by `trigger_sync`
    #[must_use]
    pub fn with_defaults(mut self, defaults: SyncDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Sync the given accounts, or every active account when `None`
    #[instrument(skip(self))]
    pub async fn trigger_sync(&self, account_ids: Option<Vec<String>>) -> Result<SyncRunReport> {
        let selector = match account_ids {
            Some(ids) => AccountSelector::Ids(ids),
            None => AccountSelector::AllActive,
        };
        self.orchestrator
            .sync_all(SyncRequest {
                selector,
                max_concurrent: self.defaults.max_concurrent,
                use_delta: self.defaults.use_delta,
                transmit: self.defaults.transmit,
            })
            .await
    }

    /// Account counts, queue summary and breaker states
    pub async fn sync_status(&self) -> Result<SyncStatusReport> {
        let accounts = self.accounts.list().await?;
        let mut accounts_by_status = BTreeMap::new();
        for account in &accounts {
            *accounts_by_status.entry(account.status).or_insert(0) += 1;
        }

        let dependencies = self
            .registry
            .snapshots()
            .into_iter()
            .map(|snapshot| DependencyStatus {
                name: snapshot.name,
                state: snapshot.state.as_str().to_string(),
                consecutive_failures: snapshot.consecutive_failures,
                open_for_secs: snapshot.open_for.map(|d| d.as_secs()),
                rejected_calls: snapshot.rejected_calls,
            })
            .collect();

        Ok(SyncStatusReport {
            generated_at: Utc::now(),
            accounts_total: accounts.len(),
            accounts_by_status,
            sync_enabled: accounts.iter().filter(|a| a.sync_enabled).count(),
            last_sync_at: accounts.iter().filter_map(|a| a.last_sync_at).max(),
            transmissions: self.pipeline.summary().await?,
            dependencies,
        })
    }

    /// Health of every account, unhealthy ones first
    pub async fn accounts_by_health(&self) -> Result<Vec<AccountHealth>> {
        let now = Utc::now();
        let window = self.tokens.safety_window();
        let mut health: Vec<AccountHealth> =
            self.accounts.list().await?.iter().map(|a| assess_health(a, now, window)).collect();
        health.sort_by(|a, b| {
            a.healthy
                .cmp(&b.healthy)
                .then_with(|| b.issues.len().cmp(&a.issues.len()))
                .then_with(|| a.email.cmp(&b.email))
        });
        Ok(health)
    }

    /// Reset up to `limit` failed transmissions
    pub async fn retry_failed(&self, limit: usize) -> Result<usize> {
        if limit == 0 {
            return Err(MailSyncError::Validation("limit must be at least 1".into()));
        }
        self.pipeline.retry_failed(limit).await
    }

    /// Apply `operation` to each listed account, at most `concurrency` at a
    /// time.
    ///
    /// Fails only for an invalid request. Unknown accounts and failed
    /// refreshes are reported per account; results keep the request order.
    #[instrument(skip(self, account_ids), fields(accounts = account_ids.len(), operation = %operation))]
    pub async fn batch_account_operation(
        &self,
        account_ids: &[String],
        operation: AccountOperation,
        concurrency: usize,
    ) -> Result<BatchOperationReport> {
        if account_ids.is_empty() {
            return Err(MailSyncError::Validation("account id list is empty".into()));
        }
        if concurrency == 0 || concurrency > MAX_BATCH_CONCURRENCY {
            return Err(MailSyncError::Validation(format!(
                "concurrency must be between 1 and {MAX_BATCH_CONCURRENCY}"
            )));
        }
        let bulkhead = Bulkhead::with_capacity(concurrency).map_err(MailSyncError::Validation)?;

        let runs = account_ids.iter().map(|account_id| {
            let bulkhead = &bulkhead;
            async move {
                let applied = match bulkhead.acquire::<MailSyncError>().await {
                    Ok(_permit) => self.apply_account_operation(account_id, operation).await,
                    Err(err) => Err(MailSyncError::from(err)),
                };
                match applied {
                    Ok(()) => AccountOperationResult::succeeded(account_id.as_str()),
                    Err(err) => {
                        warn!(account_id = %account_id, error = %err, "account operation failed");
                        AccountOperationResult::failed(account_id.as_str(), &err)
                    }
                }
            }
        });
        let report = BatchOperationReport::from_results(operation, join_all(runs).await);

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "batch account operation finished"
        );
        Ok(report)
    }

    async fn apply_account_operation(&self, account_id: &str, operation: AccountOperation) -> Result<()> {
        let account = self
            .accounts
            .get(account_id)
            .await?
            .ok_or_else(|| MailSyncError::NotFound(format!("account {account_id}")))?;
        match operation {
            AccountOperation::Activate => {
                self.accounts.set_activation(account_id, AccountStatus::Active, true).await?;
                self.accounts.clear_errors(account_id).await?;
            }
            AccountOperation::Deactivate => {
                self.accounts.set_activation(account_id, AccountStatus::Inactive, false).await?;
            }
            AccountOperation::RefreshToken => {
                self.tokens.force_refresh(&account).await?;
            }
        }
        Ok(())
    }

    /// One page of items in `status`, oldest first
    pub async fn items_by_status(
        &self,
        status: ProcessingStatus,
        account_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<ItemsByStatus> {
        if limit == 0 || limit > MAX_ITEM_PAGE_SIZE {
            return Err(MailSyncError::Validation(format!(
                "limit must be between 1 and {MAX_ITEM_PAGE_SIZE}"
            )));
        }
        let items = self.items.list_by_status(account_id, status, limit, offset).await?;
        let total = self.items.count_by_status(account_id, status).await?;
        Ok(ItemsByStatus { status, total, items })
    }

    /// Queue breakdown by status and priority
    pub async fn transmission_summary(&self) -> Result<TransmissionSummary> {
        self.pipeline.summary().await
    }

    /// Refresh tokens expiring within the next `hours`
    pub async fn refresh_expiring_tokens(&self, hours: u32) -> Result<TokenRefreshSummary> {
        if hours == 0 {
            return Err(MailSyncError::Validation("hours must be at least 1".into()));
        }
        self.tokens.refresh_expiring(Duration::from_secs(u64::from(hours) * 3600)).await
    }

    /// Cancel a waiting record; see [`TransmissionPipeline::cancel`]
    pub async fn cancel_transmission(&self, id: &str, reason: Option<&str>) -> Result<TransmissionRecord> {
        self.pipeline.cancel(id, reason).await
    }

    /// Delete finished transmissions older than `days`
    pub async fn cleanup_transmissions(&self, days: u32) -> Result<u64> {
        self.pipeline.cleanup(Duration::from_secs(u64::from(days) * 86_400)).await
    }

    /// Drop the stored cursor so the next sync fetches everything
    pub async fn request_full_resync(&self, account_id: &str) -> Result<()> {
        if self.accounts.get(account_id).await?.is_none() {
            return Err(MailSyncError::NotFound(format!("account {account_id}")));
        }
        let version = self.accounts.reset_cursor(account_id).await?;
        info!(account_id, cursor_version = version, "full resync requested");
        Ok(())
    }
}
