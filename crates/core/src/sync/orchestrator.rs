//! Multi-account sync fan-out

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use mailsync_common::Bulkhead;
use mailsync_domain::{
    Account, AccountSelector, AccountSyncResult, MailSyncError, Priority, Result, SyncOutcome,
    SyncRequest, SyncRunReport,
};
use tracing::{error, info, instrument, warn, Instrument};

use super::delta::{DeltaSyncEngine, SyncMode};
use crate::accounts::ports::AccountRepository;
use crate::accounts::TokenLifecycleManager;
use crate::transmission::TransmissionPipeline;

/// Runs one sync task per account under a concurrency cap
///
/// Each account runs in its own spawned task: an error or a panic in one
/// task becomes that account's `failed` entry and never reaches its
/// siblings.
#[derive(Clone)]
pub struct SyncOrchestrator {
    accounts: Arc<dyn AccountRepository>,
    tokens: Arc<TokenLifecycleManager>,
    engine: Arc<DeltaSyncEngine>,
    pipeline: Arc<TransmissionPipeline>,
    priority: Priority,
}

enum Candidate {
    Run(Account),
    Skip(AccountSyncResult),
}

impl SyncOrchestrator {
    /// Orchestrator enqueueing at normal priority
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        tokens: Arc<TokenLifecycleManager>,
        engine: Arc<DeltaSyncEngine>,
        pipeline: Arc<TransmissionPipeline>,
    ) -> Self {
        Self { accounts, tokens, engine, pipeline, priority: Priority::default() }
    }

    /// Priority given to records enqueued by sync runs
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sync every selected account and aggregate the results.
    ///
    /// Fails only for an invalid request or when the account set cannot be
    /// loaded; per-account failures are reported in the returned report.
    #[instrument(skip(self, request), fields(max_concurrent = request.max_concurrent))]
    pub async fn sync_all(&self, request: SyncRequest) -> Result<SyncRunReport> {
        request.validate()?;
        let started_at = Utc::now();
        let started = Instant::now();

        let candidates = self.resolve(&request.selector).await?;
        let bulkhead = Bulkhead::with_capacity(request.max_concurrent).map_err(MailSyncError::Validation)?;

        let mut skipped = Vec::new();
        let mut tasks = Vec::new();
        for candidate in candidates {
            let account = match candidate {
                Candidate::Run(account) => account,
                Candidate::Skip(result) => {
                    skipped.push(result);
                    continue;
                }
            };

            let this = self.clone();
            let bulkhead = bulkhead.clone();
            let request = request.clone();
            let account_id = account.id.clone();
            let email = account.email.clone();
            let span = tracing::info_span!("account_sync", account_id = %account_id);
            let handle = tokio::spawn(
                async move {
                    let started = Instant::now();
                    match bulkhead.acquire::<MailSyncError>().await {
                        Ok(_permit) => this.sync_account(account, &request).await,
                        Err(err) => AccountSyncResult::failed(
                            account.id,
                            Some(account.email),
                            &MailSyncError::from(err),
                            elapsed_ms(started),
                        ),
                    }
                }
                .instrument(span),
            );
            tasks.push((account_id, email, handle));
        }

        let (ids, handles): (Vec<_>, Vec<_>) =
            tasks.into_iter().map(|(id, email, handle)| ((id, email), handle)).unzip();
        let joined = join_all(handles).await;

        let mut results = Vec::with_capacity(joined.len() + skipped.len());
        for ((account_id, email), joined) in ids.into_iter().zip(joined) {
            let result = joined.unwrap_or_else(|join_err| {
                error!(account_id = %account_id, error = %join_err, "account sync task aborted");
                AccountSyncResult::failed(
                    account_id,
                    Some(email),
                    &MailSyncError::Internal(format!("sync task aborted: {join_err}")),
                    0,
                )
            });
            results.push(result);
        }
        results.extend(skipped);

        let report = SyncRunReport::from_results(results, started_at, elapsed_ms(started));
        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            detected = report.detected,
            transmitted = report.transmitted,
            duration_ms = report.duration_ms,
            "sync run finished"
        );
        Ok(report)
    }

    async fn resolve(&self, selector: &AccountSelector) -> Result<Vec<Candidate>> {
        match selector {
            AccountSelector::AllActive => Ok(self
                .accounts
                .list_active_sync_enabled()
                .await?
                .into_iter()
                .filter(Account::is_sync_eligible)
                .map(Candidate::Run)
                .collect()),
            AccountSelector::User(user_id) => Ok(self
                .accounts
                .list_by_user(user_id)
                .await?
                .into_iter()
                .filter(Account::is_sync_eligible)
                .map(Candidate::Run)
                .collect()),
            AccountSelector::Ids(ids) => {
                let mut candidates = Vec::with_capacity(ids.len());
                let mut seen = std::collections::HashSet::new();
                for id in ids {
                    if !seen.insert(id.as_str()) {
                        continue;
                    }
                    let candidate = match self.accounts.get(id).await? {
                        None => Candidate::Skip(AccountSyncResult::skipped(id, None, "account not found")),
                        Some(account) => match account.ineligibility_reason() {
                            Some(reason) => Candidate::Skip(AccountSyncResult::skipped(
                                &account.id,
                                Some(account.email.clone()),
                                reason,
                            )),
                            None => Candidate::Run(account),
                        },
                    };
                    candidates.push(candidate);
                }
                Ok(candidates)
            }
        }
    }

    async fn sync_account(&self, account: Account, request: &SyncRequest) -> AccountSyncResult {
        let started = Instant::now();
        match self.run_account(&account, request).await {
            Ok((detected, transmitted)) => {
                if account.error_count > 0 {
                    if let Err(err) = self.accounts.clear_errors(&account.id).await {
                        warn!(error = %err, "failed to clear account errors");
                    }
                }
                AccountSyncResult {
                    account_id: account.id,
                    email: Some(account.email),
                    outcome: SyncOutcome::Success,
                    detected,
                    transmitted,
                    message: None,
                    error_kind: None,
                    duration_ms: elapsed_ms(started),
                }
            }
            Err(err) => {
                warn!(error = %err, kind = %err.kind(), "account sync failed");
                // Fatal errors were already recorded with the status change.
                if !err.is_fatal_for_account() {
                    if let Err(store_err) =
                        self.accounts.record_error(&account.id, &err.to_string(), None).await
                    {
                        warn!(error = %store_err, "failed to record account error");
                    }
                }
                AccountSyncResult::failed(account.id, Some(account.email), &err, elapsed_ms(started))
            }
        }
    }

    /// Token check, detection (with one refresh on an auth failure), enqueue
    /// and optional drain. Returns `(detected, transmitted)`.
    async fn run_account(&self, account: &Account, request: &SyncRequest) -> Result<(usize, usize)> {
        let account = self.tokens.ensure_valid(account).await?;
        let mode = if request.use_delta { SyncMode::Delta } else { SyncMode::Full };

        let outcome = match self.engine.detect_changes(&account, mode).await {
            Err(MailSyncError::Authentication(reason)) => {
                info!(reason = %reason, "mailbox rejected token, refreshing once");
                let refreshed = self.tokens.force_refresh(&account).await?;
                self.engine.detect_changes(&refreshed, mode).await?
            }
            other => other?,
        };

        let detected = outcome.items.len();
        self.pipeline.enqueue(&outcome.items, self.priority).await?;

        let transmitted = if request.transmit {
            self.pipeline.drain_account(&account.id, self.pipeline.settings().batch_size).await?.succeeded
        } else {
            0
        };
        Ok((detected, transmitted))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
