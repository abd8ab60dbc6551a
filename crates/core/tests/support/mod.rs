//! Shared test helpers for `mailsync-core` integration tests.
//!
//! [`Harness`] wires every service to in-memory fakes with resilience
//! settings that never sleep for long, so tests can focus on behaviour
//! instead of boilerplate.

#![allow(dead_code)]

pub mod remotes;
pub mod repositories;

use std::sync::Arc;

use chrono::Utc;
use mailsync_common::{Backoff, BreakerRegistry};
use mailsync_core::{
    DeltaSyncEngine, DependencyPolicies, PipelineSettings, SyncControlService, SyncOrchestrator,
    TokenLifecycleManager, TransmissionPipeline,
};
use mailsync_domain::{
    Account, Credential, DependencySettings, MessageFields, RawChange, ResilienceSettings,
};

use self::remotes::{fresh_credential, FakeIdentity, FakeMailbox, FakeSink};
use self::repositories::{InMemoryAccounts, InMemoryItems, InMemoryTransmissions};

/// One attempt per call, tiny delays, breaker opening after 3 failures.
pub fn fast_settings() -> ResilienceSettings {
    ResilienceSettings {
        failure_threshold: 3,
        max_attempts: 1,
        base_delay_ms: 1,
        max_delay_ms: 5,
        jitter: false,
        call_timeout_secs: 5,
        ..ResilienceSettings::default()
    }
}

/// Record backoff without jitter: 60s, 120s, 240s, ...
pub fn record_backoff() -> Backoff {
    Backoff::exponential(
        std::time::Duration::from_secs(60),
        2.0,
        std::time::Duration::from_secs(1800),
    )
    .without_jitter()
}

pub fn account(email: &str) -> Account {
    Account::new("user-1", email).with_credential(fresh_credential(email))
}

pub fn expiring_credential(tag: &str) -> Credential {
    Credential {
        access_token: format!("old-{tag}"),
        refresh_token: Some(format!("refresh-{tag}")),
        expires_at: Utc::now() + chrono::Duration::minutes(1),
    }
}

pub fn message(key: &str, subject: &str) -> RawChange {
    RawChange::message(key, MessageFields { subject: Some(subject.to_string()), ..Default::default() })
}

pub struct Harness {
    pub accounts: InMemoryAccounts,
    pub items: InMemoryItems,
    pub records: InMemoryTransmissions,
    pub identity: FakeIdentity,
    pub mailbox: FakeMailbox,
    pub sink: FakeSink,
    pub registry: BreakerRegistry,
    pub tokens: Arc<TokenLifecycleManager>,
    pub engine: Arc<DeltaSyncEngine>,
    pub pipeline: Arc<TransmissionPipeline>,
    pub orchestrator: SyncOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    pub fn with_settings(settings: ResilienceSettings) -> Self {
        let accounts = InMemoryAccounts::default();
        let items = InMemoryItems::default();
        let records = InMemoryTransmissions::default();
        let identity = FakeIdentity::default();
        let mailbox = FakeMailbox::default();
        let sink = FakeSink::default();
        let registry = BreakerRegistry::new();

        let dependencies = DependencySettings {
            mailbox: settings.clone(),
            identity: settings.clone(),
            sink: settings,
        };
        let policies =
            DependencyPolicies::from_settings(&dependencies, &registry).expect("valid settings");

        let tokens = Arc::new(TokenLifecycleManager::new(
            Arc::new(accounts.clone()),
            Arc::new(identity.clone()),
            policies.identity,
        ));
        let engine = Arc::new(DeltaSyncEngine::new(
            Arc::new(accounts.clone()),
            Arc::new(items.clone()),
            Arc::new(mailbox.clone()),
            policies.mailbox,
        ));
        let pipeline = Arc::new(TransmissionPipeline::new(
            Arc::new(records.clone()),
            Arc::new(items.clone()),
            Arc::new(sink.clone()),
            policies.sink,
            PipelineSettings::with_backoff(record_backoff()),
        ));
        let orchestrator = SyncOrchestrator::new(
            Arc::new(accounts.clone()),
            Arc::clone(&tokens),
            Arc::clone(&engine),
            Arc::clone(&pipeline),
        );

        Self {
            accounts,
            items,
            records,
            identity,
            mailbox,
            sink,
            registry,
            tokens,
            engine,
            pipeline,
            orchestrator,
        }
    }

    pub fn control(&self) -> SyncControlService {
        SyncControlService::new(
            Arc::new(self.accounts.clone()),
            Arc::new(self.items.clone()),
            self.orchestrator.clone(),
            Arc::clone(&self.pipeline),
            Arc::clone(&self.tokens),
            self.registry.clone(),
        )
    }

    /// Store `account` and return it
    pub fn add_account(&self, account: Account) -> Account {
        self.accounts.insert(account.clone());
        account
    }
}
