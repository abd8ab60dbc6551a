//! Application context - dependency injection container

use std::sync::Arc;

use mailsync_common::BreakerRegistry;
use mailsync_core::{
    AccountRepository, DeltaSyncEngine, DependencyPolicies, ItemRepository, PeriodicSync,
    PipelineSettings, SyncControlService, SyncDefaults, SyncOrchestrator, TokenLifecycleManager,
    TransmissionPipeline, TransmissionRepository,
};
use mailsync_domain::{Config, PeriodicReport, Result};
use mailsync_infra::workers::{SyncSchedulerConfig, TransmissionWorkerConfig};
use mailsync_infra::{
    DbManager, GraphIdentity, GraphMailbox, HttpClient, HttpSink, SqliteAccountRepository,
    SqliteItemRepository, SqliteTransmissionRepository, SyncScheduler, TransmissionWorker,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::utils::health::{ComponentHealth, HealthStatus};

/// Holds every service of the daemon and the two background workers
pub struct AppContext {
    pub config: Config,
    pub db: Arc<DbManager>,
    pub breakers: BreakerRegistry,
    pub accounts: Arc<dyn AccountRepository>,
    pub pipeline: Arc<TransmissionPipeline>,
    pub control: Arc<SyncControlService>,

    sync_scheduler: Mutex<SyncScheduler>,
    transmission_worker: Mutex<TransmissionWorker>,
}

impl AppContext {
    /// Open the store and build the service graph. Workers are not started.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(DbManager::open(&config.database)?);
        let accounts: Arc<dyn AccountRepository> =
            Arc::new(SqliteAccountRepository::new(Arc::clone(&db)));
        let items: Arc<dyn ItemRepository> = Arc::new(SqliteItemRepository::new(Arc::clone(&db)));
        let records: Arc<dyn TransmissionRepository> =
            Arc::new(SqliteTransmissionRepository::new(Arc::clone(&db)));

        let breakers = BreakerRegistry::new();
        let policies = DependencyPolicies::from_settings(&config.resilience, &breakers)?;

        let http = HttpClient::new()?;
        let mailbox = Arc::new(GraphMailbox::new(http.clone(), &config.graph));
        let identity = Arc::new(GraphIdentity::new(http.clone(), &config.graph));
        let sink = Arc::new(HttpSink::new(http, &config.sink)?);

        let tokens = Arc::new(
            TokenLifecycleManager::new(Arc::clone(&accounts), identity, policies.identity.clone())
                .with_safety_window(config.token.safety_window()),
        );
        let engine = Arc::new(DeltaSyncEngine::new(
            Arc::clone(&accounts),
            Arc::clone(&items),
            mailbox,
            policies.mailbox.clone(),
        ));
        let pipeline = Arc::new(TransmissionPipeline::new(
            records,
            Arc::clone(&items),
            sink,
            policies.sink.clone(),
            PipelineSettings::from(&config.transmission),
        ));
        let orchestrator = SyncOrchestrator::new(
            Arc::clone(&accounts),
            Arc::clone(&tokens),
            engine,
            Arc::clone(&pipeline),
        )
        .with_priority(config.transmission.default_priority);

        let control = Arc::new(
            SyncControlService::new(
                Arc::clone(&accounts),
                items,
                orchestrator.clone(),
                Arc::clone(&pipeline),
                tokens,
                breakers.clone(),
            )
            .with_defaults(SyncDefaults::from(&config.sync)),
        );

        let sync_scheduler = SyncScheduler::new(
            Arc::new(PeriodicSync::new(orchestrator)),
            SyncSchedulerConfig::from(&config.sync),
        );
        let transmission_worker = TransmissionWorker::new(
            Arc::clone(&pipeline),
            TransmissionWorkerConfig::from(&config.transmission),
        );

        info!(db_path = %db.path().display(), sink = %config.sink.base_url, "application context ready");

        Ok(Self {
            config,
            db,
            breakers,
            accounts,
            pipeline,
            control,
            sync_scheduler: Mutex::new(sync_scheduler),
            transmission_worker: Mutex::new(transmission_worker),
        })
    }

    /// Start the periodic sync and the transmission worker.
    pub async fn start(&self) -> Result<()> {
        self.transmission_worker.lock().await.start()?;
        if let Err(err) = self.sync_scheduler.lock().await.start() {
            // Leave nothing half started.
            if let Err(stop_err) = self.transmission_worker.lock().await.stop().await {
                warn!(error = %stop_err, "transmission worker did not stop cleanly");
            }
            return Err(err.into());
        }
        info!("background workers started");
        Ok(())
    }

    /// Cancelled once the periodic sync stops on its own.
    pub async fn sync_finished(&self) -> CancellationToken {
        self.sync_scheduler.lock().await.finished()
    }

    /// Stop both workers. Returns the periodic report when the scheduler ran.
    ///
    /// Both workers are always asked to stop; the first error is returned.
    pub async fn shutdown(&self) -> Result<Option<PeriodicReport>> {
        let report = {
            let mut scheduler = self.sync_scheduler.lock().await;
            if scheduler.is_running() {
                Some(scheduler.stop().await)
            } else {
                None
            }
        };
        let worker = {
            let mut worker = self.transmission_worker.lock().await;
            if worker.is_running() {
                worker.stop().await
            } else {
                Ok(())
            }
        };

        let report = report.transpose()?;
        worker?;
        info!(cycles = report.as_ref().map(|r| r.cycles), "background workers stopped");
        Ok(report)
    }

    /// Check the store, the workers and every circuit breaker.
    pub async fn health(&self) -> HealthStatus {
        let mut components = Vec::new();

        let db = Arc::clone(&self.db);
        let database = match tokio::task::spawn_blocking(move || db.health_check()).await {
            Ok(Ok(())) => ComponentHealth::healthy("database"),
            Ok(Err(err)) => ComponentHealth::unhealthy("database", err.to_string()),
            Err(err) => ComponentHealth::unhealthy("database", err.to_string()),
        };
        components.push(database);

        components.push(ComponentHealth::worker(
            "sync_scheduler",
            self.sync_scheduler.lock().await.is_running(),
        ));
        components.push(ComponentHealth::worker(
            "transmission_worker",
            self.transmission_worker.lock().await.is_running(),
        ));
        components.extend(self.breakers.snapshots().iter().map(ComponentHealth::from_circuit));

        HealthStatus::from_components(components)
    }
}
