//! Runtime wiring: store backends, the session event bus, pipeline
//! components, the settlement worker and the sweep scheduler.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::runtime::Handle;

use bilee_events::InMemoryEventBus;
use bilee_infra::PipelineConfig;
use bilee_infra::StoreError;
use bilee_infra::pipeline::{
    AggregationEngine, HmacSha256Scheme, IdempotencyGuard, ReceiptGenerator, ReceiptRecovery, RetentionSweeper,
    SessionLifecycleManager, WebhookVerifier,
};
use bilee_infra::store::{
    AggregateStore, ArchiveStore, InMemoryAggregateStore, InMemoryArchiveStore, InMemoryMerchantDirectory,
    InMemoryReceiptStore, InMemorySessionStore, MerchantDirectory, PostgresStores, PublishingSessionStore,
    ReceiptStore, SessionStore,
};
use bilee_infra::workers::{
    SessionEventWorker, SweepJob, SweepScheduler, SweepSchedulerHandle, TriggerOutcome, WorkerHandle,
};
use bilee_sessions::SessionEvent;

type SessionBus = Arc<InMemoryEventBus<SessionEvent>>;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to start {worker}: {source}")]
    Worker {
        worker: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Everything the HTTP handlers need, shared behind one `Arc`.
pub struct AppServices {
    pub config: PipelineConfig,
    /// Publishing store: every write here reaches the lifecycle manager.
    pub sessions: Arc<dyn SessionStore>,
    pub receipts: Arc<dyn ReceiptStore>,
    pub webhook: WebhookVerifier,
    pub aggregation: AggregationEngine,
    pub recovery: ReceiptRecovery,
    worker: Mutex<Option<WorkerHandle>>,
    sweeps: Mutex<Option<SweepSchedulerHandle>>,
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}

impl AppServices {
    /// Ask the scheduler for an extra run of `job`.
    pub fn trigger_sweep(&self, job: SweepJob) -> TriggerOutcome {
        let guard = match self.sweeps.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(sweeps) => sweeps.trigger(job),
            None => TriggerOutcome::Stopped,
        }
    }

    /// Stop the sweep jobs, then the settlement worker. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(sweeps) = take(&self.sweeps) {
            sweeps.shutdown().await;
        }
        if let Some(worker) = take(&self.worker) {
            worker.shutdown();
        }
    }
}

struct Backends {
    sessions: Arc<dyn SessionStore>,
    receipts: Arc<dyn ReceiptStore>,
    merchants: Arc<dyn MerchantDirectory>,
    aggregates: Arc<dyn AggregateStore>,
    archive: Arc<dyn ArchiveStore>,
}

async fn backends(config: &PipelineConfig) -> Result<Backends, StoreError> {
    match &config.database_url {
        Some(url) => {
            let pg = Arc::new(PostgresStores::connect(url, config.store_timeout).await?);
            pg.migrate().await?;
            tracing::info!("using postgres stores");
            Ok(Backends {
                sessions: pg.clone(),
                receipts: pg.clone(),
                merchants: pg.clone(),
                aggregates: pg.clone(),
                archive: pg,
            })
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores (data is lost on restart)");
            Ok(Backends {
                sessions: Arc::new(InMemorySessionStore::new()),
                receipts: Arc::new(InMemoryReceiptStore::new()),
                merchants: Arc::new(InMemoryMerchantDirectory::new()),
                aggregates: Arc::new(InMemoryAggregateStore::new()),
                archive: Arc::new(InMemoryArchiveStore::new()),
            })
        }
    }
}

/// Build the services and start the settlement worker and the sweep jobs on
/// the current runtime.
pub async fn build_services(config: PipelineConfig) -> Result<AppServices, StartupError> {
    let backends = backends(&config).await?;

    let bus: SessionBus = Arc::new(InMemoryEventBus::new());
    let sessions: Arc<dyn SessionStore> = Arc::new(PublishingSessionStore::new(backends.sessions, bus.clone()));

    let generator = ReceiptGenerator::new(
        IdempotencyGuard::new(backends.receipts.clone()),
        sessions.clone(),
        backends.merchants,
    );
    let manager = Arc::new(SessionLifecycleManager::new(sessions.clone(), generator.clone()));
    let worker = SessionEventWorker::spawn("session-events", bus, manager, Handle::current()).map_err(|source| {
        StartupError::Worker {
            worker: "session-events",
            source,
        }
    })?;

    let scheme = Arc::new(HmacSha256Scheme::new(config.webhook_secret.as_bytes()));
    let webhook = WebhookVerifier::new(sessions.clone(), scheme, config.reconciliation_tolerance);
    let aggregation = AggregationEngine::new(sessions.clone(), backends.aggregates, config.merchant_utc_offset);
    let sweeper = Arc::new(RetentionSweeper::new(
        sessions.clone(),
        backends.archive,
        config.sweep_batch_limit,
        config.retention_days,
    ));
    let recovery = ReceiptRecovery::new(sessions.clone(), backends.receipts.clone(), generator);
    let sweeps = SweepScheduler::from(&config).spawn(sweeper);

    Ok(AppServices {
        config,
        sessions,
        receipts: backends.receipts,
        webhook,
        aggregation,
        recovery,
        worker: Mutex::new(Some(worker)),
        sweeps: Mutex::new(Some(sweeps)),
    })
}
