use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::pipeline::RetentionSweeper;

/// The scheduled retention jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepJob {
    Expire,
    Archive,
}

impl SweepJob {
    pub fn name(self) -> &'static str {
        match self {
            SweepJob::Expire => "expiry-sweep",
            SweepJob::Archive => "archive-sweep",
        }
    }

    async fn run(self, sweeper: &RetentionSweeper) -> Result<usize, crate::PipelineError> {
        let now = Utc::now();
        match self {
            SweepJob::Expire => sweeper.expire_overdue(now).await,
            SweepJob::Archive => sweeper.archive_stale(now).await,
        }
    }
}

/// What happened to a manual trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// An extra run was queued.
    Queued,
    /// A run was already pending; this trigger folds into it.
    Coalesced,
    /// The job has stopped.
    Stopped,
}

/// Periods of the scheduled jobs.
#[derive(Debug, Clone)]
pub struct SweepScheduler {
    pub expiry_interval: Duration,
    pub archive_interval: Duration,
}

impl Default for SweepScheduler {
    fn default() -> Self {
        Self {
            expiry_interval: Duration::from_secs(3600),
            archive_interval: Duration::from_secs(86_400),
        }
    }
}

impl From<&PipelineConfig> for SweepScheduler {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            expiry_interval: config.expiry_sweep_interval,
            archive_interval: config.archive_sweep_interval,
        }
    }
}

/// Handle for the running jobs (manual trigger + shutdown).
#[derive(Debug)]
pub struct SweepSchedulerHandle {
    shutdown: watch::Sender<bool>,
    expire: mpsc::Sender<()>,
    archive: mpsc::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl SweepSchedulerHandle {
    /// Ask for an extra run of `job` now.
    ///
    /// Triggers are coalesced: if a run is already pending this is a no-op.
    pub fn trigger(&self, job: SweepJob) -> TriggerOutcome {
        let tx = match job {
            SweepJob::Expire => &self.expire,
            SweepJob::Archive => &self.archive,
        };
        match tx.try_send(()) {
            Ok(()) => TriggerOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(())) => TriggerOutcome::Coalesced,
            Err(mpsc::error::TrySendError::Closed(())) => TriggerOutcome::Stopped,
        }
    }

    /// Stop both jobs and wait for them. A run in progress is finished first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

impl SweepScheduler {
    /// Spawn one Tokio task per job on the current runtime.
    ///
    /// Each job runs once on startup, then on every tick of its interval.
    /// A failing run is logged; the next tick tries again.
    pub fn spawn(&self, sweeper: Arc<RetentionSweeper>) -> SweepSchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (expire_tx, expire_rx) = mpsc::channel(1);
        let (archive_tx, archive_rx) = mpsc::channel(1);

        let tasks = vec![
            tokio::spawn(job_loop(
                SweepJob::Expire,
                self.expiry_interval,
                sweeper.clone(),
                expire_rx,
                shutdown_rx.clone(),
            )),
            tokio::spawn(job_loop(
                SweepJob::Archive,
                self.archive_interval,
                sweeper,
                archive_rx,
                shutdown_rx,
            )),
        ];

        SweepSchedulerHandle {
            shutdown: shutdown_tx,
            expire: expire_tx,
            archive: archive_tx,
            tasks,
        }
    }
}

async fn job_loop(
    job: SweepJob,
    period: Duration,
    sweeper: Arc<RetentionSweeper>,
    mut trigger_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(job = job.name(), period_secs = period.as_secs(), "sweep job started");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {}
            Some(()) = trigger_rx.recv() => debug!(job = job.name(), "manual trigger"),
        }

        match job.run(&sweeper).await {
            Ok(count) => debug!(job = job.name(), count, "sweep run finished"),
            Err(err) => warn!(job = job.name(), error = %err, "sweep run failed"),
        }
    }

    info!(job = job.name(), "sweep job stopped");
}
