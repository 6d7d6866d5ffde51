//! Background workers: event delivery and scheduled sweeps.

pub mod session_worker;
pub mod sweep_scheduler;

pub use session_worker::{SessionEventWorker, WorkerHandle};
pub use sweep_scheduler::{SweepJob, SweepScheduler, SweepSchedulerHandle, TriggerOutcome};
