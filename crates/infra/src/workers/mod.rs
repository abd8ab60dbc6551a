//! Background workers
//!
//! Each worker owns one spawned task, a [`tokio_util::sync::CancellationToken`]
//! and the task's join handle. `start` fails if the worker is already
//! running, `stop` cancels and joins within a timeout, and dropping a running
//! worker cancels its task.

pub mod error;
pub mod sync_scheduler;
pub mod transmission_worker;

pub use error::{WorkerError, WorkerResult};
pub use sync_scheduler::{SyncScheduler, SyncSchedulerConfig};
pub use transmission_worker::{TransmissionWorker, TransmissionWorkerConfig};
