//! Trellis Coordinator
//!
//! Wraps the graph runner for safe concurrent and background use. Two
//! execution paths:
//!
//! - **Synchronous**: [`ExecutionCoordinator::execute_sync`] runs a
//!   graph inline under a distributed mutex keyed by the graph id, with
//!   a bounded acquisition wait. Failure to acquire surfaces as a
//!   retryable busy condition, never a silent queue.
//! - **Asynchronous**: [`ExecutionCoordinator::submit`] records a run
//!   and enqueues a job; a pool of workers claims jobs, each executing
//!   one run at a time. Run status mutation goes through guarded
//!   compare-and-swap transitions so two workers can never double
//!   process one run.
//!
//! Worker failures are retried with exponential backoff up to a bound,
//! then the run is marked `error` and a failure notification goes out
//! (webhook delivery retries independently under its own bound). A
//! periodic sweep recovers orphans: stale queued runs are requeued,
//! stale running runs are marked `error`. Cancellation is coarse - a
//! flag keyed by run id, checked when a worker claims the job.
//!
//! The lock store, work queue, run store, and cancellation registry are
//! the only cross-worker shared state. All are trait seams with
//! in-memory implementations in-tree.

mod coordinator;
mod error;
mod lock;
mod notify;
mod persist;
mod queue;
mod record;
mod retry;

pub use coordinator::{CoordinatorConfig, ExecutionCoordinator, SweepStats};
pub use error::{CoordinatorError, LockError};
pub use lock::{InMemoryLockProvider, LockHandle, LockProvider};
pub use notify::{NotificationSender, NotifyError, NullNotificationSender};
pub use persist::{InMemoryPersistenceSink, PersistError, PersistenceSink};
pub use queue::{InMemoryWorkQueue, Job, WorkQueue};
pub use record::{RunRecord, RunState, RunStore};
pub use retry::RetryPolicy;
