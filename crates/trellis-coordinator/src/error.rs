//! Error types for execution coordination.

use thiserror::Error;

/// Lock acquisition failures, surfaced to synchronous callers as a
/// retryable busy condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
  #[error("could not acquire lock for key '{key}' within {waited_ms}ms")]
  Busy { key: String, waited_ms: u64 },
}

/// Coordinator-level failures.
#[derive(Debug, Error)]
pub enum CoordinatorError {
  #[error(transparent)]
  Lock(#[from] LockError),

  #[error("run '{run_id}' not found")]
  UnknownRun { run_id: String },

  #[error("work queue closed")]
  QueueClosed,

  #[error("failed to persist trace for run '{run_id}': {message}")]
  Persistence { run_id: String, message: String },
}
