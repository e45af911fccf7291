//! Trace persistence seam.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use trellis_engine::ExecutionTrace;

/// Persistence failure.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PersistError {
  pub message: String,
}

impl PersistError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// Trace persistence capability. The frozen [`ExecutionTrace`] is the
/// only artifact ever handed to it.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
  async fn persist_trace(&self, run_id: &str, trace: &ExecutionTrace) -> Result<(), PersistError>;
}

/// In-process sink retaining traces in a map. The default for tests and
/// single-host deployments.
#[derive(Debug, Default)]
pub struct InMemoryPersistenceSink {
  traces: Mutex<HashMap<String, ExecutionTrace>>,
}

impl InMemoryPersistenceSink {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, run_id: &str) -> Option<ExecutionTrace> {
    self
      .traces
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(run_id)
      .cloned()
  }

  pub fn len(&self) -> usize {
    self.traces.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait]
impl PersistenceSink for InMemoryPersistenceSink {
  async fn persist_trace(&self, run_id: &str, trace: &ExecutionTrace) -> Result<(), PersistError> {
    self
      .traces
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(run_id.to_string(), trace.clone());
    Ok(())
  }
}
