//! Durable work queue seam and in-memory implementation.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use trellis_config::{GraphDef, RunConfig};

use crate::error::CoordinatorError;

/// One queued graph execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
  pub run_id: String,
  pub graph: GraphDef,
  pub config: RunConfig,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub webhook_url: Option<String>,
  /// How many times this job has been handed to a worker before.
  #[serde(default)]
  pub attempt: u32,
}

/// The work-queue capability consumed by the coordinator and its
/// workers.
#[async_trait]
pub trait WorkQueue: Send + Sync {
  async fn enqueue(&self, job: Job) -> Result<(), CoordinatorError>;

  /// Claim the next job, waiting until one is available.
  async fn claim(&self) -> Job;

  /// Acknowledge a processed job.
  async fn ack(&self, job: &Job);

  /// Return a claimed job, optionally putting it back in line.
  async fn nack(&self, job: Job, requeue: bool);
}

/// In-process FIFO queue for single-host deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryWorkQueue {
  jobs: Mutex<VecDeque<Job>>,
  available: Notify,
}

impl InMemoryWorkQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Jobs currently waiting.
  pub fn depth(&self) -> usize {
    self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
  }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
  async fn enqueue(&self, job: Job) -> Result<(), CoordinatorError> {
    self
      .jobs
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push_back(job);
    self.available.notify_one();
    Ok(())
  }

  async fn claim(&self) -> Job {
    loop {
      // Register interest before checking so a concurrent enqueue
      // cannot slip between the check and the wait.
      let notified = self.available.notified();
      if let Some(job) = self
        .jobs
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .pop_front()
      {
        // Wake another waiter in case more jobs remain.
        self.available.notify_one();
        return job;
      }
      notified.await;
    }
  }

  async fn ack(&self, _job: &Job) {
    // Claimed jobs are already off the queue.
  }

  async fn nack(&self, job: Job, requeue: bool) {
    if requeue {
      self
        .jobs
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push_back(job);
      self.available.notify_one();
    }
  }
}
