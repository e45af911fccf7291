//! The execution coordinator and its worker pool.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use trellis_config::{GraphDef, RunConfig};
use trellis_engine::{AgentExecutor, ExecutionTrace, GovernanceGate, GraphRunner, RunStatus};

use crate::error::{CoordinatorError, LockError};
use crate::lock::{InMemoryLockProvider, LockProvider};
use crate::notify::{NotificationSender, NullNotificationSender, deliver_with_retry};
use crate::persist::{InMemoryPersistenceSink, PersistenceSink};
use crate::queue::{InMemoryWorkQueue, Job, WorkQueue};
use crate::record::{RunRecord, RunState, RunStore};
use crate::retry::RetryPolicy;

/// Tuning knobs for coordination.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
  /// TTL on the synchronous-path mutex.
  pub lock_ttl: Duration,
  /// How long a synchronous caller waits for the mutex before getting
  /// a busy error.
  pub lock_wait_timeout: Duration,
  /// Retry bounds applied by a worker around one job execution.
  pub job_retry: RetryPolicy,
  /// Independent retry bounds for webhook delivery.
  pub webhook_retry: RetryPolicy,
  /// Runs queued longer than this are requeued by the sweep.
  pub queued_timeout: Duration,
  /// Runs running longer than this are marked error by the sweep.
  pub running_timeout: Duration,
}

impl Default for CoordinatorConfig {
  fn default() -> Self {
    Self {
      lock_ttl: Duration::from_secs(30),
      lock_wait_timeout: Duration::from_secs(10),
      job_retry: RetryPolicy::default(),
      webhook_retry: RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_secs(30),
        multiplier: 2.0,
      },
      queued_timeout: Duration::from_secs(5 * 60),
      running_timeout: Duration::from_secs(30 * 60),
    }
  }
}

/// Outcome of one orphan sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
  pub requeued: usize,
  pub errored: usize,
}

/// Wraps the graph runner for safe concurrent and background use.
///
/// Cheap to clone; clones share the lock table, queue, run store,
/// cancellation registry, and job payloads.
#[derive(Clone)]
pub struct ExecutionCoordinator {
  executor: Arc<dyn AgentExecutor>,
  governance: Option<Arc<dyn GovernanceGate>>,
  locks: Arc<dyn LockProvider>,
  queue: Arc<dyn WorkQueue>,
  store: Arc<RunStore>,
  sink: Arc<dyn PersistenceSink>,
  sender: Arc<dyn NotificationSender>,
  /// Job payloads retained for orphan requeue.
  jobs: Arc<Mutex<HashMap<String, Job>>>,
  /// Cancellation flags keyed by run id, checked at job claim time.
  cancelled: Arc<Mutex<HashSet<String>>>,
  config: CoordinatorConfig,
}

impl ExecutionCoordinator {
  /// Coordinator with in-memory lock, queue, store, and persistence.
  pub fn new(executor: Arc<dyn AgentExecutor>, config: CoordinatorConfig) -> Self {
    Self {
      executor,
      governance: None,
      locks: Arc::new(InMemoryLockProvider::new()),
      queue: Arc::new(InMemoryWorkQueue::new()),
      store: Arc::new(RunStore::new()),
      sink: Arc::new(InMemoryPersistenceSink::new()),
      sender: Arc::new(NullNotificationSender),
      jobs: Arc::new(Mutex::new(HashMap::new())),
      cancelled: Arc::new(Mutex::new(HashSet::new())),
      config,
    }
  }

  pub fn with_governance(mut self, gate: Arc<dyn GovernanceGate>) -> Self {
    self.governance = Some(gate);
    self
  }

  pub fn with_lock_provider(mut self, locks: Arc<dyn LockProvider>) -> Self {
    self.locks = locks;
    self
  }

  pub fn with_queue(mut self, queue: Arc<dyn WorkQueue>) -> Self {
    self.queue = queue;
    self
  }

  pub fn with_persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
    self.sink = sink;
    self
  }

  pub fn with_notification_sender(mut self, sender: Arc<dyn NotificationSender>) -> Self {
    self.sender = sender;
    self
  }

  /// Current record for a run.
  pub fn status(&self, run_id: &str) -> Option<RunRecord> {
    self.store.get(run_id)
  }

  /// Execute a graph inline under the keyed mutex.
  ///
  /// At most one synchronous run per lock key executes at any instant;
  /// failing to acquire within the bounded wait surfaces as
  /// [`LockError::Busy`]. The asynchronous worker path does not take
  /// this mutex, so sync and async executions of one graph are not
  /// mutually exclusive.
  pub async fn execute_sync(
    &self,
    graph: &GraphDef,
    config: RunConfig,
  ) -> Result<ExecutionTrace, LockError> {
    let lock_key = lock_key_for(&graph.id);
    let handle = self
      .locks
      .acquire(&lock_key, self.config.lock_ttl, self.config.lock_wait_timeout)
      .await?;
    info!(graph_id = %graph.id, lock_key = %lock_key, "sync_run_started");

    let trace = self.build_runner(config).run(graph).await;
    if let Err(e) = self.sink.persist_trace(&trace.run_id, &trace).await {
      warn!(run_id = %trace.run_id, error = %e, "trace_persist_failed");
    }

    self.locks.release(handle).await;
    Ok(trace)
  }

  /// Record a run and enqueue it for background execution. Returns the
  /// run id.
  pub async fn submit(
    &self,
    graph: GraphDef,
    config: RunConfig,
    webhook_url: Option<String>,
  ) -> Result<String, CoordinatorError> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let mut record = RunRecord::queued(run_id.clone(), graph.id.clone(), webhook_url.clone());
    record.lock_key = Some(lock_key_for(&graph.id));
    self.store.insert(record);

    let job = Job {
      run_id: run_id.clone(),
      graph,
      config,
      webhook_url,
      attempt: 0,
    };
    self
      .jobs
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(run_id.clone(), job.clone());
    self.queue.enqueue(job).await?;

    info!(run_id = %run_id, "run_submitted");
    Ok(run_id)
  }

  /// Flag a run as cancelled. The flag is honored when a worker claims
  /// the job; a run already executing is not interrupted.
  pub fn cancel(&self, run_id: &str) {
    self
      .cancelled
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(run_id.to_string());
    info!(run_id = %run_id, "run_cancel_requested");
  }

  pub fn is_cancelled(&self, run_id: &str) -> bool {
    self
      .cancelled
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .contains(run_id)
  }

  /// Start `count` workers consuming the queue until the token fires.
  /// Each worker executes one run at a time.
  pub fn spawn_workers(&self, count: usize, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    (0..count)
      .map(|worker_id| {
        let this = self.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
          info!(worker_id, "worker_started");
          loop {
            tokio::select! {
              _ = cancel.cancelled() => break,
              job = this.queue.claim() => this.process_job(job).await,
            }
          }
          info!(worker_id, "worker_stopped");
        })
      })
      .collect()
  }

  /// Requeue runs stuck in `queued` and mark runs stuck in `running` as
  /// error. Timeout-based and heartbeat-less: past the threshold a slow
  /// run is indistinguishable from a crashed worker.
  pub async fn sweep(&self) -> SweepStats {
    let now = Utc::now();
    let mut stats = SweepStats::default();

    let queued_cutoff = now - self.config.queued_timeout;
    for record in self.store.stale(RunState::Queued, queued_cutoff) {
      let Some(job) = self.job_payload(&record.run_id) else {
        continue;
      };
      if self
        .store
        .transition(&record.run_id, &[RunState::Queued], RunState::Retry)
      {
        self.store.touch_queued_at(&record.run_id);
        let mut job = job;
        job.attempt += 1;
        if self.queue.enqueue(job).await.is_ok() {
          info!(run_id = %record.run_id, "orphan_requeued");
          stats.requeued += 1;
        }
      }
    }

    let running_cutoff = now - self.config.running_timeout;
    for record in self.store.stale(RunState::Running, running_cutoff) {
      if self
        .store
        .transition(&record.run_id, &[RunState::Running], RunState::Error)
      {
        self.store.set_error(&record.run_id, "run exceeded max execution window");
        warn!(run_id = %record.run_id, "orphan_marked_error");
        stats.errored += 1;
      }
    }

    stats
  }

  /// Run the orphan sweep periodically until the token fires.
  pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    let this = self.clone();
    tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = tokio::time::sleep(interval) => {
            let stats = this.sweep().await;
            if stats.requeued > 0 || stats.errored > 0 {
              info!(requeued = stats.requeued, errored = stats.errored, "orphan_sweep_completed");
            }
          }
        }
      }
    })
  }

  async fn process_job(&self, job: Job) {
    info!(run_id = %job.run_id, attempt = job.attempt, "worker_job_claimed");

    if self.is_cancelled(&job.run_id) {
      self.store.transition(
        &job.run_id,
        &[RunState::Queued, RunState::Retry, RunState::Running],
        RunState::Cancelled,
      );
      info!(run_id = %job.run_id, "worker_job_cancelled");
      self.queue.ack(&job).await;
      self.forget_job(&job.run_id);
      return;
    }

    // Guarded claim: exactly one worker may move the run to running.
    if !self.store.transition(
      &job.run_id,
      &[RunState::Queued, RunState::Retry, RunState::Running],
      RunState::Running,
    ) {
      info!(run_id = %job.run_id, "worker_job_skipped");
      self.queue.ack(&job).await;
      return;
    }

    let policy = self.config.job_retry;
    let mut retry = 0u32;
    let trace = loop {
      match self.execute_job(&job).await {
        Ok(trace) => break Some(trace),
        Err(e) if retry + 1 < policy.max_attempts => {
          warn!(run_id = %job.run_id, retry, error = %e, "worker_job_retry");
          self.store.transition(&job.run_id, &[RunState::Running], RunState::Retry);
          tokio::time::sleep(policy.delay_for(retry)).await;
          self.store.transition(&job.run_id, &[RunState::Retry], RunState::Running);
          retry += 1;
        }
        Err(e) => {
          error!(run_id = %job.run_id, retries = retry, error = %e, "worker_job_failed");
          self
            .store
            .transition(&job.run_id, &[RunState::Running, RunState::Retry], RunState::Error);
          self.store.set_error(&job.run_id, &e.to_string());
          if let Some(url) = &job.webhook_url {
            self.dispatch_webhook(
              url,
              json!({
                "event": "run_failed",
                "run_id": job.run_id,
                "graph_id": job.graph.id,
                "error": e.to_string(),
                "retry_count": retry,
              }),
            );
          }
          break None;
        }
      }
    };

    if let Some(trace) = trace {
      let state = terminal_state(trace.status);
      self.store.transition(&job.run_id, &[RunState::Running], state);
      if let Some(error) = &trace.error {
        self.store.set_error(&job.run_id, error);
      }
      info!(run_id = %job.run_id, status = %trace.status, "worker_job_completed");

      if let Some(url) = &job.webhook_url {
        self.dispatch_webhook(
          url,
          json!({
            "event": "run_completed",
            "run_id": job.run_id,
            "graph_id": trace.graph_id,
            "status": trace.status,
            "latency_ms": trace.total_latency_ms,
            "cost_usd": trace.total_cost_usd,
            "passed_assertions": trace.passed_assertions(),
            "total_assertions": trace.assertion_results.len(),
            "completed_at": trace.completed_at,
          }),
        );
      }
    }

    self.queue.ack(&job).await;
    self.forget_job(&job.run_id);
  }

  /// One job execution: run the graph and persist the trace. The runner
  /// itself never fails - anything surfacing here (persistence, for
  /// one) is a worker-level fault eligible for retry.
  async fn execute_job(&self, job: &Job) -> Result<ExecutionTrace, CoordinatorError> {
    let trace = self.build_runner(job.config.clone()).run(&job.graph).await;
    self
      .sink
      .persist_trace(&job.run_id, &trace)
      .await
      .map_err(|e| CoordinatorError::Persistence {
        run_id: job.run_id.clone(),
        message: e.to_string(),
      })?;
    Ok(trace)
  }

  fn build_runner(&self, config: RunConfig) -> GraphRunner {
    let mut runner = GraphRunner::new(Arc::clone(&self.executor), config);
    if let Some(gate) = &self.governance {
      runner = runner.with_governance(Arc::clone(gate));
    }
    runner
  }

  fn dispatch_webhook(&self, url: &str, payload: Value) {
    let sender = Arc::clone(&self.sender);
    let policy = self.config.webhook_retry;
    let url = url.to_string();
    tokio::spawn(async move {
      deliver_with_retry(sender.as_ref(), policy, &url, &payload).await;
    });
  }

  fn job_payload(&self, run_id: &str) -> Option<Job> {
    self
      .jobs
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(run_id)
      .cloned()
  }

  fn forget_job(&self, run_id: &str) {
    self
      .jobs
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .remove(run_id);
  }
}

fn lock_key_for(graph_id: &str) -> String {
  format!("graph:{graph_id}:run")
}

fn terminal_state(status: RunStatus) -> RunState {
  match status {
    RunStatus::Passed => RunState::Passed,
    RunStatus::Failed => RunState::Failed,
    _ => RunState::Error,
  }
}
