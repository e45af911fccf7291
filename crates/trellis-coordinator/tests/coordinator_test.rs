//! Integration tests for the execution coordinator.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use trellis_config::{Edge, GraphDef, NodeDef, RunConfig};
use trellis_coordinator::{
  CoordinatorConfig, ExecutionCoordinator, InMemoryPersistenceSink, LockError,
  NotificationSender, NotifyError, PersistError, PersistenceSink, RetryPolicy, RunState,
};
use trellis_engine::{AgentError, AgentExecutor, ExecutionTrace};

fn node(id: &str, inputs: &[&str]) -> NodeDef {
  NodeDef {
    id: id.to_string(),
    agent_type: "echo".to_string(),
    config: Map::new(),
    inputs: inputs.iter().map(|s| s.to_string()).collect(),
  }
}

fn simple_graph() -> GraphDef {
  GraphDef {
    id: "graph-42".to_string(),
    nodes: vec![node("a", &[]), node("b", &["a"])],
    edges: vec![Edge {
      from: "a".to_string(),
      to: "b".to_string(),
    }],
    assertions: Vec::new(),
    contracts: Vec::new(),
  }
}

/// Executor that counts calls and tracks how many run concurrently.
struct CountingExecutor {
  calls: AtomicUsize,
  active: AtomicUsize,
  max_active: AtomicUsize,
  delay: Duration,
}

impl CountingExecutor {
  fn new(delay: Duration) -> Self {
    Self {
      calls: AtomicUsize::new(0),
      active: AtomicUsize::new(0),
      max_active: AtomicUsize::new(0),
      delay,
    }
  }
}

#[async_trait]
impl AgentExecutor for CountingExecutor {
  async fn execute(
    &self,
    _agent_type: &str,
    _config: &Map<String, Value>,
    _input: &Map<String, Value>,
  ) -> Result<Map<String, Value>, AgentError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_active.fetch_max(active, Ordering::SeqCst);
    tokio::time::sleep(self.delay).await;
    self.active.fetch_sub(1, Ordering::SeqCst);

    let mut output = Map::new();
    output.insert("response".to_string(), json!("ok"));
    Ok(output)
  }

  fn models(&self) -> Vec<String> {
    vec!["test-model".to_string()]
  }
}

/// Persistence sink that fails a configured number of times first.
struct FlakySink {
  failures_left: AtomicUsize,
  inner: InMemoryPersistenceSink,
}

impl FlakySink {
  fn new(failures: usize) -> Self {
    Self {
      failures_left: AtomicUsize::new(failures),
      inner: InMemoryPersistenceSink::new(),
    }
  }
}

#[async_trait]
impl PersistenceSink for FlakySink {
  async fn persist_trace(&self, run_id: &str, trace: &ExecutionTrace) -> Result<(), PersistError> {
    if self
      .failures_left
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok()
    {
      return Err(PersistError::new("storage unavailable"));
    }
    self.inner.persist_trace(run_id, trace).await
  }
}

/// Sender that records every delivered payload.
#[derive(Default)]
struct RecordingSender {
  payloads: Mutex<Vec<Value>>,
}

#[async_trait]
impl NotificationSender for RecordingSender {
  async fn deliver(&self, _url: &str, payload: &Value) -> Result<u16, NotifyError> {
    self
      .payloads
      .lock()
      .unwrap()
      .push(payload.clone());
    Ok(200)
  }
}

fn fast_config() -> CoordinatorConfig {
  CoordinatorConfig {
    lock_ttl: Duration::from_secs(5),
    lock_wait_timeout: Duration::from_secs(2),
    job_retry: RetryPolicy {
      max_attempts: 2,
      base_delay: Duration::from_millis(5),
      multiplier: 1.0,
    },
    webhook_retry: RetryPolicy {
      max_attempts: 3,
      base_delay: Duration::from_millis(5),
      multiplier: 1.0,
    },
    queued_timeout: Duration::from_secs(300),
    running_timeout: Duration::from_secs(1800),
  }
}

async fn wait_for_terminal(coordinator: &ExecutionCoordinator, run_id: &str) -> RunState {
  for _ in 0..500 {
    if let Some(record) = coordinator.status(run_id)
      && record.status.is_terminal()
    {
      return record.status;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("run {run_id} never reached a terminal state");
}

#[tokio::test]
async fn test_sync_busy_when_lock_held() {
  let executor = Arc::new(CountingExecutor::new(Duration::from_millis(300)));
  let mut config = fast_config();
  config.lock_wait_timeout = Duration::ZERO;
  let coordinator = Arc::new(ExecutionCoordinator::new(executor, config));

  let first = {
    let coordinator = coordinator.clone();
    tokio::spawn(async move {
      coordinator
        .execute_sync(&simple_graph(), RunConfig::default())
        .await
    })
  };
  tokio::time::sleep(Duration::from_millis(50)).await;

  let second = coordinator
    .execute_sync(&simple_graph(), RunConfig::default())
    .await;
  assert!(matches!(second, Err(LockError::Busy { .. })));

  assert!(first.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_sync_runs_for_one_key_never_overlap() {
  let executor = Arc::new(CountingExecutor::new(Duration::from_millis(50)));
  let coordinator = Arc::new(ExecutionCoordinator::new(executor.clone(), fast_config()));

  let tasks: Vec<_> = (0..3)
    .map(|_| {
      let coordinator = coordinator.clone();
      tokio::spawn(async move {
        coordinator
          .execute_sync(&simple_graph(), RunConfig::default())
          .await
      })
    })
    .collect();

  for task in tasks {
    assert!(task.await.unwrap().is_ok());
  }
  assert_eq!(executor.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_async_run_completes_and_notifies() {
  let executor = Arc::new(CountingExecutor::new(Duration::ZERO));
  let sink = Arc::new(InMemoryPersistenceSink::new());
  let sender = Arc::new(RecordingSender::default());
  let coordinator = Arc::new(
    ExecutionCoordinator::new(executor, fast_config())
      .with_persistence(sink.clone())
      .with_notification_sender(sender.clone()),
  );

  let cancel = CancellationToken::new();
  let workers = coordinator.spawn_workers(2, cancel.clone());

  let run_id = coordinator
    .submit(
      simple_graph(),
      RunConfig::default(),
      Some("http://example.test/hook".to_string()),
    )
    .await
    .unwrap();

  assert_eq!(wait_for_terminal(&coordinator, &run_id).await, RunState::Passed);
  assert!(sink.get(&run_id).is_some());

  // Webhook delivery is spawned; give it a moment.
  for _ in 0..100 {
    if !sender.payloads.lock().unwrap().is_empty() {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  let payloads = sender.payloads.lock().unwrap().clone();
  assert_eq!(payloads.len(), 1);
  assert_eq!(payloads[0]["event"], json!("run_completed"));
  assert_eq!(payloads[0]["status"], json!("passed"));
  assert_eq!(payloads[0]["run_id"], json!(run_id));

  cancel.cancel();
  for worker in workers {
    worker.await.unwrap();
  }
}

#[tokio::test]
async fn test_cancelled_before_claim_never_executes() {
  let executor = Arc::new(CountingExecutor::new(Duration::ZERO));
  let coordinator = Arc::new(ExecutionCoordinator::new(executor.clone(), fast_config()));

  let run_id = coordinator
    .submit(simple_graph(), RunConfig::default(), None)
    .await
    .unwrap();
  coordinator.cancel(&run_id);

  let cancel = CancellationToken::new();
  let workers = coordinator.spawn_workers(1, cancel.clone());

  assert_eq!(
    wait_for_terminal(&coordinator, &run_id).await,
    RunState::Cancelled
  );
  assert_eq!(executor.calls.load(Ordering::SeqCst), 0);

  cancel.cancel();
  for worker in workers {
    worker.await.unwrap();
  }
}

#[tokio::test]
async fn test_worker_retries_then_succeeds() {
  let executor = Arc::new(CountingExecutor::new(Duration::ZERO));
  let sink = Arc::new(FlakySink::new(1));
  let coordinator = Arc::new(
    ExecutionCoordinator::new(executor, fast_config()).with_persistence(sink),
  );

  let cancel = CancellationToken::new();
  let workers = coordinator.spawn_workers(1, cancel.clone());

  let run_id = coordinator
    .submit(simple_graph(), RunConfig::default(), None)
    .await
    .unwrap();

  assert_eq!(wait_for_terminal(&coordinator, &run_id).await, RunState::Passed);
  assert_eq!(coordinator.status(&run_id).unwrap().attempts, 2);

  cancel.cancel();
  for worker in workers {
    worker.await.unwrap();
  }
}

#[tokio::test]
async fn test_worker_marks_error_after_retry_exhaustion() {
  let executor = Arc::new(CountingExecutor::new(Duration::ZERO));
  let sink = Arc::new(FlakySink::new(100));
  let sender = Arc::new(RecordingSender::default());
  let coordinator = Arc::new(
    ExecutionCoordinator::new(executor, fast_config())
      .with_persistence(sink)
      .with_notification_sender(sender.clone()),
  );

  let cancel = CancellationToken::new();
  let workers = coordinator.spawn_workers(1, cancel.clone());

  let run_id = coordinator
    .submit(
      simple_graph(),
      RunConfig::default(),
      Some("http://example.test/hook".to_string()),
    )
    .await
    .unwrap();

  assert_eq!(wait_for_terminal(&coordinator, &run_id).await, RunState::Error);
  let record = coordinator.status(&run_id).unwrap();
  assert!(record.error.as_deref().unwrap_or_default().contains("persist"));

  for _ in 0..100 {
    if !sender.payloads.lock().unwrap().is_empty() {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  let payloads = sender.payloads.lock().unwrap().clone();
  assert_eq!(payloads[0]["event"], json!("run_failed"));
  assert_eq!(payloads[0]["retry_count"], json!(1));

  cancel.cancel();
  for worker in workers {
    worker.await.unwrap();
  }
}

#[tokio::test]
async fn test_completed_run_is_not_reprocessed() {
  let executor = Arc::new(CountingExecutor::new(Duration::ZERO));
  let coordinator = Arc::new(ExecutionCoordinator::new(executor.clone(), fast_config()));

  let cancel = CancellationToken::new();
  let workers = coordinator.spawn_workers(1, cancel.clone());

  let run_id = coordinator
    .submit(simple_graph(), RunConfig::default(), None)
    .await
    .unwrap();
  assert_eq!(wait_for_terminal(&coordinator, &run_id).await, RunState::Passed);
  assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

  // A duplicate submission of the same run id must lose the guarded
  // claim and leave the original outcome untouched.
  let again = coordinator
    .submit(simple_graph(), RunConfig::default(), None)
    .await
    .unwrap();
  assert_ne!(again, run_id);
  wait_for_terminal(&coordinator, &again).await;

  assert_eq!(coordinator.status(&run_id).unwrap().status, RunState::Passed);

  cancel.cancel();
  for worker in workers {
    worker.await.unwrap();
  }
}

#[tokio::test]
async fn test_sweep_requeues_stale_queued_run_once() {
  let executor = Arc::new(CountingExecutor::new(Duration::ZERO));
  let mut config = fast_config();
  config.queued_timeout = Duration::ZERO;
  let coordinator = Arc::new(ExecutionCoordinator::new(executor, config));

  // No workers: the run stays queued past the (zero) timeout.
  let run_id = coordinator
    .submit(simple_graph(), RunConfig::default(), None)
    .await
    .unwrap();
  tokio::time::sleep(Duration::from_millis(20)).await;

  let first = coordinator.sweep().await;
  assert_eq!(first.requeued, 1);
  assert_eq!(coordinator.status(&run_id).unwrap().status, RunState::Retry);

  // Exactly once per sweep cycle: the run is no longer queued.
  let second = coordinator.sweep().await;
  assert_eq!(second.requeued, 0);
}

#[tokio::test]
async fn test_sweep_errors_stale_running_run() {
  let executor = Arc::new(CountingExecutor::new(Duration::from_millis(400)));
  let mut config = fast_config();
  config.running_timeout = Duration::ZERO;
  let coordinator = Arc::new(ExecutionCoordinator::new(executor, config));

  let cancel = CancellationToken::new();
  let workers = coordinator.spawn_workers(1, cancel.clone());

  let run_id = coordinator
    .submit(simple_graph(), RunConfig::default(), None)
    .await
    .unwrap();

  // Wait for the worker to claim it.
  for _ in 0..100 {
    if coordinator.status(&run_id).map(|r| r.status) == Some(RunState::Running) {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }

  let stats = coordinator.sweep().await;
  assert_eq!(stats.errored, 1);

  let record = coordinator.status(&run_id).unwrap();
  assert_eq!(record.status, RunState::Error);
  assert!(
    record
      .error
      .as_deref()
      .unwrap_or_default()
      .contains("max execution window")
  );

  cancel.cancel();
  for worker in workers {
    worker.await.unwrap();
  }
}
