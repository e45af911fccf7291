//! Execution events and notifiers for observability.
//!
//! Events are emitted during a run so consumers can observe progress -
//! persist, stream to a UI, log. They mirror the trace; they never
//! drive control flow.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::trace::RunStatus;

/// Events emitted during graph execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// A run has started.
  RunStarted { run_id: String, graph_id: String },

  /// A node has started executing.
  NodeStarted { run_id: String, node_id: String },

  /// A node has completed successfully.
  NodeCompleted {
    run_id: String,
    node_id: String,
    latency_ms: f64,
  },

  /// A node has failed.
  NodeFailed {
    run_id: String,
    node_id: String,
    error: String,
  },

  /// The run reached a terminal status.
  RunCompleted { run_id: String, status: RunStatus },
}

/// Trait for receiving execution events.
///
/// The runner calls `notify` for each event - implementations decide
/// what to do with them (persist, broadcast, log, ignore).
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {
    // Intentionally empty
  }
}

/// A notifier that sends events to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls the run; the volume is one
/// event per node start/finish plus two per run.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
