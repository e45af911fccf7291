//! Run records and the guarded run store.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coordinator-level status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
  Queued,
  Running,
  Retry,
  Passed,
  Failed,
  Error,
  Cancelled,
}

impl RunState {
  /// Whether the state is terminal.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      RunState::Passed | RunState::Failed | RunState::Error | RunState::Cancelled
    )
  }
}

impl std::fmt::Display for RunState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      RunState::Queued => "queued",
      RunState::Running => "running",
      RunState::Retry => "retry",
      RunState::Passed => "passed",
      RunState::Failed => "failed",
      RunState::Error => "error",
      RunState::Cancelled => "cancelled",
    };
    f.write_str(s)
  }
}

/// Status record for one run, mutated only through the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
  pub run_id: String,
  pub graph_id: String,
  pub status: RunState,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lock_key: Option<String>,
  pub attempts: u32,
  pub queued_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub webhook_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl RunRecord {
  pub fn queued(run_id: String, graph_id: String, webhook_url: Option<String>) -> Self {
    Self {
      run_id,
      graph_id,
      status: RunState::Queued,
      lock_key: None,
      attempts: 0,
      queued_at: Utc::now(),
      started_at: None,
      completed_at: None,
      webhook_url,
      error: None,
    }
  }
}

/// Shared store of run records with compare-and-swap style status
/// transitions.
///
/// Every status change goes through [`transition`](RunStore::transition):
/// the update applies only when the current status is one of the
/// expected source states, which is what keeps two workers from double
/// processing one run.
#[derive(Debug, Default)]
pub struct RunStore {
  runs: Mutex<HashMap<String, RunRecord>>,
}

impl RunStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, record: RunRecord) {
    self
      .runs
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(record.run_id.clone(), record);
  }

  pub fn get(&self, run_id: &str) -> Option<RunRecord> {
    self
      .runs
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(run_id)
      .cloned()
  }

  /// Guarded status transition. Applies only when the record exists and
  /// its status is in `from`; returns whether the update applied.
  /// Moving into `Running` stamps `started_at` and bumps `attempts`;
  /// moving into a terminal state stamps `completed_at`.
  pub fn transition(&self, run_id: &str, from: &[RunState], to: RunState) -> bool {
    let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
    let Some(record) = runs.get_mut(run_id) else {
      return false;
    };
    if !from.contains(&record.status) {
      return false;
    }
    record.status = to;
    match to {
      RunState::Running => {
        record.started_at = Some(Utc::now());
        record.attempts += 1;
      }
      state if state.is_terminal() => {
        record.completed_at = Some(Utc::now());
      }
      _ => {}
    }
    true
  }

  /// Attach an error message to a run.
  pub fn set_error(&self, run_id: &str, message: &str) {
    let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(record) = runs.get_mut(run_id) {
      record.error = Some(message.to_string());
    }
  }

  /// Reset the queued timestamp, e.g. when a run is requeued by the
  /// orphan sweep.
  pub fn touch_queued_at(&self, run_id: &str) {
    let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(record) = runs.get_mut(run_id) {
      record.queued_at = Utc::now();
      record.started_at = None;
    }
  }

  /// Runs in `state` whose reference timestamp (`queued_at` for queued,
  /// `started_at` otherwise) is older than `cutoff`.
  pub fn stale(&self, state: RunState, cutoff: DateTime<Utc>) -> Vec<RunRecord> {
    let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
    runs
      .values()
      .filter(|r| r.status == state)
      .filter(|r| match state {
        RunState::Queued => r.queued_at < cutoff,
        _ => r.started_at.is_some_and(|t| t < cutoff),
      })
      .cloned()
      .collect()
  }
}
