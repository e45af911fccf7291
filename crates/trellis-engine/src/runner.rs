//! Graph runner.
//!
//! The [`GraphRunner`] executes one behavioral test graph: topological
//! ordering, strictly sequential node execution, contract checks at
//! node boundaries, chaos injection, and assertion evaluation over the
//! final context. One runner may execute many graphs; all per-run state
//! (trace, state machine, chaos RNG, context) is local to each call.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{error, info};
use trellis_assertions::{AssertionEngine, OutputRecord};
use trellis_config::{ExecutionMode, GraphDef, NodeDef, RunConfig};
use trellis_contracts::ContractValidator;
use trellis_graph::{DependencyGraph, ExecutionStateMachine, NodeState};

use crate::chaos::ChaosInjector;
use crate::error::ExecutionError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::executor::{AgentExecutor, estimate_cost};
use crate::governance::GovernanceGate;
use crate::trace::{AgentOutput, ExecutionTrace, RunStatus, graph_hash};

/// Core execution engine for behavioral test graphs.
///
/// Generic over `N: ExecutionNotifier` to allow different observation
/// strategies. Use [`GraphRunner::new`] for a runner with no-op
/// notifications, or [`GraphRunner::with_notifier`] to observe events.
pub struct GraphRunner<N: ExecutionNotifier = NoopNotifier> {
  executor: Arc<dyn AgentExecutor>,
  governance: Option<Arc<dyn GovernanceGate>>,
  assertion_engine: AssertionEngine,
  contract_validator: ContractValidator,
  config: RunConfig,
  notifier: N,
}

impl GraphRunner<NoopNotifier> {
  /// Runner with no-op notifications.
  pub fn new(executor: Arc<dyn AgentExecutor>, config: RunConfig) -> Self {
    Self::with_notifier(executor, config, NoopNotifier)
  }
}

impl<N: ExecutionNotifier> GraphRunner<N> {
  /// Runner with a custom event notifier.
  pub fn with_notifier(executor: Arc<dyn AgentExecutor>, config: RunConfig, notifier: N) -> Self {
    Self {
      executor,
      governance: None,
      assertion_engine: AssertionEngine::new(),
      contract_validator: ContractValidator::new(),
      config,
      notifier,
    }
  }

  /// Attach a governance gate. It is consulted only while
  /// `config.governance.enabled` holds.
  pub fn with_governance(mut self, gate: Arc<dyn GovernanceGate>) -> Self {
    self.governance = Some(gate);
    self
  }

  /// Replace the assertion engine, e.g. to register custom handlers.
  pub fn with_assertion_engine(mut self, engine: AssertionEngine) -> Self {
    self.assertion_engine = engine;
    self
  }

  /// Replace the contract validator, e.g. to swap the schema capability.
  pub fn with_contract_validator(mut self, validator: ContractValidator) -> Self {
    self.contract_validator = validator;
    self
  }

  /// Execute a graph, producing its trace.
  pub async fn run(&self, graph: &GraphDef) -> ExecutionTrace {
    self.run_with_states(graph).await.0
  }

  /// Execute a graph, returning the trace together with the per-run
  /// state machine for visualization consumers.
  ///
  /// This never fails: structural errors, node failures, governance
  /// blocks, and timeouts all end in a trace with `status = error` and
  /// whatever partial results were accumulated.
  pub async fn run_with_states(&self, graph: &GraphDef) -> (ExecutionTrace, ExecutionStateMachine) {
    let run_id = uuid::Uuid::new_v4().to_string();
    let mut trace = ExecutionTrace::new(
      run_id.clone(),
      graph.id.clone(),
      graph_hash(graph),
      self.config.mode,
      self.config.seed,
    );
    trace.status = RunStatus::Running;

    info!(
      run_id = %run_id,
      graph_id = %graph.id,
      graph_hash = %trace.graph_hash,
      mode = %self.config.mode,
      "run_started"
    );
    self.notifier.notify(ExecutionEvent::RunStarted {
      run_id: run_id.clone(),
      graph_id: graph.id.clone(),
    });

    let mut state = ExecutionStateMachine::new();
    for node in &graph.nodes {
      state.add_node(&node.id);
    }
    for (from, to) in graph.edge_pairs() {
      state.add_edge(from, to);
    }

    if let Err(e) = self.execute_all(graph, &run_id, &mut state, &mut trace).await {
      error!(run_id = %run_id, error = %e, "run_failed");
      trace.status = RunStatus::Error;
      trace.error = Some(e.to_string());
    }
    trace.completed_at = Some(Utc::now());

    info!(
      run_id = %run_id,
      status = %trace.status,
      latency_ms = trace.total_latency_ms,
      cost_usd = trace.total_cost_usd,
      "run_completed"
    );
    self.notifier.notify(ExecutionEvent::RunCompleted {
      run_id,
      status: trace.status,
    });

    (trace, state)
  }

  async fn execute_all(
    &self,
    graph: &GraphDef,
    run_id: &str,
    state: &mut ExecutionStateMachine,
    trace: &mut ExecutionTrace,
  ) -> Result<(), ExecutionError> {
    let order = DependencyGraph::from_def(graph)?.topological_order()?;

    let mut chaos = matches!(self.config.mode, ExecutionMode::Chaos)
      .then(|| ChaosInjector::new(self.config.seed, &self.config.chaos_config));

    let mut context: Map<String, Value> = Map::new();
    let run_start = Instant::now();

    for node_id in &order {
      if let Some(seconds) = self.config.timeout_seconds
        && run_start.elapsed().as_secs_f64() > seconds as f64
      {
        return Err(ExecutionError::TimeoutExceeded { seconds });
      }

      let node = graph
        .get_node(node_id)
        .ok_or_else(|| ExecutionError::NodeExecution {
          node_id: node_id.clone(),
          message: "node missing from definition".to_string(),
        })?;

      // Input contracts are findings, not control flow.
      for contract in graph.contracts.iter().filter(|c| c.target.as_deref() == Some(node_id.as_str())) {
        trace
          .contract_violations
          .extend(self.contract_validator.validate_input(contract, &context));
      }

      let output = self
        .execute_node(run_id, node, &context, chaos.as_mut(), state)
        .await?;

      for contract in graph.contracts.iter().filter(|c| c.source.as_deref() == Some(node_id.as_str())) {
        trace
          .contract_violations
          .extend(self.contract_validator.validate_output(contract, &output.output_data));
      }

      context.insert(node_id.clone(), Value::Object(output.output_data.clone()));
      trace.agent_outputs.push(output);
    }

    trace.total_latency_ms = run_start.elapsed().as_secs_f64() * 1000.0;
    trace.total_cost_usd = trace.agent_outputs.iter().map(|o| o.cost_usd).sum();

    let records: Vec<OutputRecord> = trace
      .agent_outputs
      .iter()
      .map(|o| OutputRecord {
        node_id: o.node_id.clone(),
        latency_ms: o.latency_ms,
        cost_usd: o.cost_usd,
        output_data: o.output_data.clone(),
      })
      .collect();
    trace.assertion_results = self
      .assertion_engine
      .evaluate(&graph.assertions, &context, &records);

    let all_passed = trace.assertion_results.iter().all(|r| r.passed);
    trace.status = if all_passed && trace.contract_violations.is_empty() {
      RunStatus::Passed
    } else {
      RunStatus::Failed
    };

    Ok(())
  }

  /// Execute one node: state transitions, input assembly, governance
  /// screening, chaos injection, the agent call, and metrics.
  async fn execute_node(
    &self,
    run_id: &str,
    node: &NodeDef,
    context: &Map<String, Value>,
    chaos: Option<&mut ChaosInjector>,
    state: &mut ExecutionStateMachine,
  ) -> Result<AgentOutput, ExecutionError> {
    state.transition(&node.id, NodeState::Running, None);
    info!(run_id = %run_id, node_id = %node.id, agent_type = %node.agent_type, "node_started");
    self.notifier.notify(ExecutionEvent::NodeStarted {
      run_id: run_id.to_string(),
      node_id: node.id.clone(),
    });

    match self.run_node_inner(node, context, chaos).await {
      Ok(output) => {
        state.transition(&node.id, NodeState::Completed, None);
        info!(
          run_id = %run_id,
          node_id = %node.id,
          latency_ms = output.latency_ms,
          cost_usd = output.cost_usd,
          "node_completed"
        );
        self.notifier.notify(ExecutionEvent::NodeCompleted {
          run_id: run_id.to_string(),
          node_id: node.id.clone(),
          latency_ms: output.latency_ms,
        });
        Ok(output)
      }
      Err(e) => {
        let mut metadata = Map::new();
        metadata.insert("error".to_string(), Value::String(e.to_string()));
        state.transition(&node.id, NodeState::Failed, Some(metadata));
        error!(run_id = %run_id, node_id = %node.id, error = %e, "node_failed");
        self.notifier.notify(ExecutionEvent::NodeFailed {
          run_id: run_id.to_string(),
          node_id: node.id.clone(),
          error: e.to_string(),
        });
        Err(e)
      }
    }
  }

  async fn run_node_inner(
    &self,
    node: &NodeDef,
    context: &Map<String, Value>,
    chaos: Option<&mut ChaosInjector>,
  ) -> Result<AgentOutput, ExecutionError> {
    // Inputs are the outputs of declared predecessors already present
    // in context.
    let mut input_data = Map::new();
    for dep in &node.inputs {
      if let Some(value) = context.get(dep) {
        input_data.insert(dep.clone(), value.clone());
      }
    }

    let mut governance_meta = Map::new();
    if let Some(gate) = self.active_governance() {
      let envelope = json!({"node": node.id, "input": input_data}).to_string();
      let (processed, score) =
        gate
          .process_input(&envelope)
          .map_err(|e| ExecutionError::GovernanceBlocked {
            node_id: node.id.clone(),
            stage: "input",
            reason: e.to_string(),
          })?;
      governance_meta.insert("input_score".to_string(), score.to_metadata());
      if processed != envelope {
        governance_meta.insert(
          "input_preview".to_string(),
          Value::String(truncate(&processed, 256)),
        );
      }
    }

    if let Some(chaos) = chaos {
      chaos.inject(&mut input_data);
    }

    let call_start = Instant::now();
    let mut output_data = self
      .executor
      .execute(&node.agent_type, &node.config, &input_data)
      .await
      .map_err(|e| ExecutionError::NodeExecution {
        node_id: node.id.clone(),
        message: e.to_string(),
      })?;
    let latency_ms = call_start.elapsed().as_secs_f64() * 1000.0;

    if let Some(gate) = self.active_governance() {
      let response = output_data
        .get("response")
        .and_then(Value::as_str)
        .map(str::to_string);
      if let Some(response) = response {
        let (sanitized, score) =
          gate
            .process_output(&response)
            .map_err(|e| ExecutionError::GovernanceBlocked {
              node_id: node.id.clone(),
              stage: "output",
              reason: e.to_string(),
            })?;
        governance_meta.insert("output_score".to_string(), score.to_metadata());
        if sanitized != response {
          governance_meta.insert(
            "output_preview".to_string(),
            Value::String(truncate(&sanitized, 256)),
          );
          output_data.insert("response".to_string(), Value::String(sanitized));
        }
      }
    }

    if !governance_meta.is_empty() {
      match output_data.get_mut("_governance") {
        Some(Value::Object(existing)) => existing.extend(governance_meta),
        _ => {
          output_data.insert("_governance".to_string(), Value::Object(governance_meta));
        }
      }
    }

    let tokens_in = output_data
      .get("_tokens_in")
      .and_then(Value::as_u64)
      .unwrap_or(0);
    let tokens_out = output_data
      .get("_tokens_out")
      .and_then(Value::as_u64)
      .unwrap_or(0);
    let provider = node
      .provider()
      .or(self.config.provider.as_deref())
      .unwrap_or("mock")
      .to_string();
    let model = node
      .model()
      .or(self.config.model.as_deref())
      .unwrap_or("mock-model")
      .to_string();
    let cost_usd = estimate_cost(&provider, tokens_in, tokens_out);

    Ok(AgentOutput {
      node_id: node.id.clone(),
      agent_type: node.agent_type.clone(),
      input_data,
      output_data,
      latency_ms,
      cost_usd,
      tokens_in,
      tokens_out,
      provider,
      model,
      timestamp: Utc::now(),
      trace_id: uuid::Uuid::new_v4().to_string(),
    })
  }

  fn active_governance(&self) -> Option<&Arc<dyn GovernanceGate>> {
    if self.config.governance.enabled {
      self.governance.as_ref()
    } else {
      None
    }
  }
}

fn truncate(text: &str, max_chars: usize) -> String {
  text.chars().take(max_chars).collect()
}
