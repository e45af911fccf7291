//! Trellis Engine
//!
//! The run core: executes one behavioral test graph from definition to
//! frozen [`ExecutionTrace`]. The [`GraphRunner`] orders nodes
//! topologically, executes them strictly sequentially, enforces data
//! contracts at node boundaries, injects seeded chaos when asked, and
//! evaluates behavioral assertions over the final context.
//!
//! External capabilities are consumed through trait seams: the agent
//! executor ([`AgentExecutor`]) produces node outputs, the governance
//! gate ([`GovernanceGate`]) screens text entering and leaving each
//! node. A deterministic [`MockAgentExecutor`] ships in-tree for tests
//! and offline runs.
//!
//! Contract violations and failed assertions are findings recorded on
//! the trace, not control flow; only structural graph errors, node
//! execution failures, governance blocks, and the cooperative timeout
//! abort a run - and even then the partial trace is retained with
//! status `error`.

mod chaos;
mod error;
mod events;
mod executor;
mod governance;
mod runner;
mod trace;

pub use chaos::ChaosInjector;
pub use error::ExecutionError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use executor::{AgentError, AgentExecutor, MockAgentExecutor, estimate_cost};
pub use governance::{GovernanceError, GovernanceGate, PermissiveGate, SafetyScore};
pub use runner::GraphRunner;
pub use trace::{AgentOutput, ExecutionTrace, RunStatus, graph_hash};
