use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use trellis_config::{ExecutionMode, GraphDef, RunConfig};
use trellis_engine::{GraphRunner, MockAgentExecutor, PermissiveGate, graph_hash};

/// Trellis - behavioral test graph runner for multi-agent systems
#[derive(Parser)]
#[command(name = "trellis")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Execute a test graph with the mock agent executor
  Run {
    /// Path to the graph file (JSON), or `-` for stdin
    graph_file: PathBuf,

    /// Seed for chaos injection and other RNG-dependent decisions
    #[arg(long)]
    seed: Option<u64>,

    /// Execution mode (normal, replay, chaos, debug, simulation)
    #[arg(long, default_value = "normal")]
    mode: String,

    /// Probability of dropping a random input key per node (chaos mode)
    #[arg(long)]
    drop_rate: Option<f64>,

    /// Probability of corrupting a random input value per node (chaos mode)
    #[arg(long)]
    corrupt_rate: Option<f64>,

    /// Wall-clock budget for the run in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the compact summary instead of the full trace
    #[arg(long)]
    summary: bool,
  },

  /// Validate a graph's structure and print its execution order
  Validate {
    /// Path to the graph file (JSON), or `-` for stdin
    graph_file: PathBuf,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  match cli.command {
    Some(Commands::Run {
      graph_file,
      seed,
      mode,
      drop_rate,
      corrupt_rate,
      timeout,
      summary,
    }) => {
      run_graph(graph_file, seed, &mode, drop_rate, corrupt_rate, timeout, summary)?;
    }
    Some(Commands::Validate { graph_file }) => {
      validate_graph(graph_file)?;
    }
    None => {
      println!("trellis - use --help to see available commands");
    }
  }

  Ok(())
}

fn run_graph(
  graph_file: PathBuf,
  seed: Option<u64>,
  mode: &str,
  drop_rate: Option<f64>,
  corrupt_rate: Option<f64>,
  timeout: Option<u64>,
  summary: bool,
) -> Result<()> {
  let graph = load_graph(&graph_file)?;

  let mode: ExecutionMode = serde_json::from_value(serde_json::Value::String(mode.to_string()))
    .with_context(|| format!("unknown execution mode: {mode}"))?;

  let mut config = RunConfig {
    seed,
    mode,
    timeout_seconds: timeout,
    ..Default::default()
  };
  if let Some(drop_rate) = drop_rate {
    config.chaos_config.drop_rate = drop_rate;
  }
  if let Some(corrupt_rate) = corrupt_rate {
    config.chaos_config.corrupt_rate = corrupt_rate;
  }

  let rt = tokio::runtime::Runtime::new()?;
  let trace = rt.block_on(async {
    let runner = GraphRunner::new(Arc::new(MockAgentExecutor::new()), config)
      .with_governance(Arc::new(PermissiveGate));
    runner.run(&graph).await
  });

  let document = if summary {
    trace.summary()
  } else {
    serde_json::to_value(&trace).context("failed to serialize trace")?
  };
  println!("{}", serde_json::to_string_pretty(&document)?);

  Ok(())
}

fn validate_graph(graph_file: PathBuf) -> Result<()> {
  let graph = load_graph(&graph_file)?;

  let order = trellis_graph::DependencyGraph::from_def(&graph)
    .and_then(|g| g.topological_order())
    .context("graph validation failed")?;

  println!(
    "{}",
    serde_json::to_string_pretty(&serde_json::json!({
      "id": graph.id,
      "hash": graph_hash(&graph),
      "nodes": graph.nodes.len(),
      "edges": graph.edges.len(),
      "execution_order": order,
    }))?
  );

  Ok(())
}

fn load_graph(graph_file: &PathBuf) -> Result<GraphDef> {
  let content = if graph_file.as_os_str() == "-" {
    let mut buffer = String::new();
    std::io::stdin()
      .read_to_string(&mut buffer)
      .context("failed to read graph from stdin")?;
    buffer
  } else {
    std::fs::read_to_string(graph_file)
      .with_context(|| format!("failed to read graph file: {}", graph_file.display()))?
  };

  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse graph file: {}", graph_file.display()))
}
