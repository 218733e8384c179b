// crates/flowcli/src/main.rs

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{Flow, Message, NodeEvent, NodeSpec, NodeStatus, RunEvent, RunInputs};
use flownodes::{BridgeClient, ProcessScriptRuntime};
use flowruntime::{graph, Adjacency, FlowRuntime, HandlerRegistry, RunReport};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow runner CLI", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Run documents shared by `run` and `resume`
#[derive(clap::Args)]
struct RunFiles {
    /// Path to flow JSON file
    #[arg(short, long)]
    file: PathBuf,

    /// Per-node inputs, `{ "<node id>": { ... } }`
    #[arg(short, long)]
    inputs: Option<PathBuf>,

    /// Globals object visible to every node
    #[arg(short, long)]
    globals: Option<PathBuf>,

    /// Context object passed through to handlers
    #[arg(long)]
    context: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow from its root nodes
    Run {
        #[command(flatten)]
        files: RunFiles,
    },

    /// Continue a flow from one node, typically a paused checkpoint
    Resume {
        #[command(flatten)]
        files: RunFiles,

        /// Node to start from
        #[arg(short, long)]
        node: String,

        /// Message handed to the node, as a JSON file
        #[arg(short, long)]
        message: Option<PathBuf>,
    },

    /// Validate a flow file
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create an example flow and its inputs
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,

        /// Inputs file path
        #[arg(long, default_value = "inputs.json")]
        inputs_output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let config = CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { files } => {
            run_flow(&config, files, None).await?;
        }

        Commands::Resume { files, node, message } => {
            let message = read_optional::<Message>(message.as_deref())?;
            run_flow(&config, files, Some((node, message))).await?;
        }

        Commands::Validate { file } => {
            validate_flow(&config, &file)?;
        }

        Commands::Nodes => {
            list_nodes(&config);
        }

        Commands::Init { output, inputs_output } => {
            create_example_flow(&output, &inputs_output)?;
        }
    }

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn load_flow(path: &Path) -> Result<Flow> {
    Flow::load(path).with_context(|| format!("failed to load flow {}", path.display()))
}

fn read_optional<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    match path {
        Some(path) => read_json(path),
        None => Ok(T::default()),
    }
}

fn build_registry(config: &CliConfig, bridge: Arc<BridgeClient>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    let scripts = Arc::new(ProcessScriptRuntime::new(config.script.clone()));
    flownodes::register_all(&mut registry, bridge, scripts);
    registry
}

async fn run_flow(config: &CliConfig, files: RunFiles, branch: Option<(String, Message)>) -> Result<()> {
    println!("🚀 Loading flow from: {}", files.file.display());

    let flow = load_flow(&files.file)?;
    let inputs: RunInputs = read_optional(files.inputs.as_deref())?;
    let globals: Message = read_optional(files.globals.as_deref())?;
    let context: Message = read_optional(files.context.as_deref())?;

    println!("📋 Flow: {}", flow.name);
    println!("   Nodes: {}", flow.nodes.len());
    println!("   Edges: {}", flow.edges.len());
    println!();

    let bridge = Arc::new(BridgeClient::new(config.bridge.clone()));
    if flow.nodes.iter().any(|n| n.node_type == "localhost") {
        bridge.connect();
        let wait = Duration::from_millis(config.connect_wait_ms);
        if !bridge.wait_connected(wait).await {
            tracing::warn!(url = %config.bridge.url, "Bridge not reachable yet, bridge calls will fail");
        }
    }

    let registry = build_registry(config, bridge.clone());
    let runtime = FlowRuntime::with_registry(Arc::new(registry), config.runtime.clone());

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    println!("  … {} events missed", missed);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event {
                RunEvent::RunStarted { .. } => {
                    println!("▶️  Run started");
                }
                RunEvent::NodeStarted { node_id, node_type, .. } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, node_type);
                }
                RunEvent::NodeCompleted { node_id, duration_ms, .. } => {
                    println!("  ✅ Node {} done in {}ms", node_id, duration_ms);
                }
                RunEvent::NodeFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                RunEvent::NodeSkipped { node_id, reason, .. } => {
                    println!("  ⏭️  Node {} skipped: {}", node_id, reason);
                }
                RunEvent::NodePaused { node_id, .. } => {
                    println!("  ⏸️  Paused before checkpoint {}", node_id);
                }
                RunEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", node_id, message);
                    }
                },
                RunEvent::RunCompleted { summary, duration_ms, .. } => {
                    println!(
                        "✨ Run finished in {}ms: {} done, {} failed, {} skipped, {} paused",
                        duration_ms, summary.done, summary.failed, summary.skipped, summary.paused
                    );
                    break;
                }
            }
        }
    });

    let report = match branch {
        None => runtime.execute_flow(&flow, &inputs, globals, context).await,
        Some((node_id, message)) => {
            runtime
                .execute_branch(&flow, &inputs, globals, context, message, &node_id)
                .await?
        }
    };

    // RunCompleted ends the printer; a lagged receiver may have missed it
    let _ = tokio::time::timeout(Duration::from_secs(1), event_task).await;
    bridge.close().await;

    print_report(&runtime, &report)?;
    Ok(())
}

fn print_report(runtime: &FlowRuntime, report: &RunReport) -> Result<()> {
    println!();
    println!("📊 Run Summary:");
    println!("   Run ID: {}", report.run_id);

    for (node_id, record) in runtime.store().snapshot() {
        let label = record.status.label();
        match &record.status {
            NodeStatus::Error { error, .. } => println!("   {} [{}]: {}", node_id, label, error),
            _ => println!("   {} [{}]", node_id, label),
        }
        if let Some(output) = &record.output {
            println!("     {}", serde_json::to_string(output)?);
        }
    }

    let paused = report.paused();
    if !paused.is_empty() {
        println!();
        println!("⏸️  Resume with:");
        for node_id in paused {
            println!("  flow resume --file <flow> --node {} --message <msg.json>", node_id);
        }
    }

    Ok(())
}

fn validate_flow(config: &CliConfig, file: &Path) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let flow = load_flow(file)?;
    let registry = build_registry(config, Arc::new(BridgeClient::new(config.bridge.clone())));
    let adjacency = Adjacency::build(&flow);
    let mut problems = 0;

    let mut seen = HashSet::new();
    for node in &flow.nodes {
        if !seen.insert(node.id.as_str()) {
            println!("  ❌ Duplicate node id: {}", node.id);
            problems += 1;
        }
        if !registry.contains(&node.node_type) {
            println!("  ❌ Unknown node type: {} ({})", node.id, node.node_type);
            problems += 1;
        }
    }

    for (source, target) in adjacency.dangling_edges() {
        println!("  ⚠️  Edge {} -> {} references a missing node and is ignored", source, target);
    }

    let roots = graph::roots(&flow);
    let reachable = adjacency.reachable_from(roots.iter().map(String::as_str));
    for node in flow.nodes.iter().filter(|n| !reachable.contains(&n.id)) {
        println!("  ⚠️  Node {} is not reachable from any root", node.id);
    }

    let checkpoints: Vec<&str> = flow
        .nodes
        .iter()
        .filter(|n| config.runtime.checkpoint_types.contains(&n.node_type))
        .map(|n| n.id.as_str())
        .collect();

    println!("   Name: {}", flow.name);
    println!("   Nodes: {}", flow.nodes.len());
    println!("   Edges: {}", flow.edges.len());
    println!("   Roots: {}", roots.join(", "));
    if !checkpoints.is_empty() {
        println!("   Checkpoints: {}", checkpoints.join(", "));
    }

    if problems > 0 {
        bail!("{} problem(s) found in {}", problems, file.display());
    }
    println!("✅ Flow is valid");
    Ok(())
}

fn list_nodes(config: &CliConfig) {
    println!("📦 Available Node Types:");
    println!();

    let registry = build_registry(config, Arc::new(BridgeClient::new(config.bridge.clone())));

    for node_type in registry.list_node_types() {
        let checkpoint = if config.runtime.checkpoint_types.contains(&node_type) {
            " [checkpoint]"
        } else {
            ""
        };
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({}){}", node_type, metadata.category, checkpoint);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}{}", node_type, checkpoint);
        }
    }
}

fn create_example_flow(output: &Path, inputs_output: &Path) -> Result<()> {
    let mut flow = Flow::new("Example Flow");
    flow.description = Some("Greets a name, waits at a checkpoint, then logs the result".to_string());

    let input = flow.add_node(
        NodeSpec::new("name", "input")
            .with_name("Name")
            .with_position(100.0, 100.0),
    );
    let greet = flow.add_node(
        NodeSpec::new("greet", "userFunction")
            .with_name("Greet")
            .with_position(300.0, 100.0),
    );
    let approve = flow.add_node(
        NodeSpec::new("approve", "runner")
            .with_name("Approve")
            .with_position(500.0, 100.0),
    );
    let log = flow.add_node(
        NodeSpec::new("log", "debug")
            .with_name("Log")
            .with_position(700.0, 100.0),
    );

    flow.connect(input.clone(), greet.clone());
    flow.connect(greet.clone(), approve.clone());
    flow.connect(approve, log);

    let inputs = RunInputs::new()
        .with(input, Message::new().with("input", "world"))
        .with(
            greet,
            Message::new().with("userFunction", "return { payload: 'Hello, ' + msg.payload + '!' };"),
        );

    std::fs::write(output, serde_json::to_string_pretty(&flow)?)?;
    std::fs::write(inputs_output, serde_json::to_string_pretty(&inputs)?)?;

    println!("✨ Created example flow: {}", output.display());
    println!("   Inputs: {}", inputs_output.display());
    println!();
    println!("Run it with:");
    println!("  flow run --file {} --inputs {}", output.display(), inputs_output.display());

    Ok(())
}
