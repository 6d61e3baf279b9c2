use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use relaycore::{CanvasNode, ExecutionEvent, FlowDefinition, FlowStatus, NodeEvent, TriggerType};
use relaynodes::{standard_registry, GatewaySettings, Ports};
use relayruntime::{validate_canvas, BranchMode, FlowRuntime, RuntimeConfig, UnknownNodePolicy};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay flow automation CLI", long_about = None)]
struct Cli {
    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow file
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initiating event as a JSON document
        #[arg(short, long)]
        input: Option<String>,

        /// How the run is reported as started
        #[arg(short, long, default_value = "manual")]
        trigger: TriggerType,

        /// Mark the run as a test run (allowed on archived flows)
        #[arg(long)]
        test: bool,

        /// Follow only edges whose handle matches the branch taken
        #[arg(long, env = "RELAY_BRANCH_MODE")]
        branch_mode: Option<BranchMode>,

        /// Fail runs that reach a node type with no handler
        #[arg(long)]
        strict: bool,
    },

    /// Validate a flow file
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create an example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            file,
            input,
            trigger,
            test,
            branch_mode,
            strict,
        } => {
            let mut config = RuntimeConfig::from_env();
            if let Some(mode) = branch_mode {
                config = config.with_branch_mode(mode);
            }
            if strict {
                config = config.with_unknown_nodes(UnknownNodePolicy::Reject);
            }
            run_flow(&file, input, trigger, test, config).await?;
        }

        Commands::Validate { file } => {
            validate_flow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_flow(&output)?;
        }
    }

    Ok(())
}

fn load_flow(file: &Path) -> Result<FlowDefinition> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", file.display()))
}

async fn run_flow(
    file: &Path,
    input: Option<String>,
    trigger: TriggerType,
    test: bool,
    config: RuntimeConfig,
) -> Result<()> {
    println!("🚀 Loading flow from: {}", file.display());
    let flow = load_flow(file)?;

    println!("📋 Flow: {} ({:?})", flow.name, flow.status);
    println!("   Nodes: {}", flow.canvas.nodes.len());
    println!("   Edges: {}", flow.canvas.edges.len());
    println!();

    let input: Value = match input {
        Some(raw) => serde_json::from_str(&raw).context("input must be valid JSON")?,
        None => Value::Object(Default::default()),
    };

    let ports = GatewaySettings::from_env().into_ports();
    let registry = Arc::new(standard_registry(&ports));
    debug!(
        "Runtime config: branch mode {:?}, unknown nodes {}",
        config.branch_mode, config.unknown_nodes
    );
    let runtime = FlowRuntime::with_config(registry, ports.store.clone(), config);
    info!(flow_id = %flow.id, trigger = trigger.as_str(), test_mode = test, "Running flow");

    // Subscribe before starting so no event is missed
    let mut events = runtime.subscribe_events();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::RunStarted { run_id, .. } => {
                    println!("▶️  Run {} started", run_id);
                }
                ExecutionEvent::NodeStarted {
                    node_id, node_type, ..
                } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeCompleted {
                    node_id,
                    duration_ms,
                    ..
                } => {
                    println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", node_id, message);
                    }
                },
                ExecutionEvent::RunCompleted {
                    status,
                    error,
                    duration_ms,
                    ..
                } => {
                    match error {
                        None => println!("✨ Run finished {} in {}ms", status, duration_ms),
                        Some(error) => {
                            println!("💥 Run {} after {}ms: {}", status, duration_ms, error)
                        }
                    }
                    break;
                }
            }
        }
    });

    let report = runtime.run_flow(&flow, trigger, input, test).await?;
    let _ = printer.await;

    println!();
    println!("📊 Run Summary:");
    println!("   Run ID: {}", report.run.id);
    println!("   Status: {}", report.run.status);
    println!("   Executed: {}/{} nodes", report.executed.len(), flow.canvas.nodes.len());
    println!();
    println!("📤 Final data:");
    println!("{}", serde_json::to_string_pretty(&report.data)?);

    if !report.succeeded() {
        bail!(
            "run failed: {}",
            report.run.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

fn validate_flow(file: &Path) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());
    let flow = load_flow(file)?;
    validate_canvas(&flow.canvas).context("canvas is not runnable")?;

    let registry = standard_registry(&Ports::in_memory());
    let unknown: Vec<&CanvasNode> = flow
        .canvas
        .nodes
        .iter()
        .filter(|n| !registry.contains(&n.node_type))
        .collect();

    println!("✅ Flow is valid:");
    println!("   Name: {}", flow.name);
    println!("   Nodes: {}", flow.canvas.nodes.len());
    println!("   Edges: {}", flow.canvas.edges.len());
    for node in unknown {
        println!("   ⚠️  Node {} has unknown type {}", node.id, node.node_type);
    }
    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = standard_registry(&Ports::in_memory());
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_flow(output: &Path) -> Result<()> {
    let mut flow = FlowDefinition::new("Welcome new leads").with_status(FlowStatus::Active);
    flow.description = Some("Greets a lead on WhatsApp and records the greeting".into());

    flow.add_node(CanvasNode::new("trigger", "trigger.manual"));
    flow.add_node(
        CanvasNode::new("has_phone", "logic.if").with_config("condition", "input.phone != null"),
    );
    flow.add_node(
        CanvasNode::new("greet", "whatsapp.send")
            .with_config("toPath", "phone")
            .with_config("template", "Hi {{input.name}}! Thanks for reaching out."),
    );
    flow.add_node(
        CanvasNode::new("log", "pb.create")
            .with_config("collection", "greetings")
            .with_config("data", "{\"messageId\": \"{{input.providerMessageId}}\"}"),
    );

    flow.connect("trigger", "has_phone");
    flow.connect_branch("has_phone", "true", "greet");
    flow.connect("greet", "log");

    let json = serde_json::to_string_pretty(&flow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  relay run --file {} --input '{{\"name\": \"Ada\", \"phone\": \"5511999999999\"}}'",
        output.display()
    );

    Ok(())
}
