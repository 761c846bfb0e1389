use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loom_core::{Graph, Orchestrator, Payload};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

mod builtins;
mod config;

use config::{load_workflow, CliConfig};

#[derive(Parser, Debug)]
#[command(name = "loom")]
#[command(about = "Run DAG workflows of pluggable executor steps", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "LOOM_CONFIG", default_value = "loom.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a workflow and print the final node's result
    Run {
        /// Workflow definition (JSON, or TOML by extension)
        workflow: PathBuf,

        /// Initial payload as a JSON object
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Maximum simultaneously executing nodes
        #[arg(long)]
        max_workers: Option<usize>,

        /// Dispatch independent nodes concurrently
        #[arg(long)]
        concurrent: bool,
    },
    /// Print the execution order of a workflow
    Order {
        workflow: PathBuf,
    },
    /// Print the nodes of a workflow with their inputs
    Graph {
        workflow: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loom_cli=info,loom_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Run {
            workflow,
            payload,
            max_workers,
            concurrent,
        } => {
            let config = CliConfig::load(&args.config)?.with_overrides(max_workers, concurrent);
            run(workflow, &payload, config).await
        }
        Command::Order { workflow } => {
            let graph = Graph::build(&load_workflow(&workflow)?)?;
            for node_id in graph.topological_order()? {
                println!("{}", node_id);
            }
            Ok(())
        }
        Command::Graph { workflow } => {
            let graph = Graph::build(&load_workflow(&workflow)?)?;
            print!("{}", graph);
            Ok(())
        }
    }
}

async fn run(workflow_path: PathBuf, payload: &str, config: CliConfig) -> Result<()> {
    let workflow = load_workflow(&workflow_path)?;
    let payload: Payload =
        serde_json::from_str(payload).context("--payload must be a JSON object")?;

    tracing::info!(
        "Running workflow {} ({} nodes, max_workers={}, concurrent={})",
        workflow.id,
        workflow.nodes.len(),
        config.orchestrator.max_workers,
        config.orchestrator.concurrent
    );

    let orchestrator = Orchestrator::new(&workflow, builtins::builtin_registry(), config.orchestrator)?;

    // Ctrl-C cancels the run
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let output = orchestrator.run(&cancel, payload).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
