//! CLI entry point for docflow.
//!
//! Operator commands for the workflow core: list definitions, resolve a
//! requested name through the matching cascade, execute a run, and
//! inspect persisted runs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use docflow_agent::{DelegateClient, DelegateConfig};
use docflow_engine::{DefinitionStore, WorkflowEngine, WorkflowMatcher};
use docflow_store::{Database, RunStore};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// docflow — declarative document-workflow automation.
#[derive(Parser)]
#[command(
    name = "docflow",
    version,
    about = "docflow — declarative document-workflow automation",
    long_about = "Executes YAML-defined document workflows against a registry of \
                  action handlers, persisting run state so execution can be \
                  observed mid-flight."
)]
struct Cli {
    /// Directory of workflow definition YAML files.
    #[arg(long, global = true, default_value = "workflows")]
    workflows: PathBuf,

    /// Path to the run-state database.
    #[arg(long, global = true, default_value = "data/docflow.db")]
    db: PathBuf,

    /// Base URL of the external agent service. Without it, agent-backed
    /// steps return simulated results and semantic matching is skipped.
    #[arg(long, global = true)]
    agent_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered workflow definitions.
    Definitions,

    /// Resolve a requested workflow name through the matching cascade.
    Resolve {
        /// The (possibly misspelled or aliased) workflow name.
        name: String,

        /// Optional JSON context forwarded to the matcher.
        #[arg(long)]
        context: Option<String>,
    },

    /// Execute a workflow against a document.
    Run {
        /// Registered workflow name (resolve it first if unsure).
        workflow: String,

        /// Identifier of the document the run operates on.
        document_id: String,

        /// Parameters as key=value pairs. Values are parsed as JSON when
        /// possible, otherwise taken as strings.
        #[arg(long = "param", short = 'p', value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// List persisted runs, most recent first.
    Runs {
        /// Only show runs of this workflow.
        #[arg(long)]
        workflow: Option<String>,
    },

    /// Show one run's full persisted record.
    Show {
        /// The run id.
        run_id: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match &cli.command {
        Commands::Definitions => cmd_definitions(&cli),
        Commands::Resolve { name, context } => cmd_resolve(&cli, name, context.as_deref()).await,
        Commands::Run {
            workflow,
            document_id,
            params,
        } => cmd_run(&cli, workflow, document_id, params).await,
        Commands::Runs { workflow } => cmd_runs(&cli, workflow.as_deref()).await,
        Commands::Show { run_id } => cmd_show(&cli, run_id).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn load_definitions(cli: &Cli) -> Result<Arc<DefinitionStore>> {
    let store = DefinitionStore::load_dir(&cli.workflows)
        .with_context(|| format!("loading workflows from {}", cli.workflows.display()))?;
    Ok(Arc::new(store))
}

async fn open_runs(cli: &Cli) -> Result<RunStore> {
    if let Some(parent) = cli.db.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let db = Database::open_and_migrate(cli.db.clone())
        .await
        .context("opening run-state database")?;
    Ok(RunStore::new(db))
}

fn delegate_from(cli: &Cli) -> Result<Option<Arc<DelegateClient>>> {
    match &cli.agent_url {
        Some(url) => {
            let client = DelegateClient::new(DelegateConfig::new(url))
                .context("configuring agent delegate")?;
            Ok(Some(Arc::new(client)))
        }
        None => Ok(None),
    }
}

fn build_engine(cli: &Cli, definitions: Arc<DefinitionStore>, runs: RunStore) -> Result<WorkflowEngine> {
    Ok(match delegate_from(cli)? {
        Some(delegate) => WorkflowEngine::with_delegate(definitions, runs, delegate),
        None => WorkflowEngine::new(definitions, runs),
    })
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn cmd_definitions(cli: &Cli) -> Result<()> {
    let definitions = load_definitions(cli)?;

    if definitions.is_empty() {
        println!("no workflow definitions found in {}", cli.workflows.display());
        return Ok(());
    }

    for (name, description) in definitions.descriptions() {
        println!("{name}: {description}");
    }
    Ok(())
}

async fn cmd_resolve(cli: &Cli, name: &str, context: Option<&str>) -> Result<()> {
    let definitions = load_definitions(cli)?;

    let context: Value = match context {
        Some(raw) => serde_json::from_str(raw).context("parsing --context as JSON")?,
        None => Value::Null,
    };

    let mut matcher = WorkflowMatcher::new(definitions);
    if let Some(delegate) = delegate_from(cli)? {
        matcher = matcher.with_delegate(delegate);
    }

    let result = matcher.resolve(name, &context).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_run(cli: &Cli, workflow: &str, document_id: &str, params: &[String]) -> Result<()> {
    let definitions = load_definitions(cli)?;
    let runs = open_runs(cli).await?;
    let engine = build_engine(cli, definitions, runs)?;

    let parameters = parse_params(params)?;

    info!(workflow, document_id, "executing workflow");
    let run = engine.execute(workflow, document_id, parameters).await?;

    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}

async fn cmd_runs(cli: &Cli, workflow: Option<&str>) -> Result<()> {
    let runs = open_runs(cli).await?;

    let records = runs.list(workflow).await?;
    if records.is_empty() {
        println!("no runs recorded");
        return Ok(());
    }

    for run in records {
        println!(
            "{}  {:<10}  {:<24}  doc={}  started={}",
            run.run_id,
            run.status.as_str(),
            run.workflow_name,
            run.document_id,
            run.started_at.to_rfc3339(),
        );
    }
    Ok(())
}

async fn cmd_show(cli: &Cli, run_id: &str) -> Result<()> {
    let runs = open_runs(cli).await?;

    match runs.get(run_id).await? {
        Some(run) => {
            println!("{}", serde_json::to_string_pretty(&run)?);
            Ok(())
        }
        None => bail!("run not found: {run_id}"),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse `key=value` pairs; values that parse as JSON are kept structured,
/// everything else becomes a string.
fn parse_params(params: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in params {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("invalid parameter `{pair}`, expected KEY=VALUE");
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
