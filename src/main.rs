use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use zkflow_engine::{Backends, EngineConfig, WorkflowOrchestrator, WorkflowRequest};
use zkflow_store::{SqliteStore, WorkflowPersistence};
use zkflow_workflow::Workflow;

/// zkflow - orchestrates zero-knowledge proof workflows
#[derive(Parser)]
#[command(name = "zkflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.zkflow)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a workflow request and print its execution stages
  Plan {
    /// Path to the workflow request (JSON)
    request_file: PathBuf,
  },

  /// Run a workflow request against the mock proving backends
  Run {
    /// Path to the workflow request (JSON)
    request_file: PathBuf,

    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Save run snapshots to the data directory
    #[arg(long)]
    persist: bool,
  },

  /// List persisted runs
  Runs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".zkflow"),
  };

  match cli.command {
    Some(Commands::Plan { request_file }) => plan(&request_file),
    Some(Commands::Run {
      request_file,
      config,
      persist,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run(request_file, config, persist.then_some(data_dir)))
    }
    Some(Commands::Runs) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(list_runs(data_dir))
    }
    None => {
      println!("zkflow - use --help to see available commands");
      Ok(())
    }
  }
}

fn plan(request_file: &Path) -> Result<()> {
  let request = read_request(request_file)?;
  let workflow = Workflow::from_request(&request)
    .with_context(|| format!("invalid workflow request: {}", request_file.display()))?;

  println!(
    "{}",
    serde_json::to_string_pretty(&serde_json::json!({
      "mode": workflow.mode(),
      "stages": workflow.stages(),
    }))?
  );
  Ok(())
}

async fn run(request_file: PathBuf, config: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<()> {
  let mut request = read_request(&request_file)?;

  // Piped JSON is merged over the request's own input.
  if let serde_json::Value::Object(input) = read_payload_from_stdin()? {
    request.input.extend(input);
  }

  let config = match config {
    Some(path) => {
      let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
      serde_json::from_str::<EngineConfig>(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?
    }
    None => EngineConfig::default(),
  };

  let mut orchestrator = WorkflowOrchestrator::new(config, Backends::mock());
  if let Some(dir) = data_dir {
    let store = open_store(&dir).await?;
    orchestrator = orchestrator.with_persistence(Arc::new(store));
  }

  let maintenance = CancellationToken::new();
  let handles = orchestrator.start_maintenance(maintenance.clone());

  let result = orchestrator
    .submit(request)
    .await
    .context("workflow request rejected")?;

  maintenance.cancel();
  for handle in handles {
    let _ = handle.await;
  }

  println!("{}", serde_json::to_string_pretty(&result)?);

  if !result.is_completed() {
    bail!("workflow {} ended {:?}", result.workflow_id, result.status);
  }
  Ok(())
}

async fn list_runs(data_dir: PathBuf) -> Result<()> {
  let store = open_store(&data_dir).await?;
  let runs = store.list().await.context("failed to list runs")?;

  for run in runs {
    println!(
      "{}\t{:?}\t{}/{}\t{}",
      run.workflow_id, run.status, run.stages_completed, run.total_stages, run.updated_at
    );
  }
  Ok(())
}

async fn open_store(data_dir: &Path) -> Result<SqliteStore> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

  let path = data_dir.join("zkflow.db");
  SqliteStore::open(&path)
    .await
    .with_context(|| format!("failed to open run store: {}", path.display()))
}

fn read_request(request_file: &Path) -> Result<WorkflowRequest> {
  let content = std::fs::read_to_string(request_file)
    .with_context(|| format!("failed to read request file: {}", request_file.display()))?;

  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse request file: {}", request_file.display()))
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(serde_json::json!({}));
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;

  if input.trim().is_empty() {
    Ok(serde_json::json!({}))
  } else {
    serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
  }
}
