//! The `estator` binary: config loading, tracing setup, and wiring of the
//! store, queue, planner, reconciler, and HTTP surface.

use clap::{Parser, Subcommand};
use estator_agents::builtin_registry;
use estator_agents::DirectInvoker;
use estator_api::ApiServer;
use estator_core::{JobType, NewJob};
use estator_planner::{Decomposer, LlmConfig, LlmDecomposer, PlannerWorker, Reconciler, RuleDecomposer};
use estator_queue::{DispatchMessage, DispatchQueue, MemoryQueue, RedrivePolicy};
use estator_store::{JobRepository, MemoryRepository, SqliteRepository};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "estator", about = "Estator — property analysis job pipeline")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "estator.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the intake API, planner worker, and reconciler
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Plan and execute a single query in-process, then print the result
    Plan {
        /// The user query to analyze
        #[arg(short, long)]
        query: String,
    },
}

#[derive(Deserialize, Default)]
struct EstatorConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    queue: QueueConfig,
    #[serde(default)]
    planner: PlannerConfig,
}

#[derive(Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Deserialize)]
struct StoreConfig {
    /// SQLite database path; empty selects the in-memory repository.
    #[serde(default = "default_db_path")]
    db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Deserialize)]
struct QueueConfig {
    #[serde(default = "default_visibility_timeout_secs")]
    visibility_timeout_secs: u64,
    #[serde(default = "default_max_receive_count")]
    max_receive_count: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout_secs(),
            max_receive_count: default_max_receive_count(),
        }
    }
}

#[derive(Deserialize)]
struct PlannerConfig {
    /// OpenAI-compatible model settings; absent selects the rule-based planner.
    llm: Option<LlmConfig>,
    #[serde(default = "default_stage_timeout_secs")]
    stage_timeout_secs: u64,
    #[serde(default = "default_stale_after_secs")]
    stale_after_secs: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    reconcile_interval_secs: u64,
    #[serde(default = "default_worker_count")]
    worker_count: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            llm: None,
            stage_timeout_secs: default_stage_timeout_secs(),
            stale_after_secs: default_stale_after_secs(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            worker_count: default_worker_count(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_db_path() -> String {
    "estator.db".to_string()
}
fn default_visibility_timeout_secs() -> u64 {
    30
}
fn default_max_receive_count() -> u32 {
    3
}
fn default_stage_timeout_secs() -> u64 {
    30
}
fn default_stale_after_secs() -> u64 {
    300
}
fn default_reconcile_interval_secs() -> u64 {
    30
}
fn default_worker_count() -> usize {
    1
}

impl EstatorConfig {
    /// Load from `path`; a missing file yields the defaults.
    async fn load(path: &PathBuf) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(s) => Ok(toml::from_str(&s)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            )),
        }
    }
}

struct Wiring {
    repository: Arc<dyn JobRepository>,
    queue: Arc<dyn DispatchQueue>,
    planner: Arc<PlannerWorker>,
    reconciler: Arc<Reconciler>,
}

fn wire(config: &EstatorConfig) -> anyhow::Result<Wiring> {
    let repository: Arc<dyn JobRepository> = if config.store.db_path.is_empty() {
        info!("using in-memory job store");
        Arc::new(MemoryRepository::new())
    } else {
        info!(path = %config.store.db_path, "opening SQLite job store");
        Arc::new(SqliteRepository::open(&config.store.db_path)?)
    };

    let queue: Arc<dyn DispatchQueue> = Arc::new(MemoryQueue::new(RedrivePolicy {
        visibility_timeout: Duration::from_secs(config.queue.visibility_timeout_secs),
        max_receive_count: config.queue.max_receive_count,
    }));

    let decomposer: Arc<dyn Decomposer> = match &config.planner.llm {
        Some(llm) if !llm.api_key.is_empty() => {
            info!(model = %llm.model, "LLM decomposition enabled");
            Arc::new(LlmDecomposer::new(llm.clone()))
        }
        _ => {
            info!("no LLM configured, using rule-based decomposition");
            Arc::new(RuleDecomposer)
        }
    };

    let registry = Arc::new(builtin_registry());
    let invoker = Arc::new(DirectInvoker::new(
        repository.clone(),
        registry,
        Duration::from_secs(config.planner.stage_timeout_secs),
    ));

    let planner = Arc::new(PlannerWorker::new(
        repository.clone(),
        queue.clone(),
        decomposer,
        invoker,
    ));
    let reconciler = Arc::new(Reconciler::new(
        repository.clone(),
        queue.clone(),
        Duration::from_secs(config.planner.stale_after_secs),
    ));

    Ok(Wiring {
        repository,
        queue,
        planner,
        reconciler,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = EstatorConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or(config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            let wiring = wire(&config)?;

            for _ in 0..config.planner.worker_count.max(1) {
                let planner = wiring.planner.clone();
                tokio::spawn(async move { planner.run().await });
            }

            let reconciler = wiring.reconciler.clone();
            let interval = Duration::from_secs(config.planner.reconcile_interval_secs);
            tokio::spawn(async move { reconciler.run(interval).await });

            let app = ApiServer::build(wiring.repository, wiring.queue);
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("Estator listening on {addr}");
            axum::serve(listener, app).await?;
        }
        Commands::Plan { query } => {
            let wiring = wire(&config)?;

            let job = wiring
                .repository
                .create(NewJob::root(
                    JobType::Planning,
                    json!({"user_query": query, "context": {}}),
                ))
                .await?;
            wiring
                .queue
                .send(DispatchMessage::reference(job.job_id.clone()))
                .await?;

            wiring.planner.run_once().await?;

            let job = wiring.repository.get(&job.job_id).await?;
            println!("job:      {}", job.job_id);
            println!("status:   {}", job.status);
            if let Some(payload) = &job.response_payload {
                println!("{}", serde_json::to_string_pretty(payload)?);
            }
            if let Some(error) = &job.error_message {
                println!("error:    {error}");
            }
            for child in wiring.repository.list_children(&job.job_id).await? {
                println!(
                    "  child {} [{}] {}",
                    child.job_id, child.job_type, child.status
                );
            }
        }
    }

    Ok(())
}
