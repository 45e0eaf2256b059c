//! AgentRun Coordinator Daemon

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agentrun_brain::{EndpointFile, EndpointPool};
use agentrun_bus::LocalBus;
use agentrun_coordinator::{AgentRegistry, Coordinator, WorkerSupervisor, WorkerTemplate};
use agentrun_core::{Capability, CapabilitySet, ComplexityHint, OrchestratorConfig, TaskPayload};
use agentrun_ralph::{FileCheckpointStore, LoopConfig, NoTools, RalphLoop};

/// AgentRun - persistent task orchestrator
#[derive(Parser)]
#[command(name = "agentrun")]
#[command(about = "Run the AgentRun coordinator", long_about = None)]
struct Cli {
    /// Path to the endpoint pool configuration (JSON)
    #[arg(short, long, default_value = "endpoints.json")]
    endpoints: PathBuf,

    /// Directory for task checkpoints
    #[arg(long, default_value = ".agentrun/checkpoints")]
    checkpoint_dir: PathBuf,

    /// Minimum number of workers
    #[arg(long, default_value_t = 1)]
    min_workers: usize,

    /// Maximum number of workers
    #[arg(long, default_value_t = 4)]
    max_workers: usize,

    /// Submit one task, wait for its result, then exit
    #[arg(short, long)]
    task: Option<String>,

    /// Required capabilities for the submitted task, comma separated
    #[arg(long, value_delimiter = ',')]
    capabilities: Vec<Capability>,

    /// Force the submitted task onto a worker instead of local execution
    #[arg(long, default_value_t = false)]
    complex: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let endpoint_file = EndpointFile::load(&cli.endpoints)?;
    let pool = Arc::new(EndpointPool::new(endpoint_file));
    let pool_capabilities = pool.capabilities();

    let config = OrchestratorConfig {
        min_workers: cli.min_workers,
        max_workers: cli.max_workers,
        ..Default::default()
    };
    let loop_config = LoopConfig {
        max_iterations: config.max_iterations,
        error_budget: config.error_budget,
        ..Default::default()
    };

    let bus = Arc::new(LocalBus::new());
    let store = Arc::new(FileCheckpointStore::new(&cli.checkpoint_dir));
    let registry = Arc::new(AgentRegistry::new());
    let supervisor = Arc::new(WorkerSupervisor::new(WorkerTemplate {
        bus: bus.clone(),
        model: pool.clone(),
        tools: Arc::new(NoTools),
        store: store.clone(),
        loop_config: loop_config.clone(),
        capabilities: pool_capabilities.clone(),
        heartbeat_interval: config.heartbeat_interval,
    }));
    let local_executor = Arc::new(RalphLoop::new(
        pool.clone(),
        Arc::new(NoTools),
        store.clone(),
        loop_config,
    ));

    let coordinator = Coordinator::new(
        config,
        bus,
        registry,
        supervisor,
        store,
        pool_capabilities,
        local_executor,
    );

    info!("Starting AgentRun coordinator");
    let shutdown = CancellationToken::new();
    let run_handle = {
        let coordinator = coordinator.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { coordinator.run(shutdown).await })
    };

    if let Some(description) = cli.task {
        let mut payload = TaskPayload::new(description)
            .with_capabilities(cli.capabilities.iter().copied().collect::<CapabilitySet>());
        if cli.complex {
            payload = payload.with_complexity(ComplexityHint::Complex);
        }

        let task_id = coordinator.submit(payload).await?;
        info!(task_id = %task_id, "Task submitted");

        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let Some(view) = coordinator.get_status(&task_id).await else {
                error!(task_id = %task_id, "Task vanished");
                break;
            };
            if let Some(result) = view.result {
                match result.output {
                    Some(output) => println!("{output}"),
                    None => println!(
                        "task {}: {:?} ({:?})",
                        task_id, result.status, result.reason
                    ),
                }
                break;
            }
        }

        shutdown.cancel();
    } else {
        tokio::signal::ctrl_c().await?;
        info!("Interrupt received");
        shutdown.cancel();
    }

    run_handle.await??;
    Ok(())
}
