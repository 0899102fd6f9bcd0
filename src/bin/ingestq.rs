//! ingestq CLI: runs the orchestrator and doubles as a worker executable.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ingestq::api::{self, AppState};
use ingestq::config::{Config, WorkerMode};
use ingestq::engine::Orchestrator;
use ingestq::model::ProgressRecord;
use ingestq::progress::ProgressReporter;
use ingestq::telemetry::{TelemetryConfig, init_telemetry};
use ingestq::worker::{
    InProcessLauncher, InspectProcessor, Processor, ProcessLauncher, Task, WorkerLauncher, handoff,
};

#[derive(Parser)]
#[command(name = "ingestq", about = "Deduplicating job orchestrator for document ingestion")]
struct Cli {
    /// Optional TOML config file (falls back to `INGESTQ_CONFIG`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator and the control API until Ctrl-C
    Serve {
        /// Control API address, overriding the config
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Worker slots, overriding the config
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
    /// Process one handoff artifact with the built-in processor
    ///
    /// Meant to be launched by the orchestrator in `process` worker mode.
    Work {
        /// Path of the handoff artifact
        handoff: PathBuf,
    },
    /// Append one progress record to the current job's status log
    Report {
        /// Percent complete, or -1 for an error
        #[arg(long, allow_negative_numbers = true)]
        progress: i32,
        /// Human-readable detail
        #[arg(long, default_value = "")]
        details: String,
        /// Items processed so far (batch jobs)
        #[arg(long, requires = "total")]
        processed: Option<u64>,
        /// Total items (batch jobs)
        #[arg(long, requires = "processed")]
        total: Option<u64>,
    },
    /// Print a handoff artifact as JSON and delete it
    Consume {
        /// Path of the handoff artifact
        handoff: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli
        .config
        .or_else(|| std::env::var_os("INGESTQ_CONFIG").map(PathBuf::from));

    match cli.command {
        Command::Serve {
            bind,
            max_concurrent,
        } => cmd_serve(config_path.as_deref(), bind, max_concurrent).await,
        Command::Work { handoff } => cmd_work(&handoff).await,
        Command::Report {
            progress,
            details,
            processed,
            total,
        } => cmd_report(progress, details, processed, total).await,
        Command::Consume { handoff } => cmd_consume(&handoff).await,
    }
}

async fn cmd_serve(
    config_path: Option<&Path>,
    bind: Option<SocketAddr>,
    max_concurrent: Option<usize>,
) -> anyhow::Result<()> {
    let mut config = Config::load(config_path).context("invalid configuration")?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(n) = max_concurrent {
        config.orchestrator.max_concurrent_jobs = n;
        config.validate().context("invalid configuration")?;
    }

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "ingestq".to_string(),
        default_level: config.log_level.clone(),
    })?;

    let launcher: Arc<dyn WorkerLauncher> = match config.worker.mode {
        WorkerMode::InProcess => Arc::new(InProcessLauncher::new(InspectProcessor)),
        WorkerMode::Process => {
            let command = config
                .worker
                .command
                .as_deref()
                .context("worker mode `process` requires a worker command")?;
            Arc::new(ProcessLauncher::new(command)?.args(config.worker.args.clone()))
        }
    };

    let orchestrator = Orchestrator::new(config.orchestrator.clone(), launcher);
    orchestrator.init().await?;

    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("cannot bind control API to {}", config.server.bind))?;

    let ctrl = orchestrator.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("interrupt received, shutting down");
        ctrl.shutdown();
    });

    let engine = orchestrator.clone();
    let engine_task = tokio::spawn(async move { engine.run().await });

    let state = AppState::new(orchestrator.clone(), config.server.api_token);
    api::serve(listener, state, orchestrator.shutdown_signal())
        .await
        .context("control API failed")?;

    orchestrator.shutdown();
    engine_task.await??;
    Ok(())
}

async fn cmd_work(path: &Path) -> anyhow::Result<()> {
    let progress = ProgressReporter::from_env()?;
    let handoff = handoff::consume(path).await?;
    anyhow::ensure!(
        handoff.job_id == progress.job_id(),
        "handoff is for job {} but the environment names job {}",
        handoff.job_id,
        progress.job_id()
    );
    InspectProcessor
        .process(Task { handoff, progress })
        .await
        .map_err(Into::into)
}

async fn cmd_report(
    progress: i32,
    details: String,
    processed: Option<u64>,
    total: Option<u64>,
) -> anyhow::Result<()> {
    let reporter = ProgressReporter::from_env()?;
    let mut record = ProgressRecord::new(reporter.job_id(), progress, details);
    if let (Some(processed), Some(total)) = (processed, total) {
        record = record.counts(processed, total);
    }
    anyhow::ensure!(record.is_well_formed(), "progress must be -1..=100 and processed <= total");
    reporter.report(&record).await?;
    Ok(())
}

async fn cmd_consume(path: &Path) -> anyhow::Result<()> {
    let handoff = handoff::consume(path).await?;
    println!("{}", serde_json::to_string_pretty(&handoff)?);
    Ok(())
}
