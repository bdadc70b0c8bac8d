//! `baton-sim`
//!
//! Runs one chain of simulated workers through the handoff scheduler and
//! streams every notification to the log.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use baton_core::config::load_config;
use baton_core::tracing_init::init_from_config;
use baton_scheduler::orchestration::{
    ActivationContext, HandoffRequest, Notification, Orchestrator, WorkerRegistry,
};
use baton_scheduler::sim::{HandoffSpec, SimulatedWorker, WorkerSpec};

/// Delay for handoff targets that are not part of the chain.
const DEFAULT_HANDOFF_DELAY_MS: u64 = 10;

#[derive(Parser, Debug)]
#[command(name = "baton-sim")]
#[command(version, about = "Baton - simulate a worker chain with handoffs")]
struct Args {
    /// JSON config file
    #[arg(long, env = "BATON_CONFIG")]
    config: Option<PathBuf>,

    /// Chain workers as `name:delay_ms[:fail|error|hang]`, comma separated
    #[arg(
        long,
        value_delimiter = ',',
        required = true,
        env = "BATON_CHAIN"
    )]
    chain: Vec<WorkerSpec>,

    /// Out-of-band handoff as `from:to:priority` (repeatable)
    #[arg(long = "handoff")]
    handoffs: Vec<HandoffSpec>,

    /// Log level filter (e.g. "info", "debug", "warn"); overrides the config file.
    #[arg(long, env = "BATON_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON.
    #[arg(long, env = "BATON_LOG_JSON")]
    log_json: bool,

    /// Maximum concurrent worker activations; overrides the config file.
    #[arg(long, env = "BATON_MAX_WORKERS")]
    max_workers: Option<usize>,

    /// Milliseconds to wait for running chains on shutdown.
    #[arg(long, default_value_t = 5_000, env = "BATON_SHUTDOWN_TIMEOUT_MS")]
    shutdown_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.log_json {
        config.logging.json = true;
    }
    if let Some(max) = args.max_workers {
        config.scheduler.max_concurrent_workers = max;
    }
    config.scheduler.validate()?;

    init_from_config("baton_scheduler", &config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        chain_len = args.chain.len(),
        handoffs = args.handoffs.len(),
        max_workers = config.scheduler.max_concurrent_workers,
        "Starting baton-sim"
    );

    let registry = WorkerRegistry::new(config.scheduler.max_concurrent_workers);
    let chain: Vec<String> = args.chain.iter().map(|spec| spec.id.clone()).collect();
    for spec in args.chain {
        registry.register(Arc::new(spec.into_worker())).await;
    }
    for handoff in &args.handoffs {
        if !registry.contains(&handoff.to_worker).await {
            registry
                .register(Arc::new(SimulatedWorker::new(
                    handoff.to_worker.clone(),
                    Duration::from_millis(DEFAULT_HANDOFF_DELAY_MS),
                )))
                .await;
        }
    }

    let orchestrator = Orchestrator::new(config.scheduler, Arc::new(registry));
    let mut events = orchestrator.subscribe();

    let context = ActivationContext::new(serde_json::json!({ "source": "baton-sim" }));
    let chain_id = orchestrator.start_chain(chain, context.clone()).await?;

    for handoff in args.handoffs {
        orchestrator
            .emit_handoff(
                HandoffRequest::new(
                    handoff.from_worker,
                    handoff.to_worker,
                    handoff.priority,
                    context.clone(),
                )
                .with_reason("requested on the command line"),
            )
            .await?;
    }

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(notification) => {
                    let done = matches!(
                        &notification,
                        Notification::ChainCompleted { chain_id: id, .. } if *id == chain_id
                    );
                    info!(
                        kind = notification.kind(),
                        event = %serde_json::to_string(&notification)?,
                        "Notification"
                    );
                    if done {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
                break;
            }
        }
    }

    let report = orchestrator
        .shutdown(Duration::from_millis(args.shutdown_timeout_ms))
        .await;
    let metrics = orchestrator.metrics().await;

    info!(
        drained = report.drained,
        dropped_handoffs = report.dropped_handoffs,
        abandoned_chains = report.abandoned_chains,
        average_latency_ms = metrics.average_latency_ms,
        success_rate_pct = metrics.success_rate_pct,
        total_count = metrics.total_count,
        improvement_pct = metrics.improvement_pct,
        "baton-sim finished"
    );
    Ok(())
}
