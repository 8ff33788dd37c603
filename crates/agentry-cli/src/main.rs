use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agentry_core::app::{AgentBuilder, AgentGroup};
use agentry_core::config::{AgentConfig, DEFAULT_AGENT_NAME, DEFAULT_AGENT_TYPE, DEFAULT_METRICS_PORT};
use agentry_core::domain::{AgentError, RetryPolicy};
use agentry_core::impls::{
    FileSink, InMemoryTaskStore, MetricsExporter, PrometheusMetrics, SimulatedExecutor, StdoutSink,
};
use agentry_core::observability::Severity;
use agentry_core::ports::{LogSink, TaskStore};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Instrumented task-processing agent
#[derive(Debug, Parser)]
#[command(name = "agentry", version)]
struct Args {
    #[arg(long, env = "AGENT_NAME", default_value = DEFAULT_AGENT_NAME)]
    agent_name: String,

    #[arg(long, env = "AGENT_TYPE", default_value = DEFAULT_AGENT_TYPE)]
    agent_type: String,

    #[arg(long, env = "METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    metrics_port: u16,

    /// Minimum event severity (DEBUG, INFO, WARNING, ERROR, CRITICAL). Invalid values fall back to INFO.
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Append events to this file instead of stdout.
    #[arg(long, env = "LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Demo tasks created by each agent at startup.
    #[arg(long, env = "SEED_TASKS", default_value_t = 5)]
    seed_tasks: usize,

    #[arg(long, default_value_t = 5.0)]
    poll_interval_secs: f64,

    #[arg(long, default_value_t = 60.0)]
    heartbeat_interval_secs: f64,

    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Stop after this many loop iterations.
    #[arg(long)]
    iterations: Option<u64>,

    /// Agents sharing one in-memory store. Names get a `_N` suffix when more than one.
    #[arg(long, default_value_t = 1)]
    agents: usize,

    #[arg(long, default_value_t = 0.2)]
    transient_rate: f64,

    #[arg(long, default_value_t = 0.1)]
    permanent_rate: f64,
}

impl Args {
    fn agent_config(&self) -> Result<AgentConfig> {
        let defaults = AgentConfig::default();
        Ok(AgentConfig {
            agent_name: self.agent_name.clone(),
            agent_type: self.agent_type.clone(),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..defaults.retry.clone()
            },
            poll_interval: Duration::try_from_secs_f64(self.poll_interval_secs)
                .context("invalid --poll-interval-secs")?,
            heartbeat_interval: Duration::try_from_secs_f64(self.heartbeat_interval_secs)
                .context("invalid --heartbeat-interval-secs")?,
            seed_tasks: self.seed_tasks,
            metrics_port: self.metrics_port,
            ..defaults
        })
    }

    fn log_sink(&self) -> Result<Arc<dyn LogSink>> {
        let sink: Arc<dyn LogSink> = match &self.log_file {
            Some(path) => Arc::new(
                FileSink::open(path)
                    .with_context(|| format!("failed to open log file {}", path.display()))?,
            ),
            None => Arc::new(StdoutSink),
        };
        Ok(sink)
    }
}

/// Process diagnostics go to stderr; agent events go to the log sink.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = args.agent_config()?;
    let severity = Severity::from_env_value(args.log_level.as_deref());
    let sink = args.log_sink()?;

    let metrics = Arc::new(PrometheusMetrics::new().context("failed to create metrics registry")?);
    let exporter = MetricsExporter::new(metrics.clone());
    let addr = exporter
        .start(config.metrics_port)
        .await
        .map_err(AgentError::from)?;
    info!(%addr, "serving /metrics");

    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let executor = Arc::new(
        SimulatedExecutor::new().with_rates(args.transient_rate, args.permanent_rate),
    );

    let mut group = AgentGroup::new();
    for n in 1..=args.agents.max(1) {
        let agent_config = if args.agents > 1 {
            config.for_replica(n)
        } else {
            config.clone()
        };
        let agent = AgentBuilder::new(agent_config)
            .store(store.clone())
            .executor(executor.clone())
            .metrics(metrics.clone())
            .log_sink(sink.clone())
            .min_severity(severity)
            .shutdown(group.subscribe())
            .build()
            .context("failed to build agent")?;
        group.spawn(agent, args.iterations);
    }
    info!(agents = group.len(), %severity, "agents started");

    let results = tokio::select! {
        results = group.join() => results,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown requested, waiting for in-flight tasks");
            group.request_shutdown();
            group.join().await
        }
    };

    let mut fatal = None;
    for (name, result) in results {
        match result {
            Ok(summary) => info!(
                agent = %name,
                processed = summary.processed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "agent stopped"
            ),
            Err(e) => {
                error!(agent = %name, error = %e, "agent failed");
                if fatal.is_none() {
                    fatal = Some(e);
                }
            }
        }
    }

    match fatal {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
