//! `docflow-worker` binary: wires the fabric's ports to concrete adapters
//! and runs the worker/health-monitor fleet until a shutdown signal arrives.
//!
//! Mirrors the corpus's worker-binary shape (`color_eyre` for top-level
//! error context, `clap` for CLI plumbing, `tracing_subscriber` bootstrap
//! before anything else runs) rather than its HTTP-server entry point,
//! since this binary has no request/response surface of its own.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use mockable::DefaultClock;
use tracing::{info, warn};

use docflow::cache::CacheStore;
use docflow::config::AppConfig;
use docflow::dlq::DlqStore;
use docflow::health::{HealthMonitor, ProtectionHooks, WorkerRegistry};
use docflow::outbound::files::FileLayout;
use docflow::outbound::memory::MemoryStore;
use docflow::outbound::ocr::CommandOcrPort;
use docflow::outbound::pdf_ops::CommandPdfOpsPort;
use docflow::outbound::process::CommandConversionPort;
use docflow::outbound::redis::{RedisPoolConfig, RedisStore};
use docflow::outbound::sampler::SysinfoSampler;
use docflow::pool::{CommandLauncher, ProcessPool};
use docflow::ports::{BackingStore, MetricsPort, OcrPort, SystemSamplerPort};
use docflow::queue::JobQueue;
use docflow::retry::{resolve_jitter, JitterKind};
use docflow::status::StatusStore;
use docflow::worker::{Worker, WorkerConfig, WorkerPorts};
use docflow::{shutdown, telemetry};

/// Queue names the fabric dispatches across (`spec.md` §4.D).
const QUEUE_NAMES: [&str; 4] = ["pdf", "ocr", "office", "default"];

/// `docflow-worker` — job-dispatch and worker-execution fabric.
#[derive(Debug, Parser)]
#[command(name = "docflow-worker", version, about)]
struct Cli {
    /// Path to a layered config file (TOML/YAML/JSON, auto-detected by extension).
    #[arg(long, env = "DOCFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Redis URL for the backing store. Falls back to an in-process store
    /// (data lost on restart) when unset, for local development only.
    #[arg(long, env = "DOCFLOW_REDIS_URL")]
    redis_url: Option<String>,

    /// Directory for job input/output files and the temp-file sweeper.
    #[arg(long, env = "DOCFLOW_TEMP_DIR", default_value = "/tmp/docflow")]
    temp_dir: PathBuf,

    /// External binary serving the Office-to-PDF conversion engine.
    #[arg(long, env = "DOCFLOW_CONVERTER_COMMAND", default_value = "docflow-converter")]
    converter_command: String,

    /// External binary serving the classic OCR engine.
    #[arg(long, env = "DOCFLOW_OCR_CLASSIC_COMMAND", default_value = "docflow-ocr-classic")]
    ocr_classic_command: String,

    /// External binary serving the AI vision OCR engine.
    #[arg(long, env = "DOCFLOW_OCR_AI_COMMAND", default_value = "docflow-ocr-ai")]
    ocr_ai_command: String,

    /// External binary serving PDF operations.
    #[arg(long, env = "DOCFLOW_PDF_OPS_COMMAND", default_value = "docflow-pdf-ops")]
    pdf_ops_command: String,

    /// Worker lane concurrency, unless overridden by `queue.concurrency.<name>`.
    #[arg(long, env = "DOCFLOW_WORKER_CONCURRENCY", default_value_t = 4)]
    worker_concurrency: u32,

    /// Maximum jobs held per named queue before `enqueue` is rejected.
    #[arg(long, env = "DOCFLOW_QUEUE_MAX_DEPTH", default_value_t = 10_000)]
    queue_max_depth: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    telemetry::init(telemetry::LogFormat::from_env());

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).wrap_err("failed to load configuration")?;
    info!(temp_dir = %cli.temp_dir.display(), "starting docflow-worker");

    let store = build_store(cli.redis_url.as_deref()).await?;
    let clock = Arc::new(DefaultClock);

    let queue = Arc::new(JobQueue::new(&QUEUE_NAMES, cli.queue_max_depth));
    let cache = Arc::new(CacheStore::new(Arc::clone(&store), Arc::clone(&clock), config.cache.default_ttl()));
    let status = Arc::new(StatusStore::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        Duration::from_secs(24 * 60 * 60),
        Duration::from_secs(7 * 24 * 60 * 60),
    ));
    let dlq = Arc::new(DlqStore::new(Arc::clone(&store), Arc::clone(&clock)));
    let metrics: Arc<dyn MetricsPort> = Arc::new(docflow::outbound::metrics::FacadeMetrics);
    let files = Arc::new(FileLayout::new(cli.temp_dir.clone()));
    let registry = Arc::new(WorkerRegistry::new());

    let launcher = Arc::new(CommandLauncher::new(cli.converter_command.clone()));
    let conversion_port = Arc::new(CommandConversionPort::new(cli.converter_command.clone()));
    let pool_config = config.pool.to_pool_config();
    let pool = ProcessPool::start(pool_config, launcher, conversion_port, Arc::clone(&clock))
        .await
        .wrap_err("failed to start the warm process pool")?;

    let ocr_classic: Arc<dyn OcrPort> = Arc::new(CommandOcrPort::new(cli.ocr_classic_command.clone(), "classic"));
    let ocr_ai: Arc<dyn OcrPort> = Arc::new(CommandOcrPort::new(cli.ocr_ai_command.clone(), "ai_vision"));
    let pdf_ops = Arc::new(CommandPdfOpsPort::new(cli.pdf_ops_command.clone()));

    let retry_policy = config.queue.to_retry_policy().wrap_err("invalid retry policy configuration")?;
    let jitter = resolve_jitter(JitterKind::PseudoRandom);

    let worker_name = "worker-1".to_owned();
    let concurrency = config.queue.concurrency.get(&worker_name).copied().unwrap_or(cli.worker_concurrency);
    let weights: Vec<(String, u32)> = QUEUE_NAMES
        .iter()
        .map(|name| ((*name).to_owned(), config.queue.weights.get(*name).copied().unwrap_or(1)))
        .collect();

    let worker = Arc::new(Worker::new(
        WorkerConfig { name: worker_name, concurrency, drain_timeout: Duration::from_secs(30) },
        Arc::clone(&queue),
        weights,
        WorkerPorts { pool: Some(Arc::new(pool)), ocr_classic: Some(ocr_classic), ocr_ai: Some(ocr_ai), pdf_ops: Some(pdf_ops) },
        Arc::clone(&cache),
        Arc::clone(&status),
        Arc::clone(&dlq),
        Arc::clone(&metrics),
        retry_policy,
        jitter,
        Arc::clone(&clock),
        Some(Arc::clone(&files)),
        Some(Arc::clone(&registry)),
    ));

    let sampler: Arc<dyn SystemSamplerPort> = Arc::new(SysinfoSampler::new(cli.temp_dir.clone()));
    let hooks = protection_hooks(Arc::clone(&metrics));
    let monitor = Arc::new(HealthMonitor::new(
        config.monitor.to_thresholds(),
        config.monitor.to_intervals(),
        sampler,
        Arc::clone(&store),
        Arc::clone(&queue),
        QUEUE_NAMES.iter().map(|name| (*name).to_owned()).collect(),
        Arc::clone(&registry),
        Arc::clone(&clock),
        hooks,
    ));

    let worker_handles = worker.spawn();
    let monitor_handles = monitor.spawn();
    let sweeper_handle =
        (*files).clone().spawn_sweeper(Duration::from_secs(60 * 60), Duration::from_secs(24 * 60 * 60));
    let dlq_sweeper_handle = spawn_dlq_sweeper(Arc::clone(&dlq), config.dlq.retention());

    let signal = shutdown::wait_for_shutdown_signal().await.wrap_err("failed to await shutdown signal")?;
    info!(signal, "shutdown signal received, draining workers");

    sweeper_handle.abort();
    dlq_sweeper_handle.abort();
    let outcome = shutdown::shutdown(&[worker], worker_handles, monitor_handles, Duration::from_secs(30)).await;

    std::process::exit(outcome.exit_code());
}

async fn build_store(redis_url: Option<&str>) -> Result<Arc<dyn BackingStore>> {
    match redis_url {
        Some(url) => {
            let store = RedisStore::new(RedisPoolConfig::new(url)).await.wrap_err("failed to connect to redis")?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("no DOCFLOW_REDIS_URL configured, using an in-process store (state is lost on restart)");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn protection_hooks(metrics: Arc<dyn MetricsPort>) -> ProtectionHooks {
    let ram_metrics = Arc::clone(&metrics);
    let disk_metrics = Arc::clone(&metrics);
    let queue_metrics = Arc::clone(&metrics);
    ProtectionHooks {
        on_ram_emergency: Some(Arc::new(move || {
            ram_metrics.record_worker_error("monitor", "ram_emergency");
            warn!("protection mode engaged: RAM at emergency threshold");
        })),
        on_disk_critical: Some(Arc::new(move || {
            disk_metrics.record_worker_error("monitor", "disk_critical");
            warn!("protection mode engaged: disk at critical threshold");
        })),
        on_queue_critical: Some(Arc::new(move || {
            queue_metrics.record_worker_error("monitor", "queue_critical");
            warn!("protection mode engaged: queue depth at critical threshold");
        })),
        on_worker_restart: Some(Arc::new(move |worker: &str| {
            metrics.record_worker_restart(worker, "heartbeat_timeout");
            warn!(worker = %worker, "worker restarted after missed heartbeats");
        })),
    }
}

fn spawn_dlq_sweeper(dlq: Arc<DlqStore>, retention: chrono::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        loop {
            ticker.tick().await;
            match dlq.purge(retention).await {
                Ok(purged) if purged > 0 => info!(purged, "dlq purge removed expired records"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "dlq purge pass failed"),
            }
        }
    })
}
