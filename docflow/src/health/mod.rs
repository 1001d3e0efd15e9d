//! Health monitor and protection mode (`spec.md` §4.G).
//!
//! Purpose: sample CPU/RAM/disk/queue-depth/cache-latency/worker-liveness at
//! staggered intervals, aggregate into a [`HealthSample`], and engage or
//! release protection mode against threshold breaches. Each probe family
//! runs on its own `tokio::time::interval`, matching the corpus's pattern of
//! giving every admission-control concern its own timer rather than one
//! monolithic polling loop.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use mockable::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{BreachLevel, HealthSample, ProtectionReason, ProtectionState, ThresholdTier, WorkerHealth};
use crate::ports::{BackingStore, SystemSamplerPort};
use crate::queue::JobQueue;

/// `spec.md` §4.G default thresholds.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// CPU utilisation (warning 80%, critical 90%, no emergency tier).
    pub cpu: ThresholdTier,
    /// RAM utilisation (warning 75%, critical 85%, emergency 90%).
    pub ram: ThresholdTier,
    /// Disk utilisation (warning 80%, critical 90%, no emergency tier).
    pub disk: ThresholdTier,
    /// Total queue depth (warning 20, critical 50, emergency/max 100).
    pub queue_depth: ThresholdTier,
    /// Cache backing store round-trip latency, in milliseconds.
    pub cache_latency_ms: ThresholdTier,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: ThresholdTier::without_emergency(80.0, 90.0),
            ram: ThresholdTier::with_emergency(75.0, 85.0, 90.0),
            disk: ThresholdTier::without_emergency(80.0, 90.0),
            queue_depth: ThresholdTier::with_emergency(20.0, 50.0, 100.0),
            cache_latency_ms: ThresholdTier::without_emergency(50.0, 200.0),
        }
    }
}

/// Sampling cadence per probe family and protection policy timing
/// (`spec.md` §4.G / §6 `monitor.*`).
#[derive(Debug, Clone, Copy)]
pub struct MonitorIntervals {
    /// Worker liveness probe cadence. Default 10s.
    pub worker: Duration,
    /// CPU/RAM/queue-depth probe cadence. Default 15s.
    pub resource: Duration,
    /// Cache backing store latency probe cadence. Default 1min.
    pub cache_latency: Duration,
    /// Disk probe cadence. Default 5min.
    pub disk: Duration,
    /// State aggregation cadence. Default 30s.
    pub aggregate: Duration,
    /// Protection engage/release reassessment cadence. Default 2min.
    pub protection_reassess: Duration,
    /// How long a worker may go without a heartbeat before it is marked failed.
    pub worker_heartbeat_timeout: Duration,
    /// Minimum time between restart attempts for the same worker.
    pub restart_cooldown: chrono::Duration,
    /// Minimum time protection mode must stay active before it can release.
    pub protection_min_duration: chrono::Duration,
}

impl Default for MonitorIntervals {
    fn default() -> Self {
        Self {
            worker: Duration::from_secs(10),
            resource: Duration::from_secs(15),
            cache_latency: Duration::from_secs(60),
            disk: Duration::from_secs(5 * 60),
            aggregate: Duration::from_secs(30),
            protection_reassess: Duration::from_secs(2 * 60),
            worker_heartbeat_timeout: Duration::from_secs(30),
            restart_cooldown: chrono::Duration::minutes(2),
            protection_min_duration: chrono::Duration::minutes(2),
        }
    }
}

/// An append-only incident record (`spec.md` §4.G).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Short machine-readable category, e.g. `"protection_engaged"`.
    pub kind: String,
    /// Coarse severity for display purposes.
    pub severity: String,
    /// Human-readable summary.
    pub message: String,
    /// Structured detail, free-form.
    pub details: serde_json::Value,
    /// When the incident was recorded.
    pub timestamp: DateTime<Utc>,
}

const INCIDENT_LOG_KEY: &str = "health:incidents";

struct WorkerTracking {
    last_heartbeat: DateTime<Utc>,
    status: WorkerHealth,
    last_restart_attempt: Option<DateTime<Utc>>,
}

/// Per-worker liveness tracking, updated by heartbeats from [`crate::worker::Worker`]
/// run loops and consulted by the health monitor's worker probe.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: Mutex<BTreeMap<String, WorkerTracking>>,
}

impl WorkerRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `worker` is alive as of `now`. Called once per pull
    /// attempt from the worker's run loop.
    pub fn heartbeat(&self, worker: &str, now: DateTime<Utc>) {
        let mut workers = self.workers.lock();
        workers
            .entry(worker.to_owned())
            .and_modify(|t| {
                t.last_heartbeat = now;
                t.status = WorkerHealth::Healthy;
            })
            .or_insert(WorkerTracking {
                last_heartbeat: now,
                status: WorkerHealth::Healthy,
                last_restart_attempt: None,
            });
    }

    /// Snapshot every tracked worker's current status.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, WorkerHealth> {
        self.workers.lock().iter().map(|(name, t)| (name.clone(), t.status)).collect()
    }
}

/// Host resources, queue depth, and worker liveness sampled for the
/// protection-mode decision (`spec.md` §4.G).
struct Signals {
    cpu_pct: f64,
    ram_pct: f64,
    disk_pct: f64,
    queue_depth: u64,
    cache_latency_ms: f64,
    worker_status: BTreeMap<String, WorkerHealth>,
}

/// Side-effect hooks invoked once per protection-activation edge, per
/// reason family (`spec.md` §4.G "one-shot side-effect per reason family").
/// The monitor stays decoupled from the concrete cleanup action; the binary
/// wires these to whatever remediation makes sense for its deployment.
#[derive(Default, Clone)]
pub struct ProtectionHooks {
    /// Invoked once when RAM crosses its emergency threshold.
    pub on_ram_emergency: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Invoked once when disk crosses its critical threshold.
    pub on_disk_critical: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Invoked once when queue depth crosses its critical threshold.
    pub on_queue_critical: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Invoked once per worker restart attempt, with the worker's name.
    pub on_worker_restart: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

/// The health monitor and protection-mode supervisor.
pub struct HealthMonitor {
    thresholds: Thresholds,
    intervals: MonitorIntervals,
    sampler: Arc<dyn SystemSamplerPort>,
    store: Arc<dyn BackingStore>,
    queue: Arc<JobQueue>,
    queue_names: Vec<String>,
    registry: Arc<WorkerRegistry>,
    clock: Arc<dyn Clock>,
    hooks: ProtectionHooks,

    protection_active: AtomicBool,
    protection_meta: Mutex<(DateTime<Utc>, Option<ProtectionReason>)>,
    latest_sample: Mutex<Option<HealthSample>>,
    latest_cache_latency_ms: Mutex<f64>,
}

impl HealthMonitor {
    /// Build a monitor over the given collaborators, starting in the
    /// inactive protection state.
    #[must_use]
    pub fn new(
        thresholds: Thresholds,
        intervals: MonitorIntervals,
        sampler: Arc<dyn SystemSamplerPort>,
        store: Arc<dyn BackingStore>,
        queue: Arc<JobQueue>,
        queue_names: Vec<String>,
        registry: Arc<WorkerRegistry>,
        clock: Arc<dyn Clock>,
        hooks: ProtectionHooks,
    ) -> Self {
        let now = clock.utc();
        Self {
            thresholds,
            intervals,
            sampler,
            store,
            queue,
            queue_names,
            registry,
            clock,
            hooks,
            protection_active: AtomicBool::new(false),
            protection_meta: Mutex::new((now, None)),
            latest_sample: Mutex::new(None),
            latest_cache_latency_ms: Mutex::new(0.0),
        }
    }

    /// Current protection-mode snapshot. `active` is read from a single
    /// atomic so callers never observe a torn value (`spec.md` §3 invariant).
    #[must_use]
    pub fn protection_state(&self) -> ProtectionState {
        let active = self.protection_active.load(Ordering::SeqCst);
        let (since, reason) = *self.protection_meta.lock();
        ProtectionState { active, since, reason: if active { reason } else { None } }
    }

    /// Most recently aggregated health sample, if at least one aggregation
    /// pass has run.
    #[must_use]
    pub fn current_sample(&self) -> Option<HealthSample> {
        self.latest_sample.lock().clone()
    }

    fn total_queue_depth(&self) -> u64 {
        self.queue_names.iter().map(|name| self.queue.depth(name) as u64).sum()
    }

    async fn record_incident(&self, kind: &str, severity: &str, message: impl Into<String>, details: serde_json::Value) {
        let message = message.into();
        info!(target: "docflow::incidents", kind, severity, %message, "health incident");
        let incident = Incident {
            kind: kind.to_owned(),
            severity: severity.to_owned(),
            message,
            details,
            timestamp: self.clock.utc(),
        };
        if let Ok(encoded) = serde_json::to_vec(&incident) {
            if let Err(err) = self.store.list_append(INCIDENT_LOG_KEY, encoded).await {
                warn!(error = %err, "failed to append incident to the backing store log");
            }
        }
    }

    async fn probe_worker_liveness(&self) {
        let now = self.clock.utc();
        let timed_out: Vec<String> = {
            let mut workers = self.registry.workers.lock();
            let mut newly_failed = Vec::new();
            for (name, tracking) in workers.iter_mut() {
                let silent_for = now - tracking.last_heartbeat;
                let timed_out = silent_for > chrono::Duration::from_std(self.intervals.worker_heartbeat_timeout).unwrap_or_default();
                match (tracking.status, timed_out) {
                    (WorkerHealth::Healthy, true) => {
                        tracking.status = WorkerHealth::Failed;
                        newly_failed.push(name.clone());
                    }
                    (WorkerHealth::Failed, false) => {
                        tracking.status = WorkerHealth::Healthy;
                        newly_failed.push(format!("recovered:{name}"));
                    }
                    _ => {}
                }
            }
            newly_failed
        };

        for entry in timed_out {
            if let Some(worker) = entry.strip_prefix("recovered:") {
                self.record_incident(
                    "worker_recovered",
                    "info",
                    format!("worker {worker} is healthy again"),
                    serde_json::json!({ "worker": worker }),
                )
                .await;
                continue;
            }
            self.record_incident(
                "worker_failed",
                "critical",
                format!("worker {entry} missed its heartbeat deadline"),
                serde_json::json!({ "worker": entry }),
            )
            .await;
            self.maybe_restart_worker(&entry, now).await;
        }
    }

    async fn maybe_restart_worker(&self, worker: &str, now: DateTime<Utc>) {
        let should_restart = {
            let mut workers = self.registry.workers.lock();
            let Some(tracking) = workers.get_mut(worker) else { return };
            let eligible = tracking
                .last_restart_attempt
                .map_or(true, |last| now - last >= self.intervals.restart_cooldown);
            if eligible {
                tracking.last_restart_attempt = Some(now);
            }
            eligible
        };
        if !should_restart {
            return;
        }
        self.record_incident(
            "worker_restart_attempt",
            "warning",
            format!("attempting restart of worker {worker}"),
            serde_json::json!({ "worker": worker }),
        )
        .await;
        if let Some(hook) = &self.hooks.on_worker_restart {
            hook(worker);
        }
    }

    async fn probe_cache_latency(&self) {
        let started = Instant::now();
        let _ = self.store.get("health:canary").await;
        #[allow(clippy::cast_precision_loss)]
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        *self.latest_cache_latency_ms.lock() = elapsed_ms;
    }

    async fn sample_signals(&self) -> Signals {
        let cpu_pct = self.sampler.cpu_pct().await.unwrap_or(0.0);
        let ram_pct = self.sampler.ram_pct().await.unwrap_or(0.0);
        let disk_pct = self.sampler.disk_pct().await.unwrap_or(0.0);
        Signals {
            cpu_pct,
            ram_pct,
            disk_pct,
            queue_depth: self.total_queue_depth(),
            cache_latency_ms: *self.latest_cache_latency_ms.lock(),
            worker_status: self.registry.snapshot(),
        }
    }

    async fn aggregate(&self) {
        let signals = self.sample_signals().await;
        let sample = HealthSample {
            cpu_pct: signals.cpu_pct,
            ram_pct: signals.ram_pct,
            disk_pct: signals.disk_pct,
            queue_depth: signals.queue_depth,
            worker_status: signals.worker_status,
            last_sampled: self.clock.utc(),
        };
        *self.latest_sample.lock() = Some(sample);
    }

    #[allow(clippy::cast_precision_loss)]
    async fn reassess_protection(&self) {
        let signals = self.sample_signals().await;
        let cpu = self.thresholds.cpu.classify(signals.cpu_pct);
        let ram = self.thresholds.ram.classify(signals.ram_pct);
        let disk = self.thresholds.disk.classify(signals.disk_pct);
        let queue = self.thresholds.queue_depth.classify(signals.queue_depth as f64);
        let cache = self.thresholds.cache_latency_ms.classify(signals.cache_latency_ms);
        let any_worker_failed = signals.worker_status.values().any(|s| *s == WorkerHealth::Failed);

        let now = self.clock.utc();
        let currently_active = self.protection_active.load(Ordering::SeqCst);

        if !currently_active {
            let reason = if ram == BreachLevel::Emergency || ram == BreachLevel::Critical {
                Some(ProtectionReason::RamCritical)
            } else if cpu == BreachLevel::Critical {
                Some(ProtectionReason::CpuCritical)
            } else if disk == BreachLevel::Critical {
                Some(ProtectionReason::DiskCritical)
            } else if queue == BreachLevel::Critical || queue == BreachLevel::Emergency {
                Some(ProtectionReason::QueueCritical)
            } else if cache == BreachLevel::Critical {
                Some(ProtectionReason::CacheLatencyCritical)
            } else if any_worker_failed {
                Some(ProtectionReason::WorkerFailed)
            } else {
                None
            };

            if let Some(reason) = reason {
                self.protection_active.store(true, Ordering::SeqCst);
                self.queue.set_protection_active(true);
                *self.protection_meta.lock() = (now, Some(reason));
                self.record_incident(
                    "protection_engaged",
                    "critical",
                    format!("protection mode engaged: {reason:?}"),
                    serde_json::json!({ "reason": format!("{reason:?}") }),
                )
                .await;
                self.run_activation_side_effect(reason, ram, disk, queue).await;
            }
            return;
        }

        let (since, _) = *self.protection_meta.lock();
        let long_enough = now - since >= self.intervals.protection_min_duration;
        let all_nominal = cpu == BreachLevel::Nominal
            && ram == BreachLevel::Nominal
            && disk == BreachLevel::Nominal
            && queue == BreachLevel::Nominal
            && cache == BreachLevel::Nominal
            && !any_worker_failed;

        if long_enough && all_nominal {
            self.protection_active.store(false, Ordering::SeqCst);
            self.queue.set_protection_active(false);
            *self.protection_meta.lock() = (now, None);
            self.record_incident("protection_released", "info", "protection mode released", serde_json::Value::Null)
                .await;
        }
    }

    async fn run_activation_side_effect(&self, reason: ProtectionReason, ram: BreachLevel, disk: BreachLevel, queue: BreachLevel) {
        match reason {
            ProtectionReason::RamCritical if ram == BreachLevel::Emergency => {
                if let Some(hook) = &self.hooks.on_ram_emergency {
                    hook();
                }
            }
            ProtectionReason::DiskCritical if disk == BreachLevel::Critical => {
                if let Some(hook) = &self.hooks.on_disk_critical {
                    hook();
                }
            }
            ProtectionReason::QueueCritical if matches!(queue, BreachLevel::Critical | BreachLevel::Emergency) => {
                if let Some(hook) = &self.hooks.on_queue_critical {
                    hook();
                }
            }
            _ => {}
        }
    }

    /// Spawn one `tokio::time::interval`-driven task per probe family. The
    /// returned handles are owned by the caller (typically the binary's
    /// shutdown coordinator).
    #[must_use]
    pub fn spawn(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            spawn_ticking(Arc::clone(self), self.intervals.worker, |m| async move { m.probe_worker_liveness().await }),
            spawn_ticking(Arc::clone(self), self.intervals.cache_latency, |m| async move { m.probe_cache_latency().await }),
            spawn_ticking(Arc::clone(self), self.intervals.aggregate, |m| async move { m.aggregate().await }),
            spawn_ticking(Arc::clone(self), self.intervals.protection_reassess, |m| async move {
                m.reassess_protection().await
            }),
        ]
    }
}

fn spawn_ticking<F, Fut>(monitor: Arc<HealthMonitor>, interval: Duration, mut probe: F) -> tokio::task::JoinHandle<()>
where
    F: FnMut(Arc<HealthMonitor>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            probe(Arc::clone(&monitor)).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::memory::MemoryStore;
    use async_trait::async_trait;
    use mockable::DefaultClock;

    struct FixedSampler {
        cpu: f64,
        ram: f64,
        disk: f64,
    }

    #[async_trait]
    impl SystemSamplerPort for FixedSampler {
        async fn cpu_pct(&self) -> Result<f64, crate::ports::SamplerError> {
            Ok(self.cpu)
        }
        async fn ram_pct(&self) -> Result<f64, crate::ports::SamplerError> {
            Ok(self.ram)
        }
        async fn disk_pct(&self) -> Result<f64, crate::ports::SamplerError> {
            Ok(self.disk)
        }
    }

    fn monitor(sampler: FixedSampler) -> HealthMonitor {
        let store: Arc<dyn BackingStore> = Arc::new(MemoryStore::new());
        let queue = Arc::new(JobQueue::new(&["pdf"], 1000));
        HealthMonitor::new(
            Thresholds::default(),
            MonitorIntervals::default(),
            Arc::new(sampler),
            store,
            queue,
            vec!["pdf".to_owned()],
            Arc::new(WorkerRegistry::new()),
            Arc::new(DefaultClock),
            ProtectionHooks::default(),
        )
    }

    #[tokio::test]
    async fn cpu_critical_engages_protection() {
        let m = monitor(FixedSampler { cpu: 95.0, ram: 10.0, disk: 10.0 });
        m.reassess_protection().await;
        let state = m.protection_state();
        assert!(state.active);
        assert_eq!(state.reason, Some(ProtectionReason::CpuCritical));
    }

    #[tokio::test]
    async fn nominal_signals_never_engage_protection() {
        let m = monitor(FixedSampler { cpu: 10.0, ram: 10.0, disk: 10.0 });
        m.reassess_protection().await;
        assert!(!m.protection_state().active);
    }

    #[tokio::test]
    async fn protection_does_not_release_before_minimum_duration() {
        let m = monitor(FixedSampler { cpu: 95.0, ram: 10.0, disk: 10.0 });
        m.reassess_protection().await;
        assert!(m.protection_state().active);

        // Signals drop to nominal immediately, but `since` is `now` so the
        // 2-minute minimum has not elapsed yet.
        let calm = monitor(FixedSampler { cpu: 10.0, ram: 10.0, disk: 10.0 });
        *calm.protection_active.get_mut() = true;
        *calm.protection_meta.lock() = (calm.clock.utc(), Some(ProtectionReason::CpuCritical));
        calm.reassess_protection().await;
        assert!(calm.protection_state().active, "must not release before the minimum duration elapses");
    }

    #[tokio::test]
    async fn worker_registry_marks_silent_worker_as_failed() {
        let registry = Arc::new(WorkerRegistry::new());
        registry.heartbeat("ocr-1", Utc::now() - chrono::Duration::seconds(60));
        let m = monitor(FixedSampler { cpu: 10.0, ram: 10.0, disk: 10.0 });
        let m = HealthMonitor { registry, ..m };
        m.probe_worker_liveness().await;
        assert_eq!(m.registry.snapshot().get("ocr-1"), Some(&WorkerHealth::Failed));
    }
}
