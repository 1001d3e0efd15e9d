//! Layered configuration loading (`spec.md` §6 recognised keys).
//!
//! Purpose: load `pool.*`, `queue.*`, `cache.*`, `monitor.*`, `protection.*`,
//! `plan.priority.*`, and `dlq.retention` from defaults, an optional config
//! file, and the environment, in that precedence order. The fabric has no
//! HTTP surface of its own, so it reaches for the lighter-weight `config`
//! crate rather than the corpus's richer config-discovery machinery.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::health::{MonitorIntervals, Thresholds};
use crate::pool::PoolConfig;

/// Environment variable prefix for configuration overrides, e.g.
/// `DOCFLOW_POOL__SIZE=5`.
pub const ENV_PREFIX: &str = "DOCFLOW";

/// Errors surfaced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The `config` crate failed to merge sources or deserialize the result.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// `pool.*` — warm process pool tuning (`spec.md` §4.E).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of warm processes to maintain.
    pub size: u32,
    /// Time allowed for a freshly spawned process to pass its readiness probe.
    pub start_timeout_secs: u64,
    /// Time allowed for a single conversion call.
    pub conversion_timeout_secs: u64,
    /// Maximum process age, in seconds, before a forced restart.
    pub process_ttl_secs: i64,
    /// Maximum conversions before a forced restart.
    pub max_conversions: u32,
    /// Idle duration, in seconds, after which an available process is retired.
    pub idle_retire_secs: i64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        let defaults = PoolConfig::default();
        Self {
            size: defaults.size,
            start_timeout_secs: defaults.start_timeout.as_secs(),
            conversion_timeout_secs: defaults.conversion_timeout.as_secs(),
            process_ttl_secs: defaults.process_ttl.num_seconds(),
            max_conversions: defaults.max_conversions,
            idle_retire_secs: defaults.idle_retire.num_seconds(),
        }
    }
}

impl PoolSettings {
    /// Build the runtime [`PoolConfig`] this settings block describes,
    /// keeping the endpoint prefix the pool's own default.
    #[must_use]
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            size: self.size,
            start_timeout: Duration::from_secs(self.start_timeout_secs),
            conversion_timeout: Duration::from_secs(self.conversion_timeout_secs),
            process_ttl: chrono::Duration::seconds(self.process_ttl_secs),
            max_conversions: self.max_conversions,
            idle_retire: chrono::Duration::seconds(self.idle_retire_secs),
            ..PoolConfig::default()
        }
    }
}

/// `queue.*` — retry backoff, per-queue weights, per-worker concurrency
/// (`spec.md` §4.B, §4.D, §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Maximum retry attempts before a job is parked in the DLQ.
    pub max_retries: u32,
    /// First retry delay, in seconds.
    pub initial_delay_secs: u64,
    /// Retry delay cap, in seconds.
    pub max_delay_secs: u64,
    /// Exponential backoff multiplier.
    pub multiplier: f64,
    /// Fraction of the computed delay randomised as jitter.
    pub jitter_fraction: f64,
    /// Deficit-round-robin weight per queue name.
    pub weights: HashMap<String, u32>,
    /// Concurrency (lane count) per worker name.
    pub concurrency: HashMap<String, u32>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        let defaults = docflow_backoff::RetryPolicy::defaults();
        Self {
            max_retries: defaults.max_attempts(),
            initial_delay_secs: 30,
            max_delay_secs: 60 * 60,
            multiplier: 2.0,
            jitter_fraction: 0.2,
            weights: HashMap::new(),
            concurrency: HashMap::new(),
        }
    }
}

impl QueueSettings {
    /// Build the shared [`docflow_backoff::RetryPolicy`] these settings
    /// describe. `max_attempts` is overridden per job kind by the worker
    /// runtime, so the value here is only the fallback.
    pub fn to_retry_policy(&self) -> Result<docflow_backoff::RetryPolicy, docflow_backoff::RetryPolicyError> {
        docflow_backoff::RetryPolicy::new(
            Duration::from_secs(self.initial_delay_secs),
            self.multiplier,
            Duration::from_secs(self.max_delay_secs),
            self.jitter_fraction,
            self.max_retries,
        )
    }
}

/// `cache.*` — result cache tuning (`spec.md` §4.A).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Default entry TTL, in seconds.
    pub default_ttl_secs: u64,
    /// Maximum size, in bytes, of a single cached artifact.
    pub max_entry_bytes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 24 * 60 * 60,
            max_entry_bytes: crate::domain::MAX_CACHE_ENTRY_SIZE,
        }
    }
}

impl CacheSettings {
    /// Default TTL as a [`Duration`], for [`crate::cache::CacheStore::new`].
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// `monitor.*` — health monitor thresholds and sampling cadence (`spec.md` §4.G).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// CPU threshold tiers (warning/critical).
    pub cpu: ThresholdSettings,
    /// RAM threshold tiers (warning/critical/emergency).
    pub ram: ThresholdSettings,
    /// Disk threshold tiers (warning/critical).
    pub disk: ThresholdSettings,
    /// Total queue-depth threshold tiers (warning/critical/emergency).
    pub queue_depth: ThresholdSettings,
    /// Cache backing-store latency threshold tiers, in milliseconds.
    pub cache_latency_ms: ThresholdSettings,
    /// Sampling interval overrides, in seconds.
    pub intervals: IntervalSettings,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        let thresholds = Thresholds::default();
        Self {
            cpu: ThresholdSettings::from(thresholds.cpu),
            ram: ThresholdSettings::from(thresholds.ram),
            disk: ThresholdSettings::from(thresholds.disk),
            queue_depth: ThresholdSettings::from(thresholds.queue_depth),
            cache_latency_ms: ThresholdSettings::from(thresholds.cache_latency_ms),
            intervals: IntervalSettings::default(),
        }
    }
}

impl MonitorSettings {
    /// Build the runtime [`Thresholds`] this settings block describes.
    #[must_use]
    pub fn to_thresholds(&self) -> Thresholds {
        Thresholds {
            cpu: self.cpu.to_tier(),
            ram: self.ram.to_tier(),
            disk: self.disk.to_tier(),
            queue_depth: self.queue_depth.to_tier(),
            cache_latency_ms: self.cache_latency_ms.to_tier(),
        }
    }

    /// Build the runtime [`MonitorIntervals`] this settings block describes.
    #[must_use]
    pub fn to_intervals(&self) -> MonitorIntervals {
        self.intervals.to_monitor_intervals()
    }
}

/// A single resource's warning/critical/emergency thresholds, as config.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ThresholdSettings {
    /// Warning-level threshold.
    pub warning: f64,
    /// Critical-level threshold.
    pub critical: f64,
    /// Emergency-level threshold, where defined.
    pub emergency: Option<f64>,
}

impl From<crate::domain::ThresholdTier> for ThresholdSettings {
    fn from(tier: crate::domain::ThresholdTier) -> Self {
        Self {
            warning: tier.warning,
            critical: tier.critical,
            emergency: tier.emergency,
        }
    }
}

impl ThresholdSettings {
    fn to_tier(self) -> crate::domain::ThresholdTier {
        crate::domain::ThresholdTier {
            warning: self.warning,
            critical: self.critical,
            emergency: self.emergency,
        }
    }
}

/// `monitor.intervals.*` — probe cadence and protection policy timing, in seconds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct IntervalSettings {
    /// Worker liveness probe cadence.
    pub worker_secs: u64,
    /// CPU/RAM/queue-depth probe cadence.
    pub resource_secs: u64,
    /// Cache backing-store latency probe cadence.
    pub cache_latency_secs: u64,
    /// Disk probe cadence.
    pub disk_secs: u64,
    /// State aggregation cadence.
    pub aggregate_secs: u64,
    /// Protection engage/release reassessment cadence.
    pub protection_reassess_secs: u64,
    /// How long a worker may go without a heartbeat before it is marked failed.
    pub worker_heartbeat_timeout_secs: i64,
    /// Minimum time between restart attempts for the same worker.
    pub restart_cooldown_secs: i64,
}

impl Default for IntervalSettings {
    fn default() -> Self {
        let defaults = MonitorIntervals::default();
        Self {
            worker_secs: defaults.worker.as_secs(),
            resource_secs: defaults.resource.as_secs(),
            cache_latency_secs: defaults.cache_latency.as_secs(),
            disk_secs: defaults.disk.as_secs(),
            aggregate_secs: defaults.aggregate.as_secs(),
            protection_reassess_secs: defaults.protection_reassess.as_secs(),
            worker_heartbeat_timeout_secs: defaults.worker_heartbeat_timeout.as_secs().try_into().unwrap_or(30),
            restart_cooldown_secs: defaults.restart_cooldown.num_seconds(),
        }
    }
}

impl IntervalSettings {
    fn to_monitor_intervals(self) -> MonitorIntervals {
        let protection_min_duration = MonitorIntervals::default().protection_min_duration;
        MonitorIntervals {
            worker: Duration::from_secs(self.worker_secs),
            resource: Duration::from_secs(self.resource_secs),
            cache_latency: Duration::from_secs(self.cache_latency_secs),
            disk: Duration::from_secs(self.disk_secs),
            aggregate: Duration::from_secs(self.aggregate_secs),
            protection_reassess: Duration::from_secs(self.protection_reassess_secs),
            worker_heartbeat_timeout: Duration::from_secs(self.worker_heartbeat_timeout_secs.max(0) as u64),
            restart_cooldown: chrono::Duration::seconds(self.restart_cooldown_secs),
            protection_min_duration,
        }
    }
}

/// `protection.*` — protection-mode policy timing (`spec.md` §4.G).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtectionSettings {
    /// Minimum time protection mode must stay active before it can release.
    pub min_duration_secs: i64,
}

impl Default for ProtectionSettings {
    fn default() -> Self {
        Self {
            min_duration_secs: MonitorIntervals::default().protection_min_duration.num_seconds(),
        }
    }
}

/// `plan.priority.*` — subscription-tier dispatch priority (`spec.md` §4.D).
///
/// `Plan::priority` already encodes the spec's fixed `pro=1, premium=5,
/// corporate=10, free=10` mapping at compile time; this block exists so the
/// mapping is visible and overridable in configuration, per the recognised
/// key list in `spec.md` §6. See `DESIGN.md` for the decision to keep
/// `Plan::priority` authoritative for dispatch ordering until an operator
/// actually needs to retune it without a rebuild.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlanPrioritySettings {
    /// Priority for the `pro` plan. Lower dispatches earlier.
    pub pro: u8,
    /// Priority for the `premium` plan.
    pub premium: u8,
    /// Priority for the `corporate` plan.
    pub corporate: u8,
    /// Priority for the `free` plan.
    pub free: u8,
}

impl Default for PlanPrioritySettings {
    fn default() -> Self {
        Self {
            pro: crate::domain::Plan::Pro.priority(),
            premium: crate::domain::Plan::Premium.priority(),
            corporate: crate::domain::Plan::Corporate.priority(),
            free: crate::domain::Plan::Free.priority(),
        }
    }
}

/// `dlq.*` — dead-letter retention policy (`spec.md` §4.C).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DlqSettings {
    /// Minimum age, in days, before a parked record becomes purge-eligible.
    pub retention_days: i64,
}

impl Default for DlqSettings {
    fn default() -> Self {
        Self {
            retention_days: crate::domain::MIN_RETENTION_DAYS,
        }
    }
}

impl DlqSettings {
    /// Retention as a [`chrono::Duration`], clamped to the spec's minimum,
    /// for [`crate::dlq::DlqStore::purge`].
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days.max(crate::domain::MIN_RETENTION_DAYS))
    }
}

/// The fully merged, application-wide configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `pool.*`
    pub pool: PoolSettings,
    /// `queue.*`
    pub queue: QueueSettings,
    /// `cache.*`
    pub cache: CacheSettings,
    /// `monitor.*`
    pub monitor: MonitorSettings,
    /// `protection.*`
    pub protection: ProtectionSettings,
    /// `plan.priority.*`
    pub plan_priority: PlanPrioritySettings,
    /// `dlq.*`
    pub dlq: DlqSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            queue: QueueSettings::default(),
            cache: CacheSettings::default(),
            monitor: MonitorSettings::default(),
            protection: ProtectionSettings::default(),
            plan_priority: PlanPrioritySettings::default(),
            dlq: DlqSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration layered defaults → optional file at `path` →
    /// environment (`DOCFLOW_` prefix, `__` as the nesting separator, e.g.
    /// `DOCFLOW_POOL__SIZE=5`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = AppConfig::default();
        let mut builder = Config::builder()
            .set_default("pool.size", i64::from(defaults.pool.size))?
            .set_default("pool.start_timeout_secs", as_i64(defaults.pool.start_timeout_secs))?
            .set_default("pool.conversion_timeout_secs", as_i64(defaults.pool.conversion_timeout_secs))?
            .set_default("pool.process_ttl_secs", defaults.pool.process_ttl_secs)?
            .set_default("pool.max_conversions", i64::from(defaults.pool.max_conversions))?
            .set_default("pool.idle_retire_secs", defaults.pool.idle_retire_secs)?
            .set_default("queue.max_retries", i64::from(defaults.queue.max_retries))?
            .set_default("queue.initial_delay_secs", as_i64(defaults.queue.initial_delay_secs))?
            .set_default("queue.max_delay_secs", as_i64(defaults.queue.max_delay_secs))?
            .set_default("queue.multiplier", defaults.queue.multiplier)?
            .set_default("queue.jitter_fraction", defaults.queue.jitter_fraction)?
            .set_default("cache.default_ttl_secs", as_i64(defaults.cache.default_ttl_secs))?
            .set_default("cache.max_entry_bytes", as_i64(defaults.cache.max_entry_bytes))?
            .set_default("protection.min_duration_secs", defaults.protection.min_duration_secs)?
            .set_default("plan_priority.pro", i64::from(defaults.plan_priority.pro))?
            .set_default("plan_priority.premium", i64::from(defaults.plan_priority.premium))?
            .set_default("plan_priority.corporate", i64::from(defaults.plan_priority.corporate))?
            .set_default("plan_priority.free", i64::from(defaults.plan_priority.free))?
            .set_default("dlq.retention_days", defaults.dlq.retention_days)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true));

        let merged = builder.build()?;
        Ok(merged.try_deserialize()?)
    }
}

fn as_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_runtime_structs_they_mirror() {
        let config = AppConfig::default();
        assert_eq!(config.pool.size, PoolConfig::default().size);
        assert_eq!(config.dlq.retention_days, crate::domain::MIN_RETENTION_DAYS);
    }

    #[test]
    fn load_with_no_file_falls_back_to_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.pool.size, 3);
        assert_eq!(config.queue.max_retries, docflow_backoff::RetryPolicy::defaults().max_attempts());
    }

    #[test]
    fn env_override_takes_precedence_over_defaults() {
        // SAFETY: test runs single-threaded within this process's test harness
        // and restores the variable before returning.
        unsafe {
            std::env::set_var("DOCFLOW_POOL__SIZE", "7");
        }
        let config = AppConfig::load(None).unwrap();
        unsafe {
            std::env::remove_var("DOCFLOW_POOL__SIZE");
        }
        assert_eq!(config.pool.size, 7);
    }
}
