//! Warm process pool domain types (`spec.md` §3, §4.E).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single pooled process.
///
/// State machine: `starting -> healthy -> (unhealthy -> restarting -> healthy) -> retired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Process has been spawned but has not yet passed its readiness probe.
    Starting,
    /// Process is healthy and available for conversions.
    Healthy,
    /// Process failed a health check or a conversion; pending restart.
    Unhealthy,
    /// Process is being restarted in place.
    Restarting,
    /// Process has been torn down and will not be reused.
    Retired,
}

/// A single warm converter process (`spec.md` §3).
///
/// ## Invariants
/// - `conversions_done <= MaxConversionsPerProcess`, unless `status = Restarting`.
/// - `now - started_at <= ProcessTTL`, unless `status = Restarting`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PooledProcess {
    /// Stable index into the pool's process table.
    pub handle: u32,
    /// Opaque endpoint handed to the conversion port.
    pub endpoint: String,
    /// When this process (in its current incarnation) was started.
    pub started_at: DateTime<Utc>,
    /// When this process last completed a conversion.
    pub last_used: DateTime<Utc>,
    /// Conversions completed since the last restart.
    pub conversions_done: u32,
    /// Current lifecycle state.
    pub status: ProcessStatus,
}

impl PooledProcess {
    /// Construct a freshly started process.
    #[must_use]
    pub fn starting(handle: u32, endpoint: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            handle,
            endpoint: endpoint.into(),
            started_at: now,
            last_used: now,
            conversions_done: 0,
            status: ProcessStatus::Starting,
        }
    }

    /// Whether this process must be retired given the configured limits.
    #[must_use]
    pub fn must_retire(
        &self,
        now: DateTime<Utc>,
        process_ttl: chrono::Duration,
        max_conversions: u32,
    ) -> bool {
        if self.status == ProcessStatus::Restarting {
            return false;
        }
        self.conversions_done > max_conversions || now - self.started_at > process_ttl
    }

    /// Reset bookkeeping as part of an in-place restart, preserving `endpoint`.
    pub fn mark_restarted(&mut self, now: DateTime<Utc>) {
        self.started_at = now;
        self.last_used = now;
        self.conversions_done = 0;
        self.status = ProcessStatus::Healthy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn exactly_at_max_conversions_is_not_retired() {
        let mut p = PooledProcess::starting(0, "ep", Utc::now());
        p.status = ProcessStatus::Healthy;
        p.conversions_done = 100;
        assert!(!p.must_retire(Utc::now(), chrono::Duration::minutes(30), 100));
    }

    #[rstest]
    fn one_past_max_conversions_is_retired() {
        let mut p = PooledProcess::starting(0, "ep", Utc::now());
        p.status = ProcessStatus::Healthy;
        p.conversions_done = 101;
        assert!(p.must_retire(Utc::now(), chrono::Duration::minutes(30), 100));
    }

    #[rstest]
    fn restart_preserves_endpoint_and_resets_conversions() {
        let mut p = PooledProcess::starting(3, "tcp://127.0.0.1:9001", Utc::now());
        p.conversions_done = 100;
        p.status = ProcessStatus::Unhealthy;
        let later = Utc::now() + chrono::Duration::seconds(1);
        p.mark_restarted(later);
        assert_eq!(p.conversions_done, 0);
        assert_eq!(p.endpoint, "tcp://127.0.0.1:9001");
        assert_eq!(p.status, ProcessStatus::Healthy);
    }
}
