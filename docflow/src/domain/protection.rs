//! Protection-mode state (`spec.md` §3, §4.G).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why protection mode was engaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionReason {
    /// CPU crossed the critical threshold.
    CpuCritical,
    /// RAM crossed the critical or emergency threshold.
    RamCritical,
    /// Disk usage crossed the critical threshold.
    DiskCritical,
    /// Queue depth reached the critical or maximum level.
    QueueCritical,
    /// Cache backing store latency crossed the critical threshold.
    CacheLatencyCritical,
    /// A worker's health endpoint is unreachable.
    WorkerFailed,
}

/// Snapshot of the process-wide protection flag (`spec.md` §3).
///
/// ## Invariants
/// - `active` is observed via a single atomic; readers never see a torn value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionState {
    /// Whether protection mode is currently engaged.
    pub active: bool,
    /// When the current state was entered.
    pub since: DateTime<Utc>,
    /// Why protection mode was (most recently) engaged. Meaningless when `active == false`.
    pub reason: Option<ProtectionReason>,
}

impl ProtectionState {
    /// The initial, inactive state.
    #[must_use]
    pub fn inactive(now: DateTime<Utc>) -> Self {
        Self {
            active: false,
            since: now,
            reason: None,
        }
    }

    /// The engaged state for a given reason.
    #[must_use]
    pub fn engaged(now: DateTime<Utc>, reason: ProtectionReason) -> Self {
        Self {
            active: true,
            since: now,
            reason: Some(reason),
        }
    }

    /// Seconds spent in the current state as of `now`.
    #[must_use]
    pub fn duration_in_state(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.since
    }
}
