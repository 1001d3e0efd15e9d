//! Health monitor sample and threshold types (`spec.md` §3, §4.G).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health status of a single worker, as observed by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerHealth {
    /// Health endpoint responded within budget.
    Healthy,
    /// Health endpoint was unreachable or erroring.
    Failed,
}

/// Rolling snapshot of system health (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    /// CPU utilisation, 0.0-100.0.
    pub cpu_pct: f64,
    /// RAM utilisation, 0.0-100.0.
    pub ram_pct: f64,
    /// Disk utilisation, 0.0-100.0.
    pub disk_pct: f64,
    /// Total queued ticket count across all queues.
    pub queue_depth: u64,
    /// Per-worker health, keyed by worker name.
    pub worker_status: BTreeMap<String, WorkerHealth>,
    /// When this sample was taken.
    pub last_sampled: DateTime<Utc>,
}

/// A resource's warning/critical/emergency thresholds (`spec.md` §4.G).
///
/// `emergency` is optional: CPU and disk have no emergency tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTier {
    /// Warning-level threshold.
    pub warning: f64,
    /// Critical-level threshold.
    pub critical: f64,
    /// Emergency-level threshold, where defined.
    pub emergency: Option<f64>,
}

/// Severity of a threshold breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BreachLevel {
    /// Below the warning threshold.
    Nominal,
    /// At or above warning, below critical.
    Warning,
    /// At or above critical, below emergency (or no emergency tier defined).
    Critical,
    /// At or above the emergency threshold.
    Emergency,
}

impl ThresholdTier {
    /// Construct a tier with no emergency level (CPU, disk).
    #[must_use]
    pub fn without_emergency(warning: f64, critical: f64) -> Self {
        Self {
            warning,
            critical,
            emergency: None,
        }
    }

    /// Construct a tier with an emergency level (RAM, queue depth).
    #[must_use]
    pub fn with_emergency(warning: f64, critical: f64, emergency: f64) -> Self {
        Self {
            warning,
            critical,
            emergency: Some(emergency),
        }
    }

    /// Classify `value` against this tier.
    #[must_use]
    pub fn classify(&self, value: f64) -> BreachLevel {
        if let Some(emergency) = self.emergency {
            if value >= emergency {
                return BreachLevel::Emergency;
            }
        }
        if value >= self.critical {
            BreachLevel::Critical
        } else if value >= self.warning {
            BreachLevel::Warning
        } else {
            BreachLevel::Nominal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(79.9, BreachLevel::Nominal)]
    #[case(80.0, BreachLevel::Warning)]
    #[case(90.0, BreachLevel::Critical)]
    fn cpu_tier_has_no_emergency_level(#[case] value: f64, #[case] expected: BreachLevel) {
        let cpu = ThresholdTier::without_emergency(80.0, 90.0);
        assert_eq!(cpu.classify(value), expected);
    }

    #[rstest]
    #[case(74.9, BreachLevel::Nominal)]
    #[case(75.0, BreachLevel::Warning)]
    #[case(85.0, BreachLevel::Critical)]
    #[case(90.0, BreachLevel::Emergency)]
    fn ram_tier_has_three_levels(#[case] value: f64, #[case] expected: BreachLevel) {
        let ram = ThresholdTier::with_emergency(75.0, 85.0, 90.0);
        assert_eq!(ram.classify(value), expected);
    }
}
