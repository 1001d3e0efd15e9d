//! Retry glue: jitter source selection and error-to-category mapping
//! (`spec.md` §4.B, §9 Open Question).
//!
//! The pure schedule and classification function live in `docflow_backoff`,
//! which knows nothing about this crate's [`crate::error::ErrorKind`]. This
//! module is the seam between the two: it resolves a configured jitter
//! strategy into a concrete `dyn JitterSource` and feeds
//! `ErrorKind::to_category` into `RetryPolicy::classify`/`evaluate`.

use docflow_backoff::{Decision, JitterSource, RetryPolicy};
use rand::rngs::OsRng as CryptoRng;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Which random source feeds the retry schedule's jitter draw.
///
/// `spec.md` §9 leaves the jitter source type (cryptographic vs.
/// pseudo-random) an open question; the fabric makes it configurable,
/// defaulting to `PseudoRandom` for throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterKind {
    /// No jitter; useful for deterministic tests.
    Zero,
    /// Fast, non-cryptographic PRNG (`rand::rngs::SmallRng`). Default.
    #[default]
    PseudoRandom,
    /// OS-backed CSPRNG, for deployments that treat retry timing as a side
    /// channel worth hardening.
    Cryptographic,
}

/// Uniform jitter in `[-1.0, 1.0]` drawn from a `SmallRng` seeded from OS
/// entropy at construction time.
pub struct PseudoRandomJitter {
    rng: parking_lot::Mutex<SmallRng>,
}

impl PseudoRandomJitter {
    /// Seed a fresh generator from OS entropy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: parking_lot::Mutex::new(SmallRng::from_entropy()),
        }
    }
}

impl Default for PseudoRandomJitter {
    fn default() -> Self {
        Self::new()
    }
}

impl JitterSource for PseudoRandomJitter {
    fn sample(&self, _attempt: u32) -> f64 {
        let draw = self.rng.lock().next_u64();
        #[allow(clippy::cast_precision_loss)]
        let unit = (draw as f64) / (u64::MAX as f64);
        unit.mul_add(2.0, -1.0)
    }
}

/// Uniform jitter in `[-1.0, 1.0]` drawn from the OS CSPRNG on every call.
pub struct CryptographicJitter;

impl JitterSource for CryptographicJitter {
    fn sample(&self, _attempt: u32) -> f64 {
        let draw = CryptoRng.next_u64();
        #[allow(clippy::cast_precision_loss)]
        let unit = (draw as f64) / (u64::MAX as f64);
        unit.mul_add(2.0, -1.0)
    }
}

/// Resolve a [`JitterKind`] into a boxed [`JitterSource`].
#[must_use]
pub fn resolve_jitter(kind: JitterKind) -> Box<dyn JitterSource + Send + Sync> {
    match kind {
        JitterKind::Zero => Box::new(docflow_backoff::ZeroJitter),
        JitterKind::PseudoRandom => Box::new(PseudoRandomJitter::new()),
        JitterKind::Cryptographic => Box::new(CryptographicJitter),
    }
}

/// Evaluate the retry decision for a fabric error, mapping `kind` onto
/// `docflow_backoff`'s coarser classification first.
#[must_use]
pub fn evaluate(policy: &RetryPolicy, attempt: u32, kind: ErrorKind, jitter: &dyn JitterSource) -> Decision {
    policy.evaluate(attempt, kind.to_category(), jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn pseudo_random_jitter_stays_in_bounds() {
        let jitter = PseudoRandomJitter::new();
        for attempt in 0..100 {
            let value = jitter.sample(attempt);
            assert!((-1.0..=1.0).contains(&value));
        }
    }

    #[rstest]
    fn cryptographic_jitter_stays_in_bounds() {
        let jitter = CryptographicJitter;
        for attempt in 0..20 {
            let value = jitter.sample(attempt);
            assert!((-1.0..=1.0).contains(&value));
        }
    }

    #[rstest]
    fn zero_jitter_kind_resolves_to_zero_draw() {
        let jitter = resolve_jitter(JitterKind::Zero);
        assert_eq!(jitter.sample(0), 0.0);
    }

    #[rstest]
    fn permanent_error_kind_gives_up_immediately() {
        let policy = RetryPolicy::defaults();
        let jitter = resolve_jitter(JitterKind::Zero);
        let decision = evaluate(&policy, 0, ErrorKind::Validation, jitter.as_ref());
        assert!(matches!(decision, Decision::GiveUp));
    }

    #[rstest]
    fn transient_error_kind_retries() {
        let policy = RetryPolicy::defaults();
        let jitter = resolve_jitter(JitterKind::Zero);
        let decision = evaluate(&policy, 0, ErrorKind::UpstreamUnavailable, jitter.as_ref());
        assert!(matches!(decision, Decision::RetryAfter(_)));
    }
}
