//! Pure retry-scheduling primitives.
//!
//! Purpose: compute backoff delays and classify errors as permanent or
//! transient without touching a clock, a random source, or any shared
//! state. Callers inject both time and randomness so the schedule stays a
//! deterministic, testable function of its inputs.
//!
//! Public surface:
//! - [`RetryPolicy`] — backoff parameters (initial delay, multiplier, cap, jitter).
//! - [`JitterSource`] — injectable randomness for the jitter draw.
//! - [`ErrorCategory`] — the coarse error shape used for permanent/transient classification.
//! - [`Decision`] — the outcome of [`RetryPolicy::evaluate`].

#![deny(missing_docs)]

use std::time::Duration;

/// Coarse error shape used to decide whether a failure is worth retrying.
///
/// This is deliberately narrower than any single crate's error enum: callers
/// map their own error types onto one of these variants before calling
/// [`RetryPolicy::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Caller-supplied input failed structural validation.
    InvalidInput,
    /// Referenced input file does not exist.
    FileNotFound,
    /// The input format is not one the system can process.
    UnsupportedFormat,
    /// Semantic validation of the payload failed.
    ValidationFailed,
    /// Authentication failed.
    AuthenticationFailed,
    /// The caller is not permitted to perform this operation.
    PermissionDenied,
    /// A downstream call exceeded its deadline.
    Timeout,
    /// A collaborator (cache store, AI vision, conversion engine) was unreachable.
    UpstreamUnavailable,
    /// The conversion engine failed for a reason that is not input-shaped.
    InternalConversion,
    /// Any other, unclassified failure. Treated as transient.
    Other,
}

/// Whether a failure should be retried or parked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Retrying is expected to help; the policy should schedule another attempt.
    Transient,
    /// Retrying cannot help; the job should be parked immediately.
    Permanent,
}

/// Outcome of evaluating one failed attempt against a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Schedule another attempt after the given delay.
    RetryAfter(Duration),
    /// Stop retrying; the job is terminal.
    GiveUp,
}

/// Injectable source of jitter draws.
///
/// `sample` must return a value in `[-1.0, 1.0]`; the policy scales it by the
/// configured jitter fraction. Implementations must be pure with respect to
/// their own internal state only — no I/O.
///
/// # Examples
/// ```
/// use docflow_backoff::{JitterSource, ZeroJitter};
///
/// let jitter = ZeroJitter;
/// assert_eq!(jitter.sample(0), 0.0);
/// ```
pub trait JitterSource {
    /// Draw a jitter fraction in `[-1.0, 1.0]` for the given attempt.
    fn sample(&self, attempt: u32) -> f64;
}

/// A [`JitterSource`] that never perturbs the delay.
///
/// Used by tests and by callers that want a fully deterministic schedule.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroJitter;

impl JitterSource for ZeroJitter {
    fn sample(&self, _attempt: u32) -> f64 {
        0.0
    }
}

/// A [`JitterSource`] backed by a caller-supplied closure.
///
/// Handy in tests that need a fixed, non-zero jitter draw without pulling in
/// a random number generator.
pub struct FnJitter<F: Fn(u32) -> f64>(pub F);

impl<F: Fn(u32) -> f64> JitterSource for FnJitter<F> {
    fn sample(&self, attempt: u32) -> f64 {
        (self.0)(attempt)
    }
}

/// Errors constructing a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryPolicyError {
    /// `initial_delay` was zero or exceeded `max_delay`.
    #[error("initial_delay must be > 0 and <= max_delay")]
    InvalidInitialDelay,
    /// `multiplier` was not greater than 1.0.
    #[error("multiplier must be > 1.0")]
    InvalidMultiplier,
    /// `jitter_fraction` was outside `[0.0, 1.0]`.
    #[error("jitter_fraction must be within [0.0, 1.0]")]
    InvalidJitterFraction,
    /// `max_attempts` was zero.
    #[error("max_attempts must be >= 1")]
    InvalidMaxAttempts,
}

/// Exponential backoff schedule with jitter and a maximum attempt count.
///
/// ## Invariants
/// - `delay_for(n)` with zero jitter always lies in `[initial_delay, max_delay]`.
/// - `classify` and `evaluate` are pure: identical inputs produce identical outputs.
///
/// # Examples
/// ```
/// use docflow_backoff::{RetryPolicy, ZeroJitter};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(
///     Duration::from_secs(30),
///     2.0,
///     Duration::from_secs(3600),
///     0.2,
///     5,
/// ).expect("valid policy");
///
/// assert_eq!(policy.delay_for(0, &ZeroJitter), Duration::from_secs(30));
/// assert_eq!(policy.delay_for(1, &ZeroJitter), Duration::from_secs(90));
/// assert_eq!(policy.delay_for(2, &ZeroJitter), Duration::from_secs(210));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter_fraction: f64,
    max_attempts: u32,
}

impl RetryPolicy {
    /// Build a policy, validating all parameters up front.
    ///
    /// # Errors
    /// Returns [`RetryPolicyError`] if any parameter is out of range.
    pub fn new(
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        jitter_fraction: f64,
        max_attempts: u32,
    ) -> Result<Self, RetryPolicyError> {
        if initial_delay.is_zero() || initial_delay > max_delay {
            return Err(RetryPolicyError::InvalidInitialDelay);
        }
        if !(multiplier > 1.0) {
            return Err(RetryPolicyError::InvalidMultiplier);
        }
        if !(0.0..=1.0).contains(&jitter_fraction) {
            return Err(RetryPolicyError::InvalidJitterFraction);
        }
        if max_attempts == 0 {
            return Err(RetryPolicyError::InvalidMaxAttempts);
        }
        Ok(Self {
            initial_delay,
            multiplier,
            max_delay,
            jitter_fraction,
            max_attempts,
        })
    }

    /// The default policy from the specification: 30s initial, ×2, 1h cap, ±20% jitter, 5 attempts.
    #[must_use]
    pub fn defaults() -> Self {
        #[expect(
            clippy::unwrap_used,
            reason = "the literal defaults are statically known to be valid"
        )]
        Self::new(
            Duration::from_secs(30),
            2.0,
            Duration::from_secs(3600),
            0.2,
            5,
        )
        .unwrap()
    }

    /// Return a copy of this policy with a different `max_attempts`, used to
    /// apply the per-kind overrides from §4.B (OCR=3, Office=5, PDF-op=5).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Maximum number of attempts (1-indexed count) this policy allows.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Compute the delay before the given 0-indexed attempt, including jitter.
    ///
    /// The result is always clamped to `[initial_delay, max_delay]`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, jitter: &dyn JitterSource) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(saturating_i32(attempt));
        let draw = jitter.sample(attempt).clamp(-1.0, 1.0);
        let jittered = base * (1.0 + draw * self.jitter_fraction);
        let clamped = jittered.clamp(
            self.initial_delay.as_secs_f64(),
            self.max_delay.as_secs_f64(),
        );
        Duration::from_secs_f64(clamped.max(0.0))
    }

    /// Classify an error as permanent or transient.
    ///
    /// Permanent errors skip all remaining retries regardless of `attempt`.
    #[must_use]
    pub fn classify(category: ErrorCategory) -> ErrorClass {
        match category {
            ErrorCategory::InvalidInput
            | ErrorCategory::FileNotFound
            | ErrorCategory::UnsupportedFormat
            | ErrorCategory::ValidationFailed
            | ErrorCategory::AuthenticationFailed
            | ErrorCategory::PermissionDenied => ErrorClass::Permanent,
            ErrorCategory::Timeout
            | ErrorCategory::UpstreamUnavailable
            | ErrorCategory::InternalConversion
            | ErrorCategory::Other => ErrorClass::Transient,
        }
    }

    /// Decide whether `attempt` (0-indexed, the attempt that just failed)
    /// should be retried given `category`, and if so after how long.
    #[must_use]
    pub fn evaluate(
        &self,
        attempt: u32,
        category: ErrorCategory,
        jitter: &dyn JitterSource,
    ) -> Decision {
        if Self::classify(category) == ErrorClass::Permanent {
            return Decision::GiveUp;
        }
        if attempt.saturating_add(1) >= self.max_attempts {
            return Decision::GiveUp;
        }
        Decision::RetryAfter(self.delay_for(attempt, jitter))
    }
}

fn saturating_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn scenario_retry_backoff_cumulative_delays() {
        let policy = RetryPolicy::defaults();
        let jitter = ZeroJitter;

        let delays: Vec<Duration> = (0..4).map(|n| policy.delay_for(n, &jitter)).collect();
        assert_eq!(delays[0], Duration::from_secs(30));
        assert_eq!(delays[1], Duration::from_secs(90));
        assert_eq!(delays[2], Duration::from_secs(210));
        assert_eq!(delays[3], Duration::from_secs(450));

        let cumulative: u64 = delays.iter().map(Duration::as_secs).sum();
        assert_eq!(cumulative, 30 + 90 + 210 + 450);
    }

    #[rstest]
    fn delay_is_clamped_to_max_delay() {
        let policy = RetryPolicy::defaults();
        let jitter = ZeroJitter;
        let delay = policy.delay_for(20, &jitter);
        assert_eq!(delay, Duration::from_secs(3600));
    }

    #[rstest]
    #[case(ErrorCategory::InvalidInput)]
    #[case(ErrorCategory::FileNotFound)]
    #[case(ErrorCategory::UnsupportedFormat)]
    #[case(ErrorCategory::ValidationFailed)]
    #[case(ErrorCategory::AuthenticationFailed)]
    #[case(ErrorCategory::PermissionDenied)]
    fn permanent_categories_give_up_immediately(#[case] category: ErrorCategory) {
        let policy = RetryPolicy::defaults();
        let jitter = ZeroJitter;
        assert_eq!(policy.evaluate(0, category, &jitter), Decision::GiveUp);
    }

    #[rstest]
    fn permanent_failure_routes_to_giveup_at_first_attempt() {
        let policy = RetryPolicy::defaults();
        let jitter = ZeroJitter;
        let decision = policy.evaluate(0, ErrorCategory::UnsupportedFormat, &jitter);
        assert_eq!(decision, Decision::GiveUp);
    }

    #[rstest]
    fn transient_failure_retries_until_attempts_exhausted() {
        let policy = RetryPolicy::defaults();
        let jitter = ZeroJitter;

        for attempt in 0..4 {
            let decision = policy.evaluate(attempt, ErrorCategory::Timeout, &jitter);
            assert!(matches!(decision, Decision::RetryAfter(_)), "attempt {attempt}");
        }
        assert_eq!(
            policy.evaluate(4, ErrorCategory::Timeout, &jitter),
            Decision::GiveUp
        );
    }

    #[rstest]
    fn classify_is_pure_and_deterministic() {
        for _ in 0..50 {
            assert_eq!(
                RetryPolicy::classify(ErrorCategory::Timeout),
                ErrorClass::Transient
            );
            assert_eq!(
                RetryPolicy::classify(ErrorCategory::PermissionDenied),
                ErrorClass::Permanent
            );
        }
    }

    #[rstest]
    fn per_kind_overrides_apply() {
        let ocr = RetryPolicy::defaults().with_max_attempts(3);
        assert_eq!(ocr.max_attempts(), 3);
        let office = RetryPolicy::defaults().with_max_attempts(5);
        assert_eq!(office.max_attempts(), 5);
    }

    #[rstest]
    #[case(Duration::ZERO, 2.0, Duration::from_secs(60), 0.2, 5)]
    #[case(Duration::from_secs(10), 1.0, Duration::from_secs(60), 0.2, 5)]
    #[case(Duration::from_secs(10), 2.0, Duration::from_secs(60), 1.5, 5)]
    #[case(Duration::from_secs(10), 2.0, Duration::from_secs(60), 0.2, 0)]
    fn rejects_invalid_parameters(
        #[case] initial: Duration,
        #[case] multiplier: f64,
        #[case] max: Duration,
        #[case] jitter_fraction: f64,
        #[case] max_attempts: u32,
    ) {
        assert!(RetryPolicy::new(initial, multiplier, max, jitter_fraction, max_attempts).is_err());
    }

    proptest::proptest! {
        #[test]
        fn delay_always_within_bounds(attempt in 0u32..64) {
            let policy = RetryPolicy::defaults();
            let jitter = ZeroJitter;
            let delay = policy.delay_for(attempt, &jitter);
            proptest::prop_assert!(delay.as_secs_f64() >= 30.0 - f64::EPSILON);
            proptest::prop_assert!(delay.as_secs_f64() <= 3600.0 + f64::EPSILON);
        }

        #[test]
        fn jittered_delay_stays_within_bounds(attempt in 0u32..64, draw in -1.0f64..1.0f64) {
            let policy = RetryPolicy::defaults();
            let jitter = FnJitter(|_| draw);
            let delay = policy.delay_for(attempt, &jitter);
            proptest::prop_assert!(delay.as_secs_f64() >= 30.0 - 1e-9);
            proptest::prop_assert!(delay.as_secs_f64() <= 3600.0 + 1e-9);
        }
    }
}
