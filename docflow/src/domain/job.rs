//! Job, plan, and job-state primitives (`spec.md` §3).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Stable job identifier.
///
/// ## Invariants
/// - Unique across the active set (queued + running + parked) — enforced
///   by the queue and DLQ, not by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random job id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap a caller-supplied identifier.
    #[must_use]
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Borrow the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// A named PDF operation (merge, split, optimize, watermark, info, compress, rotate).
    PdfOp,
    /// Classic OCR pipeline (Tesseract-style).
    OcrClassic,
    /// AI-vision OCR with a classic fallback.
    OcrAi,
    /// Office document to PDF conversion via the warm process pool.
    OfficeToPdf,
}

impl JobKind {
    /// The queue this kind is primarily routed to (`spec.md` §4.D).
    #[must_use]
    pub fn primary_queue(self) -> &'static str {
        match self {
            Self::PdfOp => "pdf",
            Self::OcrClassic | Self::OcrAi => "ocr",
            Self::OfficeToPdf => "office",
        }
    }

    /// Default maximum attempts for this kind (`spec.md` §4.B).
    #[must_use]
    pub fn default_max_attempts(self) -> u32 {
        match self {
            Self::OcrClassic | Self::OcrAi => 3,
            Self::OfficeToPdf | Self::PdfOp => 5,
        }
    }
}

/// Subscription tier driving dispatch priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    /// Highest priority.
    Pro,
    /// Second-highest priority.
    Premium,
    /// Default priority tier.
    Corporate,
    /// Lowest priority tier.
    Free,
}

impl Plan {
    /// Numeric priority per `spec.md` §4.D: `pro=1 (highest), premium=5, others=10`.
    /// Smaller values are dispatched earlier.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Pro => 1,
            Self::Premium => 5,
            Self::Corporate | Self::Free => 10,
        }
    }
}

/// Canonicalised, kind-specific job parameters plus an input locator.
///
/// Stored as a sorted map so two semantically equal parameter sets produce
/// byte-identical serialisations (`spec.md` §4.A fingerprint determinism
/// law).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Locator (path or URI) for the input artifact.
    pub input_locator: String,
    /// Kind-specific parameters, e.g. `{"rotation": 90}` for a rotate op.
    pub params: BTreeMap<String, Value>,
}

impl JobPayload {
    /// Build a payload from an input locator and parameters.
    #[must_use]
    pub fn new(input_locator: impl Into<String>, params: BTreeMap<String, Value>) -> Self {
        Self {
            input_locator: input_locator.into(),
            params,
        }
    }
}

/// Immutable job request (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub job_id: JobId,
    /// Kind of work requested.
    pub kind: JobKind,
    /// Caller's subscription tier.
    pub plan: Plan,
    /// Identifier of the requesting user.
    pub user_id: String,
    /// Kind-specific parameters and input locator.
    pub payload: JobPayload,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// 0-indexed attempt counter.
    pub attempt: u32,
    /// Optional absolute deadline.
    pub deadline: Option<DateTime<Utc>>,
}

impl Job {
    /// Construct a fresh job at attempt 0, generating a `job_id` if absent.
    #[must_use]
    pub fn new(
        job_id: Option<JobId>,
        kind: JobKind,
        plan: Plan,
        user_id: impl Into<String>,
        payload: JobPayload,
        created_at: DateTime<Utc>,
        deadline: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            job_id: job_id.unwrap_or_else(JobId::generate),
            kind,
            plan,
            user_id: user_id.into(),
            payload,
            created_at,
            attempt: 0,
            deadline,
        }
    }

    /// Return a copy of this job with `attempt` incremented.
    #[must_use]
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self.clone()
        }
    }

    /// Return a copy of this job reset to attempt 0, as produced by DLQ replay.
    #[must_use]
    pub fn as_replay(&self) -> Self {
        Self {
            job_id: JobId::generate(),
            attempt: 0,
            created_at: self.created_at,
            ..self.clone()
        }
    }
}

/// Mutable job status (`spec.md` §3).
///
/// ## Invariants (transitions)
/// - `Pending -> Processing -> (Completed | Failed | Cancelled)`
/// - `Processing -> Pending` on retryable failure.
/// - `Failed` is terminal unless a replay recreates a new [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Queued, waiting for a worker.
    Pending,
    /// Claimed by a worker and executing.
    Processing,
    /// Terminal success.
    Completed,
    /// Terminal failure (permanent, or retries exhausted).
    Failed,
    /// Terminal cancellation.
    Cancelled,
}

impl JobState {
    /// True if `self -> next` is a legal transition per the invariant above.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Cancelled)
                | (Self::Processing, Self::Pending)
                | (Self::Pending, Self::Cancelled)
        )
    }

    /// True for states from which no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}
