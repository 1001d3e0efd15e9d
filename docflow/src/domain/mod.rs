//! Domain primitives and port definitions.
//!
//! Purpose: define the strongly typed entities from `spec.md` §3 and the
//! hexagon's edges (ports) from `spec.md` §6. Nothing in this module
//! touches an adapter crate (no Redis client, no `tokio::process`); that
//! lives in [`crate::outbound`].
//!
//! Public surface:
//! - Entities: [`Job`], [`JobId`], [`JobKind`], [`Plan`], [`JobPayload`],
//!   [`JobState`], [`Ticket`], [`DispatchKey`], [`CacheEntry`],
//!   [`Fingerprint`], [`PooledProcess`], [`ProcessStatus`],
//!   [`ProtectionState`], [`ProtectionReason`], [`DlqRecord`],
//!   [`HealthSample`], [`ThresholdTier`], [`BreachLevel`], [`WorkerHealth`].
//! - Ports: see [`ports`].

pub mod cache_entry;
pub mod dlq_record;
pub mod health_sample;
pub mod job;
pub mod ports;
pub mod process;
pub mod protection;
pub mod ticket;

pub use cache_entry::{CacheEntry, Fingerprint, MAX_CACHE_ENTRY_SIZE};
pub use dlq_record::{DlqRecord, MIN_RETENTION_DAYS};
pub use health_sample::{BreachLevel, HealthSample, ThresholdTier, WorkerHealth};
pub use job::{Job, JobId, JobKind, JobPayload, JobState, Plan};
pub use process::{PooledProcess, ProcessStatus};
pub use protection::{ProtectionReason, ProtectionState};
pub use ticket::{DispatchKey, Ticket};
