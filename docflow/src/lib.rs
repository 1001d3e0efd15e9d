//! `docflow` — the job-dispatch and worker-execution fabric.
//!
//! Purpose: a priority queue with retry/DLQ, a warm process pool, a
//! content-addressed result cache, and a health monitor/protection-mode
//! supervisor, wired together behind the ports in [`domain::ports`]. The
//! HTTP front door, persistent analytics store, authentication, and the
//! document/OCR engines themselves are external collaborators.
//!
//! Public surface: [`cache`], [`retry`], [`dlq`], [`queue`], [`pool`],
//! [`worker`], [`health`], [`status`], [`domain`], [`error`], [`config`],
//! [`telemetry`], [`shutdown`], [`outbound`].

pub mod cache;
pub mod config;
pub mod dlq;
pub mod domain;
pub mod error;
pub mod health;
pub mod outbound;
pub mod pool;
pub mod queue;
pub mod retry;
pub mod shutdown;
pub mod status;
pub mod telemetry;
pub mod worker;

#[cfg(feature = "test-support")]
pub mod test_support;

/// Port traits at the hexagon's edges. Re-exported at the crate root
/// because most callers reach for a port without caring that it happens to
/// live alongside the other domain types.
pub use domain::ports;
