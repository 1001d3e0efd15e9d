//! Warm process pool (`spec.md` §4.E).
//!
//! Purpose: keep a fixed number of long-lived converter processes warm so
//! Office-to-PDF jobs avoid per-job process startup cost. Per-process state
//! (`starting -> healthy -> (unhealthy -> restarting -> healthy) -> retired`)
//! is guarded by a per-process lock; pool-level state (closed, the
//! available set) is guarded by a separate lock, mirroring the corpus's
//! split between a pool-level lock and a per-connection lock.

mod launcher;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

use crate::domain::{PooledProcess, ProcessStatus};
use crate::ports::{ConversionError, ConversionPort};

pub use launcher::{CommandLauncher, LauncherError, ProcessLauncher};

/// Errors raised by [`ProcessPool`] operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every process failed to start; the pool refuses to form.
    #[error("process pool failed to start: {message}")]
    StartupFailed {
        /// Detail describing why no process could be started.
        message: String,
    },
    /// The pool has been closed and no longer serves acquires.
    #[error("process pool is closed")]
    Closed,
    /// Acquiring a process was cancelled before one became available.
    #[error("process pool acquire was cancelled")]
    Cancelled,
    /// Restarting an unhealthy process in place failed.
    #[error("process restart failed: {message}")]
    RestartFailed {
        /// Detail from the underlying launcher or health check.
        message: String,
    },
}

/// Tunable parameters from `spec.md` §4.E / §6 `pool.*` configuration keys.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of warm processes to maintain. Default 3.
    pub size: u32,
    /// Time allowed for a freshly spawned process to pass its readiness probe.
    pub start_timeout: Duration,
    /// Time allowed for a single conversion call.
    pub conversion_timeout: Duration,
    /// Maximum process age before a forced restart.
    pub process_ttl: chrono::Duration,
    /// Maximum conversions before a forced restart.
    pub max_conversions: u32,
    /// Idle duration after which an available process is retired.
    pub idle_retire: chrono::Duration,
    /// Prefix used to derive a process's endpoint from its handle.
    pub endpoint_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 3,
            start_timeout: Duration::from_secs(30),
            conversion_timeout: Duration::from_secs(5 * 60),
            process_ttl: chrono::Duration::minutes(30),
            max_conversions: 100,
            idle_retire: chrono::Duration::minutes(15),
            endpoint_prefix: "tcp://127.0.0.1:9".to_owned(),
        }
    }
}

struct Slot {
    process: PooledProcess,
    checked_out: bool,
}

/// A process checked out from the pool, returned to [`ProcessPool::release`]
/// once the caller is done with it.
pub struct AcquiredProcess {
    /// Stable slot handle.
    pub handle: u32,
    /// Opaque endpoint passed to the [`ConversionPort`].
    pub endpoint: String,
}

/// The warm process pool.
pub struct ProcessPool {
    config: PoolConfig,
    slots: Vec<Mutex<Slot>>,
    available: Mutex<VecDeque<u32>>,
    not_empty: Notify,
    closed: AtomicBool,
    launcher: Arc<dyn ProcessLauncher>,
    conversion_port: Arc<dyn ConversionPort>,
    clock: Arc<dyn Clock>,
}

impl ProcessPool {
    /// Start `config.size` processes concurrently. The pool is usable if at
    /// least one started; it refuses to form with zero (`spec.md` §4.E).
    pub async fn start(
        config: PoolConfig,
        launcher: Arc<dyn ProcessLauncher>,
        conversion_port: Arc<dyn ConversionPort>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PoolError> {
        let now = clock.utc();
        let mut slots = Vec::with_capacity(config.size as usize);
        let mut available = VecDeque::new();
        let mut started = 0u32;

        for handle in 0..config.size {
            let endpoint = format!("{}{:03}", config.endpoint_prefix, handle);
            let start_result = tokio::time::timeout(config.start_timeout, launcher.start(&endpoint)).await;
            let healthy = matches!(start_result, Ok(Ok(())));
            let mut process = PooledProcess::starting(handle, endpoint, now);
            if healthy {
                process.status = ProcessStatus::Healthy;
                available.push_back(handle);
                started += 1;
            } else {
                process.status = ProcessStatus::Retired;
            }
            slots.push(Mutex::new(Slot { process, checked_out: false }));
        }

        if started == 0 {
            return Err(PoolError::StartupFailed {
                message: format!("0 of {} processes started", config.size),
            });
        }

        Ok(Self {
            config,
            slots,
            available: Mutex::new(available),
            not_empty: Notify::new(),
            closed: AtomicBool::new(false),
            launcher,
            conversion_port,
            clock,
        })
    }

    /// Number of processes currently in the available set.
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.available.lock().len()
    }

    async fn restart_in_place(&self, handle: u32) -> Result<(), PoolError> {
        let endpoint = {
            let slot = self.slots[handle as usize].lock();
            slot.process.endpoint.clone()
        };
        self.launcher.stop(&endpoint).await;
        tokio::time::timeout(self.config.start_timeout, self.launcher.start(&endpoint))
            .await
            .map_err(|_| PoolError::RestartFailed { message: "restart timed out".to_owned() })?
            .map_err(|e| PoolError::RestartFailed { message: e.to_string() })?;

        let now = self.clock.utc();
        let mut slot = self.slots[handle as usize].lock();
        slot.process.mark_restarted(now);
        Ok(())
    }

    /// Acquire a healthy process, blocking until one is available or
    /// `cancel` fires. Restarts an unhealthy process in place before
    /// returning it.
    pub async fn acquire(&self, cancel: &Notify) -> Result<AcquiredProcess, PoolError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(PoolError::Closed);
            }
            let popped = self.available.lock().pop_front();
            let Some(handle) = popped else {
                tokio::select! {
                    () = self.not_empty.notified() => continue,
                    () = tokio::time::sleep(Duration::from_millis(50)) => continue,
                    () = cancel.notified() => return Err(PoolError::Cancelled),
                }
            };

            let needs_restart = {
                let slot = self.slots[handle as usize].lock();
                slot.process.status != ProcessStatus::Healthy
            };
            if needs_restart {
                self.restart_in_place(handle).await?;
            }

            let now = self.clock.utc();
            let endpoint = {
                let mut slot = self.slots[handle as usize].lock();
                slot.process.last_used = now;
                slot.checked_out = true;
                slot.process.endpoint.clone()
            };
            return Ok(AcquiredProcess { handle, endpoint });
        }
    }

    /// Release a process after use, restarting or retiring it if it has
    /// exceeded its limits, and returning it to the available set.
    pub async fn release(&self, handle: u32, conversion_succeeded: bool) {
        {
            let mut slot = self.slots[handle as usize].lock();
            if !slot.checked_out {
                return;
            }
            slot.checked_out = false;
        }

        if !conversion_succeeded {
            let mut slot = self.slots[handle as usize].lock();
            slot.process.status = ProcessStatus::Unhealthy;
        } else {
            let mut slot = self.slots[handle as usize].lock();
            slot.process.conversions_done = slot.process.conversions_done.saturating_add(1);
        }

        let now = self.clock.utc();
        let must_retire = {
            let slot = self.slots[handle as usize].lock();
            slot.process
                .must_retire(now, self.config.process_ttl, self.config.max_conversions)
                || slot.process.status == ProcessStatus::Unhealthy
        };
        if must_retire && self.restart_in_place(handle).await.is_err() {
            let mut slot = self.slots[handle as usize].lock();
            slot.process.status = ProcessStatus::Retired;
        }

        if !self.closed.load(Ordering::SeqCst) {
            self.available.lock().push_back(handle);
            self.not_empty.notify_waiters();
        }
    }

    /// Run a single maintenance pass: retires processes idle beyond
    /// `idle_retire`, or past their TTL/conversion-count limit
    /// (`spec.md` §4.E, run every 5 minutes by the caller).
    pub async fn run_maintenance(&self) {
        let now = self.clock.utc();
        let pending: Vec<u32> = self.available.lock().drain(..).collect();

        let mut still_available = VecDeque::new();
        for handle in pending {
            let must_retire = {
                let slot = self.slots[handle as usize].lock();
                slot.process
                    .must_retire(now, self.config.process_ttl, self.config.max_conversions)
                    || now - slot.process.last_used > self.config.idle_retire
            };
            if must_retire {
                if self.restart_in_place(handle).await.is_ok() {
                    still_available.push_back(handle);
                } else {
                    let mut slot = self.slots[handle as usize].lock();
                    slot.process.status = ProcessStatus::Retired;
                }
            } else {
                still_available.push_back(handle);
            }
        }
        self.available.lock().extend(still_available);
    }

    /// Close the pool: stop serving `acquire`, terminate every process.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.not_empty.notify_waiters();
        for slot in &self.slots {
            let endpoint = slot.lock().process.endpoint.clone();
            self.launcher.stop(&endpoint).await;
        }
    }

    /// Convert via the pool: acquire, convert with the configured timeout,
    /// release, marking the process unhealthy on failure
    /// (`spec.md` §4.E `Convert`).
    pub async fn convert(
        &self,
        input_path: &str,
        output_path: &str,
        cancel: &Notify,
    ) -> Result<(), ConversionError> {
        let acquired = self
            .acquire(cancel)
            .await
            .map_err(|e| ConversionError::Unavailable { message: e.to_string() })?;
        let result = self
            .conversion_port
            .convert(input_path, output_path, &acquired.endpoint, self.config.conversion_timeout)
            .await;
        self.release(acquired.handle, result.is_ok()).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launcher::tests::FakeLauncher;
    use mockable::DefaultClock;

    struct OkConversion;

    #[async_trait::async_trait]
    impl ConversionPort for OkConversion {
        async fn convert(
            &self,
            _input_path: &str,
            _output_path: &str,
            _endpoint: &str,
            _deadline: Duration,
        ) -> Result<(), ConversionError> {
            Ok(())
        }

        async fn health_check(&self, _endpoint: &str) -> Result<(), ConversionError> {
            Ok(())
        }
    }

    async fn start_pool(size: u32, launcher: Arc<FakeLauncher>) -> ProcessPool {
        ProcessPool::start(
            PoolConfig { size, ..PoolConfig::default() },
            launcher,
            Arc::new(OkConversion),
            Arc::new(DefaultClock),
        )
        .await
        .expect("pool starts")
    }

    #[tokio::test]
    async fn refuses_to_form_with_zero_healthy_processes() {
        let launcher = Arc::new(FakeLauncher::always_fails());
        let result = ProcessPool::start(
            PoolConfig { size: 2, ..PoolConfig::default() },
            launcher,
            Arc::new(OkConversion),
            Arc::new(DefaultClock),
        )
        .await;
        assert!(matches!(result, Err(PoolError::StartupFailed { .. })));
    }

    #[tokio::test]
    async fn forms_with_at_least_one_healthy_process() {
        let launcher = Arc::new(FakeLauncher::first_n_succeed(1));
        let pool = ProcessPool::start(
            PoolConfig { size: 3, ..PoolConfig::default() },
            launcher,
            Arc::new(OkConversion),
            Arc::new(DefaultClock),
        )
        .await
        .expect("pool forms with >=1 healthy");
        assert_eq!(pool.available_count(), 1);
    }

    #[tokio::test]
    async fn acquire_then_release_returns_process_to_available_set() {
        let pool = start_pool(2, Arc::new(FakeLauncher::always_succeeds())).await;
        let cancel = Notify::new();
        let acquired = pool.acquire(&cancel).await.unwrap();
        assert_eq!(pool.available_count(), 1);
        pool.release(acquired.handle, true).await;
        assert_eq!(pool.available_count(), 2);
    }

    #[tokio::test]
    async fn release_idempotence_does_not_double_count() {
        let pool = start_pool(1, Arc::new(FakeLauncher::always_succeeds())).await;
        let cancel = Notify::new();
        let acquired = pool.acquire(&cancel).await.unwrap();
        pool.release(acquired.handle, true).await;
        pool.release(acquired.handle, true).await;
        assert_eq!(pool.available_count(), 1);
    }

    #[tokio::test]
    async fn convert_marks_process_unhealthy_on_failure_then_restarts_on_next_acquire() {
        struct FailingConversion;
        #[async_trait::async_trait]
        impl ConversionPort for FailingConversion {
            async fn convert(
                &self,
                _input_path: &str,
                _output_path: &str,
                _endpoint: &str,
                _deadline: Duration,
            ) -> Result<(), ConversionError> {
                Err(ConversionError::Internal { message: "boom".to_owned() })
            }
            async fn health_check(&self, _endpoint: &str) -> Result<(), ConversionError> {
                Ok(())
            }
        }

        let pool = ProcessPool::start(
            PoolConfig { size: 1, ..PoolConfig::default() },
            Arc::new(FakeLauncher::always_succeeds()),
            Arc::new(FailingConversion),
            Arc::new(DefaultClock),
        )
        .await
        .unwrap();
        let cancel = Notify::new();
        let err = pool.convert("in", "out", &cancel).await;
        assert!(err.is_err());
        // next acquire restarts the unhealthy process in place
        let acquired = pool.acquire(&cancel).await.unwrap();
        assert_eq!(acquired.handle, 0);
    }
}
