//! `sysinfo`-backed [`SystemSamplerPort`] (`spec.md` §4.G).
//!
//! `sysinfo`'s refresh calls are synchronous and touch `/proc`; every sample
//! runs on a blocking thread via `tokio::task::spawn_blocking` so the health
//! monitor's interval ticks never stall the executor.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sysinfo::{Disks, System};

use crate::ports::{SamplerError, SystemSamplerPort};

/// Samples CPU, RAM, and disk utilisation via `sysinfo`.
pub struct SysinfoSampler {
    system: Arc<Mutex<System>>,
    disk_mount: PathBuf,
}

impl SysinfoSampler {
    /// Build a sampler that reports disk usage for the volume containing
    /// `disk_mount` (typically `files.temp_dir`).
    #[must_use]
    pub fn new(disk_mount: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Arc::new(Mutex::new(system)),
            disk_mount: disk_mount.into(),
        }
    }
}

fn join_err(_: impl std::fmt::Debug) -> SamplerError {
    SamplerError::Unavailable {
        message: "sampler worker thread panicked".to_owned(),
    }
}

#[async_trait]
impl SystemSamplerPort for SysinfoSampler {
    async fn cpu_pct(&self) -> Result<f64, SamplerError> {
        let system = Arc::clone(&self.system);
        let snapshot: f64 = tokio::task::spawn_blocking(move || {
            let mut guard = system.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.refresh_cpu_usage();
            f64::from(guard.global_cpu_usage())
        })
        .await
        .map_err(join_err)?;
        Ok(snapshot.clamp(0.0, 100.0))
    }

    async fn ram_pct(&self) -> Result<f64, SamplerError> {
        let system = Arc::clone(&self.system);
        let (used, total) = tokio::task::spawn_blocking(move || {
            let mut guard = system.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.refresh_memory();
            (guard.used_memory(), guard.total_memory())
        })
        .await
        .map_err(join_err)?;
        if total == 0 {
            return Err(SamplerError::Unavailable {
                message: "reported total memory was zero".to_owned(),
            });
        }
        #[allow(clippy::cast_precision_loss)]
        Ok((used as f64 / total as f64) * 100.0)
    }

    async fn disk_pct(&self) -> Result<f64, SamplerError> {
        let mount = self.disk_mount.clone();
        tokio::task::spawn_blocking(move || {
            let disks = Disks::new_with_refreshed_list();
            let best = disks
                .iter()
                .filter(|disk| mount.starts_with(disk.mount_point()))
                .max_by_key(|disk| disk.mount_point().as_os_str().len())
                .or_else(|| disks.iter().next())
                .ok_or_else(|| SamplerError::Unavailable {
                    message: "no disks reported by the OS".to_owned(),
                })?;
            let total = best.total_space();
            if total == 0 {
                return Err(SamplerError::Unavailable {
                    message: "reported total disk space was zero".to_owned(),
                });
            }
            let used = total.saturating_sub(best.available_space());
            #[allow(clippy::cast_precision_loss)]
            Ok((used as f64 / total as f64) * 100.0)
        })
        .await
        .map_err(join_err)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cpu_and_ram_percentages_are_bounded() {
        let sampler = SysinfoSampler::new(std::env::temp_dir());
        let cpu = sampler.cpu_pct().await.unwrap();
        assert!((0.0..=100.0).contains(&cpu));
        let ram = sampler.ram_pct().await.unwrap();
        assert!((0.0..=100.0).contains(&ram));
    }
}
