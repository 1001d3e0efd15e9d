//! Process start/stop abstraction for [`super::ProcessPool`].
//!
//! The pool needs to spawn and tear down warm processes at a specific
//! endpoint; the [`ConversionPort`](crate::ports::ConversionPort) only
//! covers *using* an already-running process, so this is a second, smaller
//! port scoped to the pool's own lifecycle management.

use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// Errors raised by a [`ProcessLauncher`].
#[derive(Debug, Error)]
pub enum LauncherError {
    /// The process could not be spawned or failed its readiness probe.
    #[error("process launch failed: {message}")]
    SpawnFailed {
        /// Detail describing the failure.
        message: String,
    },
}

/// Starts and stops a warm converter process bound to a specific endpoint.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start a process bound to `endpoint`, blocking until it passes its
    /// readiness probe.
    async fn start(&self, endpoint: &str) -> Result<(), LauncherError>;

    /// Stop the process bound to `endpoint`, if one is running.
    async fn stop(&self, endpoint: &str);
}

/// Spawns `pool.converter_command` as a long-lived child process per
/// endpoint, matching the corpus's treatment of external engines as a
/// black box reached by shelling out.
pub struct CommandLauncher {
    command: String,
    children: Mutex<std::collections::HashMap<String, Child>>,
}

impl CommandLauncher {
    /// Build a launcher that spawns `command --serve --endpoint <endpoint>`.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            children: Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    async fn start(&self, endpoint: &str) -> Result<(), LauncherError> {
        let child = Command::new(&self.command)
            .arg("serve")
            .arg("--endpoint")
            .arg(endpoint)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LauncherError::SpawnFailed { message: e.to_string() })?;
        self.children.lock().await.insert(endpoint.to_owned(), child);
        Ok(())
    }

    async fn stop(&self, endpoint: &str) {
        if let Some(mut child) = self.children.lock().await.remove(endpoint) {
            let _ = child.kill().await;
        }
    }
}
