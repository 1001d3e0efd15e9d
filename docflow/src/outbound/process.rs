//! Process-pool-backed [`ConversionPort`] (`spec.md` §6, §4.E).
//!
//! Shells out to whatever converter binary `pool.converter_command`
//! configures, treating the document engine as a black box reached over
//! `tokio::process::Command`, the same way the domain layer never imports
//! an adapter crate directly for OCR or PDF engines.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::ports::{ConversionError, ConversionPort};

/// Converts documents by invoking an external binary once per call, passing
/// `endpoint` (an address or named pipe the warm process listens on),
/// `input_path`, and `output_path` as arguments.
pub struct CommandConversionPort {
    command: String,
}

impl CommandConversionPort {
    /// Build a port that shells out to `command` (`pool.converter_command`).
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }
}

#[async_trait]
impl ConversionPort for CommandConversionPort {
    async fn convert(
        &self,
        input_path: &str,
        output_path: &str,
        endpoint: &str,
        deadline: Duration,
    ) -> Result<(), ConversionError> {
        let child = Command::new(&self.command)
            .arg("convert")
            .arg("--endpoint")
            .arg(endpoint)
            .arg("--input")
            .arg(input_path)
            .arg("--output")
            .arg(output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ConversionError::Unavailable { message: e.to_string() })?;

        let output = tokio::time::timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| ConversionError::Timeout)?
            .map_err(|e| ConversionError::Internal { message: e.to_string() })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            Err(ConversionError::Internal { message: stderr })
        }
    }

    async fn health_check(&self, endpoint: &str) -> Result<(), ConversionError> {
        let output = Command::new(&self.command)
            .arg("ping")
            .arg("--endpoint")
            .arg(endpoint)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ConversionError::Unavailable { message: e.to_string() })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ConversionError::Unavailable {
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}
