//! Command-line-backed [`PdfOpsPort`] (`spec.md` §6).
//!
//! Shells out to an external PDF engine binary once per call, the same
//! black-box treatment [`super::process::CommandConversionPort`] and
//! [`super::ocr::CommandOcrPort`] give their own external engines.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::ports::{PdfOpError, PdfOpOutput, PdfOperation, PdfOpsPort};

/// Runs named PDF operations by invoking an external binary once per call.
pub struct CommandPdfOpsPort {
    command: String,
}

impl CommandPdfOpsPort {
    /// Build a port that shells out to `command` (`pool.pdf_ops_command`).
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }
}

#[async_trait]
impl PdfOpsPort for CommandPdfOpsPort {
    async fn run(
        &self,
        operation: PdfOperation,
        inputs: &[String],
        params: &Value,
        deadline: Duration,
    ) -> Result<PdfOpOutput, PdfOpError> {
        let operation_name = serde_json::to_value(operation)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| "unknown".to_owned());

        let child = Command::new(&self.command)
            .arg("run")
            .arg("--operation")
            .arg(&operation_name)
            .arg("--inputs")
            .arg(inputs.join(","))
            .arg("--params")
            .arg(params.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PdfOpError::Unavailable { message: e.to_string() })?;

        let output = tokio::time::timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| PdfOpError::Timeout)?
            .map_err(|e| PdfOpError::Internal { message: e.to_string() })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(PdfOpError::Internal { message: stderr });
        }

        let parsed: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| PdfOpError::Internal { message: format!("malformed engine output: {e}") })?;

        if matches!(operation, PdfOperation::Info) {
            return Ok(PdfOpOutput::Info(parsed));
        }
        let locator = parsed
            .get("locator")
            .and_then(Value::as_str)
            .ok_or_else(|| PdfOpError::Internal { message: "engine output missing locator".to_owned() })?
            .to_owned();
        Ok(PdfOpOutput::Artifact { locator })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_stored_as_configured() {
        let port = CommandPdfOpsPort::new("/bin/true");
        assert_eq!(port.command, "/bin/true");
    }
}
