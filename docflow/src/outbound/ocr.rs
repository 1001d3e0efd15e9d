//! Command-line-backed [`OcrPort`] (`spec.md` §6).
//!
//! Both concrete engines (classic, AI) shell out to an external binary the
//! same way [`super::process::CommandConversionPort`] does for document
//! conversion; the two are distinguished only by which binary they invoke
//! and the `engine` label they report, since the worker's fallback
//! behaviour lives in `worker`, not here.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::ports::{OcrError, OcrOutcome, OcrPort};

/// Extracts text by invoking an external binary once per call.
pub struct CommandOcrPort {
    command: String,
    engine: String,
}

impl CommandOcrPort {
    /// Build a port that shells out to `command`, tagging its successful
    /// outcomes with `engine` (e.g. `"classic"`, `"ai_vision"`).
    #[must_use]
    pub fn new(command: impl Into<String>, engine: impl Into<String>) -> Self {
        Self { command: command.into(), engine: engine.into() }
    }
}

#[async_trait]
impl OcrPort for CommandOcrPort {
    async fn extract_text(
        &self,
        input_path: &str,
        language: &str,
        deadline: Duration,
    ) -> Result<OcrOutcome, OcrError> {
        let child = Command::new(&self.command)
            .arg("extract")
            .arg("--language")
            .arg(language)
            .arg("--input")
            .arg(input_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OcrError::Unavailable { message: e.to_string() })?;

        let output = tokio::time::timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| OcrError::Timeout)?
            .map_err(|e| OcrError::Internal { message: e.to_string() })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(OcrError::Internal { message: stderr });
        }

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| OcrError::Internal { message: format!("malformed engine output: {e}") })?;
        let text = parsed.get("text").and_then(serde_json::Value::as_str).unwrap_or_default().to_owned();
        let confidence = parsed.get("confidence").and_then(serde_json::Value::as_f64).unwrap_or(0.0);

        Ok(OcrOutcome { text, confidence, engine: self.engine.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_label_is_reported_as_configured() {
        let port = CommandOcrPort::new("/bin/true", "ai_vision");
        assert_eq!(port.engine, "ai_vision");
    }
}
