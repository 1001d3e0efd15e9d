//! Tracing initialisation for the `docflow-worker` binary (`spec.md` §4.I).
//!
//! Purpose: mirror the corpus's `tracing_subscriber::{fmt, EnvFilter}`
//! bootstrap in its binary entry point, adding a `DOCFLOW_LOG_FORMAT` switch
//! between a human-readable layer for local development and a JSON layer for
//! production log shipping.

use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

/// Output format for the `fmt` layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, ANSI-coloured output for local development.
    Pretty,
    /// Line-delimited JSON, one event per line, for log shipping.
    Json,
}

impl LogFormat {
    /// Read `DOCFLOW_LOG_FORMAT` (`"json"` or `"pretty"`, case-insensitive),
    /// defaulting to [`LogFormat::Pretty`] for anything else or if unset.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("DOCFLOW_LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Initialise the global tracing subscriber. Safe to call more than once;
/// later calls are no-ops, matching the corpus's tolerance of a failed
/// `try_init` (it only ever runs once per process in practice, but tests
/// that spin up multiple fixtures must not panic on the second call).
pub fn init(format: LogFormat) {
    let env_filter = EnvFilter::from_default_env();
    let result = match format {
        LogFormat::Json => fmt().with_env_filter(env_filter).json().try_init(),
        LogFormat::Pretty => fmt().with_env_filter(env_filter).try_init(),
    };
    if let Err(err) = result {
        warn!(error = %err, "tracing init failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_env_defaults_to_pretty() {
        std::env::remove_var("DOCFLOW_LOG_FORMAT");
        assert_eq!(LogFormat::from_env(), LogFormat::Pretty);
    }

    #[test]
    fn json_env_value_selects_json() {
        // SAFETY: test runs single-threaded within this process's test
        // harness and restores the variable before returning.
        unsafe {
            std::env::set_var("DOCFLOW_LOG_FORMAT", "JSON");
        }
        assert_eq!(LogFormat::from_env(), LogFormat::Json);
        unsafe {
            std::env::remove_var("DOCFLOW_LOG_FORMAT");
        }
    }
}
