//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` formatter filtered by `EnvFilter`,
//! with optional JSON output for containers.

use crate::domain::SwapError;
use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Log level filter (trace, debug, info, warn, error) or a full
    /// `EnvFilter` directive.
    pub log_level: String,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SWAP_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `SWAP_JSON_LOGS`: Enable JSON logs (default: false)
    pub fn from_env() -> Self {
        Self {
            log_level: env::var("SWAP_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("SWAP_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` when a subscriber is already installed, so repeated
/// calls from tests or embedding applications are harmless.
pub fn init_tracing(config: &TelemetryConfig) -> Result<bool, SwapError> {
    let env_filter = EnvFilter::try_new(&config.log_level).map_err(|e| {
        SwapError::InvalidParameter(format!("log filter '{}': {e}", config.log_level))
    })?;

    let result = if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    };

    match result {
        Ok(()) => {
            tracing::info!(
                level = %config.log_level,
                json = config.json_logs,
                "[swap] logging initialized"
            );
            Ok(true)
        }
        Err(e) => {
            tracing::debug!(error = %e, "[swap] subscriber already installed");
            Ok(false)
        }
    }
}
