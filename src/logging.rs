//! # Tracing Module
//!
//! Environment-aware console logging using the tracing ecosystem.
//! Designed for containerized applications where logs should go to stdout/stderr.
//!
//! This module provides:
//! - Simple console-only logging (container-friendly)
//! - Environment-based log level configuration
//! - TTY-aware ANSI color output
//! - Optional JSON output for log aggregation pipelines
//!
//! ## Configuration
//!
//! ```bash
//! # Environment detection (first match wins)
//! export STOREFRONT_ENV=production
//! export APP_ENV=production
//!
//! # Override the computed log level entirely
//! export RUST_LOG=storefront_core=debug
//!
//! # Switch to JSON output (for log shippers)
//! export STOREFRONT_LOG_FORMAT=json
//! ```

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Detect the runtime environment from environment variables
fn get_environment() -> String {
    std::env::var("STOREFRONT_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .or_else(|_| std::env::var("ENVIRONMENT"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Compute the default log level for an environment.
///
/// `RUST_LOG` always wins when set.
fn get_log_level(environment: &str) -> String {
    if let Ok(level) = std::env::var("RUST_LOG") {
        return level;
    }

    match environment {
        "production" | "staging" => "info".to_string(),
        "test" => "warn".to_string(),
        _ => "debug".to_string(),
    }
}

/// Initialize console tracing for the process.
///
/// Safe to call multiple times; only the first call installs the subscriber.
/// Subsequent calls (including from parallel tests) are no-ops.
pub fn init_tracing() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        // Determine if we're in a TTY for ANSI color support
        let use_ansi = std::io::stdout().is_terminal();

        let json_output = std::env::var("STOREFRONT_LOG_FORMAT")
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let initialized = if json_output {
            let json_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(EnvFilter::new(&log_level));
            tracing_subscriber::registry().with(json_layer).try_init()
        } else {
            let console_layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(EnvFilter::new(&log_level));
            tracing_subscriber::registry()
                .with(console_layer)
                .try_init()
        };

        if initialized.is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                log_level = %log_level,
                ansi_colors = use_ansi,
                json_output = json_output,
                "Console logging initialized"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_defaults_by_environment() {
        // RUST_LOG may be set in CI; only assert the fallback path when absent
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(get_log_level("production"), "info");
            assert_eq!(get_log_level("staging"), "info");
            assert_eq!(get_log_level("test"), "warn");
            assert_eq!(get_log_level("development"), "debug");
        }
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
