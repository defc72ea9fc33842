//! Log sink used by the engine, and subscriber setup for the binary.
//!
//! The engine reports through [`LogSink`] so an embedding application can route
//! messages wherever it wants. [`TracingLog`] is the default and forwards to
//! `tracing`, tagging each message with the command id.
//!
//! Level priority for the binary:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `CMDRACK_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `info`

use tracing::Level;
use tracing_subscriber::fmt;

/// Leveled text sink for engine diagnostics.
pub trait LogSink: Send + Sync {
    fn info(&self, id: &str, message: &str);
    fn debug(&self, id: &str, message: &str);
    fn error(&self, id: &str, message: &str);
}

/// Forwards engine messages to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl LogSink for TracingLog {
    fn info(&self, id: &str, message: &str) {
        tracing::info!(command = %id, "{}", message);
    }

    fn debug(&self, id: &str, message: &str) {
        tracing::debug!(command = %id, "{}", message);
    }

    fn error(&self, id: &str, message: &str) {
        tracing::error!(command = %id, "{}", message);
    }
}

/// Initialise the global subscriber. Call once at startup.
///
/// Logs go to stderr so stdout carries only command output.
pub fn init_logging(cli_level: Option<Level>) {
    let level = cli_level
        .or_else(|| {
            std::env::var("CMDRACK_LOG")
                .ok()
                .and_then(|s| parse_level_str(&s))
        })
        .unwrap_or(Level::INFO);

    fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
