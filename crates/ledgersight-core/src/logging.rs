//! Structured logging setup.
//!
//! Thin wrapper over `tracing-subscriber` with environment presets:
//! human-readable output in development, JSON lines in production for
//! log aggregation.

use serde::{Deserialize, Serialize};

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default level directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Include the event target (module path) in output.
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            with_target: true,
        }
    }
}

impl LogConfig {
    /// Development preset: human-readable, debug level.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            json: false,
            with_target: true,
        }
    }

    /// Production preset: JSON lines, info level.
    #[must_use]
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            with_target: false,
        }
    }

    /// Install the global subscriber. Idempotent: if a subscriber is
    /// already installed (e.g. by a test harness), this is a no-op.
    pub fn init(&self) {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(self.level.clone()));

        if self.json {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(self.with_target)
                .json()
                .try_init();
        } else {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(self.with_target)
                .try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LogConfig::development();
        config.init();
        config.init();
    }

    #[test]
    fn test_presets() {
        assert!(!LogConfig::development().json);
        assert!(LogConfig::production().json);
    }
}
