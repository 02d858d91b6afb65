//! Logging setup
//!
//! Queue operators log through `tracing`. Embedding executors normally install
//! their own subscriber; this module is for binaries, benches and tests that
//! want one configured from the environment.
//!
//! # Usage
//! ```no_run
//! use queue_ops::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::from_env());
//! ```

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Reads `QUEUE_OPS_LOG_LEVEL` and `QUEUE_OPS_LOG_JSON`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(level) = std::env::var("QUEUE_OPS_LOG_LEVEL") {
            config.level = LogLevel::parse(&level);
        }
        if let Ok(json) = std::env::var("QUEUE_OPS_LOG_JSON") {
            config.json = matches!(json.as_str(), "1" | "true" | "yes");
        }
        config
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "queue_ops={0},queue_ops_gpu={0}",
                self.level.as_str()
            ))
        })
    }
}

/// Install a global subscriber. Returns `false` if one was already set,
/// which makes repeated calls from tests harmless.
pub fn init_logging(config: &LogConfig) -> bool {
    let layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(config.ansi)
            .with_target(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(config.filter())
        .with(layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!(LogLevel::parse("DEBUG"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("bogus"), LogLevel::Info);
        assert_eq!(LogLevel::Trace.as_str(), "trace");
    }

    #[test]
    fn test_init_is_repeatable() {
        let config = LogConfig {
            ansi: false,
            ..Default::default()
        };
        init_logging(&config);
        assert!(!init_logging(&config));
    }
}
