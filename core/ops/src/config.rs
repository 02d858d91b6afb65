// queue-ops/core/ops/src/config.rs

// Workspace configuration
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Workspace configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Name used in logs
    pub name: String,

    /// Close every registered queue when the workspace is reset
    pub close_queues_on_reset: bool,

    /// Timeout applied to enqueue/dequeue operators that carry no
    /// `timeout_secs` argument. `None`, non-positive and out-of-range
    /// values block without limit.
    pub operator_timeout_secs: Option<f64>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            close_queues_on_reset: true,
            operator_timeout_secs: None,
        }
    }
}

impl WorkspaceConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Build from `QUEUE_OPS_WORKSPACE`, `QUEUE_OPS_CLOSE_ON_RESET` and
    /// `QUEUE_OPS_OPERATOR_TIMEOUT_SECS`, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(name) = std::env::var("QUEUE_OPS_WORKSPACE") {
            config.name = name;
        }
        if let Ok(v) = std::env::var("QUEUE_OPS_CLOSE_ON_RESET") {
            config.close_queues_on_reset = !matches!(v.as_str(), "0" | "false" | "no");
        }
        if let Some(secs) = std::env::var("QUEUE_OPS_OPERATOR_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
        {
            config.operator_timeout_secs = Some(secs);
        }
        config
    }

    pub fn operator_timeout(&self) -> Option<Duration> {
        self.operator_timeout_secs
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}
