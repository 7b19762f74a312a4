//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables shared by every scope of a running flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Capacity of each component's pending-update queue.
    #[serde(default = "default_update_queue_capacity")]
    pub update_queue_capacity: usize,

    /// Poll interval for `import.file` when `poll_frequency` is not set.
    #[serde(default = "default_import_poll_interval_ms")]
    pub import_poll_interval_ms: u64,
}

fn default_update_queue_capacity() -> usize {
    16
}

fn default_import_poll_interval_ms() -> u64 {
    1000
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            update_queue_capacity: default_update_queue_capacity(),
            import_poll_interval_ms: default_import_poll_interval_ms(),
        }
    }
}

impl FlowConfig {
    pub fn import_poll_interval(&self) -> Duration {
        Duration::from_millis(self.import_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FlowConfig::default();
        assert_eq!(config.update_queue_capacity, 16);
        assert_eq!(config.import_poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_deserialize() {
        let config: FlowConfig =
            serde_json::from_str(r#"{ "update_queue_capacity": 4 }"#).unwrap();
        assert_eq!(config.update_queue_capacity, 4);
        assert_eq!(config.import_poll_interval_ms, 1000);
    }
}
