use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, CaptureResult};

/// Configuration shared by every capture store created from one context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity used for lazily created stores and for `reset` when no
    /// explicit size was ever configured.
    pub default_capacity: usize,
    /// Number of pending items the async hand-off channel holds before
    /// producers wait.
    pub queue_bound: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_capacity: 6,
            queue_bound: 1024,
        }
    }
}

impl StoreConfig {
    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(input: &str) -> CaptureResult<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| CaptureError::Config(e.to_string()))?;
        if config.queue_bound == 0 {
            return Err(CaptureError::Config("queue_bound must be at least 1".into()));
        }
        Ok(config)
    }
}
