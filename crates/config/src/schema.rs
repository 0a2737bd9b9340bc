/// Config schema types (process supervision, dispatch, plugins, options).
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root of `chathook.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub process: ProcessConfig,
    pub dispatch: DispatchConfig,
    pub plugins: PluginsConfig,
    /// Plugin option store (`webbrowser = "firefox"`, ...).
    pub options: BTreeMap<String, String>,
}

/// Limits applied to every spawned job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Timeout used when a plugin passes zero. Zero here means no timeout.
    pub default_timeout_ms: u64,
    /// Bytes captured per stream; the rest is drained and dropped.
    pub output_limit: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 0,
            output_limit: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum nesting of events published from inside handlers.
    pub max_depth: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_depth: 16 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Bundled plugins that should not be loaded at startup.
    pub disabled: Vec<String>,
}

impl PluginsConfig {
    pub fn is_enabled(&self, name: &str) -> bool {
        !self.disabled.iter().any(|d| d == name)
    }
}
