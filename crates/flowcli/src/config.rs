use anyhow::{Context, Result};
use flownodes::{BridgeConfig, ScriptConfig};
use flowruntime::RuntimeConfig;
use serde::Deserialize;
use std::path::Path;

/// `flow.toml` layout; every section is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub runtime: RuntimeConfig,
    pub bridge: BridgeConfig,
    pub script: ScriptConfig,
    /// How long `run` waits for the bridge before starting
    pub connect_wait_ms: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            bridge: BridgeConfig::default(),
            script: ScriptConfig::default(),
            connect_wait_ms: 2000,
        }
    }
}

impl CliConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }
}
