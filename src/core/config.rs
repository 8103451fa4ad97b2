use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AgentError;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_CYCLE_TIMEOUT_SECS: u64 = 45;
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_ENDPOINT: &str = "https://platform-api.newrelic.com/platform/v1/metrics";

/// One monitored Hyper-V host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEntry {
    /// Host name or address; also the label shown in the backend
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Upper bound on a single poll cycle
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,
    /// Upper bound on a single management call
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Without a license key metrics are written to stdout
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_cycle_timeout_secs() -> u64 {
    DEFAULT_CYCLE_TIMEOUT_SECS
}

fn default_call_timeout_secs() -> u64 {
    DEFAULT_CALL_TIMEOUT_SECS
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agents: Vec::new(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            cycle_timeout_secs: DEFAULT_CYCLE_TIMEOUT_SECS,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            license_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl AgentConfig {
    /// Load from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_json_str(&data)
            .with_context(|| format!("Invalid config file: {:?}", path))?;

        Ok(config)
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        let config: AgentConfig =
            serde_json::from_str(data).with_context(|| "Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let data =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        fs::write(path, data)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().with_context(|| "Could not determine config directory")?;

        Ok(config_dir.join("hyperv-agent").join("plugin.json"))
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.agents.is_empty() {
            return Err(AgentError::config("at least one agent must be configured"));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            let name = agent.name.trim();
            if name.is_empty() {
                return Err(AgentError::config("agent name must not be empty"));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(AgentError::config(format!(
                    "agent '{}' is configured more than once",
                    name
                )));
            }
        }

        if self.poll_interval_secs == 0 {
            return Err(AgentError::config("poll_interval_secs must be at least 1"));
        }

        if self.cycle_timeout_secs == 0 || self.cycle_timeout_secs > self.poll_interval_secs {
            return Err(AgentError::config(format!(
                "cycle_timeout_secs must be between 1 and poll_interval_secs ({})",
                self.poll_interval_secs
            )));
        }

        if self.call_timeout_secs == 0 || self.call_timeout_secs > self.cycle_timeout_secs {
            return Err(AgentError::config(format!(
                "call_timeout_secs must be between 1 and cycle_timeout_secs ({})",
                self.cycle_timeout_secs
            )));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn license_key(&self) -> Option<&str> {
        self.license_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name.trim()).collect()
    }
}
