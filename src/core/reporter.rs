//! Delivery of flushed metric batches.

use std::io::Write;
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::core::agent::Agent;
use crate::core::metrics::MetricBatch;
use crate::error::{AgentError, Result};

/// Delivers the metrics of one cycle
pub trait MetricReporter: Send + Sync {
    fn flush(&self, agent: &dyn Agent, batch: &MetricBatch) -> Result<()>;
}

/// Writes each batch as one JSON line on stdout
#[derive(Debug, Default)]
pub struct StdoutReporter;

impl StdoutReporter {
    pub fn new() -> Self {
        Self
    }
}

impl MetricReporter for StdoutReporter {
    fn flush(&self, agent: &dyn Agent, batch: &MetricBatch) -> Result<()> {
        let line = json!({
            "agent": agent.agent_name(),
            "guid": agent.guid(),
            "version": agent.version(),
            "timestamp": batch.timestamp,
            "metrics": batch.metrics,
        });

        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "{}", serde_json::to_string(&line)?)?;
        out.flush()?;
        Ok(())
    }
}

/// Posts batches to the New Relic Platform metrics API
pub struct PlatformApiReporter {
    client: reqwest::blocking::Client,
    endpoint: String,
    license_key: String,
    host: String,
    duration_secs: u64,
}

impl PlatformApiReporter {
    pub fn new(endpoint: &str, license_key: &str, poll_interval: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(concat!("hyperv-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let host = sysinfo::System::host_name().unwrap_or_else(|| "Unknown".to_string());

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            license_key: license_key.to_string(),
            host,
            duration_secs: poll_interval.as_secs().max(1),
        })
    }

    /// Request body for one agent's batch
    pub fn payload(&self, agent: &dyn Agent, batch: &MetricBatch) -> Value {
        let mut metrics = Map::new();
        for metric in &batch.metrics {
            metrics.insert(wire_name(&metric.name, &metric.unit), json!(metric.value));
        }

        json!({
            "agent": {
                "host": self.host,
                "pid": std::process::id(),
                "version": agent.version(),
            },
            "components": [{
                "name": agent.agent_name(),
                "guid": agent.guid(),
                "duration": self.duration_secs,
                "metrics": metrics,
            }],
        })
    }
}

impl MetricReporter for PlatformApiReporter {
    fn flush(&self, agent: &dyn Agent, batch: &MetricBatch) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-License-Key", &self.license_key)
            .header("Accept", "application/json")
            .json(&self.payload(agent, batch))
            .send()?;

        if !response.status().is_success() {
            return Err(AgentError::delivery(format!(
                "platform API returned status {}: {}",
                response.status(),
                response.text().unwrap_or_default()
            )));
        }

        log::debug!(
            "Delivered {} metrics for '{}'",
            batch.len(),
            agent.agent_name()
        );
        Ok(())
    }
}

/// `Component/{name}[{unit}]`
pub fn wire_name(name: &str, unit: &str) -> String {
    format!("Component/{}[{}]", name, unit)
}
