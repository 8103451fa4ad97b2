use serde::{Deserialize, Serialize};

pub const UNIT_PROCS: &str = "procs";
pub const UNIT_PERCENT: &str = "percent";
pub const UNIT_MIBIBYTES: &str = "mibibytes";
pub const UNIT_ERRORS: &str = "errors";
pub const UNIT_VMS: &str = "vms";
pub const UNIT_DAYS: &str = "days";
pub const UNIT_HOURS: &str = "hours";
pub const UNIT_MINUTES: &str = "minutes";

/// A single named, unit-tagged reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub unit: String,
    pub value: f64,
}

/// Receives metrics as a poll cycle produces them
pub trait MetricSink {
    fn report_metric(&mut self, name: &str, unit: &str, value: f64);
}

/// All metrics produced by one poll cycle, flushed together
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricBatch {
    pub timestamp: i64, // Unix timestamp
    pub metrics: Vec<Metric>,
}

impl MetricBatch {
    pub fn new() -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            metrics: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// First metric with this name and unit
    pub fn get(&self, name: &str, unit: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|m| m.name == name && m.unit == unit)
            .map(|m| m.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.iter().any(|m| m.name == name)
    }
}

impl MetricSink for MetricBatch {
    fn report_metric(&mut self, name: &str, unit: &str, value: f64) {
        self.metrics.push(Metric {
            name: name.to_string(),
            unit: unit.to_string(),
            value,
        });
    }
}

/// Make a VM element name safe to embed as one metric path segment.
///
/// `/` separates segments and `[`/`]` delimit the unit on the wire.
pub fn sanitize_segment(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '[' | ']' => '_',
            c => c,
        })
        .collect()
}

/// `vms/{name}/{kind}`
pub fn vm_metric(vm_name: &str, kind: &str) -> String {
    format!("vms/{}/{}", sanitize_segment(vm_name), kind)
}

/// `replication/{role}/{name}/health`
pub fn replication_metric(role: &str, vm_name: &str) -> String {
    format!("replication/{}/{}/health", role, sanitize_segment(vm_name))
}

/// `host/{kind}`
pub fn host_metric(kind: &str) -> String {
    format!("host/{}", kind)
}
