//! Plugin-host facing agent surface.

use std::time::Duration;

use crate::core::collector::HostCollector;
use crate::core::hyperv::ManagementClient;
use crate::core::metrics::{MetricBatch, MetricSink};

/// Identifier the metrics backend uses to tell plugins apart
pub const AGENT_GUID: &str = "org.beyondcomputing.newrelic.hyperv";

/// An agent the runtime polls on an interval
pub trait Agent: Send + Sync {
    /// Unique plugin identifier
    fn guid(&self) -> &str;

    /// Semantic version of the plugin
    fn version(&self) -> &str;

    /// Human-readable label of this instance
    fn agent_name(&self) -> &str;

    /// Collect once and report through `sink`. Must not fail or panic outward.
    fn poll_cycle(&self, sink: &mut dyn MetricSink);
}

/// Agent monitoring one Hyper-V host
pub struct HyperVAgent<C = Box<dyn ManagementClient>> {
    collector: HostCollector<C>,
}

impl<C: ManagementClient + 'static> HyperVAgent<C> {
    /// `name` is both the display label and the host address queried.
    pub fn new<S: Into<String>>(name: S, client: C) -> Self {
        Self {
            collector: HostCollector::new(name, client),
        }
    }

    pub fn with_call_timeout(self, timeout: Duration) -> Self {
        Self {
            collector: self.collector.with_call_timeout(timeout),
        }
    }

    pub fn collector(&self) -> &HostCollector<C> {
        &self.collector
    }
}

impl<C: ManagementClient + 'static> Agent for HyperVAgent<C> {
    fn guid(&self) -> &str {
        AGENT_GUID
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn agent_name(&self) -> &str {
        self.collector.host()
    }

    fn poll_cycle(&self, sink: &mut dyn MetricSink) {
        self.collector.poll_cycle(sink);
    }
}

/// Run a single cycle of `agent` into a fresh batch
pub fn collect_once(agent: &dyn Agent) -> MetricBatch {
    let mut batch = MetricBatch::new();
    agent.poll_cycle(&mut batch);
    batch
}
