// Core agent logic module

pub mod agent;
pub mod collector;
pub mod config;
pub mod hyperv;
pub mod metrics;
pub mod reporter;
pub mod runtime;

// Re-exports for cleaner imports
pub use agent::{collect_once, Agent, HyperVAgent, AGENT_GUID};
pub use collector::{HostCollector, HostTotals, VmReport};
pub use config::AgentConfig;
pub use metrics::{Metric, MetricBatch, MetricSink};
pub use reporter::{MetricReporter, PlatformApiReporter, StdoutReporter};
pub use runtime::{AgentRuntime, Schedule};
