//! Tokio runtime that schedules poll cycles for every configured agent.
//!
//! Each agent gets its own task ticking on the poll interval. Cycles run on
//! the blocking pool since the management interface is synchronous, and a
//! cycle that outlives the timeout is abandoned rather than overlapped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::core::agent::{collect_once, Agent};
use crate::core::metrics::MetricBatch;
use crate::core::reporter::MetricReporter;

/// How long shutdown waits for cycles still running on the blocking pool
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Timing shared by every agent task
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub poll_interval: Duration,
    pub cycle_timeout: Duration,
}

/// Wrapper around the Tokio runtime driving the agents.
pub struct AgentRuntime {
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,

    tasks: Vec<JoinHandle<()>>,

    runtime: tokio::runtime::Runtime,
}

impl AgentRuntime {
    /// Create the runtime and spawn one task per agent.
    pub fn start(
        agents: Vec<Arc<dyn Agent>>,
        reporter: Arc<dyn MetricReporter>,
        schedule: Schedule,
    ) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .thread_name("agent-worker")
            .build()?;

        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let tasks = agents
            .into_iter()
            .map(|agent| {
                log::info!(
                    "Scheduling agent '{}' every {}s",
                    agent.agent_name(),
                    schedule.poll_interval.as_secs()
                );
                runtime.spawn(agent_task(
                    agent,
                    reporter.clone(),
                    schedule,
                    shutdown_tx.subscribe(),
                ))
            })
            .collect();

        Ok(Self {
            shutdown_tx,
            tasks,
            runtime,
        })
    }

    /// Sender that stops every agent task when signalled
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn shutdown(&self) {
        // send() only fails when every task already exited
        let _ = self.shutdown_tx.send(());
    }

    /// Block until every agent task has stopped.
    pub fn wait(self) {
        self.wait_with_grace(SHUTDOWN_GRACE);
    }

    /// Block until every agent task has stopped, then give cycles still
    /// stuck on the blocking pool at most `grace` before abandoning them.
    pub fn wait_with_grace(self, grace: Duration) {
        let AgentRuntime { tasks, runtime, .. } = self;
        runtime.block_on(async move {
            for task in tasks {
                if let Err(e) = task.await {
                    log::error!("Agent task failed: {}", e);
                }
            }
        });
        runtime.shutdown_timeout(grace);
    }
}

/// Poll loop for a single agent.
pub async fn agent_task(
    agent: Arc<dyn Agent>,
    reporter: Arc<dyn MetricReporter>,
    schedule: Schedule,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(schedule.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // A cycle that exceeded its timeout and has not returned yet
    let mut in_flight: Option<JoinHandle<MetricBatch>> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(handle) = in_flight.take() {
                    if !handle.is_finished() {
                        log::warn!(
                            "Previous cycle for '{}' is still running, skipping this one",
                            agent.agent_name()
                        );
                        in_flight = Some(handle);
                        continue;
                    }
                    log::debug!("Discarding late results for '{}'", agent.agent_name());
                }

                let cycle_agent = agent.clone();
                let mut handle =
                    tokio::task::spawn_blocking(move || collect_once(cycle_agent.as_ref()));

                match tokio::time::timeout(schedule.cycle_timeout, &mut handle).await {
                    Ok(Ok(batch)) => deliver(agent.clone(), reporter.clone(), batch).await,
                    Ok(Err(e)) => {
                        log::error!("Poll cycle for '{}' failed: {}", agent.agent_name(), e);
                    }
                    Err(_) => {
                        log::warn!(
                            "Poll cycle for '{}' exceeded {}s, results will be discarded",
                            agent.agent_name(),
                            schedule.cycle_timeout.as_secs()
                        );
                        in_flight = Some(handle);
                    }
                }
            }
            _ = shutdown.recv() => {
                log::info!("Agent '{}' shutting down", agent.agent_name());
                break;
            }
        }
    }
}

async fn deliver(agent: Arc<dyn Agent>, reporter: Arc<dyn MetricReporter>, batch: MetricBatch) {
    if batch.is_empty() {
        log::debug!("No metrics to report for '{}'", agent.agent_name());
        return;
    }

    let name = agent.agent_name().to_string();
    let result =
        tokio::task::spawn_blocking(move || reporter.flush(agent.as_ref(), &batch)).await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Unable to report metrics for '{}': {}", name, e),
        Err(e) => log::error!("Metric delivery for '{}' failed: {}", name, e),
    }
}
