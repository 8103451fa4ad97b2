//! Poll-cycle orchestration for one Hyper-V host.
//!
//! Enumerates the host's VMs, derives per-VM metrics and folds them into
//! host-level totals. A VM whose data cannot be fetched in time is logged and
//! left out of every metric; only a failed inventory or service lookup ends
//! the cycle. Every management call runs under its own deadline.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::core::hyperv::{
    classify_health, classify_replication_health, ManagementClient, ManagementServiceHandle,
    ReplicationMode, SummaryInformation, VirtualMachineRecord, VirtualSystemSettings,
    SUMMARY_FIELD_CODES,
};
use crate::core::metrics::*;
use crate::error::{AgentError, Result};

const MS_PER_MINUTE: u64 = 1000 * 60;
const MS_PER_HOUR: u64 = MS_PER_MINUTE * 60;
const MS_PER_DAY: u64 = MS_PER_HOUR * 24;
const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Host-level running totals for one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostTotals {
    pub vm_count: u64,
    pub running_vms: u64,
    pub number_of_processors: u64,
    pub processor_load: u64,
    pub memory_used_mib: u64,
    pub health_errors: i64,
    pub replication_errors: i64,
}

impl HostTotals {
    /// Share of host physical memory assigned to running VMs
    pub fn memory_used_percent(&self, capacity_bytes: u64) -> Option<f64> {
        if capacity_bytes == 0 {
            return None;
        }
        let used_bytes = self.memory_used_mib as f64 * BYTES_PER_MIB as f64;
        Some(used_bytes / capacity_bytes as f64 * 100.0)
    }

    fn report(&self, sink: &mut dyn MetricSink, capacity_bytes: Option<u64>) {
        sink.report_metric(
            &host_metric("numberofprocessors"),
            UNIT_PROCS,
            self.number_of_processors as f64,
        );
        sink.report_metric(
            &host_metric("processorload"),
            UNIT_PERCENT,
            self.processor_load as f64,
        );
        sink.report_metric(
            &host_metric("vms/memoryused"),
            UNIT_MIBIBYTES,
            self.memory_used_mib as f64,
        );
        if let Some(percent) = capacity_bytes.and_then(|c| self.memory_used_percent(c)) {
            sink.report_metric(&host_metric("vms/memoryused"), UNIT_PERCENT, percent);
        }
        sink.report_metric(
            &host_metric("vms/health"),
            UNIT_ERRORS,
            self.health_errors as f64,
        );
        sink.report_metric(
            &host_metric("vms/replicationhealth"),
            UNIT_ERRORS,
            self.replication_errors as f64,
        );
        sink.report_metric(&host_metric("vms/count"), UNIT_VMS, self.vm_count as f64);
        sink.report_metric(&host_metric("vms/running"), UNIT_VMS, self.running_vms as f64);
    }
}

/// Everything one VM contributes to a cycle, built before anything is emitted
#[derive(Debug, Clone, Default)]
pub struct VmReport {
    pub metrics: MetricBatch,
    pub running: bool,
    pub number_of_processors: u16,
    pub processor_load: u16,
    pub memory_used_mib: u64,
    pub health: i32,
    pub replication_health: i32,
}

impl VmReport {
    /// Derive a VM's metrics from its inventory row and summary entry.
    pub fn derive(vm: &VirtualMachineRecord, summary: &SummaryInformation) -> Self {
        let name = vm.element_name.as_str();
        let mut metrics = MetricBatch::default();

        metrics.report_metric(
            &vm_metric(name, "numberofprocessors"),
            UNIT_PROCS,
            summary.number_of_processors as f64,
        );

        let running = summary.is_running();
        if running {
            metrics.report_metric(
                &vm_metric(name, "processorload"),
                UNIT_PERCENT,
                summary.processor_load as f64,
            );
            metrics.report_metric(
                &vm_metric(name, "memoryused"),
                UNIT_MIBIBYTES,
                summary.memory_usage_mib as f64,
            );
        }

        let health = classify_health(vm.health_state);
        metrics.report_metric(&vm_metric(name, "health"), UNIT_ERRORS, health.value as f64);

        let mode = ReplicationMode::from_code(vm.replication_mode);
        let replication = classify_replication_health(vm.replication_health);
        match mode {
            ReplicationMode::Primary => {
                log::info!("Primary Node {} - Health: {}", name, replication.description);
                metrics.report_metric(
                    &replication_metric("primary", name),
                    UNIT_ERRORS,
                    replication.value as f64,
                );
            }
            m if m.is_secondary() => {
                log::info!("Secondary Node {} - Health: {}", name, replication.description);
                metrics.report_metric(
                    &replication_metric("secondary", name),
                    UNIT_ERRORS,
                    replication.value as f64,
                );
            }
            ReplicationMode::Unknown(code) => {
                log::warn!("VM '{}' reports unknown replication mode {}", name, code);
            }
            _ => {}
        }

        metrics.report_metric(
            &vm_metric(name, "uptimeindays"),
            UNIT_DAYS,
            (vm.on_time_ms / MS_PER_DAY) as f64,
        );
        metrics.report_metric(
            &vm_metric(name, "uptimeinhours"),
            UNIT_HOURS,
            (vm.on_time_ms / MS_PER_HOUR) as f64,
        );
        metrics.report_metric(
            &vm_metric(name, "uptimeinminutes"),
            UNIT_MINUTES,
            (vm.on_time_ms / MS_PER_MINUTE) as f64,
        );

        Self {
            metrics,
            running,
            number_of_processors: summary.number_of_processors,
            processor_load: if running { summary.processor_load } else { 0 },
            memory_used_mib: if running { summary.memory_usage_mib } else { 0 },
            health: health.value,
            replication_health: replication.value,
        }
    }

    fn commit(self, sink: &mut dyn MetricSink, totals: &mut HostTotals) {
        for metric in &self.metrics.metrics {
            sink.report_metric(&metric.name, &metric.unit, metric.value);
        }

        totals.vm_count += 1;
        totals.number_of_processors += self.number_of_processors as u64;
        if self.running {
            totals.running_vms += 1;
            totals.processor_load += self.processor_load as u64;
            totals.memory_used_mib += self.memory_used_mib;
        }
        totals.health_errors += self.health as i64;
        totals.replication_errors += self.replication_health as i64;
    }
}

/// Default bound on a single management call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Collects metrics for a single Hyper-V host
pub struct HostCollector<C> {
    host: String,
    client: Arc<C>,
    call_timeout: Duration,
}

impl<C: ManagementClient + 'static> HostCollector<C> {
    pub fn new<S: Into<String>>(host: S, client: C) -> Self {
        Self {
            host: host.into(),
            client: Arc::new(client),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Bound every management call of a cycle by `timeout`.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Run one full cycle and hand its metrics to `sink`.
    ///
    /// Never fails: a cycle that cannot complete is logged and reports nothing.
    pub fn poll_cycle(&self, sink: &mut dyn MetricSink) {
        log::info!("Collecting information from server: {}", self.host);

        match panic::catch_unwind(AssertUnwindSafe(|| self.collect())) {
            Ok(Ok(batch)) => {
                log::debug!("Host '{}' produced {} metrics", self.host, batch.len());
                for metric in &batch.metrics {
                    sink.report_metric(&metric.name, &metric.unit, metric.value);
                }
            }
            Ok(Err(e)) => {
                log::error!(
                    "Unable to fetch information from the Hyper-V host '{}': {}",
                    self.host,
                    e
                );
            }
            Err(payload) => {
                log::error!(
                    "Poll cycle for Hyper-V host '{}' aborted: {}",
                    self.host,
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    /// Run one cycle, returning its metrics or the cycle-fatal error.
    pub fn collect(&self) -> Result<MetricBatch> {
        let inventory = self.call("inventory query", |client, host| {
            client.fetch_inventory(host)
        })?;
        let service = self.call("management service lookup", |client, host| {
            client.fetch_management_service(host)
        })?;

        let capacity = match self.call("memory capacity query", |client, host| {
            client.fetch_host_memory_capacity(host)
        }) {
            Ok(0) => {
                log::warn!("Host '{}' reported zero memory capacity", self.host);
                None
            }
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!("Unable to read memory capacity of '{}': {}", self.host, e);
                None
            }
        };

        let mut resolved = Vec::new();
        for vm in inventory.iter().filter(|vm| !vm.is_host_record()) {
            let identity = vm.identity_path.clone();
            let settings = self.call("settings query", move |client, host| {
                client.fetch_settings(host, &identity)
            });
            match settings {
                Ok(Some(settings)) => resolved.push((vm, settings)),
                Ok(None) => log::warn!(
                    "No settings found for VM '{}' on host '{}', skipping",
                    vm.element_name,
                    self.host
                ),
                Err(e) => self.log_vm_failure(vm, &e),
            }
        }

        let summaries = self.fetch_summaries(&service, &resolved);

        let mut batch = MetricBatch::new();
        let mut totals = HostTotals::default();

        for ((vm, _), summary) in resolved.iter().zip(summaries) {
            let summary = match summary {
                Ok(summary) => summary,
                Err(e) => {
                    self.log_vm_failure(vm, &e);
                    continue;
                }
            };
            match panic::catch_unwind(AssertUnwindSafe(|| VmReport::derive(vm, &summary))) {
                Ok(report) => report.commit(&mut batch, &mut totals),
                Err(payload) => {
                    log::error!(
                        "Collection of VM '{}' on host '{}' panicked: {}",
                        vm.element_name,
                        self.host,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }

        totals.report(&mut batch, capacity);
        Ok(batch)
    }

    /// Summaries for every resolved VM, in order.
    ///
    /// One batched call covers the whole host. When it fails each VM is
    /// asked on its own so a single bad VM only loses its own entry.
    fn fetch_summaries(
        &self,
        service: &ManagementServiceHandle,
        resolved: &[(&VirtualMachineRecord, VirtualSystemSettings)],
    ) -> Vec<Result<SummaryInformation>> {
        if resolved.is_empty() {
            return Vec::new();
        }

        let paths = resolved
            .iter()
            .map(|(_, settings)| settings.settings_path.clone())
            .collect();
        match self.fetch_summary(service, paths) {
            Ok(summaries) if summaries.len() == resolved.len() => {
                return summaries.into_iter().map(Ok).collect();
            }
            Ok(summaries) => log::warn!(
                "GetSummaryInformation on '{}' returned {} entries for {} VMs, retrying per VM",
                self.host,
                summaries.len(),
                resolved.len()
            ),
            Err(e) => log::warn!(
                "Batched GetSummaryInformation on '{}' failed, retrying per VM: {}",
                self.host,
                e
            ),
        }

        resolved
            .iter()
            .map(|(vm, settings)| {
                self.fetch_summary(service, vec![settings.settings_path.clone()])?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        AgentError::query(format!(
                            "GetSummaryInformation returned no entry for '{}'",
                            vm.element_name
                        ))
                    })
            })
            .collect()
    }

    fn fetch_summary(
        &self,
        service: &ManagementServiceHandle,
        settings_paths: Vec<String>,
    ) -> Result<Vec<SummaryInformation>> {
        let service = service.clone();
        self.call("GetSummaryInformation", move |client, _| {
            client.fetch_summary_information(&service, &settings_paths, &SUMMARY_FIELD_CODES)
        })
    }

    /// Run one management call on a worker thread, bounded by the call timeout.
    ///
    /// A call that misses the deadline keeps running detached and its result
    /// is dropped when it eventually returns.
    fn call<T, F>(&self, what: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&C, &str) -> Result<T> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        let host = self.host.clone();
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name(format!("wmi-{}", self.host))
            .spawn(move || {
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| f(client.as_ref(), host.as_str())));
                // receiver is gone once the deadline passed
                let _ = tx.send(outcome);
            })?;

        match rx.recv_timeout(self.call_timeout) {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(AgentError::query(format!(
                "{} on '{}' panicked: {}",
                what,
                self.host,
                panic_message(payload.as_ref())
            ))),
            Err(RecvTimeoutError::Timeout) => Err(AgentError::query(format!(
                "{} on '{}' timed out after {}ms",
                what,
                self.host,
                self.call_timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(AgentError::query(format!(
                "{} on '{}' exited without a result",
                what, self.host
            ))),
        }
    }

    fn log_vm_failure(&self, vm: &VirtualMachineRecord, e: &AgentError) {
        log::error!(
            "Unable to collect VM '{}' on host '{}': {}",
            vm.element_name,
            self.host,
            e
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
