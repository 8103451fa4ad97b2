use super::support::*;
use hyperv_agent::core::hyperv::SUMMARY_FIELD_CODES;
use hyperv_agent::core::metrics::*;
use hyperv_agent::core::{collect_once, Agent, HostCollector, HyperVAgent, AGENT_GUID};
use std::time::{Duration, Instant};

fn three_vm_host() -> ScriptedClient {
    ScriptedClient::new()
        .with_vm(guest("A"), running(2, 30, 512))
        .with_vm(guest("B"), stopped(4))
        .with_vm(guest("C"), running(8, 70, 2048))
}

fn poll(client: ScriptedClient) -> MetricBatch {
    let collector = HostCollector::new(HOST, client);
    let mut batch = MetricBatch::new();
    collector.poll_cycle(&mut batch);
    batch
}

#[test]
fn test_running_and_stopped_vms() {
    let batch = poll(three_vm_host());

    assert_eq!(batch.get("vms/A/processorload", UNIT_PERCENT), Some(30.0));
    assert_eq!(batch.get("vms/A/memoryused", UNIT_MIBIBYTES), Some(512.0));
    assert_eq!(batch.get("vms/B/numberofprocessors", UNIT_PROCS), Some(4.0));
    assert!(!batch.contains("vms/B/processorload"));
    assert!(!batch.contains("vms/B/memoryused"));
    assert_eq!(batch.get("vms/C/processorload", UNIT_PERCENT), Some(70.0));

    assert_eq!(batch.get("host/processorload", UNIT_PERCENT), Some(100.0));
    assert_eq!(batch.get("host/vms/memoryused", UNIT_MIBIBYTES), Some(2560.0));
    assert_eq!(batch.get("host/numberofprocessors", UNIT_PROCS), Some(14.0));
    assert_eq!(batch.get("host/vms/count", UNIT_VMS), Some(3.0));
    assert_eq!(batch.get("host/vms/running", UNIT_VMS), Some(2.0));
}

#[test]
fn test_host_record_is_excluded() {
    let batch = poll(three_vm_host());

    assert!(!batch.metrics.iter().any(|m| m.name.starts_with("vms/HV01/")));
    assert_eq!(batch.get("host/vms/health", UNIT_ERRORS), Some(0.0));
}

#[test]
fn test_memory_percentage_of_host_capacity() {
    let batch = poll(three_vm_host());

    let percent = batch.get("host/vms/memoryused", UNIT_PERCENT).unwrap();
    assert!((percent - 31.25).abs() < 1e-9);
}

#[test]
fn test_missing_capacity_omits_only_percentage() {
    let batch = poll(three_vm_host().with_capacity(None));

    assert_eq!(batch.get("host/vms/memoryused", UNIT_PERCENT), None);
    assert_eq!(batch.get("host/vms/memoryused", UNIT_MIBIBYTES), Some(2560.0));

    let batch = poll(three_vm_host().with_capacity(Some(0)));
    assert_eq!(batch.get("host/vms/memoryused", UNIT_PERCENT), None);
}

#[test]
fn test_settings_failure_is_isolated() {
    let batch = poll(three_vm_host().with_settings("B", SettingsBehavior::Fail));

    assert!(!batch.metrics.iter().any(|m| m.name.starts_with("vms/B/")));
    assert!(batch.contains("vms/A/health"));
    assert!(batch.contains("vms/C/health"));
    assert_eq!(batch.get("host/numberofprocessors", UNIT_PROCS), Some(10.0));
    assert_eq!(batch.get("host/processorload", UNIT_PERCENT), Some(100.0));
    assert_eq!(batch.get("host/vms/count", UNIT_VMS), Some(2.0));
}

#[test]
fn test_missing_settings_skips_vm() {
    let batch = poll(three_vm_host().with_settings("A", SettingsBehavior::Missing));

    assert!(!batch.metrics.iter().any(|m| m.name.starts_with("vms/A/")));
    assert_eq!(batch.get("host/processorload", UNIT_PERCENT), Some(70.0));
    assert_eq!(batch.get("host/vms/memoryused", UNIT_MIBIBYTES), Some(2048.0));
}

#[test]
fn test_panicking_vm_does_not_abort_cycle() {
    let batch = poll(three_vm_host().with_settings("C", SettingsBehavior::PanicOnSummary));

    assert!(!batch.metrics.iter().any(|m| m.name.starts_with("vms/C/")));
    assert_eq!(batch.get("vms/A/processorload", UNIT_PERCENT), Some(30.0));
    assert_eq!(batch.get("host/processorload", UNIT_PERCENT), Some(30.0));
    assert_eq!(batch.get("host/numberofprocessors", UNIT_PROCS), Some(6.0));
}

#[test]
fn test_health_severities_are_summed() {
    let mut degraded = guest("D");
    degraded.health_state = 20;
    let mut critical = guest("E");
    critical.health_state = 30;

    let batch = poll(
        ScriptedClient::new()
            .with_vm(guest("A"), running(1, 1, 1))
            .with_vm(degraded, running(1, 1, 1))
            .with_vm(critical, stopped(1)),
    );

    assert_eq!(batch.get("vms/A/health", UNIT_ERRORS), Some(0.0));
    assert_eq!(batch.get("vms/D/health", UNIT_ERRORS), Some(1.0));
    assert_eq!(batch.get("vms/E/health", UNIT_ERRORS), Some(2.0));
    assert_eq!(batch.get("host/vms/health", UNIT_ERRORS), Some(3.0));
}

#[test]
fn test_replication_metrics_by_mode() {
    let mut unreplicated = guest("N");
    unreplicated.replication_mode = 0;
    unreplicated.replication_health = 3;

    let mut primary = guest("P");
    primary.replication_mode = 1;
    primary.replication_health = 2;

    let mut recovery = guest("R");
    recovery.replication_mode = 2;
    recovery.replication_health = 1;

    let batch = poll(
        ScriptedClient::new()
            .with_vm(unreplicated, stopped(1))
            .with_vm(primary, running(1, 5, 256))
            .with_vm(recovery, stopped(1)),
    );

    assert!(!batch.contains("replication/primary/N/health"));
    assert!(!batch.contains("replication/secondary/N/health"));
    assert_eq!(
        batch.get("replication/primary/P/health", UNIT_ERRORS),
        Some(1.0)
    );
    assert_eq!(
        batch.get("replication/secondary/R/health", UNIT_ERRORS),
        Some(0.0)
    );
    // N contributes 2 even though it is not replicated
    assert_eq!(
        batch.get("host/vms/replicationhealth", UNIT_ERRORS),
        Some(3.0)
    );
}

#[test]
fn test_inventory_failure_emits_nothing() {
    let client = three_vm_host().without_inventory();
    let collector = HostCollector::new(HOST, client);

    let mut batch = MetricBatch::new();
    collector.poll_cycle(&mut batch);

    assert!(batch.is_empty());
    assert!(collector.collect().unwrap_err().is_cycle_fatal());
    assert_eq!(collector.client().calls(), vec!["inventory:hv01", "inventory:hv01"]);
}

#[test]
fn test_missing_service_emits_nothing() {
    let batch = poll(three_vm_host().without_service());
    assert!(batch.is_empty());
}

#[test]
fn test_empty_host_still_reports_totals() {
    let batch = poll(ScriptedClient::new());

    assert_eq!(batch.get("host/numberofprocessors", UNIT_PROCS), Some(0.0));
    assert_eq!(batch.get("host/processorload", UNIT_PERCENT), Some(0.0));
    assert_eq!(batch.get("host/vms/memoryused", UNIT_MIBIBYTES), Some(0.0));
    assert_eq!(batch.get("host/vms/memoryused", UNIT_PERCENT), Some(0.0));
    assert_eq!(batch.get("host/vms/health", UNIT_ERRORS), Some(0.0));
    assert_eq!(batch.get("host/vms/replicationhealth", UNIT_ERRORS), Some(0.0));
}

#[test]
fn test_summaries_are_fetched_in_one_batch() {
    let collector = HostCollector::new(HOST, three_vm_host());
    collector.collect().unwrap();

    let requested = collector.client().requested_codes.lock().clone();
    assert_eq!(requested, vec![SUMMARY_FIELD_CODES.to_vec()]);

    let summaries: Vec<String> = collector
        .client()
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("summary:"))
        .collect();
    assert_eq!(summaries, vec!["summary:3"]);
}

#[test]
fn test_failed_batch_falls_back_to_single_vm_requests() {
    let collector = HostCollector::new(
        HOST,
        three_vm_host().with_settings("C", SettingsBehavior::PanicOnSummary),
    );
    let batch = collector.collect().unwrap();

    let summaries: Vec<String> = collector
        .client()
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("summary:"))
        .collect();
    assert_eq!(
        summaries,
        vec!["summary:3", "summary:1", "summary:1", "summary:1"]
    );
    assert!(batch.contains("vms/A/health"));
    assert!(batch.contains("vms/B/health"));
    assert!(!batch.contains("vms/C/health"));
}

#[test]
fn test_hung_settings_query_only_drops_that_vm() {
    let client =
        three_vm_host().with_settings("B", SettingsBehavior::Hang(Duration::from_millis(400)));
    let collector = HostCollector::new(HOST, client).with_call_timeout(Duration::from_millis(50));

    let started = Instant::now();
    let batch = collector.collect().unwrap();
    assert!(started.elapsed() < Duration::from_millis(350));

    assert!(!batch.metrics.iter().any(|m| m.name.starts_with("vms/B/")));
    assert_eq!(batch.get("vms/A/processorload", UNIT_PERCENT), Some(30.0));
    assert_eq!(batch.get("vms/C/processorload", UNIT_PERCENT), Some(70.0));
    assert_eq!(batch.get("host/vms/count", UNIT_VMS), Some(2.0));
    assert_eq!(batch.get("host/numberofprocessors", UNIT_PROCS), Some(10.0));
    assert_eq!(batch.get("host/processorload", UNIT_PERCENT), Some(100.0));
}

#[test]
fn test_vm_names_are_sanitized() {
    let batch = poll(ScriptedClient::new().with_vm(guest("web/01"), running(2, 10, 128)));

    assert_eq!(batch.get("vms/web_01/processorload", UNIT_PERCENT), Some(10.0));
    assert!(!batch.metrics.iter().any(|m| m.name.contains("web/01")));
}

#[test]
fn test_cycles_are_idempotent() {
    let collector = HostCollector::new(HOST, three_vm_host());

    let first = collector.collect().unwrap();
    let second = collector.collect().unwrap();

    assert_eq!(first.metrics, second.metrics);
}

#[test]
fn test_agent_identity_and_poll() {
    let agent = HyperVAgent::new(HOST, three_vm_host());

    assert_eq!(agent.guid(), AGENT_GUID);
    assert_eq!(agent.version(), env!("CARGO_PKG_VERSION"));
    assert_eq!(agent.agent_name(), HOST);

    let batch = collect_once(&agent);
    assert_eq!(batch.get("host/processorload", UNIT_PERCENT), Some(100.0));
}
