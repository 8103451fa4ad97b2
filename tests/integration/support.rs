use hyperv_agent::core::hyperv::{
    ManagementClient, ManagementServiceHandle, SummaryInformation, VirtualMachineRecord,
    VirtualSystemSettings, HOST_SYSTEM_DESCRIPTION,
};
use hyperv_agent::error::{AgentError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

pub const HOST: &str = "hv01";
pub const SERVICE_PATH: &str = r#"\\HV01\root\virtualization\v2:Msvm_VirtualSystemManagementService.Name="vmms""#;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingsBehavior {
    Found,
    Missing,
    Fail,
    PanicOnSummary,
    /// Settings lookup blocks for the given time before answering
    Hang(Duration),
}

/// In-memory Hyper-V host driven entirely by the test
pub struct ScriptedClient {
    pub inventory: Option<Vec<VirtualMachineRecord>>,
    pub service_available: bool,
    pub capacity: Option<u64>,
    pub settings: HashMap<String, SettingsBehavior>,
    pub summaries: HashMap<String, SummaryInformation>,
    pub calls: Mutex<Vec<String>>,
    pub requested_codes: Mutex<Vec<Vec<u32>>>,
}

pub fn guest(name: &str) -> VirtualMachineRecord {
    VirtualMachineRecord {
        element_name: name.to_string(),
        identity_path: format!(r#"\\HV01\root\virtualization\v2:Msvm_ComputerSystem.Name="{name}""#),
        description: "Microsoft Virtual Machine".to_string(),
        on_time_ms: 0,
        health_state: 5,
        replication_health: 0,
        replication_mode: 0,
    }
}

pub fn host_record() -> VirtualMachineRecord {
    VirtualMachineRecord {
        element_name: "HV01".to_string(),
        identity_path: r#"\\HV01\root\virtualization\v2:Msvm_ComputerSystem.Name="HV01""#
            .to_string(),
        description: HOST_SYSTEM_DESCRIPTION.to_string(),
        health_state: 5,
        ..Default::default()
    }
}

pub fn running(processors: u16, load: u16, memory_mib: u64) -> SummaryInformation {
    SummaryInformation {
        enabled_state: 2,
        number_of_processors: processors,
        processor_load: load,
        memory_usage_mib: memory_mib,
    }
}

pub fn stopped(processors: u16) -> SummaryInformation {
    SummaryInformation {
        enabled_state: 3,
        number_of_processors: processors,
        processor_load: 0,
        memory_usage_mib: 0,
    }
}

fn settings_path(identity_path: &str) -> String {
    format!("settings:{identity_path}")
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            inventory: Some(vec![host_record()]),
            service_available: true,
            capacity: Some(8_589_934_592),
            settings: HashMap::new(),
            summaries: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            requested_codes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_vm(mut self, vm: VirtualMachineRecord, summary: SummaryInformation) -> Self {
        self.settings
            .insert(vm.identity_path.clone(), SettingsBehavior::Found);
        self.summaries
            .insert(settings_path(&vm.identity_path), summary);
        if let Some(inventory) = self.inventory.as_mut() {
            inventory.push(vm);
        }
        self
    }

    /// Change how the settings lookup of an already added VM behaves
    pub fn with_settings(mut self, name: &str, behavior: SettingsBehavior) -> Self {
        let path = guest(name).identity_path;
        self.settings.insert(path, behavior);
        self
    }

    pub fn without_inventory(mut self) -> Self {
        self.inventory = None;
        self
    }

    pub fn without_service(mut self) -> Self {
        self.service_available = false;
        self
    }

    pub fn with_capacity(mut self, capacity: Option<u64>) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl ManagementClient for ScriptedClient {
    fn fetch_inventory(&self, host: &str) -> Result<Vec<VirtualMachineRecord>> {
        self.record(format!("inventory:{host}"));
        self.inventory
            .clone()
            .ok_or_else(|| AgentError::connection(host, "RPC server is unavailable"))
    }

    fn fetch_management_service(&self, host: &str) -> Result<ManagementServiceHandle> {
        self.record(format!("service:{host}"));
        if self.service_available {
            Ok(ManagementServiceHandle {
                service_path: SERVICE_PATH.to_string(),
            })
        } else {
            Err(AgentError::service_not_found(host))
        }
    }

    fn fetch_settings(
        &self,
        host: &str,
        identity_path: &str,
    ) -> Result<Option<VirtualSystemSettings>> {
        self.record(format!("settings:{host}"));
        match self.settings.get(identity_path) {
            Some(SettingsBehavior::Found) | Some(SettingsBehavior::PanicOnSummary) => {
                Ok(Some(VirtualSystemSettings {
                    settings_path: settings_path(identity_path),
                }))
            }
            Some(SettingsBehavior::Hang(delay)) => {
                std::thread::sleep(*delay);
                Ok(Some(VirtualSystemSettings {
                    settings_path: settings_path(identity_path),
                }))
            }
            Some(SettingsBehavior::Fail) => Err(AgentError::query("settings query timed out")),
            Some(SettingsBehavior::Missing) | None => Ok(None),
        }
    }

    fn fetch_summary_information(
        &self,
        service: &ManagementServiceHandle,
        settings_paths: &[String],
        field_codes: &[u32],
    ) -> Result<Vec<SummaryInformation>> {
        assert_eq!(service.service_path, SERVICE_PATH);
        self.record(format!("summary:{}", settings_paths.len()));
        self.requested_codes.lock().push(field_codes.to_vec());

        settings_paths
            .iter()
            .map(|path| {
                let identity = path.trim_start_matches("settings:");
                if self.settings.get(identity) == Some(&SettingsBehavior::PanicOnSummary) {
                    panic!("malformed summary for {identity}");
                }
                self.summaries
                    .get(path)
                    .copied()
                    .ok_or_else(|| AgentError::query(format!("no summary for {path}")))
            })
            .collect()
    }

    fn fetch_host_memory_capacity(&self, host: &str) -> Result<u64> {
        self.record(format!("capacity:{host}"));
        self.capacity
            .ok_or_else(|| AgentError::query("TotalPhysicalMemory not reported"))
    }
}
