//! Hyper-V management client backed by WMI.
//!
//! Class and association queries go through the `wmi` crate against
//! `\\{host}\root\virtualization\v2`. `GetSummaryInformation` is a method
//! invocation, which is issued through PowerShell's `System.Management`
//! binding so the call carries an explicit timeout.

use std::time::Duration;

use serde::Deserialize;

use super::powershell::{json_rows, quote};
use crate::core::hyperv::{ManagementServiceHandle, SummaryInformation};
use crate::error::{AgentError, Result};
#[cfg(windows)]
use crate::core::hyperv::{
    ManagementClient, VirtualMachineRecord, VirtualSystemSettings, VIRTUALIZATION_NAMESPACE,
};
#[cfg(windows)]
use wmi::WMIConnection;

/// Default bound on a single `GetSummaryInformation` invocation
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(15);

/// `VirtualSystemType` of the live (non-snapshot) settings of a VM
pub const REALIZED_SYSTEM_TYPE: &str = "Microsoft:Hyper-V:System:Realized";

#[cfg(windows)]
#[derive(Deserialize, Debug)]
#[serde(rename = "Msvm_ComputerSystem")]
#[serde(rename_all = "PascalCase")]
struct MsvmComputerSystem {
    element_name: Option<String>,
    #[serde(rename = "__Path")]
    path: String,
    description: Option<String>,
    on_time_in_milliseconds: Option<u64>,
    health_state: Option<u16>,
    replication_health: Option<u16>,
    replication_mode: Option<u16>,
}

#[cfg(windows)]
impl From<MsvmComputerSystem> for VirtualMachineRecord {
    fn from(row: MsvmComputerSystem) -> Self {
        Self {
            element_name: row.element_name.unwrap_or_default(),
            identity_path: row.path,
            description: row.description.unwrap_or_default(),
            on_time_ms: row.on_time_in_milliseconds.unwrap_or(0),
            health_state: row.health_state.unwrap_or(0),
            replication_health: row.replication_health.unwrap_or(0),
            replication_mode: row.replication_mode.unwrap_or(0),
        }
    }
}

#[cfg(windows)]
#[derive(Deserialize, Debug)]
#[serde(rename = "Msvm_VirtualSystemSettingData")]
#[serde(rename_all = "PascalCase")]
struct MsvmVirtualSystemSettingData {
    #[serde(rename = "__Path")]
    path: String,
    virtual_system_type: Option<String>,
}

#[cfg(windows)]
#[derive(Deserialize, Debug)]
#[serde(rename = "Msvm_VirtualSystemManagementService")]
struct MsvmVirtualSystemManagementService {
    #[serde(rename = "__Path")]
    path: String,
}

#[cfg(windows)]
#[derive(Deserialize, Debug)]
#[serde(rename = "Win32_ComputerSystem")]
#[serde(rename_all = "PascalCase")]
struct Win32ComputerSystem {
    total_physical_memory: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SummaryResultPs {
    #[serde(rename = "ReturnValue")]
    return_value: u32,
    #[serde(rename = "SummaryInformation", default)]
    summary_information: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SummaryInformationPs {
    enabled_state: Option<u16>,
    number_of_processors: Option<u16>,
    processor_load: Option<u16>,
    memory_usage: Option<u64>,
}

impl From<SummaryInformationPs> for SummaryInformation {
    fn from(row: SummaryInformationPs) -> Self {
        Self {
            enabled_state: row.enabled_state.unwrap_or(0),
            number_of_processors: row.number_of_processors.unwrap_or(0),
            processor_load: row.processor_load.unwrap_or(0),
            memory_usage_mib: row.memory_usage.unwrap_or(0),
        }
    }
}

/// PowerShell that invokes `GetSummaryInformation` and prints the result as JSON.
pub fn summary_script(
    service: &ManagementServiceHandle,
    settings_paths: &[String],
    field_codes: &[u32],
    timeout: Duration,
) -> String {
    let paths = settings_paths
        .iter()
        .map(|p| quote(p))
        .collect::<Vec<_>>()
        .join(",");
    let codes = field_codes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "$svc = [wmi]{service}; \
         $in = $svc.GetMethodParameters('GetSummaryInformation'); \
         $in['SettingData'] = [string[]]@({paths}); \
         $in['RequestedInformation'] = [uint32[]]@({codes}); \
         $opts = New-Object System.Management.InvokeMethodOptions($null, [TimeSpan]::FromSeconds({secs})); \
         $out = $svc.InvokeMethod('GetSummaryInformation', $in, $opts); \
         $rows = @($out['SummaryInformation'] | ForEach-Object {{ @{{ \
             EnabledState = $_['EnabledState']; \
             NumberOfProcessors = $_['NumberOfProcessors']; \
             ProcessorLoad = $_['ProcessorLoad']; \
             MemoryUsage = $_['MemoryUsage'] }} }}); \
         ConvertTo-Json -Depth 3 -Compress -InputObject @{{ ReturnValue = [uint32]$out['ReturnValue']; SummaryInformation = $rows }}",
        service = quote(&service.service_path),
        paths = paths,
        codes = codes,
        secs = timeout.as_secs().max(1),
    )
}

/// Decode the JSON printed by [`summary_script`].
pub fn parse_summary_output(
    value: serde_json::Value,
    expected: usize,
) -> Result<Vec<SummaryInformation>> {
    let result: SummaryResultPs = serde_json::from_value(value)?;
    if result.return_value != 0 {
        return Err(AgentError::query(format!(
            "GetSummaryInformation returned {}",
            result.return_value
        )));
    }

    let rows: Vec<SummaryInformationPs> = json_rows(result.summary_information)?;
    if rows.len() != expected {
        return Err(AgentError::query(format!(
            "GetSummaryInformation returned {} entries for {} settings",
            rows.len(),
            expected
        )));
    }

    Ok(rows.into_iter().map(SummaryInformation::from).collect())
}

/// WMI-backed [`ManagementClient`](crate::core::hyperv::ManagementClient)
#[derive(Debug, Clone)]
pub struct WmiClient {
    operation_timeout: Duration,
}

impl WmiClient {
    #[cfg(windows)]
    pub fn new() -> Result<Self> {
        Ok(Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        })
    }

    #[cfg(not(windows))]
    pub fn new() -> Result<Self> {
        Err(AgentError::platform(
            "Hyper-V management is only available on Windows",
        ))
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    #[cfg(windows)]
    fn connect(&self, host: &str, namespace: &str) -> Result<WMIConnection> {
        let path = format!(r"\\{}\{}", host, namespace);
        WMIConnection::with_namespace_path(&path)
            .map_err(|e| AgentError::connection(host, format!("{}: {}", path, e)))
    }
}

#[cfg(windows)]
impl ManagementClient for WmiClient {
    fn fetch_inventory(&self, host: &str) -> Result<Vec<VirtualMachineRecord>> {
        let wmi_con = self.connect(host, VIRTUALIZATION_NAMESPACE)?;

        let rows: Vec<MsvmComputerSystem> = wmi_con
            .raw_query("SELECT * FROM Msvm_ComputerSystem")
            .map_err(|e| AgentError::connection(host, format!("WMI query failed: {}", e)))?;

        Ok(rows.into_iter().map(VirtualMachineRecord::from).collect())
    }

    fn fetch_management_service(&self, host: &str) -> Result<ManagementServiceHandle> {
        let wmi_con = self.connect(host, VIRTUALIZATION_NAMESPACE)?;

        let services: Vec<MsvmVirtualSystemManagementService> = wmi_con
            .raw_query("SELECT * FROM Msvm_VirtualSystemManagementService")
            .map_err(|e| AgentError::connection(host, format!("WMI query failed: {}", e)))?;

        services
            .into_iter()
            .next()
            .map(|s| ManagementServiceHandle {
                service_path: s.path,
            })
            .ok_or_else(|| AgentError::service_not_found(host))
    }

    fn fetch_settings(
        &self,
        host: &str,
        identity_path: &str,
    ) -> Result<Option<VirtualSystemSettings>> {
        let wmi_con = self.connect(host, VIRTUALIZATION_NAMESPACE)?;

        let query = format!(
            "ASSOCIATORS OF {{{}}} WHERE ResultClass = Msvm_VirtualSystemSettingData",
            identity_path
        );
        let rows: Vec<MsvmVirtualSystemSettingData> = wmi_con
            .raw_query(&query)
            .map_err(|e| AgentError::query(format!("Settings query failed: {}", e)))?;

        // Snapshots are associated too; prefer the live settings
        let realized = rows
            .iter()
            .position(|r| r.virtual_system_type.as_deref() == Some(REALIZED_SYSTEM_TYPE))
            .unwrap_or(0);

        Ok(rows.into_iter().nth(realized).map(|r| VirtualSystemSettings {
            settings_path: r.path,
        }))
    }

    fn fetch_summary_information(
        &self,
        service: &ManagementServiceHandle,
        settings_paths: &[String],
        field_codes: &[u32],
    ) -> Result<Vec<SummaryInformation>> {
        if settings_paths.is_empty() {
            return Ok(Vec::new());
        }

        let script = summary_script(service, settings_paths, field_codes, self.operation_timeout);
        let value: serde_json::Value = super::powershell::run_powershell_json(&script)?;
        parse_summary_output(value, settings_paths.len())
    }

    fn fetch_host_memory_capacity(&self, host: &str) -> Result<u64> {
        let wmi_con = self.connect(host, r"root\cimv2")?;

        let systems: Vec<Win32ComputerSystem> = wmi_con
            .raw_query("SELECT TotalPhysicalMemory FROM Win32_ComputerSystem")
            .map_err(|e| AgentError::query(format!("Memory capacity query failed: {}", e)))?;

        systems
            .first()
            .and_then(|s| s.total_physical_memory)
            .ok_or_else(|| AgentError::query("TotalPhysicalMemory not reported"))
    }
}

#[cfg(not(windows))]
impl crate::core::hyperv::ManagementClient for WmiClient {
    fn fetch_inventory(&self, host: &str) -> Result<Vec<crate::core::hyperv::VirtualMachineRecord>> {
        Err(AgentError::connection(host, "WMI is not available on this platform"))
    }

    fn fetch_management_service(&self, host: &str) -> Result<ManagementServiceHandle> {
        Err(AgentError::connection(host, "WMI is not available on this platform"))
    }

    fn fetch_settings(
        &self,
        _host: &str,
        _identity_path: &str,
    ) -> Result<Option<crate::core::hyperv::VirtualSystemSettings>> {
        Err(AgentError::platform("WMI is not available on this platform"))
    }

    fn fetch_summary_information(
        &self,
        _service: &ManagementServiceHandle,
        _settings_paths: &[String],
        _field_codes: &[u32],
    ) -> Result<Vec<SummaryInformation>> {
        Err(AgentError::platform("WMI is not available on this platform"))
    }

    fn fetch_host_memory_capacity(&self, _host: &str) -> Result<u64> {
        Err(AgentError::platform("WMI is not available on this platform"))
    }
}
