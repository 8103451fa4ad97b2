//! Hyper-V management interface model.
//!
//! Raw records returned by the virtualization namespace (`root\virtualization\v2`)
//! and the [`ManagementClient`] trait that fetches them. The Windows
//! implementation lives in the platform layer; tests provide their own.

mod classify;

pub use classify::{
    classify_health, classify_replication_health, classify_replication_mode, DerivedMetric,
    ReplicationMode,
};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// WMI namespace holding the Hyper-V classes
pub const VIRTUALIZATION_NAMESPACE: &str = r"root\virtualization\v2";

/// `Description` of the `Msvm_ComputerSystem` row that represents the host itself
pub const HOST_SYSTEM_DESCRIPTION: &str = "Microsoft Hosting Computer System";

/// `GetSummaryInformation` request codes: EnabledState, NumberOfProcessors,
/// ProcessorLoad, MemoryUsage.
pub const SUMMARY_FIELD_CODES: [u32; 4] = [4, 100, 101, 103];

/// `EnabledState` value for a running VM
pub const ENABLED_STATE_RUNNING: u16 = 2;

/// One row of `Msvm_ComputerSystem`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachineRecord {
    pub element_name: String,
    pub identity_path: String,
    pub description: String,
    pub on_time_ms: u64,
    pub health_state: u16,
    pub replication_health: u16,
    pub replication_mode: u16,
}

impl VirtualMachineRecord {
    /// The host publishes itself as a computer system; it is not a guest.
    pub fn is_host_record(&self) -> bool {
        self.description == HOST_SYSTEM_DESCRIPTION
    }
}

/// `Msvm_VirtualSystemSettingData` associated with a VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualSystemSettings {
    pub settings_path: String,
}

/// Resolved `Msvm_VirtualSystemManagementService` instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementServiceHandle {
    pub service_path: String,
}

/// One entry of a `GetSummaryInformation` result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryInformation {
    pub enabled_state: u16,
    pub number_of_processors: u16,
    /// Percent
    pub processor_load: u16,
    /// MiB
    pub memory_usage_mib: u64,
}

impl SummaryInformation {
    pub fn is_running(&self) -> bool {
        self.enabled_state == ENABLED_STATE_RUNNING
    }
}

/// Queries against a host's virtualization management namespace.
///
/// Implementations hold no per-cycle state; every call opens and releases
/// its own handles.
pub trait ManagementClient: Send + Sync {
    /// Every `Msvm_ComputerSystem` row on the host, host record included.
    fn fetch_inventory(&self, host: &str) -> Result<Vec<VirtualMachineRecord>>;

    /// The singleton management service used for summary queries.
    fn fetch_management_service(&self, host: &str) -> Result<ManagementServiceHandle>;

    /// Settings associated with a VM, `None` if the association is empty.
    fn fetch_settings(
        &self,
        host: &str,
        identity_path: &str,
    ) -> Result<Option<VirtualSystemSettings>>;

    /// One summary entry per settings path, in request order.
    fn fetch_summary_information(
        &self,
        service: &ManagementServiceHandle,
        settings_paths: &[String],
        field_codes: &[u32],
    ) -> Result<Vec<SummaryInformation>>;

    /// Total physical memory of the host in bytes.
    fn fetch_host_memory_capacity(&self, host: &str) -> Result<u64>;
}

impl<T: ManagementClient + ?Sized> ManagementClient for Box<T> {
    fn fetch_inventory(&self, host: &str) -> Result<Vec<VirtualMachineRecord>> {
        (**self).fetch_inventory(host)
    }

    fn fetch_management_service(&self, host: &str) -> Result<ManagementServiceHandle> {
        (**self).fetch_management_service(host)
    }

    fn fetch_settings(
        &self,
        host: &str,
        identity_path: &str,
    ) -> Result<Option<VirtualSystemSettings>> {
        (**self).fetch_settings(host, identity_path)
    }

    fn fetch_summary_information(
        &self,
        service: &ManagementServiceHandle,
        settings_paths: &[String],
        field_codes: &[u32],
    ) -> Result<Vec<SummaryInformation>> {
        (**self).fetch_summary_information(service, settings_paths, field_codes)
    }

    fn fetch_host_memory_capacity(&self, host: &str) -> Result<u64> {
        (**self).fetch_host_memory_capacity(host)
    }
}
