// Platform-specific code module

pub mod powershell;
pub mod wmi_client;

// Re-exports for cleaner imports
pub use powershell::run_powershell_json;
pub use wmi_client::WmiClient;
