use serde::de::DeserializeOwned;
use crate::error::{AgentError, Result};

pub fn run_powershell_json<T: DeserializeOwned>(command: &str) -> Result<T> {
    use std::process::Command;
    let output = Command::new("powershell")
        .args(["-NoProfile", "-NonInteractive", "-Command", command])
        .output()
        .map_err(|e| AgentError::platform(format!("PowerShell execution failed: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);

    if !output.status.success() || stdout.trim().is_empty() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AgentError::query(format!(
            "PowerShell exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    serde_json::from_str(&stdout)
        .map_err(|e| AgentError::query(format!("JSON parsing failed: {e}. Output: {stdout}")))
}

/// `ConvertTo-Json` emits a bare object for one row and an array for many.
pub fn json_rows<T: DeserializeOwned>(value: serde_json::Value) -> Result<Vec<T>> {
    let rows: Vec<T> = match value {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::Array(arr) => serde_json::from_value(arr.into())?,
        value => vec![serde_json::from_value(value)?],
    };
    Ok(rows)
}

/// Single-quoted PowerShell literal
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
