//! Translation of raw Hyper-V status codes into reportable severities.
//!
//! Severities are ordinal: 0 is healthy or absent, larger is worse.

use serde::{Deserialize, Serialize};

/// A severity value with the label it was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DerivedMetric {
    pub description: &'static str,
    pub value: i32,
}

impl DerivedMetric {
    const fn new(value: i32, description: &'static str) -> Self {
        Self { description, value }
    }
}

/// Role of a VM in a replication topology (`ReplicationMode`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationMode {
    None,
    Primary,
    Recovery,
    Replica,
    ExtendedReplica,
    /// A code Hyper-V did not document when this was written
    Unknown(u16),
}

impl ReplicationMode {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => ReplicationMode::None,
            1 => ReplicationMode::Primary,
            2 => ReplicationMode::Recovery,
            3 => ReplicationMode::Replica,
            4 => ReplicationMode::ExtendedReplica,
            other => ReplicationMode::Unknown(other),
        }
    }

    pub fn metric(&self) -> DerivedMetric {
        match self {
            ReplicationMode::None => DerivedMetric::new(0, "None"),
            ReplicationMode::Primary => DerivedMetric::new(1, "Primary"),
            ReplicationMode::Recovery => DerivedMetric::new(2, "Recovery"),
            ReplicationMode::Replica => DerivedMetric::new(3, "Replica"),
            ReplicationMode::ExtendedReplica => DerivedMetric::new(4, "Extended replica"),
            ReplicationMode::Unknown(_) => DerivedMetric::new(-1, "Unknown"),
        }
    }

    /// Recovery, replica and extended replica all report as secondaries.
    pub fn is_secondary(&self) -> bool {
        matches!(
            self,
            ReplicationMode::Recovery | ReplicationMode::Replica | ReplicationMode::ExtendedReplica
        )
    }
}

/// `HealthState`: 5 is OK, 20 is major failure, anything else is critical.
pub fn classify_health(code: u16) -> DerivedMetric {
    match code {
        5 => DerivedMetric::new(0, "Healthy"),
        20 => DerivedMetric::new(1, "Major Failure"),
        _ => DerivedMetric::new(2, "Critical Failure"),
    }
}

pub fn classify_replication_health(code: u16) -> DerivedMetric {
    match code {
        0 => DerivedMetric::new(0, "Not applicable"),
        1 => DerivedMetric::new(0, "Ok"),
        2 => DerivedMetric::new(1, "Warning"),
        _ => DerivedMetric::new(2, "Critical"),
    }
}

pub fn classify_replication_mode(code: u16) -> DerivedMetric {
    ReplicationMode::from_code(code).metric()
}
