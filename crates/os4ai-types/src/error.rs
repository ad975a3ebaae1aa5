//! Error taxonomy shared by every os4ai crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::EntityId;
use crate::reading::SensorId;

/// Process-level failures from the command gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayError {
    #[error("Program not found: {program}")]
    NotFound { program: String },

    #[error("Permission denied running {program}")]
    PermissionDenied { program: String },

    #[error("{program} exceeded its {timeout_ms} ms timeout and was killed")]
    Timeout { program: String, timeout_ms: u64 },

    #[error("{program} exited with status {code:?}")]
    NonZeroExit { program: String, code: Option<i32> },

    #[error("Output of {program} could not be decoded: {details}")]
    ParseFailure { program: String, details: String },

    /// The command never ran: unknown program or arguments outside its schema.
    #[error("Command rejected: {0}")]
    Rejected(String),

    #[error("I/O error running {program}: {details}")]
    Io { program: String, details: String },
}

/// Domain-level failures from a sensor adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("Hardware unavailable for {sensor}: {source}")]
    HardwareUnavailable {
        sensor: SensorId,
        #[source]
        source: GatewayError,
    },

    #[error("Circuit open for {sensor}")]
    CircuitOpen { sensor: SensorId },

    #[error("Invalid reading from {sensor}: {details}")]
    InvalidReading { sensor: SensorId, details: String },
}

impl AdapterError {
    pub fn sensor(&self) -> &SensorId {
        match self {
            AdapterError::HardwareUnavailable { sensor, .. }
            | AdapterError::CircuitOpen { sensor }
            | AdapterError::InvalidReading { sensor, .. } => sensor,
        }
    }
}

/// Errors returned synchronously by the consciousness hypervisor.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HypervisorError {
    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),

    #[error("Unknown sensor(s): {}", .0.join(", "))]
    UnknownSensor(Vec<String>),

    #[error("Entity {0} is already terminated")]
    AlreadyTerminated(EntityId),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),
}

/// Rejected configuration values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("Invalid value for {field}: {details}")]
    Invalid { field: String, details: String },

    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("Config I/O error: {0}")]
    Io(String),
}
