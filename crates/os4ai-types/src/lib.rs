//! Shared data model for the OS4AI sensor hub.
//!
//! Readings, fused snapshots, entity allocations, configuration and the
//! error taxonomy live here so every other crate speaks the same types.

pub mod config;
pub mod entity;
pub mod error;
pub mod reading;
pub mod snapshot;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use config::{
    AdapterSettings, AllocationPolicy, CircuitSettings, GatewaySettings, HubConfig,
    SchedulerSettings,
};
pub use entity::{
    ConsciousnessEntity, EntityId, EntityManifest, IsolationLevel, LifecycleState,
    SensoryAllocation,
};
pub use error::{AdapterError, ConfigError, GatewayError, HypervisorError};
pub use reading::{
    AcousticSample, BluetoothDevice, BluetoothScan, EmiSample, Quality, ReadingValue, SensorId,
    SensorKind, SensorReading, SpectrumBin, ThermalSample, WifiNetwork, WifiScan,
};
pub use snapshot::{FusedSnapshot, MetricValue};

/// Circuit breaker state of one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// System event routed over the bus alongside snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "os4ai-kernel::hypervisor"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    CircuitTransition {
        sensor: SensorId,
        from: CircuitState,
        to: CircuitState,
    },
    EntityLifecycle {
        entity: EntityId,
        name: String,
        state: LifecycleState,
    },
    ModeChanged {
        simulated: bool,
    },
    SensorFault {
        sensor: SensorId,
        message: String,
    },
}

/// JSON schema of [`FusedSnapshot`], for consumers of the published stream.
pub fn snapshot_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(FusedSnapshot)
}

/// JSON schema of [`EntityManifest`], the `spawn` request body.
pub fn manifest_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(EntityManifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "os4ai-kernel::hypervisor",
            EventPayload::EntityLifecycle {
                entity: EntityId::new(),
                name: "room-mapper".into(),
                state: LifecycleState::Running,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
    }

    #[test]
    fn snapshot_schema_names_readings_and_metrics() {
        let schema = serde_json::to_value(snapshot_schema()).unwrap();
        let props = &schema["properties"];
        assert!(props.get("readings").is_some());
        assert!(props.get("metrics").is_some());
        assert!(props.get("sequence").is_some());
    }
}
