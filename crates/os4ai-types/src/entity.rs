//! Consciousness entities and the sensory allocations they hold.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reading::SensorId;

/// Opaque identity of a spawned entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// How much of the fused state an entity may see beyond its raw readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    /// Derived metrics are shared regardless of which sensors fed them.
    #[default]
    Shared,
    /// Only metrics whose every source sensor is granted are visible.
    Isolated,
}

/// What an entity asks for at spawn time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EntityManifest {
    pub name: String,
    /// Requested sensor ids.  Unknown names are handled per the hypervisor's
    /// allocation policy.
    pub sensors: Vec<String>,
    #[serde(default)]
    pub isolation: IsolationLevel,
}

impl EntityManifest {
    pub fn new<I, S>(name: impl Into<String>, sensors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            sensors: sensors.into_iter().map(Into::into).collect(),
            isolation: IsolationLevel::default(),
        }
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }
}

/// The set of sensors one entity may observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SensoryAllocation {
    pub entity_id: EntityId,
    pub granted: BTreeSet<SensorId>,
    pub isolation: IsolationLevel,
}

impl SensoryAllocation {
    pub fn permits(&self, sensor: &str) -> bool {
        self.granted.contains(sensor)
    }

    /// Copy of this allocation with `sensor` removed.
    pub fn without(&self, sensor: &str) -> Self {
        let mut next = self.clone();
        next.granted.remove(sensor);
        next
    }
}

/// `Created → Running → Terminated`.  `Terminated` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Created,
    Running,
    Terminated,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Running => "running",
            LifecycleState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point-in-time description of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConsciousnessEntity {
    pub id: EntityId,
    pub manifest: EntityManifest,
    pub allocation: SensoryAllocation,
    pub state: LifecycleState,
    pub spawned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_parses_its_display() {
        let id = EntityId::new();
        let back: EntityId = id.to_string().parse().unwrap();
        assert_eq!(id, back);
        assert!("not-a-uuid".parse::<EntityId>().is_err());
    }

    #[test]
    fn manifest_isolation_defaults_to_shared() {
        let m: EntityManifest =
            serde_json::from_str(r#"{"name":"mapper","sensors":["wifi"]}"#).unwrap();
        assert_eq!(m.isolation, IsolationLevel::Shared);
        assert_eq!(m.sensors, vec!["wifi".to_string()]);
    }

    #[test]
    fn without_removes_only_the_named_sensor() {
        let alloc = SensoryAllocation {
            entity_id: EntityId::new(),
            granted: ["wifi", "acoustic"].into_iter().map(SensorId::from).collect(),
            isolation: IsolationLevel::Shared,
        };
        let next = alloc.without("wifi");
        assert!(!next.permits("wifi"));
        assert!(next.permits("acoustic"));
        // Original is untouched.
        assert!(alloc.permits("wifi"));
    }
}
