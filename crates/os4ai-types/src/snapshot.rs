//! The fused, point-in-time view of every sensor.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::entity::{IsolationLevel, SensoryAllocation};
use crate::reading::{SensorId, SensorReading};

/// A derived metric value plus the sensors it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetricValue {
    pub value: f64,
    pub sources: BTreeSet<SensorId>,
}

/// Consistent combination of the latest reading of every sensor plus the
/// metrics derived from them.
///
/// Snapshots are never edited in place: the fusion engine builds a new one
/// per applied reading and publishes it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FusedSnapshot {
    pub as_of: DateTime<Utc>,
    /// Monotonic publish counter; `0` for the initial empty snapshot.
    pub sequence: u64,
    pub readings: BTreeMap<SensorId, SensorReading>,
    pub metrics: BTreeMap<String, MetricValue>,
}

impl Default for FusedSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl FusedSnapshot {
    pub fn empty() -> Self {
        Self {
            as_of: Utc::now(),
            sequence: 0,
            readings: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn reading(&self, sensor: &str) -> Option<&SensorReading> {
        self.readings.get(sensor)
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).map(|m| m.value)
    }

    /// View of this snapshot restricted to `allocation`.
    ///
    /// Readings are kept only for granted sensors.  Metrics follow the
    /// allocation's isolation level: `Shared` keeps every metric, `Isolated`
    /// keeps a metric only when all of its sources are granted.
    pub fn restricted_to(&self, allocation: &SensoryAllocation) -> FusedSnapshot {
        let readings = self
            .readings
            .iter()
            .filter(|(id, _)| allocation.granted.contains(*id))
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();

        let metrics = self
            .metrics
            .iter()
            .filter(|(_, m)| match allocation.isolation {
                IsolationLevel::Shared => true,
                IsolationLevel::Isolated => m.sources.is_subset(&allocation.granted),
            })
            .map(|(name, m)| (name.clone(), m.clone()))
            .collect();

        FusedSnapshot {
            as_of: self.as_of,
            sequence: self.sequence,
            readings,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use crate::reading::{ReadingValue, SensorKind, ThermalSample, Quality};

    fn snapshot() -> FusedSnapshot {
        let mut s = FusedSnapshot::empty();
        s.sequence = 7;
        for kind in [SensorKind::Wifi, SensorKind::Thermal] {
            let id = SensorId::from(kind);
            s.readings.insert(
                id.clone(),
                SensorReading::new(
                    id,
                    kind,
                    ReadingValue::Thermal(ThermalSample {
                        cpu_celsius: 40.0,
                        gpu_celsius: None,
                        fan_rpm: vec![],
                    }),
                    Quality::Simulated,
                ),
            );
        }
        s.metrics.insert(
            "cpu_temp_c".into(),
            MetricValue {
                value: 40.0,
                sources: [SensorId::from("thermal")].into_iter().collect(),
            },
        );
        s.metrics.insert(
            "motion_score".into(),
            MetricValue {
                value: 0.2,
                sources: [SensorId::from("wifi")].into_iter().collect(),
            },
        );
        s
    }

    fn allocation(granted: &[&str], isolation: IsolationLevel) -> SensoryAllocation {
        SensoryAllocation {
            entity_id: EntityId::new(),
            granted: granted.iter().map(|s| SensorId::from(*s)).collect(),
            isolation,
        }
    }

    #[test]
    fn shared_view_keeps_all_metrics_but_only_granted_readings() {
        let view = snapshot().restricted_to(&allocation(&["wifi"], IsolationLevel::Shared));
        assert_eq!(view.readings.len(), 1);
        assert!(view.reading("wifi").is_some());
        assert_eq!(view.metrics.len(), 2);
        assert_eq!(view.sequence, 7);
    }

    #[test]
    fn isolated_view_drops_foreign_metrics() {
        let view = snapshot().restricted_to(&allocation(&["wifi"], IsolationLevel::Isolated));
        assert_eq!(view.metric("motion_score"), Some(0.2));
        assert_eq!(view.metric("cpu_temp_c"), None);
    }

    #[test]
    fn empty_allocation_yields_no_readings() {
        let view = snapshot().restricted_to(&allocation(&[], IsolationLevel::Shared));
        assert!(view.readings.is_empty());
    }
}
