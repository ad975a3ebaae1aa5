//! [`AllocationTable`] – which sensors each entity may observe.
//!
//! Entities are only ever granted sensors that exist in the adapter
//! registry; the table is constructed with that registry's ids and refuses
//! anything else.  Allocations are stored as immutable `Arc` values and
//! replaced wholesale on change, so a reader holding the previous value is
//! never affected by a revoke on another entity.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use os4ai_types::{
    AllocationPolicy, EntityId, EntityManifest, HypervisorError, SensorId, SensoryAllocation,
};

/// Resolve a manifest's requested sensors against `known` under `policy`.
///
/// # Errors
///
/// - [`HypervisorError::InvalidManifest`] – empty name or empty request.
/// - [`HypervisorError::UnknownSensor`] – under `Strict`, any unknown name;
///   under `Lenient`, only when nothing requested is available.
pub fn resolve_request(
    manifest: &EntityManifest,
    known: &BTreeSet<SensorId>,
    policy: AllocationPolicy,
) -> Result<BTreeSet<SensorId>, HypervisorError> {
    if manifest.name.trim().is_empty() {
        return Err(HypervisorError::InvalidManifest(
            "entity name must not be empty".into(),
        ));
    }
    if manifest.sensors.is_empty() {
        return Err(HypervisorError::InvalidManifest(
            "at least one sensor must be requested".into(),
        ));
    }

    let mut granted = BTreeSet::new();
    let mut unknown = Vec::new();
    for name in &manifest.sensors {
        let name = name.trim();
        if known.contains(name) {
            granted.insert(SensorId::from(name));
        } else if !unknown.iter().any(|u: &String| u == name) {
            unknown.push(name.to_string());
        }
    }

    match policy {
        AllocationPolicy::Strict if !unknown.is_empty() => {
            Err(HypervisorError::UnknownSensor(unknown))
        }
        _ if granted.is_empty() => Err(HypervisorError::UnknownSensor(unknown)),
        _ => Ok(granted),
    }
}

/// Per-entity sensory grants.
#[derive(Debug, Default)]
pub struct AllocationTable {
    known: BTreeSet<SensorId>,
    grants: HashMap<EntityId, Arc<SensoryAllocation>>,
}

impl AllocationTable {
    pub fn new(known: BTreeSet<SensorId>) -> Self {
        Self {
            known,
            grants: HashMap::new(),
        }
    }

    pub fn known_sensors(&self) -> &BTreeSet<SensorId> {
        &self.known
    }

    /// Install `allocation`, replacing any previous grant for the same entity.
    ///
    /// # Errors
    ///
    /// [`HypervisorError::UnknownSensor`] when the allocation names a sensor
    /// outside the registry.
    pub fn grant(
        &mut self,
        allocation: SensoryAllocation,
    ) -> Result<Arc<SensoryAllocation>, HypervisorError> {
        let foreign: Vec<String> = allocation
            .granted
            .iter()
            .filter(|id| !self.known.contains(*id))
            .map(|id| id.to_string())
            .collect();
        if !foreign.is_empty() {
            return Err(HypervisorError::UnknownSensor(foreign));
        }
        let allocation = Arc::new(allocation);
        self.grants
            .insert(allocation.entity_id, Arc::clone(&allocation));
        Ok(allocation)
    }

    /// Remove `sensor` from `entity`'s grant and return the new allocation.
    /// No-ops (returning the unchanged allocation) when it was not granted.
    pub fn revoke(&mut self, entity: EntityId, sensor: &str) -> Option<Arc<SensoryAllocation>> {
        let current = self.grants.get(&entity)?;
        if !current.permits(sensor) {
            return Some(Arc::clone(current));
        }
        let next = Arc::new(current.without(sensor));
        self.grants.insert(entity, Arc::clone(&next));
        Some(next)
    }

    /// Drop the entity's grant entirely.
    pub fn release(&mut self, entity: EntityId) -> Option<Arc<SensoryAllocation>> {
        self.grants.remove(&entity)
    }

    pub fn get(&self, entity: EntityId) -> Option<Arc<SensoryAllocation>> {
        self.grants.get(&entity).cloned()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use os4ai_types::IsolationLevel;

    fn known(ids: &[&str]) -> BTreeSet<SensorId> {
        ids.iter().map(|s| SensorId::from(*s)).collect()
    }

    fn allocation(entity: EntityId, ids: &[&str]) -> SensoryAllocation {
        SensoryAllocation {
            entity_id: entity,
            granted: known(ids),
            isolation: IsolationLevel::Shared,
        }
    }

    #[test]
    fn lenient_drops_unknown_sensors() {
        let manifest = EntityManifest::new("room-mapper", ["wifi", "acoustic", "bluetooth"]);
        let granted = resolve_request(
            &manifest,
            &known(&["wifi", "acoustic"]),
            AllocationPolicy::Lenient,
        )
        .unwrap();
        assert_eq!(granted, known(&["wifi", "acoustic"]));
    }

    #[test]
    fn strict_lists_unknown_sensors() {
        let manifest = EntityManifest::new("room-mapper", ["wifi", "acoustic", "bluetooth"]);
        let err = resolve_request(
            &manifest,
            &known(&["wifi", "acoustic"]),
            AllocationPolicy::Strict,
        )
        .unwrap_err();
        assert_eq!(err, HypervisorError::UnknownSensor(vec!["bluetooth".into()]));
    }

    #[test]
    fn lenient_with_nothing_available_errors() {
        let manifest = EntityManifest::new("ghost", ["lidar"]);
        let err =
            resolve_request(&manifest, &known(&["wifi"]), AllocationPolicy::Lenient).unwrap_err();
        assert_eq!(err, HypervisorError::UnknownSensor(vec!["lidar".into()]));
    }

    #[test]
    fn empty_name_is_invalid() {
        let manifest = EntityManifest::new("  ", ["wifi"]);
        let err =
            resolve_request(&manifest, &known(&["wifi"]), AllocationPolicy::Lenient).unwrap_err();
        assert!(matches!(err, HypervisorError::InvalidManifest(_)));
    }

    #[test]
    fn grant_refuses_foreign_sensors() {
        let mut table = AllocationTable::new(known(&["wifi"]));
        let err = table
            .grant(allocation(EntityId::new(), &["wifi", "lidar"]))
            .unwrap_err();
        assert_eq!(err, HypervisorError::UnknownSensor(vec!["lidar".into()]));
        assert!(table.is_empty());
    }

    #[test]
    fn revoke_leaves_other_entities_alone() {
        let mut table = AllocationTable::new(known(&["wifi", "thermal"]));
        let a = EntityId::new();
        let b = EntityId::new();
        table.grant(allocation(a, &["wifi", "thermal"])).unwrap();
        table.grant(allocation(b, &["wifi"])).unwrap();

        let before_a = table.get(a).unwrap();
        let after = table.revoke(a, "wifi").unwrap();
        assert!(!after.permits("wifi"));
        // The old Arc a reader may hold is unchanged.
        assert!(before_a.permits("wifi"));
        assert!(table.get(b).unwrap().permits("wifi"));
    }

    #[test]
    fn unknown_entity_has_no_grant() {
        let mut table = AllocationTable::new(known(&["wifi"]));
        let id = EntityId::new();
        assert!(table.get(id).is_none());
        assert!(table.revoke(id, "wifi").is_none());
    }

    #[test]
    fn release_removes_grant() {
        let mut table = AllocationTable::new(known(&["wifi"]));
        let id = EntityId::new();
        table.grant(allocation(id, &["wifi"])).unwrap();
        assert!(table.release(id).is_some());
        assert!(table.get(id).is_none());
        assert!(table.release(id).is_none());
    }
}
