//! [`Hypervisor`] – lifecycle and sensory allocation of consciousness entities.
//!
//! Each entity moves through `Created → Running → Terminated`.  While running
//! it owns exactly one [`SensoryAllocation`] and a dedicated subscriber task
//! that turns every published [`FusedSnapshot`] into the entity's filtered
//! view.  Views are computed by [`FusedSnapshot::restricted_to`], a pure
//! function, so one entity's task failing or lagging cannot disturb another
//! entity or the shared snapshot.
//!
//! Terminated entities are kept as tombstones so that a repeated
//! [`Hypervisor::terminate`] is a silent no-op and [`Hypervisor::describe`]
//! can still report them.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use os4ai_middleware::{EventBus, SnapshotChannel, SnapshotReceiver};
use os4ai_types::{
    AllocationPolicy, ConsciousnessEntity, EntityId, EntityManifest, Event, EventPayload,
    FusedSnapshot, HypervisorError, LifecycleState, SensorId, SensoryAllocation,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::allocation::{AllocationTable, resolve_request};

const EVENT_SOURCE: &str = "os4ai-kernel::hypervisor";

/// Handles that exist only while the entity is running.
struct LiveHandles {
    allocation_tx: watch::Sender<Arc<SensoryAllocation>>,
    view_tx: Arc<watch::Sender<Arc<FusedSnapshot>>>,
    task: JoinHandle<()>,
}

struct EntitySlot {
    entity: ConsciousnessEntity,
    live: Option<LiveHandles>,
}

#[derive(Default)]
struct HypervisorState {
    allocations: AllocationTable,
    entities: HashMap<EntityId, EntitySlot>,
}

/// Entity registry and snapshot multiplexer.
///
/// Methods that start subscriber tasks must be called from within a Tokio
/// runtime.
pub struct Hypervisor {
    state: Mutex<HypervisorState>,
    snapshots: SnapshotChannel,
    events: EventBus,
    policy: AllocationPolicy,
}

impl Hypervisor {
    /// `known` is the adapter registry's sensor ids; allocations can never
    /// reference anything else.
    pub fn new(
        known: BTreeSet<SensorId>,
        snapshots: SnapshotChannel,
        events: EventBus,
        policy: AllocationPolicy,
    ) -> Self {
        Self {
            state: Mutex::new(HypervisorState {
                allocations: AllocationTable::new(known),
                entities: HashMap::new(),
            }),
            snapshots,
            events,
            policy,
        }
    }

    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    fn state(&self) -> MutexGuard<'_, HypervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate `manifest`, allocate the available subset of its sensors and
    /// start the entity's view subscriber.
    ///
    /// # Errors
    ///
    /// - [`HypervisorError::InvalidManifest`] – empty name or sensor list.
    /// - [`HypervisorError::UnknownSensor`] – per the allocation policy.
    pub fn spawn(&self, manifest: EntityManifest) -> Result<EntityId, HypervisorError> {
        let mut state = self.state();
        let granted = resolve_request(&manifest, state.allocations.known_sensors(), self.policy)?;

        let id = EntityId::new();
        let allocation = state.allocations.grant(SensoryAllocation {
            entity_id: id,
            granted,
            isolation: manifest.isolation,
        })?;

        let mut entity = ConsciousnessEntity {
            id,
            manifest,
            allocation: (*allocation).clone(),
            state: LifecycleState::Created,
            spawned_at: Utc::now(),
        };

        let mut snapshots = self.snapshots.subscribe();
        let initial = Arc::new(snapshots.latest().restricted_to(&allocation));
        let (view_tx, _) = watch::channel(initial);
        let view_tx = Arc::new(view_tx);
        let (allocation_tx, allocation_rx) = watch::channel(allocation);
        let task = tokio::spawn(run_view_subscriber(
            id,
            snapshots,
            allocation_rx,
            Arc::clone(&view_tx),
        ));

        entity.state = LifecycleState::Running;
        info!(
            entity = %id,
            name = %entity.manifest.name,
            sensors = ?entity.allocation.granted,
            "entity spawned"
        );
        self.emit(&entity);

        state.entities.insert(
            id,
            EntitySlot {
                entity,
                live: Some(LiveHandles {
                    allocation_tx,
                    view_tx,
                    task,
                }),
            },
        );
        Ok(id)
    }

    /// Stop the entity's subscriber and release its allocation.
    ///
    /// Terminating an already-terminated entity returns `Ok(())` and changes
    /// nothing.
    ///
    /// # Errors
    ///
    /// [`HypervisorError::UnknownEntity`] when `id` was never spawned.
    pub fn terminate(&self, id: EntityId) -> Result<(), HypervisorError> {
        let mut state = self.state();
        let HypervisorState {
            allocations,
            entities,
        } = &mut *state;
        let slot = entities
            .get_mut(&id)
            .ok_or(HypervisorError::UnknownEntity(id))?;

        let Some(live) = slot.live.take() else {
            debug!(entity = %id, "terminate on terminated entity ignored");
            return Ok(());
        };
        live.task.abort();
        allocations.release(id);
        slot.entity.state = LifecycleState::Terminated;

        info!(entity = %id, name = %slot.entity.manifest.name, "entity terminated");
        let entity = slot.entity.clone();
        drop(state);
        self.emit(&entity);
        Ok(())
    }

    /// Terminate every running entity.  Used on hub shutdown.
    pub fn terminate_all(&self) {
        for id in self.list() {
            if let Err(e) = self.terminate(id) {
                warn!(entity = %id, error = %e, "terminate during shutdown failed");
            }
        }
    }

    /// Ids of every non-terminated entity, oldest first.
    pub fn list(&self) -> Vec<EntityId> {
        let state = self.state();
        let mut running: Vec<&ConsciousnessEntity> = state
            .entities
            .values()
            .filter(|s| s.live.is_some())
            .map(|s| &s.entity)
            .collect();
        running.sort_by_key(|e| (e.spawned_at, e.id));
        running.into_iter().map(|e| e.id).collect()
    }

    /// The current shared snapshot filtered to `id`'s allocation.
    ///
    /// # Errors
    ///
    /// [`HypervisorError::UnknownEntity`] when `id` is unknown or terminated.
    pub fn get_view(&self, id: EntityId) -> Result<FusedSnapshot, HypervisorError> {
        let allocation = {
            let state = self.state();
            match state.entities.get(&id) {
                Some(slot) if slot.live.is_some() => state.allocations.get(id),
                _ => None,
            }
        }
        .ok_or(HypervisorError::UnknownEntity(id))?;
        Ok(self.snapshots.current().restricted_to(&allocation))
    }

    /// Push stream of `id`'s filtered views.  The stream closes when the
    /// entity is terminated.
    ///
    /// # Errors
    ///
    /// [`HypervisorError::UnknownEntity`] when `id` is unknown or terminated.
    pub fn subscribe_view(
        &self,
        id: EntityId,
    ) -> Result<watch::Receiver<Arc<FusedSnapshot>>, HypervisorError> {
        let state = self.state();
        state
            .entities
            .get(&id)
            .and_then(|slot| slot.live.as_ref())
            .map(|live| live.view_tx.subscribe())
            .ok_or(HypervisorError::UnknownEntity(id))
    }

    /// Full description of an entity, including terminated ones.
    ///
    /// # Errors
    ///
    /// [`HypervisorError::UnknownEntity`] when `id` was never spawned.
    pub fn describe(&self, id: EntityId) -> Result<ConsciousnessEntity, HypervisorError> {
        self.state()
            .entities
            .get(&id)
            .map(|slot| slot.entity.clone())
            .ok_or(HypervisorError::UnknownEntity(id))
    }

    /// Withdraw `sensor` from a running entity.  Other entities are untouched
    /// and the entity's next view no longer contains the sensor.
    ///
    /// # Errors
    ///
    /// - [`HypervisorError::UnknownEntity`] – `id` was never spawned.
    /// - [`HypervisorError::AlreadyTerminated`] – the entity has stopped.
    pub fn revoke(&self, id: EntityId, sensor: &str) -> Result<SensoryAllocation, HypervisorError> {
        let mut state = self.state();
        let HypervisorState {
            allocations,
            entities,
        } = &mut *state;
        let slot = entities
            .get_mut(&id)
            .ok_or(HypervisorError::UnknownEntity(id))?;
        let Some(live) = slot.live.as_ref() else {
            return Err(HypervisorError::AlreadyTerminated(id));
        };
        let next = allocations
            .revoke(id, sensor)
            .ok_or(HypervisorError::UnknownEntity(id))?;
        slot.entity.allocation = (*next).clone();
        live.allocation_tx.send_replace(Arc::clone(&next));
        info!(entity = %id, sensor, "sensor revoked");
        Ok((*next).clone())
    }

    fn emit(&self, entity: &ConsciousnessEntity) {
        self.events.publish(Event::new(
            EVENT_SOURCE,
            EventPayload::EntityLifecycle {
                entity: entity.id,
                name: entity.manifest.name.clone(),
                state: entity.state,
            },
        ));
    }
}

impl Drop for Hypervisor {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for slot in state.entities.values_mut() {
            if let Some(live) = slot.live.take() {
                live.task.abort();
            }
        }
    }
}

/// Recompute the entity's view on every new snapshot or allocation change.
async fn run_view_subscriber(
    entity: EntityId,
    mut snapshots: SnapshotReceiver,
    mut allocation: watch::Receiver<Arc<SensoryAllocation>>,
    view: Arc<watch::Sender<Arc<FusedSnapshot>>>,
) {
    let mut latest = snapshots.latest();
    loop {
        tokio::select! {
            next = snapshots.changed() => match next {
                Some(snapshot) => latest = snapshot,
                None => break,
            },
            changed = allocation.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let grant = Arc::clone(&allocation.borrow_and_update());
        view.send_replace(Arc::new(latest.restricted_to(&grant)));
        trace!(%entity, sequence = latest.sequence, "view refreshed");
    }
    debug!(%entity, "view subscriber stopped");
}
