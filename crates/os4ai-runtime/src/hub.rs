//! [`SensorHub`] – wires the whole pipeline together.
//!
//! ```text
//!  AdapterRegistry ──▶ PollScheduler ──mpsc──▶ FusionEngine ──watch──▶ SnapshotChannel
//!        │                  │                                               │
//!  CommandGateway      ReadingCache                                    Hypervisor ──▶ entity views
//! ```
//!
//! The hub owns the single [`ModeSwitch`]; [`SensorHub::set_simulated`] is
//! the only place the operating mode changes.

use std::sync::Arc;
use std::time::Duration;

use os4ai_hal::{
    AdapterRegistry, BluetoothAction, DeviceControl, ModeSwitch, OperatingMode, RegistryBuilder,
};
use os4ai_kernel::Hypervisor;
use os4ai_middleware::{EventBus, SnapshotChannel, SnapshotReceiver};
use os4ai_perception::FusionEngine;
use os4ai_types::{
    CircuitState, ConfigError, EntityId, EntityManifest, Event, EventPayload, FusedSnapshot,
    GatewayError, HubConfig, HypervisorError, Quality, SensorId, SensorKind,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::ReadingCache;
use crate::scheduler::PollScheduler;

const EVENT_SOURCE: &str = "os4ai-runtime::hub";

/// Per-sensor health line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorStatus {
    pub id: SensorId,
    pub kind: SensorKind,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
    pub poll_interval_ms: u64,
    pub last_quality: Option<Quality>,
}

/// Hub-wide counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubStatus {
    pub simulated: bool,
    pub sequence: u64,
    pub sensors: usize,
    pub entities: usize,
    pub gateway_invocations: u64,
    pub cache_refreshes: u64,
}

pub struct SensorHub {
    config: HubConfig,
    registry: Arc<AdapterRegistry>,
    cache: Arc<ReadingCache>,
    mode: ModeSwitch,
    snapshots: SnapshotChannel,
    events: EventBus,
    hypervisor: Arc<Hypervisor>,
    control: DeviceControl,
    scheduler: PollScheduler,
    fusion: JoinHandle<()>,
}

impl SensorHub {
    /// Start a hub with the built-in adapters and real processes.  Must be
    /// called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when `config` fails validation.
    pub fn start(config: HubConfig) -> Result<Self, ConfigError> {
        Self::start_with(config, |builder| builder)
    }

    /// Like [`SensorHub::start`], letting `customize` adjust the registry
    /// builder (runner, platform, extra adapters) before the built-in
    /// adapters from `config` are added.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when `config` or the registry fails validation.
    pub fn start_with(
        config: HubConfig,
        customize: impl FnOnce(RegistryBuilder) -> RegistryBuilder,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let events = EventBus::default();
        let registry = Arc::new(
            customize(RegistryBuilder::new(events.clone()))
                .with_defaults(&config)
                .build()?,
        );
        let control = registry.control();

        let snapshots = SnapshotChannel::new();
        let mode = ModeSwitch::new(config.simulated);
        let cache = Arc::new(ReadingCache::new());
        let hypervisor = Arc::new(Hypervisor::new(
            registry.ids().cloned().collect(),
            snapshots.clone(),
            events.clone(),
            config.allocation_policy,
        ));

        let (tx, rx) = mpsc::channel(config.scheduler.fan_in_capacity);
        let fusion = tokio::spawn(FusionEngine::new(snapshots.clone()).run(rx));
        let scheduler = PollScheduler::start(
            &registry,
            Arc::clone(&cache),
            mode.clone(),
            config.scheduler,
            tx,
            events.clone(),
        );

        info!(
            sensors = registry.len(),
            simulated = config.simulated,
            "sensor hub started"
        );
        Ok(Self {
            config,
            registry,
            cache,
            mode,
            snapshots,
            events,
            hypervisor,
            control,
            scheduler,
            fusion,
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The latest fused snapshot.  Never fails; before the first reading it
    /// is the empty snapshot.
    pub fn current(&self) -> Arc<FusedSnapshot> {
        self.snapshots.current()
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        self.snapshots.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ReadingCache {
        &self.cache
    }

    pub fn hypervisor(&self) -> &Arc<Hypervisor> {
        &self.hypervisor
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode.snapshot()
    }

    /// Switch between hardware and simulated readings.  Takes effect at each
    /// adapter's next poll cycle.  Returns the previous mode.
    pub fn set_simulated(&self, simulated: bool) -> OperatingMode {
        let previous = self.mode.set(simulated);
        if previous.is_simulated() != simulated {
            info!(simulated, "operating mode changed");
            self.events.publish(Event::new(
                EVENT_SOURCE,
                EventPayload::ModeChanged { simulated },
            ));
        }
        previous
    }

    // ── entities ────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// See [`Hypervisor::spawn`].
    pub fn spawn(&self, manifest: EntityManifest) -> Result<EntityId, HypervisorError> {
        self.hypervisor.spawn(manifest)
    }

    /// # Errors
    ///
    /// See [`Hypervisor::terminate`].
    pub fn terminate(&self, id: EntityId) -> Result<(), HypervisorError> {
        self.hypervisor.terminate(id)
    }

    pub fn list(&self) -> Vec<EntityId> {
        self.hypervisor.list()
    }

    /// # Errors
    ///
    /// See [`Hypervisor::get_view`].
    pub fn get_view(&self, id: EntityId) -> Result<FusedSnapshot, HypervisorError> {
        self.hypervisor.get_view(id)
    }

    // ── status ──────────────────────────────────────────────────────────────

    pub fn sensor_status(&self) -> Vec<SensorStatus> {
        let snapshot = self.current();
        self.registry
            .iter()
            .map(|adapter| SensorStatus {
                id: adapter.id().clone(),
                kind: adapter.kind(),
                circuit: adapter.circuit_state(),
                consecutive_failures: adapter.consecutive_failures(),
                poll_interval_ms: adapter.settings().poll_interval_ms,
                last_quality: snapshot.reading(adapter.id().as_str()).map(|r| r.quality),
            })
            .collect()
    }

    pub fn status(&self) -> HubStatus {
        HubStatus {
            simulated: self.mode().is_simulated(),
            sequence: self.current().sequence,
            sensors: self.registry.len(),
            entities: self.hypervisor.list().len(),
            gateway_invocations: self.registry.gateway().invocations(),
            cache_refreshes: self.cache.refreshes(),
        }
    }

    // ── device control ──────────────────────────────────────────────────────

    fn ensure_hardware(&self, what: &str) -> Result<(), GatewayError> {
        if self.mode().is_simulated() {
            return Err(GatewayError::Rejected(format!(
                "{what} needs hardware; simulated mode is on"
            )));
        }
        Ok(())
    }

    fn invalidate_kind(&self, kind: SensorKind) {
        for adapter in self.registry.iter().filter(|a| a.kind() == kind) {
            self.cache.invalidate(adapter.id().as_str());
        }
    }

    /// Connect, disconnect or forget a Bluetooth device, then drop the
    /// cached Bluetooth readings.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Rejected`] in simulated mode or for a malformed MAC,
    /// otherwise the command's failure.
    pub async fn bluetooth(&self, action: BluetoothAction, mac: &str) -> Result<String, GatewayError> {
        self.ensure_hardware("bluetooth control")?;
        let out = self.control.bluetooth(action, mac).await?;
        self.invalidate_kind(SensorKind::Bluetooth);
        Ok(out)
    }

    /// Stealth mode hides the host from Bluetooth discovery.
    ///
    /// # Errors
    ///
    /// As for [`SensorHub::bluetooth`].
    pub async fn set_stealth(&self, stealth: bool) -> Result<String, GatewayError> {
        self.ensure_hardware("bluetooth discoverability")?;
        let out = self.control.set_discoverable(!stealth).await?;
        self.invalidate_kind(SensorKind::Bluetooth);
        Ok(out)
    }

    /// # Errors
    ///
    /// As for [`SensorHub::bluetooth`].
    pub async fn set_wifi_power(&self, on: bool) -> Result<String, GatewayError> {
        self.ensure_hardware("wifi power")?;
        let out = self.control.set_wifi_power(on).await?;
        self.invalidate_kind(SensorKind::Wifi);
        Ok(out)
    }

    /// Terminate every entity, stop the poll loops (waiting for in-flight
    /// polls up to the gateway's maximum timeout) and drain the fusion
    /// engine.
    pub async fn shutdown(self) {
        info!("sensor hub shutting down");
        self.hypervisor.terminate_all();
        let grace = Duration::from_millis(self.config.gateway.max_timeout_ms) + Duration::from_secs(1);
        self.scheduler.shutdown(grace).await;
        if let Err(e) = self.fusion.await {
            warn!(error = %e, "fusion engine task failed");
        }
        info!("sensor hub stopped");
    }
}
