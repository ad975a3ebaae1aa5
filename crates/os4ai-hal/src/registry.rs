//! [`AdapterRegistry`] – the set of managed sensor adapters, keyed by id.
//!
//! The registry is assembled once with [`RegistryBuilder`] and is immutable
//! afterwards.  Building it also builds the [`CommandGateway`]: the gateway's
//! allow-list is exactly the union of the registered adapters' command
//! schemas plus the device-control schemas, so nothing else can be spawned.

use std::collections::BTreeMap;
use std::sync::Arc;

use os4ai_kernel::{CommandGateway, CommandRunner, CommandSchema, ProcessRunner, SchemaSet};
use os4ai_middleware::EventBus;
use os4ai_types::{
    AdapterSettings, CircuitSettings, ConfigError, GatewaySettings, HubConfig, SensorId,
    SensorKind,
};
use tracing::info;

use crate::acoustic::AcousticAdapter;
use crate::adapter::{Platform, SensorAdapter};
use crate::bluetooth::BluetoothAdapter;
use crate::control::DeviceControl;
use crate::emi::EmiAdapter;
use crate::managed::ManagedAdapter;
use crate::thermal::ThermalAdapter;
use crate::wifi::WifiAdapter;

/// The built-in adapter for `kind` on `platform`.
pub fn builtin_adapter(kind: SensorKind, platform: Platform) -> Box<dyn SensorAdapter> {
    match kind {
        SensorKind::Bluetooth => Box::new(BluetoothAdapter::new(platform)),
        SensorKind::Wifi => Box::new(WifiAdapter::new(platform)),
        SensorKind::Thermal => Box::new(ThermalAdapter),
        SensorKind::Acoustic => Box::new(AcousticAdapter),
        SensorKind::Emi => Box::new(EmiAdapter),
    }
}

pub struct AdapterRegistry {
    adapters: BTreeMap<SensorId, Arc<ManagedAdapter>>,
    gateway: Arc<CommandGateway>,
}

impl AdapterRegistry {
    pub fn get(&self, id: &str) -> Option<&Arc<ManagedAdapter>> {
        self.adapters.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &SensorId> {
        self.adapters.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ManagedAdapter>> {
        self.adapters.values()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn gateway(&self) -> &Arc<CommandGateway> {
        &self.gateway
    }

    /// Device control sharing this registry's gateway.
    pub fn control(&self) -> DeviceControl {
        DeviceControl::new(Arc::clone(&self.gateway))
    }
}

/// Assembles an [`AdapterRegistry`] and its gateway.
///
/// ```rust
/// use os4ai_hal::RegistryBuilder;
/// use os4ai_middleware::EventBus;
/// use os4ai_types::HubConfig;
///
/// let registry = RegistryBuilder::new(EventBus::default())
///     .with_defaults(&HubConfig::default())
///     .build()
///     .unwrap();
/// assert_eq!(registry.len(), 5);
/// ```
pub struct RegistryBuilder {
    events: EventBus,
    runner: Arc<dyn CommandRunner>,
    gateway: GatewaySettings,
    circuit: CircuitSettings,
    platform: Platform,
    extra_schemas: Vec<CommandSchema>,
    entries: Vec<(SensorId, Box<dyn SensorAdapter>, AdapterSettings)>,
}

impl RegistryBuilder {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            runner: Arc::new(ProcessRunner),
            gateway: GatewaySettings::default(),
            circuit: CircuitSettings::default(),
            platform: Platform::current(),
            extra_schemas: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Replace the process runner (tests use a scripted one).
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_gateway_settings(mut self, settings: GatewaySettings) -> Self {
        self.gateway = settings;
        self
    }

    pub fn with_circuit(mut self, settings: CircuitSettings) -> Self {
        self.circuit = settings;
        self
    }

    /// Probe commands for `platform` rather than the host's.  Must be called
    /// before [`RegistryBuilder::with_defaults`] to affect the built-ins.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Allow extra command shapes through the gateway.
    pub fn with_schemas(mut self, schemas: impl IntoIterator<Item = CommandSchema>) -> Self {
        self.extra_schemas.extend(schemas);
        self
    }

    /// Register `adapter` under its kind's name.
    pub fn with_adapter(self, adapter: Box<dyn SensorAdapter>, settings: AdapterSettings) -> Self {
        let id = SensorId::from(adapter.kind());
        self.with_adapter_id(id, adapter, settings)
    }

    pub fn with_adapter_id(
        mut self,
        id: SensorId,
        adapter: Box<dyn SensorAdapter>,
        settings: AdapterSettings,
    ) -> Self {
        self.entries.push((id, adapter, settings));
        self
    }

    /// Gateway and circuit settings from `config`, plus a built-in adapter
    /// for every enabled kind.
    pub fn with_defaults(mut self, config: &HubConfig) -> Self {
        self.gateway = config.gateway;
        self.circuit = config.circuit;
        for kind in SensorKind::ALL {
            let settings = config.settings_for(kind);
            if settings.enabled {
                let adapter = builtin_adapter(kind, self.platform);
                self = self.with_adapter(adapter, settings);
            }
        }
        self
    }

    /// # Errors
    ///
    /// - [`ConfigError::Zero`] – an adapter has a zero interval, TTL or
    ///   timeout.
    /// - [`ConfigError::Invalid`] – two adapters share an id.
    pub fn build(self) -> Result<AdapterRegistry, ConfigError> {
        let mut schemas = SchemaSet::new();
        for (id, adapter, settings) in &self.entries {
            settings.validate(adapter.kind())?;
            schemas.extend(adapter.command_schemas());
            if self.entries.iter().filter(|(other, _, _)| other == id).count() > 1 {
                return Err(ConfigError::Invalid {
                    field: "adapters".into(),
                    details: format!("duplicate sensor id '{id}'"),
                });
            }
        }
        schemas.extend(DeviceControl::command_schemas());
        schemas.extend(self.extra_schemas);

        let gateway = Arc::new(CommandGateway::new(schemas, self.runner, &self.gateway));
        let adapters: BTreeMap<_, _> = self
            .entries
            .into_iter()
            .map(|(id, adapter, settings)| {
                let managed = ManagedAdapter::new(
                    id.clone(),
                    adapter,
                    settings,
                    &self.circuit,
                    Arc::clone(&gateway),
                    self.events.clone(),
                );
                (id, Arc::new(managed))
            })
            .collect();

        info!(
            sensors = ?adapters.keys().map(SensorId::as_str).collect::<Vec<_>>(),
            "adapter registry built"
        );
        Ok(AdapterRegistry { adapters, gateway })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::ScriptedRunner;

    fn builder() -> RegistryBuilder {
        RegistryBuilder::new(EventBus::default())
            .with_runner(Arc::new(ScriptedRunner::new()))
            .with_platform(Platform::Linux)
    }

    #[test]
    fn defaults_register_every_enabled_kind() {
        let registry = builder().with_defaults(&HubConfig::default()).build().unwrap();
        let ids: Vec<_> = registry.ids().map(SensorId::as_str).collect();
        assert_eq!(ids, ["acoustic", "bluetooth", "emi", "thermal", "wifi"]);
    }

    #[test]
    fn disabled_adapters_are_skipped() {
        let mut config = HubConfig::default();
        config.adapters.insert(
            SensorKind::Acoustic,
            AdapterSettings {
                enabled: false,
                ..AdapterSettings::defaults_for(SensorKind::Acoustic)
            },
        );
        let registry = builder().with_defaults(&config).build().unwrap();
        assert!(registry.get("acoustic").is_none());
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn gateway_allows_adapter_and_control_programs() {
        let registry = builder().with_defaults(&HubConfig::default()).build().unwrap();
        let schemas = registry.gateway().schemas();
        for program in ["sensors", "nmcli", "bluetoothctl", "sox", "blueutil", "networksetup"] {
            assert!(schemas.knows(program), "{program} missing");
        }
        assert!(!schemas.knows("rm"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = builder()
            .with_adapter(Box::new(ThermalAdapter), AdapterSettings::default())
            .with_adapter(Box::new(ThermalAdapter), AdapterSettings::default())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = builder()
            .with_adapter(
                Box::new(ThermalAdapter),
                AdapterSettings {
                    poll_interval_ms: 0,
                    ..AdapterSettings::default()
                },
            )
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::Zero { .. }));
    }

    #[test]
    fn custom_ids_coexist() {
        let registry = builder()
            .with_adapter_id("thermal-a".into(), Box::new(ThermalAdapter), AdapterSettings::default())
            .with_adapter_id("thermal-b".into(), Box::new(ThermalAdapter), AdapterSettings::default())
            .build()
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("thermal-b").unwrap().kind(), SensorKind::Thermal);
    }
}
