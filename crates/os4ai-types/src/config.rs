//! Runtime configuration for the sensor hub.
//!
//! Every struct deserialises with `#[serde(default)]`, so a partial TOML
//! document only overrides what it names.  Zero durations are rejected by
//! [`HubConfig::validate`].
//!
//! | Adapter   | Poll interval | Cache TTL | Gateway timeout |
//! |-----------|---------------|-----------|-----------------|
//! | thermal   | 1 s           | 1 s       | 5 s             |
//! | emi       | 2 s           | 2 s       | 5 s             |
//! | bluetooth | 10 s          | 10 s      | 5 s             |
//! | wifi      | 5 s           | 5 s       | 5 s             |
//! | acoustic  | 30 s          | 30 s      | 5 s             |

use std::collections::BTreeMap;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::reading::SensorKind;

pub const DEFAULT_GATEWAY_TIMEOUT_MS: u64 = 5_000;

/// Per-adapter cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AdapterSettings {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub cache_ttl_ms: u64,
    pub gateway_timeout_ms: u64,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self::defaults_for(SensorKind::Wifi)
    }
}

impl AdapterSettings {
    pub fn defaults_for(kind: SensorKind) -> Self {
        let interval_ms = match kind {
            SensorKind::Thermal => 1_000,
            SensorKind::Emi => 2_000,
            SensorKind::Wifi => 5_000,
            SensorKind::Bluetooth => 10_000,
            SensorKind::Acoustic => 30_000,
        };
        Self {
            enabled: true,
            poll_interval_ms: interval_ms,
            cache_ttl_ms: interval_ms,
            gateway_timeout_ms: DEFAULT_GATEWAY_TIMEOUT_MS,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    /// # Errors
    ///
    /// [`ConfigError::Zero`] when any duration is zero.
    pub fn validate(&self, kind: SensorKind) -> Result<(), ConfigError> {
        for (name, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("cache_ttl_ms", self.cache_ttl_ms),
            ("gateway_timeout_ms", self.gateway_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero {
                    field: format!("adapters.{kind}.{name}"),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GatewaySettings {
    /// Upper clamp applied to every per-call timeout.
    pub max_timeout_ms: u64,
    /// Process spawns allowed per second across all adapters.
    pub spawns_per_second: u32,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_timeout_ms: 30_000,
            spawns_per_second: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CircuitSettings {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 10_000,
        }
    }
}

impl CircuitSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Ceiling for the backoff multiplier applied while a circuit is open.
    pub max_backoff_factor: u32,
    pub fan_in_capacity: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_backoff_factor: 8,
            fan_in_capacity: 256,
        }
    }
}

/// What `spawn` does with requested sensors that are not registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AllocationPolicy {
    /// Drop unknown sensors; fail only when none of the request is available.
    #[default]
    Lenient,
    /// Fail when any requested sensor is unknown.
    Strict,
}

/// Top-level hub configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct HubConfig {
    /// Start in simulated (cloud) mode.
    pub simulated: bool,
    pub gateway: GatewaySettings,
    pub circuit: CircuitSettings,
    pub scheduler: SchedulerSettings,
    pub allocation_policy: AllocationPolicy,
    /// Overrides keyed by adapter kind; missing kinds use their defaults.
    pub adapters: BTreeMap<SensorKind, AdapterSettings>,
}

impl HubConfig {
    pub fn settings_for(&self, kind: SensorKind) -> AdapterSettings {
        self.adapters
            .get(&kind)
            .copied()
            .unwrap_or_else(|| AdapterSettings::defaults_for(kind))
    }

    /// Fill in every adapter table so the document written to disk is complete.
    pub fn with_all_adapters(mut self) -> Self {
        for kind in SensorKind::ALL {
            self.adapters
                .entry(kind)
                .or_insert_with(|| AdapterSettings::defaults_for(kind));
        }
        self
    }

    /// # Errors
    ///
    /// Returns the first zero duration or out-of-range value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in SensorKind::ALL {
            self.settings_for(kind).validate(kind)?;
        }
        let zeros = [
            ("gateway.max_timeout_ms", self.gateway.max_timeout_ms),
            ("gateway.spawns_per_second", u64::from(self.gateway.spawns_per_second)),
            ("circuit.failure_threshold", u64::from(self.circuit.failure_threshold)),
            ("circuit.cooldown_ms", self.circuit.cooldown_ms),
            ("scheduler.max_backoff_factor", u64::from(self.scheduler.max_backoff_factor)),
            ("scheduler.fan_in_capacity", self.scheduler.fan_in_capacity as u64),
        ];
        for (field, value) in zeros {
            if value == 0 {
                return Err(ConfigError::Zero {
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(HubConfig::default().validate().is_ok());
    }

    #[test]
    fn thermal_polls_faster_than_acoustic() {
        let cfg = HubConfig::default();
        assert!(
            cfg.settings_for(SensorKind::Thermal).poll_interval()
                < cfg.settings_for(SensorKind::Acoustic).poll_interval()
        );
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut cfg = HubConfig::default();
        cfg.adapters.insert(
            SensorKind::Wifi,
            AdapterSettings {
                cache_ttl_ms: 0,
                ..AdapterSettings::defaults_for(SensorKind::Wifi)
            },
        );
        let err = cfg.validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::Zero {
                field: "adapters.wifi.cache_ttl_ms".into()
            }
        );
    }

    #[test]
    fn zero_spawn_rate_is_rejected() {
        let mut cfg = HubConfig::default();
        cfg.gateway.spawns_per_second = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Zero { .. })));
    }

    #[test]
    fn with_all_adapters_fills_every_kind() {
        let cfg = HubConfig::default().with_all_adapters();
        assert_eq!(cfg.adapters.len(), SensorKind::ALL.len());
    }
}
