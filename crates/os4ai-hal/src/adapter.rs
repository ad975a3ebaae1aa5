//! Generic `SensorAdapter` trait and the probe context adapters run in.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use os4ai_kernel::{CommandGateway, CommandOutput, CommandSchema, CommandSpec};
use os4ai_types::{AdapterError, ReadingValue, SensorId, SensorKind};

/// Host flavour, which decides the probe commands an adapter issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }
}

/// Everything a probe needs: who it is and how to reach the OS.
pub struct ProbeContext<'a> {
    pub sensor: &'a SensorId,
    pub gateway: &'a CommandGateway,
    pub timeout: Duration,
}

impl ProbeContext<'_> {
    /// Run `spec` through the gateway under this probe's timeout.
    ///
    /// # Errors
    ///
    /// Any [`GatewayError`][os4ai_types::GatewayError] is wrapped as
    /// [`AdapterError::HardwareUnavailable`].
    pub async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, AdapterError> {
        self.gateway
            .execute(&spec.with_timeout(self.timeout))
            .await
            .map_err(|source| AdapterError::HardwareUnavailable {
                sensor: self.sensor.clone(),
                source,
            })
    }

    /// Shorthand for an [`AdapterError::InvalidReading`] on this sensor.
    pub fn invalid(&self, details: impl Into<String>) -> AdapterError {
        AdapterError::InvalidReading {
            sensor: self.sensor.clone(),
            details: details.into(),
        }
    }
}

/// One hardware domain: how to probe it, and how to fake it.
///
/// Implementations are stateless; circuit state and the last good reading
/// are kept by [`ManagedAdapter`][crate::managed::ManagedAdapter].
#[async_trait]
pub trait SensorAdapter: Send + Sync {
    fn kind(&self) -> SensorKind;

    /// Argument shapes of every command [`SensorAdapter::probe`] may issue.
    /// The registry installs them in the gateway's allow-list.
    fn command_schemas(&self) -> Vec<CommandSchema>;

    /// Query the hardware and parse the result.
    ///
    /// # Errors
    ///
    /// - [`AdapterError::HardwareUnavailable`] – the command failed.
    /// - [`AdapterError::InvalidReading`] – the output was not understood.
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<ReadingValue, AdapterError>;

    /// A structurally valid synthetic value for time `at`.  Deterministic
    /// and never touches the gateway.
    fn simulate(&self, at: DateTime<Utc>) -> ReadingValue;
}

/// Seconds since the epoch as `f64`, the phase input for simulations.
pub(crate) fn phase(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}
