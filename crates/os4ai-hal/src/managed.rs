//! [`ManagedAdapter`] – a [`SensorAdapter`] plus its identity, settings,
//! circuit breaker and last good reading.
//!
//! Poll outcomes by mode and circuit state:
//!
//! | Mode | Circuit | Result |
//! |---|---|---|
//! | simulated | any | `simulate()` tagged `simulated`, gateway untouched |
//! | hardware | closed | probe → `real`, or the adapter error |
//! | hardware | open (cooling down) | last good reading tagged `stale` |
//! | hardware | open (cooldown over) | one half-open trial probe |
//!
//! With no good reading yet, the stale fallback is a simulated value tagged
//! `stale`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use os4ai_kernel::CommandGateway;
use os4ai_middleware::EventBus;
use os4ai_types::{
    AdapterError, AdapterSettings, CircuitSettings, CircuitState, Event, EventPayload, Quality,
    SensorId, SensorKind, SensorReading,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapter::{ProbeContext, SensorAdapter};
use crate::circuit::{Admission, CircuitBreaker};
use crate::mode::OperatingMode;

const EVENT_SOURCE: &str = "os4ai-hal::circuit";

struct AdapterState {
    circuit: CircuitBreaker,
    last_good: Option<SensorReading>,
}

pub struct ManagedAdapter {
    id: SensorId,
    adapter: Box<dyn SensorAdapter>,
    settings: AdapterSettings,
    gateway: Arc<CommandGateway>,
    events: EventBus,
    state: Mutex<AdapterState>,
}

impl ManagedAdapter {
    pub fn new(
        id: SensorId,
        adapter: Box<dyn SensorAdapter>,
        settings: AdapterSettings,
        circuit: &CircuitSettings,
        gateway: Arc<CommandGateway>,
        events: EventBus,
    ) -> Self {
        Self {
            id,
            adapter,
            settings,
            gateway,
            events,
            state: Mutex::new(AdapterState {
                circuit: CircuitBreaker::new(circuit),
                last_good: None,
            }),
        }
    }

    pub fn id(&self) -> &SensorId {
        &self.id
    }

    pub fn kind(&self) -> SensorKind {
        self.adapter.kind()
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    fn state(&self) -> MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.state().circuit.state()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state().circuit.failures()
    }

    /// The most recent `real` reading, as produced.
    pub fn last_known(&self) -> Option<SensorReading> {
        self.state().last_good.clone()
    }

    /// A synthetic reading tagged `simulated`.  Never touches the gateway.
    pub fn simulate(&self) -> SensorReading {
        SensorReading::new(
            self.id.clone(),
            self.kind(),
            self.adapter.simulate(Utc::now()),
            Quality::Simulated,
        )
    }

    /// What an open circuit serves instead of probing.
    pub fn stale_fallback(&self) -> SensorReading {
        match self.last_known() {
            Some(reading) => reading.retagged(Quality::Stale),
            None => self.simulate().retagged(Quality::Stale),
        }
    }

    /// Poll once under `mode`, reporting an open circuit as an error.
    ///
    /// # Errors
    ///
    /// - [`AdapterError::CircuitOpen`] – the circuit refused the probe.
    /// - Any error from the probe itself, which also counts toward opening
    ///   the circuit.
    pub async fn try_poll(&self, mode: OperatingMode) -> Result<SensorReading, AdapterError> {
        if mode.is_simulated() {
            return Ok(self.simulate());
        }

        let admission = self.with_circuit(|c| c.admit(Instant::now()));
        match admission {
            Admission::Rejected => {
                return Err(AdapterError::CircuitOpen {
                    sensor: self.id.clone(),
                });
            }
            Admission::Trial => debug!(sensor = %self.id, "half-open trial probe"),
            Admission::Allowed => {}
        }
        let mut trial = TrialGuard {
            adapter: self,
            pending: admission == Admission::Trial,
        };

        let ctx = ProbeContext {
            sensor: &self.id,
            gateway: &self.gateway,
            timeout: self.settings.gateway_timeout(),
        };
        match self.adapter.probe(&ctx).await {
            Ok(value) => {
                let reading =
                    SensorReading::new(self.id.clone(), self.kind(), value, Quality::Real);
                self.state().last_good = Some(reading.clone());
                self.with_circuit(CircuitBreaker::record_success);
                trial.pending = false;
                Ok(reading)
            }
            Err(e) => {
                warn!(sensor = %self.id, error = %e, "probe failed");
                self.with_circuit(|c| c.record_failure(Instant::now()));
                trial.pending = false;
                Err(e)
            }
        }
    }

    /// Poll once under `mode`.  An open circuit yields the stale fallback
    /// instead of an error.
    ///
    /// # Errors
    ///
    /// Probe failures while the circuit is still closed (or on a failed
    /// half-open trial).
    pub async fn poll(&self, mode: OperatingMode) -> Result<SensorReading, AdapterError> {
        match self.try_poll(mode).await {
            Err(AdapterError::CircuitOpen { .. }) => Ok(self.stale_fallback()),
            other => other,
        }
    }

    /// Apply `f` to the circuit and announce any state change on the bus.
    fn with_circuit<R>(&self, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        let (result, from, to) = {
            let mut state = self.state();
            let from = state.circuit.state();
            let result = f(&mut state.circuit);
            (result, from, state.circuit.state())
        };
        if from != to {
            info!(sensor = %self.id, ?from, ?to, "circuit transition");
            self.events.publish(Event::new(
                EVENT_SOURCE,
                EventPayload::CircuitTransition {
                    sensor: self.id.clone(),
                    from,
                    to,
                },
            ));
        }
        result
    }
}

/// Counts a half-open trial as failed if its future is dropped before the
/// probe reports back, so the circuit reopens instead of staying half-open.
struct TrialGuard<'a> {
    adapter: &'a ManagedAdapter,
    pending: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.pending {
            warn!(sensor = %self.adapter.id, "half-open trial abandoned");
            self.adapter
                .with_circuit(|c| c.record_failure(Instant::now()));
        }
    }
}
