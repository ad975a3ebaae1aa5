//! Poll Scheduler: one loop per adapter, fanned into a single channel.
//!
//! Each loop polls immediately on start, then once per interval:
//!
//! 1. snapshot the operating mode,
//! 2. read through the [`ReadingCache`],
//! 3. send the reading (or a `failed` reading) to the fan-in channel,
//! 4. sleep for the interval, stretched by `2^k` (capped at
//!    `max_backoff_factor`) while the adapter's circuit is not closed.
//!
//! [`PollScheduler::shutdown`] signals every loop at once.  A loop finishes
//! its in-flight poll, which the gateway bounds by its timeout, and exits;
//! anything still running after the grace period is aborted.

use std::sync::Arc;
use std::time::Duration;

use os4ai_hal::{AdapterRegistry, ManagedAdapter, ModeSwitch};
use os4ai_middleware::EventBus;
use os4ai_types::{CircuitState, Event, EventPayload, SchedulerSettings, SensorReading};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::ReadingCache;

const EVENT_SOURCE: &str = "os4ai-runtime::scheduler";

/// Delay before the next poll: `interval × min(2^attempt, max_factor)`.
pub fn backoff_delay(interval: Duration, attempt: u32, max_factor: u32) -> Duration {
    let factor = 2u32
        .checked_pow(attempt)
        .unwrap_or(u32::MAX)
        .min(max_factor.max(1));
    interval.saturating_mul(factor)
}

/// Everything one poll loop needs.
struct PollLoop {
    adapter: Arc<ManagedAdapter>,
    cache: Arc<ReadingCache>,
    mode: ModeSwitch,
    out: mpsc::Sender<SensorReading>,
    events: EventBus,
    max_backoff_factor: u32,
}

impl PollLoop {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let id = self.adapter.id().clone();
        let settings = *self.adapter.settings();
        let mut attempt = 0u32;
        info!(sensor = %id, interval_ms = settings.poll_interval_ms, "poll loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let mode = self.mode.snapshot();
            let reading = match self
                .cache
                .get_or_refresh(&self.adapter, settings.cache_ttl(), mode)
                .await
            {
                Ok(reading) => reading,
                Err(e) => {
                    self.events.publish(Event::new(
                        EVENT_SOURCE,
                        EventPayload::SensorFault {
                            sensor: id.clone(),
                            message: e.to_string(),
                        },
                    ));
                    SensorReading::failed(id.clone(), self.adapter.kind(), e.to_string())
                }
            };
            debug!(sensor = %id, quality = ?reading.quality, "poll cycle");

            if self.out.send(reading).await.is_err() {
                warn!(sensor = %id, "fan-in channel closed");
                break;
            }

            attempt = match self.adapter.circuit_state() {
                CircuitState::Closed => 0,
                _ => attempt.saturating_add(1),
            };
            let delay = backoff_delay(settings.poll_interval(), attempt, self.max_backoff_factor);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!(sensor = %id, "poll loop stopped");
    }
}

/// Owner of every poll loop.
pub struct PollScheduler {
    tasks: JoinSet<()>,
    shutdown: watch::Sender<bool>,
}

impl PollScheduler {
    /// Start one loop per adapter in `registry`.  Must be called from within
    /// a Tokio runtime.
    pub fn start(
        registry: &AdapterRegistry,
        cache: Arc<ReadingCache>,
        mode: ModeSwitch,
        settings: SchedulerSettings,
        out: mpsc::Sender<SensorReading>,
        events: EventBus,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for adapter in registry.iter() {
            let poll = PollLoop {
                adapter: Arc::clone(adapter),
                cache: Arc::clone(&cache),
                mode: mode.clone(),
                out: out.clone(),
                events: events.clone(),
                max_backoff_factor: settings.max_backoff_factor,
            };
            tasks.spawn(poll.run(shutdown.subscribe()));
        }
        info!(loops = tasks.len(), "poll scheduler started");
        Self { tasks, shutdown }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signal every loop and wait up to `grace` for them to exit.
    pub async fn shutdown(mut self, grace: Duration) {
        self.shutdown.send_replace(true);
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.tasks.join_next().await {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    warn!(error = %e, "poll loop panicked");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(remaining = self.tasks.len(), "poll loops overran shutdown grace; aborting");
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
        info!("poll scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use os4ai_hal::thermal::ThermalAdapter;
    use os4ai_hal::{RegistryBuilder, ScriptedRunner};
    use os4ai_types::{AdapterSettings, CircuitSettings, GatewayError, Quality, SensorKind};

    const GOOD: &str = r#"{"coretemp-isa-0000": {"Package id 0": {"temp1_input": 48.0}}}"#;

    fn thermal_registry(runner: Arc<ScriptedRunner>, interval_ms: u64) -> AdapterRegistry {
        RegistryBuilder::new(EventBus::default())
            .with_runner(runner)
            .with_circuit(CircuitSettings {
                failure_threshold: 3,
                cooldown_ms: 60_000,
            })
            .with_adapter(
                Box::new(ThermalAdapter),
                AdapterSettings {
                    poll_interval_ms: interval_ms,
                    cache_ttl_ms: interval_ms,
                    ..AdapterSettings::defaults_for(SensorKind::Thermal)
                },
            )
            .build()
            .unwrap()
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 0, 8), base);
        assert_eq!(backoff_delay(base, 1, 8), base * 2);
        assert_eq!(backoff_delay(base, 3, 8), base * 8);
        assert_eq!(backoff_delay(base, 10, 8), base * 8);
        assert_eq!(backoff_delay(base, 40, 8), base * 8);
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_is_immediate_then_on_interval() {
        let runner = Arc::new(ScriptedRunner::new().with_output("sensors", GOOD));
        let registry = thermal_registry(Arc::clone(&runner), 1_000);
        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = PollScheduler::start(
            &registry,
            Arc::new(ReadingCache::new()),
            ModeSwitch::new(false),
            SchedulerSettings::default(),
            tx,
            EventBus::default(),
        );

        let first = rx.recv().await.unwrap();
        assert_eq!(first.quality, Quality::Real);
        assert_eq!(runner.calls(), 1);

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let mut received = 1;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 4);

        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn errors_become_failed_readings() {
        let runner = Arc::new(ScriptedRunner::new().with_reply(
            "sensors",
            Err(GatewayError::NotFound {
                program: "sensors".into(),
            }),
        ));
        let registry = thermal_registry(runner, 1_000);
        let events = EventBus::default();
        let mut faults = events.subscribe_to(os4ai_middleware::Topic::Health);
        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = PollScheduler::start(
            &registry,
            Arc::new(ReadingCache::new()),
            ModeSwitch::new(false),
            SchedulerSettings::default(),
            tx,
            events,
        );

        let reading = rx.recv().await.unwrap();
        assert_eq!(reading.quality, Quality::Failed);
        assert!(matches!(
            faults.recv().await.unwrap().payload,
            EventPayload::SensorFault { .. }
        ));
        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_backs_off() {
        let runner = Arc::new(ScriptedRunner::new().with_reply(
            "sensors",
            Err(GatewayError::NotFound {
                program: "sensors".into(),
            }),
        ));
        let registry = thermal_registry(Arc::clone(&runner), 1_000);
        let (tx, mut rx) = mpsc::channel(64);
        let scheduler = PollScheduler::start(
            &registry,
            Arc::new(ReadingCache::new()),
            ModeSwitch::new(false),
            SchedulerSettings {
                max_backoff_factor: 4,
                ..SchedulerSettings::default()
            },
            tx,
            EventBus::default(),
        );

        // Polls at t = 0, 1, 2 fail and open the circuit; afterwards the
        // delays are 2, 4, 4, 4 s: polls at 4, 8, 12, 16.
        tokio::time::sleep(Duration::from_millis(16_500)).await;
        let mut qualities = Vec::new();
        while let Ok(r) = rx.try_recv() {
            qualities.push(r.quality);
        }
        assert_eq!(
            qualities,
            [
                Quality::Failed,
                Quality::Failed,
                Quality::Failed,
                Quality::Stale,
                Quality::Stale,
                Quality::Stale,
                Quality::Stale,
            ]
        );
        assert_eq!(runner.calls(), 3);
        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn mode_switch_applies_on_next_cycle() {
        let runner = Arc::new(ScriptedRunner::new().with_output("sensors", GOOD));
        let registry = thermal_registry(Arc::clone(&runner), 1_000);
        let mode = ModeSwitch::new(false);
        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = PollScheduler::start(
            &registry,
            Arc::new(ReadingCache::new()),
            mode.clone(),
            SchedulerSettings::default(),
            tx,
            EventBus::default(),
        );

        assert_eq!(rx.recv().await.unwrap().quality, Quality::Real);
        mode.set(true);
        assert_eq!(rx.recv().await.unwrap().quality, Quality::Simulated);
        assert_eq!(runner.calls(), 1);
        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_every_loop() {
        let runner = Arc::new(ScriptedRunner::new().with_output("sensors", GOOD));
        let registry = thermal_registry(runner, 1_000);
        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = PollScheduler::start(
            &registry,
            Arc::new(ReadingCache::new()),
            ModeSwitch::new(true),
            SchedulerSettings::default(),
            tx,
            EventBus::default(),
        );
        assert_eq!(scheduler.len(), 1);
        rx.recv().await.unwrap();
        scheduler.shutdown(Duration::from_secs(1)).await;
        // Every sender was owned by a loop, so the channel is now closed.
        while rx.recv().await.is_some() {}
    }
}
