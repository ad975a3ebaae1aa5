//! Fusion Engine.
//!
//! Folds the stream of [`SensorReading`]s into one [`FusedSnapshot`].  For
//! each applied reading the engine:
//!
//! 1. replaces that sensor's entry in a copy of the current snapshot,
//! 2. records the reading's signal in the rolling history,
//! 3. recomputes only the metrics whose inputs include the reading's kind,
//! 4. bumps the sequence and publishes the copy behind an `Arc`.
//!
//! The engine is the only writer; consumers receive finished snapshots
//! through the [`SnapshotChannel`] and can never observe a half-applied
//! update.  Running a single engine per hub keeps per-sensor ordering.
//!
//! # Example
//!
//! ```rust
//! use os4ai_middleware::SnapshotChannel;
//! use os4ai_perception::FusionEngine;
//! use os4ai_types::{Quality, ReadingValue, SensorKind, SensorReading, ThermalSample};
//!
//! let channel = SnapshotChannel::new();
//! let mut engine = FusionEngine::new(channel.clone());
//! engine.apply(SensorReading::new(
//!     "thermal".into(),
//!     SensorKind::Thermal,
//!     ReadingValue::Thermal(ThermalSample { cpu_celsius: 65.0, gpu_celsius: None, fan_rpm: vec![] }),
//!     Quality::Real,
//! ));
//! assert_eq!(channel.current().metric("cpu_temp_c"), Some(65.0));
//! ```

use std::sync::Arc;

use chrono::Utc;
use os4ai_middleware::SnapshotChannel;
use os4ai_types::{FusedSnapshot, SensorReading};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::metrics::{DerivedMetric, MetricContext, SignalHistory, builtin_metrics};

pub struct FusionEngine {
    metrics: Vec<Box<dyn DerivedMetric>>,
    history: SignalHistory,
    current: Arc<FusedSnapshot>,
    channel: SnapshotChannel,
}

impl FusionEngine {
    /// Engine with the built-in metric set, publishing on `channel`.
    pub fn new(channel: SnapshotChannel) -> Self {
        Self::with_metrics(channel, builtin_metrics())
    }

    pub fn with_metrics(channel: SnapshotChannel, metrics: Vec<Box<dyn DerivedMetric>>) -> Self {
        Self {
            metrics,
            history: SignalHistory::default(),
            current: channel.current(),
            channel,
        }
    }

    pub fn current(&self) -> Arc<FusedSnapshot> {
        Arc::clone(&self.current)
    }

    /// Fold `reading` into a new snapshot and publish it.
    ///
    /// A `failed` reading replaces the sensor's entry so consumers see the
    /// fault, but it feeds neither the history nor any metric; a metric left
    /// with no usable input is removed.
    pub fn apply(&mut self, reading: SensorReading) -> Arc<FusedSnapshot> {
        let kind = reading.kind;
        let mut next = FusedSnapshot::clone(&self.current);

        self.history.record(&reading);
        next.readings.insert(reading.sensor_id.clone(), reading);

        let ctx = MetricContext {
            readings: &next.readings,
            history: &self.history,
        };
        let updates: Vec<_> = self
            .metrics
            .iter()
            .filter(|m| m.inputs().contains(&kind))
            .map(|m| (m.name(), m.compute(&ctx)))
            .collect();
        for (name, value) in updates {
            match value {
                Some(v) => {
                    trace!(metric = name, value = v.value, "metric updated");
                    next.metrics.insert(name.to_string(), v);
                }
                None => {
                    next.metrics.remove(name);
                }
            }
        }

        next.sequence = self.current.sequence + 1;
        next.as_of = Utc::now();

        let next = Arc::new(next);
        self.current = Arc::clone(&next);
        self.channel.publish(Arc::clone(&next));
        next
    }

    /// Apply readings from `rx` until every sender is dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SensorReading>) {
        info!("fusion engine started");
        while let Some(reading) = rx.recv().await {
            debug!(sensor = %reading.sensor_id, quality = ?reading.quality, "fusing reading");
            self.apply(reading);
        }
        info!(sequence = self.current.sequence, "fusion engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::DerivedMetric;
    use os4ai_types::{
        AcousticSample, MetricValue, Quality, ReadingValue, SensorKind, ThermalSample,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn thermal(cpu: f64) -> SensorReading {
        SensorReading::new(
            "thermal".into(),
            SensorKind::Thermal,
            ReadingValue::Thermal(ThermalSample {
                cpu_celsius: cpu,
                gpu_celsius: None,
                fan_rpm: vec![1200],
            }),
            Quality::Real,
        )
    }

    fn acoustic() -> SensorReading {
        SensorReading::new(
            "acoustic".into(),
            SensorKind::Acoustic,
            ReadingValue::Acoustic(AcousticSample {
                ambient_db: 45.0,
                peak_db: 70.0,
                decay_db: vec![70.0, 55.0, 45.0],
                decay_interval_ms: 100,
            }),
            Quality::Simulated,
        )
    }

    /// Counts how often it is evaluated.
    struct Probe(Arc<AtomicUsize>);

    impl DerivedMetric for Probe {
        fn name(&self) -> &'static str {
            "probe"
        }

        fn inputs(&self) -> &'static [SensorKind] {
            &[SensorKind::Acoustic]
        }

        fn compute(&self, _ctx: &MetricContext<'_>) -> Option<MetricValue> {
            self.0.fetch_add(1, Ordering::SeqCst);
            None
        }
    }

    #[test]
    fn each_reading_publishes_a_new_sequence() {
        let channel = SnapshotChannel::new();
        let mut engine = FusionEngine::new(channel.clone());
        let first = engine.apply(thermal(50.0));
        let second = engine.apply(acoustic());
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(channel.current().sequence, 2);
        // The earlier Arc is untouched by the later update.
        assert!(first.reading("acoustic").is_none());
        assert_eq!(second.readings.len(), 2);
    }

    #[test]
    fn only_dependent_metrics_are_recomputed() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut engine = FusionEngine::with_metrics(
            SnapshotChannel::new(),
            vec![Box::new(Probe(Arc::clone(&count)))],
        );
        engine.apply(thermal(50.0));
        engine.apply(thermal(51.0));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        engine.apply(acoustic());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn metrics_carry_their_sources() {
        let mut engine = FusionEngine::new(SnapshotChannel::new());
        let snap = engine.apply(thermal(65.0));
        let cpu = &snap.metrics["cpu_temp_c"];
        assert_eq!(cpu.value, 65.0);
        assert!(cpu.sources.contains("thermal"));
        assert!((snap.metric("thermal_load").unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn failed_reading_drops_dependent_metrics() {
        let mut engine = FusionEngine::new(SnapshotChannel::new());
        engine.apply(thermal(65.0));
        let snap = engine.apply(SensorReading::failed(
            "thermal".into(),
            SensorKind::Thermal,
            "sensors: not found",
        ));
        assert_eq!(snap.reading("thermal").unwrap().quality, Quality::Failed);
        assert_eq!(snap.metric("cpu_temp_c"), None);
    }

    #[tokio::test]
    async fn run_drains_the_channel() {
        let channel = SnapshotChannel::new();
        let (tx, rx) = mpsc::channel(8);
        let engine = FusionEngine::new(channel.clone());
        let task = tokio::spawn(engine.run(rx));
        tx.send(thermal(50.0)).await.unwrap();
        tx.send(acoustic()).await.unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(channel.current().sequence, 2);
        assert!(channel.current().metric("rt60_seconds").is_some());
    }
}
