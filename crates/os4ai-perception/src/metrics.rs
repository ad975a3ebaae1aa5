//! Derived metrics computed from the latest readings.
//!
//! A [`DerivedMetric`] declares which [`SensorKind`]s it reads; the fusion
//! engine recomputes it only when a reading of one of those kinds arrives.
//! Metrics are pure functions of the usable readings plus the bounded
//! per-sensor [`SignalHistory`].  Readings tagged `failed` are never passed
//! in.
//!
//! | Metric | Inputs | Meaning |
//! |---|---|---|
//! | `motion_score` | wifi | Spread of recent mean RSSI, 0–1 |
//! | `rt60_seconds` | acoustic | Time for the decay envelope to fall 60 dB |
//! | `ambient_db` | acoustic | Mean ambient level |
//! | `occupancy` | wifi, acoustic | Blend of motion and sound level, 0–1 |
//! | `cpu_temp_c` | thermal | Hottest CPU reading |
//! | `thermal_load` | thermal | CPU temperature scaled to 0–1 over 30–100 °C |
//! | `device_count` | bluetooth | Distinct devices seen |
//! | `connected_device_count` | bluetooth | Distinct connected devices |
//! | `emf_exposure` | bluetooth | Weighted connected devices |
//! | `total_emi` | emi | Sum of band energies |
//! | `body_proximity` | emi | Mean body-proximity estimate, 0–1 |

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use os4ai_types::{
    AcousticSample, BluetoothDevice, MetricValue, Quality, ReadingValue, SensorId, SensorKind,
    SensorReading,
};

/// Samples kept per sensor in [`SignalHistory`].
pub const HISTORY_LEN: usize = 16;

/// RSSI standard deviation (dB) that maps to a motion score of 1.
const MOTION_FULL_SCALE_DB: f64 = 6.0;

// ────────────────────────────────────────────────────────────────────────────
// SignalHistory
// ────────────────────────────────────────────────────────────────────────────

/// Bounded rolling scalar history per sensor.
#[derive(Debug, Clone)]
pub struct SignalHistory {
    capacity: usize,
    series: HashMap<SensorId, VecDeque<f64>>,
}

impl Default for SignalHistory {
    fn default() -> Self {
        Self::new(HISTORY_LEN)
    }
}

impl SignalHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: HashMap::new(),
        }
    }

    /// Append the scalar signal of `reading`.  Only fresh readings (`real` or
    /// `simulated`) are recorded; stale copies would flatten the history.
    pub fn record(&mut self, reading: &SensorReading) {
        if !matches!(reading.quality, Quality::Real | Quality::Simulated) {
            return;
        }
        let Some(value) = signal(&reading.value) else {
            return;
        };
        let series = self.series.entry(reading.sensor_id.clone()).or_default();
        if series.len() == self.capacity {
            series.pop_front();
        }
        series.push_back(value);
    }

    pub fn series(&self, sensor: &str) -> Option<&VecDeque<f64>> {
        self.series.get(sensor)
    }

    pub fn len(&self, sensor: &str) -> usize {
        self.series(sensor).map_or(0, VecDeque::len)
    }
}

/// The one number per reading tracked over time.
fn signal(value: &ReadingValue) -> Option<f64> {
    match value {
        ReadingValue::Wifi(scan) => scan.mean_rssi(),
        ReadingValue::Acoustic(a) => Some(a.ambient_db),
        ReadingValue::Thermal(t) => Some(t.cpu_celsius),
        ReadingValue::Emi(e) => Some(e.total()),
        ReadingValue::Bluetooth(scan) => Some(scan.devices.len() as f64),
        ReadingValue::Unavailable { .. } => None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MetricContext / DerivedMetric
// ────────────────────────────────────────────────────────────────────────────

/// What a metric may look at.
pub struct MetricContext<'a> {
    pub readings: &'a BTreeMap<SensorId, SensorReading>,
    pub history: &'a SignalHistory,
}

impl<'a> MetricContext<'a> {
    /// Usable readings of `kind`.
    pub fn of_kind(&self, kind: SensorKind) -> impl Iterator<Item = &'a SensorReading> + 'a {
        self.readings
            .values()
            .filter(move |r| r.kind == kind && r.is_usable())
    }
}

pub trait DerivedMetric: Send + Sync {
    fn name(&self) -> &'static str;

    /// Kinds whose readings this metric depends on.
    fn inputs(&self) -> &'static [SensorKind];

    /// `None` when the inputs are absent or insufficient.
    fn compute(&self, ctx: &MetricContext<'_>) -> Option<MetricValue>;
}

/// Fold the values extracted from usable readings of `kind` into one metric.
fn over_kind<T>(
    ctx: &MetricContext<'_>,
    kind: SensorKind,
    extract: impl Fn(&SensorReading) -> Option<T>,
    combine: impl FnOnce(Vec<T>) -> Option<f64>,
) -> Option<MetricValue> {
    let mut sources = BTreeSet::new();
    let mut values = Vec::new();
    for reading in ctx.of_kind(kind) {
        if let Some(v) = extract(reading) {
            sources.insert(reading.sensor_id.clone());
            values.push(v);
        }
    }
    if values.is_empty() {
        return None;
    }
    combine(values).map(|value| MetricValue { value, sources })
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn std_dev(values: &VecDeque<f64>) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n as f64;
    var.sqrt()
}

// ────────────────────────────────────────────────────────────────────────────
// Built-ins
// ────────────────────────────────────────────────────────────────────────────

pub struct MotionScore;

impl MotionScore {
    fn score(ctx: &MetricContext<'_>) -> Option<MetricValue> {
        over_kind(
            ctx,
            SensorKind::Wifi,
            |r| ctx.history.series(r.sensor_id.as_str()).map(std_dev),
            |spreads| spreads.into_iter().reduce(f64::max),
        )
        .map(|mut m| {
            m.value = (m.value / MOTION_FULL_SCALE_DB).clamp(0.0, 1.0);
            m
        })
    }
}

impl DerivedMetric for MotionScore {
    fn name(&self) -> &'static str {
        "motion_score"
    }

    fn inputs(&self) -> &'static [SensorKind] {
        &[SensorKind::Wifi]
    }

    fn compute(&self, ctx: &MetricContext<'_>) -> Option<MetricValue> {
        Self::score(ctx)
    }
}

/// Seconds for the envelope to fall 60 dB at its average slope.  `None` for
/// a flat or rising envelope.
pub fn rt60(sample: &AcousticSample) -> Option<f64> {
    let n = sample.decay_db.len();
    if n < 2 || sample.decay_interval_ms == 0 {
        return None;
    }
    let drop_db = sample.decay_db[0] - sample.decay_db[n - 1];
    let span_secs = (n - 1) as f64 * f64::from(sample.decay_interval_ms) / 1000.0;
    let slope = drop_db / span_secs;
    (slope > 0.0).then(|| 60.0 / slope)
}

pub struct Rt60Seconds;

impl DerivedMetric for Rt60Seconds {
    fn name(&self) -> &'static str {
        "rt60_seconds"
    }

    fn inputs(&self) -> &'static [SensorKind] {
        &[SensorKind::Acoustic]
    }

    fn compute(&self, ctx: &MetricContext<'_>) -> Option<MetricValue> {
        over_kind(
            ctx,
            SensorKind::Acoustic,
            |r| match &r.value {
                ReadingValue::Acoustic(a) => rt60(a),
                _ => None,
            },
            |v| mean(&v),
        )
    }
}

pub struct AmbientDb;

impl AmbientDb {
    fn level(ctx: &MetricContext<'_>) -> Option<MetricValue> {
        over_kind(
            ctx,
            SensorKind::Acoustic,
            |r| match &r.value {
                ReadingValue::Acoustic(a) => Some(a.ambient_db),
                _ => None,
            },
            |v| mean(&v),
        )
    }
}

impl DerivedMetric for AmbientDb {
    fn name(&self) -> &'static str {
        "ambient_db"
    }

    fn inputs(&self) -> &'static [SensorKind] {
        &[SensorKind::Acoustic]
    }

    fn compute(&self, ctx: &MetricContext<'_>) -> Option<MetricValue> {
        Self::level(ctx)
    }
}

/// 60 % wifi motion, 40 % sound level (30 dB quiet room to 70 dB busy).
/// Either input alone is enough.
pub struct Occupancy;

impl DerivedMetric for Occupancy {
    fn name(&self) -> &'static str {
        "occupancy"
    }

    fn inputs(&self) -> &'static [SensorKind] {
        &[SensorKind::Wifi, SensorKind::Acoustic]
    }

    fn compute(&self, ctx: &MetricContext<'_>) -> Option<MetricValue> {
        let motion = MotionScore::score(ctx);
        let sound = AmbientDb::level(ctx).map(|mut m| {
            m.value = ((m.value - 30.0) / 40.0).clamp(0.0, 1.0);
            m
        });
        let (value, sources) = match (motion, sound) {
            (Some(m), Some(s)) => (
                0.6 * m.value + 0.4 * s.value,
                m.sources.union(&s.sources).cloned().collect(),
            ),
            (Some(only), None) | (None, Some(only)) => (only.value, only.sources),
            (None, None) => return None,
        };
        Some(MetricValue {
            value: value.clamp(0.0, 1.0),
            sources,
        })
    }
}

pub struct CpuTempC;

impl CpuTempC {
    fn hottest(ctx: &MetricContext<'_>) -> Option<MetricValue> {
        over_kind(
            ctx,
            SensorKind::Thermal,
            |r| match &r.value {
                ReadingValue::Thermal(t) => Some(t.cpu_celsius),
                _ => None,
            },
            |v| v.into_iter().reduce(f64::max),
        )
    }
}

impl DerivedMetric for CpuTempC {
    fn name(&self) -> &'static str {
        "cpu_temp_c"
    }

    fn inputs(&self) -> &'static [SensorKind] {
        &[SensorKind::Thermal]
    }

    fn compute(&self, ctx: &MetricContext<'_>) -> Option<MetricValue> {
        Self::hottest(ctx)
    }
}

pub struct ThermalLoad;

impl DerivedMetric for ThermalLoad {
    fn name(&self) -> &'static str {
        "thermal_load"
    }

    fn inputs(&self) -> &'static [SensorKind] {
        &[SensorKind::Thermal]
    }

    fn compute(&self, ctx: &MetricContext<'_>) -> Option<MetricValue> {
        CpuTempC::hottest(ctx).map(|mut m| {
            m.value = ((m.value - 30.0) / 70.0).clamp(0.0, 1.0);
            m
        })
    }
}

/// Devices across every Bluetooth sensor, deduplicated by address.
fn distinct_devices<'a>(
    ctx: &MetricContext<'a>,
    connected_only: bool,
) -> Option<(BTreeMap<String, &'a BluetoothDevice>, BTreeSet<SensorId>)> {
    let mut devices = BTreeMap::new();
    let mut sources = BTreeSet::new();
    for reading in ctx.of_kind(SensorKind::Bluetooth) {
        let ReadingValue::Bluetooth(scan) = &reading.value else {
            continue;
        };
        sources.insert(reading.sensor_id.clone());
        for device in scan.devices.iter().filter(|d| d.connected || !connected_only) {
            let entry = devices
                .entry(device.address.to_ascii_uppercase())
                .or_insert(device);
            if device.connected {
                *entry = device;
            }
        }
    }
    (!sources.is_empty()).then_some((devices, sources))
}

pub struct DeviceCount;

impl DerivedMetric for DeviceCount {
    fn name(&self) -> &'static str {
        "device_count"
    }

    fn inputs(&self) -> &'static [SensorKind] {
        &[SensorKind::Bluetooth]
    }

    fn compute(&self, ctx: &MetricContext<'_>) -> Option<MetricValue> {
        distinct_devices(ctx, false).map(|(devices, sources)| MetricValue {
            value: devices.len() as f64,
            sources,
        })
    }
}

pub struct ConnectedDeviceCount;

impl DerivedMetric for ConnectedDeviceCount {
    fn name(&self) -> &'static str {
        "connected_device_count"
    }

    fn inputs(&self) -> &'static [SensorKind] {
        &[SensorKind::Bluetooth]
    }

    fn compute(&self, ctx: &MetricContext<'_>) -> Option<MetricValue> {
        distinct_devices(ctx, true).map(|(devices, sources)| MetricValue {
            value: devices.len() as f64,
            sources,
        })
    }
}

/// Exposure weight of one connected device: worn near the head counts most.
pub fn exposure_weight(device: &BluetoothDevice) -> f64 {
    let kind = device.minor_type.to_lowercase();
    if kind.contains("headset") || kind.contains("headphone") {
        3.0
    } else if kind.contains("watch") || kind.contains("phone") {
        2.0
    } else {
        1.0
    }
}

pub struct EmfExposure;

impl DerivedMetric for EmfExposure {
    fn name(&self) -> &'static str {
        "emf_exposure"
    }

    fn inputs(&self) -> &'static [SensorKind] {
        &[SensorKind::Bluetooth]
    }

    fn compute(&self, ctx: &MetricContext<'_>) -> Option<MetricValue> {
        distinct_devices(ctx, true).map(|(devices, sources)| MetricValue {
            value: devices.values().map(|d| exposure_weight(d)).sum(),
            sources,
        })
    }
}

pub struct TotalEmi;

impl DerivedMetric for TotalEmi {
    fn name(&self) -> &'static str {
        "total_emi"
    }

    fn inputs(&self) -> &'static [SensorKind] {
        &[SensorKind::Emi]
    }

    fn compute(&self, ctx: &MetricContext<'_>) -> Option<MetricValue> {
        over_kind(
            ctx,
            SensorKind::Emi,
            |r| match &r.value {
                ReadingValue::Emi(e) => Some(e.total()),
                _ => None,
            },
            |v| Some(v.into_iter().sum()),
        )
    }
}

pub struct BodyProximity;

impl DerivedMetric for BodyProximity {
    fn name(&self) -> &'static str {
        "body_proximity"
    }

    fn inputs(&self) -> &'static [SensorKind] {
        &[SensorKind::Emi]
    }

    fn compute(&self, ctx: &MetricContext<'_>) -> Option<MetricValue> {
        over_kind(
            ctx,
            SensorKind::Emi,
            |r| match &r.value {
                ReadingValue::Emi(e) => Some(e.body_proximity),
                _ => None,
            },
            |v| mean(&v).map(|m| m.clamp(0.0, 1.0)),
        )
    }
}

/// Every built-in metric.
pub fn builtin_metrics() -> Vec<Box<dyn DerivedMetric>> {
    vec![
        Box::new(MotionScore),
        Box::new(Rt60Seconds),
        Box::new(AmbientDb),
        Box::new(Occupancy),
        Box::new(CpuTempC),
        Box::new(ThermalLoad),
        Box::new(DeviceCount),
        Box::new(ConnectedDeviceCount),
        Box::new(EmfExposure),
        Box::new(TotalEmi),
        Box::new(BodyProximity),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use os4ai_types::{BluetoothScan, WifiNetwork, WifiScan};

    fn wifi(id: &str, rssi: i32) -> SensorReading {
        SensorReading::new(
            id.into(),
            SensorKind::Wifi,
            ReadingValue::Wifi(WifiScan {
                networks: vec![WifiNetwork {
                    ssid: "home".into(),
                    bssid: "aa:bb:cc:dd:ee:ff".into(),
                    rssi_dbm: rssi,
                    channel: 6,
                    security: "WPA2".into(),
                }],
            }),
            Quality::Real,
        )
    }

    fn acoustic(decay_db: Vec<f64>) -> AcousticSample {
        AcousticSample {
            ambient_db: 40.0,
            peak_db: 80.0,
            decay_db,
            decay_interval_ms: 100,
        }
    }

    fn device(address: &str, minor_type: &str, connected: bool) -> BluetoothDevice {
        BluetoothDevice {
            name: minor_type.into(),
            address: address.into(),
            minor_type: minor_type.into(),
            connected,
            battery: None,
        }
    }

    fn motion_for(samples: &[i32]) -> f64 {
        let mut history = SignalHistory::default();
        let mut readings = BTreeMap::new();
        for &rssi in samples {
            let r = wifi("wifi", rssi);
            history.record(&r);
            readings.insert(r.sensor_id.clone(), r);
        }
        let ctx = MetricContext {
            readings: &readings,
            history: &history,
        };
        MotionScore.compute(&ctx).unwrap().value
    }

    #[test]
    fn motion_grows_with_rssi_spread() {
        let still = motion_for(&[-50, -50, -50, -50]);
        let some = motion_for(&[-50, -52, -50, -52]);
        let lots = motion_for(&[-40, -60, -40, -60]);
        assert_eq!(still, 0.0);
        assert!(some > still);
        assert!(lots > some);
        assert!(lots <= 1.0);
    }

    #[test]
    fn history_is_bounded_and_skips_stale() {
        let mut history = SignalHistory::new(3);
        for rssi in 0..5 {
            history.record(&wifi("wifi", -50 - rssi));
        }
        history.record(&wifi("wifi", -10).retagged(Quality::Stale));
        assert_eq!(history.len("wifi"), 3);
        assert_eq!(history.series("wifi").unwrap().back(), Some(&-54.0));
    }

    #[test]
    fn longer_decay_means_larger_rt60() {
        let fast = rt60(&acoustic(vec![80.0, 60.0, 40.0])).unwrap();
        let slow = rt60(&acoustic(vec![80.0, 75.0, 70.0])).unwrap();
        assert!(slow > fast);
        // 40 dB over 0.2 s → 200 dB/s → 0.3 s
        assert!((fast - 0.3).abs() < 1e-9);
    }

    #[test]
    fn flat_envelope_has_no_rt60() {
        assert_eq!(rt60(&acoustic(vec![50.0, 50.0])), None);
        assert_eq!(rt60(&acoustic(vec![50.0])), None);
    }

    #[test]
    fn emf_weights_follow_device_type() {
        let scan = BluetoothScan {
            devices: vec![
                device("AA:00:00:00:00:01", "Headphones", true),
                device("AA:00:00:00:00:02", "Watch", true),
                device("AA:00:00:00:00:03", "Keyboard", true),
                device("AA:00:00:00:00:04", "Headset", false),
            ],
        };
        let reading = SensorReading::new(
            "bluetooth".into(),
            SensorKind::Bluetooth,
            ReadingValue::Bluetooth(scan),
            Quality::Real,
        );
        let readings = BTreeMap::from([(reading.sensor_id.clone(), reading)]);
        let history = SignalHistory::default();
        let ctx = MetricContext {
            readings: &readings,
            history: &history,
        };
        assert_eq!(EmfExposure.compute(&ctx).unwrap().value, 6.0);
        assert_eq!(DeviceCount.compute(&ctx).unwrap().value, 4.0);
        assert_eq!(ConnectedDeviceCount.compute(&ctx).unwrap().value, 3.0);
    }

    #[test]
    fn failed_readings_are_ignored() {
        let failed = SensorReading::failed("thermal".into(), SensorKind::Thermal, "boom");
        let readings = BTreeMap::from([(failed.sensor_id.clone(), failed)]);
        let history = SignalHistory::default();
        let ctx = MetricContext {
            readings: &readings,
            history: &history,
        };
        assert!(CpuTempC.compute(&ctx).is_none());
        assert!(ThermalLoad.compute(&ctx).is_none());
    }

    #[test]
    fn builtins_have_unique_names() {
        let names: BTreeSet<_> = builtin_metrics().iter().map(|m| m.name()).collect();
        assert_eq!(names.len(), builtin_metrics().len());
    }
}
