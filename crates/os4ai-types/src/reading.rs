//! Sensor identities and the immutable readings adapters produce.

use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Identity
// ────────────────────────────────────────────────────────────────────────────

/// The hardware domain a sensor belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Short-range radio presence (paired / nearby devices).
    Bluetooth,
    /// Visible networks and their signal strength.
    Wifi,
    /// CPU / GPU die temperatures and fan speeds.
    Thermal,
    /// Ambient level and reverberation decay from the microphone.
    Acoustic,
    /// Electromagnetic pickup through the microphone coil.
    Emi,
}

impl SensorKind {
    /// Every kind, in registry order.
    pub const ALL: [SensorKind; 5] = [
        SensorKind::Bluetooth,
        SensorKind::Wifi,
        SensorKind::Thermal,
        SensorKind::Acoustic,
        SensorKind::Emi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Bluetooth => "bluetooth",
            SensorKind::Wifi => "wifi",
            SensorKind::Thermal => "thermal",
            SensorKind::Acoustic => "acoustic",
            SensorKind::Emi => "emi",
        }
    }

    /// Parse a lowercase kind name.  Returns `None` for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        SensorKind::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identity of one registered sensor, e.g. `"wifi"` or `"thermal-gpu"`.
///
/// Adapters registered with their default identity use the kind name.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct SensorId(String);

impl SensorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SensorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SensorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<SensorKind> for SensorId {
    fn from(kind: SensorKind) -> Self {
        Self(kind.as_str().to_string())
    }
}

impl Borrow<str> for SensorId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How trustworthy a reading is.  Downstream consumers display this tag so
/// that degraded data is never mistaken for live hardware output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Parsed from a successful hardware probe.
    Real,
    /// Synthesised because the process runs in simulated (cloud) mode.
    Simulated,
    /// A previous value re-served while the probe is failing.
    Stale,
    /// The probe failed and no value is available.
    Failed,
}

impl Quality {
    /// `false` only for [`Quality::Failed`]; such readings never feed metrics.
    pub fn is_usable(&self) -> bool {
        !matches!(self, Quality::Failed)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-kind values
// ────────────────────────────────────────────────────────────────────────────

/// One paired or nearby Bluetooth device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BluetoothDevice {
    pub name: String,
    /// MAC address as reported by the OS.
    pub address: String,
    /// Device class such as `"Headset"`, `"Keyboard"` or `"Unknown"`.
    pub minor_type: String,
    pub connected: bool,
    pub battery: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BluetoothScan {
    pub devices: Vec<BluetoothDevice>,
}

impl BluetoothScan {
    pub fn connected(&self) -> impl Iterator<Item = &BluetoothDevice> {
        self.devices.iter().filter(|d| d.connected)
    }

    pub fn nearby(&self) -> impl Iterator<Item = &BluetoothDevice> {
        self.devices.iter().filter(|d| !d.connected)
    }
}

/// One visible wireless network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WifiNetwork {
    pub ssid: String,
    pub bssid: String,
    /// Received signal strength in dBm (more negative is weaker).
    pub rssi_dbm: i32,
    pub channel: u32,
    pub security: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WifiScan {
    pub networks: Vec<WifiNetwork>,
}

impl WifiScan {
    /// Mean RSSI across visible networks, or `None` when nothing is visible.
    pub fn mean_rssi(&self) -> Option<f64> {
        if self.networks.is_empty() {
            return None;
        }
        let sum: f64 = self.networks.iter().map(|n| f64::from(n.rssi_dbm)).sum();
        Some(sum / self.networks.len() as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ThermalSample {
    pub cpu_celsius: f64,
    pub gpu_celsius: Option<f64>,
    pub fan_rpm: Vec<u32>,
}

/// Microphone capture summary.
///
/// `decay_db` is an energy envelope sampled every `decay_interval_ms`; the
/// reverberation estimate is derived from its slope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AcousticSample {
    pub ambient_db: f64,
    pub peak_db: f64,
    pub decay_db: Vec<f64>,
    pub decay_interval_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpectrumBin {
    pub freq_hz: f64,
    pub magnitude: f64,
}

/// Electromagnetic interference picked up by the microphone voice coil.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EmiSample {
    /// Power-line hum (50–70 Hz band).
    pub hum_60hz: f64,
    /// Wifi beat frequencies (1–2 kHz band).
    pub wifi_harmonic: f64,
    /// High-band noise (15–20 kHz) attributed to Bluetooth.
    pub bluetooth_noise: f64,
    /// Body-presence modulation of the field, 0–1.
    pub body_proximity: f64,
    pub spectrum: Vec<SpectrumBin>,
}

impl EmiSample {
    pub fn total(&self) -> f64 {
        self.hum_60hz + self.wifi_harmonic + self.bluetooth_noise
    }
}

/// The typed payload of a [`SensorReading`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum ReadingValue {
    Bluetooth(BluetoothScan),
    Wifi(WifiScan),
    Thermal(ThermalSample),
    Acoustic(AcousticSample),
    Emi(EmiSample),
    /// No value could be produced.
    Unavailable { reason: String },
}

impl ReadingValue {
    /// The sensor kind this value belongs to, `None` for `Unavailable`.
    pub fn kind(&self) -> Option<SensorKind> {
        match self {
            ReadingValue::Bluetooth(_) => Some(SensorKind::Bluetooth),
            ReadingValue::Wifi(_) => Some(SensorKind::Wifi),
            ReadingValue::Thermal(_) => Some(SensorKind::Thermal),
            ReadingValue::Acoustic(_) => Some(SensorKind::Acoustic),
            ReadingValue::Emi(_) => Some(SensorKind::Emi),
            ReadingValue::Unavailable { .. } => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SensorReading
// ────────────────────────────────────────────────────────────────────────────

/// A single immutable observation from one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SensorReading {
    pub sensor_id: SensorId,
    pub kind: SensorKind,
    pub timestamp: DateTime<Utc>,
    pub value: ReadingValue,
    pub quality: Quality,
}

impl SensorReading {
    /// Build a reading stamped with the current time.
    pub fn new(sensor_id: SensorId, kind: SensorKind, value: ReadingValue, quality: Quality) -> Self {
        Self {
            sensor_id,
            kind,
            timestamp: Utc::now(),
            value,
            quality,
        }
    }

    /// A `failed` reading carrying the failure reason.
    pub fn failed(sensor_id: SensorId, kind: SensorKind, reason: impl Into<String>) -> Self {
        Self::new(
            sensor_id,
            kind,
            ReadingValue::Unavailable {
                reason: reason.into(),
            },
            Quality::Failed,
        )
    }

    /// Copy of this reading re-tagged with `quality`.  The original timestamp
    /// is kept so consumers can see how old a stale value is.
    pub fn retagged(&self, quality: Quality) -> Self {
        Self {
            quality,
            ..self.clone()
        }
    }

    pub fn is_usable(&self) -> bool {
        self.quality.is_usable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parse_matches_display() {
        for kind in SensorKind::ALL {
            assert_eq!(SensorKind::parse(&kind.to_string()), Some(kind));
        }
        assert_eq!(SensorKind::parse("lidar"), None);
    }

    #[test]
    fn sensor_id_defaults_to_kind_name() {
        assert_eq!(SensorId::from(SensorKind::Acoustic).as_str(), "acoustic");
    }

    #[test]
    fn failed_reading_is_not_usable() {
        let r = SensorReading::failed("wifi".into(), SensorKind::Wifi, "timeout");
        assert!(!r.is_usable());
        assert!(matches!(r.value, ReadingValue::Unavailable { .. }));
    }

    #[test]
    fn retagged_keeps_value_and_timestamp() {
        let r = SensorReading::new(
            "thermal".into(),
            SensorKind::Thermal,
            ReadingValue::Thermal(ThermalSample {
                cpu_celsius: 51.0,
                gpu_celsius: None,
                fan_rpm: vec![1200],
            }),
            Quality::Real,
        );
        let stale = r.retagged(Quality::Stale);
        assert_eq!(stale.quality, Quality::Stale);
        assert_eq!(stale.timestamp, r.timestamp);
        assert_eq!(stale.value, r.value);
    }

    #[test]
    fn wifi_mean_rssi() {
        let scan = WifiScan {
            networks: vec![
                WifiNetwork {
                    ssid: "a".into(),
                    bssid: String::new(),
                    rssi_dbm: -40,
                    channel: 1,
                    security: "WPA2".into(),
                },
                WifiNetwork {
                    ssid: "b".into(),
                    bssid: String::new(),
                    rssi_dbm: -60,
                    channel: 6,
                    security: "Open".into(),
                },
            ],
        };
        assert_eq!(scan.mean_rssi(), Some(-50.0));
        assert_eq!(WifiScan::default().mean_rssi(), None);
    }

    #[test]
    fn reading_value_json_is_tagged_by_kind() {
        let v = ReadingValue::Unavailable {
            reason: "no adapter".into(),
        };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "unavailable");
        assert_eq!(json["data"]["reason"], "no adapter");
    }
}
