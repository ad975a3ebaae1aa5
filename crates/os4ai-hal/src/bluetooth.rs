//! Bluetooth presence: paired devices and whether they are connected.
//!
//! | Platform | Probe |
//! |---|---|
//! | macOS | `system_profiler SPBluetoothDataType` |
//! | Linux | `bluetoothctl devices Connected` + `bluetoothctl devices Paired` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use os4ai_kernel::{ArgPattern, CommandSchema, CommandSpec, is_mac_address};
use os4ai_types::{AdapterError, BluetoothDevice, BluetoothScan, ReadingValue, SensorKind};

use crate::adapter::{Platform, ProbeContext, SensorAdapter, phase};

pub struct BluetoothAdapter {
    platform: Platform,
}

impl BluetoothAdapter {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

impl Default for BluetoothAdapter {
    fn default() -> Self {
        Self::new(Platform::current())
    }
}

#[async_trait]
impl SensorAdapter for BluetoothAdapter {
    fn kind(&self) -> SensorKind {
        SensorKind::Bluetooth
    }

    fn command_schemas(&self) -> Vec<CommandSchema> {
        match self.platform {
            Platform::MacOs => vec![CommandSchema::new(
                "system_profiler",
                vec![ArgPattern::literal("SPBluetoothDataType")],
            )],
            Platform::Linux => vec![CommandSchema::new(
                "bluetoothctl",
                vec![
                    ArgPattern::literal("devices"),
                    ArgPattern::one_of(["Connected", "Paired"]),
                ],
            )],
        }
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<ReadingValue, AdapterError> {
        let devices = match self.platform {
            Platform::MacOs => {
                let out = ctx
                    .run(CommandSpec::new("system_profiler", ["SPBluetoothDataType"]))
                    .await?;
                parse_system_profiler(&out.stdout).map_err(|e| ctx.invalid(e))?
            }
            Platform::Linux => {
                let connected = ctx
                    .run(CommandSpec::new("bluetoothctl", ["devices", "Connected"]))
                    .await?;
                let paired = ctx
                    .run(CommandSpec::new("bluetoothctl", ["devices", "Paired"]))
                    .await?;
                merge_bluetoothctl(&connected.stdout, &paired.stdout)
            }
        };
        Ok(ReadingValue::Bluetooth(BluetoothScan { devices }))
    }

    fn simulate(&self, at: DateTime<Utc>) -> ReadingValue {
        let t = phase(at);
        let battery = (75.0 + 15.0 * (t * 0.01).sin()).round() as i64;
        let device = |name: &str, address: &str, minor: &str, connected: bool| BluetoothDevice {
            name: name.to_string(),
            address: address.to_string(),
            minor_type: minor.to_string(),
            connected,
            battery: None,
        };
        let mut headset = device("Studio Headphones", "A4:83:E7:10:22:01", "Headphones", true);
        headset.battery = Some(format!("{battery}%"));
        let mut devices = vec![
            headset,
            device("Desk Keyboard", "A4:83:E7:10:22:02", "Keyboard", true),
            device("Pocket Phone", "A4:83:E7:10:22:03", "Phone", false),
        ];
        // The watch drifts in and out of range.
        if (t * 0.05).sin() > 0.0 {
            devices.push(device("Wrist Watch", "A4:83:E7:10:22:04", "Watch", true));
        }
        ReadingValue::Bluetooth(BluetoothScan { devices })
    }
}

#[derive(Default)]
struct PartialDevice {
    name: String,
    address: Option<String>,
    minor_type: Option<String>,
    battery: Option<String>,
}

impl PartialDevice {
    fn finish(self, connected: bool) -> Option<BluetoothDevice> {
        Some(BluetoothDevice {
            name: self.name,
            address: self.address?,
            minor_type: self.minor_type.unwrap_or_else(|| "Unknown".to_string()),
            connected,
            battery: self.battery,
        })
    }
}

/// Parse `system_profiler SPBluetoothDataType` text output.
///
/// Devices appear as `Name:` header lines under a `Connected:` or
/// `Not Connected:` section, followed by indented `Address:`, `Minor Type:`
/// and `Battery Level:` fields.  Headers without an address (controllers,
/// section titles) are dropped.
pub fn parse_system_profiler(output: &str) -> Result<Vec<BluetoothDevice>, String> {
    if !output.contains("Bluetooth") {
        return Err("no Bluetooth section in system_profiler output".into());
    }

    let mut devices = Vec::new();
    let mut section: Option<bool> = None;
    let mut current: Option<PartialDevice> = None;

    let mut flush = |current: &mut Option<PartialDevice>, section: Option<bool>| {
        if let (Some(device), Some(connected)) = (current.take(), section)
            && let Some(done) = device.finish(connected)
        {
            devices.push(done);
        }
    };

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed == "Not Connected:" || trimmed.to_lowercase().starts_with("paired, not connected") {
            flush(&mut current, section);
            section = Some(false);
        } else if trimmed == "Connected:" {
            flush(&mut current, section);
            section = Some(true);
        } else if let Some(value) = field(trimmed, "Address:") {
            if let Some(d) = current.as_mut() {
                d.address = Some(value);
            }
        } else if let Some(value) = field(trimmed, "Minor Type:") {
            if let Some(d) = current.as_mut() {
                d.minor_type = Some(value);
            }
        } else if let Some(value) = field(trimmed, "Battery Level:") {
            if let Some(d) = current.as_mut() {
                d.battery = Some(value);
            }
        } else if let Some(name) = trimmed.strip_suffix(':') {
            flush(&mut current, section);
            current = Some(PartialDevice {
                name: name.to_string(),
                ..PartialDevice::default()
            });
        }
    }
    flush(&mut current, section);
    Ok(devices)
}

fn field(line: &str, label: &str) -> Option<String> {
    line.strip_prefix(label).map(|v| v.trim().to_string())
}

/// Parse `bluetoothctl devices ...` output: `Device <MAC> <name>` per line.
pub fn parse_bluetoothctl(output: &str, connected: bool) -> Vec<BluetoothDevice> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (address, name) = rest.split_once(' ').unwrap_or((rest, ""));
            if !is_mac_address(address) {
                return None;
            }
            Some(BluetoothDevice {
                name: if name.is_empty() { address.to_string() } else { name.trim().to_string() },
                address: address.to_string(),
                minor_type: "Unknown".to_string(),
                connected,
                battery: None,
            })
        })
        .collect()
}

/// Connected devices, then paired devices that are not connected.
pub fn merge_bluetoothctl(connected: &str, paired: &str) -> Vec<BluetoothDevice> {
    let mut devices = parse_bluetoothctl(connected, true);
    for device in parse_bluetoothctl(paired, false) {
        if !devices.iter().any(|d| d.address.eq_ignore_ascii_case(&device.address)) {
            devices.push(device);
        }
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILER: &str = "\
Bluetooth:

      Bluetooth Controller:
          Address: 11:22:33:44:55:66
          State: On
      Connected:
          Studio Headphones:
              Address: AA:BB:CC:DD:EE:01
              Minor Type: Headphones
              Battery Level: 80%
          Desk Keyboard:
              Address: AA:BB:CC:DD:EE:02
              Minor Type: Keyboard
      Not Connected:
          Old Speaker:
              Address: AA:BB:CC:DD:EE:03
";

    #[test]
    fn system_profiler_sections_split_devices() {
        let devices = parse_system_profiler(PROFILER).unwrap();
        assert_eq!(devices.len(), 3);

        let headphones = &devices[0];
        assert_eq!(headphones.name, "Studio Headphones");
        assert!(headphones.connected);
        assert_eq!(headphones.minor_type, "Headphones");
        assert_eq!(headphones.battery.as_deref(), Some("80%"));

        let speaker = &devices[2];
        assert!(!speaker.connected);
        assert_eq!(speaker.minor_type, "Unknown");
    }

    #[test]
    fn controller_is_not_a_device() {
        let devices = parse_system_profiler(PROFILER).unwrap();
        assert!(devices.iter().all(|d| d.address != "11:22:33:44:55:66"));
    }

    #[test]
    fn unrelated_output_is_rejected() {
        assert!(parse_system_profiler("Hardware Overview:\n  Model: x\n").is_err());
    }

    #[test]
    fn bluetoothctl_merges_connected_and_paired() {
        let connected = "Device AA:BB:CC:DD:EE:01 Studio Headphones\n";
        let paired = "Device AA:BB:CC:DD:EE:01 Studio Headphones\nDevice AA:BB:CC:DD:EE:09 Car Kit\ngarbage line\n";
        let devices = merge_bluetoothctl(connected, paired);
        assert_eq!(devices.len(), 2);
        assert!(devices[0].connected);
        assert_eq!(devices[1].name, "Car Kit");
        assert!(!devices[1].connected);
    }

    #[test]
    fn bluetoothctl_skips_malformed_addresses() {
        assert!(parse_bluetoothctl("Device not-a-mac Thing\n", true).is_empty());
    }

    #[test]
    fn simulate_is_deterministic() {
        let adapter = BluetoothAdapter::new(Platform::Linux);
        let at = Utc::now();
        assert_eq!(adapter.simulate(at), adapter.simulate(at));
    }
}
