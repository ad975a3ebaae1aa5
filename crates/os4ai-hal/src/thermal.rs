//! CPU / GPU temperatures and fan speeds from lm-sensors (`sensors -j`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use os4ai_kernel::{ArgPattern, CommandSchema, CommandSpec};
use os4ai_types::{AdapterError, ReadingValue, SensorKind, ThermalSample};
use serde_json::Value;

use crate::adapter::{ProbeContext, SensorAdapter, phase};

/// Chip name fragments that identify a GPU.
const GPU_CHIPS: [&str; 4] = ["amdgpu", "nouveau", "radeon", "gpu"];

#[derive(Default)]
pub struct ThermalAdapter;

#[async_trait]
impl SensorAdapter for ThermalAdapter {
    fn kind(&self) -> SensorKind {
        SensorKind::Thermal
    }

    fn command_schemas(&self) -> Vec<CommandSchema> {
        vec![CommandSchema::new("sensors", vec![ArgPattern::literal("-j")])]
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<ReadingValue, AdapterError> {
        let out = ctx.run(CommandSpec::new("sensors", ["-j"])).await?;
        let sample = parse_sensors_json(&out.stdout).map_err(|e| ctx.invalid(e))?;
        Ok(ReadingValue::Thermal(sample))
    }

    fn simulate(&self, at: DateTime<Utc>) -> ReadingValue {
        let t = phase(at);
        let cpu = 45.0 + 5.0 * (t * 0.15).sin();
        let gpu = 40.0 + 3.0 * (t * 0.12).sin();
        ReadingValue::Thermal(ThermalSample {
            cpu_celsius: cpu,
            gpu_celsius: Some(gpu),
            fan_rpm: vec![(1100.0 + cpu * 5.0) as u32, (1050.0 + gpu * 5.0) as u32],
        })
    }
}

/// Extract the hottest CPU and GPU temperatures plus every fan speed from
/// `sensors -j` output.
///
/// The document maps chip names to feature objects, each holding
/// `tempN_input` / `fanN_input` values.  Chips whose name contains a GPU
/// driver name count as GPU; everything else counts as CPU.
pub fn parse_sensors_json(output: &str) -> Result<ThermalSample, String> {
    let doc: Value = serde_json::from_str(output).map_err(|e| format!("not JSON: {e}"))?;
    let chips = doc.as_object().ok_or("top level is not an object")?;

    let mut cpu: Option<f64> = None;
    let mut gpu: Option<f64> = None;
    let mut fans = Vec::new();

    for (chip, features) in chips {
        let is_gpu = GPU_CHIPS.iter().any(|g| chip.to_lowercase().contains(g));
        let Some(features) = features.as_object() else {
            continue;
        };
        for inputs in features.values().filter_map(Value::as_object) {
            for (key, value) in inputs {
                let Some(v) = value.as_f64() else { continue };
                if key.starts_with("temp") && key.ends_with("_input") {
                    let slot = if is_gpu { &mut gpu } else { &mut cpu };
                    *slot = Some(slot.map_or(v, |cur| cur.max(v)));
                } else if key.starts_with("fan") && key.ends_with("_input") && v >= 0.0 {
                    fans.push(v.round() as u32);
                }
            }
        }
    }

    let cpu_celsius = cpu.ok_or("no CPU temperature inputs")?;
    Ok(ThermalSample {
        cpu_celsius,
        gpu_celsius: gpu,
        fan_rpm: fans,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENSORS: &str = r#"{
        "coretemp-isa-0000": {
            "Adapter": "ISA adapter",
            "Package id 0": {"temp1_input": 52.0, "temp1_max": 100.0},
            "Core 0": {"temp2_input": 49.0}
        },
        "amdgpu-pci-0300": {
            "Adapter": "PCI adapter",
            "edge": {"temp1_input": 41.5}
        },
        "thinkpad-isa-0000": {
            "fan1": {"fan1_input": 2100.0}
        }
    }"#;

    #[test]
    fn picks_hottest_cpu_and_gpu() {
        let s = parse_sensors_json(SENSORS).unwrap();
        assert_eq!(s.cpu_celsius, 52.0);
        assert_eq!(s.gpu_celsius, Some(41.5));
        assert_eq!(s.fan_rpm, vec![2100]);
    }

    #[test]
    fn missing_cpu_is_invalid() {
        let err = parse_sensors_json(r#"{"amdgpu-pci": {"edge": {"temp1_input": 40.0}}}"#)
            .unwrap_err();
        assert!(err.contains("CPU"));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(parse_sensors_json("No sensors found!").is_err());
    }

    #[test]
    fn simulated_fans_track_temperature() {
        let ReadingValue::Thermal(s) = ThermalAdapter.simulate(Utc::now()) else {
            panic!("wrong variant");
        };
        assert!((40.0..=50.0).contains(&s.cpu_celsius));
        assert_eq!(s.fan_rpm[0], (1100.0 + s.cpu_celsius * 5.0) as u32);
    }
}
