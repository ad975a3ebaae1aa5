//! Electromagnetic interference, using the microphone voice coil as an
//! inductive pickup.
//!
//! The spectrum is binned into three bands:
//!
//! | Band | Range | Attributed to |
//! |---|---|---|
//! | hum | 50–70 Hz | mains wiring |
//! | wifi | 1–2 kHz | wifi beat frequencies |
//! | high | 15–20 kHz | Bluetooth and switching noise |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use os4ai_kernel::CommandSchema;
use os4ai_types::{AdapterError, EmiSample, ReadingValue, SensorKind, SpectrumBin};

use crate::adapter::{ProbeContext, SensorAdapter, phase};
use crate::sox;

pub const CAPTURE_SECS: f64 = 0.5;

const HUM_BAND: (f64, f64) = (50.0, 70.0);
const WIFI_BAND: (f64, f64) = (1_000.0, 2_000.0);
const HIGH_BAND: (f64, f64) = (15_000.0, 20_000.0);

#[derive(Default)]
pub struct EmiAdapter;

#[async_trait]
impl SensorAdapter for EmiAdapter {
    fn kind(&self) -> SensorKind {
        SensorKind::Emi
    }

    fn command_schemas(&self) -> Vec<CommandSchema> {
        vec![sox::capture_schema(true)]
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<ReadingValue, AdapterError> {
        let out = ctx.run(sox::capture_spec(CAPTURE_SECS, true)).await?;
        let spectrum = sox::parse_spectrum(sox::report(&out));
        if spectrum.is_empty() {
            return Err(ctx.invalid("no spectrum rows in sox output"));
        }
        Ok(ReadingValue::Emi(from_spectrum(spectrum)))
    }

    fn simulate(&self, at: DateTime<Utc>) -> ReadingValue {
        let t = phase(at);
        let body_proximity = (0.2 + 0.3 * (t * 0.5).sin()).clamp(0.0, 1.0);

        let mut freqs = vec![60.0];
        freqs.extend((1..=40).map(|i| f64::from(i) * 500.0));
        let spectrum = freqs
            .into_iter()
            .map(|freq_hz| {
                let mut magnitude = 0.1 + 0.02 * (freq_hz * 0.37 + t).sin();
                if in_band(freq_hz, HUM_BAND) {
                    magnitude += 0.4 + 0.1 * (t * 2.0).sin();
                }
                if in_band(freq_hz, WIFI_BAND) {
                    magnitude += 0.2 * body_proximity;
                }
                if in_band(freq_hz, HIGH_BAND) {
                    magnitude += 0.15 * (1.0 + (t * 10.0).sin());
                }
                SpectrumBin { freq_hz, magnitude }
            })
            .collect();

        ReadingValue::Emi(EmiSample {
            hum_60hz: 0.3 + 0.2 * (t * 60.0 * std::f64::consts::TAU).sin(),
            wifi_harmonic: 0.1 + 0.15 * (t * 1200.0).sin().abs(),
            bluetooth_noise: 0.05 + 0.1 * (0.5 + 0.5 * (t * 7.3).sin()),
            body_proximity,
            spectrum,
        })
    }
}

fn in_band(freq: f64, (lo, hi): (f64, f64)) -> bool {
    freq >= lo && freq <= hi
}

fn band_mean(spectrum: &[SpectrumBin], band: (f64, f64)) -> f64 {
    let (sum, n) = spectrum
        .iter()
        .filter(|b| in_band(b.freq_hz, band))
        .fold((0.0, 0usize), |(s, n), b| (s + b.magnitude.abs(), n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

/// Reduce a measured spectrum to band energies.  Body proximity is the
/// share of wifi-band energy in the total, since a nearby body detunes the
/// coil mostly in that band.
pub fn from_spectrum(spectrum: Vec<SpectrumBin>) -> EmiSample {
    let hum_60hz = band_mean(&spectrum, HUM_BAND);
    let wifi_harmonic = band_mean(&spectrum, WIFI_BAND);
    let bluetooth_noise = band_mean(&spectrum, HIGH_BAND);
    let total = hum_60hz + wifi_harmonic + bluetooth_noise;
    let body_proximity = if total > 0.0 {
        (wifi_harmonic / total).clamp(0.0, 1.0)
    } else {
        0.0
    };
    EmiSample {
        hum_60hz,
        wifi_harmonic,
        bluetooth_noise,
        body_proximity,
        spectrum,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(freq_hz: f64, magnitude: f64) -> SpectrumBin {
        SpectrumBin { freq_hz, magnitude }
    }

    #[test]
    fn bands_average_their_bins() {
        let sample = from_spectrum(vec![
            bin(60.0, 0.8),
            bin(1_000.0, 0.2),
            bin(1_500.0, 0.4),
            bin(16_000.0, 0.1),
            bin(8_000.0, 5.0),
        ]);
        assert!((sample.hum_60hz - 0.8).abs() < 1e-9);
        assert!((sample.wifi_harmonic - 0.3).abs() < 1e-9);
        assert!((sample.bluetooth_noise - 0.1).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&sample.body_proximity));
    }

    #[test]
    fn silent_spectrum_has_no_proximity() {
        let sample = from_spectrum(vec![bin(60.0, 0.0)]);
        assert_eq!(sample.body_proximity, 0.0);
    }

    #[test]
    fn simulated_spectrum_has_a_hum_bin() {
        let ReadingValue::Emi(s) = EmiAdapter.simulate(Utc::now()) else {
            panic!("wrong variant");
        };
        assert!(s.spectrum.iter().any(|b| in_band(b.freq_hz, HUM_BAND)));
        assert!(s.total() > 0.0);
    }
}
