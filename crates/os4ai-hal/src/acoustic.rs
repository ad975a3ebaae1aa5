//! Room acoustics from a short microphone capture.
//!
//! The probe records for [`CAPTURE_SECS`] and reports the ambient (RMS) and
//! peak levels.  The decay envelope is the straight line from peak to
//! ambient across the capture; reverberation metrics downstream read its
//! slope.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use os4ai_kernel::CommandSchema;
use os4ai_types::{AcousticSample, AdapterError, ReadingValue, SensorKind};

use crate::adapter::{ProbeContext, SensorAdapter, phase};
use crate::sox;

pub const CAPTURE_SECS: f64 = 1.0;

/// Envelope spacing used by simulated samples.
const SIM_INTERVAL_MS: u32 = 50;

/// Simulated rooms decay at 150 dB/s, i.e. RT60 ≈ 0.4 s.
const SIM_DECAY_DB_PER_SEC: f64 = 150.0;

#[derive(Default)]
pub struct AcousticAdapter;

#[async_trait]
impl SensorAdapter for AcousticAdapter {
    fn kind(&self) -> SensorKind {
        SensorKind::Acoustic
    }

    fn command_schemas(&self) -> Vec<CommandSchema> {
        vec![sox::capture_schema(false)]
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<ReadingValue, AdapterError> {
        let out = ctx.run(sox::capture_spec(CAPTURE_SECS, false)).await?;
        let stats = sox::parse_stats(sox::report(&out)).map_err(|e| ctx.invalid(e))?;
        let ambient_db = stats.ambient_db();
        let peak_db = stats.peak_db().max(ambient_db);
        Ok(ReadingValue::Acoustic(AcousticSample {
            ambient_db,
            peak_db,
            decay_db: vec![peak_db, ambient_db],
            decay_interval_ms: (CAPTURE_SECS * 1000.0) as u32,
        }))
    }

    fn simulate(&self, at: DateTime<Utc>) -> ReadingValue {
        let t = phase(at);
        let ambient_db = 20.0 + 10.0 * (0.5 + 0.5 * (t * 0.2).sin());
        let peak_db = ambient_db + 30.0;
        let step = SIM_DECAY_DB_PER_SEC * f64::from(SIM_INTERVAL_MS) / 1000.0;
        let decay_db = (0..8)
            .map(|i| (peak_db - step * f64::from(i)).max(ambient_db))
            .collect();
        ReadingValue::Acoustic(AcousticSample {
            ambient_db,
            peak_db,
            decay_db,
            decay_interval_ms: SIM_INTERVAL_MS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_envelope_decays_monotonically() {
        let ReadingValue::Acoustic(s) = AcousticAdapter.simulate(Utc::now()) else {
            panic!("wrong variant");
        };
        assert_eq!(s.decay_db.first().copied(), Some(s.peak_db));
        assert!(s.decay_db.windows(2).all(|w| w[1] <= w[0]));
        assert!(s.decay_db.iter().all(|d| *d >= s.ambient_db));
    }
}
