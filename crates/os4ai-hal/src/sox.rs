//! Microphone capture through `sox`, shared by the acoustic and EMI adapters.
//!
//! `sox -q -d -n trim 0 <secs> stat [-freq]` records from the default input
//! device, discards the audio and prints statistics on **stderr**.  With
//! `-freq` the statistics are preceded by `<frequency> <magnitude>` rows.

use os4ai_kernel::{ArgPattern, CommandOutput, CommandSchema, CommandSpec};
use os4ai_types::SpectrumBin;

/// Reference offset from dBFS to an approximate SPL scale.
const DBFS_TO_SPL: f64 = 94.0;

/// Longest capture any adapter may request, in seconds.
const MAX_CAPTURE_SECS: f64 = 5.0;

pub fn capture_spec(seconds: f64, with_spectrum: bool) -> CommandSpec {
    let mut args = vec![
        "-q".to_string(),
        "-d".to_string(),
        "-n".to_string(),
        "trim".to_string(),
        "0".to_string(),
        format!("{seconds:.2}"),
        "stat".to_string(),
    ];
    if with_spectrum {
        args.push("-freq".to_string());
    }
    CommandSpec::new("sox", args)
}

pub fn capture_schema(with_spectrum: bool) -> CommandSchema {
    let mut args = vec![
        ArgPattern::literal("-q"),
        ArgPattern::literal("-d"),
        ArgPattern::literal("-n"),
        ArgPattern::literal("trim"),
        ArgPattern::literal("0"),
        ArgPattern::Decimal {
            min: 0.05,
            max: MAX_CAPTURE_SECS,
        },
        ArgPattern::literal("stat"),
    ];
    if with_spectrum {
        args.push(ArgPattern::literal("-freq"));
    }
    CommandSchema::new("sox", args)
}

/// sox writes its report to stderr; fall back to stdout for wrappers that
/// redirect it.
pub fn report(out: &CommandOutput) -> &str {
    if out.stderr.trim().is_empty() {
        &out.stdout
    } else {
        &out.stderr
    }
}

/// Amplitude summary from the `stat` effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureStats {
    pub max_amplitude: f64,
    pub rms_amplitude: f64,
}

impl CaptureStats {
    pub fn peak_db(&self) -> f64 {
        amplitude_to_db(self.max_amplitude)
    }

    pub fn ambient_db(&self) -> f64 {
        amplitude_to_db(self.rms_amplitude)
    }
}

fn amplitude_to_db(amplitude: f64) -> f64 {
    20.0 * amplitude.abs().max(1e-6).log10() + DBFS_TO_SPL
}

fn stat_value(report: &str, label: &str) -> Option<f64> {
    report.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let key = key.split_whitespace().collect::<Vec<_>>().join(" ");
        (key == label).then(|| value.trim().parse().ok()).flatten()
    })
}

/// Parse `Maximum amplitude` and `RMS amplitude` from a `stat` report.
pub fn parse_stats(report: &str) -> Result<CaptureStats, String> {
    let max_amplitude =
        stat_value(report, "Maximum amplitude").ok_or("missing 'Maximum amplitude'")?;
    let rms_amplitude = stat_value(report, "RMS amplitude").ok_or("missing 'RMS amplitude'")?;
    Ok(CaptureStats {
        max_amplitude,
        rms_amplitude,
    })
}

/// Parse the `-freq` rows: two numeric columns per line.  Other lines are
/// skipped.
pub fn parse_spectrum(report: &str) -> Vec<SpectrumBin> {
    report
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let freq_hz = cols.next()?.parse::<f64>().ok()?;
            let magnitude = cols.next()?.parse::<f64>().ok()?;
            if cols.next().is_some() || !freq_hz.is_finite() || !magnitude.is_finite() {
                return None;
            }
            Some(SpectrumBin { freq_hz, magnitude })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "\
Samples read:             44100
Length (seconds):      1.000000
Scaled by:         2147483647.0
Maximum amplitude:     0.125000
Minimum amplitude:    -0.117000
RMS     amplitude:     0.010000
";

    #[test]
    fn stats_parse_and_convert() {
        let stats = parse_stats(STAT).unwrap();
        assert_eq!(stats.max_amplitude, 0.125);
        assert_eq!(stats.rms_amplitude, 0.01);
        assert!((stats.ambient_db() - 54.0).abs() < 1e-9);
        assert!(stats.peak_db() > stats.ambient_db());
    }

    #[test]
    fn stats_missing_field_is_error() {
        assert!(parse_stats("Samples read: 10\n").is_err());
    }

    #[test]
    fn spectrum_skips_non_numeric_rows() {
        let text = "0.000000  0.100000\n60.000000  0.800000\nSamples read: 100\n";
        let bins = parse_spectrum(text);
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[1].freq_hz, 60.0);
    }

    #[test]
    fn capture_spec_matches_schema() {
        let spec = capture_spec(0.5, true);
        assert!(capture_schema(true).accepts(&spec.args).is_ok());
        assert!(capture_schema(false).accepts(&spec.args).is_err());
    }

    #[test]
    fn report_prefers_stderr() {
        let out = CommandOutput {
            stdout: "out".into(),
            stderr: "err".into(),
        };
        assert_eq!(report(&out), "err");
    }
}
