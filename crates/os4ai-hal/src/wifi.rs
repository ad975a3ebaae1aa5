//! Visible wireless networks and their signal strength.
//!
//! | Platform | Probe |
//! |---|---|
//! | macOS | `airport -s` (Apple80211 private framework utility) |
//! | Linux | `nmcli -t -f SSID,BSSID,SIGNAL,CHAN,SECURITY dev wifi list` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use os4ai_kernel::{ArgPattern, CommandSchema, CommandSpec};
use os4ai_types::{AdapterError, ReadingValue, SensorKind, WifiNetwork, WifiScan};

use crate::adapter::{Platform, ProbeContext, SensorAdapter, phase};

pub const AIRPORT: &str =
    "/System/Library/PrivateFrameworks/Apple80211.framework/Versions/Current/Resources/airport";

const NMCLI_FIELDS: &str = "SSID,BSSID,SIGNAL,CHAN,SECURITY";

/// Width of the right-aligned SSID column in `airport -s` output.
const AIRPORT_SSID_WIDTH: usize = 32;

pub struct WifiAdapter {
    platform: Platform,
}

impl WifiAdapter {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

impl Default for WifiAdapter {
    fn default() -> Self {
        Self::new(Platform::current())
    }
}

#[async_trait]
impl SensorAdapter for WifiAdapter {
    fn kind(&self) -> SensorKind {
        SensorKind::Wifi
    }

    fn command_schemas(&self) -> Vec<CommandSchema> {
        match self.platform {
            Platform::MacOs => vec![CommandSchema::new(AIRPORT, vec![ArgPattern::literal("-s")])],
            Platform::Linux => vec![CommandSchema::new(
                "nmcli",
                ["-t", "-f", NMCLI_FIELDS, "dev", "wifi", "list"]
                    .into_iter()
                    .map(ArgPattern::literal)
                    .collect(),
            )],
        }
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<ReadingValue, AdapterError> {
        let networks = match self.platform {
            Platform::MacOs => {
                let out = ctx.run(CommandSpec::new(AIRPORT, ["-s"])).await?;
                parse_airport(&out.stdout).map_err(|e| ctx.invalid(e))?
            }
            Platform::Linux => {
                let out = ctx
                    .run(CommandSpec::new(
                        "nmcli",
                        ["-t", "-f", NMCLI_FIELDS, "dev", "wifi", "list"],
                    ))
                    .await?;
                parse_nmcli(&out.stdout).map_err(|e| ctx.invalid(e))?
            }
        };
        Ok(ReadingValue::Wifi(WifiScan { networks }))
    }

    fn simulate(&self, at: DateTime<Utc>) -> ReadingValue {
        let t = phase(at);
        let networks = [
            ("HomeNet", "f0:9f:c2:00:00:01", 0.0, 6, "WPA2 Personal"),
            ("HomeNet-5G", "f0:9f:c2:00:00:02", -4.0, 36, "WPA3 Personal"),
            ("Neighbour", "3c:84:6a:00:00:03", -18.0, 11, "WPA2 Personal"),
            ("CoffeeShop", "00:1a:2b:00:00:04", -24.0, 1, "Open"),
        ]
        .into_iter()
        .enumerate()
        .map(|(i, (ssid, bssid, offset, channel, security))| {
            let wobble = 5.0 * (t * 0.3 + i as f64).sin();
            WifiNetwork {
                ssid: ssid.to_string(),
                bssid: bssid.to_string(),
                rssi_dbm: (-65.0 + offset + wobble).round() as i32,
                channel,
                security: security.to_string(),
            }
        })
        .collect();
        ReadingValue::Wifi(WifiScan { networks })
    }
}

/// Parse `airport -s`: a header line, then one row per network with the
/// SSID right-aligned in the first 32 columns followed by
/// `BSSID RSSI CHANNEL HT CC SECURITY...`.
pub fn parse_airport(output: &str) -> Result<Vec<WifiNetwork>, String> {
    let mut lines = output.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    if !header.contains("SSID") {
        return Err(format!("unexpected airport header: {header:?}"));
    }

    let mut networks = Vec::new();
    for line in lines {
        let Some(ssid) = line.get(..AIRPORT_SSID_WIDTH) else {
            continue;
        };
        let rest: Vec<&str> = line[AIRPORT_SSID_WIDTH..].split_whitespace().collect();
        if rest.len() < 3 {
            continue;
        }
        let (Ok(rssi), Some(Ok(channel))) = (
            rest[1].parse::<i32>(),
            rest[2].split(',').next().map(str::parse::<u32>),
        ) else {
            continue;
        };
        let security = if rest.len() > 5 {
            rest[5..].join(" ")
        } else {
            "Open".to_string()
        };
        let ssid = ssid.trim();
        networks.push(WifiNetwork {
            ssid: if ssid.is_empty() { "(Hidden)".to_string() } else { ssid.to_string() },
            bssid: rest[0].to_string(),
            rssi_dbm: rssi,
            channel,
            security,
        });
    }
    Ok(networks)
}

/// Split one `nmcli -t` line on unescaped `:` and unescape `\:` / `\\`.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next()
                    && let Some(field) = fields.last_mut()
                {
                    field.push(next);
                }
            }
            ':' => fields.push(String::new()),
            other => {
                if let Some(field) = fields.last_mut() {
                    field.push(other);
                }
            }
        }
    }
    fields
}

/// Parse terse `nmcli` output.  `SIGNAL` is a 0–100 quality percentage and is
/// mapped onto dBm as `signal / 2 - 100`.
pub fn parse_nmcli(output: &str) -> Result<Vec<WifiNetwork>, String> {
    let mut networks = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields = split_terse(line);
        if fields.len() != 5 {
            return Err(format!("expected 5 fields, got {}: {line:?}", fields.len()));
        }
        let signal: i32 = fields[2]
            .trim()
            .parse()
            .map_err(|_| format!("bad SIGNAL {:?}", fields[2]))?;
        let channel: u32 = fields[3]
            .trim()
            .parse()
            .map_err(|_| format!("bad CHAN {:?}", fields[3]))?;
        let ssid = fields[0].trim();
        let security = fields[4].trim();
        networks.push(WifiNetwork {
            ssid: if ssid.is_empty() { "(Hidden)".to_string() } else { ssid.to_string() },
            bssid: fields[1].clone(),
            rssi_dbm: signal.clamp(0, 100) / 2 - 100,
            channel,
            security: if security.is_empty() || security == "--" {
                "Open".to_string()
            } else {
                security.to_string()
            },
        });
    }
    Ok(networks)
}

#[cfg(test)]
mod tests {
    use super::*;

    const AIRPORT_OUT: &str = "                            SSID BSSID             RSSI CHANNEL HT CC SECURITY (auth/unicast/group)
                         HomeNet f0:9f:c2:00:00:01 -52  6       Y  US WPA2(PSK/AES/AES)
                                 00:1a:2b:00:00:04 -80  1,+1    N  -- NONE
";

    #[test]
    fn airport_rows_parse() {
        let nets = parse_airport(AIRPORT_OUT).unwrap();
        assert_eq!(nets.len(), 2);
        assert_eq!(nets[0].ssid, "HomeNet");
        assert_eq!(nets[0].rssi_dbm, -52);
        assert_eq!(nets[0].channel, 6);
        assert_eq!(nets[0].security, "WPA2(PSK/AES/AES)");
        assert_eq!(nets[1].ssid, "(Hidden)");
        assert_eq!(nets[1].channel, 1);
    }

    #[test]
    fn airport_empty_output_is_no_networks() {
        assert!(parse_airport("").unwrap().is_empty());
    }

    #[test]
    fn airport_unknown_header_is_rejected() {
        assert!(parse_airport("error: not supported\n").is_err());
    }

    #[test]
    fn nmcli_unescapes_bssid() {
        let out = "HomeNet:F0\\:9F\\:C2\\:00\\:00\\:01:70:6:WPA2\n:00\\:1A\\:2B\\:00\\:00\\:04:20:1:\n";
        let nets = parse_nmcli(out).unwrap();
        assert_eq!(nets.len(), 2);
        assert_eq!(nets[0].bssid, "F0:9F:C2:00:00:01");
        assert_eq!(nets[0].rssi_dbm, -65);
        assert_eq!(nets[1].ssid, "(Hidden)");
        assert_eq!(nets[1].security, "Open");
    }

    #[test]
    fn nmcli_wrong_shape_is_rejected() {
        assert!(parse_nmcli("just some text\n").is_err());
    }

    #[test]
    fn simulated_rssi_stays_plausible() {
        let adapter = WifiAdapter::new(Platform::Linux);
        let ReadingValue::Wifi(scan) = adapter.simulate(Utc::now()) else {
            panic!("wrong variant");
        };
        assert_eq!(scan.networks.len(), 4);
        assert!(scan.networks.iter().all(|n| (-100..=-30).contains(&n.rssi_dbm)));
    }
}
