//! Device control: Bluetooth pairing actions, discoverability and wifi power.
//!
//! Every operation is a single gateway call, so MAC addresses and on/off
//! values are validated by the schemas below before anything is spawned.
//! Cache invalidation after a change is the caller's job (see the runtime's
//! `SensorHub`).

use std::fmt;
use std::sync::Arc;

use os4ai_kernel::{ArgPattern, CommandGateway, CommandSchema, CommandSpec};
use os4ai_types::GatewayError;
use tracing::info;

const BLUEUTIL: &str = "blueutil";
const NETWORKSETUP: &str = "networksetup";
/// Primary wireless interface on macOS.
const WIFI_INTERFACE: &str = "en0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BluetoothAction {
    Connect,
    Disconnect,
    /// Remove the pairing.
    Forget,
}

impl BluetoothAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "connect" => Some(BluetoothAction::Connect),
            "disconnect" => Some(BluetoothAction::Disconnect),
            "forget" | "unpair" => Some(BluetoothAction::Forget),
            _ => None,
        }
    }

    fn flag(self) -> &'static str {
        match self {
            BluetoothAction::Connect => "--connect",
            BluetoothAction::Disconnect => "--disconnect",
            BluetoothAction::Forget => "--unpair",
        }
    }
}

impl fmt::Display for BluetoothAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BluetoothAction::Connect => "connect",
            BluetoothAction::Disconnect => "disconnect",
            BluetoothAction::Forget => "forget",
        };
        f.write_str(s)
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

#[derive(Clone)]
pub struct DeviceControl {
    gateway: Arc<CommandGateway>,
}

impl DeviceControl {
    pub fn new(gateway: Arc<CommandGateway>) -> Self {
        Self { gateway }
    }

    /// Argument shapes for every control command.
    pub fn command_schemas() -> Vec<CommandSchema> {
        vec![
            CommandSchema::new(
                BLUEUTIL,
                vec![
                    ArgPattern::one_of(["--connect", "--disconnect", "--unpair"]),
                    ArgPattern::MacAddress,
                ],
            ),
            CommandSchema::new(
                BLUEUTIL,
                vec![ArgPattern::literal("--discoverable"), ArgPattern::one_of(["0", "1"])],
            ),
            CommandSchema::new(BLUEUTIL, vec![ArgPattern::literal("--discoverable")]),
            CommandSchema::new(
                NETWORKSETUP,
                vec![
                    ArgPattern::literal("-setairportpower"),
                    ArgPattern::literal(WIFI_INTERFACE),
                    ArgPattern::one_of(["on", "off"]),
                ],
            ),
            CommandSchema::new(
                NETWORKSETUP,
                vec![
                    ArgPattern::one_of(["-getairportpower", "-getairportnetwork"]),
                    ArgPattern::literal(WIFI_INTERFACE),
                ],
            ),
        ]
    }

    async fn run(&self, spec: CommandSpec) -> Result<String, GatewayError> {
        let out = self.gateway.execute(&spec).await?;
        Ok(out.stdout.trim().to_string())
    }

    /// # Errors
    ///
    /// [`GatewayError::Rejected`] for a malformed MAC; otherwise whatever
    /// `blueutil` reports.
    pub async fn bluetooth(&self, action: BluetoothAction, mac: &str) -> Result<String, GatewayError> {
        info!(%action, mac, "bluetooth control");
        self.run(CommandSpec::new(BLUEUTIL, [action.flag(), mac])).await
    }

    /// Stealth mode is `set_discoverable(false)`.
    pub async fn set_discoverable(&self, discoverable: bool) -> Result<String, GatewayError> {
        info!(discoverable, "bluetooth discoverability");
        let value = if discoverable { "1" } else { "0" };
        self.run(CommandSpec::new(BLUEUTIL, ["--discoverable", value])).await
    }

    pub async fn discoverable(&self) -> Result<bool, GatewayError> {
        let out = self.run(CommandSpec::new(BLUEUTIL, ["--discoverable"])).await?;
        match out.as_str() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(GatewayError::ParseFailure {
                program: BLUEUTIL.into(),
                details: format!("unexpected discoverable state '{other}'"),
            }),
        }
    }

    pub async fn set_wifi_power(&self, on: bool) -> Result<String, GatewayError> {
        info!(on, "wifi power");
        self.run(CommandSpec::new(
            NETWORKSETUP,
            ["-setairportpower", WIFI_INTERFACE, on_off(on)],
        ))
        .await
    }

    /// Parses `Wi-Fi Power (en0): On`.
    pub async fn wifi_power(&self) -> Result<bool, GatewayError> {
        let out = self
            .run(CommandSpec::new(NETWORKSETUP, ["-getairportpower", WIFI_INTERFACE]))
            .await?;
        match out.rsplit(':').next().map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("on") => Ok(true),
            Some(s) if s.eq_ignore_ascii_case("off") => Ok(false),
            _ => Err(GatewayError::ParseFailure {
                program: NETWORKSETUP.into(),
                details: format!("unexpected power state '{out}'"),
            }),
        }
    }

    /// The joined network's name, or `None` when not associated.
    pub async fn current_network(&self) -> Result<Option<String>, GatewayError> {
        let out = self
            .run(CommandSpec::new(NETWORKSETUP, ["-getairportnetwork", WIFI_INTERFACE]))
            .await?;
        Ok(out
            .strip_prefix("Current Wi-Fi Network:")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }
}
