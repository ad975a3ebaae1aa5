//! REPL – the OS4AI interactive shell.
//!
//! Supported slash-commands:
//!   /help                               – show this list
//!   /status                             – hub summary
//!   /sensors                            – per-sensor circuit and quality
//!   /spawn <name> <s1,s2,..> [isolated] – start an entity
//!   /entities                           – list live entities
//!   /view <id>                          – an entity's restricted snapshot
//!   /terminate <id>                     – stop an entity
//!   /simulate on|off                    – switch simulated (cloud) mode
//!   /bt connect|disconnect|forget <mac> – Bluetooth device control
//!   /stealth on|off                     – hide from Bluetooth discovery
//!   /wifi on|off                        – Wi-Fi radio power
//!   /watch [n]                          – print the next n snapshots
//!   /schema [snapshot|manifest]         – JSON Schema of the data model
//!   /quit | /exit                       – gracefully exit the CLI
//!
//! Lines are read by `rustyline` on a dedicated thread and handed to the
//! async loop one at a time; the reader only prompts again once the previous
//! command has finished printing.

use std::sync::Arc;
use std::thread;

use colored::{Color, ColoredString, Colorize};
use os4ai_hal::BluetoothAction;
use os4ai_runtime::SensorHub;
use os4ai_types::{
    CircuitState, EntityId, EntityManifest, FusedSnapshot, IsolationLevel, Quality,
};
use rustyline::error::ReadlineError;
use tokio::sync::{mpsc, watch};
use tracing::warn;

const PROMPT: &str = "os4ai> ";
const DEFAULT_WATCH: usize = 5;

/// One parsed shell command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Status,
    Sensors,
    Spawn {
        name: String,
        sensors: Vec<String>,
        isolation: IsolationLevel,
    },
    Entities,
    View(EntityId),
    Terminate(EntityId),
    Simulate(bool),
    Bluetooth(BluetoothAction, String),
    Stealth(bool),
    Wifi(bool),
    Watch(usize),
    Schema(SchemaKind),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Snapshot,
    Manifest,
}

/// Parse one input line.  The error is a message for the operator.
pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = words.collect();

    let cmd = match (head, args.as_slice()) {
        ("/help", []) => Command::Help,
        ("/status", []) => Command::Status,
        ("/sensors", []) => Command::Sensors,
        ("/spawn", [name, sensors, rest @ ..]) => {
            let isolation = match rest {
                [] | ["shared"] => IsolationLevel::Shared,
                ["isolated"] => IsolationLevel::Isolated,
                _ => return Err("usage: /spawn <name> <s1,s2,..> [isolated]".to_string()),
            };
            let sensors: Vec<String> = sensors
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            Command::Spawn {
                name: name.to_string(),
                sensors,
                isolation,
            }
        }
        ("/entities", []) => Command::Entities,
        ("/view", [id]) => Command::View(parse_id(id)?),
        ("/terminate", [id]) => Command::Terminate(parse_id(id)?),
        ("/simulate", [flag]) => Command::Simulate(parse_on_off(flag)?),
        ("/bt", [action, mac]) => {
            let action = BluetoothAction::parse(action)
                .ok_or_else(|| format!("unknown bluetooth action '{action}'"))?;
            Command::Bluetooth(action, mac.to_string())
        }
        ("/stealth", [flag]) => Command::Stealth(parse_on_off(flag)?),
        ("/wifi", [flag]) => Command::Wifi(parse_on_off(flag)?),
        ("/watch", []) => Command::Watch(DEFAULT_WATCH),
        ("/watch", [n]) => match n.parse::<usize>() {
            Ok(n) if n > 0 => Command::Watch(n),
            _ => return Err(format!("'{n}' is not a positive count")),
        },
        ("/schema", []) | ("/schema", ["snapshot"]) => Command::Schema(SchemaKind::Snapshot),
        ("/schema", ["manifest"]) => Command::Schema(SchemaKind::Manifest),
        ("/quit", []) | ("/exit", []) => Command::Quit,
        (
            "/help" | "/status" | "/sensors" | "/spawn" | "/entities" | "/view" | "/terminate"
            | "/simulate" | "/bt" | "/stealth" | "/wifi" | "/watch" | "/schema" | "/quit"
            | "/exit",
            _,
        ) => return Err(format!("wrong arguments for {head}; see /help")),
        (other, _) => return Err(format!("unknown command '{other}'")),
    };
    Ok(cmd)
}

fn parse_id(raw: &str) -> Result<EntityId, String> {
    raw.parse()
        .map_err(|_| format!("'{raw}' is not an entity id"))
}

fn parse_on_off(raw: &str) -> Result<bool, String> {
    match raw {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("expected on|off, got '{other}'")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Input thread
// ─────────────────────────────────────────────────────────────────────────────

enum Input {
    Line(String),
    /// Ctrl-C at the prompt.
    Interrupted,
    Eof,
}

/// Read lines on a blocking thread.  A line is only read after a token
/// arrives on `ready`; dropping the sender ends the thread.
fn spawn_reader(ready: std::sync::mpsc::Receiver<()>, out: mpsc::Sender<Input>) {
    let spawned = thread::Builder::new()
        .name("os4ai-readline".into())
        .spawn(move || {
            let mut editor = match rustyline::DefaultEditor::new() {
                Ok(editor) => editor,
                Err(e) => {
                    eprintln!("{}: {}", "Terminal error".red(), e);
                    let _ = out.blocking_send(Input::Eof);
                    return;
                }
            };
            while ready.recv().is_ok() {
                let input = match editor.readline(&PROMPT.bold().cyan().to_string()) {
                    Ok(line) => {
                        if !line.trim().is_empty() {
                            let _ = editor.add_history_entry(line.as_str());
                        }
                        Input::Line(line)
                    }
                    Err(ReadlineError::Interrupted) => Input::Interrupted,
                    Err(ReadlineError::Eof) => Input::Eof,
                    Err(e) => {
                        eprintln!("{}: {}", "Read error".red(), e);
                        Input::Eof
                    }
                };
                let last = matches!(input, Input::Eof);
                if out.blocking_send(input).is_err() || last {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "could not start the input thread");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────────────────────────────────────

/// Whether the loop keeps going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Run the shell until `/quit`, end of input, Ctrl-C at the prompt, or
/// `stop` flipping to `true` (the process signal handler).
pub async fn run(hub: &SensorHub, mut stop: watch::Receiver<bool>) {
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    let (input_tx, mut input_rx) = mpsc::channel(1);
    spawn_reader(ready_rx, input_tx);

    loop {
        if *stop.borrow() {
            break;
        }
        if ready_tx.send(()).is_err() {
            break;
        }
        let input = tokio::select! {
            input = input_rx.recv() => input,
            // A closed channel means no stop source is left; stop as well.
            _ = stop.changed() => break,
        };
        let line = match input {
            Some(Input::Line(line)) => line,
            Some(Input::Interrupted) => {
                println!("{}", "⚠  Ctrl-C – initiating graceful shutdown …".yellow().bold());
                break;
            }
            Some(Input::Eof) | None => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let flow = match parse(line) {
            Ok(cmd) => execute(hub, cmd, &mut stop).await,
            Err(msg) => {
                println!(
                    "{} {}. Type {} for available commands.",
                    "Error:".red(),
                    msg,
                    "/help".bold()
                );
                Flow::Continue
            }
        };
        if flow == Flow::Quit {
            break;
        }
    }
}

/// Execute one command against the hub, printing its result.
pub async fn execute(hub: &SensorHub, cmd: Command, stop: &mut watch::Receiver<bool>) -> Flow {
    match cmd {
        Command::Help => cmd_help(),
        Command::Status => cmd_status(hub),
        Command::Sensors => cmd_sensors(hub),
        Command::Spawn {
            name,
            sensors,
            isolation,
        } => {
            let manifest = EntityManifest::new(name, sensors).with_isolation(isolation);
            match hub.spawn(manifest) {
                Ok(id) => {
                    let granted = hub
                        .hypervisor()
                        .describe(id)
                        .map(|e| join(e.allocation.granted.iter().map(|s| s.as_str())))
                        .unwrap_or_default();
                    println!("{} {} ({})", "✓ Spawned".green(), id.to_string().bold(), granted);
                }
                Err(e) => println!("{}: {}", "Spawn failed".red(), e),
            }
        }
        Command::Entities => cmd_entities(hub),
        Command::View(id) => match hub.get_view(id) {
            Ok(view) => print_json(&view),
            Err(e) => println!("{}: {}", "View failed".red(), e),
        },
        Command::Terminate(id) => match hub.terminate(id) {
            Ok(()) => println!("{} {}", "✓ Terminated".green(), id.to_string().bold()),
            Err(e) => println!("{}: {}", "Terminate failed".red(), e),
        },
        Command::Simulate(on) => {
            let previous = hub.set_simulated(on);
            if previous.is_simulated() == on {
                println!("  Simulated mode already {}.", on_off(on));
            } else {
                println!("{} simulated mode {}", "✓".green(), on_off(on).bold());
            }
        }
        Command::Bluetooth(action, mac) => {
            report(&format!("bluetooth {action} {mac}"), hub.bluetooth(action, &mac).await)
        }
        Command::Stealth(on) => report(&format!("stealth {}", on_off(on)), hub.set_stealth(on).await),
        Command::Wifi(on) => report(&format!("wifi {}", on_off(on)), hub.set_wifi_power(on).await),
        Command::Watch(n) => cmd_watch(hub, n, stop).await,
        Command::Schema(SchemaKind::Snapshot) => print_json(&os4ai_types::snapshot_schema()),
        Command::Schema(SchemaKind::Manifest) => print_json(&os4ai_types::manifest_schema()),
        Command::Quit => {
            println!("{}", "Goodbye.".green());
            return Flow::Quit;
        }
    }
    Flow::Continue
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "OS4AI Commands".bold().underline());
    let rows = [
        ("/status", "hub summary"),
        ("/sensors", "per-sensor circuit and last quality"),
        ("/spawn <name> <s1,s2,..> [isolated]", "start an entity"),
        ("/entities", "list live entities"),
        ("/view <id>", "an entity's restricted snapshot"),
        ("/terminate <id>", "stop an entity"),
        ("/simulate on|off", "switch simulated (cloud) mode"),
        ("/bt connect|disconnect|forget <mac>", "Bluetooth device control"),
        ("/stealth on|off", "hide from Bluetooth discovery"),
        ("/wifi on|off", "Wi-Fi radio power"),
        ("/watch [n]", "print the next n snapshots"),
        ("/schema [snapshot|manifest]", "JSON Schema of the data model"),
        ("/quit  /exit", "exit the CLI"),
    ];
    for (cmd, what) in rows {
        println!("  {} – {}", format!("{cmd:<38}").bold().cyan(), what);
    }
    println!();
}

fn cmd_status(hub: &SensorHub) {
    let status = hub.status();
    println!("{}", "Hub Status".bold().underline());
    let mode = if status.simulated {
        "simulated".yellow()
    } else {
        "hardware".green()
    };
    println!("  Mode                : {}", mode);
    println!("  Snapshot sequence   : {}", status.sequence);
    println!("  Sensors             : {}", status.sensors);
    println!("  Entities            : {}", status.entities);
    println!("  Gateway invocations : {}", status.gateway_invocations);
    println!("  Cache refreshes     : {}", status.cache_refreshes);
}

fn cmd_sensors(hub: &SensorHub) {
    println!("{}", "Sensors".bold().underline());
    println!(
        "  {:<12} {:<10} {:<10} {:>8} {:>10}  {}",
        "ID", "KIND", "CIRCUIT", "FAILS", "INTERVAL", "LAST"
    );
    for s in hub.sensor_status() {
        println!(
            "  {:<12} {:<10} {} {:>8} {:>8}ms  {}",
            s.id.as_str(),
            s.kind.as_str(),
            circuit_label(s.circuit),
            s.consecutive_failures,
            s.poll_interval_ms,
            quality_label(s.last_quality),
        );
    }
}

fn cmd_entities(hub: &SensorHub) {
    let ids = hub.list();
    if ids.is_empty() {
        println!("  {}", "No live entities.".dimmed());
        return;
    }
    println!("{}", "Entities".bold().underline());
    for id in ids {
        match hub.hypervisor().describe(id) {
            Ok(entity) => println!(
                "  {}  {:<16} {:<8} [{}] {}",
                id.to_string().bold(),
                entity.manifest.name,
                entity.state.to_string(),
                join(entity.allocation.granted.iter().map(|s| s.as_str())),
                format!("{:?}", entity.allocation.isolation).to_lowercase().dimmed(),
            ),
            Err(e) => println!("  {}  {}", id, e.to_string().red()),
        }
    }
}

async fn cmd_watch(hub: &SensorHub, n: usize, stop: &mut watch::Receiver<bool>) {
    let mut rx = hub.subscribe();
    for _ in 0..n {
        let snapshot = tokio::select! {
            snapshot = rx.changed() => snapshot,
            _ = stop.changed() => None,
        };
        match snapshot {
            Some(snapshot) => println!("{}", snapshot_line(&snapshot)),
            None => break,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// `#12  cpu_temp_c=48.00 occupancy=0.31 …`
pub(crate) fn snapshot_line(snapshot: &Arc<FusedSnapshot>) -> String {
    let metrics: Vec<String> = snapshot
        .metrics
        .iter()
        .map(|(name, m)| format!("{name}={:.2}", m.value))
        .collect();
    format!("#{:<5} {}", snapshot.sequence, metrics.join(" "))
}

fn report(what: &str, result: Result<String, os4ai_types::GatewayError>) {
    match result {
        Ok(out) => {
            println!("{} {}", "✓".green(), what.bold());
            let out = out.trim();
            if !out.is_empty() {
                println!("  {}", out.dimmed());
            }
        }
        Err(e) => println!("{} {}: {}", "✗".red(), what, e),
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("{}: {}", "Serialisation failed".red(), e),
    }
}

/// Padded to the CIRCUIT column before colouring.
fn circuit_label(state: CircuitState) -> ColoredString {
    let (text, color) = match state {
        CircuitState::Closed => ("closed", Color::Green),
        CircuitState::HalfOpen => ("half-open", Color::Yellow),
        CircuitState::Open => ("open", Color::Red),
    };
    format!("{text:<10}").color(color)
}

fn quality_label(quality: Option<Quality>) -> ColoredString {
    match quality {
        Some(Quality::Real) => "real".green(),
        Some(Quality::Simulated) => "simulated".cyan(),
        Some(Quality::Stale) => "stale".yellow(),
        Some(Quality::Failed) => "failed".red(),
        None => "-".dimmed(),
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use os4ai_types::HubConfig;
    use std::time::Duration;

    fn simulated_hub() -> SensorHub {
        SensorHub::start(HubConfig {
            simulated: true,
            ..HubConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn parses_spawn_with_isolation() {
        assert_eq!(
            parse("/spawn scout wifi,thermal isolated").unwrap(),
            Command::Spawn {
                name: "scout".into(),
                sensors: vec!["wifi".into(), "thermal".into()],
                isolation: IsolationLevel::Isolated,
            }
        );
        assert!(matches!(
            parse("/spawn scout wifi").unwrap(),
            Command::Spawn {
                isolation: IsolationLevel::Shared,
                ..
            }
        ));
        assert!(parse("/spawn scout wifi sealed").is_err());
        assert!(parse("/spawn scout").is_err());
    }

    #[test]
    fn parses_switches_and_counts() {
        assert_eq!(parse("/simulate on").unwrap(), Command::Simulate(true));
        assert_eq!(parse("/wifi off").unwrap(), Command::Wifi(false));
        assert_eq!(parse("/stealth on").unwrap(), Command::Stealth(true));
        assert!(parse("/wifi maybe").is_err());
        assert_eq!(parse("/watch").unwrap(), Command::Watch(DEFAULT_WATCH));
        assert_eq!(parse("/watch 3").unwrap(), Command::Watch(3));
        assert!(parse("/watch 0").is_err());
        assert_eq!(parse("/schema").unwrap(), Command::Schema(SchemaKind::Snapshot));
        assert_eq!(parse("/schema manifest").unwrap(), Command::Schema(SchemaKind::Manifest));
    }

    #[test]
    fn parses_bluetooth_and_ids() {
        assert_eq!(
            parse("/bt forget AA:BB:CC:DD:EE:FF").unwrap(),
            Command::Bluetooth(BluetoothAction::Forget, "AA:BB:CC:DD:EE:FF".into())
        );
        assert!(parse("/bt pair AA:BB:CC:DD:EE:FF").is_err());
        let id = EntityId::new();
        assert_eq!(parse(&format!("/view {id}")).unwrap(), Command::View(id));
        assert!(parse("/terminate not-a-uuid").is_err());
    }

    #[test]
    fn unknown_and_malformed_commands_are_errors() {
        assert!(parse("/launch").unwrap_err().contains("unknown command"));
        assert!(parse("/status now").unwrap_err().contains("wrong arguments"));
        assert!(parse("   ").is_err());
        assert_eq!(parse("/exit").unwrap(), Command::Quit);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_and_terminate_through_the_shell() {
        let hub = simulated_hub();
        let (_stop_tx, mut stop) = watch::channel(false);

        let flow = execute(&hub, parse("/spawn scout thermal,wifi").unwrap(), &mut stop).await;
        assert_eq!(flow, Flow::Continue);
        let ids = hub.list();
        assert_eq!(ids.len(), 1);

        execute(&hub, Command::Terminate(ids[0]), &mut stop).await;
        assert!(hub.list().is_empty());
        assert_eq!(execute(&hub, Command::Quit, &mut stop).await, Flow::Quit);
        hub.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn device_control_is_refused_while_simulated() {
        let hub = simulated_hub();
        let (_stop_tx, mut stop) = watch::channel(false);
        execute(&hub, Command::Simulate(true), &mut stop).await;
        execute(&hub, Command::Wifi(false), &mut stop).await;
        assert!(hub.mode().is_simulated());
        assert_eq!(hub.status().gateway_invocations, 0);
        hub.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn watch_stops_when_signalled() {
        let hub = simulated_hub();
        let (stop_tx, mut stop) = watch::channel(false);
        stop_tx.send_replace(true);
        // Far more snapshots than the hub will produce; the stop signal ends it.
        execute(&hub, Command::Watch(10_000), &mut stop).await;
        hub.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn watch_ends_when_the_stop_sender_is_gone() {
        let hub = simulated_hub();
        let (stop_tx, mut stop) = watch::channel(false);
        drop(stop_tx);
        let finished = tokio::time::timeout(
            Duration::from_secs(5),
            execute(&hub, Command::Watch(10_000), &mut stop),
        )
        .await;
        assert_eq!(finished, Ok(Flow::Continue));
        hub.shutdown().await;
    }

    #[test]
    fn snapshot_line_lists_metrics() {
        let mut snap = FusedSnapshot::empty();
        snap.sequence = 7;
        snap.metrics.insert(
            "cpu_temp_c".into(),
            os4ai_types::MetricValue {
                value: 48.0,
                sources: ["thermal".into()].into_iter().collect(),
            },
        );
        let line = snapshot_line(&Arc::new(snap));
        assert!(line.starts_with("#7"));
        assert!(line.contains("cpu_temp_c=48.00"));
    }
}
