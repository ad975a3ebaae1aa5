//! `os4ai-cli` – OS4AI Command Line Interface
//!
//! This binary is the entry point for the sensor hub.  It:
//!
//! 1. Loads `~/.os4ai/config.toml`, writing a default document on first run.
//! 2. Starts the [`SensorHub`]: adapters, poll loops, fusion and the
//!    consciousness hypervisor.
//! 3. Drops the user into an interactive shell (`/help` lists commands).
//! 4. Intercepts **Ctrl-C** / SIGTERM, terminates every entity and stops the
//!    poll loops before exiting.

mod config;
mod repl;

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use os4ai_runtime::{SensorHub, init_tracing};
use os4ai_types::HubConfig;
use tokio::sync::watch;
use tracing::warn;

use crate::config::ConfigSource;

fn main() -> ExitCode {
    // Installed before the runtime exists; see `init_tracing`.  User-facing
    // output still uses println!.
    let _telemetry = init_tracing("os4ai");

    print_banner();

    let cfg = match config::load_or_init() {
        Ok((cfg, ConfigSource::Loaded)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok((cfg, ConfigSource::Created)) => {
            println!(
                "  {} No configuration found; defaults written to {}",
                "✓".green().bold(),
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    // `main` keeps a handle so the channel stays open even without a handler;
    // the shell treats a closed channel as a stop.
    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    let handler_tx = Arc::clone(&stop_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – initiating graceful shutdown …".yellow().bold());
        handler_tx.send_replace(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            println!("{}: {}", "Runtime error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(run(cfg, stop_rx));
    drop(stop_tx);
    code
}

async fn run(cfg: HubConfig, stop: watch::Receiver<bool>) -> ExitCode {
    let hub = match SensorHub::start(cfg) {
        Ok(hub) => hub,
        Err(e) => {
            println!("{}: {}", "Hub failed to start".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let mode = if hub.mode().is_simulated() {
        "simulated (cloud)".yellow()
    } else {
        "hardware".green()
    };
    println!("  Mode: {}", mode);
    let ids: Vec<&str> = hub.registry().ids().map(|id| id.as_str()).collect();
    println!("  Sensors: {}", ids.join(", ").bold());
    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(&hub, stop).await;

    println!("{}", "  Stopping sensor hub …".dimmed());
    hub.shutdown().await;
    println!("{}", "  ✓ Exiting OS4AI.".green());
    ExitCode::SUCCESS
}

fn print_banner() {
    println!();
    println!("{}", r#"   ____  ____ __ __  ___    ____"#.bold().cyan());
    println!("{}", r#"  / __ \/ __// // / / _ |  /  _/"#.bold().cyan());
    println!("{}", r#" / /_/ /\ \ /_  _/ / __ | _/ /  "#.bold().cyan());
    println!("{}", r#" \____/___/  /_/  /_/ |_|/___/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "OS4AI".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Sensor Fusion & Entity Hypervisor");
    println!();
}
