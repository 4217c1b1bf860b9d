//! Operator console for the DM table coin bridge.
//!
//! Reads one command per line from stdin:
//! `dispense <amount> [reason...]`, `status`, `queue`, `reconnect`, `quit`.

use std::path::PathBuf;

use anyhow::Result;
use dmtable_coin_bridge_lib::config::{AppConfig, DEFAULT_CONFIG_FILE};
use dmtable_coin_bridge_lib::{commands, logging, state::AppState};
use log::{error, info, warn};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    if let Err(e) = logging::init(log::LevelFilter::Info) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = AppConfig::load_config(&config_path).await?;

    info!("====================================");
    info!("  DM Table coin bridge");
    info!("  Dispenser port: {}", config.dispenser.device_path);
    info!("  Baud rate: {}", config.dispenser.baud_rate);
    info!("====================================");

    let app_state = AppState::new(config);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };

        match command {
            "dispense" => {
                let Some(amount) = words.next() else {
                    warn!("Usage: dispense <amount> [reason...]");
                    continue;
                };
                let reason: Vec<&str> = words.collect();
                let amount = serde_json::from_str::<serde_json::Value>(amount)
                    .unwrap_or_else(|_| json!(amount));
                let body = json!({ "amount": amount, "reason": reason.join(" ") });
                match commands::dispense_coins(&app_state, body).await {
                    Ok(response) => info!("{}", serde_json::to_string(&response)?),
                    Err(e) => error!("Dispense rejected: {}", e),
                }
            }
            "status" => {
                let status = commands::device_status(&app_state);
                info!("{}", serde_json::to_string_pretty(&status)?);
            }
            "queue" => match commands::pending_dispenses(&app_state).await {
                Ok(pending) => info!("{}", serde_json::to_string_pretty(&pending)?),
                Err(e) => error!("Failed to read queue: {}", e),
            },
            "reconnect" => {
                if let Err(e) = commands::reconnect_device(&app_state) {
                    error!("Failed to request reconnect: {}", e);
                }
            }
            "quit" | "exit" => break,
            other => warn!("Unknown command: {}", other),
        }
    }

    if let Err(e) = app_state.dispenser.shutdown().await {
        warn!("Connection manager already stopped: {}", e);
    }
    Ok(())
}
