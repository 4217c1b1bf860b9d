//! Caller-facing commands
//! This module defines the operations an outer request layer (HTTP, console)
//! invokes. Bodies and responses use the JSON shapes of the table's API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::DispenseOutcome;
use crate::core::serial::{ConnectionStatus, DispenseCommand, QueuedCommand};
use crate::state::AppState;

/// Body of a dispense request: `{ "amount": 5, "reason": "Quest reward" }`.
/// `amount` stays untyped so a wrong type is reported as a validation error.
#[derive(Debug, Deserialize)]
pub struct DispenseRequest {
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Reply to an accepted dispense request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispenseResponse {
    pub success: bool,
    pub queued: bool,
    pub amount: u8,
    /// Set once the coins were written to the dispenser
    pub dispensed: Option<u8>,
    pub message: String,
}

impl DispenseResponse {
    fn from_outcome(outcome: DispenseOutcome) -> Result<Self, String> {
        match outcome {
            DispenseOutcome::Dispatched { amount } => Ok(Self {
                success: true,
                queued: false,
                amount,
                dispensed: Some(amount),
                message: "Coins dispensed successfully".to_string(),
            }),
            DispenseOutcome::Queued { amount } => Ok(Self {
                success: true,
                queued: true,
                amount,
                dispensed: None,
                message: "Dispenser unavailable, coins queued for delivery".to_string(),
            }),
            DispenseOutcome::Rejected { reason } => Err(reason),
        }
    }
}

/// Dispenses coins from a JSON request body
///
/// # Arguments
/// * `app_state` - The application state
/// * `body` - The request body
///
/// # Returns
/// The response for an accepted request. A malformed request is the only
/// error; an offline dispenser still answers with `queued: true`.
pub async fn dispense_coins(app_state: &AppState, body: Value) -> Result<DispenseResponse, String> {
    let request: DispenseRequest = serde_json::from_value(body)
        .map_err(|e| format!("Invalid dispense request: {}", e))?;
    let command = DispenseCommand::from_json(request.amount.as_ref()).map_err(|e| e.to_string())?;

    let outcome = app_state
        .dispenser
        .submit(command, request.reason.as_deref())
        .await
        .map_err(|e| e.to_string())?;
    DispenseResponse::from_outcome(outcome)
}

/// Returns the current dispenser connection status
pub fn device_status(app_state: &AppState) -> ConnectionStatus {
    app_state.dispenser.status()
}

/// Lists the dispense commands waiting for the dispenser, oldest first
pub async fn pending_dispenses(app_state: &AppState) -> Result<Vec<QueuedCommand>, String> {
    app_state
        .dispenser
        .pending_commands()
        .await
        .map_err(|e| e.to_string())
}

/// Asks the connection manager to reconnect now instead of waiting for its timer
pub fn reconnect_device(app_state: &AppState) -> Result<(), String> {
    app_state.dispenser.initialize().map_err(|e| e.to_string())
}
