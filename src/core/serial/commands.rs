//! Coin dispenser commands
//! This module contains the command written to the dispenser and its validation.

use serde::Serialize;
use std::fmt;

use crate::core::serial::constants::{MAX_DISPENSE_AMOUNT, MIN_DISPENSE_AMOUNT};

/// A validated request to dispense coins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispenseCommand {
    amount: u8,
}

/// Why a dispense request was refused before reaching the device
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Amount is required")]
    Missing,
    #[error("Amount must be a whole number")]
    NotAnInteger,
    #[error("Amount must be a number between 1 and 100, got {0}")]
    OutOfRange(i64),
}

impl DispenseCommand {
    /// Validates an amount and builds the command
    pub fn new(amount: i64) -> Result<Self, ValidationError> {
        if !(MIN_DISPENSE_AMOUNT..=MAX_DISPENSE_AMOUNT).contains(&amount) {
            return Err(ValidationError::OutOfRange(amount));
        }
        let amount = u8::try_from(amount).map_err(|_| ValidationError::OutOfRange(amount))?;
        Ok(Self { amount })
    }

    /// Validates an untyped amount, e.g. the `amount` field of a JSON body
    pub fn from_json(value: Option<&serde_json::Value>) -> Result<Self, ValidationError> {
        let value = match value {
            None | Some(serde_json::Value::Null) => return Err(ValidationError::Missing),
            Some(value) => value,
        };
        if let Some(amount) = value.as_i64() {
            return Self::new(amount);
        }
        // Accept 5.0 but not 5.5
        match value.as_f64() {
            Some(amount) if amount.fract() == 0.0 && amount.abs() < i64::MAX as f64 => {
                Self::new(amount as i64)
            }
            _ => Err(ValidationError::NotAnInteger),
        }
    }

    pub fn amount(&self) -> u8 {
        self.amount
    }

    /// Convert the command to its wire representation: the decimal amount
    /// followed by a newline
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}\n", self.amount).into_bytes()
    }
}

impl fmt::Display for DispenseCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dispense {}", self.amount)
    }
}
