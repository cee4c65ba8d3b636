//! Domain errors for closed-loop instrument control.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::models::Signal;

/// Which safety condition a guard protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GuardTag {
    /// Bead tracking confidence dropped below threshold.
    LostTracking,
    /// The tethered molecule no longer carries force.
    LostTether,
}

impl GuardTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LostTracking => "lost-tracking",
            Self::LostTether => "lost-tether",
        }
    }
}

impl fmt::Display for GuardTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The limit that ran out when a budget was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetLimit {
    /// Attempt counter exceeded its maximum.
    Attempts(u32),
    /// Optional wall-clock ceiling (instrument time) was passed.
    Elapsed(Duration),
}

impl fmt::Display for BudgetLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attempts(max) => write!(f, "max {max} attempts"),
            Self::Elapsed(limit) => write!(f, "ceiling of {:.1}s", limit.as_secs_f64()),
        }
    }
}

/// Errors surfaced by instrument ports.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InstrumentError {
    #[error("Command rejected by {device}: {reason}")]
    Rejected { device: String, reason: String },

    #[error("Unknown waypoint: {0}")]
    UnknownWaypoint(String),

    #[error("Signal not available: {0}")]
    UnknownSignal(Signal),

    #[error("Export failed: {0}")]
    ExportFailed(String),
}

impl InstrumentError {
    pub fn rejected(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            device: device.into(),
            reason: reason.into(),
        }
    }
}

/// Control-level errors.
///
/// `GuardViolation` and `ConvergenceBudgetExhausted` end the current trial but
/// leave the run alive; everything else is fatal.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ControlError {
    #[error("Guard violated ({tag}): {signal} read {value:.2}, minimum {threshold:.2} (attempt {attempt})")]
    GuardViolation {
        tag: GuardTag,
        signal: Signal,
        value: f64,
        threshold: f64,
        attempt: u32,
    },

    #[error("{procedure}: budget exhausted after {attempts} attempts ({limit}); {signal} target {target:.2}, last {last:.2}")]
    ConvergenceBudgetExhausted {
        procedure: String,
        signal: Signal,
        target: f64,
        last: f64,
        attempts: u32,
        limit: BudgetLimit,
    },

    #[error("Calibration failed for {actuator}: response {response:.4} below minimum {min_response:.4}")]
    CalibrationFailure {
        actuator: String,
        response: f64,
        min_response: f64,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Instrument error: {0}")]
    Instrument(#[from] InstrumentError),
}

pub type ControlResult<T> = Result<T, ControlError>;

impl ControlError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Whether the orchestrator may retry the trial after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::GuardViolation { .. } | Self::ConvergenceBudgetExhausted { .. }
        )
    }

    /// Attempt count at the time of failure, when the error carries one.
    pub fn attempt(&self) -> Option<u32> {
        match self {
            Self::GuardViolation { attempt, .. } => Some(*attempt),
            Self::ConvergenceBudgetExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}
