//! Convergence loop parameters, states and reports.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AttemptBudget, Signal};
use crate::domain::errors::{BudgetLimit, ControlError, ControlResult};

/// How the loop reads its measured signal each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureMode {
    /// The most recent sample.
    #[default]
    Latest,
    /// Mean over the samples taken during the preceding settle pause.
    WindowMean,
}

/// Empirical actuator gain: measured signal change per commanded unit.
///
/// Step commands are divided by the gain so the *measured* change matches the
/// intended step. A negative gain means the axis is mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub gain: f64,
}

impl Calibration {
    pub const IDENTITY: Self = Self { gain: 1.0 };

    pub fn new(gain: f64) -> Self {
        Self { gain }
    }

    /// Command needed to produce `measured_delta` in the signal.
    pub fn correct(&self, measured_delta: f64) -> f64 {
        measured_delta / self.gain
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Parameters of one convergence loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopParams {
    /// Name used in logs and errors (e.g. `goto_force`).
    pub procedure: String,
    pub signal: Signal,
    pub target: f64,
    /// Converged when `|measured - target| <= tolerance`. Must be > 0.
    pub tolerance: f64,
    /// Magnitude of one step in actuator units. Must be > 0.
    pub step: f64,
    /// Actuator speed passed to every move.
    pub speed: f64,
    /// Settle pause after each step; the loop's only suspension point.
    pub poll_interval: Duration,
    pub budget: AttemptBudget,
    #[serde(default)]
    pub measure: MeasureMode,
    #[serde(default)]
    pub calibration: Calibration,
    /// Optional ceiling on instrument time spent in the loop.
    #[serde(default)]
    pub max_elapsed: Option<Duration>,
}

impl LoopParams {
    pub fn new(procedure: impl Into<String>, signal: Signal, target: f64) -> Self {
        Self {
            procedure: procedure.into(),
            signal,
            target,
            tolerance: 0.2,
            step: 0.1,
            speed: 1.0,
            poll_interval: Duration::from_millis(100),
            budget: AttemptBudget::default(),
            measure: MeasureMode::Latest,
            calibration: Calibration::IDENTITY,
            max_elapsed: None,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_budget(mut self, max_attempts: u32) -> Self {
        self.budget = AttemptBudget::new(max_attempts);
        self
    }

    pub fn with_measure(mut self, measure: MeasureMode) -> Self {
        self.measure = measure;
        self
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    /// Reject parameters that could keep the loop from terminating.
    pub fn validate(&self) -> ControlResult<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ControlError::invalid(format!(
                "{}: tolerance must be strictly positive, got {}",
                self.procedure, self.tolerance
            )));
        }
        if !(self.step.is_finite() && self.step > 0.0) {
            return Err(ControlError::invalid(format!(
                "{}: step must be strictly positive, got {}",
                self.procedure, self.step
            )));
        }
        if !self.target.is_finite() {
            return Err(ControlError::invalid(format!(
                "{}: target must be finite",
                self.procedure
            )));
        }
        if self.speed < 0.0 {
            return Err(ControlError::invalid(format!(
                "{}: speed cannot be negative",
                self.procedure
            )));
        }
        if self.calibration.gain == 0.0 || !self.calibration.gain.is_finite() {
            return Err(ControlError::invalid(format!(
                "{}: calibration gain must be finite and non-zero",
                self.procedure
            )));
        }
        Ok(())
    }
}

/// Loop state machine. Terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceState {
    Converging,
    Converged,
    GuardFailed,
    BudgetExhausted,
}

impl ConvergenceState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Converging)
    }

    /// Move to `next` unless already terminal.
    pub fn advance(self, next: Self) -> Self {
        if self.is_terminal() {
            self
        } else {
            next
        }
    }
}

/// What happened during a loop run.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceReport {
    pub procedure: String,
    pub signal: Signal,
    pub target: f64,
    pub state: ConvergenceState,
    /// Iterations started, including the terminating one.
    pub iterations: u32,
    /// Actuation commands issued.
    pub steps_issued: u32,
    /// Last measured value, `NaN` if the loop stopped before measuring.
    pub final_measured: f64,
    /// Measured value at each iteration, in order.
    pub history: Vec<f64>,
    /// Guard failure or budget error, set for the two failing states.
    pub failure: Option<ControlError>,
    pub limit: Option<BudgetLimit>,
}

impl ConvergenceReport {
    pub fn converged(&self) -> bool {
        self.state == ConvergenceState::Converged
    }

    /// Converged reports pass through; failures become their tagged error.
    pub fn into_result(self) -> ControlResult<Self> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}
