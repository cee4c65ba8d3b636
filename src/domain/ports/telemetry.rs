//! Telemetry port - read access to the instrument timeline.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::errors::InstrumentError;
use crate::domain::models::{Sample, Signal};

/// Timestamped signal readout.
///
/// All times are instrument time since the timeline started, so windows can
/// be taken over intervals that passed while a procedure was paused.
#[async_trait]
pub trait Telemetry: Send + Sync {
    /// Most recent value of `signal`.
    async fn latest_value(&self, signal: Signal) -> Result<f64, InstrumentError>;

    /// Samples of `signal` with `t0 <= time <= t1`, oldest first.
    async fn window(
        &self,
        signal: Signal,
        t0: Duration,
        t1: Duration,
    ) -> Result<Vec<Sample>, InstrumentError>;

    /// Current instrument time.
    async fn current_time(&self) -> Result<Duration, InstrumentError>;

    /// Zero the force readout at the current position.
    async fn reset_force(&self) -> Result<(), InstrumentError>;
}
