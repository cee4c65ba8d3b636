//! Actuator port - a steerable trap or mirror axis.

use async_trait::async_trait;

use crate::domain::errors::InstrumentError;

/// A single motion axis.
///
/// Positions are in µm of the actuator's own coordinate; the mapping to a
/// measured signal is established by calibration, not assumed.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Name as reported by the instrument, used in logs and errors.
    fn name(&self) -> &str;

    /// Relative move. `speed` in µm/s; zero means as fast as possible.
    async fn move_by(&self, delta: f64, speed: f64) -> Result<(), InstrumentError>;

    /// Absolute move.
    async fn move_to(&self, position: f64, speed: f64) -> Result<(), InstrumentError>;

    async fn current_position(&self) -> Result<f64, InstrumentError>;
}
