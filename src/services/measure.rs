//! Averaged signal readout.

use std::time::Duration;

use crate::domain::errors::ControlResult;
use crate::domain::models::{window_mean, Signal};
use crate::domain::ports::{Clock, Telemetry};

/// Pause for `dt` and return the mean of `signal` over the pause, falling
/// back to the latest value when no sample arrived.
pub async fn measure_mean(
    telemetry: &dyn Telemetry,
    clock: &dyn Clock,
    signal: Signal,
    dt: Duration,
) -> ControlResult<f64> {
    let t0 = telemetry.current_time().await?;
    clock.pause(dt).await?;
    let t1 = telemetry.current_time().await?;
    let samples = telemetry.window(signal, t0, t1).await?;
    match window_mean(&samples) {
        Some(mean) => Ok(mean),
        None => Ok(telemetry.latest_value(signal).await?),
    }
}

/// `Duration` from seconds, clamping negative and non-finite input to zero.
pub fn seconds(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}
