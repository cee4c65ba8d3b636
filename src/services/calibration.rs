//! Empirical actuator calibration.

use std::time::Duration;
use tracing::{info, warn};

use super::measure::measure_mean;
use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::{Calibration, Signal};
use crate::domain::ports::{Actuator, Clock, Telemetry};

/// Smallest accepted |Δsignal / Δcommand|.
pub const DEFAULT_MIN_RESPONSE: f64 = 0.05;
/// Probe move used for calibration and bead identification, in µm.
pub const DEFAULT_PROBE: f64 = 1.0;

/// Measures actuator gains by probing.
pub struct Calibrator<'a> {
    telemetry: &'a dyn Telemetry,
    clock: &'a dyn Clock,
    settle: Duration,
    min_response: f64,
}

impl<'a> Calibrator<'a> {
    pub fn new(telemetry: &'a dyn Telemetry, clock: &'a dyn Clock, settle: Duration) -> Self {
        Self {
            telemetry,
            clock,
            settle,
            min_response: DEFAULT_MIN_RESPONSE,
        }
    }

    pub fn with_min_response(mut self, min_response: f64) -> Self {
        self.min_response = min_response;
        self
    }

    /// Move `actuator` by `probe`, measure the change of `signal`, then move
    /// back. Fails when the axis produced no measurable response.
    pub async fn calibrate(
        &self,
        actuator: &dyn Actuator,
        signal: Signal,
        probe: f64,
        speed: f64,
    ) -> ControlResult<Calibration> {
        let delta = self.probe_response(actuator, &[signal], probe, speed).await?[0];
        let gain = delta / probe;
        if !gain.is_finite() || gain.abs() < self.min_response {
            warn!(actuator = actuator.name(), %signal, gain, "No measurable response");
            return Err(ControlError::CalibrationFailure {
                actuator: actuator.name().to_string(),
                response: gain,
                min_response: self.min_response,
            });
        }
        info!(actuator = actuator.name(), %signal, gain, "Calibrated");
        Ok(Calibration::new(gain))
    }

    /// Find which of `candidates` follows `actuator`: the bead whose position
    /// changes most under a probe move.
    pub async fn identify_bead(
        &self,
        actuator: &dyn Actuator,
        candidates: &[u8],
        probe: f64,
        speed: f64,
    ) -> ControlResult<u8> {
        let signals: Vec<Signal> = candidates
            .iter()
            .map(|bead| Signal::BeadPosition { bead: *bead })
            .collect();
        let deltas = self.probe_response(actuator, &signals, probe, speed).await?;
        let best = candidates
            .iter()
            .zip(deltas)
            .map(|(bead, delta)| (*bead, (delta / probe).abs()))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        match best {
            Some((bead, response)) if response >= self.min_response => {
                info!(actuator = actuator.name(), bead, response, "Identified bead");
                Ok(bead)
            }
            Some((_, response)) => Err(ControlError::CalibrationFailure {
                actuator: actuator.name().to_string(),
                response,
                min_response: self.min_response,
            }),
            None => Err(ControlError::invalid(format!(
                "no candidate beads to identify for {}",
                actuator.name()
            ))),
        }
    }

    async fn probe_response(
        &self,
        actuator: &dyn Actuator,
        signals: &[Signal],
        probe: f64,
        speed: f64,
    ) -> ControlResult<Vec<f64>> {
        let mut before = Vec::with_capacity(signals.len());
        for signal in signals {
            before.push(self.telemetry.latest_value(*signal).await?);
        }
        actuator.move_by(probe, speed).await?;
        // Let the tracker follow before reading, then average over the settle.
        self.clock.pause(self.settle).await?;
        let mut deltas = Vec::with_capacity(signals.len());
        for (signal, start) in signals.iter().zip(before) {
            let after = measure_mean(self.telemetry, self.clock, *signal, self.settle).await?;
            deltas.push(after - start);
        }
        actuator.move_by(-probe, speed).await?;
        Ok(deltas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Config, SimAxisConfig};
    use crate::infrastructure::simulator::SimInstrument;

    fn mirrored_config() -> Config {
        let mut config = Config::default();
        config.simulator.distance_noise = 0.0;
        config.simulator.axes = vec![
            SimAxisConfig {
                name: "mirror3".into(),
                bead: 3,
                gain: -0.8,
                offset: 10.0,
            },
            SimAxisConfig {
                name: "dead".into(),
                bead: 4,
                gain: 0.0,
                offset: 30.0,
            },
        ];
        config
    }

    #[tokio::test]
    async fn test_calibrate_measures_mirrored_gain_and_returns() {
        let sim = SimInstrument::new(&mirrored_config());
        let handles = sim.handles().await;
        let mirror = handles.actuator("mirror3").unwrap();
        let calibrator = Calibrator::new(
            handles.telemetry.as_ref(),
            handles.clock.as_ref(),
            Duration::from_millis(100),
        );
        let cal = calibrator
            .calibrate(mirror.as_ref(), Signal::BeadPosition { bead: 3 }, 1.0, 0.0)
            .await
            .unwrap();
        assert!((cal.gain + 0.8).abs() < 1e-9);
        assert!(mirror.current_position().await.unwrap().abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_unresponsive_axis_fails_calibration() {
        let sim = SimInstrument::new(&mirrored_config());
        let handles = sim.handles().await;
        let dead = handles.actuator("dead").unwrap();
        let calibrator = Calibrator::new(
            handles.telemetry.as_ref(),
            handles.clock.as_ref(),
            Duration::from_millis(100),
        );
        let err = calibrator
            .calibrate(dead.as_ref(), Signal::BeadPosition { bead: 4 }, 1.0, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::CalibrationFailure { .. }));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_identify_bead_picks_largest_response() {
        let sim = SimInstrument::new(&mirrored_config());
        let handles = sim.handles().await;
        let mirror = handles.actuator("mirror3").unwrap();
        let calibrator = Calibrator::new(
            handles.telemetry.as_ref(),
            handles.clock.as_ref(),
            Duration::from_millis(100),
        );
        let bead = calibrator
            .identify_bead(mirror.as_ref(), &[1, 2, 3, 4], 1.0, 0.0)
            .await
            .unwrap();
        assert_eq!(bead, 3);
    }
}
