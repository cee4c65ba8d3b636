//! Multi-trap positioning through calibrated auxiliary axes.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::calibration::{Calibrator, DEFAULT_PROBE};
use super::convergence::ConvergenceLoop;
use super::guard_check::GuardCheck;
use super::motion::MotionService;
use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::{AxisTarget, Config, ConvergenceReport, Signal};
use crate::domain::ports::InstrumentHandles;

/// Settle after a calibration probe.
const PROBE_SETTLE: Duration = Duration::from_millis(200);

#[derive(Clone)]
pub struct PositioningService {
    handles: InstrumentHandles,
    config: Arc<Config>,
    motion: MotionService,
}

impl PositioningService {
    pub fn new(handles: InstrumentHandles, config: Arc<Config>, motion: MotionService) -> Self {
        Self {
            handles,
            config,
            motion,
        }
    }

    /// Resolve every target against the instrument without moving anything:
    /// the actuator must exist and an explicit bead must be tracked.
    pub fn check_targets(&self, targets: &[AxisTarget]) -> ControlResult<()> {
        let beads = self.config.instrument.beads;
        for target in targets {
            if self.handles.actuator(&target.actuator).is_none() {
                return Err(ControlError::invalid(format!(
                    "unknown actuator '{}'",
                    target.actuator
                )));
            }
            if let Some(bead) = target.bead {
                if !(1..=beads).contains(&bead) {
                    return Err(ControlError::invalid(format!(
                        "actuator '{}': bead {bead} outside 1..={beads}",
                        target.actuator
                    )));
                }
            }
        }
        Ok(())
    }

    /// Bring each target's bead to its position, one axis at a time.
    ///
    /// Axes are calibrated before use: the measured gain sets both the step
    /// direction and its size, so mirrored or scaled axes converge without
    /// per-axis tuning.
    pub async fn position(&self, targets: &[AxisTarget]) -> ControlResult<Vec<ConvergenceReport>> {
        let tuning = &self.config.motion.distance;
        let calibrator = Calibrator::new(
            self.handles.telemetry.as_ref(),
            self.handles.clock.as_ref(),
            PROBE_SETTLE,
        );
        self.check_targets(targets)?;
        let candidates: Vec<u8> = (1..=self.config.instrument.beads).collect();

        let mut reports = Vec::with_capacity(targets.len());
        for target in targets {
            let actuator = self.handles.actuator(&target.actuator).ok_or_else(|| {
                ControlError::invalid(format!("unknown actuator '{}'", target.actuator))
            })?;
            let bead = match target.bead {
                Some(bead) => bead,
                None => {
                    calibrator
                        .identify_bead(actuator.as_ref(), &candidates, DEFAULT_PROBE, tuning.speed)
                        .await?
                }
            };
            let signal = Signal::BeadPosition { bead };
            let calibration = calibrator
                .calibrate(actuator.as_ref(), signal, DEFAULT_PROBE, tuning.speed)
                .await?;

            let servo = ConvergenceLoop::new(
                actuator,
                self.handles.telemetry.clone(),
                self.handles.clock.clone(),
                GuardCheck::new(
                    self.handles.telemetry.clone(),
                    self.config.guards.settle_window(),
                ),
            );
            let params = tuning
                .params(&format!("position_{}", target.actuator), signal, target.position)
                .with_calibration(calibration);
            let report = servo
                .run(&params, &self.motion.tracking_guards())
                .await?
                .into_result()?;
            info!(
                actuator = %target.actuator,
                bead,
                position = report.final_measured,
                "Axis positioned"
            );
            reports.push(report);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SimAxisConfig;
    use crate::infrastructure::simulator::SimInstrument;

    fn four_trap_config() -> Config {
        let mut config = Config::default();
        config.instrument.beads = 4;
        config.simulator.axes = vec![
            SimAxisConfig {
                name: "mirror3".into(),
                bead: 3,
                gain: -0.8,
                offset: 30.0,
            },
            SimAxisConfig {
                name: "mirror4".into(),
                bead: 4,
                gain: 1.5,
                offset: 40.0,
            },
        ];
        config
    }

    async fn service(config: Config) -> (SimInstrument, PositioningService) {
        let config = Arc::new(config);
        let sim = SimInstrument::new(&config);
        sim.inspect(|s| s.load_beads(0)).await;
        let handles = sim.handles().await;
        let motion = MotionService::new(handles.clone(), config.clone());
        (sim, PositioningService::new(handles, config, motion))
    }

    #[tokio::test]
    async fn test_positions_mirrored_and_scaled_axes() {
        let (_sim, positioning) = service(four_trap_config()).await;
        let reports = positioning
            .position(&[
                AxisTarget {
                    actuator: "mirror3".into(),
                    bead: None,
                    position: 27.0,
                },
                AxisTarget {
                    actuator: "mirror4".into(),
                    bead: Some(4),
                    position: 43.0,
                },
            ])
            .await
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert!((reports[0].final_measured - 27.0).abs() <= 0.2);
        assert_eq!(reports[0].signal, Signal::BeadPosition { bead: 3 });
        assert!((reports[1].final_measured - 43.0).abs() <= 0.2);
    }

    #[tokio::test]
    async fn test_unknown_actuator_is_invalid() {
        let (sim, positioning) = service(four_trap_config()).await;
        let err = positioning
            .position(&[AxisTarget {
                actuator: "mirror9".into(),
                bead: None,
                position: 1.0,
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidConfiguration(_)));
        assert!(sim.commands().await.iter().all(|c| !c.is_motion()));
    }

    #[tokio::test]
    async fn test_untracked_bead_rejected_before_motion() {
        let (sim, positioning) = service(four_trap_config()).await;
        let targets = [
            AxisTarget {
                actuator: "mirror3".into(),
                bead: Some(3),
                position: 27.0,
            },
            AxisTarget {
                actuator: "mirror4".into(),
                bead: Some(7),
                position: 43.0,
            },
        ];
        let err = positioning.check_targets(&targets).unwrap_err();
        assert!(err.to_string().contains("bead 7 outside 1..=4"));

        let err = positioning.position(&targets).await.unwrap_err();
        assert!(matches!(err, ControlError::InvalidConfiguration(_)));
        assert!(sim.commands().await.iter().all(|c| !c.is_motion()));
    }
}
