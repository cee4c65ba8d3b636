//! Guarded trap moves to a distance or force setpoint.

use std::sync::Arc;
use tracing::info;

use super::convergence::ConvergenceLoop;
use super::guard_check::GuardCheck;
use super::measure::{measure_mean, seconds};
use crate::domain::errors::{ControlError, ControlResult, GuardTag};
use crate::domain::models::{
    tracking_guards, Config, ConvergenceReport, GuardPredicate, Signal,
};
use crate::domain::ports::InstrumentHandles;

/// Distance and force servos on the steerable trap, guarded by bead tracking.
#[derive(Clone)]
pub struct MotionService {
    handles: InstrumentHandles,
    config: Arc<Config>,
    servo: ConvergenceLoop,
}

impl MotionService {
    pub fn new(handles: InstrumentHandles, config: Arc<Config>) -> Self {
        let guard = GuardCheck::new(handles.telemetry.clone(), config.guards.settle_window());
        let servo = ConvergenceLoop::new(
            handles.trap.clone(),
            handles.telemetry.clone(),
            handles.clock.clone(),
            guard,
        );
        Self {
            handles,
            config,
            servo,
        }
    }

    /// Tracking guards for every configured bead.
    pub fn tracking_guards(&self) -> Vec<GuardPredicate> {
        tracking_guards(
            self.config.instrument.beads,
            self.config.guards.match_threshold,
        )
    }

    pub fn servo(&self) -> &ConvergenceLoop {
        &self.servo
    }

    /// Move the trap until the bead distance is within tolerance of `target`.
    pub async fn goto_distance(
        &self,
        target: f64,
        speed: Option<f64>,
    ) -> ControlResult<ConvergenceReport> {
        let mut params = self
            .config
            .motion
            .distance
            .params("goto_distance", Signal::Distance, target);
        if let Some(speed) = speed {
            params = params.with_speed(speed);
        }
        self.servo
            .run(&params, &self.tracking_guards())
            .await?
            .into_result()
    }

    /// Move the trap until the force is within tolerance of `target`, then
    /// confirm the tether survived the move.
    pub async fn goto_force(&self, target: f64) -> ControlResult<ConvergenceReport> {
        let params = self
            .config
            .motion
            .force
            .params("goto_force", Signal::Force, target);
        let report = self
            .servo
            .run(&params, &self.tracking_guards())
            .await?
            .into_result()?;

        let threshold = self.config.tether.lost_threshold;
        if target >= threshold {
            let force = measure_mean(
                self.handles.telemetry.as_ref(),
                self.handles.clock.as_ref(),
                Signal::Force,
                seconds(self.config.tether.measure_s),
            )
            .await?;
            if force < threshold {
                return Err(ControlError::GuardViolation {
                    tag: GuardTag::LostTether,
                    signal: Signal::Force,
                    value: force,
                    threshold,
                    attempt: report.iterations,
                });
            }
        }
        info!(target, iterations = report.iterations, "Force setpoint reached");
        Ok(report)
    }
}
