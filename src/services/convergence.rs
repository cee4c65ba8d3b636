//! The convergence step and loop.
//!
//! One loop iteration is: guard check, measure, compare against tolerance,
//! issue a fixed-size step toward the target, pause for the poll interval,
//! count the attempt. The pause is the only suspension point; guards are
//! evaluated only at iteration boundaries.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::guard_check::GuardCheck;
use crate::domain::errors::{BudgetLimit, ControlError, ControlResult};
use crate::domain::models::{
    window_mean, Calibration, ConvergenceReport, ConvergenceState, GuardPredicate, LoopParams,
    MeasureMode,
};
use crate::domain::ports::{Actuator, Clock, Telemetry};

/// Actuator command for one step: `step` in the direction of the error,
/// corrected by the calibrated gain. Zero when the measurement sits exactly
/// on the target.
pub fn step_command(target: f64, measured: f64, step: f64, calibration: Calibration) -> f64 {
    let error = target - measured;
    if error == 0.0 {
        return 0.0;
    }
    calibration.correct(step * error.signum())
}

/// Servo loop binding one actuator to the telemetry and clock.
#[derive(Clone)]
pub struct ConvergenceLoop {
    actuator: Arc<dyn Actuator>,
    telemetry: Arc<dyn Telemetry>,
    clock: Arc<dyn Clock>,
    guard: GuardCheck,
}

impl ConvergenceLoop {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        telemetry: Arc<dyn Telemetry>,
        clock: Arc<dyn Clock>,
        guard: GuardCheck,
    ) -> Self {
        Self {
            actuator,
            telemetry,
            clock,
            guard,
        }
    }

    /// Drive `params.signal` to `params.target`.
    ///
    /// Guard violations and budget exhaustion end the loop in the matching
    /// terminal state with the tagged error attached to the report; use
    /// [`ConvergenceReport::into_result`] to propagate it. `Err` is returned
    /// directly only for invalid parameters and instrument errors.
    pub async fn run(
        &self,
        params: &LoopParams,
        guards: &[GuardPredicate],
    ) -> ControlResult<ConvergenceReport> {
        params.validate()?;

        let mut budget = params.budget.fresh();
        let started = self.telemetry.current_time().await?;
        let mut settle_start = started;
        let mut report = ConvergenceReport {
            procedure: params.procedure.clone(),
            signal: params.signal,
            target: params.target,
            state: ConvergenceState::Converging,
            iterations: 0,
            steps_issued: 0,
            final_measured: f64::NAN,
            history: Vec::new(),
            failure: None,
            limit: None,
        };

        debug!(
            procedure = %params.procedure,
            signal = %params.signal,
            target = params.target,
            tolerance = params.tolerance,
            max_attempts = budget.max_attempts,
            "Starting convergence loop"
        );

        while !report.state.is_terminal() {
            report.iterations += 1;
            let attempt = budget.attempts();

            if let Err(err) = self.guard.check(guards, attempt).await {
                if !err.is_recoverable() {
                    return Err(err);
                }
                report.state = report.state.advance(ConvergenceState::GuardFailed);
                report.failure = Some(err);
                break;
            }

            let measured = self.measure(params, settle_start).await?;
            report.final_measured = measured;
            report.history.push(measured);

            let error = (measured - params.target).abs();
            if error <= params.tolerance {
                report.state = report.state.advance(ConvergenceState::Converged);
                info!(
                    procedure = %params.procedure,
                    signal = %params.signal,
                    measured,
                    target = params.target,
                    iterations = report.iterations,
                    "Converged"
                );
                break;
            }

            let command = step_command(params.target, measured, params.step, params.calibration);
            self.actuator.move_by(command, params.speed).await?;
            report.steps_issued += 1;

            settle_start = self.telemetry.current_time().await?;
            self.clock.pause(params.poll_interval).await?;
            let attempts = budget.record();

            debug!(
                procedure = %params.procedure,
                iteration = report.iterations,
                measured,
                command,
                "Step issued"
            );

            let limit = if budget.is_exhausted() {
                Some(BudgetLimit::Attempts(budget.max_attempts))
            } else {
                match params.max_elapsed {
                    Some(ceiling) => {
                        let now = self.telemetry.current_time().await?;
                        (now.saturating_sub(started) > ceiling)
                            .then_some(BudgetLimit::Elapsed(ceiling))
                    }
                    None => None,
                }
            };

            if let Some(limit) = limit {
                warn!(
                    procedure = %params.procedure,
                    signal = %params.signal,
                    last = measured,
                    target = params.target,
                    attempts,
                    %limit,
                    "Convergence budget exhausted"
                );
                report.state = report.state.advance(ConvergenceState::BudgetExhausted);
                report.limit = Some(limit);
                report.failure = Some(ControlError::ConvergenceBudgetExhausted {
                    procedure: params.procedure.clone(),
                    signal: params.signal,
                    target: params.target,
                    last: measured,
                    attempts,
                    limit,
                });
            }
        }

        Ok(report)
    }

    async fn measure(&self, params: &LoopParams, settle_start: Duration) -> ControlResult<f64> {
        if params.measure == MeasureMode::WindowMean {
            let now = self.telemetry.current_time().await?;
            let samples = self.telemetry.window(params.signal, settle_start, now).await?;
            if let Some(mean) = window_mean(&samples) {
                return Ok(mean);
            }
        }
        Ok(self.telemetry.latest_value(params.signal).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{tracking_guards, Config, Signal};
    use crate::infrastructure::simulator::SimInstrument;

    #[test]
    fn test_step_command_direction_and_gain() {
        assert!((step_command(20.0, 10.0, 0.05, Calibration::IDENTITY) - 0.05).abs() < 1e-12);
        assert!((step_command(5.0, 10.0, 0.05, Calibration::IDENTITY) + 0.05).abs() < 1e-12);
        assert!((step_command(5.0, 10.0, 0.1, Calibration::new(-0.5)) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_step_command_is_zero_on_target() {
        assert_eq!(step_command(20.0, 20.0, 0.05, Calibration::IDENTITY), 0.0);
        assert_eq!(step_command(0.0, -0.0, 0.05, Calibration::IDENTITY), 0.0);
        assert_eq!(step_command(-3.5, -3.5, 0.2, Calibration::new(-2.0)), 0.0);
    }

    async fn servo(sim: &SimInstrument) -> ConvergenceLoop {
        let handles = sim.handles().await;
        let guard = GuardCheck::new(handles.telemetry.clone(), Duration::from_millis(300));
        ConvergenceLoop::new(handles.trap, handles.telemetry, handles.clock, guard)
    }

    #[tokio::test]
    async fn test_distance_loop_converges_on_simulator() {
        let sim = SimInstrument::new(&Config::default());
        sim.inspect(|s| s.load_beads(0)).await;
        let servo = servo(&sim).await;
        let params = LoopParams::new("goto_distance", Signal::Distance, 14.0)
            .with_tolerance(0.2)
            .with_step(0.1)
            .with_budget(100);
        let report = servo
            .run(&params, &tracking_guards(2, 60.0))
            .await
            .unwrap();
        assert!(report.converged());
        assert!((report.final_measured - 14.0).abs() <= 0.2);
        assert!(report.failure.is_none());
    }

    #[tokio::test]
    async fn test_invalid_params_fail_before_actuation() {
        let sim = SimInstrument::new(&Config::default());
        let servo = servo(&sim).await;
        let params = LoopParams::new("goto_distance", Signal::Distance, 14.0).with_tolerance(0.0);
        let err = servo.run(&params, &[]).await.unwrap_err();
        assert!(matches!(err, ControlError::InvalidConfiguration(_)));
        assert!(sim.commands().await.iter().all(|c| !c.is_motion()));
    }

    #[tokio::test]
    async fn test_elapsed_ceiling_reports_elapsed_limit() {
        let sim = SimInstrument::new(&Config::default());
        let servo = servo(&sim).await;
        let params = LoopParams::new("goto_force", Signal::Force, 50.0)
            .with_step(0.01)
            .with_tolerance(0.5)
            .with_budget(10_000)
            .with_poll_interval(Duration::from_millis(100))
            .with_max_elapsed(Duration::from_secs(2));
        let report = servo.run(&params, &[]).await.unwrap();
        assert_eq!(report.state, ConvergenceState::BudgetExhausted);
        assert_eq!(report.limit, Some(BudgetLimit::Elapsed(Duration::from_secs(2))));
        assert!(report.into_result().is_err());
    }
}
