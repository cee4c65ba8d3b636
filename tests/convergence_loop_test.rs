//! Convergence loop behavior against a scripted plant.

mod common;

use proptest::prelude::*;
use std::time::Duration;

use common::{servo, FakePlant};
use trapline::domain::errors::{BudgetLimit, ControlError, GuardTag};
use trapline::domain::models::{
    tracking_guards, Calibration, ConvergenceState, GuardPredicate, LoopParams, MeasureMode,
    Signal,
};
use trapline::services::step_command;

fn force_params(target: f64) -> LoopParams {
    LoopParams::new("goto_force", Signal::Force, target)
        .with_tolerance(1.0)
        .with_step(0.05)
        .with_poll_interval(Duration::from_millis(100))
        .with_budget(400)
}

#[tokio::test]
async fn test_converges_to_force_target() {
    let plant = FakePlant::linear(10.0);
    let report = servo(&plant).run(&force_params(20.0), &[]).await.unwrap();

    assert!(report.converged());
    assert!(report.iterations <= 40, "took {} iterations", report.iterations);
    assert!((19.0..=21.0).contains(&report.final_measured));
    assert!((19.0..=21.0).contains(&plant.force()));
    assert_eq!(report.steps_issued, plant.moves());
}

#[tokio::test]
async fn test_budget_exhausted_on_unreachable_target() {
    // Saturates 10 pN short of the target.
    let plant = FakePlant::new(|x: f64| (10.0 * x).min(10.0));
    let params = force_params(20.0).with_budget(15);
    let report = servo(&plant).run(&params, &[]).await.unwrap();

    assert_eq!(report.state, ConvergenceState::BudgetExhausted);
    assert_eq!(report.iterations, 16);
    assert_eq!(report.steps_issued, 16);
    assert_eq!(report.limit, Some(BudgetLimit::Attempts(15)));

    match report.into_result() {
        Err(ControlError::ConvergenceBudgetExhausted {
            procedure,
            signal,
            target,
            attempts,
            limit,
            ..
        }) => {
            assert_eq!(procedure, "goto_force");
            assert_eq!(signal, Signal::Force);
            assert!((target - 20.0).abs() < f64::EPSILON);
            assert_eq!(attempts, 16);
            assert_eq!(limit, BudgetLimit::Attempts(15));
        }
        other => panic!("expected budget exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn test_already_converged_issues_no_command() {
    let plant = FakePlant::linear(10.0);
    plant.set_position(2.0);
    let report = servo(&plant)
        .run(&force_params(20.0), &tracking_guards(2, 60.0))
        .await
        .unwrap();

    assert!(report.converged());
    assert_eq!(report.iterations, 1);
    assert_eq!(report.steps_issued, 0);
    assert_eq!(plant.moves(), 0);
    assert_eq!(plant.pauses(), 0);
}

#[tokio::test]
async fn test_error_shrinks_every_iteration() {
    let plant = FakePlant::linear(10.0);
    plant.set_position(4.0);
    let report = servo(&plant).run(&force_params(20.0), &[]).await.unwrap();

    assert!(report.converged());
    let errors: Vec<f64> = report.history.iter().map(|m| (m - 20.0).abs()).collect();
    for pair in errors.windows(2) {
        assert!(pair[1] < pair[0], "error grew: {pair:?}");
    }
}

#[tokio::test]
async fn test_guard_failure_stops_before_next_step() {
    // Tracking is lost once the fifth move lands.
    let plant = FakePlant::with_tracking(|x| 10.0 * x, |moves| if moves >= 5 { 30.0 } else { 90.0 });
    let params = force_params(20.0).with_poll_interval(Duration::from_millis(400));
    let report = servo(&plant)
        .run(&params, &tracking_guards(2, 60.0))
        .await
        .unwrap();

    assert_eq!(report.state, ConvergenceState::GuardFailed);
    assert_eq!(report.steps_issued, 5);
    assert_eq!(plant.moves(), 5);
    match report.failure {
        Some(ControlError::GuardViolation {
            tag,
            signal,
            attempt,
            ..
        }) => {
            assert_eq!(tag, GuardTag::LostTracking);
            assert_eq!(signal, Signal::MatchScore { bead: 1 });
            assert_eq!(attempt, 5);
        }
        other => panic!("expected guard violation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_short_tracking_dip_is_tolerated() {
    // A single dropped frame right after a move is covered by the settle
    // window maximum.
    let plant = FakePlant::with_tracking(|x| 10.0 * x, |moves| if moves == 3 { 30.0 } else { 90.0 });
    let params = force_params(5.0).with_poll_interval(Duration::from_millis(100));
    let report = servo(&plant)
        .run(&params, &tracking_guards(2, 60.0))
        .await
        .unwrap();

    assert!(report.converged());
}

#[tokio::test]
async fn test_tether_guard_trips_when_force_vanishes() {
    let plant = FakePlant::new(|x: f64| if x > 0.3 { 0.0 } else { 10.0 + 10.0 * x });
    let params = LoopParams::new("goto_distance", Signal::Distance, 2.0)
        .with_tolerance(0.2)
        .with_step(0.1)
        .with_poll_interval(Duration::from_millis(400))
        .with_budget(100);
    let report = servo(&plant)
        .run(&params, &[GuardPredicate::tether(5.0)])
        .await
        .unwrap();

    assert_eq!(report.state, ConvergenceState::GuardFailed);
    assert!(matches!(
        report.failure,
        Some(ControlError::GuardViolation {
            tag: GuardTag::LostTether,
            ..
        })
    ));
}

#[tokio::test]
async fn test_mirrored_axis_with_calibration() {
    let plant = FakePlant::linear(-10.0);
    let params = LoopParams::new("goto_force", Signal::Force, 20.0)
        .with_tolerance(1.0)
        .with_step(0.5)
        .with_calibration(Calibration::new(-10.0))
        .with_budget(100);
    let report = servo(&plant).run(&params, &[]).await.unwrap();

    assert!(report.converged());
    assert!(plant.position() < 0.0);
}

#[tokio::test]
async fn test_window_mean_measurement() {
    let plant = FakePlant::linear(10.0);
    let params = force_params(10.0).with_measure(MeasureMode::WindowMean);
    let report = servo(&plant).run(&params, &[]).await.unwrap();

    assert!(report.converged());
    assert!((report.final_measured - 10.0).abs() <= 1.0);
}

#[tokio::test]
async fn test_non_positive_tolerance_rejected_without_actuation() {
    let plant = FakePlant::linear(10.0);
    let params = force_params(20.0).with_tolerance(0.0);
    let err = servo(&plant).run(&params, &[]).await.unwrap_err();

    assert!(matches!(err, ControlError::InvalidConfiguration(_)));
    assert_eq!(plant.moves(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// A reachable target is met within the number of steps the initial
    /// error allows, plus the final measuring iteration.
    #[test]
    fn prop_terminates_within_step_bound(
        target in 1.0f64..60.0,
        step in 0.02f64..0.2,
        stiffness in 5.0f64..20.0,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let plant = FakePlant::linear(stiffness);
        let tolerance = stiffness * step;
        let params = LoopParams::new("goto_force", Signal::Force, target)
            .with_tolerance(tolerance)
            .with_step(step)
            .with_poll_interval(Duration::from_millis(20))
            .with_budget(10_000);

        let report = runtime.block_on(servo(&plant).run(&params, &[])).unwrap();

        let bound = (target / tolerance).ceil() as u32 + 1;
        prop_assert!(report.converged());
        prop_assert!(report.iterations <= bound, "{} > {}", report.iterations, bound);
        prop_assert!((report.final_measured - target).abs() <= tolerance);
    }
}

proptest! {
    /// Every step points from the measurement toward the target, through the
    /// sign of the calibrated gain, and never exceeds the configured size.
    #[test]
    fn prop_step_moves_toward_target(
        target in -100.0f64..100.0,
        measured in -100.0f64..100.0,
        step in 0.001f64..5.0,
        gain in prop_oneof![-5.0f64..-0.1, 0.1f64..5.0],
    ) {
        prop_assume!((target - measured).abs() > 1e-9);
        let command = step_command(target, measured, step, Calibration::new(gain));
        let measured_change = command * gain;
        prop_assert_eq!(measured_change.signum(), (target - measured).signum());
        prop_assert!((measured_change.abs() - step).abs() < 1e-9);
    }
}
