//! Guard evaluation at loop iteration boundaries.

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::{window_max, GuardPredicate, Signal};
use crate::domain::ports::Telemetry;

/// Evaluates guard predicates against telemetry.
///
/// Each guard reads the maximum of its signal over the trailing settle window,
/// so a dip shorter than the window (tracking flicker while a bead moves) does
/// not trip the guard. The check never waits; it only looks back.
#[derive(Clone)]
pub struct GuardCheck {
    telemetry: Arc<dyn Telemetry>,
    settle_window: Duration,
}

impl GuardCheck {
    pub fn new(telemetry: Arc<dyn Telemetry>, settle_window: Duration) -> Self {
        Self {
            telemetry,
            settle_window,
        }
    }

    /// Fail with the first violated guard, in the order given.
    pub async fn check(&self, guards: &[GuardPredicate], attempt: u32) -> ControlResult<()> {
        for guard in guards {
            let value = self.reading(guard.signal).await?;
            if !guard.holds(value) {
                warn!(
                    tag = %guard.tag,
                    signal = %guard.signal,
                    value,
                    threshold = guard.min,
                    attempt,
                    "Guard violated"
                );
                return Err(ControlError::GuardViolation {
                    tag: guard.tag,
                    signal: guard.signal,
                    value,
                    threshold: guard.min,
                    attempt,
                });
            }
        }
        Ok(())
    }

    async fn reading(&self, signal: Signal) -> ControlResult<f64> {
        let now = self.telemetry.current_time().await?;
        let since = now.saturating_sub(self.settle_window);
        let samples = self.telemetry.window(signal, since, now).await?;
        match window_max(&samples) {
            Some(value) => Ok(value),
            None => Ok(self.telemetry.latest_value(signal).await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::GuardTag;
    use crate::domain::models::{tracking_guards, Config};
    use crate::infrastructure::simulator::SimInstrument;

    async fn loaded_sim() -> SimInstrument {
        let sim = SimInstrument::new(&Config::default());
        sim.inspect(|s| s.load_beads(1)).await;
        sim
    }

    #[tokio::test]
    async fn test_guards_pass_with_beads_held() {
        let sim = loaded_sim().await;
        let handles = sim.handles().await;
        let check = GuardCheck::new(handles.telemetry.clone(), Duration::from_millis(300));
        check.check(&tracking_guards(2, 60.0), 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_lost_bead_reports_signal_and_attempt() {
        let sim = loaded_sim().await;
        let handles = sim.handles().await;
        handles.clock.pause(Duration::from_millis(500)).await.unwrap();
        sim.inspect(|s| s.release_trap(2)).await;
        handles.clock.pause(Duration::from_millis(500)).await.unwrap();

        let check = GuardCheck::new(handles.telemetry.clone(), Duration::from_millis(300));
        let err = check.check(&tracking_guards(2, 60.0), 4).await.unwrap_err();
        match err {
            ControlError::GuardViolation {
                tag,
                signal,
                attempt,
                threshold,
                ..
            } => {
                assert_eq!(tag, GuardTag::LostTracking);
                assert_eq!(signal, Signal::MatchScore { bead: 2 });
                assert_eq!(attempt, 4);
                assert!((threshold - 60.0).abs() < f64::EPSILON);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dip_inside_settle_window_is_tolerated() {
        let sim = loaded_sim().await;
        let handles = sim.handles().await;
        handles.clock.pause(Duration::from_millis(500)).await.unwrap();
        sim.inspect(|s| s.release_trap(2)).await;
        handles.clock.pause(Duration::from_millis(100)).await.unwrap();

        let check = GuardCheck::new(handles.telemetry.clone(), Duration::from_millis(300));
        check.check(&tracking_guards(2, 60.0), 1).await.unwrap();
    }
}
