//! Fishing for a DNA tether between the trapped beads.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::measure::{measure_mean, seconds};
use super::motion::MotionService;
use crate::domain::errors::{BudgetLimit, ControlError, ControlResult};
use crate::domain::models::{AttemptBudget, Config, Signal};
use crate::domain::ports::InstrumentHandles;

/// Time spent in the DNA channel per dip.
const DIP_HOLD: Duration = Duration::from_secs(3);
/// Settle after returning to buffer.
const DIP_RETURN: Duration = Duration::from_secs(1);
/// Dwell at closest approach.
const APPROACH_DWELL: Duration = Duration::from_millis(500);

/// Oscillates the trap until the force at full extension shows a tether.
#[derive(Clone)]
pub struct TetherFisher {
    handles: InstrumentHandles,
    config: Arc<Config>,
    motion: MotionService,
}

impl TetherFisher {
    pub fn new(handles: InstrumentHandles, config: Arc<Config>, motion: MotionService) -> Self {
        Self {
            handles,
            config,
            motion,
        }
    }

    /// Fish until the mean force reaches the threshold. Returns that force.
    ///
    /// Beads are coated by dipping into the DNA channel on the first attempt
    /// and every `dip_every` attempts after that; with `dip_every = 0` the
    /// whole procedure runs inside the DNA channel.
    pub async fn fish(&self) -> ControlResult<f64> {
        let fishing = &self.config.fishing;
        let channels = &self.config.instrument;
        let home = if fishing.dip_every == 0 {
            &channels.dna_channel
        } else {
            &channels.buffer_channel
        };
        self.handles.stage.move_to(home, None).await?;
        self.handles.telemetry.reset_force().await?;

        let mut budget = AttemptBudget::new(fishing.max_attempts);
        loop {
            let force = measure_mean(
                self.handles.telemetry.as_ref(),
                self.handles.clock.as_ref(),
                Signal::Force,
                seconds(fishing.measure_s),
            )
            .await?;
            if force >= fishing.force_threshold {
                info!(force, attempts = budget.attempts(), "Tether caught");
                return Ok(force);
            }

            let attempt = budget.record();
            if budget.is_exhausted() {
                return Err(ControlError::ConvergenceBudgetExhausted {
                    procedure: "fish_tether".to_string(),
                    signal: Signal::Force,
                    target: fishing.force_threshold,
                    last: force,
                    attempts: attempt,
                    limit: BudgetLimit::Attempts(budget.max_attempts),
                });
            }

            if fishing.dip_every > 0 && (attempt - 1) % fishing.dip_every == 0 {
                debug!(attempt, "Dipping beads into DNA");
                self.motion
                    .goto_distance(self.config.tether.length, Some(fishing.speed))
                    .await?;
                self.handles
                    .stage
                    .move_to(&channels.dna_channel, None)
                    .await?;
                self.handles.clock.pause(DIP_HOLD).await?;
                self.handles
                    .stage
                    .move_to(&channels.buffer_channel, None)
                    .await?;
                self.handles.clock.pause(DIP_RETURN).await?;
            }

            debug!(attempt, force, "Fishing");
            self.motion
                .goto_distance(fishing.min_distance, Some(fishing.speed))
                .await?;
            self.handles.clock.pause(APPROACH_DWELL).await?;
            self.motion
                .goto_distance(fishing.max_distance, Some(fishing.speed))
                .await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::simulator::SimInstrument;

    #[tokio::test]
    async fn test_fishing_catches_tether() {
        let mut config = Config::default();
        config.simulator.tether_capture_probability = 1.0;
        config.simulator.multiple_tether_probability = 0.0;
        let config = Arc::new(config);
        let sim = SimInstrument::new(&config);
        sim.inspect(|s| s.load_beads(0)).await;
        let handles = sim.handles().await;
        let motion = MotionService::new(handles.clone(), config.clone());
        let fisher = TetherFisher::new(handles, config, motion);

        let force = fisher.fish().await.unwrap();
        assert!(force >= 10.0);
        assert_eq!(sim.inspect(|s| s.tether_count()).await, 1);
    }

    #[tokio::test]
    async fn test_fishing_budget_is_linear() {
        let mut config = Config::default();
        config.simulator.tether_capture_probability = 0.0;
        config.fishing.max_attempts = 3;
        let config = Arc::new(config);
        let sim = SimInstrument::new(&config);
        sim.inspect(|s| s.load_beads(0)).await;
        let handles = sim.handles().await;
        let motion = MotionService::new(handles.clone(), config.clone());
        let fisher = TetherFisher::new(handles, config, motion);

        let err = fisher.fish().await.unwrap_err();
        assert!(matches!(
            err,
            ControlError::ConvergenceBudgetExhausted { attempts: 4, .. }
        ));
    }
}
