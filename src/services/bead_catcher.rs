//! Bead catching in the bead channel.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::flow::FlowController;
use super::measure::seconds;
use crate::domain::errors::{BudgetLimit, ControlError, ControlResult};
use crate::domain::models::{AttemptBudget, Config, Signal};
use crate::domain::ports::InstrumentHandles;

/// Catches one good bead per trap, starting from empty traps.
///
/// Beads with a poor template match are dropped as soon as they are seen.
/// When no good pair has formed within the clear interval both traps are
/// emptied and catching starts over; each such cycle costs one attempt.
#[derive(Clone)]
pub struct BeadCatcher {
    handles: InstrumentHandles,
    config: Arc<Config>,
    flow: FlowController,
}

impl BeadCatcher {
    pub fn new(handles: InstrumentHandles, config: Arc<Config>) -> Self {
        let flow = FlowController::new(handles.clone(), config.clone());
        Self {
            handles,
            config,
            flow,
        }
    }

    pub async fn catch_beads(&self) -> ControlResult<()> {
        let catching = &self.config.catching;
        let threshold = self.config.guards.match_threshold;
        let traps: Vec<u8> = (1..=self.config.instrument.beads).collect();

        self.flow.start_flow(catching.pressure).await?;
        self.handles
            .stage
            .move_to(&self.config.instrument.bead_channel, None)
            .await?;
        self.handles.shutters.clear(&traps).await?;

        let poll = Duration::from_millis(catching.poll_ms);
        let clear_interval = seconds(catching.clear_interval_s);
        let mut cycles = AttemptBudget::new(catching.max_cycles);
        let mut cycle_start = self.handles.telemetry.current_time().await?;

        loop {
            self.handles.clock.pause(poll).await?;

            let mut scores = Vec::with_capacity(traps.len());
            for trap in &traps {
                let score = self
                    .handles
                    .telemetry
                    .latest_value(Signal::MatchScore { bead: *trap })
                    .await?;
                scores.push((*trap, score));
            }

            let poor: Vec<u8> = scores
                .iter()
                .filter(|(_, score)| *score > 0.0 && *score < threshold)
                .map(|(trap, _)| *trap)
                .collect();
            if !poor.is_empty() {
                debug!(?poor, "Dropping poorly matching beads");
                self.handles.shutters.clear(&poor).await?;
            }

            if scores.iter().all(|(_, score)| *score >= threshold) {
                info!(cycles = cycles.attempts(), "Beads caught");
                return Ok(());
            }

            let now = self.handles.telemetry.current_time().await?;
            if now.saturating_sub(cycle_start) >= clear_interval {
                let attempts = cycles.record();
                if cycles.is_exhausted() {
                    let (bead, last) = scores
                        .iter()
                        .copied()
                        .min_by(|a, b| a.1.total_cmp(&b.1))
                        .unwrap_or((1, 0.0));
                    return Err(ControlError::ConvergenceBudgetExhausted {
                        procedure: "catch_beads".to_string(),
                        signal: Signal::MatchScore { bead },
                        target: threshold,
                        last,
                        attempts,
                        limit: BudgetLimit::Attempts(cycles.max_attempts),
                    });
                }
                debug!(cycle = attempts, "No pair caught, clearing traps");
                self.handles.shutters.clear(&traps).await?;
                cycle_start = now;
            }
        }
    }
}
