//! Tether presence checks and single-tether verification.

use std::sync::Arc;
use tracing::{info, warn};

use super::measure::{measure_mean, seconds};
use super::motion::MotionService;
use crate::domain::errors::{BudgetLimit, ControlError, ControlResult, GuardTag};
use crate::domain::models::{Config, Signal};
use crate::domain::ports::InstrumentHandles;

#[derive(Clone)]
pub struct TetherService {
    handles: InstrumentHandles,
    config: Arc<Config>,
    motion: MotionService,
}

impl TetherService {
    pub fn new(handles: InstrumentHandles, config: Arc<Config>, motion: MotionService) -> Self {
        Self {
            handles,
            config,
            motion,
        }
    }

    async fn force(&self) -> ControlResult<f64> {
        measure_mean(
            self.handles.telemetry.as_ref(),
            self.handles.clock.as_ref(),
            Signal::Force,
            seconds(self.config.tether.measure_s),
        )
        .await
    }

    fn lost(value: f64, threshold: f64, attempt: u32) -> ControlError {
        ControlError::GuardViolation {
            tag: GuardTag::LostTether,
            signal: Signal::Force,
            value,
            threshold,
            attempt,
        }
    }

    /// Fail when the force at the current position shows no tether.
    pub async fn check_tether(&self) -> ControlResult<f64> {
        let threshold = self.config.tether.lost_threshold;
        let force = self.force().await?;
        if force < threshold {
            warn!(force, threshold, "Tether lost");
            return Err(Self::lost(force, threshold, 1));
        }
        Ok(force)
    }

    /// Make sure exactly one tether connects the beads.
    ///
    /// Near full extension a single tether carries little force; a higher
    /// reading means several tethers, which are broken by overstretching in
    /// growing increments until the force drops. A tether must still carry
    /// force at full extension afterwards.
    pub async fn verify_single_tether(&self) -> ControlResult<f64> {
        let tether = &self.config.tether;
        let length = tether.length;

        self.motion.goto_distance(0.5 * length, None).await?;
        self.handles.telemetry.reset_force().await?;
        self.motion.goto_distance(0.95 * length, None).await?;
        let mut force = self.force().await?;

        let mut stretches = 0;
        while force > tether.multiple_tether_force {
            stretches += 1;
            if stretches > tether.break_retries {
                return Err(ControlError::ConvergenceBudgetExhausted {
                    procedure: "verify_single_tether".to_string(),
                    signal: Signal::Force,
                    target: tether.multiple_tether_force,
                    last: force,
                    attempts: stretches,
                    limit: BudgetLimit::Attempts(tether.break_retries),
                });
            }
            warn!(force, stretches, "Multiple tethers, overstretching");
            let overstretch = length + f64::from(stretches) * 0.1 * length;
            self.motion.goto_distance(overstretch, None).await?;
            self.motion.goto_distance(0.95 * length, None).await?;
            force = self.force().await?;
        }

        self.motion
            .goto_distance(self.config.fishing.max_distance, None)
            .await?;
        let force = self.force().await?;
        if force <= tether.single_tether_force {
            warn!(force, "No tether left after verification");
            return Err(Self::lost(force, tether.single_tether_force, stretches + 1));
        }
        info!(force, stretches, "Single tether verified");
        Ok(force)
    }
}
