//! Programmed force sequences.
//!
//! Each force in the sequence is first located by a force search, which gives
//! the trap position that produces it. The sequence is then replayed by moving
//! between those positions at the programmed speeds, under a marker per
//! repetition.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::measure::seconds;
use super::motion::MotionService;
use super::recording::{artifact_name, RecordingService};
use crate::domain::errors::ControlResult;
use crate::domain::models::{
    Artifact, ArtifactKind, Config, ForceSequenceParams, LoopParams, MeasureMode, Signal,
};
use crate::domain::ports::InstrumentHandles;

/// Speed used to return to the safe position, in µm/s.
const RETURN_SPEED: f64 = 5.0;

#[derive(Clone)]
pub struct ForceSequenceService {
    handles: InstrumentHandles,
    config: Arc<Config>,
    motion: MotionService,
    recording: RecordingService,
}

impl ForceSequenceService {
    pub fn new(
        handles: InstrumentHandles,
        config: Arc<Config>,
        motion: MotionService,
        recording: RecordingService,
    ) -> Self {
        Self {
            handles,
            config,
            motion,
            recording,
        }
    }

    /// Trap position that produces each step's force.
    ///
    /// On failure the trap returns to the starting position before the error
    /// propagates.
    pub async fn find_positions(&self, params: &ForceSequenceParams) -> ControlResult<Vec<f64>> {
        let safe = self.handles.trap.current_position().await?;
        let max_attempts = (params.max_movement / params.search_increment).ceil() as u32;
        let poll = self.config.motion.force.poll_ms;

        let mut positions = Vec::with_capacity(params.steps.len());
        for step in &params.steps {
            let search = LoopParams::new("force_search", Signal::Force, step.force)
                .with_tolerance(params.search_tolerance)
                .with_step(params.search_increment)
                .with_speed(step.speed)
                .with_poll_interval(Duration::from_millis(poll))
                .with_measure(MeasureMode::WindowMean)
                .with_budget(max_attempts);
            let found = async {
                self.motion
                    .servo()
                    .run(&search, &self.motion.tracking_guards())
                    .await?
                    .into_result()?;
                Ok(self.handles.trap.current_position().await?)
            }
            .await;
            match found {
                Ok(position) => positions.push(position),
                Err(err) => {
                    warn!(force = step.force, error = %err, "Force search failed, returning to safe position");
                    self.handles.trap.move_to(safe, RETURN_SPEED).await?;
                    return Err(err);
                }
            }
        }
        self.handles.trap.move_to(safe, RETURN_SPEED).await?;
        info!(?positions, "Force sequence positions found");
        Ok(positions)
    }

    /// Locate the forces and replay the sequence into `artifacts`, then
    /// optionally replay it again after incubating in a second channel.
    pub async fn run(
        &self,
        params: &ForceSequenceParams,
        trial: u32,
        artifacts: &mut Vec<Artifact>,
    ) -> ControlResult<()> {
        let positions = self.find_positions(params).await?;
        let base = artifact_name(&self.config.recording.experiment_name, trial, 1);
        self.replay(params, &positions, &base, artifacts).await?;

        if let Some(repeat) = &params.repeat_in {
            self.handles.stage.move_to(&repeat.waypoint, None).await?;
            self.handles
                .clock
                .pause(seconds(repeat.incubation_s))
                .await?;
            let base = format!("{base}_{}", repeat.waypoint);
            self.replay(params, &positions, &base, artifacts).await?;
        }
        Ok(())
    }

    async fn replay(
        &self,
        params: &ForceSequenceParams,
        positions: &[f64],
        base: &str,
        artifacts: &mut Vec<Artifact>,
    ) -> ControlResult<()> {
        let safe = self.handles.trap.current_position().await?;
        for repetition in 1..=params.repetitions {
            let label = format!("{base}_rep{repetition}");
            self.handles.recorder.mark_begin(&label).await?;
            let played = self.play_once(params, positions).await;
            let finished = self
                .recording
                .finish_marker(&label, ArtifactKind::ForceSequence)
                .await;
            if let Ok(artifact) = &finished {
                artifacts.push(artifact.clone());
            }
            played?;
            finished?;
            self.handles.trap.move_to(safe, RETURN_SPEED).await?;
        }
        Ok(())
    }

    async fn play_once(&self, params: &ForceSequenceParams, positions: &[f64]) -> ControlResult<()> {
        for (step, position) in params.steps.iter().zip(positions) {
            self.handles.trap.move_to(*position, step.speed).await?;
            self.handles.clock.pause(seconds(step.hold_s)).await?;
        }
        Ok(())
    }
}
