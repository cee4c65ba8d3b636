//! Workflow orchestrator
//!
//! Runs protocols trial by trial. A trial executes the protocol steps in
//! order; a recoverable failure (guard violation or exhausted budget) ends the
//! trial with a tagged [`WorkflowResult::Failed`], a fatal error ends the run.
//! Cleanup runs on every exit path and is safe to repeat.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::{
    Artifact, Config, FailurePolicy, FailureReason, Protocol, ProtocolStep, RunSummary,
    WorkflowResult,
};
use crate::domain::ports::InstrumentHandles;
use crate::infrastructure::config::ConfigLoader;
use crate::services::measure::seconds;
use crate::services::{
    BeadCatcher, FlowController, ForceSequenceService, MotionService, PositioningService,
    RecordingService, TetherFisher, TetherService,
};

/// Progress notifications emitted while a run is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialEvent {
    Started { trial: u32, max_trials: u32 },
    StepStarted { trial: u32, step: usize, name: &'static str },
    Finished(WorkflowResult),
}

/// Sequences protocol steps into trials and trials into a run.
pub struct WorkflowOrchestrator {
    handles: InstrumentHandles,
    config: Arc<Config>,
    motion: MotionService,
    flow: FlowController,
    catcher: BeadCatcher,
    fisher: TetherFisher,
    tether: TetherService,
    recording: RecordingService,
    sequence: ForceSequenceService,
    positioning: PositioningService,
    events: Option<mpsc::UnboundedSender<TrialEvent>>,
}

impl WorkflowOrchestrator {
    /// Validate `config` and bind the procedures to the instrument.
    ///
    /// Nothing is actuated here; an invalid configuration fails before any
    /// command reaches the instrument.
    pub fn new(handles: InstrumentHandles, config: Config) -> ControlResult<Self> {
        ConfigLoader::validate(&config)?;
        let config = Arc::new(config);

        let motion = MotionService::new(handles.clone(), config.clone());
        let flow = FlowController::new(handles.clone(), config.clone());
        let catcher = BeadCatcher::new(handles.clone(), config.clone());
        let fisher = TetherFisher::new(handles.clone(), config.clone(), motion.clone());
        let tether = TetherService::new(handles.clone(), config.clone(), motion.clone());
        let recording = RecordingService::new(
            handles.clone(),
            config.clone(),
            motion.clone(),
            tether.clone(),
        );
        let sequence = ForceSequenceService::new(
            handles.clone(),
            config.clone(),
            motion.clone(),
            recording.clone(),
        );
        let positioning = PositioningService::new(handles.clone(), config.clone(), motion.clone());

        Ok(Self {
            handles,
            config,
            motion,
            flow,
            catcher,
            fisher,
            tether,
            recording,
            sequence,
            positioning,
            events: None,
        })
    }

    /// Send progress events to `sender`.
    pub fn with_events(mut self, sender: mpsc::UnboundedSender<TrialEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn emit(&self, event: TrialEvent) {
        if let Some(sender) = &self.events {
            // A closed receiver only means nobody is watching.
            let _ = sender.send(event);
        }
    }

    /// Run trials until the trial budget, the failure policy or the required
    /// number of successes ends the run.
    pub async fn run(&self, protocol: &Protocol) -> ControlResult<RunSummary> {
        self.preflight(protocol)?;
        let run = &self.config.run;
        let mut summary = RunSummary::new(&protocol.name);

        info!(
            run_id = %summary.run_id,
            protocol = %protocol.name,
            max_trials = run.max_trials,
            policy = ?run.on_failure,
            "Starting run"
        );

        for trial in 1..=run.max_trials {
            let result = self.run_trial(trial, protocol).await?;
            let failed = !result.is_success();
            summary.trials.push(result);

            if run
                .required_successes
                .is_some_and(|required| summary.successes() >= required as usize)
            {
                info!(successes = summary.successes(), "Required successes reached");
                break;
            }
            if failed && run.on_failure == FailurePolicy::Abort {
                warn!(trial, "Trial failed, aborting run");
                break;
            }
        }

        summary.finished_at = chrono::Utc::now();
        info!(
            run_id = %summary.run_id,
            trials = summary.trials.len(),
            successes = summary.successes(),
            failures = summary.failures(),
            "Run finished"
        );
        Ok(summary)
    }

    /// Run one trial of `protocol`.
    ///
    /// Recoverable failures are returned as `Ok(WorkflowResult::Failed)`;
    /// fatal errors as `Err`. The instrument is returned to its safe baseline
    /// either way.
    pub async fn run_trial(&self, trial: u32, protocol: &Protocol) -> ControlResult<WorkflowResult> {
        self.preflight(protocol)?;
        let span = info_span!("trial", trial, protocol = %protocol.name);
        async move {
            self.emit(TrialEvent::Started {
                trial,
                max_trials: self.config.run.max_trials,
            });
            info!("Trial started");

            let mut artifacts = Vec::new();
            let outcome = self.execute(trial, protocol, &mut artifacts).await;
            let cleanup = self.cleanup().await;

            let result = match outcome {
                Ok(()) => {
                    cleanup?;
                    info!(artifacts = artifacts.len(), "Trial succeeded");
                    WorkflowResult::Success { trial, artifacts }
                }
                Err((stage, err)) => match FailureReason::from_error(&err) {
                    Some(reason) => {
                        cleanup?;
                        warn!(
                            %stage,
                            %reason,
                            error = %err,
                            artifacts = artifacts.len(),
                            "Trial failed"
                        );
                        self.release_beads().await?;
                        WorkflowResult::Failed {
                            trial,
                            reason,
                            stage,
                            message: err.to_string(),
                            attempt: err.attempt(),
                            artifacts,
                        }
                    }
                    None => {
                        if let Err(cleanup_err) = cleanup {
                            error!(error = %cleanup_err, "Cleanup failed after fatal error");
                        }
                        error!(%stage, error = %err, "Fatal error, stopping");
                        return Err(err);
                    }
                },
            };
            self.emit(TrialEvent::Finished(result.clone()));
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Reject a protocol that cannot run on this instrument, before any
    /// command is issued.
    fn preflight(&self, protocol: &Protocol) -> ControlResult<()> {
        protocol.validate()?;
        for (index, step) in protocol.steps.iter().enumerate() {
            if let ProtocolStep::PositionTraps { targets } = step {
                self.positioning.check_targets(targets).map_err(|err| match err {
                    ControlError::InvalidConfiguration(msg) => ControlError::InvalidConfiguration(
                        format!("protocol '{}' step {}: {msg}", protocol.name, index + 1),
                    ),
                    other => other,
                })?;
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        trial: u32,
        protocol: &Protocol,
        artifacts: &mut Vec<Artifact>,
    ) -> Result<(), (String, ControlError)> {
        for (index, step) in protocol.steps.iter().enumerate() {
            let name = step.name();
            self.emit(TrialEvent::StepStarted {
                trial,
                step: index + 1,
                name,
            });
            debug!(step = index + 1, name, "Running step");
            self.run_step(step, trial, artifacts)
                .await
                .map_err(|err| (name.to_string(), err))?;
        }
        Ok(())
    }

    async fn run_step(
        &self,
        step: &ProtocolStep,
        trial: u32,
        artifacts: &mut Vec<Artifact>,
    ) -> ControlResult<()> {
        match step {
            ProtocolStep::CatchBeads => self.catcher.catch_beads().await,
            ProtocolStep::FishTether => self.fisher.fish().await.map(drop),
            ProtocolStep::StartFlow { pressure } => self.flow.start_flow(*pressure).await,
            ProtocolStep::StopFlow => self.flow.stop_flow().await,
            ProtocolStep::VerifySingleTether => {
                self.tether.verify_single_tether().await.map(drop)
            }
            ProtocolStep::GotoDistance { target, speed } => self
                .motion
                .goto_distance(target.resolve(self.config.tether.length), *speed)
                .await
                .map(drop),
            ProtocolStep::GotoForce { target } => self.motion.goto_force(*target).await.map(drop),
            ProtocolStep::ResetForce => Ok(self.handles.telemetry.reset_force().await?),
            ProtocolStep::MoveStage { waypoint, speed } => {
                Ok(self.handles.stage.move_to(waypoint, *speed).await?)
            }
            ProtocolStep::Pause { seconds: secs } => {
                Ok(self.handles.clock.pause(seconds(*secs)).await?)
            }
            ProtocolStep::CheckTether => self.tether.check_tether().await.map(drop),
            ProtocolStep::RecordFdCurve(params) => {
                self.recording.fd_curve(params, trial, artifacts).await
            }
            ProtocolStep::RecordKymograph(params) => {
                self.recording.kymograph(params, trial, artifacts).await
            }
            ProtocolStep::ForceSequence(params) => {
                self.sequence.run(params, trial, artifacts).await
            }
            ProtocolStep::PositionTraps { targets } => {
                self.positioning.position(targets).await.map(drop)
            }
        }
    }

    /// Return the instrument to its safe baseline: scan stopped, flow
    /// channels closed, pressure vented. Repeating it has no further effect.
    pub async fn cleanup(&self) -> ControlResult<()> {
        self.handles.recorder.abort_scan().await?;
        self.flow.stop_flow().await?;
        self.flow.vent().await?;
        debug!("Instrument at safe baseline");
        Ok(())
    }

    /// Empty the traps so the next trial starts from fresh beads.
    async fn release_beads(&self) -> ControlResult<()> {
        let traps: Vec<u8> = (1..=self.config.instrument.beads).collect();
        self.handles.shutters.clear(&traps).await?;
        Ok(())
    }
}
