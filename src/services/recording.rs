//! Marker-bracketed recordings: F,d curves and kymographs.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::measure::seconds;
use super::motion::MotionService;
use super::tether_check::TetherService;
use crate::domain::errors::ControlResult;
use crate::domain::models::{
    Artifact, ArtifactKind, Config, FdCurveParams, KymographParams,
};
use crate::domain::ports::InstrumentHandles;

/// Settle before and after a pulling curve.
const CURVE_SETTLE: Duration = Duration::from_secs(1);

/// Marker label for one recording.
pub fn artifact_name(experiment: &str, trial: u32, replicate: u32) -> String {
    format!("{experiment}_trial={trial:04}_replicate={replicate:04}")
}

#[derive(Clone)]
pub struct RecordingService {
    handles: InstrumentHandles,
    config: Arc<Config>,
    motion: MotionService,
    tether: TetherService,
}

impl RecordingService {
    pub fn new(
        handles: InstrumentHandles,
        config: Arc<Config>,
        motion: MotionService,
        tether: TetherService,
    ) -> Self {
        Self {
            handles,
            config,
            motion,
            tether,
        }
    }

    /// Close the open marker and export it under `label`.
    pub(crate) async fn finish_marker(
        &self,
        label: &str,
        kind: ArtifactKind,
    ) -> ControlResult<Artifact> {
        let export = self.config.recording.export_path(label);
        let path = self.handles.recorder.mark_end(export.as_deref()).await?;
        Ok(Artifact {
            label: label.to_string(),
            kind,
            path,
        })
    }

    /// Record `replicates` constant-speed pulling curves into `artifacts`.
    ///
    /// The marker is closed on every exit path. The tether must survive each
    /// curve; a lost tether ends the recording with the curves taken so far
    /// already in `artifacts`.
    pub async fn fd_curve(
        &self,
        params: &FdCurveParams,
        trial: u32,
        artifacts: &mut Vec<Artifact>,
    ) -> ControlResult<()> {
        for replicate in 1..=params.replicates {
            self.motion.goto_distance(params.min_distance, None).await?;
            self.handles.telemetry.reset_force().await?;
            self.handles.clock.pause(CURVE_SETTLE).await?;

            let label = artifact_name(&self.config.recording.experiment_name, trial, replicate);
            self.handles.recorder.mark_begin(&label).await?;
            let pulled = self.pull(params).await;
            let finished = self.finish_marker(&label, ArtifactKind::FdCurve).await;
            if let Ok(artifact) = &finished {
                info!(label = %artifact.label, replicate, "F,d curve recorded");
                artifacts.push(artifact.clone());
            }
            pulled?;
            finished?;

            if let Err(err) = self.tether.check_tether().await {
                warn!(replicate, error = %err, "Tether did not survive the curve");
                return Err(err);
            }
        }
        Ok(())
    }

    async fn pull(&self, params: &FdCurveParams) -> ControlResult<()> {
        self.handles
            .trap
            .move_by(params.max_distance - params.min_distance, params.speed)
            .await?;
        self.handles.clock.pause(CURVE_SETTLE).await?;
        Ok(())
    }

    /// Record a confocal kymograph while stepping through a force ladder.
    ///
    /// The scan is aborted and the marker closed on every exit path; an
    /// exported marker lands in `artifacts` even when the ladder failed.
    pub async fn kymograph(
        &self,
        params: &KymographParams,
        trial: u32,
        artifacts: &mut Vec<Artifact>,
    ) -> ControlResult<()> {
        self.motion.goto_force(params.high_force).await?;

        let label = artifact_name(&self.config.recording.experiment_name, trial, 1);
        self.handles.recorder.mark_begin(&label).await?;
        let scanned = self.scan_ladder(&label, params).await;
        let aborted = self.handles.recorder.abort_scan().await;
        let finished = self.finish_marker(&label, ArtifactKind::Kymograph).await;
        if let Ok(artifact) = &finished {
            artifacts.push(artifact.clone());
        }

        scanned?;
        aborted?;
        let artifact = finished?;
        info!(label = %artifact.label, "Kymograph recorded");
        Ok(())
    }

    async fn scan_ladder(&self, label: &str, params: &KymographParams) -> ControlResult<()> {
        self.handles.recorder.start_scan(label).await?;
        self.handles
            .clock
            .pause(seconds(params.initial_hold_s))
            .await?;
        for offset in &params.ladder {
            self.motion.goto_force(params.low_force + offset).await?;
            self.handles.clock.pause(seconds(params.rung_hold_s)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{ControlError, GuardTag, InstrumentError};
    use crate::domain::ports::Actuator;
    use crate::infrastructure::simulator::{SimCommand, SimInstrument};
    use async_trait::async_trait;

    fn setup(config: Config) -> (Arc<Config>, SimInstrument) {
        let config = Arc::new(config);
        let sim = SimInstrument::new(&config);
        (config, sim)
    }

    async fn service(sim: &SimInstrument, config: Arc<Config>) -> RecordingService {
        let handles = sim.handles().await;
        let motion = MotionService::new(handles.clone(), config.clone());
        let tether = TetherService::new(handles.clone(), config.clone(), motion.clone());
        RecordingService::new(handles, config, motion, tether)
    }

    #[test]
    fn test_artifact_name_format() {
        assert_eq!(artifact_name("exp", 3, 12), "exp_trial=0003_replicate=0012");
    }

    #[tokio::test]
    async fn test_fd_curves_exported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.simulator.rupture_force = (150.0, 160.0);
        config.recording.export_dir = Some(dir.path().to_path_buf());
        let (config, sim) = setup(config);
        sim.inspect(|s| s.load_beads(1)).await;
        let recording = service(&sim, config).await;

        let params = FdCurveParams {
            min_distance: 12.5,
            max_distance: 18.0,
            speed: 2.0,
            replicates: 3,
        };
        let mut artifacts = Vec::new();
        recording.fd_curve(&params, 1, &mut artifacts).await.unwrap();
        assert_eq!(artifacts.len(), 3);
        for (i, artifact) in artifacts.iter().enumerate() {
            let expected = dir
                .path()
                .join(format!("exp_trial=0001_replicate={:04}.h5", i + 1));
            assert_eq!(artifact.path.as_deref(), Some(expected.as_path()));
            assert!(expected.exists());
        }
    }

    #[tokio::test]
    async fn test_fd_curves_fail_when_tether_breaks() {
        let mut config = Config::default();
        config.simulator.rupture_force = (30.0, 31.0);
        let (config, sim) = setup(config);
        sim.inspect(|s| s.load_beads(1)).await;
        let recording = service(&sim, config).await;

        let params = FdCurveParams {
            min_distance: 12.5,
            max_distance: 20.0,
            speed: 2.0,
            replicates: 5,
        };
        let mut artifacts = Vec::new();
        let err = recording
            .fd_curve(&params, 2, &mut artifacts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::GuardViolation {
                tag: GuardTag::LostTether,
                ..
            }
        ));
        assert!(err.is_recoverable());
        // The curve that broke the tether was still recorded.
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].label, "exp_trial=0002_replicate=0001");
    }

    /// Trap with a travel limit: relative moves longer than 1 µm are refused.
    struct ShortTravelTrap(Arc<dyn Actuator>);

    #[async_trait]
    impl Actuator for ShortTravelTrap {
        fn name(&self) -> &str {
            self.0.name()
        }

        async fn move_by(&self, delta: f64, speed: f64) -> Result<(), InstrumentError> {
            if delta.abs() > 1.0 {
                return Err(InstrumentError::rejected(self.name(), "travel limit"));
            }
            self.0.move_by(delta, speed).await
        }

        async fn move_to(&self, position: f64, speed: f64) -> Result<(), InstrumentError> {
            self.0.move_to(position, speed).await
        }

        async fn current_position(&self) -> Result<f64, InstrumentError> {
            self.0.current_position().await
        }
    }

    #[tokio::test]
    async fn test_fd_curve_closes_marker_when_pull_is_rejected() {
        let mut config = Config::default();
        config.simulator.rupture_force = (150.0, 160.0);
        let (config, sim) = setup(config);
        sim.inspect(|s| s.load_beads(1)).await;

        let mut handles = sim.handles().await;
        handles.trap = Arc::new(ShortTravelTrap(handles.trap.clone()));
        let motion = MotionService::new(handles.clone(), config.clone());
        let tether = TetherService::new(handles.clone(), config.clone(), motion.clone());
        let recording = RecordingService::new(handles, config, motion, tether);

        let params = FdCurveParams {
            min_distance: 12.5,
            max_distance: 18.0,
            speed: 2.0,
            replicates: 2,
        };
        let mut artifacts = Vec::new();
        let err = recording
            .fd_curve(&params, 1, &mut artifacts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::Instrument(InstrumentError::Rejected { .. })
        ));

        let commands = sim.commands().await;
        let begin = commands
            .iter()
            .position(|c| matches!(c, SimCommand::MarkBegin(_)))
            .expect("marker opened");
        assert!(matches!(commands.last(), Some(SimCommand::MarkEnd(_))));
        assert!(begin < commands.len() - 1);
        assert_eq!(artifacts.len(), 1);
    }

    #[tokio::test]
    async fn test_kymograph_aborts_scan_on_failure() {
        let mut config = Config::default();
        config.simulator.rupture_force = (150.0, 160.0);
        config.motion.force.max_attempts = 5;
        let (config, sim) = setup(config);
        sim.inspect(|s| {
            s.load_beads(1);
            s.travel_trap(14.0, 0.0);
        })
        .await;
        let recording = service(&sim, config).await;

        let params = KymographParams {
            high_force: 1.0,
            low_force: 1.0,
            ladder: vec![0.0, 40.0],
            initial_hold_s: 1.0,
            rung_hold_s: 1.0,
        };
        let mut artifacts = Vec::new();
        let err = recording
            .kymograph(&params, 1, &mut artifacts)
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(artifacts.len(), 1);
        assert!(!sim.inspect(|s| s.is_scanning()).await);
        let commands = sim.commands().await;
        assert!(commands.contains(&SimCommand::AbortScan));
        assert!(matches!(commands.last(), Some(SimCommand::MarkEnd(None))));
    }
}
