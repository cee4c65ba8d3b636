//! Port implementations backed by the simulated instrument.

use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::physics::{Marker, SimCommand, SimState, TRAP_NAME};
use crate::domain::errors::InstrumentError;
use crate::domain::models::{Config, Sample, Signal};
use crate::domain::ports::{
    Actuator, Clock, Fluidics, InstrumentHandles, Recorder, Shutters, Stage, Telemetry,
};

/// Valves present on the fluidics manifold.
const VALVES: std::ops::RangeInclusive<u8> = 1..=8;
/// Highest pressure the manifold accepts, in bar.
const MAX_PRESSURE_BAR: f64 = 2.0;

/// Simulated dual-trap instrument.
///
/// Cloning is cheap; all clones share one state.
#[derive(Debug, Clone)]
pub struct SimInstrument {
    state: Arc<Mutex<SimState>>,
}

impl SimInstrument {
    pub fn new(config: &Config) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(config))),
        }
    }

    /// Port handles for the orchestrator and procedures.
    pub async fn handles(&self) -> InstrumentHandles {
        let axes: Vec<String> = {
            let state = self.state.lock().await;
            state.axes.iter().map(|a| a.name.clone()).collect()
        };
        let this: Arc<Self> = Arc::new(self.clone());
        InstrumentHandles {
            trap: Arc::new(SimActuator {
                state: Arc::clone(&self.state),
                name: TRAP_NAME.to_string(),
                axis: None,
            }),
            auxiliary: axes
                .into_iter()
                .enumerate()
                .map(|(index, name)| {
                    Arc::new(SimActuator {
                        state: Arc::clone(&self.state),
                        name,
                        axis: Some(index),
                    }) as Arc<dyn Actuator>
                })
                .collect(),
            telemetry: this.clone(),
            fluidics: this.clone(),
            stage: this.clone(),
            shutters: this.clone(),
            recorder: this.clone(),
            clock: this,
        }
    }

    /// Run `f` with exclusive access to the simulator state.
    pub async fn inspect<R>(&self, f: impl FnOnce(&mut SimState) -> R + Send) -> R {
        let mut state = self.state.lock().await;
        f(&mut state)
    }

    /// Commands received so far, in order.
    pub async fn commands(&self) -> Vec<SimCommand> {
        self.state.lock().await.log.clone()
    }

    pub async fn clear_commands(&self) {
        self.state.lock().await.log.clear();
    }
}

#[async_trait]
impl Telemetry for SimInstrument {
    async fn latest_value(&self, signal: Signal) -> Result<f64, InstrumentError> {
        self.state
            .lock()
            .await
            .latest(signal)
            .ok_or(InstrumentError::UnknownSignal(signal))
    }

    async fn window(
        &self,
        signal: Signal,
        t0: Duration,
        t1: Duration,
    ) -> Result<Vec<Sample>, InstrumentError> {
        let state = self.state.lock().await;
        if !state.supports(signal) {
            return Err(InstrumentError::UnknownSignal(signal));
        }
        Ok(state.window(signal, t0, t1))
    }

    async fn current_time(&self) -> Result<Duration, InstrumentError> {
        Ok(self.state.lock().await.now())
    }

    async fn reset_force(&self) -> Result<(), InstrumentError> {
        self.state.lock().await.reset_force();
        Ok(())
    }
}

fn check_valves(channels: &[u8]) -> Result<(), InstrumentError> {
    match channels.iter().find(|c| !VALVES.contains(*c)) {
        Some(bad) => Err(InstrumentError::rejected(
            "fluidics",
            format!("no valve {bad}"),
        )),
        None => Ok(()),
    }
}

#[async_trait]
impl Fluidics for SimInstrument {
    async fn open(&self, channels: &[u8]) -> Result<(), InstrumentError> {
        check_valves(channels)?;
        self.state.lock().await.open(channels);
        Ok(())
    }

    async fn close(&self, channels: &[u8]) -> Result<(), InstrumentError> {
        check_valves(channels)?;
        self.state.lock().await.close(channels);
        Ok(())
    }

    async fn set_pressure(&self, bar: f64) -> Result<(), InstrumentError> {
        if !(0.0..=MAX_PRESSURE_BAR).contains(&bar) {
            return Err(InstrumentError::rejected(
                "fluidics",
                format!("pressure {bar} bar outside 0..={MAX_PRESSURE_BAR} bar"),
            ));
        }
        self.state.lock().await.set_pressure(bar);
        Ok(())
    }

    async fn pressure(&self) -> Result<f64, InstrumentError> {
        Ok(self.state.lock().await.pressure())
    }

    async fn vent(&self) -> Result<(), InstrumentError> {
        self.state.lock().await.vent();
        Ok(())
    }
}

#[async_trait]
impl Stage for SimInstrument {
    async fn move_to(&self, waypoint: &str, _speed: Option<f64>) -> Result<(), InstrumentError> {
        let mut state = self.state.lock().await;
        if !state.knows_waypoint(waypoint) {
            return Err(InstrumentError::UnknownWaypoint(waypoint.to_string()));
        }
        state.move_stage(waypoint);
        Ok(())
    }
}

#[async_trait]
impl Shutters for SimInstrument {
    async fn clear(&self, traps: &[u8]) -> Result<(), InstrumentError> {
        self.state.lock().await.clear_traps(traps);
        Ok(())
    }
}

#[async_trait]
impl Recorder for SimInstrument {
    async fn start_scan(&self, name: &str) -> Result<(), InstrumentError> {
        let mut state = self.state.lock().await;
        state.log.push(SimCommand::StartScan(name.to_string()));
        state.scanning = Some(name.to_string());
        Ok(())
    }

    async fn abort_scan(&self) -> Result<(), InstrumentError> {
        let mut state = self.state.lock().await;
        state.log.push(SimCommand::AbortScan);
        state.scanning = None;
        Ok(())
    }

    async fn mark_begin(&self, label: &str) -> Result<(), InstrumentError> {
        let mut state = self.state.lock().await;
        state.log.push(SimCommand::MarkBegin(label.to_string()));
        let start = state.now();
        state.marker = Some(Marker {
            label: label.to_string(),
            start,
        });
        Ok(())
    }

    async fn mark_end(&self, export: Option<&Path>) -> Result<Option<PathBuf>, InstrumentError> {
        let (marker, document) = {
            let mut state = self.state.lock().await;
            state
                .log
                .push(SimCommand::MarkEnd(export.map(Path::to_path_buf)));
            let Some(marker) = state.marker.take() else {
                return Ok(None);
            };
            let end = state.now();
            let series = |signal: Signal| -> Vec<[f64; 2]> {
                state
                    .window(signal, marker.start, end)
                    .iter()
                    .map(|s| [s.time.as_secs_f64(), s.value])
                    .collect()
            };
            let document = json!({
                "label": marker.label,
                "start_s": marker.start.as_secs_f64(),
                "end_s": end.as_secs_f64(),
                "distance_um": series(Signal::Distance),
                "force_pn": series(Signal::Force),
            });
            (marker, document)
        };

        let Some(path) = export else {
            return Ok(None);
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| InstrumentError::ExportFailed(format!("{}: {e}", parent.display())))?;
        }
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| InstrumentError::ExportFailed(e.to_string()))?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| InstrumentError::ExportFailed(format!("{}: {e}", path.display())))?;
        debug!(label = %marker.label, path = %path.display(), "Exported marker");
        Ok(Some(path.to_path_buf()))
    }
}

#[async_trait]
impl Clock for SimInstrument {
    async fn pause(&self, duration: Duration) -> Result<(), InstrumentError> {
        self.state.lock().await.advance(duration);
        tokio::task::yield_now().await;
        Ok(())
    }
}

/// A steerable axis of the simulator.
#[derive(Debug)]
pub struct SimActuator {
    state: Arc<Mutex<SimState>>,
    name: String,
    /// Index into the auxiliary axes; `None` for the distance trap.
    axis: Option<usize>,
}

impl SimActuator {
    fn check(&self, value: f64, speed: f64) -> Result<(), InstrumentError> {
        if !value.is_finite() || !speed.is_finite() {
            return Err(InstrumentError::rejected(
                &self.name,
                format!("non-finite move ({value} at {speed})"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Actuator for SimActuator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn move_by(&self, delta: f64, speed: f64) -> Result<(), InstrumentError> {
        self.check(delta, speed)?;
        let mut state = self.state.lock().await;
        match self.axis {
            None => {
                let target = state.trap_position() + delta;
                state.travel_trap(target, speed);
            }
            Some(index) => {
                let target = state.axes[index].position + delta;
                state.travel_axis(index, target, speed);
            }
        }
        Ok(())
    }

    async fn move_to(&self, position: f64, speed: f64) -> Result<(), InstrumentError> {
        self.check(position, speed)?;
        let mut state = self.state.lock().await;
        match self.axis {
            None => state.travel_trap(position, speed),
            Some(index) => state.travel_axis(index, position, speed),
        }
        Ok(())
    }

    async fn current_position(&self) -> Result<f64, InstrumentError> {
        let state = self.state.lock().await;
        Ok(match self.axis {
            None => state.trap_position(),
            Some(index) => state.axes[index].position,
        })
    }
}
