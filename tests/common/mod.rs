//! Common test utilities for integration tests
//!
//! A scripted plant for exercising the convergence loop in isolation, and
//! simulator configurations that make protocol runs deterministic.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trapline::domain::errors::InstrumentError;
use trapline::domain::models::{Config, Sample, Signal};
use trapline::domain::ports::{Actuator, Clock, Telemetry};
use trapline::services::{ConvergenceLoop, GuardCheck};

/// Telemetry sample period of the plant.
const SAMPLE_PERIOD: Duration = Duration::from_millis(10);

type Response = Box<dyn Fn(f64) -> f64 + Send + Sync>;
type Tracking = Box<dyn Fn(u32) -> f64 + Send + Sync>;

#[derive(Debug, Default)]
struct PlantState {
    position: f64,
    now: Duration,
    moves: u32,
    pauses: u32,
    samples: Vec<(Duration, f64, f64, f64)>,
}

/// One actuator driving a force signal through a scripted response.
///
/// Force is `response(position)`, distance is the position itself, and both
/// bead match scores follow `tracking(moves_so_far)`. Moves are instant;
/// only pauses let time pass.
pub struct FakePlant {
    state: Mutex<PlantState>,
    response: Response,
    tracking: Tracking,
}

impl FakePlant {
    pub fn new(response: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Arc<Self> {
        Self::with_tracking(response, |_| 90.0)
    }

    pub fn with_tracking(
        response: impl Fn(f64) -> f64 + Send + Sync + 'static,
        tracking: impl Fn(u32) -> f64 + Send + Sync + 'static,
    ) -> Arc<Self> {
        let plant = Arc::new(Self {
            state: Mutex::new(PlantState::default()),
            response: Box::new(response),
            tracking: Box::new(tracking),
        });
        plant.record();
        plant
    }

    /// Linear spring: `stiffness` pN per µm starting at position 0.
    pub fn linear(stiffness: f64) -> Arc<Self> {
        Self::new(move |x| stiffness * x)
    }

    pub fn set_position(&self, position: f64) {
        self.state.lock().unwrap().position = position;
        self.record();
    }

    pub fn position(&self) -> f64 {
        self.state.lock().unwrap().position
    }

    pub fn moves(&self) -> u32 {
        self.state.lock().unwrap().moves
    }

    pub fn pauses(&self) -> u32 {
        self.state.lock().unwrap().pauses
    }

    pub fn force(&self) -> f64 {
        (self.response)(self.position())
    }

    fn record(&self) {
        let mut state = self.state.lock().unwrap();
        let force = (self.response)(state.position);
        let score = (self.tracking)(state.moves);
        let (now, position) = (state.now, state.position);
        state.samples.push((now, force, position, score));
    }

    fn value(&self, signal: Signal, sample: &(Duration, f64, f64, f64)) -> Option<f64> {
        match signal {
            Signal::Force => Some(sample.1),
            Signal::Distance | Signal::BeadPosition { .. } => Some(sample.2),
            Signal::MatchScore { bead: 1..=2 } => Some(sample.3),
            Signal::MatchScore { .. } => None,
        }
    }
}

#[async_trait]
impl Actuator for FakePlant {
    fn name(&self) -> &str {
        "trap1"
    }

    async fn move_by(&self, delta: f64, _speed: f64) -> Result<(), InstrumentError> {
        {
            let mut state = self.state.lock().unwrap();
            state.position += delta;
            state.moves += 1;
        }
        self.record();
        Ok(())
    }

    async fn move_to(&self, position: f64, _speed: f64) -> Result<(), InstrumentError> {
        {
            let mut state = self.state.lock().unwrap();
            state.position = position;
            state.moves += 1;
        }
        self.record();
        Ok(())
    }

    async fn current_position(&self) -> Result<f64, InstrumentError> {
        Ok(self.position())
    }
}

#[async_trait]
impl Telemetry for FakePlant {
    async fn latest_value(&self, signal: Signal) -> Result<f64, InstrumentError> {
        let state = self.state.lock().unwrap();
        state
            .samples
            .last()
            .and_then(|sample| self.value(signal, sample))
            .ok_or(InstrumentError::UnknownSignal(signal))
    }

    async fn window(
        &self,
        signal: Signal,
        t0: Duration,
        t1: Duration,
    ) -> Result<Vec<Sample>, InstrumentError> {
        let state = self.state.lock().unwrap();
        let mut samples = Vec::new();
        for sample in state.samples.iter().filter(|s| s.0 >= t0 && s.0 <= t1) {
            let value = self
                .value(signal, sample)
                .ok_or(InstrumentError::UnknownSignal(signal))?;
            samples.push(Sample::new(sample.0, value));
        }
        Ok(samples)
    }

    async fn current_time(&self) -> Result<Duration, InstrumentError> {
        Ok(self.state.lock().unwrap().now)
    }

    async fn reset_force(&self) -> Result<(), InstrumentError> {
        Ok(())
    }
}

#[async_trait]
impl Clock for FakePlant {
    async fn pause(&self, duration: Duration) -> Result<(), InstrumentError> {
        let end = {
            let mut state = self.state.lock().unwrap();
            state.pauses += 1;
            state.now + duration
        };
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if state.now >= end {
                    break;
                }
                state.now = (state.now + SAMPLE_PERIOD).min(end);
            }
            self.record();
        }
        Ok(())
    }
}

/// Convergence loop wired to `plant` for actuation, telemetry and time.
pub fn servo(plant: &Arc<FakePlant>) -> ConvergenceLoop {
    let telemetry: Arc<dyn Telemetry> = plant.clone();
    let guard = GuardCheck::new(telemetry.clone(), Duration::from_millis(300));
    ConvergenceLoop::new(plant.clone(), telemetry, plant.clone(), guard)
}

/// Simulator settings under which a well-formed protocol succeeds on the
/// first trial: every bead is good, every approach captures exactly one
/// tether, and tethers survive forces far beyond the presets.
pub fn reliable_config() -> Config {
    let mut config = Config::default();
    let sim = &mut config.simulator;
    sim.seed = 7;
    sim.good_bead_fraction = 1.0;
    sim.bead_catch_rate = 50.0;
    sim.tether_capture_probability = 1.0;
    sim.multiple_tether_probability = 0.0;
    sim.rupture_force = (150.0, 160.0);
    sim.bead_escape_force = 1000.0;
    sim.bead_loss_rate = 0.0;
    config.run.max_trials = 2;
    config
}

/// Settings under which no tether ever forms, so fishing always runs out of
/// attempts.
pub fn tetherless_config() -> Config {
    let mut config = reliable_config();
    config.simulator.tether_capture_probability = 0.0;
    config.fishing.max_attempts = 2;
    config
}

/// Initialize tracing for tests that want log output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
