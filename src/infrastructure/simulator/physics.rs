//! Virtual-time physics of the simulated dual-trap instrument.
//!
//! The model is deliberately coarse: the bead distance is the trap position,
//! tethers are parallel linear springs beyond an onset distance, and every
//! random event is drawn from one seeded generator so a run is reproducible
//! from its seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::models::{Config, InstrumentConfig, Sample, Signal, SimulatorConfig};

/// Samples kept per signal.
const HISTORY_CAPACITY: usize = 50_000;
/// Tethers a bead pair can hold at once.
const MAX_TETHERS: usize = 3;
/// Travel time of a microstage move.
const STAGE_TRAVEL: Duration = Duration::from_secs(1);
/// Name of the trap that sets the bead distance.
pub const TRAP_NAME: &str = "trap1";

/// Commands received by the simulator, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    MoveActuator { actuator: String, position: f64 },
    OpenValves(Vec<u8>),
    CloseValves(Vec<u8>),
    SetPressure(f64),
    Vent,
    MoveStage(String),
    ClearTraps(Vec<u8>),
    ResetForce,
    StartScan(String),
    AbortScan,
    MarkBegin(String),
    MarkEnd(Option<PathBuf>),
}

impl SimCommand {
    /// Whether the command moves a trap or mirror.
    pub fn is_motion(&self) -> bool {
        matches!(self, Self::MoveActuator { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Bead {
    good: bool,
    coated: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Axis {
    pub name: String,
    pub bead: u8,
    pub gain: f64,
    pub offset: f64,
    pub position: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct Marker {
    pub label: String,
    pub start: Duration,
}

/// Complete simulator state, guarded by one mutex.
#[derive(Debug)]
pub struct SimState {
    params: SimulatorConfig,
    channels: InstrumentConfig,
    rng: StdRng,
    now: Duration,
    trap_position: f64,
    force_offset: f64,
    beads: BTreeMap<u8, Bead>,
    /// Rupture force of each tether, in pN.
    tethers: Vec<f64>,
    /// Set while the trap is outside capture distance; one capture roll per
    /// approach.
    capture_armed: bool,
    waypoint: String,
    valves: BTreeSet<u8>,
    pressure: f64,
    pub(crate) axes: Vec<Axis>,
    pub(crate) scanning: Option<String>,
    pub(crate) marker: Option<Marker>,
    history: HashMap<Signal, VecDeque<Sample>>,
    pub(crate) log: Vec<SimCommand>,
}

impl SimState {
    pub fn new(config: &Config) -> Self {
        let params = config.simulator.clone();
        let mut state = Self {
            rng: StdRng::seed_from_u64(params.seed),
            now: Duration::ZERO,
            trap_position: params.initial_distance,
            force_offset: 0.0,
            beads: BTreeMap::new(),
            tethers: Vec::new(),
            capture_armed: params.initial_distance >= params.capture_distance,
            waypoint: config.instrument.buffer_channel.clone(),
            valves: BTreeSet::new(),
            pressure: 0.0,
            axes: params
                .axes
                .iter()
                .map(|a| Axis {
                    name: a.name.clone(),
                    bead: a.bead,
                    gain: a.gain,
                    offset: a.offset,
                    position: 0.0,
                })
                .collect(),
            scanning: None,
            marker: None,
            history: HashMap::new(),
            log: Vec::new(),
            channels: config.instrument.clone(),
            params,
        };
        if state.params.start_with_beads {
            for trap in 1..=2 {
                state.beads.insert(
                    trap,
                    Bead {
                        good: true,
                        coated: true,
                    },
                );
            }
            for _ in 0..state.params.start_with_tethers {
                let rupture = state.draw_rupture_force();
                state.tethers.push(rupture);
            }
        }
        state.record_samples();
        state
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn trap_position(&self) -> f64 {
        self.trap_position
    }

    pub fn tether_count(&self) -> usize {
        self.tethers.len()
    }

    pub fn bead_count(&self) -> usize {
        self.beads.len()
    }

    pub fn pressure(&self) -> f64 {
        self.pressure
    }

    pub fn open_valves(&self) -> Vec<u8> {
        self.valves.iter().copied().collect()
    }

    pub fn waypoint(&self) -> &str {
        &self.waypoint
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.is_some()
    }

    pub fn knows_waypoint(&self, waypoint: &str) -> bool {
        self.params.waypoints.iter().any(|w| w == waypoint)
    }

    /// Place good, DNA-coated beads in both traps with `tethers` tethers.
    pub fn load_beads(&mut self, tethers: usize) {
        for trap in 1..=2 {
            self.beads.insert(
                trap,
                Bead {
                    good: true,
                    coated: true,
                },
            );
        }
        self.tethers.clear();
        for _ in 0..tethers.min(MAX_TETHERS) {
            let rupture = self.draw_rupture_force();
            self.tethers.push(rupture);
        }
        self.record_samples();
    }

    /// Lose the bead in `trap` together with any tether.
    pub fn release_trap(&mut self, trap: u8) {
        if self.beads.remove(&trap).is_some() {
            self.tethers.clear();
        }
    }

    pub fn move_stage(&mut self, waypoint: &str) {
        self.log.push(SimCommand::MoveStage(waypoint.to_string()));
        self.waypoint = waypoint.to_string();
        self.advance(STAGE_TRAVEL);
    }

    pub fn open(&mut self, channels: &[u8]) {
        self.log.push(SimCommand::OpenValves(channels.to_vec()));
        self.valves.extend(channels.iter().copied());
    }

    pub fn close(&mut self, channels: &[u8]) {
        self.log.push(SimCommand::CloseValves(channels.to_vec()));
        for channel in channels {
            self.valves.remove(channel);
        }
    }

    pub fn set_pressure(&mut self, bar: f64) {
        self.log.push(SimCommand::SetPressure(bar));
        self.pressure = bar;
    }

    pub fn vent(&mut self) {
        self.log.push(SimCommand::Vent);
        self.pressure = 0.0;
    }

    pub fn clear_traps(&mut self, traps: &[u8]) {
        self.log.push(SimCommand::ClearTraps(traps.to_vec()));
        for trap in traps {
            self.release_trap(*trap);
        }
        self.record_samples();
    }

    pub fn reset_force(&mut self) {
        self.log.push(SimCommand::ResetForce);
        self.force_offset = self.raw_force();
        self.record_samples();
    }

    /// Move the distance trap to `target` at `speed` µm/s, ticking the
    /// physics along the way. A non-positive speed jumps.
    pub fn travel_trap(&mut self, target: f64, speed: f64) {
        self.log.push(SimCommand::MoveActuator {
            actuator: TRAP_NAME.to_string(),
            position: target,
        });
        if speed <= 0.0 {
            self.trap_position = target;
            self.after_motion();
            self.tick(Duration::ZERO);
            return;
        }
        let dt = self.sample_interval();
        let per_tick = speed * dt.as_secs_f64();
        while (target - self.trap_position).abs() > f64::EPSILON {
            let remaining = target - self.trap_position;
            if remaining.abs() <= per_tick {
                let fraction = remaining.abs() / per_tick;
                self.trap_position = target;
                self.after_motion();
                self.tick(dt.mul_f64(fraction));
            } else {
                self.trap_position += per_tick.copysign(remaining);
                self.after_motion();
                self.tick(dt);
            }
        }
    }

    /// Move an auxiliary axis; its bead follows through the axis gain.
    pub fn travel_axis(&mut self, index: usize, target: f64, speed: f64) {
        let Some(axis) = self.axes.get(index) else {
            return;
        };
        self.log.push(SimCommand::MoveActuator {
            actuator: axis.name.clone(),
            position: target,
        });
        let distance = (target - axis.position).abs();
        self.axes[index].position = target;
        if speed > 0.0 {
            self.advance(Duration::from_secs_f64(distance / speed));
        } else {
            self.tick(Duration::ZERO);
        }
    }

    /// Let instrument time pass.
    pub fn advance(&mut self, duration: Duration) {
        let end = self.now + duration;
        let dt = self.sample_interval();
        while self.now + dt <= end {
            self.tick(dt);
        }
        if self.now < end {
            let rest = end - self.now;
            self.tick(rest);
        }
    }

    pub fn latest(&mut self, signal: Signal) -> Option<f64> {
        if !self.history.contains_key(&signal) {
            let value = self.read(signal)?;
            self.push_sample(signal, value);
        }
        self.history
            .get(&signal)
            .and_then(|h| h.back())
            .map(|s| s.value)
    }

    pub fn window(&self, signal: Signal, t0: Duration, t1: Duration) -> Vec<Sample> {
        self.history
            .get(&signal)
            .map(|h| {
                h.iter()
                    .filter(|s| s.time >= t0 && s.time <= t1)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn supports(&self, signal: Signal) -> bool {
        match signal {
            Signal::Distance | Signal::Force => true,
            Signal::MatchScore { bead } => (1..=2).contains(&bead) || self.axis_holds(bead),
            Signal::BeadPosition { bead } => (1..=2).contains(&bead) || self.axis_holds(bead),
        }
    }

    fn axis_holds(&self, bead: u8) -> bool {
        self.axes.iter().any(|a| a.bead == bead)
    }

    fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.params.sample_interval_ms.max(1))
    }

    fn draw_rupture_force(&mut self) -> f64 {
        let (low, high) = self.params.rupture_force;
        if high > low {
            self.rng.gen_range(low..high)
        } else {
            low
        }
    }

    fn jitter(&mut self, peak_to_peak: f64) -> f64 {
        let half = peak_to_peak / 2.0;
        if half > 0.0 {
            self.rng.gen_range(-half..half)
        } else {
            0.0
        }
    }

    fn extension(&self) -> f64 {
        (self.trap_position - self.params.tether_onset).max(0.0)
    }

    fn tether_force(&self) -> f64 {
        self.params.tether_stiffness * self.extension()
    }

    fn raw_force(&self) -> f64 {
        self.tethers.len() as f64 * self.tether_force()
    }

    fn bead_pair(&self) -> bool {
        self.beads.contains_key(&1) && self.beads.contains_key(&2)
    }

    /// Tether capture on close approach, rupture and bead escape under load.
    fn after_motion(&mut self) {
        let close = self.trap_position < self.params.capture_distance;
        let approach = close && self.capture_armed;
        self.capture_armed = !close;
        if approach
            && self.bead_pair()
            && self.tethers.len() < MAX_TETHERS
            && self.beads.values().any(|b| b.coated)
            && self.rng.gen_bool(self.params.tether_capture_probability.clamp(0.0, 1.0))
        {
            let rupture = self.draw_rupture_force();
            self.tethers.push(rupture);
            if self.tethers.len() < MAX_TETHERS
                && self
                    .rng
                    .gen_bool(self.params.multiple_tether_probability.clamp(0.0, 1.0))
            {
                let rupture = self.draw_rupture_force();
                self.tethers.push(rupture);
            }
        }
        let per_tether = self.tether_force();
        self.tethers.retain(|rupture| per_tether < *rupture);
        if self.raw_force() > self.params.bead_escape_force {
            self.release_trap(2);
        }
    }

    fn tick(&mut self, dt: Duration) {
        self.now += dt;
        let secs = dt.as_secs_f64();
        let flowing = self.pressure > 0.0 && !self.valves.is_empty();

        if flowing && self.waypoint == self.channels.bead_channel {
            let p = (self.params.bead_catch_rate * secs).clamp(0.0, 1.0);
            for trap in 1..=2u8 {
                if !self.beads.contains_key(&trap) && self.rng.gen_bool(p) {
                    let good = self
                        .rng
                        .gen_bool(self.params.good_bead_fraction.clamp(0.0, 1.0));
                    self.beads.insert(
                        trap,
                        Bead {
                            good,
                            coated: false,
                        },
                    );
                }
            }
        }
        if self.waypoint == self.channels.dna_channel {
            for bead in self.beads.values_mut() {
                bead.coated = true;
            }
        }
        let loss = (self.params.bead_loss_rate * secs).clamp(0.0, 1.0);
        if loss > 0.0 && !self.beads.is_empty() && self.rng.gen_bool(loss) {
            self.release_trap(2);
        }
        self.record_samples();
    }

    fn read(&mut self, signal: Signal) -> Option<f64> {
        let value = match signal {
            Signal::Distance => {
                let noise = self.jitter(self.params.distance_noise);
                self.trap_position + noise
            }
            Signal::Force => {
                let noise = self.jitter(self.params.force_noise);
                self.raw_force() - self.force_offset + noise
            }
            Signal::MatchScore { bead } => {
                if !self.supports(signal) {
                    return None;
                }
                let trap = self.trap_of(bead);
                match self.beads.get(&trap).copied() {
                    Some(Bead { good: true, .. }) => 90.0 + self.jitter(10.0),
                    Some(Bead { good: false, .. }) => 45.0 + self.jitter(20.0),
                    None => 0.0,
                }
            }
            Signal::BeadPosition { bead } => {
                let noise = self.jitter(self.params.distance_noise);
                if let Some(axis) = self.axes.iter().find(|a| a.bead == bead) {
                    axis.offset + axis.gain * axis.position + noise
                } else if bead == 2 {
                    self.trap_position + noise
                } else if bead == 1 {
                    noise
                } else {
                    return None;
                }
            }
        };
        Some(value)
    }

    /// Beads held by auxiliary axes share the tracking state of trap 1.
    fn trap_of(&self, bead: u8) -> u8 {
        if bead == 2 {
            2
        } else {
            1
        }
    }

    fn record_samples(&mut self) {
        let mut signals = vec![
            Signal::Distance,
            Signal::Force,
            Signal::MatchScore { bead: 1 },
            Signal::MatchScore { bead: 2 },
            Signal::BeadPosition { bead: 1 },
            Signal::BeadPosition { bead: 2 },
        ];
        for axis in &self.axes {
            for signal in [
                Signal::BeadPosition { bead: axis.bead },
                Signal::MatchScore { bead: axis.bead },
            ] {
                if !signals.contains(&signal) {
                    signals.push(signal);
                }
            }
        }
        for signal in signals {
            if let Some(value) = self.read(signal) {
                self.push_sample(signal, value);
            }
        }
    }

    fn push_sample(&mut self, signal: Signal, value: f64) {
        let now = self.now;
        let history = self.history.entry(signal).or_default();
        if history.back().is_some_and(|s| s.time == now) {
            history.pop_back();
        }
        history.push_back(Sample::new(now, value));
        if history.len() > HISTORY_CAPACITY {
            history.pop_front();
        }
    }
}
