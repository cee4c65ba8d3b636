use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::convergence::{LoopParams, MeasureMode};
use super::protocol::Protocol;
use super::workflow::FailurePolicy;
use super::Signal;

/// Main configuration structure for Trapline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Waypoint names and fluidic channels of the flow cell
    #[serde(default)]
    pub instrument: InstrumentConfig,

    /// Bead tracking guard thresholds
    #[serde(default)]
    pub guards: GuardConfig,

    /// Distance and force servo loops
    #[serde(default)]
    pub motion: MotionConfig,

    /// Bead catching
    #[serde(default)]
    pub catching: CatchingConfig,

    /// Tether fishing
    #[serde(default)]
    pub fishing: FishingConfig,

    /// Tether geometry and force thresholds
    #[serde(default)]
    pub tether: TetherConfig,

    /// Marker naming and export
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Trial budget and failure policy
    #[serde(default)]
    pub run: RunConfig,

    /// Simulated instrument backend
    #[serde(default)]
    pub simulator: SimulatorConfig,

    /// Inline protocol; presets are used when absent
    #[serde(default)]
    pub protocol: Option<Protocol>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Flow cell layout as named in the instrument UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InstrumentConfig {
    #[serde(default = "default_bead_channel")]
    pub bead_channel: String,

    #[serde(default = "default_dna_channel")]
    pub dna_channel: String,

    #[serde(default = "default_buffer_channel")]
    pub buffer_channel: String,

    #[serde(default = "default_junction_channel")]
    pub junction_channel: String,

    #[serde(default = "default_protein_channel")]
    pub protein_channel: String,

    /// Valves opened when flow starts and closed on every exit path
    #[serde(default = "default_flow_channels")]
    pub flow_channels: Vec<u8>,

    /// Number of tracked beads
    #[serde(default = "default_beads")]
    pub beads: u8,

    /// Wait after opening valves before the flow is stable, in seconds
    #[serde(default = "default_flow_wait")]
    pub flow_wait_s: f64,
}

fn default_bead_channel() -> String {
    "beads".to_string()
}

fn default_dna_channel() -> String {
    "DNA".to_string()
}

fn default_buffer_channel() -> String {
    "buffer".to_string()
}

fn default_junction_channel() -> String {
    "J1".to_string()
}

fn default_protein_channel() -> String {
    "Ch1".to_string()
}

fn default_flow_channels() -> Vec<u8> {
    vec![1, 2, 3, 4, 6]
}

const fn default_beads() -> u8 {
    2
}

const fn default_flow_wait() -> f64 {
    5.0
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            bead_channel: default_bead_channel(),
            dna_channel: default_dna_channel(),
            buffer_channel: default_buffer_channel(),
            junction_channel: default_junction_channel(),
            protein_channel: default_protein_channel(),
            flow_channels: default_flow_channels(),
            beads: default_beads(),
            flow_wait_s: default_flow_wait(),
        }
    }
}

/// Tracking guard thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GuardConfig {
    /// Minimal template match score, 0-100
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,

    /// Dips shorter than this window are not treated as lost beads, in ms
    #[serde(default = "default_settle_window_ms")]
    pub settle_window_ms: u64,
}

const fn default_match_threshold() -> f64 {
    60.0
}

const fn default_settle_window_ms() -> u64 {
    300
}

impl GuardConfig {
    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            settle_window_ms: default_settle_window_ms(),
        }
    }
}

/// Tuning of one servo loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoopTuning {
    pub tolerance: f64,
    pub step: f64,
    pub speed: f64,
    pub poll_ms: u64,
    pub max_attempts: u32,
    #[serde(default)]
    pub measure: MeasureMode,
    /// Optional ceiling on instrument time per loop, in seconds
    #[serde(default)]
    pub max_elapsed_s: Option<f64>,
}

impl LoopTuning {
    /// Loop parameters for one move toward `target`.
    pub fn params(&self, procedure: &str, signal: Signal, target: f64) -> LoopParams {
        let params = LoopParams::new(procedure, signal, target)
            .with_tolerance(self.tolerance)
            .with_step(self.step)
            .with_speed(self.speed)
            .with_poll_interval(Duration::from_millis(self.poll_ms))
            .with_budget(self.max_attempts)
            .with_measure(self.measure);
        match self.max_elapsed_s {
            Some(secs) => params.with_max_elapsed(Duration::from_secs_f64(secs)),
            None => params,
        }
    }
}

/// Servo loops moving the steerable trap
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MotionConfig {
    /// Distance servo (µm)
    #[serde(default = "default_distance_loop")]
    pub distance: LoopTuning,

    /// Force servo (pN)
    #[serde(default = "default_force_loop")]
    pub force: LoopTuning,
}

fn default_distance_loop() -> LoopTuning {
    LoopTuning {
        tolerance: 0.2,
        step: 0.1,
        speed: 1.0,
        poll_ms: 50,
        max_attempts: 600,
        measure: MeasureMode::Latest,
        max_elapsed_s: None,
    }
}

fn default_force_loop() -> LoopTuning {
    LoopTuning {
        tolerance: 1.0,
        step: 0.05,
        speed: 1.0,
        poll_ms: 200,
        max_attempts: 400,
        measure: MeasureMode::WindowMean,
        max_elapsed_s: None,
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            distance: default_distance_loop(),
            force: default_force_loop(),
        }
    }
}

/// Bead catching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CatchingConfig {
    /// Pressure while catching, in bar
    #[serde(default = "default_catch_pressure")]
    pub pressure: f64,

    /// Interval between match score polls, in ms
    #[serde(default = "default_catch_poll_ms")]
    pub poll_ms: u64,

    /// Clear both traps when no pair was caught within this time, in seconds
    #[serde(default = "default_clear_interval")]
    pub clear_interval_s: f64,

    /// Clear cycles before giving up
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
}

const fn default_catch_pressure() -> f64 {
    0.25
}

const fn default_catch_poll_ms() -> u64 {
    1000
}

const fn default_clear_interval() -> f64 {
    15.0
}

const fn default_max_cycles() -> u32 {
    50
}

impl Default for CatchingConfig {
    fn default() -> Self {
        Self {
            pressure: default_catch_pressure(),
            poll_ms: default_catch_poll_ms(),
            clear_interval_s: default_clear_interval(),
            max_cycles: default_max_cycles(),
        }
    }
}

/// Tether fishing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FishingConfig {
    /// Closest approach while fishing, in µm
    #[serde(default = "default_fishing_min")]
    pub min_distance: f64,

    /// Furthest extension while fishing, in µm
    #[serde(default = "default_fishing_max")]
    pub max_distance: f64,

    /// Force that signals a caught tether, in pN
    #[serde(default = "default_fishing_force")]
    pub force_threshold: f64,

    /// Trap speed while fishing
    #[serde(default = "default_fishing_speed")]
    pub speed: f64,

    /// Oscillations before giving up
    #[serde(default = "default_fishing_attempts")]
    pub max_attempts: u32,

    /// Dip into the DNA channel every this many attempts; 0 fishes in the DNA
    /// channel directly
    #[serde(default = "default_dip_every")]
    pub dip_every: u32,

    /// Force averaging window, in seconds
    #[serde(default = "default_measure_s")]
    pub measure_s: f64,
}

const fn default_fishing_min() -> f64 {
    10.0
}

const fn default_fishing_max() -> f64 {
    16.0
}

const fn default_fishing_force() -> f64 {
    10.0
}

const fn default_fishing_speed() -> f64 {
    4.0
}

const fn default_fishing_attempts() -> u32 {
    16
}

const fn default_dip_every() -> u32 {
    4
}

const fn default_measure_s() -> f64 {
    0.5
}

impl Default for FishingConfig {
    fn default() -> Self {
        Self {
            min_distance: default_fishing_min(),
            max_distance: default_fishing_max(),
            force_threshold: default_fishing_force(),
            speed: default_fishing_speed(),
            max_attempts: default_fishing_attempts(),
            dip_every: default_dip_every(),
            measure_s: default_measure_s(),
        }
    }
}

/// Tether geometry and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TetherConfig {
    /// Tether length, in µm
    #[serde(default = "default_tether_length")]
    pub length: f64,

    /// Below this force the tether is assumed lost, in pN
    #[serde(default = "default_lost_threshold")]
    pub lost_threshold: f64,

    /// Force at 0.95 x length above which several tethers are present, in pN
    #[serde(default = "default_multiple_force")]
    pub multiple_tether_force: f64,

    /// Force at full extension that confirms one tether remains, in pN
    #[serde(default = "default_single_force")]
    pub single_tether_force: f64,

    /// Stretch cycles when breaking extra tethers
    #[serde(default = "default_break_retries")]
    pub break_retries: u32,

    /// Force averaging window, in seconds
    #[serde(default = "default_measure_s")]
    pub measure_s: f64,
}

const fn default_tether_length() -> f64 {
    16.0
}

const fn default_lost_threshold() -> f64 {
    5.0
}

const fn default_multiple_force() -> f64 {
    10.0
}

const fn default_single_force() -> f64 {
    10.0
}

const fn default_break_retries() -> u32 {
    7
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            length: default_tether_length(),
            lost_threshold: default_lost_threshold(),
            multiple_tether_force: default_multiple_force(),
            single_tether_force: default_single_force(),
            break_retries: default_break_retries(),
            measure_s: default_measure_s(),
        }
    }
}

/// Marker naming and export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RecordingConfig {
    /// Goes into every marker name
    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,

    /// Export directory; markers are not exported when unset
    #[serde(default)]
    pub export_dir: Option<PathBuf>,

    /// Export file extension
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_experiment_name() -> String {
    "exp".to_string()
}

fn default_extension() -> String {
    "h5".to_string()
}

impl RecordingConfig {
    /// Export path for a marker, `None` when exporting is disabled.
    pub fn export_path(&self, label: &str) -> Option<PathBuf> {
        self.export_dir
            .as_ref()
            .map(|dir| dir.join(format!("{label}.{}", self.extension)))
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            experiment_name: default_experiment_name(),
            export_dir: None,
            extension: default_extension(),
        }
    }
}

/// Trial budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunConfig {
    /// Trials attempted before the run ends
    #[serde(default = "default_max_trials")]
    pub max_trials: u32,

    /// What to do after a recoverable failure
    #[serde(default)]
    pub on_failure: FailurePolicy,

    /// Stop early after this many successful trials
    #[serde(default)]
    pub required_successes: Option<u32>,
}

const fn default_max_trials() -> u32 {
    5
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_trials: default_max_trials(),
            on_failure: FailurePolicy::default(),
            required_successes: None,
        }
    }
}

/// An extra steerable trap in the simulator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SimAxisConfig {
    pub name: String,
    /// Tracked bead the trap holds
    pub bead: u8,
    /// Bead displacement per commanded µm
    #[serde(default = "default_axis_gain")]
    pub gain: f64,
    /// Bead position at command zero, in µm
    #[serde(default)]
    pub offset: f64,
}

const fn default_axis_gain() -> f64 {
    1.0
}

/// Physical parameters of the simulated instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SimulatorConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Telemetry sample interval, in ms
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Bead distance at start, in µm
    #[serde(default = "default_initial_distance")]
    pub initial_distance: f64,

    /// Distance at which a tether starts to carry force, in µm
    #[serde(default = "default_tether_onset")]
    pub tether_onset: f64,

    /// Tether stiffness beyond onset, in pN/µm
    #[serde(default = "default_tether_stiffness")]
    pub tether_stiffness: f64,

    /// Per-tether rupture force range, in pN
    #[serde(default = "default_rupture_range")]
    pub rupture_force: (f64, f64),

    /// Total force that pulls a bead out of its trap, in pN
    #[serde(default = "default_escape_force")]
    pub bead_escape_force: f64,

    /// Bead catch rate per empty trap in the bead channel, per second
    #[serde(default = "default_catch_rate")]
    pub bead_catch_rate: f64,

    /// Fraction of caught beads that match the template
    #[serde(default = "default_good_bead_fraction")]
    pub good_bead_fraction: f64,

    /// Approach distance below which DNA-coated beads may tether, in µm
    #[serde(default = "default_capture_distance")]
    pub capture_distance: f64,

    /// Chance that one approach forms a tether
    #[serde(default = "default_capture_probability")]
    pub tether_capture_probability: f64,

    /// Chance that a captured tether comes with a second one
    #[serde(default = "default_multiple_probability")]
    pub multiple_tether_probability: f64,

    /// Spontaneous bead loss rate, per second
    #[serde(default)]
    pub bead_loss_rate: f64,

    /// Peak-to-peak force noise, in pN
    #[serde(default = "default_force_noise")]
    pub force_noise: f64,

    /// Peak-to-peak distance noise, in µm
    #[serde(default = "default_distance_noise")]
    pub distance_noise: f64,

    /// Microstage waypoints the simulator knows
    #[serde(default = "default_waypoints")]
    pub waypoints: Vec<String>,

    /// Start with both traps holding good beads
    #[serde(default)]
    pub start_with_beads: bool,

    /// Tethers present at start (requires beads)
    #[serde(default)]
    pub start_with_tethers: u8,

    /// Additional steerable traps
    #[serde(default)]
    pub axes: Vec<SimAxisConfig>,
}

const fn default_seed() -> u64 {
    42
}

const fn default_sample_interval_ms() -> u64 {
    10
}

const fn default_initial_distance() -> f64 {
    12.0
}

const fn default_tether_onset() -> f64 {
    14.5
}

const fn default_tether_stiffness() -> f64 {
    10.0
}

const fn default_rupture_range() -> (f64, f64) {
    (40.0, 80.0)
}

const fn default_escape_force() -> f64 {
    200.0
}

const fn default_catch_rate() -> f64 {
    0.5
}

const fn default_good_bead_fraction() -> f64 {
    0.8
}

const fn default_capture_distance() -> f64 {
    11.0
}

const fn default_capture_probability() -> f64 {
    0.4
}

const fn default_multiple_probability() -> f64 {
    0.2
}

const fn default_force_noise() -> f64 {
    0.2
}

const fn default_distance_noise() -> f64 {
    0.01
}

fn default_waypoints() -> Vec<String> {
    ["beads", "DNA", "buffer", "J1", "Ch1"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            sample_interval_ms: default_sample_interval_ms(),
            initial_distance: default_initial_distance(),
            tether_onset: default_tether_onset(),
            tether_stiffness: default_tether_stiffness(),
            rupture_force: default_rupture_range(),
            bead_escape_force: default_escape_force(),
            bead_catch_rate: default_catch_rate(),
            good_bead_fraction: default_good_bead_fraction(),
            capture_distance: default_capture_distance(),
            tether_capture_probability: default_capture_probability(),
            multiple_tether_probability: default_multiple_probability(),
            bead_loss_rate: 0.0,
            force_noise: default_force_noise(),
            distance_noise: default_distance_noise(),
            waypoints: default_waypoints(),
            start_with_beads: false,
            start_with_tethers: 0,
            axes: Vec::new(),
        }
    }
}
