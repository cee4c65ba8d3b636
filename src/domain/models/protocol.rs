//! Declarative trial protocols.
//!
//! A protocol is the fixed pipeline of one experimental trial: a list of
//! guarded convergence procedures and unguarded instrument actions executed in
//! order by the orchestrator. Protocols are plain serde data so they can be
//! written in YAML next to the configuration.

use serde::{Deserialize, Serialize};

use super::config::Config;
use crate::domain::errors::{ControlError, ControlResult};

/// Upper bound of the force range accepted by setpoint steps, in pN.
pub const MAX_FORCE_PN: f64 = 300.0;
/// Upper bound of a force-sequence hold, in seconds.
pub const MAX_HOLD_S: f64 = 60.0;
/// Upper bound of a force-sequence move speed, in µm/s.
pub const MAX_SPEED_UM_S: f64 = 20.0;

/// A distance setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceTarget {
    /// Absolute bead-to-bead distance in µm.
    Um(f64),
    /// Fraction of the configured tether length.
    TetherFraction(f64),
}

impl DistanceTarget {
    pub fn resolve(&self, tether_length: f64) -> f64 {
        match self {
            Self::Um(um) => *um,
            Self::TetherFraction(fraction) => fraction * tether_length,
        }
    }
}

/// Constant-speed pulling curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FdCurveParams {
    /// Start distance in µm.
    pub min_distance: f64,
    /// Approximate end distance in µm.
    pub max_distance: f64,
    /// Pulling speed in µm/s.
    pub speed: f64,
    /// Curves recorded per tether.
    #[serde(default = "default_replicates")]
    pub replicates: u32,
}

const fn default_replicates() -> u32 {
    1
}

/// Confocal kymograph recorded over a force ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KymographParams {
    /// Force held when the scan starts, in pN.
    pub high_force: f64,
    /// Base of the force ladder, in pN.
    pub low_force: f64,
    /// Offsets added to `low_force` for each ladder rung, in pN.
    pub ladder: Vec<f64>,
    /// Hold at `high_force` after the scan starts, in seconds.
    #[serde(default = "default_initial_hold")]
    pub initial_hold_s: f64,
    /// Hold at each rung, in seconds.
    #[serde(default = "default_rung_hold")]
    pub rung_hold_s: f64,
}

const fn default_initial_hold() -> f64 {
    10.0
}

const fn default_rung_hold() -> f64 {
    5.0
}

/// One step of a programmed force sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForceStep {
    /// Target force in pN.
    pub force: f64,
    /// Hold time at the target, in seconds.
    pub hold_s: f64,
    /// Trap speed for the move into this step, in µm/s.
    pub speed: f64,
}

/// Repeat a force sequence in a second flow channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRepeat {
    pub waypoint: String,
    pub incubation_s: f64,
}

/// Programmable force sequence replayed under markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceSequenceParams {
    pub steps: Vec<ForceStep>,
    #[serde(default = "default_replicates")]
    pub repetitions: u32,
    /// Position increment of the force search, in µm.
    #[serde(default = "default_search_increment")]
    pub search_increment: f64,
    /// Accepted force error of the search, in pN.
    #[serde(default = "default_search_tolerance")]
    pub search_tolerance: f64,
    /// Largest trap excursion the search may make, in µm.
    #[serde(default = "default_max_movement")]
    pub max_movement: f64,
    #[serde(default)]
    pub repeat_in: Option<ChannelRepeat>,
}

const fn default_search_increment() -> f64 {
    0.1
}

const fn default_search_tolerance() -> f64 {
    0.5
}

const fn default_max_movement() -> f64 {
    20.0
}

/// Target for one actuator of a multi-trap choreography.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisTarget {
    /// Actuator name as reported by the instrument.
    pub actuator: String,
    /// Tracked bead held by the actuator; found by probing when omitted.
    #[serde(default)]
    pub bead: Option<u8>,
    /// Target bead position in µm.
    pub position: f64,
}

/// One stage of a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ProtocolStep {
    CatchBeads,
    FishTether,
    StartFlow { pressure: f64 },
    StopFlow,
    VerifySingleTether,
    GotoDistance {
        target: DistanceTarget,
        #[serde(default)]
        speed: Option<f64>,
    },
    GotoForce { target: f64 },
    ResetForce,
    MoveStage {
        waypoint: String,
        #[serde(default)]
        speed: Option<f64>,
    },
    Pause { seconds: f64 },
    CheckTether,
    RecordFdCurve(FdCurveParams),
    RecordKymograph(KymographParams),
    ForceSequence(ForceSequenceParams),
    PositionTraps { targets: Vec<AxisTarget> },
}

impl ProtocolStep {
    /// Short stage name for logs and failure reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CatchBeads => "catch_beads",
            Self::FishTether => "fish_tether",
            Self::StartFlow { .. } => "start_flow",
            Self::StopFlow => "stop_flow",
            Self::VerifySingleTether => "verify_single_tether",
            Self::GotoDistance { .. } => "goto_distance",
            Self::GotoForce { .. } => "goto_force",
            Self::ResetForce => "reset_force",
            Self::MoveStage { .. } => "move_stage",
            Self::Pause { .. } => "pause",
            Self::CheckTether => "check_tether",
            Self::RecordFdCurve(_) => "record_fd_curve",
            Self::RecordKymograph(_) => "record_kymograph",
            Self::ForceSequence(_) => "force_sequence",
            Self::PositionTraps { .. } => "position_traps",
        }
    }

    fn validate(&self) -> ControlResult<()> {
        let name = self.name();
        match self {
            Self::StartFlow { pressure } => non_negative(name, "pressure", *pressure),
            Self::GotoDistance { target, speed } => {
                let value = match target {
                    DistanceTarget::Um(um) => *um,
                    DistanceTarget::TetherFraction(f) => *f,
                };
                positive(name, "target", value)?;
                speed.map_or(Ok(()), |s| non_negative(name, "speed", s))
            }
            Self::GotoForce { target } => force_in_range(name, *target),
            Self::MoveStage { waypoint, speed } => {
                if waypoint.trim().is_empty() {
                    return Err(ControlError::invalid(format!("{name}: waypoint is empty")));
                }
                speed.map_or(Ok(()), |s| non_negative(name, "speed", s))
            }
            Self::Pause { seconds } => non_negative(name, "seconds", *seconds),
            Self::RecordFdCurve(p) => {
                positive(name, "min_distance", p.min_distance)?;
                positive(name, "speed", p.speed)?;
                if p.max_distance <= p.min_distance {
                    return Err(ControlError::invalid(format!(
                        "{name}: max_distance ({}) must exceed min_distance ({})",
                        p.max_distance, p.min_distance
                    )));
                }
                at_least_one(name, "replicates", p.replicates)
            }
            Self::RecordKymograph(p) => {
                force_in_range(name, p.high_force)?;
                force_in_range(name, p.low_force)?;
                if p.ladder.is_empty() {
                    return Err(ControlError::invalid(format!("{name}: ladder is empty")));
                }
                for offset in &p.ladder {
                    force_in_range(name, p.low_force + offset)?;
                }
                non_negative(name, "initial_hold_s", p.initial_hold_s)?;
                non_negative(name, "rung_hold_s", p.rung_hold_s)
            }
            Self::ForceSequence(p) => {
                if p.steps.is_empty() {
                    return Err(ControlError::invalid(format!("{name}: no steps")));
                }
                for step in &p.steps {
                    force_in_range(name, step.force)?;
                    if !(0.0..MAX_HOLD_S).contains(&step.hold_s) {
                        return Err(ControlError::invalid(format!(
                            "{name}: hold {} s outside 0..{MAX_HOLD_S} s",
                            step.hold_s
                        )));
                    }
                    if !(0.0..MAX_SPEED_UM_S).contains(&step.speed) {
                        return Err(ControlError::invalid(format!(
                            "{name}: speed {} µm/s outside 0..{MAX_SPEED_UM_S} µm/s",
                            step.speed
                        )));
                    }
                }
                at_least_one(name, "repetitions", p.repetitions)?;
                positive(name, "search_increment", p.search_increment)?;
                positive(name, "search_tolerance", p.search_tolerance)?;
                positive(name, "max_movement", p.max_movement)?;
                if let Some(repeat) = &p.repeat_in {
                    if repeat.waypoint.trim().is_empty() {
                        return Err(ControlError::invalid(format!(
                            "{name}: repeat waypoint is empty"
                        )));
                    }
                    non_negative(name, "incubation_s", repeat.incubation_s)?;
                }
                Ok(())
            }
            Self::PositionTraps { targets } => {
                if targets.is_empty() {
                    return Err(ControlError::invalid(format!("{name}: no targets")));
                }
                for target in targets {
                    if target.actuator.trim().is_empty() {
                        return Err(ControlError::invalid(format!(
                            "{name}: actuator name is empty"
                        )));
                    }
                    if !target.position.is_finite() {
                        return Err(ControlError::invalid(format!(
                            "{name}: position of '{}' is not finite",
                            target.actuator
                        )));
                    }
                }
                Ok(())
            }
            Self::CatchBeads
            | Self::FishTether
            | Self::StopFlow
            | Self::VerifySingleTether
            | Self::ResetForce
            | Self::CheckTether => Ok(()),
        }
    }
}

fn positive(step: &str, field: &str, value: f64) -> ControlResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ControlError::invalid(format!(
            "{step}: {field} must be positive, got {value}"
        )))
    }
}

fn non_negative(step: &str, field: &str, value: f64) -> ControlResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ControlError::invalid(format!(
            "{step}: {field} must be non-negative, got {value}"
        )))
    }
}

fn at_least_one(step: &str, field: &str, value: u32) -> ControlResult<()> {
    if value == 0 {
        Err(ControlError::invalid(format!("{step}: {field} must be at least 1")))
    } else {
        Ok(())
    }
}

fn force_in_range(step: &str, force: f64) -> ControlResult<()> {
    if (0.0..MAX_FORCE_PN).contains(&force) {
        Ok(())
    } else {
        Err(ControlError::invalid(format!(
            "{step}: force {force} pN outside 0..{MAX_FORCE_PN} pN"
        )))
    }
}

/// A named list of trial steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub name: String,
    pub steps: Vec<ProtocolStep>,
}

/// Names accepted by [`Protocol::preset`].
pub const PRESETS: [&str; 3] = ["kymograph", "fd-curves", "force-sequence"];

impl Protocol {
    pub fn new(name: impl Into<String>, steps: Vec<ProtocolStep>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Check every step before any actuation happens.
    pub fn validate(&self) -> ControlResult<()> {
        if self.steps.is_empty() {
            return Err(ControlError::invalid(format!(
                "protocol '{}' has no steps",
                self.name
            )));
        }
        for (index, step) in self.steps.iter().enumerate() {
            step.validate().map_err(|err| match err {
                ControlError::InvalidConfiguration(msg) => ControlError::InvalidConfiguration(
                    format!("protocol '{}' step {}: {msg}", self.name, index + 1),
                ),
                other => other,
            })?;
        }
        Ok(())
    }

    /// Built-in protocol by name.
    pub fn preset(name: &str, config: &Config) -> Option<Self> {
        match name {
            "kymograph" => Some(Self::kymograph(config)),
            "fd-curves" => Some(Self::fd_curves(config)),
            "force-sequence" => Some(Self::force_sequence(config)),
            _ => None,
        }
    }

    /// Catch beads and DNA, verify a single tether, move into the protein
    /// channel and record a kymograph over a force ladder.
    pub fn kymograph(config: &Config) -> Self {
        let channels = &config.instrument;
        let stage_speed = Some(80.0);
        Self::new(
            "kymograph",
            vec![
                ProtocolStep::CatchBeads,
                ProtocolStep::FishTether,
                ProtocolStep::StopFlow,
                ProtocolStep::Pause { seconds: 3.0 },
                ProtocolStep::VerifySingleTether,
                ProtocolStep::GotoDistance {
                    target: DistanceTarget::TetherFraction(0.75),
                    speed: None,
                },
                ProtocolStep::Pause { seconds: 1.0 },
                ProtocolStep::ResetForce,
                ProtocolStep::GotoDistance {
                    target: DistanceTarget::TetherFraction(1.0),
                    speed: None,
                },
                ProtocolStep::CheckTether,
                ProtocolStep::MoveStage {
                    waypoint: channels.junction_channel.clone(),
                    speed: stage_speed,
                },
                ProtocolStep::Pause { seconds: 2.0 },
                ProtocolStep::MoveStage {
                    waypoint: channels.protein_channel.clone(),
                    speed: stage_speed,
                },
                ProtocolStep::Pause { seconds: 2.0 },
                ProtocolStep::GotoDistance {
                    target: DistanceTarget::TetherFraction(0.85),
                    speed: None,
                },
                ProtocolStep::Pause { seconds: 1.0 },
                ProtocolStep::ResetForce,
                ProtocolStep::GotoForce { target: 40.0 },
                ProtocolStep::Pause { seconds: 5.0 },
                ProtocolStep::CheckTether,
                ProtocolStep::RecordKymograph(KymographParams {
                    high_force: 40.0,
                    low_force: 20.0,
                    ladder: vec![0.0, 5.0, 10.0, 15.0, 20.0],
                    initial_hold_s: default_initial_hold(),
                    rung_hold_s: default_rung_hold(),
                }),
            ],
        )
    }

    /// Catch beads and DNA, then pull replicate F,d curves on the tether.
    pub fn fd_curves(config: &Config) -> Self {
        Self::new(
            "fd-curves",
            vec![
                ProtocolStep::CatchBeads,
                ProtocolStep::FishTether,
                ProtocolStep::MoveStage {
                    waypoint: config.instrument.buffer_channel.clone(),
                    speed: None,
                },
                ProtocolStep::StopFlow,
                ProtocolStep::Pause { seconds: 5.0 },
                ProtocolStep::RecordFdCurve(FdCurveParams {
                    min_distance: 12.5,
                    max_distance: 17.5,
                    speed: 0.5,
                    replicates: 5,
                }),
            ],
        )
    }

    /// Catch a single tether and replay a programmed force sequence.
    pub fn force_sequence(config: &Config) -> Self {
        Self::new(
            "force-sequence",
            vec![
                ProtocolStep::CatchBeads,
                ProtocolStep::FishTether,
                ProtocolStep::StopFlow,
                ProtocolStep::VerifySingleTether,
                ProtocolStep::GotoDistance {
                    target: DistanceTarget::TetherFraction(0.85),
                    speed: None,
                },
                ProtocolStep::ResetForce,
                ProtocolStep::ForceSequence(ForceSequenceParams {
                    steps: vec![
                        ForceStep {
                            force: 5.0,
                            hold_s: 10.0,
                            speed: 10.0,
                        },
                        ForceStep {
                            force: 20.0,
                            hold_s: 10.0,
                            speed: 1.0,
                        },
                        ForceStep {
                            force: 5.0,
                            hold_s: 10.0,
                            speed: 1.0,
                        },
                    ],
                    repetitions: 2,
                    search_increment: default_search_increment(),
                    search_tolerance: default_search_tolerance(),
                    max_movement: default_max_movement(),
                    repeat_in: Some(ChannelRepeat {
                        waypoint: config.instrument.protein_channel.clone(),
                        incubation_s: 30.0,
                    }),
                }),
            ],
        )
    }
}
