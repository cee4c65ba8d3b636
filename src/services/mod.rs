//! Control procedures written against the instrument ports.

pub mod bead_catcher;
pub mod calibration;
pub mod convergence;
pub mod flow;
pub mod force_sequence;
pub mod guard_check;
pub mod measure;
pub mod motion;
pub mod positioning;
pub mod recording;
pub mod tether_check;
pub mod tether_fisher;

pub use bead_catcher::BeadCatcher;
pub use calibration::Calibrator;
pub use convergence::{step_command, ConvergenceLoop};
pub use flow::FlowController;
pub use force_sequence::ForceSequenceService;
pub use guard_check::GuardCheck;
pub use measure::measure_mean;
pub use motion::MotionService;
pub use positioning::PositioningService;
pub use recording::{artifact_name, RecordingService};
pub use tether_check::TetherService;
pub use tether_fisher::TetherFisher;
