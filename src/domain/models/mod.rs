//! Domain models: signals, guards, convergence loops, protocols and configuration.

pub mod budget;
pub mod config;
pub mod convergence;
pub mod guard;
pub mod protocol;
pub mod signal;
pub mod workflow;

pub use budget::AttemptBudget;
pub use config::{
    CatchingConfig, Config, FishingConfig, GuardConfig, InstrumentConfig, LoggingConfig,
    LoopTuning, MotionConfig, RecordingConfig, RunConfig, SimAxisConfig, SimulatorConfig,
    TetherConfig,
};
pub use convergence::{
    Calibration, ConvergenceReport, ConvergenceState, LoopParams, MeasureMode,
};
pub use guard::{tracking_guards, GuardPredicate};
pub use protocol::{
    AxisTarget, ChannelRepeat, DistanceTarget, FdCurveParams, ForceSequenceParams, ForceStep,
    KymographParams, Protocol, ProtocolStep, PRESETS,
};
pub use signal::{window_max, window_mean, Sample, Signal};
pub use workflow::{
    Artifact, ArtifactKind, FailurePolicy, FailureReason, RunSummary, WorkflowResult,
};
