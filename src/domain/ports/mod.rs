//! Port trait definitions (Hexagonal Architecture)
//!
//! Every procedure talks to the instrument through these traits:
//! - Actuator: steerable traps and mirror axes
//! - Telemetry: the signal timeline
//! - Fluidics, Stage, Shutters, Recorder, Clock: unguarded actions
//!
//! The simulator in `infrastructure::simulator` implements all of them; a
//! hardware backend implements the same set.

pub mod actuator;
pub mod instrument;
pub mod telemetry;

use std::sync::Arc;

pub use actuator::Actuator;
pub use instrument::{Clock, Fluidics, Recorder, Shutters, Stage};
pub use telemetry::Telemetry;

/// Shared handles to one instrument.
#[derive(Clone)]
pub struct InstrumentHandles {
    /// The steerable trap that sets the bead-to-bead distance.
    pub trap: Arc<dyn Actuator>,
    /// Additional steerable axes for multi-trap positioning.
    pub auxiliary: Vec<Arc<dyn Actuator>>,
    pub telemetry: Arc<dyn Telemetry>,
    pub fluidics: Arc<dyn Fluidics>,
    pub stage: Arc<dyn Stage>,
    pub shutters: Arc<dyn Shutters>,
    pub recorder: Arc<dyn Recorder>,
    pub clock: Arc<dyn Clock>,
}

impl InstrumentHandles {
    /// Look up an actuator by name among the trap and auxiliary axes.
    pub fn actuator(&self, name: &str) -> Option<Arc<dyn Actuator>> {
        std::iter::once(&self.trap)
            .chain(self.auxiliary.iter())
            .find(|a| a.name() == name)
            .cloned()
    }
}

impl std::fmt::Debug for InstrumentHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentHandles")
            .field("trap", &self.trap.name())
            .field(
                "auxiliary",
                &self.auxiliary.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
