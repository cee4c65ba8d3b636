//! Deterministic simulated instrument.
//!
//! Runs in virtual time: moves and pauses advance the instrument clock
//! without sleeping, so whole trials complete in milliseconds.

mod instrument;
mod physics;

pub use instrument::{SimActuator, SimInstrument};
pub use physics::{SimCommand, SimState, TRAP_NAME};
