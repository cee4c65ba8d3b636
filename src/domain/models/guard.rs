//! Guard predicates evaluated on every loop iteration.

use serde::{Deserialize, Serialize};

use super::Signal;
use crate::domain::errors::GuardTag;

/// A minimum acceptable value for one signal.
///
/// Passes when the reading is greater than or equal to `min`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuardPredicate {
    pub signal: Signal,
    pub min: f64,
    pub tag: GuardTag,
}

impl GuardPredicate {
    /// Bead tracking guard for one bead.
    pub fn tracking(bead: u8, min_score: f64) -> Self {
        Self {
            signal: Signal::MatchScore { bead },
            min: min_score,
            tag: GuardTag::LostTracking,
        }
    }

    /// Tether presence guard on the force signal.
    pub fn tether(min_force: f64) -> Self {
        Self {
            signal: Signal::Force,
            min: min_force,
            tag: GuardTag::LostTether,
        }
    }

    pub fn holds(&self, reading: f64) -> bool {
        reading >= self.min
    }
}

/// Tracking guards for beads `1..=beads`.
pub fn tracking_guards(beads: u8, min_score: f64) -> Vec<GuardPredicate> {
    (1..=beads).map(|b| GuardPredicate::tracking(b, min_score)).collect()
}
