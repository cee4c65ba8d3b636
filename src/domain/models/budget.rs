//! Attempt budgets for retryable procedures.

use serde::{Deserialize, Serialize};

/// A bounded attempt counter.
///
/// The budget is exhausted once the number of recorded attempts *exceeds*
/// `max_attempts`, so a budget of 15 allows 15 attempts and reports
/// exhaustion on the 16th.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptBudget {
    pub max_attempts: u32,
    #[serde(default, skip_serializing)]
    attempts: u32,
}

impl AttemptBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: 0,
        }
    }

    /// Record one attempt and return the new count.
    pub fn record(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts > self.max_attempts
    }

    /// A fresh copy with the counter reset.
    pub fn fresh(&self) -> Self {
        Self::new(self.max_attempts)
    }
}

impl Default for AttemptBudget {
    fn default() -> Self {
        Self::new(100)
    }
}
