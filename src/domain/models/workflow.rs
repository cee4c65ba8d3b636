//! Trial outcomes and run summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::errors::{ControlError, GuardTag};

/// Kind of recorded data artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    FdCurve,
    Kymograph,
    ForceSequence,
}

/// A marker recorded on the instrument timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub label: String,
    pub kind: ArtifactKind,
    /// Export location, `None` when the marker was not exported.
    pub path: Option<PathBuf>,
}

/// Why a trial failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    BeadsLost,
    TetherLost,
    BudgetExhausted,
}

impl FailureReason {
    /// Tag for a recoverable error, `None` for fatal ones.
    pub fn from_error(err: &ControlError) -> Option<Self> {
        match err {
            ControlError::GuardViolation {
                tag: GuardTag::LostTracking,
                ..
            } => Some(Self::BeadsLost),
            ControlError::GuardViolation {
                tag: GuardTag::LostTether,
                ..
            } => Some(Self::TetherLost),
            ControlError::ConvergenceBudgetExhausted { .. } => Some(Self::BudgetExhausted),
            _ => None,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BeadsLost => "beads lost",
            Self::TetherLost => "tether lost",
            Self::BudgetExhausted => "budget exhausted",
        })
    }
}

/// Terminal outcome of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkflowResult {
    Success {
        trial: u32,
        artifacts: Vec<Artifact>,
    },
    Failed {
        trial: u32,
        reason: FailureReason,
        /// Step that raised the failure.
        stage: String,
        message: String,
        attempt: Option<u32>,
        /// Recordings exported before the failure.
        #[serde(default)]
        artifacts: Vec<Artifact>,
    },
}

impl WorkflowResult {
    pub fn trial(&self) -> u32 {
        match self {
            Self::Success { trial, .. } | Self::Failed { trial, .. } => *trial,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn artifacts(&self) -> &[Artifact] {
        match self {
            Self::Success { artifacts, .. } | Self::Failed { artifacts, .. } => artifacts,
        }
    }
}

/// What the orchestrator does after a recoverable trial failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Start a new trial while the trial budget lasts.
    #[default]
    Retry,
    /// Stop the run after the first failed trial.
    Abort,
}

/// Summary of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub protocol: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub trials: Vec<WorkflowResult>,
}

impl RunSummary {
    pub fn new(protocol: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            protocol: protocol.into(),
            started_at: now,
            finished_at: now,
            trials: Vec::new(),
        }
    }

    pub fn successes(&self) -> usize {
        self.trials.iter().filter(|t| t.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.trials.len() - self.successes()
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.trials.iter().flat_map(WorkflowResult::artifacts)
    }
}
