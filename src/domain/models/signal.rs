//! Telemetry signal identifiers and samples.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A measured channel exposed by the instrument timeline.
///
/// Beads are numbered from 1, matching the tracking overlay numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// Bead-to-bead distance in µm.
    Distance,
    /// Low-frequency force on the detection trap in pN.
    Force,
    /// Template match score of a tracked bead, 0-100.
    MatchScore { bead: u8 },
    /// Tracked x position of a bead in µm.
    BeadPosition { bead: u8 },
}

impl Signal {
    /// Physical unit of the signal, for log output.
    pub fn unit(&self) -> &'static str {
        match self {
            Self::Distance | Self::BeadPosition { .. } => "µm",
            Self::Force => "pN",
            Self::MatchScore { .. } => "%",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Distance => write!(f, "distance"),
            Self::Force => write!(f, "force"),
            Self::MatchScore { bead } => write!(f, "match score (bead {bead})"),
            Self::BeadPosition { bead } => write!(f, "bead {bead} position"),
        }
    }
}

/// One timestamped telemetry value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Instrument time since the timeline started.
    pub time: Duration,
    pub value: f64,
}

impl Sample {
    pub fn new(time: Duration, value: f64) -> Self {
        Self { time, value }
    }
}

/// Arithmetic mean of a sample window, `None` when the window is empty.
pub fn window_mean(samples: &[Sample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64)
}

/// Largest value in a sample window, `None` when the window is empty.
pub fn window_max(samples: &[Sample]) -> Option<f64> {
    samples.iter().map(|s| s.value).reduce(f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_mean_and_max() {
        let samples = vec![
            Sample::new(Duration::from_millis(0), 1.0),
            Sample::new(Duration::from_millis(10), 3.0),
            Sample::new(Duration::from_millis(20), 2.0),
        ];
        assert!((window_mean(&samples).unwrap() - 2.0).abs() < f64::EPSILON);
        assert!((window_max(&samples).unwrap() - 3.0).abs() < f64::EPSILON);
        assert!(window_mean(&[]).is_none());
        assert!(window_max(&[]).is_none());
    }

    #[test]
    fn test_signal_yaml_shape() {
        let signal: Signal = serde_yaml::from_str("match_score:\n  bead: 2\n").unwrap();
        assert_eq!(signal, Signal::MatchScore { bead: 2 });
        let signal: Signal = serde_yaml::from_str("force").unwrap();
        assert_eq!(signal, Signal::Force);
        assert_eq!(Signal::Force.unit(), "pN");
    }
}
