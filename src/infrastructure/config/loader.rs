use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::errors::ControlError;
use crate::domain::models::config::{Config, LoopTuning};

/// Project config file, created next to the experiment data.
pub const PROJECT_CONFIG: &str = ".trapline/config.yaml";
/// Optional per-machine overrides.
pub const LOCAL_CONFIG: &str = ".trapline/local.yaml";
/// Prefix of environment overrides; nested keys split on `__`.
pub const ENV_PREFIX: &str = "TRAPLINE_";

/// Configuration error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Invalid {name} loop: {reason}")]
    InvalidLoop { name: &'static str, reason: String },

    #[error("Invalid {field}: {value}. {expected}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

impl From<ConfigError> for ControlError {
    fn from(err: ConfigError) -> Self {
        Self::InvalidConfiguration(err.to_string())
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "Must be positive",
        })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "Cannot be negative",
        })
    }
}

fn probability(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "Must be between 0 and 1",
        })
    }
}

fn at_least_one(field: &'static str, value: u32) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::OutOfRange {
            field,
            value: 0.0,
            expected: "Must be at least 1",
        })
    } else {
        Ok(())
    }
}

fn non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::ValidationFailed(format!("{field} cannot be empty")))
    } else {
        Ok(())
    }
}

fn validate_loop(name: &'static str, tuning: &LoopTuning) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidLoop { name, reason };
    if !(tuning.tolerance.is_finite() && tuning.tolerance > 0.0) {
        return Err(invalid(format!(
            "tolerance must be positive, got {}",
            tuning.tolerance
        )));
    }
    if !(tuning.step.is_finite() && tuning.step > 0.0) {
        return Err(invalid(format!("step must be positive, got {}", tuning.step)));
    }
    if !(tuning.speed.is_finite() && tuning.speed >= 0.0) {
        return Err(invalid(format!("speed cannot be negative, got {}", tuning.speed)));
    }
    if tuning.poll_ms == 0 {
        return Err(invalid("poll_ms must be at least 1".to_string()));
    }
    if tuning.max_attempts == 0 {
        return Err(invalid("max_attempts must be at least 1".to_string()));
    }
    if let Some(secs) = tuning.max_elapsed_s {
        if !(secs.is_finite() && secs > 0.0) {
            return Err(invalid(format!("max_elapsed_s must be positive, got {secs}")));
        }
    }
    Ok(())
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .trapline/config.yaml (project config)
    /// 3. .trapline/local.yaml (local overrides, optional)
    /// 4. Environment variables (TRAPLINE_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(PROJECT_CONFIG))
            .merge(Yaml::file(LOCAL_CONFIG))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file; environment overrides still
    /// apply on top.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        let instrument = &config.instrument;
        for (field, value) in [
            ("instrument.bead_channel", &instrument.bead_channel),
            ("instrument.dna_channel", &instrument.dna_channel),
            ("instrument.buffer_channel", &instrument.buffer_channel),
            ("instrument.junction_channel", &instrument.junction_channel),
            ("instrument.protein_channel", &instrument.protein_channel),
        ] {
            non_empty(field, value)?;
        }
        if instrument.flow_channels.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "instrument.flow_channels cannot be empty".to_string(),
            ));
        }
        at_least_one("instrument.beads", u32::from(instrument.beads))?;
        non_negative("instrument.flow_wait_s", instrument.flow_wait_s)?;

        if !(config.guards.match_threshold > 0.0 && config.guards.match_threshold <= 100.0) {
            return Err(ConfigError::OutOfRange {
                field: "guards.match_threshold",
                value: config.guards.match_threshold,
                expected: "Must be in (0, 100]",
            });
        }

        validate_loop("distance", &config.motion.distance)?;
        validate_loop("force", &config.motion.force)?;

        let catching = &config.catching;
        non_negative("catching.pressure", catching.pressure)?;
        positive("catching.clear_interval_s", catching.clear_interval_s)?;
        at_least_one("catching.max_cycles", catching.max_cycles)?;
        if catching.poll_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "catching.poll_ms",
                value: 0.0,
                expected: "Must be at least 1",
            });
        }

        let fishing = &config.fishing;
        positive("fishing.min_distance", fishing.min_distance)?;
        positive("fishing.force_threshold", fishing.force_threshold)?;
        non_negative("fishing.speed", fishing.speed)?;
        positive("fishing.measure_s", fishing.measure_s)?;
        at_least_one("fishing.max_attempts", fishing.max_attempts)?;
        if fishing.max_distance <= fishing.min_distance {
            return Err(ConfigError::ValidationFailed(format!(
                "fishing.max_distance ({}) must exceed fishing.min_distance ({})",
                fishing.max_distance, fishing.min_distance
            )));
        }

        let tether = &config.tether;
        positive("tether.length", tether.length)?;
        non_negative("tether.lost_threshold", tether.lost_threshold)?;
        positive("tether.multiple_tether_force", tether.multiple_tether_force)?;
        non_negative("tether.single_tether_force", tether.single_tether_force)?;
        at_least_one("tether.break_retries", tether.break_retries)?;
        positive("tether.measure_s", tether.measure_s)?;

        non_empty("recording.experiment_name", &config.recording.experiment_name)?;
        non_empty("recording.extension", &config.recording.extension)?;
        if let Some(dir) = &config.recording.export_dir {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "recording.export_dir cannot be empty; omit it to disable exports".to_string(),
                ));
            }
        }

        let run = &config.run;
        at_least_one("run.max_trials", run.max_trials)?;
        if let Some(required) = run.required_successes {
            if required == 0 || required > run.max_trials {
                return Err(ConfigError::ValidationFailed(format!(
                    "run.required_successes ({required}) must be between 1 and run.max_trials ({})",
                    run.max_trials
                )));
            }
        }

        let sim = &config.simulator;
        if sim.sample_interval_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "simulator.sample_interval_ms",
                value: 0.0,
                expected: "Must be at least 1",
            });
        }
        let (low, high) = sim.rupture_force;
        if !(low > 0.0 && low <= high) {
            return Err(ConfigError::ValidationFailed(format!(
                "simulator.rupture_force ({low}, {high}) must be positive and ordered"
            )));
        }
        probability("simulator.good_bead_fraction", sim.good_bead_fraction)?;
        probability(
            "simulator.tether_capture_probability",
            sim.tether_capture_probability,
        )?;
        probability(
            "simulator.multiple_tether_probability",
            sim.multiple_tether_probability,
        )?;
        non_negative("simulator.bead_catch_rate", sim.bead_catch_rate)?;
        non_negative("simulator.bead_loss_rate", sim.bead_loss_rate)?;
        non_negative("simulator.force_noise", sim.force_noise)?;
        non_negative("simulator.distance_noise", sim.distance_noise)?;
        positive("simulator.tether_stiffness", sim.tether_stiffness)?;

        if let Some(protocol) = &config.protocol {
            protocol
                .validate()
                .map_err(|err| ConfigError::ValidationFailed(err.to_string()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::FailurePolicy;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.instrument.flow_channels, vec![1, 2, 3, 4, 6]);
        assert!((config.tether.length - 16.0).abs() < f64::EPSILON);
        assert_eq!(config.run.on_failure, FailurePolicy::Retry);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
logging:
  level: debug
  format: json
motion:
  force:
    tolerance: 0.5
    step: 0.02
    speed: 1.0
    poll_ms: 100
    max_attempts: 200
run:
  max_trials: 3
  on_failure: abort
recording:
  experiment_name: lambda
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.motion.force.max_attempts, 200);
        assert!((config.motion.distance.tolerance - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.run.on_failure, FailurePolicy::Abort);
        assert_eq!(config.recording.experiment_name, "lambda");
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_zero_tolerance() {
        let mut config = Config::default();
        config.motion.force.tolerance = 0.0;

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLoop { name: "force", .. }
        ));
    }

    #[test]
    fn test_validate_fishing_range() {
        let mut config = Config::default();
        config.fishing.max_distance = config.fishing.min_distance;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::ValidationFailed(_)
        ));
    }

    #[test]
    fn test_validate_required_successes_within_budget() {
        let mut config = Config::default();
        config.run.max_trials = 2;
        config.run.required_successes = Some(3);
        assert!(ConfigLoader::validate(&config).is_err());
        config.run.required_successes = Some(2);
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_probability_range() {
        let mut config = Config::default();
        config.simulator.tether_capture_probability = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::OutOfRange {
                field: "simulator.tether_capture_probability",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_empty_export_dir() {
        let mut config = Config::default();
        config.recording.export_dir = Some(std::path::PathBuf::new());
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::ValidationFailed(_)
        ));
    }

    #[test]
    fn test_config_error_is_invalid_configuration() {
        let err: ControlError = ConfigError::InvalidRotation("weekly".into()).into();
        assert!(matches!(err, ControlError::InvalidConfiguration(ref m) if m.contains("weekly")));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "run:\n  max_trials: 4\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "run:\n  max_trials: 8\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.run.max_trials, 8, "Override should win");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
    }
}
