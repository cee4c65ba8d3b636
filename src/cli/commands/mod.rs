//! CLI command implementations.

pub mod config;
pub mod run;
pub mod validate;

use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

use crate::domain::models::{Config, Protocol, PRESETS};
use crate::infrastructure::config::ConfigLoader;

/// Preset used when neither the command line nor the config names a protocol.
pub const DEFAULT_PRESET: &str = "fd-curves";

/// Protocol selection shared by `run` and `validate`.
#[derive(Args, Debug, Clone, Default)]
pub struct ProtocolArgs {
    /// Built-in protocol (kymograph, fd-curves, force-sequence)
    #[arg(short, long, conflicts_with = "protocol")]
    pub preset: Option<String>,

    /// YAML protocol file
    #[arg(long)]
    pub protocol: Option<PathBuf>,
}

/// Layered configuration, or a single file when `path` is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Protocol from a file, a preset, the config's `protocol` section or the
/// default preset, in that order.
pub fn resolve_protocol(args: &ProtocolArgs, config: &Config) -> Result<Protocol> {
    if let Some(path) = &args.protocol {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read protocol file {}", path.display()))?;
        return serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse protocol file {}", path.display()));
    }
    if let Some(name) = &args.preset {
        return preset(name, config);
    }
    if let Some(protocol) = &config.protocol {
        return Ok(protocol.clone());
    }
    preset(DEFAULT_PRESET, config)
}

fn preset(name: &str, config: &Config) -> Result<Protocol> {
    match Protocol::preset(name, config) {
        Some(protocol) => Ok(protocol),
        None => bail!("Unknown preset '{name}'. Available: {}", PRESETS.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_resolve_defaults_to_fd_curves() {
        let config = Config::default();
        let protocol = resolve_protocol(&ProtocolArgs::default(), &config).unwrap();
        assert_eq!(protocol.name, "fd-curves");
    }

    #[test]
    fn test_resolve_unknown_preset() {
        let args = ProtocolArgs {
            preset: Some("bogus".into()),
            protocol: None,
        };
        let err = resolve_protocol(&args, &Config::default()).unwrap_err();
        assert!(err.to_string().contains("Unknown preset 'bogus'"));
    }

    #[test]
    fn test_resolve_protocol_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r"name: hold
steps:
  - step: catch_beads
  - step: pause
    seconds: 2.0
"
        )
        .unwrap();
        let args = ProtocolArgs {
            preset: None,
            protocol: Some(file.path().to_path_buf()),
        };
        let protocol = resolve_protocol(&args, &Config::default()).unwrap();
        assert_eq!(protocol.name, "hold");
        assert_eq!(protocol.steps.len(), 2);
    }
}
