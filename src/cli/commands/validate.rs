//! `trapline validate`: check config and protocol without touching hardware.

use anyhow::Result;
use clap::Args;
use console::style;
use serde::Serialize;
use std::path::Path;

use super::{load_config, resolve_protocol, ProtocolArgs};
use crate::cli::output::{output, CommandOutput};
use crate::infrastructure::config::ConfigLoader;

#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub protocol: ProtocolArgs,
}

#[derive(Debug, Serialize)]
pub struct ValidateOutput {
    pub protocol: String,
    pub steps: Vec<&'static str>,
    pub max_trials: u32,
}

impl CommandOutput for ValidateOutput {
    fn to_human(&self) -> String {
        let mut out = format!(
            "{} configuration and protocol '{}' are valid ({} trial(s))\n",
            style("✓").green(),
            self.protocol,
            self.max_trials
        );
        for (index, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("  {:>2}. {step}\n", index + 1));
        }
        out.trim_end().to_string()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "valid": true,
            "protocol": self.protocol,
            "steps": self.steps,
            "max_trials": self.max_trials,
        })
    }
}

pub async fn execute(args: ValidateArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let result = check(&args, config_path)?;
    output(&result, json_mode);
    Ok(())
}

pub fn check(args: &ValidateArgs, config_path: Option<&Path>) -> Result<ValidateOutput> {
    let config = load_config(config_path)?;
    ConfigLoader::validate(&config)?;
    let protocol = resolve_protocol(&args.protocol, &config)?;
    protocol.validate()?;

    Ok(ValidateOutput {
        steps: protocol.steps.iter().map(|step| step.name()).collect(),
        protocol: protocol.name,
        max_trials: config.run.max_trials,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_check_preset() {
        let file = config_file("run:\n  max_trials: 3\n");
        let args = ValidateArgs {
            protocol: ProtocolArgs {
                preset: Some("kymograph".into()),
                protocol: None,
            },
        };
        let result = check(&args, Some(file.path())).unwrap();
        assert_eq!(result.protocol, "kymograph");
        assert_eq!(result.max_trials, 3);
        assert_eq!(result.steps.first(), Some(&"catch_beads"));
    }

    #[test]
    fn test_check_rejects_bad_tolerance() {
        let file = config_file("motion:\n  force:\n    tolerance: -1.0\n");
        let err = check(&ValidateArgs::default(), Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("force"));
    }
}
