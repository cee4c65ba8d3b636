//! `trapline config`: inspect the resolved configuration.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::path::Path;

use super::load_config;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::{ENV_PREFIX, LOCAL_CONFIG, PROJECT_CONFIG};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the merged configuration
    Show,
    /// Print where configuration is read from
    Sources,
}

#[derive(Debug, Serialize)]
pub struct ConfigShowOutput {
    pub config: Config,
}

impl CommandOutput for ConfigShowOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config).unwrap_or_default()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigSourcesOutput {
    pub files: Vec<(String, bool)>,
    pub env_prefix: &'static str,
}

impl CommandOutput for ConfigSourcesOutput {
    fn to_human(&self) -> String {
        let mut out = String::from("Configuration sources (lowest to highest precedence):\n  defaults\n");
        for (path, present) in &self.files {
            let marker = if *present { "found" } else { "missing" };
            out.push_str(&format!("  {path} ({marker})\n"));
        }
        out.push_str(&format!("  environment: {}* (nested keys split on __)", self.env_prefix));
        out
    }

    fn to_json(&self) -> serde_json::Value {
        let files: Vec<_> = self
            .files
            .iter()
            .map(|(path, present)| serde_json::json!({ "path": path, "present": present }))
            .collect();
        serde_json::json!({ "files": files, "env_prefix": self.env_prefix })
    }
}

pub async fn execute(args: ConfigArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    match args.command {
        ConfigCommand::Show => {
            let config = load_config(config_path).context("Failed to resolve configuration")?;
            output(&ConfigShowOutput { config }, json_mode);
        }
        ConfigCommand::Sources => output(&sources(config_path), json_mode),
    }
    Ok(())
}

fn sources(config_path: Option<&Path>) -> ConfigSourcesOutput {
    let paths: Vec<String> = match config_path {
        Some(path) => vec![path.display().to_string()],
        None => vec![PROJECT_CONFIG.to_string(), LOCAL_CONFIG.to_string()],
    };
    ConfigSourcesOutput {
        files: paths
            .into_iter()
            .map(|path| {
                let present = Path::new(&path).exists();
                (path, present)
            })
            .collect(),
        env_prefix: ENV_PREFIX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_renders_yaml_sections() {
        let out = ConfigShowOutput {
            config: Config::default(),
        };
        let human = out.to_human();
        assert!(human.contains("motion:"));
        assert!(human.contains("fishing:"));
        assert_eq!(out.to_json()["run"]["max_trials"], 5);
    }

    #[test]
    fn test_sources_with_explicit_file() {
        let out = sources(Some(Path::new("/nonexistent/trapline.yaml")));
        assert_eq!(out.files, vec![("/nonexistent/trapline.yaml".to_string(), false)]);
        assert!(out.to_human().contains("TRAPLINE_*"));
    }
}
