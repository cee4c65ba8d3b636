//! CLI type definitions
//!
//! Clap command structures for the `trapline` binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::config::ConfigArgs;
use super::commands::run::RunArgs;
use super::commands::validate::ValidateArgs;

#[derive(Parser, Debug)]
#[command(name = "trapline")]
#[command(about = "Trapline - closed-loop control for dual-trap force spectroscopy", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .trapline/config.yaml plus overrides)
    #[arg(short, long, global = true, env = "TRAPLINE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a protocol against the simulated instrument
    Run(RunArgs),

    /// Check configuration and protocol without actuating anything
    Validate(ValidateArgs),

    /// Inspect the resolved configuration
    Config(ConfigArgs),
}
