//! `trapline run`: execute a protocol against the simulated instrument.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use super::{load_config, resolve_protocol, ProtocolArgs};
use crate::application::WorkflowOrchestrator;
use crate::cli::output::{output, CommandOutput, TableFormatter, TrialProgress};
use crate::domain::models::{Config, FailurePolicy, RunSummary};
use crate::infrastructure::simulator::SimInstrument;

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub protocol: ProtocolArgs,

    /// Simulator seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Maximum number of trials
    #[arg(long)]
    pub max_trials: Option<u32>,

    /// Stop after the first failed trial
    #[arg(long)]
    pub abort_on_failure: bool,

    /// Directory for exported recordings
    #[arg(long)]
    pub export_dir: Option<PathBuf>,

    /// Experiment name used in artifact labels
    #[arg(long)]
    pub experiment: Option<String>,
}

impl RunArgs {
    /// Fold command-line overrides into `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(seed) = self.seed {
            config.simulator.seed = seed;
        }
        if let Some(max_trials) = self.max_trials {
            config.run.max_trials = max_trials;
        }
        if self.abort_on_failure {
            config.run.on_failure = FailurePolicy::Abort;
        }
        if let Some(dir) = &self.export_dir {
            config.recording.export_dir = Some(dir.clone());
        }
        if let Some(name) = &self.experiment {
            config.recording.experiment_name.clone_from(name);
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub summary: RunSummary,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let summary = &self.summary;
        let formatter = TableFormatter::new();
        let mut out = format!(
            "Run {} ({})\n{}\n",
            summary.run_id,
            summary.protocol,
            formatter.format_trials(summary)
        );
        if summary.artifacts().next().is_some() {
            out.push_str(&formatter.format_artifacts(summary));
            out.push('\n');
        }
        out.push_str(&format!(
            "{} trial(s): {} succeeded, {} failed",
            summary.trials.len(),
            summary.successes(),
            summary.failures()
        ));
        out
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "summary": self.summary,
            "successes": self.summary.successes(),
            "failures": self.summary.failures(),
        })
    }
}

pub async fn execute(args: RunArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let mut config = load_config(config_path)?;
    args.apply(&mut config);
    let protocol = resolve_protocol(&args.protocol, &config)?;
    let summary = run_simulated(config, &protocol, !json_mode).await?;
    output(&RunOutput { summary }, json_mode);
    Ok(())
}

/// Build a simulated instrument from `config` and run `protocol` on it.
pub async fn run_simulated(
    config: Config,
    protocol: &crate::domain::models::Protocol,
    show_progress: bool,
) -> Result<RunSummary> {
    let max_trials = config.run.max_trials;
    let sim = SimInstrument::new(&config);
    let (tx, rx) = mpsc::unbounded_channel();
    let orchestrator = WorkflowOrchestrator::new(sim.handles().await, config)?.with_events(tx);

    let progress = if show_progress {
        TrialProgress::new(max_trials)
    } else {
        TrialProgress::hidden(max_trials)
    };
    let watcher = tokio::spawn(progress.follow(rx));

    let result = orchestrator.run(protocol).await;
    // Closes the event channel so the watcher can finish.
    drop(orchestrator);
    let _ = watcher.await;

    Ok(result?)
}
