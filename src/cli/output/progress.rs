//! Progress display for runs in flight, driven by [`TrialEvent`]s.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::application::TrialEvent;
use crate::domain::models::WorkflowResult;

const PROGRESS_TEMPLATE: &str = "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}";
const PROGRESS_CHARS: &str = "█▓▒░ ";

/// Trial progress bar.
pub struct TrialProgress {
    bar: ProgressBar,
    successes: u64,
    failures: u64,
}

impl TrialProgress {
    /// Bar drawn to stderr with one tick per finished trial.
    pub fn new(max_trials: u32) -> Self {
        let bar = ProgressBar::new(u64::from(max_trials));
        bar.set_style(
            ProgressStyle::default_bar()
                .template(PROGRESS_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars(PROGRESS_CHARS),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self::from_bar(bar)
    }

    /// Bar that draws nothing, for JSON mode and tests.
    pub fn hidden(max_trials: u32) -> Self {
        Self::from_bar(ProgressBar::with_draw_target(
            Some(u64::from(max_trials)),
            ProgressDrawTarget::hidden(),
        ))
    }

    fn from_bar(bar: ProgressBar) -> Self {
        Self {
            bar,
            successes: 0,
            failures: 0,
        }
    }

    pub fn handle(&mut self, event: &TrialEvent) {
        match event {
            TrialEvent::Started { trial, max_trials } => {
                self.bar.set_length(u64::from(*max_trials));
                self.bar.set_message(format!("trial {trial}"));
            }
            TrialEvent::StepStarted { trial, step, name } => {
                self.bar.set_message(format!("trial {trial} step {step} {name}"));
            }
            TrialEvent::Finished(result) => {
                match result {
                    WorkflowResult::Success { .. } => self.successes += 1,
                    WorkflowResult::Failed { .. } => self.failures += 1,
                }
                self.bar.inc(1);
            }
        }
    }

    /// Consume events until every sender is dropped, then finish the bar.
    pub async fn follow(mut self, mut events: mpsc::UnboundedReceiver<TrialEvent>) -> (u64, u64) {
        while let Some(event) = events.recv().await {
            self.handle(&event);
        }
        self.finish()
    }

    fn finish(&self) -> (u64, u64) {
        let message = format!("{} succeeded, {} failed", self.successes, self.failures);
        if self.failures == 0 {
            self.bar.finish_with_message(format!("✓ {message}"));
        } else {
            self.bar.finish_with_message(format!("! {message}"));
        }
        (self.successes, self.failures)
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}
