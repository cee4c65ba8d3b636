//! Table output formatting for CLI commands
//!
//! Renders run summaries with comfy-table. Colors are dropped when the
//! terminal does not want them.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use crate::domain::models::{ArtifactKind, RunSummary, WorkflowResult};

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
    /// Maximum width for tables (None = auto)
    max_width: Option<usize>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub fn with_config(use_colors: bool, max_width: Option<usize>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// One row per trial.
    pub fn format_trials(&self, summary: &RunSummary) -> String {
        let mut table = self.create_base_table();
        table.set_header(vec![
            Cell::new("Trial").add_attribute(Attribute::Bold),
            Cell::new("Outcome").add_attribute(Attribute::Bold),
            Cell::new("Stage").add_attribute(Attribute::Bold),
            Cell::new("Detail").add_attribute(Attribute::Bold),
        ]);

        for result in &summary.trials {
            let (outcome, stage, detail) = match result {
                WorkflowResult::Success { artifacts, .. } => (
                    "success".to_string(),
                    String::from("-"),
                    format!("{} artifact(s)", artifacts.len()),
                ),
                WorkflowResult::Failed {
                    reason,
                    stage,
                    message,
                    ..
                } => (reason.to_string(), stage.clone(), truncate_text(message, 60)),
            };
            let outcome_cell = if self.use_colors {
                Cell::new(&outcome).fg(outcome_color(result))
            } else {
                Cell::new(format!("{} {outcome}", outcome_icon(result)))
            };
            table.add_row(vec![
                Cell::new(result.trial()),
                outcome_cell,
                Cell::new(stage),
                Cell::new(detail),
            ]);
        }

        table.to_string()
    }

    /// Every recorded artifact with its export path.
    pub fn format_artifacts(&self, summary: &RunSummary) -> String {
        let mut table = self.create_base_table();
        table.set_header(vec![
            Cell::new("Label").add_attribute(Attribute::Bold),
            Cell::new("Kind").add_attribute(Attribute::Bold),
            Cell::new("Path").add_attribute(Attribute::Bold),
        ]);
        for artifact in summary.artifacts() {
            let path = artifact
                .path
                .as_ref()
                .map_or_else(|| "-".to_string(), |p| p.display().to_string());
            table.add_row(vec![
                Cell::new(&artifact.label),
                Cell::new(kind_label(artifact.kind)),
                Cell::new(path),
            ]);
        }
        table.to_string()
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if let Some(width) = self.max_width {
            table.set_width(width as u16);
        }
        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

fn outcome_color(result: &WorkflowResult) -> Color {
    if result.is_success() {
        Color::Green
    } else {
        Color::Yellow
    }
}

fn outcome_icon(result: &WorkflowResult) -> &'static str {
    if result.is_success() {
        "✓"
    } else {
        "✗"
    }
}

fn kind_label(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::FdCurve => "fd-curve",
        ArtifactKind::Kymograph => "kymograph",
        ArtifactKind::ForceSequence => "force-sequence",
    }
}

fn truncate_text(text: &str, max_len: usize) -> String {
    super::truncate(text, max_len)
}
