//! Structured output types for machine-readable CLI responses.
//!
//! When `--format json` is specified, commands emit these types as JSON
//! instead of human-readable text.

use serde::Serialize;
use stepwise_procedure::{Renderer, Row, RowRole, RowView, StepField, SweepParameter};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }

    pub fn is_json(self) -> bool {
        self == OutputFormat::Json
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

/// A single diagnostic message.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEntry {
    pub severity: DiagnosticSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
}

/// Summary of diagnostic counts.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticSummary {
    pub errors: usize,
    pub warnings: usize,
}

/// Output from the check command.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutput {
    pub status: String,
    pub file: String,
    pub diagnostics: Vec<DiagnosticEntry>,
    pub summary: DiagnosticSummary,
}

/// Output from the show command.
#[derive(Debug, Clone, Serialize)]
pub struct ShowOutput<'a> {
    pub file: String,
    pub steps: Vec<RowView>,
    pub sweeps: Vec<&'a SweepParameter>,
}

/// Print a serializable value as JSON to stdout.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize JSON: {}", e),
    }
}

// ---------------------------------------------------------------------------
//  Text table
// ---------------------------------------------------------------------------

/// Collects rendered rows and lays them out as an aligned table.
#[derive(Default)]
pub struct TableRenderer {
    rows: Vec<Vec<String>>,
}

impl Renderer for TableRenderer {
    fn display(&mut self, row: Row, view: &RowView) {
        let mut cells = vec![row.to_string()];
        for field in StepField::ALL {
            let text = view.cell(field);
            let text = match (field, view.role) {
                (StepField::Type, RowRole::SubStep) => format!("  {text}"),
                (StepField::Type, RowRole::Placeholder) => "(new)".to_string(),
                _ => text.to_string(),
            };
            cells.push(text);
        }
        if view.unlinked {
            cells.push("unlinked".to_string());
        }
        self.rows.push(cells);
    }
}

impl TableRenderer {
    /// Table text, one line per row, headed by the column names.
    pub fn finish(self) -> Vec<String> {
        let mut header = vec!["Row".to_string()];
        header.extend(StepField::ALL.iter().map(|f| f.header().to_string()));

        let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
        for cells in &self.rows {
            for (i, cell) in cells.iter().enumerate().take(widths.len()) {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        let line = |cells: &[String]| {
            let padded: Vec<String> = cells
                .iter()
                .enumerate()
                .map(|(i, cell)| match widths.get(i) {
                    Some(width) => format!("{cell:<width$}"),
                    None => cell.clone(),
                })
                .collect();
            padded.join("  ").trim_end().to_string()
        };

        let mut lines = vec![line(header.as_slice())];
        lines.push("-".repeat(lines[0].chars().count()));
        lines.extend(self.rows.iter().map(|cells| line(cells.as_slice())));
        lines
    }
}
