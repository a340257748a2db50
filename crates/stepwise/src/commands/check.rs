//! Check command - structural checks and dangling references.

use std::path::PathBuf;

use miette::Result;
use stepwise_procedure::{EditSession, EditorConfig, Orphan, ProcedureError};

use crate::output::{
    print_json, CheckOutput, DiagnosticEntry, DiagnosticSeverity, DiagnosticSummary, OutputFormat,
};

/// Run the check command. Fails when the procedure cannot be loaded or
/// violates a structural rule; dangling references are reported as warnings.
pub fn run(file: PathBuf, format: OutputFormat, config: EditorConfig) -> Result<()> {
    tracing::info!("Checking {}", file.display());

    let mut diagnostics = Vec::new();
    match EditSession::open(&file, config) {
        Ok(session) => {
            let (structure, orphans) = session.check();
            if let Err(err) = structure {
                diagnostics.push(error_entry(&err));
            }
            diagnostics.extend(orphans.iter().map(orphan_entry));
        }
        Err(err @ ProcedureError::SerializationFormat { .. }) => {
            diagnostics.push(error_entry(&err));
        }
        Err(err) => return Err(err.into()),
    }

    let errors = diagnostics
        .iter()
        .filter(|d| d.severity == DiagnosticSeverity::Error)
        .count();
    let warnings = diagnostics.len() - errors;

    if format.is_json() {
        print_json(&CheckOutput {
            status: if errors == 0 { "ok" } else { "error" }.to_string(),
            file: file.display().to_string(),
            diagnostics,
            summary: DiagnosticSummary { errors, warnings },
        });
    } else {
        for diag in &diagnostics {
            let label = match diag.severity {
                DiagnosticSeverity::Error => "error",
                DiagnosticSeverity::Warning => "warning",
            };
            match diag.row {
                Some(row) => println!("{label}: row {row}: {}", diag.message),
                None => println!("{label}: {}", diag.message),
            }
        }
        if errors == 0 {
            println!("✓ {}: {} warning(s)", file.display(), warnings);
        }
    }

    if errors == 0 {
        Ok(())
    } else {
        Err(miette::miette!(
            "Check failed with {} error(s) in {}",
            errors,
            file.display()
        ))
    }
}

fn error_entry(err: &ProcedureError) -> DiagnosticEntry {
    let row = match err {
        ProcedureError::SerializationFormat { row, .. } => *row,
        _ => None,
    };
    DiagnosticEntry {
        severity: DiagnosticSeverity::Error,
        message: err.to_string(),
        row,
    }
}

fn orphan_entry(orphan: &Orphan) -> DiagnosticEntry {
    let row = match orphan {
        Orphan::SubStep { row } => Some(*row),
        Orphan::Sweep { .. } => None,
    };
    DiagnosticEntry {
        severity: DiagnosticSeverity::Warning,
        message: orphan.to_string(),
        row,
    }
}
