//! Procedure model error types.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::field::StepField;

/// Errors produced by the procedure editing model.
#[derive(Debug, Error, Diagnostic)]
pub enum ProcedureError {
    /// A structural rule of the procedure would be broken; the operation was refused.
    #[error("invariant violation: {detail}")]
    #[diagnostic(code(stepwise::invariant))]
    InvariantViolation {
        /// What was refused and why.
        detail: String,
    },

    /// A raw field value could not be coerced into a legal value.
    #[error("cannot set {field} to '{value}': {reason}")]
    #[diagnostic(
        code(stepwise::field_coercion),
        help("the field keeps its previous value")
    )]
    FieldCoercion {
        /// Target field.
        field: StepField,
        /// Raw value as submitted.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The tabular document is unreadable or misses expected columns.
    #[error("malformed procedure table{}: {detail}", location_suffix(.row, .offset))]
    #[diagnostic(code(stepwise::format))]
    SerializationFormat {
        /// 1-based table row, when known.
        row: Option<usize>,
        /// Byte offset into the document, when known.
        offset: Option<usize>,
        /// Description of the problem.
        detail: String,
    },

    /// A cross-reference points at nothing (sweep without EIS step, unlinked sub-step).
    #[error("orphan reference: {detail}")]
    #[diagnostic(code(stepwise::orphan), severity(Warning))]
    OrphanReference {
        /// The dangling reference.
        detail: String,
    },

    /// Reading or writing a procedure file failed.
    #[error("cannot access {}: {source}", .path.display())]
    #[diagnostic(code(stepwise::io))]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The editor configuration is invalid.
    #[error("invalid configuration: {detail}")]
    #[diagnostic(code(stepwise::config))]
    Config {
        /// Description of the problem.
        detail: String,
    },
}

/// Result alias for procedure operations.
pub type Result<T> = std::result::Result<T, ProcedureError>;

impl ProcedureError {
    pub(crate) fn invariant(detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            detail: detail.into(),
        }
    }

    pub(crate) fn coercion(field: StepField, value: &str, reason: impl Into<String>) -> Self {
        Self::FieldCoercion {
            field,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn format(row: Option<usize>, detail: impl Into<String>) -> Self {
        Self::SerializationFormat {
            row,
            offset: None,
            detail: detail.into(),
        }
    }

    /// True for errors that leave the store untouched and only revert one field.
    pub fn is_field_local(&self) -> bool {
        matches!(self, Self::FieldCoercion { .. })
    }
}

fn location_suffix(row: &Option<usize>, offset: &Option<usize>) -> String {
    match (row, offset) {
        (Some(row), Some(offset)) => format!(" at row {row} (byte {offset})"),
        (Some(row), None) => format!(" at row {row}"),
        (None, Some(offset)) => format!(" at byte {offset}"),
        (None, None) => String::new(),
    }
}
