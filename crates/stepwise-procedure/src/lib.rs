//! Stepwise: editing model for battery test procedures.
//!
//! A procedure is an ordered list of steps (charge, discharge, rest, cycle
//! markers, impedance sweeps, ...) with type-dependent configuration, computed
//! goto targets and dependent sub-step conditions. This crate provides:
//!
//! - **Types**: closed enumerations with name and value coercion
//! - **Rules**: legal modes, end conditions, operators and reports per step type
//! - **Store**: row-keyed step map with sweep table, structural primitives and
//!   invariant checks
//! - **Goto**: sub-step re-linking and two-pass goto computation
//! - **Field**: per-column legal values and assignment with interactive or
//!   loading semantics
//! - **Edit**: transactional insert, delete, copy, paste, type change and
//!   sub-step operations
//! - **History**: snapshot undo/redo over edit commands
//! - **Serializer**: procedure files (delimited text or xlsx, step and sweep
//!   regions)
//! - **Render**: row projection for display collaborators
//! - **Session**: command surface with field-change intake, sweep editor hook
//!   and file persistence

pub mod config;
pub mod edit;
pub mod error;
pub mod field;
pub mod goto;
pub mod history;
pub mod render;
pub mod rules;
pub mod serializer;
pub mod session;
pub mod step;
pub mod store;
pub mod tabular;
pub mod types;

pub use config::{EditingConfig, EditorConfig, FormatConfig};
pub use edit::{Clipboard, TypeChange, BLOCK_SIZE};
pub use error::{ProcedureError, Result};
pub use field::{ApplyMode, Choices, FieldEffect, FieldOutcome, StepField};
pub use history::{CommandOutcome, EditCommand, History, Snapshot};
pub use render::{LegalNames, Renderer, RowRole, RowView};
pub use rules::LegalValues;
pub use session::{EditSession, FieldChange, SweepEditor};
pub use step::{Row, Step, SweepParameter};
pub use store::{Block, Orphan, ProcedureStore};
pub use tabular::SheetKind;
pub use types::{EndCondition, Mode, Operator, Report, StepEnum, StepType, SweepMode};
