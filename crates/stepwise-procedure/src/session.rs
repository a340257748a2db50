//! Editing session: the command surface used by front ends.
//!
//! A session owns the procedure, its undo history, the clipboard and the file
//! it was loaded from. Commands take the cursor row; field edits arrive through
//! [`EditSession::on_field_changed`] and are reverted rather than failed when
//! the value cannot be coerced.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::EditorConfig;
use crate::edit::{Clipboard, TypeChange};
use crate::error::{ProcedureError, Result};
use crate::field::{FieldEffect, FieldOutcome, StepField};
use crate::history::{CommandOutcome, EditCommand, History};
use crate::render::{self, Renderer, RowView};
use crate::serializer;
use crate::step::{Row, Step, SweepParameter};
use crate::store::{Orphan, ProcedureStore};
use crate::types::{StepEnum, StepType};

/// Collaborator that edits the sweep parameters of an EIS step.
pub trait SweepEditor {
    /// Return the new parameters, or `None` when the user cancels.
    fn edit(&mut self, step_number: u32, existing: Option<&SweepParameter>)
        -> Option<SweepParameter>;
}

/// Result of a field edit.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    Applied(FieldOutcome),
    /// The value was rejected; the cell shows its previous value.
    Reverted { reason: String },
}

/// An open procedure.
pub struct EditSession {
    store: ProcedureStore,
    history: History,
    clipboard: Option<Clipboard>,
    config: EditorConfig,
    path: Option<PathBuf>,
    modified: bool,
    sweep_editor: Option<Box<dyn SweepEditor>>,
}

impl EditSession {
    /// New procedure, seeded with a rest step when configured.
    pub fn new(config: EditorConfig) -> Self {
        let mut store = ProcedureStore::new();
        if config.editor.seed_new_procedure {
            store.steps.insert(0, Step::seed());
            store.steps.insert(2, Step::blank());
            store.normalize();
        }
        Self::from_store(store, config)
    }

    pub fn from_store(store: ProcedureStore, config: EditorConfig) -> Self {
        Self {
            store,
            history: History::with_limit(config.editor.history_limit),
            clipboard: None,
            config,
            path: None,
            modified: false,
            sweep_editor: None,
        }
    }

    /// Load a procedure file.
    pub fn open(path: impl AsRef<Path>, config: EditorConfig) -> Result<Self> {
        let mut session = Self::from_store(ProcedureStore::new(), config);
        session.load(path)?;
        Ok(session)
    }

    pub fn set_sweep_editor(&mut self, editor: Box<dyn SweepEditor>) {
        self.sweep_editor = Some(editor);
    }

    pub fn store(&self) -> &ProcedureStore {
        &self.store
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn clipboard(&self) -> Option<&Clipboard> {
        self.clipboard.as_ref()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // -----------------------------------------------------------------------
    //  Commands
    // -----------------------------------------------------------------------

    fn run(&mut self, command: EditCommand) -> Result<CommandOutcome> {
        let recorded = self.history.recorded();
        let outcome = self.history.execute(&mut self.store, command)?;
        self.modified |= self.history.recorded() != recorded;
        Ok(outcome)
    }

    pub fn insert_step_block(&mut self, cursor: Row) -> Result<Row> {
        match self.run(EditCommand::InsertStepBlock { anchor: cursor })? {
            CommandOutcome::Inserted(row) => Ok(row),
            other => Err(unexpected(other)),
        }
    }

    pub fn delete_step_block(&mut self, cursor: Row) -> Result<Row> {
        match self.run(EditCommand::DeleteStepBlock { row: cursor })? {
            CommandOutcome::Deleted(row) => Ok(row),
            other => Err(unexpected(other)),
        }
    }

    /// Copy the block under the cursor to the clipboard.
    pub fn copy_block(&mut self, cursor: Row) -> Result<()> {
        let clipboard = self.store.copy_block(cursor)?;
        debug!(row = cursor, subs = clipboard.subs.len(), "copied block");
        self.clipboard = Some(clipboard);
        Ok(())
    }

    /// Paste the clipboard above the block under the cursor.
    pub fn paste_block(&mut self, cursor: Row) -> Result<Row> {
        let clipboard = self
            .clipboard
            .clone()
            .ok_or_else(|| ProcedureError::invariant("the clipboard is empty"))?;
        let command = EditCommand::PasteBlock {
            target: cursor,
            clipboard,
            with_subs: self.config.editor.paste_sub_steps,
        };
        match self.run(command)? {
            CommandOutcome::Inserted(row) => Ok(row),
            other => Err(unexpected(other)),
        }
    }

    pub fn add_sub_step(&mut self, cursor: Row) -> Result<Row> {
        match self.run(EditCommand::AddSubStep { row: cursor })? {
            CommandOutcome::Inserted(row) => Ok(row),
            other => Err(unexpected(other)),
        }
    }

    /// Change a step's type. A step that becomes EIS asks the sweep editor
    /// for its parameters; type and sweep are undone together.
    pub fn change_step_type(&mut self, row: Row, step_type: StepType) -> Result<TypeChange> {
        let sweep = self.request_sweep(row, step_type);
        match self.run(EditCommand::ChangeStepType {
            row,
            step_type,
            sweep,
        })? {
            CommandOutcome::TypeChanged(change) => Ok(change),
            other => Err(unexpected(other)),
        }
    }

    /// Parameters for a main step about to become EIS without a sweep.
    fn request_sweep(&mut self, row: Row, step_type: StepType) -> Option<SweepParameter> {
        if step_type != StepType::Eis || self.store.sweep(row).is_some() {
            return None;
        }
        let step_number = self
            .store
            .get(row)
            .filter(|step| step.is_main())?
            .step_number
            .unwrap_or(0);
        let Some(editor) = self.sweep_editor.as_mut() else {
            debug!(row, "no sweep editor; parameters left unset");
            return None;
        };
        let sweep = editor.edit(step_number, None);
        if sweep.is_none() {
            debug!(row, "sweep editing cancelled");
        }
        sweep
    }

    /// Ask the sweep editor for the parameters of the EIS step at `row`.
    /// Returns false when no editor is set or the user cancelled.
    pub fn configure_sweep(&mut self, row: Row) -> Result<bool> {
        let step_number = match self.store.get(row) {
            Some(step) if step.step_type == Some(StepType::Eis) => step.step_number.unwrap_or(0),
            _ => {
                return Err(ProcedureError::invariant(format!(
                    "row {row} is not an EIS step"
                )));
            }
        };
        let Some(editor) = self.sweep_editor.as_mut() else {
            debug!(row, "no sweep editor; parameters left unset");
            return Ok(false);
        };
        let Some(sweep) = editor.edit(step_number, self.store.sweep(row)) else {
            debug!(row, "sweep editing cancelled");
            return Ok(false);
        };
        self.attach_sweep(row, sweep)?;
        Ok(true)
    }

    pub fn attach_sweep(&mut self, row: Row, sweep: SweepParameter) -> Result<()> {
        self.run(EditCommand::AttachSweep { row, sweep })?;
        Ok(())
    }

    /// Apply a cell edit. Values that cannot be coerced revert the cell and
    /// are reported, not returned as errors; refused edits are errors.
    pub fn on_field_changed(
        &mut self,
        row: Row,
        field: StepField,
        raw: &str,
    ) -> Result<FieldChange> {
        if self.store.get(row).is_none() {
            return Err(ProcedureError::invariant(format!("no step at row {row}")));
        }
        let result = if field == StepField::Type {
            self.type_cell_changed(row, raw)
        } else {
            let command = EditCommand::SetField {
                row,
                field,
                value: raw.to_string(),
            };
            self.run(command).and_then(|outcome| match outcome {
                CommandOutcome::Field(outcome) => Ok(outcome),
                other => Err(unexpected(other)),
            })
        };
        match result {
            Ok(outcome) => Ok(FieldChange::Applied(outcome)),
            Err(err) if err.is_field_local() => {
                warn!(row, %field, value = raw, error = %err, "field reverted");
                Ok(FieldChange::Reverted {
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    fn type_cell_changed(&mut self, row: Row, raw: &str) -> Result<FieldOutcome> {
        let field = StepField::Type;
        let raw = raw.trim();
        let new_type = StepType::coerce(raw)
            .ok_or_else(|| ProcedureError::coercion(field, raw, "unknown step type"))?;
        let is_sub = self.store.get(row).is_some_and(Step::is_sub);
        let set = FieldOutcome {
            effect: FieldEffect::Set,
            open_sub_condition: false,
        };
        match (is_sub, new_type == StepType::Sub) {
            (true, true) => Ok(set),
            (true, false) => Err(ProcedureError::coercion(
                field,
                raw,
                "a sub-step keeps its type",
            )),
            (false, true) => Err(ProcedureError::coercion(
                field,
                raw,
                "a main step cannot become a sub-step",
            )),
            (false, false) => {
                self.change_step_type(row, new_type)?;
                Ok(set)
            }
        }
    }

    pub fn undo(&mut self) -> bool {
        let done = self.history.undo(&mut self.store);
        self.modified |= done;
        done
    }

    pub fn redo(&mut self) -> bool {
        let done = self.history.redo(&mut self.store);
        self.modified |= done;
        done
    }

    // -----------------------------------------------------------------------
    //  Display and checks
    // -----------------------------------------------------------------------

    pub fn render(&self, renderer: &mut dyn Renderer) {
        render::render_all(&self.store, renderer);
    }

    pub fn row_view(&self, row: Row) -> Option<RowView> {
        render::project(&self.store, row)
    }

    /// Structural check plus the list of dangling references.
    pub fn check(&self) -> (Result<()>, Vec<Orphan>) {
        (self.store.check_invariants(), self.store.orphans())
    }

    // -----------------------------------------------------------------------
    //  Persistence
    // -----------------------------------------------------------------------

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serializer::save(&self.store, &self.config.format)
    }

    /// Save to the file the session was opened from or last saved to.
    pub fn save(&mut self) -> Result<PathBuf> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| ProcedureError::invariant("the procedure has no file name yet"))?;
        self.save_as(&path)?;
        Ok(path)
    }

    /// Encode the whole procedure, then replace `path` in one step. An
    /// `.xlsx` path is written as a workbook, anything else as delimited text.
    pub fn save_as(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = serializer::save_sheet(&self.store, self.config.format.sheet_for(path))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "procedure".to_string());
        let staging = path.with_file_name(format!(".{file_name}.tmp"));
        let io = |source| ProcedureError::Io {
            path: path.to_path_buf(),
            source,
        };
        std::fs::write(&staging, &bytes).map_err(io)?;
        std::fs::rename(&staging, path).map_err(io)?;

        info!(path = %path.display(), bytes = bytes.len(), "procedure saved");
        self.path = Some(path.to_path_buf());
        self.modified = false;
        Ok(())
    }

    /// Replace the procedure with the contents of `path`. On error the current
    /// procedure is kept.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ProcedureError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let store = serializer::load_sheet(&bytes, self.config.format.sheet_for(path))?;
        self.replace_store(store);
        info!(path = %path.display(), steps = self.store.len(), "procedure loaded");
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Replace the procedure with delimited text.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let store = serializer::load(bytes, &self.config.format)?;
        self.replace_store(store);
        Ok(())
    }

    fn replace_store(&mut self, store: ProcedureStore) {
        self.store = store;
        self.history.clear();
        self.modified = false;
    }
}

fn unexpected(outcome: CommandOutcome) -> ProcedureError {
    ProcedureError::invariant(format!("unexpected command outcome {outcome:?}"))
}
