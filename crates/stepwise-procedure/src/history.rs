//! Snapshot-based undo and redo.
//!
//! Each edit runs as an [`EditCommand`]. [`History::execute`] captures the
//! store before and after the command; undo restores the before image and redo
//! the after image. Executing a new command discards the redo stack.

use std::sync::Arc;

use tracing::debug;

use crate::edit::{Clipboard, TypeChange};
use crate::error::Result;
use crate::field::{ApplyMode, FieldOutcome, StepField};
use crate::step::{Row, SweepParameter};
use crate::store::ProcedureStore;
use crate::types::StepType;

/// Immutable full copy of a store, sweep table included.
#[derive(Debug, Clone)]
pub struct Snapshot(Arc<ProcedureStore>);

impl Snapshot {
    pub fn capture(store: &ProcedureStore) -> Self {
        Self(Arc::new(store.clone()))
    }

    pub fn restore(&self) -> ProcedureStore {
        ProcedureStore::clone(&self.0)
    }

    pub fn store(&self) -> &ProcedureStore {
        &self.0
    }
}

/// An undoable edit.
#[derive(Debug, Clone)]
pub enum EditCommand {
    InsertStepBlock { anchor: Row },
    DeleteStepBlock { row: Row },
    PasteBlock {
        target: Row,
        clipboard: Clipboard,
        with_subs: bool,
    },
    /// `sweep` is attached when the step becomes EIS without parameters.
    ChangeStepType {
        row: Row,
        step_type: StepType,
        sweep: Option<SweepParameter>,
    },
    SetField {
        row: Row,
        field: StepField,
        value: String,
    },
    AddSubStep { row: Row },
    AttachSweep { row: Row, sweep: SweepParameter },
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Row of the step that was created.
    Inserted(Row),
    /// First row of the block that was deleted.
    Deleted(Row),
    TypeChanged(TypeChange),
    Field(FieldOutcome),
    SweepAttached(Row),
}

impl EditCommand {
    pub fn apply(&self, store: &mut ProcedureStore) -> Result<CommandOutcome> {
        match self {
            EditCommand::InsertStepBlock { anchor } => {
                store.insert_step_block(*anchor).map(CommandOutcome::Inserted)
            }
            EditCommand::DeleteStepBlock { row } => {
                store.delete_step_block(*row).map(CommandOutcome::Deleted)
            }
            EditCommand::PasteBlock {
                target,
                clipboard,
                with_subs,
            } => store
                .paste_block(*target, clipboard, *with_subs)
                .map(CommandOutcome::Inserted),
            EditCommand::ChangeStepType {
                row,
                step_type,
                sweep,
            } => store
                .change_step_type_with(*row, *step_type, sweep.clone())
                .map(CommandOutcome::TypeChanged),
            EditCommand::SetField { row, field, value } => store
                .set_field(*row, *field, value, ApplyMode::Interactive)
                .map(CommandOutcome::Field),
            EditCommand::AddSubStep { row } => {
                store.add_sub_step(*row).map(CommandOutcome::Inserted)
            }
            EditCommand::AttachSweep { row, sweep } => store
                .attach_sweep_to(*row, sweep.clone())
                .map(|()| CommandOutcome::SweepAttached(*row)),
        }
    }

    /// Short label for history listings.
    pub fn describe(&self) -> String {
        match self {
            EditCommand::InsertStepBlock { anchor } => format!("insert step at row {anchor}"),
            EditCommand::DeleteStepBlock { row } => format!("delete step at row {row}"),
            EditCommand::PasteBlock { target, .. } => format!("paste step at row {target}"),
            EditCommand::ChangeStepType { row, step_type, .. } => {
                format!("set row {row} to {step_type}")
            }
            EditCommand::SetField { row, field, value } => {
                format!("set {field} of row {row} to '{value}'")
            }
            EditCommand::AddSubStep { row } => format!("add condition to row {row}"),
            EditCommand::AttachSweep { row, .. } => format!("configure sweep of row {row}"),
        }
    }
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    label: String,
    before: Snapshot,
    after: Snapshot,
}

/// Undo and redo stacks.
#[derive(Debug, Clone, Default)]
pub struct History {
    undo_stack: Vec<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    /// Maximum undo depth; 0 keeps everything.
    limit: usize,
    /// Commands recorded since creation.
    recorded: u64,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Run `command` against `store` and record it. Commands that fail or
    /// leave the store unchanged are not recorded; a failed command leaves the
    /// store as it was.
    pub fn execute(
        &mut self,
        store: &mut ProcedureStore,
        command: EditCommand,
    ) -> Result<CommandOutcome> {
        let before = Snapshot::capture(store);
        let outcome = match command.apply(store) {
            Ok(outcome) => outcome,
            Err(err) => {
                *store = before.restore();
                return Err(err);
            }
        };
        if before.store() == &*store {
            debug!(op = %command.describe(), "no change; not recorded");
            return Ok(outcome);
        }
        self.undo_stack.push(HistoryEntry {
            label: command.describe(),
            before,
            after: Snapshot::capture(store),
        });
        self.redo_stack.clear();
        self.recorded += 1;
        if self.limit > 0 && self.undo_stack.len() > self.limit {
            let excess = self.undo_stack.len() - self.limit;
            self.undo_stack.drain(..excess);
        }
        Ok(outcome)
    }

    /// Restore the state before the last command. Returns true if undo was performed.
    pub fn undo(&mut self, store: &mut ProcedureStore) -> bool {
        let Some(entry) = self.undo_stack.pop() else {
            return false;
        };
        *store = entry.before.restore();
        debug!(op = %entry.label, "undo");
        self.redo_stack.push(entry);
        true
    }

    /// Re-apply the last undone command. Returns true if redo was performed.
    pub fn redo(&mut self, store: &mut ProcedureStore) -> bool {
        let Some(entry) = self.redo_stack.pop() else {
            return false;
        };
        *store = entry.after.restore();
        debug!(op = %entry.label, "redo");
        self.undo_stack.push(entry);
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Number of commands recorded so far. Unchanged by undo, redo and
    /// commands that did not modify the store.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    pub fn undo_label(&self) -> Option<&str> {
        self.undo_stack.last().map(|e| e.label.as_str())
    }

    pub fn redo_label(&self) -> Option<&str> {
        self.redo_stack.last().map(|e| e.label.as_str())
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;

    fn seeded() -> ProcedureStore {
        let mut store = ProcedureStore::new();
        store.insert_at(0, Step::seed()).unwrap();
        store.insert_at(2, Step::blank()).unwrap();
        store.normalize();
        store
    }

    #[test]
    fn test_undo_redo() {
        let mut store = seeded();
        let original = store.clone();
        let mut history = History::new();
        history
            .execute(&mut store, EditCommand::InsertStepBlock { anchor: 0 })
            .unwrap();
        let inserted = store.clone();
        assert_eq!(store.len(), 3);

        assert!(history.undo(&mut store));
        assert_eq!(store, original);
        assert!(history.redo(&mut store));
        assert_eq!(store, inserted);
    }

    #[test]
    fn test_undo_nothing() {
        let mut store = seeded();
        let mut history = History::new();
        assert!(!history.undo(&mut store));
        assert!(!history.redo(&mut store));
    }

    #[test]
    fn test_new_command_clears_redo() {
        let mut store = seeded();
        let mut history = History::new();
        history
            .execute(&mut store, EditCommand::InsertStepBlock { anchor: 0 })
            .unwrap();
        history.undo(&mut store);
        assert!(history.can_redo());
        history
            .execute(&mut store, EditCommand::AddSubStep { row: 0 })
            .unwrap();
        assert!(!history.can_redo());
        assert_eq!(history.undo_label(), Some("add condition to row 0"));
    }

    #[test]
    fn test_failed_and_noop_commands_not_recorded() {
        let mut store = seeded();
        let mut history = History::new();
        assert!(history
            .execute(&mut store, EditCommand::AddSubStep { row: 2 })
            .is_err());
        history
            .execute(
                &mut store,
                EditCommand::SetField {
                    row: 0,
                    field: StepField::Goto,
                    value: "9".to_string(),
                },
            )
            .unwrap();
        assert!(!history.can_undo());
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut store = seeded();
        let mut history = History::with_limit(2);
        for _ in 0..3 {
            history
                .execute(&mut store, EditCommand::InsertStepBlock { anchor: 0 })
                .unwrap();
        }
        assert!(history.undo(&mut store));
        assert!(history.undo(&mut store));
        assert!(!history.undo(&mut store));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_eis_change_is_one_entry() {
        let mut store = seeded();
        let original = store.clone();
        let mut history = History::new();
        history
            .execute(
                &mut store,
                EditCommand::ChangeStepType {
                    row: 0,
                    step_type: StepType::Eis,
                    sweep: Some(SweepParameter::default()),
                },
            )
            .unwrap();
        assert!(store.sweep(0).is_some());
        assert_eq!(history.recorded(), 1);

        assert!(history.undo(&mut store));
        assert_eq!(store, original);
        assert!(!history.can_undo());
        assert!(history.redo(&mut store));
        assert_eq!(store.get(0).unwrap().step_type, Some(StepType::Eis));
        assert!(store.sweep(0).is_some());
    }

    #[test]
    fn test_recorded_counts_only_changes() {
        let mut store = seeded();
        let mut history = History::with_limit(1);
        history
            .execute(&mut store, EditCommand::InsertStepBlock { anchor: 0 })
            .unwrap();
        history
            .execute(&mut store, EditCommand::InsertStepBlock { anchor: 0 })
            .unwrap();
        assert_eq!(history.recorded(), 2);
        assert!(history
            .execute(&mut store, EditCommand::AddSubStep { row: 0 })
            .is_err());
        history.undo(&mut store);
        assert_eq!(history.recorded(), 2);
    }
}
