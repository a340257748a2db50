//! Structural edit operations.
//!
//! Every public operation runs as a transaction: the store is cloned, mutated,
//! normalized and checked. A failure at any stage restores the clone, so a
//! refused edit leaves the store exactly as it was.

use tracing::{debug, warn};

use crate::error::{ProcedureError, Result};
use crate::field::{self, ApplyMode, FieldEffect, FieldOutcome, StepField};
use crate::rules;
use crate::step::{Row, Step, SweepParameter};
use crate::store::ProcedureStore;
use crate::types::{StepEnum, StepType};

/// Rows taken by a freshly inserted block: the main step and its separator.
pub const BLOCK_SIZE: usize = 2;

/// Deep copy of one block.
#[derive(Debug, Clone, PartialEq)]
pub struct Clipboard {
    pub main: Step,
    pub subs: Vec<Step>,
    pub sweep: Option<SweepParameter>,
}

/// Result of a type change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeChange {
    pub row: Row,
    /// Placeholder appended after a trailing step.
    pub appended: Option<Row>,
    /// Rows dropped (sub-steps the new type cannot hold, placeholders after End).
    pub removed: usize,
    /// The step became EIS and has no sweep parameters yet.
    pub needs_sweep: bool,
}

/// Fields copied by paste, after the type.
const PASTED_FIELDS: [StepField; 8] = [
    StepField::Mode,
    StepField::ModeValue,
    StepField::EndCondition,
    StepField::Operator,
    StepField::EndValue,
    StepField::Report,
    StepField::ReportValue,
    StepField::Note,
];

impl ProcedureStore {
    /// Run `f` against the store; restore the previous state if it fails or
    /// leaves the procedure inconsistent.
    pub fn transaction<T>(
        &mut self,
        label: &str,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let before = self.clone();
        let result = f(self).and_then(|value| {
            self.normalize();
            self.check_invariants()?;
            Ok(value)
        });
        match &result {
            Ok(_) => debug!(op = label, steps = self.len(), "edit committed"),
            Err(err) => {
                warn!(op = label, error = %err, "edit refused");
                *self = before;
            }
        }
        result
    }

    // -----------------------------------------------------------------------
    //  Blocks
    // -----------------------------------------------------------------------

    /// Insert a blank main step above the block at `anchor`. Returns its row.
    pub fn insert_step_block(&mut self, anchor: Row) -> Result<Row> {
        self.transaction("insert", |store| store.insert_block_raw(anchor))
    }

    fn insert_block_raw(&mut self, anchor: Row) -> Result<Row> {
        let at = self
            .owning_main(anchor)
            .or_else(|| self.first_main())
            .or_else(|| self.first_row())
            .unwrap_or(0);
        self.shift_rows(at, BLOCK_SIZE as isize)?;
        self.insert_at(at, Step::blank())?;
        Ok(at)
    }

    /// Delete the block containing `row`. Returns the row the block started at.
    pub fn delete_step_block(&mut self, row: Row) -> Result<Row> {
        self.transaction("delete", |store| {
            if store.is_empty() {
                return Err(ProcedureError::invariant("the procedure is empty"));
            }
            let block = store.block(row).ok_or_else(|| {
                ProcedureError::invariant(format!("no step at or before row {row}"))
            })?;
            if store.main_count() == 1 {
                return Err(ProcedureError::invariant(
                    "cannot delete the only remaining step",
                ));
            }
            let end = block.next_main.map_or(block.last, |next| next - 1);
            store.remove_range(block.main, end)?;
            if let Some(next) = block.next_main {
                store.shift_rows(next, -((next - block.main) as isize))?;
            }
            Ok(block.main)
        })
    }

    /// Copy the block containing `row`. The store is not modified.
    pub fn copy_block(&self, row: Row) -> Result<Clipboard> {
        let block = self
            .block(row)
            .ok_or_else(|| ProcedureError::invariant(format!("no step at or before row {row}")))?;
        let main = self
            .get(block.main)
            .cloned()
            .ok_or_else(|| ProcedureError::invariant(format!("no step at row {}", block.main)))?;
        let subs = self
            .sub_rows(block.main)
            .into_iter()
            .filter_map(|r| self.get(r).cloned())
            .collect();
        Ok(Clipboard {
            main,
            subs,
            sweep: self.sweep(block.main).cloned(),
        })
    }

    /// Insert a copy of `clipboard` above the block at `target`.
    ///
    /// Fields are assigned with loading semantics, type first; goto is
    /// recomputed. Sub-steps come along only when `with_subs` is set.
    pub fn paste_block(
        &mut self,
        target: Row,
        clipboard: &Clipboard,
        with_subs: bool,
    ) -> Result<Row> {
        self.transaction("paste", |store| {
            let at = store.insert_block_raw(target)?;
            if let Some(step_type) = clipboard.main.step_type {
                field::apply(store, at, StepField::Type, step_type.name(), ApplyMode::Loading)?;
            }
            store.copy_fields(at, &clipboard.main);
            if clipboard.main.step_type == Some(StepType::Eis) {
                if let Some(sweep) = &clipboard.sweep {
                    store.attach_sweep(at, sweep.clone());
                }
            }
            if with_subs {
                for (offset, sub) in clipboard.subs.iter().enumerate() {
                    let row = at + 1 + offset;
                    store.shift_rows(row, 1)?;
                    store.insert_at(row, Step::sub(at))?;
                    store.copy_fields(row, sub);
                }
            }
            Ok(at)
        })
    }

    fn copy_fields(&mut self, row: Row, source: &Step) {
        for field in PASTED_FIELDS {
            let text = source.field_text(field);
            if text.is_empty() {
                continue;
            }
            if let Err(err) = field::apply(self, row, field, &text, ApplyMode::Loading) {
                warn!(row, %field, error = %err, "pasted value dropped");
            }
        }
    }

    // -----------------------------------------------------------------------
    //  Types and sub-steps
    // -----------------------------------------------------------------------

    /// Give the main step at `row` a new type, resetting its configuration.
    pub fn change_step_type(&mut self, row: Row, new_type: StepType) -> Result<TypeChange> {
        self.change_step_type_with(row, new_type, None)
    }

    /// Like [`change_step_type`](Self::change_step_type); a step that becomes
    /// EIS without parameters gets `sweep` attached in the same transaction.
    pub fn change_step_type_with(
        &mut self,
        row: Row,
        new_type: StepType,
        sweep: Option<SweepParameter>,
    ) -> Result<TypeChange> {
        self.transaction("change type", |store| {
            let mut change = store.change_type_raw(row, new_type)?;
            if let (true, Some(sweep)) = (change.needs_sweep, sweep) {
                store.attach_sweep(row, sweep);
                change.needs_sweep = false;
            }
            Ok(change)
        })
    }

    fn change_type_raw(&mut self, row: Row, new_type: StepType) -> Result<TypeChange> {
        let step = self
            .get(row)
            .ok_or_else(|| ProcedureError::invariant(format!("no step at row {row}")))?;
        if step.is_sub() {
            return Err(ProcedureError::invariant(format!(
                "row {row} is a sub-step; its type is fixed"
            )));
        }
        if new_type == StepType::Sub {
            return Err(ProcedureError::invariant(
                "a main step cannot become a sub-step",
            ));
        }
        let block = self
            .block(row)
            .ok_or_else(|| ProcedureError::invariant(format!("no block at row {row}")))?;
        if new_type.is_terminal() {
            let configured = self
                .all()
                .any(|(r, s)| r > block.main && s.is_main() && !s.is_placeholder());
            if configured {
                return Err(ProcedureError::invariant(format!(
                    "cannot end the procedure at row {row}: configured steps follow"
                )));
            }
        }

        let defaults = rules::defaults_for(new_type);
        if let Some(step) = self.get_mut(row) {
            step.step_type = Some(new_type);
            step.clear_configuration();
            step.mode = defaults.mode;
            step.end_condition = defaults.end_condition;
            step.operator = defaults.operator;
            step.report = defaults.report;
            if !new_type.is_cycle_marker() {
                step.branch_target = None;
            }
        }
        if new_type != StepType::Eis && self.detach_sweep(row).is_some() {
            debug!(row, "dropped sweep of former EIS step");
        }

        let mut removed = 0;
        let legal = rules::resolve(new_type, None);
        if legal.is_unconfigurable() {
            if block.last > block.main {
                removed += self.sub_rows(row).len();
                self.remove_rows_compacting(block.main + 1, block.last)?;
            }
        } else {
            for sub in self.sub_rows(row) {
                if let Some(step) = self.get_mut(sub) {
                    sanitize(step, &legal);
                }
            }
        }

        let mut appended = None;
        if new_type.is_terminal() {
            if let Some(last) = self.last_row().filter(|last| *last > row) {
                removed += self.remove_range(row + 1, last)?.len();
            }
        } else if self.trailing_main() == Some(row) {
            let last = self.block(row).map_or(row, |b| b.last);
            let at = last + BLOCK_SIZE;
            self.insert_at(at, Step::blank())?;
            appended = Some(at);
        }

        Ok(TypeChange {
            row,
            appended,
            removed,
            needs_sweep: new_type == StepType::Eis && self.sweep(row).is_none(),
        })
    }

    /// Append a blank sub-step to the block containing `row`.
    pub fn add_sub_step(&mut self, row: Row) -> Result<Row> {
        self.transaction("add sub-step", |store| store.add_sub_raw(row))
    }

    fn add_sub_raw(&mut self, row: Row) -> Result<Row> {
        let block = self
            .block(row)
            .ok_or_else(|| ProcedureError::invariant(format!("no step at or before row {row}")))?;
        let Some(main_type) = self.get(block.main).and_then(|s| s.step_type) else {
            return Err(ProcedureError::invariant(
                "give the step a type before adding conditions",
            ));
        };
        if rules::resolve(main_type, None).is_unconfigurable() {
            return Err(ProcedureError::invariant(format!(
                "{main_type} steps take no sub-conditions"
            )));
        }
        let at = block.last + 1;
        self.shift_rows(at, 1)?;
        self.insert_at(at, Step::sub(block.main))?;
        Ok(at)
    }

    // -----------------------------------------------------------------------
    //  Fields and sweeps
    // -----------------------------------------------------------------------

    /// Assign one field. Interactive type changes go through
    /// [`change_step_type`](Self::change_step_type); completing the last
    /// condition of a charge or discharge block opens a new sub-step.
    pub fn set_field(
        &mut self,
        row: Row,
        field: StepField,
        raw: &str,
        mode: ApplyMode,
    ) -> Result<FieldOutcome> {
        if field == StepField::Type && mode == ApplyMode::Interactive {
            let new_type = StepType::coerce(raw)
                .ok_or_else(|| ProcedureError::coercion(field, raw.trim(), "unknown step type"))?;
            self.change_step_type(row, new_type)?;
            return Ok(FieldOutcome {
                effect: FieldEffect::Set,
                open_sub_condition: false,
            });
        }
        self.transaction("set field", |store| {
            let outcome = field::apply(store, row, field, raw, mode)?;
            if outcome.open_sub_condition {
                let sub = store.add_sub_raw(row)?;
                debug!(row, sub, "opened next sub-condition");
            }
            Ok(outcome)
        })
    }

    /// Attach or replace the sweep parameters of the EIS step at `row`.
    pub fn attach_sweep_to(&mut self, row: Row, sweep: SweepParameter) -> Result<()> {
        self.transaction("attach sweep", |store| {
            match store.get(row) {
                Some(step) if step.step_type == Some(StepType::Eis) => {}
                _ => {
                    return Err(ProcedureError::invariant(format!(
                        "row {row} is not an EIS step"
                    )));
                }
            }
            store.attach_sweep(row, sweep);
            Ok(())
        })
    }
}

/// Drop the values of a sub-step that its parent's rules no longer allow.
fn sanitize(step: &mut Step, legal: &rules::LegalValues) {
    if step.mode.is_some_and(|m| !legal.allows_mode(m)) {
        step.mode = None;
        step.mode_value = None;
    }
    if step.end_condition.is_some_and(|c| !legal.allows_end_condition(c)) {
        step.end_condition = None;
        step.operator = None;
        step.end_value = None;
    }
    if let (Some(cond), Some(op)) = (step.end_condition, step.operator) {
        if !rules::operators_for(cond).contains(&op) {
            step.operator = None;
        }
    }
    if step.report.is_some_and(|r| !legal.allows_report(r)) {
        step.report = None;
        step.report_value = None;
    }
}
