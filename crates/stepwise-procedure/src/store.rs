//! Row-keyed procedure store.
//!
//! Steps live in an ordered map keyed by [`Row`]; cross references between
//! steps (`depends_on`, `branch_target`) and the sweep table are keyed by row
//! as well, so every structural primitive moves keys and references together.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::error::{ProcedureError, Result};
use crate::goto;
use crate::rules::{self, LegalValues};
use crate::step::{Row, Step, SweepParameter};
use crate::types::StepType;

/// Sweep parameters keyed by the row of their EIS step, plus entries whose
/// step is gone.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SweepTable {
    pub(crate) attached: BTreeMap<Row, SweepParameter>,
    pub(crate) orphaned: Vec<SweepParameter>,
}

/// In-memory procedure: steps in row order and their sweep parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcedureStore {
    pub(crate) steps: BTreeMap<Row, Step>,
    pub(crate) sweeps: SweepTable,
}

/// Row bounds of a main step and its sub-steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub main: Row,
    /// Last occupied row of the block (the main row when it has no subs).
    pub last: Row,
    pub next_main: Option<Row>,
}

/// A cross reference that points at nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Orphan {
    /// Sub-step without a resolvable parent.
    SubStep { row: Row },
    /// Sweep parameters without an EIS step.
    Sweep { step_number: u32 },
}

impl fmt::Display for Orphan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orphan::SubStep { row } => write!(f, "sub-step at row {row} has no parent step"),
            Orphan::Sweep { step_number } => {
                write!(f, "sweep for step {step_number} has no EIS step")
            }
        }
    }
}

impl From<Orphan> for ProcedureError {
    fn from(orphan: Orphan) -> Self {
        ProcedureError::OrphanReference {
            detail: orphan.to_string(),
        }
    }
}

impl ProcedureStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    //  Access
    // -----------------------------------------------------------------------

    pub fn get(&self, row: Row) -> Option<&Step> {
        self.steps.get(&row)
    }

    pub(crate) fn get_mut(&mut self, row: Row) -> Option<&mut Step> {
        self.steps.get_mut(&row)
    }

    /// Steps in row order.
    pub fn all(&self) -> impl Iterator<Item = (Row, &Step)> + '_ {
        self.steps.iter().map(|(row, step)| (*row, step))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn rows(&self) -> Vec<Row> {
        self.steps.keys().copied().collect()
    }

    pub fn first_row(&self) -> Option<Row> {
        self.steps.keys().next().copied()
    }

    pub fn last_row(&self) -> Option<Row> {
        self.steps.keys().next_back().copied()
    }

    // -----------------------------------------------------------------------
    //  Structural primitives
    // -----------------------------------------------------------------------

    /// Place a step at a free row.
    pub fn insert_at(&mut self, row: Row, step: Step) -> Result<()> {
        if self.steps.contains_key(&row) {
            return Err(ProcedureError::invariant(format!("row {row} is already occupied")));
        }
        self.steps.insert(row, step);
        Ok(())
    }

    /// Remove the steps in `start..=end`, returning them in row order.
    ///
    /// References into the removed range are dropped: branch targets are
    /// cleared and sub-steps of a removed main become unlinked.
    pub fn remove_range(&mut self, start: Row, end: Row) -> Result<Vec<(Row, Step)>> {
        if self.steps.is_empty() {
            return Err(ProcedureError::invariant("cannot remove from an empty procedure"));
        }
        if start > end {
            return Ok(Vec::new());
        }
        let mains = self.main_count();
        let doomed = self
            .steps
            .range(start..=end)
            .filter(|(_, step)| step.is_main())
            .count();
        if mains > 0 && doomed == mains {
            return Err(ProcedureError::invariant(
                "cannot remove every remaining main step",
            ));
        }

        let mut tail = self.steps.split_off(&start);
        let mut after = match end.checked_add(1) {
            Some(next) => tail.split_off(&next),
            None => BTreeMap::new(),
        };
        self.steps.append(&mut after);
        let removed: Vec<(Row, Step)> = tail.into_iter().collect();

        let gone = start..=end;
        for (row, step) in self.steps.iter_mut() {
            if step.branch_target.is_some_and(|t| gone.contains(&t)) {
                debug!(row, "dropping branch into removed rows");
                step.branch_target = None;
            }
            if step.depends_on.is_some_and(|p| gone.contains(&p)) {
                step.depends_on = None;
                step.unlinked = true;
            }
        }
        self.sweeps.attached.retain(|row, _| !gone.contains(row));

        debug!(start, end, removed = removed.len(), "removed rows");
        Ok(removed)
    }

    /// Move every row `>= from` by `delta`, together with the references and
    /// sweep keys that point at them. A negative shift needs the rows it moves
    /// into to be free.
    pub fn shift_rows(&mut self, from: Row, delta: isize) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        if delta < 0 {
            let span = delta.unsigned_abs();
            let floor = from.checked_sub(span).ok_or_else(|| {
                ProcedureError::invariant(format!("cannot shift row {from} below row 0"))
            })?;
            if self.steps.range(floor..from).next().is_some() {
                return Err(ProcedureError::invariant(format!(
                    "rows {floor}..{from} are not free"
                )));
            }
        }

        let moved = |row: Row| -> Result<Row> {
            if row < from {
                return Ok(row);
            }
            row.checked_add_signed(delta)
                .ok_or_else(|| ProcedureError::invariant(format!("row {row} out of range")))
        };

        let tail = self.steps.split_off(&from);
        for (row, step) in tail {
            self.steps.insert(moved(row)?, step);
        }
        for step in self.steps.values_mut() {
            if let Some(parent) = step.depends_on {
                step.depends_on = Some(moved(parent)?);
            }
            if let Some(target) = step.branch_target {
                step.branch_target = Some(moved(target)?);
            }
        }
        let sweeps = self.sweeps.attached.split_off(&from);
        for (row, sweep) in sweeps {
            self.sweeps.attached.insert(moved(row)?, sweep);
        }
        Ok(())
    }

    /// Remove `start..=end` and close the gap by pulling following rows up.
    pub(crate) fn remove_rows_compacting(&mut self, start: Row, end: Row) -> Result<()> {
        self.remove_range(start, end)?;
        if self.steps.range(end + 1..).next().is_some() {
            let span = end - start + 1;
            self.shift_rows(end + 1, -(span as isize))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    //  Blocks
    // -----------------------------------------------------------------------

    /// Nearest main step at or before `row`.
    pub fn owning_main(&self, row: Row) -> Option<Row> {
        self.steps
            .range(..=row)
            .rev()
            .find(|(_, step)| step.is_main())
            .map(|(r, _)| *r)
    }

    pub fn next_main_after(&self, row: Row) -> Option<Row> {
        self.steps
            .range(row + 1..)
            .find(|(_, step)| step.is_main())
            .map(|(r, _)| *r)
    }

    pub fn first_main(&self) -> Option<Row> {
        self.steps.iter().find(|(_, s)| s.is_main()).map(|(r, _)| *r)
    }

    /// Bounds of the block containing `row`.
    pub fn block(&self, row: Row) -> Option<Block> {
        let main = self.owning_main(row)?;
        let next_main = self.next_main_after(main);
        let last = match next_main {
            Some(next) => self.steps.range(main..next).next_back(),
            None => self.steps.range(main..).next_back(),
        }
        .map_or(main, |(r, _)| *r);
        Some(Block {
            main,
            last,
            next_main,
        })
    }

    /// Rows of the sub-steps in the block of `row`.
    pub fn sub_rows(&self, row: Row) -> Vec<Row> {
        match self.block(row) {
            Some(block) => self
                .steps
                .range(block.main + 1..=block.last)
                .filter(|(_, s)| s.is_sub())
                .map(|(r, _)| *r)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Last main step of the procedure.
    pub fn trailing_main(&self) -> Option<Row> {
        self.steps
            .iter()
            .rev()
            .find(|(_, step)| step.is_main())
            .map(|(r, _)| *r)
    }

    pub fn main_rows(&self) -> Vec<Row> {
        self.steps
            .iter()
            .filter(|(_, step)| step.is_main())
            .map(|(r, _)| *r)
            .collect()
    }

    pub fn main_count(&self) -> usize {
        self.steps.values().filter(|step| step.is_main()).count()
    }

    // -----------------------------------------------------------------------
    //  Type resolution
    // -----------------------------------------------------------------------

    /// Type of the main step a sub-step depends on.
    pub fn parent_type(&self, row: Row) -> Option<StepType> {
        let step = self.get(row)?;
        if !step.is_sub() {
            return None;
        }
        let parent = self.get(step.depends_on?)?;
        if parent.is_sub() {
            return None;
        }
        parent.step_type
    }

    /// Legal field values of the step at `row`.
    pub fn legal_values(&self, row: Row) -> LegalValues {
        match self.get(row).and_then(|s| s.step_type) {
            Some(step_type) => rules::resolve(step_type, self.parent_type(row)),
            None => LegalValues::NONE,
        }
    }

    pub fn row_of_step_number(&self, number: u32) -> Option<Row> {
        self.steps
            .iter()
            .find(|(_, step)| step.is_main() && step.step_number == Some(number))
            .map(|(r, _)| *r)
    }

    // -----------------------------------------------------------------------
    //  Numbering
    // -----------------------------------------------------------------------

    /// Number main steps 1..N in row order. Row keys are not touched.
    pub fn renumber(&mut self) {
        let mut next = 0u32;
        for step in self.steps.values_mut() {
            if step.is_main() {
                next += 1;
                step.step_number = Some(next);
            } else {
                step.step_number = None;
            }
        }
        for (row, sweep) in self.sweeps.attached.iter_mut() {
            if let Some(number) = self.steps.get(row).and_then(|s| s.step_number) {
                sweep.step_number = number;
            }
        }
    }

    /// Re-link, renumber and recompute goto targets.
    pub fn normalize(&mut self) {
        goto::relink(self);
        self.renumber();
        goto::recompute(self);
    }

    // -----------------------------------------------------------------------
    //  Sweeps
    // -----------------------------------------------------------------------

    pub fn sweep(&self, row: Row) -> Option<&SweepParameter> {
        self.sweeps.attached.get(&row)
    }

    /// Attached sweeps in row order.
    pub fn sweeps(&self) -> impl Iterator<Item = (Row, &SweepParameter)> + '_ {
        self.sweeps.attached.iter().map(|(row, sweep)| (*row, sweep))
    }

    pub(crate) fn attach_sweep(&mut self, row: Row, mut sweep: SweepParameter) {
        if let Some(number) = self.get(row).and_then(|s| s.step_number) {
            sweep.step_number = number;
        }
        self.sweeps.attached.insert(row, sweep);
    }

    pub(crate) fn detach_sweep(&mut self, row: Row) -> Option<SweepParameter> {
        self.sweeps.attached.remove(&row)
    }

    pub fn orphaned_sweeps(&self) -> &[SweepParameter] {
        &self.sweeps.orphaned
    }

    pub(crate) fn push_orphan_sweep(&mut self, sweep: SweepParameter) {
        self.sweeps.orphaned.push(sweep);
    }

    // -----------------------------------------------------------------------
    //  Consistency
    // -----------------------------------------------------------------------

    /// Dangling references. These never fail an operation.
    pub fn orphans(&self) -> Vec<Orphan> {
        let mut orphans: Vec<Orphan> = self
            .steps
            .iter()
            .filter(|(_, step)| step.is_sub() && (step.unlinked || step.depends_on.is_none()))
            .map(|(row, _)| Orphan::SubStep { row: *row })
            .collect();
        orphans.extend(self.sweeps.orphaned.iter().map(|sweep| Orphan::Sweep {
            step_number: sweep.step_number,
        }));
        orphans
    }

    /// Verify the structural rules of a procedure.
    pub fn check_invariants(&self) -> Result<()> {
        let mains = self.main_rows();
        let count = mains.len() as u32;

        let mut expected = 0u32;
        for (row, step) in &self.steps {
            let row = *row;
            if step.is_main() {
                expected += 1;
                if step.step_number != Some(expected) {
                    return Err(ProcedureError::invariant(format!(
                        "step at row {row} should be numbered {expected}"
                    )));
                }
                if step.is_terminal() {
                    if step.goto.is_some() {
                        return Err(ProcedureError::invariant(format!(
                            "terminal step {expected} has a goto target"
                        )));
                    }
                    if Some(&row) != mains.last() {
                        return Err(ProcedureError::invariant(format!(
                            "End step {expected} is not the final step"
                        )));
                    }
                } else {
                    match step.goto {
                        Some(target) if (1..=count + 1).contains(&target) => {}
                        other => {
                            return Err(ProcedureError::invariant(format!(
                                "step {expected} has goto {other:?} outside 1..={}",
                                count + 1
                            )));
                        }
                    }
                }
                continue;
            }

            if step.step_number.is_some() {
                return Err(ProcedureError::invariant(format!(
                    "sub-step at row {row} carries a step number"
                )));
            }
            if step.unlinked {
                if step.goto.is_some() {
                    return Err(ProcedureError::invariant(format!(
                        "unlinked sub-step at row {row} has a goto target"
                    )));
                }
                continue;
            }
            let parent_row = step.depends_on.ok_or_else(|| {
                ProcedureError::invariant(format!("sub-step at row {row} has no parent"))
            })?;
            let parent = match self.steps.get(&parent_row) {
                Some(parent) if parent_row < row && parent.is_main() => parent,
                _ => {
                    return Err(ProcedureError::invariant(format!(
                        "sub-step at row {row} depends on row {parent_row}, \
                         which is not an earlier main step"
                    )));
                }
            };
            if step.goto != parent.goto {
                return Err(ProcedureError::invariant(format!(
                    "sub-step at row {row} does not follow its parent's goto"
                )));
            }
        }

        for row in self.sweeps.attached.keys() {
            if self.get(*row).and_then(|s| s.step_type) != Some(StepType::Eis) {
                return Err(ProcedureError::invariant(format!(
                    "sweep attached to row {row}, which is not an EIS step"
                )));
            }
        }
        Ok(())
    }
}
