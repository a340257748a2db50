//! Sub-step linkage and goto computation.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::step::Row;
use crate::store::ProcedureStore;

/// Attach sub-steps without a valid parent to the nearest preceding main step.
/// Sub-steps with no main step before them stay unlinked.
pub fn relink(store: &mut ProcedureStore) {
    let stale: Vec<Row> = store
        .all()
        .filter(|(row, step)| {
            step.is_sub()
                && (step.unlinked
                    || match step.depends_on {
                        Some(parent) => {
                            parent >= *row || !store.get(parent).is_some_and(|p| p.is_main())
                        }
                        None => true,
                    })
        })
        .map(|(row, _)| row)
        .collect();

    for row in stale {
        let parent = store.owning_main(row);
        if let Some(step) = store.get_mut(row) {
            step.depends_on = parent;
            step.unlinked = parent.is_none();
            match parent {
                Some(parent) => debug!(row, parent, "re-linked sub-step"),
                None => debug!(row, "sub-step has no preceding main step"),
            }
        }
    }
}

/// Recompute every goto target.
///
/// Main steps fall through to the next step number, except cycle markers with
/// a branch target that still resolves. Terminal steps have none. Sub-steps
/// copy their parent's target.
pub fn recompute(store: &mut ProcedureStore) {
    let numbers: BTreeMap<Row, u32> = store
        .all()
        .filter(|(_, step)| step.is_main())
        .filter_map(|(row, step)| step.step_number.map(|n| (row, n)))
        .collect();

    for (row, step) in store.steps.iter_mut() {
        if step.is_sub() {
            continue;
        }
        if step.is_terminal() {
            step.goto = None;
            continue;
        }
        let fall_through = step.step_number.map(|n| n + 1);
        let is_cycle = step.step_type.is_some_and(|t| t.is_cycle_marker());
        step.goto = match step.branch_target {
            Some(target) if is_cycle => match numbers.get(&target) {
                Some(number) => Some(*number),
                None => {
                    warn!(row = *row, target, "branch target is gone; falling through");
                    step.branch_target = None;
                    fall_through
                }
            },
            _ => fall_through,
        };
    }

    let targets: BTreeMap<Row, Option<u32>> = store
        .all()
        .filter(|(_, step)| step.is_main())
        .map(|(row, step)| (row, step.goto))
        .collect();

    for step in store.steps.values_mut().filter(|s| s.is_sub()) {
        let parent = if step.unlinked { None } else { step.depends_on };
        match parent.and_then(|p| targets.get(&p)) {
            Some(goto) => step.goto = *goto,
            None => {
                step.goto = None;
                step.unlinked = true;
            }
        }
    }
}
