//! Row projection for display collaborators.

use serde::Serialize;

use crate::field::StepField;
use crate::rules;
use crate::step::Row;
use crate::store::ProcedureStore;
use crate::types::{StepEnum, StepType};

/// How a row is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowRole {
    Step,
    SubStep,
    /// Untyped main step waiting to be configured.
    Placeholder,
}

/// Names a cell may currently take, per choice column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LegalNames {
    pub modes: Vec<&'static str>,
    pub end_conditions: Vec<&'static str>,
    /// Operators of the current end condition.
    pub operators: Vec<&'static str>,
    pub reports: Vec<&'static str>,
}

/// Display image of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowView {
    pub row: Row,
    pub role: RowRole,
    /// Cell text in column order (see [`StepField::ALL`]).
    pub cells: Vec<String>,
    pub legal: LegalNames,
    pub unlinked: bool,
}

impl RowView {
    pub fn cell(&self, field: StepField) -> &str {
        self.cells.get(field.column()).map_or("", String::as_str)
    }
}

/// Receives row images after every change.
pub trait Renderer {
    fn display(&mut self, row: Row, view: &RowView);
}

/// Project the step at `row`.
pub fn project(store: &ProcedureStore, row: Row) -> Option<RowView> {
    let step = store.get(row)?;
    let role = if step.is_sub() {
        RowRole::SubStep
    } else if step.is_placeholder() {
        RowRole::Placeholder
    } else {
        RowRole::Step
    };

    let cells = StepField::ALL
        .iter()
        .map(|field| match field {
            StepField::Mode if step.step_type == Some(StepType::Eis) => store
                .sweep(row)
                .and_then(|s| s.source_file_path.clone())
                .unwrap_or_default(),
            _ => step.field_text(*field),
        })
        .collect();

    let legal = store.legal_values(row);
    let operators = match step.end_condition {
        Some(cond) if legal.allows_end_condition(cond) => names(rules::operators_for(cond)),
        _ => Vec::new(),
    };

    Some(RowView {
        row,
        role,
        cells,
        legal: LegalNames {
            modes: names(legal.modes),
            end_conditions: names(legal.end_conditions),
            operators,
            reports: names(legal.reports),
        },
        unlinked: step.unlinked,
    })
}

/// Project every step in row order.
pub fn project_all(store: &ProcedureStore) -> Vec<RowView> {
    store.rows().into_iter().filter_map(|row| project(store, row)).collect()
}

/// Push every row to `renderer`.
pub fn render_all(store: &ProcedureStore, renderer: &mut dyn Renderer) {
    for view in project_all(store) {
        renderer.display(view.row, &view);
    }
}

fn names<T: StepEnum>(values: &[T]) -> Vec<&'static str> {
    values.iter().map(|v| v.name()).collect()
}
