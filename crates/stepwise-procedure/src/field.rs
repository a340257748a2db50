//! Static field table.
//!
//! Each editable column of a step maps to a legal-value query and an apply
//! function. Interactive edits cascade (changing a mode clears its value,
//! changing the end condition re-validates the operator); loading assigns
//! fields verbatim in column order.

use std::fmt;

use tracing::debug;

use crate::error::{ProcedureError, Result};
use crate::rules::{self, opens_sub_condition};
use crate::step::Row;
use crate::store::ProcedureStore;
use crate::types::{EndCondition, Mode, Operator, Report, StepEnum, StepType};

/// The eleven columns of the step region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepField {
    StepNumber,
    Type,
    Mode,
    ModeValue,
    EndCondition,
    Operator,
    EndValue,
    Goto,
    Report,
    ReportValue,
    Note,
}

impl StepField {
    pub const ALL: [StepField; 11] = [
        StepField::StepNumber,
        StepField::Type,
        StepField::Mode,
        StepField::ModeValue,
        StepField::EndCondition,
        StepField::Operator,
        StepField::EndValue,
        StepField::Goto,
        StepField::Report,
        StepField::ReportValue,
        StepField::Note,
    ];

    /// Zero-based column in the step region.
    pub fn column(self) -> usize {
        self as usize
    }

    pub fn from_column(column: usize) -> Option<Self> {
        Self::ALL.get(column).copied()
    }

    /// Identifier used by scripts and diagnostics.
    pub fn key(self) -> &'static str {
        match self {
            StepField::StepNumber => "step_number",
            StepField::Type => "type",
            StepField::Mode => "mode",
            StepField::ModeValue => "mode_value",
            StepField::EndCondition => "end_condition",
            StepField::Operator => "operator",
            StepField::EndValue => "end_value",
            StepField::Goto => "goto",
            StepField::Report => "report",
            StepField::ReportValue => "report_value",
            StepField::Note => "note",
        }
    }

    /// Column header in procedure files.
    pub fn header(self) -> &'static str {
        match self {
            StepField::StepNumber => "Step",
            StepField::Type => "Type",
            StepField::Mode => "Mode",
            StepField::ModeValue => "Mode value",
            StepField::EndCondition => "End Type",
            StepField::Operator => "Operator",
            StepField::EndValue => "End Value",
            StepField::Goto => "Go to",
            StepField::Report => "Report Type",
            StepField::ReportValue => "Report value",
            StepField::Note => "Note",
        }
    }

    /// Look up by key or by header, ignoring case.
    pub fn from_key(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.key().eq_ignore_ascii_case(raw) || f.header().eq_ignore_ascii_case(raw))
    }
}

impl fmt::Display for StepField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// How a field assignment is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// A user edit: dependent fields cascade.
    Interactive,
    /// Reading a file or pasting: fields are assigned as given.
    Loading,
}

/// What a cell may currently hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choices {
    /// One of the listed names.
    Fixed(Vec<&'static str>),
    Number,
    Text,
    /// Derived by the model.
    Computed,
    /// Not applicable to this step.
    Unavailable,
}

impl Choices {
    fn names<T: StepEnum>(values: &[T]) -> Self {
        if values.is_empty() {
            Choices::Unavailable
        } else {
            Choices::Fixed(values.iter().map(|v| v.name()).collect())
        }
    }

    fn number_if(available: bool) -> Self {
        if available {
            Choices::Number
        } else {
            Choices::Unavailable
        }
    }
}

/// Legal input for one cell.
pub fn choices(store: &ProcedureStore, row: Row, field: StepField) -> Choices {
    let Some(step) = store.get(row) else {
        return Choices::Unavailable;
    };
    let legal = store.legal_values(row);
    match field {
        StepField::StepNumber => Choices::Computed,
        StepField::Type if step.is_sub() => Choices::Unavailable,
        StepField::Type => {
            Choices::Fixed(StepType::selectable().map(StepType::name).collect())
        }
        StepField::Mode => Choices::names(legal.modes),
        StepField::ModeValue => Choices::number_if(!legal.modes.is_empty()),
        StepField::EndCondition => Choices::names(legal.end_conditions),
        StepField::Operator => match step.end_condition {
            Some(cond) if legal.allows_end_condition(cond) => {
                Choices::Fixed(rules::operators_for(cond).iter().map(|o| o.symbol()).collect())
            }
            _ => Choices::Unavailable,
        },
        StepField::EndValue => Choices::number_if(!legal.end_conditions.is_empty()),
        StepField::Goto => match step.step_type {
            Some(t) if t.is_cycle_marker() => Choices::Number,
            _ => Choices::Computed,
        },
        StepField::Report => Choices::names(legal.reports),
        StepField::ReportValue => Choices::number_if(!legal.reports.is_empty()),
        StepField::Note => Choices::Text,
    }
}

/// Effect of an accepted assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEffect {
    Set,
    Cleared,
    /// The value is derived; the input was discarded.
    Recomputed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOutcome {
    pub effect: FieldEffect,
    /// The edit completed the last condition of a block that takes further
    /// sub-conditions.
    pub open_sub_condition: bool,
}

impl FieldOutcome {
    fn of(effect: FieldEffect) -> Self {
        Self {
            effect,
            open_sub_condition: false,
        }
    }
}

/// Parse a numeric cell. A comma is accepted as the decimal separator.
pub fn parse_number(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().replace(',', ".").parse().ok()?;
    value.is_finite().then_some(value)
}

/// Assign `raw` to one field of the step at `row`.
///
/// On error the step is unchanged.
pub fn apply(
    store: &mut ProcedureStore,
    row: Row,
    field: StepField,
    raw: &str,
    mode: ApplyMode,
) -> Result<FieldOutcome> {
    let Some(step) = store.get(row) else {
        return Err(ProcedureError::invariant(format!("no step at row {row}")));
    };
    let is_sub = step.is_sub();
    let step_number = step.step_number;
    let step_type = step.step_type;
    let current_cond = step.end_condition;
    let legal = store.legal_values(row);
    let raw = raw.trim();
    let blank = raw.is_empty();
    let type_label = step_type.map_or("untyped step", StepType::name);

    match field {
        StepField::StepNumber => Err(ProcedureError::coercion(
            field,
            raw,
            "step numbers are computed",
        )),

        StepField::Type => {
            let new_type = StepType::coerce(raw)
                .ok_or_else(|| ProcedureError::coercion(field, raw, "unknown step type"))?;
            if is_sub && new_type != StepType::Sub {
                return Err(ProcedureError::coercion(field, raw, "a sub-step keeps its type"));
            }
            if !is_sub && new_type == StepType::Sub {
                return Err(ProcedureError::coercion(
                    field,
                    raw,
                    "a main step cannot become a sub-step",
                ));
            }
            set(store, row, |s| s.step_type = Some(new_type));
            Ok(FieldOutcome::of(FieldEffect::Set))
        }

        StepField::Mode => {
            if blank {
                set(store, row, |s| {
                    s.mode = None;
                    if mode == ApplyMode::Interactive {
                        s.mode_value = None;
                    }
                });
                return Ok(FieldOutcome::of(FieldEffect::Cleared));
            }
            let value = Mode::coerce(raw)
                .ok_or_else(|| ProcedureError::coercion(field, raw, "unknown mode"))?;
            if !legal.allows_mode(value) {
                return Err(ProcedureError::coercion(
                    field,
                    raw,
                    format!("not allowed for {type_label}"),
                ));
            }
            set(store, row, |s| {
                if mode == ApplyMode::Interactive && s.mode != Some(value) {
                    s.mode_value = None;
                }
                s.mode = Some(value);
            });
            Ok(FieldOutcome::of(FieldEffect::Set))
        }

        StepField::ModeValue => {
            let value = number(field, raw, !legal.modes.is_empty(), type_label)?;
            set(store, row, |s| s.mode_value = value);
            Ok(FieldOutcome::of(effect_of(value)))
        }

        StepField::EndCondition => {
            if blank {
                set(store, row, |s| {
                    s.end_condition = None;
                    if mode == ApplyMode::Interactive {
                        s.operator = None;
                        s.end_value = None;
                    }
                });
                return Ok(FieldOutcome::of(FieldEffect::Cleared));
            }
            let value = EndCondition::coerce(raw)
                .ok_or_else(|| ProcedureError::coercion(field, raw, "unknown end condition"))?;
            if !legal.allows_end_condition(value) {
                return Err(ProcedureError::coercion(
                    field,
                    raw,
                    format!("not allowed for {type_label}"),
                ));
            }
            let mut outcome = FieldOutcome::of(FieldEffect::Set);
            if mode == ApplyMode::Interactive {
                let allowed = rules::operators_for(value);
                set(store, row, |s| {
                    if current_cond != Some(value) {
                        s.end_value = None;
                    }
                    let keep = s.operator.is_some_and(|op| allowed.contains(&op));
                    if !keep {
                        s.operator = match allowed {
                            [only] => Some(*only),
                            _ => None,
                        };
                    }
                });
                outcome.open_sub_condition = closes_block(store, row);
            }
            set(store, row, |s| s.end_condition = Some(value));
            Ok(outcome)
        }

        StepField::Operator => {
            if blank {
                set(store, row, |s| s.operator = None);
                return Ok(FieldOutcome::of(FieldEffect::Cleared));
            }
            let Some(cond) = current_cond else {
                return Err(ProcedureError::coercion(
                    field,
                    raw,
                    "set the end condition first",
                ));
            };
            let value = Operator::coerce(raw)
                .ok_or_else(|| ProcedureError::coercion(field, raw, "unknown operator"))?;
            if !rules::operators_for(cond).contains(&value) {
                return Err(ProcedureError::coercion(
                    field,
                    raw,
                    format!("not allowed with {cond}"),
                ));
            }
            set(store, row, |s| s.operator = Some(value));
            Ok(FieldOutcome::of(FieldEffect::Set))
        }

        StepField::EndValue => {
            let value = number(field, raw, !legal.end_conditions.is_empty(), type_label)?;
            set(store, row, |s| s.end_value = value);
            Ok(FieldOutcome::of(effect_of(value)))
        }

        StepField::Goto => apply_goto(store, row, raw, step_type, step_number),

        StepField::Report => {
            if blank {
                set(store, row, |s| {
                    s.report = None;
                    if mode == ApplyMode::Interactive {
                        s.report_value = None;
                    }
                });
                return Ok(FieldOutcome::of(FieldEffect::Cleared));
            }
            let value = Report::coerce(raw)
                .ok_or_else(|| ProcedureError::coercion(field, raw, "unknown report type"))?;
            if !legal.allows_report(value) {
                return Err(ProcedureError::coercion(
                    field,
                    raw,
                    format!("not allowed for {type_label}"),
                ));
            }
            set(store, row, |s| {
                if mode == ApplyMode::Interactive && s.report != Some(value) {
                    s.report_value = None;
                }
                s.report = Some(value);
            });
            Ok(FieldOutcome::of(FieldEffect::Set))
        }

        StepField::ReportValue => {
            let value = number(field, raw, !legal.reports.is_empty(), type_label)?;
            set(store, row, |s| s.report_value = value);
            Ok(FieldOutcome::of(effect_of(value)))
        }

        StepField::Note => {
            let note = (!blank).then(|| raw.to_string());
            let effect = effect_of(note.as_ref());
            set(store, row, |s| s.note = note);
            Ok(FieldOutcome::of(effect))
        }
    }
}

fn apply_goto(
    store: &mut ProcedureStore,
    row: Row,
    raw: &str,
    step_type: Option<StepType>,
    step_number: Option<u32>,
) -> Result<FieldOutcome> {
    let field = StepField::Goto;
    if !step_type.is_some_and(StepType::is_cycle_marker) {
        debug!(row, "goto is computed for this step; input discarded");
        return Ok(FieldOutcome::of(FieldEffect::Recomputed));
    }
    if raw.is_empty() {
        set(store, row, |s| s.branch_target = None);
        return Ok(FieldOutcome::of(FieldEffect::Cleared));
    }
    let target = parse_number(raw)
        .filter(|n| *n >= 1.0 && n.fract() == 0.0 && *n <= f64::from(u32::MAX))
        .map(|n| n as u32)
        .ok_or_else(|| ProcedureError::coercion(field, raw, "expected a step number"))?;
    if step_number.map(|n| n + 1) == Some(target) {
        set(store, row, |s| s.branch_target = None);
        return Ok(FieldOutcome::of(FieldEffect::Recomputed));
    }
    let target_row = store
        .row_of_step_number(target)
        .ok_or_else(|| ProcedureError::coercion(field, raw, format!("there is no step {target}")))?;
    set(store, row, |s| s.branch_target = Some(target_row));
    Ok(FieldOutcome::of(FieldEffect::Set))
}

fn set(store: &mut ProcedureStore, row: Row, f: impl FnOnce(&mut crate::step::Step)) {
    if let Some(step) = store.get_mut(row) {
        f(step);
    }
}

fn number(field: StepField, raw: &str, available: bool, type_label: &str) -> Result<Option<f64>> {
    if raw.is_empty() {
        return Ok(None);
    }
    if !available {
        return Err(ProcedureError::coercion(
            field,
            raw,
            format!("{type_label} does not take this value"),
        ));
    }
    parse_number(raw)
        .map(Some)
        .ok_or_else(|| ProcedureError::coercion(field, raw, "not a number"))
}

fn effect_of<T>(value: Option<T>) -> FieldEffect {
    if value.is_some() {
        FieldEffect::Set
    } else {
        FieldEffect::Cleared
    }
}

/// True when `row` is the last step of a block whose type takes further
/// sub-conditions.
fn closes_block(store: &ProcedureStore, row: Row) -> bool {
    let Some(block) = store.block(row) else {
        return false;
    };
    let main_type = store.get(block.main).and_then(|s| s.step_type);
    block.last == row && main_type.is_some_and(opens_sub_condition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;

    fn store_with(step_type: StepType) -> ProcedureStore {
        let mut store = ProcedureStore::new();
        store
            .insert_at(
                0,
                Step {
                    step_type: Some(step_type),
                    ..Step::default()
                },
            )
            .unwrap();
        store.insert_at(2, Step::blank()).unwrap();
        store.normalize();
        store
    }

    #[test]
    fn test_field_keys_and_headers() {
        assert_eq!(StepField::from_key("mode_value"), Some(StepField::ModeValue));
        assert_eq!(StepField::from_key("End Type"), Some(StepField::EndCondition));
        assert_eq!(StepField::from_key("GOTO"), Some(StepField::Goto));
        assert_eq!(StepField::from_key("speed"), None);
        assert_eq!(StepField::from_column(7), Some(StepField::Goto));
        assert_eq!(StepField::Note.column(), 10);
        assert_eq!(StepField::Report.to_string(), "report");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("2.5"), Some(2.5));
        assert_eq!(parse_number(" 2,5 "), Some(2.5));
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("abc"), None);
    }

    #[test]
    fn test_choices_follow_type() {
        let store = store_with(StepType::Charge);
        assert_eq!(
            choices(&store, 0, StepField::Mode),
            Choices::Fixed(vec!["Current", "Voltage", "Power"])
        );
        assert_eq!(choices(&store, 0, StepField::Operator), Choices::Unavailable);
        assert_eq!(choices(&store, 0, StepField::Goto), Choices::Computed);
        assert_eq!(choices(&store, 2, StepField::Mode), Choices::Unavailable);
        assert_eq!(choices(&store, 0, StepField::Note), Choices::Text);
    }

    #[test]
    fn test_mode_change_clears_value_interactively() {
        let mut store = store_with(StepType::Discharge);
        apply(&mut store, 0, StepField::Mode, "Current", ApplyMode::Interactive).unwrap();
        apply(&mut store, 0, StepField::ModeValue, "1,5", ApplyMode::Interactive).unwrap();
        assert_eq!(store.get(0).unwrap().mode_value, Some(1.5));
        apply(&mut store, 0, StepField::Mode, "Resistance", ApplyMode::Interactive).unwrap();
        assert_eq!(store.get(0).unwrap().mode_value, None);
    }

    #[test]
    fn test_illegal_mode_is_rejected_unchanged() {
        let mut store = store_with(StepType::Charge);
        let before = store.clone();
        let err = apply(&mut store, 0, StepField::Mode, "Resistance", ApplyMode::Interactive)
            .unwrap_err();
        assert!(err.is_field_local());
        assert_eq!(err.to_string(), "cannot set mode to 'Resistance': not allowed for Charge");
        assert_eq!(store, before);
    }

    #[test]
    fn test_mode_coerced_by_value() {
        let mut store = store_with(StepType::Charge);
        apply(&mut store, 0, StepField::Mode, "2", ApplyMode::Loading).unwrap();
        assert_eq!(store.get(0).unwrap().mode, Some(Mode::Power));
    }

    #[test]
    fn test_end_condition_resets_operator() {
        let mut store = store_with(StepType::Rest);
        apply(&mut store, 0, StepField::EndCondition, "Voltage", ApplyMode::Interactive).unwrap();
        apply(&mut store, 0, StepField::Operator, ">d1", ApplyMode::Interactive).unwrap();
        apply(&mut store, 0, StepField::EndValue, "4.2", ApplyMode::Interactive).unwrap();

        apply(&mut store, 0, StepField::EndCondition, "Step_time", ApplyMode::Interactive)
            .unwrap();
        let step = store.get(0).unwrap();
        assert_eq!(step.operator, Some(Operator::Equal));
        assert_eq!(step.end_value, None);

        apply(&mut store, 0, StepField::EndCondition, "Amp_Hour", ApplyMode::Interactive).unwrap();
        assert_eq!(store.get(0).unwrap().operator, None);
    }

    #[test]
    fn test_operator_needs_end_condition() {
        let mut store = store_with(StepType::Rest);
        let err = apply(&mut store, 0, StepField::Operator, "=", ApplyMode::Interactive)
            .unwrap_err();
        assert!(err.to_string().contains("set the end condition first"));
        apply(&mut store, 0, StepField::EndCondition, "Watt_Hour", ApplyMode::Interactive)
            .unwrap();
        assert!(apply(&mut store, 0, StepField::Operator, "=", ApplyMode::Interactive).is_err());
        apply(&mut store, 0, StepField::Operator, "More_than", ApplyMode::Interactive).unwrap();
        assert_eq!(store.get(0).unwrap().operator, Some(Operator::AtMost));
    }

    #[test]
    fn test_end_condition_on_charge_opens_sub_condition() {
        let mut store = store_with(StepType::Charge);
        let outcome =
            apply(&mut store, 0, StepField::EndCondition, "Voltage", ApplyMode::Interactive)
                .unwrap();
        assert!(outcome.open_sub_condition);

        let mut rest = store_with(StepType::Rest);
        let outcome =
            apply(&mut rest, 0, StepField::EndCondition, "Voltage", ApplyMode::Interactive)
                .unwrap();
        assert!(!outcome.open_sub_condition);

        let outcome =
            apply(&mut store, 0, StepField::EndCondition, "Current", ApplyMode::Loading).unwrap();
        assert!(!outcome.open_sub_condition);
    }

    #[test]
    fn test_goto_is_computed_on_plain_steps() {
        let mut store = store_with(StepType::Rest);
        let outcome = apply(&mut store, 0, StepField::Goto, "7", ApplyMode::Interactive).unwrap();
        assert_eq!(outcome.effect, FieldEffect::Recomputed);
        assert_eq!(store.get(0).unwrap().branch_target, None);
    }

    #[test]
    fn test_goto_sets_branch_on_cycle_marker() {
        let mut store = store_with(StepType::Rest);
        store.get_mut(2).unwrap().step_type = Some(StepType::CycleEnd);
        store.normalize();
        let outcome = apply(&mut store, 2, StepField::Goto, "1", ApplyMode::Interactive).unwrap();
        assert_eq!(outcome.effect, FieldEffect::Set);
        assert_eq!(store.get(2).unwrap().branch_target, Some(0));
        assert!(apply(&mut store, 2, StepField::Goto, "9", ApplyMode::Interactive).is_err());
        assert!(apply(&mut store, 2, StepField::Goto, "1.5", ApplyMode::Interactive).is_err());
        apply(&mut store, 2, StepField::Goto, "", ApplyMode::Interactive).unwrap();
        assert_eq!(store.get(2).unwrap().branch_target, None);
    }

    #[test]
    fn test_type_rules() {
        let mut store = store_with(StepType::Charge);
        store.insert_at(1, Step::sub(0)).unwrap();
        assert!(apply(&mut store, 0, StepField::Type, "Sub", ApplyMode::Loading).is_err());
        assert!(apply(&mut store, 1, StepField::Type, "Rest", ApplyMode::Loading).is_err());
        assert!(apply(&mut store, 0, StepField::Type, "Turbo", ApplyMode::Loading).is_err());
        apply(&mut store, 0, StepField::Type, "8", ApplyMode::Loading).unwrap();
        assert_eq!(store.get(0).unwrap().step_type, Some(StepType::Dcir));
        assert!(apply(&mut store, 0, StepField::StepNumber, "4", ApplyMode::Loading).is_err());
    }

    #[test]
    fn test_sub_uses_parent_rules() {
        let mut store = store_with(StepType::Discharge);
        store.insert_at(1, Step::sub(0)).unwrap();
        store.normalize();
        apply(&mut store, 1, StepField::EndCondition, "Voltage", ApplyMode::Interactive).unwrap();
        assert!(
            apply(&mut store, 1, StepField::EndCondition, "Cycle_Count", ApplyMode::Interactive)
                .is_err()
        );
    }

    #[test]
    fn test_values_rejected_where_not_taken() {
        let mut store = store_with(StepType::Eis);
        assert!(apply(&mut store, 0, StepField::EndValue, "1", ApplyMode::Loading).is_err());
        assert!(apply(&mut store, 0, StepField::ModeValue, "x", ApplyMode::Loading).is_err());
        let outcome = apply(&mut store, 0, StepField::Note, "  ", ApplyMode::Loading).unwrap();
        assert_eq!(outcome.effect, FieldEffect::Cleared);
        apply(&mut store, 0, StepField::Note, "check cell", ApplyMode::Loading).unwrap();
        assert_eq!(store.get(0).unwrap().note.as_deref(), Some("check cell"));
    }
}
