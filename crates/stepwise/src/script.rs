//! Scripted editing operations for the `edit` command.
//!
//! Each `-e` argument is one operation; rows are the row numbers printed by
//! `stepwise show`.

use stepwise_procedure::{
    EditSession, FieldChange, ProcedureError, Row, StepEnum, StepField, SweepEditor, SweepMode,
    SweepParameter,
};
use thiserror::Error;

/// One parsed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOp {
    Insert(Row),
    Delete(Row),
    Copy(Row),
    Paste(Row),
    AddSub(Row),
    SetType(Row, String),
    Set(Row, StepField, String),
    Sweep(Row, SweepParameter),
    Undo,
    Redo,
}

/// Why an operation could not be parsed or applied.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("{0}")]
    Syntax(String),

    /// The procedure model refused the edit.
    #[error(transparent)]
    Refused(#[from] ProcedureError),

    /// The session reverted a field value.
    #[error("value rejected: {0}")]
    Reverted(String),
}

const USAGE: &str = "expected one of: insert R, delete R, copy R, paste R, sub R, type R TYPE, \
set R FIELD VALUE, sweep R MODE START STOP AMPLITUDE POINTS [PATH], undo, redo";

fn syntax(msg: impl Into<String>) -> ScriptError {
    ScriptError::Syntax(msg.into())
}

fn parse_row(raw: Option<&str>) -> Result<Row, ScriptError> {
    let raw = raw.ok_or_else(|| syntax("missing row number"))?;
    raw.parse()
        .map_err(|_| syntax(format!("'{raw}' is not a row number")))
}

fn parse_float(name: &str, raw: Option<&str>) -> Result<f64, ScriptError> {
    let raw = raw.ok_or_else(|| syntax(format!("missing {name}")))?;
    raw.parse()
        .map_err(|_| syntax(format!("{name} '{raw}' is not a number")))
}

/// Parse one operation. The value of `set` is the rest of the line, so notes
/// may contain spaces.
pub fn parse_op(line: &str) -> Result<ScriptOp, ScriptError> {
    let line = line.trim();
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim_start();

    match verb.to_lowercase().as_str() {
        "undo" => Ok(ScriptOp::Undo),
        "redo" => Ok(ScriptOp::Redo),
        "insert" => Ok(ScriptOp::Insert(parse_row(rest.split_whitespace().next())?)),
        "delete" => Ok(ScriptOp::Delete(parse_row(rest.split_whitespace().next())?)),
        "copy" => Ok(ScriptOp::Copy(parse_row(rest.split_whitespace().next())?)),
        "paste" => Ok(ScriptOp::Paste(parse_row(rest.split_whitespace().next())?)),
        "sub" => Ok(ScriptOp::AddSub(parse_row(rest.split_whitespace().next())?)),
        "type" => {
            let mut words = rest.split_whitespace();
            let row = parse_row(words.next())?;
            let name = words.next().ok_or_else(|| syntax("missing step type"))?;
            Ok(ScriptOp::SetType(row, name.to_string()))
        }
        "set" => {
            let mut parts = rest.splitn(3, char::is_whitespace);
            let row = parse_row(parts.next())?;
            let key = parts.next().ok_or_else(|| syntax("missing field name"))?;
            let field =
                StepField::from_key(key).ok_or_else(|| syntax(format!("unknown field '{key}'")))?;
            let value = parts.next().unwrap_or("").trim();
            Ok(ScriptOp::Set(row, field, value.to_string()))
        }
        "sweep" => {
            let mut words = rest.split_whitespace();
            let row = parse_row(words.next())?;
            let mode_name = words.next().ok_or_else(|| syntax("missing sweep mode"))?;
            let mode = SweepMode::coerce(mode_name)
                .ok_or_else(|| syntax(format!("unknown sweep mode '{mode_name}'")))?;
            let start_frequency_hz = parse_float("start frequency", words.next())?;
            let stop_frequency_hz = parse_float("stop frequency", words.next())?;
            let amplitude = parse_float("amplitude", words.next())?;
            let points = words.next().ok_or_else(|| syntax("missing point count"))?;
            let point_count = points
                .parse()
                .map_err(|_| syntax(format!("point count '{points}' is not a whole number")))?;
            let source_file_path = words.next().map(str::to_string);
            Ok(ScriptOp::Sweep(
                row,
                SweepParameter {
                    mode,
                    start_frequency_hz,
                    stop_frequency_hz,
                    amplitude,
                    point_count,
                    source_file_path,
                    ..SweepParameter::default()
                },
            ))
        }
        "" => Err(syntax(format!("empty operation; {USAGE}"))),
        other => Err(syntax(format!("unknown operation '{other}'; {USAGE}"))),
    }
}

/// Field edits go through the session's change intake; a reverted value
/// fails the script.
fn set(
    session: &mut EditSession,
    row: Row,
    field: StepField,
    raw: &str,
) -> Result<(), ScriptError> {
    match session.on_field_changed(row, field, raw)? {
        FieldChange::Applied(_) => Ok(()),
        FieldChange::Reverted { reason } => Err(ScriptError::Reverted(reason)),
    }
}

/// Apply one operation to `session`.
pub fn apply(session: &mut EditSession, op: ScriptOp) -> Result<(), ScriptError> {
    let result = match op {
        ScriptOp::Insert(row) => session.insert_step_block(row).map(drop),
        ScriptOp::Delete(row) => session.delete_step_block(row).map(drop),
        ScriptOp::Copy(row) => session.copy_block(row),
        ScriptOp::Paste(row) => session.paste_block(row).map(drop),
        ScriptOp::AddSub(row) => session.add_sub_step(row).map(drop),
        ScriptOp::SetType(row, name) => return set(session, row, StepField::Type, &name),
        ScriptOp::Set(row, field, value) => return set(session, row, field, &value),
        ScriptOp::Sweep(row, sweep) => session.attach_sweep(row, sweep),
        ScriptOp::Undo => {
            if !session.undo() {
                return Err(syntax("nothing to undo"));
            }
            Ok(())
        }
        ScriptOp::Redo => {
            if !session.redo() {
                return Err(syntax("nothing to redo"));
            }
            Ok(())
        }
    };
    Ok(result?)
}

/// Gives new EIS steps the default sweep, keeping existing parameters.
pub struct DefaultSweep;

impl SweepEditor for DefaultSweep {
    fn edit(
        &mut self,
        step_number: u32,
        existing: Option<&SweepParameter>,
    ) -> Option<SweepParameter> {
        Some(
            existing
                .cloned()
                .unwrap_or_else(|| SweepParameter::for_step(step_number)),
        )
    }
}
