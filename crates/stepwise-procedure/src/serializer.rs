//! Procedure files.
//!
//! A procedure is stored as one sheet, in delimited text or as an xlsx
//! workbook. Columns 0-11 hold the steps (one row per step, sub-steps with a
//! blank step number), column 12 is empty, and columns 13-19 hold the sweep
//! parameters of EIS steps:
//!
//! ```text
//! Step,Type,Mode,Mode value,End Type,Operator,End Value,Go to,Report Type,
//!     Report value,Note,Rows,,Step,Mode,Start_Frequency,Stop_Frequency,
//!     Amplitude,PointNumber,EIS_Rows
//! 1,Rest,,,Step_time,=,3,2,Step_time,1,,2,,,,,,,,
//! 2,End,,,,,,,,,,,,,,,,,,
//! ```
//!
//! The `Rows` and `EIS_Rows` cells of the first data row carry the number of
//! step rows and sweep rows.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::config::FormatConfig;
use crate::error::{ProcedureError, Result};
use crate::field::{self, parse_number, ApplyMode, StepField};
use crate::step::{format_number, Row, Step, SweepParameter};
use crate::store::ProcedureStore;
use crate::tabular::{read_table, write_table, SheetKind};
use crate::types::{StepEnum, StepType, SweepMode};

const ROWS_COLUMN: usize = 11;
const SWEEP_COLUMN: usize = 13;
const WIDTH: usize = 20;

const SWEEP_HEADERS: [&str; 7] = [
    "Step",
    "Mode",
    "Start_Frequency",
    "Stop_Frequency",
    "Amplitude",
    "PointNumber",
    "EIS_Rows",
];

// ---------------------------------------------------------------------------
//  Save
// ---------------------------------------------------------------------------

/// Encode `store` as delimited text.
pub fn save(store: &ProcedureStore, format: &FormatConfig) -> Result<Vec<u8>> {
    save_sheet(store, format.delimited())
}

/// Encode `store` as a procedure file of the given kind.
///
/// Placeholders and unconfigured sub-steps are left out, and an `End` step is
/// appended when the procedure does not finish with one.
pub fn save_sheet(store: &ProcedureStore, kind: SheetKind) -> Result<Vec<u8>> {
    let export = export_view(store)?;

    let step_rows: Vec<Vec<String>> = export
        .all()
        .map(|(row, step)| step_cells(&export, row, step))
        .collect();
    let mut sweeps: Vec<&SweepParameter> = export.sweeps().map(|(_, s)| s).collect();
    sweeps.sort_by_key(|s| s.step_number);

    let mut table = vec![header_row()];
    let height = step_rows.len().max(sweeps.len());
    for i in 0..height {
        let mut record = vec![String::new(); WIDTH];
        if let Some(cells) = step_rows.get(i) {
            record[..cells.len()].clone_from_slice(cells);
        }
        if let Some(sweep) = sweeps.get(i) {
            record[SWEEP_COLUMN..SWEEP_COLUMN + 6].clone_from_slice(&sweep_cells(sweep));
        }
        if i == 0 {
            record[ROWS_COLUMN] = step_rows.len().to_string();
            if !sweeps.is_empty() {
                record[WIDTH - 1] = sweeps.len().to_string();
            }
        }
        table.push(record);
    }

    debug!(steps = step_rows.len(), sweeps = sweeps.len(), "encoded procedure");
    write_table(&table, kind)
}

/// Copy of `store` reduced to what a procedure file holds.
fn export_view(store: &ProcedureStore) -> Result<ProcedureStore> {
    let mut export = store.clone();

    let mut dropped: Vec<Row> = Vec::new();
    for main in export.main_rows() {
        let placeholder = export.get(main).is_some_and(Step::is_placeholder);
        if placeholder {
            if let Some(block) = export.block(main) {
                dropped.extend(
                    export
                        .all()
                        .map(|(r, _)| r)
                        .filter(|r| (block.main..=block.last).contains(r)),
                );
            }
        }
    }
    dropped.extend(
        export
            .all()
            .filter(|(_, s)| s.is_sub() && s.end_condition.is_none())
            .map(|(r, _)| r),
    );
    for row in dropped {
        export.steps.remove(&row);
        export.sweeps.attached.remove(&row);
    }
    if !export.sweeps.orphaned.is_empty() {
        debug!(count = export.sweeps.orphaned.len(), "orphaned sweeps not saved");
        export.sweeps.orphaned.clear();
    }

    let ends = export
        .trailing_main()
        .and_then(|r| export.get(r))
        .is_some_and(Step::is_terminal);
    if !ends {
        let at = export.last_row().map_or(0, |last| last + 2);
        export.insert_at(
            at,
            Step {
                step_type: Some(StepType::End),
                ..Step::default()
            },
        )?;
    }

    export.normalize();
    export.check_invariants()?;
    Ok(export)
}

fn header_row() -> Vec<String> {
    let mut header: Vec<String> = StepField::ALL.iter().map(|f| f.header().to_string()).collect();
    header.push("Rows".to_string());
    header.push(String::new());
    header.extend(SWEEP_HEADERS.iter().map(|h| h.to_string()));
    header
}

fn step_cells(store: &ProcedureStore, row: Row, step: &Step) -> Vec<String> {
    StepField::ALL
        .iter()
        .map(|field| match field {
            StepField::Mode if step.step_type == Some(StepType::Eis) => store
                .sweep(row)
                .and_then(|s| s.source_file_path.clone())
                .unwrap_or_default(),
            _ => step.field_text(*field),
        })
        .collect()
}

fn sweep_cells(sweep: &SweepParameter) -> [String; 6] {
    [
        sweep.step_number.to_string(),
        sweep.mode.name().to_string(),
        format_number(sweep.start_frequency_hz),
        format_number(sweep.stop_frequency_hz),
        format_number(sweep.amplitude),
        sweep.point_count.to_string(),
    ]
}

// ---------------------------------------------------------------------------
//  Load
// ---------------------------------------------------------------------------

/// Decode delimited text.
pub fn load(bytes: &[u8], format: &FormatConfig) -> Result<ProcedureStore> {
    load_sheet(bytes, format.delimited())
}

/// Decode a procedure file of the given kind. Nothing is returned unless the
/// whole document parses into a consistent procedure.
pub fn load_sheet(bytes: &[u8], kind: SheetKind) -> Result<ProcedureStore> {
    let table = read_table(bytes, kind)?;
    let mut records = table.iter().enumerate();

    let (_, header) = records
        .next()
        .ok_or_else(|| ProcedureError::format(None, "document is empty"))?;
    for field in StepField::ALL {
        let found = cell(header, field.column());
        if !found.eq_ignore_ascii_case(field.header()) {
            return Err(ProcedureError::format(
                Some(1),
                format!(
                    "column {} should be '{}', found '{found}'",
                    field.column() + 1,
                    field.header()
                ),
            ));
        }
    }
    let has_sweeps = cell(header, SWEEP_COLUMN).eq_ignore_ascii_case(SWEEP_HEADERS[0]);

    let mut builder = LoadBuilder::default();
    for (index, record) in records {
        let table_row = index + 1;
        if (0..ROWS_COLUMN).any(|c| !cell(record, c).is_empty()) {
            builder.push_step(table_row, record)?;
        }
        if has_sweeps && (SWEEP_COLUMN..WIDTH - 1).any(|c| !cell(record, c).is_empty()) {
            if let Some(sweep) = parse_sweep(table_row, record) {
                builder.sweeps.push(sweep);
            }
        }
    }
    builder.finish()
}

fn cell(record: &[String], column: usize) -> &str {
    record.get(column).map_or("", |c| c.trim())
}

/// Positive whole number, as written for step numbers.
fn parse_index(raw: &str) -> Option<u32> {
    parse_number(raw)
        .filter(|n| *n >= 1.0 && n.fract() == 0.0 && *n <= f64::from(u32::MAX))
        .map(|n| n as u32)
}

fn parse_sweep(table_row: usize, record: &[String]) -> Option<SweepParameter> {
    let Some(step_number) = parse_index(cell(record, SWEEP_COLUMN)) else {
        warn!(row = table_row, "sweep row without a step number skipped");
        return None;
    };
    let defaults = SweepParameter::for_step(step_number);
    let number = |offset: usize, fallback: f64| {
        let raw = cell(record, SWEEP_COLUMN + offset);
        parse_number(raw).unwrap_or_else(|| {
            warn!(
                row = table_row,
                column = SWEEP_COLUMN + offset,
                value = raw,
                "sweep value is not a number"
            );
            fallback
        })
    };
    let mode_cell = cell(record, SWEEP_COLUMN + 1);
    let mode = SweepMode::coerce(mode_cell).unwrap_or_else(|| {
        warn!(row = table_row, value = mode_cell, "unknown sweep mode");
        defaults.mode
    });
    let points_cell = cell(record, SWEEP_COLUMN + 5);
    let point_count = parse_index(points_cell).unwrap_or_else(|| {
        warn!(
            row = table_row,
            value = points_cell,
            "sweep point count is not a whole number"
        );
        defaults.point_count
    });
    Some(SweepParameter {
        step_number,
        mode,
        start_frequency_hz: number(2, defaults.start_frequency_hz),
        stop_frequency_hz: number(3, defaults.stop_frequency_hz),
        amplitude: number(4, defaults.amplitude),
        point_count,
        source_file_path: None,
    })
}

/// Assigns canonical rows while reading: each main step opens a block two
/// rows after the previous block's last row, sub-steps follow directly.
#[derive(Default)]
struct LoadBuilder {
    store: ProcedureStore,
    last: Option<Row>,
    current_main: Option<Row>,
    /// Step number written in the file, per main row.
    file_numbers: BTreeMap<u32, Row>,
    /// Cycle markers whose goto cell named a step number.
    branches: Vec<(Row, Option<u32>, u32)>,
    sweep_paths: BTreeMap<Row, String>,
    sweeps: Vec<SweepParameter>,
}

impl LoadBuilder {
    fn push_step(&mut self, table_row: usize, record: &[String]) -> Result<()> {
        let number = parse_index(cell(record, StepField::StepNumber.column()));
        let row = match number {
            Some(_) => self.last.map_or(0, |last| last + 2),
            None => self.last.map_or(0, |last| last + 1),
        };

        let step = match number {
            Some(_) => Step::blank(),
            None => {
                let mut sub = Step::sub(0);
                sub.depends_on = self.current_main;
                sub.unlinked = self.current_main.is_none();
                if sub.unlinked {
                    warn!(row = table_row, "sub-step before any main step");
                }
                sub
            }
        };
        self.store.insert_at(row, step)?;
        self.last = Some(row);

        if let Some(n) = number {
            self.current_main = Some(row);
            if self.file_numbers.insert(n, row).is_some() {
                warn!(row = table_row, step = n, "duplicate step number");
            }
            let type_cell = cell(record, StepField::Type.column());
            if !type_cell.is_empty() {
                self.assign(table_row, row, StepField::Type, type_cell);
            }
        } else {
            let type_cell = cell(record, StepField::Type.column());
            if StepType::coerce(type_cell).is_some_and(|t| t != StepType::Sub) {
                warn!(
                    row = table_row,
                    value = type_cell,
                    "row without a step number read as a sub-step"
                );
            }
        }

        let step_type = self.store.get(row).and_then(|s| s.step_type);
        for field in StepField::ALL {
            let raw = cell(record, field.column());
            match field {
                StepField::StepNumber | StepField::Type => {}
                StepField::Mode if step_type == Some(StepType::Eis) => {
                    if !raw.is_empty() {
                        self.sweep_paths.insert(row, raw.to_string());
                    }
                }
                StepField::Goto => {
                    let cycle = step_type.is_some_and(StepType::is_cycle_marker);
                    if let (true, Some(target)) = (cycle, parse_index(raw)) {
                        self.branches.push((row, number, target));
                    }
                }
                _ if raw.is_empty() => {}
                _ => self.assign(table_row, row, field, raw),
            }
        }
        Ok(())
    }

    fn assign(&mut self, table_row: usize, row: Row, field: StepField, raw: &str) {
        if let Err(err) = field::apply(&mut self.store, row, field, raw, ApplyMode::Loading) {
            warn!(row = table_row, %field, error = %err, "cell left blank");
        }
    }

    fn finish(mut self) -> Result<ProcedureStore> {
        for (row, own, target) in std::mem::take(&mut self.branches) {
            if own.map(|n| n + 1) == Some(target) {
                continue;
            }
            match self.file_numbers.get(&target) {
                Some(target_row) => {
                    if let Some(step) = self.store.get_mut(row) {
                        step.branch_target = Some(*target_row);
                    }
                }
                None => warn!(row, target, "goto names a missing step; falling through"),
            }
        }

        for mut sweep in std::mem::take(&mut self.sweeps) {
            let owner = self.file_numbers.get(&sweep.step_number).copied().filter(|row| {
                self.store.get(*row).and_then(|s| s.step_type) == Some(StepType::Eis)
                    && self.store.sweep(*row).is_none()
            });
            match owner {
                Some(row) => {
                    sweep.source_file_path = self.sweep_paths.remove(&row);
                    self.store.attach_sweep(row, sweep);
                }
                None => {
                    warn!(step = sweep.step_number, "sweep has no EIS step; kept as orphan");
                    self.store.push_orphan_sweep(sweep);
                }
            }
        }
        for (row, path) in std::mem::take(&mut self.sweep_paths) {
            debug!(row, "EIS step without sweep row; using defaults");
            let sweep = SweepParameter {
                source_file_path: Some(path),
                ..SweepParameter::default()
            };
            self.store.attach_sweep(row, sweep);
        }

        let mut store = self.store;
        store.normalize();
        store
            .check_invariants()
            .map_err(|err| ProcedureError::format(None, err.to_string()))?;
        debug!(steps = store.len(), sweeps = store.sweeps().count(), "decoded procedure");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EndCondition, Mode, Operator};

    fn text(bytes: &[u8]) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn header() -> String {
        concat!(
            "Step,Type,Mode,Mode value,End Type,Operator,End Value,Go to,Report Type,",
            "Report value,Note,Rows,,Step,Mode,Start_Frequency,Stop_Frequency,Amplitude,",
            "PointNumber,EIS_Rows\r\n"
        )
        .to_string()
    }

    fn seeded() -> ProcedureStore {
        let mut store = ProcedureStore::new();
        store.insert_at(0, Step::seed()).unwrap();
        store.insert_at(2, Step::blank()).unwrap();
        store.normalize();
        store
    }

    #[test]
    fn test_save_seeded_procedure() {
        let bytes = save(&seeded(), &FormatConfig::default()).unwrap();
        let expected = format!(
            "{}1,Rest,,,Step_time,=,3,2,Step_time,1,,2,,,,,,,,\r\n2,End,,,,,,,,,,,,,,,,,,\r\n",
            header()
        );
        assert_eq!(text(&bytes), expected);
    }

    #[test]
    fn test_save_leaves_store_untouched() {
        let store = seeded();
        let before = store.clone();
        save(&store, &FormatConfig::default()).unwrap();
        assert_eq!(store, before);
    }

    #[test]
    fn test_save_and_load_sub_steps() {
        let mut store = seeded();
        store.change_step_type(0, StepType::Charge).unwrap();
        store
            .set_field(0, StepField::EndCondition, "Voltage", ApplyMode::Interactive)
            .unwrap();
        store
            .set_field(0, StepField::Operator, ">=", ApplyMode::Interactive)
            .unwrap();
        store
            .set_field(1, StepField::EndCondition, "Step_time", ApplyMode::Interactive)
            .unwrap();

        let bytes = save(&store, &FormatConfig::default()).unwrap();
        let lines: Vec<String> = text(&bytes).lines().map(str::to_string).collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].starts_with(",Sub,,,Step_time,=,,2,"));

        let loaded = load(&bytes, &FormatConfig::default()).unwrap();
        assert_eq!(loaded.rows(), vec![0, 1, 3]);
        let sub = loaded.get(1).unwrap();
        assert_eq!(sub.depends_on, Some(0));
        assert_eq!(sub.end_condition, Some(EndCondition::StepTime));
        assert_eq!(loaded.get(0).unwrap().operator, Some(Operator::AtLeast));
    }

    #[test]
    fn test_blank_number_after_eis_loads_as_sub() {
        let input = format!(
            "{}{}{}{}",
            header(),
            "1,EIS,sweep.csv,,,,,2,,,,3,,1,PEIS,1000,1,0.005,20,1\r\n",
            ",Sub,,,,,,,,,,,,,,,,,,\r\n",
            "2,End,,,,,,,,,,,,,,,,,,\r\n"
        );
        let store = load(input.as_bytes(), &FormatConfig::default()).unwrap();
        let sub = store.get(1).unwrap();
        assert!(sub.is_sub());
        assert_eq!(sub.depends_on, Some(0));
        let sweep = store.sweep(0).unwrap();
        assert_eq!(sweep.mode, SweepMode::Potentiostatic);
        assert_eq!(sweep.point_count, 20);
        assert_eq!(sweep.source_file_path.as_deref(), Some("sweep.csv"));
    }

    #[test]
    fn test_unknown_values_load_blank() {
        let input = format!(
            "{}1,Charge,Turbo,abc,Voltage,=,4.2,2,,,,2\r\n2,End\r\n",
            header()
        );
        let store = load(input.as_bytes(), &FormatConfig::default()).unwrap();
        let step = store.get(0).unwrap();
        assert_eq!(step.mode, None);
        assert_eq!(step.mode_value, None);
        assert_eq!(step.end_condition, Some(EndCondition::Voltage));
        assert_eq!(step.end_value, Some(4.2));
    }

    #[test]
    fn test_fractional_index_loads_blank() {
        let input = format!("{}1,3.7,,,1.5,,,,,,\r\n2,End\r\n", header());
        let store = load(input.as_bytes(), &FormatConfig::default()).unwrap();
        let step = store.get(0).unwrap();
        assert_eq!(step.step_type, None);
        assert_eq!(step.end_condition, None);
    }

    #[test]
    fn test_workbook_round_trip() {
        let mut store = seeded();
        store.change_step_type(2, StepType::Eis).unwrap();
        store
            .attach_sweep_to(
                2,
                SweepParameter {
                    source_file_path: Some("eis/cell-07.csv".to_string()),
                    ..SweepParameter::default()
                },
            )
            .unwrap();
        store
            .set_field(0, StepField::Note, "1.50", ApplyMode::Interactive)
            .unwrap();

        let bytes = save_sheet(&store, SheetKind::Workbook).unwrap();
        let loaded = load_sheet(&bytes, SheetKind::Workbook).unwrap();
        assert_eq!(loaded.get(0).unwrap().note.as_deref(), Some("1.50"));
        assert_eq!(loaded.get(0).unwrap().end_value, Some(3.0));
        let eis = loaded.row_of_step_number(2).unwrap();
        let sweep = loaded.sweep(eis).unwrap();
        assert_eq!(sweep.point_count, 50);
        assert_eq!(sweep.source_file_path.as_deref(), Some("eis/cell-07.csv"));

        let text = save(&loaded, &FormatConfig::default()).unwrap();
        assert_eq!(text, save(&store, &FormatConfig::default()).unwrap());
    }

    #[test]
    fn test_values_coerced_by_index() {
        let input = format!("{}1,1,0,1.5,2,0,,,,,\r\n", header());
        let store = load(input.as_bytes(), &FormatConfig::default()).unwrap();
        let step = store.get(0).unwrap();
        assert_eq!(step.step_type, Some(StepType::Charge));
        assert_eq!(step.mode, Some(Mode::Current));
        assert_eq!(step.end_condition, Some(EndCondition::Voltage));
        assert_eq!(step.operator, None);
    }

    #[test]
    fn test_cycle_branch_round_trip() {
        let input = format!(
            "{}{}{}{}{}",
            header(),
            "1,Cycle_start,,,,,,2,,,,4\r\n",
            "2,Charge,Current,1,Voltage,>=,4.2,3,,,\r\n",
            "3,Cycle_end,,,Cycle_Count,=,5,1,,,\r\n",
            "4,End\r\n"
        );
        let store = load(input.as_bytes(), &FormatConfig::default()).unwrap();
        let cycle_end = store.row_of_step_number(3).unwrap();
        assert_eq!(store.get(cycle_end).unwrap().goto, Some(1));
        assert_eq!(store.get(cycle_end).unwrap().branch_target, Some(0));

        let saved = save(&store, &FormatConfig::default()).unwrap();
        let again = save(&load(&saved, &FormatConfig::default()).unwrap(), &FormatConfig::default())
            .unwrap();
        assert_eq!(saved, again);
    }

    #[test]
    fn test_orphan_sweep_is_kept_then_dropped() {
        let input = format!(
            "{}1,Rest,,,,,,,,,,1,,4,GEIS,100000,0.1,0.01,50,1\r\n",
            header()
        );
        let store = load(input.as_bytes(), &FormatConfig::default()).unwrap();
        assert_eq!(store.orphaned_sweeps().len(), 1);
        let saved = text(&save(&store, &FormatConfig::default()).unwrap());
        assert!(!saved.contains("GEIS"));
    }

    #[test]
    fn test_missing_header_is_rejected() {
        let err = load(b"Step,Kind\r\n1,Rest\r\n", &FormatConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            ProcedureError::SerializationFormat { row: Some(1), .. }
        ));
        assert!(load(b"", &FormatConfig::default()).is_err());
    }

    #[test]
    fn test_end_in_the_middle_is_rejected() {
        let input = format!("{}1,End\r\n2,Rest\r\n", header());
        let err = load(input.as_bytes(), &FormatConfig::default()).unwrap_err();
        assert!(matches!(err, ProcedureError::SerializationFormat { .. }));
    }

    #[test]
    fn test_semicolon_delimiter() {
        let format = FormatConfig { delimiter: ';' };
        let bytes = save(&seeded(), &format).unwrap();
        assert!(text(&bytes).starts_with("Step;Type;Mode"));
        let store = load(&bytes, &format).unwrap();
        assert_eq!(store.main_count(), 2);
    }
}
