//! Procedure files written by one session and read back by another.

use stepwise_procedure::serializer::{load, save};
use stepwise_procedure::{
    EditSession, EditorConfig, FieldChange, FormatConfig, Orphan, ProcedureError, StepField,
    StepType, SweepMode, SweepParameter,
};

const HEADER: &str = concat!(
    "Step,Type,Mode,Mode value,End Type,Operator,End Value,",
    "Go to,Report Type,Report value,Note\r\n",
);

/// Formation procedure: rest, CC-CV charge with a sub-condition, an impedance
/// sweep and a three-fold discharge cycle.
fn formation() -> EditSession {
    let mut session = EditSession::new(EditorConfig::default());
    let set = |session: &mut EditSession, row, field, value: &str| {
        let change = session.on_field_changed(row, field, value).unwrap();
        assert!(
            matches!(change, FieldChange::Applied(_)),
            "row {row} {field} = {value}: {change:?}"
        );
    };

    set(&mut session, 2, StepField::Type, "Charge");
    set(&mut session, 2, StepField::Mode, "Voltage");
    set(&mut session, 2, StepField::ModeValue, "4.2");
    set(&mut session, 2, StepField::EndCondition, "Current");
    set(&mut session, 2, StepField::Operator, "<=");
    set(&mut session, 2, StepField::EndValue, "0.05");
    set(&mut session, 3, StepField::EndCondition, "Step_time");
    set(&mut session, 3, StepField::EndValue, "7200");
    set(&mut session, 2, StepField::Note, "CV hold, then stop");

    let eis = session.store().trailing_main().unwrap();
    set(&mut session, eis, StepField::Type, "EIS");
    session
        .attach_sweep(
            eis,
            SweepParameter {
                mode: SweepMode::Potentiostatic,
                start_frequency_hz: 10_000.0,
                stop_frequency_hz: 0.5,
                amplitude: 0.005,
                point_count: 40,
                source_file_path: Some("eis/after-charge.csv".to_string()),
                ..SweepParameter::default()
            },
        )
        .unwrap();

    let start = session.store().trailing_main().unwrap();
    set(&mut session, start, StepField::Type, "Cycle_start");
    let discharge = session.store().trailing_main().unwrap();
    set(&mut session, discharge, StepField::Type, "Discharge");
    set(&mut session, discharge, StepField::Mode, "Current");
    set(&mut session, discharge, StepField::ModeValue, "-1");
    set(&mut session, discharge, StepField::EndCondition, "Voltage");
    set(&mut session, discharge, StepField::Operator, "<=");
    set(&mut session, discharge, StepField::EndValue, "2.8");
    let end = session.store().trailing_main().unwrap();
    set(&mut session, end, StepField::Type, "Cycle_end");
    set(&mut session, end, StepField::EndValue, "3");
    let number = session.store().get(start).unwrap().step_number.unwrap();
    set(&mut session, end, StepField::Goto, &number.to_string());
    session
}

#[test]
fn test_save_load_save_is_stable() {
    let session = formation();
    let format = FormatConfig::default();
    let first = session.to_bytes().unwrap();
    let reloaded = load(&first, &format).unwrap();
    let second = save(&reloaded, &format).unwrap();
    assert_eq!(
        String::from_utf8(first).unwrap(),
        String::from_utf8(second).unwrap()
    );
}

#[test]
fn test_reloaded_procedure_matches() {
    let session = formation();
    let reloaded = load(&session.to_bytes().unwrap(), &FormatConfig::default()).unwrap();

    let types: Vec<StepType> = reloaded
        .all()
        .filter(|(_, s)| s.is_main())
        .filter_map(|(_, s)| s.step_type)
        .collect();
    assert_eq!(
        types,
        vec![
            StepType::Rest,
            StepType::Charge,
            StepType::Eis,
            StepType::CycleStart,
            StepType::Discharge,
            StepType::CycleEnd,
            StepType::End,
        ]
    );

    let charge = reloaded.row_of_step_number(2).unwrap();
    let subs = reloaded.sub_rows(charge);
    assert_eq!(subs.len(), 1);
    assert_eq!(reloaded.get(subs[0]).unwrap().end_value, Some(7200.0));
    assert_eq!(
        reloaded.get(charge).unwrap().note.as_deref(),
        Some("CV hold, then stop")
    );

    let eis = reloaded.row_of_step_number(3).unwrap();
    let sweep = reloaded.sweep(eis).unwrap();
    assert_eq!(sweep.step_number, 3);
    assert_eq!(sweep.point_count, 40);
    assert_eq!(
        sweep.source_file_path.as_deref(),
        Some("eis/after-charge.csv")
    );

    let cycle_end = reloaded.row_of_step_number(6).unwrap();
    assert_eq!(reloaded.get(cycle_end).unwrap().goto, Some(4));
}

#[test]
fn test_missing_end_is_synthesized() {
    let session = EditSession::new(EditorConfig::default());
    let text = String::from_utf8(session.to_bytes().unwrap()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[2].starts_with("2,End,"));
}

#[test]
fn test_session_files_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("formation.csv");
    let mut session = formation();
    session.save_as(&path).unwrap();

    let reopened = EditSession::open(&path, EditorConfig::default()).unwrap();
    assert_eq!(reopened.to_bytes().unwrap(), std::fs::read(&path).unwrap());
    assert_eq!(reopened.path(), Some(path.as_path()));
}

#[test]
fn test_unterminated_quote_is_a_format_error() {
    let input = format!("{HEADER}1,Rest,,,,,,,,,\"open note\r\n");
    let err = load(input.as_bytes(), &FormatConfig::default()).unwrap_err();
    match err {
        ProcedureError::SerializationFormat { row, offset, .. } => {
            assert_eq!(row, Some(2));
            assert!(offset.is_some());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_sub_step_before_first_main_loads_as_orphan() {
    let input = format!(
        "{HEADER}{}{}{}",
        ",Sub,,,Step_time,=,5,,,,early\r\n",
        "1,Rest,,,Step_time,=,60,2,,,\r\n",
        "2,End,,,,,,,,,\r\n",
    );
    let format = FormatConfig::default();
    let store = load(input.as_bytes(), &format).unwrap();

    assert_eq!(store.orphans(), vec![Orphan::SubStep { row: 0 }]);
    let orphan = store.get(0).unwrap();
    assert!(orphan.is_sub());
    assert_eq!(orphan.depends_on, None);
    assert_eq!(orphan.goto, None);
    let mains: Vec<_> = store
        .main_rows()
        .into_iter()
        .map(|row| store.get(row).unwrap().step_number)
        .collect();
    assert_eq!(mains, vec![Some(1), Some(2)]);

    // Without a parent the sub-step accepts no end condition, so it is not written.
    let saved = save(&store, &format).unwrap();
    let reloaded = load(&saved, &format).unwrap();
    assert!(reloaded.orphans().is_empty());
    assert_eq!(reloaded.main_count(), 2);
    assert_eq!(save(&reloaded, &format).unwrap(), saved);
}
