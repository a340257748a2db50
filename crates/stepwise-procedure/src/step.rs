//! Step and sweep-parameter entities.

use serde::Serialize;

use crate::field::StepField;
use crate::types::{EndCondition, Mode, Operator, Report, StepEnum, StepType, SweepMode};

/// Store key of a step. Rows are strictly increasing in sequence order and
/// leave one free separator row after each block.
pub type Row = usize;

/// One row of a procedure.
///
/// A step without a type is a placeholder. A step of type [`StepType::Sub`] is
/// a dependent condition of the main step at `depends_on`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Step {
    /// 1-based over main steps; `None` for sub-steps.
    pub step_number: Option<u32>,
    pub step_type: Option<StepType>,
    pub mode: Option<Mode>,
    pub mode_value: Option<f64>,
    pub end_condition: Option<EndCondition>,
    pub operator: Option<Operator>,
    pub end_value: Option<f64>,
    /// Computed control-flow target (a step number).
    pub goto: Option<u32>,
    /// Explicit branch, honoured for cycle markers only.
    pub branch_target: Option<Row>,
    pub report: Option<Report>,
    pub report_value: Option<f64>,
    pub note: Option<String>,
    /// Owning main step of a sub-step.
    pub depends_on: Option<Row>,
    /// Set when a sub-step's parent could not be resolved.
    pub unlinked: bool,
}

impl Step {
    /// Untyped main step.
    pub fn blank() -> Self {
        Self::default()
    }

    /// Unconfigured sub-step of the main step at `parent`.
    pub fn sub(parent: Row) -> Self {
        Self {
            step_type: Some(StepType::Sub),
            depends_on: Some(parent),
            ..Self::default()
        }
    }

    /// First step of a new procedure: a short rest.
    pub fn seed() -> Self {
        Self {
            step_type: Some(StepType::Rest),
            end_condition: Some(EndCondition::StepTime),
            operator: Some(Operator::Equal),
            end_value: Some(3.0),
            report: Some(Report::StepTime),
            report_value: Some(1.0),
            ..Self::default()
        }
    }

    pub fn is_sub(&self) -> bool {
        self.step_type == Some(StepType::Sub)
    }

    pub fn is_main(&self) -> bool {
        !self.is_sub()
    }

    pub fn is_placeholder(&self) -> bool {
        self.step_type.is_none()
    }

    pub fn is_terminal(&self) -> bool {
        self.step_type.is_some_and(StepType::is_terminal)
    }

    /// Reset the type-dependent fields. The note survives.
    pub fn clear_configuration(&mut self) {
        self.mode = None;
        self.mode_value = None;
        self.end_condition = None;
        self.operator = None;
        self.end_value = None;
        self.report = None;
        self.report_value = None;
    }

    /// Cell text of one field, as shown in the grid and written to files.
    pub fn field_text(&self, field: StepField) -> String {
        match field {
            StepField::StepNumber => opt(self.step_number.map(|n| n.to_string())),
            StepField::Type => opt(self.step_type.map(|t| t.name().to_string())),
            StepField::Mode => opt(self.mode.map(|m| m.name().to_string())),
            StepField::ModeValue => opt(self.mode_value.map(format_number)),
            StepField::EndCondition => opt(self.end_condition.map(|c| c.name().to_string())),
            StepField::Operator => opt(self.operator.map(|o| o.symbol().to_string())),
            StepField::EndValue => opt(self.end_value.map(format_number)),
            StepField::Goto => opt(self.goto.map(|g| g.to_string())),
            StepField::Report => opt(self.report.map(|r| r.name().to_string())),
            StepField::ReportValue => opt(self.report_value.map(format_number)),
            StepField::Note => self.note.clone().unwrap_or_default(),
        }
    }
}

fn opt(text: Option<String>) -> String {
    text.unwrap_or_default()
}

/// Shortest text that parses back to the same value.
pub fn format_number(value: f64) -> String {
    format!("{value}")
}

// ---------------------------------------------------------------------------
//  Sweep parameters
// ---------------------------------------------------------------------------

/// Frequency sweep configuration of an EIS step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepParameter {
    /// Step number of the owning EIS step; refreshed at every renumber.
    pub step_number: u32,
    pub mode: SweepMode,
    pub start_frequency_hz: f64,
    pub stop_frequency_hz: f64,
    pub amplitude: f64,
    pub point_count: u32,
    pub source_file_path: Option<String>,
}

impl Default for SweepParameter {
    fn default() -> Self {
        Self {
            step_number: 0,
            mode: SweepMode::Galvanostatic,
            start_frequency_hz: 100_000.0,
            stop_frequency_hz: 0.1,
            amplitude: 0.01,
            point_count: 50,
            source_file_path: None,
        }
    }
}

impl SweepParameter {
    pub fn for_step(step_number: u32) -> Self {
        Self {
            step_number,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_step() {
        let seed = Step::seed();
        assert_eq!(seed.step_type, Some(StepType::Rest));
        assert_eq!(seed.field_text(StepField::Operator), "=");
        assert_eq!(seed.field_text(StepField::EndValue), "3");
        assert_eq!(seed.field_text(StepField::Report), "Step_time");
        assert_eq!(seed.field_text(StepField::Goto), "");
        assert!(seed.is_main());
    }

    #[test]
    fn test_sub_and_placeholder() {
        let sub = Step::sub(4);
        assert!(sub.is_sub());
        assert_eq!(sub.depends_on, Some(4));
        assert!(Step::blank().is_placeholder());
        assert!(!sub.is_placeholder());
    }

    #[test]
    fn test_clear_configuration_keeps_note() {
        let mut step = Step::seed();
        step.note = Some("warm up".to_string());
        step.clear_configuration();
        assert_eq!(step.end_condition, None);
        assert_eq!(step.report_value, None);
        assert_eq!(step.step_type, Some(StepType::Rest));
        assert_eq!(step.note.as_deref(), Some("warm up"));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(-4.25), "-4.25");
        assert_eq!(format_number(100000.0), "100000");
    }

    #[test]
    fn test_sweep_defaults() {
        let sweep = SweepParameter::for_step(3);
        assert_eq!(sweep.step_number, 3);
        assert_eq!(sweep.mode, SweepMode::Galvanostatic);
        assert_eq!(sweep.start_frequency_hz, 100_000.0);
        assert_eq!(sweep.point_count, 50);
    }
}
