//! Type-driven rule table.
//!
//! Maps a step type (and, for sub-steps, the parent's type) to the values its
//! configuration fields may take. The table is pure data: nothing here touches
//! the store.

use crate::types::{EndCondition, Mode, Operator, Report, StepEnum, StepType};

/// Values a step of a given type may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegalValues {
    pub modes: &'static [Mode],
    pub end_conditions: &'static [EndCondition],
    /// Union of the operators of every legal end condition.
    pub operators: &'static [Operator],
    pub reports: &'static [Report],
}

impl LegalValues {
    /// Nothing configurable besides goto.
    pub const NONE: LegalValues = LegalValues {
        modes: &[],
        end_conditions: &[],
        operators: &[],
        reports: &[],
    };

    pub fn allows_mode(&self, mode: Mode) -> bool {
        self.modes.contains(&mode)
    }

    pub fn allows_end_condition(&self, cond: EndCondition) -> bool {
        self.end_conditions.contains(&cond)
    }

    pub fn allows_report(&self, report: Report) -> bool {
        self.reports.contains(&report)
    }

    /// True when the type takes no end condition, so it cannot own sub-steps.
    pub fn is_unconfigurable(&self) -> bool {
        self.end_conditions.is_empty()
    }
}

const SIX_END_CONDITIONS: &[EndCondition] = &[
    EndCondition::StepTime,
    EndCondition::Current,
    EndCondition::Voltage,
    EndCondition::Power,
    EndCondition::AmpHour,
    EndCondition::WattHour,
];

const ALL_OPERATORS: &[Operator] = Operator::ALL;
const ALL_REPORTS: &[Report] = Report::ALL;

const CHARGE: LegalValues = LegalValues {
    modes: &[Mode::Current, Mode::Voltage, Mode::Power],
    end_conditions: SIX_END_CONDITIONS,
    operators: ALL_OPERATORS,
    reports: ALL_REPORTS,
};

const DISCHARGE: LegalValues = LegalValues {
    modes: Mode::ALL,
    end_conditions: SIX_END_CONDITIONS,
    operators: ALL_OPERATORS,
    reports: ALL_REPORTS,
};

const IDLE: LegalValues = LegalValues {
    modes: &[],
    end_conditions: SIX_END_CONDITIONS,
    operators: ALL_OPERATORS,
    reports: ALL_REPORTS,
};

const CYCLE_END: LegalValues = LegalValues {
    modes: &[],
    end_conditions: &[EndCondition::CycleCount],
    operators: ALL_OPERATORS,
    reports: ALL_REPORTS,
};

const DCIR: LegalValues = LegalValues {
    modes: &[Mode::Current],
    end_conditions: &[EndCondition::StepTime],
    operators: &[Operator::Equal],
    reports: &[Report::StepTime],
};

/// Legal values for a step. Sub-steps resolve through their parent's type; a
/// sub-step without a parent accepts nothing.
pub fn resolve(step_type: StepType, parent: Option<StepType>) -> LegalValues {
    match step_type {
        StepType::Sub => match parent {
            Some(StepType::Sub) | None => LegalValues::NONE,
            Some(parent) => resolve(parent, None),
        },
        StepType::Charge => CHARGE,
        StepType::Discharge => DISCHARGE,
        StepType::Rest | StepType::Pause => IDLE,
        StepType::CycleEnd => CYCLE_END,
        StepType::Dcir => DCIR,
        StepType::Eis | StepType::End | StepType::CycleStart => LegalValues::NONE,
    }
}

/// Operators allowed for one end condition.
pub fn operators_for(cond: EndCondition) -> &'static [Operator] {
    match cond {
        EndCondition::StepTime => &[Operator::Equal],
        EndCondition::AmpHour | EndCondition::WattHour => &[Operator::AtLeast, Operator::AtMost],
        _ => ALL_OPERATORS,
    }
}

/// Field values assigned when a step becomes `step_type`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeDefaults {
    pub mode: Option<Mode>,
    pub end_condition: Option<EndCondition>,
    pub operator: Option<Operator>,
    pub report: Option<Report>,
}

pub fn defaults_for(step_type: StepType) -> TypeDefaults {
    match step_type {
        StepType::Dcir => TypeDefaults {
            mode: Some(Mode::Current),
            end_condition: Some(EndCondition::StepTime),
            operator: Some(Operator::Equal),
            report: Some(Report::StepTime),
        },
        StepType::CycleEnd => TypeDefaults {
            mode: None,
            end_condition: Some(EndCondition::CycleCount),
            operator: Some(Operator::Equal),
            report: Some(Report::StepTime),
        },
        _ => TypeDefaults::default(),
    }
}

/// Types whose last condition row opens a further sub-condition slot when its
/// end condition is set interactively.
pub fn opens_sub_condition(step_type: StepType) -> bool {
    matches!(step_type, StepType::Charge | StepType::Discharge)
}
