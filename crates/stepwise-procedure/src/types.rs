//! Closed enumerations of the procedure model.
//!
//! Every enumeration carries a wire name (the spelling used in procedure files)
//! and an underlying value (its zero-based declaration index; operators use their
//! symbol instead). Raw input is coerced by name first, then by underlying value.

use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
//  Coercion
// ---------------------------------------------------------------------------

/// Shared name/value lookup for the closed enumerations.
pub trait StepEnum: Copy + Eq + 'static {
    /// All members in declaration order.
    const ALL: &'static [Self];

    /// Wire name.
    fn name(self) -> &'static str;

    /// Additional accepted spellings.
    fn aliases(self) -> &'static [&'static str] {
        &[]
    }

    /// Look up by name (case, `_`, `-` and spaces are ignored).
    fn by_name(raw: &str) -> Option<Self> {
        let key = name_key(raw);
        if key.is_empty() {
            return None;
        }
        Self::ALL.iter().copied().find(|member| {
            name_key(member.name()) == key || member.aliases().iter().any(|a| name_key(a) == key)
        })
    }

    /// Look up by underlying value. Only whole, non-negative values match.
    fn by_value(raw: &str) -> Option<Self> {
        let value = raw.trim().parse::<f64>().ok()?;
        if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
            return None;
        }
        Self::ALL.get(value as usize).copied()
    }

    /// Name lookup, then value lookup.
    fn coerce(raw: &str) -> Option<Self> {
        Self::by_name(raw).or_else(|| Self::by_value(raw))
    }
}

fn name_key(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

// ---------------------------------------------------------------------------
//  Step type
// ---------------------------------------------------------------------------

/// The kind of a procedure step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StepType {
    /// Dependent sub-step of the preceding main step.
    Sub,
    Charge,
    Discharge,
    Rest,
    Pause,
    #[serde(rename = "Cycle_start")]
    CycleStart,
    #[serde(rename = "Cycle_end")]
    CycleEnd,
    /// Impedance sweep.
    #[serde(rename = "EIS")]
    Eis,
    /// DC internal resistance pulse.
    #[serde(rename = "DCIR")]
    Dcir,
    End,
}

impl StepType {
    /// Only `End` stops the procedure.
    pub fn is_terminal(self) -> bool {
        self == StepType::End
    }

    /// Cycle markers may carry an explicit branch target.
    pub fn is_cycle_marker(self) -> bool {
        matches!(self, StepType::CycleStart | StepType::CycleEnd)
    }

    /// Types a user may pick for a main step.
    pub fn selectable() -> impl Iterator<Item = StepType> {
        Self::ALL.iter().copied().filter(|t| *t != StepType::Sub)
    }
}

impl StepEnum for StepType {
    const ALL: &'static [Self] = &[
        StepType::Sub,
        StepType::Charge,
        StepType::Discharge,
        StepType::Rest,
        StepType::Pause,
        StepType::CycleStart,
        StepType::CycleEnd,
        StepType::Eis,
        StepType::Dcir,
        StepType::End,
    ];

    fn name(self) -> &'static str {
        match self {
            StepType::Sub => "Sub",
            StepType::Charge => "Charge",
            StepType::Discharge => "Discharge",
            StepType::Rest => "Rest",
            StepType::Pause => "Pause",
            StepType::CycleStart => "Cycle_start",
            StepType::CycleEnd => "Cycle_end",
            StepType::Eis => "EIS",
            StepType::Dcir => "DCIR",
            StepType::End => "End",
        }
    }
}

// ---------------------------------------------------------------------------
//  Mode
// ---------------------------------------------------------------------------

/// Control mode of a charge/discharge/DCIR step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Mode {
    Current,
    Voltage,
    Power,
    Resistance,
}

impl StepEnum for Mode {
    const ALL: &'static [Self] = &[Mode::Current, Mode::Voltage, Mode::Power, Mode::Resistance];

    fn name(self) -> &'static str {
        match self {
            Mode::Current => "Current",
            Mode::Voltage => "Voltage",
            Mode::Power => "Power",
            Mode::Resistance => "Resistance",
        }
    }
}

// ---------------------------------------------------------------------------
//  End condition
// ---------------------------------------------------------------------------

/// Quantity that terminates a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EndCondition {
    #[serde(rename = "Step_time")]
    StepTime,
    Current,
    Voltage,
    Power,
    #[serde(rename = "Amp_Hour")]
    AmpHour,
    #[serde(rename = "Watt_Hour")]
    WattHour,
    #[serde(rename = "Cycle_Count")]
    CycleCount,
}

impl StepEnum for EndCondition {
    const ALL: &'static [Self] = &[
        EndCondition::StepTime,
        EndCondition::Current,
        EndCondition::Voltage,
        EndCondition::Power,
        EndCondition::AmpHour,
        EndCondition::WattHour,
        EndCondition::CycleCount,
    ];

    fn name(self) -> &'static str {
        match self {
            EndCondition::StepTime => "Step_time",
            EndCondition::Current => "Current",
            EndCondition::Voltage => "Voltage",
            EndCondition::Power => "Power",
            EndCondition::AmpHour => "Amp_Hour",
            EndCondition::WattHour => "Watt_Hour",
            EndCondition::CycleCount => "Cycle_Count",
        }
    }
}

// ---------------------------------------------------------------------------
//  Operator
// ---------------------------------------------------------------------------

/// Comparison applied to an end condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = ">=")]
    AtLeast,
    #[serde(rename = "<=")]
    AtMost,
    /// Derivative crossing upwards.
    #[serde(rename = ">d1")]
    RisingDerivative,
    /// Derivative crossing downwards.
    #[serde(rename = "<d1")]
    FallingDerivative,
}

impl Operator {
    /// Symbol written to procedure files.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::AtLeast => ">=",
            Operator::AtMost => "<=",
            Operator::RisingDerivative => ">d1",
            Operator::FallingDerivative => "<d1",
        }
    }
}

impl StepEnum for Operator {
    const ALL: &'static [Self] = &[
        Operator::Equal,
        Operator::AtLeast,
        Operator::AtMost,
        Operator::RisingDerivative,
        Operator::FallingDerivative,
    ];

    fn name(self) -> &'static str {
        match self {
            Operator::Equal => "Equal",
            Operator::AtLeast => "AtLeast",
            Operator::AtMost => "AtMost",
            Operator::RisingDerivative => "RisingDerivative",
            Operator::FallingDerivative => "FallingDerivative",
        }
    }

    // Legacy files spell these by their old member names.
    fn aliases(self) -> &'static [&'static str] {
        match self {
            Operator::Equal => &[],
            Operator::AtLeast => &["Less_than"],
            Operator::AtMost => &["More_than"],
            Operator::RisingDerivative => &["Derivative1"],
            Operator::FallingDerivative => &["Derivative2"],
        }
    }

    fn by_value(raw: &str) -> Option<Self> {
        let symbol = raw.trim();
        Self::ALL.iter().copied().find(|op| op.symbol() == symbol)
    }
}

// ---------------------------------------------------------------------------
//  Report
// ---------------------------------------------------------------------------

/// Telemetry capture selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Report {
    #[serde(rename = "Step_time")]
    StepTime,
    Current,
    Voltage,
    #[serde(rename = "Amp_Hour")]
    AmpHour,
    #[serde(rename = "Watt_Hour")]
    WattHour,
    #[serde(rename = "Dv_dt")]
    DvDt,
    #[serde(rename = "Di_dt")]
    DiDt,
}

impl StepEnum for Report {
    const ALL: &'static [Self] = &[
        Report::StepTime,
        Report::Current,
        Report::Voltage,
        Report::AmpHour,
        Report::WattHour,
        Report::DvDt,
        Report::DiDt,
    ];

    fn name(self) -> &'static str {
        match self {
            Report::StepTime => "Step_time",
            Report::Current => "Current",
            Report::Voltage => "Voltage",
            Report::AmpHour => "Amp_Hour",
            Report::WattHour => "Watt_Hour",
            Report::DvDt => "Dv_dt",
            Report::DiDt => "Di_dt",
        }
    }
}

// ---------------------------------------------------------------------------
//  Sweep mode
// ---------------------------------------------------------------------------

/// Excitation variant of an impedance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum SweepMode {
    /// Galvanostatic EIS.
    #[default]
    #[serde(rename = "GEIS")]
    Galvanostatic,
    /// Potentiostatic EIS.
    #[serde(rename = "PEIS")]
    Potentiostatic,
    /// AC impedance at fixed bias.
    #[serde(rename = "AC")]
    AcImpedance,
}

impl StepEnum for SweepMode {
    const ALL: &'static [Self] = &[
        SweepMode::Galvanostatic,
        SweepMode::Potentiostatic,
        SweepMode::AcImpedance,
    ];

    fn name(self) -> &'static str {
        match self {
            SweepMode::Galvanostatic => "GEIS",
            SweepMode::Potentiostatic => "PEIS",
            SweepMode::AcImpedance => "AC",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            SweepMode::Galvanostatic => &["Galvanostatic"],
            SweepMode::Potentiostatic => &["Potentiostatic"],
            SweepMode::AcImpedance => &["AcImpedance", "ACIS"],
        }
    }
}

macro_rules! display_by_name {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        })*
    };
}

display_by_name!(StepType, Mode, EndCondition, Report, SweepMode);

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ---------------------------------------------------------------------------
//  Tests
// ---------------------------------------------------------------------------
