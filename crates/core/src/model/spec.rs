use std::{marker::PhantomData, sync::Arc};

use crate::{
    equation::{EquationFn, Reads},
    handle::{EquationId, GroupId, IndexSetId, Param, ParameterId, SolverId, UnitId},
    solver::{Solver, SolverConfig},
    value::{Double, ParameterKind, ParameterType, ParameterValue},
};

/// How an equation's value is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquationKind {
    /// Evaluated directly; the body returns the value.
    Plain,
    /// A state variable; the body returns its derivative per timestep.
    Ode,
    /// Evaluated once before the first timestep to initialize another equation.
    InitialValue,
    /// The (optionally weighted) sum of another equation over one index set.
    Cumulative,
}

/// Where an equation gets its value before the first timestep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitialValue {
    Parameter(Param<Double>),
    Constant(f64),
    Equation(EquationId),
}

/// Declaration of a parameter, built up before registration.
///
/// # Example
///
/// ```
/// use basin_core::ParameterDef;
///
/// let def = ParameterDef::double("Time constant", 5.0)
///     .range(0.1, 100.0)
///     .description("Residence time of the reservoir in days");
/// ```
#[derive(Debug, Clone)]
pub struct ParameterDef<K> {
    pub(crate) name: String,
    pub(crate) unit: Option<UnitId>,
    pub(crate) default: ParameterValue,
    pub(crate) min: Option<ParameterValue>,
    pub(crate) max: Option<ParameterValue>,
    pub(crate) description: Option<String>,
    pub(crate) enum_names: Vec<String>,
    pub(crate) enum_default: Option<String>,
    _kind: PhantomData<K>,
}

impl<K: ParameterKind> ParameterDef<K> {
    fn with_default(name: &str, default: ParameterValue) -> Self {
        Self {
            name: name.to_owned(),
            unit: None,
            default,
            min: None,
            max: None,
            description: None,
            enum_names: Vec::new(),
            enum_default: None,
            _kind: PhantomData,
        }
    }

    /// Sets the unit tag.
    #[must_use]
    pub fn unit(mut self, unit: UnitId) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets a human readable description.
    #[must_use]
    pub fn description(mut self, text: &str) -> Self {
        self.description = Some(text.to_owned());
        self
    }
}

impl ParameterDef<crate::value::Double> {
    #[must_use]
    pub fn double(name: &str, default: f64) -> Self {
        Self::with_default(name, ParameterValue::Double(default))
    }

    /// Sets the recommended value range.
    #[must_use]
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(ParameterValue::Double(min));
        self.max = Some(ParameterValue::Double(max));
        self
    }
}

impl ParameterDef<crate::value::UInt> {
    #[must_use]
    pub fn uint(name: &str, default: u64) -> Self {
        Self::with_default(name, ParameterValue::UInt(default))
    }

    /// Sets the recommended value range.
    #[must_use]
    pub fn range(mut self, min: u64, max: u64) -> Self {
        self.min = Some(ParameterValue::UInt(min));
        self.max = Some(ParameterValue::UInt(max));
        self
    }
}

impl ParameterDef<crate::value::Bool> {
    #[must_use]
    pub fn bool(name: &str, default: bool) -> Self {
        Self::with_default(name, ParameterValue::Bool(default))
    }
}

impl ParameterDef<crate::value::Time> {
    #[must_use]
    pub fn date(name: &str, default: jiff::civil::Date) -> Self {
        Self::with_default(name, ParameterValue::Time(default))
    }

    /// Sets the recommended date range.
    #[must_use]
    pub fn range(mut self, min: jiff::civil::Date, max: jiff::civil::Date) -> Self {
        self.min = Some(ParameterValue::Time(min));
        self.max = Some(ParameterValue::Time(max));
        self
    }
}

impl ParameterDef<crate::value::Enum> {
    /// An enumerated parameter taking one of `names`, defaulting to `default`.
    #[must_use]
    pub fn enumeration(name: &str, names: &[&str], default: &str) -> Self {
        let mut def = Self::with_default(name, ParameterValue::Enum(0));
        def.enum_names = names.iter().map(|&n| n.to_owned()).collect();
        def.enum_default = Some(default.to_owned());
        def
    }
}

/// Declaration of an input time series.
#[derive(Debug, Clone)]
pub struct InputDef {
    pub(crate) name: String,
    pub(crate) unit: Option<UnitId>,
    pub(crate) index_sets: Vec<IndexSetId>,
    pub(crate) additional: bool,
    pub(crate) missing_as_nan: bool,
}

impl InputDef {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            unit: None,
            index_sets: Vec::new(),
            additional: false,
            missing_as_nan: false,
        }
    }

    #[must_use]
    pub fn unit(mut self, unit: UnitId) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the ordered index sets the series varies over.
    #[must_use]
    pub fn index_sets(mut self, sets: &[IndexSetId]) -> Self {
        self.index_sets = sets.to_vec();
        self
    }

    /// Marks the input as optional; missing series are not warned about.
    #[must_use]
    pub fn additional(mut self) -> Self {
        self.additional = true;
        self
    }

    /// Fills timesteps without data with NaN instead of zero.
    #[must_use]
    pub fn missing_as_nan(mut self) -> Self {
        self.missing_as_nan = true;
        self
    }
}

/// Documentation metadata for one module of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub(crate) struct UnitSpec;

#[derive(Debug, Clone)]
pub(crate) struct GroupSpec {
    pub(crate) index_sets: Vec<IndexSetId>,
    pub(crate) parent: Option<GroupId>,
    pub(crate) module: Option<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct ParameterSpec {
    pub(crate) group: GroupId,
    pub(crate) ty: ParameterType,
    pub(crate) unit: Option<UnitId>,
    pub(crate) default: ParameterValue,
    pub(crate) min: Option<ParameterValue>,
    pub(crate) max: Option<ParameterValue>,
    pub(crate) description: Option<String>,
    pub(crate) enum_names: Vec<String>,
    pub(crate) computed_by: Option<EquationId>,
    pub(crate) exposed: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct InputSpec {
    pub(crate) unit: Option<UnitId>,
    pub(crate) index_sets: Vec<IndexSetId>,
    pub(crate) additional: bool,
    pub(crate) missing_as_nan: bool,
}

/// Gates an equation on a switch parameter's value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Condition {
    pub(crate) switch: ParameterId,
    pub(crate) value: ParameterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cumulation {
    pub(crate) target: EquationId,
    pub(crate) over: IndexSetId,
    pub(crate) weight: Option<ParameterId>,
}

#[derive(Clone)]
pub(crate) struct EquationSpec {
    pub(crate) kind: EquationKind,
    pub(crate) unit: Option<UnitId>,
    pub(crate) body: Option<Arc<EquationFn>>,
    pub(crate) initial: Option<InitialValue>,
    pub(crate) solver: Option<SolverId>,
    pub(crate) reset: bool,
    pub(crate) condition: Option<Condition>,
    pub(crate) cumulation: Option<Cumulation>,
    pub(crate) overridden: bool,
    /// Filled in at finalization.
    pub(crate) index_sets: Vec<IndexSetId>,
    pub(crate) reads: Reads,
}

impl std::fmt::Debug for EquationSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EquationSpec")
            .field("kind", &self.kind)
            .field("has_body", &self.body.is_some())
            .field("solver", &self.solver)
            .field("index_sets", &self.index_sets)
            .finish_non_exhaustive()
    }
}

impl EquationSpec {
    pub(crate) fn new(kind: EquationKind, unit: Option<UnitId>) -> Self {
        Self {
            kind,
            unit,
            body: None,
            initial: None,
            solver: None,
            reset: false,
            condition: None,
            cumulation: None,
            overridden: false,
            index_sets: Vec::new(),
            reads: Reads::default(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct SolverSpec {
    pub(crate) config: SolverConfig,
    pub(crate) method: Arc<dyn Solver>,
}

impl std::fmt::Debug for SolverSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolverSpec")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
