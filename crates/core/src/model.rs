//! Model definition and the finalized, immutable model.
//!
//! A model is defined through a [`ModelBuilder`]. Finalizing the builder runs
//! every equation body once in recording mode, infers which index sets each
//! equation varies over, orders equations by their current-timestep reads,
//! and batches ODE equations with their solver. The resulting [`Model`] is
//! shared by any number of [`DataSet`](crate::DataSet)s.

mod builder;
mod registry;
mod schedule;
mod spec;

use std::{ops::Range, sync::Arc};

pub use builder::ModelBuilder;
pub use spec::{EquationKind, InitialValue, InputDef, ModuleInfo, ParameterDef};

pub(crate) use registry::Registry;
pub(crate) use spec::{
    Cumulation, EquationSpec, GroupSpec, InputSpec, ParameterSpec, SolverSpec, UnitSpec,
};

use crate::{
    calendar::TimestepSize,
    data_set::PreprocessingStep,
    handle::{EquationId, GroupId, IndexSetId, InputId, Param, ParameterId, SolverId},
    index::IndexSetSpec,
    storage::StorageUnit,
    value::{ParameterType, ParameterValue, Time, UInt},
};

/// A run of equations evaluated together at each index combination.
///
/// Plain batches hold one equation. Solver batches hold every equation bound
/// to one solver: the ODE equations and the plain equations recomputed at
/// each derivative evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub(crate) equations: Vec<EquationId>,
    pub(crate) odes: Vec<EquationId>,
    pub(crate) solver: Option<SolverId>,
    pub(crate) index_sets: Vec<IndexSetId>,
}

impl Batch {
    /// Non-ODE equations in evaluation order.
    #[must_use]
    pub fn equations(&self) -> &[EquationId] {
        &self.equations
    }

    /// ODE state equations, in declaration order.
    #[must_use]
    pub fn ode_equations(&self) -> &[EquationId] {
        &self.odes
    }

    #[must_use]
    pub fn solver(&self) -> Option<SolverId> {
        self.solver
    }

    /// The index sets the batch is evaluated over, outermost first.
    #[must_use]
    pub fn index_sets(&self) -> &[IndexSetId] {
        &self.index_sets
    }
}

/// Consecutive batches sharing index sets, evaluated in one pass over the
/// index combinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BatchGroup {
    pub(crate) index_sets: Vec<IndexSetId>,
    pub(crate) batches: Range<usize>,
}

/// The evaluation plan and storage grouping derived at finalization.
#[derive(Debug, Clone, Default)]
pub(crate) struct Schedule {
    pub(crate) batches: Vec<Batch>,
    pub(crate) groups: Vec<BatchGroup>,
    pub(crate) initial_order: Vec<EquationId>,
    pub(crate) computed_parameters: Vec<(ParameterId, EquationId)>,
    pub(crate) parameter_units: Vec<StorageUnit>,
    pub(crate) input_units: Vec<StorageUnit>,
    pub(crate) result_units: Vec<StorageUnit>,
}

/// A finalized model definition.
pub struct Model {
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) modules: Vec<ModuleInfo>,
    pub(crate) units: Registry<UnitSpec>,
    pub(crate) index_sets: Registry<IndexSetSpec>,
    pub(crate) groups: Registry<GroupSpec>,
    pub(crate) parameters: Registry<ParameterSpec>,
    pub(crate) inputs: Registry<InputSpec>,
    pub(crate) equations: Registry<EquationSpec>,
    pub(crate) solvers: Registry<SolverSpec>,
    pub(crate) preprocessing: Vec<Arc<PreprocessingStep>>,
    pub(crate) timestep: TimestepSize,
    pub(crate) timesteps: Param<UInt>,
    pub(crate) start_date: Param<Time>,
    pub(crate) schedule: Schedule,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("batches", &self.schedule.batches)
            .finish_non_exhaustive()
    }
}

impl Model {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Module metadata in registration order.
    #[must_use]
    pub fn modules(&self) -> &[ModuleInfo] {
        &self.modules
    }

    #[must_use]
    pub fn timestep_size(&self) -> TimestepSize {
        self.timestep
    }

    /// Batches in evaluation order.
    #[must_use]
    pub fn batches(&self) -> &[Batch] {
        &self.schedule.batches
    }

    /// Equations in the order their initial values are computed.
    #[must_use]
    pub fn initial_value_order(&self) -> &[EquationId] {
        &self.schedule.initial_order
    }

    #[must_use]
    pub fn parameter_units(&self) -> &[StorageUnit] {
        &self.schedule.parameter_units
    }

    #[must_use]
    pub fn input_units(&self) -> &[StorageUnit] {
        &self.schedule.input_units
    }

    #[must_use]
    pub fn result_units(&self) -> &[StorageUnit] {
        &self.schedule.result_units
    }

    #[must_use]
    pub fn timesteps_parameter(&self) -> Param<UInt> {
        self.timesteps
    }

    #[must_use]
    pub fn start_date_parameter(&self) -> Param<Time> {
        self.start_date
    }

    #[must_use]
    pub fn find_index_set(&self, name: &str) -> Option<IndexSetId> {
        self.index_sets.find(name).map(IndexSetId::from_usize)
    }

    #[must_use]
    pub fn find_parameter(&self, name: &str) -> Option<ParameterId> {
        self.parameters.find(name).map(ParameterId::from_usize)
    }

    #[must_use]
    pub fn find_input(&self, name: &str) -> Option<InputId> {
        self.inputs.find(name).map(InputId::from_usize)
    }

    #[must_use]
    pub fn find_equation(&self, name: &str) -> Option<EquationId> {
        self.equations.find(name).map(EquationId::from_usize)
    }

    #[must_use]
    pub fn index_set_name(&self, set: IndexSetId) -> &str {
        self.index_sets.name(set.id())
    }

    #[must_use]
    pub fn parameter_name(&self, parameter: ParameterId) -> &str {
        self.parameters.name(parameter.id())
    }

    #[must_use]
    pub fn input_name(&self, input: InputId) -> &str {
        self.inputs.name(input.id())
    }

    #[must_use]
    pub fn equation_name(&self, equation: EquationId) -> &str {
        self.equations.name(equation.id())
    }

    #[must_use]
    pub fn solver_name(&self, solver: SolverId) -> &str {
        self.solvers.name(solver.id())
    }

    #[must_use]
    pub fn group_name(&self, group: GroupId) -> &str {
        self.groups.name(group.id())
    }

    /// The unit tag of an equation, if it has one.
    #[must_use]
    pub fn equation_unit(&self, equation: EquationId) -> Option<&str> {
        self.equations
            .get(equation.id())
            .unit
            .map(|u| self.units.name(u.id()))
    }

    #[must_use]
    pub fn parameter_unit(&self, parameter: ParameterId) -> Option<&str> {
        self.parameters
            .get(parameter.id())
            .unit
            .map(|u| self.units.name(u.id()))
    }

    #[must_use]
    pub fn input_unit(&self, input: InputId) -> Option<&str> {
        self.inputs
            .get(input.id())
            .unit
            .map(|u| self.units.name(u.id()))
    }

    #[must_use]
    pub fn equation_kind(&self, equation: EquationId) -> EquationKind {
        self.equations.get(equation.id()).kind
    }

    /// The index sets an equation's results vary over, in declaration order.
    #[must_use]
    pub fn equation_index_sets(&self, equation: EquationId) -> &[IndexSetId] {
        &self.equations.get(equation.id()).index_sets
    }

    /// The ordered index sets of a parameter, taken from its group.
    #[must_use]
    pub fn parameter_index_sets(&self, parameter: ParameterId) -> &[IndexSetId] {
        let group = self.parameters.get(parameter.id()).group;
        &self.groups.get(group.id()).index_sets
    }

    #[must_use]
    pub fn input_index_sets(&self, input: InputId) -> &[IndexSetId] {
        &self.inputs.get(input.id()).index_sets
    }

    #[must_use]
    pub fn parameter_type(&self, parameter: ParameterId) -> ParameterType {
        self.parameters.get(parameter.id()).ty
    }

    #[must_use]
    pub fn parameter_default(&self, parameter: ParameterId) -> ParameterValue {
        self.parameters.get(parameter.id()).default
    }

    #[must_use]
    pub fn parameter_description(&self, parameter: ParameterId) -> Option<&str> {
        self.parameters.get(parameter.id()).description.as_deref()
    }

    #[must_use]
    pub fn parameter_group(&self, parameter: ParameterId) -> GroupId {
        self.parameters.get(parameter.id()).group
    }

    /// The group a group is nested under, if any.
    #[must_use]
    pub fn group_parent(&self, group: GroupId) -> Option<GroupId> {
        self.groups.get(group.id()).parent
    }

    /// The module a group was registered under, if any.
    #[must_use]
    pub fn group_module(&self, group: GroupId) -> Option<&ModuleInfo> {
        self.groups
            .get(group.id())
            .module
            .and_then(|m| self.modules.get(m))
    }

    /// Whether users are meant to set this parameter.
    #[must_use]
    pub fn parameter_is_exposed(&self, parameter: ParameterId) -> bool {
        self.parameters.get(parameter.id()).exposed
    }

    /// Whether the input may be left unsupplied without a warning.
    #[must_use]
    pub fn input_is_additional(&self, input: InputId) -> bool {
        self.inputs.get(input.id()).additional
    }

    /// Names of the values of an enum parameter.
    #[must_use]
    pub fn enum_names(&self, parameter: ParameterId) -> &[String] {
        &self.parameters.get(parameter.id()).enum_names
    }
}
