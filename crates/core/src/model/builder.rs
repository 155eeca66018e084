use std::sync::Arc;

use jiff::civil::date;

use crate::{
    calendar::TimestepSize,
    data_set::PreprocessingStep,
    equation::ValueSet,
    error::ModelError,
    handle::{EquationId, GroupId, IndexSetId, InputId, Param, ParameterId, SolverId, UnitId},
    index::{Index, IndexSetKind, IndexSetSpec},
    solver::{Solver, SolverConfig},
    value::{Bool, Enum, ParameterKind, ParameterType, ParameterValue, Time, UInt},
};

use super::{
    Model,
    registry::Registry,
    schedule,
    spec::{
        Condition, Cumulation, EquationKind, EquationSpec, GroupSpec, InitialValue, InputDef,
        InputSpec, ModuleInfo, ParameterDef, ParameterSpec, SolverSpec, UnitSpec,
    },
};

/// Accumulates a model definition.
///
/// Creating a builder begins the definition; [`ModelBuilder::finalize`] ends
/// it and produces an immutable [`Model`]. Every builder starts with a
/// `System` parameter group holding the `Timesteps` and `Start date`
/// parameters.
///
/// # Example
///
/// ```
/// use basin_core::{ModelBuilder, ParameterDef, InitialValue};
///
/// # fn main() -> Result<(), basin_core::ModelError> {
/// let mut builder = ModelBuilder::new("Bucket", "0.1");
/// let group = builder.parameter_group("Bucket", &[])?;
/// let rate = builder.parameter(group, ParameterDef::double("Fill rate", 2.0))?;
/// let level = builder.register_equation("Level", None)?;
/// builder.set_equation(level, move |v| v.last_result(level) + v.parameter(rate))?;
/// builder.set_initial_value(level, InitialValue::Constant(1.0))?;
/// let model = builder.finalize()?;
/// assert_eq!(model.batches().len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct ModelBuilder {
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
}

impl ModelBuilder {
    /// Begins a model definition.
    #[must_use]
    pub fn new(name: &str, version: &str) -> Self {
        let mut groups = Registry::new("parameter group");
        let mut parameters = Registry::new("parameter");

        let system = GroupId::from_usize(groups.push(
            "System",
            GroupSpec {
                index_sets: Vec::new(),
                parent: None,
                module: None,
            },
        ));
        let system_parameter = |ty, default, description: &str| ParameterSpec {
            group: system,
            ty,
            unit: None,
            default,
            min: None,
            max: None,
            description: Some(description.to_owned()),
            enum_names: Vec::new(),
            computed_by: None,
            exposed: true,
        };
        let timesteps = parameters.push(
            "Timesteps",
            system_parameter(
                ParameterType::UInt,
                ParameterValue::UInt(100),
                "The number of timesteps to run the model for",
            ),
        );
        let start_date = parameters.push(
            "Start date",
            system_parameter(
                ParameterType::Time,
                ParameterValue::Time(date(1999, 1, 1)),
                "The date of the first timestep",
            ),
        );

        Self {
            name: name.to_owned(),
            version: version.to_owned(),
            modules: Vec::new(),
            units: Registry::new("unit"),
            index_sets: Registry::new("index set"),
            groups,
            parameters,
            inputs: Registry::new("input"),
            equations: Registry::new("equation"),
            solvers: Registry::new("solver"),
            preprocessing: Vec::new(),
            timestep: TimestepSize::default(),
            timesteps: Param::new(ParameterId::from_usize(timesteps)),
            start_date: Param::new(ParameterId::from_usize(start_date)),
        }
    }

    /// Returns the built-in `Timesteps` parameter.
    #[must_use]
    pub fn timesteps_parameter(&self) -> Param<UInt> {
        self.timesteps
    }

    /// Returns the built-in `Start date` parameter.
    #[must_use]
    pub fn start_date_parameter(&self) -> Param<Time> {
        self.start_date
    }

    /// Records documentation metadata for a module. Parameter groups
    /// registered afterwards belong to it.
    pub fn module(&mut self, name: &str, version: &str, description: &str) {
        self.modules.push(ModuleInfo {
            name: name.to_owned(),
            version: version.to_owned(),
            description: description.to_owned(),
        });
    }

    /// Sets the calendar length of one timestep. Defaults to one day.
    pub fn set_timestep_size(&mut self, size: TimestepSize) {
        self.timestep = size;
    }

    /// Registers a unit tag.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken.
    pub fn unit(&mut self, name: &str) -> Result<UnitId, ModelError> {
        self.units.register(name, UnitSpec).map(UnitId::from_usize)
    }

    /// Registers a basic index set.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken.
    pub fn index_set(&mut self, name: &str) -> Result<IndexSetId, ModelError> {
        self.register_index_set(name, IndexSetKind::Basic)
    }

    /// Registers a branched index set, whose indexes may have upstream
    /// indexes.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken.
    pub fn branched_index_set(&mut self, name: &str) -> Result<IndexSetId, ModelError> {
        self.register_index_set(name, IndexSetKind::Branched)
    }

    fn register_index_set(
        &mut self,
        name: &str,
        kind: IndexSetKind,
    ) -> Result<IndexSetId, ModelError> {
        let spec = IndexSetSpec {
            name: name.to_owned(),
            kind,
            required: Vec::new(),
        };
        self.index_sets
            .register(name, spec)
            .map(IndexSetId::from_usize)
    }

    /// Requires that a data set's indexes for `set` start with `names`.
    ///
    /// Returns the index of each name, for equations that address a required
    /// index directly with explicit-index reads.
    ///
    /// # Errors
    ///
    /// Fails if `set` is not registered.
    pub fn require_indexes(
        &mut self,
        set: IndexSetId,
        names: &[&str],
    ) -> Result<Vec<Index>, ModelError> {
        self.index_sets.check(set.id())?;
        let required = &mut self.index_sets.get_mut(set.id()).required;
        let mut indexes = Vec::with_capacity(names.len());
        for &name in names {
            let position = match required.iter().position(|r| r == name) {
                Some(position) => position,
                None => {
                    required.push(name.to_owned());
                    required.len() - 1
                }
            };
            #[allow(clippy::cast_possible_truncation)]
            indexes.push(Index::new(set, position as u32));
        }
        Ok(indexes)
    }

    /// Registers a parameter group whose parameters vary over `index_sets`.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken, an index set is unknown, or an index set
    /// is listed twice.
    pub fn parameter_group(
        &mut self,
        name: &str,
        index_sets: &[IndexSetId],
    ) -> Result<GroupId, ModelError> {
        self.check_index_set_list(name, index_sets)?;
        let spec = GroupSpec {
            index_sets: index_sets.to_vec(),
            parent: None,
            module: self.modules.len().checked_sub(1),
        };
        self.groups.register(name, spec).map(GroupId::from_usize)
    }

    /// Nests `child` under `parent` for display purposes.
    ///
    /// # Errors
    ///
    /// Fails if either group is unknown.
    pub fn set_group_parent(&mut self, child: GroupId, parent: GroupId) -> Result<(), ModelError> {
        self.groups.check(child.id())?;
        self.groups.check(parent.id())?;
        self.groups.get_mut(child.id()).parent = Some(parent);
        Ok(())
    }

    /// Registers a parameter in `group`.
    ///
    /// Defaults outside the declared range only produce a warning.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken, the group or unit is unknown, `min > max`,
    /// or an enum default is not one of its names.
    pub fn parameter<K: ParameterKind>(
        &mut self,
        group: GroupId,
        def: ParameterDef<K>,
    ) -> Result<Param<K>, ModelError> {
        self.groups.check(group.id())?;
        if let Some(unit) = def.unit {
            self.units.check(unit.id())?;
        }
        let invalid = |reason: String| ModelError::InvalidParameter {
            name: def.name.clone(),
            reason,
        };

        let mut default = def.default;
        if let Some(name) = &def.enum_default {
            if def.enum_names.is_empty() {
                return Err(invalid("enum parameter has no values".into()));
            }
            let position = def
                .enum_names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| invalid(format!("default \"{name}\" is not one of its values")))?;
            default = ParameterValue::Enum(u32::try_from(position).unwrap_or(u32::MAX));
        }
        if let (Some(min), Some(max)) = (&def.min, &def.max) {
            if max.outside(Some(min), None) {
                return Err(invalid(format!("min {min} is greater than max {max}")));
            }
        }
        if default.outside(def.min.as_ref(), def.max.as_ref()) {
            log::warn!(
                "default value {default} of parameter \"{}\" is outside its recommended range",
                def.name
            );
        }

        let spec = ParameterSpec {
            group,
            ty: K::TYPE,
            unit: def.unit,
            default,
            min: def.min,
            max: def.max,
            description: def.description,
            enum_names: def.enum_names,
            computed_by: None,
            exposed: true,
        };
        let id = self.parameters.register(&def.name, spec)?;
        Ok(Param::new(ParameterId::from_usize(id)))
    }

    /// Registers an input series.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken or an index set or unit is unknown.
    pub fn input(&mut self, def: InputDef) -> Result<InputId, ModelError> {
        self.check_index_set_list(&def.name, &def.index_sets)?;
        if let Some(unit) = def.unit {
            self.units.check(unit.id())?;
        }
        let spec = InputSpec {
            unit: def.unit,
            index_sets: def.index_sets,
            additional: def.additional,
            missing_as_nan: def.missing_as_nan,
        };
        self.inputs.register(&def.name, spec).map(InputId::from_usize)
    }

    /// Appends an index set to an input's dependency list.
    ///
    /// # Errors
    ///
    /// Fails if the input or index set is unknown, or already listed.
    pub fn add_input_index_set(&mut self, input: InputId, set: IndexSetId) -> Result<(), ModelError> {
        self.inputs.check(input.id())?;
        let mut sets = self.inputs.get(input.id()).index_sets.clone();
        sets.push(set);
        self.check_index_set_list(self.inputs.name(input.id()), &sets)?;
        self.inputs.get_mut(input.id()).index_sets = sets;
        Ok(())
    }

    /// Registers a plain equation. Its body is attached with
    /// [`ModelBuilder::set_equation`].
    ///
    /// # Errors
    ///
    /// Fails if the name is taken or the unit is unknown.
    pub fn register_equation(
        &mut self,
        name: &str,
        unit: Option<UnitId>,
    ) -> Result<EquationId, ModelError> {
        self.register_kind(name, unit, EquationKind::Plain)
    }

    /// Registers an ODE state equation. Its body returns the derivative.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken or the unit is unknown.
    pub fn register_ode(&mut self, name: &str, unit: Option<UnitId>) -> Result<EquationId, ModelError> {
        self.register_kind(name, unit, EquationKind::Ode)
    }

    /// Registers an equation that only computes an initial value.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken or the unit is unknown.
    pub fn register_initial_value(
        &mut self,
        name: &str,
        unit: Option<UnitId>,
    ) -> Result<EquationId, ModelError> {
        self.register_kind(name, unit, EquationKind::InitialValue)
    }

    /// Registers an equation summing `target` over every index of `over`.
    ///
    /// With a weight the result is `Σ w·v / Σ w`.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken, a handle is unknown, or `target` is an
    /// initial-value equation.
    pub fn register_cumulative(
        &mut self,
        name: &str,
        target: EquationId,
        over: IndexSetId,
        weight: Option<Param<crate::value::Double>>,
    ) -> Result<EquationId, ModelError> {
        self.equations.check(target.id())?;
        self.index_sets.check(over.id())?;
        if let Some(weight) = weight {
            self.parameters.check(weight.id().id())?;
        }
        let target_spec = self.equations.get(target.id());
        if target_spec.kind == EquationKind::InitialValue {
            return Err(self.wrong_kind(target, "be cumulated"));
        }
        let mut spec = EquationSpec::new(EquationKind::Cumulative, target_spec.unit);
        spec.cumulation = Some(Cumulation {
            target,
            over,
            weight: weight.map(Param::id),
        });
        self.equations.register(name, spec).map(EquationId::from_usize)
    }

    fn register_kind(
        &mut self,
        name: &str,
        unit: Option<UnitId>,
        kind: EquationKind,
    ) -> Result<EquationId, ModelError> {
        if let Some(unit) = unit {
            self.units.check(unit.id())?;
        }
        self.equations
            .register(name, EquationSpec::new(kind, unit))
            .map(EquationId::from_usize)
    }

    /// Attaches the body of an equation.
    ///
    /// # Errors
    ///
    /// Fails if the equation is unknown or cumulative.
    pub fn set_equation<F>(&mut self, equation: EquationId, body: F) -> Result<(), ModelError>
    where
        F: Fn(&ValueSet<'_>) -> f64 + Send + Sync + 'static,
    {
        self.equations.check(equation.id())?;
        if self.equations.get(equation.id()).kind == EquationKind::Cumulative {
            return Err(self.wrong_kind(equation, "take a body"));
        }
        self.equations.get_mut(equation.id()).body = Some(Arc::new(body));
        Ok(())
    }

    /// Replaces the body of an equation that already has one, for example to
    /// swap a module's formula for a site-specific variant.
    ///
    /// # Errors
    ///
    /// Fails if the equation is unknown, cumulative, or has no body yet.
    pub fn override_equation<F>(&mut self, equation: EquationId, body: F) -> Result<(), ModelError>
    where
        F: Fn(&ValueSet<'_>) -> f64 + Send + Sync + 'static,
    {
        self.equations.check(equation.id())?;
        if self.equations.get(equation.id()).body.is_none() {
            return Err(ModelError::MissingBody(
                self.equations.name(equation.id()).to_owned(),
            ));
        }
        self.set_equation(equation, body)?;
        self.equations.get_mut(equation.id()).overridden = true;
        log::debug!(
            "equation \"{}\" overridden",
            self.equations.name(equation.id())
        );
        Ok(())
    }

    /// Sets where an equation's value comes from before the first timestep.
    ///
    /// Without one, ODE equations start at zero and other equations evaluate
    /// their own body once.
    ///
    /// # Errors
    ///
    /// Fails if a handle is unknown, `equation` is not plain or ODE, or the
    /// source equation is not an initial-value equation.
    pub fn set_initial_value(
        &mut self,
        equation: EquationId,
        initial: InitialValue,
    ) -> Result<(), ModelError> {
        self.equations.check(equation.id())?;
        self.require_kind(equation, &[EquationKind::Plain, EquationKind::Ode], "have an initial value")?;
        match initial {
            InitialValue::Parameter(param) => self.parameters.check(param.id().id())?,
            InitialValue::Equation(source) => {
                self.equations.check(source.id())?;
                self.require_kind(source, &[EquationKind::InitialValue], "be used as an initial value")?;
            }
            InitialValue::Constant(_) => {}
        }
        self.equations.get_mut(equation.id()).initial = Some(initial);
        Ok(())
    }

    /// Resets an ODE equation's state to its initial value at the start of
    /// every timestep.
    ///
    /// # Errors
    ///
    /// Fails if the equation is unknown or not an ODE equation.
    pub fn reset_every_timestep(&mut self, equation: EquationId) -> Result<(), ModelError> {
        self.equations.check(equation.id())?;
        self.require_kind(equation, &[EquationKind::Ode], "be reset every timestep")?;
        self.equations.get_mut(equation.id()).reset = true;
        Ok(())
    }

    /// Registers a solver that sub-steps its batch with step fraction `h`.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken or `h` is not in `(0, 1]`.
    pub fn register_solver<S: Solver + 'static>(
        &mut self,
        name: &str,
        h: f64,
        method: S,
    ) -> Result<SolverId, ModelError> {
        let config = SolverConfig::new(h).map_err(|source| ModelError::Solver {
            name: name.to_owned(),
            source,
        })?;
        self.push_solver(name, config, Arc::new(method))
    }

    /// Registers a solver with explicit error tolerances.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken, `h` is not in `(0, 1]`, or a tolerance is
    /// negative or not finite.
    pub fn register_solver_with_tolerances<S: Solver + 'static>(
        &mut self,
        name: &str,
        h: f64,
        abs_tol: f64,
        rel_tol: f64,
        method: S,
    ) -> Result<SolverId, ModelError> {
        let config = SolverConfig::with_tolerances(h, abs_tol, rel_tol).map_err(|source| {
            ModelError::Solver {
                name: name.to_owned(),
                source,
            }
        })?;
        if !method.uses_error_control() {
            log::warn!("solver \"{name}\" does not use error control, its tolerances are ignored");
        }
        self.push_solver(name, config, Arc::new(method))
    }

    fn push_solver(
        &mut self,
        name: &str,
        config: SolverConfig,
        method: Arc<dyn Solver>,
    ) -> Result<SolverId, ModelError> {
        self.solvers
            .register(name, SolverSpec { config, method })
            .map(SolverId::from_usize)
    }

    /// Integrates `equation` with `solver`. Plain equations assigned to a
    /// solver are recomputed at every derivative evaluation.
    ///
    /// # Errors
    ///
    /// Fails if a handle is unknown or the equation is not plain or ODE.
    pub fn set_solver(&mut self, equation: EquationId, solver: SolverId) -> Result<(), ModelError> {
        self.equations.check(equation.id())?;
        self.solvers.check(solver.id())?;
        self.require_kind(equation, &[EquationKind::Plain, EquationKind::Ode], "be given a solver")?;
        self.equations.get_mut(equation.id()).solver = Some(solver);
        Ok(())
    }

    /// Only evaluates `equation` where `switch` equals `value`.
    ///
    /// # Errors
    ///
    /// Fails if a handle is unknown or the equation is an initial-value
    /// equation.
    pub fn conditional_on(
        &mut self,
        equation: EquationId,
        switch: Param<Bool>,
        value: bool,
    ) -> Result<(), ModelError> {
        self.set_condition(equation, switch.id(), ParameterValue::Bool(value))
    }

    /// Only evaluates `equation` where the enum `switch` equals `value`.
    ///
    /// # Errors
    ///
    /// Fails if a handle is unknown, `value` is not a value of `switch`, or
    /// the equation is an initial-value equation.
    pub fn conditional_on_enum(
        &mut self,
        equation: EquationId,
        switch: Param<Enum>,
        value: &str,
    ) -> Result<(), ModelError> {
        self.parameters.check(switch.id().id())?;
        let spec = self.parameters.get(switch.id().id());
        let position = spec.enum_names.iter().position(|n| n == value).ok_or_else(|| {
            ModelError::InvalidParameter {
                name: self.parameters.name(switch.id().id()).to_owned(),
                reason: format!("\"{value}\" is not one of its values"),
            }
        })?;
        let position = u32::try_from(position).unwrap_or(u32::MAX);
        self.set_condition(equation, switch.id(), ParameterValue::Enum(position))
    }

    fn set_condition(
        &mut self,
        equation: EquationId,
        switch: ParameterId,
        value: ParameterValue,
    ) -> Result<(), ModelError> {
        self.equations.check(equation.id())?;
        self.parameters.check(switch.id())?;
        let ty = self.parameters.get(switch.id()).ty;
        if !matches!(ty, ParameterType::Bool | ParameterType::Enum) {
            return Err(ModelError::InvalidSwitch {
                name: self.parameters.name(switch.id()).to_owned(),
                actual: ty,
            });
        }
        self.require_kind(
            equation,
            &[EquationKind::Plain, EquationKind::Ode, EquationKind::Cumulative],
            "be conditional",
        )?;
        self.equations.get_mut(equation.id()).condition = Some(Condition { switch, value });
        Ok(())
    }

    /// Computes `param` with the initial-value equation `equation` before each
    /// run, once per instance of the parameter.
    ///
    /// When `exposed` is false the parameter is not meant to be set by users;
    /// values set on it are overwritten either way.
    ///
    /// # Errors
    ///
    /// Fails if a handle is unknown, the equation is not an initial-value
    /// equation, or the parameter is not a double, uint or bool.
    pub fn parameter_is_computed_by<K: ParameterKind>(
        &mut self,
        param: Param<K>,
        equation: EquationId,
        exposed: bool,
    ) -> Result<(), ModelError> {
        self.parameters.check(param.id().id())?;
        self.equations.check(equation.id())?;
        self.require_kind(equation, &[EquationKind::InitialValue], "compute a parameter")?;
        if matches!(K::TYPE, ParameterType::Time | ParameterType::Enum) {
            return Err(ModelError::InvalidParameter {
                name: self.parameters.name(param.id().id()).to_owned(),
                reason: format!("a {} parameter cannot be computed", K::TYPE),
            });
        }
        let spec = self.parameters.get_mut(param.id().id());
        spec.computed_by = Some(equation);
        spec.exposed = exposed;
        Ok(())
    }

    /// Adds a step run once before every model run, after parameters and
    /// inputs are in place.
    pub fn preprocessing_step<F>(&mut self, step: F)
    where
        F: Fn(&mut crate::DataSet) -> Result<(), crate::DataSetError> + Send + Sync + 'static,
    {
        self.preprocessing.push(Arc::new(step));
    }

    /// Ends the definition: infers dependencies, orders and batches the
    /// equations, and groups storage.
    ///
    /// # Errors
    ///
    /// Fails on missing equation bodies, reads of unknown handles, ODE
    /// equations without a solver, and unresolvable dependency cycles.
    pub fn finalize(self) -> Result<Model, ModelError> {
        schedule::finalize(self)
    }

    fn check_index_set_list(&self, owner: &str, sets: &[IndexSetId]) -> Result<(), ModelError> {
        for (i, set) in sets.iter().enumerate() {
            self.index_sets.check(set.id())?;
            if sets[..i].contains(set) {
                return Err(ModelError::Duplicate {
                    kind: "index set dependency",
                    name: format!("{owner}: {}", self.index_sets.name(set.id())),
                });
            }
        }
        Ok(())
    }

    fn require_kind(
        &self,
        equation: EquationId,
        allowed: &[EquationKind],
        action: &'static str,
    ) -> Result<(), ModelError> {
        if allowed.contains(&self.equations.get(equation.id()).kind) {
            Ok(())
        } else {
            Err(self.wrong_kind(equation, action))
        }
    }

    fn wrong_kind(&self, equation: EquationId, action: &'static str) -> ModelError {
        ModelError::WrongEquationKind {
            name: self.equations.name(equation.id()).to_owned(),
            kind: self.equations.get(equation.id()).kind,
            action,
        }
    }
}
