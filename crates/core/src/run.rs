//! The timestep loop.
//!
//! A run proceeds in this order:
//!
//! 1. Parameters computed by initial-value equations are filled in.
//! 2. Preprocessing steps run against the data set.
//! 3. Inputs are aligned with the model start date.
//! 4. Results are allocated: one slot of initial values, then one slot per
//!    timestep. Reading the last result at timestep `t` reads slot `t`.
//! 5. Initial values are computed in dependency order.
//! 6. Every timestep walks the batch groups in order, iterating each group's
//!    index combinations with the last index set varying fastest.

use std::{cell::Cell, sync::Arc};

use jiff::civil::Date;

use crate::{
    calendar::Clock,
    data_set::{DataSet, InputData, ParameterData, ResultData, instance_offsets, layout},
    equation::{Frame, ValueSet},
    error::{DataSetError, RunError},
    handle::{EntityKind, EquationId, ParameterId, SolverId},
    index::{Index, IndexSpace, Odometer, zeroed_context},
    model::{Batch, Cumulation, EquationKind, InitialValue, Model},
    solver::OdeSystem,
    storage::{BoundsError, StorageStructure},
    value::{ParameterType, ParameterValue},
};

impl DataSet {
    /// Runs the model for `Timesteps` steps from `Start date`.
    ///
    /// Parameter and input storage are allocated if needed. Results of an
    /// earlier run are replaced.
    ///
    /// # Errors
    ///
    /// Fails if storage cannot be allocated, input data does not cover the
    /// run, a preprocessing step fails, an index is out of bounds, a solver
    /// fails, or (with the `nan-checks` feature) an equation produces a
    /// non-finite value.
    pub fn run(&mut self) -> Result<(), RunError> {
        let model = Arc::clone(&self.model);

        self.ensure_parameter_storage()?;
        compute_parameters(self, &model)?;
        for step in &model.preprocessing {
            step(self)?;
        }

        let timesteps = match self.scalar_parameter(model.timesteps_parameter().id()) {
            ParameterValue::UInt(n) => usize::try_from(n).unwrap_or(0),
            _ => 0,
        };
        let start = self.model_start_date();
        if self.inputs.is_none() {
            self.allocate_input_storage(timesteps.max(1))?;
        }
        warn_missing_inputs(self, &model);
        let input_offset = input_offset(self, &model, start, timesteps)?;

        let counts = self.index_space.counts();
        let structure = layout(EntityKind::Result, model.result_units(), &counts);
        let results: Vec<Cell<f64>> = (0..(timesteps + 1) * structure.total_count())
            .map(|_| Cell::new(0.0))
            .collect();

        {
            let parameters = self
                .parameters
                .as_ref()
                .ok_or(DataSetError::NotAllocated("parameter"))?;
            let inputs = self
                .inputs
                .as_deref()
                .ok_or(DataSetError::NotAllocated("input"))?;
            let runner = Runner {
                model: &model,
                index_space: &self.index_space,
                parameters,
                inputs,
                input_offset,
                structure: &structure,
                results: &results,
                counts: &counts,
                start,
                fault: Cell::new(None),
            };
            runner.initial_values()?;
            for timestep in 0..timesteps {
                runner.step(timestep)?;
            }
        }

        self.results = Some(ResultData {
            structure,
            timesteps,
            start_date: start,
            values: results.into_iter().map(Cell::into_inner).collect(),
        });
        Ok(())
    }
}

/// Fills parameters computed by initial-value equations.
fn compute_parameters(data: &mut DataSet, model: &Model) -> Result<(), RunError> {
    if model.schedule.computed_parameters.is_empty() {
        return Ok(());
    }
    let counts = data.index_space.counts();
    let no_inputs = layout(EntityKind::Input, &[], &counts);
    let no_results = layout(EntityKind::Result, &[], &counts);
    let clock = Clock::new(-1, data.model_start_date());

    for &(parameter, equation) in &model.schedule.computed_parameters {
        let Some(body) = model.equations.get(equation.id()).body.as_ref() else {
            continue;
        };
        let ty = model.parameter_type(parameter);

        let computed = {
            let params = data
                .parameters
                .as_ref()
                .ok_or(DataSetError::NotAllocated("parameter"))?;
            let frame = Frame {
                index_space: &data.index_space,
                parameters: &params.values,
                parameter_structure: &params.structure,
                inputs: &[],
                input_provided: &[],
                input_structure: &no_inputs,
                input_base: 0,
                result_structure: &no_results,
                cur_base: 0,
                last_base: 0,
                clock,
            };
            let fault = Cell::new(None);
            let mut current = zeroed_context(counts.len());
            let mut odometer = Odometer::new(model.parameter_index_sets(parameter), &counts);
            let mut computed = Vec::new();
            while odometer.advance(&mut current) {
                let value = body(&ValueSet::running(&frame, &[], &current, &fault));
                if let Some(err) = fault.take() {
                    return Err(bounds_error(model, equation, err));
                }
                let at = params
                    .structure
                    .offset_current(parameter.id(), &current)
                    .map_err(DataSetError::from)?;
                computed.push((at, typed_value(ty, value)));
            }
            computed
        };

        if let Some(params) = data.parameters.as_mut() {
            for (at, value) in computed {
                params.values[at] = value;
            }
        }
    }
    Ok(())
}

fn typed_value(ty: ParameterType, value: f64) -> ParameterValue {
    match ty {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        ParameterType::UInt => ParameterValue::UInt(value.max(0.0).round() as u64),
        ParameterType::Bool => ParameterValue::Bool(value != 0.0),
        _ => ParameterValue::Double(value),
    }
}

fn warn_missing_inputs(data: &DataSet, model: &Model) {
    let Some(inputs) = data.inputs.as_deref() else {
        return;
    };
    for (i, name, spec) in model.inputs.iter() {
        if spec.additional {
            continue;
        }
        let read = model
            .equations
            .items()
            .iter()
            .any(|eq| eq.reads.inputs.iter().any(|input| input.id() == i));
        let provided = instance_offsets(&inputs.structure, i).any(|at| inputs.provided[at]);
        if read && !provided {
            log::warn!("input \"{name}\" was not provided, it reads as missing");
        }
    }
}

/// Returns how many input steps precede the model start date.
fn input_offset(
    data: &DataSet,
    model: &Model,
    start: Date,
    timesteps: usize,
) -> Result<usize, RunError> {
    let Some(inputs) = data.inputs.as_deref() else {
        return Ok(0);
    };
    if inputs.structure.total_count() == 0 {
        return Ok(0);
    }
    let input_start = inputs.start_date.unwrap_or(start);
    let steps = model
        .timestep_size()
        .steps_between(input_start, start)
        .map_err(DataSetError::from)?;
    let offset = usize::try_from(steps).map_err(|_| RunError::InputStartsLate {
        input_start,
        model_start: start,
    })?;
    let available = inputs.timesteps.saturating_sub(offset);
    if available < timesteps.max(1) {
        return Err(RunError::InputTooShort {
            available,
            needed: timesteps.max(1),
        });
    }
    Ok(offset)
}

fn bounds_error(model: &Model, equation: EquationId, err: BoundsError) -> RunError {
    let name = model.equation_name(equation).to_owned();
    if err.set == err.found_set {
        RunError::OutOfBounds {
            equation: name,
            set: model.index_set_name(err.set).to_owned(),
            index: err.index,
            count: err.count,
        }
    } else {
        RunError::WrongIndexSet {
            equation: name,
            expected: model.index_set_name(err.set).to_owned(),
            found: model.index_set_name(err.found_set).to_owned(),
        }
    }
}

/// Shared state of one run.
struct Runner<'a> {
    model: &'a Model,
    index_space: &'a IndexSpace,
    parameters: &'a ParameterData,
    inputs: &'a InputData,
    input_offset: usize,
    structure: &'a StorageStructure,
    results: &'a [Cell<f64>],
    counts: &'a [usize],
    start: Date,
    fault: Cell<Option<BoundsError>>,
}

impl<'a> Runner<'a> {
    fn frame(&self, cur_slot: usize, last_slot: usize, input_step: usize, clock: Clock) -> Frame<'a> {
        let total = self.structure.total_count();
        Frame {
            index_space: self.index_space,
            parameters: &self.parameters.values,
            parameter_structure: &self.parameters.structure,
            inputs: &self.inputs.values,
            input_provided: &self.inputs.provided,
            input_structure: &self.inputs.structure,
            input_base: input_step * self.inputs.structure.total_count(),
            result_structure: self.structure,
            cur_base: cur_slot * total,
            last_base: last_slot * total,
            clock,
        }
    }

    fn initial_values(&self) -> Result<(), RunError> {
        let date = self
            .model
            .timestep_size()
            .advance(self.start, -1)
            .map_err(DataSetError::from)?;
        // Input data from the step before the start date, where there is one.
        let input_step = self.input_offset.saturating_sub(1);
        let frame = self.frame(0, 0, input_step, Clock::new(-1, date));

        for &equation in self.model.initial_value_order() {
            let spec = self.model.equations.get(equation.id());
            let mut current = zeroed_context(self.counts.len());
            let mut odometer = Odometer::new(&spec.index_sets, self.counts);
            while odometer.advance(&mut current) {
                let value = match (spec.initial, spec.cumulation) {
                    (Some(InitialValue::Parameter(p)), _) => {
                        self.parameter_f64(equation, p.id(), &current)?
                    }
                    (Some(InitialValue::Constant(value)), _) => value,
                    (Some(InitialValue::Equation(source)), _) => {
                        self.evaluate(&frame, source, &current)?
                    }
                    (None, _) if spec.kind == EquationKind::Ode => 0.0,
                    (None, _) if !self.condition_holds(equation, &current)? => 0.0,
                    (None, Some(cumulation)) => self.cumulate(&frame, equation, cumulation, &current)?,
                    (None, None) => self.evaluate(&frame, equation, &current)?,
                };
                self.check_finite(&frame, equation, value, &current)?;
                let at = self.result_offset(equation, &current)?;
                self.results[at].set(value);
            }
        }
        Ok(())
    }

    fn step(&self, timestep: usize) -> Result<(), RunError> {
        let t = i64::try_from(timestep).unwrap_or(i64::MAX);
        let date = self
            .model
            .timestep_size()
            .advance(self.start, t)
            .map_err(DataSetError::from)?;
        let frame = self.frame(
            timestep + 1,
            timestep,
            timestep + self.input_offset,
            Clock::new(t, date),
        );

        let schedule = &self.model.schedule;
        for group in &schedule.groups {
            let mut current = zeroed_context(self.counts.len());
            let mut odometer = Odometer::new(&group.index_sets, self.counts);
            while odometer.advance(&mut current) {
                for batch in &schedule.batches[group.batches.clone()] {
                    match batch.solver {
                        None => {
                            for &equation in &batch.equations {
                                self.update(&frame, equation, &current)?;
                            }
                        }
                        Some(solver) => self.solve(&frame, batch, solver, &current)?,
                    }
                }
            }
        }
        Ok(())
    }

    /// Computes one non-ODE equation and stores it for this timestep.
    fn update(&self, frame: &Frame<'_>, equation: EquationId, current: &[Index]) -> Result<(), RunError> {
        let at = self.result_offset(equation, current)?;
        let value = if !self.condition_holds(equation, current)? {
            self.results[frame.last_base + at].get()
        } else if let Some(cumulation) = self.model.equations.get(equation.id()).cumulation {
            self.cumulate(frame, equation, cumulation, current)?
        } else {
            self.evaluate(frame, equation, current)?
        };
        self.check_finite(frame, equation, value, current)?;
        self.results[frame.cur_base + at].set(value);
        Ok(())
    }

    /// Integrates one solver batch over the timestep.
    fn solve(
        &self,
        frame: &Frame<'_>,
        batch: &Batch,
        solver: SolverId,
        current: &[Index],
    ) -> Result<(), RunError> {
        let mut odes = Vec::with_capacity(batch.odes.len());
        let mut state = Vec::with_capacity(batch.odes.len());
        for &equation in &batch.odes {
            let at = self.result_offset(equation, current)?;
            let active = self.condition_holds(equation, current)?;
            let base = if active && self.model.equations.get(equation.id()).reset {
                0
            } else {
                frame.last_base
            };
            state.push(self.results[base + at].get());
            odes.push(OdeSlot {
                equation,
                at,
                active,
            });
        }

        let spec = self.model.solvers.get(solver.id());
        let mut system = BatchSystem {
            runner: self,
            frame,
            batch,
            current,
            odes: &odes,
            error: None,
        };
        let outcome = spec.method.solve(&mut state, &mut system, &spec.config);
        if let Some(err) = system.error.take() {
            return Err(err);
        }
        outcome.map_err(|source| RunError::Solver {
            solver: self.model.solver_name(solver).to_owned(),
            equation: batch
                .odes
                .first()
                .map(|e| self.model.equation_name(*e).to_owned())
                .unwrap_or_default(),
            source,
        })?;

        system.set_state(&state);
        for (slot, value) in odes.iter().zip(&state) {
            self.check_finite(frame, slot.equation, *value, current)?;
        }
        system.update_plain()
    }

    fn evaluate(&self, frame: &Frame<'_>, equation: EquationId, current: &[Index]) -> Result<f64, RunError> {
        let Some(body) = self.model.equations.get(equation.id()).body.as_ref() else {
            return Ok(0.0);
        };
        let value = body(&ValueSet::running(frame, self.results, current, &self.fault));
        match self.fault.take() {
            Some(err) => Err(bounds_error(self.model, equation, err)),
            None => Ok(value),
        }
    }

    /// Sums, or weight-averages, the target over every index of one set.
    fn cumulate(
        &self,
        frame: &Frame<'_>,
        equation: EquationId,
        cumulation: Cumulation,
        current: &[Index],
    ) -> Result<f64, RunError> {
        let bounds = |err| bounds_error(self.model, equation, err);
        let (offset, stride) = self
            .structure
            .offset_skipping(cumulation.target.id(), current, cumulation.over)
            .map_err(bounds)?;
        let count = self.counts[cumulation.over.id()];
        let value = |k: usize| self.results[frame.cur_base + offset + k * stride].get();

        let Some(weight) = cumulation.weight else {
            return Ok((0..count).map(value).sum());
        };
        let (weight_offset, weight_stride) = self
            .parameters
            .structure
            .offset_skipping(weight.id(), current, cumulation.over)
            .map_err(bounds)?;
        let mut weighted = 0.0;
        let mut total = 0.0;
        for k in 0..count {
            let w = self.parameters.values[weight_offset + k * weight_stride]
                .as_f64()
                .unwrap_or(0.0);
            weighted += w * value(k);
            total += w;
        }
        Ok(if total == 0.0 { 0.0 } else { weighted / total })
    }

    fn condition_holds(&self, equation: EquationId, current: &[Index]) -> Result<bool, RunError> {
        let Some(condition) = self.model.equations.get(equation.id()).condition else {
            return Ok(true);
        };
        let at = self
            .parameters
            .structure
            .offset_current(condition.switch.id(), current)
            .map_err(|err| bounds_error(self.model, equation, err))?;
        Ok(self.parameters.values[at] == condition.value)
    }

    fn parameter_f64(
        &self,
        equation: EquationId,
        parameter: ParameterId,
        current: &[Index],
    ) -> Result<f64, RunError> {
        let at = self
            .parameters
            .structure
            .offset_current(parameter.id(), current)
            .map_err(|err| bounds_error(self.model, equation, err))?;
        Ok(self.parameters.values[at].as_f64().unwrap_or(0.0))
    }

    fn result_offset(&self, equation: EquationId, current: &[Index]) -> Result<usize, RunError> {
        self.structure
            .offset_current(equation.id(), current)
            .map_err(|err| bounds_error(self.model, equation, err))
    }

    #[cfg(feature = "nan-checks")]
    fn check_finite(
        &self,
        frame: &Frame<'_>,
        equation: EquationId,
        value: f64,
        current: &[Index],
    ) -> Result<(), RunError> {
        if value.is_finite() {
            return Ok(());
        }
        let report = self.report(frame, equation, value, current);
        log::error!("{report}");
        Err(RunError::NonFinite(Box::new(report)))
    }

    #[cfg(not(feature = "nan-checks"))]
    #[allow(clippy::unused_self, clippy::unnecessary_wraps)]
    fn check_finite(
        &self,
        _frame: &Frame<'_>,
        _equation: EquationId,
        _value: f64,
        _current: &[Index],
    ) -> Result<(), RunError> {
        Ok(())
    }

    #[cfg(feature = "nan-checks")]
    fn report(
        &self,
        frame: &Frame<'_>,
        equation: EquationId,
        value: f64,
        current: &[Index],
    ) -> crate::error::NonFiniteReport {
        let model = self.model;
        let spec = model.equations.get(equation.id());
        let reads = &spec.reads;

        let results_at = |list: &[(EquationId, Vec<crate::handle::IndexSetId>)], base: usize| {
            list.iter()
                .filter(|(_, explicit)| explicit.is_empty())
                .filter_map(|(e, _)| {
                    let at = self.structure.offset_current(e.id(), current).ok()?;
                    Some((model.equation_name(*e).to_owned(), self.results[base + at].get()))
                })
                .collect()
        };

        crate::error::NonFiniteReport {
            equation: model.equation_name(equation).to_owned(),
            value,
            timestep: frame.clock.timestep,
            date: frame.clock.date,
            indexes: spec
                .index_sets
                .iter()
                .map(|s| {
                    (
                        model.index_set_name(*s).to_owned(),
                        self.index_space.index_name(current[s.id()]).to_owned(),
                    )
                })
                .collect(),
            parameters: reads
                .implicit_parameters()
                .filter_map(|p| {
                    let at = self.parameters.structure.offset_current(p.id(), current).ok()?;
                    Some((
                        model.parameter_name(p).to_owned(),
                        self.parameters.values[at].to_string(),
                    ))
                })
                .collect(),
            inputs: reads
                .inputs
                .iter()
                .filter_map(|i| {
                    let at = self.inputs.structure.offset_current(i.id(), current).ok()?;
                    Some((
                        model.input_name(*i).to_owned(),
                        self.inputs.values[frame.input_base + at],
                    ))
                })
                .collect(),
            results: results_at(&reads.results, frame.cur_base),
            last_results: results_at(&reads.last_results, frame.last_base),
        }
    }
}

struct OdeSlot {
    equation: EquationId,
    at: usize,
    active: bool,
}

/// One solver batch at one index combination, seen as an ODE system.
///
/// Setting a state writes it into this timestep's result slots, so that the
/// batch's non-ODE equations and the derivatives read it like any result.
struct BatchSystem<'r, 'a> {
    runner: &'r Runner<'a>,
    frame: &'r Frame<'r>,
    batch: &'r Batch,
    current: &'r [Index],
    odes: &'r [OdeSlot],
    error: Option<RunError>,
}

impl BatchSystem<'_, '_> {
    fn set_state(&self, state: &[f64]) {
        for (slot, value) in self.odes.iter().zip(state) {
            self.runner.results[self.frame.cur_base + slot.at].set(*value);
        }
    }

    fn update_plain(&self) -> Result<(), RunError> {
        for &equation in &self.batch.equations {
            self.runner.update(self.frame, equation, self.current)?;
        }
        Ok(())
    }
}

impl OdeSystem for BatchSystem<'_, '_> {
    fn dimension(&self) -> usize {
        self.odes.len()
    }

    fn derivative(&mut self, state: &[f64], out: &mut [f64]) {
        out.fill(0.0);
        if self.error.is_some() {
            return;
        }
        self.set_state(state);
        if let Err(err) = self.update_plain() {
            self.error = Some(err);
            return;
        }
        for (slot, derivative) in self.odes.iter().zip(out.iter_mut()) {
            if !slot.active {
                continue;
            }
            match self.runner.evaluate(self.frame, slot.equation, self.current) {
                Ok(value) => *derivative = value,
                Err(err) => {
                    self.error = Some(err);
                    return;
                }
            }
        }
    }
}
