//! The accessor handed to equation bodies.
//!
//! Equation bodies are plain closures of type [`EquationFn`]. They read
//! parameters, inputs and other results through a [`ValueSet`]. The same body
//! is called in two modes:
//!
//! - **Recording**, once while the model is finalized. Every read is logged so
//!   dependencies and index sets can be inferred. Parameters read as their
//!   default value, everything else reads as zero.
//! - **Running**, for every index combination of every timestep.
//!
//! # Example
//!
//! ```ignore
//! builder.set_equation(volume, move |v| {
//!     v.parameter(inflow) - v.result(volume_out)
//! })?;
//! ```

use std::cell::{Cell, RefCell};

use jiff::civil::Date;

use crate::{
    calendar::Clock,
    handle::{EquationId, IndexSetId, InputId, Param, ParameterId},
    index::{Index, IndexSpace},
    storage::{BoundsError, StorageStructure},
    value::{Double, ParameterKind, ParameterValue},
};

/// The type of an equation body.
pub type EquationFn = dyn Fn(&ValueSet<'_>) -> f64 + Send + Sync;

/// Everything an equation read during recording.
///
/// Explicitly indexed reads carry the index sets that were given explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Reads {
    pub(crate) parameters: Vec<(ParameterId, Vec<IndexSetId>)>,
    pub(crate) inputs: Vec<InputId>,
    pub(crate) results: Vec<(EquationId, Vec<IndexSetId>)>,
    pub(crate) last_results: Vec<(EquationId, Vec<IndexSetId>)>,
    pub(crate) index_sets: Vec<IndexSetId>,
    pub(crate) writes: Vec<EquationId>,
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, item: T) {
    if !list.contains(&item) {
        list.push(item);
    }
}

fn sets_of(indexes: &[Index]) -> Vec<IndexSetId> {
    indexes.iter().map(|i| i.set()).collect()
}

impl Reads {
    fn parameter(&mut self, id: ParameterId, explicit: &[Index]) {
        push_unique(&mut self.parameters, (id, sets_of(explicit)));
    }

    fn input(&mut self, id: InputId) {
        push_unique(&mut self.inputs, id);
    }

    fn result(&mut self, id: EquationId, explicit: &[Index]) {
        push_unique(&mut self.results, (id, sets_of(explicit)));
    }

    fn last_result(&mut self, id: EquationId, explicit: &[Index]) {
        push_unique(&mut self.last_results, (id, sets_of(explicit)));
    }

    fn index_set(&mut self, set: IndexSetId) {
        push_unique(&mut self.index_sets, set);
    }

    fn write(&mut self, id: EquationId) {
        push_unique(&mut self.writes, id);
    }

    /// Parameters read at the current index combination.
    pub(crate) fn implicit_parameters(&self) -> impl Iterator<Item = ParameterId> + '_ {
        self.parameters
            .iter()
            .filter(|(_, explicit)| explicit.is_empty())
            .map(|(id, _)| *id)
    }
}

/// Shared state for all evaluations within one timestep.
pub(crate) struct Frame<'a> {
    pub(crate) index_space: &'a IndexSpace,
    pub(crate) parameters: &'a [ParameterValue],
    pub(crate) parameter_structure: &'a StorageStructure,
    pub(crate) inputs: &'a [f64],
    pub(crate) input_provided: &'a [bool],
    pub(crate) input_structure: &'a StorageStructure,
    pub(crate) input_base: usize,
    pub(crate) result_structure: &'a StorageStructure,
    pub(crate) cur_base: usize,
    pub(crate) last_base: usize,
    pub(crate) clock: Clock,
}

struct Running<'a> {
    frame: &'a Frame<'a>,
    results: &'a [Cell<f64>],
    current: &'a [Index],
    fault: &'a Cell<Option<BoundsError>>,
}

impl Running<'_> {
    /// Resolves an offset, remembering the first bounds violation.
    fn resolve(&self, offset: Result<usize, BoundsError>) -> Option<usize> {
        match offset {
            Ok(at) => Some(at),
            Err(err) => {
                if self.fault.get().is_none() {
                    self.fault.set(Some(err));
                }
                None
            }
        }
    }

    fn result_slot(&self, base: usize, id: EquationId, explicit: &[Index]) -> f64 {
        let structure = self.frame.result_structure;
        let offset = if explicit.is_empty() {
            structure.offset_current(id.id(), self.current)
        } else {
            structure.offset_overriding(id.id(), self.current, explicit)
        };
        self.resolve(offset)
            .map_or(0.0, |at| self.results[base + at].get())
    }
}

enum Access<'a> {
    Record {
        defaults: &'a [ParameterValue],
        reads: &'a RefCell<Reads>,
    },
    Run(Running<'a>),
}

/// Read access to model values for one equation evaluation.
pub struct ValueSet<'a> {
    access: Access<'a>,
}

static PLACEHOLDER_UPSTREAM: [u32; 1] = [0];

impl<'a> ValueSet<'a> {
    pub(crate) fn recording(defaults: &'a [ParameterValue], reads: &'a RefCell<Reads>) -> Self {
        Self {
            access: Access::Record { defaults, reads },
        }
    }

    pub(crate) fn running(
        frame: &'a Frame<'a>,
        results: &'a [Cell<f64>],
        current: &'a [Index],
        fault: &'a Cell<Option<BoundsError>>,
    ) -> Self {
        Self {
            access: Access::Run(Running {
                frame,
                results,
                current,
                fault,
            }),
        }
    }

    /// Reads a parameter at the current index combination.
    pub fn parameter<K: ParameterKind>(&self, param: Param<K>) -> K::Value {
        self.parameter_at(param, &[])
    }

    /// Reads a parameter with its last `indexes.len()` index sets given
    /// explicitly and the rest taken from the current index combination.
    pub fn parameter_at<K: ParameterKind>(&self, param: Param<K>, indexes: &[Index]) -> K::Value {
        let id = param.id();
        match &self.access {
            Access::Record { defaults, reads } => {
                reads.borrow_mut().parameter(id, indexes);
                K::extract(&defaults[id.id()])
            }
            Access::Run(run) => {
                let structure = run.frame.parameter_structure;
                let offset = if indexes.is_empty() {
                    structure.offset_current(id.id(), run.current)
                } else {
                    structure.offset_overriding(id.id(), run.current, indexes)
                };
                run.resolve(offset).map_or_else(
                    || K::extract(&ParameterValue::Bool(false)),
                    |at| K::extract(&run.frame.parameters[at]),
                )
            }
        }
    }

    /// Reads an input at the current timestep and index combination.
    pub fn input(&self, input: InputId) -> f64 {
        match &self.access {
            Access::Record { reads, .. } => {
                reads.borrow_mut().input(input);
                0.0
            }
            Access::Run(run) => {
                let offset = run.frame.input_structure.offset_current(input.id(), run.current);
                run.resolve(offset)
                    .map_or(0.0, |at| run.frame.inputs[run.frame.input_base + at])
            }
        }
    }

    /// Returns true if a series was supplied for the input at the current
    /// index combination.
    pub fn input_was_provided(&self, input: InputId) -> bool {
        match &self.access {
            Access::Record { reads, .. } => {
                reads.borrow_mut().input(input);
                true
            }
            Access::Run(run) => {
                let offset = run.frame.input_structure.offset_current(input.id(), run.current);
                run.resolve(offset)
                    .is_some_and(|at| run.frame.input_provided[at])
            }
        }
    }

    /// Reads `input` if it was provided, otherwise `fallback`.
    pub fn input_or_parameter(&self, input: InputId, fallback: Param<Double>) -> f64 {
        if let Access::Record { .. } = self.access {
            let value = self.input(input);
            self.parameter(fallback);
            return value;
        }
        if self.input_was_provided(input) {
            self.input(input)
        } else {
            self.parameter(fallback)
        }
    }

    /// Reads another equation's value for this timestep.
    ///
    /// This orders `equation` before the reader.
    pub fn result(&self, equation: EquationId) -> f64 {
        self.result_at(equation, &[])
    }

    /// Reads an equation's value for this timestep at explicitly given
    /// trailing indexes, for example an upstream reach.
    pub fn result_at(&self, equation: EquationId, indexes: &[Index]) -> f64 {
        match &self.access {
            Access::Record { reads, .. } => {
                reads.borrow_mut().result(equation, indexes);
                0.0
            }
            Access::Run(run) => run.result_slot(run.frame.cur_base, equation, indexes),
        }
    }

    /// Reads an equation's value from the previous timestep.
    pub fn last_result(&self, equation: EquationId) -> f64 {
        self.last_result_at(equation, &[])
    }

    /// Reads an equation's previous-timestep value at explicit trailing indexes.
    pub fn last_result_at(&self, equation: EquationId, indexes: &[Index]) -> f64 {
        match &self.access {
            Access::Record { reads, .. } => {
                reads.borrow_mut().last_result(equation, indexes);
                0.0
            }
            Access::Run(run) => run.result_slot(run.frame.last_base, equation, indexes),
        }
    }

    /// Reads an equation's value from `steps_back` timesteps ago.
    ///
    /// A `steps_back` of zero is treated as one. Reaching back past the start
    /// of the run reads the initial value.
    pub fn earlier_result(&self, equation: EquationId, steps_back: usize) -> f64 {
        match &self.access {
            Access::Record { reads, .. } => {
                reads.borrow_mut().last_result(equation, &[]);
                0.0
            }
            Access::Run(run) => {
                let stride = run.frame.result_structure.total_count();
                let base = run
                    .frame
                    .cur_base
                    .saturating_sub(steps_back.max(1) * stride);
                run.result_slot(base, equation, &[])
            }
        }
    }

    /// Overwrites another equation's value for this timestep at the current
    /// index combination.
    ///
    /// This does not create an ordering dependency. The written value is only
    /// kept if the target is evaluated before the writer within the timestep.
    pub fn set_result(&self, equation: EquationId, value: f64) {
        match &self.access {
            Access::Record { reads, .. } => reads.borrow_mut().write(equation),
            Access::Run(run) => {
                let offset = run
                    .frame
                    .result_structure
                    .offset_current(equation.id(), run.current);
                if let Some(at) = run.resolve(offset) {
                    run.results[run.frame.cur_base + at].set(value);
                }
            }
        }
    }

    /// Returns the current index of `set`.
    pub fn current_index(&self, set: IndexSetId) -> Index {
        match &self.access {
            Access::Record { reads, .. } => {
                reads.borrow_mut().index_set(set);
                Index::new(set, 0)
            }
            Access::Run(run) => run.current[set.id()],
        }
    }

    /// Returns the number of indexes in `set`.
    pub fn index_count(&self, set: IndexSetId) -> u32 {
        match &self.access {
            Access::Record { reads, .. } => {
                reads.borrow_mut().index_set(set);
                1
            }
            Access::Run(run) => u32::try_from(run.frame.index_space.count(set)).unwrap_or(u32::MAX),
        }
    }

    /// Iterates the upstream indexes of the current index of a branched set.
    ///
    /// While recording, this yields one placeholder index so that reads in a
    /// loop body are seen.
    pub fn upstream(&self, set: IndexSetId) -> Upstream<'a> {
        match &self.access {
            Access::Record { reads, .. } => {
                reads.borrow_mut().index_set(set);
                Upstream {
                    set,
                    positions: PLACEHOLDER_UPSTREAM.iter(),
                }
            }
            Access::Run(run) => {
                let space: &'a IndexSpace = run.frame.index_space;
                Upstream {
                    set,
                    positions: space.upstream_positions(run.current[set.id()]).iter(),
                }
            }
        }
    }

    /// Returns the current timestep, or -1 while computing initial values.
    pub fn timestep(&self) -> i64 {
        self.clock().timestep
    }

    /// Returns the date of the current timestep.
    pub fn date(&self) -> Date {
        self.clock().date
    }

    /// Returns the day of the year of the current timestep, from 1.
    pub fn day_of_year(&self) -> u16 {
        self.clock().day_of_year()
    }

    /// Returns 365 or 366.
    pub fn days_in_year(&self) -> u16 {
        self.clock().days_in_year()
    }

    /// Returns the number of days in the current month.
    pub fn days_in_month(&self) -> u8 {
        self.clock().days_in_month()
    }

    fn clock(&self) -> Clock {
        match &self.access {
            Access::Record { .. } => Clock::recording(),
            Access::Run(run) => run.frame.clock,
        }
    }
}

/// Upstream indexes of a branched index set.
#[derive(Debug, Clone)]
pub struct Upstream<'a> {
    set: IndexSetId,
    positions: std::slice::Iter<'a, u32>,
}

impl Iterator for Upstream<'_> {
    type Item = Index;

    fn next(&mut self) -> Option<Index> {
        self.positions.next().map(|&p| Index::new(self.set, p))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.positions.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_logs_every_kind_of_read() {
        let reads = RefCell::new(Reads::default());
        let defaults = [ParameterValue::Double(4.0)];
        let values = ValueSet::recording(&defaults, &reads);

        let rate = Param::<Double>::new(ParameterId(0));
        let reaches = IndexSetId(1);
        let flow = EquationId(3);

        let mut sum = values.parameter(rate);
        for up in values.upstream(reaches) {
            sum += values.result_at(flow, &[up]);
        }
        sum += values.last_result(EquationId(2));
        sum += values.input(InputId(0));
        drop(values);

        let reads = reads.into_inner();
        assert_eq!(sum, 4.0);
        assert_eq!(reads.parameters, vec![(ParameterId(0), vec![])]);
        assert_eq!(reads.results, vec![(flow, vec![reaches])]);
        assert_eq!(reads.last_results, vec![(EquationId(2), vec![])]);
        assert_eq!(reads.index_sets, vec![reaches]);
        assert_eq!(reads.inputs, vec![InputId(0)]);
    }

    #[test]
    fn repeated_reads_are_recorded_once() {
        let reads = RefCell::new(Reads::default());
        let values = ValueSet::recording(&[], &reads);

        values.result(EquationId(0));
        values.result(EquationId(0));
        values.current_index(IndexSetId(0));
        values.index_count(IndexSetId(0));
        drop(values);

        let reads = reads.into_inner();
        assert_eq!(reads.results.len(), 1);
        assert_eq!(reads.index_sets.len(), 1);
    }
}
