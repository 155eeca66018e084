//! Error types for model definition, data set setup and model runs.

use std::fmt;

use jiff::civil::Date;
use thiserror::Error;

use crate::{
    handle::EntityKind,
    index::IndexError,
    model::EquationKind,
    solver::{SolverConfigError, SolverError},
    storage::BoundsError,
    value::ParameterType,
};

/// A mistake in the model definition.
///
/// These are caught before any data set exists. A builder that returned one
/// should be discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("{kind} \"{name}\" was registered twice")]
    Duplicate { kind: &'static str, name: String },

    #[error("{kind} handle {id} does not belong to this model")]
    UnknownHandle { kind: &'static str, id: usize },

    #[error("parameter \"{name}\": {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("equation \"{0}\" has no body")]
    MissingBody(String),

    #[error("equation \"{name}\" is {kind:?} and cannot {action}")]
    WrongEquationKind {
        name: String,
        kind: EquationKind,
        action: &'static str,
    },

    #[error("parameter \"{name}\" is {actual}, a switch must be bool or enum")]
    InvalidSwitch { name: String, actual: ParameterType },

    #[error("ODE equation \"{0}\" is not assigned to a solver")]
    OdeWithoutSolver(String),

    #[error("equation \"{equation}\" reads the initial-value equation \"{target}\"")]
    ReadsInitialValueEquation { equation: String, target: String },

    #[error(
        "equation \"{equation}\" indexes \"{target}\" explicitly by [{given}], which must be trailing sets of [{expected}]"
    )]
    ExplicitIndexes {
        equation: String,
        target: String,
        given: String,
        expected: String,
    },

    #[error("cumulative equation \"{equation}\" sums over \"{set}\", which {what} does not vary over")]
    CumulationOverMissingSet {
        equation: String,
        set: String,
        what: String,
    },

    #[error("equation \"{equation}\" computes parameter \"{parameter}\" but reads {what}")]
    ComputedParameterReads {
        equation: String,
        parameter: String,
        what: String,
    },

    #[error("circular dependency between non-ODE equations: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    #[error("circular dependency between initial values: {}", .0.join(" -> "))]
    CircularInitialValues(Vec<String>),

    #[error("solver \"{name}\": {source}")]
    Solver {
        name: String,
        #[source]
        source: SolverConfigError,
    },
}

/// A failed operation on a data set.
#[derive(Debug, Error)]
pub enum DataSetError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("the model has no {kind} named \"{name}\"")]
    UnknownName { kind: &'static str, name: String },

    #[error("{kind} \"{name}\" takes {expected} index names, got {got}")]
    IndexCount {
        kind: EntityKind,
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("parameter \"{name}\" is of type {expected}, got a value of type {got}")]
    TypeMismatch {
        name: String,
        expected: ParameterType,
        got: ParameterType,
    },

    #[error("enum parameter \"{name}\" has no value \"{value}\"")]
    UnknownEnumValue { name: String, value: String },

    #[error("parameter \"{name}\" has {expected} instances, got {got} values")]
    ValueCount {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("input \"{name}\" got a series of {len} values, storage holds {capacity} timesteps")]
    SeriesTooLong {
        name: String,
        len: usize,
        capacity: usize,
    },

    #[error("input \"{0}\" would start before the input data does")]
    StartsBeforeInput(String),

    #[error("equation \"{0}\" only computes an initial value and has no stored results")]
    NotStored(String),

    #[error("timestep {timestep} is outside the {timesteps} timesteps of the last run")]
    TimestepOutOfRange { timestep: usize, timesteps: usize },

    #[error("{0} storage has not been allocated")]
    NotAllocated(&'static str),

    #[error("{0} storage has already been allocated")]
    AlreadyAllocated(&'static str),

    #[error("cannot allocate storage, index set \"{0}\" has no indexes")]
    IndexesNotSet(String),

    #[error(transparent)]
    Bounds(#[from] BoundsError),

    #[error(transparent)]
    Calendar(#[from] jiff::Error),
}

/// A failed model run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    DataSet(#[from] DataSetError),

    #[error("input data starts {input_start}, after the model start date {model_start}")]
    InputStartsLate { input_start: Date, model_start: Date },

    #[error("input data has {available} timesteps from the model start date, the run needs {needed}")]
    InputTooShort { available: usize, needed: usize },

    #[error(
        "equation \"{equation}\": index {index} is out of bounds for index set \"{set}\" (count {count})"
    )]
    OutOfBounds {
        equation: String,
        set: String,
        index: u32,
        count: usize,
    },

    #[error("equation \"{equation}\": expected an index of \"{expected}\", got one of \"{found}\"")]
    WrongIndexSet {
        equation: String,
        expected: String,
        found: String,
    },

    #[error("{0}")]
    NonFinite(Box<NonFiniteReport>),

    #[error("solver \"{solver}\" failed for equation \"{equation}\": {source}")]
    Solver {
        solver: String,
        equation: String,
        #[source]
        source: SolverError,
    },
}

/// Context for a non-finite equation value.
#[derive(Debug, Clone, PartialEq)]
pub struct NonFiniteReport {
    pub equation: String,
    pub value: f64,
    pub timestep: i64,
    pub date: Date,
    /// `(index set, index)` names of the current combination.
    pub indexes: Vec<(String, String)>,
    pub parameters: Vec<(String, String)>,
    pub inputs: Vec<(String, f64)>,
    pub results: Vec<(String, f64)>,
    pub last_results: Vec<(String, f64)>,
}

impl fmt::Display for NonFiniteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "equation \"{}\" evaluated to {} at timestep {} ({})",
            self.equation, self.value, self.timestep, self.date
        )?;
        if !self.indexes.is_empty() {
            let tuple: Vec<String> = self
                .indexes
                .iter()
                .map(|(set, index)| format!("{set}={index}"))
                .collect();
            write!(f, " [{}]", tuple.join(", "))?;
        }
        for (name, value) in &self.parameters {
            write!(f, "\n  parameter {name} = {value}")?;
        }
        for (name, value) in &self.inputs {
            write!(f, "\n  input {name} = {value}")?;
        }
        for (name, value) in &self.results {
            write!(f, "\n  result {name} = {value}")?;
        }
        for (name, value) in &self.last_results {
            write!(f, "\n  last result {name} = {value}")?;
        }
        Ok(())
    }
}
