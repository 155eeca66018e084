//! Core engine for building and running catchment models.
//!
//! A model is declared once through a [`ModelBuilder`] and finalized into an
//! immutable [`Model`]. Any number of [`DataSet`]s can then be created against
//! it, each holding its own index sets, parameters, input series and results.
//!
//! - [`IndexSpace`]: named index sets, basic or branched
//! - [`StorageStructure`]: flat layouts for values indexed over several sets
//! - [`ValueSet`]: the read-only view equation bodies compute from
//! - [`Solver`] / [`OdeSystem`]: the plug-in contract for ODE methods
//!
//! Numerical methods themselves live in the `basin-solvers` crate.

mod calendar;
mod data_set;
mod equation;
mod error;
mod handle;
mod index;
mod model;
mod run;
mod solver;
mod storage;
mod value;

pub use calendar::{TimeUnit, TimestepSize};
pub use data_set::{
    CopyOptions, DataSet, DataSetConfig, IndexPolicy, InputSharing, PreprocessingStep,
};
pub use equation::{EquationFn, Upstream, ValueSet};
pub use error::{DataSetError, ModelError, NonFiniteReport, RunError};
pub use handle::{
    EntityKind, EquationId, GroupId, IndexSetId, InputId, Param, ParameterId, SolverId, UnitId,
};
pub use index::{Index, IndexError, IndexSetKind, IndexSpace};
pub use model::{
    Batch, EquationKind, InitialValue, InputDef, Model, ModelBuilder, ModuleInfo, ParameterDef,
};
pub use solver::{
    OdeSystem, Solver, SolverConfig, SolverConfigError, SolverError, estimate_jacobian,
};
pub use storage::{BoundsError, StorageBuilder, StorageStructure, StorageUnit};
pub use value::{Bool, Double, Enum, ParameterKind, ParameterType, ParameterValue, Time, UInt};
