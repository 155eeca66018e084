//! The plug-in contract for numerical ODE solvers.
//!
//! A solver advances the state of one batch, at one index combination, by
//! exactly one model timestep. Time inside a timestep runs from `0` to `1`,
//! and derivatives are expressed per model timestep.

use thiserror::Error;

/// A system of ODEs exposed to a solver.
pub trait OdeSystem {
    /// Returns the number of state variables.
    fn dimension(&self) -> usize;

    /// Writes the derivative of every state variable at `state` into `out`.
    fn derivative(&mut self, state: &[f64], out: &mut [f64]);

    /// Writes the Jacobian `∂f_i/∂x_j` at `state` into `out`, row-major.
    ///
    /// The default implementation estimates it by forward differences.
    fn jacobian(&mut self, state: &[f64], out: &mut [f64]) {
        estimate_jacobian(self, state, out);
    }
}

/// Estimates the Jacobian of `system` at `state` by forward differences.
pub fn estimate_jacobian<S: OdeSystem + ?Sized>(system: &mut S, state: &[f64], out: &mut [f64]) {
    let n = state.len();
    let mut base = vec![0.0; n];
    let mut bumped = vec![0.0; n];
    let mut probe = state.to_vec();
    system.derivative(state, &mut base);

    for j in 0..n {
        let delta = f64::EPSILON.sqrt() * state[j].abs().max(1.0);
        probe[j] = state[j] + delta;
        system.derivative(&probe, &mut bumped);
        probe[j] = state[j];
        for i in 0..n {
            out[i * n + j] = (bumped[i] - base[i]) / delta;
        }
    }
}

/// A numerical method for advancing a batch of ODEs by one timestep.
pub trait Solver: Send + Sync {
    /// Advances `state` in place from the start to the end of one timestep.
    ///
    /// # Errors
    ///
    /// Returns an error if the method cannot complete the timestep.
    fn solve(
        &self,
        state: &mut [f64],
        system: &mut dyn OdeSystem,
        config: &SolverConfig,
    ) -> Result<(), SolverError>;

    /// Whether the method calls [`OdeSystem::jacobian`].
    fn uses_jacobian(&self) -> bool {
        false
    }

    /// Whether the method honors the configured tolerances.
    fn uses_error_control(&self) -> bool {
        false
    }
}

/// Step fraction and tolerances for one registered solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConfig {
    h: f64,
    abs_tol: f64,
    rel_tol: f64,
}

/// Errors from validating a solver config.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum SolverConfigError {
    #[error("step fraction must be in (0, 1], got {0}")]
    StepFraction(f64),

    #[error("tolerances must be finite and non-negative")]
    Tolerance,
}

impl SolverConfig {
    /// Creates a config with step fraction `h` and default tolerances.
    ///
    /// # Errors
    ///
    /// Fails unless `0 < h <= 1`.
    pub fn new(h: f64) -> Result<Self, SolverConfigError> {
        Self::with_tolerances(h, 1e-6, 1e-6)
    }

    /// Creates a config with explicit absolute and relative tolerances.
    ///
    /// # Errors
    ///
    /// Fails unless `0 < h <= 1` and both tolerances are finite and
    /// non-negative.
    pub fn with_tolerances(h: f64, abs_tol: f64, rel_tol: f64) -> Result<Self, SolverConfigError> {
        if !(h > 0.0 && h <= 1.0) {
            return Err(SolverConfigError::StepFraction(h));
        }
        if !abs_tol.is_finite() || abs_tol < 0.0 || !rel_tol.is_finite() || rel_tol < 0.0 {
            return Err(SolverConfigError::Tolerance);
        }
        Ok(Self {
            h,
            abs_tol,
            rel_tol,
        })
    }

    /// Returns the step fraction.
    #[must_use]
    pub fn h(&self) -> f64 {
        self.h
    }

    /// Returns the absolute error tolerance.
    #[must_use]
    pub fn abs_tol(&self) -> f64 {
        self.abs_tol
    }

    /// Returns the relative error tolerance.
    #[must_use]
    pub fn rel_tol(&self) -> f64 {
        self.rel_tol
    }
}

/// Errors a solver can report for one timestep.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum SolverError {
    #[error("step size fell below {min:e} with {remaining} of the timestep left")]
    StepTooSmall { min: f64, remaining: f64 },

    #[error("newton iteration did not converge within {0} iterations")]
    NotConverged(usize),

    #[error("jacobian is singular")]
    SingularJacobian,
}
