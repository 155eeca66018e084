//! Backward Euler for stiff batches.
//!
//! Each sub-step solves
//!
//! ```text
//! x_{n+1} = x_n + h * f(x_{n+1})
//! ```
//!
//! by Newton iteration, using the batch Jacobian to form `I - h J`.

use basin_core::{OdeSystem, Solver, SolverConfig, SolverError};

use crate::fixed_steps;

const MAX_ITERATIONS: usize = 50;

/// Implicit Euler with fixed sub-steps and Newton iteration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImplicitEuler;

impl Solver for ImplicitEuler {
    fn solve(
        &self,
        state: &mut [f64],
        system: &mut dyn OdeSystem,
        config: &SolverConfig,
    ) -> Result<(), SolverError> {
        let n = state.len();
        let mut next = vec![0.0; n];
        let mut slope = vec![0.0; n];
        let mut jacobian = vec![0.0; n * n];
        let mut matrix = vec![0.0; n * n];
        let mut delta = vec![0.0; n];

        for h in fixed_steps(config.h()) {
            // Predict with an explicit step.
            system.derivative(state, &mut slope);
            for i in 0..n {
                next[i] = state[i] + h * slope[i];
            }

            let mut converged = false;
            for _ in 0..MAX_ITERATIONS {
                system.derivative(&next, &mut slope);
                system.jacobian(&next, &mut jacobian);

                for row in 0..n {
                    for col in 0..n {
                        let identity = if row == col { 1.0 } else { 0.0 };
                        matrix[row * n + col] = identity - h * jacobian[row * n + col];
                    }
                    delta[row] = state[row] + h * slope[row] - next[row];
                }
                solve_linear(&mut matrix, &mut delta, n)?;

                converged = true;
                for (x, dx) in next.iter_mut().zip(&delta) {
                    *x += dx;
                    let tolerance = config.abs_tol()
                        + config.rel_tol() * x.abs()
                        + f64::EPSILON * x.abs().max(1.0);
                    if !(dx.abs() <= tolerance) {
                        converged = false;
                    }
                }
                if converged {
                    break;
                }
            }
            if !converged {
                return Err(SolverError::NotConverged(MAX_ITERATIONS));
            }
            state.copy_from_slice(&next);
        }
        Ok(())
    }

    fn uses_jacobian(&self) -> bool {
        true
    }

    fn uses_error_control(&self) -> bool {
        true
    }
}

/// Solves `a x = b` in place by Gaussian elimination with partial pivoting.
///
/// `a` is row-major `n × n` and is destroyed; `b` is replaced by `x`.
fn solve_linear(a: &mut [f64], b: &mut [f64], n: usize) -> Result<(), SolverError> {
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i * n + col].abs().total_cmp(&a[j * n + col].abs()))
            .unwrap_or(col);
        if !(a[pivot * n + col].abs() > f64::MIN_POSITIVE) {
            return Err(SolverError::SingularJacobian);
        }
        if pivot != col {
            for k in 0..n {
                a.swap(col * n + k, pivot * n + k);
            }
            b.swap(col, pivot);
        }

        for row in col + 1..n {
            let factor = a[row * n + col] / a[col * n + col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row * n + k] -= factor * a[col * n + k];
            }
            b[row] -= factor * b[col];
        }
    }

    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in row + 1..n {
            sum -= a[row * n + k] * b[k];
        }
        b[row] = sum / a[row * n + row];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    use crate::test_systems::{Cascade, Decay};

    // --- Test fixtures ---

    /// dx/dt = r x with an exact Jacobian.
    struct Growth {
        rate: f64,
    }

    impl OdeSystem for Growth {
        fn dimension(&self) -> usize {
            1
        }

        fn derivative(&mut self, state: &[f64], out: &mut [f64]) {
            out[0] = self.rate * state[0];
        }

        fn jacobian(&mut self, _state: &[f64], out: &mut [f64]) {
            out[0] = self.rate;
        }
    }

    // --- Tests ---

    #[test]
    fn matches_the_closed_form_of_the_scheme() {
        let mut system = Decay::new(&[1.0]);
        let mut state = [1.0];
        let config = SolverConfig::new(0.01).unwrap();

        ImplicitEuler.solve(&mut state, &mut system, &config).unwrap();

        assert_relative_eq!(state[0], 1.01_f64.powi(-100), max_relative = 1e-6);
        assert_relative_eq!(state[0], (-1.0_f64).exp(), max_relative = 1e-2);
    }

    #[test]
    fn stiff_decay_stays_stable() {
        let mut system = Decay::new(&[1000.0]);
        let mut state = [1.0];
        let config = SolverConfig::new(0.1).unwrap();

        ImplicitEuler.solve(&mut state, &mut system, &config).unwrap();

        assert!(state[0] > 0.0);
        assert!(state[0] < 1e-15);
    }

    #[test]
    fn coupled_reservoirs() {
        let mut system = Cascade { a: 0.8, b: 0.3 };
        let mut state = [10.0, 2.0];
        let exact = system.exact(10.0, 2.0);
        let config = SolverConfig::new(0.01).unwrap();

        ImplicitEuler.solve(&mut state, &mut system, &config).unwrap();

        assert_relative_eq!(state[0], exact[0], max_relative = 1e-2);
        assert_relative_eq!(state[1], exact[1], max_relative = 1e-2);
    }

    #[test]
    fn singular_newton_matrix_is_an_error() {
        // I - h J = 1 - 0.5 * 2 = 0
        let config = SolverConfig::new(0.5).unwrap();
        let result = ImplicitEuler.solve(&mut [1.0], &mut Growth { rate: 2.0 }, &config);

        assert_eq!(result, Err(SolverError::SingularJacobian));
    }

    #[test]
    fn linear_solve_pivots() {
        let mut a = [0.0, 2.0, 3.0, 1.0];
        let mut b = [4.0, 5.0];

        solve_linear(&mut a, &mut b, 2).unwrap();

        assert_relative_eq!(b[0], 1.0);
        assert_relative_eq!(b[1], 2.0);
    }

    #[test]
    fn reports_jacobian_use() {
        assert!(ImplicitEuler.uses_jacobian());
    }
}
