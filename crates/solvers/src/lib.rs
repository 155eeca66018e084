//! Numerical ODE solvers for basin model batches.
//!
//! Every solver implements [`basin_core::Solver`] and advances one batch by
//! one model timestep, with time running from `0` to `1`:
//!
//! - [`Euler`]: forward Euler with fixed sub-steps
//! - [`Rk4`]: classic fourth-order Runge-Kutta with fixed sub-steps
//! - [`CashKarp`]: adaptive Runge-Kutta 4(5) with error control
//! - [`ImplicitEuler`]: backward Euler solved by Newton iteration
//!
//! # Example
//!
//! ```ignore
//! use basin_solvers::CashKarp;
//!
//! let solver =
//!     builder.register_solver_with_tolerances("Reach solver", 0.1, 1e-6, 1e-6, CashKarp)?;
//! builder.set_solver(flow, solver)?;
//! ```

mod cash_karp;
mod euler;
mod implicit_euler;
mod rk4;

pub use cash_karp::CashKarp;
pub use euler::Euler;
pub use implicit_euler::ImplicitEuler;
pub use rk4::Rk4;

/// Remaining time below which a timestep counts as complete.
const END_TOLERANCE: f64 = 1e-12;

/// Splits the unit timestep into steps of at most `h`.
///
/// The last step is shortened so the steps sum to one.
fn fixed_steps(h: f64) -> impl Iterator<Item = f64> {
    let mut t = 0.0;
    std::iter::from_fn(move || {
        let remaining = 1.0 - t;
        if remaining <= END_TOLERANCE {
            return None;
        }
        let step = h.min(remaining);
        t += step;
        Some(step)
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    #[test]
    fn fixed_steps_sum_to_one() {
        let steps: Vec<f64> = fixed_steps(0.3).collect();
        assert_eq!(steps.len(), 4);
        assert_relative_eq!(steps[3], 0.1, epsilon = 1e-12);
        assert_relative_eq!(steps.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn a_full_step_is_one_step() {
        assert_eq!(fixed_steps(1.0).collect::<Vec<_>>(), vec![1.0]);
    }

    #[test]
    fn hundredths_take_a_hundred_steps() {
        assert_eq!(fixed_steps(0.01).count(), 100);
    }
}
