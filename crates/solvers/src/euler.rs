//! Forward Euler with fixed sub-steps.
//!
//! ```text
//! x_{n+1} = x_n + h * f(x_n)
//! ```

use basin_core::{OdeSystem, Solver, SolverConfig, SolverError};

use crate::fixed_steps;

/// Forward Euler, sub-stepping each timestep with the configured step fraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Euler;

impl Solver for Euler {
    fn solve(
        &self,
        state: &mut [f64],
        system: &mut dyn OdeSystem,
        config: &SolverConfig,
    ) -> Result<(), SolverError> {
        let mut derivative = vec![0.0; state.len()];
        for h in fixed_steps(config.h()) {
            system.derivative(state, &mut derivative);
            for (x, dx) in state.iter_mut().zip(&derivative) {
                *x += h * dx;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    use crate::test_systems::Decay;

    #[test]
    fn matches_the_closed_form_of_the_scheme() {
        let mut system = Decay::new(&[1.0]);
        let mut state = [1.0];
        let config = SolverConfig::new(0.01).unwrap();

        Euler.solve(&mut state, &mut system, &config).unwrap();

        assert_relative_eq!(state[0], 0.99_f64.powi(100), epsilon = 1e-12);
        assert_eq!(system.evaluations, 100);
    }

    #[test]
    fn small_steps_approach_the_exact_solution() {
        let mut system = Decay::new(&[0.5, 2.0]);
        let mut state = [3.0, 1.0];
        let exact = system.exact(&state);
        let config = SolverConfig::new(0.001).unwrap();

        Euler.solve(&mut state, &mut system, &config).unwrap();

        assert_relative_eq!(state[0], exact[0], max_relative = 1e-3);
        assert_relative_eq!(state[1], exact[1], max_relative = 1e-2);
    }

    #[test]
    fn a_full_step_is_one_evaluation() {
        let mut system = Decay::new(&[0.5]);
        let mut state = [2.0];
        let config = SolverConfig::new(1.0).unwrap();

        Euler.solve(&mut state, &mut system, &config).unwrap();

        assert_relative_eq!(state[0], 1.0);
        assert_eq!(system.evaluations, 1);
    }
}
