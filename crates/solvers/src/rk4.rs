//! Classic fourth-order Runge-Kutta with fixed sub-steps.

use basin_core::{OdeSystem, Solver, SolverConfig, SolverError};

use crate::fixed_steps;

/// Classic RK4, sub-stepping each timestep with the configured step fraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rk4;

impl Solver for Rk4 {
    fn solve(
        &self,
        state: &mut [f64],
        system: &mut dyn OdeSystem,
        config: &SolverConfig,
    ) -> Result<(), SolverError> {
        let n = state.len();
        let mut k1 = vec![0.0; n];
        let mut k2 = vec![0.0; n];
        let mut k3 = vec![0.0; n];
        let mut k4 = vec![0.0; n];
        let mut probe = vec![0.0; n];

        for h in fixed_steps(config.h()) {
            system.derivative(state, &mut k1);

            stage(&mut probe, state, &[(&k1[..], 0.5 * h)]);
            system.derivative(&probe, &mut k2);

            stage(&mut probe, state, &[(&k2[..], 0.5 * h)]);
            system.derivative(&probe, &mut k3);

            stage(&mut probe, state, &[(&k3[..], h)]);
            system.derivative(&probe, &mut k4);

            for i in 0..n {
                state[i] += h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
            }
        }
        Ok(())
    }
}

/// Writes `base + Σ weight * k` into `out`.
pub(crate) fn stage(out: &mut [f64], base: &[f64], terms: &[(&[f64], f64)]) {
    for (i, x) in out.iter_mut().enumerate() {
        *x = base[i] + terms.iter().map(|(k, w)| w * k[i]).sum::<f64>();
    }
}
