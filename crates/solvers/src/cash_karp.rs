//! Adaptive Runge-Kutta 4(5) with Cash-Karp coefficients.
//!
//! Each attempt computes a fifth-order solution and an embedded fourth-order
//! one. Their difference, scaled by `abs_tol + rel_tol * |x|`, decides whether
//! the attempt is accepted and how the next step is sized. The configured step
//! fraction is only the first step tried.

use basin_core::{OdeSystem, Solver, SolverConfig, SolverError};

use crate::{END_TOLERANCE, rk4::stage};

const A2: [f64; 1] = [1.0 / 5.0];
const A3: [f64; 2] = [3.0 / 40.0, 9.0 / 40.0];
const A4: [f64; 3] = [3.0 / 10.0, -9.0 / 10.0, 6.0 / 5.0];
const A5: [f64; 4] = [-11.0 / 54.0, 5.0 / 2.0, -70.0 / 27.0, 35.0 / 27.0];
const A6: [f64; 5] = [
    1631.0 / 55296.0,
    175.0 / 512.0,
    575.0 / 13824.0,
    44275.0 / 110_592.0,
    253.0 / 4096.0,
];

/// Fifth-order weights.
const B5: [f64; 6] = [37.0 / 378.0, 0.0, 250.0 / 621.0, 125.0 / 594.0, 0.0, 512.0 / 1771.0];

/// Embedded fourth-order weights.
const B4: [f64; 6] = [
    2825.0 / 27648.0,
    0.0,
    18575.0 / 48384.0,
    13525.0 / 55296.0,
    277.0 / 14336.0,
    1.0 / 4.0,
];

const SAFETY: f64 = 0.9;
const MAX_GROWTH: f64 = 5.0;
const MAX_SHRINK: f64 = 0.1;

/// Smallest step tried before the timestep is abandoned.
const MIN_STEP: f64 = 1e-10;

/// Adaptive Cash-Karp Runge-Kutta solver.
#[derive(Debug, Clone, Copy, Default)]
pub struct CashKarp;

impl Solver for CashKarp {
    fn solve(
        &self,
        state: &mut [f64],
        system: &mut dyn OdeSystem,
        config: &SolverConfig,
    ) -> Result<(), SolverError> {
        let mut work = Stages::new(state.len());
        let mut t = 0.0;
        let mut h = config.h();
        let mut accepted = 0_usize;
        let mut rejected = 0_usize;

        while 1.0 - t > END_TOLERANCE {
            if h < MIN_STEP {
                return Err(SolverError::StepTooSmall {
                    min: MIN_STEP,
                    remaining: 1.0 - t,
                });
            }
            let step = h.min(1.0 - t);
            let error = work.attempt(state, system, step, config);

            if error <= 1.0 {
                state.copy_from_slice(&work.next);
                t += step;
                accepted += 1;
                let growth = if error == 0.0 {
                    MAX_GROWTH
                } else {
                    (SAFETY * error.powf(-0.2)).min(MAX_GROWTH)
                };
                h = step * growth;
            } else {
                rejected += 1;
                h = step * (SAFETY * error.powf(-0.25)).max(MAX_SHRINK);
            }
        }

        log::trace!("cash-karp: {accepted} steps accepted, {rejected} rejected");
        Ok(())
    }

    fn uses_error_control(&self) -> bool {
        true
    }
}

/// Scratch space for one attempted step.
struct Stages {
    k: [Vec<f64>; 6],
    probe: Vec<f64>,
    next: Vec<f64>,
}

impl Stages {
    fn new(n: usize) -> Self {
        Self {
            k: std::array::from_fn(|_| vec![0.0; n]),
            probe: vec![0.0; n],
            next: vec![0.0; n],
        }
    }

    /// Attempts a step of size `h` from `state`, leaving the fifth-order
    /// result in `self.next`.
    ///
    /// Returns the scaled error norm; values up to `1` are acceptable.
    fn attempt(
        &mut self,
        state: &[f64],
        system: &mut dyn OdeSystem,
        h: f64,
        config: &SolverConfig,
    ) -> f64 {
        let rows: [&[f64]; 5] = [&A2, &A3, &A4, &A5, &A6];

        system.derivative(state, &mut self.k[0]);
        for (stage_index, row) in rows.iter().enumerate() {
            let (done, rest) = self.k.split_at_mut(stage_index + 1);
            let terms: Vec<(&[f64], f64)> = row
                .iter()
                .zip(done.iter())
                .map(|(a, k)| (k.as_slice(), a * h))
                .collect();
            stage(&mut self.probe, state, &terms);
            system.derivative(&self.probe, &mut rest[0]);
        }

        let mut error: f64 = 0.0;
        for i in 0..state.len() {
            let mut high = 0.0;
            let mut low = 0.0;
            for (j, k) in self.k.iter().enumerate() {
                high += B5[j] * k[i];
                low += B4[j] * k[i];
            }
            self.next[i] = state[i] + h * high;

            let scale = config.abs_tol()
                + config.rel_tol() * state[i].abs().max(self.next[i].abs());
            let ratio = (h * (high - low)).abs() / scale.max(f64::MIN_POSITIVE);
            if ratio.is_nan() {
                return f64::INFINITY;
            }
            error = error.max(ratio);
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    use crate::test_systems::{Cascade, Decay};

    #[test]
    fn decay_within_tolerance() {
        let mut system = Decay::new(&[1.0, 3.0]);
        let mut state = [1.0, 5.0];
        let exact = system.exact(&state);
        let config = SolverConfig::with_tolerances(0.5, 1e-8, 1e-8).unwrap();

        CashKarp.solve(&mut state, &mut system, &config).unwrap();

        assert_relative_eq!(state[0], exact[0], max_relative = 1e-6);
        assert_relative_eq!(state[1], exact[1], max_relative = 1e-6);
    }

    #[test]
    fn loose_tolerances_take_fewer_steps() {
        let tight = SolverConfig::with_tolerances(0.1, 1e-10, 1e-10).unwrap();
        let loose = SolverConfig::with_tolerances(0.1, 1e-3, 1e-3).unwrap();

        let mut tight_system = Decay::new(&[4.0]);
        CashKarp.solve(&mut [1.0], &mut tight_system, &tight).unwrap();
        let mut loose_system = Decay::new(&[4.0]);
        CashKarp.solve(&mut [1.0], &mut loose_system, &loose).unwrap();

        assert!(loose_system.evaluations < tight_system.evaluations);
    }

    #[test]
    fn coupled_reservoirs() {
        let mut system = Cascade { a: 2.0, b: 0.5 };
        let mut state = [4.0, 0.0];
        let exact = system.exact(4.0, 0.0);
        let config = SolverConfig::with_tolerances(1.0, 1e-9, 1e-9).unwrap();

        CashKarp.solve(&mut state, &mut system, &config).unwrap();

        assert_relative_eq!(state[0], exact[0], max_relative = 1e-6);
        assert_relative_eq!(state[1], exact[1], max_relative = 1e-6);
    }

    #[test]
    fn gives_up_when_steps_collapse() {
        struct Blowup;

        impl OdeSystem for Blowup {
            fn dimension(&self) -> usize {
                1
            }

            fn derivative(&mut self, _state: &[f64], out: &mut [f64]) {
                out[0] = f64::NAN;
            }
        }

        let config = SolverConfig::with_tolerances(0.5, 1e-6, 1e-6).unwrap();
        let result = CashKarp.solve(&mut [1.0], &mut Blowup, &config);

        assert!(matches!(result, Err(SolverError::StepTooSmall { .. })));
    }

    #[test]
    fn reports_error_control() {
        assert!(CashKarp.uses_error_control());
        assert!(!CashKarp.uses_jacobian());
    }
}
