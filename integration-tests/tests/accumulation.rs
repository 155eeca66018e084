use std::sync::Arc;

use approx::assert_relative_eq;
use basin_core::{DataSet, Model, ModelBuilder, ParameterValue, Solver};
use basin_solvers::{CashKarp, Euler, Rk4};
use integration_tests::land;

// --- Test fixtures ---

/// Land use data with `k` indexes, rates `1..=k` and areas `1, 2, 4, ...`.
fn land_uses(k: usize) -> (DataSet, Vec<f64>, Vec<f64>) {
    let model = Arc::new(land::model().expect("land model should finalize"));
    let mut data = DataSet::new(model);

    let names: Vec<String> = (0..k).map(|i| format!("Land {i}")).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    data.set_indexes("Land use", &names).unwrap();
    data.set_parameter("Timesteps", &[], 2_u64).unwrap();

    let rates: Vec<f64> = (1..=k).map(|i| i as f64).collect();
    let areas: Vec<f64> = (0..k).map(|i| f64::from(1_u32 << i)).collect();
    let values = |v: &[f64]| -> Vec<ParameterValue> { v.iter().copied().map(Into::into).collect() };
    data.set_parameter_values("Runoff rate", &values(&rates)).unwrap();
    data.set_parameter_values("Area", &values(&areas)).unwrap();

    (data, rates, areas)
}

/// Two ODEs with unit derivative, one reset to zero every timestep.
fn counters<S: Solver + 'static>(method: S) -> Model {
    let mut builder = ModelBuilder::new("Counters", "1.0");
    let solver = builder.register_solver("Counter solver", 0.1, method).unwrap();

    let daily = builder.register_ode("Daily count", None).unwrap();
    builder.set_equation(daily, |_| 1.0).unwrap();
    builder.set_solver(daily, solver).unwrap();
    builder.reset_every_timestep(daily).unwrap();

    let running = builder.register_ode("Running count", None).unwrap();
    builder.set_equation(running, |_| 1.0).unwrap();
    builder.set_solver(running, solver).unwrap();

    builder.finalize().unwrap()
}

fn run_counters(model: Model) -> DataSet {
    let mut data = DataSet::new(Arc::new(model));
    data.set_parameter("Timesteps", &[], 4_u64).unwrap();
    data.run().expect("run should succeed");
    data
}

// --- Tests ---

#[test]
fn unweighted_sums_over_the_index_set() {
    for k in [1, 2, 5] {
        let (mut data, rates, _) = land_uses(k);
        data.run().expect("run should succeed");

        let expected: f64 = rates.iter().sum();
        for value in data.result_series("Total runoff", &[]).unwrap() {
            assert_relative_eq!(value, expected);
        }
    }
}

#[test]
fn weighted_means_over_the_index_set() {
    for k in [1, 2, 5] {
        let (mut data, rates, areas) = land_uses(k);
        data.run().expect("run should succeed");

        let weighted: f64 = rates.iter().zip(&areas).map(|(r, a)| r * a).sum();
        let expected = weighted / areas.iter().sum::<f64>();
        for value in data.result_series("Mean runoff", &[]).unwrap() {
            assert_relative_eq!(value, expected, epsilon = 1e-12);
        }
    }
}

#[test]
fn zero_total_weight_gives_zero() {
    let (mut data, _, _) = land_uses(2);
    data.set_parameter("Area", &["Land 0"], 0.0).unwrap();
    data.set_parameter("Area", &["Land 1"], 0.0).unwrap();
    data.run().unwrap();

    assert_eq!(data.result_series("Mean runoff", &[]).unwrap(), vec![0.0, 0.0]);
}

#[test]
fn reset_state_reads_one_each_timestep() {
    for data in [
        run_counters(counters(Euler)),
        run_counters(counters(Rk4)),
        run_counters(counters(CashKarp)),
    ] {
        for value in data.result_series("Daily count", &[]).unwrap() {
            assert_relative_eq!(value, 1.0, epsilon = 1e-9);
        }
        let running = data.result_series("Running count", &[]).unwrap();
        for (day, value) in running.iter().enumerate() {
            assert_relative_eq!(*value, (day + 1) as f64, epsilon = 1e-9);
        }
    }
}
