use std::sync::Arc;

use approx::assert_relative_eq;
use basin_core::DataSet;
use integration_tests::land;

fn mountain_and_valley() -> DataSet {
    let model = Arc::new(land::model().expect("land model should finalize"));
    let mut data = DataSet::new(model);
    data.set_indexes("Land use", &["Mountain", "Valley"]).unwrap();
    data.set_parameter("Timesteps", &[], 3_u64).unwrap();
    data.set_parameter("Runoff rate", &["Mountain"], 3.0).unwrap();
    data.set_parameter("Runoff rate", &["Valley"], 1.0).unwrap();
    data
}

#[test]
fn switch_varies_by_index() {
    let mut data = mountain_and_valley();
    data.set_parameter("Has snow", &["Mountain"], true).unwrap();
    data.run().expect("run should succeed");

    assert_eq!(
        data.result_series("Snow melt", &["Mountain"]).unwrap(),
        vec![2.0, 3.0, 4.0]
    );
    assert_eq!(
        data.result_series("Snow melt", &["Valley"]).unwrap(),
        vec![0.0, 0.0, 0.0]
    );
}

#[test]
fn enum_switch_selects_one_formulation() {
    let mut direct = mountain_and_valley();
    direct.run().unwrap();
    for value in direct.result_series("Direct outflow", &[]).unwrap() {
        assert_relative_eq!(value, 4.0);
    }

    let mut delayed = mountain_and_valley();
    delayed
        .set_parameter_enum("Routing", &[], "Delayed")
        .unwrap();
    delayed.run().unwrap();
    for value in delayed.result_series("Delayed outflow", &[]).unwrap() {
        assert_relative_eq!(value, 2.0);
    }
}

#[test]
fn disabled_formulations_are_never_evaluated() {
    let mut data = mountain_and_valley();
    data.set_parameter_enum("Routing", &[], "Delayed").unwrap();
    data.run().unwrap();

    assert_relative_eq!(data.initial_result("Direct outflow", &[]).unwrap(), 0.0);
    for value in data.result_series("Direct outflow", &[]).unwrap() {
        assert_relative_eq!(value, 0.0);
    }
}

#[test]
fn unknown_enum_values_are_rejected() {
    let mut data = mountain_and_valley();

    assert!(data.set_parameter_enum("Routing", &[], "Routed").is_err());
}
