use std::sync::Arc;

use approx::assert_relative_eq;
use basin_core::{DataSet, DataSetError, IndexError};
use integration_tests::river;

fn river_with(branches: &[(&str, Vec<&str>)], inflow: f64) -> DataSet {
    let model = Arc::new(river::model().expect("river model should finalize"));
    let mut data = DataSet::new(model);
    data.set_branch_indexes("Reaches", branches)
        .expect("branches should be valid");
    data.set_parameter("Timesteps", &[], 3_u64).unwrap();
    for (reach, _) in branches {
        data.set_parameter("Local inflow", &[*reach], inflow).unwrap();
    }
    data
}

#[test]
fn flow_accumulates_down_a_chain() {
    let mut data = river_with(
        &[
            ("Upper", vec![]),
            ("Middle", vec!["Upper"]),
            ("Lower", vec!["Middle"]),
        ],
        2.5,
    );
    data.run().expect("run should succeed");

    for (reach, expected) in [("Upper", 2.5), ("Middle", 5.0), ("Lower", 7.5)] {
        let flow = data.result_series("Reach flow", &[reach]).unwrap();
        assert_eq!(flow.len(), 3);
        for value in flow {
            assert_relative_eq!(value, expected);
        }
    }
}

#[test]
fn tributaries_join_at_a_confluence() {
    let mut data = river_with(
        &[
            ("Head A", vec![]),
            ("Head B", vec![]),
            ("Confluence", vec!["Head A", "Head B"]),
            ("Outlet", vec!["Confluence"]),
        ],
        1.0,
    );
    data.set_parameter("Local inflow", &["Head B"], 4.0).unwrap();
    data.run().unwrap();

    assert_relative_eq!(data.result_at("Reach flow", &["Confluence"], 0).unwrap(), 6.0);
    assert_relative_eq!(data.result_at("Reach flow", &["Outlet"], 2).unwrap(), 7.0);
}

#[test]
fn upstream_reaches_must_come_first() {
    let model = Arc::new(river::model().unwrap());
    let mut data = DataSet::new(model);

    let result = data.set_branch_indexes("Reaches", &[("Middle", vec!["Upper"]), ("Upper", vec![])]);

    assert!(matches!(
        result,
        Err(DataSetError::Index(IndexError::ForwardReference { .. }))
    ));
}

#[test]
fn result_instances_follow_index_order() {
    let mut data = river_with(&[("Upper", vec![]), ("Lower", vec!["Upper"])], 1.0);
    data.run().unwrap();

    assert_eq!(
        data.result_instances("Reach flow").unwrap(),
        vec![vec!["Upper".to_owned()], vec!["Lower".to_owned()]]
    );
}
