use std::{sync::Arc, thread};

use basin_core::{CopyOptions, DataSet, InputSharing};
use integration_tests::reservoir;

fn reservoir_data() -> DataSet {
    let model = Arc::new(reservoir::model().expect("reservoir model should finalize"));
    let mut data = DataSet::new(model);
    data.set_parameter("Timesteps", &[], 30_u64).unwrap();
    data.set_parameter("Initial storage", &[], 12.0).unwrap();
    data.allocate_input_storage(30).unwrap();
    let rain: Vec<f64> = (0..30).map(|day| f64::from(day % 7)).collect();
    data.set_input_series("Rainfall", &[], &rain, false).unwrap();
    data
}

#[test]
fn rerunning_gives_identical_results() {
    let mut data = reservoir_data();
    data.run().unwrap();
    let first = data.result_series("Storage", &[]).unwrap();

    data.run().unwrap();
    let second = data.result_series("Storage", &[]).unwrap();

    assert_eq!(first, second);
}

#[test]
fn copies_run_identically_on_other_threads() {
    let mut data = reservoir_data();
    data.run().unwrap();
    let expected = data.result_series("Flow", &[]).unwrap();

    let handles: Vec<_> = [InputSharing::Share, InputSharing::Duplicate]
        .into_iter()
        .map(|inputs| {
            let mut copy = data.copy(CopyOptions {
                results: false,
                inputs,
            });
            thread::spawn(move || {
                copy.run().expect("copy should run");
                copy.result_series("Flow", &[]).unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn copies_are_independent() {
    let mut data = reservoir_data();
    data.run().unwrap();

    let mut copy = data.copy(CopyOptions {
        results: true,
        inputs: InputSharing::Share,
    });
    copy.set_input_series("Rainfall", &[], &[50.0; 30], false)
        .unwrap();
    copy.set_parameter("Time constant", &[], 2.0).unwrap();
    copy.run().unwrap();

    assert_eq!(data.input_series("Rainfall", &[]).unwrap()[0], 0.0);
    assert_ne!(
        copy.result_series("Storage", &[]).unwrap(),
        data.result_series("Storage", &[]).unwrap()
    );
}

#[test]
fn copied_results_can_be_read_without_a_run() {
    let mut data = reservoir_data();
    data.run().unwrap();

    let copy = data.copy(CopyOptions {
        results: true,
        ..CopyOptions::default()
    });

    assert_eq!(
        copy.result_series("Storage", &[]).unwrap(),
        data.result_series("Storage", &[]).unwrap()
    );
}
