use std::sync::Arc;

use basin_core::{DataSet, IndexSetId, Model, ModelBuilder, ParameterDef, ParameterValue};

fn permuted_groups() -> Model {
    let mut builder = ModelBuilder::new("Permuted", "1.0");
    let soils = builder.index_set("Soils").unwrap();
    let reaches = builder.index_set("Reaches").unwrap();

    let soil_first = builder.parameter_group("Soil by reach", &[soils, reaches]).unwrap();
    let reach_first = builder.parameter_group("Reach by soil", &[reaches, soils]).unwrap();
    let also_soil_first = builder.parameter_group("Soil extras", &[soils, reaches]).unwrap();

    builder
        .parameter(soil_first, ParameterDef::double("Porosity", 0.3))
        .unwrap();
    builder
        .parameter(reach_first, ParameterDef::double("Contact time", 1.0))
        .unwrap();
    builder
        .parameter(also_soil_first, ParameterDef::double("Depth", 2.0))
        .unwrap();

    builder.finalize().unwrap()
}

#[test]
fn permuted_index_set_lists_get_separate_units() {
    let model = permuted_groups();
    let soils = model.find_index_set("Soils").unwrap();
    let reaches = model.find_index_set("Reaches").unwrap();
    let porosity = model.find_parameter("Porosity").unwrap();
    let contact = model.find_parameter("Contact time").unwrap();
    let depth = model.find_parameter("Depth").unwrap();

    let units = model.parameter_units();
    let unit_of = |sets: &[IndexSetId]| {
        units
            .iter()
            .find(|u| u.index_sets == sets)
            .expect("unit should exist")
    };

    assert_eq!(
        unit_of(&[soils, reaches]).handles,
        vec![porosity.id(), depth.id()]
    );
    assert_eq!(unit_of(&[reaches, soils]).handles, vec![contact.id()]);
}

#[test]
fn instances_follow_the_group_order() {
    let mut data = DataSet::new(Arc::new(permuted_groups()));
    data.set_indexes("Soils", &["Sand", "Clay"]).unwrap();
    data.set_indexes("Reaches", &["Upper", "Lower", "Outlet"]).unwrap();
    data.allocate_parameter_storage().unwrap();

    let owned = |pairs: &[[&str; 2]]| -> Vec<Vec<String>> {
        pairs
            .iter()
            .map(|p| p.iter().map(|s| (*s).to_owned()).collect())
            .collect()
    };

    assert_eq!(
        data.parameter_instances("Porosity").unwrap(),
        owned(&[
            ["Sand", "Upper"],
            ["Sand", "Lower"],
            ["Sand", "Outlet"],
            ["Clay", "Upper"],
            ["Clay", "Lower"],
            ["Clay", "Outlet"],
        ])
    );
    assert_eq!(
        data.parameter_instances("Contact time").unwrap()[..3],
        owned(&[["Upper", "Sand"], ["Upper", "Clay"], ["Lower", "Sand"]])[..]
    );
}

#[test]
fn values_set_in_bulk_land_in_canonical_order() {
    let mut data = DataSet::new(Arc::new(permuted_groups()));
    data.set_indexes("Soils", &["Sand", "Clay"]).unwrap();
    data.set_indexes("Reaches", &["Upper", "Lower"]).unwrap();

    let values: Vec<ParameterValue> = [1.0, 2.0, 3.0, 4.0]
        .into_iter()
        .map(ParameterValue::Double)
        .collect();
    data.set_parameter_values("Contact time", &values).unwrap();

    assert_eq!(
        data.parameter("Contact time", &["Lower", "Sand"]).unwrap(),
        ParameterValue::Double(3.0)
    );
    assert_eq!(
        data.parameter("Contact time", &["Upper", "Clay"]).unwrap(),
        ParameterValue::Double(2.0)
    );
}
