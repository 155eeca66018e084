//! Concrete indexes, parameter values, input series and results for a model.
//!
//! A [`DataSet`] is created from a finalized [`Model`]. Index sets must have
//! their indexes before any storage is allocated. Parameter and input storage
//! are then allocated independently, and results are reallocated by every
//! [`DataSet::run`].
//!
//! Values are addressed by entity name and index names, the way a parameter
//! file or a calibration script refers to them.

use std::sync::Arc;

use jiff::civil::Date;

use crate::{
    error::DataSetError,
    handle::{EntityKind, EquationId, IndexSetId, InputId, ParameterId},
    index::{Index, IndexSpace, Odometer, zeroed_context},
    model::{EquationKind, Model},
    storage::{StorageBuilder, StorageStructure, StorageUnit},
    value::ParameterValue,
};

/// A step run once before every model run.
pub type PreprocessingStep = dyn Fn(&mut DataSet) -> Result<(), DataSetError> + Send + Sync;

/// What to do when storage is allocated before every index set has indexes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexPolicy {
    /// Fail with [`DataSetError::IndexesNotSet`].
    #[default]
    Strict,
    /// Give each unset index set placeholder indexes (its required index
    /// names, or a single index) and log a warning.
    Placeholder,
}

/// Runtime options of a data set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataSetConfig {
    pub index_policy: IndexPolicy,
}

/// Whether a copied data set shares its input series with the original.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InputSharing {
    /// Share until either side writes, then copy.
    #[default]
    Share,
    Duplicate,
}

/// Options for [`DataSet::copy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Carry over the results of the last run.
    pub results: bool,
    pub inputs: InputSharing,
}

#[derive(Debug, Clone)]
pub(crate) struct ParameterData {
    pub(crate) structure: StorageStructure,
    pub(crate) values: Vec<ParameterValue>,
}

#[derive(Debug, Clone)]
pub(crate) struct InputData {
    pub(crate) structure: StorageStructure,
    pub(crate) timesteps: usize,
    pub(crate) start_date: Option<Date>,
    /// `timesteps` consecutive copies of the input layout.
    pub(crate) values: Vec<f64>,
    /// Whether a series was supplied, per instance.
    pub(crate) provided: Vec<bool>,
}

#[derive(Debug, Clone)]
pub(crate) struct ResultData {
    pub(crate) structure: StorageStructure,
    pub(crate) timesteps: usize,
    pub(crate) start_date: Date,
    /// The initial values followed by one copy of the layout per timestep.
    pub(crate) values: Vec<f64>,
}

/// The runnable instantiation of a model.
#[derive(Debug)]
pub struct DataSet {
    pub(crate) model: Arc<Model>,
    pub(crate) config: DataSetConfig,
    pub(crate) index_space: IndexSpace,
    pub(crate) parameters: Option<ParameterData>,
    pub(crate) inputs: Option<Arc<InputData>>,
    pub(crate) results: Option<ResultData>,
}

impl DataSet {
    /// Creates an empty data set with the default configuration.
    #[must_use]
    pub fn new(model: Arc<Model>) -> Self {
        Self::with_config(model, DataSetConfig::default())
    }

    #[must_use]
    pub fn with_config(model: Arc<Model>, config: DataSetConfig) -> Self {
        let index_space = IndexSpace::new(model.index_sets.items());
        Self {
            model,
            config,
            index_space,
            parameters: None,
            inputs: None,
            results: None,
        }
    }

    #[must_use]
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    #[must_use]
    pub fn config(&self) -> DataSetConfig {
        self.config
    }

    #[must_use]
    pub fn index_space(&self) -> &IndexSpace {
        &self.index_space
    }

    /// Assigns the indexes of a basic index set.
    ///
    /// # Errors
    ///
    /// Fails if the set is unknown or the names are rejected by
    /// [`IndexSpace::set_indexes`].
    pub fn set_indexes(&mut self, set: &str, names: &[&str]) -> Result<(), DataSetError> {
        let set = self.find_index_set(set)?;
        self.index_space.set_indexes(set, names)?;
        Ok(())
    }

    /// Assigns the indexes of a branched index set, each with the names of
    /// its upstream indexes.
    ///
    /// # Errors
    ///
    /// Fails if the set is unknown or the branches are rejected by
    /// [`IndexSpace::set_branch_indexes`].
    pub fn set_branch_indexes(
        &mut self,
        set: &str,
        branches: &[(&str, Vec<&str>)],
    ) -> Result<(), DataSetError> {
        let set = self.find_index_set(set)?;
        self.index_space.set_branch_indexes(set, branches)?;
        Ok(())
    }

    /// Looks up an index by set and index name.
    ///
    /// # Errors
    ///
    /// Fails if either name is unknown.
    pub fn index(&self, set: &str, name: &str) -> Result<Index, DataSetError> {
        let set = self.find_index_set(set)?;
        Ok(self.index_space.index(set, name)?)
    }

    /// Returns the index names of a set.
    ///
    /// # Errors
    ///
    /// Fails if the set is unknown or has no indexes.
    pub fn index_names(&self, set: &str) -> Result<&[String], DataSetError> {
        let set = self.find_index_set(set)?;
        Ok(self.index_space.index_names(set)?)
    }

    /// Allocates parameter storage and fills it with default values.
    ///
    /// # Errors
    ///
    /// Fails if already allocated, or if an index set has no indexes under
    /// [`IndexPolicy::Strict`].
    pub fn allocate_parameter_storage(&mut self) -> Result<(), DataSetError> {
        if self.parameters.is_some() {
            return Err(DataSetError::AlreadyAllocated("parameter"));
        }
        self.ensure_indexes()?;

        let structure = layout(
            EntityKind::Parameter,
            self.model.parameter_units(),
            &self.index_space.counts(),
        );
        let mut values = vec![ParameterValue::Bool(false); structure.total_count()];
        for (u, unit) in structure.units().iter().enumerate() {
            let stride = unit.handles.len();
            for (k, slot) in values[structure.unit_range(u)].iter_mut().enumerate() {
                *slot = self.model.parameters.get(unit.handles[k % stride]).default;
            }
        }

        self.parameters = Some(ParameterData { structure, values });
        Ok(())
    }

    /// Allocates storage for `timesteps` steps of every input.
    ///
    /// Series that are never supplied read as zero, or NaN for inputs
    /// declared with [`InputDef::missing_as_nan`](crate::InputDef::missing_as_nan).
    ///
    /// # Errors
    ///
    /// Fails if already allocated, or if an index set has no indexes under
    /// [`IndexPolicy::Strict`].
    pub fn allocate_input_storage(&mut self, timesteps: usize) -> Result<(), DataSetError> {
        if self.inputs.is_some() {
            return Err(DataSetError::AlreadyAllocated("input"));
        }
        self.ensure_indexes()?;

        let structure = layout(
            EntityKind::Input,
            self.model.input_units(),
            &self.index_space.counts(),
        );
        let total = structure.total_count();
        let mut values = vec![0.0; total * timesteps];
        for (i, _, spec) in self.model.inputs.iter() {
            if !spec.missing_as_nan {
                continue;
            }
            for offset in instance_offsets(&structure, i) {
                for step in 0..timesteps {
                    values[step * total + offset] = f64::NAN;
                }
            }
        }

        self.inputs = Some(Arc::new(InputData {
            structure,
            timesteps,
            start_date: None,
            values,
            provided: vec![false; total],
        }));
        Ok(())
    }

    /// Sets the date of the first step of the input data. Defaults to the
    /// model start date.
    ///
    /// # Errors
    ///
    /// Fails if input storage is not allocated.
    pub fn set_input_start_date(&mut self, date: Date) -> Result<(), DataSetError> {
        self.input_data_mut()?.start_date = Some(date);
        Ok(())
    }

    /// Returns the date of the first step of the input data, if set.
    #[must_use]
    pub fn input_start_date(&self) -> Option<Date> {
        self.inputs.as_ref().and_then(|data| data.start_date)
    }

    /// Sets one parameter value. Parameter storage is allocated on first use.
    ///
    /// Values outside the recommended range are accepted with a warning.
    ///
    /// # Errors
    ///
    /// Fails on unknown names, a wrong number of indexes, or a value of the
    /// wrong type.
    pub fn set_parameter(
        &mut self,
        name: &str,
        indexes: &[&str],
        value: impl Into<ParameterValue>,
    ) -> Result<(), DataSetError> {
        let id = self.find_parameter(name)?;
        let value = value.into();
        self.check_value(id, &value)?;
        self.ensure_parameter_storage()?;
        let at = self.parameter_offset(id, name, indexes)?;
        if let Some(data) = self.parameters.as_mut() {
            data.values[at] = value;
        }
        Ok(())
    }

    /// Sets an enum parameter by value name.
    ///
    /// # Errors
    ///
    /// As [`DataSet::set_parameter`], and fails if `value` is not a value of
    /// the parameter.
    pub fn set_parameter_enum(
        &mut self,
        name: &str,
        indexes: &[&str],
        value: &str,
    ) -> Result<(), DataSetError> {
        let id = self.find_parameter(name)?;
        let position = self
            .model
            .enum_names(id)
            .iter()
            .position(|n| n == value)
            .and_then(|p| u32::try_from(p).ok())
            .ok_or_else(|| DataSetError::UnknownEnumValue {
                name: name.to_owned(),
                value: value.to_owned(),
            })?;
        self.set_parameter(name, indexes, ParameterValue::Enum(position))
    }

    /// Reads one parameter value.
    ///
    /// # Errors
    ///
    /// Fails on unknown names, a wrong number of indexes, or if parameter
    /// storage is not allocated.
    pub fn parameter(&self, name: &str, indexes: &[&str]) -> Result<ParameterValue, DataSetError> {
        let id = self.find_parameter(name)?;
        let data = self.parameter_data()?;
        let at = self.parameter_offset(id, name, indexes)?;
        Ok(data.values[at])
    }

    /// Sets every instance of a parameter, in the canonical nested order of
    /// its index sets (last set fastest).
    ///
    /// # Errors
    ///
    /// Fails on an unknown name, a value count different from the number of
    /// instances, or a value of the wrong type.
    pub fn set_parameter_values(
        &mut self,
        name: &str,
        values: &[ParameterValue],
    ) -> Result<(), DataSetError> {
        let id = self.find_parameter(name)?;
        for value in values {
            self.check_value(id, value)?;
        }
        self.ensure_parameter_storage()?;
        let data = self
            .parameters
            .as_mut()
            .ok_or(DataSetError::NotAllocated("parameter"))?;
        let expected = data.structure.instance_count(id.id());
        if values.len() != expected {
            return Err(DataSetError::ValueCount {
                name: name.to_owned(),
                expected,
                got: values.len(),
            });
        }
        for (at, value) in instance_offsets(&data.structure, id.id()).zip(values) {
            data.values[at] = *value;
        }
        Ok(())
    }

    /// Reads every instance of a parameter in canonical order.
    ///
    /// # Errors
    ///
    /// Fails on an unknown name or if parameter storage is not allocated.
    pub fn parameter_values(&self, name: &str) -> Result<Vec<ParameterValue>, DataSetError> {
        let id = self.find_parameter(name)?;
        let data = self.parameter_data()?;
        Ok(instance_offsets(&data.structure, id.id())
            .map(|at| data.values[at])
            .collect())
    }

    /// Writes an input series for one instance.
    ///
    /// With `align_with_results` the series starts at the model start date;
    /// otherwise it starts at the input start date.
    ///
    /// # Errors
    ///
    /// Fails on unknown names, a wrong number of indexes, missing input
    /// storage, or a series that does not fit.
    pub fn set_input_series(
        &mut self,
        name: &str,
        indexes: &[&str],
        series: &[f64],
        align_with_results: bool,
    ) -> Result<(), DataSetError> {
        let id = self.find_input(name)?;
        let first = if align_with_results {
            let model_start = self.model_start_date();
            let input_start = self.input_start_date().unwrap_or(model_start);
            let steps = self
                .model
                .timestep_size()
                .steps_between(input_start, model_start)?;
            usize::try_from(steps).map_err(|_| DataSetError::StartsBeforeInput(name.to_owned()))?
        } else {
            0
        };
        let at = self.input_offset(id, name, indexes)?;

        let data = self.input_data_mut()?;
        let capacity = data.timesteps.saturating_sub(first);
        if series.len() > capacity {
            return Err(DataSetError::SeriesTooLong {
                name: name.to_owned(),
                len: series.len(),
                capacity,
            });
        }
        let total = data.structure.total_count();
        for (step, value) in series.iter().enumerate() {
            data.values[(first + step) * total + at] = *value;
        }
        data.provided[at] = true;
        Ok(())
    }

    /// Reads the whole stored series of one input instance.
    ///
    /// # Errors
    ///
    /// Fails on unknown names, a wrong number of indexes, or missing input
    /// storage.
    pub fn input_series(&self, name: &str, indexes: &[&str]) -> Result<Vec<f64>, DataSetError> {
        let id = self.find_input(name)?;
        let at = self.input_offset(id, name, indexes)?;
        let data = self.input_data()?;
        let total = data.structure.total_count();
        Ok((0..data.timesteps)
            .map(|step| data.values[step * total + at])
            .collect())
    }

    /// Returns true if a series was supplied for the input instance.
    ///
    /// # Errors
    ///
    /// Fails on unknown names, a wrong number of indexes, or missing input
    /// storage.
    pub fn input_was_provided(&self, name: &str, indexes: &[&str]) -> Result<bool, DataSetError> {
        let id = self.find_input(name)?;
        let at = self.input_offset(id, name, indexes)?;
        Ok(self.input_data()?.provided[at])
    }

    /// Returns the number of timesteps of the last run, or zero.
    #[must_use]
    pub fn result_timesteps(&self) -> usize {
        self.results.as_ref().map_or(0, |data| data.timesteps)
    }

    /// Returns the start date of the last run, if any.
    #[must_use]
    pub fn result_start_date(&self) -> Option<Date> {
        self.results.as_ref().map(|data| data.start_date)
    }

    /// Reads the results of one equation instance, one value per timestep.
    ///
    /// # Errors
    ///
    /// Fails on unknown names, a wrong number of indexes, an initial-value
    /// equation, or if the model has not been run.
    pub fn result_series(&self, name: &str, indexes: &[&str]) -> Result<Vec<f64>, DataSetError> {
        let (data, at) = self.result_location(name, indexes)?;
        let total = data.structure.total_count();
        Ok((1..=data.timesteps)
            .map(|slot| data.values[slot * total + at])
            .collect())
    }

    /// Reads one result at a zero-based timestep.
    ///
    /// # Errors
    ///
    /// As [`DataSet::result_series`], and fails if `timestep` is past the
    /// end of the run.
    pub fn result_at(&self, name: &str, indexes: &[&str], timestep: usize) -> Result<f64, DataSetError> {
        let (data, at) = self.result_location(name, indexes)?;
        if timestep >= data.timesteps {
            return Err(DataSetError::TimestepOutOfRange {
                timestep,
                timesteps: data.timesteps,
            });
        }
        Ok(data.values[(timestep + 1) * data.structure.total_count() + at])
    }

    /// Reads the value an equation instance started the run with.
    ///
    /// # Errors
    ///
    /// As [`DataSet::result_series`].
    pub fn initial_result(&self, name: &str, indexes: &[&str]) -> Result<f64, DataSetError> {
        let (data, at) = self.result_location(name, indexes)?;
        Ok(data.values[at])
    }

    /// Copies the data set for an independent run against the same model.
    #[must_use]
    pub fn copy(&self, options: CopyOptions) -> DataSet {
        let inputs = match options.inputs {
            InputSharing::Share => self.inputs.clone(),
            InputSharing::Duplicate => self
                .inputs
                .as_ref()
                .map(|data| Arc::new(InputData::clone(data))),
        };
        DataSet {
            model: Arc::clone(&self.model),
            config: self.config,
            index_space: self.index_space.clone(),
            parameters: self.parameters.clone(),
            inputs,
            results: if options.results {
                self.results.clone()
            } else {
                None
            },
        }
    }

    /// Lists the index names of every instance of a parameter.
    ///
    /// # Errors
    ///
    /// Fails on an unknown name or an index set without indexes.
    pub fn parameter_instances(&self, name: &str) -> Result<Vec<Vec<String>>, DataSetError> {
        let id = self.find_parameter(name)?;
        self.instances(self.model.parameter_index_sets(id))
    }

    /// Lists the index names of every instance of an input.
    ///
    /// # Errors
    ///
    /// Fails on an unknown name or an index set without indexes.
    pub fn input_instances(&self, name: &str) -> Result<Vec<Vec<String>>, DataSetError> {
        let id = self.find_input(name)?;
        self.instances(self.model.input_index_sets(id))
    }

    /// Lists the index names of every instance of an equation's results.
    ///
    /// # Errors
    ///
    /// Fails on an unknown name or an index set without indexes.
    pub fn result_instances(&self, name: &str) -> Result<Vec<Vec<String>>, DataSetError> {
        let id = self.find_equation(name)?;
        self.instances(self.model.equation_index_sets(id))
    }

    fn instances(&self, sets: &[IndexSetId]) -> Result<Vec<Vec<String>>, DataSetError> {
        for &set in sets {
            self.index_space.index_names(set)?;
        }
        let counts = self.index_space.counts();
        let mut current = zeroed_context(counts.len());
        let mut odometer = Odometer::new(sets, &counts);
        let mut instances = Vec::new();
        while odometer.advance(&mut current) {
            instances.push(
                sets.iter()
                    .map(|s| self.index_space.index_name(current[s.id()]).to_owned())
                    .collect(),
            );
        }
        Ok(instances)
    }

    pub(crate) fn ensure_indexes(&mut self) -> Result<(), DataSetError> {
        let Some(set) = self.index_space.first_unset() else {
            return Ok(());
        };
        match self.config.index_policy {
            IndexPolicy::Strict => Err(DataSetError::IndexesNotSet(
                self.index_space.name(set).to_owned(),
            )),
            IndexPolicy::Placeholder => {
                for name in self.index_space.fill_placeholders() {
                    log::warn!("index set \"{name}\" has no indexes, using placeholder indexes");
                }
                Ok(())
            }
        }
    }

    pub(crate) fn ensure_parameter_storage(&mut self) -> Result<(), DataSetError> {
        if self.parameters.is_none() {
            self.allocate_parameter_storage()?;
        }
        Ok(())
    }

    /// Reads an unindexed parameter, falling back to its default before
    /// storage exists.
    pub(crate) fn scalar_parameter(&self, id: ParameterId) -> ParameterValue {
        self.parameters.as_ref().map_or_else(
            || self.model.parameter_default(id),
            |data| data.values[data.structure.first_offset(id.id())],
        )
    }

    pub(crate) fn model_start_date(&self) -> Date {
        match self.scalar_parameter(self.model.start_date_parameter().id()) {
            ParameterValue::Time(date) => date,
            _ => Date::MIN,
        }
    }

    fn check_value(&self, id: ParameterId, value: &ParameterValue) -> Result<(), DataSetError> {
        let spec = self.model.parameters.get(id.id());
        let name = self.model.parameter_name(id);
        if value.ty() != spec.ty {
            return Err(DataSetError::TypeMismatch {
                name: name.to_owned(),
                expected: spec.ty,
                got: value.ty(),
            });
        }
        if let ParameterValue::Enum(position) = *value {
            if position as usize >= spec.enum_names.len() {
                return Err(DataSetError::UnknownEnumValue {
                    name: name.to_owned(),
                    value: position.to_string(),
                });
            }
        }
        if value.outside(spec.min.as_ref(), spec.max.as_ref()) {
            log::warn!("value {value} of parameter \"{name}\" is outside its recommended range");
        }
        Ok(())
    }

    fn parameter_data(&self) -> Result<&ParameterData, DataSetError> {
        self.parameters
            .as_ref()
            .ok_or(DataSetError::NotAllocated("parameter"))
    }

    fn input_data(&self) -> Result<&InputData, DataSetError> {
        self.inputs
            .as_deref()
            .ok_or(DataSetError::NotAllocated("input"))
    }

    fn input_data_mut(&mut self) -> Result<&mut InputData, DataSetError> {
        self.inputs
            .as_mut()
            .map(Arc::make_mut)
            .ok_or(DataSetError::NotAllocated("input"))
    }

    fn parameter_offset(
        &self,
        id: ParameterId,
        name: &str,
        indexes: &[&str],
    ) -> Result<usize, DataSetError> {
        let data = self.parameter_data()?;
        let sets = self.model.parameter_index_sets(id);
        let tuple = self.resolve(EntityKind::Parameter, name, sets, indexes)?;
        Ok(data.structure.offset_explicit(id.id(), &tuple)?)
    }

    fn input_offset(&self, id: InputId, name: &str, indexes: &[&str]) -> Result<usize, DataSetError> {
        let data = self.input_data()?;
        let sets = self.model.input_index_sets(id);
        let tuple = self.resolve(EntityKind::Input, name, sets, indexes)?;
        Ok(data.structure.offset_explicit(id.id(), &tuple)?)
    }

    fn result_location(
        &self,
        name: &str,
        indexes: &[&str],
    ) -> Result<(&ResultData, usize), DataSetError> {
        let id = self.find_equation(name)?;
        if self.model.equation_kind(id) == EquationKind::InitialValue {
            return Err(DataSetError::NotStored(name.to_owned()));
        }
        let data = self
            .results
            .as_ref()
            .ok_or(DataSetError::NotAllocated("result"))?;
        let sets = self.model.equation_index_sets(id);
        let tuple = self.resolve(EntityKind::Result, name, sets, indexes)?;
        Ok((data, data.structure.offset_explicit(id.id(), &tuple)?))
    }

    fn resolve(
        &self,
        kind: EntityKind,
        name: &str,
        sets: &[IndexSetId],
        indexes: &[&str],
    ) -> Result<Vec<Index>, DataSetError> {
        if sets.len() != indexes.len() {
            return Err(DataSetError::IndexCount {
                kind,
                name: name.to_owned(),
                expected: sets.len(),
                got: indexes.len(),
            });
        }
        sets.iter()
            .zip(indexes)
            .map(|(&set, index)| Ok(self.index_space.index(set, index)?))
            .collect()
    }

    fn find_index_set(&self, name: &str) -> Result<IndexSetId, DataSetError> {
        self.model
            .find_index_set(name)
            .ok_or_else(|| unknown("index set", name))
    }

    fn find_parameter(&self, name: &str) -> Result<ParameterId, DataSetError> {
        self.model
            .find_parameter(name)
            .ok_or_else(|| unknown("parameter", name))
    }

    fn find_input(&self, name: &str) -> Result<InputId, DataSetError> {
        self.model
            .find_input(name)
            .ok_or_else(|| unknown("input", name))
    }

    fn find_equation(&self, name: &str) -> Result<EquationId, DataSetError> {
        self.model
            .find_equation(name)
            .ok_or_else(|| unknown("equation", name))
    }
}

fn unknown(kind: &'static str, name: &str) -> DataSetError {
    DataSetError::UnknownName {
        kind,
        name: name.to_owned(),
    }
}

/// Lays out storage units using the final index counts.
pub(crate) fn layout(kind: EntityKind, units: &[StorageUnit], counts: &[usize]) -> StorageStructure {
    let mut builder = StorageBuilder::new(kind);
    for unit in units {
        builder.add_unit(unit.index_sets.clone(), unit.handles.clone());
    }
    builder.finalize(counts)
}

/// Offsets of every instance of `handle`, in canonical order.
pub(crate) fn instance_offsets(structure: &StorageStructure, handle: usize) -> impl Iterator<Item = usize> + use<> {
    let first = structure.first_offset(handle);
    let stride = structure.units()[structure.unit_of(handle)].handles.len();
    (0..structure.instance_count(handle)).map(move |k| first + k * stride)
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::civil::date;

    use crate::model::{InputDef, ModelBuilder, ParameterDef};

    // --- Test fixtures ---

    /// Two landscape units and three reaches, with one parameter per reach
    /// and land unit, one scalar enum and one input per reach.
    fn catchment() -> Arc<Model> {
        let mut builder = ModelBuilder::new("Catchment", "1.0");
        let land = builder.index_set("Landscape units").unwrap();
        let reaches = builder.branched_index_set("Reaches").unwrap();
        let both = builder.parameter_group("Land", &[reaches, land]).unwrap();
        let general = builder.parameter_group("General", &[]).unwrap();
        builder
            .parameter(both, ParameterDef::double("Area", 1.0).range(0.0, 100.0))
            .unwrap();
        builder
            .parameter(
                general,
                ParameterDef::enumeration("Method", &["Simple", "Full"], "Simple"),
            )
            .unwrap();
        builder
            .input(InputDef::new("Rain").index_sets(&[reaches]))
            .unwrap();
        builder
            .input(InputDef::new("Temperature").missing_as_nan())
            .unwrap();
        Arc::new(builder.finalize().unwrap())
    }

    fn indexed(model: Arc<Model>) -> DataSet {
        let mut data = DataSet::new(model);
        data.set_indexes("Landscape units", &["Forest", "Arable"])
            .unwrap();
        data.set_branch_indexes(
            "Reaches",
            &[
                ("Upper", vec![]),
                ("Middle", vec!["Upper"]),
                ("Lower", vec!["Middle"]),
            ],
        )
        .unwrap();
        data
    }

    // --- Tests ---

    #[test]
    fn parameters_start_at_their_defaults() {
        let mut data = indexed(catchment());
        data.allocate_parameter_storage().unwrap();

        assert_eq!(
            data.parameter("Area", &["Middle", "Arable"]).unwrap(),
            ParameterValue::Double(1.0)
        );
        assert_eq!(
            data.parameter("Method", &[]).unwrap(),
            ParameterValue::Enum(0)
        );
        assert_eq!(
            data.parameter("Timesteps", &[]).unwrap(),
            ParameterValue::UInt(100)
        );
    }

    #[test]
    fn set_and_get_parameters_by_name() {
        let mut data = indexed(catchment());
        data.set_parameter("Area", &["Lower", "Forest"], 12.5)
            .unwrap();
        data.set_parameter_enum("Method", &[], "Full").unwrap();

        assert_eq!(
            data.parameter("Area", &["Lower", "Forest"]).unwrap(),
            ParameterValue::Double(12.5)
        );
        assert_eq!(
            data.parameter("Area", &["Lower", "Arable"]).unwrap(),
            ParameterValue::Double(1.0)
        );
        assert_eq!(
            data.parameter("Method", &[]).unwrap(),
            ParameterValue::Enum(1)
        );
    }

    #[test]
    fn mistakes_report_expected_and_actual() {
        let mut data = indexed(catchment());

        let err = data.set_parameter("Area", &["Upper"], 1.0).unwrap_err();
        assert!(matches!(
            err,
            DataSetError::IndexCount {
                expected: 2,
                got: 1,
                ..
            }
        ));

        let err = data.set_parameter("Area", &["Upper", "Forest"], true).unwrap_err();
        assert!(matches!(err, DataSetError::TypeMismatch { .. }));

        let err = data.set_parameter_enum("Method", &[], "Exact").unwrap_err();
        assert!(matches!(err, DataSetError::UnknownEnumValue { .. }));

        let err = data.set_parameter("Depth", &[], 1.0).unwrap_err();
        assert!(matches!(err, DataSetError::UnknownName { kind: "parameter", .. }));
    }

    #[test]
    fn bulk_values_follow_canonical_order() {
        let mut data = indexed(catchment());
        let values: Vec<ParameterValue> = (0..6).map(|v| ParameterValue::Double(f64::from(v))).collect();
        data.set_parameter_values("Area", &values).unwrap();

        // Land units vary fastest.
        assert_eq!(
            data.parameter("Area", &["Middle", "Forest"]).unwrap(),
            ParameterValue::Double(2.0)
        );
        assert_eq!(data.parameter_values("Area").unwrap(), values);

        let err = data.set_parameter_values("Area", &values[..4]).unwrap_err();
        assert!(matches!(
            err,
            DataSetError::ValueCount {
                expected: 6,
                got: 4,
                ..
            }
        ));
    }

    #[test]
    fn strict_policy_requires_indexes() {
        let mut data = DataSet::new(catchment());
        data.set_indexes("Landscape units", &["Forest"]).unwrap();

        let err = data.allocate_parameter_storage().unwrap_err();
        assert!(matches!(err, DataSetError::IndexesNotSet(ref set) if set == "Reaches"));
    }

    #[test]
    fn placeholder_policy_fills_missing_indexes() {
        let config = DataSetConfig {
            index_policy: IndexPolicy::Placeholder,
        };
        let mut data = DataSet::with_config(catchment(), config);
        data.allocate_parameter_storage().unwrap();

        assert_eq!(data.index_names("Reaches").unwrap().len(), 1);
        assert_eq!(data.parameter_instances("Area").unwrap().len(), 1);
    }

    #[test]
    fn input_series_round_trip_and_missing_values() {
        let mut data = indexed(catchment());
        data.allocate_input_storage(4).unwrap();
        data.set_input_series("Rain", &["Middle"], &[1.0, 2.0, 3.0], false)
            .unwrap();

        assert_eq!(
            data.input_series("Rain", &["Middle"]).unwrap(),
            vec![1.0, 2.0, 3.0, 0.0]
        );
        assert!(data.input_was_provided("Rain", &["Middle"]).unwrap());
        assert!(!data.input_was_provided("Rain", &["Upper"]).unwrap());
        assert!(data.input_series("Temperature", &[]).unwrap()[0].is_nan());

        let err = data
            .set_input_series("Rain", &["Upper"], &[0.0; 5], false)
            .unwrap_err();
        assert!(matches!(err, DataSetError::SeriesTooLong { capacity: 4, .. }));
    }

    #[test]
    fn aligned_series_start_at_the_model_start() {
        let mut data = indexed(catchment());
        data.allocate_input_storage(10).unwrap();
        data.set_input_start_date(date(1998, 12, 30)).unwrap();
        data.set_input_series("Rain", &["Upper"], &[5.0], true)
            .unwrap();

        let series = data.input_series("Rain", &["Upper"]).unwrap();
        assert_eq!(series[2], 5.0);
        assert_eq!(series[0], 0.0);
    }

    #[test]
    fn shared_inputs_are_copied_on_write() {
        let mut original = indexed(catchment());
        original.allocate_input_storage(2).unwrap();
        original
            .set_input_series("Rain", &["Upper"], &[1.0, 1.0], false)
            .unwrap();

        let mut copy = original.copy(CopyOptions::default());
        copy.set_input_series("Rain", &["Upper"], &[9.0, 9.0], false)
            .unwrap();

        assert_eq!(original.input_series("Rain", &["Upper"]).unwrap(), vec![1.0, 1.0]);
        assert_eq!(copy.input_series("Rain", &["Upper"]).unwrap(), vec![9.0, 9.0]);
    }

    #[test]
    fn instances_list_index_names() {
        let data = indexed(catchment());

        let instances = data.parameter_instances("Area").unwrap();
        assert_eq!(instances.len(), 6);
        assert_eq!(instances[1], vec!["Upper", "Arable"]);
        assert_eq!(data.input_instances("Temperature").unwrap(), vec![Vec::<String>::new()]);
    }
}
