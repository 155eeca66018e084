//! Small catchment models shared by the integration tests.

pub mod reservoir {
    use basin_core::{InitialValue, InputDef, Model, ModelBuilder, ModelError, ParameterDef};
    use basin_solvers::Euler;

    /// A single linear reservoir filled by rainfall.
    ///
    /// ```text
    /// dS/dt = P - S / T
    /// Q = S / T
    /// ```
    pub fn model() -> Result<Model, ModelError> {
        let mut builder = ModelBuilder::new("Linear reservoir", "1.0");
        builder.module("Reservoir", "1.0", "One linear store draining to an outlet");

        let mm = builder.unit("mm")?;
        let group = builder.parameter_group("Reservoir", &[])?;
        let time_constant = builder.parameter(
            group,
            ParameterDef::double("Time constant", 10.0)
                .range(0.1, 1000.0)
                .description("Residence time in days"),
        )?;
        let initial_storage =
            builder.parameter(group, ParameterDef::double("Initial storage", 0.0).unit(mm))?;
        let rainfall = builder.input(InputDef::new("Rainfall").unit(mm))?;

        let storage = builder.register_ode("Storage", Some(mm))?;
        let flow = builder.register_equation("Flow", Some(mm))?;
        let solver = builder.register_solver("Reservoir solver", 0.01, Euler)?;
        builder.set_solver(storage, solver)?;
        builder.set_solver(flow, solver)?;
        builder.set_initial_value(storage, InitialValue::Parameter(initial_storage))?;

        builder.set_equation(flow, move |v| v.result(storage) / v.parameter(time_constant))?;
        builder.set_equation(storage, move |v| v.input(rainfall) - v.result(flow))?;

        builder.finalize()
    }

    /// Storage after `t` days of constant rainfall `p`, starting from `s0`.
    #[must_use]
    pub fn exact_storage(p: f64, time_constant: f64, s0: f64, t: f64) -> f64 {
        let equilibrium = p * time_constant;
        equilibrium + (s0 - equilibrium) * (-t / time_constant).exp()
    }
}

pub mod river {
    use basin_core::{Model, ModelBuilder, ModelError, ParameterDef};

    /// Reaches that each add a local inflow to everything arriving from
    /// upstream.
    pub fn model() -> Result<Model, ModelError> {
        let mut builder = ModelBuilder::new("Branched river", "1.0");

        let reaches = builder.branched_index_set("Reaches")?;
        let group = builder.parameter_group("Reach", &[reaches])?;
        let local = builder.parameter(group, ParameterDef::double("Local inflow", 1.0))?;

        let flow = builder.register_equation("Reach flow", None)?;
        builder.set_equation(flow, move |v| {
            let mut total = v.parameter(local);
            for upstream in v.upstream(reaches) {
                total += v.result_at(flow, &[upstream]);
            }
            total
        })?;

        builder.finalize()
    }
}

pub mod land {
    use basin_core::{Model, ModelBuilder, ModelError, ParameterDef};

    /// Runoff per land use, summed and area-weighted over the catchment.
    ///
    /// Snowmelt only runs for land uses with the snow switch on, and the
    /// routing method switches between two formulations of outflow.
    pub fn model() -> Result<Model, ModelError> {
        let mut builder = ModelBuilder::new("Land use", "1.0");

        let land = builder.index_set("Land use")?;
        let system = builder.parameter_group("Catchment", &[])?;
        let routing = builder.parameter(
            system,
            ParameterDef::enumeration("Routing", &["Direct", "Delayed"], "Direct"),
        )?;

        let group = builder.parameter_group("Land use", &[land])?;
        let rate = builder.parameter(group, ParameterDef::double("Runoff rate", 1.0))?;
        let area = builder.parameter(group, ParameterDef::double("Area", 1.0).range(0.0, 1e6))?;
        let snow = builder.parameter(group, ParameterDef::bool("Has snow", false))?;

        let runoff = builder.register_equation("Runoff", None)?;
        builder.set_equation(runoff, move |v| v.parameter(rate))?;

        let total = builder.register_cumulative("Total runoff", runoff, land, None)?;
        builder.register_cumulative("Mean runoff", runoff, land, Some(area))?;

        let melt = builder.register_equation("Snow melt", None)?;
        builder.set_equation(melt, move |v| v.last_result(melt) + 1.0)?;
        builder.conditional_on(melt, snow, true)?;

        let direct = builder.register_equation("Direct outflow", None)?;
        builder.set_equation(direct, move |v| v.result(total))?;
        builder.conditional_on_enum(direct, routing, "Direct")?;

        let delayed = builder.register_equation("Delayed outflow", None)?;
        builder.set_equation(delayed, move |v| 0.5 * v.last_result(total))?;
        builder.conditional_on_enum(delayed, routing, "Delayed")?;

        builder.finalize()
    }
}
