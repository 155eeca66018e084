//! Finalization: dependency recording, index set inference, ordering and
//! batching.
//!
//! # Algorithm
//!
//! 1. Run every equation body once in recording mode to learn what it reads.
//! 2. Infer each equation's index sets as the fixed point of the union of
//!    everything it reads, minus explicitly indexed sets. All equations of
//!    one solver share the union of their sets.
//! 3. Build a graph over current-timestep reads, with one node per plain
//!    equation and one node per solver. Any remaining strongly connected
//!    component is a fatal cycle.
//! 4. Order the graph topologically, breaking ties by declaration order, and
//!    emit one batch per node.
//! 5. Group consecutive batches with equal index sets for evaluation.

use std::{
    cell::RefCell,
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet, BinaryHeap},
};

use petgraph::{
    Direction,
    algo::tarjan_scc,
    graph::{DiGraph, NodeIndex},
};

use crate::{
    equation::{Reads, ValueSet},
    error::ModelError,
    handle::{EquationId, IndexSetId, ParameterId, SolverId},
    storage::StorageUnit,
    value::ParameterValue,
};

use super::{
    Batch, BatchGroup, EquationKind, EquationSpec, GroupSpec, InitialValue, InputSpec, Model,
    ModelBuilder, ParameterSpec, Registry, Schedule, SolverSpec,
};

pub(super) fn finalize(builder: ModelBuilder) -> Result<Model, ModelError> {
    let ModelBuilder {
        name,
        version,
        modules,
        units,
        index_sets,
        groups,
        parameters,
        inputs,
        mut equations,
        solvers,
        preprocessing,
        timestep,
        timesteps,
        start_date,
    } = builder;

    record_reads(&mut equations, &parameters)?;
    validate_reads(&equations, &parameters, &inputs, &index_sets)?;
    infer_index_sets(&mut equations, &parameters, &groups, &inputs, solvers.len());
    validate_explicit_indexes(&equations, &parameters, &groups, &index_sets)?;
    validate_cumulations(&equations, &parameters, &groups, &index_sets)?;

    for (_, eq_name, spec) in equations.iter() {
        if spec.kind == EquationKind::Ode && spec.solver.is_none() {
            return Err(ModelError::OdeWithoutSolver(eq_name.to_owned()));
        }
    }

    let batches = order_batches(&equations, &solvers)?;
    let batch_groups = group_batches(&batches, &equations);
    let initial_order = initial_value_order(&equations, &batches)?;
    let computed_parameters = computed_parameters(&parameters, &groups, &equations)?;

    let parameter_units = storage_units(
        parameters
            .iter()
            .map(|(p, _, spec)| (p, groups.get(spec.group.id()).index_sets.clone())),
    );
    let input_units = storage_units(inputs.iter().map(|(i, _, spec)| (i, spec.index_sets.clone())));
    let result_units = storage_units(
        equations
            .iter()
            .filter(|(_, _, spec)| spec.kind != EquationKind::InitialValue)
            .map(|(e, _, spec)| (e, spec.index_sets.clone())),
    );

    for (b, batch) in batches.iter().enumerate() {
        let names: Vec<&str> = batch
            .odes
            .iter()
            .chain(&batch.equations)
            .map(|e| equations.name(e.id()))
            .collect();
        let sets: Vec<&str> = batch
            .index_sets
            .iter()
            .map(|s| index_sets.name(s.id()))
            .collect();
        match batch.solver {
            Some(s) => log::debug!(
                "batch {b} [solver {}] over {sets:?}: {names:?}",
                solvers.name(s.id())
            ),
            None => log::debug!("batch {b} over {sets:?}: {names:?}"),
        }
    }

    Ok(Model {
        name,
        version,
        modules,
        units,
        index_sets,
        groups,
        parameters,
        inputs,
        equations,
        solvers,
        preprocessing,
        timestep,
        timesteps,
        start_date,
        schedule: Schedule {
            batches,
            groups: batch_groups,
            initial_order,
            computed_parameters,
            parameter_units,
            input_units,
            result_units,
        },
    })
}

/// Runs every body in recording mode and stores what it read.
fn record_reads(
    equations: &mut Registry<EquationSpec>,
    parameters: &Registry<ParameterSpec>,
) -> Result<(), ModelError> {
    let defaults: Vec<ParameterValue> = parameters.items().iter().map(|p| p.default).collect();

    for id in 0..equations.len() {
        let spec = equations.get(id);
        let reads = match (spec.cumulation, &spec.body) {
            (Some(cumulation), _) => {
                let mut reads = Reads::default();
                reads.results.push((cumulation.target, vec![cumulation.over]));
                if let Some(weight) = cumulation.weight {
                    reads.parameters.push((weight, vec![cumulation.over]));
                }
                reads
            }
            (None, Some(body)) => {
                let reads = RefCell::new(Reads::default());
                body(&ValueSet::recording(&defaults, &reads));
                reads.into_inner()
            }
            (None, None) => return Err(ModelError::MissingBody(equations.name(id).to_owned())),
        };
        equations.get_mut(id).reads = reads;
    }
    Ok(())
}

/// Checks that every recorded handle belongs to this model.
fn validate_reads(
    equations: &Registry<EquationSpec>,
    parameters: &Registry<ParameterSpec>,
    inputs: &Registry<InputSpec>,
    index_sets: &Registry<crate::index::IndexSetSpec>,
) -> Result<(), ModelError> {
    for (_, eq_name, spec) in equations.iter() {
        let reads = &spec.reads;
        for (parameter, explicit) in &reads.parameters {
            parameters.check(parameter.id())?;
            for set in explicit {
                index_sets.check(set.id())?;
            }
        }
        for input in &reads.inputs {
            inputs.check(input.id())?;
        }
        for set in &reads.index_sets {
            index_sets.check(set.id())?;
        }
        for (target, explicit) in reads.results.iter().chain(&reads.last_results) {
            equations.check(target.id())?;
            for set in explicit {
                index_sets.check(set.id())?;
            }
            if equations.get(target.id()).kind == EquationKind::InitialValue {
                return Err(ModelError::ReadsInitialValueEquation {
                    equation: eq_name.to_owned(),
                    target: equations.name(target.id()).to_owned(),
                });
            }
        }
        for target in &reads.writes {
            equations.check(target.id())?;
            let kind = equations.get(target.id()).kind;
            if kind == EquationKind::InitialValue {
                return Err(ModelError::WrongEquationKind {
                    name: equations.name(target.id()).to_owned(),
                    kind,
                    action: "be written by another equation",
                });
            }
        }
    }
    Ok(())
}

/// Computes each equation's index sets as a fixed point.
fn infer_index_sets(
    equations: &mut Registry<EquationSpec>,
    parameters: &Registry<ParameterSpec>,
    groups: &Registry<GroupSpec>,
    inputs: &Registry<InputSpec>,
    solver_count: usize,
) {
    let parameter_sets =
        |p: ParameterId| &groups.get(parameters.get(p.id()).group.id()).index_sets;

    let direct: Vec<BTreeSet<IndexSetId>> = equations
        .items()
        .iter()
        .map(|spec| {
            let reads = &spec.reads;
            let mut sets: BTreeSet<IndexSetId> = reads.index_sets.iter().copied().collect();
            for (parameter, explicit) in &reads.parameters {
                sets.extend(
                    parameter_sets(*parameter)
                        .iter()
                        .copied()
                        .filter(|s| !explicit.contains(s)),
                );
            }
            for input in &reads.inputs {
                sets.extend(inputs.get(input.id()).index_sets.iter().copied());
            }
            if let Some(InitialValue::Parameter(p)) = spec.initial {
                sets.extend(parameter_sets(p.id()).iter().copied());
            }
            if let Some(condition) = spec.condition {
                sets.extend(parameter_sets(condition.switch).iter().copied());
            }
            sets
        })
        .collect();

    let mut current = direct.clone();
    loop {
        let mut changed = false;

        for (e, spec) in equations.items().iter().enumerate() {
            let reads = &spec.reads;
            let mut sets = current[e].clone();
            sets.extend(direct[e].iter().copied());
            for (dep, explicit) in reads.results.iter().chain(&reads.last_results) {
                sets.extend(
                    current[dep.id()]
                        .iter()
                        .copied()
                        .filter(|s| !explicit.contains(s)),
                );
            }
            if let Some(InitialValue::Equation(source)) = spec.initial {
                sets.extend(current[source.id()].iter().copied());
            }
            if sets != current[e] {
                current[e] = sets;
                changed = true;
            }
        }

        let mut unions = vec![BTreeSet::new(); solver_count];
        for (e, spec) in equations.items().iter().enumerate() {
            if let Some(solver) = spec.solver {
                unions[solver.id()].extend(current[e].iter().copied());
            }
        }
        for (e, spec) in equations.items().iter().enumerate() {
            if let Some(solver) = spec.solver {
                if current[e] != unions[solver.id()] {
                    current[e].clone_from(&unions[solver.id()]);
                    changed = true;
                }
            }
        }

        if !changed {
            break;
        }
    }

    for (e, sets) in current.into_iter().enumerate() {
        equations.get_mut(e).index_sets = sets.into_iter().collect();
    }
}

/// Checks that every cumulative target, and its weight, varies over the set
/// being summed.
fn validate_cumulations(
    equations: &Registry<EquationSpec>,
    parameters: &Registry<ParameterSpec>,
    groups: &Registry<GroupSpec>,
    index_sets: &Registry<crate::index::IndexSetSpec>,
) -> Result<(), ModelError> {
    for (_, eq_name, spec) in equations.iter() {
        let Some(cumulation) = spec.cumulation else {
            continue;
        };
        let over = cumulation.over;
        let missing = |what: String| ModelError::CumulationOverMissingSet {
            equation: eq_name.to_owned(),
            set: index_sets.name(over.id()).to_owned(),
            what,
        };
        let target = equations.get(cumulation.target.id());
        if !target.index_sets.contains(&over) {
            let target_name = equations.name(cumulation.target.id());
            return Err(missing(format!("equation \"{target_name}\"")));
        }
        if let Some(weight) = cumulation.weight {
            let sets = &groups.get(parameters.get(weight.id()).group.id()).index_sets;
            if !sets.contains(&over) {
                let weight_name = parameters.name(weight.id());
                return Err(missing(format!("weight \"{weight_name}\"")));
            }
        }
    }
    Ok(())
}

/// Checks that explicitly given indexes address the trailing index sets of
/// their target.
fn validate_explicit_indexes(
    equations: &Registry<EquationSpec>,
    parameters: &Registry<ParameterSpec>,
    groups: &Registry<GroupSpec>,
    index_sets: &Registry<crate::index::IndexSetSpec>,
) -> Result<(), ModelError> {
    let names = |sets: &[IndexSetId]| -> String {
        sets.iter()
            .map(|s| index_sets.name(s.id()))
            .collect::<Vec<_>>()
            .join(", ")
    };

    for (_, eq_name, spec) in equations.iter() {
        if spec.kind == EquationKind::Cumulative {
            continue;
        }
        let reads = &spec.reads;
        let parameter_reads = reads.parameters.iter().map(|(p, explicit)| {
            let sets = &groups.get(parameters.get(p.id()).group.id()).index_sets;
            (parameters.name(p.id()), sets, explicit)
        });
        let result_reads = reads
            .results
            .iter()
            .chain(&reads.last_results)
            .map(|(e, explicit)| {
                let target = equations.get(e.id());
                (equations.name(e.id()), &target.index_sets, explicit)
            });

        for (target, sets, explicit) in parameter_reads.chain(result_reads) {
            if explicit.is_empty() {
                continue;
            }
            let trailing = sets.len().checked_sub(explicit.len()).map(|at| &sets[at..]);
            if trailing != Some(explicit.as_slice()) {
                return Err(ModelError::ExplicitIndexes {
                    equation: eq_name.to_owned(),
                    target: target.to_owned(),
                    given: names(explicit),
                    expected: names(sets),
                });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Equation(EquationId),
    Solver(SolverId),
}

/// Orders equations into batches.
fn order_batches(
    equations: &Registry<EquationSpec>,
    solvers: &Registry<SolverSpec>,
) -> Result<Vec<Batch>, ModelError> {
    // Nodes are added in declaration order, so node index is the tie-break key.
    let mut graph: DiGraph<Node, ()> = DiGraph::new();
    let mut node_of: Vec<Option<NodeIndex>> = vec![None; equations.len()];
    let mut solver_node: Vec<Option<NodeIndex>> = vec![None; solvers.len()];

    for (e, _, spec) in equations.iter() {
        if spec.kind == EquationKind::InitialValue {
            continue;
        }
        let node = match spec.solver {
            Some(s) => *solver_node[s.id()].get_or_insert_with(|| graph.add_node(Node::Solver(s))),
            None => graph.add_node(Node::Equation(EquationId::from_usize(e))),
        };
        node_of[e] = Some(node);
    }

    for (e, _, spec) in equations.iter() {
        let Some(to) = node_of[e] else { continue };
        for (dep, _) in &spec.reads.results {
            if let Some(from) = node_of[dep.id()] {
                if from != to {
                    graph.update_edge(from, to, ());
                }
            }
        }
    }

    let node_name = |node: Node| match node {
        Node::Equation(e) => equations.name(e.id()).to_owned(),
        Node::Solver(s) => format!("[solver {}]", solvers.name(s.id())),
    };
    for mut component in tarjan_scc(&graph) {
        if component.len() > 1 {
            component.sort();
            return Err(ModelError::CircularDependency(
                component.into_iter().map(|n| node_name(graph[n])).collect(),
            ));
        }
    }

    let mut indegree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| Reverse(n))
        .collect();

    let mut batches = Vec::with_capacity(graph.node_count());
    while let Some(Reverse(n)) = ready.pop() {
        let node = NodeIndex::new(n);
        batches.push(match graph[node] {
            Node::Equation(e) => Batch {
                equations: vec![e],
                odes: Vec::new(),
                solver: None,
                index_sets: equations.get(e.id()).index_sets.clone(),
            },
            Node::Solver(s) => solver_batch(equations, s)?,
        });
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            indegree[next.index()] -= 1;
            if indegree[next.index()] == 0 {
                ready.push(Reverse(next.index()));
            }
        }
    }
    Ok(batches)
}

/// Builds the batch of one solver, ordering its plain equations.
fn solver_batch(equations: &Registry<EquationSpec>, solver: SolverId) -> Result<Batch, ModelError> {
    let members: Vec<EquationId> = equations
        .iter()
        .filter(|(_, _, spec)| spec.solver == Some(solver))
        .map(|(e, _, _)| EquationId::from_usize(e))
        .collect();
    let (odes, plain): (Vec<EquationId>, Vec<EquationId>) = members
        .iter()
        .partition(|e| equations.get(e.id()).kind == EquationKind::Ode);

    let deps = |e: EquationId| -> Vec<EquationId> {
        equations
            .get(e.id())
            .reads
            .results
            .iter()
            .map(|(dep, _)| *dep)
            .filter(|dep| *dep != e && plain.contains(dep))
            .collect()
    };
    let ordered = kahn(&plain, deps).map_err(|stuck| {
        ModelError::CircularDependency(
            stuck
                .iter()
                .map(|e| equations.name(e.id()).to_owned())
                .collect(),
        )
    })?;

    Ok(Batch {
        index_sets: members
            .first()
            .map(|e| equations.get(e.id()).index_sets.clone())
            .unwrap_or_default(),
        equations: ordered,
        odes,
        solver: Some(solver),
    })
}

/// Topologically sorts `items`, preferring earlier items when free to choose.
///
/// On a cycle, returns the items that could not be placed.
fn kahn<F>(items: &[EquationId], deps: F) -> Result<Vec<EquationId>, Vec<EquationId>>
where
    F: Fn(EquationId) -> Vec<EquationId>,
{
    let position = |e: EquationId| items.iter().position(|i| *i == e);
    let mut indegree = vec![0; items.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    for (i, &item) in items.iter().enumerate() {
        let mut seen = Vec::new();
        for dep in deps(item) {
            if let Some(d) = position(dep) {
                if !seen.contains(&d) {
                    seen.push(d);
                    dependents[d].push(i);
                    indegree[i] += 1;
                }
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..items.len())
        .filter(|&i| indegree[i] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(items.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(items[i]);
        for &next in &dependents[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() == items.len() {
        Ok(order)
    } else {
        Err(items
            .iter()
            .filter(|i| !order.contains(i))
            .copied()
            .collect())
    }
}

/// Merges consecutive batches over the same index sets.
///
/// A batch that reads an equation of the open group at explicit indexes
/// starts a new group, so that every index of its target is computed first.
fn group_batches(batches: &[Batch], equations: &Registry<EquationSpec>) -> Vec<BatchGroup> {
    let mut groups: Vec<BatchGroup> = Vec::new();
    for (b, batch) in batches.iter().enumerate() {
        let joins = groups.last().is_some_and(|group| {
            group.index_sets == batch.index_sets
                && !reads_across(batch, &batches[group.batches.clone()], equations)
        });
        if joins {
            if let Some(group) = groups.last_mut() {
                group.batches.end = b + 1;
            }
            continue;
        }
        groups.push(BatchGroup {
            index_sets: batch.index_sets.clone(),
            batches: b..b + 1,
        });
    }
    groups
}

fn reads_across(batch: &Batch, open: &[Batch], equations: &Registry<EquationSpec>) -> bool {
    let in_open = |e: EquationId| {
        open.iter()
            .any(|o| o.equations.contains(&e) || o.odes.contains(&e))
    };
    batch.equations.iter().chain(&batch.odes).any(|e| {
        equations
            .get(e.id())
            .reads
            .results
            .iter()
            .any(|(dep, explicit)| !explicit.is_empty() && in_open(*dep))
    })
}

/// Orders all stored equations for the initial value pass.
fn initial_value_order(
    equations: &Registry<EquationSpec>,
    batches: &[Batch],
) -> Result<Vec<EquationId>, ModelError> {
    let run: Vec<EquationId> = batches
        .iter()
        .flat_map(|b| b.odes.iter().chain(&b.equations))
        .copied()
        .collect();

    let deps = |e: EquationId| -> Vec<EquationId> {
        let spec = equations.get(e.id());
        let source = match spec.initial {
            Some(InitialValue::Parameter(_) | InitialValue::Constant(_)) => return Vec::new(),
            Some(InitialValue::Equation(source)) => source,
            None if spec.kind == EquationKind::Ode => return Vec::new(),
            None => e,
        };
        equations
            .get(source.id())
            .reads
            .results
            .iter()
            .map(|(dep, _)| *dep)
            .filter(|dep| *dep != e)
            .collect()
    };

    kahn(&run, deps).map_err(|stuck| {
        ModelError::CircularInitialValues(
            stuck
                .iter()
                .map(|e| equations.name(e.id()).to_owned())
                .collect(),
        )
    })
}

/// Lists parameters computed by initial-value equations, checking that those
/// equations only read parameters.
fn computed_parameters(
    parameters: &Registry<ParameterSpec>,
    groups: &Registry<GroupSpec>,
    equations: &Registry<EquationSpec>,
) -> Result<Vec<(ParameterId, EquationId)>, ModelError> {
    let mut computed = Vec::new();
    for (p, name, spec) in parameters.iter() {
        let Some(equation) = spec.computed_by else {
            continue;
        };
        let eq = equations.get(equation.id());
        let parameter_sets = &groups.get(spec.group.id()).index_sets;
        let what = if !eq.reads.inputs.is_empty() {
            Some("inputs")
        } else if !eq.reads.results.is_empty() || !eq.reads.last_results.is_empty() {
            Some("results")
        } else if !eq.reads.writes.is_empty() {
            Some("results it sets")
        } else if eq.index_sets.iter().any(|s| !parameter_sets.contains(s)) {
            Some("values over index sets the parameter does not vary over")
        } else {
            None
        };
        if let Some(what) = what {
            return Err(ModelError::ComputedParameterReads {
                equation: equations.name(equation.id()).to_owned(),
                parameter: name.to_owned(),
                what: what.to_owned(),
            });
        }
        computed.push((ParameterId::from_usize(p), equation));
    }
    Ok(computed)
}

/// Groups handles by their exact ordered index set list.
fn storage_units(entries: impl Iterator<Item = (usize, Vec<IndexSetId>)>) -> Vec<StorageUnit> {
    let mut by_sets: BTreeMap<Vec<IndexSetId>, Vec<usize>> = BTreeMap::new();
    for (handle, sets) in entries {
        by_sets.entry(sets).or_default().push(handle);
    }
    by_sets
        .into_iter()
        .map(|(index_sets, handles)| StorageUnit {
            index_sets,
            handles,
        })
        .collect()
}
