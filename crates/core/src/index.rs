//! Index sets, concrete indexes, and the per-data-set index space.
//!
//! An index set is a named dimension declared on the model. A data set gives
//! each index set its concrete, named indexes. Branched index sets also record
//! for every index the upstream indexes that feed into it, which is how river
//! networks are expressed.

use std::{collections::HashMap, fmt};

use thiserror::Error;

use crate::handle::IndexSetId;

/// One concrete position in an index set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Index {
    set: IndexSetId,
    position: u32,
}

impl Index {
    /// Creates an index at `position` in `set`.
    #[must_use]
    pub fn new(set: IndexSetId, position: u32) -> Self {
        Self { set, position }
    }

    /// Returns the index set this index belongs to.
    #[must_use]
    pub fn set(self) -> IndexSetId {
        self.set
    }

    /// Returns the zero-based position within the index set.
    #[must_use]
    pub fn position(self) -> u32 {
        self.position
    }

    pub(crate) fn slot(self) -> usize {
        self.position as usize
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.position)
    }
}

/// Whether an index set is a flat enumeration or a branching network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSetKind {
    Basic,
    Branched,
}

/// Errors from assigning or looking up concrete indexes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("indexes for index set \"{set}\" have already been set")]
    AlreadySet { set: String },

    #[error("tried to set an empty list of indexes for index set \"{set}\"")]
    Empty { set: String },

    #[error("index \"{index}\" appears more than once in index set \"{set}\"")]
    Duplicate { set: String, index: String },

    #[error(
        "index set \"{set}\" requires index \"{expected}\" at position {position}, found \"{found}\""
    )]
    RequiredPrefix {
        set: String,
        position: usize,
        expected: String,
        found: String,
    },

    #[error("index \"{index}\" in index set \"{set}\" lists upstream \"{upstream}\" which is not declared before it")]
    ForwardReference {
        set: String,
        index: String,
        upstream: String,
    },

    #[error("index set \"{set}\" is {actual:?}, not {expected:?}")]
    WrongKind {
        set: String,
        expected: IndexSetKind,
        actual: IndexSetKind,
    },

    #[error("index \"{index}\" is not in index set \"{set}\"")]
    NotFound { set: String, index: String },

    #[error("indexes for index set \"{set}\" have not been set")]
    NotSet { set: String },
}

/// Model-side description of an index set.
#[derive(Debug, Clone)]
pub(crate) struct IndexSetSpec {
    pub(crate) name: String,
    pub(crate) kind: IndexSetKind,
    pub(crate) required: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct Assigned {
    names: Vec<String>,
    lookup: HashMap<String, u32>,
    upstream: Vec<Vec<u32>>,
}

/// The concrete indexes of every index set for one data set.
#[derive(Debug, Clone)]
pub struct IndexSpace {
    specs: Vec<IndexSetSpec>,
    assigned: Vec<Option<Assigned>>,
}

impl IndexSpace {
    pub(crate) fn new(specs: &[IndexSetSpec]) -> Self {
        Self {
            specs: specs.to_vec(),
            assigned: vec![None; specs.len()],
        }
    }

    /// Assigns the indexes of a basic index set.
    ///
    /// # Errors
    ///
    /// Fails if the set already has indexes, if `names` is empty or contains
    /// duplicates, if the set is branched, or if the set's required leading
    /// index names are not matched.
    pub fn set_indexes<S: AsRef<str>>(
        &mut self,
        set: IndexSetId,
        names: &[S],
    ) -> Result<(), IndexError> {
        self.check_assignable(set, IndexSetKind::Basic, names.len())?;
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_owned()).collect();
        let lookup = self.build_lookup(set, &names)?;
        self.assigned[set.id()] = Some(Assigned {
            upstream: vec![Vec::new(); names.len()],
            names,
            lookup,
        });
        Ok(())
    }

    /// Assigns the indexes of a branched index set.
    ///
    /// Each entry is an index name with the names of its upstream indexes.
    /// Upstream names must appear earlier in `branches`.
    ///
    /// # Errors
    ///
    /// Same as [`IndexSpace::set_indexes`], and additionally fails on any
    /// forward or self reference among upstream names, or if the set is basic.
    pub fn set_branch_indexes<S: AsRef<str>>(
        &mut self,
        set: IndexSetId,
        branches: &[(S, Vec<S>)],
    ) -> Result<(), IndexError> {
        self.check_assignable(set, IndexSetKind::Branched, branches.len())?;
        let names: Vec<String> = branches
            .iter()
            .map(|(n, _)| n.as_ref().to_owned())
            .collect();
        let lookup = self.build_lookup(set, &names)?;

        let mut upstream = Vec::with_capacity(branches.len());
        for (position, (name, inputs)) in branches.iter().enumerate() {
            let mut resolved = Vec::with_capacity(inputs.len());
            for input in inputs {
                match lookup.get(input.as_ref()) {
                    Some(&at) if (at as usize) < position => resolved.push(at),
                    _ => {
                        return Err(IndexError::ForwardReference {
                            set: self.name(set).to_owned(),
                            index: name.as_ref().to_owned(),
                            upstream: input.as_ref().to_owned(),
                        });
                    }
                }
            }
            upstream.push(resolved);
        }

        self.assigned[set.id()] = Some(Assigned {
            names,
            lookup,
            upstream,
        });
        Ok(())
    }

    /// Fills every unassigned index set with placeholder indexes.
    ///
    /// A set with required index names gets exactly those, otherwise it gets
    /// a single index. Returns the names of the sets that were filled.
    pub(crate) fn fill_placeholders(&mut self) -> Vec<String> {
        let mut filled = Vec::new();
        for (spec, assigned) in self.specs.iter().zip(self.assigned.iter_mut()) {
            if assigned.is_none() {
                let names = if spec.required.is_empty() {
                    vec![format!("{} 0", spec.name)]
                } else {
                    spec.required.clone()
                };
                let lookup = names
                    .iter()
                    .zip(0..)
                    .map(|(name, at)| (name.clone(), at))
                    .collect();
                *assigned = Some(Assigned {
                    lookup,
                    upstream: vec![Vec::new(); names.len()],
                    names,
                });
                filled.push(spec.name.clone());
            }
        }
        filled
    }

    /// Returns the first index set that has no indexes yet.
    pub(crate) fn first_unset(&self) -> Option<IndexSetId> {
        self.assigned
            .iter()
            .position(Option::is_none)
            .map(IndexSetId::from_usize)
    }

    /// Returns true if `set` has concrete indexes.
    #[must_use]
    pub fn is_set(&self, set: IndexSetId) -> bool {
        self.assigned.get(set.id()).is_some_and(Option::is_some)
    }

    /// Returns the name of an index set.
    #[must_use]
    pub fn name(&self, set: IndexSetId) -> &str {
        &self.specs[set.id()].name
    }

    /// Returns the kind of an index set.
    #[must_use]
    pub fn kind(&self, set: IndexSetId) -> IndexSetKind {
        self.specs[set.id()].kind
    }

    /// Returns the number of indexes in `set`, or zero if not yet set.
    #[must_use]
    pub fn count(&self, set: IndexSetId) -> usize {
        self.assigned[set.id()]
            .as_ref()
            .map_or(0, |a| a.names.len())
    }

    /// Returns the index counts of all sets, in handle order.
    #[must_use]
    pub fn counts(&self) -> Vec<usize> {
        (0..self.specs.len())
            .map(|s| self.count(IndexSetId::from_usize(s)))
            .collect()
    }

    /// Looks up an index by name.
    ///
    /// # Errors
    ///
    /// Fails if the set has no indexes yet or does not contain `name`.
    pub fn index(&self, set: IndexSetId, name: &str) -> Result<Index, IndexError> {
        let assigned = self.assigned(set)?;
        assigned
            .lookup
            .get(name)
            .map(|&position| Index::new(set, position))
            .ok_or_else(|| IndexError::NotFound {
                set: self.name(set).to_owned(),
                index: name.to_owned(),
            })
    }

    /// Returns the name of a concrete index.
    #[must_use]
    pub fn index_name(&self, index: Index) -> &str {
        self.assigned[index.set.id()]
            .as_ref()
            .and_then(|a| a.names.get(index.slot()))
            .map_or("", String::as_str)
    }

    /// Returns the index names of a set in order.
    ///
    /// # Errors
    ///
    /// Fails if the set has no indexes yet.
    pub fn index_names(&self, set: IndexSetId) -> Result<&[String], IndexError> {
        Ok(&self.assigned(set)?.names)
    }

    /// Iterates the indexes of `set` in order.
    pub fn indexes(&self, set: IndexSetId) -> impl Iterator<Item = Index> + use<> {
        let count = u32::try_from(self.count(set)).unwrap_or(u32::MAX);
        (0..count).map(move |position| Index::new(set, position))
    }

    /// Iterates the upstream indexes of `index`.
    ///
    /// Basic sets have no upstream indexes.
    pub fn upstream(&self, index: Index) -> impl Iterator<Item = Index> + '_ {
        self.upstream_positions(index)
            .iter()
            .map(move |&position| Index::new(index.set, position))
    }

    pub(crate) fn upstream_positions(&self, index: Index) -> &[u32] {
        self.assigned[index.set.id()]
            .as_ref()
            .and_then(|a| a.upstream.get(index.slot()))
            .map_or(&[], Vec::as_slice)
    }

    fn assigned(&self, set: IndexSetId) -> Result<&Assigned, IndexError> {
        self.assigned[set.id()]
            .as_ref()
            .ok_or_else(|| IndexError::NotSet {
                set: self.name(set).to_owned(),
            })
    }

    fn check_assignable(
        &self,
        set: IndexSetId,
        kind: IndexSetKind,
        len: usize,
    ) -> Result<(), IndexError> {
        let spec = &self.specs[set.id()];
        if self.assigned[set.id()].is_some() {
            return Err(IndexError::AlreadySet {
                set: spec.name.clone(),
            });
        }
        if spec.kind != kind {
            return Err(IndexError::WrongKind {
                set: spec.name.clone(),
                expected: kind,
                actual: spec.kind,
            });
        }
        if len == 0 {
            return Err(IndexError::Empty {
                set: spec.name.clone(),
            });
        }
        Ok(())
    }

    fn build_lookup(
        &self,
        set: IndexSetId,
        names: &[String],
    ) -> Result<HashMap<String, u32>, IndexError> {
        let spec = &self.specs[set.id()];
        for (position, expected) in spec.required.iter().enumerate() {
            let found = names.get(position).map_or("", String::as_str);
            if found != expected {
                return Err(IndexError::RequiredPrefix {
                    set: spec.name.clone(),
                    position,
                    expected: expected.clone(),
                    found: found.to_owned(),
                });
            }
        }

        let mut lookup = HashMap::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            let position = u32::try_from(position).unwrap_or(u32::MAX);
            if lookup.insert(name.clone(), position).is_some() {
                return Err(IndexError::Duplicate {
                    set: spec.name.clone(),
                    index: name.clone(),
                });
            }
        }
        Ok(lookup)
    }
}

/// Walks every combination of indexes for an ordered list of index sets.
///
/// The last set varies fastest. The current combination is written into a
/// context array indexed by index set handle, so the odometer can drive the
/// "current indexes" seen by equations directly.
#[derive(Debug, Clone)]
pub(crate) struct Odometer<'a> {
    sets: &'a [IndexSetId],
    counts: &'a [usize],
    started: bool,
}

impl<'a> Odometer<'a> {
    pub(crate) fn new(sets: &'a [IndexSetId], counts: &'a [usize]) -> Self {
        Self {
            sets,
            counts,
            started: false,
        }
    }

    /// Moves `current` to the next combination; returns false when exhausted.
    pub(crate) fn advance(&mut self, current: &mut [Index]) -> bool {
        if !self.started {
            self.started = true;
            if self.sets.iter().any(|s| self.counts[s.id()] == 0) {
                return false;
            }
            for &set in self.sets {
                current[set.id()] = Index::new(set, 0);
            }
            return true;
        }

        for &set in self.sets.iter().rev() {
            let next = current[set.id()].position + 1;
            if (next as usize) < self.counts[set.id()] {
                current[set.id()] = Index::new(set, next);
                return true;
            }
            current[set.id()] = Index::new(set, 0);
        }
        false
    }
}

/// Returns a context array with every set at position zero.
pub(crate) fn zeroed_context(set_count: usize) -> Vec<Index> {
    (0..set_count)
        .map(|s| Index::new(IndexSetId::from_usize(s), 0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- Test fixtures ---

    fn space() -> IndexSpace {
        IndexSpace::new(&[
            IndexSetSpec {
                name: "Landscape units".into(),
                kind: IndexSetKind::Basic,
                required: vec!["Arable".into()],
            },
            IndexSetSpec {
                name: "Reaches".into(),
                kind: IndexSetKind::Branched,
                required: Vec::new(),
            },
        ])
    }

    const LAND: IndexSetId = IndexSetId(0);
    const REACHES: IndexSetId = IndexSetId(1);

    // --- Tests ---

    #[test]
    fn basic_indexes_round_trip_names() {
        let mut space = space();
        space
            .set_indexes(LAND, &["Arable", "Forest", "Urban"])
            .unwrap();

        assert_eq!(space.count(LAND), 3);
        assert_eq!(space.index(LAND, "Forest").unwrap(), Index::new(LAND, 1));
        assert_eq!(space.index_name(Index::new(LAND, 2)), "Urban");
        assert_eq!(
            space.indexes(LAND).collect::<Vec<_>>(),
            vec![Index::new(LAND, 0), Index::new(LAND, 1), Index::new(LAND, 2)]
        );
        assert!(matches!(
            space.index(LAND, "Wetland"),
            Err(IndexError::NotFound { .. })
        ));
    }

    #[test]
    fn basic_indexes_reject_bad_lists() {
        let mut space = space();
        let empty: [&str; 0] = [];
        assert!(matches!(
            space.set_indexes(LAND, &empty),
            Err(IndexError::Empty { .. })
        ));
        assert!(matches!(
            space.set_indexes(LAND, &["Arable", "Forest", "Arable"]),
            Err(IndexError::Duplicate { .. })
        ));
        assert!(matches!(
            space.set_indexes(LAND, &["Forest", "Arable"]),
            Err(IndexError::RequiredPrefix { position: 0, .. })
        ));
        assert!(matches!(
            space.set_indexes(REACHES, &["A"]),
            Err(IndexError::WrongKind { .. })
        ));

        space.set_indexes(LAND, &["Arable"]).unwrap();
        assert!(matches!(
            space.set_indexes(LAND, &["Arable"]),
            Err(IndexError::AlreadySet { .. })
        ));
    }

    #[test]
    fn branch_chain_builds_upstream_lists() {
        let mut space = space();
        space
            .set_branch_indexes(
                REACHES,
                &[
                    ("Inlet", vec![]),
                    ("Mid", vec!["Inlet"]),
                    ("Outlet", vec!["Mid"]),
                ],
            )
            .unwrap();

        let upstream = |name: &str| -> Vec<u32> {
            let index = space.index(REACHES, name).unwrap();
            space.upstream(index).map(Index::position).collect()
        };
        assert_eq!(upstream("Inlet"), Vec::<u32>::new());
        assert_eq!(upstream("Mid"), vec![0]);
        assert_eq!(upstream("Outlet"), vec![1]);
    }

    #[test]
    fn branch_rejects_forward_and_self_references() {
        let mut space = space();
        let forward = space.set_branch_indexes(
            REACHES,
            &[("Mid", vec!["Inlet"]), ("Inlet", vec![])],
        );
        assert!(matches!(forward, Err(IndexError::ForwardReference { .. })));

        let own = space.set_branch_indexes(REACHES, &[("Loop", vec!["Loop"])]);
        assert!(matches!(own, Err(IndexError::ForwardReference { .. })));
        assert!(!space.is_set(REACHES));
    }

    #[test]
    fn placeholders_fill_only_unset_sets() {
        let mut space = space();
        space.set_indexes(LAND, &["Arable", "Forest"]).unwrap();

        let filled = space.fill_placeholders();

        assert_eq!(filled, vec!["Reaches".to_owned()]);
        assert_eq!(space.count(LAND), 2);
        assert_eq!(space.count(REACHES), 1);
        assert!(space.first_unset().is_none());
    }

    #[test]
    fn placeholders_keep_every_required_index() {
        let soils = IndexSetId(0);
        let mut space = IndexSpace::new(&[IndexSetSpec {
            name: "Soils".into(),
            kind: IndexSetKind::Basic,
            required: vec!["Topsoil".into(), "Groundwater".into()],
        }]);

        space.fill_placeholders();

        assert_eq!(space.count(soils), 2);
        assert_eq!(space.index(soils, "Topsoil").unwrap(), Index::new(soils, 0));
        assert_eq!(space.index(soils, "Groundwater").unwrap(), Index::new(soils, 1));
    }

    #[test]
    fn odometer_varies_last_set_fastest() {
        let sets = [LAND, REACHES];
        let counts = [2, 3];
        let mut current = zeroed_context(2);
        let mut odometer = Odometer::new(&sets, &counts);

        let mut seen = Vec::new();
        while odometer.advance(&mut current) {
            seen.push((current[0].position(), current[1].position()));
        }

        assert_eq!(
            seen,
            vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]
        );
    }

    #[test]
    fn odometer_over_no_sets_yields_once() {
        let counts = [2];
        let mut current = zeroed_context(1);
        let mut odometer = Odometer::new(&[], &counts);

        assert!(odometer.advance(&mut current));
        assert!(!odometer.advance(&mut current));
    }
}
