//! Flat storage layout for entities indexed by varying sets of index sets.
//!
//! Entities that depend on the same ordered list of index sets share a
//! storage unit. Inside a unit the entities are interleaved, so all entities
//! at one index tuple are contiguous:
//!
//! ```text
//! unit offset
//! |  tuple (0,0)   |  tuple (0,1)   | ...
//! | e0 | e1 | e2   | e0 | e1 | e2   | ...
//! ```
//!
//! The offset of entity `e` at tuple `(i_0, .., i_n)` is
//!
//! ```text
//! unit_offset + ((i_0 * c_1 + i_1) * c_2 + ... + i_n) * entity_count + position(e)
//! ```
//!
//! Bounds and index set checks on the offset functions are compiled in with
//! the `bounds-checks` feature.

use std::fmt;

use thiserror::Error;

use crate::{
    handle::{EntityKind, IndexSetId},
    index::{Index, Odometer, zeroed_context},
};

/// An index used to address storage was invalid for the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub struct BoundsError {
    pub kind: EntityKind,
    pub handle: usize,
    pub set: IndexSetId,
    pub found_set: IndexSetId,
    pub index: u32,
    pub count: usize,
}

impl fmt::Display for BoundsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.set == self.found_set {
            write!(
                f,
                "index {} is out of bounds for index set {} of {} {} (count {})",
                self.index,
                self.set.id(),
                self.kind,
                self.handle,
                self.count
            )
        } else {
            write!(
                f,
                "{} {} expects an index of index set {}, got one of index set {}",
                self.kind,
                self.handle,
                self.set.id(),
                self.found_set.id()
            )
        }
    }
}

/// The entities sharing one ordered index set list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUnit {
    pub index_sets: Vec<IndexSetId>,
    pub handles: Vec<usize>,
}

/// Collects storage units until index counts are known.
#[derive(Debug, Clone)]
pub struct StorageBuilder {
    kind: EntityKind,
    units: Vec<StorageUnit>,
}

impl StorageBuilder {
    #[must_use]
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            units: Vec::new(),
        }
    }

    /// Declares one storage unit.
    pub fn add_unit(&mut self, index_sets: Vec<IndexSetId>, handles: Vec<usize>) {
        self.units.push(StorageUnit {
            index_sets,
            handles,
        });
    }

    /// Lays the units out contiguously using the final index counts.
    ///
    /// `counts` is indexed by index set handle.
    #[must_use]
    pub fn finalize(self, counts: &[usize]) -> StorageStructure {
        let handle_count = self
            .units
            .iter()
            .flat_map(|u| u.handles.iter())
            .map(|&h| h + 1)
            .max()
            .unwrap_or(0);

        let mut unit_for_handle = vec![usize::MAX; handle_count];
        let mut location_in_unit = vec![0; handle_count];
        let mut offset_for_unit = Vec::with_capacity(self.units.len());
        let mut total_count_for_unit = Vec::with_capacity(self.units.len());

        let mut offset = 0;
        for (u, unit) in self.units.iter().enumerate() {
            let instances: usize = unit.index_sets.iter().map(|s| counts[s.id()]).product();
            let total = instances * unit.handles.len();
            offset_for_unit.push(offset);
            total_count_for_unit.push(total);
            offset += total;

            for (location, &handle) in unit.handles.iter().enumerate() {
                unit_for_handle[handle] = u;
                location_in_unit[handle] = location;
            }
        }

        StorageStructure {
            kind: self.kind,
            units: self.units,
            counts: counts.to_vec(),
            unit_for_handle,
            location_in_unit,
            offset_for_unit,
            total_count_for_unit,
            total_count: offset,
        }
    }
}

/// A finalized layout mapping (handle, index tuple) to a flat offset.
#[derive(Debug, Clone)]
pub struct StorageStructure {
    kind: EntityKind,
    units: Vec<StorageUnit>,
    counts: Vec<usize>,
    unit_for_handle: Vec<usize>,
    location_in_unit: Vec<usize>,
    offset_for_unit: Vec<usize>,
    total_count_for_unit: Vec<usize>,
    total_count: usize,
}

impl StorageStructure {
    /// Returns the number of values needed for one full copy of all units.
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.total_count
    }

    /// Returns the storage units in layout order.
    #[must_use]
    pub fn units(&self) -> &[StorageUnit] {
        &self.units
    }

    /// Returns the position of the unit holding `handle`.
    #[must_use]
    pub fn unit_of(&self, handle: usize) -> usize {
        self.unit_for_handle[handle]
    }

    /// Returns the index sets `handle` is stored over.
    #[must_use]
    pub fn index_sets_of(&self, handle: usize) -> &[IndexSetId] {
        &self.units[self.unit_for_handle[handle]].index_sets
    }

    /// Returns the number of index tuples `handle` is stored at.
    #[must_use]
    pub fn instance_count(&self, handle: usize) -> usize {
        self.index_sets_of(handle)
            .iter()
            .map(|s| self.counts[s.id()])
            .product()
    }

    /// Returns the offset range of a unit.
    #[must_use]
    pub fn unit_range(&self, unit: usize) -> std::ops::Range<usize> {
        let start = self.offset_for_unit[unit];
        start..start + self.total_count_for_unit[unit]
    }

    /// Returns the offset of the instance with all indexes at zero.
    #[must_use]
    pub fn first_offset(&self, handle: usize) -> usize {
        let unit = self.unit_for_handle[handle];
        self.offset_for_unit[unit] + self.location_in_unit[handle]
    }

    /// Returns the offset using the current index of every set.
    ///
    /// `current` is indexed by index set handle.
    ///
    /// # Errors
    ///
    /// With bounds checks enabled, fails if a current index is out of range.
    pub fn offset_current(&self, handle: usize, current: &[Index]) -> Result<usize, BoundsError> {
        let unit = &self.units[self.unit_for_handle[handle]];
        let mut tuple = 0;
        for &set in &unit.index_sets {
            let index = current[set.id()];
            self.check(handle, set, index)?;
            tuple = tuple * self.counts[set.id()] + index.slot();
        }
        Ok(self.place(handle, tuple))
    }

    /// Returns the offset for an explicit tuple in the handle's own set order.
    ///
    /// # Errors
    ///
    /// With bounds checks enabled, fails if an index is out of range or
    /// belongs to a different index set than the position it is used for.
    pub fn offset_explicit(&self, handle: usize, indexes: &[Index]) -> Result<usize, BoundsError> {
        let unit = &self.units[self.unit_for_handle[handle]];
        let mut tuple = 0;
        for (&set, &index) in unit.index_sets.iter().zip(indexes) {
            self.check(handle, set, index)?;
            tuple = tuple * self.counts[set.id()] + index.slot();
        }
        Ok(self.place(handle, tuple))
    }

    /// Returns the offset using current indexes, except that the last
    /// `overrides.len()` index sets of the handle take their index from
    /// `overrides`.
    ///
    /// # Errors
    ///
    /// With bounds checks enabled, fails if an index is out of range or an
    /// override belongs to the wrong index set.
    pub fn offset_overriding(
        &self,
        handle: usize,
        current: &[Index],
        overrides: &[Index],
    ) -> Result<usize, BoundsError> {
        let unit = &self.units[self.unit_for_handle[handle]];
        let implicit = unit.index_sets.len().saturating_sub(overrides.len());
        let mut tuple = 0;
        for (level, &set) in unit.index_sets.iter().enumerate() {
            let index = if level < implicit {
                current[set.id()]
            } else {
                overrides[level - implicit]
            };
            self.check(handle, set, index)?;
            tuple = tuple * self.counts[set.id()] + index.slot();
        }
        Ok(self.place(handle, tuple))
    }

    /// Returns the offset with `skip` forced to index zero, and the stride
    /// that steps through the values of `skip` with all other indexes fixed.
    ///
    /// If the handle does not depend on `skip` the stride is zero.
    ///
    /// # Errors
    ///
    /// With bounds checks enabled, fails if a current index is out of range.
    pub fn offset_skipping(
        &self,
        handle: usize,
        current: &[Index],
        skip: IndexSetId,
    ) -> Result<(usize, usize), BoundsError> {
        let unit = &self.units[self.unit_for_handle[handle]];
        let mut tuple = 0;
        let mut stride = 0;
        for &set in &unit.index_sets {
            let count = self.counts[set.id()];
            stride *= count;
            if set == skip {
                tuple *= count;
                stride = 1;
            } else {
                let index = current[set.id()];
                self.check(handle, set, index)?;
                tuple = tuple * count + index.slot();
            }
        }
        Ok((self.place(handle, tuple), stride * unit.handles.len()))
    }

    /// Enumerates every index tuple of `handle` in canonical nested order.
    #[must_use]
    pub fn instances(&self, handle: usize) -> Vec<Vec<Index>> {
        let sets = self.index_sets_of(handle);
        let mut current = zeroed_context(self.counts.len());
        let mut odometer = Odometer::new(sets, &self.counts);
        let mut out = Vec::with_capacity(self.instance_count(handle));
        while odometer.advance(&mut current) {
            out.push(sets.iter().map(|s| current[s.id()]).collect());
        }
        out
    }

    fn place(&self, handle: usize, tuple: usize) -> usize {
        let u = self.unit_for_handle[handle];
        self.offset_for_unit[u] + tuple * self.units[u].handles.len() + self.location_in_unit[handle]
    }

    #[cfg(feature = "bounds-checks")]
    fn check(&self, handle: usize, set: IndexSetId, index: Index) -> Result<(), BoundsError> {
        let count = self.counts[set.id()];
        if index.set() != set || index.slot() >= count {
            return Err(BoundsError {
                kind: self.kind,
                handle,
                set,
                found_set: index.set(),
                index: index.position(),
                count,
            });
        }
        Ok(())
    }

    #[cfg(not(feature = "bounds-checks"))]
    #[inline(always)]
    #[allow(clippy::unused_self, clippy::unnecessary_wraps)]
    fn check(&self, _handle: usize, _set: IndexSetId, _index: Index) -> Result<(), BoundsError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;

    // --- Test fixtures ---

    const A: IndexSetId = IndexSetId(0);
    const B: IndexSetId = IndexSetId(1);
    const C: IndexSetId = IndexSetId(2);

    /// Units: scalar {0}, [A, B] {1, 2}, [B, A] {3}, [A, B, C] {4}.
    fn structure() -> StorageStructure {
        let mut builder = StorageBuilder::new(EntityKind::Result);
        builder.add_unit(vec![], vec![0]);
        builder.add_unit(vec![A, B], vec![1, 2]);
        builder.add_unit(vec![B, A], vec![3]);
        builder.add_unit(vec![A, B, C], vec![4]);
        builder.finalize(&[2, 3, 4])
    }

    fn context(a: u32, b: u32, c: u32) -> Vec<Index> {
        vec![Index::new(A, a), Index::new(B, b), Index::new(C, c)]
    }

    // --- Tests ---

    #[test]
    fn unit_sizes_and_total() {
        let s = structure();
        assert_eq!(s.unit_range(0), 0..1);
        assert_eq!(s.unit_range(1), 1..13);
        assert_eq!(s.unit_range(2), 13..19);
        assert_eq!(s.unit_range(3), 19..43);
        assert_eq!(s.total_count(), 43);
    }

    #[test]
    fn offsets_are_a_bijection_onto_each_unit() {
        let s = structure();
        let mut seen = HashSet::new();

        for handle in 0..5 {
            let range = s.unit_range(s.unit_of(handle));
            for tuple in s.instances(handle) {
                let offset = s.offset_explicit(handle, &tuple).unwrap();
                assert!(range.contains(&offset));
                assert!(seen.insert(offset), "offset {offset} reused");
                assert_eq!(s.offset_explicit(handle, &tuple).unwrap(), offset);
            }
        }
        assert_eq!(seen.len(), s.total_count());
    }

    #[test]
    fn entities_interleave_within_a_unit() {
        let s = structure();
        let current = context(1, 2, 0);

        let first = s.offset_current(1, &current).unwrap();
        let second = s.offset_current(2, &current).unwrap();

        assert_eq!(second, first + 1);
        assert_eq!(first, 1 + (3 + 2) * 2);
        assert_eq!(s.first_offset(2), 2);
    }

    #[test]
    fn permuted_lists_use_their_own_order() {
        let s = structure();
        let current = context(1, 2, 0);

        assert_ne!(s.unit_of(1), s.unit_of(3));
        assert_eq!(s.offset_current(3, &current).unwrap(), 13 + 2 * 2 + 1);
    }

    #[test]
    fn overrides_replace_trailing_sets() {
        let s = structure();
        let current = context(1, 0, 3);

        let overridden = s.offset_overriding(4, &current, &[Index::new(C, 1)]).unwrap();
        let explicit = s
            .offset_explicit(4, &[Index::new(A, 1), Index::new(B, 0), Index::new(C, 1)])
            .unwrap();
        assert_eq!(overridden, explicit);

        let both = s
            .offset_overriding(4, &current, &[Index::new(B, 2), Index::new(C, 0)])
            .unwrap();
        assert_eq!(both, s.offset_current(4, &context(1, 2, 0)).unwrap());
    }

    #[test]
    fn skipping_walks_one_set() {
        let s = structure();
        let current = context(1, 2, 3);

        let (offset, stride) = s.offset_skipping(4, &current, B).unwrap();
        for b in 0..3 {
            let expected = s.offset_current(4, &context(1, b, 3)).unwrap();
            assert_eq!(offset + b as usize * stride, expected);
        }

        let (offset, stride) = s.offset_skipping(1, &current, A).unwrap();
        for a in 0..2 {
            let expected = s.offset_current(1, &context(a, 2, 0)).unwrap();
            assert_eq!(offset + a as usize * stride, expected);
        }
    }

    #[cfg(feature = "bounds-checks")]
    #[test]
    fn out_of_range_and_wrong_set_are_reported() {
        let s = structure();

        let err = s.offset_current(1, &context(2, 0, 0)).unwrap_err();
        assert_eq!((err.set, err.index, err.count), (A, 2, 2));

        let err = s
            .offset_explicit(1, &[Index::new(B, 0), Index::new(B, 0)])
            .unwrap_err();
        assert_eq!((err.set, err.found_set), (A, B));
    }
}
