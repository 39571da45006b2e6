// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::ops::Range;

use arrayvec::ArrayVec;

use crate::VirtualAddress;
use crate::address::PAGE_ALIGN;
use crate::error::{RegionError, ensure};

/// Maximum number of regions a [`RegionSet`] holds by default.
pub const DEFAULT_MAX_REGIONS: usize = 16;

/// Decides whether a faulting virtual address belongs to a legitimately allocated region of the
/// active address space.
///
/// The fault handler only materializes pages for addresses the validator accepts.
pub trait RegionValidator {
    fn is_legitimate(&self, address: VirtualAddress) -> bool;
}

impl<F> RegionValidator for F
where
    F: Fn(VirtualAddress) -> bool,
{
    fn is_legitimate(&self, address: VirtualAddress) -> bool {
        self(address)
    }
}

/// A fixed capacity set of non-overlapping, page aligned virtual address ranges.
#[derive(Debug, Clone, Default)]
pub struct RegionSet<const MAX: usize = DEFAULT_MAX_REGIONS> {
    // sorted by start address
    regions: ArrayVec<Range<VirtualAddress>, MAX>,
}

impl<const MAX: usize> RegionSet<MAX> {
    pub const fn new() -> Self {
        Self {
            regions: ArrayVec::new_const(),
        }
    }

    /// Adds `range` to the set.
    ///
    /// # Errors
    ///
    /// Returns an error if `range` is empty, not page aligned, overlaps a region already in the
    /// set, or the set is full.
    pub fn insert(&mut self, range: Range<VirtualAddress>) -> Result<(), RegionError> {
        ensure!(range.start < range.end, RegionError::Empty);
        ensure!(
            range.start.is_aligned_to(PAGE_ALIGN) && range.end.is_aligned_to(PAGE_ALIGN),
            RegionError::Unaligned
        );
        ensure!(
            !self
                .regions
                .iter()
                .any(|region| region.start < range.end && range.start < region.end),
            RegionError::Overlap
        );
        ensure!(!self.regions.is_full(), RegionError::CapacityExceeded);

        log::trace!("adding region {}..{}", range.start, range.end);

        let index = self
            .regions
            .partition_point(|region| region.start < range.start);
        self.regions.insert(index, range);

        Ok(())
    }

    /// Removes the region starting at `start`, returning it.
    pub fn remove(&mut self, start: VirtualAddress) -> Option<Range<VirtualAddress>> {
        let index = self
            .regions
            .iter()
            .position(|region| region.start == start)?;

        Some(self.regions.remove(index))
    }

    /// Returns `true` if `address` is inside any region of the set.
    pub fn contains(&self, address: VirtualAddress) -> bool {
        self.regions.iter().any(|region| region.contains(&address))
    }

    /// Returns the regions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &Range<VirtualAddress>> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl<const MAX: usize> RegionValidator for RegionSet<MAX> {
    fn is_legitimate(&self, address: VirtualAddress) -> bool {
        self.contains(address)
    }
}

impl<const MAX: usize> RegionValidator for &RegionSet<MAX> {
    fn is_legitimate(&self, address: VirtualAddress) -> bool {
        self.contains(address)
    }
}

#[cfg(test)]
mod tests {
    use proptest::{prop_assert, prop_assert_eq, proptest};

    use super::*;

    fn range(start: u32, end: u32) -> Range<VirtualAddress> {
        VirtualAddress::new(start)..VirtualAddress::new(end)
    }

    #[test_log::test]
    fn insert_and_contains() {
        let mut set: RegionSet = RegionSet::new();

        set.insert(range(0x0040_0000, 0x0080_0000)).unwrap();
        set.insert(range(0x0000_1000, 0x0000_2000)).unwrap();

        assert_eq!(set.len(), 2);
        assert!(set.contains(VirtualAddress::new(0x0040_1000)));
        assert!(set.contains(VirtualAddress::new(0x007f_ffff)));
        assert!(!set.contains(VirtualAddress::new(0x0080_0000)));
        assert!(set.contains(VirtualAddress::new(0x0000_1fff)));
        assert!(!set.contains(VirtualAddress::new(0x0000_0fff)));

        // sorted
        let starts: Vec<_> = set.iter().map(|region| region.start.get()).collect();
        assert_eq!(starts, [0x1000, 0x0040_0000]);
    }

    #[test]
    fn insert_rejects() {
        let mut set: RegionSet<2> = RegionSet::new();

        assert_eq!(
            set.insert(range(0x1000, 0x1000)),
            Err(RegionError::Empty)
        );
        assert_eq!(
            set.insert(range(0x1000, 0x1800)),
            Err(RegionError::Unaligned)
        );

        set.insert(range(0x1000, 0x3000)).unwrap();
        assert_eq!(
            set.insert(range(0x2000, 0x4000)),
            Err(RegionError::Overlap)
        );
        assert_eq!(
            set.insert(range(0x0000, 0x2000)),
            Err(RegionError::Overlap)
        );

        // adjacent is fine
        set.insert(range(0x3000, 0x4000)).unwrap();
        assert_eq!(
            set.insert(range(0x8000, 0x9000)),
            Err(RegionError::CapacityExceeded)
        );
    }

    #[test]
    fn remove() {
        let mut set: RegionSet = RegionSet::new();
        set.insert(range(0x1000, 0x3000)).unwrap();

        assert_eq!(set.remove(VirtualAddress::new(0x2000)), None);
        assert_eq!(set.remove(VirtualAddress::new(0x1000)), Some(range(0x1000, 0x3000)));
        assert!(set.is_empty());
        assert!(!set.contains(VirtualAddress::new(0x1000)));
    }

    #[test]
    fn validators() {
        let mut set: RegionSet = RegionSet::new();
        set.insert(range(0x0040_0000, 0x0080_0000)).unwrap();

        let address = VirtualAddress::new(0x0040_1000);
        assert!(set.is_legitimate(address));
        assert!((&set).is_legitimate(address));

        let closure = |address: VirtualAddress| address.get() < 0x1000;
        assert!(closure.is_legitimate(VirtualAddress::new(0xfff)));
        assert!(!closure.is_legitimate(address));
    }

    proptest! {
        #[test]
        fn regions_never_overlap(pages in proptest::collection::vec((0u32..64, 1u32..8), 0..32)) {
            let mut set: RegionSet<32> = RegionSet::new();

            for (start, len) in pages {
                let _ = set.insert(range(start * 0x1000, (start + len) * 0x1000));
            }

            let regions: Vec<_> = set.iter().cloned().collect();
            for pair in regions.windows(2) {
                prop_assert!(pair[0].end <= pair[1].start);
            }
            prop_assert_eq!(regions.len(), set.len());
        }
    }
}
