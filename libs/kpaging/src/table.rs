// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::marker::PhantomData;

use crate::{Arch, ENTRIES_PER_PAGE, PageTableEntry, VirtualAddress};

/// A view of a page directory or page table. Essentially a fixed-sized list of
/// [`PageTableEntry`]s reachable at a virtual address.
///
/// Which virtual address that is depends on the translation state: before paging is enabled
/// tables are accessed through their physical address, afterward through the recursive mapping
/// (see [`crate::recursive`]).
#[derive(Debug)]
pub struct Table<A: Arch, BorrowType> {
    base: VirtualAddress,
    _marker: PhantomData<(A, BorrowType)>,
}

impl<A: Arch, BorrowType> Table<A, BorrowType> {
    /// Constructs a `Table` from the virtual address the table is accessible at.
    ///
    /// # Safety
    ///
    /// 1. The base address must indeed point to a page table (or page directory) that is accessible
    ///    under the current translation state.
    /// 2. The caller must make sure it has `BorrowType` access to the table memory.
    pub(crate) const unsafe fn from_raw_parts(base: VirtualAddress) -> Self {
        Self {
            base,
            _marker: PhantomData,
        }
    }

    /// Returns the virtual address this table is accessed through.
    pub const fn address(&self) -> VirtualAddress {
        self.base
    }

    /// Returns the entry at the given `index` without moving it. This leaves the entry
    /// unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `index >= ENTRIES_PER_PAGE`.
    pub fn get(&self, index: usize, arch: &A) -> PageTableEntry {
        assert!(index < ENTRIES_PER_PAGE, "entry index {index} out of bounds");

        // Safety: The address is always well aligned by the way we calculate it, we also
        // know any bit pattern is a valid `PageTableEntry` and the construction of this `Table`
        // guarantees the memory is accessible.
        unsafe { arch.read(entry_address(self.base, index)) }
    }

    /// Returns the number of _present_ entries in this table.
    pub fn present_entries(&self, arch: &A) -> usize {
        (0..ENTRIES_PER_PAGE)
            .filter(|index| self.get(*index, arch).is_present())
            .count()
    }

    /// Returns `true` when _all_ entries in this table are not present.
    pub fn is_empty(&self, arch: &A) -> bool {
        (0..ENTRIES_PER_PAGE).all(|index| !self.get(index, arch).is_present())
    }
}

impl<A: Arch> Table<A, marker::Mut<'_>> {
    /// Overrides the entry at the given `index` without reading the old value.
    ///
    /// # Panics
    ///
    /// Panics if `index >= ENTRIES_PER_PAGE`.
    pub fn set(&mut self, index: usize, entry: PageTableEntry, arch: &A) {
        assert!(index < ENTRIES_PER_PAGE, "entry index {index} out of bounds");

        log::trace!("{}[{index}] <- {:#010x}", self.base, entry.bits());

        // Safety: The address is always well aligned by the way we calculate it and the
        // construction of this `Table` guarantees we have mutable access to the memory.
        unsafe { arch.write(entry_address(self.base, index), entry) };
    }

    /// Overrides every entry with the entry returned by `f` for its index.
    pub fn fill_with(&mut self, arch: &A, mut f: impl FnMut(usize) -> PageTableEntry) {
        for index in 0..ENTRIES_PER_PAGE {
            let entry = f(index);

            // Safety: see `set`
            unsafe { arch.write(entry_address(self.base, index), entry) };
        }
    }
}

impl<A: Arch> Clone for Table<A, marker::Immut<'_>> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: Arch> Copy for Table<A, marker::Immut<'_>> {}

fn entry_address(base: VirtualAddress, index: usize) -> VirtualAddress {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "index is bounded by ENTRIES_PER_PAGE"
    )]
    let offset = (index * size_of::<PageTableEntry>()) as u32;

    base.add(offset)
}

pub mod marker {
    use core::marker::PhantomData;

    #[derive(Debug)]
    pub struct Mut<'a>(PhantomData<&'a mut ()>);
    #[derive(Debug)]
    pub struct Immut<'a>(PhantomData<&'a ()>);
}
