// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::PagingError;
use crate::frame_alloc::FrameAllocator;
use crate::recursive::RECURSIVE_INDEX;
use crate::table::{Table, marker};
use crate::{
    Arch, ControlFlags, DIRECTORY_SPAN, Frame, PageTableEntry, PhysicalAddress, VirtualAddress,
};

/// A two-level page table hierarchy.
///
/// Every address space starts out with
///
/// - directory entry `0` referencing a page table that identity maps the first 4MiB of memory,
/// - directory entries `1..=1022` not present,
/// - directory entry `1023` referencing the directory itself (see [`crate::recursive`]).
///
/// The hierarchy only ever grows: further page tables and pages are added lazily by the fault
/// handler of [`Paging`](crate::Paging). Tearing an address space down is not supported, its frames
/// stay allocated forever.
#[derive(Debug, PartialEq, Eq)]
pub struct AddressSpace {
    directory: Frame,
    initial_table: Frame,
}

impl AddressSpace {
    /// Constructs a new `AddressSpace`.
    ///
    /// The page directory is allocated from `kernel_allocator`, the page table backing the
    /// identity mapping from `process_allocator`. Both frames are written through their
    /// physical address, so this must run while translation is disabled, or the frames must lie
    /// inside the identity mapped first 4MiB. Translation is never enabled by this.
    ///
    /// # Errors
    ///
    /// - [`PagingError::NoMemory`] when allocating either frame fails.
    /// - [`PagingError::NotIdentityMapped`] when translation is enabled and a frame lies outside
    ///   the identity mapped region.
    ///
    /// Frames already allocated are given back to their allocators before an error is returned.
    pub fn new<A, K, P>(
        arch: &A,
        kernel_allocator: K,
        process_allocator: P,
    ) -> Result<Self, PagingError>
    where
        A: Arch,
        K: FrameAllocator,
        P: FrameAllocator,
    {
        let directory = kernel_allocator.allocate_frame()?;
        let Ok(initial_table) = process_allocator.allocate_frame() else {
            log::warn!("failed to allocate initial page table, releasing directory {directory}");
            // Safety: we just allocated the frame above and never handed it out
            unsafe { kernel_allocator.deallocate_frame(directory) };
            return Err(PagingError::NoMemory);
        };

        if arch.control_flags().get(ControlFlags::PAGING)
            && !(is_identity_mapped(directory) && is_identity_mapped(initial_table))
        {
            log::warn!(
                "page table frames {directory} and {initial_table} are not identity mapped, releasing them"
            );
            // Safety: we just allocated both frames above and never handed them out
            unsafe {
                process_allocator.deallocate_frame(initial_table);
                kernel_allocator.deallocate_frame(directory);
            }
            return Err(PagingError::NotIdentityMapped);
        }

        log::debug!("new address space: page directory {directory}, page table {initial_table}");

        // Safety: we have just allocated the frame above, we own it, and it is either identity
        // mapped or translation is disabled (checked above).
        let mut table: Table<A, marker::Mut<'_>> =
            unsafe { Table::from_raw_parts(identity_view(initial_table)) };
        table.fill_with(arch, |index| {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "index < ENTRIES_PER_PAGE"
            )]
            let number = index as u32;
            PageTableEntry::new_present(Frame::new(number))
        });

        // Safety: see above
        let mut dir: Table<A, marker::Mut<'_>> =
            unsafe { Table::from_raw_parts(identity_view(directory)) };
        dir.fill_with(arch, |index| match index {
            0 => PageTableEntry::new_present(initial_table),
            RECURSIVE_INDEX => PageTableEntry::new_present(directory),
            _ => PageTableEntry::VACANT,
        });

        Ok(Self {
            directory,
            initial_table,
        })
    }

    /// Constructs an `AddressSpace` from its raw components: the page directory frame and the
    /// page table frame backing the identity mapping.
    ///
    /// # Safety
    ///
    /// The frames must have been obtained from [`AddressSpace::into_raw_parts`].
    pub const unsafe fn from_raw_parts(directory: Frame, initial_table: Frame) -> Self {
        Self {
            directory,
            initial_table,
        }
    }

    /// Decomposes an `AddressSpace` into its raw components: the page directory frame and the
    /// page table frame backing the identity mapping.
    pub const fn into_raw_parts(self) -> (Frame, Frame) {
        (self.directory, self.initial_table)
    }

    /// Returns the frame holding the page directory.
    pub const fn directory_frame(&self) -> Frame {
        self.directory
    }

    /// Returns the physical address of the page directory, the value that is loaded into `CR3`.
    pub const fn directory_address(&self) -> PhysicalAddress {
        self.directory.start_address()
    }

    /// Returns the frame holding the page table that identity maps the first 4MiB.
    pub const fn initial_table_frame(&self) -> Frame {
        self.initial_table
    }
}

fn identity_view(frame: Frame) -> VirtualAddress {
    VirtualAddress::new(frame.start_address().get())
}

fn is_identity_mapped(frame: Frame) -> bool {
    (frame.start_address().get() as usize) < DIRECTORY_SPAN
}
