// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![cfg_attr(not(any(test, feature = "emulate")), no_std)]

//! Two-level (non-PAE) i386 address translation.
//!
//! The crate builds page directories and page tables, switches hardware translation on, and
//! services page faults by lazily allocating frames for pages the first time they are touched.
//!
//! ## Recursive mapping
//!
//! The last entry of every page directory points back at the directory itself. With that entry
//! active, the page table referenced by directory entry `d` is visible at the virtual address
//! `0xFFC00000 | (d << 12)` and the directory itself at `0xFFFFF000`. This lets the fault handler
//! edit page tables through virtual addresses without a general purpose allocator or a
//! physical memory map. See [`recursive`].
//!
//! ## Collaborators
//!
//! - [`FrameAllocator`] hands out physical [`Frame`]s. The subsystem uses two: one for kernel
//!   owned frames (page directories) and one for process owned frames (page tables and pages).
//! - [`RegionValidator`] decides whether a faulting address belongs to a legitimate region.
//! - [`Arch`] wraps the control registers (`CR0`, `CR2`, `CR3`) and raw memory accesses.

mod address;
mod address_space;
pub mod arch;
mod entry;
mod error;
pub mod frame_alloc;
mod paging;
pub mod recursive;
mod region;
pub mod table;
#[cfg(test)]
mod test_utils;

pub use address::{Frame, PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
pub use arch::{Arch, ControlFlags};
pub use entry::PageTableEntry;
pub use error::{PageFaultError, PagingError, RegionError};
pub use frame_alloc::{AllocError, FrameAllocator, FramePool};
pub use paging::{FaultResolution, Paging, handle_page_fault};
pub use region::{DEFAULT_MAX_REGIONS, RegionSet, RegionValidator};
pub use table::Table;

pub const KIB: usize = 1024;
pub const MIB: usize = KIB * 1024;

/// The size of a page (and a frame) in bytes.
pub const PAGE_SIZE: usize = 4 * KIB;
/// The number of entries in a page directory or page table.
pub const ENTRIES_PER_PAGE: usize = 1024;
/// The number of bytes of virtual address space covered by a single page directory entry.
pub const DIRECTORY_SPAN: usize = PAGE_SIZE * ENTRIES_PER_PAGE;
