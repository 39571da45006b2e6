// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The recursive page directory mapping.
//!
//! Every page directory built by this crate maps itself in its last entry. When the hardware
//! walks an address whose directory index is [`RECURSIVE_INDEX`] it reads the directory a second
//! time as if it were a page table, so the top 4MiB of the virtual address space become a window
//! onto all page tables of the active hierarchy:
//!
//! ```text
//! 0xFFC00000 | (d << 12)   page table referenced by directory entry d
//! 0xFFFFF000               the page directory itself (d = 1023)
//! ```

use crate::{ENTRIES_PER_PAGE, VirtualAddress};

/// The directory entry that maps the directory itself.
pub const RECURSIVE_INDEX: usize = ENTRIES_PER_PAGE - 1;

/// Start of the 4MiB window through which all page tables are visible.
pub const TABLE_WINDOW_BASE: VirtualAddress = VirtualAddress::from_indices(RECURSIVE_INDEX, 0, 0);

/// The address the active page directory is visible at.
pub const DIRECTORY_WINDOW: VirtualAddress =
    VirtualAddress::from_indices(RECURSIVE_INDEX, RECURSIVE_INDEX, 0);

/// Returns the virtual address of the page table referenced by directory entry `directory_index`
/// of the active page directory.
///
/// The result is only dereferenceable while translation is enabled, the active directory has its
/// recursive entry installed and directory entry `directory_index` is present.
///
/// # Panics
///
/// Panics if `directory_index >= ENTRIES_PER_PAGE`.
#[must_use]
pub const fn table_view_for(directory_index: usize) -> VirtualAddress {
    assert!(directory_index < ENTRIES_PER_PAGE);

    VirtualAddress::from_indices(RECURSIVE_INDEX, directory_index, 0)
}

/// Returns the virtual address of the active page directory.
#[must_use]
pub const fn directory_view() -> VirtualAddress {
    DIRECTORY_WINDOW
}

/// Returns `true` if `address` lies inside the recursive window, i.e. it addresses page table
/// memory instead of a regular page.
#[must_use]
pub const fn is_recursive_window(address: VirtualAddress) -> bool {
    address.directory_index() == RECURSIVE_INDEX
}
