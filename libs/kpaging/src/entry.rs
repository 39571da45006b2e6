// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{Frame, PhysicalAddress};

mycelium_bitfield::bitfield! {
    /// An i386 page directory or page table entry.
    ///
    /// Directory entries and table entries share this layout: the upper 20 bits hold the number
    /// of the referenced frame (a page table for directory entries, a page for table entries),
    /// the low 12 bits hold flags.
    #[derive(PartialEq, Eq)]
    pub struct PageTableEntry<u32> {
        /// The entry maps a frame. All other bits are ignored by the hardware when clear.
        pub const PRESENT: bool;
        /// Writes through this entry are allowed.
        pub const WRITABLE: bool;
        /// User mode accesses through this entry are allowed. Clear means supervisor only.
        pub const USER: bool;
        /// Write-through caching.
        pub const WRITE_THROUGH: bool;
        /// Caching disabled.
        pub const CACHE_DISABLE: bool;
        /// Set by the hardware when the entry was used for a translation.
        pub const ACCESSED: bool;
        /// Set by the hardware on writes (table entries only).
        pub const DIRTY: bool;
        /// 4MiB page for directory entries, PAT for table entries. Never set by this crate.
        pub const PAGE_SIZE: bool;
        /// Translation is not flushed on `CR3` writes (requires `CR4.PGE`).
        pub const GLOBAL: bool;
        /// Available for use by the kernel.
        pub const SOFTWARE_USE = 3;
        /// The number of the referenced frame.
        pub const FRAME = 20;
    }
}

static_assertions::assert_eq_size!(PageTableEntry, u32);

impl PageTableEntry {
    /// A _not present_ entry.
    ///
    /// The hardware ignores the remaining bits of a not present entry; we keep them at
    /// "writable, supervisor" as a placeholder.
    pub const VACANT: Self = Self::from_bits(0b010);

    /// Returns a present, writable, supervisor-only entry referencing `frame`.
    #[must_use]
    pub fn new_present(frame: Frame) -> Self {
        Self::new()
            .with(Self::PRESENT, true)
            .with(Self::WRITABLE, true)
            .with(Self::FRAME, frame.number())
    }

    /// Returns `true` if the entry maps a frame.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.get(Self::PRESENT)
    }

    /// Returns `true` if writes through this entry are allowed.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.get(Self::WRITABLE)
    }

    /// Returns `true` if user mode may access memory through this entry.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.get(Self::USER)
    }

    /// Returns the frame referenced by this entry.
    ///
    /// The result is meaningless for entries that are not present.
    #[must_use]
    pub fn frame(&self) -> Frame {
        Frame::new(self.get(Self::FRAME))
    }

    /// Returns the physical address referenced by this entry.
    #[must_use]
    pub fn address(&self) -> PhysicalAddress {
        self.frame().start_address()
    }
}
