// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use crate::ENTRIES_PER_PAGE;

/// Number of bits to shift a frame number by to obtain its physical address.
pub(crate) const PAGE_SHIFT: u32 = 12;
/// [`PAGE_SIZE`](crate::PAGE_SIZE) as an alignment for 32-bit addresses.
pub(crate) const PAGE_ALIGN: u32 = 1 << PAGE_SHIFT;
const DIRECTORY_SHIFT: u32 = 22;
const INDEX_MASK: u32 = 0x3ff;
const OFFSET_MASK: u32 = 0xfff;

macro_rules! impl_address {
    ($address_ty:ident) => {
        impl $address_ty {
            pub const MAX: Self = Self(u32::MAX);
            pub const MIN: Self = Self(u32::MIN);

            #[must_use]
            pub const fn new(n: u32) -> Self {
                Self(n)
            }

            #[inline]
            pub const fn get(&self) -> u32 {
                self.0
            }

            #[inline]
            pub fn as_ptr(self) -> *const u8 {
                ::core::ptr::with_exposed_provenance(self.0 as usize)
            }

            #[inline]
            pub fn as_mut_ptr(self) -> *mut u8 {
                ::core::ptr::with_exposed_provenance_mut(self.0 as usize)
            }

            /// Adds an unsigned offset to this address, panicking if overflow occurred.
            #[must_use]
            #[inline]
            pub const fn add(self, offset: u32) -> Self {
                if let Some(n) = self.0.checked_add(offset) {
                    Self(n)
                } else {
                    panic!("attempt to add with overflow")
                }
            }

            #[must_use]
            #[inline]
            pub const fn is_aligned_to(&self, align: u32) -> bool {
                assert!(
                    align.is_power_of_two(),
                    "is_aligned_to: align is not a power-of-two"
                );

                self.0 & (align - 1) == 0
            }

            #[must_use]
            #[inline]
            pub const fn align_up(self, align: u32) -> Self {
                assert!(
                    align.is_power_of_two(),
                    "align_up: align is not a power-of-two"
                );

                let aligned = Self(self.0.wrapping_add(align - 1) & 0u32.wrapping_sub(align));
                debug_assert!(aligned.is_aligned_to(align));
                aligned
            }

            #[must_use]
            #[inline]
            pub const fn align_down(self, align: u32) -> Self {
                assert!(
                    align.is_power_of_two(),
                    "align_down: align is not a power-of-two"
                );

                let aligned = Self(self.0 & 0u32.wrapping_sub(align));
                debug_assert!(aligned.is_aligned_to(align));
                debug_assert!(aligned.0 <= self.0);
                aligned
            }
        }

        impl ::core::fmt::Display for $address_ty {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_fmt(format_args!("{:#010x}", self.0)) // 10 digits to account for the leading 0x
            }
        }

        impl ::core::fmt::Debug for $address_ty {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.debug_tuple(stringify!($address_ty))
                    .field(&format_args!("{:#010x}", self.0))
                    .finish()
            }
        }
    };
}

/// A 32-bit virtual address.
///
/// Under two-level paging a virtual address decomposes into
///
/// ```text
///  31               22 21               12 11                    0
/// +-------------------+-------------------+-----------------------+
/// |  directory index  |    table index    |      page offset      |
/// +-------------------+-------------------+-----------------------+
/// ```
#[repr(transparent)]
#[derive(Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u32);
impl_address!(VirtualAddress);

impl VirtualAddress {
    /// Constructs a virtual address from its page directory index, page table index and offset.
    ///
    /// # Panics
    ///
    /// Panics if either index is `>= ENTRIES_PER_PAGE` or the offset is not within a page.
    #[must_use]
    pub const fn from_indices(directory_index: usize, table_index: usize, offset: usize) -> Self {
        assert!(directory_index < ENTRIES_PER_PAGE);
        assert!(table_index < ENTRIES_PER_PAGE);
        assert!(offset <= OFFSET_MASK as usize);

        #[expect(
            clippy::cast_possible_truncation,
            reason = "all components are bounds checked above"
        )]
        let raw = ((directory_index as u32) << DIRECTORY_SHIFT)
            | ((table_index as u32) << PAGE_SHIFT)
            | offset as u32;

        Self(raw)
    }

    /// Returns the index of the page directory entry covering this address (bits 22-31).
    #[must_use]
    pub const fn directory_index(self) -> usize {
        (self.0 >> DIRECTORY_SHIFT) as usize
    }

    /// Returns the index of the page table entry covering this address (bits 12-21).
    #[must_use]
    pub const fn table_index(self) -> usize {
        ((self.0 >> PAGE_SHIFT) & INDEX_MASK) as usize
    }

    /// Returns the byte offset of this address within its page (bits 0-11).
    #[must_use]
    pub const fn page_offset(self) -> usize {
        (self.0 & OFFSET_MASK) as usize
    }
}

#[repr(transparent)]
#[derive(Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u32);
impl_address!(PhysicalAddress);

/// A physical frame number.
///
/// Frames are page sized, page aligned blocks of physical memory. Multiplying the frame number
/// by the page size yields the frames [`PhysicalAddress`].
#[repr(transparent)]
#[derive(Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Frame(u32);

impl Frame {
    /// The largest frame number addressable with 32-bit physical addresses.
    pub const MAX: Self = Self(u32::MAX >> PAGE_SHIFT);

    /// # Panics
    ///
    /// Panics if the frame would start beyond the 32-bit physical address space.
    #[must_use]
    pub const fn new(number: u32) -> Self {
        assert!(number <= Self::MAX.0, "frame number out of range");
        Self(number)
    }

    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0
    }

    /// Returns the frame containing `address`.
    #[must_use]
    pub const fn containing_address(address: PhysicalAddress) -> Self {
        Self(address.get() >> PAGE_SHIFT)
    }

    /// Returns the physical address of the first byte of this frame.
    #[must_use]
    pub const fn start_address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << PAGE_SHIFT)
    }

    /// Returns the frame `count` frames after this one.
    ///
    /// # Panics
    ///
    /// Panics if the resulting frame is out of range.
    #[must_use]
    pub const fn add(self, count: u32) -> Self {
        if let Some(n) = self.0.checked_add(count) {
            Self::new(n)
        } else {
            panic!("attempt to add with overflow")
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Frame").field(&self.0).finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.0, self.start_address())
    }
}
