// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#[cfg(any(test, feature = "emulate"))]
pub mod emulate;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86")] {
        pub mod i386;

        /// The [`Arch`] of the CPU this crate is compiled for.
        pub type DefaultArch = i386::I386;
    }
}

use crate::{PhysicalAddress, VirtualAddress};

/// Architecture-specific address translation primitives.
pub trait Arch {
    /// Returns the virtual address that caused the most recent page fault on the calling CPU
    /// (`CR2`).
    fn fault_address(&self) -> VirtualAddress;

    /// Returns the physical address of the page directory the calling CPU translates through
    /// (`CR3`).
    fn active_table(&self) -> PhysicalAddress;

    /// Sets the translation root of the calling CPU to the page directory at `address`.
    ///
    /// Writing the translation root also flushes all non-global cached translations.
    ///
    /// # Safety
    ///
    /// When translation is enabled, after this method returns every pointer is interpreted
    /// through the new page directory. Accessing memory through pointers that are not mapped
    /// identically in both the old and the new hierarchy (including the instruction pointer)
    /// is Undefined Behaviour.
    unsafe fn set_active_table(&self, address: PhysicalAddress);

    /// Returns the control flags of the calling CPU (`CR0`).
    fn control_flags(&self) -> ControlFlags;

    /// Sets the control flags of the calling CPU.
    ///
    /// # Safety
    ///
    /// Setting [`ControlFlags::PAGING`] turns on address translation: the very next instruction
    /// fetch is translated through the active page directory. The caller must ensure the
    /// currently executing code and its stack are mapped there.
    unsafe fn set_control_flags(&self, flags: ControlFlags);

    /// Reads the value from `address` without moving it. This leaves the memory in `address` unchanged.
    ///
    /// # Safety
    ///
    /// This method largely inherits the safety requirements of [`ptr::read`], namely
    /// behavior is undefined if any of the following conditions are violated:
    ///
    /// - `address` must be valid for reads.
    /// - `address` must be properly aligned.
    /// - `address` must point to a properly initialized value of type T.
    ///
    /// [`ptr::read`]: core::ptr::read()
    unsafe fn read<T>(&self, address: VirtualAddress) -> T {
        // Safety: ensured by the caller.
        unsafe { address.as_ptr().cast::<T>().read_volatile() }
    }

    /// Overwrites the memory location pointed to by `address` with the given value without reading
    /// or dropping the old value.
    ///
    /// # Safety
    ///
    /// This method largely inherits the safety requirements of [`ptr::write`], namely
    /// behavior is undefined if any of the following conditions are violated:
    ///
    /// - `address` must be valid for writes.
    /// - `address` must be properly aligned.
    ///
    /// [`ptr::write`]: core::ptr::write()
    unsafe fn write<T>(&self, address: VirtualAddress, value: T) {
        // Safety: ensured by the caller.
        unsafe { address.as_mut_ptr().cast::<T>().write_volatile(value) }
    }
}

mycelium_bitfield::bitfield! {
    /// The i386 `CR0` control register.
    #[derive(PartialEq, Eq)]
    pub struct ControlFlags<u32> {
        /// Protected mode enable.
        pub const PROTECTED_MODE: bool;
        /// Monitor co-processor.
        pub const MONITOR_COPROCESSOR: bool;
        /// x87 emulation.
        pub const EMULATION: bool;
        /// Task switched.
        pub const TASK_SWITCHED: bool;
        /// Extension type (hardwired to 1 on everything newer than the 386).
        pub const EXTENSION_TYPE: bool;
        /// Native x87 error reporting.
        pub const NUMERIC_ERROR: bool;
        const _RESERVED0 = 10;
        /// Supervisor writes honor read-only pages.
        pub const WRITE_PROTECT: bool;
        const _RESERVED1 = 1;
        /// Alignment checking for user mode.
        pub const ALIGNMENT_MASK: bool;
        const _RESERVED2 = 10;
        /// Not write-through.
        pub const NOT_WRITE_THROUGH: bool;
        /// Cache disable.
        pub const CACHE_DISABLE: bool;
        /// Paging enable. When set, all memory accesses are translated through the page
        /// directory in `CR3`.
        pub const PAGING: bool;
    }
}

static_assertions::assert_eq_size!(ControlFlags, u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_is_bit_31() {
        let flags = ControlFlags::new().with(ControlFlags::PAGING, true);
        assert_eq!(flags.bits(), 0x8000_0000);

        let flags = ControlFlags::from_bits(0x8000_0011);
        assert!(flags.get(ControlFlags::PAGING));
        assert!(flags.get(ControlFlags::PROTECTED_MODE));
        assert!(flags.get(ControlFlags::EXTENSION_TYPE));
        assert!(!flags.get(ControlFlags::WRITE_PROTECT));
    }

    #[test]
    fn write_protect_is_bit_16() {
        let flags = ControlFlags::new().with(ControlFlags::WRITE_PROTECT, true);
        assert_eq!(flags.bits(), 0x0001_0000);
    }
}
