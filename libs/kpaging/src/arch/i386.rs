// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::arch::asm;

use crate::address::PAGE_ALIGN;
use crate::{Arch, ControlFlags, PhysicalAddress, VirtualAddress};

macro_rules! read_cr {
    ($name:ident, $cr:literal) => {
        #[inline]
        fn $name() -> u32 {
            let r: u32;
            // Safety: reading a control register has no side effects.
            unsafe {
                asm!(concat!("mov {0}, ", $cr), out(reg) r, options(nomem, nostack, preserves_flags));
            }
            r
        }
    };
}

macro_rules! write_cr {
    ($name:ident, $cr:literal) => {
        #[inline]
        unsafe fn $name(bits: u32) {
            // Safety: ensured by the caller.
            unsafe {
                asm!(concat!("mov ", $cr, ", {0}"), in(reg) bits, options(nostack, preserves_flags));
            }
        }
    };
}

read_cr!(read_cr0, "cr0");
write_cr!(write_cr0, "cr0");
read_cr!(read_cr2, "cr2");
read_cr!(read_cr3, "cr3");
write_cr!(write_cr3, "cr3");

/// The register primitives of a real i386 CPU.
#[derive(Debug, Default, Clone, Copy)]
pub struct I386;

impl Arch for I386 {
    fn fault_address(&self) -> VirtualAddress {
        VirtualAddress::new(read_cr2())
    }

    fn active_table(&self) -> PhysicalAddress {
        // the low 12 bits hold the PWT/PCD flags
        PhysicalAddress::new(read_cr3()).align_down(PAGE_ALIGN)
    }

    unsafe fn set_active_table(&self, address: PhysicalAddress) {
        debug_assert!(address.is_aligned_to(PAGE_ALIGN));

        // Safety: ensured by the caller.
        unsafe { write_cr3(address.get()) }
    }

    fn control_flags(&self) -> ControlFlags {
        ControlFlags::from_bits(read_cr0())
    }

    unsafe fn set_control_flags(&self, flags: ControlFlags) {
        // Safety: ensured by the caller.
        unsafe { write_cr0(flags.bits()) }
    }
}
