// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::arch::emulate::{EmulateArch, MachineBuilder};
use crate::frame_alloc::FramePool;
use crate::{AddressSpace, Frame, MIB, Paging, RegionSet, VirtualAddress};

pub(crate) type TestArch = EmulateArch<parking_lot::RawMutex>;
pub(crate) type TestPool = FramePool<parking_lot::RawMutex>;
pub(crate) type TestPaging = Paging<TestArch, TestPool, TestPool, RegionSet>;

pub(crate) struct Setup {
    pub paging: TestPaging,
    pub aspace: AddressSpace,
}

/// A 32 frame machine with a kernel pool owning frames `0..16` and a process pool owning frames
/// `16..32`.
pub(crate) fn parts() -> (TestArch, TestPool, TestPool) {
    let machine = MachineBuilder::new().with_frames(32).finish();

    (
        EmulateArch::new(machine),
        FramePool::new(Frame::new(0), 16),
        FramePool::new(Frame::new(16), 16),
    )
}

/// A configured paging subsystem on top of [`parts`].
///
/// An address space is constructed and loaded, no validator is registered and paging is off.
pub(crate) fn setup() -> Setup {
    let (arch, kernel, process) = parts();

    let mut paging = Paging::configure(arch, kernel, process, 4 * MIB);
    let aspace = paging.new_address_space().unwrap();

    // Safety: paging is disabled
    unsafe { paging.load(&aspace) };

    Setup { paging, aspace }
}

/// Like [`setup`] but with paging enabled and a validator accepting `0x00400000..0x01000000`.
pub(crate) fn setup_enabled() -> Setup {
    let mut setup = setup();

    let mut regions = RegionSet::new();
    regions
        .insert(VirtualAddress::new(0x0040_0000)..VirtualAddress::new(0x0100_0000))
        .unwrap();
    setup.paging.register_region_validator(regions).unwrap();

    // Safety: hosted test, the emulated machine doesn't execute code
    unsafe { setup.paging.enable_paging().unwrap() };

    setup
}
