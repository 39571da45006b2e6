// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! An emulated i386 MMU for hosted tests.
//!
//! [`Machine`] models a single CPU with the three control registers this crate touches and a
//! block of physical memory starting at physical address `0`. Once [`ControlFlags::PAGING`] is set,
//! every access through [`EmulateArch`] is translated by walking the page directory in `CR3`,
//! exactly like the hardware page walker would (including the recursive directory entry).

use core::fmt;
use core::marker::PhantomData;

use lock_api::Mutex;

use crate::{
    Arch, ControlFlags, ENTRIES_PER_PAGE, Frame, PAGE_SIZE, PageTableEntry, PhysicalAddress,
    VirtualAddress,
};

/// [`Arch`] implementation backed by an emulated [`Machine`].
pub struct EmulateArch<R: lock_api::RawMutex> {
    machine: Machine<R>,
}

impl<R: lock_api::RawMutex> fmt::Debug for EmulateArch<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulateArch")
            .field("machine", &self.machine)
            .finish()
    }
}

impl<R: lock_api::RawMutex> EmulateArch<R> {
    pub fn new(machine: Machine<R>) -> Self {
        Self { machine }
    }

    pub fn machine(&self) -> &Machine<R> {
        &self.machine
    }
}

impl<R: lock_api::RawMutex> Arch for EmulateArch<R> {
    fn fault_address(&self) -> VirtualAddress {
        self.machine.fault_address()
    }

    fn active_table(&self) -> PhysicalAddress {
        self.machine.active_table()
    }

    unsafe fn set_active_table(&self, address: PhysicalAddress) {
        self.machine.set_active_table(address);
    }

    fn control_flags(&self) -> ControlFlags {
        self.machine.control_flags()
    }

    unsafe fn set_control_flags(&self, flags: ControlFlags) {
        self.machine.set_control_flags(flags);
    }

    unsafe fn read<T>(&self, address: VirtualAddress) -> T {
        // Safety: ensured by the caller
        unsafe { self.machine.read(address) }
    }

    unsafe fn write<T>(&self, address: VirtualAddress, value: T) {
        // Safety: ensured by the caller
        unsafe { self.machine.write(address, value) }
    }
}

pub struct Machine<R: lock_api::RawMutex> {
    memory: Mutex<R, Memory>,
    cpu: Mutex<R, Cpu>,
}

#[derive(Debug, Clone, Copy)]
struct Cpu {
    cr0: ControlFlags,
    cr2: VirtualAddress,
    cr3: PhysicalAddress,
}

impl Cpu {
    /// The register state right after the boot loader switched to protected mode.
    fn new() -> Self {
        Self {
            cr0: ControlFlags::new()
                .with(ControlFlags::PROTECTED_MODE, true)
                .with(ControlFlags::EXTENSION_TYPE, true),
            cr2: VirtualAddress::MIN,
            cr3: PhysicalAddress::MIN,
        }
    }
}

impl<R: lock_api::RawMutex> fmt::Debug for Machine<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("memory", &*self.memory.lock())
            .field("cpu", &*self.cpu.lock())
            .finish()
    }
}

impl<R: lock_api::RawMutex> Machine<R> {
    /// Translates `address` the way the hardware would.
    ///
    /// Returns the address itself while paging is disabled and `None` if the translation
    /// hits a not present entry.
    pub fn translate(&self, address: VirtualAddress) -> Option<PhysicalAddress> {
        let cpu = *self.cpu.lock();

        if !cpu.cr0.get(ControlFlags::PAGING) {
            return Some(PhysicalAddress::new(address.get()));
        }

        let memory = self.memory.lock();

        let pde_address = cpu.cr3.add(entry_offset(address.directory_index()));
        // Safety: page table entries are plain integers
        let pde: PageTableEntry = unsafe { memory.read(pde_address) };
        if !pde.is_present() {
            return None;
        }

        let pte_address = pde.address().add(entry_offset(address.table_index()));
        // Safety: page table entries are plain integers
        let pte: PageTableEntry = unsafe { memory.read(pte_address) };
        if !pte.is_present() {
            return None;
        }

        #[expect(
            clippy::cast_possible_truncation,
            reason = "page offsets always fit into 12 bits"
        )]
        let offset = address.page_offset() as u32;

        Some(pte.address().add(offset))
    }

    /// Performs an access to `address` like an instruction would.
    ///
    /// If the translation fails the faulting address is latched into the fault address register
    /// and returned as the error, the caller is expected to run the fault handler and retry.
    ///
    /// # Errors
    ///
    /// Returns the faulting address if `address` is not mapped.
    pub fn access(&self, address: VirtualAddress) -> Result<PhysicalAddress, VirtualAddress> {
        if let Some(phys) = self.translate(address) {
            Ok(phys)
        } else {
            log::trace!("page fault at {address}");
            self.raise_page_fault(address);
            Err(address)
        }
    }

    /// Latches `address` into the fault address register, as if an access to it had faulted.
    pub fn raise_page_fault(&self, address: VirtualAddress) {
        self.cpu.lock().cr2 = address;
    }

    pub unsafe fn read<T>(&self, address: VirtualAddress) -> T {
        assert!(address.is_aligned_to(align_of::<T>().try_into().unwrap()));

        if let Some(phys) = self.translate(address) {
            // Safety: ensured by the caller
            unsafe { self.read_phys(phys) }
        } else {
            core::panic!("read: {address} size {:#x} not present", size_of::<T>());
        }
    }

    pub unsafe fn write<T>(&self, address: VirtualAddress, value: T) {
        assert!(address.is_aligned_to(align_of::<T>().try_into().unwrap()));

        if let Some(phys) = self.translate(address) {
            // Safety: ensured by the caller
            unsafe { self.write_phys(phys, value) }
        } else {
            core::panic!("write: {address} size {:#x} not present", size_of::<T>());
        }
    }

    pub unsafe fn read_phys<T>(&self, address: PhysicalAddress) -> T {
        // Safety: ensured by the caller
        unsafe { self.memory.lock().read(address) }
    }

    pub unsafe fn write_phys<T>(&self, address: PhysicalAddress, value: T) {
        // Safety: ensured by the caller
        unsafe { self.memory.lock().write(address, value) }
    }

    /// Reads the entry at `index` of the page directory or page table stored in `frame`,
    /// bypassing translation.
    pub fn entry(&self, frame: Frame, index: usize) -> PageTableEntry {
        assert!(index < ENTRIES_PER_PAGE);

        // Safety: page table entries are plain integers
        unsafe { self.read_phys(frame.start_address().add(entry_offset(index))) }
    }

    /// Returns a copy of the entire physical memory.
    pub fn snapshot(&self) -> Box<[u8]> {
        self.memory.lock().bytes.clone()
    }

    /// Returns the number of frames of physical memory.
    pub fn frames(&self) -> usize {
        self.memory.lock().bytes.len() / PAGE_SIZE
    }

    pub fn fault_address(&self) -> VirtualAddress {
        self.cpu.lock().cr2
    }

    pub fn active_table(&self) -> PhysicalAddress {
        self.cpu.lock().cr3
    }

    pub fn set_active_table(&self, address: PhysicalAddress) {
        log::trace!("CR3 <- {address}");
        self.cpu.lock().cr3 = address;
    }

    pub fn control_flags(&self) -> ControlFlags {
        self.cpu.lock().cr0
    }

    pub fn set_control_flags(&self, flags: ControlFlags) {
        log::trace!("CR0 <- {:#010x}", flags.bits());
        self.cpu.lock().cr0 = flags;
    }

    pub fn is_paging_enabled(&self) -> bool {
        self.control_flags().get(ControlFlags::PAGING)
    }
}

fn entry_offset(index: usize) -> u32 {
    u32::try_from(index * size_of::<PageTableEntry>()).unwrap()
}

struct Memory {
    bytes: Box<[u8]>,
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("size", &format_args!("{:#x}", self.bytes.len()))
            .finish()
    }
}

impl Memory {
    fn new(size: usize) -> Self {
        Self {
            bytes: vec![0u8; size].into_boxed_slice(),
        }
    }

    unsafe fn read<T>(&self, address: PhysicalAddress) -> T {
        let size = size_of::<T>();
        let offset = address.get() as usize;

        if offset + size <= self.bytes.len() {
            // Safety: bounds checked above, ensured by the caller otherwise
            unsafe { self.bytes.as_ptr().add(offset).cast::<T>().read_unaligned() }
        } else {
            core::panic!("Memory::read: {address} size {size:#x} outside of memory ({self:?})");
        }
    }

    unsafe fn write<T>(&mut self, address: PhysicalAddress, value: T) {
        let size = size_of::<T>();
        let offset = address.get() as usize;

        if offset + size <= self.bytes.len() {
            // Safety: bounds checked above, ensured by the caller otherwise
            unsafe {
                self.bytes
                    .as_mut_ptr()
                    .add(offset)
                    .cast::<T>()
                    .write_unaligned(value);
            }
        } else {
            core::panic!("Memory::write: {address} size {size:#x} outside of memory ({self:?})");
        }
    }
}

pub struct MissingMemory;
pub struct HasMemory;

pub struct MachineBuilder<Mem> {
    memory: Option<Memory>,
    _has: PhantomData<Mem>,
}

impl MachineBuilder<MissingMemory> {
    pub const fn new() -> Self {
        Self {
            memory: None,
            _has: PhantomData,
        }
    }

    /// Backs the machine with `frames` frames of zeroed physical memory starting at physical
    /// address `0`.
    pub fn with_frames(self, frames: usize) -> MachineBuilder<HasMemory> {
        assert!(frames > 0, "you must specify at least one frame of memory");

        MachineBuilder {
            memory: Some(Memory::new(frames * PAGE_SIZE)),
            _has: PhantomData,
        }
    }
}

impl Default for MachineBuilder<MissingMemory> {
    fn default() -> Self {
        Self::new()
    }
}

impl MachineBuilder<HasMemory> {
    pub fn finish<R: lock_api::RawMutex>(self) -> Machine<R> {
        Machine {
            memory: Mutex::new(self.memory.unwrap()),
            cpu: Mutex::new(Cpu::new()),
        }
    }
}
