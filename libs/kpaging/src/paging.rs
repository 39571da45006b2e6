// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::ops::ControlFlow;

use crate::address::PAGE_ALIGN;
use crate::error::ensure;
use crate::frame_alloc::FrameAllocator;
use crate::recursive::{self, is_recursive_window};
use crate::table::{Table, marker};
use crate::{
    AddressSpace, Arch, ControlFlags, Frame, PageFaultError, PageTableEntry, PagingError,
    PhysicalAddress, RegionValidator, VirtualAddress,
};

/// How a page fault was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResolution {
    /// The page was backed by a freshly allocated frame.
    Mapped {
        /// The frame now backing the faulting page.
        frame: Frame,
        /// Whether the page table covering the page had to be created too.
        table_created: bool,
    },
    /// The page was already mapped, the fault was spurious.
    AlreadyMapped,
}

/// The paging subsystem.
///
/// Holds the collaborators every paging operation needs: the register primitives, the kernel
/// frame allocator (page directories), the process frame allocator (page tables and pages) and
/// the region validator consulted by the fault handler. It also tracks which address space is
/// active and whether translation is turned on.
///
/// All operations take `&mut self`, the subsystem assumes a single logical processor with
/// fault handling serialized by the trap mechanism. Kernels wanting global access should put it
/// behind their own lock.
pub struct Paging<A, K, P, V> {
    arch: A,
    kernel_allocator: K,
    process_allocator: P,
    shared_size: usize,
    region_validator: Option<V>,
    active_directory: Option<Frame>,
    paging_enabled: bool,
}

impl<A, K, P, V> fmt::Debug for Paging<A, K, P, V>
where
    A: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Paging")
            .field("arch", &self.arch)
            .field("shared_size", &self.shared_size)
            .field("has_region_validator", &self.region_validator.is_some())
            .field("active_directory", &self.active_directory)
            .field("paging_enabled", &self.paging_enabled)
            .finish_non_exhaustive()
    }
}

impl<A, K, P, V> Paging<A, K, P, V>
where
    A: Arch,
    K: FrameAllocator,
    P: FrameAllocator,
    V: RegionValidator,
{
    /// Sets up the paging subsystem. Must happen before any address space is constructed.
    ///
    /// `shared_size` is the size of the address space portion shared between all address
    /// spaces, it is recorded for use by the kernel.
    ///
    /// No region validator is registered, no address space is active and translation is off
    /// afterward.
    pub fn configure(
        arch: A,
        kernel_allocator: K,
        process_allocator: P,
        shared_size: usize,
    ) -> Self {
        log::debug!("configuring paging, shared size {shared_size:#x}");

        Self {
            arch,
            kernel_allocator,
            process_allocator,
            shared_size,
            region_validator: None,
            active_directory: None,
            paging_enabled: false,
        }
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    pub fn kernel_allocator(&self) -> &K {
        &self.kernel_allocator
    }

    pub fn process_allocator(&self) -> &P {
        &self.process_allocator
    }

    pub fn shared_size(&self) -> usize {
        self.shared_size
    }

    pub fn region_validator(&self) -> Option<&V> {
        self.region_validator.as_ref()
    }

    /// Returns `true` once [`Paging::enable_paging`] succeeded.
    pub fn is_paging_enabled(&self) -> bool {
        self.paging_enabled
    }

    /// Returns the page directory of the loaded address space, if any.
    pub fn active_directory(&self) -> Option<Frame> {
        self.active_directory
    }

    /// Constructs a new [`AddressSpace`] using this subsystems frame allocators.
    ///
    /// # Errors
    ///
    /// See [`AddressSpace::new`].
    pub fn new_address_space(&self) -> Result<AddressSpace, PagingError> {
        AddressSpace::new(
            &self.arch,
            self.kernel_allocator.by_ref(),
            self.process_allocator.by_ref(),
        )
    }

    /// Registers the validator consulted by the fault handler.
    ///
    /// # Errors
    ///
    /// Returns `Err(PagingError::ValidatorAlreadyRegistered)` if a validator is already
    /// registered, the registered validator is kept in that case.
    pub fn register_region_validator(&mut self, validator: V) -> Result<(), PagingError> {
        ensure!(
            self.region_validator.is_none(),
            PagingError::ValidatorAlreadyRegistered
        );

        log::debug!("registered region validator");
        self.region_validator = Some(validator);

        Ok(())
    }

    /// Registers `validator`, returning the previously registered validator.
    pub fn replace_region_validator(&mut self, validator: V) -> Option<V> {
        log::debug!("replacing region validator");
        self.region_validator.replace(validator)
    }

    /// Makes `aspace` the active address space.
    ///
    /// Before translation is enabled this only records the address space for
    /// [`Paging::enable_paging`]. Afterward it also switches the translation root to it.
    ///
    /// # Safety
    ///
    /// `aspace` must stay alive for as long as it is active. When translation is enabled, every
    /// pointer is interpreted through the new hierarchy after this returns, accessing memory
    /// that isn't mapped identically in both hierarchies (including the currently executing
    /// code and its stack) is Undefined Behaviour.
    pub unsafe fn load(&mut self, aspace: &AddressSpace) {
        log::debug!("loading address space {}", aspace.directory_frame());

        self.active_directory = Some(aspace.directory_frame());

        if self.paging_enabled {
            // Safety: ensured by the caller
            unsafe { self.arch.set_active_table(aspace.directory_address()) };
        }
    }

    /// Turns on hardware translation through the loaded address space.
    ///
    /// # Errors
    ///
    /// Returns `Err(PagingError::NoActiveAddressSpace)` when no address space was loaded.
    ///
    /// # Safety
    ///
    /// The currently executing code and its stack must be mapped identically by the loaded
    /// address space, i.e. live in the identity mapped first 4MiB.
    pub unsafe fn enable_paging(&mut self) -> Result<(), PagingError> {
        let directory = self
            .active_directory
            .ok_or(PagingError::NoActiveAddressSpace)?;

        self.paging_enabled = true;

        // Safety: ensured by the caller
        unsafe {
            self.arch.set_active_table(directory.start_address());
            self.arch.set_control_flags(
                self.arch
                    .control_flags()
                    .with(ControlFlags::PAGING, true),
            );
        }

        log::debug!("paging enabled, page directory {directory}");

        Ok(())
    }

    /// Resolves the page fault at the address reported by the hardware.
    ///
    /// If the faulting address belongs to a legitimate region, the missing page table (if any)
    /// and the missing page are backed by frames from the process allocator. New page tables
    /// start out with all entries not present.
    ///
    /// # Errors
    ///
    /// - [`PageFaultError::PagingDisabled`] if translation is off.
    /// - [`PageFaultError::NoRegionValidator`] if no validator is registered.
    /// - [`PageFaultError::ProtectionViolation`] if the validator rejects the address or the
    ///   address lies inside the recursive window. Nothing is changed in that case.
    /// - [`PageFaultError::OutOfFrames`] if the process allocator is exhausted. A page table
    ///   created before the allocator ran out stays installed.
    pub fn handle_fault(&mut self) -> Result<FaultResolution, PageFaultError> {
        let address = self.arch.fault_address();

        ensure!(
            self.paging_enabled && self.active_directory.is_some(),
            PageFaultError::PagingDisabled
        );

        let Some(validator) = self.region_validator.as_ref() else {
            log::warn!("page fault at {address} but no region validator is registered");
            return Err(PageFaultError::NoRegionValidator { address });
        };

        if is_recursive_window(address) || !validator.is_legitimate(address) {
            log::warn!("protection violation at {address}");
            return Err(PageFaultError::ProtectionViolation { address });
        }

        let directory_index = address.directory_index();
        let table_index = address.table_index();
        log::trace!("page fault at {address} (directory {directory_index}, table {table_index})");

        // Safety: translation is enabled and the active directory carries the recursive entry
        let mut directory: Table<A, marker::Mut<'_>> =
            unsafe { Table::from_raw_parts(recursive::directory_view()) };

        let mut table_created = false;
        if !directory.get(directory_index, &self.arch).is_present() {
            let frame = self
                .process_allocator
                .allocate_frame()
                .map_err(|_| PageFaultError::OutOfFrames { address })?;

            log::trace!("new page table {frame} for directory entry {directory_index}");
            directory.set(directory_index, PageTableEntry::new_present(frame), &self.arch);

            // Safety: the directory entry is present now, so the window shows the new table
            let mut table: Table<A, marker::Mut<'_>> =
                unsafe { Table::from_raw_parts(recursive::table_view_for(directory_index)) };
            table.fill_with(&self.arch, |_| PageTableEntry::VACANT);

            table_created = true;
        }

        // Safety: the directory entry is present
        let mut table: Table<A, marker::Mut<'_>> =
            unsafe { Table::from_raw_parts(recursive::table_view_for(directory_index)) };

        if table.get(table_index, &self.arch).is_present() {
            log::trace!("{address} is already mapped");
            return Ok(FaultResolution::AlreadyMapped);
        }

        let frame = self
            .process_allocator
            .allocate_frame()
            .map_err(|_| PageFaultError::OutOfFrames { address })?;
        table.set(table_index, PageTableEntry::new_present(frame), &self.arch);

        log::trace!("mapped {} to frame {frame}", address.align_down(PAGE_ALIGN));

        Ok(FaultResolution::Mapped {
            frame,
            table_created,
        })
    }

    /// Translates `address` through the active hierarchy in software.
    ///
    /// Returns `None` when translation is off or `address` is not mapped.
    pub fn lookup(&self, address: VirtualAddress) -> Option<PhysicalAddress> {
        if !self.paging_enabled || self.active_directory.is_none() {
            return None;
        }

        // Safety: translation is enabled and the active directory carries the recursive entry
        let directory: Table<A, marker::Immut<'_>> =
            unsafe { Table::from_raw_parts(recursive::directory_view()) };
        if !directory.get(address.directory_index(), &self.arch).is_present() {
            return None;
        }

        // Safety: the directory entry is present
        let table: Table<A, marker::Immut<'_>> =
            unsafe { Table::from_raw_parts(recursive::table_view_for(address.directory_index())) };
        let entry = table.get(address.table_index(), &self.arch);

        #[expect(
            clippy::cast_possible_truncation,
            reason = "page offsets always fit into 12 bits"
        )]
        let offset = address.page_offset() as u32;

        entry.is_present().then(|| entry.address().add(offset))
    }

    /// Returns `frame` to the process frame allocator.
    ///
    /// Page table entries referencing `frame` are left untouched.
    ///
    /// # Safety
    ///
    /// `frame` must have been allocated from the process allocator, and no present page table
    /// entry may reference it anymore. An entry still pointing at a released frame gives every
    /// later owner of that frame an alias through the stale mapping.
    pub unsafe fn free_page(&self, frame: Frame) {
        log::trace!("releasing page frame {frame}");

        // Safety: ensured by the caller
        unsafe { self.process_allocator.deallocate_frame(frame) }
    }
}

/// Page fault trap glue.
///
/// Returns `ControlFlow::Break` when the fault was corrected and the faulting instruction can be
/// retried, `ControlFlow::Continue` when the next fault handler should deal with it.
pub fn handle_page_fault<A, K, P, V>(paging: &mut Paging<A, K, P, V>) -> ControlFlow<()>
where
    A: Arch,
    K: FrameAllocator,
    P: FrameAllocator,
    V: RegionValidator,
{
    match paging.handle_fault() {
        Ok(resolution) => {
            log::trace!("page fault handler successfully corrected fault {resolution:?}");
            ControlFlow::Break(())
        }
        Err(err) => {
            log::warn!("page fault handler couldn't correct fault {err}");
            ControlFlow::Continue(())
        }
    }
}
