// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt::{Display, Formatter};

use crate::VirtualAddress;
use crate::frame_alloc::AllocError;

/// Errors returned by the configuration and activation operations of [`Paging`](crate::Paging).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// Paging was enabled before an address space was loaded.
    NoActiveAddressSpace,
    /// A region validator is already registered.
    ValidatorAlreadyRegistered,
    /// The system was not able to allocate memory needed for the operation.
    NoMemory,
    /// Page table frames lie outside the identity mapped first 4MiB while translation is on.
    NotIdentityMapped,
}

impl From<AllocError> for PagingError {
    fn from(_: AllocError) -> Self {
        PagingError::NoMemory
    }
}

impl Display for PagingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            PagingError::NoActiveAddressSpace => {
                write!(f, "Attempted to enable paging without a loaded address space")
            }
            PagingError::ValidatorAlreadyRegistered => {
                write!(f, "A region validator is already registered")
            }
            PagingError::NoMemory => write!(
                f,
                "The system was not able to allocate memory needed for the operation"
            ),
            PagingError::NotIdentityMapped => write!(
                f,
                "Page table frames must be identity mapped while paging is enabled"
            ),
        }
    }
}

impl core::error::Error for PagingError {}

/// Reasons a page fault could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFaultError {
    /// The faulting address is not part of any legitimate region of the active address space.
    ProtectionViolation { address: VirtualAddress },
    /// The process frame allocator is exhausted.
    OutOfFrames { address: VirtualAddress },
    /// No region validator was registered, so no fault can be resolved.
    NoRegionValidator { address: VirtualAddress },
    /// A fault was reported while translation is disabled.
    PagingDisabled,
}

impl PageFaultError {
    /// Returns the faulting address, if known.
    pub fn address(&self) -> Option<VirtualAddress> {
        match self {
            PageFaultError::ProtectionViolation { address }
            | PageFaultError::OutOfFrames { address }
            | PageFaultError::NoRegionValidator { address } => Some(*address),
            PageFaultError::PagingDisabled => None,
        }
    }
}

impl Display for PageFaultError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            PageFaultError::ProtectionViolation { address } => {
                write!(f, "Protection violation at {address}")
            }
            PageFaultError::OutOfFrames { address } => write!(
                f,
                "Out of physical frames while resolving page fault at {address}"
            ),
            PageFaultError::NoRegionValidator { address } => write!(
                f,
                "Page fault at {address} but no region validator is registered"
            ),
            PageFaultError::PagingDisabled => {
                write!(f, "Page fault reported while paging is disabled")
            }
        }
    }
}

impl core::error::Error for PageFaultError {}

/// Errors returned by [`RegionSet::insert`](crate::RegionSet::insert).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// The region overlaps an already registered region.
    Overlap,
    /// The region is empty.
    Empty,
    /// The region bounds are not page aligned.
    Unaligned,
    /// The set is full.
    CapacityExceeded,
}

impl Display for RegionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            RegionError::Overlap => write!(f, "Region overlaps an existing region"),
            RegionError::Empty => write!(f, "Region is empty"),
            RegionError::Unaligned => write!(f, "Region bounds are not page aligned"),
            RegionError::CapacityExceeded => write!(f, "Region set is full"),
        }
    }
}

impl core::error::Error for RegionError {}

macro_rules! ensure {
    ($cond:expr, $error:expr) => {
        if !$cond {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
