// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The [`MemoryAllocator`] and [`AllocatorFactory`] traits and the bundled
//! free-list backend.

pub mod free_list;

use crate::{AllocationOptions, AllocatorCreateOptions, AllocatorId, DeviceContext, MemoryError, MemoryRegion};
use std::fmt;

pub use free_list::{FreeListAllocator, FreeListAllocatorFactory};

/// One contiguous byte range the manager carves regions from.
///
/// Implementations own their free-list representation. The manager only
/// relies on the sizes reported here and on the `on_free` callback from
/// [`AllocatorCreateOptions`], which every implementation must invoke once
/// per successfully freed region.
pub trait MemoryAllocator: Send + fmt::Debug {
    /// Identity stamped on every region this allocator hands out.
    fn id(&self) -> AllocatorId;

    /// Total bytes managed by this allocator.
    fn byte_length(&self) -> usize;

    /// Bytes covered by live regions.
    fn allocated_byte_length(&self) -> usize;

    /// Number of live regions.
    fn region_count(&self) -> usize;

    /// Length of the largest free span, before alignment.
    fn largest_free_region_byte_length(&self) -> usize;

    /// Whether this allocator was created for a single region.
    fn is_dedicated(&self) -> bool;

    /// Carves a region. `options` has already been validated and carries a
    /// nonzero alignment. Returns `None` when nothing fits.
    fn try_allocate(&mut self, options: &AllocationOptions) -> Option<MemoryRegion>;

    /// Returns a region to the free list.
    fn free(&mut self, region: &MemoryRegion) -> Result<(), MemoryError>;

    /// Resizes the allocator in place. Backends that cannot resize keep the
    /// default, which refuses.
    fn try_set_byte_length(&mut self, _byte_length: usize) -> bool {
        false
    }

    fn free_byte_length(&self) -> usize {
        self.byte_length() - self.allocated_byte_length()
    }

    fn is_empty(&self) -> bool {
        self.region_count() == 0
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo {
            id: self.id(),
            byte_length: self.byte_length(),
            allocated_byte_length: self.allocated_byte_length(),
            largest_free_region_byte_length: self.largest_free_region_byte_length(),
            region_count: self.region_count(),
            is_dedicated: self.is_dedicated(),
        }
    }
}

/// Builds allocators on behalf of a manager.
///
/// Any `Fn(&DeviceContext, AllocatorCreateOptions) -> Result<Box<dyn MemoryAllocator>, MemoryError>`
/// closure is a factory. Returning [`MemoryError::OutOfMemory`] means the
/// device itself is exhausted and is treated as ordinary allocation failure.
pub trait AllocatorFactory: Send + Sync {
    fn create_allocator(
        &self,
        device: &DeviceContext,
        options: AllocatorCreateOptions,
    ) -> Result<Box<dyn MemoryAllocator>, MemoryError>;
}

impl<F> AllocatorFactory for F
where
    F: Fn(&DeviceContext, AllocatorCreateOptions) -> Result<Box<dyn MemoryAllocator>, MemoryError> + Send + Sync,
{
    fn create_allocator(
        &self,
        device: &DeviceContext,
        options: AllocatorCreateOptions,
    ) -> Result<Box<dyn MemoryAllocator>, MemoryError> {
        self(device, options)
    }
}

/// Point-in-time view of one allocator.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AllocatorInfo {
    pub id: AllocatorId,
    pub byte_length: usize,
    pub allocated_byte_length: usize,
    pub largest_free_region_byte_length: usize,
    pub region_count: usize,
    pub is_dedicated: bool,
}

impl AllocatorInfo {
    pub fn free_byte_length(&self) -> usize {
        self.byte_length - self.allocated_byte_length
    }
}
