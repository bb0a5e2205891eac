// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Configuration-selected synchronization mode.
//!
//! [`MemoryManagerHandle`] reads [`ManagerConfig::externally_synchronized`]
//! once, at construction, and holds either an owned manager or a shared one.
//! Callers that decide the mode at runtime use this type; callers that know
//! it statically use [`GraphicsMemoryManager`] or
//! [`SharedGraphicsMemoryManager`] directly.

use crate::{
    AllocationOptions, AllocatorFactory, DeviceContext, GraphicsMemoryManager, ManagerConfig, ManagerStats,
    MemoryError, MemoryManagerInfo, MemoryRegion, SharedGraphicsMemoryManager,
};

/// A manager in whichever synchronization mode the configuration asked for.
#[derive(Debug)]
pub enum MemoryManagerHandle {
    /// No locking; the caller serializes access.
    Exclusive(GraphicsMemoryManager),
    /// One mutex per manager.
    Shared(SharedGraphicsMemoryManager),
}

impl MemoryManagerHandle {
    pub fn new(
        device: DeviceContext,
        config: ManagerConfig,
        factory: impl AllocatorFactory + 'static,
    ) -> Result<Self, MemoryError> {
        let externally_synchronized = config.externally_synchronized;
        let manager = GraphicsMemoryManager::new(device, config, factory)?;
        tracing::debug!(
            "{} uses {} synchronization",
            manager.device(),
            if externally_synchronized { "external" } else { "internal" }
        );
        Ok(if externally_synchronized {
            Self::Exclusive(manager)
        } else {
            Self::Shared(SharedGraphicsMemoryManager::from_manager(manager))
        })
    }

    pub fn is_externally_synchronized(&self) -> bool {
        matches!(self, Self::Exclusive(_))
    }

    /// Returns a cloneable shared manager, if this handle is internally synchronized.
    pub fn as_shared(&self) -> Option<&SharedGraphicsMemoryManager> {
        match self {
            Self::Shared(shared) => Some(shared),
            Self::Exclusive(_) => None,
        }
    }

    pub fn allocate(&mut self, options: &AllocationOptions) -> Result<MemoryRegion, MemoryError> {
        match self {
            Self::Exclusive(m) => m.allocate(options),
            Self::Shared(m) => m.allocate(options),
        }
    }

    pub fn try_allocate(&mut self, options: &AllocationOptions) -> Result<Option<MemoryRegion>, MemoryError> {
        match self {
            Self::Exclusive(m) => m.try_allocate(options),
            Self::Shared(m) => m.try_allocate(options),
        }
    }

    pub fn try_allocate_batch(
        &mut self,
        requests: &[AllocationOptions],
        destination: &mut [Option<MemoryRegion>],
    ) -> Result<bool, MemoryError> {
        match self {
            Self::Exclusive(m) => m.try_allocate_batch(requests, destination),
            Self::Shared(m) => m.try_allocate_batch(requests, destination),
        }
    }

    pub fn free(&mut self, region: MemoryRegion) -> Result<(), MemoryError> {
        match self {
            Self::Exclusive(m) => m.free(region),
            Self::Shared(m) => m.free(region),
        }
    }

    pub fn try_set_minimum_byte_length(&mut self, minimum_byte_length: usize) -> Result<bool, MemoryError> {
        match self {
            Self::Exclusive(m) => m.try_set_minimum_byte_length(minimum_byte_length),
            Self::Shared(m) => m.try_set_minimum_byte_length(minimum_byte_length),
        }
    }

    pub fn dispose(&mut self) {
        match self {
            Self::Exclusive(m) => m.dispose(),
            Self::Shared(m) => m.dispose(),
        }
    }

    pub fn byte_length(&self) -> usize {
        match self {
            Self::Exclusive(m) => m.byte_length(),
            Self::Shared(m) => m.byte_length(),
        }
    }

    pub fn allocated_byte_length(&self) -> usize {
        match self {
            Self::Exclusive(m) => m.allocated_byte_length(),
            Self::Shared(m) => m.allocated_byte_length(),
        }
    }

    pub fn free_byte_length(&self) -> usize {
        match self {
            Self::Exclusive(m) => m.free_byte_length(),
            Self::Shared(m) => m.free_byte_length(),
        }
    }

    pub fn operation_count(&self) -> u64 {
        match self {
            Self::Exclusive(m) => m.operation_count(),
            Self::Shared(m) => m.operation_count(),
        }
    }

    pub fn stats(&self) -> ManagerStats {
        match self {
            Self::Exclusive(m) => m.stats().clone(),
            Self::Shared(m) => m.stats(),
        }
    }

    pub fn info(&self) -> MemoryManagerInfo {
        match self {
            Self::Exclusive(m) => m.info(),
            Self::Shared(m) => m.info(),
        }
    }

    pub fn validate_integrity(&self) -> Result<(), MemoryError> {
        match self {
            Self::Exclusive(m) => m.validate_integrity(),
            Self::Shared(m) => m.validate_integrity(),
        }
    }
}
