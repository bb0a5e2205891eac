// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII region guard that returns memory to the manager on drop.
//!
//! [`RegionGuard`] pairs a [`MemoryRegion`] with a handle to the
//! [`SharedGraphicsMemoryManager`] that carved it. Dropping the guard frees
//! the region; the borrow checker rules out a second free through the same
//! guard.

use crate::{MemoryRegion, SharedGraphicsMemoryManager};

/// A region that frees itself when dropped.
///
/// # Example
/// ```
/// use graphics_memory::{
///     AllocationOptions, DeviceContext, FreeListAllocatorFactory, ManagerConfig, SharedGraphicsMemoryManager,
/// };
///
/// let manager = SharedGraphicsMemoryManager::new(
///     DeviceContext::host(),
///     ManagerConfig::default(),
///     FreeListAllocatorFactory::new(),
/// )
/// .unwrap();
///
/// let guard = manager.allocate_guarded(&AllocationOptions::new(4096)).unwrap();
/// assert_eq!(manager.allocated_byte_length(), 4096);
/// drop(guard);
/// assert_eq!(manager.allocated_byte_length(), 0);
/// ```
pub struct RegionGuard {
    region: MemoryRegion,
    manager: SharedGraphicsMemoryManager,
    /// Cleared by `into_region`.
    armed: bool,
}

impl RegionGuard {
    pub(crate) fn new(region: MemoryRegion, manager: SharedGraphicsMemoryManager) -> Self {
        Self {
            region,
            manager,
            armed: true,
        }
    }

    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    pub fn byte_length(&self) -> usize {
        self.region().byte_length()
    }

    /// Detaches the region; the caller becomes responsible for freeing it.
    pub fn into_region(mut self) -> MemoryRegion {
        self.armed = false;
        self.region
    }
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.manager.free(self.region) {
            tracing::warn!(
                "region guard could not free {} bytes at {}: {e}",
                self.region.byte_length(),
                self.region.allocator()
            );
        }
    }
}

impl std::fmt::Debug for RegionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionGuard")
            .field("region", &self.region)
            .field("armed", &self.armed)
            .finish()
    }
}
