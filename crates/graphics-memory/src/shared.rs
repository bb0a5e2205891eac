// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Internally synchronized manager.
//!
//! [`SharedGraphicsMemoryManager`] puts a [`GraphicsMemoryManager`] behind one
//! mutex. Every entry point holds the lock for its whole duration, so
//! allocator selection, growth, creation and carving are atomic with respect
//! to other callers. Clones share the same pool.
//!
//! # Thread Safety
//! `SharedGraphicsMemoryManager` is `Send + Sync` and cheap to clone. A
//! poisoned lock is recovered rather than propagated: the manager keeps its
//! counters consistent at every return point, including unwinding ones.

use crate::{
    AllocationOptions, AllocatorFactory, DeviceContext, GraphicsMemoryManager, ManagerConfig, ManagerStats,
    MemoryError, MemoryManagerInfo, MemoryRegion, RegionGuard,
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A graphics memory manager shareable across threads.
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
/// let worker = manager.clone();
/// std::thread::spawn(move || {
///     let region = worker.allocate(&AllocationOptions::new(4096)).unwrap();
///     worker.free(region).unwrap();
/// })
/// .join()
/// .unwrap();
///
/// assert_eq!(manager.allocated_byte_length(), 0);
/// assert_eq!(manager.operation_count(), 2);
/// ```
#[derive(Clone)]
pub struct SharedGraphicsMemoryManager {
    inner: Arc<Mutex<GraphicsMemoryManager>>,
}

impl SharedGraphicsMemoryManager {
    pub fn new(
        device: DeviceContext,
        config: ManagerConfig,
        factory: impl AllocatorFactory + 'static,
    ) -> Result<Self, MemoryError> {
        GraphicsMemoryManager::new(device, config, factory).map(Self::from_manager)
    }

    /// Moves an existing manager behind a lock.
    pub fn from_manager(manager: GraphicsMemoryManager) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GraphicsMemoryManager> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn allocate(&self, options: &AllocationOptions) -> Result<MemoryRegion, MemoryError> {
        self.lock().allocate(options)
    }

    pub fn try_allocate(&self, options: &AllocationOptions) -> Result<Option<MemoryRegion>, MemoryError> {
        self.lock().try_allocate(options)
    }

    /// Allocates a region that frees itself when the guard is dropped.
    pub fn allocate_guarded(&self, options: &AllocationOptions) -> Result<RegionGuard, MemoryError> {
        let region = self.allocate(options)?;
        Ok(RegionGuard::new(region, self.clone()))
    }

    /// See [`GraphicsMemoryManager::try_allocate_batch`]. The whole batch runs
    /// under one lock acquisition.
    pub fn try_allocate_batch(
        &self,
        requests: &[AllocationOptions],
        destination: &mut [Option<MemoryRegion>],
    ) -> Result<bool, MemoryError> {
        self.lock().try_allocate_batch(requests, destination)
    }

    pub fn free(&self, region: MemoryRegion) -> Result<(), MemoryError> {
        self.lock().free(region)
    }

    pub fn try_set_minimum_byte_length(&self, minimum_byte_length: usize) -> Result<bool, MemoryError> {
        self.lock().try_set_minimum_byte_length(minimum_byte_length)
    }

    /// Disposes the pool for every clone.
    pub fn dispose(&self) {
        self.lock().dispose();
    }

    pub fn device(&self) -> DeviceContext {
        self.lock().device().clone()
    }

    pub fn byte_length(&self) -> usize {
        self.lock().byte_length()
    }

    pub fn minimum_byte_length(&self) -> usize {
        self.lock().minimum_byte_length()
    }

    pub fn allocated_byte_length(&self) -> usize {
        self.lock().allocated_byte_length()
    }

    pub fn free_byte_length(&self) -> usize {
        self.lock().free_byte_length()
    }

    pub fn operation_count(&self) -> u64 {
        self.lock().operation_count()
    }

    pub fn allocator_count(&self) -> usize {
        self.lock().allocator_count()
    }

    pub fn stats(&self) -> ManagerStats {
        self.lock().stats().clone()
    }

    pub fn info(&self) -> MemoryManagerInfo {
        self.lock().info()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().is_disposed()
    }

    pub fn validate_integrity(&self) -> Result<(), MemoryError> {
        self.lock().validate_integrity()
    }

    /// Runs `f` with exclusive access to the underlying manager.
    ///
    /// The lock is held for the whole of `f` and is not reentrant. Inside the
    /// closure, go through the `&mut GraphicsMemoryManager` it receives: calling
    /// any method on this handle or one of its clones, or dropping a
    /// [`RegionGuard`] taken from it, deadlocks. Move guards out of the closure
    /// and drop them after it returns.
    pub fn with_manager<R>(&self, f: impl FnOnce(&mut GraphicsMemoryManager) -> R) -> R {
        f(&mut self.lock())
    }
}

impl From<GraphicsMemoryManager> for SharedGraphicsMemoryManager {
    fn from(manager: GraphicsMemoryManager) -> Self {
        Self::from_manager(manager)
    }
}

impl fmt::Debug for SharedGraphicsMemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Ok(manager) => f.debug_tuple("SharedGraphicsMemoryManager").field(&*manager).finish(),
            Err(_) => f.write_str("SharedGraphicsMemoryManager { <locked> }"),
        }
    }
}
