// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The graphics memory manager.
//!
//! [`GraphicsMemoryManager`] owns every allocator created for one device and
//! routes allocation requests to them. It:
//!
//! 1. Validates each request once, at the public boundary, before any
//!    allocator is touched.
//! 2. Places the request in an existing shared allocator, grows one when
//!    configured to, or creates a new allocator through the injected
//!    [`AllocatorFactory`], within the configured count and size bounds.
//! 3. Retires allocators that become empty, unless that would breach the
//!    minimum allocator count or the minimum byte length.
//! 4. Keeps `allocated + free == byte_length` across every call, successful
//!    or not.
//!
//! # Synchronization
//! Every mutating method takes `&mut self`; the borrow checker is the only
//! lock. This is the externally synchronized flavour. Wrap the manager in a
//! [`SharedGraphicsMemoryManager`](crate::SharedGraphicsMemoryManager) to
//! serialize callers from several threads.
//!
//! # Free tracking
//! Allocators report freed regions through the `on_free` callback handed to
//! them at creation. The callback only touches an atomic counter shared with
//! the manager, so allocators never hold a reference to the manager itself.

use crate::{
    AllocationOptions, AllocatorCreateOptions, AllocatorFactory, AllocatorId, DeviceContext, FreeCallback,
    ManagerConfig, ManagerStats, MemoryAllocator, MemoryError, MemoryManagerInfo, MemoryRegion,
};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bytes held by live regions, shared with the `on_free` callbacks of the
/// manager's allocators.
#[derive(Debug, Default)]
struct PoolCounters {
    allocated_byte_length: AtomicUsize,
}

impl PoolCounters {
    fn allocated(&self) -> usize {
        self.allocated_byte_length.load(Ordering::Acquire)
    }

    fn add(&self, bytes: usize) -> usize {
        self.allocated_byte_length.fetch_add(bytes, Ordering::AcqRel) + bytes
    }

    fn release(&self, bytes: usize) {
        self.allocated_byte_length.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// A capacity-governed pool of device memory.
///
/// # Example
/// ```
/// use graphics_memory::{
///     AllocationOptions, DeviceContext, FreeListAllocatorFactory, GraphicsMemoryManager, ManagerConfig,
/// };
///
/// let mut manager = GraphicsMemoryManager::new(
///     DeviceContext::host(),
///     ManagerConfig::default(),
///     FreeListAllocatorFactory::new(),
/// )
/// .unwrap();
///
/// let region = manager.allocate(&AllocationOptions::new(64 * 1024)).unwrap();
/// assert_eq!(manager.allocated_byte_length(), 64 * 1024);
/// assert_eq!(manager.allocator_count(), 1);
///
/// manager.free(region).unwrap();
/// assert_eq!(manager.allocated_byte_length(), 0);
/// ```
pub struct GraphicsMemoryManager {
    device: DeviceContext,
    config: ManagerConfig,
    factory: Box<dyn AllocatorFactory>,
    /// Creation order; the first shared allocator with room wins.
    allocators: Vec<Box<dyn MemoryAllocator>>,
    counters: Arc<PoolCounters>,
    byte_length: usize,
    minimum_byte_length: usize,
    operation_count: u64,
    stats: ManagerStats,
    disposed: bool,
}

impl GraphicsMemoryManager {
    /// Creates a manager and its `minimum_allocator_count` initial allocators.
    pub fn new(
        device: DeviceContext,
        config: ManagerConfig,
        factory: impl AllocatorFactory + 'static,
    ) -> Result<Self, MemoryError> {
        config.validate()?;

        let mut manager = Self {
            device,
            config,
            factory: Box::new(factory),
            allocators: Vec::new(),
            counters: Arc::new(PoolCounters::default()),
            byte_length: 0,
            minimum_byte_length: 0,
            operation_count: 0,
            stats: ManagerStats::default(),
            disposed: false,
        };

        let initial = manager.config.minimum_allocator_byte_length.as_bytes();
        for _ in 0..manager.config.minimum_allocator_count {
            if manager.create_allocator(initial, false, false)?.is_none() {
                return Err(manager.out_of_memory(initial));
            }
        }

        tracing::info!(
            "memory manager created for {}: {} allocators, {} bytes",
            manager.device,
            manager.allocators.len(),
            manager.byte_length
        );
        Ok(manager)
    }

    // ── Public contract ────────────────────────────────────────

    /// Allocates a region, turning exhaustion into [`MemoryError::OutOfMemory`].
    pub fn allocate(&mut self, options: &AllocationOptions) -> Result<MemoryRegion, MemoryError> {
        self.try_allocate(options)?
            .ok_or_else(|| self.out_of_memory(options.byte_length))
    }

    /// Allocates a region.
    ///
    /// Returns `Ok(None)` when no allocator has room and policy forbids
    /// creating one, and `Err` for malformed options or a disposed manager.
    pub fn try_allocate(&mut self, options: &AllocationOptions) -> Result<Option<MemoryRegion>, MemoryError> {
        self.ensure_live()?;
        options.validate()?;
        self.try_allocate_unchecked(options)
    }

    /// Allocates one region per request into `destination`, all or nothing.
    ///
    /// On `Ok(true)` the first `requests.len()` slots hold the regions in
    /// request order. On `Ok(false)` or `Err`, `destination` is untouched and
    /// every region carved along the way has been freed again.
    pub fn try_allocate_batch(
        &mut self,
        requests: &[AllocationOptions],
        destination: &mut [Option<MemoryRegion>],
    ) -> Result<bool, MemoryError> {
        self.ensure_live()?;
        if requests.len() > destination.len() {
            return Err(MemoryError::DestinationTooSmall {
                requested: requests.len(),
                capacity: destination.len(),
            });
        }
        for options in requests {
            options.validate()?;
        }
        self.try_allocate_batch_unchecked(requests, destination)
    }

    /// Returns a region to its allocator.
    pub fn free(&mut self, region: MemoryRegion) -> Result<(), MemoryError> {
        self.ensure_live()?;
        self.free_unchecked(&region)
    }

    /// Sets the floor below which the pool will not shrink.
    ///
    /// Only shared allocators back the floor, since dedicated ones are retired
    /// as soon as their region is freed. Raising the floor above the shared
    /// byte length creates shared allocators until it is met; if the count or budget limit prevents
    /// that, the call returns `Ok(false)` and nothing changes. Lowering it
    /// lets empty allocators above the minimum count be retired.
    pub fn try_set_minimum_byte_length(&mut self, minimum_byte_length: usize) -> Result<bool, MemoryError> {
        self.ensure_live()?;

        let created_before = self.allocators.len();
        while self.shared_byte_length() < minimum_byte_length {
            let deficit = minimum_byte_length - self.shared_byte_length();
            let size = self.config.shared_allocator_byte_length(deficit);
            match self.create_allocator(size, false, false) {
                Ok(Some(_)) => {}
                outcome => {
                    while self.allocators.len() > created_before {
                        self.retire(self.allocators.len() - 1);
                    }
                    tracing::warn!(
                        "cannot raise minimum to {minimum_byte_length} bytes on {}: shared pool stays at {} bytes",
                        self.device,
                        self.shared_byte_length()
                    );
                    return outcome.map(|_| false);
                }
            }
        }

        if self.minimum_byte_length != minimum_byte_length {
            tracing::info!(
                "minimum byte length on {}: {} -> {minimum_byte_length}",
                self.device,
                self.minimum_byte_length
            );
        }
        self.minimum_byte_length = minimum_byte_length;
        self.trim();
        Ok(true)
    }

    /// Releases every allocator. Later calls fail with [`MemoryError::Disposed`].
    ///
    /// Regions still held by callers become dangling descriptors.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let live_regions: usize = self.allocators.iter().map(|a| a.region_count()).sum();
        if live_regions > 0 {
            tracing::warn!("disposing {} with {live_regions} live regions", self.device);
        }
        tracing::info!(
            "memory manager for {} disposed: {} allocators, {} bytes released",
            self.device,
            self.allocators.len(),
            self.byte_length
        );

        self.allocators.clear();
        self.byte_length = 0;
        self.counters.allocated_byte_length.store(0, Ordering::Release);
        self.disposed = true;
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn device(&self) -> &DeviceContext {
        &self.device
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Bytes owned by all allocators.
    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    pub fn minimum_byte_length(&self) -> usize {
        self.minimum_byte_length
    }

    /// Bytes held by live regions.
    pub fn allocated_byte_length(&self) -> usize {
        self.counters.allocated()
    }

    /// `byte_length - allocated_byte_length`.
    pub fn free_byte_length(&self) -> usize {
        self.byte_length.saturating_sub(self.allocated_byte_length())
    }

    /// Allocate and free calls made so far, including failed allocations.
    pub fn operation_count(&self) -> u64 {
        self.operation_count
    }

    pub fn allocator_count(&self) -> usize {
        self.allocators.len()
    }

    /// Largest free span across shared allocators.
    pub fn largest_free_region_byte_length(&self) -> usize {
        self.shared_allocators()
            .map(|a| a.largest_free_region_byte_length())
            .max()
            .unwrap_or(0)
    }

    pub fn stats(&self) -> &ManagerStats {
        &self.stats
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Returns a snapshot of the pool and every allocator in it.
    pub fn info(&self) -> MemoryManagerInfo {
        MemoryManagerInfo {
            device: self.device.to_string(),
            byte_length: self.byte_length,
            minimum_byte_length: self.minimum_byte_length,
            allocated_byte_length: self.allocated_byte_length(),
            free_byte_length: self.free_byte_length(),
            operation_count: self.operation_count,
            allocators: self.allocators.iter().map(|a| a.info()).collect(),
        }
    }

    /// Cross-checks the manager's counters against its allocators.
    pub fn validate_integrity(&self) -> Result<(), MemoryError> {
        let byte_length: usize = self.allocators.iter().map(|a| a.byte_length()).sum();
        let allocated: usize = self.allocators.iter().map(|a| a.allocated_byte_length()).sum();

        if byte_length != self.byte_length {
            return Err(MemoryError::PoolCorruption(format!(
                "allocators hold {byte_length} bytes, manager counts {}",
                self.byte_length
            )));
        }
        if allocated != self.allocated_byte_length() {
            return Err(MemoryError::PoolCorruption(format!(
                "allocators report {allocated} allocated bytes, manager counts {}",
                self.allocated_byte_length()
            )));
        }
        if allocated + self.free_byte_length() != self.byte_length {
            return Err(MemoryError::PoolCorruption(format!(
                "allocated {allocated} + free {} != {}",
                self.free_byte_length(),
                self.byte_length
            )));
        }
        Ok(())
    }

    // ── Trusted path ───────────────────────────────────────────

    /// Allocates without validating `options`.
    fn try_allocate_unchecked(&mut self, options: &AllocationOptions) -> Result<Option<MemoryRegion>, MemoryError> {
        let options = options.resolved(self.config.default_alignment);
        self.operation_count += 1;

        let oversized = options.byte_length > self.config.maximum_shared_allocator_byte_length.as_bytes();
        let dedicated = options.is_dedicated() || (oversized && !options.is_existing_only());
        let region = if dedicated {
            self.allocate_dedicated(&options)?
        } else {
            self.allocate_shared(&options)?
        };

        match region {
            Some(region) => {
                let allocated = self.counters.add(region.byte_length());
                self.stats.record_allocation(region.byte_length(), dedicated, allocated);
                tracing::debug!(
                    "allocated {} bytes at {}+{} (align {})",
                    region.byte_length(),
                    region.allocator(),
                    region.offset(),
                    region.byte_alignment()
                );
            }
            None => {
                self.stats.record_failure();
                tracing::warn!(
                    "allocation of {} bytes failed on {}: {} allocators, {} of {} bytes free",
                    options.byte_length,
                    self.device,
                    self.allocators.len(),
                    self.free_byte_length(),
                    self.byte_length
                );
            }
        }
        Ok(region)
    }

    /// Batch allocation without validation; rolls back on the first failure.
    ///
    /// A rolled-back batch counts as one operation and one failed request.
    fn try_allocate_batch_unchecked(
        &mut self,
        requests: &[AllocationOptions],
        destination: &mut [Option<MemoryRegion>],
    ) -> Result<bool, MemoryError> {
        let checkpoint = self.stats.clone();
        let operations = self.operation_count;
        let mut carved = Vec::with_capacity(requests.len());
        for options in requests {
            match self.try_allocate_unchecked(options) {
                Ok(Some(region)) => carved.push(region),
                outcome => {
                    let rolled_back = carved.len();
                    for region in carved.iter().rev() {
                        self.free_unchecked(region)?;
                    }
                    self.stats.discard_requests_since(&checkpoint);
                    self.stats.record_failure();
                    self.operation_count = operations + 1;
                    tracing::debug!("batch of {} failed, rolled back {rolled_back} regions", requests.len());
                    return outcome.map(|_| false);
                }
            }
        }

        for (slot, region) in destination.iter_mut().zip(carved) {
            *slot = Some(region);
        }
        Ok(true)
    }

    fn free_unchecked(&mut self, region: &MemoryRegion) -> Result<(), MemoryError> {
        self.operation_count += 1;
        let index = self
            .allocators
            .iter()
            .position(|a| a.id() == region.allocator())
            .ok_or(MemoryError::UnknownRegion {
                allocator: region.allocator(),
                offset: region.offset(),
            })?;

        self.allocators[index].free(region)?;
        self.stats.record_free();
        tracing::debug!(
            "freed {} bytes at {}+{}",
            region.byte_length(),
            region.allocator(),
            region.offset()
        );

        if self.may_retire(index) {
            self.retire(index);
        }
        Ok(())
    }

    fn allocate_dedicated(&mut self, options: &AllocationOptions) -> Result<Option<MemoryRegion>, MemoryError> {
        let Some(index) = self.create_allocator(options.byte_length, true, options.may_exceed_budget())? else {
            return Ok(None);
        };
        let region = self.allocators[index].try_allocate(options);
        if region.is_none() {
            self.retire(index);
        }
        Ok(region)
    }

    fn allocate_shared(&mut self, options: &AllocationOptions) -> Result<Option<MemoryRegion>, MemoryError> {
        for allocator in self.allocators.iter_mut().filter(|a| !a.is_dedicated()) {
            if allocator.largest_free_region_byte_length() < options.byte_length {
                continue;
            }
            if let Some(region) = allocator.try_allocate(options) {
                return Ok(Some(region));
            }
        }

        if options.is_existing_only() {
            return Ok(None);
        }
        if self.config.allow_allocator_growth {
            if let Some(region) = self.grow_and_allocate(options) {
                return Ok(Some(region));
            }
        }

        let size = self.config.shared_allocator_byte_length(options.byte_length);
        let Some(index) = self.create_allocator(size, false, options.may_exceed_budget())? else {
            return Ok(None);
        };
        let region = self.allocators[index].try_allocate(options);
        if region.is_none() && self.may_retire(index) {
            self.retire(index);
        }
        Ok(region)
    }

    /// Grows the first shared allocator that can take the request without
    /// passing the maximum shared size or the budget.
    fn grow_and_allocate(&mut self, options: &AllocationOptions) -> Option<MemoryRegion> {
        let max = self.config.maximum_shared_allocator_byte_length.as_bytes();
        let budget = match self.config.maximum_byte_length {
            Some(budget) if !options.may_exceed_budget() => Some(budget.as_bytes()),
            _ => None,
        };

        for allocator in self.allocators.iter_mut().filter(|a| !a.is_dedicated()) {
            let current = allocator.byte_length();
            // Worst case the new tail starts one byte past an alignment boundary.
            let Some(target) = current
                .checked_add(options.byte_length)
                .and_then(|n| n.checked_add(options.byte_alignment - 1))
            else {
                continue;
            };
            let grown = target - current;
            if target > max || budget.is_some_and(|budget| self.byte_length + grown > budget) {
                continue;
            }
            if !allocator.try_set_byte_length(target) {
                continue;
            }

            self.byte_length += grown;
            self.stats.record_allocator_grown();
            tracing::info!("grew {} from {current} to {target} bytes", allocator.id());
            if let Some(region) = allocator.try_allocate(options) {
                return Some(region);
            }
        }
        None
    }

    /// Creates an allocator if the count and budget limits allow it.
    /// Returns its index, or `None` when refused or the device is exhausted.
    fn create_allocator(
        &mut self,
        byte_length: usize,
        is_dedicated: bool,
        exceed_budget: bool,
    ) -> Result<Option<usize>, MemoryError> {
        if let Some(max) = self.config.maximum_allocator_count {
            if self.allocators.len() >= max {
                tracing::debug!("allocator limit {max} reached on {}", self.device);
                return Ok(None);
            }
        }
        if let Some(budget) = self.config.maximum_byte_length {
            if !exceed_budget && self.byte_length.saturating_add(byte_length) > budget.as_bytes() {
                tracing::debug!(
                    "a {byte_length}-byte allocator would exceed the {budget} budget on {}",
                    self.device
                );
                return Ok(None);
            }
        }

        let counters = Arc::clone(&self.counters);
        let on_free: FreeCallback = Arc::new(move |region: &MemoryRegion| counters.release(region.byte_length()));
        let options = AllocatorCreateOptions {
            id: AllocatorId::next(),
            byte_length,
            is_dedicated,
            on_free: Some(on_free),
        };

        let allocator = match self.factory.create_allocator(&self.device, options) {
            Ok(allocator) => allocator,
            Err(e) if e.is_out_of_memory() => {
                tracing::warn!("device {} refused a {byte_length}-byte allocator: {e}", self.device);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        self.byte_length += allocator.byte_length();
        self.stats.record_allocator_created();
        tracing::info!(
            "created {} {} on {}: {} bytes",
            if is_dedicated { "dedicated" } else { "shared" },
            allocator.id(),
            self.device,
            allocator.byte_length()
        );
        self.allocators.push(allocator);
        Ok(Some(self.allocators.len() - 1))
    }

    /// Empty dedicated allocators always go. Empty shared allocators go while
    /// the shared count stays at or above its minimum and the shared bytes stay
    /// at or above the minimum byte length.
    fn may_retire(&self, index: usize) -> bool {
        let allocator = &self.allocators[index];
        if !allocator.is_empty() {
            return false;
        }
        if allocator.is_dedicated() {
            return true;
        }
        self.shared_allocators().count() > self.config.minimum_allocator_count
            && self.shared_byte_length() - allocator.byte_length() >= self.minimum_byte_length
    }

    fn retire(&mut self, index: usize) {
        let allocator = self.allocators.remove(index);
        self.byte_length -= allocator.byte_length();
        self.stats.record_allocator_retired();
        tracing::info!(
            "retired {} on {}: {} bytes released",
            allocator.id(),
            self.device,
            allocator.byte_length()
        );
    }

    /// Retires every empty allocator the policy allows, newest first.
    fn trim(&mut self) {
        for index in (0..self.allocators.len()).rev() {
            if self.may_retire(index) {
                self.retire(index);
            }
        }
    }

    fn shared_allocators(&self) -> impl Iterator<Item = &dyn MemoryAllocator> {
        self.allocators.iter().map(|a| a.as_ref()).filter(|a| !a.is_dedicated())
    }

    fn shared_byte_length(&self) -> usize {
        self.shared_allocators().map(|a| a.byte_length()).sum()
    }

    fn ensure_live(&self) -> Result<(), MemoryError> {
        if self.disposed {
            return Err(MemoryError::Disposed);
        }
        Ok(())
    }

    fn out_of_memory(&self, requested_bytes: usize) -> MemoryError {
        MemoryError::OutOfMemory {
            requested_bytes,
            byte_length: self.byte_length,
            allocator_count: self.allocators.len(),
        }
    }
}

impl fmt::Debug for GraphicsMemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsMemoryManager")
            .field("device", &self.device)
            .field("byte_length", &self.byte_length)
            .field("allocated_byte_length", &self.allocated_byte_length())
            .field("allocators", &self.allocators.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}
