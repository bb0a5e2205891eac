// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Best-fit free-list allocator.
//!
//! Free spans are kept in a `BTreeMap` keyed by offset so that neighbours
//! can be found and coalesced in `O(log n)` when a region is freed. Live
//! regions are tracked separately so a double free or a forged region is
//! rejected instead of corrupting the free list.
//!
//! ```text
//!  offset 0                                              byte_length
//!  ├──────────┬───┬──────────────┬───────────────────────────┤
//!  │ region A │pad│   region B   │         free span         │
//!  └──────────┴───┴──────────────┴───────────────────────────┘
//! ```
//!
//! Alignment padding in front of a region stays on the free list.

use super::{AllocatorFactory, MemoryAllocator};
use crate::region::align_up;
use crate::{
    AllocationOptions, AllocatorCreateOptions, AllocatorId, DeviceContext, FreeCallback, MemoryError, MemoryRegion,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Host-side bookkeeping allocator over `[0, byte_length)`.
pub struct FreeListAllocator {
    id: AllocatorId,
    byte_length: usize,
    is_dedicated: bool,
    /// offset → length of each free span. Spans never touch.
    free_spans: BTreeMap<usize, usize>,
    /// offset → length of each live region.
    live_regions: BTreeMap<usize, usize>,
    allocated_byte_length: usize,
    on_free: Option<FreeCallback>,
    /// Bytes charged against the factory's device memory, released on drop.
    device_reservation: Option<DeviceReservation>,
}

/// A share of the simulated device memory of a [`FreeListAllocatorFactory`].
#[derive(Debug)]
struct DeviceReservation {
    in_use: Arc<AtomicUsize>,
    limit: Option<usize>,
    bytes: usize,
}

/// Adds `bytes` to the device counter; fails without effect past the limit.
/// The error carries the bytes already in use.
fn charge(in_use: &AtomicUsize, limit: Option<usize>, bytes: usize) -> Result<usize, usize> {
    in_use.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        let next = current.checked_add(bytes)?;
        match limit {
            Some(limit) if next > limit => None,
            _ => Some(next),
        }
    })
}

impl DeviceReservation {
    fn acquire(in_use: &Arc<AtomicUsize>, limit: Option<usize>, bytes: usize) -> Result<Self, usize> {
        charge(in_use, limit, bytes)?;
        Ok(Self {
            in_use: Arc::clone(in_use),
            limit,
            bytes,
        })
    }

    fn resize(&mut self, bytes: usize) -> bool {
        if bytes <= self.bytes {
            self.in_use.fetch_sub(self.bytes - bytes, Ordering::AcqRel);
        } else if charge(&self.in_use, self.limit, bytes - self.bytes).is_err() {
            return false;
        }
        self.bytes = bytes;
        true
    }
}

impl Drop for DeviceReservation {
    fn drop(&mut self) {
        self.in_use.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

impl FreeListAllocator {
    pub fn new(options: AllocatorCreateOptions) -> Self {
        let mut free_spans = BTreeMap::new();
        if options.byte_length > 0 {
            free_spans.insert(0, options.byte_length);
        }
        Self {
            id: options.id,
            byte_length: options.byte_length,
            is_dedicated: options.is_dedicated,
            free_spans,
            live_regions: BTreeMap::new(),
            allocated_byte_length: 0,
            on_free: options.on_free,
            device_reservation: None,
        }
    }

    /// Number of disjoint free spans; 1 means no fragmentation.
    pub fn free_span_count(&self) -> usize {
        self.free_spans.len()
    }

    /// Inserts a free span, merging it with touching neighbours.
    fn insert_free_span(&mut self, mut offset: usize, mut length: usize) {
        if let Some((&prev_offset, &prev_length)) = self.free_spans.range(..offset).next_back() {
            if prev_offset + prev_length == offset {
                self.free_spans.remove(&prev_offset);
                offset = prev_offset;
                length += prev_length;
            }
        }
        if let Some(next_length) = self.free_spans.remove(&(offset + length)) {
            length += next_length;
        }
        self.free_spans.insert(offset, length);
    }
}

impl MemoryAllocator for FreeListAllocator {
    fn id(&self) -> AllocatorId {
        self.id
    }

    fn byte_length(&self) -> usize {
        self.byte_length
    }

    fn allocated_byte_length(&self) -> usize {
        self.allocated_byte_length
    }

    fn region_count(&self) -> usize {
        self.live_regions.len()
    }

    fn largest_free_region_byte_length(&self) -> usize {
        self.free_spans.values().copied().max().unwrap_or(0)
    }

    fn is_dedicated(&self) -> bool {
        self.is_dedicated
    }

    fn try_allocate(&mut self, options: &AllocationOptions) -> Option<MemoryRegion> {
        if self.is_dedicated && !self.live_regions.is_empty() {
            return None;
        }

        let alignment = options.byte_alignment.max(1);
        let length = options.byte_length;

        // Best fit: the smallest span that holds the aligned request.
        let mut best: Option<(usize, usize, usize)> = None;
        for (&span_offset, &span_length) in &self.free_spans {
            let Some(aligned) = align_up(span_offset, alignment) else {
                continue;
            };
            let padding = aligned - span_offset;
            if span_length < padding.saturating_add(length) {
                continue;
            }
            if best.map_or(true, |(_, best_length, _)| span_length < best_length) {
                best = Some((span_offset, span_length, aligned));
            }
        }

        let (span_offset, span_length, aligned) = best?;
        self.free_spans.remove(&span_offset);
        if aligned > span_offset {
            self.free_spans.insert(span_offset, aligned - span_offset);
        }
        let tail = span_offset + span_length - (aligned + length);
        if tail > 0 {
            self.free_spans.insert(aligned + length, tail);
        }

        self.live_regions.insert(aligned, length);
        self.allocated_byte_length += length;
        Some(MemoryRegion::new(self.id, aligned, length, alignment))
    }

    fn free(&mut self, region: &MemoryRegion) -> Result<(), MemoryError> {
        let unknown = || MemoryError::UnknownRegion {
            allocator: self.id,
            offset: region.offset(),
        };
        if region.allocator() != self.id {
            return Err(unknown());
        }
        match self.live_regions.get(&region.offset()) {
            Some(&length) if length == region.byte_length() => {}
            _ => return Err(unknown()),
        }

        self.live_regions.remove(&region.offset());
        self.allocated_byte_length -= region.byte_length();
        self.insert_free_span(region.offset(), region.byte_length());

        if let Some(on_free) = &self.on_free {
            on_free(region);
        }
        Ok(())
    }

    fn try_set_byte_length(&mut self, byte_length: usize) -> bool {
        if self.is_dedicated || byte_length == 0 {
            return false;
        }
        if let Some(reservation) = &mut self.device_reservation {
            if byte_length > self.byte_length && !reservation.resize(byte_length) {
                return false;
            }
        }
        if byte_length >= self.byte_length {
            let grown = byte_length - self.byte_length;
            if grown > 0 {
                let old_end = self.byte_length;
                self.byte_length = byte_length;
                self.insert_free_span(old_end, grown);
            }
            return true;
        }

        // Shrinking only cuts a free tail.
        let Some((&tail_offset, &tail_length)) = self.free_spans.iter().next_back() else {
            return false;
        };
        if tail_offset + tail_length != self.byte_length || tail_offset > byte_length {
            return false;
        }
        self.free_spans.remove(&tail_offset);
        if byte_length > tail_offset {
            self.free_spans.insert(tail_offset, byte_length - tail_offset);
        }
        self.byte_length = byte_length;
        if let Some(reservation) = &mut self.device_reservation {
            reservation.resize(byte_length);
        }
        true
    }
}

impl fmt::Debug for FreeListAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeListAllocator")
            .field("id", &self.id)
            .field("byte_length", &self.byte_length)
            .field("allocated_byte_length", &self.allocated_byte_length)
            .field("regions", &self.live_regions.len())
            .field("free_spans", &self.free_spans.len())
            .field("is_dedicated", &self.is_dedicated)
            .finish()
    }
}

/// Factory for [`FreeListAllocator`]s, optionally bounded by a simulated
/// amount of device memory.
///
/// # Example
/// ```
/// use graphics_memory::{
///     AllocatorCreateOptions, AllocatorFactory, DeviceContext, FreeListAllocatorFactory,
/// };
///
/// let factory = FreeListAllocatorFactory::with_device_limit(1024 * 1024);
/// let device = DeviceContext::host();
///
/// let a = factory.create_allocator(&device, AllocatorCreateOptions::shared(1024 * 1024));
/// assert!(a.is_ok());
/// let b = factory.create_allocator(&device, AllocatorCreateOptions::shared(1));
/// assert!(b.is_err());
///
/// drop(a);
/// assert_eq!(factory.device_bytes_in_use(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FreeListAllocatorFactory {
    device_limit: Option<usize>,
    in_use: Arc<AtomicUsize>,
}

impl FreeListAllocatorFactory {
    /// A factory backed by unlimited host memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory that refuses to hand out more than `device_limit` bytes at once.
    pub fn with_device_limit(device_limit: usize) -> Self {
        Self {
            device_limit: Some(device_limit),
            in_use: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bytes currently held by live allocators from this factory.
    pub fn device_bytes_in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }
}

impl AllocatorFactory for FreeListAllocatorFactory {
    fn create_allocator(
        &self,
        device: &DeviceContext,
        options: AllocatorCreateOptions,
    ) -> Result<Box<dyn MemoryAllocator>, MemoryError> {
        let requested = options.byte_length;
        let reservation = match DeviceReservation::acquire(&self.in_use, self.device_limit, requested) {
            Ok(reservation) => reservation,
            Err(in_use) => {
                tracing::warn!("device {device} cannot back {requested} more bytes ({in_use} in use)");
                return Err(MemoryError::OutOfMemory {
                    requested_bytes: requested,
                    byte_length: in_use,
                    allocator_count: 0,
                });
            }
        };

        let mut allocator = FreeListAllocator::new(options);
        allocator.device_reservation = Some(reservation);
        Ok(Box::new(allocator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(byte_length: usize) -> FreeListAllocator {
        FreeListAllocator::new(AllocatorCreateOptions::shared(byte_length))
    }

    fn request(length: usize, alignment: usize) -> AllocationOptions {
        AllocationOptions::new(length).with_alignment(alignment)
    }

    #[test]
    fn test_allocate_and_free() {
        let mut a = allocator(4096);
        let region = a.try_allocate(&request(1024, 256)).unwrap();
        assert_eq!(region.offset(), 0);
        assert_eq!(region.byte_length(), 1024);
        assert_eq!(a.allocated_byte_length(), 1024);
        assert_eq!(a.free_byte_length(), 3072);

        a.free(&region).unwrap();
        assert_eq!(a.allocated_byte_length(), 0);
        assert_eq!(a.free_span_count(), 1);
        assert_eq!(a.largest_free_region_byte_length(), 4096);
    }

    #[test]
    fn test_alignment_padding_stays_free() {
        let mut a = allocator(4096);
        let first = a.try_allocate(&request(100, 1)).unwrap();
        let second = a.try_allocate(&request(100, 256)).unwrap();

        assert_eq!(first.offset(), 0);
        assert_eq!(second.offset(), 256);
        assert!(!first.overlaps(&second));
        // Padding [100, 256) and tail [356, 4096).
        assert_eq!(a.free_span_count(), 2);
        assert_eq!(a.allocated_byte_length(), 200);
    }

    #[test]
    fn test_best_fit_prefers_smallest_span() {
        let mut a = allocator(4096);
        let r0 = a.try_allocate(&request(512, 1)).unwrap();
        let _r1 = a.try_allocate(&request(256, 1)).unwrap();
        let r2 = a.try_allocate(&request(128, 1)).unwrap();
        let _r3 = a.try_allocate(&request(256, 1)).unwrap();
        a.free(&r0).unwrap();
        a.free(&r2).unwrap();

        // Spans: [0,512), [768,896), [1152,4096). 100 bytes fits best in the 128 hole.
        let placed = a.try_allocate(&request(100, 1)).unwrap();
        assert_eq!(placed.offset(), 768);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut a = allocator(1024);
        assert!(a.try_allocate(&request(1024, 1)).is_some());
        assert!(a.try_allocate(&request(1, 1)).is_none());
    }

    #[test]
    fn test_coalesce_both_neighbours() {
        let mut a = allocator(3 * 256);
        let r0 = a.try_allocate(&request(256, 256)).unwrap();
        let r1 = a.try_allocate(&request(256, 256)).unwrap();
        let r2 = a.try_allocate(&request(256, 256)).unwrap();

        a.free(&r0).unwrap();
        a.free(&r2).unwrap();
        assert_eq!(a.free_span_count(), 2);
        a.free(&r1).unwrap();
        assert_eq!(a.free_span_count(), 1);
        assert_eq!(a.largest_free_region_byte_length(), 768);
    }

    #[test]
    fn test_double_free_rejected() {
        let mut a = allocator(4096);
        let region = a.try_allocate(&request(64, 64)).unwrap();
        a.free(&region).unwrap();
        assert!(matches!(a.free(&region), Err(MemoryError::UnknownRegion { .. })));
    }

    #[test]
    fn test_foreign_region_rejected() {
        let mut a = allocator(4096);
        let mut b = allocator(4096);
        let region = b.try_allocate(&request(64, 64)).unwrap();
        assert!(a.free(&region).is_err());
        assert_eq!(b.region_count(), 1);
    }

    #[test]
    fn test_on_free_callback() {
        let freed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&freed);
        let mut a = FreeListAllocator::new(
            AllocatorCreateOptions::shared(4096).with_on_free(Arc::new(move |region: &MemoryRegion| {
                counter.fetch_add(region.byte_length(), Ordering::Relaxed);
            })),
        );
        let region = a.try_allocate(&request(300, 4)).unwrap();
        a.free(&region).unwrap();
        assert_eq!(freed.load(Ordering::Relaxed), 300);
    }

    #[test]
    fn test_dedicated_holds_one_region() {
        let mut a = FreeListAllocator::new(AllocatorCreateOptions::dedicated(4096));
        assert!(a.try_allocate(&request(64, 1)).is_some());
        assert!(a.try_allocate(&request(64, 1)).is_none());
        assert!(!a.try_set_byte_length(8192));
    }

    #[test]
    fn test_grow_and_shrink() {
        let mut a = allocator(1024);
        let region = a.try_allocate(&request(1024, 1)).unwrap();
        assert!(a.try_set_byte_length(2048));
        assert_eq!(a.largest_free_region_byte_length(), 1024);

        // Cannot shrink into a live region.
        assert!(!a.try_set_byte_length(512));
        assert!(a.try_set_byte_length(1536));
        assert_eq!(a.byte_length(), 1536);

        a.free(&region).unwrap();
        assert!(a.try_set_byte_length(256));
        assert_eq!(a.free_span_count(), 1);
        assert_eq!(a.largest_free_region_byte_length(), 256);
    }

    #[test]
    fn test_factory_device_limit() {
        let factory = FreeListAllocatorFactory::with_device_limit(8192);
        let device = DeviceContext::host();

        let a = factory
            .create_allocator(&device, AllocatorCreateOptions::shared(4096))
            .unwrap();
        let _b = factory
            .create_allocator(&device, AllocatorCreateOptions::shared(4096))
            .unwrap();
        let c = factory.create_allocator(&device, AllocatorCreateOptions::shared(1));
        assert!(matches!(c, Err(MemoryError::OutOfMemory { .. })));

        drop(a);
        assert_eq!(factory.device_bytes_in_use(), 4096);
        assert!(factory
            .create_allocator(&device, AllocatorCreateOptions::shared(4096))
            .is_ok());
    }

    #[test]
    fn test_growth_is_charged_to_device() {
        let factory = FreeListAllocatorFactory::with_device_limit(8192);
        let mut a = factory
            .create_allocator(&DeviceContext::host(), AllocatorCreateOptions::shared(4096))
            .unwrap();

        assert!(a.try_set_byte_length(8192));
        assert_eq!(factory.device_bytes_in_use(), 8192);
        assert!(!a.try_set_byte_length(8193));
        assert_eq!(a.byte_length(), 8192);

        assert!(a.try_set_byte_length(1024));
        assert_eq!(factory.device_bytes_in_use(), 1024);
        drop(a);
        assert_eq!(factory.device_bytes_in_use(), 0);
    }
}
