// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Memory regions and allocator identities.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an allocator.
///
/// Ids are handed out by the manager when it asks the factory for a new
/// allocator, so a region from one manager is never mistaken for a region
/// of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct AllocatorId(u64);

impl AllocatorId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AllocatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "allocator#{}", self.0)
    }
}

/// A contiguous span carved out of one allocator.
///
/// Regions are plain values. They stay valid until handed back through
/// `free`; the manager rejects regions it does not recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct MemoryRegion {
    allocator: AllocatorId,
    offset: usize,
    byte_length: usize,
    byte_alignment: usize,
}

impl MemoryRegion {
    /// Creates a region descriptor. Called by allocator implementations.
    pub fn new(allocator: AllocatorId, offset: usize, byte_length: usize, byte_alignment: usize) -> Self {
        Self {
            allocator,
            offset,
            byte_length,
            byte_alignment,
        }
    }

    /// The allocator the region was carved from.
    pub fn allocator(&self) -> AllocatorId {
        self.allocator
    }

    /// Byte offset of the region within its allocator.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    pub fn byte_alignment(&self) -> usize {
        self.byte_alignment
    }

    /// One past the last byte of the region.
    pub fn end(&self) -> usize {
        self.offset + self.byte_length
    }

    /// Returns `true` if both regions live in the same allocator and share a byte.
    pub fn overlaps(&self, other: &MemoryRegion) -> bool {
        self.allocator == other.allocator && self.offset < other.end() && other.offset < self.end()
    }
}

/// Rounds `offset` up to `alignment`, which must be a power of two.
pub(crate) fn align_up(offset: usize, alignment: usize) -> Option<usize> {
    debug_assert!(alignment.is_power_of_two());
    let mask = alignment - 1;
    offset.checked_add(mask).map(|v| v & !mask)
}
