// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for graphics memory management.

use crate::AllocatorId;

/// Errors raised by the memory manager and its allocators.
///
/// Only [`MemoryError::OutOfMemory`] describes ordinary exhaustion. Every
/// other variant is a contract violation: the caller passed something the
/// manager can never satisfy, or used it after teardown.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// No allocator had room and policy forbade creating or growing one.
    #[error("out of memory: requested {requested_bytes} bytes ({allocator_count} allocators, {byte_length} bytes in pool)")]
    OutOfMemory {
        requested_bytes: usize,
        byte_length: usize,
        allocator_count: usize,
    },

    /// Alignment was neither zero nor a power of two.
    #[error("invalid alignment {0}: must be zero or a power of two")]
    InvalidAlignment(usize),

    /// Attempted to allocate a zero-length region.
    #[error("cannot allocate a zero-length region")]
    ZeroLengthAllocation,

    /// Flag bits outside the defined set were supplied.
    #[error("undefined allocation flags: {0:#x}")]
    UndefinedFlags(u32),

    /// `DEDICATED_MEMORY_ALLOCATOR` and `EXISTING_MEMORY_ALLOCATOR` together.
    #[error("DEDICATED_MEMORY_ALLOCATOR and EXISTING_MEMORY_ALLOCATOR are mutually exclusive")]
    ConflictingFlags,

    /// A batch asked for more regions than the destination can hold.
    #[error("batch of {requested} regions does not fit a destination of {capacity} slots")]
    DestinationTooSmall { requested: usize, capacity: usize },

    /// The region is not live in the allocator it names.
    #[error("region at offset {offset} is not live in {allocator}")]
    UnknownRegion { allocator: AllocatorId, offset: usize },

    /// The manager was torn down.
    #[error("memory manager has been disposed")]
    Disposed,

    /// Configuration values contradict each other.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Manager bookkeeping disagrees with its allocators.
    #[error("pool integrity error: {0}")]
    PoolCorruption(String),

    /// A human-readable size string could not be parsed.
    #[error("invalid byte size '{0}': expected a number followed by an optional suffix (K, M, G)")]
    InvalidByteSize(String),
}

impl MemoryError {
    /// Returns `true` for recoverable exhaustion, `false` for contract violations.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, MemoryError::OutOfMemory { .. })
    }
}
