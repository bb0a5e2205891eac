// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Diagnostics: cumulative statistics and point-in-time snapshots.
//!
//! [`ManagerStats`] accumulates over the manager's lifetime;
//! [`MemoryManagerInfo`] captures the pool as it is right now.

use crate::AllocatorInfo;

/// Cumulative counters for one manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ManagerStats {
    /// Successful allocations.
    pub total_allocations: u64,
    /// Allocations refused for lack of room or policy.
    pub failed_allocations: u64,
    /// Allocations that received a dedicated allocator.
    pub dedicated_allocations: u64,
    /// Regions returned through `free`.
    pub total_frees: u64,
    pub allocators_created: u64,
    pub allocators_retired: u64,
    /// Shared allocators resized in place.
    pub allocators_grown: u64,
    /// High-water mark of bytes held by live regions.
    pub peak_allocated_bytes: usize,
    /// Total bytes ever handed out.
    pub cumulative_allocated_bytes: u64,
}

impl ManagerStats {
    /// Fraction of allocation requests that failed, in `[0.0, 1.0]`.
    pub fn failure_ratio(&self) -> f64 {
        let total = self.total_allocations + self.failed_allocations;
        if total == 0 {
            return 0.0;
        }
        self.failed_allocations as f64 / total as f64
    }

    pub(crate) fn record_allocation(&mut self, size: usize, dedicated: bool, allocated_now: usize) {
        self.total_allocations += 1;
        self.cumulative_allocated_bytes += size as u64;
        if dedicated {
            self.dedicated_allocations += 1;
        }
        if allocated_now > self.peak_allocated_bytes {
            self.peak_allocated_bytes = allocated_now;
        }
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed_allocations += 1;
    }

    pub(crate) fn record_free(&mut self) {
        self.total_frees += 1;
    }

    /// Restores the request counters to `checkpoint`, leaving allocator
    /// lifecycle counters alone. Used when a batch is rolled back.
    pub(crate) fn discard_requests_since(&mut self, checkpoint: &ManagerStats) {
        self.total_allocations = checkpoint.total_allocations;
        self.failed_allocations = checkpoint.failed_allocations;
        self.dedicated_allocations = checkpoint.dedicated_allocations;
        self.total_frees = checkpoint.total_frees;
        self.peak_allocated_bytes = checkpoint.peak_allocated_bytes;
        self.cumulative_allocated_bytes = checkpoint.cumulative_allocated_bytes;
    }

    pub(crate) fn record_allocator_created(&mut self) {
        self.allocators_created += 1;
    }

    pub(crate) fn record_allocator_retired(&mut self) {
        self.allocators_retired += 1;
    }

    pub(crate) fn record_allocator_grown(&mut self) {
        self.allocators_grown += 1;
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let peak_mb = self.peak_allocated_bytes as f64 / (1024.0 * 1024.0);
        format!(
            "Allocations: {} ok ({} dedicated), {} failed ({:.0}%), {} frees; \
             allocators: {} created, {} retired, {} grown; peak {:.2} MB",
            self.total_allocations,
            self.dedicated_allocations,
            self.failed_allocations,
            self.failure_ratio() * 100.0,
            self.total_frees,
            self.allocators_created,
            self.allocators_retired,
            self.allocators_grown,
            peak_mb,
        )
    }
}

/// Snapshot of a manager's pool.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MemoryManagerInfo {
    pub device: String,
    pub byte_length: usize,
    pub minimum_byte_length: usize,
    pub allocated_byte_length: usize,
    pub free_byte_length: usize,
    pub operation_count: u64,
    pub allocators: Vec<AllocatorInfo>,
}

impl MemoryManagerInfo {
    pub fn allocator_count(&self) -> usize {
        self.allocators.len()
    }

    pub fn region_count(&self) -> usize {
        self.allocators.iter().map(|a| a.region_count).sum()
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Pool {}: {} bytes in {} allocators ({} allocated, {} free, floor {}), {} regions, {} operations",
            self.device,
            self.byte_length,
            self.allocator_count(),
            self.allocated_byte_length,
            self.free_byte_length,
            self.minimum_byte_length,
            self.region_count(),
            self.operation_count,
        )
    }
}
