// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # graphics-memory
//!
//! A sub-allocator for device memory: one manager per device carves a pool
//! into allocators, and allocators into regions, under a capacity policy.
//!
//! # Key Components
//!
//! - [`GraphicsMemoryManager`]: the pool. Validates requests, picks or
//!   creates allocators, retires empty ones, and keeps
//!   `allocated + free == byte_length`.
//! - [`SharedGraphicsMemoryManager`]: the same pool behind one mutex, for
//!   callers on several threads. [`RegionGuard`] frees its region on drop.
//! - [`MemoryManagerHandle`]: picks one of the two from
//!   [`ManagerConfig::externally_synchronized`].
//! - [`MemoryAllocator`] / [`AllocatorFactory`]: the pluggable per-allocator
//!   strategy. [`FreeListAllocator`] is the bundled best-fit backend.
//! - [`AllocationOptions`] and [`AllocationFlags`]: what a caller asks for.
//! - [`ManagerConfig`]: count and size bounds, loadable from TOML or the
//!   environment. [`ByteSize`] parses `"256M"`-style sizes.
//! - [`ManagerStats`] and [`MemoryManagerInfo`]: cumulative counters and
//!   point-in-time snapshots.
//!
//! # Ownership Model
//!
//! ```text
//! GraphicsMemoryManager ──owns──► Box<dyn MemoryAllocator> ──tracks──► MemoryRegion
//!        ▲                               │
//!        │ Arc<PoolCounters>             │ on_free(region)
//!        └───────────────────────────────┘
//! ```
//!
//! Regions are plain descriptors. The manager never stores them; it
//! aggregates their sizes through the `on_free` callback each allocator
//! receives at creation.
//!
//! # Example
//! ```
//! use graphics_memory::{
//!     AllocationOptions, ByteSize, DeviceContext, FreeListAllocatorFactory, GraphicsMemoryManager,
//!     ManagerConfig,
//! };
//!
//! let config = ManagerConfig {
//!     maximum_allocator_count: Some(1),
//!     minimum_allocator_byte_length: ByteSize::from_mb(1),
//!     ..Default::default()
//! };
//! let mut manager =
//!     GraphicsMemoryManager::new(DeviceContext::host(), config, FreeListAllocatorFactory::new()).unwrap();
//!
//! // Fits in the single 1 MiB allocator.
//! let small = manager.allocate(&AllocationOptions::new(512 * 1024)).unwrap();
//!
//! // Would need a second allocator.
//! assert!(manager.try_allocate(&AllocationOptions::new(2 * 1024 * 1024)).unwrap().is_none());
//!
//! // Contract violations are errors, not exhaustion.
//! let bad = AllocationOptions::new(64).with_alignment(3);
//! assert!(manager.try_allocate(&bad).is_err());
//!
//! manager.free(small).unwrap();
//! assert_eq!(manager.allocated_byte_length(), 0);
//! ```

pub mod allocator;
pub mod config;
mod device;
mod error;
mod guard;
mod handle;
pub mod manager;
mod options;
mod region;
mod shared;
mod size;
mod stats;

pub use allocator::{AllocatorFactory, AllocatorInfo, FreeListAllocator, FreeListAllocatorFactory, MemoryAllocator};
pub use config::ManagerConfig;
pub use device::DeviceContext;
pub use error::MemoryError;
pub use guard::RegionGuard;
pub use handle::MemoryManagerHandle;
pub use manager::GraphicsMemoryManager;
pub use options::{AllocationFlags, AllocationOptions, AllocatorCreateOptions, FreeCallback};
pub use region::{AllocatorId, MemoryRegion};
pub use shared::SharedGraphicsMemoryManager;
pub use size::ByteSize;
pub use stats::{ManagerStats, MemoryManagerInfo};
