// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: the manager's public contract end to end.
//!
//! Each test drives the manager only through its public API and checks the
//! pool accounting after every call.

use graphics_memory::{
    AllocationFlags, AllocationOptions, AllocatorCreateOptions, ByteSize, DeviceContext, FreeListAllocator,
    FreeListAllocatorFactory, GraphicsMemoryManager, ManagerConfig, MemoryAllocator, MemoryError,
    MemoryManagerHandle, MemoryRegion, SharedGraphicsMemoryManager,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;

// ── Helpers ────────────────────────────────────────────────────

fn config() -> ManagerConfig {
    ManagerConfig {
        minimum_allocator_byte_length: ByteSize::from_mb(1),
        maximum_shared_allocator_byte_length: ByteSize::from_mb(16),
        ..Default::default()
    }
}

fn manager_with(config: ManagerConfig) -> GraphicsMemoryManager {
    GraphicsMemoryManager::new(DeviceContext::new("test-adapter", "gpu0"), config, FreeListAllocatorFactory::new())
        .unwrap()
}

fn assert_balanced(manager: &GraphicsMemoryManager) {
    assert_eq!(
        manager.allocated_byte_length() + manager.free_byte_length(),
        manager.byte_length(),
        "allocated + free must equal byte_length"
    );
    manager.validate_integrity().unwrap();
}

// ── Allocation ─────────────────────────────────────────────────

#[test]
fn test_request_within_largest_free_span_succeeds() {
    let mut m = manager_with(ManagerConfig {
        minimum_allocator_count: 1,
        ..config()
    });
    let largest = m.largest_free_region_byte_length();
    assert_eq!(largest, MIB);

    let before = m.allocated_byte_length();
    let region = m
        .try_allocate(&AllocationOptions::new(largest).with_flags(AllocationFlags::EXISTING_MEMORY_ALLOCATOR))
        .unwrap()
        .unwrap();
    assert!(m.allocated_byte_length() >= before + largest);
    assert!(region.byte_length() >= largest);
    assert_balanced(&m);
}

#[test]
fn test_accounting_holds_across_mixed_workload() {
    let mut m = manager_with(config());
    let mut live: Vec<MemoryRegion> = Vec::new();
    let sizes = [4 * KIB, 64 * KIB, MIB, 3 * MIB, 17 * MIB, 512, 256 * KIB];

    for (i, &size) in sizes.iter().cycle().take(40).enumerate() {
        assert_balanced(&m);
        let flags = if i % 7 == 3 {
            AllocationFlags::DEDICATED_MEMORY_ALLOCATOR
        } else {
            AllocationFlags::empty()
        };
        live.push(m.allocate(&AllocationOptions::new(size).with_flags(flags)).unwrap());
        if i % 3 == 2 {
            let region = live.remove(i % live.len());
            m.free(region).unwrap();
        }
    }
    assert_balanced(&m);

    for region in live.drain(..) {
        m.free(region).unwrap();
        assert_balanced(&m);
    }
    assert_eq!(m.allocated_byte_length(), 0);
    assert_eq!(m.allocator_count(), 0);
}

#[test]
fn test_live_regions_never_overlap() {
    let mut m = manager_with(config());
    let regions: Vec<MemoryRegion> = (1..=64)
        .map(|i| m.allocate(&AllocationOptions::new(i * 1000).with_alignment(64)).unwrap())
        .collect();

    for (i, a) in regions.iter().enumerate() {
        assert_eq!(a.offset() % 64, 0);
        for b in &regions[i + 1..] {
            assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
        }
    }
    let info = m.info();
    for region in &regions {
        let owner = info.allocators.iter().find(|a| a.id == region.allocator()).unwrap();
        assert!(region.end() <= owner.byte_length);
    }
}

#[test]
fn test_free_restores_free_bytes() {
    let mut m = manager_with(ManagerConfig {
        minimum_allocator_count: 1,
        ..config()
    });
    let free_before = m.free_byte_length();
    let region = m.allocate(&AllocationOptions::new(100 * KIB)).unwrap();
    assert_eq!(m.free_byte_length(), free_before - 100 * KIB);
    m.free(region).unwrap();
    assert_eq!(m.free_byte_length(), free_before);
}

// ── Validation ─────────────────────────────────────────────────

#[test]
fn test_invalid_options_touch_nothing() {
    let mut m = manager_with(config());
    let invalid = [
        AllocationOptions::new(64).with_alignment(3),
        AllocationOptions::new(0),
        AllocationOptions::new(64)
            .with_flags(AllocationFlags::DEDICATED_MEMORY_ALLOCATOR | AllocationFlags::EXISTING_MEMORY_ALLOCATOR),
        AllocationOptions::new(64).with_flags(AllocationFlags::from_bits_retain(1 << 9)),
    ];

    for options in &invalid {
        assert!(m.try_allocate(options).is_err());
        assert!(m.allocate(options).is_err());
    }
    assert_eq!(m.allocator_count(), 0);
    assert_eq!(m.byte_length(), 0);
    assert_eq!(m.operation_count(), 0);
    assert_eq!(m.stats().failed_allocations, 0);
}

#[test]
fn test_validation_error_variants() {
    let mut m = manager_with(config());
    assert!(matches!(
        m.try_allocate(&AllocationOptions::new(64).with_alignment(3)),
        Err(MemoryError::InvalidAlignment(3))
    ));
    assert!(matches!(
        m.try_allocate(&AllocationOptions::new(0)),
        Err(MemoryError::ZeroLengthAllocation)
    ));
    assert!(matches!(
        m.try_allocate(
            &AllocationOptions::new(64)
                .with_flags(AllocationFlags::DEDICATED_MEMORY_ALLOCATOR | AllocationFlags::EXISTING_MEMORY_ALLOCATOR)
        ),
        Err(MemoryError::ConflictingFlags)
    ));
}

// ── Allocator policy ───────────────────────────────────────────

#[test]
fn test_single_allocator_limit() {
    let mut m = manager_with(ManagerConfig {
        maximum_allocator_count: Some(1),
        minimum_allocator_byte_length: ByteSize::from_mb(1),
        ..Default::default()
    });

    let small = m.try_allocate(&AllocationOptions::new(512 * KIB)).unwrap();
    assert!(small.is_some());
    assert!(m.try_allocate(&AllocationOptions::new(2 * MIB)).unwrap().is_none());

    let err = m.allocate(&AllocationOptions::new(2 * MIB)).unwrap_err();
    assert!(matches!(
        err,
        MemoryError::OutOfMemory {
            requested_bytes,
            allocator_count: 1,
            ..
        } if requested_bytes == 2 * MIB
    ));
    assert_eq!(m.allocator_count(), 1);
    assert_balanced(&m);
}

#[test]
fn test_dedicated_allocator_lifecycle() {
    let mut m = manager_with(config());
    let region = m
        .allocate(&AllocationOptions::new(64 * KIB).with_flags(AllocationFlags::DEDICATED_MEMORY_ALLOCATOR))
        .unwrap();

    let info = m.info();
    assert_eq!(info.allocator_count(), 1);
    assert!(info.allocators[0].is_dedicated);
    assert_eq!(info.allocators[0].byte_length, 64 * KIB);

    m.free(region).unwrap();
    assert_eq!(m.allocator_count(), 0);
    assert_eq!(m.byte_length(), 0);
    assert_eq!(m.stats().allocators_retired, 1);
}

#[test]
fn test_dedicated_allocator_is_never_shared() {
    let mut m = manager_with(config());
    let dedicated = m
        .allocate(&AllocationOptions::new(2 * MIB).with_flags(AllocationFlags::DEDICATED_MEMORY_ALLOCATOR))
        .unwrap();
    let shared = m.allocate(&AllocationOptions::new(KIB)).unwrap();
    assert_ne!(dedicated.allocator(), shared.allocator());
    assert_eq!(m.allocator_count(), 2);
}

#[test]
fn test_minimum_allocator_count_floor() {
    let mut m = manager_with(ManagerConfig {
        minimum_allocator_count: 2,
        ..config()
    });
    assert_eq!(m.allocator_count(), 2);

    let regions: Vec<_> = (0..4).map(|_| m.allocate(&AllocationOptions::new(MIB)).unwrap()).collect();
    assert_eq!(m.allocator_count(), 4);
    for region in regions {
        m.free(region).unwrap();
    }
    assert_eq!(m.allocator_count(), 2);
    assert_balanced(&m);
}

#[test]
fn test_budget_honoured_unless_exceeded() {
    let mut m = manager_with(ManagerConfig {
        maximum_byte_length: Some(ByteSize::from_mb(2)),
        ..config()
    });
    let _a = m.allocate(&AllocationOptions::new(MIB)).unwrap();
    let _b = m.allocate(&AllocationOptions::new(MIB)).unwrap();
    assert!(m.try_allocate(&AllocationOptions::new(MIB)).unwrap().is_none());

    let over = m
        .allocate(&AllocationOptions::new(MIB).with_flags(AllocationFlags::EXCEED_BUDGET))
        .unwrap();
    assert_eq!(m.byte_length(), 3 * MIB);
    m.free(over).unwrap();
    assert_eq!(m.byte_length(), 2 * MIB);
}

// ── Batch allocation ───────────────────────────────────────────

#[test]
fn test_batch_larger_than_destination() {
    let mut m = manager_with(config());
    let requests = vec![AllocationOptions::new(KIB); 5];
    let mut destination: [Option<MemoryRegion>; 4] = [None; 4];

    let err = m.try_allocate_batch(&requests, &mut destination).unwrap_err();
    assert!(matches!(err, MemoryError::DestinationTooSmall { requested: 5, capacity: 4 }));
    assert!(destination.iter().all(Option::is_none));
    assert_eq!(m.allocated_byte_length(), 0);
    assert_eq!(m.allocator_count(), 0);
}

#[test]
fn test_batch_success() {
    let mut m = manager_with(config());
    let requests = [
        AllocationOptions::new(KIB),
        AllocationOptions::new(2 * KIB).with_alignment(4096),
        AllocationOptions::new(3 * KIB).with_flags(AllocationFlags::DEDICATED_MEMORY_ALLOCATOR),
    ];
    let mut destination: [Option<MemoryRegion>; 5] = [None; 5];

    assert!(m.try_allocate_batch(&requests, &mut destination).unwrap());
    let regions: Vec<_> = destination.iter().flatten().copied().collect();
    assert_eq!(regions.len(), 3);
    assert_eq!(regions[0].byte_length(), KIB);
    assert_eq!(regions[1].offset() % 4096, 0);
    assert_eq!(regions[2].byte_length(), 3 * KIB);
    assert!(destination[3].is_none());
    assert_eq!(m.allocated_byte_length(), 6 * KIB);
}

#[test]
fn test_batch_rolls_back_on_exhaustion() {
    let mut m = manager_with(ManagerConfig {
        maximum_allocator_count: Some(1),
        ..config()
    });
    let requests = [
        AllocationOptions::new(256 * KIB),
        AllocationOptions::new(256 * KIB),
        AllocationOptions::new(4 * MIB),
    ];
    let mut destination: [Option<MemoryRegion>; 3] = [None; 3];

    assert!(!m.try_allocate_batch(&requests, &mut destination).unwrap());
    assert!(destination.iter().all(Option::is_none));
    assert_eq!(m.allocated_byte_length(), 0);
    assert_balanced(&m);
}

#[test]
fn test_rolled_back_batch_counts_as_one_failure() {
    let mut m = manager_with(ManagerConfig {
        maximum_allocator_count: Some(1),
        ..config()
    });
    let requests = [
        AllocationOptions::new(256 * KIB),
        AllocationOptions::new(256 * KIB),
        AllocationOptions::new(4 * MIB),
    ];
    let mut destination: [Option<MemoryRegion>; 3] = [None; 3];

    assert!(!m.try_allocate_batch(&requests, &mut destination).unwrap());
    let stats = m.stats();
    assert_eq!(stats.total_allocations, 0);
    assert_eq!(stats.failed_allocations, 1);
    assert_eq!(stats.total_frees, 0);
    assert_eq!(stats.cumulative_allocated_bytes, 0);
    assert_eq!(m.operation_count(), 1);

    let region = m.allocate(&AllocationOptions::new(KIB)).unwrap();
    assert_eq!(m.stats().total_allocations, 1);
    assert_eq!(m.operation_count(), 2);
    m.free(region).unwrap();
}

#[test]
fn test_batch_validates_every_request_first() {
    let mut m = manager_with(config());
    let requests = [AllocationOptions::new(KIB), AllocationOptions::new(0)];
    let mut destination: [Option<MemoryRegion>; 2] = [None; 2];

    assert!(m.try_allocate_batch(&requests, &mut destination).is_err());
    assert_eq!(m.allocator_count(), 0);
    assert_eq!(m.operation_count(), 0);
}

// ── Minimum byte length ────────────────────────────────────────

#[test]
fn test_set_minimum_is_idempotent() {
    let mut m = manager_with(config());
    assert!(m.try_set_minimum_byte_length(5 * MIB).unwrap());
    let first = (m.byte_length(), m.allocator_count(), m.minimum_byte_length());

    assert!(m.try_set_minimum_byte_length(5 * MIB).unwrap());
    let second = (m.byte_length(), m.allocator_count(), m.minimum_byte_length());
    assert_eq!(first, second);
    assert!(m.byte_length() >= 5 * MIB);
}

#[test]
fn test_minimum_keeps_pool_from_shrinking() {
    let mut m = manager_with(config());
    assert!(m.try_set_minimum_byte_length(2 * MIB).unwrap());
    let floor = m.byte_length();

    let regions: Vec<_> = (0..6).map(|_| m.allocate(&AllocationOptions::new(MIB)).unwrap()).collect();
    for region in regions {
        m.free(region).unwrap();
        assert!(m.byte_length() >= 2 * MIB);
    }
    assert_eq!(m.byte_length(), floor);
}

#[test]
fn test_dedicated_bytes_do_not_back_the_minimum() {
    let mut m = manager_with(config());
    let dedicated = m
        .allocate(&AllocationOptions::new(2 * MIB).with_flags(AllocationFlags::DEDICATED_MEMORY_ALLOCATOR))
        .unwrap();
    assert!(m.try_set_minimum_byte_length(2 * MIB).unwrap());
    assert!(m.byte_length() >= 4 * MIB);

    m.free(dedicated).unwrap();
    assert!(m.byte_length() >= m.minimum_byte_length());
    assert!(m.info().allocators.iter().all(|a| !a.is_dedicated));
    assert_balanced(&m);
}

#[test]
fn test_minimum_refused_by_budget() {
    let mut m = manager_with(ManagerConfig {
        maximum_byte_length: Some(ByteSize::from_mb(4)),
        ..config()
    });
    assert!(!m.try_set_minimum_byte_length(8 * MIB).unwrap());
    assert_eq!(m.byte_length(), 0);
    assert_eq!(m.minimum_byte_length(), 0);
}

// ── Factories ──────────────────────────────────────────────────

#[test]
fn test_closure_factory_receives_create_options() {
    let created = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&created);
    let factory = move |device: &DeviceContext,
                        options: AllocatorCreateOptions|
          -> Result<Box<dyn MemoryAllocator>, MemoryError> {
        assert_eq!(device.device_name, "gpu0");
        assert!(options.on_free.is_some());
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FreeListAllocator::new(options)))
    };

    let mut m = GraphicsMemoryManager::new(DeviceContext::new("test-adapter", "gpu0"), config(), factory).unwrap();
    let region = m.allocate(&AllocationOptions::new(KIB)).unwrap();
    m.free(region).unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(m.allocated_byte_length(), 0);
}

#[test]
fn test_device_limit_is_exhaustion_not_error() {
    let factory = FreeListAllocatorFactory::with_device_limit(2 * MIB);
    let device = factory.clone();
    let mut m = GraphicsMemoryManager::new(DeviceContext::host(), config(), factory).unwrap();

    let a = m.allocate(&AllocationOptions::new(MIB)).unwrap();
    let b = m.allocate(&AllocationOptions::new(MIB)).unwrap();
    assert_eq!(device.device_bytes_in_use(), 2 * MIB);
    assert!(m.try_allocate(&AllocationOptions::new(KIB)).unwrap().is_none());

    m.free(a).unwrap();
    m.free(b).unwrap();
    assert_eq!(device.device_bytes_in_use(), 0);
}

// ── Lifetime ───────────────────────────────────────────────────

#[test]
fn test_dispose_releases_device_memory() {
    let factory = FreeListAllocatorFactory::new();
    let device = factory.clone();
    let mut m = GraphicsMemoryManager::new(DeviceContext::host(), config(), factory).unwrap();
    let region = m.allocate(&AllocationOptions::new(MIB)).unwrap();
    assert_eq!(device.device_bytes_in_use(), MIB);

    m.dispose();
    assert_eq!(device.device_bytes_in_use(), 0);
    assert!(matches!(m.free(region), Err(MemoryError::Disposed)));
    assert!(matches!(m.try_set_minimum_byte_length(MIB), Err(MemoryError::Disposed)));
}

#[test]
fn test_drop_releases_device_memory() {
    let factory = FreeListAllocatorFactory::new();
    let device = factory.clone();
    {
        let mut m = GraphicsMemoryManager::new(DeviceContext::host(), config(), factory).unwrap();
        let _region = m.allocate(&AllocationOptions::new(MIB)).unwrap();
    }
    assert_eq!(device.device_bytes_in_use(), 0);
}

// ── Concurrency ────────────────────────────────────────────────

#[test]
fn test_shared_manager_under_contention() {
    let manager =
        SharedGraphicsMemoryManager::new(DeviceContext::host(), config(), FreeListAllocatorFactory::new()).unwrap();

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let manager = manager.clone();
            scope.spawn(move || {
                for i in 0..200 {
                    let size = (worker + 1) * 512 + i * 16;
                    let region = manager.allocate(&AllocationOptions::new(size)).unwrap();
                    assert!(region.byte_length() >= size);
                    manager.free(region).unwrap();
                }
            });
        }
    });

    assert_eq!(manager.allocated_byte_length(), 0);
    assert_eq!(manager.operation_count(), 8 * 200 * 2);
    manager.validate_integrity().unwrap();
}

#[test]
fn test_guards_across_threads() {
    let manager =
        SharedGraphicsMemoryManager::new(DeviceContext::host(), config(), FreeListAllocatorFactory::new()).unwrap();
    let guards: Vec<_> = (0..16)
        .map(|_| manager.allocate_guarded(&AllocationOptions::new(8 * KIB)).unwrap())
        .collect();
    assert_eq!(manager.allocated_byte_length(), 16 * 8 * KIB);

    std::thread::spawn(move || drop(guards)).join().unwrap();
    assert_eq!(manager.allocated_byte_length(), 0);
}

#[test]
fn test_handle_from_config() {
    let config = ManagerConfig::from_toml(
        r#"
        externally_synchronized = true
        minimum_allocator_count = 1
        minimum_allocator_byte_length = "1M"
        maximum_shared_allocator_byte_length = "16M"
        "#,
    )
    .unwrap();
    let mut handle = MemoryManagerHandle::new(DeviceContext::host(), config, FreeListAllocatorFactory::new()).unwrap();
    assert!(handle.is_externally_synchronized());
    assert_eq!(handle.byte_length(), MIB);

    let region = handle.allocate(&AllocationOptions::new(KIB)).unwrap();
    handle.free(region).unwrap();
    assert_eq!(handle.info().allocator_count(), 1);
}
