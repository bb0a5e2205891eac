// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `gfx-mem simulate` command: replay an allocation trace.
//!
//! Each size in the list becomes one request. The command prints where every
//! request landed (or why it failed), then the pool snapshot and cumulative
//! statistics.

use graphics_memory::{
    AllocationFlags, AllocationOptions, DeviceContext, FreeListAllocatorFactory, ManagerConfig, MemoryManagerHandle,
};
use std::collections::VecDeque;

pub async fn execute(config: ManagerConfig, sizes: String, dedicated: usize, free_every: usize) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║           gfx-mem · Allocation Trace                ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    let sizes = super::parse_sizes(&sizes)?;
    anyhow::ensure!(!sizes.is_empty(), "no sizes given");

    let mut manager = MemoryManagerHandle::new(DeviceContext::host(), config, FreeListAllocatorFactory::new())?;
    println!(
        "  Manager: {} synchronization, {} allocators at start",
        if manager.is_externally_synchronized() { "external" } else { "internal" },
        manager.info().allocator_count(),
    );
    println!();

    // ── Trace ──────────────────────────────────────────────────
    println!(
        "  {:>4} {:>10} {:>10} {:>14} {:>12} {:>12}",
        "#", "Size", "Kind", "Allocator", "Offset", "Pool MB",
    );
    println!("  {}", "-".repeat(68));

    let mut live = VecDeque::new();
    for (i, size) in sizes.iter().enumerate() {
        let n = i + 1;
        let is_dedicated = dedicated > 0 && n % dedicated == 0;
        let flags = if is_dedicated {
            AllocationFlags::DEDICATED_MEMORY_ALLOCATOR
        } else {
            AllocationFlags::empty()
        };
        let options = AllocationOptions::new(size.as_bytes()).with_flags(flags);
        let kind = if is_dedicated { "dedicated" } else { "shared" };

        match manager.try_allocate(&options)? {
            Some(region) => {
                println!(
                    "  {:>4} {:>10} {:>10} {:>14} {:>12} {:>12.2}",
                    n,
                    size.to_string(),
                    kind,
                    region.allocator().to_string(),
                    region.offset(),
                    mb(manager.byte_length()),
                );
                live.push_back(region);
            }
            None => {
                println!("  {:>4} {:>10} {:>10}     FAILED: out of memory", n, size.to_string(), kind);
            }
        }

        if free_every > 0 && n % free_every == 0 {
            if let Some(region) = live.pop_front() {
                manager.free(region)?;
                println!("  {:>4} {:>10} {:>10} {:>14}", "", "", "free", region.allocator().to_string());
            }
        }
        manager.validate_integrity()?;
    }
    println!();

    // ── Pool ───────────────────────────────────────────────────
    let info = manager.info();
    println!("  Pool");
    println!("   Byte length:  {:.2} MB in {} allocators", mb(info.byte_length), info.allocator_count());
    println!("   Allocated:    {:.2} MB in {} regions", mb(info.allocated_byte_length), info.region_count());
    println!("   Free:         {:.2} MB", mb(info.free_byte_length));
    for allocator in &info.allocators {
        println!(
            "   {:<14} {:>10.2} MB  {:>3} regions  largest free {:.2} MB{}",
            allocator.id.to_string(),
            mb(allocator.byte_length),
            allocator.region_count,
            mb(allocator.largest_free_region_byte_length),
            if allocator.is_dedicated { "  (dedicated)" } else { "" },
        );
    }
    println!();

    let live_count = live.len();
    for region in live.drain(..) {
        manager.free(region)?;
    }
    manager.validate_integrity()?;

    println!("  Released {live_count} remaining regions.");
    println!("{}", manager.info().summary());
    println!("{}", manager.stats().summary());

    manager.dispose();
    Ok(())
}

fn mb(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
