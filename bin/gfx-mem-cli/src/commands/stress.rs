// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `gfx-mem stress` command: concurrent allocate/free on a shared manager.
//!
//! Every worker runs on a blocking thread and keeps a small window of live
//! regions, freeing the oldest as it allocates new ones. Request sizes and
//! alignments come from a `ChaCha8Rng` seeded with the worker index, so a run
//! replays the same requests. The pool accounting is checked after all
//! workers finish.

use anyhow::Context;
use graphics_memory::{
    AllocationOptions, ByteSize, DeviceContext, FreeListAllocatorFactory, ManagerConfig, MemoryError, MemoryRegion,
    SharedGraphicsMemoryManager,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use std::time::Instant;

/// Live regions each worker keeps before freeing the oldest.
const WINDOW: usize = 8;

/// Largest alignment exponent drawn for a request (alignment up to 4 KiB).
const MAX_ALIGNMENT_SHIFT: u32 = 12;

pub async fn execute(config: ManagerConfig, workers: usize, iterations: usize, max_size: String) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║           gfx-mem · Stress Test                     ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    anyhow::ensure!(workers > 0, "at least one worker is required");
    let max_size = ByteSize::parse(&max_size).with_context(|| format!("invalid --max-size '{max_size}'"))?;

    if config.externally_synchronized {
        tracing::warn!("stress always uses a shared manager; ignoring externally_synchronized");
    }
    let manager = SharedGraphicsMemoryManager::new(DeviceContext::host(), config, FreeListAllocatorFactory::new())?;

    println!("  Workers:     {workers}");
    println!("  Iterations:  {iterations} per worker");
    println!("  Max size:    {max_size}");
    println!();

    let started = Instant::now();
    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let manager = manager.clone();
            let max = max_size.as_bytes();
            tokio::task::spawn_blocking(move || run_worker(&manager, worker, iterations, max))
        })
        .collect();

    let mut failed = 0u64;
    for handle in handles {
        failed += handle.await.context("worker panicked")??;
    }
    let elapsed = started.elapsed();

    manager.validate_integrity()?;
    let stats = manager.stats();
    let ops = manager.operation_count();

    println!("  Elapsed:     {:.2} ms", elapsed.as_secs_f64() * 1000.0);
    println!("  Operations:  {ops} ({:.0} ops/s)", ops as f64 / elapsed.as_secs_f64().max(1e-9));
    println!("  Exhausted:   {failed} requests");
    println!("  Live bytes:  {}", manager.allocated_byte_length());
    println!();
    println!("{}", manager.info().summary());
    println!("{}", stats.summary());

    Ok(())
}

/// Returns how many requests found the pool exhausted.
fn run_worker(
    manager: &SharedGraphicsMemoryManager,
    worker: usize,
    iterations: usize,
    max_size: usize,
) -> Result<u64, MemoryError> {
    let mut live: VecDeque<MemoryRegion> = VecDeque::with_capacity(WINDOW);
    let mut failed = 0;
    let mut rng = ChaCha8Rng::seed_from_u64(worker as u64);

    for _ in 0..iterations {
        match manager.try_allocate(&next_request(&mut rng, max_size))? {
            Some(region) => live.push_back(region),
            None => failed += 1,
        }
        if live.len() >= WINDOW {
            if let Some(region) = live.pop_front() {
                manager.free(region)?;
            }
        }
    }

    for region in live {
        manager.free(region)?;
    }
    tracing::debug!("worker {worker} done: {failed} exhausted requests");
    Ok(failed)
}

fn next_request(rng: &mut impl Rng, max_size: usize) -> AllocationOptions {
    let size = rng.gen_range(1..=max_size.max(1));
    let alignment = 1usize << rng.gen_range(0..=MAX_ALIGNMENT_SHIFT);
    AllocationOptions::new(size).with_alignment(alignment)
}
