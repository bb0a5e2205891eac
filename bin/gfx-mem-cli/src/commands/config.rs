// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `gfx-mem config` command: print the effective configuration.

use graphics_memory::ManagerConfig;

pub async fn execute(config: ManagerConfig) -> anyhow::Result<()> {
    println!("# Effective graphics-memory configuration");
    println!("# (defaults, then --config file, then GRAPHICS_MEMORY_* variables)");
    print!("{}", config.to_toml()?);

    if config.maximum_allocator_count.is_none() {
        println!("# maximum_allocator_count: unbounded");
    }
    if config.maximum_byte_length.is_none() {
        println!("# maximum_byte_length: unbounded");
    }
    Ok(())
}
