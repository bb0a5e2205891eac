// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommand implementations and shared setup.

pub mod config;
pub mod simulate;
pub mod stress;

use anyhow::Context;
use graphics_memory::{ByteSize, ManagerConfig};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Reads the config file if given, then applies `GRAPHICS_MEMORY_*` overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ManagerConfig> {
    let base = match path {
        Some(path) => ManagerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ManagerConfig::default(),
    };
    let config = base
        .with_vars(std::env::vars())
        .context("invalid GRAPHICS_MEMORY_* environment override")?;
    tracing::debug!("effective config: {config:?}");
    Ok(config)
}

/// Parses a comma-separated list of sizes such as `"64K, 1M,2G"`.
pub fn parse_sizes(list: &str) -> anyhow::Result<Vec<ByteSize>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| ByteSize::parse(s).with_context(|| format!("invalid size '{s}'")))
        .collect()
}
