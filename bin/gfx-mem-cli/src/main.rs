// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # gfx-mem
//!
//! Command-line driver for the graphics-memory manager.
//!
//! ## Usage
//! ```bash
//! # Replay an allocation trace, every 4th request dedicated
//! gfx-mem simulate --sizes 64K,1M,300M,4K --dedicated 4 --free-every 3
//!
//! # Hammer a shared manager from 8 workers
//! gfx-mem stress --workers 8 --iterations 10000
//!
//! # Print the effective configuration
//! gfx-mem --config ./gfx-mem.toml config
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "gfx-mem",
    about = "Drive and inspect a graphics memory sub-allocator",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file. GRAPHICS_MEMORY_* variables override it.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a list of allocation sizes against one manager.
    Simulate {
        /// Comma-separated request sizes (e.g., "64K,1M,300M").
        #[arg(short, long)]
        sizes: String,

        /// Make every Nth request dedicated (0 = never).
        #[arg(short, long, default_value_t = 0)]
        dedicated: usize,

        /// Free the oldest live region after every K allocations (0 = never).
        #[arg(short, long, default_value_t = 0)]
        free_every: usize,
    },

    /// Allocate and free concurrently from several workers on a shared manager.
    Stress {
        /// Number of blocking worker tasks.
        #[arg(short, long, default_value_t = 4)]
        workers: usize,

        /// Allocate/free rounds per worker.
        #[arg(short, long, default_value_t = 1000)]
        iterations: usize,

        /// Largest request size (e.g., "256K").
        #[arg(long, default_value = "256K")]
        max_size: String,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Simulate {
            sizes,
            dedicated,
            free_every,
        } => commands::simulate::execute(config, sizes, dedicated, free_every).await,
        Commands::Stress {
            workers,
            iterations,
            max_size,
        } => commands::stress::execute(config, workers, iterations, max_size).await,
        Commands::Config => commands::config::execute(config).await,
    }
}
