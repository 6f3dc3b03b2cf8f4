// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # dmabuf
//!
//! Command-line probe for the dma-buffer allocators.
//!
//! ## Usage
//! ```bash
//! # Which backends does this build support?
//! dmabuf backends
//!
//! # Allocate four 1 MiB buffers from the default backend and map each
//! dmabuf alloc --type default --size 1048576 --count 4 --map
//!
//! # Show the effective configuration
//! dmabuf --config /etc/dmabuf.toml config
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "dmabuf",
    about = "Allocate and inspect DMA buffers shared with hardware devices",
    version,
    author
)]
struct Cli {
    /// Path to a TOML allocator configuration file.
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
    /// List buffer types and whether their backend is compiled in.
    Backends,

    /// Allocate buffers, print their properties, then release them.
    Alloc {
        /// Buffer type: default, dma-heap, ion, dwl, ipu, g2d, pxp.
        #[arg(short = 't', long = "type", default_value = "default")]
        buffer_type: String,

        /// Size of each buffer in bytes.
        #[arg(short, long)]
        size: usize,

        /// Physical address alignment in bytes (0 or 1: none).
        #[arg(short, long, default_value_t = 0)]
        alignment: usize,

        /// Number of buffers to allocate.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Map and unmap each buffer once.
        #[arg(short, long)]
        map: bool,
    },

    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging based on verbosity.
    commands::init_tracing(cli.verbose);

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Backends => commands::backends::execute(&config),
        Commands::Alloc {
            buffer_type,
            size,
            alignment,
            count,
            map,
        } => commands::alloc::execute(&config, &buffer_type, size, alignment, count, map),
        Commands::Config => commands::config::execute(&config),
    }
}
