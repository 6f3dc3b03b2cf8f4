// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommand implementations and shared setup.

pub mod alloc;
pub mod backends;
pub mod config;

use dma_buffer::AllocatorConfig;
use std::path::Path;

/// Installs a `fmt` subscriber. `RUST_LOG` wins over the `-v` count.
pub fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the configuration file, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AllocatorConfig> {
    match path {
        Some(path) => {
            let config = AllocatorConfig::from_file(path)?;
            tracing::info!(path = %path.display(), "loaded allocator configuration");
            Ok(config)
        }
        None => Ok(AllocatorConfig::default()),
    }
}
