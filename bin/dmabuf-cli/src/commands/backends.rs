// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `dmabuf backends` command: list buffer types and their availability.

use dma_buffer::{AllocatorConfig, BufferType};

pub fn execute(config: &AllocatorConfig) -> anyhow::Result<()> {
    println!("  {:<10} {:<10} Notes", "Type", "Built in");
    println!("  {}", "-".repeat(44));

    for kind in BufferType::ALL {
        let note = if kind == BufferType::Default {
            format!("resolves to {}", config.default_backend)
        } else if kind == config.default_backend {
            "configured default".to_string()
        } else {
            String::new()
        };
        let available = if kind.is_compiled_in() { "yes" } else { "no" };
        println!("  {:<10} {:<10} {note}", kind.name(), available);
    }

    if BufferType::compiled_in().is_empty() {
        println!();
        println!("  No backend compiled in; only wrapped buffers are usable.");
    }
    Ok(())
}
