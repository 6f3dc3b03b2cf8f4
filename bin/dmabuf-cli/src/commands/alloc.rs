// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `dmabuf alloc` command: allocate buffers and report their properties.
//!
//! Buffers are kept alive until all of them are allocated so the peak in
//! the statistics summary reflects the whole batch.

use anyhow::Context;
use dma_buffer::{AllocatorConfig, BufferType, DmaBufferAllocator, MappingFlags};

pub fn execute(
    config: &AllocatorConfig,
    buffer_type: &str,
    size: usize,
    alignment: usize,
    count: usize,
    map: bool,
) -> anyhow::Result<()> {
    anyhow::ensure!(size > 0, "--size must be at least 1 byte");

    let kind: BufferType = buffer_type.parse()?;
    let allocator = DmaBufferAllocator::with_config(kind, config)
        .with_context(|| format!("cannot create {kind} allocator"))?;

    println!(
        "  Allocator: {} ({} x {} bytes, alignment {})",
        allocator.name(),
        count,
        size,
        alignment
    );
    println!();
    println!(
        "  {:<4} {:>12} {:>20} {:>6} {:>8}",
        "#", "Size", "Physical address", "FD", "Mapped"
    );
    println!("  {}", "-".repeat(54));

    let mut buffers = Vec::with_capacity(count);
    for index in 0..count {
        let mut buffer = allocator
            .allocate(size, alignment)
            .with_context(|| format!("allocation {index} of {size} bytes failed"))?;

        let mapped = if map {
            let ok = buffer.map(MappingFlags::READWRITE)?.is_some();
            if ok {
                buffer.unmap();
            }
            if ok { "yes" } else { "n/a" }
        } else {
            "-"
        };

        println!(
            "  {:<4} {:>12} {:>20} {:>6} {:>8}",
            index,
            buffer.size(),
            buffer.physical_address().to_string(),
            buffer.fd(),
            mapped
        );
        buffers.push(buffer);
    }

    for buffer in buffers {
        buffer.deallocate();
    }

    println!();
    if allocator.has_stats() {
        println!("  {}", allocator.stats().summary());
    } else {
        println!("  Statistics disabled.");
    }

    allocator.destroy();
    Ok(())
}
