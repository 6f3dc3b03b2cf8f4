// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for the allocator dispatch path.
//!
//! The backend does no real work, so the numbers measure the overhead of
//! dispatch, statistics and buffer handle management.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dma_buffer::{
    AllocatorBackend, BackendBuffer, DmaBuffer, DmaBufferAllocator, DmaBufferError, MappingFlags,
    PhysicalAddress, WrappedDmaBuffer,
};
use std::ptr::NonNull;

#[derive(Debug)]
struct NullBackend {
    next: u64,
}

#[derive(Debug)]
struct NullBuffer {
    address: u64,
    size: usize,
}

impl AllocatorBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn allocate(
        &mut self,
        size: usize,
        _alignment: usize,
    ) -> Result<Box<dyn BackendBuffer>, DmaBufferError> {
        self.next += 0x1000;
        Ok(Box::new(NullBuffer {
            address: self.next,
            size,
        }))
    }
}

impl BackendBuffer for NullBuffer {
    fn deallocate(self: Box<Self>) {}

    fn map(&mut self, _flags: MappingFlags) -> Result<Option<NonNull<u8>>, DmaBufferError> {
        Ok(None)
    }

    fn unmap(&mut self) {}

    fn start_sync_session(&mut self) {}

    fn stop_sync_session(&mut self) {}

    fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress(self.address)
    }

    fn size(&self) -> usize {
        self.size
    }
}

fn bench_allocate_deallocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_deallocate");
    for stats in [false, true] {
        let allocator =
            DmaBufferAllocator::from_backend(Box::new(NullBackend { next: 0 }), stats);
        group.bench_with_input(BenchmarkId::new("stats", stats), &allocator, |b, allocator| {
            b.iter(|| {
                let buffer = allocator.allocate(black_box(4096), 0).unwrap();
                buffer.deallocate();
            })
        });
    }
    group.finish();
}

fn bench_buffer_queries(c: &mut Criterion) {
    let allocator = DmaBufferAllocator::from_backend(Box::new(NullBackend { next: 0 }), true);
    let buffer = allocator.allocate(4096, 0).unwrap();
    c.bench_function("buffer_queries", |b| {
        b.iter(|| {
            black_box(buffer.physical_address());
            black_box(buffer.fd());
            black_box(buffer.size());
        })
    });
}

fn bench_wrap(c: &mut Criterion) {
    c.bench_function("wrap_external_buffer", |b| {
        b.iter(|| {
            let buffer: DmaBuffer = WrappedDmaBuffer::new()
                .with_physical_address(PhysicalAddress(black_box(0x8000_0000)))
                .with_size(4096)
                .into();
            black_box(buffer.size());
        })
    });
}

criterion_group!(
    benches,
    bench_allocate_deallocate,
    bench_buffer_queries,
    bench_wrap
);
criterion_main!(benches);
