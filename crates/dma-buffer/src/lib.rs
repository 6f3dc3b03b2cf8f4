// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # dma-buffer
//!
//! Allocation of physically contiguous memory shared between the CPU and
//! hardware devices (video engines, GPUs, display controllers), behind one
//! allocator interface with interchangeable backends.
//!
//! # Key Components
//!
//! - [`DmaBufferAllocator`]: the dispatch core. Created by [`BufferType`],
//!   from an [`AllocatorConfig`], or around a custom [`AllocatorBackend`].
//!   Keeps optional per-allocator [`AllocatorStats`].
//! - [`DmaBuffer`]: an allocated region. Exposes its physical address,
//!   file descriptor and size, and can be mapped for CPU access.
//! - [`MappedDmaBuffer`] / [`SyncSession`]: RAII guards for a mapping and
//!   for a manual cache-sync session.
//! - [`WrappedDmaBuffer`]: presents memory allocated elsewhere as a
//!   [`DmaBuffer`].
//! - [`backend`]: the backend contract and the DMA-BUF heap and G2D
//!   implementations.
//!
//! # Ownership Model
//!
//! ```text
//! DmaBufferAllocator::allocate(size, alignment)
//!       │
//!       ▼
//!   DmaBuffer  ◄─── owns Box<dyn BackendBuffer>, holds Arc<AllocatorInner>
//!       │
//!       │  drop() / deallocate()
//!       ▼
//!   BackendBuffer::deallocate()  ──► statistics decremented
//! ```
//!
//! # Features
//!
//! - `dma-heap` (default): Linux DMA-BUF heap backend.
//! - `alloc-stats` (default): per-allocator statistics.
//! - `g2d`: vendor G2D backend, links against `libg2d`.
//!
//! # Example
//! ```
//! use dma_buffer::{DmaBuffer, MappingFlags, PhysicalAddress, WrappedDmaBuffer};
//!
//! // Memory handed over by another component.
//! let buffer: DmaBuffer = WrappedDmaBuffer::new()
//!     .with_physical_address(PhysicalAddress(0x8000_0000))
//!     .with_size(4096)
//!     .into();
//!
//! assert_eq!(buffer.physical_address().as_u64(), 0x8000_0000);
//! assert_eq!(buffer.fd(), -1);
//! ```

mod allocator;
pub mod backend;
mod buffer;
mod config;
mod error;
mod flags;
mod mapping;
mod stats;
mod types;
mod wrapped;

pub use allocator::DmaBufferAllocator;
pub use backend::{AllocatorBackend, BackendBuffer};
pub use buffer::{DmaBuffer, MappedDmaBuffer, SyncSession};
pub use config::{AllocatorConfig, DmaHeapConfig, G2dConfig, SyncMethod, DEFAULT_DMA_HEAP_NODE};
pub use error::DmaBufferError;
pub use flags::MappingFlags;
pub use mapping::MappingState;
pub use stats::AllocatorStats;
pub use types::{BufferType, PhysicalAddress};
pub use wrapped::{WrappedDmaBuffer, WrappedMapFn, WrappedUnmapFn};
