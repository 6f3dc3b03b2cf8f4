// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Wrapping memory that was allocated elsewhere.
//!
//! A [`WrappedDmaBuffer`] describes an existing DMA region (for example a
//! buffer imported from a video decoder) by its physical address, fd and
//! size. Converting it into a [`DmaBuffer`] lets it flow through the same
//! API as natively allocated buffers.
//!
//! All wrapped buffers belong to one process-wide adapter allocator. The
//! adapter never allocates, keeps no statistics and is never torn down.
//! Mapping is delegated to optional caller-supplied functions; without
//! them `map` yields `Ok(None)`.
//!
//! The wrapped buffer does not take ownership of the fd.

use crate::allocator::AllocatorInner;
use crate::backend::{AllocatorBackend, BackendBuffer};
use crate::stats::StatsBlock;
use crate::{DmaBuffer, DmaBufferError, MappingFlags, PhysicalAddress};
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

/// Caller-supplied map function of a wrapped buffer.
pub type WrappedMapFn =
    Box<dyn FnMut(MappingFlags) -> Result<NonNull<u8>, DmaBufferError> + Send>;

/// Caller-supplied unmap function of a wrapped buffer.
pub type WrappedUnmapFn = Box<dyn FnMut() + Send>;

const ADAPTER_NAME: &str = "wrapped";

/// Description of an externally allocated DMA region.
///
/// # Example
/// ```
/// use dma_buffer::{DmaBuffer, PhysicalAddress, WrappedDmaBuffer};
///
/// let buffer: DmaBuffer = WrappedDmaBuffer::new()
///     .with_physical_address(PhysicalAddress(0x9000_0000))
///     .with_fd(42)
///     .with_size(8192)
///     .into();
///
/// assert_eq!(buffer.physical_address(), PhysicalAddress(0x9000_0000));
/// assert_eq!(buffer.fd(), 42);
/// assert_eq!(buffer.size(), 8192);
/// ```
pub struct WrappedDmaBuffer {
    /// File descriptor of the region, reported as given. `-1` if unset.
    pub fd: i32,
    pub physical_address: PhysicalAddress,
    pub size: usize,
    map: Option<WrappedMapFn>,
    unmap: Option<WrappedUnmapFn>,
}

impl WrappedDmaBuffer {
    /// An empty description: no fd, null address, zero size, no mapping.
    pub fn new() -> Self {
        Self {
            fd: -1,
            physical_address: PhysicalAddress::default(),
            size: 0,
            map: None,
            unmap: None,
        }
    }

    pub fn with_fd(mut self, fd: i32) -> Self {
        self.fd = fd;
        self
    }

    pub fn with_physical_address(mut self, address: PhysicalAddress) -> Self {
        self.physical_address = address;
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Sets the function called by [`DmaBuffer::map`].
    pub fn with_map_fn<F>(mut self, map: F) -> Self
    where
        F: FnMut(MappingFlags) -> Result<NonNull<u8>, DmaBufferError> + Send + 'static,
    {
        self.map = Some(Box::new(map));
        self
    }

    /// Sets the function called by [`DmaBuffer::unmap`].
    pub fn with_unmap_fn<F>(mut self, unmap: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.unmap = Some(Box::new(unmap));
        self
    }

    /// Attaches the description to the wrapped-buffer adapter.
    pub fn into_buffer(self) -> DmaBuffer {
        DmaBuffer::new(Box::new(self), wrapped_allocator())
    }
}

impl Default for WrappedDmaBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl From<WrappedDmaBuffer> for DmaBuffer {
    fn from(wrapped: WrappedDmaBuffer) -> Self {
        wrapped.into_buffer()
    }
}

impl std::fmt::Debug for WrappedDmaBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedDmaBuffer")
            .field("fd", &self.fd)
            .field("physical_address", &self.physical_address)
            .field("size", &self.size)
            .field("has_map_fn", &self.map.is_some())
            .field("has_unmap_fn", &self.unmap.is_some())
            .finish()
    }
}

impl BackendBuffer for WrappedDmaBuffer {
    fn deallocate(self: Box<Self>) {
        // The memory is owned elsewhere.
    }

    fn map(&mut self, flags: MappingFlags) -> Result<Option<NonNull<u8>>, DmaBufferError> {
        match self.map.as_mut() {
            Some(map) => map(flags).map(Some),
            None => Ok(None),
        }
    }

    fn unmap(&mut self) {
        if let Some(unmap) = self.unmap.as_mut() {
            unmap();
        }
    }

    fn start_sync_session(&mut self) {}

    fn stop_sync_session(&mut self) {}

    fn physical_address(&self) -> PhysicalAddress {
        self.physical_address
    }

    fn fd(&self) -> Option<i32> {
        Some(self.fd)
    }

    fn size(&self) -> usize {
        self.size
    }
}

/// The adapter allocator behind every wrapped buffer.
#[derive(Debug)]
struct WrappedBufferAdapter;

impl AllocatorBackend for WrappedBufferAdapter {
    fn name(&self) -> &'static str {
        ADAPTER_NAME
    }

    fn allocate(
        &mut self,
        _size: usize,
        _alignment: usize,
    ) -> Result<Box<dyn BackendBuffer>, DmaBufferError> {
        // Wrapped buffers are built by the caller, never allocated here.
        Err(DmaBufferError::NotAllocatable { name: ADAPTER_NAME })
    }
}

/// The process-wide adapter allocator, created on first use.
fn wrapped_allocator() -> Arc<AllocatorInner> {
    static ADAPTER: OnceLock<Arc<AllocatorInner>> = OnceLock::new();
    Arc::clone(ADAPTER.get_or_init(|| {
        Arc::new(AllocatorInner::new(
            Box::new(WrappedBufferAdapter),
            StatsBlock::absent(),
        ))
    }))
}
