// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The DMA buffer handle and its RAII guards.
//!
//! [`DmaBuffer`] forwards every operation to its backend payload after
//! checking that the owning allocator is still alive. Dropping a
//! `DmaBuffer` deallocates it, so a buffer can never be used after it was
//! released; the borrow checker rejects it.
//!
//! [`MappedDmaBuffer`] and [`SyncSession`] turn the map/unmap and
//! start/stop pairs into scopes, keeping them balanced on every exit path.

use crate::allocator::AllocatorInner;
use crate::backend::BackendBuffer;
use crate::{DmaBufferError, MappingFlags, PhysicalAddress};
use std::ptr::NonNull;
use std::sync::Arc;

/// A region of memory shared between the CPU and a device.
pub struct DmaBuffer {
    /// Backend payload. `None` only while being released.
    payload: Option<Box<dyn BackendBuffer>>,
    /// Back-reference to the allocator that produced this buffer.
    allocator: Arc<AllocatorInner>,
}

impl DmaBuffer {
    pub(crate) fn new(payload: Box<dyn BackendBuffer>, allocator: Arc<AllocatorInner>) -> Self {
        Self {
            payload: Some(payload),
            allocator,
        }
    }

    fn check_allocator(&self, op: &str) {
        assert!(
            self.allocator.is_live(),
            "{op} called on a DMA buffer whose {} allocator was destroyed",
            self.allocator.name()
        );
    }

    fn payload(&self, op: &str) -> &dyn BackendBuffer {
        self.check_allocator(op);
        self.payload.as_deref().expect("buffer already released")
    }

    fn payload_mut(&mut self, op: &str) -> &mut dyn BackendBuffer {
        self.check_allocator(op);
        self.payload.as_deref_mut().expect("buffer already released")
    }

    /// Releases the backend resources and accounts the freed bytes.
    fn release(&mut self) {
        if let Some(payload) = self.payload.take() {
            // Size must be read before the payload is gone.
            let size = payload.size();
            payload.deallocate();
            self.allocator.stats().decrement(size);
            tracing::debug!(backend = self.allocator.name(), size, "deallocated DMA buffer");
        }
    }

    /// Deallocates the buffer.
    ///
    /// Equivalent to dropping it, except that it panics if the allocator
    /// was already destroyed.
    pub fn deallocate(mut self) {
        self.check_allocator("deallocate");
        self.release();
    }

    /// Maps the buffer into the process address space.
    ///
    /// Every successful map must be paired with exactly one
    /// [`unmap`](Self::unmap). Returns `Ok(None)` for buffers without a
    /// mapping mechanism (wrapped buffers lacking a map function).
    pub fn map(&mut self, flags: MappingFlags) -> Result<Option<NonNull<u8>>, DmaBufferError> {
        let name = self.allocator.name();
        let result = self.payload_mut("map").map(flags);
        match &result {
            Ok(ptr) => tracing::debug!(backend = name, ?flags, mapped = ptr.is_some(), "mapped DMA buffer"),
            Err(e) => tracing::warn!(backend = name, ?flags, error = %e, "mapping DMA buffer failed"),
        }
        result
    }

    /// Releases a mapping established by [`map`](Self::map).
    pub fn unmap(&mut self) {
        self.payload_mut("unmap").unmap();
        tracing::debug!(backend = self.allocator.name(), "unmapped DMA buffer");
    }

    /// Starts a manual sync session. Only meaningful for buffers mapped
    /// with [`MappingFlags::MANUAL_SYNC`].
    pub fn start_sync_session(&mut self) {
        self.payload_mut("start_sync_session").start_sync_session();
        tracing::trace!(backend = self.allocator.name(), "sync session started");
    }

    /// Stops a manual sync session.
    pub fn stop_sync_session(&mut self) {
        self.payload_mut("stop_sync_session").stop_sync_session();
        tracing::trace!(backend = self.allocator.name(), "sync session stopped");
    }

    /// Device-visible address of the buffer.
    pub fn physical_address(&self) -> PhysicalAddress {
        self.payload("physical_address").physical_address()
    }

    /// Exportable file descriptor, or `-1` if the backend has none.
    pub fn fd(&self) -> i32 {
        self.payload("fd").fd().unwrap_or(-1)
    }

    /// Size of the buffer in bytes.
    pub fn size(&self) -> usize {
        self.payload("size").size()
    }

    /// Name of the backend that owns this buffer.
    pub fn allocator_name(&self) -> &'static str {
        self.allocator.name()
    }

    /// Maps the buffer for the lifetime of the returned guard.
    ///
    /// Fails with [`DmaBufferError::NotMappable`] when the buffer has no
    /// mapping mechanism.
    pub fn map_guard(&mut self, flags: MappingFlags) -> Result<MappedDmaBuffer<'_>, DmaBufferError> {
        let flags = flags.normalized();
        let len = self.size();
        match self.map(flags)? {
            Some(ptr) => Ok(MappedDmaBuffer {
                buffer: self,
                ptr,
                len,
                flags,
            }),
            None => Err(DmaBufferError::NotMappable),
        }
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("DmaBuffer");
        s.field("backend", &self.allocator.name());
        if let (true, Some(payload)) = (self.allocator.is_live(), self.payload.as_deref()) {
            s.field("size", &payload.size())
                .field("physical_address", &payload.physical_address())
                .field("fd", &payload.fd().unwrap_or(-1));
        }
        s.finish()
    }
}

/// A mapped view of a [`DmaBuffer`]; unmaps on drop.
pub struct MappedDmaBuffer<'a> {
    buffer: &'a mut DmaBuffer,
    ptr: NonNull<u8>,
    len: usize,
    flags: MappingFlags,
}

impl<'a> MappedDmaBuffer<'a> {
    /// The mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the backend mapped `len` bytes at `ptr` and keeps them
        // mapped until the matching unmap in `drop`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The mapped bytes, writable.
    ///
    /// # Panics
    /// Panics if the buffer was mapped without write access.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        assert!(
            self.flags.contains(MappingFlags::WRITE),
            "buffer was mapped without write access"
        );
        // SAFETY: as in `as_slice`; `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn flags(&self) -> MappingFlags {
        self.flags
    }

    /// The buffer behind this mapping.
    pub fn buffer(&self) -> &DmaBuffer {
        &*self.buffer
    }

    /// Opens a manual sync session for the duration of the returned guard.
    pub fn sync_session(&mut self) -> SyncSession<'_, 'a> {
        self.buffer.start_sync_session();
        SyncSession { mapped: self }
    }
}

impl Drop for MappedDmaBuffer<'_> {
    fn drop(&mut self) {
        // After allocator teardown the payload unmaps itself on release.
        if self.buffer.allocator.is_live() {
            self.buffer.unmap();
        }
    }
}

impl std::fmt::Debug for MappedDmaBuffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedDmaBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Balanced start/stop bracket around CPU access to a mapped buffer.
pub struct SyncSession<'s, 'a> {
    mapped: &'s mut MappedDmaBuffer<'a>,
}

impl SyncSession<'_, '_> {
    pub fn as_slice(&self) -> &[u8] {
        self.mapped.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.mapped.as_mut_slice()
    }
}

impl Drop for SyncSession<'_, '_> {
    fn drop(&mut self) {
        if self.mapped.buffer.allocator.is_live() {
            self.mapped.buffer.stop_sync_session();
        }
    }
}

impl std::fmt::Debug for SyncSession<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession").field("mapped", &self.mapped).finish()
    }
}
