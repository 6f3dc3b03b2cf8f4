// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Vivante G2D backend (`libg2d`).
//!
//! `g2d_alloc` has no alignment parameter, so alignment is emulated: the
//! request is enlarged by `alignment` bytes and both returned addresses are
//! rounded up. G2D memory is permanently mapped, so map/unmap only keep
//! the bookkeeping that catches invalid redundant mappings.

use crate::backend::{AllocatorBackend, BackendBuffer};
use crate::types::align_up;
use crate::{DmaBufferError, G2dConfig, MappingFlags, MappingState, PhysicalAddress};
use std::ffi::{c_int, c_void};
use std::ptr::NonNull;

/// Layout of `struct g2d_buf` from `g2d.h`.
#[repr(C)]
#[allow(dead_code)]
struct G2dBuf {
    buf_handle: *mut c_void,
    buf_vaddr: *mut c_void,
    buf_paddr: c_int,
    buf_size: c_int,
}

#[link(name = "g2d")]
extern "C" {
    fn g2d_alloc(size: c_int, cacheable: c_int) -> *mut G2dBuf;
    fn g2d_free(buf: *mut G2dBuf) -> c_int;
}

/// Size actually requested from G2D for `size` bytes at `alignment`.
fn padded_size(size: usize, alignment: usize) -> Option<usize> {
    if alignment > 1 {
        size.checked_add(alignment)
    } else {
        Some(size)
    }
}

/// Allocator backed by `g2d_alloc`.
#[derive(Debug)]
pub struct G2dAllocator {
    cacheable: bool,
}

impl G2dAllocator {
    pub fn new(config: &G2dConfig) -> Self {
        Self {
            cacheable: config.cacheable,
        }
    }
}

impl AllocatorBackend for G2dAllocator {
    fn name(&self) -> &'static str {
        "g2d"
    }

    fn allocate(
        &mut self,
        size: usize,
        alignment: usize,
    ) -> Result<Box<dyn BackendBuffer>, DmaBufferError> {
        let out_of_memory = || DmaBufferError::OutOfMemory { requested: size };
        let actual_size = padded_size(size, alignment).ok_or_else(out_of_memory)?;
        let requested = c_int::try_from(actual_size).map_err(|_| out_of_memory())?;

        // SAFETY: plain FFI call; a null result means failure.
        let raw = unsafe { g2d_alloc(requested, c_int::from(self.cacheable)) };
        let Some(raw) = NonNull::new(raw) else {
            return Err(DmaBufferError::OutOfMemory { requested: size });
        };

        // SAFETY: `raw` points to a live g2d_buf until g2d_free.
        let (vaddr, paddr) = unsafe {
            let buf = raw.as_ref();
            (buf.buf_vaddr as u64, buf.buf_paddr as u32 as u64)
        };
        let virtual_address = align_up(vaddr, alignment) as *mut u8;

        Ok(Box::new(G2dBuffer {
            raw,
            virtual_address: NonNull::new(virtual_address),
            physical_address: PhysicalAddress(align_up(paddr, alignment)),
            size,
            actual_size,
            mapping: MappingState::new(),
        }))
    }
}

/// One G2D allocation.
#[derive(Debug)]
pub struct G2dBuffer {
    raw: NonNull<G2dBuf>,
    virtual_address: Option<NonNull<u8>>,
    physical_address: PhysicalAddress,
    size: usize,
    actual_size: usize,
    mapping: MappingState,
}

// SAFETY: libg2d buffers are not bound to the allocating thread.
unsafe impl Send for G2dBuffer {}

impl G2dBuffer {
    /// Bytes requested from G2D, including the alignment padding.
    pub fn actual_size(&self) -> usize {
        self.actual_size
    }
}

impl BackendBuffer for G2dBuffer {
    fn deallocate(self: Box<Self>) {
        // SAFETY: `raw` came from g2d_alloc and is freed exactly once here.
        let ret = unsafe { g2d_free(self.raw.as_ptr()) };
        if ret != 0 {
            tracing::warn!(ret, size = self.actual_size, "g2d_free failed");
        }
    }

    fn map(&mut self, flags: MappingFlags) -> Result<Option<NonNull<u8>>, DmaBufferError> {
        if let Some(flags) = self.mapping.acquire(flags) {
            self.mapping.mark_mapped(flags);
        }
        Ok(self.virtual_address)
    }

    fn unmap(&mut self) {
        self.mapping.release();
    }

    fn start_sync_session(&mut self) {}

    fn stop_sync_session(&mut self) {}

    fn physical_address(&self) -> PhysicalAddress {
        self.physical_address
    }

    fn size(&self) -> usize {
        self.size
    }
}
