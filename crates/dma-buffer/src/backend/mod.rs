// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The backend contract and the in-tree backends.
//!
//! A backend is split in two traits:
//!
//! - [`AllocatorBackend`]: allocator-wide state (device handles, default
//!   flags) and the `allocate` hook. Its `Drop` impl is the destroy hook.
//! - [`BackendBuffer`]: one allocated region and every per-buffer hook.
//!
//! Backends never touch statistics; [`DmaBufferAllocator`](crate::DmaBufferAllocator)
//! does the accounting around `allocate` and `deallocate`.

#[cfg(all(feature = "dma-heap", target_os = "linux"))]
pub mod dma_heap;
#[cfg(feature = "g2d")]
pub mod g2d;

use crate::{AllocatorConfig, BufferType, DmaBufferError, MappingFlags, PhysicalAddress};
use std::fmt::Debug;
use std::ptr::NonNull;

/// Allocator-level hooks of a backend.
///
/// Implement this (together with [`BackendBuffer`]) to plug a custom
/// allocation mechanism into [`DmaBufferAllocator::from_backend`](crate::DmaBufferAllocator::from_backend),
/// for example to trace allocations or to hook up an existing allocator.
pub trait AllocatorBackend: Send + Debug {
    /// Short backend name used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Allocates at least `size` bytes whose physical address is aligned
    /// to `alignment` (0 and 1 mean "no alignment").
    ///
    /// `size` is never zero; the dispatch layer rejects that beforehand.
    fn allocate(
        &mut self,
        size: usize,
        alignment: usize,
    ) -> Result<Box<dyn BackendBuffer>, DmaBufferError>;
}

/// Per-buffer hooks of a backend.
pub trait BackendBuffer: Send + Debug {
    /// Releases the buffer's backend resources, unmapping it first if needed.
    fn deallocate(self: Box<Self>);

    /// Maps the buffer into the process address space.
    ///
    /// `Ok(None)` means the buffer has no mapping mechanism; this is not
    /// an error.
    fn map(&mut self, flags: MappingFlags) -> Result<Option<NonNull<u8>>, DmaBufferError>;

    /// Releases one mapping reference taken by [`map`](Self::map).
    fn unmap(&mut self);

    /// Starts a CPU access session (cache maintenance on cached memory).
    fn start_sync_session(&mut self);

    /// Stops a CPU access session.
    fn stop_sync_session(&mut self);

    /// Device-visible address; stable for the buffer's lifetime.
    fn physical_address(&self) -> PhysicalAddress;

    /// Exportable file descriptor, if the backend has one.
    fn fd(&self) -> Option<i32> {
        None
    }

    /// Size of the buffer in bytes, as requested at allocation time.
    fn size(&self) -> usize;
}

/// Instantiates the backend for `kind` with the defaults from `config`.
///
/// `kind` must already be resolved, i.e. not [`BufferType::Default`].
pub(crate) fn create(
    kind: BufferType,
    config: &AllocatorConfig,
) -> Result<Box<dyn AllocatorBackend>, DmaBufferError> {
    match kind {
        #[cfg(all(feature = "dma-heap", target_os = "linux"))]
        BufferType::DmaHeap => Ok(Box::new(dma_heap::DmaHeapAllocator::new(&config.dma_heap)?)),
        #[cfg(feature = "g2d")]
        BufferType::G2d => Ok(Box::new(g2d::G2dAllocator::new(&config.g2d))),
        other => {
            // Keeps `config` used when no backend is compiled in.
            let _ = config;
            Err(DmaBufferError::BackendDisabled { kind: other })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_backends_are_disabled() {
        let config = AllocatorConfig::default();
        for kind in [BufferType::Ion, BufferType::Dwl, BufferType::Ipu, BufferType::Pxp] {
            let err = create(kind, &config).unwrap_err();
            assert!(matches!(err, DmaBufferError::BackendDisabled { kind: k } if k == kind));
        }
    }

    #[cfg(not(feature = "g2d"))]
    #[test]
    fn test_g2d_disabled_without_feature() {
        let err = create(BufferType::G2d, &AllocatorConfig::default()).unwrap_err();
        assert_eq!(err.error_code(), libc::ENODEV);
    }
}
