// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The allocator dispatch core.
//!
//! [`DmaBufferAllocator`] owns one backend and, optionally, a statistics
//! block. Every [`DmaBuffer`] it hands out holds an `Arc` back to the
//! allocator's inner state so buffer operations can check that the
//! allocator is still alive and keep the statistics current.
//!
//! # Lifecycle
//! ```text
//! DmaBufferAllocator::new(type)
//!       │
//!       ▼
//!   allocate(size, alignment) ──► DmaBuffer ──► map / sync / query
//!       │                               │
//!       │                               │ deallocate() or drop
//!       ▼                               ▼
//!   destroy() or drop          backend releases the region
//! ```
//!
//! Destroying the allocator releases the statistics block first, then the
//! backend. Buffers still alive at that point keep their own memory until
//! dropped, but any further operation on them panics.

use crate::backend::{self, AllocatorBackend};
use crate::stats::StatsBlock;
use crate::{AllocatorConfig, AllocatorStats, BufferType, DmaBuffer, DmaBufferError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Allocator state shared between the allocator handle and its buffers.
pub(crate) struct AllocatorInner {
    name: &'static str,
    backend: Mutex<Option<Box<dyn AllocatorBackend>>>,
    stats: StatsBlock,
    destroyed: AtomicBool,
}

impl AllocatorInner {
    pub(crate) fn new(backend: Box<dyn AllocatorBackend>, stats: StatsBlock) -> Self {
        Self {
            name: backend.name(),
            backend: Mutex::new(Some(backend)),
            stats,
            destroyed: AtomicBool::new(false),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn is_live(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn stats(&self) -> &StatsBlock {
        &self.stats
    }

    fn backend(&self) -> MutexGuard<'_, Option<Box<dyn AllocatorBackend>>> {
        // A panic inside a backend hook must not wedge the allocator.
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Releases statistics, then the backend. Idempotent.
    fn teardown(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stats.release();
        let backend = self.backend().take();
        drop(backend);
        tracing::info!(backend = self.name, "DMA buffer allocator destroyed");
    }
}

/// A DMA buffer allocator bound to one backend.
///
/// # Example
/// ```no_run
/// use dma_buffer::{BufferType, DmaBufferAllocator, MappingFlags};
///
/// let allocator = DmaBufferAllocator::new(BufferType::Default)?;
/// let mut buffer = allocator.allocate(4096, 16)?;
/// println!("physical address: {}", buffer.physical_address());
///
/// let mut mapped = buffer.map_guard(MappingFlags::WRITE)?;
/// mapped.as_mut_slice().fill(0);
/// drop(mapped);
///
/// buffer.deallocate();
/// allocator.destroy();
/// # Ok::<(), dma_buffer::DmaBufferError>(())
/// ```
pub struct DmaBufferAllocator {
    inner: Arc<AllocatorInner>,
}

impl DmaBufferAllocator {
    /// Creates an allocator of the given type with the default configuration.
    pub fn new(kind: BufferType) -> Result<Self, DmaBufferError> {
        Self::with_config(kind, &AllocatorConfig::default())
    }

    /// Creates an allocator of the given type using the backend parameters
    /// and statistics setting from `config`.
    ///
    /// [`BufferType::Default`] resolves to `config.default_backend`. Types
    /// whose backend is not compiled in yield
    /// [`DmaBufferError::BackendDisabled`].
    pub fn with_config(kind: BufferType, config: &AllocatorConfig) -> Result<Self, DmaBufferError> {
        let resolved = config.resolve(kind);
        let backend = backend::create(resolved, config).map_err(|e| {
            tracing::warn!(requested = %kind, resolved = %resolved, error = %e, "cannot create DMA buffer allocator");
            e
        })?;
        Ok(Self::from_backend(backend, config.enable_stats))
    }

    /// Wraps a caller-provided backend.
    ///
    /// Statistics are kept when `enable_stats` is set and the `alloc-stats`
    /// feature is enabled.
    pub fn from_backend(backend: Box<dyn AllocatorBackend>, enable_stats: bool) -> Self {
        let inner = AllocatorInner::new(backend, StatsBlock::new(enable_stats));
        tracing::info!(
            backend = inner.name(),
            stats = inner.stats().is_present(),
            "DMA buffer allocator created"
        );
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Allocates a buffer of at least `size` bytes whose physical address
    /// is aligned to `alignment` bytes (0 or 1: no alignment).
    ///
    /// # Panics
    /// Panics if `size` is zero.
    pub fn allocate(&self, size: usize, alignment: usize) -> Result<DmaBuffer, DmaBufferError> {
        assert!(size >= 1, "DMA buffer allocation size must be at least 1 byte");

        let result = {
            let mut guard = self.inner.backend();
            let Some(backend) = guard.as_mut() else {
                panic!("allocate called on a destroyed {} allocator", self.inner.name());
            };
            backend.allocate(size, alignment)
        };

        match result {
            Ok(payload) => {
                self.inner.stats().increment(size);
                tracing::debug!(
                    backend = self.inner.name(),
                    size,
                    alignment,
                    physical_address = %payload.physical_address(),
                    fd = payload.fd().unwrap_or(-1),
                    "allocated DMA buffer"
                );
                Ok(DmaBuffer::new(payload, Arc::clone(&self.inner)))
            }
            Err(e) => {
                tracing::warn!(backend = self.inner.name(), size, alignment, error = %e, "DMA buffer allocation failed");
                Err(e)
            }
        }
    }

    /// Destroys the allocator: statistics first, then the backend.
    ///
    /// Buffers allocated from this allocator must not be used afterwards.
    pub fn destroy(self) {
        self.inner.teardown();
    }

    /// Null-tolerant release of an allocator handle.
    ///
    /// Releases the statistics block and the handle. Backend teardown then
    /// follows the same path as [`destroy`](Self::destroy).
    pub fn free(allocator: Option<Self>) {
        if let Some(allocator) = allocator {
            allocator.inner.stats().release();
            drop(allocator);
        }
    }

    /// Snapshot of the allocation statistics; all zero when statistics
    /// are disabled.
    pub fn stats(&self) -> AllocatorStats {
        self.inner.stats().read()
    }

    /// Whether this allocator keeps statistics.
    pub fn has_stats(&self) -> bool {
        self.inner.stats().is_present()
    }

    /// Name of the backend behind this allocator.
    pub fn name(&self) -> &'static str {
        self.inner.name()
    }
}

impl Drop for DmaBufferAllocator {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl std::fmt::Debug for DmaBufferAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaBufferAllocator")
            .field("backend", &self.inner.name())
            .field("stats", &self.has_stats().then(|| self.stats()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendBuffer;
    use crate::{MappingFlags, PhysicalAddress};
    use std::ptr::NonNull;
    use std::sync::atomic::AtomicUsize;

    /// Backend that hands out fake physical addresses and can be told to
    /// fail, counting how often it was torn down.
    #[derive(Debug)]
    struct FakeBackend {
        next_address: u64,
        fail: bool,
        drops: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    #[derive(Debug)]
    struct FakeBuffer {
        size: usize,
        address: u64,
        released: Arc<AtomicUsize>,
    }

    impl FakeBackend {
        fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let drops = Arc::new(AtomicUsize::new(0));
            let released = Arc::new(AtomicUsize::new(0));
            let backend = Self {
                next_address: 0x1000_0000,
                fail: false,
                drops: Arc::clone(&drops),
                released: Arc::clone(&released),
            };
            (backend, drops, released)
        }
    }

    impl AllocatorBackend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn allocate(
            &mut self,
            size: usize,
            _alignment: usize,
        ) -> Result<Box<dyn BackendBuffer>, DmaBufferError> {
            if self.fail {
                return Err(DmaBufferError::OutOfMemory { requested: size });
            }
            let address = self.next_address;
            self.next_address += size as u64;
            Ok(Box::new(FakeBuffer {
                size,
                address,
                released: Arc::clone(&self.released),
            }))
        }
    }

    impl Drop for FakeBackend {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl BackendBuffer for FakeBuffer {
        fn deallocate(self: Box<Self>) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }

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

    #[test]
    fn test_allocate_and_query() {
        let (backend, _, _) = FakeBackend::new();
        let allocator = DmaBufferAllocator::from_backend(Box::new(backend), true);
        let buffer = allocator.allocate(4096, 0).unwrap();
        assert_eq!(buffer.size(), 4096);
        assert_eq!(buffer.physical_address(), PhysicalAddress(0x1000_0000));
        // No fd hook: reported as -1.
        assert_eq!(buffer.fd(), -1);
        assert_eq!(buffer.allocator_name(), "fake");
    }

    #[cfg(feature = "alloc-stats")]
    #[test]
    fn test_stats_follow_allocations() {
        let (backend, _, _) = FakeBackend::new();
        let allocator = DmaBufferAllocator::from_backend(Box::new(backend), true);
        assert!(allocator.has_stats());

        let a = allocator.allocate(4096, 0).unwrap();
        let b = allocator.allocate(1024, 0).unwrap();
        a.deallocate();
        drop(b);

        let stats = allocator.stats();
        assert_eq!(stats.alloc_cnt, 2);
        assert_eq!(stats.dealloc_cnt, 2);
        assert_eq!(stats.peak_usage, 5120);
        assert_eq!(stats.current_usage, 0);
    }

    #[test]
    fn test_stats_disabled() {
        let (backend, _, _) = FakeBackend::new();
        let allocator = DmaBufferAllocator::from_backend(Box::new(backend), false);
        let _b = allocator.allocate(100, 0).unwrap();
        assert!(!allocator.has_stats());
        assert_eq!(allocator.stats(), AllocatorStats::default());
    }

    #[test]
    fn test_failed_allocation_not_counted() {
        let (mut backend, _, _) = FakeBackend::new();
        backend.fail = true;
        let allocator = DmaBufferAllocator::from_backend(Box::new(backend), true);
        let err = allocator.allocate(64, 0).unwrap_err();
        assert_eq!(err.error_code(), libc::ENOMEM);
        assert_eq!(allocator.stats().alloc_cnt, 0);
    }

    #[test]
    #[should_panic(expected = "at least 1 byte")]
    fn test_zero_size_is_contract_violation() {
        let (backend, _, _) = FakeBackend::new();
        let allocator = DmaBufferAllocator::from_backend(Box::new(backend), true);
        let _ = allocator.allocate(0, 0);
    }

    #[test]
    fn test_destroy_tears_down_backend_once() {
        let (backend, drops, _) = FakeBackend::new();
        let allocator = DmaBufferAllocator::from_backend(Box::new(backend), true);
        allocator.destroy();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_tears_down_backend() {
        let (backend, drops, _) = FakeBackend::new();
        drop(DmaBufferAllocator::from_backend(Box::new(backend), false));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_free_tolerates_none() {
        DmaBufferAllocator::free(None);
        let (backend, drops, _) = FakeBackend::new();
        DmaBufferAllocator::free(Some(DmaBufferAllocator::from_backend(Box::new(backend), true)));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_buffer_outliving_allocator_releases_quietly() {
        let (backend, drops, released) = FakeBackend::new();
        let allocator = DmaBufferAllocator::from_backend(Box::new(backend), true);
        let buffer = allocator.allocate(256, 0).unwrap();
        allocator.destroy();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        drop(buffer);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "allocator was destroyed")]
    fn test_buffer_use_after_destroy_panics() {
        let (backend, _, _) = FakeBackend::new();
        let allocator = DmaBufferAllocator::from_backend(Box::new(backend), true);
        let buffer = allocator.allocate(256, 0).unwrap();
        allocator.destroy();
        let _ = buffer.size();
    }

    #[test]
    fn test_debug_format() {
        let (backend, _, _) = FakeBackend::new();
        let allocator = DmaBufferAllocator::from_backend(Box::new(backend), true);
        let debug = format!("{allocator:?}");
        assert!(debug.contains("DmaBufferAllocator"));
        assert!(debug.contains("fake"));
    }

    #[test]
    fn test_unknown_type_is_not_fatal() {
        let err = DmaBufferAllocator::new(BufferType::Pxp).unwrap_err();
        assert!(matches!(err, DmaBufferError::BackendDisabled { kind: BufferType::Pxp }));
        assert_ne!(err.error_code(), 0);
    }

    #[test]
    fn test_default_resolves_through_config() {
        let config = AllocatorConfig {
            default_backend: BufferType::Ion,
            ..Default::default()
        };
        let err = DmaBufferAllocator::with_config(BufferType::Default, &config).unwrap_err();
        assert!(matches!(err, DmaBufferError::BackendDisabled { kind: BufferType::Ion }));
    }
}
