// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Linux DMA-BUF heap backend.
//!
//! Buffers are allocated from a heap device node (`/dev/dma_heap/*`) with
//! `DMA_HEAP_IOCTL_ALLOC`. Each buffer is a dma-buf fd; its physical
//! address comes from the `DMA_BUF_IOCTL_PHYS` ioctl of i.MX kernels and
//! CPU access goes through `mmap(MAP_SHARED)` on that fd.
//!
//! Cached heaps need cache maintenance around CPU access, done either with
//! `DMA_BUF_IOCTL_SYNC` or by re-issuing `DMA_BUF_IOCTL_PHYS`, which
//! flushes the CPU caches on BSPs where the sync ioctl is ineffective. See
//! [`SyncMethod`].

use crate::backend::{AllocatorBackend, BackendBuffer};
use crate::{DmaBufferError, DmaHeapConfig, MappingFlags, MappingState, PhysicalAddress, SyncMethod};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::ptr::NonNull;

/// `_IOWR('H', 0, struct dma_heap_allocation_data)`
pub const DMA_HEAP_IOCTL_ALLOC: u64 = 0xC018_4800;
/// `_IOW('b', 0, struct dma_buf_sync)`
pub const DMA_BUF_IOCTL_SYNC: u64 = 0x4008_6200;
/// `_IOW('b', 10, unsigned long)` (i.MX kernels only)
pub const DMA_BUF_IOCTL_PHYS: u64 = 0x4008_620A;

const DMA_BUF_SYNC_READ: u64 = 1 << 0;
const DMA_BUF_SYNC_WRITE: u64 = 1 << 1;
const DMA_BUF_SYNC_START: u64 = 0;
const DMA_BUF_SYNC_END: u64 = 1 << 2;

#[repr(C)]
#[derive(Debug, Default)]
struct DmaHeapAllocationData {
    len: u64,
    fd: u32,
    fd_flags: u32,
    heap_flags: u64,
}

#[repr(C)]
#[derive(Debug, Default)]
struct DmaBufSync {
    flags: u64,
}

#[repr(C)]
#[derive(Debug, Default)]
struct DmaBufPhys {
    phys: u64,
}

/// Allocates a dma-buf of `size` bytes from an open heap device.
pub fn allocate_dmabuf(
    heap: BorrowedFd<'_>,
    size: usize,
    heap_flags: u64,
    fd_flags: u32,
) -> Result<OwnedFd, DmaBufferError> {
    let mut data = DmaHeapAllocationData {
        len: size as u64,
        fd: 0,
        fd_flags,
        heap_flags,
    };
    // SAFETY: `data` has the layout of `struct dma_heap_allocation_data`.
    let ret = unsafe {
        libc::ioctl(
            heap.as_raw_fd(),
            DMA_HEAP_IOCTL_ALLOC as _,
            std::ptr::addr_of_mut!(data),
        )
    };
    if ret < 0 {
        return Err(DmaBufferError::last_os_error("DMA_HEAP_IOCTL_ALLOC"));
    }
    // SAFETY: on success the kernel installed a fresh fd owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(data.fd as RawFd) })
}

/// Queries the physical address of a dma-buf.
pub fn physical_address_of(dmabuf: BorrowedFd<'_>) -> Result<PhysicalAddress, DmaBufferError> {
    let mut data = DmaBufPhys::default();
    // SAFETY: `data` has the layout of `struct dma_buf_phys`.
    let ret = unsafe {
        libc::ioctl(
            dmabuf.as_raw_fd(),
            DMA_BUF_IOCTL_PHYS as _,
            std::ptr::addr_of_mut!(data),
        )
    };
    if ret < 0 {
        return Err(DmaBufferError::last_os_error("DMA_BUF_IOCTL_PHYS"));
    }
    nonzero_physical_address(data.phys)
}

/// A dma-buf without a physical address cannot be handed to a device.
fn nonzero_physical_address(phys: u64) -> Result<PhysicalAddress, DmaBufferError> {
    if phys == 0 {
        return Err(DmaBufferError::Os {
            op: "DMA_BUF_IOCTL_PHYS",
            source: std::io::Error::other("kernel reported a null physical address"),
        });
    }
    Ok(PhysicalAddress(phys))
}

fn open_heap(path: &Path) -> Result<OwnedFd, DmaBufferError> {
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map(OwnedFd::from)
        .map_err(|source| DmaBufferError::Os {
            op: "open DMA heap device",
            source,
        })
}

/// Duplicates a caller-provided heap fd so the allocator never closes the
/// caller's descriptor. `fd` must be non-negative.
fn dup_heap(fd: RawFd) -> Result<OwnedFd, DmaBufferError> {
    debug_assert!(fd >= 0);
    // SAFETY: `fd` is not -1 and the borrow only lives for the duplication;
    // an fd that is not open makes `fcntl(F_DUPFD_CLOEXEC)` fail with EBADF.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    borrowed.try_clone_to_owned().map_err(|source| DmaBufferError::Os {
        op: "duplicate DMA heap fd",
        source,
    })
}

/// Allocator over a DMA-BUF heap device.
#[derive(Debug)]
pub struct DmaHeapAllocator {
    heap: OwnedFd,
    heap_flags: u64,
    fd_flags: u32,
    /// `None` for uncached heaps, which need no cache maintenance.
    coherency: Option<SyncMethod>,
}

impl DmaHeapAllocator {
    /// Duplicates `config.heap_fd` if it is set and non-negative, otherwise
    /// opens `config.device_node`.
    pub fn new(config: &DmaHeapConfig) -> Result<Self, DmaBufferError> {
        let heap = match config.heap_fd {
            Some(fd) if fd >= 0 => dup_heap(fd)?,
            _ => open_heap(&config.device_node)?,
        };
        tracing::debug!(
            device = %config.device_node.display(),
            heap_fd = heap.as_raw_fd(),
            cached = config.cached,
            sync_method = ?config.sync_method,
            "opened DMA heap"
        );
        Ok(Self {
            heap,
            heap_flags: config.heap_flags,
            fd_flags: config.fd_flags,
            coherency: config.cached.then_some(config.sync_method),
        })
    }

    /// The heap device fd used for allocations.
    pub fn heap_fd(&self) -> BorrowedFd<'_> {
        self.heap.as_fd()
    }

    pub fn is_cached(&self) -> bool {
        self.coherency.is_some()
    }
}

impl AllocatorBackend for DmaHeapAllocator {
    fn name(&self) -> &'static str {
        "dma-heap"
    }

    fn allocate(
        &mut self,
        size: usize,
        _alignment: usize,
    ) -> Result<Box<dyn BackendBuffer>, DmaBufferError> {
        // The heap ioctl has no alignment parameter; CMA hands out
        // page-aligned memory anyway.
        let fd = allocate_dmabuf(self.heap.as_fd(), size, self.heap_flags, self.fd_flags)?;
        let physical_address = physical_address_of(fd.as_fd())?;
        Ok(Box::new(DmaHeapBuffer {
            fd,
            physical_address,
            size,
            mapped: None,
            mapping: MappingState::new(),
            coherency: self.coherency,
        }))
    }
}

/// One dma-buf allocated from a heap.
#[derive(Debug)]
pub struct DmaHeapBuffer {
    fd: OwnedFd,
    physical_address: PhysicalAddress,
    size: usize,
    mapped: Option<NonNull<u8>>,
    mapping: MappingState,
    coherency: Option<SyncMethod>,
}

// SAFETY: the mapping pointer is only dereferenced through `&mut self`
// or the guards in `buffer.rs`; the region is shared memory, not tied to
// the creating thread.
unsafe impl Send for DmaHeapBuffer {}

impl DmaHeapBuffer {
    fn begin_access(&self) {
        match self.coherency {
            Some(SyncMethod::DmaBufSync) => self.dma_buf_sync(DMA_BUF_SYNC_START),
            Some(SyncMethod::PhysWorkaround) => {
                if self.mapping.flags().contains(MappingFlags::READ) {
                    self.flush_via_phys();
                }
            }
            None => {}
        }
    }

    fn end_access(&self) {
        match self.coherency {
            Some(SyncMethod::DmaBufSync) => self.dma_buf_sync(DMA_BUF_SYNC_END),
            Some(SyncMethod::PhysWorkaround) => {
                if self.mapping.flags().contains(MappingFlags::WRITE) {
                    self.flush_via_phys();
                }
            }
            None => {}
        }
    }

    fn dma_buf_sync(&self, stage: u64) {
        let access = self.mapping.flags();
        let mut sync = DmaBufSync { flags: stage };
        if access.contains(MappingFlags::READ) {
            sync.flags |= DMA_BUF_SYNC_READ;
        }
        if access.contains(MappingFlags::WRITE) {
            sync.flags |= DMA_BUF_SYNC_WRITE;
        }
        // SAFETY: `sync` has the layout of `struct dma_buf_sync`.
        let ret = unsafe {
            libc::ioctl(
                self.fd.as_raw_fd(),
                DMA_BUF_IOCTL_SYNC as _,
                std::ptr::addr_of_mut!(sync),
            )
        };
        if ret < 0 {
            tracing::warn!(
                fd = self.fd.as_raw_fd(),
                flags = sync.flags,
                error = %std::io::Error::last_os_error(),
                "DMA_BUF_IOCTL_SYNC failed"
            );
        }
    }

    fn flush_via_phys(&self) {
        if let Err(e) = physical_address_of(self.fd.as_fd()) {
            tracing::warn!(fd = self.fd.as_raw_fd(), error = %e, "cache flush via DMA_BUF_IOCTL_PHYS failed");
        }
    }

    /// Drops every outstanding mapping at once, ending an active session.
    fn teardown_mapping(&mut self) {
        if self.mapping.force_release() {
            if self.coherency.is_some() && self.mapping.is_sync_active() {
                self.end_access();
            }
            self.mapping.end_implicit_session();
            self.munmap();
        }
    }

    fn munmap(&mut self) {
        if let Some(ptr) = self.mapped.take() {
            // SAFETY: `ptr` was returned by mmap for `size` bytes and the
            // mapping refcount just dropped to zero.
            let ret = unsafe { libc::munmap(ptr.as_ptr().cast(), self.size) };
            if ret < 0 {
                tracing::warn!(error = %std::io::Error::last_os_error(), "munmap of DMA buffer failed");
            }
        }
    }
}

impl BackendBuffer for DmaHeapBuffer {
    fn deallocate(self: Box<Self>) {
        // Drop stops any session, unmaps and closes the dma-buf fd.
    }

    fn map(&mut self, flags: MappingFlags) -> Result<Option<NonNull<u8>>, DmaBufferError> {
        let Some(flags) = self.mapping.acquire(flags) else {
            return Ok(self.mapped);
        };

        let mut prot = 0;
        if flags.contains(MappingFlags::READ) {
            prot |= libc::PROT_READ;
        }
        if flags.contains(MappingFlags::WRITE) {
            prot |= libc::PROT_WRITE;
        }
        // SAFETY: maps `size` bytes of our own dma-buf fd; the result is
        // checked against MAP_FAILED below.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                self.size,
                prot,
                libc::MAP_SHARED,
                self.fd.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(DmaBufferError::last_os_error("mmap"));
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| DmaBufferError::MappingFailed("mmap returned a null address".into()))?;

        self.mapped = Some(ptr);
        self.mapping.mark_mapped(flags);
        if self.coherency.is_some() && self.mapping.uses_implicit_sync() {
            self.begin_access();
            self.mapping.begin_implicit_session();
        }
        Ok(Some(ptr))
    }

    fn unmap(&mut self) {
        if !self.mapping.release() {
            return;
        }
        if self.coherency.is_some() && self.mapping.uses_implicit_sync() && self.mapping.is_sync_active() {
            self.end_access();
            self.mapping.end_implicit_session();
        }
        self.munmap();
    }

    fn start_sync_session(&mut self) {
        if self.coherency.is_some() && self.mapping.start_session() {
            self.begin_access();
        }
    }

    fn stop_sync_session(&mut self) {
        if self.coherency.is_some() && self.mapping.stop_session() {
            self.end_access();
        }
    }

    fn physical_address(&self) -> PhysicalAddress {
        self.physical_address
    }

    fn fd(&self) -> Option<i32> {
        Some(self.fd.as_raw_fd())
    }

    fn size(&self) -> usize {
        self.size
    }
}

impl Drop for DmaHeapBuffer {
    fn drop(&mut self) {
        self.teardown_mapping();
    }
}
