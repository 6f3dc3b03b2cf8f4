// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-allocator allocation statistics.
//!
//! [`AllocatorStats`] keeps cumulative counters of the bytes and calls that
//! went through an allocator. Current and peak usage are derived from the
//! cumulative counters on every update and never set on their own.
//!
//! Each allocator owns at most one [`StatsBlock`]. The block is absent
//! when statistics are compiled out (`alloc-stats` feature) or switched off
//! in the configuration, in which case every update is a no-op and reads
//! return all-zero counters.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Snapshot of an allocator's memory statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct AllocatorStats {
    /// Total bytes ever allocated.
    pub total_allocated: usize,
    /// Total bytes ever freed.
    pub total_freed: usize,
    /// Bytes currently in use: `total_allocated - total_freed`, clamped at 0.
    pub current_usage: usize,
    /// Highest `current_usage` observed after any allocation.
    pub peak_usage: usize,
    /// Number of successful allocations.
    pub alloc_cnt: usize,
    /// Number of deallocations.
    pub dealloc_cnt: usize,
}

impl AllocatorStats {
    /// Records an allocation of `size` bytes. Zero sizes are ignored.
    pub fn record_alloc(&mut self, size: usize) {
        if size == 0 {
            return;
        }
        self.total_allocated = self.total_allocated.saturating_add(size);
        self.refresh_current_usage();
        self.alloc_cnt += 1;
        // Peak must be compared against the freshly recomputed usage.
        self.peak_usage = self.peak_usage.max(self.current_usage);
    }

    /// Records a deallocation of `size` bytes. Zero sizes are ignored.
    ///
    /// The peak is a historical maximum and is left untouched.
    pub fn record_dealloc(&mut self, size: usize) {
        if size == 0 {
            return;
        }
        self.total_freed = self.total_freed.saturating_add(size);
        self.refresh_current_usage();
        self.dealloc_cnt += 1;
    }

    fn refresh_current_usage(&mut self) {
        self.current_usage = self.total_allocated.saturating_sub(self.total_freed);
    }

    /// Number of buffers allocated but not yet deallocated.
    pub fn live_buffers(&self) -> usize {
        self.alloc_cnt.saturating_sub(self.dealloc_cnt)
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Allocations: {} ({} bytes), deallocations: {} ({} bytes), \
             current {} bytes, peak {} bytes",
            self.alloc_cnt,
            self.total_allocated,
            self.dealloc_cnt,
            self.total_freed,
            self.current_usage,
            self.peak_usage,
        )
    }
}

/// The optional statistics block owned by one allocator.
///
/// The `Mutex` makes each read-modify-write update atomic with respect
/// to other threads sharing the allocator.
#[derive(Debug, Default)]
pub(crate) struct StatsBlock {
    inner: Mutex<Option<AllocatorStats>>,
}

impl StatsBlock {
    /// Creates a zeroed block, or an absent one when `enabled` is false
    /// or statistics are compiled out.
    pub(crate) fn new(enabled: bool) -> Self {
        let block = (enabled && cfg!(feature = "alloc-stats")).then(AllocatorStats::default);
        Self {
            inner: Mutex::new(block),
        }
    }

    /// A block that never records anything.
    pub(crate) fn absent() -> Self {
        Self::default()
    }

    /// Counters are plain integers, so a panic elsewhere while the lock
    /// was held cannot leave them half-updated.
    fn lock(&self) -> MutexGuard<'_, Option<AllocatorStats>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_present(&self) -> bool {
        self.lock().is_some()
    }

    pub(crate) fn increment(&self, size: usize) {
        if let Some(stats) = self.lock().as_mut() {
            stats.record_alloc(size);
            tracing::trace!(size, current = stats.current_usage, peak = stats.peak_usage, "alloc stats updated");
        }
    }

    pub(crate) fn decrement(&self, size: usize) {
        if let Some(stats) = self.lock().as_mut() {
            stats.record_dealloc(size);
            tracing::trace!(size, current = stats.current_usage, "dealloc stats updated");
        }
    }

    /// Copy of the counters; all zero when the block is absent.
    pub(crate) fn read(&self) -> AllocatorStats {
        (*self.lock()).unwrap_or_default()
    }

    /// Drops the block. Later updates become no-ops.
    pub(crate) fn release(&self) {
        self.lock().take();
    }
}
