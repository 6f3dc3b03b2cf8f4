// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Mapping bookkeeping shared by the backends.
//!
//! Mapping is reference counted: only the first `map` really maps and
//! only the last `unmap` really unmaps. Redundant mappings may only ask for
//! a subset of the read/write access of the first one.
//!
//! Sync sessions come in two flavours:
//!
//! - **implicit**: the buffer was mapped without
//!   [`MappingFlags::MANUAL_SYNC`]. The first map starts the session and the
//!   last unmap stops it. Explicit session calls do nothing.
//! - **manual**: the buffer was mapped with `MANUAL_SYNC`. The caller brackets
//!   CPU access with explicit start/stop calls.

use crate::MappingFlags;

/// Reference-counted mapping state of a single buffer.
///
/// The state only decides *when* a backend must act; backends perform the
/// actual `mmap`/`munmap` and cache maintenance themselves.
#[derive(Debug, Default, Clone)]
pub struct MappingState {
    refcount: usize,
    flags: MappingFlags,
    sync_active: bool,
}

impl MappingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_mapped(&self) -> bool {
        self.refcount > 0
    }

    pub fn refcount(&self) -> usize {
        self.refcount
    }

    /// Flags of the mapping currently in place (normalised).
    pub fn flags(&self) -> MappingFlags {
        self.flags
    }

    pub fn is_sync_active(&self) -> bool {
        self.sync_active
    }

    /// Registers a map request.
    ///
    /// Returns the normalised flags when the caller must establish the
    /// mapping, then [`mark_mapped`](Self::mark_mapped) once it succeeded.
    /// Returns `None` for a redundant map, which only bumps the refcount.
    ///
    /// # Panics
    /// Panics if a redundant map requests access the first mapping lacks.
    pub fn acquire(&mut self, flags: MappingFlags) -> Option<MappingFlags> {
        let flags = flags.normalized();
        if self.is_mapped() {
            assert!(
                self.flags.access().contains(flags.access()),
                "redundant map requested {:?} access but buffer is mapped with {:?}",
                flags.access(),
                self.flags.access()
            );
            self.refcount += 1;
            None
        } else {
            Some(flags)
        }
    }

    /// Records that the first mapping was established with `flags`.
    pub fn mark_mapped(&mut self, flags: MappingFlags) {
        self.flags = flags.normalized();
        self.refcount = 1;
    }

    /// Registers an unmap request.
    ///
    /// Returns `true` when this was the last reference and the caller must
    /// tear the mapping down. Unmapping an unmapped buffer does nothing.
    pub fn release(&mut self) -> bool {
        if !self.is_mapped() {
            return false;
        }
        self.refcount -= 1;
        self.refcount == 0
    }

    /// Drops every outstanding reference at once (buffer teardown).
    /// Returns `true` if the buffer was mapped.
    pub fn force_release(&mut self) -> bool {
        let was_mapped = self.is_mapped();
        self.refcount = 0;
        was_mapped
    }

    /// Whether map/unmap drive the sync session themselves.
    pub fn uses_implicit_sync(&self) -> bool {
        !self.flags.is_manual_sync()
    }

    /// Marks an implicit session as started (first map).
    pub fn begin_implicit_session(&mut self) {
        self.sync_active = true;
    }

    /// Marks an implicit session as stopped (last unmap).
    pub fn end_implicit_session(&mut self) {
        self.sync_active = false;
    }

    /// Explicit session start. Returns `true` if the caller must perform
    /// the start-of-access cache maintenance now.
    pub fn start_session(&mut self) -> bool {
        if self.sync_active || !self.flags.is_manual_sync() {
            return false;
        }
        self.sync_active = true;
        true
    }

    /// Explicit session stop. Returns `true` if the caller must perform
    /// the end-of-access cache maintenance now.
    ///
    /// # Panics
    /// Panics if the buffer is not mapped.
    pub fn stop_session(&mut self) -> bool {
        assert!(
            self.is_mapped(),
            "stop_sync_session called on a buffer that is not mapped"
        );
        if !self.sync_active || !self.flags.is_manual_sync() {
            return false;
        }
        self.sync_active = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped(flags: MappingFlags) -> MappingState {
        let mut s = MappingState::new();
        let f = s.acquire(flags).expect("first map");
        s.mark_mapped(f);
        s
    }

    #[test]
    fn test_first_map_normalizes_flags() {
        let mut s = MappingState::new();
        assert_eq!(s.acquire(MappingFlags::empty()), Some(MappingFlags::READWRITE));
        assert!(!s.is_mapped());
    }

    #[test]
    fn test_refcounting() {
        let mut s = mapped(MappingFlags::READWRITE);
        assert_eq!(s.acquire(MappingFlags::READ), None);
        assert_eq!(s.refcount(), 2);
        assert!(!s.release());
        assert!(s.release());
        assert!(!s.is_mapped());
        // Unmapping again is harmless.
        assert!(!s.release());
    }

    #[test]
    #[should_panic(expected = "redundant map")]
    fn test_redundant_map_must_be_subset() {
        let mut s = mapped(MappingFlags::READ);
        s.acquire(MappingFlags::WRITE);
    }

    #[test]
    fn test_manual_sync_ignored_on_redundant_map() {
        let mut s = mapped(MappingFlags::READ);
        assert_eq!(s.acquire(MappingFlags::READ | MappingFlags::MANUAL_SYNC), None);
        assert!(s.uses_implicit_sync());
    }

    #[test]
    fn test_manual_sessions() {
        let mut s = mapped(MappingFlags::READ | MappingFlags::MANUAL_SYNC);
        assert!(!s.uses_implicit_sync());
        assert!(s.start_session());
        // Nested start is ignored.
        assert!(!s.start_session());
        assert!(s.stop_session());
        assert!(!s.stop_session());
    }

    #[test]
    fn test_implicit_sessions_ignore_explicit_calls() {
        let mut s = mapped(MappingFlags::WRITE);
        s.begin_implicit_session();
        assert!(!s.start_session());
        assert!(!s.stop_session());
        assert!(s.is_sync_active());
        s.end_implicit_session();
        assert!(!s.is_sync_active());
    }

    #[test]
    #[should_panic(expected = "not mapped")]
    fn test_stop_session_requires_mapping() {
        let mut s = MappingState::new();
        s.stop_session();
    }

    #[test]
    fn test_force_release() {
        let mut s = mapped(MappingFlags::READ);
        s.acquire(MappingFlags::READ);
        assert!(s.force_release());
        assert!(!s.is_mapped());
        assert!(!s.force_release());
    }
}
