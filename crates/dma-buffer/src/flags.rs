// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Flags accepted by [`DmaBuffer::map`](crate::DmaBuffer::map).

bitflags::bitflags! {
    /// How the CPU intends to access a mapped buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MappingFlags: u32 {
        /// Map for CPU write access.
        const WRITE = 1 << 0;
        /// Map for CPU read access.
        const READ = 1 << 1;
        /// Cache synchronisation is driven explicitly through sync
        /// sessions instead of implicitly by map/unmap.
        const MANUAL_SYNC = 1 << 2;

        const READWRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl MappingFlags {
    /// Fills in read/write access when neither was requested.
    pub fn normalized(self) -> Self {
        if self.intersects(Self::READWRITE) {
            self
        } else {
            self | Self::READWRITE
        }
    }

    /// The read/write subset of these flags.
    pub fn access(self) -> Self {
        self & Self::READWRITE
    }

    pub fn is_manual_sync(self) -> bool {
        self.contains(Self::MANUAL_SYNC)
    }
}

impl Default for MappingFlags {
    fn default() -> Self {
        Self::READWRITE
    }
}
