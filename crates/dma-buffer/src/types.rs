// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Core value types shared by the dispatch layer and the backends.

use crate::DmaBufferError;
use std::fmt;
use std::str::FromStr;

/// Selects which allocation subsystem backs an allocator.
///
/// Every tag exists in every build; whether the matching backend was
/// compiled in is reported by [`BufferType::is_compiled_in`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum BufferType {
    /// Whatever backend the configuration names as the default.
    #[default]
    Default,
    /// Linux DMA-BUF heaps (`/dev/dma_heap/*`).
    DmaHeap,
    /// Legacy ION kernel allocator.
    Ion,
    /// Hantro VPU DWL library allocator.
    Dwl,
    /// IPU image processing unit allocator.
    Ipu,
    /// G2D 2D GPU allocator.
    G2d,
    /// PxP pixel pipeline allocator.
    Pxp,
}

impl BufferType {
    /// All type tags, in declaration order.
    pub const ALL: [BufferType; 7] = [
        BufferType::Default,
        BufferType::DmaHeap,
        BufferType::Ion,
        BufferType::Dwl,
        BufferType::Ipu,
        BufferType::G2d,
        BufferType::Pxp,
    ];

    /// Canonical kebab-case name, as used in configuration files and the CLI.
    pub fn name(&self) -> &'static str {
        match self {
            BufferType::Default => "default",
            BufferType::DmaHeap => "dma-heap",
            BufferType::Ion => "ion",
            BufferType::Dwl => "dwl",
            BufferType::Ipu => "ipu",
            BufferType::G2d => "g2d",
            BufferType::Pxp => "pxp",
        }
    }

    /// Whether a concrete backend for this tag was enabled at build time.
    ///
    /// `Default` is always reported as available; whether the backend it
    /// resolves to exists depends on the configuration.
    pub fn is_compiled_in(&self) -> bool {
        match self {
            BufferType::Default => true,
            BufferType::DmaHeap => cfg!(all(feature = "dma-heap", target_os = "linux")),
            BufferType::G2d => cfg!(feature = "g2d"),
            BufferType::Ion | BufferType::Dwl | BufferType::Ipu | BufferType::Pxp => false,
        }
    }

    /// Concrete (non-default) backends available in this build.
    pub fn compiled_in() -> Vec<BufferType> {
        Self::ALL
            .iter()
            .copied()
            .filter(|t| *t != BufferType::Default && t.is_compiled_in())
            .collect()
    }
}

impl fmt::Display for BufferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BufferType {
    type Err = DmaBufferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == wanted)
            .ok_or_else(|| {
                DmaBufferError::Config(format!(
                    "unknown buffer type '{s}'; expected one of: default, dma-heap, ion, dwl, ipu, g2d, pxp"
                ))
            })
    }
}

/// A device-visible (physical) address.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize,
)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    /// Returns the raw address value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if the address is a multiple of `alignment`.
    /// Alignments of 0 and 1 accept every address.
    pub fn is_aligned_to(&self, alignment: usize) -> bool {
        alignment <= 1 || self.0 % alignment as u64 == 0
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for PhysicalAddress {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Rounds `value` up to the next multiple of `alignment`.
///
/// Alignment need not be a power of two. 0 and 1 leave `value` untouched.
pub(crate) fn align_up(value: u64, alignment: usize) -> u64 {
    let alignment = alignment as u64;
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}
