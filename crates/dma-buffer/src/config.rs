// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Allocator configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! default_backend = "dma-heap"
//! enable_stats = true
//!
//! [dma_heap]
//! device_node = "/dev/dma_heap/linux,cma"
//! heap_flags = 0
//! fd_flags = 524290
//! cached = true
//! sync_method = "phys-workaround"
//!
//! [g2d]
//! cacheable = false
//! ```
//!
//! Every field is optional; missing fields take the values of
//! [`AllocatorConfig::default`].

use crate::{BufferType, DmaBufferError};
use std::path::{Path, PathBuf};

/// Default DMA-BUF heap device node (the CMA heap).
pub const DEFAULT_DMA_HEAP_NODE: &str = "/dev/dma_heap/linux,cma";

/// Backend parameters used by construct-by-type.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Backend that [`BufferType::Default`] resolves to.
    pub default_backend: BufferType,
    /// Whether new allocators keep statistics (needs the `alloc-stats` feature).
    pub enable_stats: bool,
    pub dma_heap: DmaHeapConfig,
    pub g2d: G2dConfig,
}

/// How cached DMA-BUF heap memory is kept coherent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMethod {
    /// `DMA_BUF_IOCTL_SYNC` start/end bracketing.
    DmaBufSync,
    /// Issue `DMA_BUF_IOCTL_PHYS`, which flushes CPU caches on i.MX BSPs
    /// where the sync ioctl is ineffective.
    #[default]
    PhysWorkaround,
}

/// Parameters of the DMA-BUF heap backend.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DmaHeapConfig {
    /// Heap device node opened when no `heap_fd` is given.
    pub device_node: PathBuf,
    /// Already open heap fd. The allocator borrows it and never closes it.
    pub heap_fd: Option<i32>,
    /// `heap_flags` passed to `DMA_HEAP_IOCTL_ALLOC`.
    pub heap_flags: u64,
    /// `fd_flags` for the returned dma-buf fds.
    pub fd_flags: u32,
    /// Whether the heap hands out cached memory needing sync sessions.
    pub cached: bool,
    pub sync_method: SyncMethod,
}

impl Default for DmaHeapConfig {
    fn default() -> Self {
        Self {
            device_node: PathBuf::from(DEFAULT_DMA_HEAP_NODE),
            heap_fd: None,
            heap_flags: 0,
            fd_flags: (libc::O_RDWR | libc::O_CLOEXEC) as u32,
            cached: true,
            sync_method: SyncMethod::default(),
        }
    }
}

/// Parameters of the G2D backend.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct G2dConfig {
    /// Request cacheable memory from `g2d_alloc`.
    pub cacheable: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            default_backend: BufferType::DmaHeap,
            enable_stats: true,
            dma_heap: DmaHeapConfig::default(),
            g2d: G2dConfig::default(),
        }
    }
}

impl AllocatorConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, DmaBufferError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DmaBufferError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, DmaBufferError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| DmaBufferError::Config(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, DmaBufferError> {
        toml::to_string_pretty(self)
            .map_err(|e| DmaBufferError::Config(format!("TOML serialise error: {e}")))
    }

    /// Checks cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), DmaBufferError> {
        if self.default_backend == BufferType::Default {
            return Err(DmaBufferError::Config(
                "default_backend must name a concrete backend, not 'default'".into(),
            ));
        }
        if matches!(self.dma_heap.heap_fd, Some(fd) if fd < 0) {
            return Err(DmaBufferError::Config(
                "dma_heap.heap_fd must be a non-negative file descriptor".into(),
            ));
        }
        Ok(())
    }

    /// Maps [`BufferType::Default`] onto the configured backend.
    pub fn resolve(&self, kind: BufferType) -> BufferType {
        match kind {
            BufferType::Default => self.default_backend,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let c = AllocatorConfig::default();
        assert_eq!(c.default_backend, BufferType::DmaHeap);
        assert!(c.enable_stats);
        assert_eq!(c.dma_heap.device_node, PathBuf::from(DEFAULT_DMA_HEAP_NODE));
        assert_eq!(c.dma_heap.heap_fd, None);
        assert!(c.dma_heap.cached);
        assert_eq!(c.dma_heap.sync_method, SyncMethod::PhysWorkaround);
        assert!(!c.g2d.cacheable);
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
default_backend = "g2d"
enable_stats = false

[dma_heap]
device_node = "/dev/dma_heap/system"
cached = false
sync_method = "dma-buf-sync"

[g2d]
cacheable = true
"#;
        let c = AllocatorConfig::from_toml(toml).unwrap();
        assert_eq!(c.default_backend, BufferType::G2d);
        assert!(!c.enable_stats);
        assert_eq!(c.dma_heap.device_node, PathBuf::from("/dev/dma_heap/system"));
        assert!(!c.dma_heap.cached);
        assert_eq!(c.dma_heap.sync_method, SyncMethod::DmaBufSync);
        // Unspecified fields keep their defaults.
        assert_eq!(c.dma_heap.fd_flags, DmaHeapConfig::default().fd_flags);
        assert!(c.g2d.cacheable);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let c = AllocatorConfig::from_toml("").unwrap();
        assert_eq!(c, AllocatorConfig::default());
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let c = AllocatorConfig {
            enable_stats: false,
            ..Default::default()
        };
        let toml = c.to_toml().unwrap();
        let back = AllocatorConfig::from_toml(&toml).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_rejects_default_as_default_backend() {
        let err = AllocatorConfig::from_toml("default_backend = \"default\"").unwrap_err();
        assert!(matches!(err, DmaBufferError::Config(_)));
    }

    #[test]
    fn test_rejects_negative_heap_fd() {
        let err = AllocatorConfig::from_toml("[dma_heap]\nheap_fd = -1").unwrap_err();
        assert!(err.to_string().contains("heap_fd"));
    }

    #[test]
    fn test_unknown_backend_name() {
        assert!(AllocatorConfig::from_toml("default_backend = \"vulkan\"").is_err());
    }

    #[test]
    fn test_resolve() {
        let c = AllocatorConfig::default();
        assert_eq!(c.resolve(BufferType::Default), BufferType::DmaHeap);
        assert_eq!(c.resolve(BufferType::Ion), BufferType::Ion);
    }

    #[test]
    fn test_from_missing_file() {
        let err = AllocatorConfig::from_file(Path::new("/nonexistent/dma.toml")).unwrap_err();
        assert!(err.to_string().contains("cannot read config"));
    }
}
