// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for DMA buffer allocation and mapping.
//!
//! Only *operational* failures live here (the kernel refused an
//! allocation, a backend is not compiled in, a mapping failed). Misuse of
//! the API, such as a zero-sized allocation request or touching a buffer
//! whose allocator was destroyed, is a programming error and panics
//! instead of returning one of these.

use crate::BufferType;

/// Errors that can occur while constructing allocators or operating on buffers.
#[derive(Debug, thiserror::Error)]
pub enum DmaBufferError {
    /// The requested backend was not enabled at build time.
    #[error("{kind} allocator is not available in this build")]
    BackendDisabled { kind: BufferType },

    /// A system call made by a backend failed.
    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The backend could not provide the requested amount of memory.
    #[error("out of DMA memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    /// The allocator never allocates (only the wrapped-buffer adapter).
    #[error("{name} allocator does not allocate buffers")]
    NotAllocatable { name: &'static str },

    /// The buffer has no way of being mapped into the address space.
    #[error("buffer cannot be mapped into the process address space")]
    NotMappable,

    /// A caller-provided mapping function reported a failure.
    #[error("mapping failed: {0}")]
    MappingFailed(String),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DmaBufferError {
    /// Captures `errno` after a failed system call.
    pub(crate) fn last_os_error(op: &'static str) -> Self {
        Self::Os {
            op,
            source: std::io::Error::last_os_error(),
        }
    }

    /// Returns the errno-style diagnostic code for this error.
    ///
    /// System call failures report the raw OS error; everything else maps
    /// onto the closest errno value.
    pub fn error_code(&self) -> i32 {
        match self {
            Self::BackendDisabled { .. } => libc::ENODEV,
            Self::Os { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            Self::OutOfMemory { .. } => libc::ENOMEM,
            Self::NotAllocatable { .. } => libc::ENOTSUP,
            Self::NotMappable | Self::MappingFailed(_) => libc::EFAULT,
            Self::Config(_) => libc::EINVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let e = DmaBufferError::BackendDisabled {
            kind: BufferType::Ion,
        };
        assert_eq!(e.error_code(), libc::ENODEV);
        assert_eq!(
            DmaBufferError::OutOfMemory { requested: 1 }.error_code(),
            libc::ENOMEM
        );
        assert_eq!(DmaBufferError::Config("x".into()).error_code(), libc::EINVAL);
    }

    #[test]
    fn test_os_error_code() {
        let e = DmaBufferError::Os {
            op: "open",
            source: std::io::Error::from_raw_os_error(libc::EACCES),
        };
        assert_eq!(e.error_code(), libc::EACCES);
        assert!(e.to_string().starts_with("open failed"));
    }

    #[test]
    fn test_display() {
        let e = DmaBufferError::BackendDisabled {
            kind: BufferType::Pxp,
        };
        assert_eq!(e.to_string(), "pxp allocator is not available in this build");
    }
}
