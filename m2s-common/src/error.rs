// SPDX-FileCopyrightText: 2025 m2s contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Access, GuestAddr, PhysAddr};

/// Faults raised by the memory subsystem.
///
/// These abort the simulated operation in progress (usually one guest
/// instruction); the embedding simulator decides how to report them.
#[derive(Debug, Error)]
pub enum MemoryFault {
    #[error("segmentation fault at 0x{addr:08X}: page not allocated")]
    SegmentationFault { addr: PhysAddr },

    #[error("permission denied at 0x{addr:08X}: required {required}, have {actual}")]
    PermissionDenied {
        addr: GuestAddr,
        required: Access,
        actual: Access,
    },

    #[error("out of guest memory (requested 0x{size:X} bytes)")]
    OutOfMemory { size: u64 },

    #[error("free of 0x{addr:08X}: pointer not created by Allocate or already freed")]
    InvalidFree { addr: GuestAddr },

    #[error("cannot access '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MemoryFault {
    /// Guest fault on a virtual address.
    #[inline]
    pub fn segfault(addr: GuestAddr) -> Self {
        Self::SegmentationFault { addr: addr as PhysAddr }
    }

    /// The address the fault refers to, if any.
    pub fn address(&self) -> Option<PhysAddr> {
        match self {
            Self::SegmentationFault { addr } => Some(*addr),
            Self::PermissionDenied { addr, .. } => Some(*addr as PhysAddr),
            Self::InvalidFree { addr } => Some(*addr as PhysAddr),
            Self::OutOfMemory { .. } | Self::Io { .. } => None,
        }
    }
}

/// Result alias for memory operations.
pub type MemoryResult<T> = Result<T, MemoryFault>;
