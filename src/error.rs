// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy for GSD file access. Each variant corresponds to one
// failure class of the engine; errors bubble to the caller unchanged.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GsdError>;

/// Errors raised while creating, opening, or accessing a GSD file.
#[derive(Debug, Error)]
pub enum GsdError {
    /// A read, write, seek, map, sync, truncate, open, or close failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A caller-supplied argument or the handle's mode forbids the
    /// operation (write on a read-only handle, lookup on an append
    /// handle, zero columns, mismatched payload length, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The file is too short to hold a header or does not carry the GSD
    /// magic number.
    #[error("not a GSD file")]
    InvalidFile,

    /// The file's format version is outside the accepted range
    /// (0.3 or 1.x).
    #[error("GSD file version {version:#010x} is not supported by this reader")]
    FileMustBeUpgraded {
        /// The on-disk `gsd_version` field, `(major << 16) | minor`.
        version: u32,
    },

    /// An index-layout sanity check failed: an entry overflows the file,
    /// frames are not monotonic, a type tag or id is out of range, or a
    /// reserved byte is nonzero.
    #[error("corrupt GSD file: {0}")]
    Corrupt(&'static str),

    /// The namelist has reached its fixed capacity; v1 files cannot grow
    /// it, so no further distinct chunk names can be written.
    #[error("chunk namelist is full")]
    NamelistFull,

    /// A read-only mode was passed where only writable modes are
    /// accepted (`create_and_open`).
    #[error("invalid open flag for this operation")]
    InvalidFlag,
}
