// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

#[cfg(unix)]
pub mod posix;

#[cfg(windows)]
pub mod windows;

// Re-export the platform-specific implementations under a uniform name.

#[cfg(unix)]
pub use posix::{
    close, create_rdwr, fsync, open_rdonly, open_rdwr, pread_retry, pwrite_retry, seek_end,
    truncate, Fd, MappedIndex, INVALID_FD,
};

#[cfg(windows)]
pub use windows::{
    close, create_rdwr, fsync, open_rdonly, open_rdwr, pread_retry, pwrite_retry, seek_end,
    truncate, Fd, MappedIndex, INVALID_FD,
};
