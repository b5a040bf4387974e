// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Pure Rust implementation of the GSD (General Simulation Data) file
// format: an append-only, random-access binary container for sequences
// of named, typed array chunks organized into frames. Binary-compatible
// with GSD v1.0 files (and readable back to v0.3).

pub mod format;
pub use format::{make_version, sizeof_type, ElementType, Header, IndexEntry};

mod error;
pub use error::{GsdError, Result};

mod platform;

mod index;

mod namelist;

mod handle;
pub use handle::{GsdHandle, OpenMode};
