// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Windows byte I/O: positional read/write via ReadFile/WriteFile with an
// OVERLAPPED offset. There is no mmap backend here; `MappedIndex` is a
// loaded copy of the index block with the same interface as the POSIX
// mapping, so the engine above is platform-free.

use std::io;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_HANDLE_EOF, GENERIC_READ, GENERIC_WRITE, HANDLE,
    INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FlushFileBuffers, GetFileSizeEx, ReadFile, SetEndOfFile, SetFilePointerEx,
    WriteFile, CREATE_ALWAYS, CREATE_NEW, FILE_ATTRIBUTE_NORMAL, FILE_BEGIN,
    FILE_SHARE_READ, OPEN_EXISTING,
};
use windows_sys::Win32::System::IO::OVERLAPPED;

/// Raw file handle.
pub type Fd = HANDLE;

/// Sentinel for a handle whose descriptor has been released.
pub const INVALID_FD: Fd = INVALID_HANDLE_VALUE;

// Single ReadFile/WriteFile transfers are limited to a u32 count; split
// large transfers well below the limit.
const MAX_TRANSFER: usize = (i32::MAX / 2) as usize;

fn to_wide(path: &Path) -> Vec<u16> {
    path.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
}

fn last_error() -> io::Error {
    io::Error::from_raw_os_error(unsafe { GetLastError() } as i32)
}

/// Open an existing file read-only.
pub fn open_rdonly(path: &Path) -> io::Result<Fd> {
    let wide = to_wide(path);
    let fd = unsafe {
        CreateFileW(
            wide.as_ptr(),
            GENERIC_READ,
            FILE_SHARE_READ,
            std::ptr::null(),
            OPEN_EXISTING,
            FILE_ATTRIBUTE_NORMAL,
            std::ptr::null_mut(),
        )
    };
    if fd == INVALID_HANDLE_VALUE {
        return Err(last_error());
    }
    Ok(fd)
}

/// Open an existing file read-write.
pub fn open_rdwr(path: &Path) -> io::Result<Fd> {
    let wide = to_wide(path);
    let fd = unsafe {
        CreateFileW(
            wide.as_ptr(),
            GENERIC_READ | GENERIC_WRITE,
            FILE_SHARE_READ,
            std::ptr::null(),
            OPEN_EXISTING,
            FILE_ATTRIBUTE_NORMAL,
            std::ptr::null_mut(),
        )
    };
    if fd == INVALID_HANDLE_VALUE {
        return Err(last_error());
    }
    Ok(fd)
}

/// Create (or truncate) a file read-write.
pub fn create_rdwr(path: &Path, exclusive: bool) -> io::Result<Fd> {
    let wide = to_wide(path);
    let disposition = if exclusive { CREATE_NEW } else { CREATE_ALWAYS };
    let fd = unsafe {
        CreateFileW(
            wide.as_ptr(),
            GENERIC_READ | GENERIC_WRITE,
            FILE_SHARE_READ,
            std::ptr::null(),
            disposition,
            FILE_ATTRIBUTE_NORMAL,
            std::ptr::null_mut(),
        )
    };
    if fd == INVALID_HANDLE_VALUE {
        return Err(last_error());
    }
    Ok(fd)
}

pub fn close(fd: Fd) -> io::Result<()> {
    if unsafe { CloseHandle(fd) } == 0 {
        return Err(last_error());
    }
    Ok(())
}

fn overlapped_at(offset: u64) -> OVERLAPPED {
    let mut ov: OVERLAPPED = unsafe { std::mem::zeroed() };
    ov.Anonymous.Anonymous.Offset = offset as u32;
    ov.Anonymous.Anonymous.OffsetHigh = (offset >> 32) as u32;
    ov
}

/// Read `buf.len()` bytes at `offset`, retrying partial transfers.
///
/// Returns the number of bytes read, which is short of `buf.len()` only
/// when end-of-file is reached first.
pub fn pread_retry(fd: Fd, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut total = 0usize;
    while total < buf.len() {
        let to_read = (buf.len() - total).min(MAX_TRANSFER) as u32;
        let mut ov = overlapped_at(offset + total as u64);
        let mut n: u32 = 0;
        let ok = unsafe {
            ReadFile(
                fd,
                buf[total..].as_mut_ptr(),
                to_read,
                &mut n,
                &mut ov,
            )
        };
        if ok == 0 {
            if unsafe { GetLastError() } == ERROR_HANDLE_EOF {
                return Ok(total);
            }
            return Err(last_error());
        }
        if n == 0 {
            // end of file
            return Ok(total);
        }
        total += n as usize;
    }
    Ok(total)
}

/// Write all of `buf` at `offset`, retrying partial transfers.
pub fn pwrite_retry(fd: Fd, buf: &[u8], offset: u64) -> io::Result<usize> {
    let mut total = 0usize;
    while total < buf.len() {
        let to_write = (buf.len() - total).min(MAX_TRANSFER) as u32;
        let mut ov = overlapped_at(offset + total as u64);
        let mut n: u32 = 0;
        let ok = unsafe {
            WriteFile(
                fd,
                buf[total..].as_ptr(),
                to_write,
                &mut n,
                &mut ov,
            )
        };
        if ok == 0 {
            return Err(last_error());
        }
        if n == 0 {
            // a zero-length transfer makes no progress; treat as failure
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "WriteFile wrote 0 bytes",
            ));
        }
        total += n as usize;
    }
    Ok(total)
}

/// Size of the file in bytes.
pub fn seek_end(fd: Fd) -> io::Result<u64> {
    let mut size: i64 = 0;
    if unsafe { GetFileSizeEx(fd, &mut size) } == 0 {
        return Err(last_error());
    }
    Ok(size as u64)
}

pub fn fsync(fd: Fd) -> io::Result<()> {
    if unsafe { FlushFileBuffers(fd) } == 0 {
        return Err(last_error());
    }
    Ok(())
}

/// Truncate the file to zero length.
pub fn truncate(fd: Fd) -> io::Result<()> {
    unsafe {
        if SetFilePointerEx(fd, 0, std::ptr::null_mut(), FILE_BEGIN) == 0 {
            return Err(last_error());
        }
        if SetEndOfFile(fd) == 0 {
            return Err(last_error());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MappedIndex: loaded fallback for the index block
// ---------------------------------------------------------------------------

/// A loaded copy of the index block, standing in for the POSIX mmap.
pub struct MappedIndex {
    data: Vec<u8>,
}

impl MappedIndex {
    /// Read `data_len` bytes of index data starting at `index_location`.
    pub fn map(fd: Fd, index_location: u64, data_len: usize) -> io::Result<Self> {
        let mut data = vec![0u8; data_len];
        let n = pread_retry(fd, &mut data, index_location)?;
        if n != data_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "short read of index block",
            ));
        }
        Ok(Self { data })
    }

    /// The index block bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Release the copy. Infallible here; the POSIX mapping can fail in
    /// munmap, so the signature matches.
    pub fn unmap(self) -> io::Result<()> {
        Ok(())
    }
}
