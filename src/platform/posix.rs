// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX byte I/O: positional read/write retry loops over a raw file
// descriptor, plus a read-only memory mapping of the index block.
// pread/pwrite never move the file offset, so the retry loops leave no
// observable cursor state behind.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

/// Raw file descriptor.
pub type Fd = libc::c_int;

/// Sentinel for a handle whose descriptor has been released.
pub const INVALID_FD: Fd = -1;

// macOS raises EINVAL for single transfers larger than INT_MAX; split
// them well below the limit. Linux caps a single pread/pwrite at about
// 2 GiB on its own, which the retry loop already absorbs.
#[cfg(target_os = "macos")]
const MAX_TRANSFER: usize = (i32::MAX / 2) as usize;

fn cpath(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

// S_IRUSR | S_IWUSR | S_IRGRP | S_IWGRP
const CREATE_PERMS: libc::mode_t = 0o660;

/// Open an existing file read-only.
pub fn open_rdonly(path: &Path) -> io::Result<Fd> {
    let c = cpath(path)?;
    let fd = unsafe { libc::open(c.as_ptr(), libc::O_RDONLY) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Open an existing file read-write.
pub fn open_rdwr(path: &Path) -> io::Result<Fd> {
    let c = cpath(path)?;
    let fd = unsafe { libc::open(c.as_ptr(), libc::O_RDWR) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Create (or truncate) a file read-write with user+group rw permissions.
pub fn create_rdwr(path: &Path, exclusive: bool) -> io::Result<Fd> {
    let c = cpath(path)?;
    let mut flags = libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC;
    if exclusive {
        flags |= libc::O_EXCL;
    }
    let fd = unsafe { libc::open(c.as_ptr(), flags, libc::c_uint::from(CREATE_PERMS)) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

pub fn close(fd: Fd) -> io::Result<()> {
    if unsafe { libc::close(fd) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Read `buf.len()` bytes at `offset`, retrying partial transfers.
///
/// Returns the number of bytes read, which is short of `buf.len()` only
/// when end-of-file is reached first.
pub fn pread_retry(fd: Fd, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut total = 0usize;
    while total < buf.len() {
        #[allow(unused_mut)]
        let mut to_read = buf.len() - total;
        #[cfg(target_os = "macos")]
        if to_read > MAX_TRANSFER {
            to_read = MAX_TRANSFER;
        }

        let n = unsafe {
            libc::pread(
                fd,
                buf[total..].as_mut_ptr() as *mut libc::c_void,
                to_read,
                (offset + total as u64) as libc::off_t,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
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
        #[allow(unused_mut)]
        let mut to_write = buf.len() - total;
        #[cfg(target_os = "macos")]
        if to_write > MAX_TRANSFER {
            to_write = MAX_TRANSFER;
        }

        let n = unsafe {
            libc::pwrite(
                fd,
                buf[total..].as_ptr() as *const libc::c_void,
                to_write,
                (offset + total as u64) as libc::off_t,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if n == 0 {
            // a zero-length transfer makes no progress; treat as failure
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "pwrite returned 0",
            ));
        }
        total += n as usize;
    }
    Ok(total)
}

/// Size of the file in bytes (seek to end).
pub fn seek_end(fd: Fd) -> io::Result<u64> {
    let pos = unsafe { libc::lseek(fd, 0, libc::SEEK_END) };
    if pos < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(pos as u64)
}

pub fn fsync(fd: Fd) -> io::Result<()> {
    if unsafe { libc::fsync(fd) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Truncate the file to zero length.
pub fn truncate(fd: Fd) -> io::Result<()> {
    if unsafe { libc::ftruncate(fd, 0) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MappedIndex: read-only mmap of the index block
// ---------------------------------------------------------------------------

/// A read-only memory mapping covering the index block.
///
/// mmap requires a page-aligned file offset, so the map starts at the
/// page boundary at or below `index_location` and the entry data begins
/// `data_offset` bytes into the mapping.
pub struct MappedIndex {
    base: *mut libc::c_void,
    map_len: usize,
    data_offset: usize,
    data_len: usize,
}

// The mapping is read-only and owned by exactly one handle.
unsafe impl Send for MappedIndex {}

impl MappedIndex {
    /// Map `data_len` bytes of index data starting at `index_location`.
    pub fn map(fd: Fd, index_location: u64, data_len: usize) -> io::Result<Self> {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;
        let aligned = (index_location / page) * page;
        let data_offset = (index_location - aligned) as usize;
        let map_len = data_len + data_offset;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                fd,
                aligned as libc::off_t,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            base,
            map_len,
            data_offset,
            data_len,
        })
    }

    /// The mapped index block bytes.
    pub fn bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(
                (self.base as *const u8).add(self.data_offset),
                self.data_len,
            )
        }
    }

    /// Unmap, reporting any munmap failure. The length and page-aligned
    /// base are the same ones used at map time.
    pub fn unmap(mut self) -> io::Result<()> {
        let ret = unsafe { libc::munmap(self.base, self.map_len) };
        self.base = ptr::null_mut();
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for MappedIndex {
    fn drop(&mut self) {
        if !self.base.is_null() {
            unsafe { libc::munmap(self.base, self.map_len) };
        }
    }
}
