// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The GSD file handle: lifecycle, header loading with integrity checks,
// the index growth protocol, and chunk read/write/search.
//
// A handle owns the file descriptor, a header copy, the loaded namelist,
// and one of three index representations depending on the open mode.
// All I/O is synchronous; a handle belongs to one thread at a time.

use std::io;
use std::path::Path;

use tracing::debug;

use crate::error::{GsdError, Result};
use crate::format::{
    cstr_prefix, make_version, ElementType, Header, IndexEntry, NamelistEntry, HEADER_SIZE,
    INDEX_ENTRY_SIZE, MAGIC, NAMELIST_ENTRY_SIZE,
};
use crate::index::{self, IndexView};
use crate::namelist::Namelist;
use crate::platform::{self, Fd, MappedIndex, INVALID_FD};

/// Size of the scratch buffer used to relocate the index on append-mode
/// growth.
const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Access mode of an open GSD file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Random access to committed frames; no writes.
    ReadOnly,
    /// Read and write. The whole index block is kept in memory.
    ReadWrite,
    /// Write new frames onto the end of an existing file. Committed
    /// index entries are not cached, so attaching to a large file is
    /// cheap, but `find_chunk`/`read_chunk` are unavailable.
    Append,
}

/// Everything `read_header` derives from the file.
struct LoadedFile {
    header: Header,
    file_size: u64,
    index: IndexView,
    index_num_entries: u64,
    namelist: Namelist,
    cur_frame: u64,
}

/// An open GSD file.
pub struct GsdHandle {
    fd: Fd,
    mode: OpenMode,
    header: Header,
    file_size: u64,
    index: IndexView,
    /// Entries in the used prefix of the index block (committed plus
    /// pending).
    index_num_entries: u64,
    /// Entries whose bytes have reached the on-disk index block.
    index_written_entries: u64,
    namelist: Namelist,
    cur_frame: u64,
    /// Set when the namelist changed during the current frame; forces an
    /// fsync at the next `end_frame`.
    needs_sync: bool,
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

fn eof_error() -> GsdError {
    GsdError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "unexpected end of file",
    ))
}

/// Read exactly `buf.len()` bytes at `offset`; a short read is an error.
fn read_exact_at(fd: Fd, buf: &mut [u8], offset: u64) -> Result<()> {
    let n = platform::pread_retry(fd, buf, offset)?;
    if n != buf.len() {
        return Err(eof_error());
    }
    Ok(())
}

/// Layout sanity check for one used index entry. The same predicate
/// gates the open-time binary search and makes it double as an
/// integrity scan.
fn is_entry_valid(
    entry: &IndexEntry,
    file_size: u64,
    index_allocated_entries: u64,
    namelist_num_entries: u64,
) -> bool {
    // recognized type tag, and N * M * sizeof(type) must not overflow
    let size = match entry.data_size() {
        Some(size) => size,
        None => return false,
    };

    // the payload must lie inside the file
    if entry.location < 0 {
        return false;
    }
    match (entry.location as u64).checked_add(size) {
        Some(end) if end <= file_size => {}
        _ => return false,
    }

    // a frame number can never reach the number of allocated slots
    if entry.frame >= index_allocated_entries {
        return false;
    }

    if u64::from(entry.id) >= namelist_num_entries {
        return false;
    }

    // reserved byte
    if entry.flags != 0 {
        return false;
    }

    true
}

/// Truncate the file and lay down a fresh header, zeroed index block,
/// and zeroed namelist block, then sync.
fn initialize_file(fd: Fd, application: &str, schema: &str, schema_version: u32) -> Result<()> {
    platform::truncate(fd)?;

    let header = Header::new_v1(application, schema, schema_version);
    platform::pwrite_retry(fd, &header.encode(), 0)?;

    let index_bytes =
        vec![0u8; INDEX_ENTRY_SIZE * header.index_allocated_entries as usize];
    platform::pwrite_retry(fd, &index_bytes, HEADER_SIZE as u64)?;

    let namelist_bytes =
        vec![0u8; NAMELIST_ENTRY_SIZE * header.namelist_allocated_entries as usize];
    platform::pwrite_retry(
        fd,
        &namelist_bytes,
        HEADER_SIZE as u64 + index_bytes.len() as u64,
    )?;

    platform::fsync(fd)?;
    Ok(())
}

/// Parse and validate the header, load or map the index and namelist,
/// and derive the entry counts and current frame.
fn read_header(fd: Fd, mode: OpenMode) -> Result<LoadedFile> {
    let mut buf = [0u8; HEADER_SIZE];
    let n = platform::pread_retry(fd, &mut buf, 0)?;
    if n != HEADER_SIZE {
        return Err(GsdError::InvalidFile);
    }

    let header = Header::decode(&buf);
    if header.magic != MAGIC {
        return Err(GsdError::InvalidFile);
    }
    if header.gsd_version < make_version(1, 0) && header.gsd_version != make_version(0, 3) {
        return Err(GsdError::FileMustBeUpgraded {
            version: header.gsd_version,
        });
    }
    if header.gsd_version >= make_version(2, 0) {
        return Err(GsdError::FileMustBeUpgraded {
            version: header.gsd_version,
        });
    }
    if !header.reserved_is_zero() {
        return Err(GsdError::Corrupt("nonzero reserved header bytes"));
    }

    let file_size = platform::seek_end(fd)?;

    // The index block must lie inside the file before anything reads or
    // maps it.
    if header.index_allocated_entries == 0 {
        return Err(GsdError::Corrupt("index block has no slots"));
    }
    let index_bytes = header
        .index_allocated_entries
        .checked_mul(INDEX_ENTRY_SIZE as u64)
        .ok_or(GsdError::Corrupt("index block size overflows"))?;
    match header.index_location.checked_add(index_bytes) {
        Some(end) if end <= file_size => {}
        _ => return Err(GsdError::Corrupt("index block extends past end of file")),
    }

    let mut index_view = match mode {
        OpenMode::ReadOnly | OpenMode::Append => {
            // Map the block; in append mode this is torn down again once
            // the entry count is known.
            IndexView::Mapped(MappedIndex::map(
                fd,
                header.index_location,
                index_bytes as usize,
            )?)
        }
        OpenMode::ReadWrite => {
            let mut bytes = vec![0u8; index_bytes as usize];
            read_exact_at(fd, &mut bytes, header.index_location)?;
            IndexView::Loaded(index::decode_entries(
                &bytes,
                header.index_allocated_entries as usize,
            ))
        }
    };

    // The namelist is small; always read it to the heap.
    let namelist_bytes = header
        .namelist_allocated_entries
        .checked_mul(NAMELIST_ENTRY_SIZE as u64)
        .ok_or(GsdError::Corrupt("namelist block size overflows"))?;
    match header.namelist_location.checked_add(namelist_bytes) {
        Some(end) if end <= file_size => {}
        _ => return Err(GsdError::Corrupt("namelist block extends past end of file")),
    }
    let mut bytes = vec![0u8; namelist_bytes as usize];
    read_exact_at(fd, &mut bytes, header.namelist_location)?;
    let namelist = Namelist::from_bytes(&bytes, header.namelist_allocated_entries as usize);

    // Count the used index prefix: binary search for the frontier
    // between used and empty slots, validating every probed entry. The
    // invariant is index[l].location != 0 and index[r].location == 0
    // with r starting one past the block.
    let valid = |entry: &IndexEntry| {
        is_entry_valid(
            entry,
            file_size,
            header.index_allocated_entries,
            namelist.len() as u64,
        )
    };

    let first = index_view.entry(0);
    let index_num_entries = if first.location == 0 {
        0
    } else if !valid(&first) {
        return Err(GsdError::Corrupt("invalid index entry"));
    } else {
        let mut l: u64 = 0;
        let mut r: u64 = header.index_allocated_entries;
        loop {
            let m = (l + r) / 2;
            let probe = index_view.entry(m);
            if probe.location != 0 {
                if !valid(&probe) {
                    return Err(GsdError::Corrupt("invalid index entry"));
                }
                if probe.frame < index_view.entry(l).frame {
                    return Err(GsdError::Corrupt("index frames are not monotonic"));
                }
                l = m;
            } else {
                r = m;
            }
            if r - l <= 1 {
                break;
            }
        }
        r
    };

    let cur_frame = if index_num_entries == 0 {
        0
    } else {
        index_view.entry(index_num_entries - 1).frame + 1
    };

    if mode == OpenMode::Append {
        // Tear down the temporary mapping; from here on only unwritten
        // entries are cached.
        match index_view {
            IndexView::Mapped(map) => map.unmap()?,
            _ => unreachable!("append mode maps the index during open"),
        }
        index_view = IndexView::append_buffer();
    }

    Ok(LoadedFile {
        header,
        file_size,
        index: index_view,
        index_num_entries,
        namelist,
        cur_frame,
    })
}

// ---------------------------------------------------------------------------
// GsdHandle
// ---------------------------------------------------------------------------

impl GsdHandle {
    fn from_loaded(fd: Fd, mode: OpenMode, loaded: LoadedFile) -> Self {
        Self {
            fd,
            mode,
            header: loaded.header,
            file_size: loaded.file_size,
            index: loaded.index,
            index_num_entries: loaded.index_num_entries,
            // everything counted at open time is already on disk
            index_written_entries: loaded.index_num_entries,
            namelist: loaded.namelist,
            cur_frame: loaded.cur_frame,
            needs_sync: false,
        }
    }

    /// Create an empty GSD file and close it again.
    pub fn create<P: AsRef<Path>>(
        path: P,
        application: &str,
        schema: &str,
        schema_version: u32,
    ) -> Result<()> {
        debug!(path = %path.as_ref().display(), application, schema, "creating GSD file");
        let fd = platform::create_rdwr(path.as_ref(), false)?;
        let init = initialize_file(fd, application, schema, schema_version);
        let closed = platform::close(fd);
        init?;
        closed?;
        Ok(())
    }

    /// Create an empty GSD file and open it in one step.
    ///
    /// Only the writable modes are accepted. With `exclusive`, creation
    /// fails if the file already exists.
    pub fn create_and_open<P: AsRef<Path>>(
        path: P,
        application: &str,
        schema: &str,
        schema_version: u32,
        mode: OpenMode,
        exclusive: bool,
    ) -> Result<Self> {
        if mode == OpenMode::ReadOnly {
            return Err(GsdError::InvalidFlag);
        }

        let fd = platform::create_rdwr(path.as_ref(), exclusive)?;
        if let Err(e) = initialize_file(fd, application, schema, schema_version) {
            let _ = platform::close(fd);
            return Err(e);
        }
        match read_header(fd, mode) {
            Ok(loaded) => Ok(Self::from_loaded(fd, mode, loaded)),
            Err(e) => {
                let _ = platform::close(fd);
                Err(e)
            }
        }
    }

    /// Open an existing GSD file.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        let fd = match mode {
            OpenMode::ReadOnly => platform::open_rdonly(path.as_ref())?,
            OpenMode::ReadWrite | OpenMode::Append => platform::open_rdwr(path.as_ref())?,
        };
        match read_header(fd, mode) {
            Ok(loaded) => {
                debug!(
                    path = %path.as_ref().display(),
                    ?mode,
                    nframes = loaded.cur_frame,
                    "opened GSD file"
                );
                Ok(Self::from_loaded(fd, mode, loaded))
            }
            Err(e) => {
                let _ = platform::close(fd);
                Err(e)
            }
        }
    }

    /// Discard all frames and names, keeping the application and schema
    /// identity of the file.
    pub fn truncate(&mut self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(GsdError::InvalidArgument("handle is read-only"));
        }

        let application = cstr_prefix(&self.header.application).to_owned();
        let schema = cstr_prefix(&self.header.schema).to_owned();
        let schema_version = self.header.schema_version;
        debug!(%application, %schema, "truncating GSD file");

        // Release the old index and namelist before rewriting the file.
        self.index = IndexView::append_buffer();

        initialize_file(self.fd, &application, &schema, schema_version)?;
        let loaded = read_header(self.fd, self.mode)?;

        self.header = loaded.header;
        self.file_size = loaded.file_size;
        self.index = loaded.index;
        self.index_num_entries = loaded.index_num_entries;
        self.index_written_entries = loaded.index_num_entries;
        self.namelist = loaded.namelist;
        self.cur_frame = loaded.cur_frame;
        self.needs_sync = false;
        Ok(())
    }

    /// Release the mapping, buffers, and file descriptor.
    ///
    /// All resources are released even when one step fails; the first
    /// error is returned. Dropping a handle releases everything too,
    /// ignoring errors.
    pub fn close(mut self) -> Result<()> {
        let fd = std::mem::replace(&mut self.fd, INVALID_FD);
        let index = std::mem::replace(&mut self.index, IndexView::append_buffer());

        let unmapped = match index {
            IndexView::Mapped(map) => map.unmap(),
            _ => Ok(()),
        };
        let closed = platform::close(fd);
        unmapped?;
        closed?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Name table
    // -----------------------------------------------------------------

    /// Resolve `name` to its namelist id. With `append`, an unknown name
    /// is added to the namelist and persisted immediately; `Ok(None)`
    /// then means the namelist is full.
    fn get_id(&mut self, name: &str, append: bool) -> Result<Option<u16>> {
        if let Some(id) = self.namelist.find(name) {
            return Ok(Some(id));
        }

        if append
            && (self.mode == OpenMode::ReadWrite || self.mode == OpenMode::Append)
            && !self.namelist.is_full()
        {
            let entry = NamelistEntry::from_name(name);
            let id = self.namelist.next_id();
            let offset = self.header.namelist_location
                + NAMELIST_ENTRY_SIZE as u64 * u64::from(id);
            platform::pwrite_retry(self.fd, &entry.name, offset)?;
            self.namelist.append(entry);
            self.needs_sync = true;
            return Ok(Some(id));
        }

        Ok(None)
    }

    // -----------------------------------------------------------------
    // Index engine
    // -----------------------------------------------------------------

    /// Double the index block. The new block always lands at the end of
    /// the file so committed payload offsets stay valid; the old block
    /// becomes dead space.
    fn expand_index(&mut self) -> Result<()> {
        let old_size = self.header.index_allocated_entries;
        let new_size = old_size * 2;
        self.header.index_allocated_entries = new_size;
        debug!(old_size, new_size, "expanding index block");

        match &mut self.index {
            IndexView::Loaded(entries) => {
                entries.resize(new_size as usize, IndexEntry::default());

                let new_location = platform::seek_end(self.fd)?;
                let image = index::encode_entries(entries);
                platform::pwrite_retry(self.fd, &image, new_location)?;

                self.header.index_location = new_location;
                self.file_size = new_location + image.len() as u64;
            }
            IndexView::AppendBuffered { .. } => {
                // The block is not in memory; copy it on disk in chunks,
                // then zero-fill the new slots.
                let new_location = platform::seek_end(self.fd)?;
                let old_location = self.header.index_location;
                let old_bytes = old_size * INDEX_ENTRY_SIZE as u64;
                let new_bytes = new_size * INDEX_ENTRY_SIZE as u64;

                let mut buf = vec![0u8; COPY_BUFFER_SIZE];
                let mut total: u64 = 0;
                while total < old_bytes {
                    let step = (old_bytes - total).min(COPY_BUFFER_SIZE as u64) as usize;
                    read_exact_at(self.fd, &mut buf[..step], old_location + total)?;
                    platform::pwrite_retry(self.fd, &buf[..step], new_location + total)?;
                    total += step as u64;
                }

                buf.fill(0);
                while total < new_bytes {
                    let step = (new_bytes - total).min(COPY_BUFFER_SIZE as u64) as usize;
                    platform::pwrite_retry(self.fd, &buf[..step], new_location + total)?;
                    total += step as u64;
                }

                self.header.index_location = new_location;
                self.file_size = new_location + new_bytes;
            }
            IndexView::Mapped(_) => unreachable!("read-only handles never grow the index"),
        }

        // Barrier: the relocated block must be durable before the header
        // points at it, and the header update must be durable before any
        // further writes.
        platform::fsync(self.fd)?;
        platform::pwrite_retry(self.fd, &self.header.encode(), 0)?;
        platform::fsync(self.fd)?;
        Ok(())
    }

    /// Commit the current frame: bump the frame counter and flush
    /// pending index entries to the on-disk block.
    ///
    /// The flush is only fsynced when the namelist changed during the
    /// frame; a crash can therefore lose trailing frames, but the
    /// committed prefix stays well-formed because reopening recounts the
    /// index.
    pub fn end_frame(&mut self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(GsdError::InvalidArgument("handle is read-only"));
        }

        self.cur_frame += 1;

        let entries_to_write = self.index_num_entries - self.index_written_entries;
        if entries_to_write > 0 {
            let write_pos = self.header.index_location
                + INDEX_ENTRY_SIZE as u64 * self.index_written_entries;
            let image = self
                .index
                .unwritten_bytes(self.index_written_entries, entries_to_write);
            platform::pwrite_retry(self.fd, &image, write_pos)?;
            self.index_written_entries += entries_to_write;
            self.index.mark_flushed();
        }

        if self.needs_sync {
            platform::fsync(self.fd)?;
            self.needs_sync = false;
        }

        Ok(())
    }

    // -----------------------------------------------------------------
    // Chunk access
    // -----------------------------------------------------------------

    /// Write a chunk of `n` rows by `m` columns into the current frame.
    ///
    /// `data` must hold exactly `n * m * sizeof(element_type)` bytes.
    /// The payload goes to the end of the file immediately; the index
    /// entry becomes durable at the next `end_frame`. `flags` is
    /// reserved and ignored for v1 files.
    ///
    /// Fails with [`GsdError::NamelistFull`] once 128 distinct names are
    /// in use; v1 files cannot grow the namelist.
    pub fn write_chunk(
        &mut self,
        name: &str,
        element_type: ElementType,
        n: u64,
        m: u8,
        flags: u8,
        data: &[u8],
    ) -> Result<()> {
        let _ = flags; // reserved in v1 files; the stored byte is zero

        if m == 0 {
            return Err(GsdError::InvalidArgument("chunks have at least one column"));
        }
        if self.mode == OpenMode::ReadOnly {
            return Err(GsdError::InvalidArgument("handle is read-only"));
        }
        let size = n
            .checked_mul(u64::from(m))
            .and_then(|v| v.checked_mul(element_type.size() as u64))
            .ok_or(GsdError::InvalidArgument("chunk size overflows"))?;
        if data.len() as u64 != size {
            return Err(GsdError::InvalidArgument(
                "data length does not match N * M * sizeof(type)",
            ));
        }

        let id = match self.get_id(name, true)? {
            Some(id) => id,
            None => return Err(GsdError::NamelistFull),
        };

        let entry = IndexEntry {
            frame: self.cur_frame,
            n,
            location: self.file_size as i64,
            id,
            m,
            type_tag: element_type.tag(),
            flags: 0,
        };

        platform::pwrite_retry(self.fd, data, entry.location as u64)?;
        self.file_size += size;

        if self.index_num_entries >= self.header.index_allocated_entries {
            self.expand_index()?;
        }

        self.index
            .place(self.index_num_entries, self.index_written_entries, entry);
        self.index_num_entries += 1;
        Ok(())
    }

    /// Locate the chunk `name` in `frame`.
    ///
    /// Binary-searches the committed index for the rightmost entry of
    /// the frame, then walks backward over the frame's entries matching
    /// on id. Unavailable in append mode, which does not cache committed
    /// entries.
    pub fn find_chunk(&self, frame: u64, name: &str) -> Option<IndexEntry> {
        if frame >= self.nframes() {
            return None;
        }
        if self.mode == OpenMode::Append {
            return None;
        }
        let match_id = self.namelist.find(name)?;

        let mut l: u64 = 0;
        let mut r: u64 = self.index_num_entries;
        loop {
            let m = (l + r) / 2;
            if frame < self.index.entry(m).frame {
                r = m;
            } else {
                l = m;
            }
            if r - l <= 1 {
                break;
            }
        }

        // l is the rightmost entry with entry.frame <= frame; scan back
        // through the frame's entries
        let mut cur = l as i64;
        while cur >= 0 {
            let entry = self.index.entry(cur as u64);
            if entry.frame != frame {
                break;
            }
            if entry.id == match_id {
                return Some(entry);
            }
            cur -= 1;
        }
        None
    }

    /// Read a chunk's payload into `buf`, which must hold at least
    /// `entry.data_size()` bytes.
    pub fn read_chunk_into(&self, entry: &IndexEntry, buf: &mut [u8]) -> Result<()> {
        if self.mode == OpenMode::Append {
            return Err(GsdError::InvalidArgument(
                "append handles cannot read chunks",
            ));
        }

        let size = entry.data_size().unwrap_or(0);
        if size == 0 || entry.location <= 0 {
            return Err(GsdError::InvalidArgument("empty or invalid index entry"));
        }
        let location = entry.location as u64;
        match location.checked_add(size) {
            Some(end) if end <= self.file_size => {}
            _ => {
                return Err(GsdError::InvalidArgument(
                    "chunk extends past end of file",
                ))
            }
        }
        if (buf.len() as u64) < size {
            return Err(GsdError::InvalidArgument("buffer is too small for chunk"));
        }

        read_exact_at(self.fd, &mut buf[..size as usize], location)
    }

    /// Read a chunk's payload into a fresh buffer.
    pub fn read_chunk(&self, entry: &IndexEntry) -> Result<Vec<u8>> {
        let size = entry.data_size().unwrap_or(0);
        let mut buf = vec![0u8; size as usize];
        self.read_chunk_into(entry, &mut buf)?;
        Ok(buf)
    }

    /// Find the next chunk name starting with `prefix`.
    ///
    /// Pass `None` to start at the beginning, or the name returned by
    /// the previous call to continue after it. Names are enumerated in
    /// insertion order; `None` marks the end of the list.
    pub fn find_matching_chunk_name(&self, prefix: &str, prev: Option<&str>) -> Option<&str> {
        if self.namelist.is_empty() {
            return None;
        }

        let start = match prev {
            None => 0,
            Some(p) => {
                // `prev` must be a name handed out earlier, i.e. a slice
                // into the namelist backing store; recover its slot from
                // its address.
                let base = self.namelist.base_addr();
                let addr = p.as_ptr() as usize;
                if addr < base {
                    return None;
                }
                let delta = addr - base;
                if delta % NAMELIST_ENTRY_SIZE != 0 {
                    return None;
                }
                delta / NAMELIST_ENTRY_SIZE + 1
            }
        };

        let match_len = prefix.len().min(NAMELIST_ENTRY_SIZE);
        let prefix_bytes = &prefix.as_bytes()[..match_len];
        for i in start..self.namelist.len() {
            let name = self.namelist.name_at(i);
            if name.as_bytes().starts_with(prefix_bytes) {
                return Some(name);
            }
        }
        None
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    /// Number of committed frames.
    pub fn nframes(&self) -> u64 {
        self.cur_frame
    }

    /// The open mode of this handle.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Name of the application that created the file.
    pub fn application(&self) -> &str {
        cstr_prefix(&self.header.application)
    }

    /// Name of the data schema.
    pub fn schema(&self) -> &str {
        cstr_prefix(&self.header.schema)
    }

    /// Schema version, `(major << 16) | minor`.
    pub fn schema_version(&self) -> u32 {
        self.header.schema_version
    }

    /// File format version, `(major << 16) | minor`.
    pub fn gsd_version(&self) -> u32 {
        self.header.gsd_version
    }

    /// Current size of the file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// The file header.
    pub fn header(&self) -> &Header {
        &self.header
    }
}

impl Drop for GsdHandle {
    fn drop(&mut self) {
        if self.fd != INVALID_FD {
            let _ = platform::close(self.fd);
            self.fd = INVALID_FD;
        }
        // a still-held MappedIndex unmaps itself
    }
}
