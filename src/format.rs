// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The GSD v1.0 on-disk records: file header, index entry, and namelist
// entry, together with the element type table. All multi-byte integers
// are little-endian in the file; the codecs here are explicit about it so
// the same byte image is produced on any host.
//
// File layout:
//
//   [ header   ]  256 bytes at offset 0
//   [ payloads ]  chunk data, appended in write order
//   [ index    ]  32 bytes × index_allocated_entries
//   [ namelist ]  128 bytes × namelist_allocated_entries
//
// The index and namelist blocks start directly after the header in a
// fresh file; when the index outgrows its block it is rewritten at the
// end of the file and the header is updated to point at the new copy.

/// Magic value identifying a GSD file.
pub const MAGIC: u64 = 0x65DF_65DF_65DF_65DF;

/// Encoded size of the file header.
pub const HEADER_SIZE: usize = 256;

/// Encoded size of one index entry.
pub const INDEX_ENTRY_SIZE: usize = 32;

/// Encoded size of one namelist entry.
pub const NAMELIST_ENTRY_SIZE: usize = 128;

/// Number of index slots allocated in a freshly initialized file.
pub const INITIAL_INDEX_ENTRIES: u64 = 128;

/// Number of namelist slots allocated in a freshly initialized file.
/// v1 files never grow the namelist, so this is also the hard limit on
/// distinct chunk names.
pub const INITIAL_NAMELIST_ENTRIES: u64 = 128;

/// Sentinel id returned when a name is not present in the namelist.
/// Reserved: it never appears in a stored index entry.
pub const ID_NOT_FOUND: u16 = u16::MAX;

/// Pack a major/minor pair into the on-disk version representation.
pub const fn make_version(major: u32, minor: u32) -> u32 {
    (major << 16) | minor
}

// ---------------------------------------------------------------------------
// Element types
// ---------------------------------------------------------------------------

/// Element type of the values stored in a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElementType {
    U8 = 1,
    U16 = 2,
    U32 = 3,
    U64 = 4,
    I8 = 5,
    I16 = 6,
    I32 = 7,
    I64 = 8,
    F32 = 9,
    F64 = 10,
}

impl ElementType {
    /// Decode an on-disk type tag. Unknown tags are invalid.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Self::U8,
            2 => Self::U16,
            3 => Self::U32,
            4 => Self::U64,
            5 => Self::I8,
            6 => Self::I16,
            7 => Self::I32,
            8 => Self::I64,
            9 => Self::F32,
            10 => Self::F64,
            _ => return None,
        })
    }

    /// The on-disk type tag.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }
}

/// Size in bytes of the element identified by an on-disk type tag, or 0
/// if the tag is unknown.
pub fn sizeof_type(tag: u8) -> usize {
    ElementType::from_tag(tag).map_or(0, ElementType::size)
}

// ---------------------------------------------------------------------------
// Little-endian field helpers
// ---------------------------------------------------------------------------

fn get_u16(buf: &[u8], off: usize) -> u16 {
    let mut b = [0u8; 2];
    b.copy_from_slice(&buf[off..off + 2]);
    u16::from_le_bytes(b)
}

fn get_u32(buf: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(b)
}

fn get_u64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

fn get_i64(buf: &[u8], off: usize) -> i64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    i64::from_le_bytes(b)
}

/// The valid UTF-8 prefix of a NUL-terminated byte field.
pub(crate) fn cstr_prefix(bytes: &[u8]) -> &str {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    match std::str::from_utf8(&bytes[..end]) {
        Ok(s) => s,
        Err(e) => {
            // Foreign files may carry non-UTF-8 names; expose the clean
            // prefix rather than failing the whole open.
            std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or("")
        }
    }
}

/// Copy `src` into a zeroed fixed-size field, truncated to leave room for
/// the terminating NUL.
pub(crate) fn copy_cstr(dst: &mut [u8], src: &str) {
    let n = src.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&src.as_bytes()[..n]);
    for b in &mut dst[n..] {
        *b = 0;
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// The GSD file header, written once at offset 0 and updated in place
/// only when the index block moves.
#[derive(Debug, Clone)]
pub struct Header {
    pub magic: u64,
    /// File format version, `(major << 16) | minor`.
    pub gsd_version: u32,
    /// Name of the generating application, NUL-terminated.
    pub application: [u8; 64],
    /// Name of the data schema, NUL-terminated.
    pub schema: [u8; 64],
    /// Schema version, `(major << 16) | minor`.
    pub schema_version: u32,
    /// Byte offset of the index block.
    pub index_location: u64,
    /// Number of slots in the current index block.
    pub index_allocated_entries: u64,
    /// Byte offset of the namelist block.
    pub namelist_location: u64,
    /// Number of slots in the namelist block.
    pub namelist_allocated_entries: u64,
    /// Reserved; must be zero in v1 files.
    pub reserved: [u8; 80],
}

impl Header {
    /// Header for a freshly initialized v1.0 file: index and namelist
    /// blocks packed directly after the header.
    pub fn new_v1(application: &str, schema: &str, schema_version: u32) -> Self {
        let mut app = [0u8; 64];
        let mut sch = [0u8; 64];
        copy_cstr(&mut app, application);
        copy_cstr(&mut sch, schema);

        let index_location = HEADER_SIZE as u64;
        Self {
            magic: MAGIC,
            gsd_version: make_version(1, 0),
            application: app,
            schema: sch,
            schema_version,
            index_location,
            index_allocated_entries: INITIAL_INDEX_ENTRIES,
            namelist_location: index_location
                + INDEX_ENTRY_SIZE as u64 * INITIAL_INDEX_ENTRIES,
            namelist_allocated_entries: INITIAL_NAMELIST_ENTRIES,
            reserved: [0u8; 80],
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.magic.to_le_bytes());
        buf[8..12].copy_from_slice(&self.gsd_version.to_le_bytes());
        buf[12..76].copy_from_slice(&self.application);
        buf[76..140].copy_from_slice(&self.schema);
        buf[140..144].copy_from_slice(&self.schema_version.to_le_bytes());
        buf[144..152].copy_from_slice(&self.index_location.to_le_bytes());
        buf[152..160].copy_from_slice(&self.index_allocated_entries.to_le_bytes());
        buf[160..168].copy_from_slice(&self.namelist_location.to_le_bytes());
        buf[168..176].copy_from_slice(&self.namelist_allocated_entries.to_le_bytes());
        buf[176..256].copy_from_slice(&self.reserved);
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut application = [0u8; 64];
        application.copy_from_slice(&buf[12..76]);
        let mut schema = [0u8; 64];
        schema.copy_from_slice(&buf[76..140]);
        let mut reserved = [0u8; 80];
        reserved.copy_from_slice(&buf[176..256]);
        Self {
            magic: get_u64(buf, 0),
            gsd_version: get_u32(buf, 8),
            application,
            schema,
            schema_version: get_u32(buf, 140),
            index_location: get_u64(buf, 144),
            index_allocated_entries: get_u64(buf, 152),
            namelist_location: get_u64(buf, 160),
            namelist_allocated_entries: get_u64(buf, 168),
            reserved,
        }
    }

    pub fn reserved_is_zero(&self) -> bool {
        self.reserved.iter().all(|&b| b == 0)
    }
}

// ---------------------------------------------------------------------------
// Index entry
// ---------------------------------------------------------------------------

/// A 32-byte record locating one chunk in the file.
///
/// A zero `location` marks an empty slot; used slots always point past
/// the header and are sorted by `frame` within the index block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexEntry {
    /// Frame the chunk belongs to.
    pub frame: u64,
    /// Number of rows.
    pub n: u64,
    /// Byte offset of the payload; 0 marks an empty slot.
    pub location: i64,
    /// Index of the chunk's name in the namelist.
    pub id: u16,
    /// Number of columns.
    pub m: u8,
    /// Element type tag (see [`ElementType`]).
    pub type_tag: u8,
    /// Reserved; must be zero in v1 files.
    pub flags: u8,
}

impl IndexEntry {
    pub fn encode(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.frame.to_le_bytes());
        buf[8..16].copy_from_slice(&self.n.to_le_bytes());
        buf[16..24].copy_from_slice(&self.location.to_le_bytes());
        buf[24..26].copy_from_slice(&self.id.to_le_bytes());
        buf[26] = self.m;
        buf[27] = self.type_tag;
        buf[28] = self.flags;
        // bytes 29..32 stay zero
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            frame: get_u64(buf, 0),
            n: get_u64(buf, 8),
            location: get_i64(buf, 16),
            id: get_u16(buf, 24),
            m: buf[26],
            type_tag: buf[27],
            flags: buf[28],
        }
    }

    /// The element type of the chunk, if the tag is recognized.
    pub fn element_type(&self) -> Option<ElementType> {
        ElementType::from_tag(self.type_tag)
    }

    /// Total payload size in bytes, `N * M * sizeof(type)`.
    ///
    /// `None` if the type tag is unknown or the product overflows.
    pub fn data_size(&self) -> Option<u64> {
        let elem = ElementType::from_tag(self.type_tag)?;
        self.n
            .checked_mul(self.m as u64)?
            .checked_mul(elem.size() as u64)
    }
}

// ---------------------------------------------------------------------------
// Namelist entry
// ---------------------------------------------------------------------------

/// A 128-byte namelist slot holding one NUL-terminated chunk name.
#[derive(Debug, Clone, Copy)]
pub struct NamelistEntry {
    pub name: [u8; NAMELIST_ENTRY_SIZE],
}

impl NamelistEntry {
    /// Build an entry from a name, truncated to 127 bytes + NUL.
    pub fn from_name(name: &str) -> Self {
        let mut buf = [0u8; NAMELIST_ENTRY_SIZE];
        copy_cstr(&mut buf, name);
        Self { name: buf }
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut name = [0u8; NAMELIST_ENTRY_SIZE];
        name.copy_from_slice(&buf[..NAMELIST_ENTRY_SIZE]);
        Self { name }
    }

    /// A zero-length name marks the end of the used namelist region.
    pub fn is_unused(&self) -> bool {
        self.name[0] == 0
    }

    /// The stored name up to its NUL terminator.
    pub fn as_str(&self) -> &str {
        cstr_prefix(&self.name)
    }
}

impl Default for NamelistEntry {
    fn default() -> Self {
        Self {
            name: [0u8; NAMELIST_ENTRY_SIZE],
        }
    }
}
