// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// In-memory representations of the index block. Read-write handles keep
// the whole block in memory; read-only handles map it; append handles
// cache only the entries not yet flushed to disk, so attaching to a
// large file does not pay for loading its index.

use crate::format::{IndexEntry, INDEX_ENTRY_SIZE};
use crate::platform::MappedIndex;

/// The index block as seen by one open handle.
pub enum IndexView {
    /// Full image of the allocated block (read-write mode). The vector
    /// length always equals `index_allocated_entries`; slots past the
    /// used prefix are zeroed.
    Loaded(Vec<IndexEntry>),
    /// Read-only view of the on-disk block.
    Mapped(MappedIndex),
    /// Append mode: only unwritten entries, in frame order. Starts with
    /// capacity for a single entry and grows geometrically.
    AppendBuffered { pending: Vec<IndexEntry> },
}

/// Decode a packed run of index entries.
pub fn decode_entries(bytes: &[u8], count: usize) -> Vec<IndexEntry> {
    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        entries.push(IndexEntry::decode(&bytes[i * INDEX_ENTRY_SIZE..]));
    }
    entries
}

/// Encode a run of index entries into their packed on-disk image.
pub fn encode_entries(entries: &[IndexEntry]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(entries.len() * INDEX_ENTRY_SIZE);
    for e in entries {
        bytes.extend_from_slice(&e.encode());
    }
    bytes
}

impl IndexView {
    /// A fresh append-mode buffer.
    pub fn append_buffer() -> Self {
        Self::AppendBuffered {
            pending: Vec::with_capacity(1),
        }
    }

    /// The committed entry in slot `i`.
    ///
    /// Only meaningful for the loaded and mapped representations; append
    /// handles do not cache committed entries, and the engine never
    /// looks them up in that mode.
    pub fn entry(&self, i: u64) -> IndexEntry {
        match self {
            Self::Loaded(entries) => entries[i as usize],
            Self::Mapped(map) => {
                IndexEntry::decode(&map.bytes()[i as usize * INDEX_ENTRY_SIZE..])
            }
            Self::AppendBuffered { .. } => {
                unreachable!("committed index entries are not cached in append mode")
            }
        }
    }

    /// Record a new entry in slot `slot`, where `written` entries of the
    /// block have already been flushed to disk.
    pub fn place(&mut self, slot: u64, written: u64, entry: IndexEntry) {
        match self {
            Self::Loaded(entries) => entries[slot as usize] = entry,
            Self::AppendBuffered { pending } => {
                debug_assert_eq!(slot - written, pending.len() as u64);
                pending.push(entry);
            }
            Self::Mapped(_) => unreachable!("read-only index"),
        }
    }

    /// The packed image of the `count` unwritten entries that follow the
    /// `written` already-flushed ones, ready to append to the on-disk
    /// block at `end_frame`.
    pub fn unwritten_bytes(&self, written: u64, count: u64) -> Vec<u8> {
        match self {
            Self::Loaded(entries) => {
                encode_entries(&entries[written as usize..(written + count) as usize])
            }
            Self::AppendBuffered { pending } => encode_entries(&pending[..count as usize]),
            Self::Mapped(_) => unreachable!("read-only index"),
        }
    }

    /// Forget pending entries once they have been flushed (append mode).
    /// Keeps the buffer's capacity.
    pub fn mark_flushed(&mut self) {
        if let Self::AppendBuffered { pending } = self {
            pending.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(frame: u64, location: i64) -> IndexEntry {
        IndexEntry {
            frame,
            n: 1,
            location,
            id: 0,
            m: 1,
            type_tag: 1,
            flags: 0,
        }
    }

    #[test]
    fn entry_codec_run() {
        let entries = vec![entry(0, 256), entry(0, 257), entry(1, 258)];
        let bytes = encode_entries(&entries);
        assert_eq!(bytes.len(), 3 * INDEX_ENTRY_SIZE);
        assert_eq!(decode_entries(&bytes, 3), entries);
    }

    #[test]
    fn loaded_place_and_flush_window() {
        let mut view = IndexView::Loaded(vec![IndexEntry::default(); 4]);
        view.place(0, 0, entry(0, 256));
        view.place(1, 0, entry(0, 300));
        assert_eq!(view.entry(1).location, 300);

        // two unwritten entries starting at slot 0
        let bytes = view.unwritten_bytes(0, 2);
        assert_eq!(decode_entries(&bytes, 2)[1].location, 300);
    }

    #[test]
    fn append_buffer_tracks_only_pending() {
        let mut view = IndexView::append_buffer();
        // 5 entries already on disk; two new ones land in the buffer
        view.place(5, 5, entry(3, 1000));
        view.place(6, 5, entry(3, 1100));
        let bytes = view.unwritten_bytes(5, 2);
        let decoded = decode_entries(&bytes, 2);
        assert_eq!(decoded[0].location, 1000);
        assert_eq!(decoded[1].location, 1100);

        view.mark_flushed();
        // next frame starts over at the buffer head
        view.place(7, 7, entry(4, 1200));
        assert_eq!(decode_entries(&view.unwritten_bytes(7, 1), 1)[0].location, 1200);
    }
}
