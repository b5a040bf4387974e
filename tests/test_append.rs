// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Append-mode tests. Append handles cache only unwritten index entries,
// extend existing files with new frames, and cannot look chunks up.

use std::path::PathBuf;

use libgsd::{ElementType, GsdError, GsdHandle, IndexEntry, OpenMode};
use tempfile::TempDir;

fn scratch(name: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(name);
    (dir, path)
}

/// A file with two frames: frame 0 holds "a" = [0], frame 1 holds
/// "a" = [1] and "b" = [7, 8].
fn two_frame_file(path: &PathBuf) {
    GsdHandle::create(path, "test", "s", 0).expect("create");
    let mut handle = GsdHandle::open(path, OpenMode::ReadWrite).expect("open rw");
    handle
        .write_chunk("a", ElementType::U8, 1, 1, 0, &[0])
        .expect("write");
    handle.end_frame().expect("end_frame");
    handle
        .write_chunk("a", ElementType::U8, 1, 1, 0, &[1])
        .expect("write");
    handle
        .write_chunk("b", ElementType::U8, 2, 1, 0, &[7, 8])
        .expect("write");
    handle.end_frame().expect("end_frame");
    handle.close().expect("close");
}

#[test]
fn append_extends_existing_file() {
    let (_dir, path) = scratch("a.gsd");
    two_frame_file(&path);

    let mut handle = GsdHandle::open(&path, OpenMode::Append).expect("open append");
    assert_eq!(handle.nframes(), 2);
    handle
        .write_chunk("v", ElementType::F32, 1, 1, 0, &1.5f32.to_le_bytes())
        .expect("write");
    handle.end_frame().expect("end_frame");
    handle.close().expect("close");

    let handle = GsdHandle::open(&path, OpenMode::ReadOnly).expect("open ro");
    assert_eq!(handle.nframes(), 3);

    // prior frames unchanged
    let entry = handle.find_chunk(0, "a").expect("frame 0 a");
    assert_eq!(handle.read_chunk(&entry).expect("read"), vec![0]);
    let entry = handle.find_chunk(1, "a").expect("frame 1 a");
    assert_eq!(handle.read_chunk(&entry).expect("read"), vec![1]);
    let entry = handle.find_chunk(1, "b").expect("frame 1 b");
    assert_eq!(handle.read_chunk(&entry).expect("read"), vec![7, 8]);

    // frame 2 contains only "v"
    let entry = handle.find_chunk(2, "v").expect("frame 2 v");
    assert_eq!(handle.read_chunk(&entry).expect("read"), 1.5f32.to_le_bytes());
    assert!(handle.find_chunk(2, "a").is_none());
    assert!(handle.find_chunk(2, "b").is_none());
}

#[test]
fn several_append_sessions_accumulate() {
    let (_dir, path) = scratch("a.gsd");
    GsdHandle::create(&path, "test", "s", 0).expect("create");

    for session in 0..4u64 {
        let mut handle = GsdHandle::open(&path, OpenMode::Append).expect("open append");
        assert_eq!(handle.nframes(), session * 3);
        for k in 0..3u64 {
            let value = (session * 3 + k) as u8;
            handle
                .write_chunk("x", ElementType::U8, 1, 1, 0, &[value])
                .expect("write");
            handle.end_frame().expect("end_frame");
        }
        handle.close().expect("close");
    }

    let handle = GsdHandle::open(&path, OpenMode::ReadOnly).expect("open ro");
    assert_eq!(handle.nframes(), 12);
    for frame in 0..12u64 {
        let entry = handle.find_chunk(frame, "x").expect("chunk exists");
        assert_eq!(handle.read_chunk(&entry).expect("read"), vec![frame as u8]);
    }
}

#[test]
fn append_to_empty_file() {
    let (_dir, path) = scratch("a.gsd");
    GsdHandle::create(&path, "test", "s", 0).expect("create");

    let mut handle = GsdHandle::open(&path, OpenMode::Append).expect("open append");
    assert_eq!(handle.nframes(), 0);
    handle
        .write_chunk("x", ElementType::U8, 1, 1, 0, &[9])
        .expect("write");
    handle.end_frame().expect("end_frame");
    handle.close().expect("close");

    let handle = GsdHandle::open(&path, OpenMode::ReadOnly).expect("open ro");
    assert_eq!(handle.nframes(), 1);
}

#[test]
fn lookups_forbidden_in_append_mode() {
    let (_dir, path) = scratch("a.gsd");
    two_frame_file(&path);

    let handle = GsdHandle::open(&path, OpenMode::Append).expect("open append");
    assert!(handle.find_chunk(0, "a").is_none());

    let entry = IndexEntry {
        frame: 0,
        n: 1,
        location: 256,
        id: 0,
        m: 1,
        type_tag: ElementType::U8.tag(),
        flags: 0,
    };
    match handle.read_chunk(&entry) {
        Err(GsdError::InvalidArgument(_)) => {}
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
}

#[test]
fn new_names_persist_from_append_mode() {
    let (_dir, path) = scratch("a.gsd");
    two_frame_file(&path);

    let mut handle = GsdHandle::open(&path, OpenMode::Append).expect("open append");
    handle
        .write_chunk("fresh_name", ElementType::U16, 1, 1, 0, &42u16.to_le_bytes())
        .expect("write");
    handle.end_frame().expect("end_frame");
    handle.close().expect("close");

    let handle = GsdHandle::open(&path, OpenMode::ReadOnly).expect("open ro");
    let entry = handle.find_chunk(2, "fresh_name").expect("chunk exists");
    assert_eq!(handle.read_chunk(&entry).expect("read"), 42u16.to_le_bytes());
}

#[test]
fn truncate_in_append_mode() {
    let (_dir, path) = scratch("a.gsd");
    two_frame_file(&path);

    let mut handle = GsdHandle::open(&path, OpenMode::Append).expect("open append");
    handle.truncate().expect("truncate");
    assert_eq!(handle.nframes(), 0);
    assert_eq!(handle.application(), "test");

    handle
        .write_chunk("x", ElementType::U8, 1, 1, 0, &[1])
        .expect("write after truncate");
    handle.end_frame().expect("end_frame");
    handle.close().expect("close");

    let handle = GsdHandle::open(&path, OpenMode::ReadOnly).expect("open ro");
    assert_eq!(handle.nframes(), 1);
    assert!(handle.find_chunk(0, "a").is_none());
}

// Frames whose index entries were never flushed by end_frame are not
// visible after reopening; everything before the last end_frame is.
#[test]
fn unflushed_chunks_are_lost_cleanly() {
    let (_dir, path) = scratch("a.gsd");
    GsdHandle::create(&path, "test", "s", 0).expect("create");

    let mut handle = GsdHandle::open(&path, OpenMode::ReadWrite).expect("open rw");
    handle
        .write_chunk("x", ElementType::U8, 1, 1, 0, &[0])
        .expect("write");
    handle.end_frame().expect("end_frame");
    // written but never committed by end_frame
    handle
        .write_chunk("x", ElementType::U8, 1, 1, 0, &[1])
        .expect("write");
    drop(handle);

    let handle = GsdHandle::open(&path, OpenMode::ReadOnly).expect("open ro");
    assert_eq!(handle.nframes(), 1);
    let entry = handle.find_chunk(0, "x").expect("chunk exists");
    assert_eq!(handle.read_chunk(&entry).expect("read"), vec![0]);
}
