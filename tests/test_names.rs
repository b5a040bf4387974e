// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Name table tests: iteration order, prefix search, and the fixed
// 128-name capacity of v1 files.

use std::path::PathBuf;

use libgsd::{ElementType, GsdError, GsdHandle, OpenMode};
use tempfile::TempDir;

fn scratch(name: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(name);
    (dir, path)
}

/// Collect all names matching `prefix` via the resumable search.
fn collect_names(handle: &GsdHandle, prefix: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut prev: Option<&str> = None;
    while let Some(name) = handle.find_matching_chunk_name(prefix, prev) {
        names.push(name.to_owned());
        prev = Some(name);
    }
    names
}

#[test]
fn iteration_enumerates_names_in_insertion_order() {
    let (_dir, path) = scratch("a.gsd");
    GsdHandle::create(&path, "test", "s", 0).expect("create");

    let mut handle = GsdHandle::open(&path, OpenMode::ReadWrite).expect("open rw");
    let order = ["zeta", "alpha", "mid", "beta"];
    for (i, name) in order.iter().enumerate() {
        handle
            .write_chunk(name, ElementType::U8, 1, 1, 0, &[i as u8])
            .expect("write");
    }
    // repeating a name in a later frame must not add a second slot
    handle.end_frame().expect("end_frame");
    handle
        .write_chunk("alpha", ElementType::U8, 1, 1, 0, &[9])
        .expect("write");
    handle.end_frame().expect("end_frame");
    handle.close().expect("close");

    let handle = GsdHandle::open(&path, OpenMode::ReadOnly).expect("open ro");
    assert_eq!(collect_names(&handle, ""), order);
}

#[test]
fn iteration_on_empty_file_finds_nothing() {
    let (_dir, path) = scratch("a.gsd");
    GsdHandle::create(&path, "test", "s", 0).expect("create");
    let handle = GsdHandle::open(&path, OpenMode::ReadOnly).expect("open ro");
    assert!(handle.find_matching_chunk_name("", None).is_none());
}

#[test]
fn prefix_search_matches_initial_bytes() {
    let (_dir, path) = scratch("a.gsd");
    GsdHandle::create(&path, "test", "s", 0).expect("create");

    let mut handle = GsdHandle::open(&path, OpenMode::ReadWrite).expect("open rw");
    for name in ["position", "pos", "velocity", "positron"] {
        handle
            .write_chunk(name, ElementType::U8, 1, 1, 0, &[0])
            .expect("write");
    }
    handle.end_frame().expect("end_frame");

    assert_eq!(collect_names(&handle, "pos"), ["position", "pos", "positron"]);
    assert_eq!(collect_names(&handle, "velocity"), ["velocity"]);
    assert_eq!(collect_names(&handle, "momentum"), Vec::<String>::new());

    // the resumable search can be restarted mid-way
    let first = handle.find_matching_chunk_name("pos", None).expect("first");
    assert_eq!(first, "position");
    let second = handle
        .find_matching_chunk_name("pos", Some(first))
        .expect("second");
    assert_eq!(second, "pos");
}

#[test]
fn namelist_holds_exactly_128_names() {
    let (_dir, path) = scratch("a.gsd");
    GsdHandle::create(&path, "test", "s", 0).expect("create");

    let mut handle = GsdHandle::open(&path, OpenMode::ReadWrite).expect("open rw");
    for i in 0..128u32 {
        let name = format!("name_{i:03}");
        handle
            .write_chunk(&name, ElementType::U8, 1, 1, 0, &[i as u8])
            .expect("write");
    }
    handle.end_frame().expect("end_frame");

    // the 129th distinct name cannot be added
    match handle.write_chunk("one_too_many", ElementType::U8, 1, 1, 0, &[0]) {
        Err(GsdError::NamelistFull) => {}
        other => panic!("expected NamelistFull, got {other:?}"),
    }

    // known names keep working with a full namelist
    handle
        .write_chunk("name_000", ElementType::U8, 1, 1, 0, &[200])
        .expect("write known name");
    handle.end_frame().expect("end_frame");
    handle.close().expect("close");

    // the cap survives reopening, in append mode too
    let mut handle = GsdHandle::open(&path, OpenMode::Append).expect("open append");
    match handle.write_chunk("another_new", ElementType::U8, 1, 1, 0, &[0]) {
        Err(GsdError::NamelistFull) => {}
        other => panic!("expected NamelistFull, got {other:?}"),
    }
    handle
        .write_chunk("name_127", ElementType::U8, 1, 1, 0, &[1])
        .expect("write known name");
    handle.end_frame().expect("end_frame");
    handle.close().expect("close");

    let handle = GsdHandle::open(&path, OpenMode::ReadOnly).expect("open ro");
    assert_eq!(collect_names(&handle, "").len(), 128);
    let entry = handle.find_chunk(1, "name_000").expect("chunk exists");
    assert_eq!(handle.read_chunk(&entry).expect("read"), vec![200]);
}

#[test]
fn long_names_truncate_at_127_bytes() {
    let (_dir, path) = scratch("a.gsd");
    GsdHandle::create(&path, "test", "s", 0).expect("create");

    let long = "n".repeat(300);
    let mut handle = GsdHandle::open(&path, OpenMode::ReadWrite).expect("open rw");
    handle
        .write_chunk(&long, ElementType::U8, 1, 1, 0, &[5])
        .expect("write");
    handle.end_frame().expect("end_frame");
    handle.close().expect("close");

    let handle = GsdHandle::open(&path, OpenMode::ReadOnly).expect("open ro");
    let stored = handle.find_matching_chunk_name("", None).expect("name");
    assert_eq!(stored.len(), 127);
    assert_eq!(stored, &long[..127]);
}
