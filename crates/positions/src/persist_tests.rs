// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn writes_new_file() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("state.json");
    write_atomic(&target, b"{}").unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"{}");
}

#[test]
fn replaces_existing_content() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("state.json");
    write_atomic(&target, b"old").unwrap();
    write_atomic(&target, b"new").unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"new");
}

#[test]
fn leaves_no_tmp_file_behind() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("state.json");
    write_atomic(&target, b"data").unwrap();
    assert!(!tmp_path(&target).exists());
}

#[test]
fn creates_missing_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("a/b/state.json");
    write_atomic(&target, b"data").unwrap();
    assert!(target.exists());
}

#[test]
fn tmp_path_appends_suffix_without_eating_extension() {
    assert_eq!(
        tmp_path(Path::new("/p/file_positions.json")),
        PathBuf::from("/p/file_positions.json.tmp")
    );
    assert_eq!(
        tmp_path(Path::new("/c/checkpoint_x.json.gz")),
        PathBuf::from("/c/checkpoint_x.json.gz.tmp")
    );
}
