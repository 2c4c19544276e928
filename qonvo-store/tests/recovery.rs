use std::collections::BTreeMap;
use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use qonvo_store::{BoardData, BoardStore, ErrorCategory, StoreError};
use serde_json::{json, Value};

fn as_map(value: Value) -> BoardData {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

/// Recursively snapshots a directory as relative path -> file bytes.
fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_string_lossy().into_owned();
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }

    let mut out = BTreeMap::new();
    walk(dir, dir, &mut out);
    out
}

#[test]
fn failed_load_preserves_the_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let boards = dir.path().join("boards");
    let store = BoardStore::new(&boards).unwrap();

    let attachment = dir.path().join("pic.webp");
    fs::write(&attachment, b"webp bytes").unwrap();

    let board = as_map(json!({
        "nodes": [{"id": "n", "user_files": [attachment.to_string_lossy()]}],
    }));
    let saved_path = store.save("fragile", board).unwrap();
    store.load(&saved_path).unwrap();

    let working = boards.join(".temp").join("fragile");
    assert!(working.is_dir());
    let before = snapshot(&working);
    assert!(!before.is_empty());

    // Corrupt the container: claim five entries while fewer TOC records
    // are physically present.
    let mut file = fs::OpenOptions::new().write(true).open(&saved_path).unwrap();
    file.seek(SeekFrom::Start(8)).unwrap();
    file.write_all(&5u32.to_le_bytes()).unwrap();
    drop(file);

    let err = store.load(&saved_path).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Format);

    // The last good extraction is byte-identical, and staging is gone.
    assert_eq!(snapshot(&working), before);
    assert!(!boards.join(".temp").join("fragile._staging").exists());
}

#[test]
fn corrupt_file_never_creates_a_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let boards = dir.path().join("boards");
    let store = BoardStore::new(&boards).unwrap();

    let path = boards.join("junk.qonvo");
    fs::write(&path, b"QONVO\x01junkjunkjunkjunkjunk").unwrap();

    let err = store.load(&path).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Format);
    assert!(!boards.join(".temp").join("junk").exists());
}

#[test]
fn undecodable_board_json_is_a_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = BoardStore::new(dir.path().join("boards")).unwrap();

    let path = store.boards_dir().join("badjson.qonvo");
    let mut writer = qonvo_format::QonvoFileWriter::create(&path).unwrap();
    writer
        .insert(
            qonvo_format::EntryName::new("board.json").unwrap(),
            b"{not json".to_vec(),
        )
        .unwrap();
    writer.finish().unwrap();

    let err = store.load(&path).unwrap_err();
    assert!(matches!(err, StoreError::InvalidBoardJson { .. }));
    assert_eq!(err.category(), ErrorCategory::Format);
}

#[test]
fn loading_a_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = BoardStore::new(dir.path().join("boards")).unwrap();

    let err = store.load(dir.path().join("nowhere.qonvo")).unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
    assert_eq!(err.category(), ErrorCategory::Io);
}

#[test]
fn failed_save_leaves_the_previous_file_intact() {
    let dir = tempfile::tempdir().unwrap();
    let boards = dir.path().join("boards");
    let store = BoardStore::new(&boards).unwrap();

    let saved_path = store.save("sturdy", as_map(json!({"marker": 1}))).unwrap();
    let before = fs::read(&saved_path).unwrap();

    // Occupy the temp path with a directory so the container write fails
    // before the commit rename.
    let temp_path = boards.join("sturdy.qonvo.tmp");
    fs::create_dir(&temp_path).unwrap();

    let err = store.save("sturdy", as_map(json!({"marker": 2}))).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Io);
    assert_eq!(fs::read(&saved_path).unwrap(), before);

    // With the obstruction gone the next save goes through.
    fs::remove_dir(&temp_path).unwrap();
    store.save("sturdy", as_map(json!({"marker": 3}))).unwrap();
    assert!(!temp_path.exists());
}

#[test]
fn stale_temp_files_are_replaced_by_the_next_save() {
    let dir = tempfile::tempdir().unwrap();
    let boards = dir.path().join("boards");
    let store = BoardStore::new(&boards).unwrap();

    // A crashed previous save left a half-written temp container behind.
    let temp_path = boards.join("phoenix.qonvo.tmp");
    fs::write(&temp_path, b"QONVO half-written garbage").unwrap();

    let saved_path = store.save("phoenix", as_map(json!({"ok": true}))).unwrap();

    assert!(!temp_path.exists());
    let loaded = store.load(&saved_path).unwrap();
    assert_eq!(loaded["ok"], json!(true));
}

#[test]
fn interrupted_loads_leave_no_staging_leftovers_behind() {
    let dir = tempfile::tempdir().unwrap();
    let boards = dir.path().join("boards");
    let store = BoardStore::new(&boards).unwrap();

    let saved_path = store.save("tidy", as_map(json!({}))).unwrap();

    // Simulate leftovers from an interrupted earlier load.
    let temp_root = boards.join(".temp");
    fs::create_dir_all(temp_root.join("tidy._staging").join("attachments")).unwrap();
    fs::create_dir_all(temp_root.join("tidy._old")).unwrap();

    store.load(&saved_path).unwrap();

    assert!(!temp_root.join("tidy._staging").exists());
    assert!(!temp_root.join("tidy._old").exists());
    assert!(temp_root.join("tidy").is_dir());
}
