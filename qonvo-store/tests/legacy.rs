use std::fs::{self, File};
use std::io::Write;

use qonvo_store::{BoardData, BoardStore, ErrorCategory};
use serde_json::{json, Value};
use zip::write::FileOptions;

fn as_map(value: Value) -> BoardData {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

fn write_legacy_archive(path: &std::path::Path, board_json: &[u8], members: &[(&str, &[u8])]) {
    let mut archive = zip::ZipWriter::new(File::create(path).unwrap());
    archive
        .start_file("board.json", FileOptions::default())
        .unwrap();
    archive.write_all(board_json).unwrap();

    for (name, data) in members {
        archive.start_file(*name, FileOptions::default()).unwrap();
        archive.write_all(data).unwrap();
    }

    archive.finish().unwrap();
}

#[test]
fn legacy_archives_still_load() {
    let dir = tempfile::tempdir().unwrap();
    let boards = dir.path().join("boards");
    let store = BoardStore::new(&boards).unwrap();

    let board_json = serde_json::to_vec(&json!({
        "version": "1.0",
        "nodes": [{"id": "n1", "user_files": ["attachments/a.txt"]}],
    }))
    .unwrap();

    let path = boards.join("oldie.qonvo");
    write_legacy_archive(
        &path,
        &board_json,
        &[
            ("attachments/a.txt", b"attached text".as_slice()),
            ("repositories/1/readme.md", b"# readme".as_slice()),
            ("other/skipped.bin", b"not extracted".as_slice()),
        ],
    );

    let loaded = store.load(&path).unwrap();

    let resolved = loaded["nodes"][0]["user_files"][0].as_str().unwrap();
    assert_ne!(resolved, "attachments/a.txt");
    assert_eq!(fs::read(resolved).unwrap(), b"attached text");

    let working = boards.join(".temp").join("oldie");
    assert_eq!(
        fs::read(working.join("repositories/1/readme.md")).unwrap(),
        b"# readme"
    );
    assert!(!working.join("other/skipped.bin").exists());
}

#[test]
fn archive_without_board_json_is_a_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let boards = dir.path().join("boards");
    let store = BoardStore::new(&boards).unwrap();

    let path = boards.join("empty.qonvo");
    let mut archive = zip::ZipWriter::new(File::create(&path).unwrap());
    archive
        .start_file("attachments/orphan.txt", FileOptions::default())
        .unwrap();
    archive.write_all(b"orphan").unwrap();
    archive.finish().unwrap();

    let err = store.load(&path).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Format);
}

#[test]
fn not_an_archive_at_all_is_a_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let boards = dir.path().join("boards");
    let store = BoardStore::new(&boards).unwrap();

    let path = boards.join("noise.qonvo");
    fs::write(&path, b"neither container nor archive").unwrap();

    let err = store.load(&path).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Format);
}

#[test]
fn container_and_legacy_saves_coexist() {
    let dir = tempfile::tempdir().unwrap();
    let boards = dir.path().join("boards");
    let store = BoardStore::new(&boards).unwrap();

    let legacy_path = boards.join("mixed.qonvo");
    write_legacy_archive(
        &legacy_path,
        &serde_json::to_vec(&json!({"version": "1.0", "nodes": []})).unwrap(),
        &[],
    );

    // Loading the legacy file and saving it back produces a container that
    // loads through the binary path from then on.
    let loaded = store.load(&legacy_path).unwrap();
    let saved_path = store.save("mixed", loaded).unwrap();
    assert!(qonvo_format::is_container_file(&saved_path));

    let reloaded = store.load(&saved_path).unwrap();
    assert_eq!(reloaded["name"], json!("mixed"));
}
