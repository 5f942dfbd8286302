mod concurrency_tests;

use crate::storage::{RecordStatus, Schema, Store};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub(super) fn room(name: &str, location: &str, size: &str, owner: &str) -> Vec<String> {
    vec![
        name.to_string(),
        location.to_string(),
        size.to_string(),
        "N".to_string(),
        "$150.00".to_string(),
        "2005/07/27".to_string(),
        owner.to_string(),
    ]
}

pub(super) fn sample_rooms() -> Vec<Vec<String>> {
    vec![
        room("Palace", "Smallville", "2", ""),
        room("Castle", "Smallville", "6", "12345678"),
        room("Excelsior", "Lendmarch", "4", ""),
    ]
}

/// Write a store file with the given rows, bypassing the store itself
pub(super) fn write_fixture(path: &Path, rows: &[(RecordStatus, Vec<String>)]) {
    let schema = Schema::builtin();
    let mut bytes = Vec::new();
    schema.write_header(&mut bytes).unwrap();
    for (status, values) in rows {
        bytes.extend(schema.encode_record(*status, values).unwrap());
    }
    File::create(path).unwrap().write_all(&bytes).unwrap();
}

/// A store over the three sample rooms
pub(super) fn sample_store() -> (TempDir, PathBuf, Store) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rooms.db");
    let rows: Vec<_> = sample_rooms()
        .into_iter()
        .map(|row| (RecordStatus::Valid, row))
        .collect();
    write_fixture(&path, &rows);
    let store = Store::open(&path).unwrap();
    (dir, path, store)
}
