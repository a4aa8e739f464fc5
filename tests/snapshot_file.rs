use std::fs;

use similar_asserts::assert_eq;
use tempfile::tempdir;

use registry_index::{
    error::FormatError,
    snapshot,
    test::{preset_index, D_C},
    DigestIndex, Error,
};

#[test]
fn test_save_replaces_existing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.json");
    fs::write(&path, "outdated").unwrap();

    let index = preset_index();
    snapshot::save(&index, &path).unwrap();
    assert_eq!(snapshot::load(&path).unwrap(), index);

    let mut smaller = DigestIndex::new();
    smaller.add_image("c", "1.1.0", D_C);
    snapshot::save(&smaller, &path).unwrap();
    assert_eq!(snapshot::load(&path).unwrap(), smaller);

    // only the snapshot itself is left behind
    let entries: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(entries, ["cache.json"]);
}

#[test]
fn test_file_contents() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let mut index = DigestIndex::new();
    index.add_image("c", "1.1.0", D_C);
    snapshot::save(&index, &path).unwrap();

    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value, serde_json::json!({ "c": { "1.1.0": D_C.to_string() } }));
}

#[test]
fn test_load_malformed_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.json");

    fs::write(&path, r#"{"c": ["1.1.0"]}"#).unwrap();
    assert!(matches!(
        snapshot::load(&path),
        Err(Error::Format(FormatError::Snapshot { .. }))
    ));

    fs::write(&path, "{").unwrap();
    assert!(matches!(
        snapshot::load(&path),
        Err(Error::Format(FormatError::Json(_)))
    ));
}
