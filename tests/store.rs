use std::fs;

use tempfile::TempDir;

use replikv::{KvError, Store};

#[test]
fn set_get_del_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("store.db"), 0).unwrap();

    store.set("text", 1, b"value for key 1").unwrap();
    assert_eq!(store.get("text", 1), Some(b"value for key 1".to_vec()));

    store.del("text", 1).unwrap();
    assert_eq!(store.get("text", 1), None);
    assert!(matches!(
        store.del("text", 1),
        Err(KvError::KeyNotFound)
    ));
    store.close().unwrap();
}

#[test]
fn last_writer_wins_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store_reopen.db");

    let store = Store::open(&path, 0).unwrap();
    store.set("text", 1, b"first").unwrap();
    store.set("text", 1, b"second").unwrap();
    store.set("text", 2, b"other").unwrap();
    store.del("text", 2).unwrap();
    store.close().unwrap();

    let store = Store::open(&path, 0).unwrap();
    assert_eq!(store.get("text", 1), Some(b"second".to_vec()));
    assert_eq!(store.get("text", 2), None);
    store.close().unwrap();
}

#[test]
fn values_with_newlines_are_rejected() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("store_newline.db"), 0).unwrap();

    assert!(store.set("text", 1, b"value\nwith extra enter").is_err());
    // The rejected write must not have reached the map either.
    assert_eq!(store.get("text", 1), None);
    store.close().unwrap();
}

#[test]
fn defrag_keeps_the_index_and_shrinks_the_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store_defrag.db");

    let store = Store::open(&path, 0).unwrap();
    for i in 0..100 {
        store
            .set("text", 1, format!("value {}", i).as_bytes())
            .unwrap();
    }
    store.defrag().unwrap();
    store.close().unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 3);

    let store = Store::open(&path, 0).unwrap();
    assert_eq!(store.get("text", 1), Some(b"value 99".to_vec()));
    store.close().unwrap();
}
