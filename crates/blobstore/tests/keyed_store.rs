//! End-to-end tests of the manually keyed blob store.

use std::io::{Cursor, Read};

use blobstore::{Blob, KeyedBlobStore, StoreError};
use blobstore_digest::{compute_bytes_digest, DigestAlgorithm};

fn read_all(blob: &Blob) -> Vec<u8> {
    let mut bytes = Vec::new();
    blob.reader().unwrap().read_to_end(&mut bytes).unwrap();
    bytes
}

#[test]
fn put_get_delete_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let store = KeyedBlobStore::open_fixed(tmp.path(), 4).unwrap();

    let blob = store.put("deadbeef", Cursor::new(b"manual content")).unwrap();
    assert_eq!(blob.id(), "deadbeef");
    assert_eq!(blob.size(), 14);
    assert!(tmp.path().join("data/de/adbeef").exists());

    let fetched = store.get("deadbeef").unwrap().unwrap();
    assert_eq!(read_all(&fetched), b"manual content");

    assert!(store.delete("deadbeef").unwrap());
    assert!(store.get("deadbeef").unwrap().is_none());
    assert!(!store.delete("deadbeef").unwrap());

    // the emptied parent directory was pruned
    assert!(!tmp.path().join("data/de").exists());
}

#[test]
fn put_overwrites_existing_content() {
    let tmp = tempfile::tempdir().unwrap();
    let store = KeyedBlobStore::open_fixed(tmp.path(), 4).unwrap();

    store.put("deadbeef", Cursor::new(b"first")).unwrap();
    let blob = store.put("deadbeef", Cursor::new(b"second")).unwrap();
    assert_eq!(blob.size(), 6);
    assert_eq!(read_all(&store.get("deadbeef").unwrap().unwrap()), b"second");
}

#[test]
fn identifiers_are_validated() {
    let tmp = tempfile::tempdir().unwrap();
    let store = KeyedBlobStore::open_fixed(tmp.path(), 4).unwrap();

    for bad in ["", "dead", "deadbeef0", "deadbee", "deadbeeX", "DEADBEEF "] {
        assert!(matches!(
            store.get(bad),
            Err(StoreError::BadIdentifier(_))
        ));
    }

    // uppercase is normalized, so both spellings address the same blob
    store.put("DEADBEEF", Cursor::new(b"upper")).unwrap();
    assert_eq!(read_all(&store.get("deadbeef").unwrap().unwrap()), b"upper");
}

#[test]
fn add_uses_the_content_digest() {
    let tmp = tempfile::tempdir().unwrap();
    let store = KeyedBlobStore::open(tmp.path(), "MD5").unwrap();

    let content = b"digest addressed";
    let id = hex::encode(compute_bytes_digest(DigestAlgorithm::Md5, content));
    let blob = store.add(Cursor::new(content)).unwrap();
    assert_eq!(blob.id(), id);
    assert!(tmp.path().join("data").join(&id[..2]).join(&id[2..]).exists());
}

#[test]
fn add_skips_existing_content_until_put_mode() {
    let tmp = tempfile::tempdir().unwrap();
    let store = KeyedBlobStore::open(tmp.path(), "MD5").unwrap();

    let content = b"stable bytes";
    let id = store.add(Cursor::new(content)).unwrap().id().to_string();
    let path = tmp.path().join("data").join(&id[..2]).join(&id[2..]);

    // tamper with the stored file; outside put mode the existing file is
    // trusted, so a re-add leaves it alone
    std::fs::write(&path, b"tampered").unwrap();
    store.add(Cursor::new(content)).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"tampered");

    // any put() permanently disables that trust
    store.put("00000000000000000000000000000000", Cursor::new(b"x")).unwrap();
    store.add(Cursor::new(content)).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), content);
}

#[test]
fn put_mode_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let (id, path, content) = {
        let store = KeyedBlobStore::open(tmp.path(), "MD5").unwrap();
        let content: &[u8] = b"original";
        let id = store.add(Cursor::new(content)).unwrap().id().to_string();
        store.put("11111111111111111111111111111111", Cursor::new(b"x")).unwrap();
        let path = tmp.path().join("data").join(&id[..2]).join(&id[2..]);
        (id, path, content)
    };
    assert!(tmp.path().join(".flags/put").exists());

    // the reopened store is still in put mode: adds overwrite
    let store = KeyedBlobStore::open(tmp.path(), "MD5").unwrap();
    std::fs::write(&path, b"tampered").unwrap();
    store.add(Cursor::new(content)).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), content);
    assert!(store.get(&id).unwrap().is_some());
}

#[test]
fn refs_lists_every_identifier() {
    let tmp = tempfile::tempdir().unwrap();
    let store = KeyedBlobStore::open_fixed(tmp.path(), 4).unwrap();

    store.put("deadbeef", Cursor::new(b"a")).unwrap();
    store.put("cafebabe", Cursor::new(b"b")).unwrap();
    store.put("00ff00ff", Cursor::new(b"c")).unwrap();

    assert_eq!(store.refs().unwrap(), vec!["00ff00ff", "cafebabe", "deadbeef"]);

    store.delete("cafebabe").unwrap();
    assert_eq!(store.refs().unwrap(), vec!["00ff00ff", "deadbeef"]);
}

#[test]
fn refs_ignores_foreign_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let store = KeyedBlobStore::open_fixed(tmp.path(), 4).unwrap();
    store.put("deadbeef", Cursor::new(b"a")).unwrap();

    std::fs::create_dir(tmp.path().join("data/zz")).unwrap();
    std::fs::write(tmp.path().join("data/zz/notes"), b"junk").unwrap();
    std::fs::write(tmp.path().join("data/loose"), b"junk").unwrap();

    assert_eq!(store.refs().unwrap(), vec!["deadbeef"]);
}
