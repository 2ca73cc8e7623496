//! Reopen semantics: what reaches disk, and when.

use std::fs;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::TempDir;

use strata_cache::{storage_hash, CacheError, CacheOptions, ObjectCache};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Route {
    name: String,
    path: String,
}

fn routes() -> Vec<Route> {
    vec![
        Route {
            name: "home".to_string(),
            path: "/".to_string(),
        },
        Route {
            name: "blog".to_string(),
            path: "/blog".to_string(),
        },
    ]
}

#[test]
fn test_deferred_save_invisible_until_flush() {
    let temp_dir = TempDir::new().unwrap();

    let mut writer = ObjectCache::open(temp_dir.path(), CacheOptions::default()).unwrap();
    writer.save("routes", &routes(), None, false).unwrap();

    {
        let mut reader = ObjectCache::open(temp_dir.path(), CacheOptions::default()).unwrap();
        assert_eq!(reader.load::<Vec<Route>>("routes").unwrap(), None);
    }

    writer.close().unwrap();

    let mut reader = ObjectCache::open(temp_dir.path(), CacheOptions::default()).unwrap();
    assert_eq!(reader.load::<Vec<Route>>("routes").unwrap(), Some(routes()));
}

#[test]
fn test_immediate_save_visible_without_flush() {
    let temp_dir = TempDir::new().unwrap();

    let mut writer = ObjectCache::open(temp_dir.path(), CacheOptions::default()).unwrap();
    writer.save("routes", &routes(), None, true).unwrap();
    writer.save("pending", &1, None, false).unwrap();
    assert!(!writer.is_dirty("routes"));

    let mut reader =
        ObjectCache::open(temp_dir.path(), CacheOptions::default().strict(true)).unwrap();
    assert_eq!(reader.load::<Vec<Route>>("routes").unwrap(), Some(routes()));
    assert!(!reader.contains("pending"));

    // Dropping without a flush discards the deferred write.
    drop(writer);
    let reader = ObjectCache::open(temp_dir.path(), CacheOptions::default()).unwrap();
    assert!(!reader.contains("pending"));
}

#[test]
fn test_blob_is_named_after_object_id() {
    let temp_dir = TempDir::new().unwrap();

    let mut cache = ObjectCache::open(temp_dir.path(), CacheOptions::default()).unwrap();
    cache.save("config", &json!({"v": 1}), None, false).unwrap();
    cache.save("config", &json!({"v": 2}), None, false).unwrap();
    let root = cache.root().to_path_buf();
    cache.close().unwrap();

    let blob = root.join("objects").join(storage_hash("config"));
    let stored: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(blob).unwrap()).unwrap();
    assert_eq!(stored, json!({"v": 2}));
    assert_eq!(fs::read_dir(root.join("objects")).unwrap().count(), 1);
}

#[test]
fn test_load_populates_hot_layer() {
    let temp_dir = TempDir::new().unwrap();
    ObjectCache::scope(temp_dir.path(), CacheOptions::default(), |cache| {
        cache.save("n", &42, None, false)
    })
    .unwrap();

    let mut cache = ObjectCache::open(temp_dir.path(), CacheOptions::default()).unwrap();
    assert_eq!(cache.load::<i32>("n").unwrap(), Some(42));

    // Served from memory once loaded, even if the blob disappears.
    let blob = cache.root().join("objects").join(storage_hash("n"));
    fs::remove_file(blob).unwrap();
    assert_eq!(cache.load::<i32>("n").unwrap(), Some(42));
}

#[test]
fn test_missing_blob_depends_on_mode() {
    let temp_dir = TempDir::new().unwrap();
    ObjectCache::scope(temp_dir.path(), CacheOptions::default(), |cache| {
        cache.save("n", &42, None, false)
    })
    .unwrap();
    let blob = temp_dir
        .path()
        .join("cache")
        .join("objects")
        .join(storage_hash("n"));
    fs::remove_file(blob).unwrap();

    let mut lenient = ObjectCache::open(temp_dir.path(), CacheOptions::default()).unwrap();
    assert_eq!(lenient.load_or("n", 0).unwrap(), 0);

    let mut strict =
        ObjectCache::open(temp_dir.path(), CacheOptions::default().strict(true)).unwrap();
    assert!(matches!(strict.load::<i32>("n"), Err(CacheError::Io { .. })));
}

#[test]
fn test_corrupt_index_depends_on_mode() {
    let temp_dir = TempDir::new().unwrap();
    ObjectCache::open(temp_dir.path(), CacheOptions::default())
        .unwrap()
        .close()
        .unwrap();
    fs::write(temp_dir.path().join("cache").join("cacheinfo.json"), "{oops").unwrap();

    let lenient = ObjectCache::open(temp_dir.path(), CacheOptions::default()).unwrap();
    assert!(lenient.is_empty());
    drop(lenient);

    let err = ObjectCache::open(temp_dir.path(), CacheOptions::default().strict(true)).unwrap_err();
    assert!(matches!(err, CacheError::CorruptIndex { .. }));
}

#[test]
fn test_eviction_persists_after_flush() {
    let temp_dir = TempDir::new().unwrap();
    ObjectCache::scope(temp_dir.path(), CacheOptions::default(), |cache| {
        cache.save("a", &1, None, false)?;
        cache.save("b", &2, None, false)
    })
    .unwrap();

    ObjectCache::scope(temp_dir.path(), CacheOptions::default(), |cache| {
        cache.evict("a").map(|_| ())
    })
    .unwrap();

    let cache = ObjectCache::open(temp_dir.path(), CacheOptions::default().strict(true)).unwrap();
    assert_eq!(cache.ids().collect::<Vec<_>>(), vec!["b"]);
}

#[test]
fn test_expiry_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let mut cache = ObjectCache::open(temp_dir.path(), CacheOptions::default()).unwrap();
    let expiry = cache.expires_in(chrono::Duration::hours(1));
    cache.save("session", "token", expiry, false).unwrap();
    let in_memory = cache.entry("session").unwrap().expiry;
    assert!(in_memory.is_some());
    cache.close().unwrap();

    let cache = ObjectCache::open(temp_dir.path(), CacheOptions::default()).unwrap();
    assert_eq!(cache.entry("session").unwrap().expiry, in_memory);
}
