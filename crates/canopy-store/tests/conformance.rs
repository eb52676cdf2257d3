//! Behaviour every local object store backend must share.

use canopy_store::{join_key, FsStore, MemoryStore, ObjectStore, StoreError};
use std::sync::Arc;
use std::thread;

fn check_round_trip(store: &dyn ObjectStore) {
    store.put("tiles/t1.laz", b"one").unwrap();
    store.put("tiles/t2.laz", b"two").unwrap();
    store.put("dsm/t1.tif", b"raster").unwrap();

    assert_eq!(store.get("tiles/t2.laz").unwrap(), b"two");
    assert_eq!(store.list("tiles/").unwrap(), vec!["tiles/t1.laz", "tiles/t2.laz"]);

    store.put("tiles/t2.laz", b"replaced").unwrap();
    assert_eq!(store.get("tiles/t2.laz").unwrap(), b"replaced");

    assert!(matches!(store.get("tiles/t3.laz"), Err(StoreError::NotFound(_))));
    assert!(matches!(store.put("", b""), Err(StoreError::InvalidKey(_))));
}

fn check_concurrent_disjoint_puts(store: Arc<dyn ObjectStore>) {
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let key = join_key("out", &format!("dsm/tile_{i}.tif"));
                store.put(&key, format!("tile {i}").as_bytes()).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let keys = store.list("out/dsm/").unwrap();
    assert_eq!(keys.len(), 8);
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(store.get(key).unwrap(), format!("tile {i}").into_bytes());
    }
}

#[test]
fn test_memory_store() {
    check_round_trip(&MemoryStore::new());
    check_concurrent_disjoint_puts(Arc::new(MemoryStore::new()));
}

#[test]
fn test_fs_store() {
    let dir = tempfile::tempdir().unwrap();
    check_round_trip(&FsStore::new(dir.path().join("a")).unwrap());
    check_concurrent_disjoint_puts(Arc::new(FsStore::new(dir.path().join("b")).unwrap()));
}
