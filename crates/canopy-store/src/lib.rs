//! # canopy-store
//!
//! Object storage used by canopy batches: tiles are listed and fetched from
//! an input prefix, products are written under `<product>/<stem>.tif` keys.
//!
//! Three backends implement [`ObjectStore`]:
//! - [`FsStore`] - a directory tree on local disk
//! - [`MemoryStore`] - an in-process map, for tests and dry runs
//! - [`HttpStore`] - an S3-compatible HTTP endpoint (`GET`, `PUT`,
//!   `ListObjectsV2`), e.g. a public bucket or a local MinIO
//!
//! Keys always use `/` separators and never contain `..` segments.
//!
//! ## Example
//!
//! ```no_run
//! use canopy_store::{FsStore, ObjectStore};
//!
//! let store = FsStore::new("./bucket")?;
//! for key in store.list("tiles/")? {
//!     let bytes = store.get(&key)?;
//!     println!("{}: {} bytes", key, bytes.len());
//! }
//! # Ok::<(), canopy_store::StoreError>(())
//! ```

mod error;
mod fs;
mod http;
mod memory;

pub use error::StoreError;
pub use fs::FsStore;
pub use http::HttpStore;
pub use memory::MemoryStore;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A flat key/value object store.
///
/// Implementations must be safe to share between worker threads.
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// List every key starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Fetch the bytes stored under `key`.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Store `bytes` under `key`, replacing any previous object.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Reject keys that are empty, absolute, or escape their root.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Join a prefix and a relative key with exactly one `/` between them.
pub fn join_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let key = key.trim_start_matches('/');
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("tiles/a.laz").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("a\\b").is_err());
    }

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("", "dsm/a.tif"), "dsm/a.tif");
        assert_eq!(join_key("out/", "dsm/a.tif"), "out/dsm/a.tif");
        assert_eq!(join_key("/out", "/dsm/a.tif"), "out/dsm/a.tif");
    }
}
