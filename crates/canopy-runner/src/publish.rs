//! Result publishing: upload a tile's artifacts to the output store.
//!
//! Each of the six product paths in the scratch tree is uploaded under
//! `<output_prefix>/<product>/<stem>.tif`. A missing artifact or a failed
//! upload is logged and recorded, and the remaining products are still
//! published.

use crate::error::TaskError;
use crate::intake::Scratch;
use crate::manifest::{ArtifactEntry, MissingArtifact};
use crate::metrics::metric_defs;
use crate::retry::RetryPolicy;
use canopy_common::{Product, TaskContext};
use canopy_store::{join_key, ObjectStore};
use sha2::{Digest, Sha256};
use std::fs;

/// What the publisher managed to upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub published: Vec<ArtifactEntry>,
    pub missing: Vec<MissingArtifact>,
}

/// Upload every artifact present in `scratch` for tile `stem`.
pub fn publish(
    store: &dyn ObjectStore,
    scratch: &Scratch,
    stem: &str,
    output_prefix: &str,
    retry: &RetryPolicy,
    ctx: &TaskContext,
) -> PublishOutcome {
    let mut outcome = PublishOutcome::default();
    for product in Product::ALL {
        let key = join_key(output_prefix, &product.relative_key(stem));
        match upload(store, scratch, product, &key, retry, ctx) {
            Ok(entry) => {
                metrics::counter!(metric_defs::ARTIFACTS_PUBLISHED.name, "product" => product.subdir())
                    .increment(1);
                metrics::counter!(metric_defs::ARTIFACT_BYTES.name).increment(entry.bytes);
                outcome.published.push(entry);
            }
            Err(err) => {
                tracing::warn!(tile = stem, %product, error = %err, "Artifact not published");
                metrics::counter!(metric_defs::ARTIFACTS_MISSING.name, "product" => product.subdir())
                    .increment(1);
                let reason = match err {
                    TaskError::PublishFailure { reason, .. } => reason,
                    other => other.to_string(),
                };
                outcome.missing.push(MissingArtifact { product, reason });
            }
        }
    }
    outcome
}

fn upload(
    store: &dyn ObjectStore,
    scratch: &Scratch,
    product: Product,
    key: &str,
    retry: &RetryPolicy,
    ctx: &TaskContext,
) -> Result<ArtifactEntry, TaskError> {
    let failure = |reason: String| TaskError::PublishFailure {
        product,
        key: key.to_string(),
        reason,
    };
    let path = scratch.artifact(product);
    if !path.is_file() {
        return Err(failure("not produced".to_string()));
    }
    let bytes = fs::read(&path).map_err(|e| failure(format!("reading {}: {e}", path.display())))?;
    retry
        .run("put", ctx, || store.put(key, &bytes))
        .map_err(|e| failure(e.to_string()))?;
    tracing::debug!(%product, key, bytes = bytes.len(), "Artifact published");
    Ok(ArtifactEntry {
        product,
        key: key.to_string(),
        bytes: bytes.len() as u64,
        sha256: hex::encode(Sha256::digest(&bytes)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_store::MemoryStore;

    fn scratch_with(dir: &std::path::Path, products: &[Product]) -> Scratch {
        let scratch = Scratch::create(dir, "t1").unwrap();
        for &product in products {
            fs::write(scratch.artifact(product), product.subdir().as_bytes()).unwrap();
        }
        scratch
    }

    #[test]
    fn test_missing_artifact_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let present = [Product::Dsm, Product::Dem, Product::Chm, Product::Aspect, Product::Fcc];
        let scratch = scratch_with(dir.path(), &present);
        let store = MemoryStore::new();

        let outcome = publish(&store, &scratch, "t1", "out", &RetryPolicy::none(), &TaskContext::unbounded());

        assert_eq!(outcome.published.len(), 5);
        assert_eq!(outcome.missing.len(), 1);
        assert_eq!(outcome.missing[0].product, Product::Slope);
        assert_eq!(outcome.missing[0].reason, "not produced");
        assert_eq!(store.len(), 5);
        assert_eq!(store.get("out/fcc/t1.tif").unwrap(), b"fcc");
        assert!(store.get("out/slope/t1.tif").is_err());
    }

    #[test]
    fn test_entries_carry_size_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = scratch_with(dir.path(), &[Product::Dem]);
        let store = MemoryStore::new();

        let outcome = publish(&store, &scratch, "t1", "", &RetryPolicy::none(), &TaskContext::unbounded());

        let entry = &outcome.published[0];
        assert_eq!(entry.key, "dem/t1.tif");
        assert_eq!(entry.bytes, 3);
        assert_eq!(entry.sha256, hex::encode(Sha256::digest(b"dem")));
        assert_eq!(entry.sha256.len(), 64);
    }

    #[test]
    fn test_nothing_to_publish() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = scratch_with(dir.path(), &[]);
        let store = MemoryStore::new();
        let outcome = publish(&store, &scratch, "t1", "", &RetryPolicy::none(), &TaskContext::unbounded());
        assert!(outcome.published.is_empty());
        assert_eq!(outcome.missing.len(), 6);
        assert!(store.is_empty());
    }
}
