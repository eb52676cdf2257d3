//! Per-tile manifests.
//!
//! A [`Manifest`] is the only thing a tile task hands back to the
//! orchestrator. It is serialised to JSON by the worker and parsed again
//! during aggregation.

use crate::error::TaskError;
use crate::task::TileRef;
use canopy_common::Product;
use serde::{Deserialize, Serialize};

/// Final state of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileStatus {
    /// All six products were published.
    Complete,
    /// Some products were published, some are missing.
    Partial,
    /// Nothing usable was published.
    Failed,
}

impl TileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TileStatus::Complete => "complete",
            TileStatus::Partial => "partial",
            TileStatus::Failed => "failed",
        }
    }
}

/// One published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub product: Product,
    /// Output store key.
    pub key: String,
    pub bytes: u64,
    /// Hex-encoded SHA-256 of the uploaded bytes.
    pub sha256: String,
}

/// A product that was not published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingArtifact {
    pub product: Product,
    pub reason: String,
}

/// A hard failure that stopped the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// See [`TaskError::kind`].
    pub kind: String,
    pub message: String,
}

impl From<&TaskError> for Failure {
    fn from(err: &TaskError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// What one tile task produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Input key of the tile.
    pub tile: String,
    pub stem: String,
    pub status: TileStatus,
    pub artifacts: Vec<ArtifactEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<MissingArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    /// Task wall-clock time in milliseconds.
    pub duration_ms: u64,
}

impl Manifest {
    /// Manifest of a task that published what it could.
    pub fn published(
        tile: &TileRef,
        artifacts: Vec<ArtifactEntry>,
        missing: Vec<MissingArtifact>,
        duration_ms: u64,
    ) -> Self {
        let status = match (artifacts.is_empty(), missing.is_empty()) {
            (_, true) => TileStatus::Complete,
            (false, false) => TileStatus::Partial,
            (true, false) => TileStatus::Failed,
        };
        Self {
            tile: tile.key.clone(),
            stem: tile.stem.clone(),
            status,
            artifacts,
            missing,
            failure: None,
            duration_ms,
        }
    }

    /// Manifest of a task stopped by a hard failure.
    pub fn failed(tile: &TileRef, err: &TaskError, duration_ms: u64) -> Self {
        Self {
            tile: tile.key.clone(),
            stem: tile.stem.clone(),
            status: TileStatus::Failed,
            artifacts: Vec::new(),
            missing: Product::ALL
                .iter()
                .map(|&product| MissingArtifact {
                    product,
                    reason: "not produced".to_string(),
                })
                .collect(),
            failure: Some(err.into()),
            duration_ms,
        }
    }

    /// Every output key this tile wrote.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.artifacts.iter().map(|a| a.key.as_str())
    }

    /// Serialise to the JSON payload returned by a worker.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a worker payload.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile() -> TileRef {
        TileRef::from_key("tiles/t1.laz").unwrap()
    }

    fn entry(product: Product) -> ArtifactEntry {
        ArtifactEntry {
            product,
            key: product.relative_key("t1"),
            bytes: 10,
            sha256: "00".repeat(32),
        }
    }

    #[test]
    fn test_status_from_publish_outcome() {
        let all: Vec<_> = Product::ALL.iter().map(|&p| entry(p)).collect();
        assert_eq!(Manifest::published(&tile(), all, vec![], 5).status, TileStatus::Complete);

        let missing = vec![MissingArtifact {
            product: Product::Fcc,
            reason: "not produced".into(),
        }];
        let partial = Manifest::published(&tile(), vec![entry(Product::Dsm)], missing.clone(), 5);
        assert_eq!(partial.status, TileStatus::Partial);
        assert_eq!(Manifest::published(&tile(), vec![], missing, 5).status, TileStatus::Failed);
    }

    #[test]
    fn test_failed_manifest_lists_every_product() {
        let manifest = Manifest::failed(&tile(), &TaskError::TimedOut, 100);
        assert_eq!(manifest.status, TileStatus::Failed);
        assert_eq!(manifest.missing.len(), 6);
        assert_eq!(manifest.failure.as_ref().unwrap().kind, "timed_out");
        assert_eq!(manifest.keys().count(), 0);
    }

    #[test]
    fn test_json_payload() {
        let manifest = Manifest::published(&tile(), vec![entry(Product::Chm)], vec![], 42);
        let json = manifest.to_json().unwrap();
        assert!(json.contains(r#""product":"chm""#));
        assert!(json.contains(r#""status":"complete""#));
        assert!(!json.contains("failure"));
        assert_eq!(Manifest::from_json(&json).unwrap(), manifest);
    }
}
