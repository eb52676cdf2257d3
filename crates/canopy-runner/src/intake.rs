//! Tile intake: fetch a tile into a fresh scratch tree.
//!
//! Each task owns a directory `<scratch_root>/<stem>-XXXXXX` with a random
//! suffix, so concurrent tasks and concurrent processes never share one,
//! even for the same stem:
//!
//! ```text
//! <stem>-XXXXXX/
//!   raw/<file name>
//!   dsm/<stem>.tif   dem/<stem>.tif   chm/<stem>.tif
//!   aspect/<stem>.tif   slope/<stem>.tif   fcc/<stem>.tif
//! ```
//!
//! The tree is removed when its [`Scratch`] is dropped, including on every
//! error path, unless the task explicitly [keeps](Scratch::keep) it.

use crate::error::IntakeError;
use crate::retry::RetryPolicy;
use crate::task::TileRef;
use canopy_common::{Product, TaskContext, RAW_SUBDIR};
use canopy_store::ObjectStore;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The private working directory of one task.
#[derive(Debug)]
pub struct Scratch {
    dir: TempDir,
    stem: String,
}

impl Scratch {
    /// Create an empty tree for `stem` under `scratch_root`.
    pub fn create(scratch_root: &Path, stem: &str) -> io::Result<Self> {
        fs::create_dir_all(scratch_root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{stem}-"))
            .tempdir_in(scratch_root)?;
        fs::create_dir(dir.path().join(RAW_SUBDIR))?;
        for product in Product::ALL {
            fs::create_dir(dir.path().join(product.subdir()))?;
        }
        Ok(Self {
            dir,
            stem: stem.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Location of the raw tile bytes.
    pub fn raw(&self, file_name: &str) -> PathBuf {
        self.root().join(RAW_SUBDIR).join(file_name)
    }

    /// Location of a product artifact.
    pub fn artifact(&self, product: Product) -> PathBuf {
        self.root().join(product.subdir()).join(product.file_name(&self.stem))
    }

    /// Delete the tree now, reporting errors a drop would swallow.
    pub fn discard(self) -> io::Result<()> {
        self.dir.close()
    }

    /// Leave the tree on disk and return its path.
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }
}

/// A tile sitting in its scratch tree, ready for the pipelines.
#[derive(Debug)]
pub struct StagedTile {
    pub scratch: Scratch,
    /// Path of the raw point cloud.
    pub input: PathBuf,
    pub bytes: u64,
}

/// Fetch `tile` into a fresh scratch tree under `scratch_root`.
pub fn intake(
    store: &dyn ObjectStore,
    tile: &TileRef,
    scratch_root: &Path,
    retry: &RetryPolicy,
    ctx: &TaskContext,
) -> Result<StagedTile, IntakeError> {
    let scratch = Scratch::create(scratch_root, &tile.stem)?;
    let bytes = retry
        .run("get", ctx, || store.get(&tile.key))
        .map_err(|source| IntakeError::Fetch {
            key: tile.key.clone(),
            source,
        })?;
    if bytes.is_empty() {
        return Err(IntakeError::EmptyObject(tile.key.clone()));
    }

    let input = scratch.raw(tile.file_name());
    fs::write(&input, &bytes)?;
    tracing::debug!(tile = %tile.key, bytes = bytes.len(), path = %input.display(), "Tile staged");
    Ok(StagedTile {
        scratch,
        input,
        bytes: bytes.len() as u64,
    })
}
