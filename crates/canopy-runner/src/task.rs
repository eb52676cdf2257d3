//! The per-tile task driver.
//!
//! A [`TileTask`] runs one tile from intake to publication:
//!
//! 1. fetch the tile into a fresh scratch tree
//! 2. survey its bounds and fix the tile grid
//! 3. run the DSM and DEM pipelines onto that grid
//! 4. compute CHM, aspect and slope with the raster engine
//! 5. threshold the configured source raster into fractional canopy cover
//! 6. publish whatever was produced and discard the scratch tree
//!
//! Steps 1 to 3 stop at the first error: every later product depends on the
//! DSM and DEM. A failed derivative in steps 4 and 5 only costs that product
//! (and FCC, when it is computed from a missing CHM); the rest is still
//! published and the tile ends up partial. Cancellation and deadlines stop
//! the task at any step. Step 6 never fails: missing artifacts end up in the
//! manifest.

use crate::config::{BatchConfig, FccSource};
use crate::error::TaskError;
use crate::intake::{intake, Scratch, StagedTile};
use crate::manifest::{Manifest, MissingArtifact};
use crate::metrics::metric_defs;
use crate::publish::{publish, PublishOutcome};
use canopy_common::{Product, TaskContext, CHM_NODATA};
use canopy_pointcloud::{dem_pipeline, dsm_pipeline, tile_grid, PointCloudEngine};
use canopy_raster::{geotiff, Raster};
use canopy_store::ObjectStore;
use canopy_terrain::fraction::canopy_fraction;
use canopy_terrain::{RasterEngine, TerrainKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Point-cloud file extensions accepted as tiles.
pub const TILE_EXTENSIONS: [&str; 2] = ["las", "laz"];

/// Identity of one input tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileRef {
    /// Input store key.
    pub key: String,
    /// File name without extension; names every product of the tile.
    pub stem: String,
}

impl TileRef {
    /// Describe the tile stored under `key`, or `None` if the key does not
    /// name a `.las`/`.laz` file.
    pub fn from_key(key: &str) -> Option<Self> {
        let file_name = key.rsplit('/').next()?;
        let (stem, extension) = file_name.rsplit_once('.')?;
        let accepted = TILE_EXTENSIONS
            .iter()
            .any(|ext| extension.eq_ignore_ascii_case(ext));
        (accepted && !stem.is_empty()).then(|| Self {
            key: key.to_string(),
            stem: stem.to_string(),
        })
    }

    /// Last segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Processes single tiles with a fixed configuration and fixed engines.
#[derive(Debug, Clone)]
pub struct TileTask {
    config: Arc<BatchConfig>,
    input: Arc<dyn ObjectStore>,
    output: Arc<dyn ObjectStore>,
    pointcloud: Arc<dyn PointCloudEngine>,
    raster: Arc<dyn RasterEngine>,
}

impl TileTask {
    /// A task reading and writing `store`, with the configured engines.
    pub fn new(config: Arc<BatchConfig>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            pointcloud: config.engines.point_cloud_engine(),
            raster: config.engines.raster_engine(),
            input: store.clone(),
            output: store,
            config,
        }
    }

    /// Publish into a different store than the one tiles are read from.
    pub fn with_output_store(mut self, output: Arc<dyn ObjectStore>) -> Self {
        self.output = output;
        self
    }

    /// Replace the configured engines.
    pub fn with_engines(
        mut self,
        pointcloud: Arc<dyn PointCloudEngine>,
        raster: Arc<dyn RasterEngine>,
    ) -> Self {
        self.pointcloud = pointcloud;
        self.raster = raster;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// The store tiles are read from.
    pub fn input_store(&self) -> &Arc<dyn ObjectStore> {
        &self.input
    }

    /// Process `tile` and describe the result. Never fails: errors are
    /// recorded in the manifest.
    pub fn run(&self, tile: &TileRef, ctx: &TaskContext) -> Manifest {
        let span = tracing::info_span!("tile", stem = %tile.stem);
        let _guard = span.enter();
        let started = Instant::now();
        tracing::info!(key = %tile.key, "Processing tile");

        metrics::gauge!(metric_defs::TASKS_RUNNING.name).increment(1.0);
        let result = self.process(tile, ctx);
        metrics::gauge!(metric_defs::TASKS_RUNNING.name).decrement(1.0);

        let elapsed = started.elapsed();
        metrics::histogram!(metric_defs::TASK_DURATION.name).record(elapsed.as_secs_f64());
        let duration_ms = elapsed.as_millis() as u64;

        match result {
            Ok(outcome) => {
                let manifest = Manifest::published(tile, outcome.published, outcome.missing, duration_ms);
                tracing::info!(
                    status = manifest.status.as_str(),
                    artifacts = manifest.artifacts.len(),
                    duration_ms,
                    "Tile finished"
                );
                manifest
            }
            Err(err) => {
                tracing::error!(error = %err, duration_ms, "Tile failed");
                Manifest::failed(tile, &err, duration_ms)
            }
        }
    }

    fn process(&self, tile: &TileRef, ctx: &TaskContext) -> Result<PublishOutcome, TaskError> {
        ctx.check()?;
        let staged = intake(
            self.input.as_ref(),
            tile,
            &self.config.scratch_root,
            &self.config.retry,
            ctx,
        )?;

        let result = self.produce(&staged, ctx).and_then(|skipped| {
            ctx.check()?;
            let mut outcome = publish(
                self.output.as_ref(),
                &staged.scratch,
                &tile.stem,
                &self.config.output_prefix,
                &self.config.retry,
                ctx,
            );
            for missing in &mut outcome.missing {
                if let Some(failed) = skipped.iter().find(|s| s.product == missing.product) {
                    missing.reason.clone_from(&failed.reason);
                }
            }
            Ok(outcome)
        });

        self.release(staged.scratch);
        result
    }

    fn release(&self, scratch: Scratch) {
        if self.config.keep_scratch {
            let path = scratch.keep();
            tracing::info!(path = %path.display(), "Keeping scratch tree");
            return;
        }
        let root = scratch.root().to_path_buf();
        if let Err(e) = scratch.discard() {
            tracing::warn!(path = %root.display(), error = %e, "Failed to discard scratch tree");
        }
    }

    /// Run every processing step, leaving the artifacts in scratch.
    ///
    /// Returns the derivative products that could not be computed.
    fn produce(&self, staged: &StagedTile, ctx: &TaskContext) -> Result<Vec<MissingArtifact>, TaskError> {
        let params = &self.config.pipeline;
        let engine = self.pointcloud.as_ref();
        let scratch = &staged.scratch;
        let input = staged.input.as_path();

        let grid = tile_grid(engine, input, params, ctx)
            .map_err(|e| TaskError::pipeline(Product::Dsm, e))?;

        let dsm = scratch.artifact(Product::Dsm);
        let report = dsm_pipeline(params, grid)
            .and_then(|pipeline| pipeline.execute(engine, input, &dsm, ctx))
            .map_err(|e| TaskError::pipeline(Product::Dsm, e))?;
        tracing::debug!(?report, "Surface model written");

        let dem = scratch.artifact(Product::Dem);
        let report = dem_pipeline(params, grid)
            .and_then(|pipeline| pipeline.execute(engine, input, &dem, ctx))
            .map_err(|e| TaskError::pipeline(Product::Dem, e))?;
        tracing::debug!(?report, "Ground model written");

        let mut skipped = Vec::new();
        let chm = match self
            .raster
            .difference(&dsm, &dem, CHM_NODATA, &scratch.artifact(Product::Chm), ctx)
        {
            Ok(chm) => Some(chm),
            Err(e) => {
                skip(scratch, TaskError::derivative(Product::Chm, e), &mut skipped)?;
                None
            }
        };

        let compute_edges = self.config.derivatives.compute_edges;
        for (product, kind) in [
            (Product::Aspect, TerrainKind::Aspect),
            (Product::Slope, TerrainKind::Slope),
        ] {
            if let Err(e) = self
                .raster
                .terrain(&dem, kind, compute_edges, &scratch.artifact(product), ctx)
            {
                skip(scratch, TaskError::derivative(product, e), &mut skipped)?;
            }
        }

        ctx.check()?;
        let fcc_config = self.config.fcc;
        let source = match fcc_config.source {
            FccSource::Dem => geotiff::read(&dem).map(Some),
            FccSource::Chm => Ok(chm),
        };
        let fcc = match source {
            Ok(Some(source)) => canopy_cover(&source, fcc_config.breakpoint, fcc_config.window, scratch),
            Ok(None) => {
                tracing::warn!("No canopy height model, skipping canopy cover");
                skipped.push(MissingArtifact {
                    product: Product::Fcc,
                    reason: "canopy height model unavailable".to_string(),
                });
                Ok(())
            }
            Err(e) => Err(TaskError::derivative(Product::Fcc, e)),
        };
        match fcc {
            Ok(()) => {
                tracing::debug!(source = ?fcc_config.source, window = fcc_config.window, "Canopy cover written");
            }
            Err(err) => skip(scratch, err, &mut skipped)?,
        }
        Ok(skipped)
    }
}

fn canopy_cover(source: &Raster, breakpoint: f32, window: usize, scratch: &Scratch) -> Result<(), TaskError> {
    let fcc = canopy_fraction(source, breakpoint, window).map_err(|e| TaskError::derivative(Product::Fcc, e))?;
    geotiff::write(scratch.artifact(Product::Fcc), &fcc).map_err(|e| TaskError::derivative(Product::Fcc, e))
}

/// Record a failed derivative and drop whatever it left in scratch, so a
/// half-written file is never published. Interruptions stop the task.
fn skip(scratch: &Scratch, err: TaskError, skipped: &mut Vec<MissingArtifact>) -> Result<(), TaskError> {
    let product = match &err {
        TaskError::DerivativeComputeFailure { product, .. } => *product,
        _ => return Err(err),
    };
    tracing::warn!(%product, error = %err, "Derivative failed, continuing without it");
    let path = scratch.artifact(product);
    if path.exists() {
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial artifact");
        }
    }
    skipped.push(MissingArtifact {
        product,
        reason: err.to_string(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_ref_from_key() {
        let tile = TileRef::from_key("survey/2023/LHD_FXX_0512_6520.laz").unwrap();
        assert_eq!(tile.stem, "LHD_FXX_0512_6520");
        assert_eq!(tile.file_name(), "LHD_FXX_0512_6520.laz");

        let upper = TileRef::from_key("a.LAS").unwrap();
        assert_eq!(upper.stem, "a");
        assert_eq!(upper.file_name(), "a.LAS");

        assert!(TileRef::from_key("tiles/readme.txt").is_none());
        assert!(TileRef::from_key("tiles/noext").is_none());
        assert!(TileRef::from_key("tiles/.laz").is_none());
    }

    #[test]
    fn test_dotted_stem_keeps_inner_dots() {
        let tile = TileRef::from_key("tiles/block.v2.las").unwrap();
        assert_eq!(tile.stem, "block.v2");
    }
}
