//! The surface (DSM) and ground-surface (DEM) pipelines.
//!
//! Both pipelines read the same tile, share the reprojection and noise
//! handling settings, and write onto the same [`GridSpec`], so the two
//! rasters are co-registered by construction.
//!
//! DSM stages:
//! 1. read with the declared CRS, reproject
//! 2. radius outlier removal, then drop noise (class 7)
//! 3. keep first returns
//! 4. rasterize the per-cell maximum
//!
//! DEM stages:
//! 1. read with the declared CRS, reproject
//! 2. reset every class to unclassified
//! 3. mark low noise (ELM) and outliers
//! 4. classify ground with SMRF, ignoring noise
//! 5. keep ground (class 2)
//! 6. rasterize the per-cell maximum

use crate::pipeline::{Bounds, Pipeline, PipelineBuilder, PointCloudEngine};
use crate::stage::{
    ElmParams, OutlierParams, RangeFilter, SmrfParams, CLASS_GROUND, CLASS_NOISE,
    CLASS_UNCLASSIFIED,
};
use crate::{PipelineError, Result};
use canopy_common::{TaskContext, ELEVATION_NODATA};
use canopy_raster::GridSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the surface pipeline.
pub const DSM_PIPELINE: &str = "dsm";
/// Name of the ground-surface pipeline.
pub const DEM_PIPELINE: &str = "dem";

/// Settings shared by both elevation pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    /// CRS declared for input tiles, overriding whatever the file says.
    pub input_crs: Option<String>,
    /// CRS to reproject into; `None` keeps the input CRS.
    pub target_crs: Option<String>,
    /// Output cell size in target CRS units.
    pub resolution: f64,
    pub outlier: OutlierParams,
    pub elm: ElmParams,
    pub smrf: SmrfParams,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            input_crs: None,
            target_crs: None,
            resolution: 1.0,
            outlier: OutlierParams::default(),
            elm: ElmParams::default(),
            smrf: SmrfParams::default(),
        }
    }
}

impl PipelineParams {
    /// CRS the rasters end up in, when known.
    pub fn output_crs(&self) -> Option<&str> {
        self.target_crs.as_deref().or(self.input_crs.as_deref())
    }

    /// Build both pipelines once to check every parameter.
    pub fn validate(&self) -> Result<()> {
        if !(self.resolution > 0.0) {
            return Err(PipelineError::InvalidParameter {
                stage: "writers.gdal",
                reason: format!("resolution {} must be positive", self.resolution),
            });
        }
        let grid = GridSpec::from_bounds(0.0, 0.0, self.resolution, self.resolution, self.resolution);
        dsm_pipeline(self, grid)?;
        dem_pipeline(self, grid)?;
        Ok(())
    }
}

/// The first-return surface pipeline.
pub fn dsm_pipeline(params: &PipelineParams, grid: GridSpec) -> Result<Pipeline> {
    PipelineBuilder::new(DSM_PIPELINE)
        .read(params.input_crs.clone())
        .reproject(params.target_crs.clone())
        .radius_outlier(params.outlier)
        .range(RangeFilter::exclude_class(CLASS_NOISE))
        .range(RangeFilter::first_return())
        .rasterize_max(grid, ELEVATION_NODATA)
        .build()
}

/// The ground-surface pipeline.
pub fn dem_pipeline(params: &PipelineParams, grid: GridSpec) -> Result<Pipeline> {
    PipelineBuilder::new(DEM_PIPELINE)
        .read(params.input_crs.clone())
        .reproject(params.target_crs.clone())
        .assign_class(CLASS_UNCLASSIFIED)
        .elm(params.elm)
        .radius_outlier(params.outlier)
        .smrf(params.smrf)
        .range(RangeFilter::only_class(CLASS_GROUND))
        .rasterize_max(grid, ELEVATION_NODATA)
        .build()
}

/// The grid both elevation rasters of a tile are written on.
pub fn tile_grid(
    engine: &dyn PointCloudEngine,
    input: &Path,
    params: &PipelineParams,
    ctx: &TaskContext,
) -> Result<GridSpec> {
    let bounds: Bounds = engine.survey_bounds(
        input,
        params.input_crs.as_deref(),
        params.target_crs.as_deref(),
        ctx,
    )?;
    let grid = bounds.grid(params.resolution);
    tracing::debug!(
        input = %input.display(),
        width = grid.width,
        height = grid.height,
        "Derived tile grid"
    );
    Ok(grid)
}
