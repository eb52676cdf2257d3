//! # canopy-pointcloud
//!
//! Declarative lidar pipelines that turn one LAS/LAZ tile into elevation
//! rasters.
//!
//! ## Overview
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s: read, optional
//! reprojection, classification and filtering, then rasterization onto a
//! [`GridSpec`](canopy_raster::GridSpec). Input and output paths are bound
//! only when the pipeline runs, so one pipeline value serves any tile.
//!
//! Two engines implement [`PointCloudEngine`]:
//! - [`NativeEngine`] - reads with the `las` crate and runs radius outlier,
//!   ELM and SMRF filters in-process
//! - [`PdalEngine`] - sends the stage list to `pdal pipeline --stdin`
//!
//! [`dsm_pipeline`] and [`dem_pipeline`] build the two elevation pipelines.
//! They share reprojection and noise settings and the tile grid from
//! [`tile_grid`], so the resulting rasters are co-registered.
//!
//! ## Example
//!
//! ```no_run
//! use canopy_common::TaskContext;
//! use canopy_pointcloud::{dem_pipeline, dsm_pipeline, tile_grid, NativeEngine, PipelineParams};
//! use std::path::Path;
//!
//! let engine = NativeEngine::new();
//! let params = PipelineParams::default();
//! let ctx = TaskContext::unbounded();
//! let input = Path::new("tile.laz");
//!
//! let grid = tile_grid(&engine, input, &params, &ctx)?;
//! dsm_pipeline(&params, grid)?.execute(&engine, input, Path::new("dsm.tif"), &ctx)?;
//! dem_pipeline(&params, grid)?.execute(&engine, input, Path::new("dem.tif"), &ctx)?;
//! # Ok::<(), canopy_pointcloud::PipelineError>(())
//! ```

mod error;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
pub mod native;
mod pdal;
mod pipeline;
mod presets;
mod stage;

pub use error::PipelineError;
pub use native::NativeEngine;
pub use pdal::{parse_stats_bounds, parse_summary_bounds, PdalEngine};
pub use pipeline::{Bounds, Pipeline, PipelineBuilder, PipelineReport, PointCloudEngine};
pub use presets::{
    dem_pipeline, dsm_pipeline, tile_grid, PipelineParams, DEM_PIPELINE, DSM_PIPELINE,
};
pub use stage::{
    Aggregation, Dimension, ElmParams, OutlierParams, RangeFilter, RasterizeSpec, SmrfParams,
    Stage, CLASS_GROUND, CLASS_NOISE, CLASS_UNCLASSIFIED,
};

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
