//! In-process pipeline engine.
//!
//! Reads tiles with the `las` crate and runs every stage in memory. Produces
//! the same stage semantics as the PDAL engine without any external tool,
//! which keeps a batch self-contained and its output deterministic.

mod cloud;
mod elm;
mod outlier;
mod rasterize;
mod smrf;

pub use cloud::{read_las, Point, PointCloud};

use crate::pipeline::{Bounds, Pipeline, PipelineReport, PointCloudEngine};
use crate::stage::{Dimension, Stage};
use crate::{PipelineError, Result};
use canopy_common::TaskContext;
use canopy_raster::geotiff;
use std::path::Path;

/// Runs pipelines in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeEngine;

impl NativeEngine {
    pub fn new() -> Self {
        Self
    }
}

fn dimension_value(point: &Point, dimension: Dimension) -> f64 {
    match dimension {
        Dimension::Classification => point.classification as f64,
        Dimension::ReturnNumber => point.return_number as f64,
        Dimension::Z => point.z,
    }
}

impl PointCloudEngine for NativeEngine {
    fn name(&self) -> &'static str {
        "native"
    }

    fn survey_bounds(
        &self,
        input: &Path,
        input_crs: Option<&str>,
        target_crs: Option<&str>,
        ctx: &TaskContext,
    ) -> Result<Bounds> {
        ctx.check()?;
        let needs_transform = match (input_crs, target_crs) {
            (Some(from), Some(to)) => !cloud::same_crs(from, to),
            _ => false,
        };
        if !needs_transform {
            return cloud::header_bounds(input);
        }
        let mut points = read_las(input, input_crs)?;
        if let Some(target) = target_crs {
            points.reproject(target)?;
        }
        points.bounds().ok_or_else(|| PipelineError::EmptyPointSet {
            pipeline: "survey".to_string(),
            stage: "readers.las",
        })
    }

    fn execute(
        &self,
        pipeline: &Pipeline,
        input: &Path,
        output: &Path,
        ctx: &TaskContext,
    ) -> Result<PipelineReport> {
        let mut cloud = PointCloud::default();
        let mut points_read = 0u64;

        for stage in pipeline.stages() {
            ctx.check()?;
            let before = cloud.len();
            match stage {
                Stage::Read { crs } => {
                    cloud = read_las(input, crs.as_deref())?;
                    points_read = cloud.len() as u64;
                }
                Stage::Reproject { target_crs } => cloud.reproject(target_crs)?,
                Stage::AssignClass { class } => {
                    cloud.points.iter_mut().for_each(|p| p.classification = *class);
                }
                Stage::Elm(params) => {
                    let marked = elm::mark_low_noise(&mut cloud.points, params);
                    tracing::debug!(pipeline = pipeline.name(), marked, "Marked low noise");
                }
                Stage::RadiusOutlier(params) => {
                    let marked = outlier::mark_radius_outliers(&mut cloud.points, params);
                    tracing::debug!(pipeline = pipeline.name(), marked, "Marked outliers");
                }
                Stage::Smrf(params) => {
                    let ground = smrf::classify_ground(&mut cloud.points, params);
                    tracing::debug!(pipeline = pipeline.name(), ground, "Classified ground");
                }
                Stage::Range(filter) => {
                    cloud
                        .points
                        .retain(|p| filter.accepts(dimension_value(p, filter.dimension)));
                }
                Stage::Rasterize(spec) => {
                    let (mut raster, binned) = rasterize::rasterize(&cloud.points, spec)?;
                    if let Some(crs) = &cloud.crs {
                        raster = raster.with_crs(crs.clone());
                    }
                    let cells_filled = raster.valid_count();
                    if cells_filled == 0 {
                        return Err(PipelineError::EmptyRaster {
                            path: output.to_path_buf(),
                        });
                    }
                    geotiff::write(output, &raster)?;
                    tracing::debug!(
                        pipeline = pipeline.name(),
                        points_read,
                        binned,
                        cells_filled,
                        "Wrote raster"
                    );
                    return Ok(PipelineReport {
                        pipeline: pipeline.name().to_string(),
                        engine: self.name(),
                        points_read: Some(points_read),
                        points_written: Some(binned),
                        cells_filled,
                    });
                }
            }
            tracing::trace!(
                pipeline = pipeline.name(),
                stage = stage.kind(),
                before,
                after = cloud.len(),
                "Stage done"
            );
            if cloud.is_empty() {
                return Err(PipelineError::EmptyPointSet {
                    pipeline: pipeline.name().to_string(),
                    stage: stage.kind(),
                });
            }
        }
        Err(PipelineError::InvalidPipeline {
            pipeline: pipeline.name().to_string(),
            reason: "no writer stage".to_string(),
        })
    }
}
