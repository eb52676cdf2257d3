//! Pipeline assembly and the engine seam.

use crate::stage::{
    Aggregation, ElmParams, OutlierParams, RangeFilter, RasterizeSpec, SmrfParams, Stage,
};
use crate::{PipelineError, Result};
use canopy_common::TaskContext;
use canopy_raster::GridSpec;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Debug;
use std::path::Path;

/// Planimetric bounds of a point cloud.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Grid covering these bounds at a square cell size.
    pub fn grid(&self, resolution: f64) -> GridSpec {
        GridSpec::from_bounds(self.min_x, self.min_y, self.max_x, self.max_y, resolution)
    }
}

/// What a pipeline run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    /// Pipeline name.
    pub pipeline: String,
    /// Engine that ran it.
    pub engine: &'static str,
    /// Points read from the input, when the engine reports it.
    pub points_read: Option<u64>,
    /// Points that reached the writer, when the engine reports it.
    pub points_written: Option<u64>,
    /// Raster cells holding a value.
    pub cells_filled: usize,
}

/// Something that can execute a [`Pipeline`].
pub trait PointCloudEngine: Send + Sync + Debug {
    /// Engine name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Bounds of the input after the read and optional reprojection stages.
    fn survey_bounds(
        &self,
        input: &Path,
        input_crs: Option<&str>,
        target_crs: Option<&str>,
        ctx: &TaskContext,
    ) -> Result<Bounds>;

    /// Run a pipeline, binding its input and output paths.
    fn execute(
        &self,
        pipeline: &Pipeline,
        input: &Path,
        output: &Path,
        ctx: &TaskContext,
    ) -> Result<PipelineReport>;
}

/// A validated stage list, independent of any file paths.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    name: String,
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stages in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The rasterization target.
    pub fn raster_spec(&self) -> &RasterizeSpec {
        match self.stages.last() {
            Some(Stage::Rasterize(spec)) => spec,
            // build() guarantees the last stage is the writer
            _ => unreachable!("pipeline without a writer stage"),
        }
    }

    /// PDAL pipeline document with paths bound.
    pub fn to_pdal_json(&self, input: &Path, output: &Path) -> Value {
        let stages: Vec<Value> = self
            .stages
            .iter()
            .map(|s| s.to_pdal_json(input, output))
            .collect();
        json!({ "pipeline": stages })
    }

    /// Run on an engine.
    pub fn execute(
        &self,
        engine: &dyn PointCloudEngine,
        input: &Path,
        output: &Path,
        ctx: &TaskContext,
    ) -> Result<PipelineReport> {
        tracing::debug!(
            pipeline = %self.name,
            engine = engine.name(),
            input = %input.display(),
            output = %output.display(),
            "Executing pipeline"
        );
        engine.execute(self, input, output, ctx)
    }
}

/// Builder for [`Pipeline`].
///
/// ```
/// use canopy_pointcloud::{PipelineBuilder, RangeFilter};
/// use canopy_raster::GridSpec;
///
/// let grid = GridSpec::from_bounds(0.0, 0.0, 9.0, 9.0, 1.0);
/// let pipeline = PipelineBuilder::new("returns")
///     .read(None)
///     .range(RangeFilter::first_return())
///     .rasterize_max(grid, -9999.0)
///     .build()
///     .unwrap();
/// assert_eq!(pipeline.stages().len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn read(self, crs: Option<String>) -> Self {
        self.stage(Stage::Read { crs })
    }

    /// Add a reprojection stage when a target CRS is given.
    pub fn reproject(self, target_crs: Option<String>) -> Self {
        match target_crs {
            Some(target_crs) => self.stage(Stage::Reproject { target_crs }),
            None => self,
        }
    }

    pub fn assign_class(self, class: u8) -> Self {
        self.stage(Stage::AssignClass { class })
    }

    pub fn elm(self, params: ElmParams) -> Self {
        self.stage(Stage::Elm(params))
    }

    pub fn radius_outlier(self, params: OutlierParams) -> Self {
        self.stage(Stage::RadiusOutlier(params))
    }

    pub fn smrf(self, params: SmrfParams) -> Self {
        self.stage(Stage::Smrf(params))
    }

    pub fn range(self, filter: RangeFilter) -> Self {
        self.stage(Stage::Range(filter))
    }

    pub fn rasterize_max(self, grid: GridSpec, nodata: f32) -> Self {
        self.stage(Stage::Rasterize(RasterizeSpec {
            grid,
            aggregation: Aggregation::Max,
            nodata,
        }))
    }

    /// Check stage order and parameters.
    ///
    /// A pipeline reads exactly once, first, and rasterizes exactly once,
    /// last.
    pub fn build(self) -> Result<Pipeline> {
        let invalid = |reason: &str| PipelineError::InvalidPipeline {
            pipeline: self.name.clone(),
            reason: reason.to_string(),
        };
        if !matches!(self.stages.first(), Some(Stage::Read { .. })) {
            return Err(invalid("the first stage must read the input"));
        }
        if !matches!(self.stages.last(), Some(Stage::Rasterize(_))) {
            return Err(invalid("the last stage must write a raster"));
        }
        let reads = self
            .stages
            .iter()
            .filter(|s| matches!(s, Stage::Read { .. }))
            .count();
        let writes = self
            .stages
            .iter()
            .filter(|s| matches!(s, Stage::Rasterize(_)))
            .count();
        if reads != 1 || writes != 1 {
            return Err(invalid("expected exactly one reader and one writer"));
        }
        for stage in &self.stages {
            stage.validate()?;
        }
        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::CLASS_NOISE;

    fn grid() -> GridSpec {
        GridSpec::from_bounds(0.0, 0.0, 4.0, 4.0, 1.0)
    }

    #[test]
    fn test_build_requires_reader_first() {
        let result = PipelineBuilder::new("bad")
            .range(RangeFilter::first_return())
            .read(None)
            .rasterize_max(grid(), -9999.0)
            .build();
        assert!(matches!(result, Err(PipelineError::InvalidPipeline { .. })));
    }

    #[test]
    fn test_build_requires_single_writer() {
        let result = PipelineBuilder::new("bad")
            .read(None)
            .rasterize_max(grid(), -9999.0)
            .rasterize_max(grid(), -9999.0)
            .build();
        assert!(matches!(result, Err(PipelineError::InvalidPipeline { .. })));
    }

    #[test]
    fn test_reproject_is_optional() {
        let pipeline = PipelineBuilder::new("p")
            .read(None)
            .reproject(None)
            .rasterize_max(grid(), -9999.0)
            .build()
            .unwrap();
        assert_eq!(pipeline.stages().len(), 2);
    }

    #[test]
    fn test_pdal_document_layout() {
        let pipeline = PipelineBuilder::new("p")
            .read(Some("EPSG:2154".to_string()))
            .radius_outlier(OutlierParams::default())
            .range(RangeFilter::exclude_class(CLASS_NOISE))
            .rasterize_max(grid(), -9999.0)
            .build()
            .unwrap();
        let doc = pipeline.to_pdal_json(Path::new("a.laz"), Path::new("b.tif"));
        let types: Vec<&str> = doc["pipeline"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["type"].as_str().unwrap())
            .collect();
        assert_eq!(
            types,
            ["readers.las", "filters.outlier", "filters.range", "writers.gdal"]
        );
        assert_eq!(pipeline.raster_spec().grid, grid());
    }
}
