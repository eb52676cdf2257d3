//! Pipeline stages and their parameters.
//!
//! Stages are plain data. The same stage list is either interpreted
//! in-process by the native engine or encoded as a PDAL pipeline document
//! with [`Stage::to_pdal_json`].

use crate::{PipelineError, Result};
use canopy_raster::GridSpec;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

/// ASPRS class for points never assigned a class.
pub const CLASS_UNCLASSIFIED: u8 = 1;
/// ASPRS ground class.
pub const CLASS_GROUND: u8 = 2;
/// ASPRS low-point (noise) class.
pub const CLASS_NOISE: u8 = 7;

/// Radius outlier removal parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierParams {
    /// Search radius in map units.
    pub radius: f64,
    /// Minimum points inside the radius, the point itself included.
    pub min_neighbors: usize,
}

impl Default for OutlierParams {
    fn default() -> Self {
        Self {
            radius: 1.0,
            min_neighbors: 4,
        }
    }
}

/// Extended local minimum parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElmParams {
    /// Cell size in map units.
    pub cell: f64,
    /// Height below the neighbouring minima that marks a point as low noise.
    pub threshold: f64,
}

impl Default for ElmParams {
    fn default() -> Self {
        Self {
            cell: 10.0,
            threshold: 1.0,
        }
    }
}

/// Simple morphological filter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmrfParams {
    /// Terrain slope tolerance (rise over run).
    pub slope: f64,
    /// Largest opening window, in map units.
    pub window: f64,
    /// Elevation threshold in map units.
    pub threshold: f64,
    /// Multiplier applied to the local gradient of the provisional surface.
    pub scalar: f64,
    /// Working grid cell size in map units.
    pub cell: f64,
}

impl Default for SmrfParams {
    fn default() -> Self {
        Self {
            slope: 0.15,
            window: 18.0,
            threshold: 0.5,
            scalar: 1.25,
            cell: 1.0,
        }
    }
}

/// Point dimension a range filter tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    Classification,
    ReturnNumber,
    Z,
}

impl Dimension {
    fn pdal_name(self) -> &'static str {
        match self {
            Dimension::Classification => "Classification",
            Dimension::ReturnNumber => "ReturnNumber",
            Dimension::Z => "Z",
        }
    }
}

/// Keep points whose dimension lies in `[min, max]`, or outside it when
/// negated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeFilter {
    pub dimension: Dimension,
    pub min: f64,
    pub max: f64,
    pub negate: bool,
}

impl RangeFilter {
    /// Drop every point of one class.
    pub fn exclude_class(class: u8) -> Self {
        Self {
            dimension: Dimension::Classification,
            min: class as f64,
            max: class as f64,
            negate: true,
        }
    }

    /// Keep only points of one class.
    pub fn only_class(class: u8) -> Self {
        Self {
            dimension: Dimension::Classification,
            min: class as f64,
            max: class as f64,
            negate: false,
        }
    }

    /// Keep only first returns.
    pub fn first_return() -> Self {
        Self {
            dimension: Dimension::ReturnNumber,
            min: 1.0,
            max: 1.0,
            negate: false,
        }
    }

    /// Whether a value passes the filter.
    pub fn accepts(&self, value: f64) -> bool {
        let inside = value >= self.min && value <= self.max;
        inside != self.negate
    }

    /// PDAL range expression, e.g. `Classification![7:7]`.
    pub fn expression(&self) -> String {
        format!(
            "{}{}[{}:{}]",
            self.dimension.pdal_name(),
            if self.negate { "!" } else { "" },
            self.min,
            self.max
        )
    }
}

/// How points falling in one cell are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Max,
    Min,
}

impl Aggregation {
    fn pdal_name(self) -> &'static str {
        match self {
            Aggregation::Max => "max",
            Aggregation::Min => "min",
        }
    }
}

/// Rasterization target.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterizeSpec {
    pub grid: GridSpec,
    pub aggregation: Aggregation,
    pub nodata: f32,
}

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Read the input LAS/LAZ file, optionally declaring its CRS.
    Read { crs: Option<String> },
    /// Reproject to a target CRS.
    Reproject { target_crs: String },
    /// Overwrite the class of every point.
    AssignClass { class: u8 },
    /// Mark low noise with the extended local minimum method.
    Elm(ElmParams),
    /// Mark isolated points as noise.
    RadiusOutlier(OutlierParams),
    /// Classify ground points, ignoring points already marked as noise.
    Smrf(SmrfParams),
    /// Keep points passing a range test.
    Range(RangeFilter),
    /// Write a single-band raster.
    Rasterize(RasterizeSpec),
}

impl Stage {
    /// PDAL stage type name.
    pub fn kind(&self) -> &'static str {
        match self {
            Stage::Read { .. } => "readers.las",
            Stage::Reproject { .. } => "filters.reprojection",
            Stage::AssignClass { .. } => "filters.assign",
            Stage::Elm(_) => "filters.elm",
            Stage::RadiusOutlier(_) => "filters.outlier",
            Stage::Smrf(_) => "filters.smrf",
            Stage::Range(_) => "filters.range",
            Stage::Rasterize(_) => "writers.gdal",
        }
    }

    /// Reject out-of-range parameters.
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind();
        let invalid = |reason: String| {
            Err(PipelineError::InvalidParameter {
                stage: kind,
                reason,
            })
        };
        match self {
            Stage::Reproject { target_crs } if target_crs.trim().is_empty() => {
                invalid("target CRS is empty".to_string())
            }
            Stage::Elm(p) if !(p.cell > 0.0) => invalid(format!("cell {} must be positive", p.cell)),
            Stage::Elm(p) if !(p.threshold >= 0.0) => {
                invalid(format!("threshold {} must not be negative", p.threshold))
            }
            Stage::RadiusOutlier(p) if !(p.radius > 0.0) => {
                invalid(format!("radius {} must be positive", p.radius))
            }
            Stage::RadiusOutlier(p) if p.min_neighbors == 0 => {
                invalid("min_neighbors must be at least 1".to_string())
            }
            Stage::Smrf(p) if !(p.cell > 0.0) => invalid(format!("cell {} must be positive", p.cell)),
            Stage::Smrf(p) if !(p.window >= p.cell) => invalid(format!(
                "window {} must be at least one cell ({})",
                p.window, p.cell
            )),
            Stage::Smrf(p) if !(p.slope >= 0.0 && p.threshold >= 0.0 && p.scalar >= 0.0) => {
                invalid("slope, threshold and scalar must not be negative".to_string())
            }
            Stage::Range(r) if r.min > r.max => {
                invalid(format!("empty range [{}:{}]", r.min, r.max))
            }
            Stage::Rasterize(spec) => spec
                .grid
                .validate()
                .map_err(|e| PipelineError::InvalidParameter {
                    stage: kind,
                    reason: e.to_string(),
                }),
            _ => Ok(()),
        }
    }

    /// Encode the stage as a PDAL pipeline entry.
    ///
    /// File paths are bound here rather than when the stage is built.
    pub fn to_pdal_json(&self, input: &Path, output: &Path) -> Value {
        let kind = self.kind();
        match self {
            Stage::Read { crs } => {
                let mut stage = json!({
                    "type": kind,
                    "filename": input.to_string_lossy(),
                });
                if let Some(crs) = crs {
                    stage["override_srs"] = json!(crs);
                }
                stage
            }
            Stage::Reproject { target_crs } => json!({
                "type": kind,
                "out_srs": target_crs,
            }),
            Stage::AssignClass { class } => json!({
                "type": kind,
                "value": format!("Classification = {class}"),
            }),
            Stage::Elm(p) => json!({
                "type": kind,
                "cell": p.cell,
                "threshold": p.threshold,
                "class": CLASS_NOISE,
            }),
            Stage::RadiusOutlier(p) => json!({
                "type": kind,
                "method": "radius",
                "radius": p.radius,
                "min_k": p.min_neighbors,
                "class": CLASS_NOISE,
            }),
            Stage::Smrf(p) => json!({
                "type": kind,
                "slope": p.slope,
                "window": p.window,
                "threshold": p.threshold,
                "scalar": p.scalar,
                "cell": p.cell,
                "ignore": RangeFilter::only_class(CLASS_NOISE).expression(),
            }),
            Stage::Range(r) => json!({
                "type": kind,
                "limits": r.expression(),
            }),
            Stage::Rasterize(spec) => json!({
                "type": kind,
                "filename": output.to_string_lossy(),
                "gdaldriver": "GTiff",
                "data_type": "float32",
                "output_type": spec.aggregation.pdal_name(),
                "binmode": true,
                "nodata": spec.nodata,
                "resolution": spec.grid.res_x,
                "origin_x": spec.grid.min_x,
                "origin_y": spec.grid.min_y,
                "width": spec.grid.width,
                "height": spec.grid.height,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_expressions() {
        assert_eq!(RangeFilter::exclude_class(7).expression(), "Classification![7:7]");
        assert_eq!(RangeFilter::only_class(2).expression(), "Classification[2:2]");
        assert_eq!(RangeFilter::first_return().expression(), "ReturnNumber[1:1]");
    }

    #[test]
    fn test_range_accepts() {
        let noise = RangeFilter::exclude_class(CLASS_NOISE);
        assert!(noise.accepts(2.0));
        assert!(!noise.accepts(7.0));

        let first = RangeFilter::first_return();
        assert!(first.accepts(1.0));
        assert!(!first.accepts(2.0));
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        let outlier = Stage::RadiusOutlier(OutlierParams {
            radius: 0.0,
            min_neighbors: 4,
        });
        assert!(matches!(
            outlier.validate(),
            Err(PipelineError::InvalidParameter { stage: "filters.outlier", .. })
        ));

        let smrf = Stage::Smrf(SmrfParams {
            window: 0.5,
            ..SmrfParams::default()
        });
        assert!(smrf.validate().is_err());

        assert!(Stage::Smrf(SmrfParams::default()).validate().is_ok());
    }

    #[test]
    fn test_writer_binds_grid_and_path() {
        let grid = GridSpec::from_bounds(10.0, 20.0, 19.5, 24.5, 1.0);
        let stage = Stage::Rasterize(RasterizeSpec {
            grid,
            aggregation: Aggregation::Max,
            nodata: -9999.0,
        });
        let value = stage.to_pdal_json(Path::new("in.laz"), Path::new("out/dsm.tif"));
        assert_eq!(value["type"], "writers.gdal");
        assert_eq!(value["filename"], "out/dsm.tif");
        assert_eq!(value["output_type"], "max");
        assert_eq!(value["origin_x"], 10.0);
        assert_eq!(value["width"], 10);
        assert_eq!(value["height"], 5);
        assert_eq!(value["binmode"], true);
    }

    #[test]
    fn test_reader_declares_crs() {
        let stage = Stage::Read {
            crs: Some("EPSG:26910".to_string()),
        };
        let value = stage.to_pdal_json(Path::new("tile.laz"), Path::new("unused"));
        assert_eq!(value["filename"], "tile.laz");
        assert_eq!(value["override_srs"], "EPSG:26910");

        let bare = Stage::Read { crs: None }.to_pdal_json(Path::new("tile.laz"), Path::new("x"));
        assert!(bare.get("override_srs").is_none());
    }
}
