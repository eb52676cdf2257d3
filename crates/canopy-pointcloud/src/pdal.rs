//! Pipeline engine backed by the `pdal` command-line tool.
//!
//! Pipelines are sent to `pdal pipeline --stdin` as JSON. Every run goes
//! through [`canopy_common::ToolCommand`], so a nonzero exit, a missing or
//! empty raster, a deadline or a cancellation all surface as errors. The
//! written raster is read back to confirm it sits on the requested grid and
//! holds at least one value.

use crate::pipeline::{Bounds, Pipeline, PipelineReport, PointCloudEngine};
use crate::{PipelineError, Result};
use canopy_common::TaskContext;
use canopy_raster::geotiff;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Runs pipelines through an installed PDAL.
#[derive(Debug, Clone)]
pub struct PdalEngine {
    program: String,
}

impl Default for PdalEngine {
    fn default() -> Self {
        Self::new("pdal")
    }
}

impl PdalEngine {
    /// Use a specific `pdal` executable.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The executable this engine invokes.
    pub fn program(&self) -> &str {
        &self.program
    }

    fn survey_path(input: &Path) -> PathBuf {
        let mut name = input.file_name().unwrap_or_default().to_os_string();
        name.push(".survey.json");
        input.with_file_name(name)
    }
}

/// Bounds from `pdal info --summary` output.
pub fn parse_summary_bounds(text: &str) -> Result<Bounds> {
    let value: Value = serde_json::from_str(text)?;
    let bounds = &value["summary"]["bounds"];
    let get = |key: &str| {
        bounds[key].as_f64().ok_or_else(|| {
            PipelineError::UnexpectedOutput(format!("summary has no bounds.{key}"))
        })
    };
    Ok(Bounds {
        min_x: get("minx")?,
        min_y: get("miny")?,
        max_x: get("maxx")?,
        max_y: get("maxy")?,
    })
}

/// Bounds from pipeline metadata holding a `filters.stats` stage.
pub fn parse_stats_bounds(text: &str) -> Result<Bounds> {
    let value: Value = serde_json::from_str(text)?;
    let statistics = value["stages"]
        .as_object()
        .and_then(|stages| {
            stages
                .iter()
                .find(|(name, _)| name.starts_with("filters.stats"))
                .map(|(_, stage)| &stage["statistic"])
        })
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::UnexpectedOutput("metadata has no statistics".into()))?;
    let range = |dimension: &str| {
        statistics
            .iter()
            .find(|s| s["name"] == dimension)
            .and_then(|s| Some((s["minimum"].as_f64()?, s["maximum"].as_f64()?)))
            .ok_or_else(|| {
                PipelineError::UnexpectedOutput(format!("no statistics for {dimension}"))
            })
    };
    let (min_x, max_x) = range("X")?;
    let (min_y, max_y) = range("Y")?;
    Ok(Bounds {
        min_x,
        min_y,
        max_x,
        max_y,
    })
}

impl PointCloudEngine for PdalEngine {
    fn name(&self) -> &'static str {
        "pdal"
    }

    fn survey_bounds(
        &self,
        input: &Path,
        input_crs: Option<&str>,
        target_crs: Option<&str>,
        ctx: &TaskContext,
    ) -> Result<Bounds> {
        let Some(target) = target_crs else {
            let output = ctx
                .tool(&self.program)
                .arg("info")
                .arg("--summary")
                .arg(input)
                .run()?;
            return parse_summary_bounds(&output.stdout);
        };

        let mut reader = json!({ "type": "readers.las", "filename": input.to_string_lossy() });
        if let Some(crs) = input_crs {
            reader["override_srs"] = json!(crs);
        }
        let document = json!({
            "pipeline": [
                reader,
                { "type": "filters.reprojection", "out_srs": target },
                { "type": "filters.stats", "dimensions": "X,Y" }
            ]
        });
        let metadata = Self::survey_path(input);
        ctx.tool(&self.program)
            .args(["pipeline", "--stdin", "--metadata"])
            .arg(&metadata)
            .stdin(serde_json::to_vec(&document)?)
            .expect_output(&metadata)
            .run()?;
        let text = fs::read_to_string(&metadata)?;
        fs::remove_file(&metadata)?;
        parse_stats_bounds(&text)
    }

    fn execute(
        &self,
        pipeline: &Pipeline,
        input: &Path,
        output: &Path,
        ctx: &TaskContext,
    ) -> Result<PipelineReport> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        if output.exists() {
            fs::remove_file(output)?;
        }
        let document = pipeline.to_pdal_json(input, output);
        tracing::trace!(pipeline = pipeline.name(), %document, "PDAL pipeline");

        ctx.tool(&self.program)
            .args(["pipeline", "--stdin"])
            .stdin(serde_json::to_vec(&document)?)
            .expect_output(output)
            .run()?;

        let raster = geotiff::read(output)?;
        let expected = pipeline.raster_spec().grid;
        if !raster.grid().same_as(&expected) {
            return Err(PipelineError::UnexpectedOutput(format!(
                "{} is on grid {:?}, expected {:?}",
                output.display(),
                raster.grid(),
                expected
            )));
        }
        let cells_filled = raster.valid_count();
        if cells_filled == 0 {
            return Err(PipelineError::EmptyRaster {
                path: output.to_path_buf(),
            });
        }
        Ok(PipelineReport {
            pipeline: pipeline.name().to_string(),
            engine: self.name(),
            points_read: None,
            points_written: None,
            cells_filled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_summary_bounds() {
        let text = r#"{
            "filename": "tile.laz",
            "pdal_version": "2.6.0",
            "summary": {
                "bounds": {"maxx": 510.5, "maxy": 4010.0, "maxz": 80.0,
                           "minx": 500.0, "miny": 4000.25, "minz": 10.0},
                "num_points": 1200
            }
        }"#;
        let b = parse_summary_bounds(text).unwrap();
        assert_eq!((b.min_x, b.min_y, b.max_x, b.max_y), (500.0, 4000.25, 510.5, 4010.0));
    }

    #[test]
    fn test_parse_summary_rejects_missing_bounds() {
        assert!(matches!(
            parse_summary_bounds(r#"{"summary": {}}"#),
            Err(PipelineError::UnexpectedOutput(_))
        ));
        assert!(matches!(parse_summary_bounds("not json"), Err(PipelineError::Json(_))));
    }

    #[test]
    fn test_parse_stats_bounds() {
        let text = r#"{
            "stages": {
                "readers.las": {"count": 10},
                "filters.stats": {
                    "statistic": [
                        {"name": "X", "minimum": 1.5, "maximum": 9.5},
                        {"name": "Y", "minimum": -3.0, "maximum": 4.0}
                    ]
                }
            }
        }"#;
        let b = parse_stats_bounds(text).unwrap();
        assert_eq!((b.min_x, b.min_y, b.max_x, b.max_y), (1.5, -3.0, 9.5, 4.0));
    }

    #[test]
    fn test_survey_path_sits_beside_input() {
        let path = PdalEngine::survey_path(Path::new("/scratch/t1/raw/t1.laz"));
        assert_eq!(path, Path::new("/scratch/t1/raw/t1.laz.survey.json"));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_tool_is_reported() {
        use crate::presets::{dsm_pipeline, PipelineParams};
        use canopy_raster::GridSpec;

        let dir = tempfile::tempdir().unwrap();
        let grid = GridSpec::from_bounds(0.0, 0.0, 4.0, 4.0, 1.0);
        let pipeline = dsm_pipeline(&PipelineParams::default(), grid).unwrap();
        let engine = PdalEngine::new("false");
        let result = engine.execute(
            &pipeline,
            &dir.path().join("in.laz"),
            &dir.path().join("dsm/out.tif"),
            &TaskContext::unbounded(),
        );
        assert!(matches!(result, Err(PipelineError::Tool(_))));
    }
}
