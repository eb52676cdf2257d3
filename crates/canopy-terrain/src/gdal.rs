//! Raster engine backed by the GDAL command-line tools.
//!
//! Differences run through `gdal_calc.py`, aspect and slope through
//! `gdaldem`. Each run is checked for exit status and a non-empty output,
//! and the output is read back to confirm it kept the input grid.

use crate::derivative::TerrainKind;
use crate::engine::RasterEngine;
use crate::{Result, TerrainError};
use canopy_common::TaskContext;
use canopy_raster::{geotiff, Raster};
use std::fs;
use std::path::Path;

/// Runs raster derivatives through installed GDAL utilities.
#[derive(Debug, Clone)]
pub struct GdalEngine {
    calc: String,
    dem: String,
}

impl Default for GdalEngine {
    fn default() -> Self {
        Self::new("gdal_calc.py", "gdaldem")
    }
}

impl GdalEngine {
    /// Use specific `gdal_calc.py` and `gdaldem` executables.
    pub fn new(calc: impl Into<String>, dem: impl Into<String>) -> Self {
        Self {
            calc: calc.into(),
            dem: dem.into(),
        }
    }

    /// Arguments for `gdal_calc.py` computing `A - B`.
    pub fn difference_args(a: &Path, b: &Path, nodata: f32, output: &Path) -> Vec<String> {
        vec![
            "-A".to_string(),
            a.display().to_string(),
            "-B".to_string(),
            b.display().to_string(),
            format!("--outfile={}", output.display()),
            "--calc=A-B".to_string(),
            format!("--NoDataValue={nodata}"),
            "--type=Float32".to_string(),
            "--overwrite".to_string(),
            "--quiet".to_string(),
        ]
    }

    /// Arguments for `gdaldem`.
    pub fn terrain_args(
        dem: &Path,
        kind: TerrainKind,
        compute_edges: bool,
        output: &Path,
    ) -> Vec<String> {
        let mut args = vec![
            kind.as_str().to_string(),
            dem.display().to_string(),
            output.display().to_string(),
            "-of".to_string(),
            "GTiff".to_string(),
        ];
        if compute_edges {
            args.push("-compute_edges".to_string());
        }
        args.push("-q".to_string());
        args
    }

    fn prepare(output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        if output.exists() {
            fs::remove_file(output)?;
        }
        Ok(())
    }

    fn read_back(source: &Path, output: &Path) -> Result<Raster> {
        let source = geotiff::read(source)?;
        let out = geotiff::read(output)?;
        if !out.grid().same_as(source.grid()) {
            return Err(TerrainError::UnexpectedOutput(format!(
                "{} does not match the grid of its input",
                output.display()
            )));
        }
        Ok(out)
    }
}

impl RasterEngine for GdalEngine {
    fn name(&self) -> &'static str {
        "gdal"
    }

    fn difference(
        &self,
        a: &Path,
        b: &Path,
        nodata: f32,
        output: &Path,
        ctx: &TaskContext,
    ) -> Result<Raster> {
        Self::prepare(output)?;
        ctx.tool(&self.calc)
            .args(Self::difference_args(a, b, nodata, output))
            .expect_output(output)
            .run()?;
        Self::read_back(a, output)
    }

    fn terrain(
        &self,
        dem: &Path,
        kind: TerrainKind,
        compute_edges: bool,
        output: &Path,
        ctx: &TaskContext,
    ) -> Result<Raster> {
        Self::prepare(output)?;
        ctx.tool(&self.dem)
            .args(Self::terrain_args(dem, kind, compute_edges, output))
            .expect_output(output)
            .run()?;
        Self::read_back(dem, output)
    }
}
