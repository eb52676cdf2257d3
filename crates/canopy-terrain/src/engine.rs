//! The raster engine seam and its in-process implementation.

use crate::derivative::{self, TerrainKind};
use crate::{algebra, Result};
use canopy_common::TaskContext;
use canopy_raster::{geotiff, Raster};
use std::fmt::Debug;
use std::path::Path;

/// Computes derivative rasters from rasters on disk.
///
/// Every operation writes its output file and returns the raster it wrote.
pub trait RasterEngine: Send + Sync + Debug {
    /// Engine name used in logs and reports.
    fn name(&self) -> &'static str;

    /// `a - b` per cell, `nodata` where either input is nodata.
    fn difference(
        &self,
        a: &Path,
        b: &Path,
        nodata: f32,
        output: &Path,
        ctx: &TaskContext,
    ) -> Result<Raster>;

    /// Aspect or slope of an elevation raster.
    fn terrain(
        &self,
        dem: &Path,
        kind: TerrainKind,
        compute_edges: bool,
        output: &Path,
        ctx: &TaskContext,
    ) -> Result<Raster>;
}

/// Computes derivatives in-process, parallel over cells with rayon.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeRasterEngine;

impl NativeRasterEngine {
    pub fn new() -> Self {
        Self
    }
}

impl RasterEngine for NativeRasterEngine {
    fn name(&self) -> &'static str {
        "native"
    }

    fn difference(
        &self,
        a: &Path,
        b: &Path,
        nodata: f32,
        output: &Path,
        ctx: &TaskContext,
    ) -> Result<Raster> {
        ctx.check()?;
        let a = geotiff::read(a)?;
        let b = geotiff::read(b)?;
        let out = algebra::difference(&a, &b, nodata)?;
        geotiff::write(output, &out)?;
        Ok(out)
    }

    fn terrain(
        &self,
        dem: &Path,
        kind: TerrainKind,
        compute_edges: bool,
        output: &Path,
        ctx: &TaskContext,
    ) -> Result<Raster> {
        ctx.check()?;
        let dem = geotiff::read(dem)?;
        let out = derivative::terrain(&dem, kind, compute_edges)?;
        geotiff::write(output, &out)?;
        Ok(out)
    }
}
