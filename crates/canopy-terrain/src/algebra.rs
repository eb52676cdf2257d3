//! Cell-wise raster algebra.

use crate::Result;
use canopy_common::CHM_NODATA;
use canopy_raster::Raster;
use rayon::prelude::*;

/// `a - b` per cell; any cell where either input is nodata becomes `nodata`.
///
/// Both inputs must share one grid. The output keeps the grid and CRS of `a`.
pub fn difference(a: &Raster, b: &Raster, nodata: f32) -> Result<Raster> {
    a.ensure_same_grid(b)?;
    let data: Vec<f32> = a
        .data()
        .par_iter()
        .zip(b.data().par_iter())
        .map(|(&x, &y)| {
            if a.is_nodata(x) || b.is_nodata(y) {
                nodata
            } else {
                x - y
            }
        })
        .collect();
    Ok(a.derive(data, Some(nodata))?)
}

/// Canopy height: `DSM - DEM`, with zero wherever either surface is missing.
pub fn canopy_height(dsm: &Raster, dem: &Raster) -> Result<Raster> {
    difference(dsm, dem, CHM_NODATA)
}
