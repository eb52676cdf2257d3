//! Aspect and slope from a 3x3 Horn gradient.
//!
//! For the window
//!
//! ```text
//! a b c
//! d e f
//! g h i
//! ```
//!
//! with row 0 to the north:
//!
//! ```text
//! dx = ((c + 2f + i) - (a + 2d + g)) / (8 * res_x)
//! dy = ((g + 2h + i) - (a + 2b + c)) / (8 * res_y)
//! ```
//!
//! Slope is `atan(sqrt(dx^2 + dy^2))` in degrees. Aspect is the compass
//! bearing of steepest descent in degrees clockwise from north, in
//! `[0, 360)`; cells with zero gradient are flat and get the nodata value.
//!
//! A nodata centre gives a nodata result. A nodata neighbour takes the
//! centre value. With edge computation enabled, a side neighbour outside the
//! grid is extrapolated through the centre (`2e - opposite`) and a corner
//! outside the grid completes the plane through the centre and its two
//! sides, so a planar surface keeps a constant gradient up to its border.
//! Without edge computation, border cells are nodata.

use crate::Result;
use canopy_common::ELEVATION_NODATA;
use canopy_raster::Raster;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which derivative to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerrainKind {
    Aspect,
    Slope,
}

impl TerrainKind {
    /// Name used by `gdaldem`.
    pub fn as_str(&self) -> &'static str {
        match self {
            TerrainKind::Aspect => "aspect",
            TerrainKind::Slope => "slope",
        }
    }
}

impl fmt::Display for TerrainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gather the 3x3 window around a valid centre cell.
///
/// Returns `None` when the window leaves the grid and edges are not computed.
fn window(dem: &Raster, row: usize, col: usize, compute_edges: bool) -> Option<[f64; 9]> {
    let (rows, cols) = dem.shape();
    let centre = dem.get(row, col) as f64;
    let mut win = [f64::NAN; 9];
    for (k, slot) in win.iter_mut().enumerate() {
        let r = row as i64 + k as i64 / 3 - 1;
        let c = col as i64 + k as i64 % 3 - 1;
        if r < 0 || c < 0 || r >= rows as i64 || c >= cols as i64 {
            if !compute_edges {
                return None;
            }
            continue;
        }
        *slot = match dem.value(r as usize, c as usize) {
            Some(v) => v as f64,
            None => centre,
        };
    }
    // Side neighbours first: through the centre from the opposite side.
    for k in [1, 3, 5, 7] {
        if win[k].is_nan() {
            let opposite = win[8 - k];
            win[k] = if opposite.is_nan() {
                centre
            } else {
                2.0 * centre - opposite
            };
        }
    }
    // Then corners, from the plane through the centre and the two sides.
    for k in [0, 2, 6, 8] {
        if win[k].is_nan() {
            let vertical = (k / 3) * 3 + 1;
            let horizontal = 3 + k % 3;
            win[k] = win[vertical] + win[horizontal] - centre;
        }
    }
    Some(win)
}

fn horn_gradient(win: &[f64; 9], res_x: f64, res_y: f64) -> (f64, f64) {
    let dx = ((win[2] + 2.0 * win[5] + win[8]) - (win[0] + 2.0 * win[3] + win[6])) / (8.0 * res_x);
    let dy = ((win[6] + 2.0 * win[7] + win[8]) - (win[0] + 2.0 * win[1] + win[2])) / (8.0 * res_y);
    (dx, dy)
}

/// Slope in degrees.
pub fn slope_degrees(dx: f64, dy: f64) -> f64 {
    dx.hypot(dy).atan().to_degrees()
}

/// Aspect in compass degrees, or `None` on flat ground.
pub fn aspect_degrees(dx: f64, dy: f64) -> Option<f64> {
    if dx == 0.0 && dy == 0.0 {
        return None;
    }
    let angle = dy.atan2(-dx).to_degrees();
    let aspect = if angle > 90.0 { 450.0 - angle } else { 90.0 - angle };
    Some(if aspect >= 360.0 { aspect - 360.0 } else { aspect })
}

/// Compute aspect or slope over a DEM.
///
/// The output shares the DEM grid and CRS and uses the elevation nodata
/// value.
pub fn terrain(dem: &Raster, kind: TerrainKind, compute_edges: bool) -> Result<Raster> {
    let (rows, cols) = dem.shape();
    let grid = *dem.grid();
    let data: Vec<f32> = (0..rows * cols)
        .into_par_iter()
        .map(|i| {
            let (row, col) = (i / cols, i % cols);
            if dem.value(row, col).is_none() {
                return ELEVATION_NODATA;
            }
            let Some(win) = window(dem, row, col, compute_edges) else {
                return ELEVATION_NODATA;
            };
            let (dx, dy) = horn_gradient(&win, grid.res_x, grid.res_y);
            match kind {
                TerrainKind::Slope => slope_degrees(dx, dy) as f32,
                TerrainKind::Aspect => aspect_degrees(dx, dy).map_or(ELEVATION_NODATA, |a| a as f32),
            }
        })
        .collect();
    Ok(dem.derive(data, Some(ELEVATION_NODATA))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use canopy_raster::GridSpec;

    fn dem(width: usize, height: usize, z: impl Fn(usize, usize) -> f32) -> Raster {
        let grid = GridSpec {
            min_x: 0.0,
            min_y: 0.0,
            width,
            height,
            res_x: 2.0,
            res_y: 2.0,
        };
        let data = (0..height)
            .flat_map(|r| (0..width).map(move |c| (r, c)))
            .map(|(r, c)| z(r, c))
            .collect();
        Raster::from_vec(grid, data, Some(ELEVATION_NODATA)).unwrap()
    }

    #[test]
    fn test_aspect_compass_directions() {
        // Rising to the east: descent faces west.
        assert_relative_eq!(aspect_degrees(1.0, 0.0).unwrap(), 270.0);
        // Falling to the east.
        assert_relative_eq!(aspect_degrees(-1.0, 0.0).unwrap(), 90.0);
        // dy > 0: values grow southward, so descent faces north.
        assert_relative_eq!(aspect_degrees(0.0, 1.0).unwrap(), 0.0);
        assert_relative_eq!(aspect_degrees(0.0, -1.0).unwrap(), 180.0);
        assert!(aspect_degrees(0.0, 0.0).is_none());
    }

    #[test]
    fn test_ramp_is_constant_including_edges() {
        // One metre rise per two-metre column, toward the east.
        let ramp = dem(6, 5, |_, c| c as f32);
        let slope = terrain(&ramp, TerrainKind::Slope, true).unwrap();
        let aspect = terrain(&ramp, TerrainKind::Aspect, true).unwrap();
        let expected = 0.5f64.atan().to_degrees() as f32;
        for &v in slope.data() {
            assert_relative_eq!(v, expected, epsilon = 1e-4);
        }
        for &v in aspect.data() {
            assert_relative_eq!(v, 270.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_edges_without_computation_are_nodata() {
        let ramp = dem(4, 4, |_, c| c as f32);
        let slope = terrain(&ramp, TerrainKind::Slope, false).unwrap();
        assert_eq!(slope.valid_count(), 4);
        assert_eq!(slope.get(0, 0), ELEVATION_NODATA);
        assert!(slope.value(1, 1).is_some());
    }

    #[test]
    fn test_flat_aspect_is_nodata_and_slope_zero() {
        let flat = dem(3, 3, |_, _| 10.0);
        let aspect = terrain(&flat, TerrainKind::Aspect, true).unwrap();
        let slope = terrain(&flat, TerrainKind::Slope, true).unwrap();
        assert_eq!(aspect.valid_count(), 0);
        assert!(slope.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_nodata_centre_and_neighbour() {
        let mut surface = dem(3, 3, |r, _| r as f32);
        surface.set(1, 1, ELEVATION_NODATA);
        let slope = terrain(&surface, TerrainKind::Slope, true).unwrap();
        assert_eq!(slope.get(1, 1), ELEVATION_NODATA);
        // Neighbours of the hole still get a value.
        assert_eq!(slope.valid_count(), 8);
    }

    #[test]
    fn test_output_keeps_grid() {
        let surface = dem(5, 3, |r, c| (r * c) as f32).with_crs("EPSG:2154");
        let aspect = terrain(&surface, TerrainKind::Aspect, true).unwrap();
        assert!(aspect.grid().same_as(surface.grid()));
        assert_eq!(aspect.crs(), Some("EPSG:2154"));
        assert_eq!(aspect.nodata(), Some(ELEVATION_NODATA));
    }
}
