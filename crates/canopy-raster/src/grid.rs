//! Grid geometry shared by co-registered rasters.

use crate::{RasterError, Result};
use serde::{Deserialize, Serialize};

/// Tolerance when comparing grid origins and cell sizes.
const GRID_EPSILON: f64 = 1e-9;

/// Geometry of a north-up raster grid.
///
/// The origin is the lower-left corner, matching how point-cloud writers
/// describe an output grid. Row 0 is the northernmost row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// West edge.
    pub min_x: f64,
    /// South edge.
    pub min_y: f64,
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
    /// Cell size along x.
    pub res_x: f64,
    /// Cell size along y (positive).
    pub res_y: f64,
}

impl GridSpec {
    /// Build the grid covering a bounding box at a square cell size.
    ///
    /// A point lying exactly on the east or north bound still falls inside
    /// the last column or row.
    pub fn from_bounds(min_x: f64, min_y: f64, max_x: f64, max_y: f64, resolution: f64) -> Self {
        let width = ((max_x - min_x) / resolution).floor().max(0.0) as usize + 1;
        let height = ((max_y - min_y) / resolution).floor().max(0.0) as usize + 1;
        Self {
            min_x,
            min_y,
            width,
            height,
            res_x: resolution,
            res_y: resolution,
        }
    }

    /// Reject grids with no cells or a non-positive cell size.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RasterError::InvalidGrid(format!(
                "{}x{} grid has no cells",
                self.width, self.height
            )));
        }
        if !(self.res_x > 0.0 && self.res_y > 0.0) {
            return Err(RasterError::InvalidGrid(format!(
                "cell size ({}, {}) must be positive",
                self.res_x, self.res_y
            )));
        }
        Ok(())
    }

    /// East edge.
    pub fn max_x(&self) -> f64 {
        self.min_x + self.width as f64 * self.res_x
    }

    /// North edge.
    pub fn max_y(&self) -> f64 {
        self.min_y + self.height as f64 * self.res_y
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    /// Grid shape as (rows, columns).
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// GDAL-style affine geotransform of the upper-left corner.
    pub fn geotransform(&self) -> [f64; 6] {
        [self.min_x, self.res_x, 0.0, self.max_y(), 0.0, -self.res_y]
    }

    /// Row-major index of a cell.
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.width + col
    }

    /// Cell containing a coordinate, or `None` outside the grid.
    pub fn cell_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let fx = ((x - self.min_x) / self.res_x).floor();
        let fy = ((y - self.min_y) / self.res_y).floor();
        if fx < 0.0 || fy < 0.0 {
            return None;
        }
        let col = fx as usize;
        let from_bottom = fy as usize;
        if col >= self.width || from_bottom >= self.height {
            return None;
        }
        Some((self.height - 1 - from_bottom, col))
    }

    /// Coordinate of a cell centre.
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let x = self.min_x + (col as f64 + 0.5) * self.res_x;
        let y = self.max_y() - (row as f64 + 0.5) * self.res_y;
        (x, y)
    }

    /// Check that two grids have the same extent and resolution.
    pub fn same_as(&self, other: &GridSpec) -> bool {
        self.width == other.width
            && self.height == other.height
            && (self.min_x - other.min_x).abs() < GRID_EPSILON
            && (self.min_y - other.min_y).abs() < GRID_EPSILON
            && (self.res_x - other.res_x).abs() < GRID_EPSILON
            && (self.res_y - other.res_y).abs() < GRID_EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bounds_includes_far_edges() {
        let grid = GridSpec::from_bounds(0.0, 0.0, 10.0, 5.0, 1.0);
        assert_eq!(grid.shape(), (6, 11));
        assert_eq!(grid.cell_of(10.0, 5.0), Some((0, 10)));
        assert_eq!(grid.cell_of(0.0, 0.0), Some((5, 0)));
        assert_eq!(grid.cell_of(-0.1, 0.0), None);
        assert_eq!(grid.cell_of(11.5, 0.0), None);
    }

    #[test]
    fn test_cell_center_round_trip() {
        let grid = GridSpec::from_bounds(100.0, 200.0, 110.0, 210.0, 2.0);
        for (row, col) in [(0, 0), (3, 4), (grid.height - 1, grid.width - 1)] {
            let (x, y) = grid.cell_center(row, col);
            assert_eq!(grid.cell_of(x, y), Some((row, col)));
        }
    }

    #[test]
    fn test_geotransform_upper_left() {
        let grid = GridSpec::from_bounds(0.0, 0.0, 3.5, 1.5, 0.5);
        let gt = grid.geotransform();
        assert_eq!(gt[0], 0.0);
        assert_eq!(gt[3], grid.max_y());
        assert_eq!(gt[5], -0.5);
    }

    #[test]
    fn test_validate_rejects_bad_resolution() {
        let mut grid = GridSpec::from_bounds(0.0, 0.0, 1.0, 1.0, 1.0);
        assert!(grid.validate().is_ok());
        grid.res_x = 0.0;
        assert!(grid.validate().is_err());
    }
}
