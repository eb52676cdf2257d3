//! Single-band raster representation.

use crate::{GridSpec, RasterError, Result};

/// Tolerance when matching a cell against the nodata sentinel.
const NODATA_EPSILON: f32 = 0.001;

/// A single-band `f32` raster on a [`GridSpec`].
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    /// Grid geometry.
    grid: GridSpec,
    /// Cell values in row-major order (north to south, west to east).
    data: Vec<f32>,
    /// Coordinate reference system, e.g. `EPSG:2154`.
    crs: Option<String>,
    /// Nodata sentinel (cells equal to this are treated as missing).
    nodata: Option<f32>,
}

impl Raster {
    /// Create a raster with every cell set to `value`.
    pub fn filled(grid: GridSpec, value: f32, nodata: Option<f32>) -> Self {
        Self {
            data: vec![value; grid.len()],
            grid,
            crs: None,
            nodata,
        }
    }

    /// Create a raster from row-major cell values.
    pub fn from_vec(grid: GridSpec, data: Vec<f32>, nodata: Option<f32>) -> Result<Self> {
        if data.len() != grid.len() {
            return Err(RasterError::ShapeMismatch {
                len: data.len(),
                width: grid.width,
                height: grid.height,
            });
        }
        Ok(Self {
            grid,
            data,
            crs: None,
            nodata,
        })
    }

    /// Attach a coordinate reference system.
    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    /// Copy the CRS of another raster.
    pub fn with_crs_of(mut self, other: &Raster) -> Self {
        self.crs = other.crs.clone();
        self
    }

    /// A raster on the same grid and CRS as `self`, holding `data`.
    pub fn derive(&self, data: Vec<f32>, nodata: Option<f32>) -> Result<Raster> {
        Ok(Raster::from_vec(self.grid, data, nodata)?.with_crs_of(self))
    }

    /// Grid geometry.
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.grid.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.grid.height
    }

    /// Shape as (rows, columns).
    pub fn shape(&self) -> (usize, usize) {
        self.grid.shape()
    }

    /// Coordinate reference system.
    pub fn crs(&self) -> Option<&str> {
        self.crs.as_deref()
    }

    /// Nodata sentinel.
    pub fn nodata(&self) -> Option<f32> {
        self.nodata
    }

    /// Cell values in row-major order.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable cell values in row-major order.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Iterate over rows, north to south.
    pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
        self.data.chunks_exact(self.grid.width)
    }

    /// Raw value of a cell.
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[self.grid.index(row, col)]
    }

    /// Set the raw value of a cell.
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        let idx = self.grid.index(row, col);
        self.data[idx] = value;
    }

    /// Value of a cell, or `None` if it is nodata.
    pub fn value(&self, row: usize, col: usize) -> Option<f32> {
        let v = self.get(row, col);
        (!self.is_nodata(v)).then_some(v)
    }

    /// Check whether a value is the nodata sentinel (NaN always is).
    pub fn is_nodata(&self, value: f32) -> bool {
        if value.is_nan() {
            return true;
        }
        self.nodata
            .is_some_and(|nodata| (value - nodata).abs() < NODATA_EPSILON)
    }

    /// Number of cells holding a valid measurement.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !self.is_nodata(**v)).count()
    }

    /// Fail unless `other` lies on exactly the same grid.
    pub fn ensure_same_grid(&self, other: &Raster) -> Result<()> {
        if self.grid.same_as(&other.grid) {
            Ok(())
        } else {
            Err(RasterError::GridMismatch(format!(
                "{}x{} at ({}, {}) res {} vs {}x{} at ({}, {}) res {}",
                self.grid.width,
                self.grid.height,
                self.grid.min_x,
                self.grid.min_y,
                self.grid.res_x,
                other.grid.width,
                other.grid.height,
                other.grid.min_x,
                other.grid.min_y,
                other.grid.res_x,
            )))
        }
    }
}
