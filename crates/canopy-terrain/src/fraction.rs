//! Fractional canopy cover from a moving window.
//!
//! The source raster is thresholded into a [`CoverMask`], then each cell
//! receives the percentage of covered cells in the square window centred on
//! it. Windows that cross the raster border read the mirror image of the
//! cells inside it (half-sample symmetric reflection, `d c b a | a b c d |
//! d c b a`), so every output cell sees exactly `window * window` cells and
//! the output has the shape of the source.

use crate::{Result, TerrainError};
use canopy_raster::{GridSpec, Raster};
use rayon::prelude::*;

/// Default moving-window size.
pub const DEFAULT_WINDOW: usize = 3;

/// A binary cover raster: 1 where the source exceeded the breakpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverMask {
    grid: GridSpec,
    crs: Option<String>,
    cells: Vec<u8>,
}

impl CoverMask {
    /// Grid geometry.
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Cell values (0 or 1) in row-major order.
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Number of covered cells.
    pub fn covered(&self) -> usize {
        self.cells.iter().filter(|&&c| c == 1).count()
    }

    /// Percentage of covered cells in the `window` x `window` neighbourhood
    /// of every cell.
    pub fn fraction(&self, window: usize) -> Result<Raster> {
        if window == 0 || window % 2 == 0 {
            return Err(TerrainError::InvalidWindow(window));
        }
        let (rows, cols) = self.grid.shape();
        let half = window / 2;
        let (prow, pcol) = (rows + 2 * half, cols + 2 * half);

        // Summed-area table over the reflected, padded mask.
        let mut table = vec![0u32; (prow + 1) * (pcol + 1)];
        for r in 0..prow {
            let src_r = reflect(r as i64 - half as i64, rows);
            let mut row_sum = 0u32;
            for c in 0..pcol {
                let src_c = reflect(c as i64 - half as i64, cols);
                row_sum += self.cells[src_r * cols + src_c] as u32;
                table[(r + 1) * (pcol + 1) + c + 1] = table[r * (pcol + 1) + c + 1] + row_sum;
            }
        }

        let area = (window * window) as f32;
        let at = |r: usize, c: usize| table[r * (pcol + 1) + c];
        let data: Vec<f32> = (0..rows * cols)
            .into_par_iter()
            .map(|i| {
                let (r, c) = (i / cols, i % cols);
                // Padded window spans rows r..r+window and columns c..c+window.
                let count = at(r + window, c + window) + at(r, c) - at(r, c + window) - at(r + window, c);
                count as f32 / area * 100.0
            })
            .collect();

        let raster = Raster::from_vec(self.grid, data, None)?;
        Ok(match &self.crs {
            Some(crs) => raster.with_crs(crs.clone()),
            None => raster,
        })
    }
}

/// Mirror an index into `0..len` with half-sample symmetry.
fn reflect(index: i64, len: usize) -> usize {
    let len = len as i64;
    let period = 2 * len;
    let m = index.rem_euclid(period);
    (if m < len { m } else { period - 1 - m }) as usize
}

/// Something that can be thresholded into a [`CoverMask`].
pub trait Binarize {
    fn binarize(&self, breakpoint: f32) -> CoverMask;
}

impl Binarize for Raster {
    /// 1 where the value is strictly above `breakpoint`; nodata is 0.
    fn binarize(&self, breakpoint: f32) -> CoverMask {
        let cells = self
            .data()
            .iter()
            .map(|&v| u8::from(!self.is_nodata(v) && v > breakpoint))
            .collect();
        CoverMask {
            grid: *self.grid(),
            crs: self.crs().map(str::to_string),
            cells,
        }
    }
}

impl Binarize for CoverMask {
    /// A mask is already binary: the breakpoint does not apply.
    fn binarize(&self, _breakpoint: f32) -> CoverMask {
        self.clone()
    }
}

/// Threshold a raster or mask.
pub fn binarize<T: Binarize + ?Sized>(source: &T, breakpoint: f32) -> CoverMask {
    source.binarize(breakpoint)
}

/// Fractional canopy cover of `source` in percent.
pub fn canopy_fraction(source: &Raster, breakpoint: f32, window: usize) -> Result<Raster> {
    let mask = binarize(source, breakpoint);
    tracing::debug!(
        covered = mask.covered(),
        cells = mask.cells().len(),
        window,
        "Computing canopy fraction"
    );
    mask.fraction(window)
}
