//! Binning points onto a raster grid.

use super::cloud::Point;
use crate::stage::{Aggregation, RasterizeSpec};
use crate::Result;
use canopy_raster::Raster;

/// Bin points into cells, keeping the aggregate elevation per cell.
///
/// Cells without points hold the nodata value. Points outside the grid are
/// skipped; the count of binned points is returned alongside the raster.
pub fn rasterize(points: &[Point], spec: &RasterizeSpec) -> Result<(Raster, u64)> {
    let grid = spec.grid;
    let mut cells: Vec<Option<f64>> = vec![None; grid.len()];
    let mut binned = 0u64;
    for p in points {
        let Some((row, col)) = grid.cell_of(p.x, p.y) else {
            continue;
        };
        let slot = &mut cells[grid.index(row, col)];
        *slot = Some(match (*slot, spec.aggregation) {
            (None, _) => p.z,
            (Some(v), Aggregation::Max) => v.max(p.z),
            (Some(v), Aggregation::Min) => v.min(p.z),
        });
        binned += 1;
    }
    let data = cells
        .into_iter()
        .map(|v| v.map_or(spec.nodata, |z| z as f32))
        .collect();
    Ok((Raster::from_vec(grid, data, Some(spec.nodata))?, binned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_raster::GridSpec;

    fn point(x: f64, y: f64, z: f64) -> Point {
        Point {
            x,
            y,
            z,
            return_number: 1,
            classification: 2,
        }
    }

    #[test]
    fn test_max_per_cell() {
        let grid = GridSpec::from_bounds(0.0, 0.0, 1.5, 1.5, 1.0);
        let spec = RasterizeSpec {
            grid,
            aggregation: Aggregation::Max,
            nodata: -9999.0,
        };
        let points = [
            point(0.2, 0.2, 1.0),
            point(0.7, 0.4, 3.0),
            point(1.2, 1.2, 2.0),
            point(9.0, 9.0, 50.0),
        ];
        let (raster, binned) = rasterize(&points, &spec).unwrap();
        assert_eq!(binned, 3);
        // Row 0 is north
        assert_eq!(raster.get(1, 0), 3.0);
        assert_eq!(raster.get(0, 1), 2.0);
        assert_eq!(raster.get(0, 0), -9999.0);
        assert_eq!(raster.valid_count(), 2);
    }
}
