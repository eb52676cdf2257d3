//! Simple morphological filter (SMRF) ground classification.
//!
//! Follows Pingel, Clarke and McBride (2013):
//! 1. Build a minimum-elevation surface on a working grid and fill its holes.
//! 2. Apply openings of growing radius; a cell whose elevation drops by more
//!    than `slope * radius * cell` between consecutive openings is an object.
//! 3. Rebuild the surface from non-object cells only and fill again.
//! 4. A point is ground when it lies within `threshold + scalar * gradient`
//!    of that surface.

use super::cloud::Point;
use crate::stage::{SmrfParams, CLASS_GROUND, CLASS_NOISE};

/// A dense working grid with `NaN` for empty cells.
#[derive(Debug, Clone)]
struct Surface {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Surface {
    fn empty(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![f64::NAN; rows * cols],
        }
    }

    fn at(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    /// Replace `NaN` cells with the mean of their filled 8-neighbours,
    /// growing inward from the data. Returns false if there is no data.
    fn fill_holes(&mut self) -> bool {
        if self.data.iter().all(|v| v.is_nan()) {
            return false;
        }
        loop {
            let snapshot = self.data.clone();
            let mut remaining = false;
            for row in 0..self.rows {
                for col in 0..self.cols {
                    let i = row * self.cols + col;
                    if !snapshot[i].is_nan() {
                        continue;
                    }
                    let (mut sum, mut n) = (0.0, 0usize);
                    for (r, c) in neighbours8(row, col, self.rows, self.cols) {
                        let v = snapshot[r * self.cols + c];
                        if !v.is_nan() {
                            sum += v;
                            n += 1;
                        }
                    }
                    if n > 0 {
                        self.data[i] = sum / n as f64;
                    } else {
                        remaining = true;
                    }
                }
            }
            if !remaining {
                return true;
            }
        }
    }

    /// One step of a 4-connected min or max filter.
    fn cross_step(&self, take: fn(f64, f64) -> f64) -> Surface {
        let mut out = self.clone();
        for row in 0..self.rows {
            for col in 0..self.cols {
                let mut v = self.at(row, col);
                if row > 0 {
                    v = take(v, self.at(row - 1, col));
                }
                if row + 1 < self.rows {
                    v = take(v, self.at(row + 1, col));
                }
                if col > 0 {
                    v = take(v, self.at(row, col - 1));
                }
                if col + 1 < self.cols {
                    v = take(v, self.at(row, col + 1));
                }
                out.data[row * self.cols + col] = v;
            }
        }
        out
    }

    /// Morphological opening with a diamond of the given radius in cells.
    fn open(&self, radius: usize) -> Surface {
        let mut s = self.clone();
        for _ in 0..radius {
            s = s.cross_step(f64::min);
        }
        for _ in 0..radius {
            s = s.cross_step(f64::max);
        }
        s
    }

    /// Gradient magnitude per cell (rise over run).
    fn gradient(&self, cell: f64) -> Vec<f64> {
        let mut out = vec![0.0; self.data.len()];
        for row in 0..self.rows {
            for col in 0..self.cols {
                let (c0, c1) = (col.saturating_sub(1), (col + 1).min(self.cols - 1));
                let (r0, r1) = (row.saturating_sub(1), (row + 1).min(self.rows - 1));
                let gx = if c1 > c0 {
                    (self.at(row, c1) - self.at(row, c0)) / ((c1 - c0) as f64 * cell)
                } else {
                    0.0
                };
                let gy = if r1 > r0 {
                    (self.at(r1, col) - self.at(r0, col)) / ((r1 - r0) as f64 * cell)
                } else {
                    0.0
                };
                out[row * self.cols + col] = gx.hypot(gy);
            }
        }
        out
    }

    /// Bilinear interpolation between cell centres, clamped at the edges.
    fn sample(&self, fr: f64, fc: f64) -> f64 {
        let fr = fr.clamp(0.0, (self.rows - 1) as f64);
        let fc = fc.clamp(0.0, (self.cols - 1) as f64);
        let (r0, c0) = (fr.floor() as usize, fc.floor() as usize);
        let (r1, c1) = ((r0 + 1).min(self.rows - 1), (c0 + 1).min(self.cols - 1));
        let (tr, tc) = (fr - r0 as f64, fc - c0 as f64);
        let top = self.at(r0, c0) * (1.0 - tc) + self.at(r0, c1) * tc;
        let bottom = self.at(r1, c0) * (1.0 - tc) + self.at(r1, c1) * tc;
        top * (1.0 - tr) + bottom * tr
    }
}

fn neighbours8(
    row: usize,
    col: usize,
    rows: usize,
    cols: usize,
) -> impl Iterator<Item = (usize, usize)> {
    (-1i64..=1)
        .flat_map(|dr| (-1i64..=1).map(move |dc| (dr, dc)))
        .filter(|&d| d != (0, 0))
        .filter_map(move |(dr, dc)| {
            let r = row as i64 + dr;
            let c = col as i64 + dc;
            (r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols)
                .then_some((r as usize, c as usize))
        })
}

/// Classify ground points in place, skipping points marked as noise.
/// Returns the number of ground points.
pub fn classify_ground(points: &mut [Point], params: &SmrfParams) -> usize {
    let candidates: Vec<usize> = (0..points.len())
        .filter(|&i| points[i].classification != CLASS_NOISE)
        .collect();
    let Some(&first) = candidates.first() else {
        return 0;
    };

    let (mut min_x, mut min_y, mut max_x, mut max_y) =
        (points[first].x, points[first].y, points[first].x, points[first].y);
    for &i in &candidates {
        let p = &points[i];
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    let cell = params.cell;
    let cols = ((max_x - min_x) / cell).floor() as usize + 1;
    let rows = ((max_y - min_y) / cell).floor() as usize + 1;
    let cell_of = |p: &Point| {
        let col = (((p.x - min_x) / cell).floor() as usize).min(cols - 1);
        let row = (((p.y - min_y) / cell).floor() as usize).min(rows - 1);
        (row, col)
    };

    let mut zmin = Surface::empty(rows, cols);
    for &i in &candidates {
        let (row, col) = cell_of(&points[i]);
        let slot = &mut zmin.data[row * cols + col];
        if slot.is_nan() || points[i].z < *slot {
            *slot = points[i].z;
        }
    }
    let empty: Vec<bool> = zmin.data.iter().map(|v| v.is_nan()).collect();
    let mut filled = zmin.clone();
    filled.fill_holes();

    let max_radius = (params.window / cell).ceil() as usize;
    let mut objects = vec![false; filled.data.len()];
    let mut last = filled;
    for radius in 1..=max_radius {
        let height = params.slope * radius as f64 * cell;
        let this = last.open(radius);
        for (i, object) in objects.iter_mut().enumerate() {
            if last.data[i] - this.data[i] > height {
                *object = true;
            }
        }
        last = this;
    }

    let mut provisional = Surface::empty(rows, cols);
    for i in 0..provisional.data.len() {
        if !objects[i] && !empty[i] {
            provisional.data[i] = zmin.data[i];
        }
    }
    if !provisional.fill_holes() {
        return 0;
    }
    let gradient = provisional.gradient(cell);

    let mut ground = 0;
    for &i in &candidates {
        let p = &points[i];
        let (row, col) = cell_of(p);
        let surface = provisional.sample((p.y - min_y) / cell - 0.5, (p.x - min_x) / cell - 0.5);
        let tolerance = params.threshold + params.scalar * gradient[row * cols + col];
        if (p.z - surface).abs() <= tolerance {
            points[i].classification = CLASS_GROUND;
            ground += 1;
        }
    }
    ground
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::CLASS_UNCLASSIFIED;

    fn point(x: f64, y: f64, z: f64) -> Point {
        Point {
            x,
            y,
            z,
            return_number: 1,
            classification: CLASS_UNCLASSIFIED,
        }
    }

    /// Points every half metre over a 30 m square.
    fn terrain(z: impl Fn(f64, f64) -> f64) -> Vec<Point> {
        let mut points = Vec::new();
        for i in 0..60 {
            for j in 0..60 {
                let (x, y) = (0.25 + i as f64 * 0.5, 0.25 + j as f64 * 0.5);
                points.push(point(x, y, z(x, y)));
            }
        }
        points
    }

    #[test]
    fn test_block_is_not_ground() {
        let in_block = |x: f64, y: f64| (12.0..18.0).contains(&x) && (12.0..18.0).contains(&y);
        let mut points = terrain(|x, y| if in_block(x, y) { 110.0 } else { 100.0 });

        let ground = classify_ground(&mut points, &SmrfParams::default());

        let block = points.iter().filter(|p| in_block(p.x, p.y)).count();
        assert_eq!(ground, points.len() - block);
        for p in &points {
            let expected = if in_block(p.x, p.y) {
                CLASS_UNCLASSIFIED
            } else {
                CLASS_GROUND
            };
            assert_eq!(p.classification, expected, "point at ({}, {})", p.x, p.y);
        }
    }

    #[test]
    fn test_gentle_ramp_is_ground() {
        let mut points = terrain(|x, _| 50.0 + 0.1 * x);
        let ground = classify_ground(&mut points, &SmrfParams::default());
        assert_eq!(ground, points.len());
    }

    #[test]
    fn test_noise_is_ignored() {
        let mut points = terrain(|_, _| 100.0);
        points.push(Point {
            classification: CLASS_NOISE,
            ..point(15.1, 15.1, 20.0)
        });
        let ground = classify_ground(&mut points, &SmrfParams::default());
        assert_eq!(ground, points.len() - 1);
        assert_eq!(points.last().unwrap().classification, CLASS_NOISE);
    }

    #[test]
    fn test_opening_removes_narrow_peak() {
        let mut surface = Surface::empty(5, 5);
        surface.data.iter_mut().for_each(|v| *v = 0.0);
        surface.data[12] = 5.0;
        let opened = surface.open(1);
        assert!(opened.data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_fill_holes() {
        let mut surface = Surface::empty(3, 3);
        surface.data[0] = 2.0;
        assert!(surface.fill_holes());
        assert!(surface.data.iter().all(|&v| v == 2.0));
        assert!(!Surface::empty(2, 2).fill_holes());
    }
}
