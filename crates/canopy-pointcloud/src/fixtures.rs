//! Synthetic LAS tiles for tests.
//!
//! Writes LAS 1.2 point format 0 directly, so fixtures do not depend on a
//! writer implementation.

use std::io;
use std::path::Path;

const HEADER_SIZE: u16 = 227;
const RECORD_LENGTH: u16 = 20;
const SCALE: f64 = 0.01;

/// One synthetic return.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LasPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub return_number: u8,
    pub number_of_returns: u8,
    pub classification: u8,
}

impl LasPoint {
    /// A single-return point.
    pub fn single(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            return_number: 1,
            number_of_returns: 1,
            classification: 0,
        }
    }
}

/// Encode points as a LAS 1.2 file.
pub fn las_bytes(points: &[LasPoint]) -> Vec<u8> {
    let offset = |v: f64| v.floor();
    let (ox, oy, oz) = points
        .first()
        .map_or((0.0, 0.0, 0.0), |p| (offset(p.x), offset(p.y), offset(p.z)));
    let quantize = |v: f64, o: f64| ((v - o) / SCALE).round() as i32;

    let mut min = [f64::MAX; 3];
    let mut max = [f64::MIN; 3];
    let mut by_return = [0u32; 5];
    let mut body = Vec::with_capacity(points.len() * RECORD_LENGTH as usize);
    for p in points {
        let q = [quantize(p.x, ox), quantize(p.y, oy), quantize(p.z, oz)];
        let stored = [
            q[0] as f64 * SCALE + ox,
            q[1] as f64 * SCALE + oy,
            q[2] as f64 * SCALE + oz,
        ];
        for axis in 0..3 {
            min[axis] = min[axis].min(stored[axis]);
            max[axis] = max[axis].max(stored[axis]);
        }
        if (1..=5).contains(&p.return_number) {
            by_return[p.return_number as usize - 1] += 1;
        }
        for v in q {
            body.extend_from_slice(&v.to_le_bytes());
        }
        body.extend_from_slice(&0u16.to_le_bytes());
        body.push((p.return_number & 0b111) | ((p.number_of_returns & 0b111) << 3));
        body.push(p.classification);
        body.push(0);
        body.push(0);
        body.extend_from_slice(&0u16.to_le_bytes());
    }
    if points.is_empty() {
        min = [0.0; 3];
        max = [0.0; 3];
    }

    let mut out = Vec::with_capacity(HEADER_SIZE as usize + body.len());
    out.extend_from_slice(b"LASF");
    out.extend_from_slice(&0u16.to_le_bytes()); // file source id
    out.extend_from_slice(&0u16.to_le_bytes()); // global encoding
    out.extend_from_slice(&[0u8; 16]); // project id
    out.push(1);
    out.push(2);
    let mut system = [0u8; 32];
    system[..7].copy_from_slice(b"fixture");
    out.extend_from_slice(&system);
    let mut software = [0u8; 32];
    software[..6].copy_from_slice(b"canopy");
    out.extend_from_slice(&software);
    out.extend_from_slice(&1u16.to_le_bytes()); // creation day
    out.extend_from_slice(&2024u16.to_le_bytes()); // creation year
    out.extend_from_slice(&HEADER_SIZE.to_le_bytes());
    out.extend_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // variable length records
    out.push(0); // point format
    out.extend_from_slice(&RECORD_LENGTH.to_le_bytes());
    out.extend_from_slice(&(points.len() as u32).to_le_bytes());
    for n in by_return {
        out.extend_from_slice(&n.to_le_bytes());
    }
    for _ in 0..3 {
        out.extend_from_slice(&SCALE.to_le_bytes());
    }
    for o in [ox, oy, oz] {
        out.extend_from_slice(&o.to_le_bytes());
    }
    for axis in 0..3 {
        out.extend_from_slice(&max[axis].to_le_bytes());
        out.extend_from_slice(&min[axis].to_le_bytes());
    }
    debug_assert_eq!(out.len(), HEADER_SIZE as usize);
    out.extend_from_slice(&body);
    out
}

/// Write points as a LAS 1.2 file.
pub fn write_las(path: &Path, points: &[LasPoint]) -> io::Result<()> {
    std::fs::write(path, las_bytes(points))
}

/// A square patch of gently sloping ground with conical trees.
#[derive(Debug, Clone)]
pub struct SyntheticTile {
    min_x: f64,
    min_y: f64,
    size: f64,
    spacing: f64,
    base: f64,
    trees: Vec<(f64, f64, f64, f64)>,
    extra: Vec<LasPoint>,
}

impl SyntheticTile {
    /// Ground at `base` rising 2 cm per metre eastward, sampled every half
    /// metre.
    pub fn new(min_x: f64, min_y: f64, size: f64, base: f64) -> Self {
        Self {
            min_x,
            min_y,
            size,
            spacing: 0.5,
            base,
            trees: Vec::new(),
            extra: Vec::new(),
        }
    }

    /// Add a conical crown centred on `(x, y)`.
    pub fn with_tree(mut self, x: f64, y: f64, radius: f64, height: f64) -> Self {
        self.trees.push((x, y, radius, height));
        self
    }

    /// Add an arbitrary extra point, e.g. a bird or a multipath pit.
    pub fn with_point(mut self, point: LasPoint) -> Self {
        self.extra.push(point);
        self
    }

    /// Ground elevation at a location.
    pub fn ground(&self, x: f64, _y: f64) -> f64 {
        self.base + 0.02 * (x - self.min_x)
    }

    /// All returns, in a fixed order.
    pub fn points(&self) -> Vec<LasPoint> {
        let steps = (self.size / self.spacing).round() as usize;
        let mut points = Vec::new();
        for i in 0..steps {
            for j in 0..steps {
                let x = self.min_x + (i as f64 + 0.5) * self.spacing;
                let y = self.min_y + (j as f64 + 0.5) * self.spacing;
                let ground = self.ground(x, y);
                let canopy = self
                    .trees
                    .iter()
                    .filter_map(|&(tx, ty, radius, height)| {
                        let d = ((x - tx).powi(2) + (y - ty).powi(2)).sqrt();
                        (d < radius).then(|| height * (1.0 - d / radius))
                    })
                    .reduce(f64::max);
                match canopy {
                    Some(h) if h > 0.5 => {
                        points.push(LasPoint {
                            return_number: 1,
                            number_of_returns: 2,
                            ..LasPoint::single(x, y, ground + h)
                        });
                        points.push(LasPoint {
                            return_number: 2,
                            number_of_returns: 2,
                            ..LasPoint::single(x, y, ground)
                        });
                    }
                    _ => points.push(LasPoint::single(x, y, ground)),
                }
            }
        }
        points.extend(self.extra.iter().copied());
        points
    }

    /// The tile encoded as LAS.
    pub fn to_las(&self) -> Vec<u8> {
        las_bytes(&self.points())
    }
}
