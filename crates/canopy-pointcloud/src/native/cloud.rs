//! In-memory point cloud.

use crate::pipeline::Bounds;
use crate::{PipelineError, Result};
use std::path::Path;

/// The point attributes the pipelines use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub return_number: u8,
    pub classification: u8,
}

/// Points plus the CRS they are expressed in.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    pub points: Vec<Point>,
    pub crs: Option<String>,
}

impl PointCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Planimetric bounds, or `None` when empty.
    pub fn bounds(&self) -> Option<Bounds> {
        let first = self.points.first()?;
        let init = Bounds {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        Some(self.points.iter().fold(init, |b, p| Bounds {
            min_x: b.min_x.min(p.x),
            min_y: b.min_y.min(p.y),
            max_x: b.max_x.max(p.x),
            max_y: b.max_y.max(p.y),
        }))
    }

    /// Transform every point into `target_crs`.
    ///
    /// Without the `proj` feature only identity transforms are possible.
    pub fn reproject(&mut self, target_crs: &str) -> Result<()> {
        let Some(source) = self.crs.clone() else {
            // Nothing declared: treat coordinates as already in the target CRS.
            tracing::warn!(target_crs, "Input CRS unknown, assuming coordinates are in target CRS");
            self.crs = Some(target_crs.to_string());
            return Ok(());
        };
        if same_crs(&source, target_crs) {
            self.crs = Some(target_crs.to_string());
            return Ok(());
        }
        transform(&mut self.points, &source, target_crs)?;
        self.crs = Some(target_crs.to_string());
        Ok(())
    }
}

/// Compare CRS identifiers ignoring case and surrounding space.
pub fn same_crs(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[cfg(feature = "proj")]
fn transform(points: &mut [Point], source: &str, target: &str) -> Result<()> {
    let unsupported = |e: &dyn std::fmt::Display| PipelineError::UnsupportedStage {
        stage: "filters.reprojection",
        reason: format!("{source} -> {target}: {e}"),
    };
    let proj = proj::Proj::new_known_crs(source, target, None).map_err(|e| unsupported(&e))?;
    for point in points.iter_mut() {
        let (x, y) = proj.convert((point.x, point.y)).map_err(|e| unsupported(&e))?;
        point.x = x;
        point.y = y;
    }
    Ok(())
}

#[cfg(not(feature = "proj"))]
fn transform(_points: &mut [Point], source: &str, target: &str) -> Result<()> {
    Err(PipelineError::UnsupportedStage {
        stage: "filters.reprojection",
        reason: format!(
            "{source} -> {target} needs the `proj` feature or the PDAL engine"
        ),
    })
}

/// Read every point of a LAS/LAZ file.
///
/// `declared_crs` overrides any CRS recorded in the file.
pub fn read_las(path: &Path, declared_crs: Option<&str>) -> Result<PointCloud> {
    let mut reader = las::Reader::from_path(path)?;
    let expected = reader.header().number_of_points();
    let mut points = Vec::with_capacity(expected as usize);
    for point in reader.points() {
        let point = point?;
        points.push(Point {
            x: point.x,
            y: point.y,
            z: point.z,
            return_number: point.return_number,
            classification: u8::from(point.classification),
        });
    }
    tracing::trace!(path = %path.display(), points = points.len(), "Read point cloud");
    Ok(PointCloud {
        points,
        crs: declared_crs.map(str::to_string),
    })
}

/// Planimetric bounds recorded in a LAS/LAZ header.
pub fn header_bounds(path: &Path) -> Result<Bounds> {
    let reader = las::Reader::from_path(path)?;
    let bounds = reader.header().bounds();
    Ok(Bounds {
        min_x: bounds.min.x,
        min_y: bounds.min.y,
        max_x: bounds.max.x,
        max_y: bounds.max.y,
    })
}
