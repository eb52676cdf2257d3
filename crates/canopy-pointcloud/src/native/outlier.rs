//! Radius outlier detection.

use super::cloud::Point;
use crate::stage::{OutlierParams, CLASS_NOISE};
use std::collections::HashMap;

type Key = (i64, i64, i64);

fn key(p: &Point, cell: f64) -> Key {
    (
        (p.x / cell).floor() as i64,
        (p.y / cell).floor() as i64,
        (p.z / cell).floor() as i64,
    )
}

/// Mark points with fewer than `min_neighbors` points (themselves included)
/// within `radius` as noise. Returns the number of points marked.
///
/// Points are bucketed in a 3D hash with cells one radius wide, so every
/// neighbour lies in the 27 buckets around a point.
pub fn mark_radius_outliers(points: &mut [Point], params: &OutlierParams) -> usize {
    let cell = params.radius;
    let radius_sq = params.radius * params.radius;

    let mut buckets: HashMap<Key, Vec<usize>> = HashMap::new();
    for (i, p) in points.iter().enumerate() {
        buckets.entry(key(p, cell)).or_default().push(i);
    }

    let mut outliers = Vec::new();
    for (i, p) in points.iter().enumerate() {
        let (kx, ky, kz) = key(p, cell);
        let mut count = 0usize;
        'search: for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(bucket) = buckets.get(&(kx + dx, ky + dy, kz + dz)) else {
                        continue;
                    };
                    for &j in bucket {
                        let q = &points[j];
                        let d = (p.x - q.x).powi(2) + (p.y - q.y).powi(2) + (p.z - q.z).powi(2);
                        if d <= radius_sq {
                            count += 1;
                            if count >= params.min_neighbors {
                                break 'search;
                            }
                        }
                    }
                }
            }
        }
        if count < params.min_neighbors {
            outliers.push(i);
        }
    }

    for &i in &outliers {
        points[i].classification = CLASS_NOISE;
    }
    outliers.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f64, y: f64, z: f64) -> Point {
        Point {
            x,
            y,
            z,
            return_number: 1,
            classification: 1,
        }
    }

    #[test]
    fn test_isolated_point_is_noise() {
        let mut points = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                points.push(point(i as f64 * 0.5, j as f64 * 0.5, 10.0));
            }
        }
        points.push(point(1.0, 1.0, 40.0));

        let marked = mark_radius_outliers(
            &mut points,
            &OutlierParams {
                radius: 1.0,
                min_neighbors: 3,
            },
        );
        assert_eq!(marked, 1);
        assert_eq!(points.last().unwrap().classification, CLASS_NOISE);
        assert!(points[..25].iter().all(|p| p.classification == 1));
    }

    #[test]
    fn test_neighbours_across_bucket_edges() {
        // Straddles the bucket boundary at x = 1.0
        let mut points = vec![point(0.95, 0.0, 0.0), point(1.05, 0.0, 0.0)];
        let marked = mark_radius_outliers(
            &mut points,
            &OutlierParams {
                radius: 1.0,
                min_neighbors: 2,
            },
        );
        assert_eq!(marked, 0);
    }

    #[test]
    fn test_min_neighbors_counts_self() {
        let mut points = vec![point(0.0, 0.0, 0.0)];
        let marked = mark_radius_outliers(
            &mut points,
            &OutlierParams {
                radius: 1.0,
                min_neighbors: 1,
            },
        );
        assert_eq!(marked, 0);
    }
}
