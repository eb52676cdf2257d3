//! Extended local minimum (ELM) low-noise detection.

use super::cloud::Point;
use crate::stage::{ElmParams, CLASS_NOISE};
use std::collections::BTreeMap;

/// Mark points lying far below their surroundings as noise. Returns the
/// number of points marked.
///
/// Points are binned into square cells. Within each cell, points are visited
/// from the lowest up; a point is noise while it lies more than `threshold`
/// below the lowest point of every neighbouring cell. The first point that
/// is not ends the scan for that cell. Neighbour minima are taken before any
/// point is marked, so the result does not depend on visiting order.
pub fn mark_low_noise(points: &mut [Point], params: &ElmParams) -> usize {
    let cell = params.cell;
    let mut cells: BTreeMap<(i64, i64), Vec<usize>> = BTreeMap::new();
    for (i, p) in points.iter().enumerate() {
        if p.classification == CLASS_NOISE {
            continue;
        }
        let key = ((p.x / cell).floor() as i64, (p.y / cell).floor() as i64);
        cells.entry(key).or_default().push(i);
    }

    for members in cells.values_mut() {
        members.sort_by(|&a, &b| points[a].z.total_cmp(&points[b].z).then(a.cmp(&b)));
    }
    let lowest: BTreeMap<(i64, i64), f64> = cells
        .iter()
        .map(|(&k, members)| (k, points[members[0]].z))
        .collect();

    let mut marked = 0;
    for (&(cx, cy), members) in &cells {
        let neighbour_min = (-1..=1)
            .flat_map(|dx| (-1..=1).map(move |dy| (dx, dy)))
            .filter(|&offset| offset != (0, 0))
            .filter_map(|(dx, dy)| lowest.get(&(cx + dx, cy + dy)).copied())
            .reduce(f64::min);
        let Some(neighbour_min) = neighbour_min else {
            continue;
        };
        for &i in members {
            if neighbour_min - points[i].z > params.threshold {
                points[i].classification = CLASS_NOISE;
                marked += 1;
            } else {
                break;
            }
        }
    }
    marked
}
