//! Area marking operations for Recast
//!
//! Erosion shrinks the walkable surface away from walls by the agent radius;
//! cylinder marking carves obstacle footprints out of a compact heightfield.

use glam::Vec3;
use recast_common::Result;

use super::compact_heightfield::CompactHeightfield;
use super::RC_NULL_AREA;

/// Chamfer distance (2 per straight step, 3 per diagonal) to the nearest
/// span that is either unwalkable or lacks a walkable neighbour.
///
/// With `compare_areas` a change of area id also counts as a boundary.
pub(crate) fn chamfer_distance(chf: &CompactHeightfield, compare_areas: bool) -> Vec<u16> {
    let w = chf.width;
    let h = chf.height;
    let mut dist = vec![u16::MAX; chf.span_count()];

    for z in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, z) {
                let area = chf.areas[i];
                if area == RC_NULL_AREA && !compare_areas {
                    dist[i] = 0;
                    continue;
                }
                let mut neighbours = 0;
                for dir in 0..4 {
                    if let Some((_, _, ai)) = chf.neighbour(x, z, i, dir) {
                        let other = chf.areas[ai];
                        let same = if compare_areas {
                            other == area
                        } else {
                            other != RC_NULL_AREA
                        };
                        if same {
                            neighbours += 1;
                        }
                    }
                }
                if neighbours != 4 {
                    dist[i] = 0;
                }
            }
        }
    }

    let relax = |dist: &mut [u16], i: usize, j: usize, step: u16| {
        let nd = dist[j].saturating_add(step);
        if nd < dist[i] {
            dist[i] = nd;
        }
    };

    // Pass 1: (-1,0) (-1,-1) (0,-1) (1,-1)
    for z in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, z) {
                if let Some((ax, az, ai)) = chf.neighbour(x, z, i, 0) {
                    relax(&mut dist, i, ai, 2);
                    if let Some((_, _, aai)) = chf.neighbour(ax, az, ai, 3) {
                        relax(&mut dist, i, aai, 3);
                    }
                }
                if let Some((ax, az, ai)) = chf.neighbour(x, z, i, 3) {
                    relax(&mut dist, i, ai, 2);
                    if let Some((_, _, aai)) = chf.neighbour(ax, az, ai, 2) {
                        relax(&mut dist, i, aai, 3);
                    }
                }
            }
        }
    }

    // Pass 2: (1,0) (1,1) (0,1) (-1,1)
    for z in (0..h).rev() {
        for x in (0..w).rev() {
            for i in chf.cell_spans(x, z) {
                if let Some((ax, az, ai)) = chf.neighbour(x, z, i, 2) {
                    relax(&mut dist, i, ai, 2);
                    if let Some((_, _, aai)) = chf.neighbour(ax, az, ai, 1) {
                        relax(&mut dist, i, aai, 3);
                    }
                }
                if let Some((ax, az, ai)) = chf.neighbour(x, z, i, 1) {
                    relax(&mut dist, i, ai, 2);
                    if let Some((_, _, aai)) = chf.neighbour(ax, az, ai, 0) {
                        relax(&mut dist, i, aai, 3);
                    }
                }
            }
        }
    }

    dist
}

/// Erodes walkable area by the specified radius, in cells
pub fn erode_walkable_area(chf: &mut CompactHeightfield, erosion_radius: i32) -> Result<()> {
    let dist = chamfer_distance(chf, false);
    let threshold = (erosion_radius.max(0) * 2) as u16;
    for (area, &d) in chf.areas.iter_mut().zip(&dist) {
        if d < threshold {
            *area = RC_NULL_AREA;
        }
    }
    Ok(())
}

/// Marks the spans inside a vertical cylinder with `area_id`.
///
/// `position` is the bottom center of the cylinder. A column is inside when
/// its cell center lies within `radius`; a span is inside when its floor lies
/// within the vertical extent. Returns the number of spans changed.
pub fn mark_cylinder_area(
    chf: &mut CompactHeightfield,
    position: Vec3,
    radius: f32,
    height: f32,
    area_id: u8,
) -> usize {
    let w = chf.width;
    let h = chf.height;

    let bb_min = Vec3::new(position.x - radius, position.y, position.z - radius);
    let bb_max = Vec3::new(position.x + radius, position.y + height, position.z + radius);

    let minx = ((bb_min.x - chf.bmin.x) / chf.cs).floor() as i32;
    let miny = ((bb_min.y - chf.bmin.y) / chf.ch).floor() as i32;
    let minz = ((bb_min.z - chf.bmin.z) / chf.cs).floor() as i32;
    let maxx = ((bb_max.x - chf.bmin.x) / chf.cs).floor() as i32;
    let maxy = ((bb_max.y - chf.bmin.y) / chf.ch).floor() as i32;
    let maxz = ((bb_max.z - chf.bmin.z) / chf.cs).floor() as i32;

    if maxx < 0 || minx >= w || maxz < 0 || minz >= h {
        return 0;
    }

    let minx = minx.max(0);
    let maxx = maxx.min(w - 1);
    let minz = minz.max(0);
    let maxz = maxz.min(h - 1);
    let radius_sq = radius * radius;
    let mut changed = 0;

    for z in minz..=maxz {
        for x in minx..=maxx {
            let cell_x = chf.bmin.x + (x as f32 + 0.5) * chf.cs;
            let cell_z = chf.bmin.z + (z as f32 + 0.5) * chf.cs;
            let dx = cell_x - position.x;
            let dz = cell_z - position.z;
            if dx * dx + dz * dz >= radius_sq {
                continue;
            }

            for i in chf.cell_spans(x, z) {
                if chf.areas[i] == RC_NULL_AREA || chf.areas[i] == area_id {
                    continue;
                }
                let y = chf.spans[i].y as i32;
                if y >= miny && y <= maxy {
                    chf.areas[i] = area_id;
                    changed += 1;
                }
            }
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::RC_WALKABLE_AREA;

    fn flat_chf(size: i32) -> CompactHeightfield {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::ZERO,
            Vec3::new(size as f32, 5.0, size as f32),
            1.0,
            0.5,
        );
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 2, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        CompactHeightfield::build_from_heightfield(&hf, 3, 1).unwrap()
    }

    #[test]
    fn test_erode_shrinks_from_edges() {
        let mut chf = flat_chf(9);
        erode_walkable_area(&mut chf, 2).unwrap();

        let walkable_at = |chf: &CompactHeightfield, x: i32, z: i32| {
            let i = chf.cell_spans(x, z).start;
            chf.areas[i] != RC_NULL_AREA
        };
        assert!(!walkable_at(&chf, 0, 4));
        assert!(!walkable_at(&chf, 1, 4));
        assert!(walkable_at(&chf, 2, 4));
        assert!(walkable_at(&chf, 4, 4));
        assert!(!walkable_at(&chf, 8, 8));
    }

    #[test]
    fn test_erode_zero_radius_is_noop() {
        let mut chf = flat_chf(4);
        erode_walkable_area(&mut chf, 0).unwrap();
        assert_eq!(chf.walkable_span_count(), 16);
    }

    #[test]
    fn test_mark_cylinder() {
        let mut chf = flat_chf(10);
        let changed = mark_cylinder_area(&mut chf, Vec3::new(5.0, 0.0, 5.0), 1.5, 2.0, RC_NULL_AREA);
        assert!(changed > 0);

        let center = chf.cell_spans(5, 5).start;
        assert_eq!(chf.areas[center], RC_NULL_AREA);
        let far = chf.cell_spans(0, 0).start;
        assert_eq!(chf.areas[far], RC_WALKABLE_AREA);
        assert_eq!(chf.walkable_span_count(), 100 - changed);
    }

    #[test]
    fn test_mark_cylinder_above_floor_misses() {
        let mut chf = flat_chf(10);
        let changed = mark_cylinder_area(&mut chf, Vec3::new(5.0, 3.0, 5.0), 2.0, 1.0, RC_NULL_AREA);
        assert_eq!(changed, 0);
    }

    #[test]
    fn test_mark_cylinder_outside_field() {
        let mut chf = flat_chf(4);
        let changed = mark_cylinder_area(&mut chf, Vec3::new(50.0, 0.0, 50.0), 1.0, 1.0, RC_NULL_AREA);
        assert_eq!(changed, 0);
    }
}
