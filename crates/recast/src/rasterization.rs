//! Triangle rasterization into a heightfield
//!
//! Each triangle is clipped against the grid rows and then against the cells
//! of every row; the vertical extent of each clipped piece becomes a span.

use glam::Vec3;
use recast_common::{deg_to_rad, Result};

use super::heightfield::Heightfield;
use super::{RC_NULL_AREA, RC_SPAN_MAX_HEIGHT, RC_WALKABLE_AREA};

/// Splits a convex polygon along the plane `axis == x`.
///
/// `below` receives the part with coordinates `<= x`, `above` the rest.
fn divide_poly(input: &[Vec3], below: &mut Vec<Vec3>, above: &mut Vec<Vec3>, x: f32, axis: usize) {
    below.clear();
    above.clear();
    if input.is_empty() {
        return;
    }

    let d: Vec<f32> = input.iter().map(|v| x - v[axis]).collect();
    let n = input.len();
    let mut j = n - 1;
    for i in 0..n {
        let ina = d[j] >= 0.0;
        let inb = d[i] >= 0.0;
        if ina != inb {
            let s = d[j] / (d[j] - d[i]);
            let p = input[j] + (input[i] - input[j]) * s;
            below.push(p);
            above.push(p);
            if d[i] > 0.0 {
                below.push(input[i]);
            } else if d[i] < 0.0 {
                above.push(input[i]);
            }
        } else if inb {
            below.push(input[i]);
            if d[i] == 0.0 {
                above.push(input[i]);
            }
        } else {
            above.push(input[i]);
        }
        j = i;
    }
}

/// Rasterizes a single triangle into the heightfield
pub fn rasterize_triangle(
    hf: &mut Heightfield,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    area: u8,
    flag_merge_threshold: i32,
) -> Result<()> {
    let tmin = v0.min(v1).min(v2);
    let tmax = v0.max(v1).max(v2);

    if tmin.x > hf.bmax.x
        || tmax.x < hf.bmin.x
        || tmin.y > hf.bmax.y
        || tmax.y < hf.bmin.y
        || tmin.z > hf.bmax.z
        || tmax.z < hf.bmin.z
    {
        return Ok(());
    }

    let w = hf.width;
    let h = hf.height;
    let by = hf.bmax.y - hf.bmin.y;
    let ics = 1.0 / hf.cs;
    let ich = 1.0 / hf.ch;

    let z0 = (((tmin.z - hf.bmin.z) * ics).floor() as i32).clamp(-1, h - 1);
    let z1 = (((tmax.z - hf.bmin.z) * ics).floor() as i32).clamp(0, h - 1);

    let mut remaining = vec![v0, v1, v2];
    let mut row = Vec::with_capacity(7);
    let mut rest = Vec::with_capacity(7);
    let mut cell = Vec::with_capacity(7);
    let mut row_rest = Vec::with_capacity(7);

    for z in z0..=z1 {
        let cell_z = hf.bmin.z + z as f32 * hf.cs;
        divide_poly(&remaining, &mut row, &mut rest, cell_z + hf.cs, 2);
        std::mem::swap(&mut remaining, &mut rest);

        if row.len() < 3 || z < 0 {
            continue;
        }

        let (min_x, max_x) = row
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.x), hi.max(v.x)));
        let x0 = ((min_x - hf.bmin.x) * ics).floor() as i32;
        let x1 = ((max_x - hf.bmin.x) * ics).floor() as i32;
        if x1 < 0 || x0 >= w {
            continue;
        }
        let x0 = x0.clamp(-1, w - 1);
        let x1 = x1.clamp(0, w - 1);

        for x in x0..=x1 {
            let cell_x = hf.bmin.x + x as f32 * hf.cs;
            divide_poly(&row, &mut cell, &mut row_rest, cell_x + hf.cs, 0);
            std::mem::swap(&mut row, &mut row_rest);

            if cell.len() < 3 || x < 0 {
                continue;
            }

            let (mut smin, mut smax) = cell
                .iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.y), hi.max(v.y)));
            smin -= hf.bmin.y;
            smax -= hf.bmin.y;
            if smax < 0.0 || smin > by {
                continue;
            }
            smin = smin.max(0.0);
            smax = smax.min(by);

            let max_height = RC_SPAN_MAX_HEIGHT as i32;
            let ismin = ((smin * ich).floor() as i32).clamp(0, max_height);
            let ismax = ((smax * ich).ceil() as i32).clamp(ismin + 1, max_height);

            hf.add_span(x, z, ismin as u16, ismax as u16, area, flag_merge_threshold)?;
        }
    }

    Ok(())
}

/// Rasterizes indexed triangles with one area id per triangle
pub fn rasterize_triangles(
    hf: &mut Heightfield,
    verts: &[Vec3],
    tris: &[[u32; 3]],
    areas: &[u8],
    flag_merge_threshold: i32,
) -> Result<()> {
    for (tri, &area) in tris.iter().zip(areas) {
        let v0 = verts[tri[0] as usize];
        let v1 = verts[tri[1] as usize];
        let v2 = verts[tri[2] as usize];
        rasterize_triangle(hf, v0, v1, v2, area, flag_merge_threshold)?;
    }
    Ok(())
}

fn triangle_normal(v0: Vec3, v1: Vec3, v2: Vec3) -> Vec3 {
    (v1 - v0).cross(v2 - v0).normalize_or_zero()
}

/// Area ids for triangles: walkable when the slope is below `walkable_slope_angle`
pub fn mark_walkable_triangles(walkable_slope_angle: f32, verts: &[Vec3], tris: &[[u32; 3]]) -> Vec<u8> {
    let walkable_thr = deg_to_rad(walkable_slope_angle).cos();
    tris.iter()
        .map(|t| {
            let n = triangle_normal(verts[t[0] as usize], verts[t[1] as usize], verts[t[2] as usize]);
            if n.y > walkable_thr {
                RC_WALKABLE_AREA
            } else {
                RC_NULL_AREA
            }
        })
        .collect()
}

/// Clears area ids of triangles steeper than `walkable_slope_angle`
pub fn clear_unwalkable_triangles(
    walkable_slope_angle: f32,
    verts: &[Vec3],
    tris: &[[u32; 3]],
    areas: &mut [u8],
) {
    let walkable_thr = deg_to_rad(walkable_slope_angle).cos();
    for (t, area) in tris.iter().zip(areas.iter_mut()) {
        let n = triangle_normal(verts[t[0] as usize], verts[t[1] as usize], verts[t[2] as usize]);
        if n.y <= walkable_thr {
            *area = RC_NULL_AREA;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> (Vec<Vec3>, Vec<[u32; 3]>) {
        let verts = vec![
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 4.0),
            Vec3::new(4.0, 1.0, 4.0),
            Vec3::new(4.0, 1.0, 0.0),
        ];
        (verts, vec![[0, 1, 2], [0, 2, 3]])
    }

    #[test]
    fn test_divide_poly() {
        let tri = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 2.0),
        ];
        let mut below = Vec::new();
        let mut above = Vec::new();
        divide_poly(&tri, &mut below, &mut above, 1.0, 0);
        assert!(below.iter().all(|v| v.x <= 1.0 + 1e-6));
        assert!(above.iter().all(|v| v.x >= 1.0 - 1e-6));
        assert_eq!(below.len(), 4);
        assert_eq!(above.len(), 3);
    }

    #[test]
    fn test_rasterize_flat_quad_covers_every_cell() {
        let (verts, tris) = quad();
        let areas = mark_walkable_triangles(45.0, &verts, &tris);
        assert_eq!(areas, vec![RC_WALKABLE_AREA; 2]);

        let mut hf = Heightfield::new(
            4,
            4,
            Vec3::ZERO,
            Vec3::new(4.0, 4.0, 4.0),
            1.0,
            0.5,
        );
        rasterize_triangles(&mut hf, &verts, &tris, &areas, 1).unwrap();

        for z in 0..4 {
            for x in 0..4 {
                let column = hf.column(x, z);
                assert_eq!(column.len(), 1, "cell {},{}", x, z);
                assert_eq!(column[0].smax, 3);
                assert_eq!(column[0].area, RC_WALKABLE_AREA);
            }
        }
    }

    #[test]
    fn test_triangle_outside_is_ignored() {
        let mut hf = Heightfield::new(4, 4, Vec3::ZERO, Vec3::splat(4.0), 1.0, 0.5);
        rasterize_triangle(
            &mut hf,
            Vec3::new(10.0, 1.0, 10.0),
            Vec3::new(10.0, 1.0, 12.0),
            Vec3::new(12.0, 1.0, 10.0),
            RC_WALKABLE_AREA,
            1,
        )
        .unwrap();
        assert_eq!(hf.span_count(), 0);
    }

    #[test]
    fn test_steep_triangles_are_not_walkable() {
        let verts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 4.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
        ];
        let tris = vec![[0, 1, 2]];
        assert_eq!(mark_walkable_triangles(45.0, &verts, &tris), vec![RC_NULL_AREA]);

        let mut areas = vec![RC_WALKABLE_AREA];
        clear_unwalkable_triangles(45.0, &verts, &tris, &mut areas);
        assert_eq!(areas[0], RC_NULL_AREA);
    }
}
