//! Height detail for the polygons of a [`PolyMesh`]
//!
//! Every polygon gets a small triangle mesh that follows the heightfield
//! more closely than the flat polygon does. Polygon edges are sampled every
//! `sample_dist` world units and interior samples are inserted wherever the
//! surface deviates by more than `sample_max_error`.

use glam::Vec3;
use recast_common::{
    dist_point_segment_sqr, dist_point_segment_sqr_2d, dist_point_tri, next_index, point_in_polygon_2d,
    prev_index, Error, Result,
};

use super::compact_heightfield::CompactHeightfield;
use super::polymesh::PolyMesh;

/// Maximum number of vertices in one polygon's detail mesh
pub const DETAIL_MAX_VERTS: usize = 127;

const MAX_VERTS_PER_EDGE: usize = 32;
const HEIGHT_SEARCH_RADIUS: i32 = 2;

/// Detail triangle meshes, one per polygon.
///
/// `meshes[i]` is `[vert_base, vert_count, tri_base, tri_count]`. The first
/// vertices of every sub-mesh are the polygon's own vertices, in order.
/// Triangles store three local vertex indices and an edge flag byte.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolyMeshDetail {
    pub meshes: Vec<[u32; 4]>,
    /// World-space vertices, 3 floats per vertex
    pub verts: Vec<f32>,
    pub tris: Vec<u8>,
}

impl PolyMeshDetail {
    /// Builds the detail meshes for every polygon of `mesh`.
    ///
    /// A `sample_dist` below one voxel disables sampling, leaving each
    /// polygon triangulated from its own vertices. Fails when a polygon's
    /// sampled outline exceeds [`DETAIL_MAX_VERTS`].
    pub fn build(
        mesh: &PolyMesh,
        chf: &CompactHeightfield,
        sample_dist: f32,
        sample_max_error: f32,
    ) -> Result<Self> {
        let mut dmesh = PolyMeshDetail::default();
        let sampling = sample_dist >= mesh.cs;

        for i in 0..mesh.npolys {
            let nv = mesh.poly_vert_count(i);
            let poly: Vec<Vec3> = mesh.poly(i)[..nv]
                .iter()
                .map(|&v| mesh.world_vert(v as usize))
                .collect();
            let heights = HeightSampler {
                chf,
                reg: mesh.regs[i],
            };

            let (verts, tris) = if sampling {
                build_poly_detail(&poly, &heights, sample_dist, sample_max_error)?
            } else {
                let hull: Vec<usize> = (0..nv).collect();
                (poly.clone(), triangulate_hull(&poly, &hull, nv))
            };

            dmesh.meshes.push([
                (dmesh.verts.len() / 3) as u32,
                verts.len() as u32,
                (dmesh.tris.len() / 4) as u32,
                tris.len() as u32,
            ]);
            for v in &verts {
                dmesh.verts.extend_from_slice(&[v.x, v.y, v.z]);
            }
            for t in &tris {
                let flags = tri_edge_flags(verts[t[0]], verts[t[1]], verts[t[2]], &poly);
                dmesh.tris.extend_from_slice(&[t[0] as u8, t[1] as u8, t[2] as u8, flags]);
            }
        }

        Ok(dmesh)
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn vert_count(&self) -> usize {
        self.verts.len() / 3
    }

    pub fn tri_count(&self) -> usize {
        self.tris.len() / 4
    }
}

/// Samples surface heights of one region from the compact heightfield.
struct HeightSampler<'a> {
    chf: &'a CompactHeightfield,
    reg: u16,
}

impl HeightSampler<'_> {
    /// Height of the span nearest to `reference` under `(x, z)`, searching
    /// nearby cells when the cell itself has no span of the region.
    fn height_at(&self, x: f32, z: f32, reference: f32) -> f32 {
        let chf = self.chf;
        let ix = ((x - chf.bmin.x) / chf.cs).floor() as i32;
        let iz = ((z - chf.bmin.z) / chf.cs).floor() as i32;
        let ref_voxel = (reference - chf.bmin.y) / chf.ch;

        for radius in 0..=HEIGHT_SEARCH_RADIUS {
            let mut best: Option<(f32, u16)> = None;
            for dz in -radius..=radius {
                for dx in -radius..=radius {
                    if dx.abs() != radius && dz.abs() != radius {
                        continue;
                    }
                    let (cx, cz) = (ix + dx, iz + dz);
                    if cx < 0 || cz < 0 || cx >= chf.width || cz >= chf.height {
                        continue;
                    }
                    for si in chf.cell_spans(cx, cz) {
                        if chf.spans[si].reg != self.reg {
                            continue;
                        }
                        let y = chf.spans[si].y;
                        let d = (y as f32 - ref_voxel).abs();
                        if best.map_or(true, |(bd, _)| d < bd) {
                            best = Some((d, y));
                        }
                    }
                }
            }
            if let Some((_, y)) = best {
                return chf.bmin.y + y as f32 * chf.ch;
            }
        }
        reference
    }
}

fn build_poly_detail(
    poly: &[Vec3],
    heights: &HeightSampler<'_>,
    sample_dist: f32,
    sample_max_error: f32,
) -> Result<(Vec<Vec3>, Vec<[usize; 3]>)> {
    let nv = poly.len();
    let mut verts: Vec<Vec3> = poly.to_vec();
    let mut hull: Vec<usize> = Vec::with_capacity(DETAIL_MAX_VERTS);
    let err_sqr = sample_max_error * sample_max_error;

    for j in 0..nv {
        let i = prev_index(j, nv);
        // Sample every edge in the same direction so shared edges match
        let (mut a, mut b) = (poly[i], poly[j]);
        let swapped = a.x > b.x || (a.x == b.x && a.z > b.z);
        if swapped {
            std::mem::swap(&mut a, &mut b);
        }

        let len = (b - a).with_y(0.0).length();
        let nn = ((len / sample_dist).floor() as usize + 1).min(MAX_VERTS_PER_EDGE - 1);
        let mut edge: Vec<Vec3> = (0..=nn)
            .map(|k| {
                let p = a.lerp(b, k as f32 / nn as f32);
                p.with_y(heights.height_at(p.x, p.z, p.y))
            })
            .collect();
        edge[0] = a;
        edge[nn] = b;

        // Keep the samples that deviate most, recursively
        let mut kept = vec![0usize, nn];
        let mut k = 0;
        while k + 1 < kept.len() {
            let (s, e) = (kept[k], kept[k + 1]);
            let mut maxd = 0.0;
            let mut maxi = None;
            for m in s + 1..e {
                let d = dist_point_segment_sqr(edge[m], edge[s], edge[e]);
                if d > maxd {
                    maxd = d;
                    maxi = Some(m);
                }
            }
            match maxi {
                Some(m) if maxd > err_sqr => kept.insert(k + 1, m),
                _ => k += 1,
            }
        }

        hull.push(i);
        let interior: Vec<usize> = kept[1..kept.len() - 1].to_vec();
        let ordered: Vec<usize> = if swapped {
            interior.into_iter().rev().collect()
        } else {
            interior
        };
        for m in ordered {
            hull.push(verts.len());
            verts.push(edge[m]);
        }
    }

    if verts.len() > DETAIL_MAX_VERTS {
        return Err(Error::NavMeshGeneration(format!(
            "detail outline has {} vertices, more than {DETAIL_MAX_VERTS}",
            verts.len()
        )));
    }

    let mut tris = triangulate_hull(&verts, &hull, nv);

    // Interior samples on a grid, skipping points close to the outline
    let (bmin, bmax) = poly.iter().fold(
        (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
        |(lo, hi), &p| (lo.min(p), hi.max(p)),
    );
    let x0 = (bmin.x / sample_dist).floor() as i32;
    let x1 = (bmax.x / sample_dist).ceil() as i32;
    let z0 = (bmin.z / sample_dist).floor() as i32;
    let z1 = (bmax.z / sample_dist).ceil() as i32;
    let min_edge_dist_sqr = (sample_dist * 0.5) * (sample_dist * 0.5);
    let reference = poly.iter().map(|p| p.y).sum::<f32>() / nv as f32;

    let mut samples: Vec<Vec3> = Vec::new();
    for z in z0..z1 {
        for x in x0..x1 {
            let p = Vec3::new(x as f32 * sample_dist, reference, z as f32 * sample_dist);
            if !point_in_polygon_2d(p, poly) {
                continue;
            }
            let near_edge = (0..nv).any(|j| {
                dist_point_segment_sqr_2d(p, poly[prev_index(j, nv)], poly[j]) < min_edge_dist_sqr
            });
            if near_edge {
                continue;
            }
            samples.push(p.with_y(heights.height_at(p.x, p.z, reference)));
        }
    }

    let mut added = vec![false; samples.len()];
    while verts.len() < DETAIL_MAX_VERTS {
        let mut best: Option<(usize, usize, f32)> = None;
        for (si, s) in samples.iter().enumerate() {
            if added[si] {
                continue;
            }
            let hit = tris.iter().enumerate().find_map(|(ti, t)| {
                dist_point_tri(*s, verts[t[0]], verts[t[1]], verts[t[2]]).map(|d| (ti, d))
            });
            if let Some((ti, d)) = hit {
                if best.map_or(true, |(_, _, bd)| d > bd) {
                    best = Some((si, ti, d));
                }
            }
        }

        let Some((si, ti, d)) = best else { break };
        if d <= sample_max_error {
            break;
        }
        added[si] = true;

        // Split the containing triangle around the new vertex
        let vi = verts.len();
        verts.push(samples[si]);
        let [a, b, c] = tris[ti];
        tris[ti] = [a, b, vi];
        tris.push([b, c, vi]);
        tris.push([c, a, vi]);
    }

    Ok((verts, tris))
}

fn dist_2d(a: Vec3, b: Vec3) -> f32 {
    (b - a).with_y(0.0).length()
}

/// Triangulates an outline by zig-zagging from the ear with the shortest
/// perimeter. `nin` is the number of original polygon vertices; only those
/// may be the tip of the first ear.
fn triangulate_hull(verts: &[Vec3], hull: &[usize], nin: usize) -> Vec<[usize; 3]> {
    let nhull = hull.len();
    if nhull < 3 {
        return Vec::new();
    }

    let mut start = 0;
    let mut left = 1;
    let mut right = nhull - 1;
    let mut dmin = f32::MAX;
    for i in 0..nhull {
        if hull[i] >= nin {
            continue;
        }
        let pi = prev_index(i, nhull);
        let ni = next_index(i, nhull);
        let pv = verts[hull[pi]];
        let cv = verts[hull[i]];
        let nv = verts[hull[ni]];
        let d = dist_2d(pv, cv) + dist_2d(cv, nv) + dist_2d(nv, pv);
        if d < dmin {
            start = i;
            left = ni;
            right = pi;
            dmin = d;
        }
    }

    let mut tris = vec![[hull[start], hull[left], hull[right]]];

    while next_index(left, nhull) != right {
        let nleft = next_index(left, nhull);
        let nright = prev_index(right, nhull);

        let cvleft = verts[hull[left]];
        let nvleft = verts[hull[nleft]];
        let cvright = verts[hull[right]];
        let nvright = verts[hull[nright]];
        let dleft = dist_2d(cvleft, nvleft) + dist_2d(nvleft, cvright);
        let dright = dist_2d(cvright, nvright) + dist_2d(cvleft, nvright);

        if dleft < dright {
            tris.push([hull[left], hull[nleft], hull[right]]);
            left = nleft;
        } else {
            tris.push([hull[left], hull[nright], hull[right]]);
            right = nright;
        }
    }

    tris
}

fn edge_on_poly(va: Vec3, vb: Vec3, poly: &[Vec3]) -> bool {
    const THR_SQR: f32 = 0.001 * 0.001;
    let n = poly.len();
    (0..n).any(|i| {
        let j = prev_index(i, n);
        dist_point_segment_sqr_2d(va, poly[j], poly[i]) < THR_SQR
            && dist_point_segment_sqr_2d(vb, poly[j], poly[i]) < THR_SQR
    })
}

/// Two bits per triangle edge, set when the edge lies on the polygon outline.
fn tri_edge_flags(va: Vec3, vb: Vec3, vc: Vec3, poly: &[Vec3]) -> u8 {
    let mut flags = 0;
    if edge_on_poly(va, vb, poly) {
        flags |= 1;
    }
    if edge_on_poly(vb, vc, poly) {
        flags |= 1 << 2;
    }
    if edge_on_poly(vc, va, poly) {
        flags |= 1 << 4;
    }
    flags
}
