//! Convex polygon mesh built from a contour set

use std::collections::HashMap;

use glam::Vec3;
use log::warn;
use recast_common::{next_index, prev_index, Error, Result};

use super::contour::{intersect, left, left_on, vequal, ContourSet};

/// Marks an unused vertex or neighbour slot in [`PolyMesh::polys`]
pub const MESH_NULL_IDX: u16 = 0xffff;

/// Neighbour flag for polygon edges on the tile border
pub const PORTAL_FLAG: u16 = 0x8000;

const REMOVABLE: u32 = 0x8000_0000;
const INDEX_MASK: u32 = 0x0fff_ffff;

/// A mesh of convex polygons in voxel coordinates.
///
/// Each polygon occupies `2 * nvp` entries in `polys`: the vertex indices
/// followed by the neighbour of each edge. A neighbour is a polygon index,
/// [`MESH_NULL_IDX`] for solid edges, or `PORTAL_FLAG | side` for edges
/// that lie on the tile border.
#[derive(Debug, Clone, PartialEq)]
pub struct PolyMesh {
    /// Vertices, 3 per vertex
    pub verts: Vec<u16>,
    pub polys: Vec<u16>,
    /// Region id per polygon
    pub regs: Vec<u16>,
    /// Area id per polygon
    pub areas: Vec<u8>,
    /// User flags per polygon
    pub flags: Vec<u16>,
    pub nverts: usize,
    pub npolys: usize,
    /// Maximum vertices per polygon
    pub nvp: usize,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub border_size: i32,
    pub max_edge_error: f32,
}

impl PolyMesh {
    /// Triangulates every contour and merges the triangles into convex
    /// polygons of at most `nvp` vertices.
    pub fn build(cset: &ContourSet, nvp: usize) -> Result<Self> {
        if !(3..=6).contains(&nvp) {
            return Err(Error::Recast(format!("invalid vertices per polygon: {nvp}")));
        }

        let mut mesh = PolyMesh {
            verts: Vec::new(),
            polys: Vec::new(),
            regs: Vec::new(),
            areas: Vec::new(),
            flags: Vec::new(),
            nverts: 0,
            npolys: 0,
            nvp,
            bmin: cset.bmin,
            bmax: cset.bmax,
            cs: cset.cs,
            ch: cset.ch,
            border_size: cset.border_size,
            max_edge_error: cset.max_error,
        };

        let mut vert_lookup: HashMap<(u16, u16), Vec<usize>> = HashMap::new();

        for cont in &cset.contours {
            if cont.verts.len() < 3 {
                continue;
            }

            let (tris, ok) = triangulate(&cont.verts);
            if !ok {
                warn!("bad triangulation for contour of region {}", cont.reg);
            }

            let mut indices = Vec::with_capacity(cont.verts.len());
            for v in &cont.verts {
                let idx = mesh.add_vertex(v[0] as u16, v[1] as u16, v[2] as u16, &mut vert_lookup);
                indices.push(idx as u16);
            }

            let mut polys: Vec<Vec<u16>> = tris
                .iter()
                .filter(|t| t[0] != t[1] && t[0] != t[2] && t[1] != t[2])
                .map(|t| vec![indices[t[0]], indices[t[1]], indices[t[2]]])
                .collect();
            if polys.is_empty() {
                continue;
            }

            if nvp > 3 {
                loop {
                    let mut best: Option<(i32, usize, usize, usize, usize)> = None;
                    for j in 0..polys.len().saturating_sub(1) {
                        for k in j + 1..polys.len() {
                            if let Some((value, ea, eb)) = poly_merge_value(&polys[j], &polys[k], &mesh.verts, nvp) {
                                if best.map_or(true, |b| value > b.0) {
                                    best = Some((value, j, k, ea, eb));
                                }
                            }
                        }
                    }

                    let Some((_, pa, pb, ea, eb)) = best else { break };
                    let merged = merge_poly_verts(&polys[pa], &polys[pb], ea, eb);
                    polys[pa] = merged;
                    polys.swap_remove(pb);
                }
            }

            for poly in polys {
                let mut entry = vec![MESH_NULL_IDX; nvp * 2];
                entry[..poly.len()].copy_from_slice(&poly);
                mesh.polys.extend_from_slice(&entry);
                mesh.regs.push(cont.reg);
                mesh.areas.push(cont.area);
                mesh.npolys += 1;
            }
        }

        if mesh.nverts > MESH_NULL_IDX as usize {
            return Err(Error::Recast(format!(
                "too many vertices in polygon mesh: {}",
                mesh.nverts
            )));
        }

        mesh.build_adjacency();

        if mesh.border_size > 0 {
            mesh.mark_portal_edges(cset.width, cset.height);
        }

        mesh.flags = vec![0; mesh.npolys];
        Ok(mesh)
    }

    fn add_vertex(&mut self, x: u16, y: u16, z: u16, lookup: &mut HashMap<(u16, u16), Vec<usize>>) -> usize {
        let bucket = lookup.entry((x, z)).or_default();
        for &i in bucket.iter() {
            let vy = self.verts[i * 3 + 1];
            if (vy as i32 - y as i32).abs() <= 2 {
                return i;
            }
        }
        let i = self.nverts;
        self.verts.extend_from_slice(&[x, y, z]);
        self.nverts += 1;
        bucket.push(i);
        i
    }

    fn build_adjacency(&mut self) {
        let nvp = self.nvp;
        // (low, high) vertex pair -> (polygon, edge) entries walking low to high
        let mut edges: HashMap<(u16, u16), Vec<(usize, usize)>> = HashMap::new();

        for i in 0..self.npolys {
            let count = self.poly_vert_count(i);
            let base = i * nvp * 2;
            for j in 0..count {
                let v0 = self.polys[base + j];
                let v1 = self.polys[base + next_index(j, count)];
                if v0 < v1 {
                    edges.entry((v0, v1)).or_default().push((i, j));
                }
            }
        }

        for i in 0..self.npolys {
            let count = self.poly_vert_count(i);
            let base = i * nvp * 2;
            for j in 0..count {
                let v0 = self.polys[base + j];
                let v1 = self.polys[base + next_index(j, count)];
                if v0 <= v1 {
                    continue;
                }
                let Some(candidates) = edges.get_mut(&(v1, v0)) else {
                    continue;
                };
                if let Some(pos) = candidates.iter().position(|&(p, _)| p != i) {
                    let (p0, e0) = candidates.swap_remove(pos);
                    self.polys[p0 * nvp * 2 + nvp + e0] = i as u16;
                    self.polys[base + nvp + j] = p0 as u16;
                }
            }
        }
    }

    fn mark_portal_edges(&mut self, w: i32, h: i32) {
        let nvp = self.nvp;
        for i in 0..self.npolys {
            let count = self.poly_vert_count(i);
            let base = i * nvp * 2;
            for j in 0..count {
                if self.polys[base + nvp + j] != MESH_NULL_IDX {
                    continue;
                }
                let va = self.vert(self.polys[base + j] as usize);
                let vb = self.vert(self.polys[base + next_index(j, count)] as usize);
                let (ax, az) = (va[0] as i32, va[2] as i32);
                let (bx, bz) = (vb[0] as i32, vb[2] as i32);

                let side = if ax == 0 && bx == 0 {
                    Some(0)
                } else if az == h && bz == h {
                    Some(1)
                } else if ax == w && bx == w {
                    Some(2)
                } else if az == 0 && bz == 0 {
                    Some(3)
                } else {
                    None
                };
                if let Some(side) = side {
                    self.polys[base + nvp + j] = PORTAL_FLAG | side;
                }
            }
        }
    }

    /// Vertex and neighbour slots of polygon `i`
    pub fn poly(&self, i: usize) -> &[u16] {
        let base = i * self.nvp * 2;
        &self.polys[base..base + self.nvp * 2]
    }

    pub fn poly_vert_count(&self, i: usize) -> usize {
        let base = i * self.nvp * 2;
        self.polys[base..base + self.nvp]
            .iter()
            .take_while(|&&v| v != MESH_NULL_IDX)
            .count()
    }

    pub fn vert(&self, i: usize) -> [u16; 3] {
        [self.verts[i * 3], self.verts[i * 3 + 1], self.verts[i * 3 + 2]]
    }

    /// World-space position of vertex `i`
    pub fn world_vert(&self, i: usize) -> Vec3 {
        let v = self.vert(i);
        Vec3::new(
            self.bmin.x + v[0] as f32 * self.cs,
            self.bmin.y + v[1] as f32 * self.ch,
            self.bmin.z + v[2] as f32 * self.cs,
        )
    }
}

fn vert4(verts: &[[i32; 4]], indices: &[u32], i: usize) -> [i32; 4] {
    verts[(indices[i] & INDEX_MASK) as usize]
}

fn diagonalie(i: usize, j: usize, verts: &[[i32; 4]], indices: &[u32], loose: bool) -> bool {
    let n = indices.len();
    let d0 = vert4(verts, indices, i);
    let d1 = vert4(verts, indices, j);

    for k in 0..n {
        let k1 = next_index(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = vert4(verts, indices, k);
        let p1 = vert4(verts, indices, k1);
        if vequal(&d0, &p0) || vequal(&d1, &p0) || vequal(&d0, &p1) || vequal(&d1, &p1) {
            continue;
        }
        let hit = if loose {
            intersect_prop_loose(&d0, &d1, &p0, &p1)
        } else {
            intersect(&d0, &d1, &p0, &p1)
        };
        if hit {
            return false;
        }
    }
    true
}

fn intersect_prop_loose(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4], d: &[i32; 4]) -> bool {
    let area = |p: &[i32; 4], q: &[i32; 4], r: &[i32; 4]| (q[0] - p[0]) * (r[2] - p[2]) - (r[0] - p[0]) * (q[2] - p[2]);
    let abc = area(a, b, c);
    let abd = area(a, b, d);
    let cda = area(c, d, a);
    let cdb = area(c, d, b);
    if abc == 0 || abd == 0 || cda == 0 || cdb == 0 {
        return false;
    }
    ((abc < 0) ^ (abd < 0)) && ((cda < 0) ^ (cdb < 0))
}

fn in_cone(i: usize, j: usize, verts: &[[i32; 4]], indices: &[u32], loose: bool) -> bool {
    let n = indices.len();
    let pi = vert4(verts, indices, i);
    let pj = vert4(verts, indices, j);
    let pi1 = vert4(verts, indices, next_index(i, n));
    let pin1 = vert4(verts, indices, prev_index(i, n));

    if left_on(&pin1, &pi, &pi1) {
        if loose {
            return left_on(&pi, &pj, &pin1) && left_on(&pj, &pi, &pi1);
        }
        return left(&pi, &pj, &pin1) && left(&pj, &pi, &pi1);
    }
    !(left_on(&pi, &pj, &pi1) && left_on(&pj, &pi, &pin1))
}

fn diagonal(i: usize, j: usize, verts: &[[i32; 4]], indices: &[u32], loose: bool) -> bool {
    in_cone(i, j, verts, indices, loose) && diagonalie(i, j, verts, indices, loose)
}

/// Ear-clips a contour. Returns the triangles as indices into `verts` and
/// whether the contour could be fully triangulated.
fn triangulate(verts: &[[i32; 4]]) -> (Vec<[usize; 3]>, bool) {
    let mut indices: Vec<u32> = (0..verts.len() as u32).collect();
    let mut tris = Vec::with_capacity(verts.len());

    // The high bit marks vertices whose ear can be cut
    let n = indices.len();
    for i in 0..n {
        let i1 = next_index(i, n);
        let i2 = next_index(i1, n);
        if diagonal(i, i2, verts, &indices, false) {
            indices[i1] |= REMOVABLE;
        }
    }

    while indices.len() > 3 {
        let n = indices.len();
        let shortest_ear = |indices: &[u32], loose: bool| -> Option<usize> {
            let mut min_len = i32::MAX;
            let mut mini = None;
            for i in 0..n {
                let i1 = next_index(i, n);
                let i2 = next_index(i1, n);
                let candidate = if loose {
                    diagonal(i, i2, verts, indices, true)
                } else {
                    indices[i1] & REMOVABLE != 0
                };
                if candidate {
                    let p0 = vert4(verts, indices, i);
                    let p2 = vert4(verts, indices, i2);
                    let dx = p2[0] - p0[0];
                    let dz = p2[2] - p0[2];
                    let len = dx * dx + dz * dz;
                    if len < min_len {
                        min_len = len;
                        mini = Some(i);
                    }
                }
            }
            mini
        };

        let Some(mini) = shortest_ear(&indices, false).or_else(|| shortest_ear(&indices, true)) else {
            // Overlapping or degenerate contour
            return (tris, false);
        };

        let i = mini;
        let mut i1 = next_index(i, n);
        let i2 = next_index(i1, n);
        tris.push([
            (indices[i] & INDEX_MASK) as usize,
            (indices[i1] & INDEX_MASK) as usize,
            (indices[i2] & INDEX_MASK) as usize,
        ]);

        indices.remove(i1);
        let n = indices.len();
        if i1 >= n {
            i1 = 0;
        }
        let i = prev_index(i1, n);

        if diagonal(prev_index(i, n), i1, verts, &indices, false) {
            indices[i] |= REMOVABLE;
        } else {
            indices[i] &= INDEX_MASK;
        }
        if diagonal(i, next_index(i1, n), verts, &indices, false) {
            indices[i1] |= REMOVABLE;
        } else {
            indices[i1] &= INDEX_MASK;
        }
    }

    tris.push([
        (indices[0] & INDEX_MASK) as usize,
        (indices[1] & INDEX_MASK) as usize,
        (indices[2] & INDEX_MASK) as usize,
    ]);
    (tris, true)
}

fn uleft(verts: &[u16], a: u16, b: u16, c: u16) -> bool {
    let p = |i: u16| {
        let i = i as usize * 3;
        (verts[i] as i32, verts[i + 2] as i32)
    };
    let (ax, az) = p(a);
    let (bx, bz) = p(b);
    let (cx, cz) = p(c);
    (bx - ax) * (cz - az) - (cx - ax) * (bz - az) < 0
}

/// Returns the merge value (squared length of the shared edge) and the
/// shared edge index in each polygon, if the union stays convex.
fn poly_merge_value(pa: &[u16], pb: &[u16], verts: &[u16], nvp: usize) -> Option<(i32, usize, usize)> {
    let na = pa.len();
    let nb = pb.len();
    if na + nb - 2 > nvp {
        return None;
    }

    let mut shared = None;
    'outer: for i in 0..na {
        let (mut va0, mut va1) = (pa[i], pa[(i + 1) % na]);
        if va0 > va1 {
            std::mem::swap(&mut va0, &mut va1);
        }
        for j in 0..nb {
            let (mut vb0, mut vb1) = (pb[j], pb[(j + 1) % nb]);
            if vb0 > vb1 {
                std::mem::swap(&mut vb0, &mut vb1);
            }
            if va0 == vb0 && va1 == vb1 {
                shared = Some((i, j));
                break 'outer;
            }
        }
    }
    let (ea, eb) = shared?;

    // Both corners of the shared edge must stay convex
    if !uleft(verts, pa[(ea + na - 1) % na], pa[ea], pb[(eb + 2) % nb]) {
        return None;
    }
    if !uleft(verts, pb[(eb + nb - 1) % nb], pb[eb], pa[(ea + 2) % na]) {
        return None;
    }

    let va = pa[ea] as usize * 3;
    let vb = pa[(ea + 1) % na] as usize * 3;
    let dx = verts[va] as i32 - verts[vb] as i32;
    let dz = verts[va + 2] as i32 - verts[vb + 2] as i32;
    Some((dx * dx + dz * dz, ea, eb))
}

fn merge_poly_verts(pa: &[u16], pb: &[u16], ea: usize, eb: usize) -> Vec<u16> {
    let na = pa.len();
    let nb = pb.len();
    let mut merged = Vec::with_capacity(na + nb - 2);
    for i in 0..na - 1 {
        merged.push(pa[(ea + 1 + i) % na]);
    }
    for i in 0..nb - 1 {
        merged.push(pb[(eb + 1 + i) % nb]);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::Contour;

    fn square_cset(border_size: i32) -> ContourSet {
        ContourSet {
            contours: vec![Contour {
                verts: vec![[0, 2, 0, 0], [0, 2, 10, 0], [10, 2, 10, 0], [10, 2, 0, 0]],
                rverts: Vec::new(),
                reg: 1,
                area: 63,
            }],
            bmin: Vec3::ZERO,
            bmax: Vec3::new(10.0, 5.0, 10.0),
            cs: 1.0,
            ch: 0.5,
            width: 10,
            height: 10,
            border_size,
            max_error: 1.3,
        }
    }

    #[test]
    fn test_square_becomes_single_quad() {
        let mesh = PolyMesh::build(&square_cset(0), 6).unwrap();
        assert_eq!(mesh.nverts, 4);
        assert_eq!(mesh.npolys, 1);
        assert_eq!(mesh.poly_vert_count(0), 4);
        assert_eq!(mesh.regs, vec![1]);
        assert_eq!(mesh.areas, vec![63]);
        assert!(mesh.poly(0)[6..10].iter().all(|&n| n == MESH_NULL_IDX));
    }

    #[test]
    fn test_triangles_are_adjacent() {
        let mesh = PolyMesh::build(&square_cset(0), 3).unwrap();
        assert_eq!(mesh.npolys, 2);
        let neighbours0: Vec<u16> = mesh.poly(0)[3..6].to_vec();
        let neighbours1: Vec<u16> = mesh.poly(1)[3..6].to_vec();
        assert!(neighbours0.contains(&1));
        assert!(neighbours1.contains(&0));
    }

    #[test]
    fn test_tile_border_edges_become_portals() {
        let mesh = PolyMesh::build(&square_cset(2), 6).unwrap();
        let poly = mesh.poly(0);
        let mut sides: Vec<u16> = poly[6..10].iter().map(|&n| n & !PORTAL_FLAG).collect();
        sides.sort_unstable();
        assert!(poly[6..10].iter().all(|&n| n & PORTAL_FLAG != 0));
        assert_eq!(sides, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_vertices_are_shared_between_contours() {
        let mut cset = square_cset(0);
        cset.contours.push(Contour {
            verts: vec![[10, 3, 0, 0], [10, 3, 10, 0], [20, 3, 10, 0], [20, 3, 0, 0]],
            rverts: Vec::new(),
            reg: 2,
            area: 63,
        });
        let mesh = PolyMesh::build(&cset, 6).unwrap();
        // Two corners are welded because their heights differ by one voxel
        assert_eq!(mesh.nverts, 6);
        assert_eq!(mesh.npolys, 2);
        assert!(mesh.poly(0)[6..10].contains(&1));
    }

    #[test]
    fn test_world_vert() {
        let mesh = PolyMesh::build(&square_cset(0), 6).unwrap();
        let v = mesh.world_vert(2);
        assert_eq!(v, Vec3::new(10.0, 1.0, 10.0));
    }

    #[test]
    fn test_invalid_nvp() {
        assert!(PolyMesh::build(&square_cset(0), 7).is_err());
    }
}
