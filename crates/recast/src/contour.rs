//! Region outlines traced from a compact heightfield

use glam::Vec3;
use log::warn;
use recast_common::{next_index, prev_index, Error, Result};

use super::compact_heightfield::CompactHeightfield;
use super::{RC_AREA_BORDER, RC_BORDER_REG, RC_BORDER_VERTEX, RC_CONTOUR_REG_MASK};

/// A simplified region outline.
///
/// Vertices are `[x, y, z, flags]` in voxel units relative to the set's
/// `bmin`. The low 16 bits of `flags` hold the neighbouring region id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contour {
    /// Simplified vertices
    pub verts: Vec<[i32; 4]>,
    /// Raw vertices as traced along the region edge
    pub rverts: Vec<[i32; 4]>,
    /// Region id
    pub reg: u16,
    /// Area id
    pub area: u8,
}

/// All contours of one compact heightfield.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourSet {
    pub contours: Vec<Contour>,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    /// Width excluding the border
    pub width: i32,
    /// Height excluding the border
    pub height: i32,
    pub border_size: i32,
    pub max_error: f32,
}

impl ContourSet {
    /// Traces and simplifies the outline of every region in `chf`.
    ///
    /// Regions must have been built. Holes are spliced into the outline of
    /// the region that contains them.
    pub fn build(chf: &CompactHeightfield, max_error: f32, max_edge_len: i32) -> Result<Self> {
        let border_size = chf.border_size;
        let mut bmin = chf.bmin;
        let mut bmax = chf.bmax;
        if border_size > 0 {
            let pad = border_size as f32 * chf.cs;
            bmin.x += pad;
            bmin.z += pad;
            bmax.x -= pad;
            bmax.z -= pad;
        }

        let mut cset = ContourSet {
            contours: Vec::new(),
            bmin,
            bmax,
            cs: chf.cs,
            ch: chf.ch,
            width: chf.width - border_size * 2,
            height: chf.height - border_size * 2,
            border_size,
            max_error,
        };

        let mut flags = vec![0u8; chf.span_count()];

        // Mark the edges that separate a span from another region
        for z in 0..chf.height {
            for x in 0..chf.width {
                for i in chf.cell_spans(x, z) {
                    let reg = chf.spans[i].reg;
                    if reg == 0 || reg & RC_BORDER_REG != 0 {
                        flags[i] = 0;
                        continue;
                    }
                    let mut res = 0u8;
                    for dir in 0..4 {
                        let r = chf.neighbour(x, z, i, dir).map_or(0, |(_, _, ai)| chf.spans[ai].reg);
                        if r == reg {
                            res |= 1 << dir;
                        }
                    }
                    flags[i] = res ^ 0xf;
                }
            }
        }

        let mut verts: Vec<[i32; 4]> = Vec::with_capacity(256);
        let mut simplified: Vec<[i32; 4]> = Vec::with_capacity(64);

        for z in 0..chf.height {
            for x in 0..chf.width {
                for i in chf.cell_spans(x, z) {
                    if flags[i] == 0 || flags[i] == 0xf {
                        flags[i] = 0;
                        continue;
                    }
                    let reg = chf.spans[i].reg;
                    if reg == 0 || reg & RC_BORDER_REG != 0 {
                        continue;
                    }
                    let area = chf.areas[i];

                    verts.clear();
                    simplified.clear();

                    walk_contour(chf, x, z, i, &mut flags, &mut verts);
                    simplify_contour(&verts, &mut simplified, max_error, max_edge_len);
                    remove_degenerate_segments(&mut simplified);

                    if simplified.len() >= 3 {
                        let offset = |v: &[i32; 4]| -> [i32; 4] {
                            [v[0] - border_size, v[1], v[2] - border_size, v[3]]
                        };
                        cset.contours.push(Contour {
                            verts: simplified.iter().map(offset).collect(),
                            rverts: verts.iter().map(offset).collect(),
                            reg,
                            area,
                        });
                    }
                }
            }
        }

        cset.merge_holes(chf.max_regions)?;
        Ok(cset)
    }

    fn merge_holes(&mut self, max_regions: u16) -> Result<()> {
        let winding: Vec<i32> = self
            .contours
            .iter()
            .map(|c| if calc_area_of_polygon_2d(&c.verts) < 0 { -1 } else { 1 })
            .collect();
        if !winding.iter().any(|&w| w < 0) {
            return Ok(());
        }

        let nregions = max_regions as usize + 1;
        let mut outlines: Vec<Option<usize>> = vec![None; nregions];
        let mut holes: Vec<Vec<usize>> = vec![Vec::new(); nregions];

        for (i, contour) in self.contours.iter().enumerate() {
            let reg = contour.reg as usize;
            if reg >= nregions {
                return Err(Error::Recast(format!("contour region {reg} out of range")));
            }
            if winding[i] > 0 {
                if outlines[reg].is_some() {
                    return Err(Error::Recast(format!("multiple outlines for region {reg}")));
                }
                outlines[reg] = Some(i);
            } else {
                holes[reg].push(i);
            }
        }

        for reg in 0..nregions {
            if holes[reg].is_empty() {
                continue;
            }
            let Some(outline) = outlines[reg] else {
                warn!("region {reg} has holes but no outline");
                continue;
            };
            self.merge_region_holes(outline, &holes[reg]);
        }

        self.contours.retain(|c| !c.verts.is_empty());
        Ok(())
    }

    fn merge_region_holes(&mut self, outline: usize, hole_indices: &[usize]) {
        struct Hole {
            contour: usize,
            minx: i32,
            minz: i32,
            leftmost: usize,
        }

        let mut holes: Vec<Hole> = hole_indices
            .iter()
            .map(|&contour| {
                let (minx, minz, leftmost) = find_left_most_vertex(&self.contours[contour].verts);
                Hole {
                    contour,
                    minx,
                    minz,
                    leftmost,
                }
            })
            .collect();
        holes.sort_by(|a, b| (a.minx, a.minz).cmp(&(b.minx, b.minz)));

        for i in 0..holes.len() {
            let hole_verts = self.contours[holes[i].contour].verts.clone();
            let n = hole_verts.len();
            let mut best_vertex = holes[i].leftmost;
            let mut index = None;

            for _ in 0..n {
                let corner = hole_verts[best_vertex];
                let outline_verts = &self.contours[outline].verts;

                // Outline vertices that can see the hole corner, nearest first
                let mut diags: Vec<(usize, i32)> = (0..outline_verts.len())
                    .filter(|&j| in_cone(j, outline_verts, &corner))
                    .map(|j| {
                        let dx = outline_verts[j][0] - corner[0];
                        let dz = outline_verts[j][2] - corner[2];
                        (j, dx * dx + dz * dz)
                    })
                    .collect();
                diags.sort_by_key(|&(_, d)| d);

                for &(vert, _) in &diags {
                    let pt = outline_verts[vert];
                    let mut intersect = intersect_seg_contour(&pt, &corner, Some(vert), outline_verts);
                    for later in &holes[i..] {
                        if intersect {
                            break;
                        }
                        intersect |= intersect_seg_contour(&pt, &corner, None, &self.contours[later.contour].verts);
                    }
                    if !intersect {
                        index = Some(vert);
                        break;
                    }
                }
                if index.is_some() {
                    break;
                }
                best_vertex = (best_vertex + 1) % n;
            }

            let Some(ia) = index else {
                warn!(
                    "failed to find merge points for hole in region {}",
                    self.contours[outline].reg
                );
                continue;
            };

            let hole = std::mem::take(&mut self.contours[holes[i].contour].verts);
            self.contours[holes[i].contour].rverts.clear();
            let merged = merge_contours(&self.contours[outline].verts, &hole, ia, best_vertex);
            self.contours[outline].verts = merged;
        }
    }
}

fn get_corner_height(chf: &CompactHeightfield, x: i32, z: i32, i: usize, dir: usize) -> (i32, bool) {
    let s = &chf.spans[i];
    let mut ch = s.y as i32;
    let dirp = (dir + 1) & 0x3;
    let mut regs = [0u32; 4];

    let tag = |idx: usize| chf.spans[idx].reg as u32 | ((chf.areas[idx] as u32) << 16);
    regs[0] = tag(i);

    if let Some((ax, az, ai)) = chf.neighbour(x, z, i, dir) {
        ch = ch.max(chf.spans[ai].y as i32);
        regs[1] = tag(ai);
        if let Some((_, _, ai2)) = chf.neighbour(ax, az, ai, dirp) {
            ch = ch.max(chf.spans[ai2].y as i32);
            regs[2] = tag(ai2);
        }
    }
    if let Some((ax, az, ai)) = chf.neighbour(x, z, i, dirp) {
        ch = ch.max(chf.spans[ai].y as i32);
        regs[3] = tag(ai);
        if let Some((_, _, ai2)) = chf.neighbour(ax, az, ai, dir) {
            ch = ch.max(chf.spans[ai2].y as i32);
            regs[2] = tag(ai2);
        }
    }

    // A vertex between two border regions and two same-area interior
    // regions lies on the tile border and can be removed later
    let border = RC_BORDER_REG as u32;
    let mut is_border_vertex = false;
    for j in 0..4 {
        let a = j;
        let b = (j + 1) & 0x3;
        let c = (j + 2) & 0x3;
        let d = (j + 3) & 0x3;

        let two_same_exts = (regs[a] & regs[b] & border) != 0 && regs[a] == regs[b];
        let two_ints = ((regs[c] | regs[d]) & border) == 0;
        let ints_same_area = (regs[c] >> 16) == (regs[d] >> 16);
        let no_zeros = regs.iter().all(|&r| r != 0);
        if two_same_exts && two_ints && ints_same_area && no_zeros {
            is_border_vertex = true;
            break;
        }
    }

    (ch, is_border_vertex)
}

fn walk_contour(
    chf: &CompactHeightfield,
    mut x: i32,
    mut z: i32,
    mut i: usize,
    flags: &mut [u8],
    points: &mut Vec<[i32; 4]>,
) {
    let mut dir = 0;
    while dir < 4 && flags[i] & (1 << dir) == 0 {
        dir += 1;
    }
    if dir == 4 {
        return;
    }

    let start_dir = dir;
    let start_i = i;
    let area = chf.areas[i];

    for _ in 0..40000 {
        if flags[i] & (1 << dir) != 0 {
            let (py, is_border_vertex) = get_corner_height(chf, x, z, i, dir);
            let mut px = x;
            let mut pz = z;
            match dir {
                0 => pz += 1,
                1 => {
                    px += 1;
                    pz += 1;
                }
                2 => px += 1,
                _ => {}
            }

            let mut r = 0i32;
            let mut is_area_border = false;
            if let Some((_, _, ai)) = chf.neighbour(x, z, i, dir) {
                r = chf.spans[ai].reg as i32;
                if area != chf.areas[ai] {
                    is_area_border = true;
                }
            }
            if is_border_vertex {
                r |= RC_BORDER_VERTEX;
            }
            if is_area_border {
                r |= RC_AREA_BORDER;
            }
            points.push([px, py, pz, r]);

            flags[i] &= !(1 << dir);
            dir = (dir + 1) & 0x3;
        } else {
            let Some((nx, nz, ni)) = chf.neighbour(x, z, i, dir) else {
                return;
            };
            x = nx;
            z = nz;
            i = ni;
            dir = (dir + 3) & 0x3;
        }

        if start_i == i && start_dir == dir {
            break;
        }
    }
}

fn distance_pt_seg(x: i32, z: i32, px: i32, pz: i32, qx: i32, qz: i32) -> f32 {
    let pqx = (qx - px) as f32;
    let pqz = (qz - pz) as f32;
    let dx = (x - px) as f32;
    let dz = (z - pz) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);

    let dx = px as f32 + t * pqx - x as f32;
    let dz = pz as f32 + t * pqz - z as f32;
    dx * dx + dz * dz
}

fn simplify_contour(points: &[[i32; 4]], simplified: &mut Vec<[i32; 4]>, max_error: f32, max_edge_len: i32) {
    let pn = points.len();
    if pn == 0 {
        return;
    }

    let has_connections = points.iter().any(|p| p[3] & RC_CONTOUR_REG_MASK != 0);
    if has_connections {
        // Keep every point where the neighbouring region or area changes
        for i in 0..pn {
            let ii = (i + 1) % pn;
            let different_regs = (points[i][3] & RC_CONTOUR_REG_MASK) != (points[ii][3] & RC_CONTOUR_REG_MASK);
            let area_borders = (points[i][3] & RC_AREA_BORDER) != (points[ii][3] & RC_AREA_BORDER);
            if different_regs || area_borders {
                simplified.push([points[i][0], points[i][1], points[i][2], i as i32]);
            }
        }
    }

    if simplified.is_empty() {
        // Island outline: seed with the lower-left and upper-right corners
        let mut ll = 0;
        let mut ur = 0;
        for (i, p) in points.iter().enumerate() {
            let (x, z) = (p[0], p[2]);
            if x < points[ll][0] || (x == points[ll][0] && z < points[ll][2]) {
                ll = i;
            }
            if x > points[ur][0] || (x == points[ur][0] && z > points[ur][2]) {
                ur = i;
            }
        }
        simplified.push([points[ll][0], points[ll][1], points[ll][2], ll as i32]);
        simplified.push([points[ur][0], points[ur][1], points[ur][2], ur as i32]);
    }

    // Add points until every raw point is within the error tolerance
    let max_error_sqr = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();

        let mut ax = simplified[i][0];
        let mut az = simplified[i][2];
        let ai = simplified[i][3] as usize;
        let mut bx = simplified[ii][0];
        let mut bz = simplified[ii][2];
        let bi = simplified[ii][3] as usize;

        let mut maxd = 0.0f32;
        let mut maxi: Option<usize> = None;

        // Traverse the segment in lexicographic order so the result does
        // not depend on the winding of the edge
        let (cinc, mut ci, endi) = if bx > ax || (bx == ax && bz > az) {
            (1, (ai + 1) % pn, bi)
        } else {
            std::mem::swap(&mut ax, &mut bx);
            std::mem::swap(&mut az, &mut bz);
            (pn - 1, (bi + pn - 1) % pn, ai)
        };

        // Only tessellate outer edges or edges between areas
        if points[ci][3] & RC_CONTOUR_REG_MASK == 0 || points[ci][3] & RC_AREA_BORDER != 0 {
            while ci != endi {
                let d = distance_pt_seg(points[ci][0], points[ci][2], ax, az, bx, bz);
                if d > maxd {
                    maxd = d;
                    maxi = Some(ci);
                }
                ci = (ci + cinc) % pn;
            }
        }

        match maxi {
            Some(m) if maxd > max_error_sqr => {
                simplified.insert(i + 1, [points[m][0], points[m][1], points[m][2], m as i32]);
            }
            _ => i += 1,
        }
    }

    // Split long wall edges
    if max_edge_len > 0 {
        let max_edge_sqr = max_edge_len * max_edge_len;
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();
            let ax = simplified[i][0];
            let az = simplified[i][2];
            let ai = simplified[i][3] as usize;
            let bx = simplified[ii][0];
            let bz = simplified[ii][2];
            let bi = simplified[ii][3] as usize;

            let mut maxi = None;
            let ci = (ai + 1) % pn;
            if points[ci][3] & RC_CONTOUR_REG_MASK == 0 {
                let dx = bx - ax;
                let dz = bz - az;
                if dx * dx + dz * dz > max_edge_sqr {
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        maxi = Some(if bx > ax || (bx == ax && bz > az) {
                            (ai + n / 2) % pn
                        } else {
                            (ai + (n + 1) / 2) % pn
                        });
                    }
                }
            }

            match maxi {
                Some(m) => simplified.insert(i + 1, [points[m][0], points[m][1], points[m][2], m as i32]),
                None => i += 1,
            }
        }
    }

    for v in simplified.iter_mut() {
        // Edge flags come from the raw point after the vertex, the border
        // vertex flag from the vertex itself
        let ai = (v[3] as usize + 1) % pn;
        let bi = v[3] as usize;
        v[3] = (points[ai][3] & (RC_CONTOUR_REG_MASK | RC_AREA_BORDER)) | (points[bi][3] & RC_BORDER_VERTEX);
    }
}

fn remove_degenerate_segments(simplified: &mut Vec<[i32; 4]>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = next_index(i, simplified.len());
        if simplified.len() > 1 && vequal(&simplified[i], &simplified[ni]) {
            simplified.remove(i);
        } else {
            i += 1;
        }
    }
}

fn calc_area_of_polygon_2d(verts: &[[i32; 4]]) -> i32 {
    let n = verts.len();
    let mut area = 0;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = &verts[i];
        let vj = &verts[j];
        area += vi[0] * vj[2] - vj[0] * vi[2];
        j = i;
    }
    (area + 1) / 2
}

fn find_left_most_vertex(verts: &[[i32; 4]]) -> (i32, i32, usize) {
    let mut minx = verts[0][0];
    let mut minz = verts[0][2];
    let mut leftmost = 0;
    for (i, v) in verts.iter().enumerate().skip(1) {
        if v[0] < minx || (v[0] == minx && v[2] < minz) {
            minx = v[0];
            minz = v[2];
            leftmost = i;
        }
    }
    (minx, minz, leftmost)
}

fn merge_contours(ca: &[[i32; 4]], cb: &[[i32; 4]], ia: usize, ib: usize) -> Vec<[i32; 4]> {
    let mut verts = Vec::with_capacity(ca.len() + cb.len() + 2);
    for i in 0..=ca.len() {
        verts.push(ca[(ia + i) % ca.len()]);
    }
    for i in 0..=cb.len() {
        verts.push(cb[(ib + i) % cb.len()]);
    }
    verts
}

pub(crate) fn area2(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> i32 {
    (b[0] - a[0]) * (c[2] - a[2]) - (c[0] - a[0]) * (b[2] - a[2])
}

pub(crate) fn left(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    area2(a, b, c) < 0
}

pub(crate) fn left_on(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    area2(a, b, c) <= 0
}

fn collinear(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    area2(a, b, c) == 0
}

/// Proper intersection: the segments cross at a point interior to both.
fn intersect_prop(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4], d: &[i32; 4]) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

fn between(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[2] <= c[2] && c[2] <= b[2]) || (a[2] >= c[2] && c[2] >= b[2])
    }
}

pub(crate) fn intersect(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4], d: &[i32; 4]) -> bool {
    intersect_prop(a, b, c, d) || between(a, b, c) || between(a, b, d) || between(c, d, a) || between(c, d, b)
}

pub(crate) fn vequal(a: &[i32; 4], b: &[i32; 4]) -> bool {
    a[0] == b[0] && a[2] == b[2]
}

fn intersect_seg_contour(d0: &[i32; 4], d1: &[i32; 4], skip: Option<usize>, verts: &[[i32; 4]]) -> bool {
    let n = verts.len();
    for k in 0..n {
        let k1 = next_index(k, n);
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p0 = &verts[k];
        let p1 = &verts[k1];
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

fn in_cone(i: usize, verts: &[[i32; 4]], pj: &[i32; 4]) -> bool {
    let n = verts.len();
    let pi = &verts[i];
    let pi1 = &verts[next_index(i, n)];
    let pin1 = &verts[prev_index(i, n)];

    // Convex corner
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}
