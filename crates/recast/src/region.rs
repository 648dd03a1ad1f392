//! Region partitioning of a compact heightfield
//!
//! Two partitioners are provided. Watershed floods the distance field from
//! its peaks and yields the most regular regions; monotone sweeps rows and is
//! cheaper. Both paint the tile border into dedicated border regions and then
//! share the same filtering pass, which removes tiny islands and merges small
//! regions into neighbours.

use recast_common::{Error, Result};

use super::compact_heightfield::CompactHeightfield;
use super::{RC_BORDER_REG, RC_NULL_AREA};

const NB_STACKS: usize = 8;
const EXPAND_ITERS: usize = 8;
const NULL_NEI: u16 = 0xffff;

#[derive(Debug, Clone, Copy)]
struct LevelStackEntry {
    x: i32,
    z: i32,
    index: Option<usize>,
}

fn paint_rect_region(
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    (minx, maxx, minz, maxz): (i32, i32, i32, i32),
    reg_id: u16,
) {
    for z in minz..maxz {
        for x in minx..maxx {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] != RC_NULL_AREA {
                    src_reg[i] = reg_id;
                }
            }
        }
    }
}

/// Paints the four border strips. Returns the next free region id.
fn paint_border(chf: &CompactHeightfield, src_reg: &mut [u16], border_size: i32, mut id: u16) -> u16 {
    if border_size <= 0 {
        return id;
    }
    let w = chf.width;
    let h = chf.height;
    let bw = w.min(border_size);
    let bh = h.min(border_size);

    paint_rect_region(chf, src_reg, (0, bw, 0, h), id | RC_BORDER_REG);
    id += 1;
    paint_rect_region(chf, src_reg, (w - bw, w, 0, h), id | RC_BORDER_REG);
    id += 1;
    paint_rect_region(chf, src_reg, (0, w, 0, bh), id | RC_BORDER_REG);
    id += 1;
    paint_rect_region(chf, src_reg, (0, w, h - bh, h), id | RC_BORDER_REG);
    id += 1;
    id
}

fn flood_region(
    chf: &CompactHeightfield,
    start: LevelStackEntry,
    level: u16,
    r: u16,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    stack: &mut Vec<LevelStackEntry>,
) -> bool {
    let Some(start_index) = start.index else {
        return false;
    };
    let area = chf.areas[start_index];

    stack.clear();
    stack.push(start);
    src_reg[start_index] = r;
    src_dist[start_index] = 0;

    let lev = level.saturating_sub(2);
    let mut count = 0;

    while let Some(back) = stack.pop() {
        let (cx, cz) = (back.x, back.z);
        let Some(ci) = back.index else { continue };

        // Stop if the span touches a different region, including diagonals
        let mut ar = 0u16;
        for dir in 0..4 {
            let Some((ax, az, ai)) = chf.neighbour(cx, cz, ci, dir) else {
                continue;
            };
            if chf.areas[ai] != area {
                continue;
            }
            let nr = src_reg[ai];
            if nr & RC_BORDER_REG != 0 {
                continue;
            }
            if nr != 0 && nr != r {
                ar = nr;
                break;
            }

            let dir2 = (dir + 1) & 0x3;
            if let Some((_, _, ai2)) = chf.neighbour(ax, az, ai, dir2) {
                if chf.areas[ai2] != area {
                    continue;
                }
                let nr2 = src_reg[ai2];
                if nr2 != 0 && nr2 != r {
                    ar = nr2;
                    break;
                }
            }
        }
        if ar != 0 {
            src_reg[ci] = 0;
            continue;
        }

        count += 1;

        for dir in 0..4 {
            let Some((ax, az, ai)) = chf.neighbour(cx, cz, ci, dir) else {
                continue;
            };
            if chf.areas[ai] != area {
                continue;
            }
            if chf.dist[ai] >= lev && src_reg[ai] == 0 {
                src_reg[ai] = r;
                src_dist[ai] = 0;
                stack.push(LevelStackEntry {
                    x: ax,
                    z: az,
                    index: Some(ai),
                });
            }
        }
    }

    count > 0
}

fn expand_regions(
    max_iter: usize,
    level: u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    stack: &mut Vec<LevelStackEntry>,
    fill_stack: bool,
) {
    if fill_stack {
        stack.clear();
        for z in 0..chf.height {
            for x in 0..chf.width {
                for i in chf.cell_spans(x, z) {
                    if chf.dist[i] >= level && src_reg[i] == 0 && chf.areas[i] != RC_NULL_AREA {
                        stack.push(LevelStackEntry { x, z, index: Some(i) });
                    }
                }
            }
        }
    } else {
        for entry in stack.iter_mut() {
            if let Some(i) = entry.index {
                if src_reg[i] != 0 {
                    entry.index = None;
                }
            }
        }
    }

    let mut dirty: Vec<(usize, u16, u16)> = Vec::new();
    let mut iter = 0;
    while !stack.is_empty() {
        let mut failed = 0;
        dirty.clear();

        for entry in stack.iter_mut() {
            let Some(i) = entry.index else {
                failed += 1;
                continue;
            };

            let mut r = src_reg[i];
            let mut d2 = u16::MAX;
            let area = chf.areas[i];
            for dir in 0..4 {
                let Some((_, _, ai)) = chf.neighbour(entry.x, entry.z, i, dir) else {
                    continue;
                };
                if chf.areas[ai] != area {
                    continue;
                }
                let nr = src_reg[ai];
                let nd = src_dist[ai];
                if nr > 0 && nr & RC_BORDER_REG == 0 && (nd as u32 + 2) < d2 as u32 {
                    r = nr;
                    d2 = nd + 2;
                }
            }

            if r != 0 {
                entry.index = None;
                dirty.push((i, r, d2));
            } else {
                failed += 1;
            }
        }

        for &(i, r, d) in &dirty {
            src_reg[i] = r;
            src_dist[i] = d;
        }

        if failed == stack.len() {
            break;
        }

        if level > 0 {
            iter += 1;
            if iter >= max_iter {
                break;
            }
        }
    }
}

fn sort_cells_by_level(
    start_level: u16,
    chf: &CompactHeightfield,
    src_reg: &[u16],
    stacks: &mut [Vec<LevelStackEntry>],
) {
    let start_level = (start_level >> 1) as i32;
    for stack in stacks.iter_mut() {
        stack.clear();
    }

    for z in 0..chf.height {
        for x in 0..chf.width {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] == RC_NULL_AREA || src_reg[i] != 0 {
                    continue;
                }
                let level = (chf.dist[i] >> 1) as i32;
                let s_id = (start_level - level).max(0) as usize;
                if s_id >= stacks.len() {
                    continue;
                }
                stacks[s_id].push(LevelStackEntry { x, z, index: Some(i) });
            }
        }
    }
}

fn append_stacks(src: &[LevelStackEntry], dst: &mut Vec<LevelStackEntry>, src_reg: &[u16]) {
    for entry in src {
        match entry.index {
            Some(i) if src_reg[i] == 0 => dst.push(*entry),
            _ => {}
        }
    }
}

/// Partitions the walkable spans into regions by flooding the distance field.
///
/// `build_distance_field` must have been run on `chf` first.
pub fn build_regions(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    if chf.dist.len() != chf.span_count() {
        return Err(Error::Recast(
            "distance field must be built before watershed regions".to_string(),
        ));
    }

    let span_count = chf.span_count();
    let mut src_reg = vec![0u16; span_count];
    let mut src_dist = vec![0u16; span_count];

    let mut region_id = paint_border(chf, &mut src_reg, border_size, 1);
    chf.border_size = border_size.max(0);

    let mut level = (chf.max_distance + 1) & !1;
    let mut stacks: Vec<Vec<LevelStackEntry>> = vec![Vec::new(); NB_STACKS];
    let mut stack = Vec::new();
    let mut s_id: usize = NB_STACKS - 1;

    while level > 0 {
        level = level.saturating_sub(2);
        s_id = (s_id + 1) & (NB_STACKS - 1);

        if s_id == 0 {
            sort_cells_by_level(level, chf, &src_reg, &mut stacks);
        } else {
            let (head, tail) = stacks.split_at_mut(s_id);
            append_stacks(&head[s_id - 1], &mut tail[0], &src_reg);
        }

        expand_regions(
            EXPAND_ITERS,
            level,
            chf,
            &mut src_reg,
            &mut src_dist,
            &mut stacks[s_id],
            false,
        );

        let seeds = stacks[s_id].clone();
        for entry in seeds {
            if let Some(i) = entry.index {
                if src_reg[i] == 0
                    && flood_region(chf, entry, level, region_id, &mut src_reg, &mut src_dist, &mut stack)
                {
                    if region_id == 0xfffe {
                        return Err(Error::Recast("region id overflow".to_string()));
                    }
                    region_id += 1;
                }
            }
        }
    }

    expand_regions(
        EXPAND_ITERS * 8,
        0,
        chf,
        &mut src_reg,
        &mut src_dist,
        &mut stack,
        true,
    );

    let max_region_id = merge_and_filter_regions(
        chf,
        min_region_area,
        merge_region_area,
        region_id,
        &mut src_reg,
    );
    chf.max_regions = max_region_id;

    for (span, &reg) in chf.spans.iter_mut().zip(&src_reg) {
        span.reg = reg;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    rid: u16,
    id: u16,
    ns: u16,
    nei: u16,
}

/// Partitions the walkable spans into regions by sweeping rows.
pub fn build_regions_monotone(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let span_count = chf.span_count();
    let mut src_reg = vec![0u16; span_count];

    let mut id = paint_border(chf, &mut src_reg, border_size, 1);
    let border = border_size.max(0);
    chf.border_size = border;

    let mut sweeps: Vec<SweepSpan> = vec![SweepSpan::default(); w.max(1) as usize + 1];
    let mut prev: Vec<u16> = Vec::new();

    for z in border..h - border {
        prev.clear();
        prev.resize(id as usize + 1, 0);
        let mut rid: u16 = 1;

        for x in border..w - border {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] == RC_NULL_AREA {
                    continue;
                }

                // -x neighbour
                let mut previd = 0u16;
                if let Some((_, _, ai)) = chf.neighbour(x, z, i, 0) {
                    if src_reg[ai] & RC_BORDER_REG == 0 && chf.areas[i] == chf.areas[ai] {
                        previd = src_reg[ai];
                    }
                }

                if previd == 0 {
                    previd = rid;
                    rid += 1;
                    if sweeps.len() <= previd as usize {
                        sweeps.resize(previd as usize + 1, SweepSpan::default());
                    }
                    sweeps[previd as usize] = SweepSpan {
                        rid: previd,
                        id: 0,
                        ns: 0,
                        nei: 0,
                    };
                }

                // -z neighbour
                if let Some((_, _, ai)) = chf.neighbour(x, z, i, 3) {
                    let nr = src_reg[ai];
                    if nr != 0 && nr & RC_BORDER_REG == 0 && chf.areas[i] == chf.areas[ai] {
                        let sweep = &mut sweeps[previd as usize];
                        if sweep.nei == 0 || sweep.nei == nr {
                            sweep.nei = nr;
                            sweep.ns += 1;
                            if prev.len() <= nr as usize {
                                prev.resize(nr as usize + 1, 0);
                            }
                            prev[nr as usize] += 1;
                        } else {
                            sweep.nei = NULL_NEI;
                        }
                    }
                }

                src_reg[i] = previd;
            }
        }

        // Create unique ids
        for sweep in sweeps.iter_mut().take(rid as usize).skip(1) {
            if sweep.nei != NULL_NEI
                && sweep.nei != 0
                && prev.get(sweep.nei as usize).copied() == Some(sweep.ns)
            {
                sweep.id = sweep.nei;
            } else {
                sweep.id = id;
                id += 1;
            }
        }

        // Remap local row ids to the unique ones
        for x in border..w - border {
            for i in chf.cell_spans(x, z) {
                let r = src_reg[i];
                if r > 0 && r < rid {
                    src_reg[i] = sweeps[r as usize].id;
                }
            }
        }
    }

    let max_region_id = merge_and_filter_regions(chf, min_region_area, merge_region_area, id, &mut src_reg);
    chf.max_regions = max_region_id;

    for (span, &reg) in chf.spans.iter_mut().zip(&src_reg) {
        span.reg = reg;
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
struct Region {
    span_count: i32,
    id: u16,
    area_type: u8,
    remap: bool,
    visited: bool,
    overlap: bool,
    connections: Vec<u16>,
    floors: Vec<u16>,
}

impl Region {
    fn new(id: u16) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    fn remove_adjacent_neighbours(&mut self) {
        let mut i = 0;
        while self.connections.len() > 1 && i < self.connections.len() {
            let ni = (i + 1) % self.connections.len();
            if self.connections[i] == self.connections[ni] {
                self.connections.remove(ni);
            } else {
                i += 1;
            }
        }
    }

    fn replace_neighbour(&mut self, old_id: u16, new_id: u16) {
        let mut changed = false;
        for c in self.connections.iter_mut() {
            if *c == old_id {
                *c = new_id;
                changed = true;
            }
        }
        for f in self.floors.iter_mut() {
            if *f == old_id {
                *f = new_id;
            }
        }
        if changed {
            self.remove_adjacent_neighbours();
        }
    }

    fn can_merge_with(&self, other: &Region) -> bool {
        if self.area_type != other.area_type {
            return false;
        }
        let shared = self.connections.iter().filter(|&&c| c == other.id).count();
        if shared > 1 {
            return false;
        }
        !self.floors.contains(&other.id)
    }

    fn add_unique_floor(&mut self, id: u16) {
        if !self.floors.contains(&id) {
            self.floors.push(id);
        }
    }

    fn is_connected_to_border(&self) -> bool {
        self.connections.contains(&0)
    }
}

/// Merges `b` into `a`. Fails when they do not share an edge.
fn merge_regions(a: &mut Region, b: &mut Region) -> bool {
    let aid = a.id;
    let bid = b.id;

    let acon = a.connections.clone();
    let bcon = &b.connections;

    let Some(insa) = acon.iter().position(|&c| c == bid) else {
        return false;
    };
    let Some(insb) = bcon.iter().position(|&c| c == aid) else {
        return false;
    };

    a.connections.clear();
    let na = acon.len();
    for i in 0..na.saturating_sub(1) {
        a.connections.push(acon[(insa + 1 + i) % na]);
    }
    let nb = bcon.len();
    for i in 0..nb.saturating_sub(1) {
        a.connections.push(bcon[(insb + 1 + i) % nb]);
    }
    a.remove_adjacent_neighbours();

    for &floor in &b.floors {
        a.add_unique_floor(floor);
    }
    a.span_count += b.span_count;
    b.span_count = 0;
    b.connections.clear();
    true
}

fn is_solid_edge(chf: &CompactHeightfield, src_reg: &[u16], x: i32, z: i32, i: usize, dir: usize) -> bool {
    let r = chf
        .neighbour(x, z, i, dir)
        .map_or(0, |(_, _, ai)| src_reg[ai]);
    r != src_reg[i]
}

/// Walks the outline of the region containing span `i` and records the
/// sequence of neighbouring region ids.
fn walk_region_contour(
    chf: &CompactHeightfield,
    src_reg: &[u16],
    mut x: i32,
    mut z: i32,
    mut i: usize,
    mut dir: usize,
    cont: &mut Vec<u16>,
) {
    let start_dir = dir;
    let start_i = i;

    let mut cur_reg = chf
        .neighbour(x, z, i, dir)
        .map_or(0, |(_, _, ai)| src_reg[ai]);
    cont.push(cur_reg);

    let mut iter = 0;
    loop {
        iter += 1;
        if iter >= 40000 {
            break;
        }

        if is_solid_edge(chf, src_reg, x, z, i, dir) {
            let r = chf
                .neighbour(x, z, i, dir)
                .map_or(0, |(_, _, ai)| src_reg[ai]);
            if r != cur_reg {
                cur_reg = r;
                cont.push(cur_reg);
            }
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

    // Remove adjacent duplicates
    if cont.len() > 1 {
        let mut j = 0;
        while j < cont.len() && cont.len() > 1 {
            let nj = (j + 1) % cont.len();
            if cont[j] == cont[nj] {
                cont.remove(nj);
            } else {
                j += 1;
            }
        }
    }
}

/// Removes islands below `min_region_area`, merges regions below
/// `merge_region_area` into their smallest compatible neighbour and
/// compacts the ids. Returns the new region count (exclusive max id).
fn merge_and_filter_regions(
    chf: &CompactHeightfield,
    min_region_area: i32,
    merge_region_area: i32,
    max_region_id: u16,
    src_reg: &mut [u16],
) -> u16 {
    let nreg = max_region_id as usize + 1;
    let mut regions: Vec<Region> = (0..nreg).map(|i| Region::new(i as u16)).collect();

    // Gather region statistics, neighbours and overlapping floors
    for z in 0..chf.height {
        for x in 0..chf.width {
            let range = chf.cell_spans(x, z);
            for i in range.clone() {
                let r = src_reg[i] as usize;
                if r == 0 || r >= nreg {
                    continue;
                }

                regions[r].span_count += 1;

                for j in range.clone() {
                    if i == j {
                        continue;
                    }
                    let floor_id = src_reg[j] as usize;
                    if floor_id == 0 || floor_id >= nreg {
                        continue;
                    }
                    if floor_id == r {
                        regions[r].overlap = true;
                    }
                    regions[r].add_unique_floor(floor_id as u16);
                }

                if !regions[r].connections.is_empty() {
                    continue;
                }
                regions[r].area_type = chf.areas[i];

                if let Some(dir) = (0..4).find(|&d| is_solid_edge(chf, src_reg, x, z, i, d)) {
                    let mut cont = Vec::new();
                    walk_region_contour(chf, src_reg, x, z, i, dir, &mut cont);
                    regions[r].connections = cont;
                }
            }
        }
    }

    // Remove too small regions
    let mut stack: Vec<usize> = Vec::new();
    let mut trace: Vec<usize> = Vec::new();
    for i in 0..nreg {
        {
            let reg = &regions[i];
            if reg.id == 0 || reg.id & RC_BORDER_REG != 0 || reg.span_count == 0 || reg.visited {
                continue;
            }
        }

        let mut connects_to_border = false;
        let mut span_count = 0;
        stack.clear();
        trace.clear();
        regions[i].visited = true;
        stack.push(i);

        while let Some(ri) = stack.pop() {
            span_count += regions[ri].span_count;
            trace.push(ri);

            let connections = regions[ri].connections.clone();
            for conn in connections {
                if conn & RC_BORDER_REG != 0 {
                    connects_to_border = true;
                    continue;
                }
                let nei = &mut regions[conn as usize];
                if nei.visited || nei.id == 0 || nei.id & RC_BORDER_REG != 0 {
                    continue;
                }
                nei.visited = true;
                stack.push(conn as usize);
            }
        }

        if span_count < min_region_area && !connects_to_border {
            for &t in &trace {
                regions[t].span_count = 0;
                regions[t].id = 0;
            }
        }
    }

    // Merge too small regions into neighbours
    loop {
        let mut merge_count = 0;
        for i in 0..nreg {
            let (reg_id, target_id) = {
                let reg = &regions[i];
                if reg.id == 0 || reg.id & RC_BORDER_REG != 0 || reg.overlap || reg.span_count == 0 {
                    continue;
                }
                if reg.span_count > merge_region_area && reg.is_connected_to_border() {
                    continue;
                }

                let mut smallest = i32::MAX;
                let mut merge_id = reg.id;
                for &conn in &reg.connections {
                    if conn & RC_BORDER_REG != 0 {
                        continue;
                    }
                    let mreg = &regions[conn as usize];
                    if mreg.id == 0 || mreg.id & RC_BORDER_REG != 0 || mreg.overlap {
                        continue;
                    }
                    if mreg.span_count < smallest && reg.can_merge_with(mreg) && mreg.can_merge_with(reg) {
                        smallest = mreg.span_count;
                        merge_id = mreg.id;
                    }
                }
                (reg.id, merge_id)
            };

            if target_id == reg_id {
                continue;
            }

            let target_index = target_id as usize;
            if target_index == i {
                continue;
            }
            let mut source = std::mem::take(&mut regions[i]);
            let merged = merge_regions(&mut regions[target_index], &mut source);
            regions[i] = source;

            if merged {
                for reg in regions.iter_mut() {
                    if reg.id == 0 || reg.id & RC_BORDER_REG != 0 {
                        continue;
                    }
                    if reg.id == reg_id {
                        reg.id = target_id;
                    }
                    reg.replace_neighbour(reg_id, target_id);
                }
                merge_count += 1;
            }
        }
        if merge_count == 0 {
            break;
        }
    }

    // Compress region ids
    for reg in regions.iter_mut() {
        reg.remap = reg.id != 0 && reg.id & RC_BORDER_REG == 0;
    }
    let mut reg_id_gen: u16 = 0;
    for i in 0..nreg {
        if !regions[i].remap {
            continue;
        }
        let old_id = regions[i].id;
        reg_id_gen += 1;
        for reg in regions.iter_mut().skip(i) {
            if reg.id == old_id {
                reg.id = reg_id_gen;
                reg.remap = false;
            }
        }
    }

    for reg in src_reg.iter_mut() {
        if *reg & RC_BORDER_REG == 0 {
            *reg = regions.get(*reg as usize).map_or(0, |r| r.id);
        }
    }

    reg_id_gen + 1
}
