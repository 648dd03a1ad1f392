//! Compact heightfield implementation for Recast
//!
//! The compact heightfield stores the open space above every walkable span
//! along with packed connections to the neighbouring spans. It is the input
//! to erosion, region partitioning and contour tracing.

use glam::Vec3;
use recast_common::Result;

use super::heightfield::Heightfield;
use super::{RC_NULL_AREA, RC_SPAN_MAX_HEIGHT};

/// Value of a connection slot without a neighbour
pub const RC_NOT_CONNECTED: u32 = 0x3f;
const MAX_LAYERS: usize = (RC_NOT_CONNECTED - 1) as usize;

const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
const DIR_OFFSET_Z: [i32; 4] = [0, 1, 0, -1];

/// X offset of the neighbour in direction `dir` (0 = -x, 1 = +z, 2 = +x, 3 = -z)
#[inline]
pub fn get_dir_offset_x(dir: usize) -> i32 {
    DIR_OFFSET_X[dir & 0x3]
}

/// Z offset of the neighbour in direction `dir`
#[inline]
pub fn get_dir_offset_y(dir: usize) -> i32 {
    DIR_OFFSET_Z[dir & 0x3]
}

/// Cell in the compact heightfield
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactCell {
    /// Index of the first span in the cell
    pub index: u32,
    /// Number of spans in the cell
    pub count: u32,
}

/// Span in the compact heightfield
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactSpan {
    /// Lower extent of the open space (the floor)
    pub y: u16,
    /// Region id
    pub reg: u16,
    /// Packed neighbour connections, 6 bits per direction
    pub con: u32,
    /// Height of the open space
    pub h: u8,
}

impl CompactSpan {
    /// Layer index of the connected neighbour in `dir`, if any
    #[inline]
    pub fn get_con(&self, dir: usize) -> Option<usize> {
        let shift = (dir as u32) * 6;
        let value = (self.con >> shift) & 0x3f;
        if value == RC_NOT_CONNECTED {
            None
        } else {
            Some(value as usize)
        }
    }

    #[inline]
    #[cfg(test)]
    fn set_con(&mut self, dir: usize, layer: u32) {
        let shift = (dir as u32) * 6;
        self.con = (self.con & !(0x3f << shift)) | ((layer & 0x3f) << shift);
    }
}

/// A compact, static heightfield representing unobstructed space
#[derive(Debug, Clone, PartialEq)]
pub struct CompactHeightfield {
    /// Width of the heightfield (along x-axis in cell units)
    pub width: i32,
    /// Height of the heightfield (along z-axis in cell units)
    pub height: i32,
    /// Walkable height used during the build
    pub walkable_height: i32,
    /// Walkable climb used during the build
    pub walkable_climb: i32,
    /// Border size, in cells, the regions were built with
    pub border_size: i32,
    /// Maximum value in the distance field
    pub max_distance: u16,
    /// Highest region id (exclusive)
    pub max_regions: u16,

    /// Minimum bounds of the heightfield's AABB
    pub bmin: Vec3,
    /// Maximum bounds of the heightfield's AABB
    pub bmax: Vec3,

    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,

    /// Cells of the heightfield
    pub cells: Vec<CompactCell>,
    /// Spans of the heightfield
    pub spans: Vec<CompactSpan>,
    /// Distance to the nearest border, per span
    pub dist: Vec<u16>,
    /// Area id, per span
    pub areas: Vec<u8>,
}

impl CompactHeightfield {
    /// Builds a compact heightfield from the walkable spans of `hf`
    pub fn build_from_heightfield(
        hf: &Heightfield,
        walkable_height: i32,
        walkable_climb: i32,
    ) -> Result<Self> {
        let w = hf.width;
        let h = hf.height;
        let span_count = hf.walkable_span_count();

        let mut chf = Self {
            width: w,
            height: h,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_distance: 0,
            max_regions: 0,
            bmin: hf.bmin,
            bmax: Vec3::new(hf.bmax.x, hf.bmax.y + walkable_height as f32 * hf.ch, hf.bmax.z),
            cs: hf.cs,
            ch: hf.ch,
            cells: vec![CompactCell::default(); (w * h) as usize],
            spans: Vec::with_capacity(span_count),
            dist: Vec::new(),
            areas: Vec::with_capacity(span_count),
        };

        let max_height = RC_SPAN_MAX_HEIGHT as i32;
        for z in 0..h {
            for x in 0..w {
                let column = hf.column(x, z);
                let cell = &mut chf.cells[(x + z * w) as usize];
                cell.index = chf.spans.len() as u32;
                cell.count = 0;

                for (si, span) in column.iter().enumerate() {
                    if span.area == RC_NULL_AREA {
                        continue;
                    }
                    let bot = span.smax as i32;
                    let top = column.get(si + 1).map_or(max_height, |n| n.smin as i32);
                    chf.spans.push(CompactSpan {
                        y: bot.clamp(0, 0xffff) as u16,
                        reg: 0,
                        con: 0,
                        h: (top - bot).clamp(0, 0xff) as u8,
                    });
                    chf.areas.push(span.area);
                    cell.count += 1;
                }
            }
        }

        let mut too_high_neighbour = 0usize;
        for z in 0..h {
            for x in 0..w {
                let cell = chf.cells[(x + z * w) as usize];
                for i in cell.index as usize..(cell.index + cell.count) as usize {
                    let s = chf.spans[i];
                    let mut con = 0u32;
                    for dir in 0..4 {
                        let shift = (dir as u32) * 6;
                        con |= RC_NOT_CONNECTED << shift;

                        let nx = x + get_dir_offset_x(dir);
                        let nz = z + get_dir_offset_y(dir);
                        if nx < 0 || nz < 0 || nx >= w || nz >= h {
                            continue;
                        }

                        let nc = chf.cells[(nx + nz * w) as usize];
                        for k in nc.index as usize..(nc.index + nc.count) as usize {
                            let ns = chf.spans[k];
                            let bot = (s.y as i32).max(ns.y as i32);
                            let top = (s.y as i32 + s.h as i32).min(ns.y as i32 + ns.h as i32);

                            if top - bot >= walkable_height
                                && (ns.y as i32 - s.y as i32).abs() <= walkable_climb
                            {
                                let layer = k - nc.index as usize;
                                if layer > MAX_LAYERS {
                                    too_high_neighbour = too_high_neighbour.max(layer);
                                    continue;
                                }
                                con &= !(RC_NOT_CONNECTED << shift);
                                con |= (layer as u32) << shift;
                                break;
                            }
                        }
                    }
                    chf.spans[i].con = con;
                }
            }
        }

        if too_high_neighbour > MAX_LAYERS {
            log::warn!(
                "compact heightfield has too many layers {} (max {})",
                too_high_neighbour,
                MAX_LAYERS
            );
        }

        Ok(chf)
    }

    /// Number of spans
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Index range of the spans in cell (x, z)
    #[inline]
    pub fn cell_spans(&self, x: i32, z: i32) -> std::ops::Range<usize> {
        let c = self.cells[(x + z * self.width) as usize];
        c.index as usize..(c.index + c.count) as usize
    }

    /// Neighbour span index of span `i` at (x, z) in direction `dir`
    #[inline]
    pub fn neighbour(&self, x: i32, z: i32, i: usize, dir: usize) -> Option<(i32, i32, usize)> {
        let layer = self.spans[i].get_con(dir)?;
        let nx = x + get_dir_offset_x(dir);
        let nz = z + get_dir_offset_y(dir);
        let c = self.cells[(nx + nz * self.width) as usize];
        Some((nx, nz, c.index as usize + layer))
    }

    /// Number of spans whose area is walkable
    pub fn walkable_span_count(&self) -> usize {
        self.areas.iter().filter(|&&a| a != RC_NULL_AREA).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RC_WALKABLE_AREA;

    fn flat_field(w: i32, h: i32) -> Heightfield {
        let mut hf = Heightfield::new(w, h, Vec3::ZERO, Vec3::new(w as f32, 5.0, h as f32), 1.0, 0.5);
        for z in 0..h {
            for x in 0..w {
                hf.add_span(x, z, 0, 2, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        hf
    }

    #[test]
    fn test_con_packing() {
        let mut span = CompactSpan::default();
        for dir in 0..4 {
            span.set_con(dir, RC_NOT_CONNECTED);
        }
        span.set_con(2, 5);
        assert_eq!(span.get_con(2), Some(5));
        assert_eq!(span.get_con(0), None);
        assert_eq!(span.get_con(3), None);
    }

    #[test]
    fn test_flat_field_connections() {
        let hf = flat_field(3, 3);
        let chf = CompactHeightfield::build_from_heightfield(&hf, 3, 1).unwrap();
        assert_eq!(chf.span_count(), 9);

        let center = chf.cell_spans(1, 1).start;
        for dir in 0..4 {
            assert!(chf.neighbour(1, 1, center, dir).is_some());
        }

        let corner = chf.cell_spans(0, 0).start;
        assert!(chf.neighbour(0, 0, corner, 0).is_none());
        assert!(chf.neighbour(0, 0, corner, 3).is_none());
        let (nx, nz, _) = chf.neighbour(0, 0, corner, 2).unwrap();
        assert_eq!((nx, nz), (1, 0));
    }

    #[test]
    fn test_step_too_high_is_not_connected() {
        let mut hf = flat_field(2, 1);
        hf.add_span(1, 0, 2, 8, RC_WALKABLE_AREA, 1).unwrap();
        let chf = CompactHeightfield::build_from_heightfield(&hf, 3, 2).unwrap();

        let left = chf.cell_spans(0, 0).start;
        assert!(chf.neighbour(0, 0, left, 2).is_none());
    }

    #[test]
    fn test_unwalkable_spans_are_dropped() {
        let mut hf = flat_field(2, 2);
        hf.add_span(0, 0, 10, 12, RC_NULL_AREA, 1).unwrap();
        let chf = CompactHeightfield::build_from_heightfield(&hf, 3, 1).unwrap();
        assert_eq!(chf.span_count(), 4);
        // Open space above the floor ends at the unwalkable span
        let s = chf.spans[chf.cell_spans(0, 0).start];
        assert_eq!(s.y, 2);
        assert_eq!(s.h, 8);
    }
}
