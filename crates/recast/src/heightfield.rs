//! Heightfield implementation for Recast
//!
//! A heightfield is a grid of columns, each holding the solid spans produced
//! by rasterization, ordered bottom to top.

use glam::Vec3;
use recast_common::{Error, Result};

use super::{RC_NULL_AREA, RC_SPAN_MAX_HEIGHT};

/// A solid span within a heightfield column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Lower limit of the span, in cell heights
    pub smin: u16,
    /// Upper limit of the span, in cell heights
    pub smax: u16,
    /// Area id of the top surface
    pub area: u8,
}

impl Span {
    pub fn new(smin: u16, smax: u16, area: u8) -> Self {
        Self { smin, smax, area }
    }
}

/// Dynamic heightfield representing obstructed space
#[derive(Debug, Clone)]
pub struct Heightfield {
    /// Width of the heightfield (along x-axis in cell units)
    pub width: i32,
    /// Height of the heightfield (along z-axis in cell units)
    pub height: i32,

    /// Minimum bounds of the heightfield's AABB
    pub bmin: Vec3,
    /// Maximum bounds of the heightfield's AABB
    pub bmax: Vec3,

    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,

    /// Columns in row-major order, spans sorted by `smin`
    columns: Vec<Vec<Span>>,
}

impl Heightfield {
    /// Creates a new empty heightfield
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Self {
        let cells = (width.max(0) * height.max(0)) as usize;
        Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns: vec![Vec::new(); cells],
        }
    }

    #[inline]
    fn column_index(&self, x: i32, z: i32) -> usize {
        (x + z * self.width) as usize
    }

    /// Spans of the column at (x, z), bottom to top
    pub fn column(&self, x: i32, z: i32) -> &[Span] {
        if x < 0 || z < 0 || x >= self.width || z >= self.height {
            return &[];
        }
        &self.columns[self.column_index(x, z)]
    }

    /// Total number of spans in the field
    pub fn span_count(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    /// Number of spans whose surface is walkable
    pub fn walkable_span_count(&self) -> usize {
        self.columns
            .iter()
            .flatten()
            .filter(|s| s.area != RC_NULL_AREA)
            .count()
    }

    /// Adds a span, merging it with every span it overlaps.
    ///
    /// When the merged top surfaces are within `flag_merge_threshold` of each
    /// other the higher area id wins.
    pub fn add_span(
        &mut self,
        x: i32,
        z: i32,
        smin: u16,
        smax: u16,
        area: u8,
        flag_merge_threshold: i32,
    ) -> Result<()> {
        if x < 0 || z < 0 || x >= self.width || z >= self.height {
            return Err(Error::Recast(format!(
                "span ({}, {}) outside heightfield {}x{}",
                x, z, self.width, self.height
            )));
        }
        if smin > smax || smax as u32 > RC_SPAN_MAX_HEIGHT {
            return Err(Error::Recast(format!("invalid span range {}..{}", smin, smax)));
        }

        let idx = self.column_index(x, z);
        let column = &mut self.columns[idx];
        let mut new_span = Span::new(smin, smax, area);

        let mut i = 0;
        while i < column.len() {
            let cur = column[i];
            if cur.smin > new_span.smax {
                break;
            }
            if cur.smax < new_span.smin {
                i += 1;
                continue;
            }

            if cur.smin < new_span.smin {
                new_span.smin = cur.smin;
            }
            if cur.smax > new_span.smax {
                new_span.smax = cur.smax;
            }
            if (new_span.smax as i32 - cur.smax as i32).abs() <= flag_merge_threshold {
                new_span.area = new_span.area.max(cur.area);
            }
            column.remove(i);
        }

        column.insert(i, new_span);
        Ok(())
    }

    /// Marks non-walkable spans as walkable when their top is within
    /// `walkable_climb` of the walkable span directly below.
    ///
    /// This lets agents step over curbs and similar low obstacles.
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: i32) {
        for column in &mut self.columns {
            let mut previous_walkable = false;
            let mut previous_area = RC_NULL_AREA;
            let mut previous_smax = 0i32;

            for span in column.iter_mut() {
                let walkable = span.area != RC_NULL_AREA;
                if !walkable
                    && previous_walkable
                    && (span.smax as i32 - previous_smax).abs() <= walkable_climb
                {
                    span.area = previous_area;
                }
                previous_walkable = walkable;
                previous_area = span.area;
                previous_smax = span.smax as i32;
            }
        }
    }

    /// Removes walkable flags from spans on ledges.
    ///
    /// A span is a ledge when a neighbour drops further than `walkable_climb`,
    /// or when the reachable neighbours are spread over a steeper range than
    /// `walkable_climb`.
    pub fn filter_ledge_spans(&mut self, walkable_height: i32, walkable_climb: i32) {
        let max_height = RC_SPAN_MAX_HEIGHT as i32;
        let w = self.width;
        let h = self.height;
        let mut to_clear = Vec::new();

        for z in 0..h {
            for x in 0..w {
                let column = &self.columns[self.column_index(x, z)];
                for (si, span) in column.iter().enumerate() {
                    if span.area == RC_NULL_AREA {
                        continue;
                    }

                    let bot = span.smax as i32;
                    let top = column.get(si + 1).map_or(max_height, |n| n.smin as i32);

                    let mut min_neighbor_height = max_height;
                    let mut accessible_min = bot;
                    let mut accessible_max = bot;

                    for dir in 0..4 {
                        let nx = x + super::get_dir_offset_x(dir);
                        let nz = z + super::get_dir_offset_y(dir);
                        if nx < 0 || nz < 0 || nx >= w || nz >= h {
                            min_neighbor_height = min_neighbor_height.min(-walkable_climb - bot);
                            continue;
                        }

                        let neighbor = &self.columns[self.column_index(nx, nz)];

                        // Free space below the first neighbour span
                        let nbot = -walkable_climb;
                        let ntop = neighbor.first().map_or(max_height, |n| n.smin as i32);
                        if top.min(ntop) - bot.max(nbot) > walkable_height {
                            min_neighbor_height = min_neighbor_height.min(nbot - bot);
                        }

                        for (ni, ns) in neighbor.iter().enumerate() {
                            let nbot = ns.smax as i32;
                            let ntop = neighbor.get(ni + 1).map_or(max_height, |n| n.smin as i32);
                            if top.min(ntop) - bot.max(nbot) > walkable_height {
                                min_neighbor_height = min_neighbor_height.min(nbot - bot);
                                if (nbot - bot).abs() <= walkable_climb {
                                    accessible_min = accessible_min.min(nbot);
                                    accessible_max = accessible_max.max(nbot);
                                }
                            }
                        }
                    }

                    if min_neighbor_height < -walkable_climb
                        || accessible_max - accessible_min > walkable_climb
                    {
                        to_clear.push((self.column_index(x, z), si));
                    }
                }
            }
        }

        for (ci, si) in to_clear {
            self.columns[ci][si].area = RC_NULL_AREA;
        }
    }

    /// Removes walkable flags from spans without enough clearance above them
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: i32) {
        let max_height = RC_SPAN_MAX_HEIGHT as i32;
        for column in &mut self.columns {
            for si in 0..column.len() {
                let bot = column[si].smax as i32;
                let top = column.get(si + 1).map_or(max_height, |n| n.smin as i32);
                if top - bot < walkable_height {
                    column[si].area = RC_NULL_AREA;
                }
            }
        }
    }
}
