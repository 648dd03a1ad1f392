//! Tile grid and the cache of voxelized static geometry
//!
//! Voxelizing, filtering and eroding the static world is the expensive part
//! of a build. It only depends on the static colliders and the options, so
//! each tile's compact heightfield is kept in a [`NavMeshBuildCache`] and
//! reused until one of those signatures changes.

use std::sync::Arc;

use detour::NavMesh;
use glam::Vec3;
use log::{debug, info};
use recast::{
    build_distance_field, erode_walkable_area, mark_walkable_triangles, rasterize_triangles,
    CompactHeightfield, Heightfield, RecastContext, TimerCategory,
};
use recast_common::{Aabb, Result};

use crate::assemble::check_tile_grid;
use crate::config::ResolvedBuildConfig;
use crate::extract::ExtractionResult;
use crate::obstacle::{obstacles_overlapping, stamp_obstacles};
use crate::signature::Signature;

/// Cached state of one tile
#[derive(Debug, Clone)]
pub struct TileCacheEntry {
    pub tile_x: i32,
    pub tile_y: i32,
    pub bounds: Aabb,
    /// `bounds` grown by the border on X and Z
    pub expanded_bounds: Aabb,
    /// Static voxels, eroded and with static obstacles carved
    pub base: CompactHeightfield,
    /// Copy of `base` with the current dynamic obstacles carved
    pub working: Option<CompactHeightfield>,
    /// Obstacles that affected the tile when it was last built; `None` if never built
    pub obstacle_signature: Option<Signature>,
}

/// Everything carried from one build to the next.
///
/// A default cache forces a full rebuild.
#[derive(Debug, Clone, Default)]
pub struct NavMeshBuildCache {
    pub static_signature: Option<Signature>,
    pub options_signature: Option<Signature>,
    pub tile_size_voxels: i32,
    pub tile_width: f32,
    pub tile_height: f32,
    pub tiles_x: i32,
    pub tiles_z: i32,
    pub bounds: Option<Aabb>,
    pub tiles: Vec<TileCacheEntry>,
    pub last_dynamic_signature: Option<Signature>,
    pub last_nav_mesh: Option<Arc<NavMesh>>,
}

impl NavMeshBuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tile(&self, tile_x: i32, tile_y: i32) -> Option<&TileCacheEntry> {
        self.tiles.iter().find(|t| t.tile_x == tile_x && t.tile_y == tile_y)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Drops everything; the next build starts from scratch
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn needs_rebuild(&self, static_signature: Signature, options_signature: Signature, tile_size: i32) -> bool {
        self.tiles.is_empty()
            || self.static_signature != Some(static_signature)
            || self.options_signature != Some(options_signature)
            || self.tile_size_voxels != tile_size
    }
}

/// Result of [`ensure_static_tiles`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticTilesOutcome {
    /// True when the cached tiles were kept
    pub reused: bool,
    pub tiles_x: i32,
    pub tiles_z: i32,
    pub tile_count: usize,
}

/// Combined world bounds padded for agent headroom
pub fn world_bounds(extraction: &ExtractionResult, config: &ResolvedBuildConfig) -> Option<Aabb> {
    let mut bounds = extraction.walkable_bounds()?;
    for o in &extraction.static_obstacles {
        let ob = o.padded_bounds(config.obstacle_margin);
        if ob.overlaps_xz(&bounds) {
            bounds.min.y = bounds.min.y.min(ob.min.y);
            bounds.max.y = bounds.max.y.max(ob.max.y);
        }
    }
    bounds.min.y -= config.cell_height;
    bounds.max.y += config.walkable_height_world();
    Some(bounds)
}

/// Makes sure `cache` holds a static tile grid for `extraction` and `config`.
///
/// When the static signature, the options and the tile size match the
/// cache, nothing is rebuilt. Otherwise the grid is rebuilt and the cached
/// navigation mesh and dynamic signatures are dropped. An extraction without
/// walkable input leaves an empty grid.
pub fn ensure_static_tiles(
    extraction: &ExtractionResult,
    config: &ResolvedBuildConfig,
    cache: &mut NavMeshBuildCache,
    ctx: &mut RecastContext,
) -> Result<StaticTilesOutcome> {
    let options_signature = config.signature();
    if !cache.needs_rebuild(extraction.static_signature, options_signature, config.tile_size_voxels) {
        debug!("reusing {} static tiles", cache.tiles.len());
        return Ok(StaticTilesOutcome {
            reused: true,
            tiles_x: cache.tiles_x,
            tiles_z: cache.tiles_z,
            tile_count: cache.tiles.len(),
        });
    }

    ctx.start_span(TimerCategory::StaticTiles);
    let result = rebuild_static_tiles(extraction, config, options_signature, cache, ctx);
    ctx.end_span(TimerCategory::StaticTiles);
    result
}

fn rebuild_static_tiles(
    extraction: &ExtractionResult,
    config: &ResolvedBuildConfig,
    options_signature: Signature,
    cache: &mut NavMeshBuildCache,
    ctx: &mut RecastContext,
) -> Result<StaticTilesOutcome> {
    cache.clear();
    cache.static_signature = Some(extraction.static_signature);
    cache.options_signature = Some(options_signature);
    cache.tile_size_voxels = config.tile_size_voxels;
    cache.tile_width = config.tile_width();
    cache.tile_height = config.tile_width();

    let Some(bounds) = world_bounds(extraction, config) else {
        info!("no walkable input, static tile grid is empty");
        return Ok(StaticTilesOutcome {
            reused: false,
            tiles_x: 0,
            tiles_z: 0,
            tile_count: 0,
        });
    };

    let tile_width = config.tile_width();
    let tiles_x = (((bounds.max.x - bounds.min.x) / tile_width).ceil() as i32).max(1);
    let tiles_z = (((bounds.max.z - bounds.min.z) / tile_width).ceil() as i32).max(1);
    check_tile_grid(tiles_x, tiles_z)?;
    cache.bounds = Some(bounds);
    cache.tiles_x = tiles_x;
    cache.tiles_z = tiles_z;

    info!(
        "rebuilding static tiles: {}x{} tiles of {} voxels (static {}, options {})",
        tiles_x, tiles_z, config.tile_size_voxels, extraction.static_signature, options_signature
    );

    let verts: Vec<Vec3> = (0..extraction.geometry.vertex_count())
        .map(|i| extraction.geometry.vertex(i))
        .collect();
    let tris: Vec<[u32; 3]> = extraction
        .geometry
        .indices
        .chunks_exact(3)
        .map(|t| [t[0], t[1], t[2]])
        .collect();
    let tri_bounds: Vec<Aabb> = tris
        .iter()
        .map(|t| Aabb::from_points(t.iter().map(|&i| verts[i as usize])))
        .collect();

    for ty in 0..tiles_z {
        for tx in 0..tiles_x {
            let min = Vec3::new(
                bounds.min.x + tx as f32 * tile_width,
                bounds.min.y,
                bounds.min.z + ty as f32 * tile_width,
            );
            let max = Vec3::new(min.x + tile_width, bounds.max.y, min.z + tile_width);
            let tile_bounds = Aabb::new(min, max);
            let border = config.border_size as f32 * config.cell_size;
            let expanded = tile_bounds.expanded(border, 0.0);

            ctx.set_tile(Some((tx, ty)));
            let base = build_static_tile(extraction, config, &tile_bounds, &expanded, &verts, &tris, &tri_bounds, ctx)?;
            debug!(
                "static tile ({tx}, {ty}): {} walkable spans",
                base.walkable_span_count()
            );
            cache.tiles.push(TileCacheEntry {
                tile_x: tx,
                tile_y: ty,
                bounds: tile_bounds,
                expanded_bounds: expanded,
                base,
                working: None,
                obstacle_signature: None,
            });
        }
    }
    ctx.set_tile(None);

    Ok(StaticTilesOutcome {
        reused: false,
        tiles_x,
        tiles_z,
        tile_count: cache.tiles.len(),
    })
}

#[allow(clippy::too_many_arguments)]
fn build_static_tile(
    extraction: &ExtractionResult,
    config: &ResolvedBuildConfig,
    tile_bounds: &Aabb,
    expanded: &Aabb,
    verts: &[Vec3],
    tris: &[[u32; 3]],
    tri_bounds: &[Aabb],
    ctx: &mut RecastContext,
) -> Result<CompactHeightfield> {
    let mut rc = config.recast_config();
    rc.configure_tile(tile_bounds.min, tile_bounds.max);

    let mut hf = Heightfield::new(rc.width, rc.height, rc.bmin, rc.bmax, rc.cs, rc.ch);

    ctx.start_span(TimerCategory::Rasterization);
    let tile_tris: Vec<[u32; 3]> = tris
        .iter()
        .zip(tri_bounds)
        .filter(|(_, b)| b.overlaps_xz(expanded))
        .map(|(t, _)| *t)
        .collect();
    let areas = mark_walkable_triangles(rc.walkable_slope_angle, verts, &tile_tris);
    let raster = rasterize_triangles(&mut hf, verts, &tile_tris, &areas, rc.walkable_climb);

    let mut hf_tris = Vec::new();
    for data in &extraction.heightfields {
        data.triangles_in(expanded, &mut hf_tris);
    }
    let hf_verts: Vec<Vec3> = hf_tris.iter().flatten().copied().collect();
    let hf_indices: Vec<[u32; 3]> = (0..hf_tris.len() as u32)
        .map(|t| [t * 3, t * 3 + 1, t * 3 + 2])
        .collect();
    let hf_areas = mark_walkable_triangles(rc.walkable_slope_angle, &hf_verts, &hf_indices);
    let hf_raster = rasterize_triangles(&mut hf, &hf_verts, &hf_indices, &hf_areas, rc.walkable_climb);
    ctx.end_span(TimerCategory::Rasterization);
    raster?;
    hf_raster?;

    ctx.time(TimerCategory::Filtering, |_| {
        hf.filter_low_hanging_walkable_obstacles(rc.walkable_climb);
        hf.filter_ledge_spans(rc.walkable_height, rc.walkable_climb);
        hf.filter_walkable_low_height_spans(rc.walkable_height);
    });

    let mut chf = ctx.time(TimerCategory::CompactHeightfield, |_| {
        CompactHeightfield::build_from_heightfield(&hf, rc.walkable_height, rc.walkable_climb)
    })?;

    if config.erode {
        ctx.time(TimerCategory::Erosion, |_| erode_walkable_area(&mut chf, rc.walkable_radius))?;
    }

    let statics = obstacles_overlapping(&extraction.static_obstacles, expanded, config.obstacle_margin);
    if !statics.is_empty() {
        ctx.time(TimerCategory::Stamping, |_| {
            stamp_obstacles(&mut chf, &statics, config.obstacle_margin)
        });
    }

    ctx.time(TimerCategory::DistanceField, |_| build_distance_field(&mut chf))?;
    Ok(chf)
}
