//! Incremental navigation mesh generation
//!
//! [`generate`] runs on every refresh. Static tiles come from the cache,
//! the current dynamic obstacles are carved into copies of them, and only
//! tiles whose set of overlapping obstacles changed are rebuilt. When
//! nothing changed at all the previous navigation mesh is returned as is.

use std::sync::Arc;

use detour::NavMesh;
use log::{debug, info};
use recast::{RecastContext, TimerCategory};
use recast_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::assemble::{create_nav_mesh, replace_tile};
use crate::config::{BuildOptions, ExtractOptions, ResolvedBuildConfig};
use crate::extract::{extract, CylinderObstacle, ExtractionResult};
use crate::obstacle::{dynamic_signature, obstacles_overlapping, stamp_obstacles, tile_obstacle_signature};
use crate::physics::PhysicsWorld;
use crate::signature::Signature;
use crate::tile_builder::{build_tile_mesh, refresh_distance_field, DetailQuality};
use crate::tile_cache::{ensure_static_tiles, NavMeshBuildCache};

/// What a build did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateStats {
    /// Static tiles came from the cache
    pub reused_static: bool,
    /// The previous navigation mesh was returned unchanged
    pub reused_nav_mesh: bool,
    pub tiles_total: usize,
    pub tiles_rebuilt: usize,
    /// Tiles whose obstacle set did not change
    pub tiles_unchanged: usize,
    /// Rebuilt tiles that produced no polygons
    pub tiles_empty: usize,
    pub polygon_count: usize,
    pub dynamic_obstacles: usize,
    /// Dynamic obstacles dropped because they miss the world bounds
    pub obstacles_outside: usize,
    /// Tiles whose detail mesh needed the zero sample distance retry
    pub detail_retries: usize,
    /// Tiles that ended with the minimal detail structure
    pub detail_minimal: usize,
    pub static_signature: Signature,
    pub dynamic_signature: Signature,
}

/// Navigation mesh plus the stats of the build that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOutput {
    pub nav_mesh: Arc<NavMesh>,
    pub stats: GenerateStats,
}

/// Builds or refreshes the navigation mesh for `extraction`.
///
/// Returns `Ok(None)` when there is no walkable input. Errors for invalid
/// options, malformed geometry or a navigation mesh the container rejects.
pub fn generate(
    extraction: &ExtractionResult,
    options: &BuildOptions,
    cache: &mut NavMeshBuildCache,
) -> Result<Option<GenerateOutput>> {
    generate_with_context(extraction, options, cache, &mut RecastContext::new())
}

/// [`generate`] reporting its spans to `ctx`
pub fn generate_with_context(
    extraction: &ExtractionResult,
    options: &BuildOptions,
    cache: &mut NavMeshBuildCache,
    ctx: &mut RecastContext,
) -> Result<Option<GenerateOutput>> {
    let config = options.resolve()?;

    ctx.start_span(TimerCategory::Total);
    let result = generate_resolved(extraction, &config, cache, ctx);
    ctx.set_tile(None);
    ctx.end_span(TimerCategory::Total);

    if result.is_err() {
        // A half-updated cache must not be trusted next time
        cache.clear();
    }
    result
}

/// Extracts `world` and generates in one go
pub fn generate_from_world(
    world: &impl PhysicsWorld,
    extract_options: &ExtractOptions,
    options: &BuildOptions,
    cache: &mut NavMeshBuildCache,
    ctx: &mut RecastContext,
) -> Result<Option<GenerateOutput>> {
    extract_options.validate()?;
    let extraction = ctx.time(TimerCategory::Extraction, |_| extract(world, extract_options));
    match extraction {
        Some(extraction) => generate_with_context(&extraction, options, cache, ctx),
        None => {
            cache.last_nav_mesh = None;
            cache.last_dynamic_signature = None;
            Ok(None)
        }
    }
}

fn generate_resolved(
    extraction: &ExtractionResult,
    config: &ResolvedBuildConfig,
    cache: &mut NavMeshBuildCache,
    ctx: &mut RecastContext,
) -> Result<Option<GenerateOutput>> {
    extraction.validate()?;
    let outcome = ensure_static_tiles(extraction, config, cache, ctx)?;
    let Some(bounds) = cache.bounds.filter(|_| !cache.tiles.is_empty()) else {
        debug!("nothing walkable to build");
        return Ok(None);
    };

    let options_signature = config.signature();
    let dyn_sig = dynamic_signature(
        extraction.static_signature,
        options_signature,
        &extraction.dynamic_obstacles,
    );

    let mut stats = GenerateStats {
        reused_static: outcome.reused,
        tiles_total: cache.tiles.len(),
        dynamic_obstacles: extraction.dynamic_obstacles.len(),
        static_signature: extraction.static_signature,
        dynamic_signature: dyn_sig,
        ..Default::default()
    };

    if outcome.reused && cache.last_dynamic_signature == Some(dyn_sig) {
        if let Some(nav_mesh) = &cache.last_nav_mesh {
            info!("nothing changed, reusing navigation mesh (dynamic {dyn_sig})");
            stats.reused_nav_mesh = true;
            stats.tiles_unchanged = cache.tiles.len();
            stats.polygon_count = polygon_count(nav_mesh);
            return Ok(Some(GenerateOutput {
                nav_mesh: Arc::clone(nav_mesh),
                stats,
            }));
        }
    }

    let mut nav_mesh = match cache.last_nav_mesh.take() {
        Some(nav_mesh) if outcome.reused => nav_mesh,
        _ => {
            // A fresh mesh holds no tiles, so every tile has to be written again
            for entry in &mut cache.tiles {
                entry.obstacle_signature = None;
            }
            Arc::new(create_nav_mesh(&bounds, outcome.tiles_x, outcome.tiles_z, config)?)
        }
    };

    let margin = config.obstacle_margin;
    let inside: Vec<CylinderObstacle> = extraction
        .dynamic_obstacles
        .iter()
        .filter(|o| o.padded_bounds(margin).overlaps(&bounds))
        .copied()
        .collect();
    stats.obstacles_outside = extraction.dynamic_obstacles.len() - inside.len();

    rebuild_changed_tiles(cache, &inside, config, &mut nav_mesh, &mut stats, ctx)?;

    stats.polygon_count = polygon_count(&nav_mesh);
    info!(
        "navigation mesh refreshed: {} of {} tiles rebuilt, {} polygons (static reused: {})",
        stats.tiles_rebuilt, stats.tiles_total, stats.polygon_count, stats.reused_static
    );

    cache.last_dynamic_signature = Some(dyn_sig);
    cache.last_nav_mesh = Some(Arc::clone(&nav_mesh));
    Ok(Some(GenerateOutput { nav_mesh, stats }))
}

fn rebuild_changed_tiles(
    cache: &mut NavMeshBuildCache,
    obstacles: &[CylinderObstacle],
    config: &ResolvedBuildConfig,
    nav_mesh: &mut Arc<NavMesh>,
    stats: &mut GenerateStats,
    ctx: &mut RecastContext,
) -> Result<()> {
    let margin = config.obstacle_margin;

    for entry in &mut cache.tiles {
        let overlapping = obstacles_overlapping(obstacles, &entry.expanded_bounds, margin);
        let signature = tile_obstacle_signature(&overlapping);
        if entry.obstacle_signature == Some(signature) {
            stats.tiles_unchanged += 1;
            continue;
        }

        let (tx, ty) = (entry.tile_x, entry.tile_y);
        ctx.set_tile(Some((tx, ty)));
        let tile_mesh = if overlapping.is_empty() {
            entry.working = None;
            build_tile_mesh(&mut entry.base, tx, ty, config, ctx)?
        } else {
            let mut working = entry.base.clone();
            let carved = ctx.time(TimerCategory::Stamping, |_| {
                stamp_obstacles(&mut working, &overlapping, margin)
            });
            debug!(
                "tile ({tx}, {ty}): {} obstacles carved {carved} spans",
                overlapping.len()
            );
            refresh_distance_field(&mut working, config)?;
            let built = build_tile_mesh(&mut working, tx, ty, config, ctx)?;
            entry.working = Some(working);
            built
        };

        // Copy on write: a mesh handed out earlier stays untouched
        let target = Arc::make_mut(nav_mesh);
        ctx.time(TimerCategory::Assembly, |_| {
            replace_tile(target, tx, ty, tile_mesh.as_ref(), config)
        })
        .map_err(|e| Error::NavMeshGeneration(format!("tile ({tx}, {ty}): {e}")))?;

        entry.obstacle_signature = Some(signature);
        stats.tiles_rebuilt += 1;
        match tile_mesh.as_ref().map(|t| t.detail_quality) {
            None => stats.tiles_empty += 1,
            Some(DetailQuality::ZeroSampleDistance) => stats.detail_retries += 1,
            Some(DetailQuality::Minimal) => {
                stats.detail_retries += 1;
                stats.detail_minimal += 1;
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn polygon_count(nav_mesh: &NavMesh) -> usize {
    nav_mesh.tiles().map(|t| t.polys.len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{BodyType, ColliderShape, SceneWorld};
    use glam::Vec3;

    fn ground_world() -> SceneWorld {
        let mut world = SceneWorld::new();
        world.insert(
            ColliderShape::Cuboid {
                half_extents: Vec3::new(8.0, 0.1, 8.0),
            },
            Vec3::new(0.0, -0.1, 0.0),
            BodyType::Fixed,
        );
        world
    }

    fn options() -> BuildOptions {
        BuildOptions::default().with_tile_size_voxels(32)
    }

    #[test]
    fn test_invalid_options_surface_as_errors() {
        let extraction = extract(&ground_world(), &ExtractOptions::default()).unwrap();
        let mut cache = NavMeshBuildCache::new();
        let result = generate(&extraction, &options().with_cell_size(-1.0), &mut cache);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_only_obstacle_tiles_are_rebuilt() {
        let mut world = ground_world();
        let extract_options = ExtractOptions::default();
        let mut cache = NavMeshBuildCache::new();

        let first = generate(&extract(&world, &extract_options).unwrap(), &options(), &mut cache)
            .unwrap()
            .unwrap();
        assert_eq!(first.stats.tiles_rebuilt, first.stats.tiles_total);

        // A crate in the middle of the first tile
        world.insert(
            ColliderShape::Cuboid {
                half_extents: Vec3::splat(0.4),
            },
            Vec3::new(-6.0, 0.4, -6.0),
            BodyType::Dynamic,
        );
        let second = generate(&extract(&world, &extract_options).unwrap(), &options(), &mut cache)
            .unwrap()
            .unwrap();
        assert!(second.stats.reused_static);
        assert!(!second.stats.reused_nav_mesh);
        assert_eq!(second.stats.tiles_rebuilt, 1);
        assert_eq!(second.stats.tiles_unchanged, second.stats.tiles_total - 1);
        assert!(cache.tile(0, 0).unwrap().working.is_some());
        assert!(cache.tile(1, 1).unwrap().working.is_none());
        assert!(!Arc::ptr_eq(&first.nav_mesh, &second.nav_mesh));
    }

    #[test]
    fn test_world_returning_after_empty_frame_is_rebuilt() {
        let world = ground_world();
        let mut cache = NavMeshBuildCache::new();
        let mut ctx = RecastContext::new();
        let extract_options = ExtractOptions::default();

        let first = generate_from_world(&world, &extract_options, &options(), &mut cache, &mut ctx)
            .unwrap()
            .unwrap();
        let empty = generate_from_world(&SceneWorld::new(), &extract_options, &options(), &mut cache, &mut ctx)
            .unwrap();
        assert!(empty.is_none());

        let again = generate_from_world(&world, &extract_options, &options(), &mut cache, &mut ctx)
            .unwrap()
            .unwrap();
        assert!(again.stats.reused_static);
        assert!(!again.stats.reused_nav_mesh);
        assert_eq!(again.stats.tiles_rebuilt, again.stats.tiles_total);
        assert_eq!(again.nav_mesh.tile_count(), first.nav_mesh.tile_count());
        assert_eq!(again.stats.polygon_count, first.stats.polygon_count);
        assert!(again.nav_mesh.find_poly_containing([0.0, 0.0, 0.0]).is_some());
    }

    #[test]
    fn test_moving_kinematic_terrain_invalidates_the_mesh() {
        let mut world = ground_world();
        let terrain = world.insert(
            ColliderShape::HeightField {
                nrows: 3,
                ncols: 3,
                heights: vec![0.0; 16],
                scale: Vec3::new(3.0, 1.0, 3.0),
            },
            Vec3::new(2.0, 0.5, 2.0),
            BodyType::KinematicPositionBased,
        );
        let extract_options = ExtractOptions::default();
        let mut cache = NavMeshBuildCache::new();
        let first = generate(&extract(&world, &extract_options).unwrap(), &options(), &mut cache)
            .unwrap()
            .unwrap();
        assert_eq!(first.stats.dynamic_obstacles, 1);

        world.set_translation(terrain, Vec3::new(-4.0, 0.5, -4.0));
        let second = generate(&extract(&world, &extract_options).unwrap(), &options(), &mut cache)
            .unwrap()
            .unwrap();
        assert!(second.stats.reused_static);
        assert!(!second.stats.reused_nav_mesh);
        assert_ne!(first.stats.dynamic_signature, second.stats.dynamic_signature);
        assert!(second.stats.tiles_rebuilt > 0);
    }

    #[test]
    fn test_malformed_extraction_is_an_error() {
        let mut extraction = extract(&ground_world(), &ExtractOptions::default()).unwrap();
        extraction.geometry.indices[2] = 999;
        let mut cache = NavMeshBuildCache::new();
        let result = generate(&extraction, &options(), &mut cache);
        assert!(matches!(result, Err(Error::InvalidMesh(_))));
        assert_eq!(cache.tile_count(), 0);
    }

    #[test]
    fn test_obstacle_outside_world_is_ignored() {
        let mut world = ground_world();
        world.insert(ColliderShape::Ball { radius: 0.5 }, Vec3::new(100.0, 0.5, 0.0), BodyType::Dynamic);
        let mut cache = NavMeshBuildCache::new();
        let out = generate(&extract(&world, &ExtractOptions::default()).unwrap(), &options(), &mut cache)
            .unwrap()
            .unwrap();
        assert_eq!(out.stats.dynamic_obstacles, 1);
        assert_eq!(out.stats.obstacles_outside, 1);
        assert!(cache.tiles.iter().all(|t| t.working.is_none()));
    }

    #[test]
    fn test_obstacles_only_world_generates_nothing() {
        let mut world = SceneWorld::new();
        world.insert(ColliderShape::Ball { radius: 0.5 }, Vec3::ZERO, BodyType::Dynamic);
        let mut cache = NavMeshBuildCache::new();
        let extraction = extract(&world, &ExtractOptions::default()).unwrap();
        assert!(generate(&extraction, &options(), &mut cache).unwrap().is_none());
    }

    #[test]
    fn test_generate_from_world_times_extraction() {
        let world = ground_world();
        let mut cache = NavMeshBuildCache::new();
        let mut ctx = RecastContext::new();
        let out = generate_from_world(&world, &ExtractOptions::default(), &options(), &mut cache, &mut ctx)
            .unwrap()
            .unwrap();
        assert!(out.stats.polygon_count > 0);
        assert_eq!(ctx.get_timer_count(&TimerCategory::Extraction), 1);
        assert_eq!(ctx.get_timer_count(&TimerCategory::Total), 1);

        let empty = generate_from_world(
            &SceneWorld::new(),
            &ExtractOptions::default(),
            &options(),
            &mut cache,
            &mut ctx,
        )
        .unwrap();
        assert!(empty.is_none());
        assert!(cache.last_nav_mesh.is_none());
    }
}
