//! Navigation meshes baked from physics colliders
//!
//! A [`PhysicsWorld`] is read into an [`ExtractionResult`]: thin flat slabs
//! and height fields on fixed bodies become walkable triangles, everything
//! else becomes an upright cylinder obstacle. [`generate`] then voxelizes the
//! static part into tiles once, keeps those tiles in a [`NavMeshBuildCache`]
//! and on later calls only carves the moving obstacles back in, rebuilding
//! the tiles whose obstacles actually changed.
//!
//! ```no_run
//! use detour_physics::{extract, generate, BuildOptions, ExtractOptions, NavMeshBuildCache, SceneWorld};
//!
//! # fn main() -> recast_common::Result<()> {
//! let world = SceneWorld::load("scene.json")?;
//! let mut cache = NavMeshBuildCache::new();
//! if let Some(extraction) = extract(&world, &ExtractOptions::default()) {
//!     if let Some(output) = generate(&extraction, &BuildOptions::default(), &mut cache)? {
//!         println!("{} polygons", output.stats.polygon_count);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod assemble;
mod config;
mod extract;
mod generator;
mod obstacle;
mod physics;
#[cfg(feature = "rapier")]
mod rapier;
mod signature;
mod tile_builder;
mod tile_cache;
mod worker;

#[cfg(test)]
mod scenario_tests;

pub use assemble::{convert_tile, create_nav_mesh, replace_tile, MAX_TILE_SLOTS};
pub use config::{
    BuildOptions, ExtractOptions, QualityPreset, ResolvedBuildConfig, DEFAULT_VERTS_PER_POLY,
    DEFAULT_WALKABLE_CLIMB, DEFAULT_WALKABLE_HEIGHT, DEFAULT_WALKABLE_RADIUS, DEFAULT_WALKABLE_SLOPE,
};
pub use extract::{
    extract, CylinderObstacle, ExtractionResult, HeightfieldData, TriangleGeometry, MAX_SURFACE_QUADS_PER_SIDE,
    MIN_SURFACE_SEGMENT,
};
pub use generator::{generate, generate_from_world, generate_with_context, GenerateOutput, GenerateStats};
pub use obstacle::{dynamic_signature, obstacles_overlapping, stamp_obstacles, tile_obstacle_signature};
pub use physics::{BodyType, ColliderHandle, ColliderShape, ColliderView, PhysicsWorld, SceneWorld};
#[cfg(feature = "rapier")]
pub use rapier::RapierWorld;
pub use signature::{signature_of, Fingerprint, Signature, SignatureBuilder};
pub use tile_builder::{
    build_detail_with_fallback, build_tile_mesh, detail_step, minimal_detail, refresh_distance_field,
    DetailAttempt, DetailQuality, DetailState, DetailStep, TileMesh,
};
pub use tile_cache::{ensure_static_tiles, world_bounds, NavMeshBuildCache, StaticTilesOutcome, TileCacheEntry};
pub use worker::{spawn_worker, WorkerClient, WorkerHandle, WorkerRequest, WorkerResponse};
