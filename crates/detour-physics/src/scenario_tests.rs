//! End to end scenarios over `SceneWorld`

use std::sync::Arc;

use detour::{NavMesh, PolyRef};
use glam::{Quat, Vec3};
use recast::{MemorySink, RecastContext, TimerCategory};
use tokio::sync::mpsc;

use crate::config::{BuildOptions, ExtractOptions};
use crate::extract::extract;
use crate::generator::{generate, generate_with_context, GenerateOutput};
use crate::physics::{BodyType, ColliderHandle, ColliderShape, SceneWorld};
use crate::tile_cache::NavMeshBuildCache;
use crate::worker::{WorkerClient, WorkerHandle, WorkerRequest, WorkerResponse};

fn slab(world: &mut SceneWorld, center: Vec3, half_x: f32, half_z: f32) -> ColliderHandle {
    world.insert(
        ColliderShape::Cuboid {
            half_extents: Vec3::new(half_x, 0.1, half_z),
        },
        center,
        BodyType::Fixed,
    )
}

fn build(world: &SceneWorld, options: &BuildOptions, cache: &mut NavMeshBuildCache) -> Option<GenerateOutput> {
    let extraction = extract(world, &ExtractOptions::default())?;
    generate(&extraction, options, cache).unwrap()
}

fn poly_at(nav_mesh: &NavMesh, x: f32, z: f32) -> Option<PolyRef> {
    nav_mesh.find_poly_containing([x, 0.0, z])
}

fn reachable(nav_mesh: &NavMesh, from: (f32, f32), to: (f32, f32)) -> bool {
    let (Some(start), Some(goal)) = (poly_at(nav_mesh, from.0, from.1), poly_at(nav_mesh, to.0, to.1)) else {
        return false;
    };
    nav_mesh.connected_polys(start).unwrap().contains(&goal)
}

#[test]
fn flat_ground_produces_a_nav_mesh() {
    let mut world = SceneWorld::new();
    slab(&mut world, Vec3::new(0.0, -0.1, 0.0), 10.0, 10.0);

    let extraction = extract(&world, &ExtractOptions::default()).unwrap();
    assert!(extraction.geometry.triangle_count() >= 12);
    assert!(extraction.heightfields.is_empty());

    let mut cache = NavMeshBuildCache::new();
    let out = generate(&extraction, &BuildOptions::default(), &mut cache)
        .unwrap()
        .unwrap();
    assert!(out.nav_mesh.tile_count() >= 1);
    assert!(out.stats.polygon_count >= 1);
    assert!(poly_at(&out.nav_mesh, 0.0, 0.0).is_some());
    assert!(poly_at(&out.nav_mesh, 30.0, 0.0).is_none());
}

#[test]
fn unchanged_world_returns_the_same_nav_mesh() {
    let mut world = SceneWorld::new();
    slab(&mut world, Vec3::new(0.0, -0.1, 0.0), 8.0, 8.0);
    world.insert(ColliderShape::Ball { radius: 0.5 }, Vec3::new(2.0, 0.5, 2.0), BodyType::Dynamic);

    let options = BuildOptions::default();
    let mut cache = NavMeshBuildCache::new();
    let first = build(&world, &options, &mut cache).unwrap();
    let second = build(&world, &options, &mut cache).unwrap();

    assert!(Arc::ptr_eq(&first.nav_mesh, &second.nav_mesh));
    assert!(second.stats.reused_static);
    assert!(second.stats.reused_nav_mesh);
    assert_eq!(second.stats.tiles_rebuilt, 0);
}

#[test]
fn static_change_rebuilds_everything() {
    let mut world = SceneWorld::new();
    let ground = slab(&mut world, Vec3::new(0.0, -0.1, 0.0), 8.0, 8.0);

    let options = BuildOptions::default();
    let mut cache = NavMeshBuildCache::new();
    let first = build(&world, &options, &mut cache).unwrap();

    assert!(world.set_translation(ground, Vec3::new(3.0, -0.1, 0.0)));
    let second = build(&world, &options, &mut cache).unwrap();

    assert!(!second.stats.reused_static);
    assert_ne!(first.stats.static_signature, second.stats.static_signature);
    assert_eq!(second.stats.tiles_rebuilt, second.stats.tiles_total);
    assert!(!Arc::ptr_eq(&first.nav_mesh, &second.nav_mesh));
    assert!(poly_at(&second.nav_mesh, 10.0, 0.0).is_some());
    assert!(poly_at(&first.nav_mesh, 10.0, 0.0).is_none());
}

#[test]
fn any_static_collider_edit_invalidates_the_tiles() {
    let mut world = SceneWorld::new();
    slab(&mut world, Vec3::new(0.0, -0.1, 0.0), 8.0, 8.0);
    let pillar = world.insert(
        ColliderShape::Cylinder {
            half_height: 1.0,
            radius: 0.5,
        },
        Vec3::new(3.0, 1.0, 3.0),
        BodyType::Fixed,
    );

    let options = BuildOptions::default();
    let mut cache = NavMeshBuildCache::new();
    let mut previous = build(&world, &options, &mut cache).unwrap();
    let mut rebuilds_after = |world: &SceneWorld, what: &str| {
        let out = build(world, &options, &mut cache).unwrap();
        assert!(!out.stats.reused_static, "{what} kept the static tiles");
        assert_ne!(out.stats.static_signature, previous.stats.static_signature, "{what}");
        assert_eq!(out.stats.tiles_rebuilt, out.stats.tiles_total, "{what}");
        previous = out;
    };

    assert!(world.set_rotation(pillar, Quat::from_rotation_y(0.3)));
    rebuilds_after(&world, "rotation");

    assert!(world.set_shape(
        pillar,
        ColliderShape::Cylinder {
            half_height: 1.0,
            radius: 0.8,
        }
    ));
    rebuilds_after(&world, "shape parameters");

    let extra = slab(&mut world, Vec3::new(0.0, -0.1, 12.0), 2.0, 2.0);
    rebuilds_after(&world, "added collider");

    assert!(world.remove(extra).is_some());
    rebuilds_after(&world, "removed collider");

    // Same shape and transform under a new handle
    let removed = world.remove(pillar).unwrap();
    world.insert_with_rotation(removed.shape, removed.translation, removed.rotation, removed.body_type);
    rebuilds_after(&world, "new handle");
}

#[test]
fn resized_obstacle_rebuilds_its_tile() {
    let mut world = SceneWorld::new();
    slab(&mut world, Vec3::new(0.0, -0.1, 0.0), 8.0, 8.0);
    let barrel = world.insert(
        ColliderShape::Cylinder {
            half_height: 0.5,
            radius: 0.4,
        },
        Vec3::new(-4.0, 0.5, -4.0),
        BodyType::Dynamic,
    );

    let options = BuildOptions::default().with_tile_size_voxels(32);
    let mut cache = NavMeshBuildCache::new();
    let first = build(&world, &options, &mut cache).unwrap();

    assert!(world.set_shape(
        barrel,
        ColliderShape::Cylinder {
            half_height: 0.5,
            radius: 1.2,
        }
    ));
    let wider = build(&world, &options, &mut cache).unwrap();
    assert!(wider.stats.reused_static);
    assert!(!wider.stats.reused_nav_mesh);
    assert_ne!(first.stats.dynamic_signature, wider.stats.dynamic_signature);
    assert_eq!(wider.stats.tiles_rebuilt, 1);

    assert!(world.set_shape(
        barrel,
        ColliderShape::Cylinder {
            half_height: 1.5,
            radius: 1.2,
        }
    ));
    let taller = build(&world, &options, &mut cache).unwrap();
    assert!(!taller.stats.reused_nav_mesh);
    assert_ne!(wider.stats.dynamic_signature, taller.stats.dynamic_signature);
    assert_eq!(taller.stats.tiles_rebuilt, 1);
}

#[test]
fn moving_obstacle_keeps_static_tiles() {
    let mut world = SceneWorld::new();
    slab(&mut world, Vec3::new(0.0, -0.1, 0.0), 8.0, 8.0);
    let ball = world.insert(ColliderShape::Ball { radius: 1.0 }, Vec3::new(-4.0, 1.0, -4.0), BodyType::Dynamic);

    let options = BuildOptions::default().with_tile_size_voxels(32);
    let mut cache = NavMeshBuildCache::new();
    let first = build(&world, &options, &mut cache).unwrap();
    let before = (*first.nav_mesh).clone();
    assert!(poly_at(&first.nav_mesh, -4.0, -4.0).is_none());

    assert!(world.set_translation(ball, Vec3::new(4.0, 1.0, 4.0)));
    let second = build(&world, &options, &mut cache).unwrap();

    assert!(second.stats.reused_static);
    assert!(!second.stats.reused_nav_mesh);
    assert!(second.stats.tiles_rebuilt >= 2);
    assert!(second.stats.tiles_rebuilt < second.stats.tiles_total);
    assert!(poly_at(&second.nav_mesh, -4.0, -4.0).is_some());
    assert!(poly_at(&second.nav_mesh, 4.0, 4.0).is_none());

    // The mesh handed out first is left alone
    assert!(!Arc::ptr_eq(&first.nav_mesh, &second.nav_mesh));
    assert_eq!(*first.nav_mesh, before);
}

#[test]
fn heightfield_terrain_is_walkable() {
    let mut world = SceneWorld::new();
    world.insert(
        ColliderShape::HeightField {
            nrows: 3,
            ncols: 3,
            heights: vec![0.0, 0.1, 0.2, 0.1, 0.1, 0.2, 0.2, 0.1, 0.0, 0.1, 0.1, 0.0, 0.1, 0.0, 0.0, 0.1],
            scale: Vec3::new(12.0, 1.0, 12.0),
        },
        Vec3::ZERO,
        BodyType::Fixed,
    );

    let extraction = extract(&world, &ExtractOptions::default()).unwrap();
    assert!(extraction.geometry.is_empty());
    assert_eq!(extraction.heightfields.len(), 1);

    let mut cache = NavMeshBuildCache::new();
    let out = generate(&extraction, &BuildOptions::default(), &mut cache)
        .unwrap()
        .unwrap();
    assert!(out.stats.polygon_count >= 1);
    assert!(out.nav_mesh.find_poly_containing([0.0, 0.1, 0.0]).is_some());
}

#[test]
fn colliders_are_classified_into_buckets() {
    let mut world = SceneWorld::new();
    let floor = slab(&mut world, Vec3::new(0.0, -0.1, 0.0), 6.0, 6.0);
    let pillar = world.insert(
        ColliderShape::Cuboid {
            half_extents: Vec3::new(0.5, 1.5, 0.5),
        },
        Vec3::new(2.0, 1.5, 2.0),
        BodyType::Fixed,
    );
    let ramp = world.insert_with_rotation(
        ColliderShape::Cuboid {
            half_extents: Vec3::new(2.0, 0.1, 1.0),
        },
        Vec3::new(-3.0, 0.5, 3.0),
        Quat::from_rotation_z(0.4),
        BodyType::Fixed,
    );
    let door = world.insert(
        ColliderShape::Cuboid {
            half_extents: Vec3::new(1.0, 0.1, 1.0),
        },
        Vec3::new(-2.0, 0.1, -2.0),
        BodyType::KinematicPositionBased,
    );
    let barrel = world.insert(
        ColliderShape::Cylinder {
            half_height: 0.6,
            radius: 0.4,
        },
        Vec3::new(3.0, 0.6, -3.0),
        BodyType::Dynamic,
    );

    let extraction = extract(&world, &ExtractOptions::default()).unwrap();
    assert!(!extraction.geometry.is_empty());
    assert_eq!(extraction.static_collider_handles, vec![floor, pillar, ramp]);

    let static_handles: Vec<ColliderHandle> = extraction.static_obstacles.iter().map(|o| o.handle).collect();
    assert_eq!(static_handles, vec![pillar, ramp]);
    let dynamic_handles: Vec<ColliderHandle> = extraction.dynamic_obstacles.iter().map(|o| o.handle).collect();
    assert_eq!(dynamic_handles, vec![door, barrel]);

    let barrel = extraction.dynamic_obstacles[1];
    assert!((barrel.radius - 0.4).abs() < 1e-5);
    assert!((barrel.height - 1.2).abs() < 1e-5);
}

/// Ground between two landing slabs. A crate lies on the ground and
/// can be pushed from one side of the corridor to the other.
fn corridor() -> (SceneWorld, ColliderHandle) {
    let mut world = SceneWorld::new();
    slab(&mut world, Vec3::new(0.0, -0.1, 0.0), 8.0, 4.0);
    slab(&mut world, Vec3::new(-11.0, -0.1, 0.0), 3.0, 4.0);
    slab(&mut world, Vec3::new(11.0, -0.1, 0.0), 3.0, 4.0);
    let bridge = world.insert(
        ColliderShape::Cuboid {
            half_extents: Vec3::new(1.0, 0.1, 1.5),
        },
        Vec3::new(0.0, 0.1, -2.5),
        BodyType::Dynamic,
    );
    (world, bridge)
}

#[test]
fn corridor_stays_connected_when_the_bridge_moves() {
    let (mut world, bridge) = corridor();
    let options = BuildOptions::default();
    let mut cache = NavMeshBuildCache::new();
    let west = (-12.0, 0.0);
    let east = (12.0, 0.0);

    let first = build(&world, &options, &mut cache).unwrap();
    assert!(first.nav_mesh.tile_count() >= 2);
    assert!(reachable(&first.nav_mesh, west, east));
    assert!(poly_at(&first.nav_mesh, 0.0, -2.5).is_none());

    assert!(world.set_translation(bridge, Vec3::new(0.0, 0.1, 2.5)));
    let second = build(&world, &options, &mut cache).unwrap();
    assert!(second.stats.reused_static);
    assert!(reachable(&second.nav_mesh, west, east));
    assert!(poly_at(&second.nav_mesh, 0.0, -2.5).is_some());
    assert!(poly_at(&second.nav_mesh, 0.0, 2.5).is_none());

    // A wall across the whole corridor cuts it in two
    world.insert(
        ColliderShape::Cuboid {
            half_extents: Vec3::new(0.5, 0.5, 4.5),
        },
        Vec3::new(0.0, 0.5, 0.0),
        BodyType::Dynamic,
    );
    let third = build(&world, &options, &mut cache).unwrap();
    assert!(third.stats.reused_static);
    assert!(!reachable(&third.nav_mesh, west, east));
    assert!(reachable(&third.nav_mesh, west, (-7.0, 0.0)));
}

#[tokio::test]
async fn worker_error_gives_the_in_place_result() {
    let (world, _) = corridor();
    let extraction = extract(&world, &ExtractOptions::default()).unwrap();
    let options = BuildOptions::default();

    let (request_tx, mut request_rx) = mpsc::unbounded_channel::<WorkerRequest>();
    let (response_tx, response_rx) = mpsc::unbounded_channel::<WorkerResponse>();
    tokio::spawn(async move {
        while let Some(WorkerRequest::Build { id, .. }) = request_rx.recv().await {
            let _ = response_tx.send(WorkerResponse::Error {
                id,
                message: "worker crashed".to_string(),
                stack: Some("at build".to_string()),
            });
        }
    });
    let client = WorkerClient::connect(WorkerHandle {
        requests: request_tx,
        responses: response_rx,
    });

    let via_client = client
        .generate(extraction.clone(), options.clone())
        .await
        .unwrap()
        .unwrap();
    let direct = generate(&extraction, &options, &mut NavMeshBuildCache::new())
        .unwrap()
        .unwrap();
    assert_eq!(*via_client.nav_mesh, *direct.nav_mesh);
    assert_eq!(via_client.stats, direct.stats);
}

#[test]
fn spans_reach_the_metrics_sink() {
    let (mut world, bridge) = corridor();
    let sink = MemorySink::new();
    let mut ctx = RecastContext::with_sink(Arc::new(sink.clone()));
    let options = BuildOptions::default();
    let mut cache = NavMeshBuildCache::new();

    let extraction = extract(&world, &ExtractOptions::default()).unwrap();
    generate_with_context(&extraction, &options, &mut cache, &mut ctx).unwrap();
    assert_eq!(sink.count(&TimerCategory::Total), 1);
    assert_eq!(sink.count(&TimerCategory::StaticTiles), 1);
    assert!(sink.count(&TimerCategory::Rasterization) >= 2);
    assert!(sink.count(&TimerCategory::Regions) >= 2);
    assert!(sink.count(&TimerCategory::Assembly) >= 2);
    assert!(sink
        .events()
        .iter()
        .filter(|e| e.category == TimerCategory::Regions)
        .all(|e| e.tile.is_some()));

    sink.clear();
    world.set_translation(bridge, Vec3::new(0.0, 0.1, 2.5));
    let extraction = extract(&world, &ExtractOptions::default()).unwrap();
    generate_with_context(&extraction, &options, &mut cache, &mut ctx).unwrap();
    assert_eq!(sink.count(&TimerCategory::StaticTiles), 0);
    assert_eq!(sink.count(&TimerCategory::Rasterization), 0);
    assert!(sink.count(&TimerCategory::Stamping) >= 1);

    let total = sink
        .events()
        .into_iter()
        .find(|e| e.category == TimerCategory::Total)
        .unwrap();
    assert!(total.tile.is_none());
}
