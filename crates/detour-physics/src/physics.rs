//! Read-only view of a physics world
//!
//! The pipeline never talks to a physics engine directly. It walks the
//! colliders exposed through [`PhysicsWorld`] once per refresh and copies
//! what it needs. [`SceneWorld`] is a plain in-memory world used by tests
//! and the command line baker; the `rapier` feature adds an adapter for
//! `rapier3d` collider sets.

use std::fmt;
use std::path::Path;

use glam::{Quat, Vec3};
use recast_common::{Aabb, Error, Result};
use serde::{Deserialize, Serialize};

use crate::signature::{Fingerprint, SignatureBuilder};

/// Stable identifier of a collider within its world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ColliderHandle(pub u64);

impl fmt::Display for ColliderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How the body owning a collider moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BodyType {
    #[default]
    Fixed,
    Dynamic,
    KinematicPositionBased,
    KinematicVelocityBased,
}

impl BodyType {
    pub fn is_fixed(&self) -> bool {
        matches!(self, BodyType::Fixed)
    }
}

/// Collider shapes in local space, Y up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ColliderShape {
    Ball {
        radius: f32,
    },
    #[serde(rename_all = "camelCase")]
    Cuboid {
        half_extents: Vec3,
    },
    #[serde(rename_all = "camelCase")]
    Cylinder {
        half_height: f32,
        radius: f32,
    },
    #[serde(rename_all = "camelCase")]
    Capsule {
        half_height: f32,
        radius: f32,
    },
    /// Regular grid of heights, column-major with `nrows + 1` entries per column
    HeightField {
        nrows: usize,
        ncols: usize,
        heights: Vec<f32>,
        scale: Vec3,
    },
    /// Any other shape, described by its world-space bounds
    #[serde(rename_all = "camelCase")]
    Other {
        aabb_min: Vec3,
        aabb_max: Vec3,
    },
}

impl ColliderShape {
    pub fn kind(&self) -> &'static str {
        match self {
            ColliderShape::Ball { .. } => "ball",
            ColliderShape::Cuboid { .. } => "cuboid",
            ColliderShape::Cylinder { .. } => "cylinder",
            ColliderShape::Capsule { .. } => "capsule",
            ColliderShape::HeightField { .. } => "heightField",
            ColliderShape::Other { .. } => "other",
        }
    }
}

impl Fingerprint for ColliderShape {
    fn fingerprint(&self, sig: &mut SignatureBuilder) {
        match self {
            ColliderShape::Ball { radius } => {
                sig.u64(1).f32(*radius);
            }
            ColliderShape::Cuboid { half_extents } => {
                sig.u64(2).vec3(*half_extents);
            }
            ColliderShape::Cylinder { half_height, radius } => {
                sig.u64(3).f32(*half_height).f32(*radius);
            }
            ColliderShape::Capsule { half_height, radius } => {
                sig.u64(4).f32(*half_height).f32(*radius);
            }
            ColliderShape::HeightField {
                nrows,
                ncols,
                heights,
                scale,
            } => {
                sig.u64(5).usize(*nrows).usize(*ncols).vec3(*scale).f32_slice(heights);
            }
            ColliderShape::Other { aabb_min, aabb_max } => {
                sig.u64(6).vec3(*aabb_min).vec3(*aabb_max);
            }
        }
    }
}

/// Snapshot of one collider as seen by the extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColliderView {
    pub handle: ColliderHandle,
    pub shape: ColliderShape,
    pub translation: Vec3,
    pub rotation: Quat,
    pub body_type: BodyType,
}

impl ColliderView {
    pub fn new(handle: ColliderHandle, shape: ColliderShape, translation: Vec3, body_type: BodyType) -> Self {
        Self {
            handle,
            shape,
            translation,
            rotation: Quat::IDENTITY,
            body_type,
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Local point to world space
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.rotation * p + self.translation
    }

    /// World-space bounds. Round shapes are bounded by their enclosing box.
    pub fn world_aabb(&self) -> Aabb {
        let boxed = |half: Vec3| {
            Aabb::from_points(
                (0..8).map(|i| {
                    let sx = if i & 1 == 0 { -1.0 } else { 1.0 };
                    let sy = if i & 2 == 0 { -1.0 } else { 1.0 };
                    let sz = if i & 4 == 0 { -1.0 } else { 1.0 };
                    self.transform_point(half * Vec3::new(sx, sy, sz))
                }),
            )
        };
        match &self.shape {
            ColliderShape::Ball { radius } => {
                Aabb::from_center_half_extents(self.translation, Vec3::splat(*radius))
            }
            ColliderShape::Cuboid { half_extents } => boxed(*half_extents),
            ColliderShape::Cylinder { half_height, radius } => {
                boxed(Vec3::new(*radius, *half_height, *radius))
            }
            ColliderShape::Capsule { half_height, radius } => {
                boxed(Vec3::new(*radius, half_height + radius, *radius))
            }
            ColliderShape::HeightField {
                nrows,
                ncols,
                heights,
                scale,
            } => Aabb::from_points((0..=*ncols).flat_map(|col| {
                (0..=*nrows).map(move |row| {
                    let h = heights.get(col * (nrows + 1) + row).copied().unwrap_or(0.0);
                    self.transform_point(heightfield_local_point(*nrows, *ncols, *scale, col, row, h))
                })
            })),
            ColliderShape::Other { aabb_min, aabb_max } => Aabb::new(*aabb_min, *aabb_max),
        }
    }
}

/// Local position of a heightfield sample; the grid is centered on the origin
pub(crate) fn heightfield_local_point(
    nrows: usize,
    ncols: usize,
    scale: Vec3,
    col: usize,
    row: usize,
    height: f32,
) -> Vec3 {
    Vec3::new(
        (-0.5 + col as f32 / ncols.max(1) as f32) * scale.x,
        height * scale.y,
        (-0.5 + row as f32 / nrows.max(1) as f32) * scale.z,
    )
}

/// Source of colliders for extraction
pub trait PhysicsWorld {
    fn colliders(&self) -> Box<dyn Iterator<Item = ColliderView> + '_>;
}

/// Collider entry of a scene file; handle, rotation and body type are optional
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneColliderDesc {
    handle: Option<ColliderHandle>,
    shape: ColliderShape,
    #[serde(default)]
    translation: Vec3,
    #[serde(default = "identity")]
    rotation: Quat,
    #[serde(default)]
    body_type: BodyType,
}

fn identity() -> Quat {
    Quat::IDENTITY
}

#[derive(Debug, Clone, Deserialize)]
struct SceneFile {
    colliders: Vec<SceneColliderDesc>,
}

/// In-memory physics world
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SceneWorld {
    colliders: Vec<ColliderView>,
    #[serde(skip)]
    next_handle: u64,
}

impl SceneWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a scene from JSON; colliders without a handle get fresh ones
    pub fn from_json(json: &str) -> Result<Self> {
        let file: SceneFile = serde_json::from_str(json)
            .map_err(|e| Error::InvalidMesh(format!("invalid scene: {e}")))?;

        let mut world = Self::new();
        world.next_handle = file
            .colliders
            .iter()
            .filter_map(|c| c.handle)
            .map(|h| h.0 + 1)
            .max()
            .unwrap_or(1);

        for desc in file.colliders {
            let handle = match desc.handle {
                Some(h) if world.get(h).is_some() => {
                    return Err(Error::InvalidMesh(format!("duplicate collider handle {h}")));
                }
                Some(h) => h,
                None => world.allocate_handle(),
            };
            world.colliders.push(ColliderView {
                handle,
                shape: desc.shape,
                translation: desc.translation,
                rotation: desc.rotation,
                body_type: desc.body_type,
            });
        }
        Ok(world)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidMesh(format!("scene: {e}")))
    }

    fn allocate_handle(&mut self) -> ColliderHandle {
        self.next_handle = self.next_handle.max(1);
        let handle = ColliderHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    /// Adds a collider with identity rotation
    pub fn insert(&mut self, shape: ColliderShape, translation: Vec3, body_type: BodyType) -> ColliderHandle {
        self.insert_with_rotation(shape, translation, Quat::IDENTITY, body_type)
    }

    pub fn insert_with_rotation(
        &mut self,
        shape: ColliderShape,
        translation: Vec3,
        rotation: Quat,
        body_type: BodyType,
    ) -> ColliderHandle {
        let handle = self.allocate_handle();
        self.colliders.push(ColliderView {
            handle,
            shape,
            translation,
            rotation,
            body_type,
        });
        handle
    }

    pub fn get(&self, handle: ColliderHandle) -> Option<&ColliderView> {
        self.colliders.iter().find(|c| c.handle == handle)
    }

    /// Moves a collider; returns false for an unknown handle
    pub fn set_translation(&mut self, handle: ColliderHandle, translation: Vec3) -> bool {
        match self.colliders.iter_mut().find(|c| c.handle == handle) {
            Some(c) => {
                c.translation = translation;
                true
            }
            None => false,
        }
    }

    pub fn set_rotation(&mut self, handle: ColliderHandle, rotation: Quat) -> bool {
        match self.colliders.iter_mut().find(|c| c.handle == handle) {
            Some(c) => {
                c.rotation = rotation;
                true
            }
            None => false,
        }
    }

    /// Replaces the shape of a collider, keeping its handle and transform
    pub fn set_shape(&mut self, handle: ColliderHandle, shape: ColliderShape) -> bool {
        match self.colliders.iter_mut().find(|c| c.handle == handle) {
            Some(c) => {
                c.shape = shape;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, handle: ColliderHandle) -> Option<ColliderView> {
        let idx = self.colliders.iter().position(|c| c.handle == handle)?;
        Some(self.colliders.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }
}

impl PhysicsWorld for SceneWorld {
    fn colliders(&self) -> Box<dyn Iterator<Item = ColliderView> + '_> {
        Box::new(self.colliders.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_world_handles() {
        let mut world = SceneWorld::new();
        let a = world.insert(ColliderShape::Ball { radius: 1.0 }, Vec3::ZERO, BodyType::Dynamic);
        let b = world.insert(ColliderShape::Ball { radius: 2.0 }, Vec3::X, BodyType::Fixed);
        assert_ne!(a, b);
        assert_eq!(world.len(), 2);

        assert!(world.set_translation(a, Vec3::new(3.0, 0.0, 0.0)));
        assert_eq!(world.get(a).unwrap().translation.x, 3.0);

        assert!(world.set_shape(b, ColliderShape::Ball { radius: 3.0 }));
        assert_eq!(world.get(b).unwrap().shape, ColliderShape::Ball { radius: 3.0 });

        assert!(world.remove(a).is_some());
        assert!(!world.set_translation(a, Vec3::ZERO));
        assert_eq!(world.colliders().count(), 1);
    }

    #[test]
    fn test_scene_from_json() {
        let json = r#"{
            "colliders": [
                { "handle": 7, "shape": { "type": "cuboid", "halfExtents": [10.0, 0.1, 10.0] } },
                { "shape": { "type": "ball", "radius": 0.5 }, "translation": [1.0, 0.5, 1.0], "bodyType": "dynamic" }
            ]
        }"#;
        let world = SceneWorld::from_json(json).unwrap();
        assert_eq!(world.len(), 2);
        let ground = world.get(ColliderHandle(7)).unwrap();
        assert!(ground.body_type.is_fixed());
        assert_eq!(ground.rotation, Quat::IDENTITY);
        let ball = world.get(ColliderHandle(8)).unwrap();
        assert_eq!(ball.body_type, BodyType::Dynamic);

        let again = SceneWorld::from_json(&world.to_json().unwrap()).unwrap();
        assert_eq!(again.colliders, world.colliders);
    }

    #[test]
    fn test_duplicate_handles_are_rejected() {
        let json = r#"{ "colliders": [
            { "handle": 1, "shape": { "type": "ball", "radius": 0.5 } },
            { "handle": 1, "shape": { "type": "ball", "radius": 0.5 } }
        ] }"#;
        assert!(SceneWorld::from_json(json).is_err());
    }

    #[test]
    fn test_world_aabb_of_rotated_cuboid() {
        let view = ColliderView::new(
            ColliderHandle(1),
            ColliderShape::Cuboid {
                half_extents: Vec3::new(2.0, 0.5, 1.0),
            },
            Vec3::new(0.0, 1.0, 0.0),
            BodyType::Fixed,
        )
        .with_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        let aabb = view.world_aabb();
        assert!((aabb.max.x - 1.0).abs() < 1e-5);
        assert!((aabb.max.z - 2.0).abs() < 1e-5);
        assert!((aabb.min.y - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_heightfield_sample_layout() {
        let p = heightfield_local_point(2, 4, Vec3::new(8.0, 2.0, 4.0), 4, 0, 1.5);
        assert_eq!(p, Vec3::new(4.0, 3.0, -2.0));
    }
}
