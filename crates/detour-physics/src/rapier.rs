//! [`PhysicsWorld`] over rapier's collider and rigid body sets

use glam::{Quat, Vec3};
use rapier3d::parry::shape::TypedShape;
use rapier3d::prelude::{Collider, ColliderSet, RigidBodySet, RigidBodyType};

use crate::physics::{BodyType, ColliderHandle, ColliderShape, ColliderView, PhysicsWorld};

/// Borrowed view of a rapier scene
#[derive(Clone, Copy)]
pub struct RapierWorld<'a> {
    pub bodies: &'a RigidBodySet,
    pub colliders: &'a ColliderSet,
}

impl<'a> RapierWorld<'a> {
    pub fn new(bodies: &'a RigidBodySet, colliders: &'a ColliderSet) -> Self {
        Self { bodies, colliders }
    }

    fn body_type(&self, collider: &Collider) -> BodyType {
        let Some(body) = collider.parent().and_then(|h| self.bodies.get(h)) else {
            return BodyType::Fixed;
        };
        match body.body_type() {
            RigidBodyType::Fixed => BodyType::Fixed,
            RigidBodyType::Dynamic => BodyType::Dynamic,
            RigidBodyType::KinematicPositionBased => BodyType::KinematicPositionBased,
            RigidBodyType::KinematicVelocityBased => BodyType::KinematicVelocityBased,
        }
    }
}

fn shape_of(collider: &Collider) -> ColliderShape {
    let bounds = || {
        let aabb = collider.compute_aabb();
        ColliderShape::Other {
            aabb_min: Vec3::new(aabb.mins.x, aabb.mins.y, aabb.mins.z),
            aabb_max: Vec3::new(aabb.maxs.x, aabb.maxs.y, aabb.maxs.z),
        }
    };

    match collider.shape().as_typed_shape() {
        TypedShape::Ball(ball) => ColliderShape::Ball { radius: ball.radius },
        TypedShape::Cuboid(cuboid) => ColliderShape::Cuboid {
            half_extents: Vec3::new(cuboid.half_extents.x, cuboid.half_extents.y, cuboid.half_extents.z),
        },
        TypedShape::Cylinder(cylinder) => ColliderShape::Cylinder {
            half_height: cylinder.half_height,
            radius: cylinder.radius,
        },
        TypedShape::Capsule(capsule) => {
            let (a, b) = (capsule.segment.a, capsule.segment.b);
            // Only capsules built along local Y around the origin keep their shape
            let centered = (a.x + b.x).abs() < 1e-6 && (a.y + b.y).abs() < 1e-6 && (a.z + b.z).abs() < 1e-6;
            let vertical = (a.x - b.x).abs() < 1e-6 && (a.z - b.z).abs() < 1e-6;
            if centered && vertical {
                ColliderShape::Capsule {
                    half_height: capsule.half_height(),
                    radius: capsule.radius,
                }
            } else {
                bounds()
            }
        }
        TypedShape::HeightField(heightfield) => {
            let heights = heightfield.heights();
            let (rows, cols) = (heights.nrows(), heights.ncols());
            if rows < 2 || cols < 2 {
                return bounds();
            }
            let scale = heightfield.scale();
            ColliderShape::HeightField {
                nrows: rows - 1,
                ncols: cols - 1,
                heights: (0..cols)
                    .flat_map(|col| (0..rows).map(move |row| (row, col)))
                    .map(|(row, col)| heights[(row, col)])
                    .collect(),
                scale: Vec3::new(scale.x, scale.y, scale.z),
            }
        }
        _ => bounds(),
    }
}

impl PhysicsWorld for RapierWorld<'_> {
    fn colliders(&self) -> Box<dyn Iterator<Item = ColliderView> + '_> {
        Box::new(self.colliders.iter().map(move |(handle, collider)| {
            let (index, generation) = handle.into_raw_parts();
            let position = collider.position();
            let t = position.translation.vector;
            let q = position.rotation.coords;
            ColliderView::new(
                ColliderHandle(u64::from(index) | (u64::from(generation) << 32)),
                shape_of(collider),
                Vec3::new(t.x, t.y, t.z),
                self.body_type(collider),
            )
            .with_rotation(Quat::from_xyzw(q.x, q.y, q.z, q.w))
        }))
    }
}
