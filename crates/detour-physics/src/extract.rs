//! Collider classification
//!
//! [`extract`] walks every collider of a [`PhysicsWorld`] once and sorts it
//! into one of three buckets:
//!
//! - thin, flat cuboids on fixed bodies become walkable triangles;
//! - height fields on fixed bodies are copied as sample grids and
//!   triangulated per tile later;
//! - everything else becomes a vertical [`CylinderObstacle`], static or dynamic
//!   depending on the owning body.
//!
//! The result is a self-contained snapshot that can be sent to a worker.

use glam::{Quat, Vec3};
use log::{debug, warn};
use recast_common::{Aabb, Error, Result};
use serde::{Deserialize, Serialize};

use crate::config::ExtractOptions;
use crate::physics::{heightfield_local_point, ColliderHandle, ColliderShape, ColliderView, PhysicsWorld};
use crate::signature::{Fingerprint, Signature, SignatureBuilder};

/// Static walkable triangles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriangleGeometry {
    /// Vertex positions, three floats each
    pub positions: Vec<f32>,
    /// Three indices per triangle
    pub indices: Vec<u32>,
}

impl TriangleGeometry {
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn vertex(&self, i: usize) -> Vec3 {
        Vec3::new(self.positions[i * 3], self.positions[i * 3 + 1], self.positions[i * 3 + 2])
    }

    pub fn triangle(&self, t: usize) -> [Vec3; 3] {
        let i = &self.indices[t * 3..t * 3 + 3];
        [
            self.vertex(i[0] as usize),
            self.vertex(i[1] as usize),
            self.vertex(i[2] as usize),
        ]
    }

    /// Appends a triangle, flipping it when needed so its normal points up
    fn push_upward_triangle(&mut self, a: Vec3, b: Vec3, c: Vec3) {
        let (b, c) = if (b - a).cross(c - a).y < 0.0 { (c, b) } else { (b, c) };
        let base = self.vertex_count() as u32;
        for v in [a, b, c] {
            self.positions.extend_from_slice(&v.to_array());
        }
        self.indices.extend_from_slice(&[base, base + 1, base + 2]);
    }

    /// Checks the index invariants
    pub fn is_valid(&self) -> bool {
        self.positions.len() % 3 == 0
            && self.indices.len() % 3 == 0
            && self.indices.iter().all(|&i| (i as usize) < self.vertex_count())
    }
}

/// Copy of a height-sampled collider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeightfieldData {
    pub handle: ColliderHandle,
    pub ncols: usize,
    pub nrows: usize,
    /// Column-major, `col * (nrows + 1) + row`
    pub heights: Vec<f32>,
    pub scale: Vec3,
    pub translation: Vec3,
    pub rotation: Quat,
    /// Contains every transformed sample with a small margin
    pub bounds: Aabb,
}

const HEIGHTFIELD_BOUNDS_PAD: f32 = 1e-3;

impl HeightfieldData {
    fn from_collider(view: &ColliderView, nrows: usize, ncols: usize, heights: &[f32], scale: Vec3) -> Self {
        let mut data = Self {
            handle: view.handle,
            ncols,
            nrows,
            heights: heights.to_vec(),
            scale,
            translation: view.translation,
            rotation: view.rotation,
            bounds: Aabb::empty(),
        };
        let mut bounds = Aabb::from_points(
            (0..=ncols).flat_map(|c| (0..=nrows).map(move |r| (c, r))).map(|(c, r)| data.sample(c, r)),
        );
        bounds.min -= Vec3::splat(HEIGHTFIELD_BOUNDS_PAD);
        bounds.max += Vec3::splat(HEIGHTFIELD_BOUNDS_PAD);
        data.bounds = bounds;
        data
    }

    /// Number of samples the grid dimensions call for
    pub fn expected_sample_count(&self) -> usize {
        (self.nrows + 1) * (self.ncols + 1)
    }

    /// World position of a sample
    pub fn sample(&self, col: usize, row: usize) -> Vec3 {
        let h = self
            .heights
            .get(col * (self.nrows + 1) + row)
            .copied()
            .unwrap_or(0.0);
        self.rotation * heightfield_local_point(self.nrows, self.ncols, self.scale, col, row, h)
            + self.translation
    }

    pub fn cell_aabb(&self, col: usize, row: usize) -> Aabb {
        Aabb::from_points([
            self.sample(col, row),
            self.sample(col + 1, row),
            self.sample(col, row + 1),
            self.sample(col + 1, row + 1),
        ])
    }

    /// The two triangles of a cell, each with an upward normal
    pub fn cell_triangles(&self, col: usize, row: usize) -> [[Vec3; 3]; 2] {
        let p00 = self.sample(col, row);
        let p01 = self.sample(col, row + 1);
        let p10 = self.sample(col + 1, row);
        let p11 = self.sample(col + 1, row + 1);
        [upward(p00, p01, p11), upward(p00, p11, p10)]
    }

    /// Appends the triangles of every cell overlapping `area` on XZ
    pub fn triangles_in(&self, area: &Aabb, out: &mut Vec<[Vec3; 3]>) {
        if !self.bounds.overlaps_xz(area) {
            return;
        }
        for col in 0..self.ncols {
            for row in 0..self.nrows {
                if self.cell_aabb(col, row).overlaps_xz(area) {
                    out.extend(self.cell_triangles(col, row));
                }
            }
        }
    }
}

fn upward(a: Vec3, b: Vec3, c: Vec3) -> [Vec3; 3] {
    if (b - a).cross(c - a).y < 0.0 {
        [a, c, b]
    } else {
        [a, b, c]
    }
}

/// Vertical cylinder standing in for a non-walkable collider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CylinderObstacle {
    /// Middle of the vertical extent
    pub center: Vec3,
    pub radius: f32,
    pub height: f32,
    pub handle: ColliderHandle,
}

impl CylinderObstacle {
    /// Footprint grown by `margin` sideways and `margin` in height
    pub fn padded_bounds(&self, margin: f32) -> Aabb {
        let r = self.radius + margin;
        let half_h = (self.height + margin) * 0.5;
        Aabb::from_center_half_extents(self.center, Vec3::new(r, half_h, r))
    }

    fn from_aabb(handle: ColliderHandle, aabb: &Aabb) -> Self {
        let half = aabb.half_extents();
        Self {
            center: aabb.center(),
            radius: (half.x * half.x + half.z * half.z).sqrt(),
            height: aabb.size().y,
            handle,
        }
    }
}

impl Fingerprint for CylinderObstacle {
    fn fingerprint(&self, sig: &mut SignatureBuilder) {
        sig.u64(self.handle.0)
            .vec3(self.center)
            .f32(self.radius)
            .f32(self.height);
    }
}

/// Immutable snapshot of everything the builder needs from the world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub geometry: TriangleGeometry,
    pub heightfields: Vec<HeightfieldData>,
    pub static_collider_handles: Vec<ColliderHandle>,
    pub static_signature: Signature,
    /// Non-walkable shapes on fixed bodies
    pub static_obstacles: Vec<CylinderObstacle>,
    pub dynamic_obstacles: Vec<CylinderObstacle>,
}

impl ExtractionResult {
    /// True when there is walkable input to voxelize
    pub fn has_walkable_input(&self) -> bool {
        !self.geometry.is_empty() || !self.heightfields.is_empty()
    }

    /// Checks that indices and sample grids are consistent.
    ///
    /// Extractions produced by [`extract`] always pass; this guards results
    /// that were deserialized or assembled by hand.
    pub fn validate(&self) -> Result<()> {
        if !self.geometry.is_valid() {
            return Err(Error::InvalidMesh(format!(
                "triangle geometry has {} positions and {} indices, some out of range",
                self.geometry.positions.len(),
                self.geometry.indices.len()
            )));
        }
        if self.geometry.positions.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidMesh("triangle geometry has non-finite positions".to_string()));
        }
        for hf in &self.heightfields {
            if hf.heights.len() != hf.expected_sample_count() {
                return Err(Error::InvalidMesh(format!(
                    "height field {} has {} samples, expected {}",
                    hf.handle,
                    hf.heights.len(),
                    hf.expected_sample_count()
                )));
            }
        }
        Ok(())
    }

    /// Bounds of the walkable input, if any
    pub fn walkable_bounds(&self) -> Option<Aabb> {
        let mut bounds = Aabb::empty();
        for i in 0..self.geometry.vertex_count() {
            bounds.include_point(self.geometry.vertex(i));
        }
        for hf in &self.heightfields {
            bounds = bounds.union(&hf.bounds);
        }
        (!bounds.is_empty()).then_some(bounds)
    }
}

/// Smallest slab segment; shorter settings are raised to this
pub const MIN_SURFACE_SEGMENT: f32 = 0.05;

/// Upper bound on slab quads along one side
pub const MAX_SURFACE_QUADS_PER_SIDE: usize = 1024;

/// Angle between the rotated up axis and world up
fn tilt_angle(rotation: Quat) -> f32 {
    (rotation * Vec3::Y).dot(Vec3::Y).clamp(-1.0, 1.0).acos()
}

/// Total rotation angle of a unit quaternion, in `[0, pi]`
fn rotation_angle(rotation: Quat) -> f32 {
    2.0 * rotation.w.abs().clamp(0.0, 1.0).acos()
}

fn is_flat(rotation: Quat, options: &ExtractOptions) -> bool {
    rotation.w.abs() >= 1.0 - 1e-4 || rotation_angle(rotation) < options.max_walkable_tilt
}

fn surface_segment(options: &ExtractOptions) -> f32 {
    let segment = options.max_surface_segment;
    if segment.is_finite() && segment >= MIN_SURFACE_SEGMENT {
        return segment;
    }
    let fallback = if segment.is_finite() && segment > 0.0 {
        MIN_SURFACE_SEGMENT
    } else {
        ExtractOptions::default().max_surface_segment
    };
    warn!("max surface segment {segment} is unusable, using {fallback}");
    fallback
}

/// Classifies every collider of `world`.
///
/// Returns `None` when the world has nothing to represent: no walkable
/// surface, no height field and no obstacle.
pub fn extract(world: &impl PhysicsWorld, options: &ExtractOptions) -> Option<ExtractionResult> {
    let mut geometry = TriangleGeometry::default();
    let mut heightfields = Vec::new();
    let mut static_handles = Vec::new();
    let mut static_obstacles = Vec::new();
    let mut dynamic_obstacles = Vec::new();
    let mut static_sig = SignatureBuilder::new("static-colliders");
    let segment = surface_segment(options);

    for view in world.colliders() {
        let fixed = view.body_type.is_fixed();
        if fixed {
            static_handles.push(view.handle);
            static_sig
                .u64(view.handle.0)
                .value(&view.shape)
                .vec3(view.translation)
                .quat(view.rotation);
        }

        match &view.shape {
            ColliderShape::Cuboid { half_extents }
                if fixed
                    && half_extents.y <= options.thin_surface_half_height
                    && is_flat(view.rotation, options) =>
            {
                append_slab_top(&view, *half_extents, segment, &mut geometry);
            }
            ColliderShape::HeightField {
                nrows,
                ncols,
                heights,
                scale,
            } if fixed && heights.len() == (nrows + 1) * (ncols + 1) => {
                heightfields.push(HeightfieldData::from_collider(&view, *nrows, *ncols, heights, *scale));
            }
            _ => {
                let obstacle = obstacle_for(&view, options);
                if fixed {
                    static_obstacles.push(obstacle);
                } else {
                    dynamic_obstacles.push(obstacle);
                }
            }
        }
    }

    if geometry.is_empty()
        && heightfields.is_empty()
        && static_obstacles.is_empty()
        && dynamic_obstacles.is_empty()
    {
        return None;
    }

    let static_signature = static_sig
        .usize(static_handles.len())
        .usize(geometry.positions.len())
        .usize(geometry.indices.len())
        .usize(heightfields.len())
        .finish();

    debug!(
        "extracted {} walkable triangles, {} heightfields, {} static and {} dynamic obstacles (static signature {})",
        geometry.triangle_count(),
        heightfields.len(),
        static_obstacles.len(),
        dynamic_obstacles.len(),
        static_signature
    );

    Some(ExtractionResult {
        geometry,
        heightfields,
        static_collider_handles: static_handles,
        static_signature,
        static_obstacles,
        dynamic_obstacles,
    })
}

/// Triangulates the top face of a slab as a grid of quads
fn append_slab_top(view: &ColliderView, half: Vec3, max_segment: f32, out: &mut TriangleGeometry) {
    let quads = |extent: f32| ((2.0 * extent / max_segment).ceil() as usize).clamp(1, MAX_SURFACE_QUADS_PER_SIDE);
    let (nx, nz) = (quads(half.x), quads(half.z));
    let corner = |i: usize, j: usize| {
        let x = -half.x + 2.0 * half.x * i as f32 / nx as f32;
        let z = -half.z + 2.0 * half.z * j as f32 / nz as f32;
        view.transform_point(Vec3::new(x, half.y, z))
    };
    for i in 0..nx {
        for j in 0..nz {
            let p00 = corner(i, j);
            let p01 = corner(i, j + 1);
            let p10 = corner(i + 1, j);
            let p11 = corner(i + 1, j + 1);
            out.push_upward_triangle(p00, p01, p11);
            out.push_upward_triangle(p00, p11, p10);
        }
    }
}

fn obstacle_for(view: &ColliderView, options: &ExtractOptions) -> CylinderObstacle {
    let upright = tilt_angle(view.rotation) < options.max_walkable_tilt;
    let cylinder = |radius: f32, height: f32| CylinderObstacle {
        center: view.translation,
        radius,
        height,
        handle: view.handle,
    };
    match &view.shape {
        ColliderShape::Ball { radius } => cylinder(*radius, 2.0 * radius),
        ColliderShape::Cylinder { half_height, radius } if upright => {
            cylinder(*radius, 2.0 * half_height)
        }
        ColliderShape::Capsule { half_height, radius } if upright => {
            cylinder(*radius, 2.0 * (half_height + radius))
        }
        _ => CylinderObstacle::from_aabb(view.handle, &view.world_aabb()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{BodyType, SceneWorld};

    fn slab(half_x: f32, half_z: f32) -> ColliderShape {
        ColliderShape::Cuboid {
            half_extents: Vec3::new(half_x, 0.1, half_z),
        }
    }

    #[test]
    fn test_empty_world_extracts_nothing() {
        assert!(extract(&SceneWorld::new(), &ExtractOptions::default()).is_none());
    }

    #[test]
    fn test_ground_slab_is_subdivided() {
        let mut world = SceneWorld::new();
        world.insert(slab(10.0, 10.0), Vec3::new(0.0, -0.1, 0.0), BodyType::Fixed);
        let result = extract(&world, &ExtractOptions::default()).unwrap();

        assert!(result.geometry.is_valid());
        assert_eq!(result.geometry.triangle_count(), 18);
        for t in 0..result.geometry.triangle_count() {
            let [a, b, c] = result.geometry.triangle(t);
            assert!((b - a).cross(c - a).y > 0.0);
            assert!(a.y.abs() < 1e-5);
        }
        assert_eq!(result.static_collider_handles.len(), 1);
        assert!(result.dynamic_obstacles.is_empty());
    }

    #[test]
    fn test_rotated_slab_faces_up() {
        let mut world = SceneWorld::new();
        world.insert_with_rotation(
            slab(2.0, 1.0),
            Vec3::ZERO,
            Quat::from_rotation_y(0.05),
            BodyType::Fixed,
        );
        let result = extract(&world, &ExtractOptions::default()).unwrap();
        assert_eq!(result.geometry.triangle_count(), 2);
        let [a, b, c] = result.geometry.triangle(0);
        assert!((b - a).cross(c - a).y > 0.0);
    }

    #[test]
    fn test_flatness_uses_the_full_rotation_angle() {
        // A pure yaw keeps the top face level but is still a large rotation
        let mut world = SceneWorld::new();
        world.insert_with_rotation(slab(2.0, 1.0), Vec3::ZERO, Quat::from_rotation_y(0.7), BodyType::Fixed);
        let result = extract(&world, &ExtractOptions::default()).unwrap();
        assert!(result.geometry.is_empty());
        assert_eq!(result.static_obstacles.len(), 1);

        let relaxed = ExtractOptions::default().with_max_walkable_tilt(0.8);
        let result = extract(&world, &relaxed).unwrap();
        assert_eq!(result.geometry.triangle_count(), 2);
    }

    #[test]
    fn test_unusable_surface_segment_is_clamped() {
        let mut world = SceneWorld::new();
        world.insert(slab(10.0, 10.0), Vec3::ZERO, BodyType::Fixed);

        let zero = extract(&world, &ExtractOptions::default().with_max_surface_segment(0.0)).unwrap();
        assert_eq!(zero.geometry.triangle_count(), 18);

        let mut small = SceneWorld::new();
        small.insert(slab(1.0, 1.0), Vec3::ZERO, BodyType::Fixed);
        let tiny = extract(&small, &ExtractOptions::default().with_max_surface_segment(1e-6)).unwrap();
        let n = tiny.geometry.triangle_count();
        assert!((2 * 40 * 40..=2 * 41 * 41).contains(&n), "{n} triangles");

        let mut huge = SceneWorld::new();
        huge.insert(slab(1000.0, 0.01), Vec3::ZERO, BodyType::Fixed);
        let capped = extract(&huge, &ExtractOptions::default().with_max_surface_segment(MIN_SURFACE_SEGMENT)).unwrap();
        assert_eq!(capped.geometry.triangle_count(), 2 * MAX_SURFACE_QUADS_PER_SIDE);
    }

    #[test]
    fn test_obstacle_shapes() {
        let mut world = SceneWorld::new();
        let ball = world.insert(ColliderShape::Ball { radius: 0.5 }, Vec3::new(1.0, 0.5, 0.0), BodyType::Dynamic);
        world.insert(
            ColliderShape::Capsule {
                half_height: 0.5,
                radius: 0.3,
            },
            Vec3::new(0.0, 1.0, 0.0),
            BodyType::KinematicPositionBased,
        );
        world.insert(
            ColliderShape::Cylinder {
                half_height: 1.0,
                radius: 0.4,
            },
            Vec3::new(4.0, 1.0, 0.0),
            BodyType::Fixed,
        );
        world.insert(
            ColliderShape::Cuboid {
                half_extents: Vec3::new(1.0, 1.0, 2.0),
            },
            Vec3::new(-4.0, 1.0, 0.0),
            BodyType::Fixed,
        );
        let result = extract(&world, &ExtractOptions::default()).unwrap();

        assert!(result.geometry.is_empty());
        assert_eq!(result.dynamic_obstacles.len(), 2);
        assert_eq!(result.static_obstacles.len(), 2);

        let b = result.dynamic_obstacles.iter().find(|o| o.handle == ball).unwrap();
        assert_eq!((b.radius, b.height), (0.5, 1.0));
        let capsule = &result.dynamic_obstacles[1];
        assert!((capsule.height - 1.6).abs() < 1e-6);

        let cyl = &result.static_obstacles[0];
        assert_eq!((cyl.radius, cyl.height), (0.4, 2.0));
        let tall_box = &result.static_obstacles[1];
        assert!((tall_box.radius - 5.0_f32.sqrt()).abs() < 1e-5);
        assert!((tall_box.height - 2.0).abs() < 1e-5);
        assert!((tall_box.center.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_dynamic_slab_is_an_obstacle() {
        let mut world = SceneWorld::new();
        world.insert(slab(1.0, 1.0), Vec3::ZERO, BodyType::Dynamic);
        let result = extract(&world, &ExtractOptions::default()).unwrap();
        assert!(result.geometry.is_empty());
        assert_eq!(result.dynamic_obstacles.len(), 1);
    }

    #[test]
    fn test_tilted_slab_is_an_obstacle() {
        let mut world = SceneWorld::new();
        world.insert_with_rotation(slab(1.0, 1.0), Vec3::ZERO, Quat::from_rotation_x(0.5), BodyType::Fixed);
        let result = extract(&world, &ExtractOptions::default()).unwrap();
        assert!(result.geometry.is_empty());
        assert_eq!(result.static_obstacles.len(), 1);
    }

    #[test]
    fn test_heightfield_is_copied() {
        let mut world = SceneWorld::new();
        world.insert(
            ColliderShape::HeightField {
                nrows: 3,
                ncols: 3,
                heights: vec![0.0; 16],
                scale: Vec3::new(9.0, 1.0, 9.0),
            },
            Vec3::new(1.0, 2.0, 3.0),
            BodyType::Fixed,
        );
        let result = extract(&world, &ExtractOptions::default()).unwrap();
        assert_eq!(result.heightfields.len(), 1);
        let hf = &result.heightfields[0];
        assert_eq!((hf.nrows, hf.ncols), (3, 3));
        assert_eq!(hf.heights.len(), 16);
        assert_eq!(hf.heights, vec![0.0; 16]);
        assert_eq!(hf.sample(0, 0), Vec3::new(-3.5, 2.0, -1.5));
        assert!(hf.bounds.min.y < 2.0 && hf.bounds.max.y > 2.0);
        assert!(hf.bounds.min.x < -3.5 && hf.bounds.max.x > 5.5);

        let mut tris = Vec::new();
        hf.triangles_in(&hf.bounds, &mut tris);
        assert_eq!(tris.len(), 18);
        assert!(tris.iter().all(|[a, b, c]| (*b - *a).cross(*c - *a).y > 0.0));
    }

    #[test]
    fn test_moving_heightfield_is_a_dynamic_obstacle() {
        let mut world = SceneWorld::new();
        world.insert(
            ColliderShape::HeightField {
                nrows: 3,
                ncols: 3,
                heights: vec![0.0; 16],
                scale: Vec3::new(9.0, 1.0, 9.0),
            },
            Vec3::ZERO,
            BodyType::KinematicPositionBased,
        );
        let result = extract(&world, &ExtractOptions::default()).unwrap();
        assert!(result.heightfields.is_empty());
        assert_eq!(result.dynamic_obstacles.len(), 1);
        assert!(result.static_collider_handles.is_empty());
    }

    #[test]
    fn test_malformed_extractions_are_rejected() {
        let mut world = SceneWorld::new();
        world.insert(slab(5.0, 5.0), Vec3::ZERO, BodyType::Fixed);
        world.insert(
            ColliderShape::HeightField {
                nrows: 1,
                ncols: 1,
                heights: vec![0.0; 4],
                scale: Vec3::splat(4.0),
            },
            Vec3::new(20.0, 0.0, 0.0),
            BodyType::Fixed,
        );
        let result = extract(&world, &ExtractOptions::default()).unwrap();
        assert!(result.validate().is_ok());

        let mut bad_index = result.clone();
        bad_index.geometry.indices[2] = 999;
        assert!(matches!(bad_index.validate(), Err(Error::InvalidMesh(_))));

        let mut short_grid = result.clone();
        short_grid.heightfields[0].heights.pop();
        assert!(matches!(short_grid.validate(), Err(Error::InvalidMesh(_))));

        let mut nan = result;
        nan.geometry.positions[0] = f32::NAN;
        assert!(matches!(nan.validate(), Err(Error::InvalidMesh(_))));
    }

    #[test]
    fn test_static_signature_ignores_dynamic_bodies() {
        let mut world = SceneWorld::new();
        world.insert(slab(5.0, 5.0), Vec3::ZERO, BodyType::Fixed);
        let crate_box = world.insert(ColliderShape::Ball { radius: 0.5 }, Vec3::Y, BodyType::Dynamic);
        let before = extract(&world, &ExtractOptions::default()).unwrap().static_signature;

        world.set_translation(crate_box, Vec3::new(2.0, 0.5, 0.0));
        let moved = extract(&world, &ExtractOptions::default()).unwrap().static_signature;
        assert_eq!(before, moved);

        world.insert(ColliderShape::Ball { radius: 0.5 }, Vec3::Y, BodyType::Fixed);
        let added = extract(&world, &ExtractOptions::default()).unwrap().static_signature;
        assert_ne!(before, added);
    }
}
