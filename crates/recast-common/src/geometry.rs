//! Geometry operations shared by the voxel pipeline and the tile container
//!
//! Most operations work on the XZ plane (Y-up coordinate system).

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// An inverted box that any `include_point` call will replace.
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(-f32::MAX),
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.include_point(p);
        }
        aabb
    }

    /// Box centered at `center` with the given half extents
    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn include_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn half_extents(&self) -> Vec3 {
        self.size() * 0.5
    }

    /// Grows the box by `xz` on the horizontal axes and `y` vertically.
    pub fn expanded(&self, xz: f32, y: f32) -> Aabb {
        let pad = Vec3::new(xz, y, xz);
        Aabb {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    /// Inclusive overlap test on all three axes
    pub fn overlaps(&self, other: &Aabb) -> bool {
        overlap_bounds(
            &self.min.to_array(),
            &self.max.to_array(),
            &other.min.to_array(),
            &other.max.to_array(),
        )
    }

    /// Inclusive overlap test ignoring the vertical axis
    pub fn overlaps_xz(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Vec3::ZERO)
    }
}

/// Check if two axis-aligned bounding boxes overlap.
#[inline]
pub fn overlap_bounds(amin: &[f32; 3], amax: &[f32; 3], bmin: &[f32; 3], bmax: &[f32; 3]) -> bool {
    amin[0] <= bmax[0]
        && amax[0] >= bmin[0]
        && amin[1] <= bmax[1]
        && amax[1] >= bmin[1]
        && amin[2] <= bmax[2]
        && amax[2] >= bmin[2]
}

/// Calculate the squared distance from a point to a line segment on the XZ plane.
pub fn dist_point_segment_sqr_2d(p: Vec3, a: Vec3, b: Vec3) -> f32 {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    let d = dx * dx + dz * dz;
    let mut t = dx * (p.x - a.x) + dz * (p.z - a.z);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let qx = a.x + t * dx - p.x;
    let qz = a.z + t * dz - p.z;
    qx * qx + qz * qz
}

/// Squared 3D distance from a point to a segment.
pub fn dist_point_segment_sqr(p: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b - a;
    let d = ab.length_squared();
    let mut t = ab.dot(p - a);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    (a + ab * t - p).length_squared()
}

/// Vertical distance from `p` to triangle `abc` when `p` projects inside it on XZ.
pub fn dist_point_tri(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let dot00 = v0.x * v0.x + v0.z * v0.z;
    let dot01 = v0.x * v1.x + v0.z * v1.z;
    let dot02 = v0.x * v2.x + v0.z * v2.z;
    let dot11 = v1.x * v1.x + v1.z * v1.z;
    let dot12 = v1.x * v2.x + v1.z * v2.z;

    let denom = dot00 * dot11 - dot01 * dot01;
    if denom.abs() < 1e-12 {
        return None;
    }
    let inv_denom = 1.0 / denom;
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    const EPS: f32 = 1e-4;
    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        let y = a.y + v0.y * u + v1.y * v;
        Some((y - p.y).abs())
    } else {
        None
    }
}

/// Point-in-polygon test on the XZ plane for a closed ring of points.
pub fn point_in_polygon_2d(p: Vec3, verts: &[Vec3]) -> bool {
    let mut inside = false;
    let n = verts.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        if ((vi.z > p.z) != (vj.z > p.z))
            && (p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}
