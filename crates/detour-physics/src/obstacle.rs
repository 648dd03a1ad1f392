//! Carving cylinder obstacles into compact heightfields

use glam::Vec3;
use recast::{mark_cylinder_area, CompactHeightfield, RC_NULL_AREA};
use recast_common::Aabb;

use crate::extract::CylinderObstacle;
use crate::signature::{signature_of, Signature, SignatureBuilder};

/// Obstacles whose padded footprint overlaps `area`
pub fn obstacles_overlapping<'a>(
    obstacles: &'a [CylinderObstacle],
    area: &Aabb,
    margin: f32,
) -> Vec<&'a CylinderObstacle> {
    obstacles
        .iter()
        .filter(|o| o.padded_bounds(margin).overlaps(area))
        .collect()
}

/// Fingerprint of the obstacle subset affecting one tile
pub fn tile_obstacle_signature(obstacles: &[&CylinderObstacle]) -> Signature {
    signature_of("tile-obstacles", obstacles.iter().copied())
}

/// Fingerprint of the whole dynamic state of a build
pub fn dynamic_signature(
    static_signature: Signature,
    options_signature: Signature,
    obstacles: &[CylinderObstacle],
) -> Signature {
    SignatureBuilder::new("dynamic")
        .signature(static_signature)
        .signature(options_signature)
        .signature(signature_of("obstacles", obstacles))
        .finish()
}

/// Marks the spans under each padded obstacle as unwalkable.
/// Returns the number of spans changed.
pub fn stamp_obstacles(chf: &mut CompactHeightfield, obstacles: &[&CylinderObstacle], margin: f32) -> usize {
    obstacles
        .iter()
        .map(|o| {
            let height = o.height + margin;
            let bottom = Vec3::new(o.center.x, o.center.y - height * 0.5, o.center.z);
            mark_cylinder_area(chf, bottom, o.radius + margin, height, RC_NULL_AREA)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::ColliderHandle;
    use recast::{Heightfield, RC_WALKABLE_AREA};

    fn obstacle(x: f32, z: f32, handle: u64) -> CylinderObstacle {
        CylinderObstacle {
            center: Vec3::new(x, 0.5, z),
            radius: 0.5,
            height: 1.0,
            handle: ColliderHandle(handle),
        }
    }

    fn flat_chf() -> CompactHeightfield {
        let mut hf = Heightfield::new(20, 20, Vec3::new(0.0, -0.2, 0.0), Vec3::new(4.0, 3.0, 4.0), 0.2, 0.2);
        for z in 0..20 {
            for x in 0..20 {
                hf.add_span(x, z, 0, 1, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        CompactHeightfield::build_from_heightfield(&hf, 10, 2).unwrap()
    }

    #[test]
    fn test_overlap_uses_margin() {
        let obstacles = [obstacle(2.0, 0.0, 1)];
        let area = Aabb::new(Vec3::new(2.6, -1.0, -1.0), Vec3::new(4.0, 1.0, 1.0));
        assert!(obstacles_overlapping(&obstacles, &area, 0.0).is_empty());
        assert_eq!(obstacles_overlapping(&obstacles, &area, 0.2).len(), 1);
    }

    #[test]
    fn test_stamp_clears_footprint() {
        let mut chf = flat_chf();
        let o = obstacle(2.0, 2.0, 1);
        let changed = stamp_obstacles(&mut chf, &[&o], 0.1);
        assert!(changed > 0);

        let center = chf.cell_spans(10, 10).start;
        assert_eq!(chf.areas[center], RC_NULL_AREA);
        let corner = chf.cell_spans(0, 0).start;
        assert_eq!(chf.areas[corner], RC_WALKABLE_AREA);
    }

    #[test]
    fn test_floating_obstacle_leaves_floor() {
        let mut chf = flat_chf();
        let mut o = obstacle(2.0, 2.0, 1);
        o.center.y = 2.5;
        assert_eq!(stamp_obstacles(&mut chf, &[&o], 0.1), 0);
    }

    #[test]
    fn test_signatures() {
        let a = obstacle(1.0, 1.0, 1);
        let b = obstacle(3.0, 1.0, 2);
        assert_eq!(tile_obstacle_signature(&[&a, &b]), tile_obstacle_signature(&[&a, &b]));
        assert_ne!(tile_obstacle_signature(&[&a]), tile_obstacle_signature(&[&a, &b]));

        let s = Signature(1);
        let moved = [obstacle(1.0, 1.5, 1)];
        assert_ne!(dynamic_signature(s, s, &[a]), dynamic_signature(s, s, &moved));
        assert_ne!(dynamic_signature(s, s, &[a]), dynamic_signature(Signature(2), s, &[a]));
    }
}
