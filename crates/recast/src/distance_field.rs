//! Distance field generation for watershed partitioning

use recast_common::Result;

use super::area::chamfer_distance;
use super::compact_heightfield::CompactHeightfield;

/// Smooths the distance field with a 3x3 box filter, leaving values at or
/// below `threshold * 2` untouched.
fn box_blur(chf: &CompactHeightfield, threshold: u16, src: &[u16]) -> Vec<u16> {
    let threshold = threshold * 2;
    let mut dst = vec![0u16; src.len()];

    for z in 0..chf.height {
        for x in 0..chf.width {
            for i in chf.cell_spans(x, z) {
                let cd = src[i];
                if cd <= threshold {
                    dst[i] = cd;
                    continue;
                }

                let mut d = cd as u32;
                for dir in 0..4 {
                    if let Some((ax, az, ai)) = chf.neighbour(x, z, i, dir) {
                        d += src[ai] as u32;
                        match chf.neighbour(ax, az, ai, (dir + 1) & 0x3) {
                            Some((_, _, aai)) => d += src[aai] as u32,
                            None => d += cd as u32,
                        }
                    } else {
                        d += cd as u32 * 2;
                    }
                }
                dst[i] = ((d + 5) / 9) as u16;
            }
        }
    }

    dst
}

/// Computes `chf.dist` and `chf.max_distance`.
///
/// Needs to be recomputed whenever area ids change, e.g. after obstacles
/// are carved into the field.
pub fn build_distance_field(chf: &mut CompactHeightfield) -> Result<()> {
    let raw = chamfer_distance(chf, true);
    let dist = box_blur(chf, 1, &raw);
    chf.max_distance = dist.iter().copied().max().unwrap_or(0);
    chf.dist = dist;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::RC_WALKABLE_AREA;
    use glam::Vec3;

    fn flat_chf(size: i32) -> CompactHeightfield {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::ZERO,
            Vec3::new(size as f32, 5.0, size as f32),
            1.0,
            0.5,
        );
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 2, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        CompactHeightfield::build_from_heightfield(&hf, 3, 1).unwrap()
    }

    #[test]
    fn test_distance_peaks_in_the_middle() {
        let mut chf = flat_chf(11);
        build_distance_field(&mut chf).unwrap();
        assert_eq!(chf.dist.len(), chf.span_count());

        let center = chf.cell_spans(5, 5).start;
        let edge = chf.cell_spans(0, 5).start;
        assert_eq!(chf.dist[edge], 0);
        assert_eq!(chf.dist[center], chf.max_distance);
        assert!(chf.max_distance >= 8);
    }

    #[test]
    fn test_distance_monotonic_towards_center() {
        let mut chf = flat_chf(11);
        build_distance_field(&mut chf).unwrap();
        let row: Vec<u16> = (0..=5).map(|x| chf.dist[chf.cell_spans(x, 5).start]).collect();
        for pair in row.windows(2) {
            assert!(pair[0] <= pair[1], "{:?}", row);
        }
    }
}
