//! Rebuilding one tile from its (possibly stamped) compact heightfield
//!
//! Regions, contours and polygons are built in sequence. The detail mesh is
//! built through a small state machine so a failing detail pass degrades
//! the tile instead of failing the whole refresh.

use log::{debug, warn};
use recast::{
    build_distance_field, build_regions, build_regions_monotone, CompactHeightfield, ContourSet,
    PartitionType, PolyMesh, PolyMeshDetail, RecastContext, TimerCategory,
};
use recast_common::Result;
use serde::{Deserialize, Serialize};

use crate::config::{QualityPreset, ResolvedBuildConfig};

/// Tiles with fewer polygons skip the detail pass under the fast preset
const FAST_DETAIL_MIN_POLYS: usize = 20;

/// Which detail pass is being tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailAttempt {
    FullQuality,
    ZeroSampleDistance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailState {
    Attempting(DetailAttempt),
    MinimalFallback,
}

impl DetailState {
    pub const INITIAL: DetailState = DetailState::Attempting(DetailAttempt::FullQuality);
}

/// How a tile's detail mesh was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetailQuality {
    Full,
    ZeroSampleDistance,
    /// One empty entry per polygon
    Minimal,
    Skipped,
}

/// Outcome of one detail step
#[derive(Debug)]
pub enum DetailStep {
    Built(PolyMeshDetail, DetailQuality),
    Next(DetailState),
}

/// Runs a single state of the detail machine.
///
/// `build` is called with the sample distance to try.
pub fn detail_step(
    state: DetailState,
    mesh: &PolyMesh,
    sample_dist: f32,
    build: &mut impl FnMut(f32) -> Result<PolyMeshDetail>,
) -> DetailStep {
    match state {
        DetailState::Attempting(DetailAttempt::FullQuality) => match build(sample_dist) {
            Ok(detail) => DetailStep::Built(detail, DetailQuality::Full),
            Err(e) => {
                warn!("detail mesh failed, retrying without height sampling: {e}");
                DetailStep::Next(DetailState::Attempting(DetailAttempt::ZeroSampleDistance))
            }
        },
        DetailState::Attempting(DetailAttempt::ZeroSampleDistance) => match build(0.0) {
            Ok(detail) => DetailStep::Built(detail, DetailQuality::ZeroSampleDistance),
            Err(e) => {
                warn!("detail mesh failed again, using minimal detail: {e}");
                DetailStep::Next(DetailState::MinimalFallback)
            }
        },
        DetailState::MinimalFallback => DetailStep::Built(minimal_detail(mesh), DetailQuality::Minimal),
    }
}

/// Drives [`detail_step`] until a detail mesh comes out
pub fn build_detail_with_fallback(
    mesh: &PolyMesh,
    sample_dist: f32,
    mut build: impl FnMut(f32) -> Result<PolyMeshDetail>,
) -> (PolyMeshDetail, DetailQuality) {
    let mut state = DetailState::INITIAL;
    loop {
        match detail_step(state, mesh, sample_dist, &mut build) {
            DetailStep::Built(detail, quality) => return (detail, quality),
            DetailStep::Next(next) => state = next,
        }
    }
}

/// One `(0, 0, 0, 0)` entry per polygon and no vertices or triangles
pub fn minimal_detail(mesh: &PolyMesh) -> PolyMeshDetail {
    PolyMeshDetail {
        meshes: vec![[0, 0, 0, 0]; mesh.npolys],
        verts: Vec::new(),
        tris: Vec::new(),
    }
}

/// Polygons of one rebuilt tile, ready for assembly
#[derive(Debug, Clone)]
pub struct TileMesh {
    pub tile_x: i32,
    pub tile_y: i32,
    pub poly_mesh: PolyMesh,
    pub detail: Option<PolyMeshDetail>,
    pub detail_quality: DetailQuality,
}

/// Builds regions, contours, polygons and detail for one tile.
///
/// Region ids are written into `chf`. Returns `None` when the tile has no
/// polygons.
pub fn build_tile_mesh(
    chf: &mut CompactHeightfield,
    tile_x: i32,
    tile_y: i32,
    config: &ResolvedBuildConfig,
    ctx: &mut RecastContext,
) -> Result<Option<TileMesh>> {
    ctx.set_tile(Some((tile_x, tile_y)));

    ctx.time(TimerCategory::Regions, |_| match config.partition {
        PartitionType::Watershed => build_regions(
            chf,
            config.border_size,
            config.min_region_area,
            config.merge_region_area,
        ),
        PartitionType::Monotone => build_regions_monotone(
            chf,
            config.border_size,
            config.min_region_area,
            config.merge_region_area,
        ),
    })?;

    let cset = ctx.time(TimerCategory::Contours, |_| {
        ContourSet::build(chf, config.max_simplification_error, config.max_edge_len)
    })?;
    if cset.contours.is_empty() {
        debug!("tile ({tile_x}, {tile_y}) has no contours");
        return Ok(None);
    }

    let mut mesh = ctx.time(TimerCategory::PolyMesh, |_| {
        PolyMesh::build(&cset, config.max_vertices_per_poly)
    })?;
    if mesh.npolys == 0 {
        debug!("tile ({tile_x}, {tile_y}) has no polygons");
        return Ok(None);
    }
    for flags in &mut mesh.flags {
        if *flags == 0 {
            *flags = detour::PolyFlags::WALK.bits();
        }
    }

    let skip_detail = config.skip_detail_mesh
        || (config.preset == QualityPreset::Fast && mesh.npolys < FAST_DETAIL_MIN_POLYS);
    let (detail, detail_quality) = if skip_detail {
        (None, DetailQuality::Skipped)
    } else {
        let chf = &*chf;
        let (detail, quality) = ctx.time(TimerCategory::DetailMesh, |_| {
            build_detail_with_fallback(&mesh, config.detail_sample_dist, |dist| {
                PolyMeshDetail::build(&mesh, chf, dist, config.detail_sample_max_error)
            })
        });
        (Some(detail), quality)
    };

    debug!(
        "tile ({tile_x}, {tile_y}): {} regions, {} contours, {} polys, detail {:?}",
        chf.max_regions,
        cset.contours.len(),
        mesh.npolys,
        detail_quality
    );
    Ok(Some(TileMesh {
        tile_x,
        tile_y,
        poly_mesh: mesh,
        detail,
        detail_quality,
    }))
}

/// Recomputes the distance field after obstacles were carved
pub fn refresh_distance_field(chf: &mut CompactHeightfield, config: &ResolvedBuildConfig) -> Result<()> {
    if config.partition == PartitionType::Watershed {
        build_distance_field(chf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildOptions;
    use glam::Vec3;
    use recast::{erode_walkable_area, Heightfield, RC_WALKABLE_AREA};
    use recast_common::Error;

    /// A `size` x `size` flat floor with a border of `border` cells
    fn floor_chf(size: i32, config: &ResolvedBuildConfig) -> CompactHeightfield {
        let cs = config.cell_size;
        let ch = config.cell_height;
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::new(0.0, -ch, 0.0),
            Vec3::new(size as f32 * cs, 4.0, size as f32 * cs),
            cs,
            ch,
        );
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 1, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        let mut chf =
            CompactHeightfield::build_from_heightfield(&hf, config.walkable_height, config.walkable_climb).unwrap();
        erode_walkable_area(&mut chf, config.walkable_radius).unwrap();
        build_distance_field(&mut chf).unwrap();
        chf
    }

    fn config(options: BuildOptions) -> ResolvedBuildConfig {
        options.with_tile_size_voxels(32).resolve().unwrap()
    }

    #[test]
    fn test_flat_tile_builds_polygons() {
        let config = config(BuildOptions::default());
        let mut chf = floor_chf(32 + 2 * config.border_size, &config);
        let mut ctx = RecastContext::new();
        let tile = build_tile_mesh(&mut chf, 1, 2, &config, &mut ctx).unwrap().unwrap();

        assert_eq!((tile.tile_x, tile.tile_y), (1, 2));
        assert!(tile.poly_mesh.npolys > 0);
        assert!(tile.poly_mesh.flags.iter().all(|&f| f != 0));
        assert_eq!(tile.detail_quality, DetailQuality::Full);
        let detail = tile.detail.unwrap();
        assert_eq!(detail.mesh_count(), tile.poly_mesh.npolys);
        assert!(ctx.get_timer_count(&TimerCategory::Regions) == 1);
        assert!(ctx.get_timer_count(&TimerCategory::DetailMesh) == 1);
    }

    #[test]
    fn test_skip_detail() {
        let config = config(BuildOptions::default().with_skip_detail_mesh(true));
        let mut chf = floor_chf(32 + 2 * config.border_size, &config);
        let tile = build_tile_mesh(&mut chf, 0, 0, &config, &mut RecastContext::new())
            .unwrap()
            .unwrap();
        assert!(tile.detail.is_none());
        assert_eq!(tile.detail_quality, DetailQuality::Skipped);
    }

    #[test]
    fn test_fast_preset_skips_detail_on_small_tiles() {
        let config = config(BuildOptions::new(QualityPreset::Fast));
        let mut chf = floor_chf(32 + 2 * config.border_size, &config);
        let tile = build_tile_mesh(&mut chf, 0, 0, &config, &mut RecastContext::new())
            .unwrap()
            .unwrap();
        assert!(tile.poly_mesh.npolys < FAST_DETAIL_MIN_POLYS);
        assert_eq!(tile.detail_quality, DetailQuality::Skipped);
    }

    #[test]
    fn test_empty_tile_has_no_mesh() {
        let config = config(BuildOptions::default());
        let mut chf = floor_chf(32 + 2 * config.border_size, &config);
        for area in &mut chf.areas {
            *area = recast::RC_NULL_AREA;
        }
        build_distance_field(&mut chf).unwrap();
        let tile = build_tile_mesh(&mut chf, 0, 0, &config, &mut RecastContext::new()).unwrap();
        assert!(tile.is_none());
    }

    fn one_poly_mesh() -> PolyMesh {
        PolyMesh {
            verts: vec![0, 0, 0, 0, 0, 4, 4, 0, 4],
            polys: vec![0, 1, 2, 0xffff, 0xffff, 0xffff],
            regs: vec![1],
            areas: vec![RC_WALKABLE_AREA],
            flags: vec![1],
            nverts: 3,
            npolys: 1,
            nvp: 3,
            bmin: Vec3::ZERO,
            bmax: Vec3::ONE,
            cs: 0.3,
            ch: 0.2,
            border_size: 0,
            max_edge_error: 1.3,
        }
    }

    #[test]
    fn test_detail_machine_retries_without_sampling() {
        let mesh = one_poly_mesh();
        let mut tried = Vec::new();
        let (_, quality) = build_detail_with_fallback(&mesh, 1.8, |dist| {
            tried.push(dist);
            if dist > 0.0 {
                Err(Error::NavMeshGeneration("too many vertices".to_string()))
            } else {
                Ok(PolyMeshDetail::default())
            }
        });
        assert_eq!(quality, DetailQuality::ZeroSampleDistance);
        assert_eq!(tried, vec![1.8, 0.0]);
    }

    #[test]
    fn test_detail_machine_ends_in_minimal_fallback() {
        let mesh = one_poly_mesh();
        let (detail, quality) = build_detail_with_fallback(&mesh, 1.8, |_| {
            Err(Error::NavMeshGeneration("broken".to_string()))
        });
        assert_eq!(quality, DetailQuality::Minimal);
        assert_eq!(detail.meshes, vec![[0, 0, 0, 0]]);
        assert!(detail.verts.is_empty() && detail.tris.is_empty());
    }

    #[test]
    fn test_detail_step_transitions() {
        let mesh = one_poly_mesh();
        let mut fail = |_: f32| -> Result<PolyMeshDetail> { Err(Error::NavMeshGeneration("x".to_string())) };
        assert!(matches!(
            detail_step(DetailState::INITIAL, &mesh, 1.0, &mut fail),
            DetailStep::Next(DetailState::Attempting(DetailAttempt::ZeroSampleDistance))
        ));
        assert!(matches!(
            detail_step(
                DetailState::Attempting(DetailAttempt::ZeroSampleDistance),
                &mesh,
                1.0,
                &mut fail
            ),
            DetailStep::Next(DetailState::MinimalFallback)
        ));
        assert!(matches!(
            detail_step(DetailState::MinimalFallback, &mesh, 1.0, &mut fail),
            DetailStep::Built(_, DetailQuality::Minimal)
        ));
    }
}
