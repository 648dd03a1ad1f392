//! Writing rebuilt tiles into the navigation mesh

use detour::{MeshTile, NavMesh, NavMeshBuilder, NavMeshCreateParams, NavMeshParams, PolyRef};
use log::{debug, warn};
use recast_common::{Aabb, Error, Result};

use crate::config::ResolvedBuildConfig;
use crate::tile_builder::TileMesh;

/// Polygon index bits available per tile
const MAX_POLYS_PER_TILE: i32 = 0xffff;
/// Tile slots addressable by a polygon reference (10 tile bits)
pub const MAX_TILE_SLOTS: i32 = 1023;

/// Rejects grids with more tiles than a navigation mesh can address
pub(crate) fn check_tile_grid(tiles_x: i32, tiles_z: i32) -> Result<()> {
    let tile_count = tiles_x.max(1).saturating_mul(tiles_z.max(1));
    if tile_count > MAX_TILE_SLOTS {
        return Err(Error::Detour(format!(
            "{tiles_x}x{tiles_z} tiles exceed the {MAX_TILE_SLOTS} tile limit, increase tileSizeVoxels or cellSize"
        )));
    }
    Ok(())
}

/// Creates an empty navigation mesh covering the tile grid
pub fn create_nav_mesh(bounds: &Aabb, tiles_x: i32, tiles_z: i32, config: &ResolvedBuildConfig) -> Result<NavMesh> {
    check_tile_grid(tiles_x, tiles_z)?;
    NavMesh::new(NavMeshParams {
        origin: bounds.min.to_array(),
        tile_width: config.tile_width(),
        tile_height: config.tile_width(),
        max_tiles: tiles_x.max(1) * tiles_z.max(1),
        max_polys_per_tile: MAX_POLYS_PER_TILE,
    })
}

/// Converts a tile mesh into a navigation mesh tile.
///
/// When the detail meshes do not fit the tile format the tile keeps empty
/// detail arrays.
pub fn convert_tile(mesh: &TileMesh, config: &ResolvedBuildConfig) -> Result<MeshTile> {
    let mut params = NavMeshCreateParams {
        mesh: &mesh.poly_mesh,
        detail: mesh.detail.as_ref(),
        tile_x: mesh.tile_x,
        tile_y: mesh.tile_y,
        tile_layer: 0,
        walkable_height: config.walkable_height_world(),
        walkable_radius: config.walkable_radius_world(),
        walkable_climb: config.walkable_climb_world(),
    };
    match NavMeshBuilder::build_tile(&params) {
        Ok(tile) => Ok(tile),
        Err(e) if params.detail.is_some() => {
            warn!(
                "tile ({}, {}): detail conversion failed, using empty detail: {e}",
                mesh.tile_x, mesh.tile_y
            );
            params.detail = None;
            NavMeshBuilder::build_tile(&params)
        }
        Err(e) => Err(e),
    }
}

/// Replaces the tile at `(tile_x, tile_y, 0)` with `mesh`, or just removes
/// it when `mesh` is `None`. Returns the reference of the inserted tile.
pub fn replace_tile(
    nav_mesh: &mut NavMesh,
    tile_x: i32,
    tile_y: i32,
    mesh: Option<&TileMesh>,
    config: &ResolvedBuildConfig,
) -> Result<Option<PolyRef>> {
    if let Some(old) = nav_mesh.get_tile_ref_at(tile_x, tile_y, 0) {
        nav_mesh.remove_tile(old)?;
        debug!("removed tile ({tile_x}, {tile_y})");
    }
    let Some(mesh) = mesh else {
        return Ok(None);
    };
    let tile = convert_tile(mesh, config)?;
    nav_mesh.add_tile(tile).map(Some)
}
