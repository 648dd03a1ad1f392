//! Conversion of Recast polygon meshes into navigation mesh tiles

use log::debug;
use recast::{MESH_NULL_IDX, PORTAL_FLAG, PolyMesh, PolyMeshDetail};
use recast_common::{Error, Result};

use super::{DT_EXT_LINK, MAX_VERTS_PER_POLY, MeshTile, Poly, PolyDetail, PolyFlags, TileHeader};

/// Input for building one navigation mesh tile
#[derive(Debug, Clone, Copy)]
pub struct NavMeshCreateParams<'a> {
    pub mesh: &'a PolyMesh,
    /// Detail meshes; `None` leaves the tile's detail arrays empty
    pub detail: Option<&'a PolyMeshDetail>,
    pub tile_x: i32,
    pub tile_y: i32,
    pub tile_layer: i32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
}

/// Builder for creating navigation mesh tiles from polygon mesh data
pub struct NavMeshBuilder;

impl NavMeshBuilder {
    /// Creates a tile ready to be added to a [`crate::NavMesh`]
    ///
    /// Fails on malformed polygon data or when the detail meshes do not fit
    /// the tile format (mismatched counts or more than 255 entries per
    /// polygon).
    pub fn build_tile(params: &NavMeshCreateParams<'_>) -> Result<MeshTile> {
        let mesh = params.mesh;
        Self::validate_mesh(mesh)?;

        let mut header = TileHeader::new(params.tile_x, params.tile_y, params.tile_layer);
        header.bmin = mesh.bmin.to_array();
        header.bmax = mesh.bmax.to_array();
        header.walkable_height = params.walkable_height;
        header.walkable_radius = params.walkable_radius;
        header.walkable_climb = params.walkable_climb;

        let mut tile = MeshTile {
            header: Some(header),
            verts: Vec::with_capacity(mesh.nverts * 3),
            polys: Self::build_polygons(mesh),
            ..MeshTile::default()
        };
        for i in 0..mesh.nverts {
            tile.verts.extend_from_slice(&mesh.world_vert(i).to_array());
        }

        if let Some(detail) = params.detail {
            Self::copy_detail(mesh, detail, &mut tile)?;
        }

        debug!(
            "built tile ({}, {}) with {} polys, {} verts, {} detail tris",
            params.tile_x,
            params.tile_y,
            tile.polys.len(),
            mesh.nverts,
            tile.detail_tris.len() / 4
        );
        Ok(tile)
    }

    fn validate_mesh(mesh: &PolyMesh) -> Result<()> {
        if mesh.nvp < 3 || mesh.nvp > MAX_VERTS_PER_POLY {
            return Err(Error::Detour(format!("unsupported vertices per polygon: {}", mesh.nvp)));
        }
        if mesh.verts.len() != mesh.nverts * 3 {
            return Err(Error::Detour("vertex array does not match vertex count".to_string()));
        }
        if mesh.polys.len() != mesh.npolys * mesh.nvp * 2
            || mesh.areas.len() != mesh.npolys
            || mesh.flags.len() != mesh.npolys
        {
            return Err(Error::Detour("polygon arrays do not match polygon count".to_string()));
        }
        if mesh.polys[..]
            .chunks(mesh.nvp * 2)
            .flat_map(|p| p[..mesh.nvp].iter())
            .any(|&v| v != MESH_NULL_IDX && v as usize >= mesh.nverts)
        {
            return Err(Error::Detour("polygon vertex index out of range".to_string()));
        }
        Ok(())
    }

    fn build_polygons(mesh: &PolyMesh) -> Vec<Poly> {
        let nvp = mesh.nvp;
        (0..mesh.npolys)
            .map(|i| {
                let src = mesh.poly(i);
                let mut poly = Poly::new(mesh.areas[i], PolyFlags::from_bits_truncate(mesh.flags[i]));
                for j in 0..nvp {
                    if src[j] == MESH_NULL_IDX {
                        break;
                    }
                    poly.verts[j] = src[j];
                    let nei = src[nvp + j];
                    poly.neighbors[j] = if nei == MESH_NULL_IDX {
                        0
                    } else if nei & PORTAL_FLAG != 0 {
                        DT_EXT_LINK | (nei & 0xf)
                    } else {
                        nei + 1
                    };
                    poly.vert_count += 1;
                }
                poly
            })
            .collect()
    }

    /// Copies the detail meshes, dropping the leading polygon vertices of
    /// each sub-mesh since the tile already stores them
    fn copy_detail(mesh: &PolyMesh, detail: &PolyMeshDetail, tile: &mut MeshTile) -> Result<()> {
        if detail.meshes.len() != mesh.npolys {
            return Err(Error::Detour(format!(
                "detail mesh count {} does not match polygon count {}",
                detail.meshes.len(),
                mesh.npolys
            )));
        }

        let nverts = detail.verts.len() / 3;
        let ntris = detail.tris.len() / 4;
        let mut meshes = Vec::with_capacity(mesh.npolys);
        let mut verts = Vec::new();
        let mut tris = Vec::new();

        for (i, &[vert_base, vert_count, tri_base, tri_count]) in detail.meshes.iter().enumerate() {
            // Placeholder entry: the polygon itself is its own detail surface
            if vert_count == 0 && tri_count == 0 {
                meshes.push(PolyDetail {
                    vert_base: (verts.len() / 3) as u32,
                    tri_base: (tris.len() / 4) as u32,
                    vert_count: 0,
                    tri_count: 0,
                });
                continue;
            }

            let nv = tile.polys[i].vert_count as u32;
            if vert_count < nv {
                return Err(Error::Detour(format!(
                    "detail mesh {i} has fewer vertices than its polygon"
                )));
            }
            let extra = vert_count - nv;
            if extra > u8::MAX as u32 || tri_count > u8::MAX as u32 {
                return Err(Error::Detour(format!("detail mesh {i} exceeds tile limits")));
            }
            if (vert_base + vert_count) as usize > nverts || (tri_base + tri_count) as usize > ntris {
                return Err(Error::Detour(format!("detail mesh {i} is out of range")));
            }

            meshes.push(PolyDetail {
                vert_base: (verts.len() / 3) as u32,
                tri_base: (tris.len() / 4) as u32,
                vert_count: extra as u8,
                tri_count: tri_count as u8,
            });

            let vs = ((vert_base + nv) * 3) as usize;
            let ve = ((vert_base + vert_count) * 3) as usize;
            verts.extend_from_slice(&detail.verts[vs..ve]);

            let ts = (tri_base * 4) as usize;
            let te = ((tri_base + tri_count) * 4) as usize;
            for tri in detail.tris[ts..te].chunks(4) {
                if tri[..3].iter().any(|&v| v as u32 >= vert_count) {
                    return Err(Error::Detour(format!("detail triangle of mesh {i} is out of range")));
                }
            }
            tris.extend_from_slice(&detail.tris[ts..te]);
        }

        tile.detail_meshes = meshes;
        tile.detail_verts = verts;
        tile.detail_tris = tris;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn quad_mesh(portals: bool) -> PolyMesh {
        let neighbours: [u16; 6] = if portals {
            [PORTAL_FLAG, PORTAL_FLAG | 1, MESH_NULL_IDX, MESH_NULL_IDX, MESH_NULL_IDX, MESH_NULL_IDX]
        } else {
            [MESH_NULL_IDX; 6]
        };
        let mut polys = vec![0, 1, 2, 3, MESH_NULL_IDX, MESH_NULL_IDX];
        polys.extend_from_slice(&neighbours);

        PolyMesh {
            verts: vec![0, 2, 0, 0, 2, 10, 10, 2, 10, 10, 2, 0],
            polys,
            regs: vec![1],
            areas: vec![63],
            flags: vec![PolyFlags::WALK.bits()],
            nverts: 4,
            npolys: 1,
            nvp: 6,
            bmin: Vec3::new(100.0, 1.0, 50.0),
            bmax: Vec3::new(103.0, 5.0, 53.0),
            cs: 0.3,
            ch: 0.2,
            border_size: 0,
            max_edge_error: 1.3,
        }
    }

    fn params<'a>(mesh: &'a PolyMesh, detail: Option<&'a PolyMeshDetail>) -> NavMeshCreateParams<'a> {
        NavMeshCreateParams {
            mesh,
            detail,
            tile_x: 2,
            tile_y: 3,
            tile_layer: 0,
            walkable_height: 2.0,
            walkable_radius: 0.4,
            walkable_climb: 0.4,
        }
    }

    #[test]
    fn test_vertices_are_converted_to_world_space() {
        let mesh = quad_mesh(false);
        let tile = NavMeshBuilder::build_tile(&params(&mesh, None)).unwrap();
        let v = tile.vert(2);
        assert!((v[0] - 103.0).abs() < 1e-4);
        assert!((v[1] - 1.4).abs() < 1e-4);
        assert!((v[2] - 53.0).abs() < 1e-4);

        let header = tile.header.as_ref().unwrap();
        assert_eq!((header.x, header.y), (2, 3));
        assert!(tile.detail_meshes.is_empty());
        assert!(tile.detail_tris.is_empty());
    }

    #[test]
    fn test_portal_edges_become_external_markers() {
        let mesh = quad_mesh(true);
        let tile = NavMeshBuilder::build_tile(&params(&mesh, None)).unwrap();
        let poly = &tile.polys[0];
        assert_eq!(poly.vert_count, 4);
        assert_eq!(poly.neighbors[..4], [DT_EXT_LINK, DT_EXT_LINK | 1, 0, 0]);
        assert_eq!(poly.flags, PolyFlags::WALK);
    }

    #[test]
    fn test_detail_polygon_vertices_are_skipped() {
        let mesh = quad_mesh(false);
        let mut verts = Vec::new();
        for i in 0..4 {
            verts.extend_from_slice(&mesh.world_vert(i).to_array());
        }
        verts.extend_from_slice(&[101.5, 1.6, 51.5]);
        let detail = PolyMeshDetail {
            meshes: vec![[0, 5, 0, 4]],
            verts,
            tris: vec![0, 1, 4, 0, 1, 2, 4, 0, 2, 3, 4, 0, 3, 0, 4, 0],
        };

        let tile = NavMeshBuilder::build_tile(&params(&mesh, Some(&detail))).unwrap();
        assert_eq!(tile.detail_meshes[0].vert_count, 1);
        assert_eq!(tile.detail_meshes[0].tri_count, 4);
        assert_eq!(tile.detail_verts, vec![101.5, 1.6, 51.5]);
        assert_eq!(tile.detail_tris.len(), 16);
    }

    #[test]
    fn test_mismatched_detail_is_rejected() {
        let mesh = quad_mesh(false);
        let detail = PolyMeshDetail {
            meshes: vec![[0, 4, 0, 2], [4, 4, 2, 2]],
            verts: vec![0.0; 24],
            tris: vec![0; 16],
        };
        assert!(NavMeshBuilder::build_tile(&params(&mesh, Some(&detail))).is_err());

        let out_of_range = PolyMeshDetail {
            meshes: vec![[0, 4, 0, 2]],
            verts: vec![0.0; 12],
            tris: vec![0, 1, 9, 0, 0, 2, 3, 0],
        };
        assert!(NavMeshBuilder::build_tile(&params(&mesh, Some(&out_of_range))).is_err());
    }

    #[test]
    fn test_placeholder_detail_entries_are_accepted() {
        let mesh = quad_mesh(false);
        let detail = PolyMeshDetail {
            meshes: vec![[0, 0, 0, 0]],
            verts: Vec::new(),
            tris: Vec::new(),
        };
        let tile = NavMeshBuilder::build_tile(&params(&mesh, Some(&detail))).unwrap();
        assert_eq!(tile.detail_meshes, vec![PolyDetail::default()]);
        assert!(tile.detail_verts.is_empty());
    }

    #[test]
    fn test_invalid_mesh_is_rejected() {
        let mut mesh = quad_mesh(false);
        mesh.flags.clear();
        assert!(NavMeshBuilder::build_tile(&params(&mesh, None)).is_err());
    }
}
