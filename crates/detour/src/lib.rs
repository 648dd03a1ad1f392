//! Detour component: a tiled navigation mesh container
//!
//! Tiles produced from Recast polygon meshes are stored in a fixed pool of
//! slots. Every tile slot carries a salt that is bumped when the slot is
//! freed, so a [`PolyRef`] handed out for an old tile is detected as stale
//! once that tile is replaced.
//!
//! Inserting a tile links its polygons to each other and to the polygons of
//! the four neighbouring tiles whose border portals line up.

use bitflags::bitflags;

mod nav_mesh;
mod nav_mesh_builder;

pub use nav_mesh::{
    decode_poly_ref, encode_poly_ref_with_salt, Link, MeshTile, NavMesh, Poly, PolyDetail,
    TileHeader,
};
pub use nav_mesh_builder::{NavMeshBuilder, NavMeshCreateParams};

/// Maximum vertices per navigation polygon
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Neighbour flag for polygon edges that connect to another tile
pub const DT_EXT_LINK: u16 = 0x8000;

/// Link side marker for links inside a single tile
pub const DT_INTERNAL_SIDE: u8 = 0xff;

/// Reference to a polygon: salt, tile slot and polygon index packed in 32 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyRef(u32);

impl PolyRef {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for PolyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

bitflags! {
    /// Polygon flags used by traversal filters
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
    pub struct PolyFlags: u16 {
        /// Ability to walk (ground, grass, road)
        const WALK = 0x01;
        /// Ability to swim (water)
        const SWIM = 0x02;
        /// Ability to move through doors
        const DOOR = 0x04;
        /// Ability to jump
        const JUMP = 0x08;
        /// Disabled polygon
        const DISABLED = 0x10;
    }
}

/// Parameters shared by every tile of a navigation mesh
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct NavMeshParams {
    /// World-space origin of tile (0, 0)
    pub origin: [f32; 3],
    /// Width of a tile along X
    pub tile_width: f32,
    /// Depth of a tile along Z
    pub tile_height: f32,
    pub max_tiles: i32,
    pub max_polys_per_tile: i32,
}

impl Default for NavMeshParams {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            tile_width: 1.0,
            tile_height: 1.0,
            max_tiles: 1,
            max_polys_per_tile: 1,
        }
    }
}
