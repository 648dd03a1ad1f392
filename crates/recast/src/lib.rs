//! Recast component for navigation mesh generation
//!
//! Recast voxelizes triangle soup into a heightfield, keeps the walkable
//! surfaces, partitions them into regions and traces those regions into
//! simplified polygon meshes suitable for a tiled navigation mesh.
//!
//! The stages are exposed individually so callers can cache intermediate
//! results (for example a compact heightfield per tile) and re-run only the
//! later stages when something changes.

mod area;
mod compact_heightfield;
mod config;
mod context;
mod contour;
mod detail_mesh;
mod distance_field;
mod heightfield;
mod polymesh;
mod rasterization;
mod region;

pub use area::{erode_walkable_area, mark_cylinder_area};
pub use compact_heightfield::{
    CompactCell, CompactHeightfield, CompactSpan, get_dir_offset_x, get_dir_offset_y,
    RC_NOT_CONNECTED,
};
pub use config::{PartitionType, RecastConfig};
pub use context::{
    LogSink, MemorySink, MetricsSink, NullSink, RecastContext, SpanEvent, TimerCategory,
    TimerEntry,
};
pub use contour::{Contour, ContourSet};
pub use detail_mesh::{PolyMeshDetail, DETAIL_MAX_VERTS};
pub use distance_field::build_distance_field;
pub use heightfield::{Heightfield, Span};
pub use polymesh::{PolyMesh, MESH_NULL_IDX, PORTAL_FLAG};
pub use rasterization::{clear_unwalkable_triangles, mark_walkable_triangles, rasterize_triangle, rasterize_triangles};
pub use region::{build_regions, build_regions_monotone};

/// Area id for spans that can not be walked on
pub const RC_NULL_AREA: u8 = 0;
/// Default area id for walkable spans
pub const RC_WALKABLE_AREA: u8 = 63;
/// Region id flag for the border regions painted around a tile
pub const RC_BORDER_REG: u16 = 0x8000;
/// Maximum height of a heightfield span
pub const RC_SPAN_MAX_HEIGHT: u32 = (1 << 13) - 1;
/// Contour vertex flag for vertices touching a border region corner
pub const RC_BORDER_VERTEX: i32 = 0x10000;
/// Contour vertex flag for edges between two area types
pub const RC_AREA_BORDER: i32 = 0x20000;
/// Mask for the region part of a contour vertex flag
pub const RC_CONTOUR_REG_MASK: i32 = 0xffff;
