//! Configuration for the Recast navigation mesh generation process

use glam::Vec3;
use recast_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Region partitioning algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PartitionType {
    /// Distance field flooding, produces the nicest regions
    #[default]
    Watershed,
    /// Row sweep, fastest and never creates holes inside regions
    Monotone,
}

/// Configuration parameters for Recast navigation mesh generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecastConfig {
    /// The width of the field along the x-axis, including the border
    pub width: i32,
    /// The height of the field along the z-axis, including the border
    pub height: i32,
    /// The width and depth of a tile, excluding the border
    pub tile_size: i32,

    /// The width/depth resolution of the field (cell size)
    pub cs: f32,
    /// The height resolution of the field (cell height)
    pub ch: f32,

    /// The minimum bounds of the field's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the field's AABB
    pub bmax: Vec3,

    /// The maximum slope in degrees that is considered walkable
    pub walkable_slope_angle: f32,
    /// Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable
    pub walkable_height: i32,
    /// The maximum height between walkable layers
    pub walkable_climb: i32,
    /// The distance to erode/shrink the walkable area from obstacles
    pub walkable_radius: i32,

    /// The maximum allowed length for contour edges along the border of the mesh
    pub max_edge_len: i32,
    /// The maximum distance a simplified contour's border edges should deviate from the original raw contour
    pub max_simplification_error: f32,
    /// The minimum number of cells allowed to form isolated island areas
    pub min_region_area: i32,
    /// Any regions with an area smaller than this value will be merged with larger regions if possible
    pub merge_region_area: i32,

    /// The maximum number of vertices allowed for polygons generated during the contour to polygon conversion process
    pub max_vertices_per_polygon: i32,

    /// Sets the sampling distance to use when generating the detail mesh
    pub detail_sample_dist: f32,
    /// The maximum distance the detail mesh surface should deviate from the heightfield data
    pub detail_sample_max_error: f32,

    /// The size of the non-navigable border around the heightfield
    pub border_size: i32,
    /// How regions are partitioned
    pub partition: PartitionType,
}

impl Default for RecastConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            tile_size: 0,
            cs: 0.3,
            ch: 0.2,
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            walkable_slope_angle: 45.0,
            walkable_height: 10,
            walkable_climb: 2,
            walkable_radius: 2,
            max_edge_len: 40,
            max_simplification_error: 1.3,
            min_region_area: 8,
            merge_region_area: 20,
            max_vertices_per_polygon: 6,
            detail_sample_dist: 1.8,
            detail_sample_max_error: 0.2,
            border_size: 0,
            partition: PartitionType::Watershed,
        }
    }
}

impl RecastConfig {
    /// Creates a new RecastConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bounds and derives the grid size from them
    pub fn calculate_grid_size(&mut self, bmin: Vec3, bmax: Vec3) {
        self.bmin = bmin;
        self.bmax = bmax;
        self.width = ((bmax.x - bmin.x) / self.cs + 0.5) as i32;
        self.height = ((bmax.z - bmin.z) / self.cs + 0.5) as i32;
    }

    /// Sets up the field for one tile of `tile_size` cells whose
    /// (unexpanded) bounds start at `tile_min`.
    ///
    /// The field is widened by `border_size` cells on every side so that
    /// neighbouring geometry influences the filters and erosion, then the
    /// border is cut away again when contours are traced.
    pub fn configure_tile(&mut self, tile_min: Vec3, tile_max: Vec3) {
        let border = self.border_size as f32 * self.cs;
        self.width = self.tile_size + self.border_size * 2;
        self.height = self.tile_size + self.border_size * 2;
        self.bmin = Vec3::new(tile_min.x - border, tile_min.y, tile_min.z - border);
        self.bmax = Vec3::new(tile_max.x + border, tile_max.y, tile_max.z + border);
    }

    /// Validates the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(Error::Recast("Invalid grid size".to_string()));
        }

        if self.cs <= 0.0 || self.ch <= 0.0 {
            return Err(Error::Recast("Invalid cell size or height".to_string()));
        }

        if self.walkable_slope_angle < 0.0 || self.walkable_slope_angle > 90.0 {
            return Err(Error::Recast("Invalid walkable slope angle".to_string()));
        }

        if self.walkable_height < 3 {
            return Err(Error::Recast("Walkable height must be at least 3 cells".to_string()));
        }

        if !(3..=6).contains(&self.max_vertices_per_polygon) {
            return Err(Error::Recast(format!(
                "Vertices per polygon must be within 3..=6, got {}",
                self.max_vertices_per_polygon
            )));
        }

        if self.border_size < 0 || self.walkable_radius < 0 || self.walkable_climb < 0 {
            return Err(Error::Recast("Negative voxel distances are not allowed".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid_once_sized() {
        let mut config = RecastConfig::default();
        assert!(config.validate().is_err());

        config.calculate_grid_size(Vec3::ZERO, Vec3::new(9.0, 2.0, 6.0));
        assert_eq!(config.width, 30);
        assert_eq!(config.height, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configure_tile_adds_border() {
        let mut config = RecastConfig {
            tile_size: 32,
            border_size: 3,
            ..Default::default()
        };
        config.configure_tile(Vec3::new(0.0, -1.0, 0.0), Vec3::new(9.6, 1.0, 9.6));

        assert_eq!(config.width, 38);
        assert_eq!(config.height, 38);
        assert!((config.bmin.x + 0.9).abs() < 1e-5);
        assert!((config.bmax.z - 10.5).abs() < 1e-5);
        assert_eq!(config.bmin.y, -1.0);
    }

    #[test]
    fn test_rejects_bad_polygon_size() {
        let mut config = RecastConfig {
            max_vertices_per_polygon: 8,
            ..Default::default()
        };
        config.calculate_grid_size(Vec3::ZERO, Vec3::ONE);
        assert!(config.validate().is_err());
    }
}
