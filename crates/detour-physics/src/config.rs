//! Build and extraction options
//!
//! [`BuildOptions`] is what callers hand in: a quality preset plus optional
//! overrides in world units. [`BuildOptions::resolve`] turns it into a
//! [`ResolvedBuildConfig`] in voxel units, which is what the pipeline and the
//! cache signatures work with.

use recast::{PartitionType, RecastConfig};
use recast_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::signature::{Fingerprint, Signature, SignatureBuilder};

/// Named bundles of voxel and simplification settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QualityPreset {
    #[default]
    Default,
    /// Finer voxels and tighter simplification
    Crisp,
    /// Like `Crisp` without eroding by the agent radius
    CrispStrict,
    /// Coarse voxels, monotone regions and no detail sampling
    Fast,
}

struct PresetValues {
    cell_size: f32,
    cell_height: f32,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
    max_simplification_error: f32,
    max_edge_length: f32,
    detail_sample_distance: f32,
    detail_sample_max_error: f32,
    tile_size_voxels: i32,
    erode: bool,
    partition: PartitionType,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 4] = [
        QualityPreset::Default,
        QualityPreset::Crisp,
        QualityPreset::CrispStrict,
        QualityPreset::Fast,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            QualityPreset::Default => "default",
            QualityPreset::Crisp => "crisp",
            QualityPreset::CrispStrict => "crispStrict",
            QualityPreset::Fast => "fast",
        }
    }

    /// Parses the camelCase name used on the command line and in JSON
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name().eq_ignore_ascii_case(name))
    }

    fn values(&self) -> PresetValues {
        match self {
            QualityPreset::Default => PresetValues {
                cell_size: 0.3,
                cell_height: 0.2,
                border_size: 3,
                min_region_area: 8,
                merge_region_area: 20,
                max_simplification_error: 1.3,
                max_edge_length: 12.0,
                detail_sample_distance: 6.0,
                detail_sample_max_error: 1.0,
                tile_size_voxels: 64,
                erode: true,
                partition: PartitionType::Watershed,
            },
            QualityPreset::Crisp | QualityPreset::CrispStrict => PresetValues {
                cell_size: 0.15,
                cell_height: 0.1,
                border_size: 4,
                min_region_area: 4,
                merge_region_area: 12,
                max_simplification_error: 0.9,
                max_edge_length: 12.0,
                detail_sample_distance: 4.0,
                detail_sample_max_error: 0.5,
                tile_size_voxels: 96,
                erode: *self == QualityPreset::Crisp,
                partition: PartitionType::Watershed,
            },
            QualityPreset::Fast => PresetValues {
                cell_size: 0.5,
                cell_height: 0.3,
                border_size: 2,
                min_region_area: 12,
                merge_region_area: 40,
                max_simplification_error: 2.0,
                max_edge_length: 16.0,
                detail_sample_distance: 0.0,
                detail_sample_max_error: 2.0,
                tile_size_voxels: 48,
                erode: true,
                partition: PartitionType::Monotone,
            },
        }
    }
}

impl std::fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub const DEFAULT_WALKABLE_RADIUS: f32 = 0.4;
pub const DEFAULT_WALKABLE_HEIGHT: f32 = 2.0;
pub const DEFAULT_WALKABLE_CLIMB: f32 = 0.4;
pub const DEFAULT_WALKABLE_SLOPE: f32 = 45.0;
pub const DEFAULT_VERTS_PER_POLY: usize = 6;

/// Caller-facing build options.
///
/// Distances are world units unless the field name ends in `_voxels`.
/// Region areas are given as the side of a square in cells, and detail
/// settings as multiples of the cell size (distance) and cell height
/// (error). Every unset field falls back to the preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildOptions {
    pub preset: QualityPreset,
    pub cell_size: Option<f32>,
    pub cell_height: Option<f32>,
    pub walkable_radius: Option<f32>,
    pub walkable_radius_voxels: Option<i32>,
    pub walkable_height: Option<f32>,
    pub walkable_height_voxels: Option<i32>,
    pub walkable_climb: Option<f32>,
    pub walkable_climb_voxels: Option<i32>,
    pub walkable_slope_angle_degrees: Option<f32>,
    pub border_size: Option<i32>,
    pub min_region_area: Option<i32>,
    pub merge_region_area: Option<i32>,
    pub max_simplification_error: Option<f32>,
    pub max_edge_length: Option<f32>,
    pub max_vertices_per_poly: Option<usize>,
    pub detail_sample_distance: Option<f32>,
    pub detail_sample_max_error: Option<f32>,
    pub skip_detail_mesh: Option<bool>,
    /// Tile edge in cells. A navigation mesh addresses at most
    /// [`MAX_TILE_SLOTS`](crate::MAX_TILE_SLOTS) tiles, so large worlds need
    /// larger tiles or cells; a 700 m world at the default 19.2 m tiles
    /// (37x37) is rejected.
    pub tile_size_voxels: Option<i32>,
    pub obstacle_margin: Option<f32>,
}

impl BuildOptions {
    pub fn new(preset: QualityPreset) -> Self {
        Self {
            preset,
            ..Default::default()
        }
    }

    pub fn with_cell_size(mut self, cell_size: f32) -> Self {
        self.cell_size = Some(cell_size);
        self
    }

    pub fn with_cell_height(mut self, cell_height: f32) -> Self {
        self.cell_height = Some(cell_height);
        self
    }

    pub fn with_walkable_radius(mut self, walkable_radius: f32) -> Self {
        self.walkable_radius = Some(walkable_radius);
        self
    }

    pub fn with_walkable_height(mut self, walkable_height: f32) -> Self {
        self.walkable_height = Some(walkable_height);
        self
    }

    pub fn with_walkable_climb(mut self, walkable_climb: f32) -> Self {
        self.walkable_climb = Some(walkable_climb);
        self
    }

    pub fn with_walkable_slope_angle(mut self, degrees: f32) -> Self {
        self.walkable_slope_angle_degrees = Some(degrees);
        self
    }

    pub fn with_border_size(mut self, border_size: i32) -> Self {
        self.border_size = Some(border_size);
        self
    }

    pub fn with_region_areas(mut self, min_region_area: i32, merge_region_area: i32) -> Self {
        self.min_region_area = Some(min_region_area);
        self.merge_region_area = Some(merge_region_area);
        self
    }

    pub fn with_max_vertices_per_poly(mut self, nvp: usize) -> Self {
        self.max_vertices_per_poly = Some(nvp);
        self
    }

    pub fn with_skip_detail_mesh(mut self, skip: bool) -> Self {
        self.skip_detail_mesh = Some(skip);
        self
    }

    pub fn with_tile_size_voxels(mut self, tile_size: i32) -> Self {
        self.tile_size_voxels = Some(tile_size);
        self
    }

    pub fn with_obstacle_margin(mut self, margin: f32) -> Self {
        self.obstacle_margin = Some(margin);
        self
    }

    /// Applies the preset, converts to voxel units and validates the result
    pub fn resolve(&self) -> Result<ResolvedBuildConfig> {
        let p = self.preset.values();
        let cell_size = self.cell_size.unwrap_or(p.cell_size);
        let cell_height = self.cell_height.unwrap_or(p.cell_height);
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(Error::InvalidConfig(format!("cell size must be positive, got {cell_size}")));
        }
        if !(cell_height.is_finite() && cell_height > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "cell height must be positive, got {cell_height}"
            )));
        }

        let radius = non_negative("walkable radius", self.walkable_radius, DEFAULT_WALKABLE_RADIUS)?;
        let height = non_negative("walkable height", self.walkable_height, DEFAULT_WALKABLE_HEIGHT)?;
        let climb = non_negative("walkable climb", self.walkable_climb, DEFAULT_WALKABLE_CLIMB)?;

        let detail_distance = non_negative(
            "detail sample distance",
            self.detail_sample_distance,
            p.detail_sample_distance,
        )?;
        let detail_error = non_negative(
            "detail sample max error",
            self.detail_sample_max_error,
            p.detail_sample_max_error,
        )?;
        let min_region = self.min_region_area.unwrap_or(p.min_region_area);
        let merge_region = self.merge_region_area.unwrap_or(p.merge_region_area);

        let config = ResolvedBuildConfig {
            preset: self.preset,
            cell_size,
            cell_height,
            walkable_slope_angle: self.walkable_slope_angle_degrees.unwrap_or(DEFAULT_WALKABLE_SLOPE),
            walkable_radius: self
                .walkable_radius_voxels
                .unwrap_or_else(|| (radius / cell_size).ceil() as i32),
            walkable_height: self
                .walkable_height_voxels
                .unwrap_or_else(|| (height / cell_height).ceil() as i32),
            walkable_climb: self
                .walkable_climb_voxels
                .unwrap_or_else(|| (climb / cell_height).floor() as i32),
            border_size: self.border_size.unwrap_or(p.border_size),
            min_region_area: min_region.saturating_mul(min_region),
            merge_region_area: merge_region.saturating_mul(merge_region),
            max_simplification_error: self
                .max_simplification_error
                .unwrap_or(p.max_simplification_error),
            max_edge_len: (self.max_edge_length.unwrap_or(p.max_edge_length) / cell_size) as i32,
            max_vertices_per_poly: self.max_vertices_per_poly.unwrap_or(DEFAULT_VERTS_PER_POLY),
            detail_sample_dist: if detail_distance < 0.9 {
                0.0
            } else {
                cell_size * detail_distance
            },
            detail_sample_max_error: cell_height * detail_error,
            skip_detail_mesh: self.skip_detail_mesh.unwrap_or(false),
            tile_size_voxels: self.tile_size_voxels.unwrap_or(p.tile_size_voxels),
            obstacle_margin: self.obstacle_margin.unwrap_or(0.5 * cell_size),
            erode: p.erode,
            partition: p.partition,
        };
        config.validate()?;
        Ok(config)
    }
}

fn non_negative(name: &str, value: Option<f32>, default: f32) -> Result<f32> {
    let v = value.unwrap_or(default);
    if !v.is_finite() || v < 0.0 {
        return Err(Error::InvalidConfig(format!("{name} must be a non-negative number, got {v}")));
    }
    Ok(v)
}

/// Fully resolved settings in voxel units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedBuildConfig {
    pub preset: QualityPreset,
    pub cell_size: f32,
    pub cell_height: f32,
    pub walkable_slope_angle: f32,
    /// Agent radius, in cells
    pub walkable_radius: i32,
    /// Agent height, in cell heights
    pub walkable_height: i32,
    /// Step height, in cell heights
    pub walkable_climb: i32,
    pub border_size: i32,
    /// Minimum island size, in spans
    pub min_region_area: i32,
    /// Regions below this many spans are merged into neighbours
    pub merge_region_area: i32,
    pub max_simplification_error: f32,
    /// Longest contour edge, in cells
    pub max_edge_len: i32,
    pub max_vertices_per_poly: usize,
    /// World units; zero disables height sampling
    pub detail_sample_dist: f32,
    /// World units
    pub detail_sample_max_error: f32,
    pub skip_detail_mesh: bool,
    pub tile_size_voxels: i32,
    pub obstacle_margin: f32,
    pub erode: bool,
    pub partition: PartitionType,
}

impl ResolvedBuildConfig {
    pub fn validate(&self) -> Result<()> {
        if !(3..=detour::MAX_VERTS_PER_POLY).contains(&self.max_vertices_per_poly) {
            return Err(Error::InvalidConfig(format!(
                "max vertices per polygon must be within 3..={}, got {}",
                detour::MAX_VERTS_PER_POLY,
                self.max_vertices_per_poly
            )));
        }
        if self.tile_size_voxels <= 0 {
            return Err(Error::InvalidConfig(format!(
                "tile size must be positive, got {}",
                self.tile_size_voxels
            )));
        }
        if !(0.0..=90.0).contains(&self.walkable_slope_angle) {
            return Err(Error::InvalidConfig(format!(
                "walkable slope must be within 0..=90 degrees, got {}",
                self.walkable_slope_angle
            )));
        }
        if self.walkable_height < 3 {
            return Err(Error::InvalidConfig(format!(
                "walkable height must be at least 3 cell heights, got {}",
                self.walkable_height
            )));
        }
        if self.walkable_radius < 0 || self.walkable_climb < 0 || self.border_size < 0 {
            return Err(Error::InvalidConfig(
                "voxel distances must not be negative".to_string(),
            ));
        }
        if self.min_region_area < 0 || self.merge_region_area < 0 {
            return Err(Error::InvalidConfig("region areas must not be negative".to_string()));
        }
        if !(self.max_simplification_error.is_finite() && self.max_simplification_error >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "max simplification error must be non-negative, got {}",
                self.max_simplification_error
            )));
        }
        if !(self.obstacle_margin.is_finite() && self.obstacle_margin >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "obstacle margin must be non-negative, got {}",
                self.obstacle_margin
            )));
        }
        Ok(())
    }

    /// World size of one tile edge
    pub fn tile_width(&self) -> f32 {
        self.tile_size_voxels as f32 * self.cell_size
    }

    pub fn walkable_height_world(&self) -> f32 {
        self.walkable_height as f32 * self.cell_height
    }

    pub fn walkable_climb_world(&self) -> f32 {
        self.walkable_climb as f32 * self.cell_height
    }

    pub fn walkable_radius_world(&self) -> f32 {
        self.walkable_radius as f32 * self.cell_size
    }

    /// Recast settings shared by every tile; bounds are set per tile
    pub fn recast_config(&self) -> RecastConfig {
        RecastConfig {
            tile_size: self.tile_size_voxels,
            cs: self.cell_size,
            ch: self.cell_height,
            walkable_slope_angle: self.walkable_slope_angle,
            walkable_height: self.walkable_height,
            walkable_climb: self.walkable_climb,
            walkable_radius: self.walkable_radius,
            max_edge_len: self.max_edge_len,
            max_simplification_error: self.max_simplification_error,
            min_region_area: self.min_region_area,
            merge_region_area: self.merge_region_area,
            max_vertices_per_polygon: self.max_vertices_per_poly as i32,
            detail_sample_dist: self.detail_sample_dist,
            detail_sample_max_error: self.detail_sample_max_error,
            border_size: self.border_size,
            partition: self.partition,
            ..RecastConfig::default()
        }
    }

    /// Fingerprint of everything that shapes the static tiles and polygons
    pub fn signature(&self) -> Signature {
        SignatureBuilder::new("build-options").value(self).finish()
    }
}

impl Fingerprint for ResolvedBuildConfig {
    fn fingerprint(&self, sig: &mut SignatureBuilder) {
        sig.f32(self.cell_size)
            .f32(self.cell_height)
            .f32(self.walkable_slope_angle)
            .i32(self.walkable_radius)
            .i32(self.walkable_height)
            .i32(self.walkable_climb)
            .i32(self.border_size)
            .i32(self.min_region_area)
            .i32(self.merge_region_area)
            .f32(self.max_simplification_error)
            .i32(self.max_edge_len)
            .usize(self.max_vertices_per_poly)
            .f32(self.detail_sample_dist)
            .f32(self.detail_sample_max_error)
            .bool(self.skip_detail_mesh)
            .i32(self.tile_size_voxels)
            .f32(self.obstacle_margin)
            .bool(self.erode)
            .bool(self.partition == PartitionType::Monotone)
            .bool(self.preset == QualityPreset::Fast);
    }
}

/// Thresholds used when classifying colliders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractOptions {
    /// Fixed cuboids with a half height up to this are walkable slabs
    pub thin_surface_half_height: f32,
    /// Largest tilt of a slab's up axis, in radians, still treated as flat.
    /// Also the tolerance for treating cylinders and capsules as upright.
    pub max_walkable_tilt: f32,
    /// Slab top faces are split into quads no longer than this
    pub max_surface_segment: f32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            thin_surface_half_height: 0.25,
            max_walkable_tilt: 5.0_f32.to_radians(),
            max_surface_segment: 8.0,
        }
    }
}

impl ExtractOptions {
    pub fn with_thin_surface_half_height(mut self, half_height: f32) -> Self {
        self.thin_surface_half_height = half_height;
        self
    }

    pub fn with_max_walkable_tilt(mut self, radians: f32) -> Self {
        self.max_walkable_tilt = radians;
        self
    }

    pub fn with_max_surface_segment(mut self, segment: f32) -> Self {
        self.max_surface_segment = segment;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.thin_surface_half_height.is_finite() && self.thin_surface_half_height >= 0.0) {
            return Err(Error::InvalidConfig(
                "thin surface half height must be non-negative".to_string(),
            ));
        }
        if !(self.max_walkable_tilt.is_finite() && self.max_walkable_tilt >= 0.0) {
            return Err(Error::InvalidConfig("max walkable tilt must be non-negative".to_string()));
        }
        if !(self.max_surface_segment.is_finite() && self.max_surface_segment > 0.0) {
            return Err(Error::InvalidConfig(
                "max surface segment must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
