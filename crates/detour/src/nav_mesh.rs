//! Navigation mesh implementation for Detour
//!
//! The navigation mesh is a pool of tiles. Each tile holds convex polygons,
//! their detail triangles and the links that make the polygons a graph.

use std::collections::{HashMap, HashSet, VecDeque};

use glam::Vec3;
use log::debug;
use recast_common::{point_in_polygon_2d, Error, Result};

use super::{
    DT_EXT_LINK, DT_INTERNAL_SIDE, MAX_VERTS_PER_POLY, NavMeshParams, PolyFlags, PolyRef,
};

/// Number of bits for polygon id
const DT_POLY_BITS: u32 = 16;
/// Number of bits for tile id
const DT_TILE_BITS: u32 = 10;
/// Number of bits for salt
const DT_SALT_BITS: u32 = 6;

const DT_POLY_MASK: u32 = (1 << DT_POLY_BITS) - 1;
const DT_TILE_MASK: u32 = (1 << DT_TILE_BITS) - 1;
const DT_SALT_MASK: u32 = (1 << DT_SALT_BITS) - 1;

/// Tolerance used when matching portal edges of adjacent tiles
const PORTAL_EPSILON: f32 = 1e-3;

/// Creates a PolyRef from salt, tile and polygon ids
#[inline]
pub fn encode_poly_ref_with_salt(salt: u32, tile_id: u32, poly_id: u32) -> PolyRef {
    PolyRef::new(
        ((salt & DT_SALT_MASK) << (DT_POLY_BITS + DT_TILE_BITS))
            | ((tile_id & DT_TILE_MASK) << DT_POLY_BITS)
            | (poly_id & DT_POLY_MASK),
    )
}

/// Decodes a PolyRef into salt, tile and polygon ids
///
/// Tile ids are 1-based so that no valid reference is zero.
#[inline]
pub fn decode_poly_ref(reference: PolyRef) -> (u32, u32, u32) {
    let id = reference.id();
    let salt = (id >> (DT_POLY_BITS + DT_TILE_BITS)) & DT_SALT_MASK;
    let tile_id = (id >> DT_POLY_BITS) & DT_TILE_MASK;
    let poly_id = id & DT_POLY_MASK;
    (salt, tile_id, poly_id)
}

#[inline]
fn tile_id_to_index(tile_id: u32) -> Option<usize> {
    tile_id.checked_sub(1).map(|i| i as usize)
}

/// Link between two polygons
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Link {
    /// Reference to the connected polygon
    pub reference: PolyRef,
    /// Index of the next link of the same polygon
    pub next: Option<u32>,
    /// Edge of the owning polygon the link crosses
    pub edge_index: u8,
    /// Tile side for external links, [`DT_INTERNAL_SIDE`] otherwise
    pub side: u8,
}

/// Polygon in the navigation mesh
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Poly {
    /// First link index
    pub first_link: Option<usize>,
    /// Vertex indices into the tile vertex array
    pub verts: [u16; MAX_VERTS_PER_POLY],
    /// Per edge: 0 for a solid edge, `1 + index` for a polygon of the same
    /// tile, `DT_EXT_LINK | side` for a tile border portal
    pub neighbors: [u16; MAX_VERTS_PER_POLY],
    pub flags: PolyFlags,
    pub vert_count: u8,
    pub area: u8,
}

impl Poly {
    pub fn new(area: u8, flags: PolyFlags) -> Self {
        Self {
            first_link: None,
            verts: [0; MAX_VERTS_PER_POLY],
            neighbors: [0; MAX_VERTS_PER_POLY],
            flags,
            vert_count: 0,
            area,
        }
    }
}

/// Detail sub-mesh of one polygon
///
/// Detail triangle indices below the polygon's vertex count refer to the
/// polygon vertices, the rest to `detail_verts[vert_base..]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyDetail {
    pub vert_base: u32,
    pub tri_base: u32,
    pub vert_count: u8,
    pub tri_count: u8,
}

/// Tile header information
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileHeader {
    /// Tile position (x, y, layer)
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
}

impl TileHeader {
    pub fn new(x: i32, y: i32, layer: i32) -> Self {
        Self {
            x,
            y,
            layer,
            bmin: [0.0; 3],
            bmax: [0.0; 3],
            walkable_height: 0.0,
            walkable_radius: 0.0,
            walkable_climb: 0.0,
        }
    }
}

/// Mesh tile in the navigation mesh
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct MeshTile {
    /// Salt of the slot holding the tile
    pub salt: u32,
    /// `None` for a free slot
    pub header: Option<TileHeader>,
    pub polys: Vec<Poly>,
    /// Vertices in the tile [x,y,z,...]
    pub verts: Vec<f32>,
    pub links: Vec<Link>,
    pub detail_meshes: Vec<PolyDetail>,
    /// Detail vertices [x,y,z,...]
    pub detail_verts: Vec<f32>,
    /// Detail triangles, three vertex indices and a flags byte each
    pub detail_tris: Vec<u8>,
    /// Next free slot when the tile is unused
    pub next: Option<usize>,
}

impl MeshTile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vert(&self, i: usize) -> [f32; 3] {
        [self.verts[i * 3], self.verts[i * 3 + 1], self.verts[i * 3 + 2]]
    }

    /// World positions of the polygon's vertices
    pub fn poly_verts(&self, poly: &Poly) -> Vec<[f32; 3]> {
        poly.verts[..poly.vert_count as usize]
            .iter()
            .map(|&v| self.vert(v as usize))
            .collect()
    }

    /// Links of polygon `poly_idx`, newest first
    pub fn poly_links(&self, poly_idx: usize) -> impl Iterator<Item = &Link> + '_ {
        let mut cur = self.polys.get(poly_idx).and_then(|p| p.first_link);
        std::iter::from_fn(move || {
            let link = self.links.get(cur?)?;
            cur = link.next.map(|n| n as usize);
            Some(link)
        })
    }

    fn push_link(&mut self, poly_idx: usize, reference: PolyRef, edge_index: u8, side: u8) {
        let link_idx = self.links.len();
        let poly = &mut self.polys[poly_idx];
        self.links.push(Link {
            reference,
            next: poly.first_link.map(|l| l as u32),
            edge_index,
            side,
        });
        poly.first_link = Some(link_idx);
    }

    /// Drops every link rejected by `keep`, preserving the order of the rest
    fn retain_links(&mut self, keep: impl Fn(&Link) -> bool) {
        let per_poly: Vec<Vec<Link>> = (0..self.polys.len())
            .map(|pi| self.poly_links(pi).filter(|l| keep(l)).copied().collect())
            .collect();

        self.links.clear();
        for (pi, links) in per_poly.into_iter().enumerate() {
            self.polys[pi].first_link = None;
            for link in links.into_iter().rev() {
                self.push_link(pi, link.reference, link.edge_index, link.side);
            }
        }
    }
}

/// Navigation mesh structure
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct NavMesh {
    params: NavMeshParams,
    /// Tile slots, free ones have no header
    tiles: Vec<MeshTile>,
    next_free: Option<usize>,
    /// Tile position lookup
    #[cfg_attr(
        feature = "serialization",
        serde(
            serialize_with = "serialize_pos_lookup",
            deserialize_with = "deserialize_pos_lookup"
        )
    )]
    pos_lookup: HashMap<(i32, i32, i32), usize>,
}

impl NavMesh {
    /// Creates an empty navigation mesh
    pub fn new(params: NavMeshParams) -> Result<Self> {
        if params.origin.iter().any(|v| !v.is_finite()) {
            return Err(Error::Detour("navmesh origin must be finite".to_string()));
        }
        if !(params.tile_width > 0.0 && params.tile_height > 0.0) {
            return Err(Error::Detour(format!(
                "tile size must be positive, got {}x{}",
                params.tile_width, params.tile_height
            )));
        }
        if params.max_tiles <= 0 || params.max_tiles as u32 > DT_TILE_MASK {
            return Err(Error::Detour(format!(
                "max_tiles must be in 1..={DT_TILE_MASK}, got {}",
                params.max_tiles
            )));
        }
        if params.max_polys_per_tile <= 0 || params.max_polys_per_tile as u32 > DT_POLY_MASK {
            return Err(Error::Detour(format!(
                "max_polys_per_tile must be in 1..={DT_POLY_MASK}, got {}",
                params.max_polys_per_tile
            )));
        }

        let count = params.max_tiles as usize;
        let tiles = (0..count)
            .map(|i| MeshTile {
                salt: 1,
                next: (i + 1 < count).then_some(i + 1),
                ..MeshTile::default()
            })
            .collect();

        Ok(Self {
            params,
            tiles,
            next_free: Some(0),
            pos_lookup: HashMap::new(),
        })
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    pub fn max_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Number of tiles currently stored
    pub fn tile_count(&self) -> usize {
        self.pos_lookup.len()
    }

    /// Iterates over the stored tiles
    pub fn tiles(&self) -> impl Iterator<Item = &MeshTile> + '_ {
        self.tiles.iter().filter(|t| t.header.is_some())
    }

    pub fn get_tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.pos_lookup.get(&(x, y, layer)).map(|&i| &self.tiles[i])
    }

    /// Reference of the tile at a grid position (its polygon 0)
    pub fn get_tile_ref_at(&self, x: i32, y: i32, layer: i32) -> Option<PolyRef> {
        self.pos_lookup.get(&(x, y, layer)).map(|&i| self.poly_ref_base(i))
    }

    fn poly_ref_base(&self, tile_idx: usize) -> PolyRef {
        encode_poly_ref_with_salt(self.tiles[tile_idx].salt, tile_idx as u32 + 1, 0)
    }

    fn tile_index_of(&self, reference: PolyRef) -> Result<usize> {
        let (salt, tile_id, _) = decode_poly_ref(reference);
        let idx = tile_id_to_index(tile_id)
            .filter(|&i| i < self.tiles.len())
            .ok_or_else(|| Error::Detour(format!("invalid tile in reference {reference}")))?;
        let tile = &self.tiles[idx];
        if tile.header.is_none() || tile.salt != salt {
            return Err(Error::Detour(format!("stale reference {reference}")));
        }
        Ok(idx)
    }

    pub fn get_tile_and_poly_by_ref(&self, reference: PolyRef) -> Result<(&MeshTile, &Poly)> {
        let idx = self.tile_index_of(reference)?;
        let (_, _, poly_id) = decode_poly_ref(reference);
        let tile = &self.tiles[idx];
        let poly = tile
            .polys
            .get(poly_id as usize)
            .ok_or_else(|| Error::Detour(format!("invalid polygon in reference {reference}")))?;
        Ok((tile, poly))
    }

    pub fn is_valid_poly_ref(&self, reference: PolyRef) -> bool {
        self.get_tile_and_poly_by_ref(reference).is_ok()
    }

    /// Inserts a tile and links it to its neighbours.
    ///
    /// Fails when the grid position is already taken or no slot is free.
    pub fn add_tile(&mut self, mut tile: MeshTile) -> Result<PolyRef> {
        let header = tile
            .header
            .as_ref()
            .ok_or_else(|| Error::Detour("tile has no header".to_string()))?;
        let key = (header.x, header.y, header.layer);
        if self.pos_lookup.contains_key(&key) {
            return Err(Error::Detour(format!("tile {key:?} is already occupied")));
        }
        if tile.polys.len() > self.params.max_polys_per_tile as usize {
            return Err(Error::Detour(format!(
                "tile {key:?} has {} polygons, limit is {}",
                tile.polys.len(),
                self.params.max_polys_per_tile
            )));
        }

        let idx = self
            .next_free
            .ok_or_else(|| Error::Detour("out of tile slots".to_string()))?;
        self.next_free = self.tiles[idx].next;

        tile.salt = self.tiles[idx].salt;
        tile.next = None;
        self.tiles[idx] = tile;
        self.pos_lookup.insert(key, idx);

        self.connect_int_links(idx);
        for side in 0..4u8 {
            let (nx, ny) = neighbour_position(key.0, key.1, side);
            if let Some(&nidx) = self.pos_lookup.get(&(nx, ny, key.2)) {
                self.connect_ext_links(idx, nidx, side);
                self.connect_ext_links(nidx, idx, opposite_side(side));
            }
        }

        debug!(
            "added tile {key:?} in slot {idx} with {} polys, {} links",
            self.tiles[idx].polys.len(),
            self.tiles[idx].links.len()
        );
        Ok(self.poly_ref_base(idx))
    }

    /// Removes the tile referenced by `reference` and returns it.
    ///
    /// The slot's salt changes, so references into the removed tile become
    /// invalid.
    pub fn remove_tile(&mut self, reference: PolyRef) -> Result<MeshTile> {
        let idx = self.tile_index_of(reference)?;
        let key = match &self.tiles[idx].header {
            Some(h) => (h.x, h.y, h.layer),
            None => return Err(Error::Detour(format!("stale reference {reference}"))),
        };
        self.pos_lookup.remove(&key);

        for side in 0..4u8 {
            let (nx, ny) = neighbour_position(key.0, key.1, side);
            if let Some(&nidx) = self.pos_lookup.get(&(nx, ny, key.2)) {
                let removed_tile_id = idx as u32 + 1;
                self.tiles[nidx].retain_links(|link| decode_poly_ref(link.reference).1 != removed_tile_id);
            }
        }

        let mut salt = (self.tiles[idx].salt + 1) & DT_SALT_MASK;
        if salt == 0 {
            salt = 1;
        }
        let free = MeshTile {
            salt,
            next: self.next_free,
            ..MeshTile::default()
        };
        let mut removed = std::mem::replace(&mut self.tiles[idx], free);
        self.next_free = Some(idx);
        removed.next = None;
        Ok(removed)
    }

    /// Rebuilds the links between polygons of the same tile
    fn connect_int_links(&mut self, tile_idx: usize) {
        let base = self.poly_ref_base(tile_idx).id();
        let tile = &mut self.tiles[tile_idx];
        tile.links.clear();
        for poly in &mut tile.polys {
            poly.first_link = None;
        }

        for pi in 0..tile.polys.len() {
            let poly = &tile.polys[pi];
            let internal: Vec<(u8, u16)> = (0..poly.vert_count as usize)
                .map(|j| (j as u8, poly.neighbors[j]))
                .filter(|&(_, nei)| nei != 0 && nei & DT_EXT_LINK == 0)
                .collect();
            for (edge, nei) in internal.into_iter().rev() {
                tile.push_link(pi, PolyRef::new(base | (nei as u32 - 1)), edge, DT_INTERNAL_SIDE);
            }
        }
    }

    /// Links the portal edges on `side` of one tile to the matching portal
    /// edges of the tile next to it
    fn connect_ext_links(&mut self, tile_idx: usize, target_idx: usize, side: u8) {
        let target_base = self.poly_ref_base(target_idx).id();
        let portal = DT_EXT_LINK | side as u16;
        let target_portal = DT_EXT_LINK | opposite_side(side) as u16;

        let mut found: Vec<(usize, u8, PolyRef)> = Vec::new();
        {
            let tile = &self.tiles[tile_idx];
            let target = &self.tiles[target_idx];
            let climb = tile_climb(tile).max(tile_climb(target));

            for (pi, poly) in tile.polys.iter().enumerate() {
                let n = poly.vert_count as usize;
                for j in 0..n {
                    if poly.neighbors[j] != portal {
                        continue;
                    }
                    let va = tile.vert(poly.verts[j] as usize);
                    let vb = tile.vert(poly.verts[(j + 1) % n] as usize);

                    for (ti, tpoly) in target.polys.iter().enumerate() {
                        let tn = tpoly.vert_count as usize;
                        for k in 0..tn {
                            if tpoly.neighbors[k] != target_portal {
                                continue;
                            }
                            let wa = target.vert(tpoly.verts[k] as usize);
                            let wb = target.vert(tpoly.verts[(k + 1) % tn] as usize);
                            if portals_overlap(va, vb, wa, wb, side, climb) {
                                found.push((pi, j as u8, PolyRef::new(target_base | ti as u32)));
                            }
                        }
                    }
                }
            }
        }

        let tile = &mut self.tiles[tile_idx];
        for (pi, edge, reference) in found {
            tile.push_link(pi, reference, edge, side);
        }
    }

    /// References of the polygons linked from `reference`
    pub fn neighbour_refs(&self, reference: PolyRef) -> Result<Vec<PolyRef>> {
        let idx = self.tile_index_of(reference)?;
        let (_, _, poly_id) = decode_poly_ref(reference);
        let tile = &self.tiles[idx];
        if poly_id as usize >= tile.polys.len() {
            return Err(Error::Detour(format!("invalid polygon in reference {reference}")));
        }
        Ok(tile.poly_links(poly_id as usize).map(|l| l.reference).collect())
    }

    /// Finds the polygon under `pos` whose height is closest to `pos.y`
    pub fn find_poly_containing(&self, pos: [f32; 3]) -> Option<PolyRef> {
        let p = Vec3::from_array(pos);
        let mut best: Option<(f32, PolyRef)> = None;

        for (idx, tile) in self.tiles.iter().enumerate() {
            let Some(header) = &tile.header else { continue };
            if p.x < header.bmin[0] || p.x > header.bmax[0] || p.z < header.bmin[2] || p.z > header.bmax[2] {
                continue;
            }
            let base = self.poly_ref_base(idx).id();
            for (pi, poly) in tile.polys.iter().enumerate() {
                let verts: Vec<Vec3> = tile.poly_verts(poly).into_iter().map(Vec3::from_array).collect();
                if !point_in_polygon_2d(p, &verts) {
                    continue;
                }
                let y = verts.iter().map(|v| v.y).sum::<f32>() / verts.len() as f32;
                let d = (y - p.y).abs();
                if best.map_or(true, |(bd, _)| d < bd) {
                    best = Some((d, PolyRef::new(base | pi as u32)));
                }
            }
        }
        best.map(|(_, r)| r)
    }

    /// Every polygon reachable from `start` by following links
    pub fn connected_polys(&self, start: PolyRef) -> Result<HashSet<PolyRef>> {
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for next in self.neighbour_refs(current)? {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        Ok(visited)
    }
}

fn tile_climb(tile: &MeshTile) -> f32 {
    tile.header.as_ref().map_or(0.0, |h| h.walkable_climb)
}

fn opposite_side(side: u8) -> u8 {
    (side + 2) & 0x3
}

/// Grid position of the tile across `side`: 0 is -x, 1 is +z, 2 is +x, 3 is -z
fn neighbour_position(x: i32, y: i32, side: u8) -> (i32, i32) {
    match side & 0x3 {
        0 => (x - 1, y),
        1 => (x, y + 1),
        2 => (x + 1, y),
        _ => (x, y - 1),
    }
}

fn portals_overlap(va: [f32; 3], vb: [f32; 3], wa: [f32; 3], wb: [f32; 3], side: u8, climb: f32) -> bool {
    // Portals on the x sides run along z and vice versa
    let (fixed, along) = if side & 1 == 0 { (0, 2) } else { (2, 0) };

    let tolerance = PORTAL_EPSILON.max(climb * 0.5);
    if (va[fixed] - wa[fixed]).abs() > tolerance {
        return false;
    }

    let (amin, amax) = (va[along].min(vb[along]), va[along].max(vb[along]));
    let (bmin, bmax) = (wa[along].min(wb[along]), wa[along].max(wb[along]));
    let lo = amin.max(bmin);
    let hi = amax.min(bmax);
    if hi - lo <= PORTAL_EPSILON {
        return false;
    }

    let mid = (lo + hi) * 0.5;
    let height_at = |a: [f32; 3], b: [f32; 3]| {
        let span = b[along] - a[along];
        if span.abs() < f32::EPSILON {
            a[1]
        } else {
            a[1] + (b[1] - a[1]) * ((mid - a[along]) / span)
        }
    };
    (height_at(va, vb) - height_at(wa, wb)).abs() <= climb + PORTAL_EPSILON
}

#[cfg(feature = "serialization")]
type PosLookupMap = HashMap<(i32, i32, i32), usize>;

/// Custom serializer for pos_lookup HashMap with tuple keys
#[cfg(feature = "serialization")]
fn serialize_pos_lookup<S>(pos_lookup: &PosLookupMap, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(pos_lookup.len()))?;
    for ((x, y, layer), value) in pos_lookup {
        map.serialize_entry(&format!("{x},{y},{layer}"), value)?;
    }
    map.end()
}

/// Custom deserializer for pos_lookup HashMap with tuple keys
#[cfg(feature = "serialization")]
fn deserialize_pos_lookup<'de, D>(deserializer: D) -> std::result::Result<PosLookupMap, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, MapAccess, Visitor};
    use std::fmt;

    struct PosLookupVisitor;

    impl<'de> Visitor<'de> for PosLookupVisitor {
        type Value = PosLookupMap;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map with string keys in format 'x,y,layer'")
        }

        fn visit_map<V>(self, mut map: V) -> std::result::Result<Self::Value, V::Error>
        where
            V: MapAccess<'de>,
        {
            let mut result = HashMap::new();
            while let Some(key) = map.next_key::<String>()? {
                let value = map.next_value::<usize>()?;
                let parts: Vec<i32> = key
                    .split(',')
                    .map(|p| p.parse::<i32>())
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(&key), &"integers"))?;
                let &[x, y, layer] = &parts[..] else {
                    return Err(de::Error::invalid_value(
                        de::Unexpected::Str(&key),
                        &"string in format 'x,y,layer'",
                    ));
                };
                result.insert((x, y, layer), value);
            }
            Ok(result)
        }
    }

    deserializer.deserialize_map(PosLookupVisitor)
}
