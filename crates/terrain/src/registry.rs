//! Process-wide terrain sharing.
//!
//! Terrain is loaded per root map and shared by every running instance of
//! that map and of its child maps. Each tile slot carries a reference count;
//! the first [`TileLease`] loads the tile (and the matching tile of every
//! child terrain), dropping the last one unloads it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use worldgrid_common::{MAX_NUMBER_OF_GRIDS, MapId, TileCoord};

use crate::error::TileError;
use crate::liquid::{AreaTable, LiquidQuery, LiquidTypeMask};
use crate::tile::{DEFAULT_MIN_HEIGHT, TerrainTile};

/// Path of a tile file below a data directory.
pub fn tile_path(data_dir: &Path, map: MapId, tile: TileCoord) -> PathBuf {
    data_dir
        .join("maps")
        .join(format!("{map:04}_{:02}_{:02}.map", tile.x, tile.y))
}

/// Which maps layer their terrain over a parent map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapCatalog {
    /// child map id → parent map id
    #[serde(default)]
    parents: HashMap<MapId, MapId>,
}

impl MapCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_child(mut self, parent: MapId, child: MapId) -> Self {
        self.parents.insert(child, parent);
        self
    }

    pub fn parent_of(&self, map: MapId) -> Option<MapId> {
        self.parents.get(&map).copied()
    }

    /// Top of the parent chain.
    pub fn root_of(&self, map: MapId) -> MapId {
        let mut current = map;
        for _ in 0..self.parents.len() {
            match self.parent_of(current) {
                Some(parent) if parent != current => current = parent,
                _ => break,
            }
        }
        current
    }

    pub fn children_of(&self, map: MapId) -> Vec<MapId> {
        let mut children: Vec<_> = self
            .parents
            .iter()
            .filter(|(child, parent)| **parent == map && **child != map)
            .map(|(child, _)| *child)
            .collect();
        children.sort_unstable();
        children
    }
}

/// Decoded tile, filled once outside the slot mutex. `None` inside means
/// the file was missing or unreadable.
type TileCell = Arc<OnceLock<Option<Arc<TerrainTile>>>>;

#[derive(Debug, Default)]
struct TileSlot {
    refs: u32,
    tile: Option<TileCell>,
}

impl TileSlot {
    fn decoded(&self) -> Option<Arc<TerrainTile>> {
        self.tile.as_ref()?.get()?.clone()
    }
}

/// Terrain of one map id plus the terrains layered over it.
#[derive(Debug)]
pub struct TerrainInfo {
    map_id: MapId,
    data_dir: PathBuf,
    children: Vec<Arc<TerrainInfo>>,
    slots: Mutex<Vec<TileSlot>>,
}

impl TerrainInfo {
    fn new(map_id: MapId, data_dir: &Path, catalog: &MapCatalog, depth: u32) -> Self {
        // Cyclic catalogs would recurse forever.
        let children = if depth < 8 {
            catalog
                .children_of(map_id)
                .into_iter()
                .map(|child| Arc::new(Self::new(child, data_dir, catalog, depth + 1)))
                .collect()
        } else {
            Vec::new()
        };
        let tiles = (MAX_NUMBER_OF_GRIDS * MAX_NUMBER_OF_GRIDS) as usize;
        Self {
            map_id,
            data_dir: data_dir.to_path_buf(),
            children,
            slots: Mutex::new((0..tiles).map(|_| TileSlot::default()).collect()),
        }
    }

    pub fn map_id(&self) -> MapId {
        self.map_id
    }

    pub fn children(&self) -> &[Arc<TerrainInfo>] {
        &self.children
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, Vec<TileSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a reference on `tile`, loading it with the first one.
    pub fn acquire(self: &Arc<Self>, tile: TileCoord) -> TileLease {
        self.add_ref(tile);
        TileLease {
            terrain: Arc::clone(self),
            tile,
        }
    }

    fn add_ref(&self, tile: TileCoord) {
        let cell = {
            let mut slots = self.slots();
            let slot = &mut slots[tile.index()];
            slot.refs += 1;
            Arc::clone(slot.tile.get_or_insert_with(TileCell::default))
        };
        // Decoding happens without the slot mutex; concurrent acquirers of
        // the same tile wait on the cell only.
        cell.get_or_init(|| self.load_tile(tile).map(Arc::new));
        for child in &self.children {
            child.add_ref(tile);
        }
    }

    fn release(&self, tile: TileCoord) {
        {
            let mut slots = self.slots();
            let slot = &mut slots[tile.index()];
            if slot.refs == 0 {
                tracing::warn!(map = self.map_id, ?tile, "terrain tile released more often than acquired");
            } else {
                slot.refs -= 1;
                let decoded = slot.decoded().is_some();
                if slot.refs == 0 && slot.tile.take().is_some() && decoded {
                    tracing::debug!(map = self.map_id, ?tile, "unloaded terrain tile");
                }
            }
        }
        for child in &self.children {
            child.release(tile);
        }
    }

    fn load_tile(&self, tile: TileCoord) -> Option<TerrainTile> {
        let path = tile_path(&self.data_dir, self.map_id, tile);
        match TerrainTile::load(&path) {
            Ok(loaded) => {
                tracing::debug!(map = self.map_id, ?tile, path = %path.display(), "loaded terrain tile");
                Some(loaded)
            }
            Err(err @ TileError::NotFound { .. }) => {
                tracing::debug!(map = self.map_id, ?tile, "{err}");
                None
            }
            Err(err @ TileError::VersionMismatch { .. }) => {
                tracing::error!(map = self.map_id, ?tile, "{err}");
                None
            }
            Err(err) => {
                tracing::warn!(map = self.map_id, ?tile, "{err}");
                None
            }
        }
    }

    /// Reference count of a tile slot on this terrain.
    pub fn ref_count(&self, tile: TileCoord) -> u32 {
        self.slots()[tile.index()].refs
    }

    /// Number of tiles currently decoded on this terrain and its children.
    pub fn loaded_tile_count(&self) -> usize {
        let own = self.slots().iter().filter(|s| s.decoded().is_some()).count();
        own + self
            .children
            .iter()
            .map(|c| c.loaded_tile_count())
            .sum::<usize>()
    }

    /// Whether a tile file was found for `tile` on this terrain.
    pub fn has_tile(&self, tile: TileCoord) -> bool {
        self.slots()[tile.index()].decoded().is_some()
    }

    fn own_tile(&self, tile: TileCoord) -> Option<Arc<TerrainTile>> {
        self.slots()[tile.index()].decoded()
    }

    /// Tile answering queries for `map_id` at (x, y): the child's tile when
    /// it has one, else this terrain's.
    pub fn tile_at(&self, map_id: MapId, x: f32, y: f32) -> Option<Arc<TerrainTile>> {
        let tile = TileCoord::from_position(x, y).ok()?;
        if map_id != self.map_id {
            if let Some(child) = self.find(map_id) {
                if let Some(found) = child.own_tile(tile) {
                    return Some(found);
                }
            }
        }
        self.own_tile(tile)
    }

    fn find(&self, map_id: MapId) -> Option<&TerrainInfo> {
        if self.map_id == map_id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(map_id))
    }

    pub fn height(&self, map_id: MapId, x: f32, y: f32) -> Option<f32> {
        self.tile_at(map_id, x, y)?.height(x, y)
    }

    pub fn area_id(&self, map_id: MapId, x: f32, y: f32) -> u16 {
        self.tile_at(map_id, x, y).map_or(0, |t| t.area_id(x, y))
    }

    pub fn min_height(&self, map_id: MapId, x: f32, y: f32) -> f32 {
        self.tile_at(map_id, x, y)
            .map_or(DEFAULT_MIN_HEIGHT, |t| t.min_height(x, y))
    }

    pub fn liquid_level(&self, map_id: MapId, x: f32, y: f32) -> Option<f32> {
        self.tile_at(map_id, x, y)?.liquid_level(x, y)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn liquid_status(
        &self,
        map_id: MapId,
        x: f32,
        y: f32,
        z: f32,
        required: Option<LiquidTypeMask>,
        collision_height: f32,
        areas: &dyn AreaTable,
    ) -> LiquidQuery {
        self.tile_at(map_id, x, y).map_or(LiquidQuery::NO_WATER, |t| {
            t.liquid_status(x, y, z, required, collision_height, areas)
        })
    }
}

/// Counted reference on one tile of a terrain. Released on drop.
#[derive(Debug)]
pub struct TileLease {
    terrain: Arc<TerrainInfo>,
    tile: TileCoord,
}

impl TileLease {
    pub fn tile(&self) -> TileCoord {
        self.tile
    }

    pub fn terrain(&self) -> &Arc<TerrainInfo> {
        &self.terrain
    }
}

impl Drop for TileLease {
    fn drop(&mut self) {
        self.terrain.release(self.tile);
    }
}

/// Hands out shared [`TerrainInfo`]s keyed by root map id.
#[derive(Debug)]
pub struct TerrainRegistry {
    data_dir: PathBuf,
    catalog: MapCatalog,
    terrains: Mutex<HashMap<MapId, Weak<TerrainInfo>>>,
}

impl TerrainRegistry {
    pub fn new(data_dir: impl Into<PathBuf>, catalog: MapCatalog) -> Self {
        Self {
            data_dir: data_dir.into(),
            catalog,
            terrains: Mutex::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn catalog(&self) -> &MapCatalog {
        &self.catalog
    }

    /// Root terrain serving `map`, shared while anyone holds it.
    pub fn load_terrain(&self, map: MapId) -> Arc<TerrainInfo> {
        let root = self.catalog.root_of(map);
        let mut terrains = self.terrains.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = terrains.get(&root).and_then(Weak::upgrade) {
            return existing;
        }
        tracing::debug!(map, root, "creating terrain");
        let terrain = Arc::new(TerrainInfo::new(root, &self.data_dir, &self.catalog, 0));
        terrains.insert(root, Arc::downgrade(&terrain));
        terrains.retain(|_, weak| weak.strong_count() > 0);
        terrain
    }
}
