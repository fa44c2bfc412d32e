use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use worldgrid_common::{
    CellArea, CellCoord, EntityId, EntityKind, GridCoord, KindMask, MAX_NUMBER_OF_CELLS,
    MAX_NUMBER_OF_GRIDS,
};
use worldgrid_terrain::TileLease;

use crate::timing::ExpiryTimer;

/// Which of a cell's two containers an entity lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    /// Entities seen from far away: players, pets, far-visible creatures,
    /// dynamic objects.
    WorldObjects,
    /// Everything else, fixed to its cell.
    GridObjects,
}

/// Smallest bucket of the spatial index.
#[derive(Debug, Clone, Default)]
pub struct Cell {
    world_objects: BTreeSet<EntityId>,
    grid_objects: BTreeSet<EntityId>,
}

impl Cell {
    pub fn bucket(&self, bucket: Bucket) -> &BTreeSet<EntityId> {
        match bucket {
            Bucket::WorldObjects => &self.world_objects,
            Bucket::GridObjects => &self.grid_objects,
        }
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut BTreeSet<EntityId> {
        match bucket {
            Bucket::WorldObjects => &mut self.world_objects,
            Bucket::GridObjects => &mut self.grid_objects,
        }
    }

    /// Returns false if the entity was already in that bucket.
    pub fn insert(&mut self, bucket: Bucket, id: EntityId) -> bool {
        self.bucket_mut(bucket).insert(id)
    }

    /// Remove from whichever bucket holds the entity.
    pub fn remove(&mut self, id: EntityId) -> Option<Bucket> {
        if self.world_objects.remove(&id) {
            Some(Bucket::WorldObjects)
        } else if self.grid_objects.remove(&id) {
            Some(Bucket::GridObjects)
        } else {
            None
        }
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.world_objects.contains(&id) || self.grid_objects.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.world_objects.is_empty() && self.grid_objects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.world_objects.len() + self.grid_objects.len()
    }

    /// Entities of the kinds in `mask`, world objects first.
    pub fn iter(&self, mask: KindMask) -> impl Iterator<Item = EntityId> + '_ {
        self.world_objects
            .iter()
            .chain(self.grid_objects.iter())
            .copied()
            .filter(move |id| mask.matches(id.kind()))
    }

    pub fn count(&self, bucket: Bucket, kind: EntityKind) -> usize {
        self.bucket(bucket)
            .iter()
            .filter(|id| id.kind() == kind)
            .count()
    }

    fn clear(&mut self) {
        self.world_objects.clear();
        self.grid_objects.clear();
    }
}

/// Lifecycle state of a created grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridState {
    Idle,
    Active,
    Removal,
}

/// What one state machine step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridTransition {
    None,
    /// Activity seen; expiry pushed back.
    StayedActive,
    /// Active grid went idle.
    Deactivated,
    /// Idle grid entered removal with a fresh expiry.
    ScheduledRemoval,
    /// Removal expiry passed while unlocked; the owner should unload it.
    UnloadDue,
}

/// Fraction of the expiry between activity checks of an active grid.
pub const ACTIVE_CHECK_FACTOR: f32 = 0.1;

const CELLS_PER_GRID: usize = (MAX_NUMBER_OF_CELLS * MAX_NUMBER_OF_CELLS) as usize;

/// One streamed square of the map: 8×8 cells plus lifecycle bookkeeping.
#[derive(Debug)]
pub struct Grid {
    coord: GridCoord,
    state: GridState,
    object_data_loaded: bool,
    unload_explicit_lock: bool,
    unload_active_lock: u32,
    expiry: Duration,
    timer: ExpiryTimer,
    cells: Vec<Cell>,
    terrain: Option<TileLease>,
}

impl Grid {
    pub fn new(coord: GridCoord, expiry: Duration, terrain: Option<TileLease>) -> Self {
        Self {
            coord,
            state: GridState::Idle,
            object_data_loaded: false,
            unload_explicit_lock: false,
            unload_active_lock: 0,
            expiry,
            timer: ExpiryTimer::new(expiry),
            cells: vec![Cell::default(); CELLS_PER_GRID],
            terrain,
        }
    }

    pub fn coord(&self) -> GridCoord {
        self.coord
    }

    pub fn state(&self) -> GridState {
        self.state
    }

    pub fn set_state(&mut self, state: GridState) {
        self.state = state;
    }

    pub fn is_object_data_loaded(&self) -> bool {
        self.object_data_loaded
    }

    pub fn set_object_data_loaded(&mut self, loaded: bool) {
        self.object_data_loaded = loaded;
    }

    /// Keep the grid regardless of activity (`grid_unload = false`).
    pub fn set_unload_explicit_lock(&mut self, locked: bool) {
        self.unload_explicit_lock = locked;
    }

    pub fn increment_unload_active_lock(&mut self) {
        self.unload_active_lock += 1;
    }

    pub fn decrement_unload_active_lock(&mut self) {
        if self.unload_active_lock == 0 {
            tracing::warn!(grid = ?self.coord, "active lock released more often than taken");
            return;
        }
        self.unload_active_lock -= 1;
    }

    pub fn unload_active_lock_count(&self) -> u32 {
        self.unload_active_lock
    }

    pub fn unload_lock(&self) -> bool {
        self.unload_explicit_lock || self.unload_active_lock > 0
    }

    pub fn timer(&self) -> &ExpiryTimer {
        &self.timer
    }

    /// Restart the expiry countdown at `factor` of the configured expiry.
    pub fn reset_expiry(&mut self, factor: f32) {
        self.timer.reset(self.expiry.mul_f32(factor.max(0.0)));
    }

    /// Enter the active state with the activity-check interval.
    pub fn activate(&mut self) {
        if self.state != GridState::Active {
            self.reset_expiry(ACTIVE_CHECK_FACTOR);
            self.state = GridState::Active;
        }
    }

    fn cell_slot(cell: CellCoord) -> usize {
        let (x, y) = cell.local();
        (x * MAX_NUMBER_OF_CELLS + y) as usize
    }

    /// Cell by map cell coordinate. The cell must belong to this grid.
    pub fn cell(&self, cell: CellCoord) -> Option<&Cell> {
        (cell.grid() == self.coord).then(|| &self.cells[Self::cell_slot(cell)])
    }

    pub fn cell_mut(&mut self, cell: CellCoord) -> Option<&mut Cell> {
        if cell.grid() != self.coord {
            return None;
        }
        Some(&mut self.cells[Self::cell_slot(cell)])
    }

    /// All cells with their coordinates.
    pub fn cells(&self) -> impl Iterator<Item = (CellCoord, &Cell)> + '_ {
        let first = self.coord.first_cell();
        self.cells.iter().enumerate().map(move |(slot, cell)| {
            let slot = slot as u32;
            let coord = CellCoord {
                x: first.x + slot / MAX_NUMBER_OF_CELLS,
                y: first.y + slot % MAX_NUMBER_OF_CELLS,
            };
            (coord, cell)
        })
    }

    /// Count of `kind` in one bucket across every cell.
    pub fn count(&self, bucket: Bucket, kind: EntityKind) -> usize {
        self.cells.iter().map(|c| c.count(bucket, kind)).sum()
    }

    pub fn entity_count(&self) -> usize {
        self.cells.iter().map(Cell::len).sum()
    }

    pub fn entities(&self, mask: KindMask) -> Vec<EntityId> {
        self.cells.iter().flat_map(|c| c.iter(mask)).collect()
    }

    /// Drop every bucket entry. The owner is responsible for the entities.
    pub fn clear_cells(&mut self) {
        self.cells.iter_mut().for_each(Cell::clear);
    }

    pub fn has_terrain(&self) -> bool {
        self.terrain.is_some()
    }

    pub fn terrain(&self) -> Option<&TileLease> {
        self.terrain.as_ref()
    }

    /// Give up the terrain lease; the tile unloads with its last lease.
    pub fn release_terrain(&mut self) -> Option<TileLease> {
        self.terrain.take()
    }

    /// Advance the lifecycle by `diff`.
    ///
    /// `busy` reports whether players or active objects are near the grid;
    /// it is only consulted when an active grid's check interval elapses.
    pub fn tick(&mut self, diff: Duration, busy: impl FnOnce(&Grid) -> bool) -> GridTransition {
        match self.state {
            GridState::Active => {
                self.timer.update(diff);
                if !self.timer.passed() {
                    return GridTransition::None;
                }
                if busy(self) {
                    self.reset_expiry(ACTIVE_CHECK_FACTOR);
                    GridTransition::StayedActive
                } else {
                    self.state = GridState::Idle;
                    tracing::debug!(grid = ?self.coord, "grid moved to idle");
                    GridTransition::Deactivated
                }
            }
            GridState::Idle => {
                self.reset_expiry(1.0);
                self.state = GridState::Removal;
                GridTransition::ScheduledRemoval
            }
            GridState::Removal => {
                if self.unload_lock() {
                    return GridTransition::None;
                }
                self.timer.update(diff);
                if self.timer.passed() {
                    GridTransition::UnloadDue
                } else {
                    GridTransition::None
                }
            }
        }
    }
}

/// Counters describing the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridStats {
    pub grids_created: u64,
    pub grids_loaded: u64,
    pub grids_unloaded: u64,
    pub live_grids: usize,
    pub active_grids: usize,
    pub idle_grids: usize,
    pub removal_grids: usize,
    pub indexed_entities: usize,
}

const GRID_SLOTS: usize = (MAX_NUMBER_OF_GRIDS * MAX_NUMBER_OF_GRIDS) as usize;

/// Fixed 64×64 table of lazily created grids for one map instance.
#[derive(Debug)]
pub struct GridIndex {
    grids: Vec<Option<Box<Grid>>>,
    grids_created: u64,
    grids_loaded: u64,
    grids_unloaded: u64,
}

impl Default for GridIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl GridIndex {
    pub fn new() -> Self {
        Self {
            grids: (0..GRID_SLOTS).map(|_| None).collect(),
            grids_created: 0,
            grids_loaded: 0,
            grids_unloaded: 0,
        }
    }

    pub fn get(&self, coord: GridCoord) -> Option<&Grid> {
        self.grids[coord.index()].as_deref()
    }

    pub fn get_mut(&mut self, coord: GridCoord) -> Option<&mut Grid> {
        self.grids[coord.index()].as_deref_mut()
    }

    pub fn is_created(&self, coord: GridCoord) -> bool {
        self.grids[coord.index()].is_some()
    }

    /// Created and populated with its object data.
    pub fn is_loaded(&self, coord: GridCoord) -> bool {
        self.get(coord).is_some_and(Grid::is_object_data_loaded)
    }

    /// Store a freshly created grid, replacing nothing.
    pub fn insert(&mut self, grid: Grid) -> &mut Grid {
        let slot = &mut self.grids[grid.coord().index()];
        if slot.is_some() {
            tracing::warn!(grid = ?grid.coord(), "grid created twice, keeping the existing one");
        } else {
            self.grids_created += 1;
        }
        slot.get_or_insert_with(|| Box::new(grid))
    }

    /// Mark a grid's object data as loaded.
    pub fn mark_loaded(&mut self, coord: GridCoord) {
        if let Some(grid) = self.get_mut(coord) {
            if !grid.is_object_data_loaded() {
                grid.set_object_data_loaded(true);
                self.grids_loaded += 1;
            }
        }
    }

    pub fn remove(&mut self, coord: GridCoord) -> Option<Box<Grid>> {
        let removed = self.grids[coord.index()].take();
        if removed.is_some() {
            self.grids_unloaded += 1;
        }
        removed
    }

    /// Coordinates of every created grid, in index order.
    pub fn coords(&self) -> Vec<GridCoord> {
        self.grids
            .iter()
            .flatten()
            .map(|grid| grid.coord())
            .collect()
    }

    pub fn grids(&self) -> impl Iterator<Item = &Grid> + '_ {
        self.grids.iter().flatten().map(|grid| &**grid)
    }

    /// A cell of a loaded grid.
    pub fn cell(&self, cell: CellCoord) -> Option<&Cell> {
        self.get(cell.grid())
            .filter(|grid| grid.is_object_data_loaded())
            .and_then(|grid| grid.cell(cell))
    }

    /// Mutable cell of a created grid, loaded or not.
    pub fn cell_mut(&mut self, cell: CellCoord) -> Option<&mut Cell> {
        self.get_mut(cell.grid()).and_then(|grid| grid.cell_mut(cell))
    }

    /// Call `f` for each entity of the kinds in `mask` in a loaded cell.
    /// Returns how many entities were visited.
    pub fn visit_cell(&self, cell: CellCoord, mask: KindMask, mut f: impl FnMut(EntityId)) -> usize {
        let Some(cell) = self.cell(cell) else {
            return 0;
        };
        let mut visited = 0;
        for id in cell.iter(mask) {
            f(id);
            visited += 1;
        }
        visited
    }

    /// Entities of the kinds in `mask` across an area of loaded cells.
    pub fn entities_in_area(&self, area: &CellArea, mask: KindMask) -> Vec<EntityId> {
        let mut found = Vec::new();
        for cell in area.cells() {
            self.visit_cell(cell, mask, |id| found.push(id));
        }
        found
    }

    pub fn stats(&self) -> GridStats {
        let mut stats = GridStats {
            grids_created: self.grids_created,
            grids_loaded: self.grids_loaded,
            grids_unloaded: self.grids_unloaded,
            ..GridStats::default()
        };
        for grid in self.grids() {
            stats.live_grids += 1;
            stats.indexed_entities += grid.entity_count();
            match grid.state() {
                GridState::Active => stats.active_grids += 1,
                GridState::Idle => stats.idle_grids += 1,
                GridState::Removal => stats.removal_grids += 1,
            }
        }
        stats
    }
}
