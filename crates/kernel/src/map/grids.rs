use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use worldgrid_common::{
    CellArea, CellCoord, EntityKind, GridCoord, KindMask, TOTAL_NUMBER_OF_CELLS_PER_MAP,
};
use worldgrid_stream::{Bucket, Grid, GridTransition};

use super::Map;
use crate::entity::Entity;

/// Cells within `padding` of `cell`, clamped to the map.
fn padded(cell: CellCoord, padding: u32) -> CellArea {
    let max = TOTAL_NUMBER_OF_CELLS_PER_MAP - 1;
    CellArea {
        low: CellCoord {
            x: cell.x.saturating_sub(padding),
            y: cell.y.saturating_sub(padding),
        },
        high: CellCoord {
            x: (cell.x + padding).min(max),
            y: (cell.y + padding).min(max),
        },
    }
}

impl Map {
    pub fn is_grid_loaded(&self, coord: GridCoord) -> bool {
        self.grids.is_loaded(coord)
    }

    /// Create the grid if needed, taking a lease on its terrain tile.
    pub(crate) fn ensure_grid_created(&mut self, coord: GridCoord) {
        if self.grids.is_created(coord) {
            return;
        }
        let lease = self.terrain.acquire(coord.tile());
        let mut grid = Grid::new(coord, self.config.grid_expiry(), Some(lease));
        if !self.config.grid_unload {
            grid.set_unload_explicit_lock(true);
        }
        self.grids.insert(grid);
        tracing::debug!(map = self.id, instance = self.instance, grid = ?coord, "grid created");
    }

    /// Create and populate a grid. Returns true when it was loaded now.
    pub fn ensure_grid_loaded(&mut self, coord: GridCoord) -> bool {
        self.ensure_grid_created(coord);
        if self.grids.is_loaded(coord) {
            return false;
        }
        // Marked first so spawns placed during the load see a loaded grid.
        self.grids.mark_loaded(coord);
        self.load_grid_objects(coord);
        true
    }

    /// Load every grid touched by a square of `radius` around a point.
    /// Returns the number of grids loaded by this call.
    pub fn load_grids_in_range(&mut self, x: f32, y: f32, radius: f32) -> usize {
        let area = CellArea::around(x, y, radius);
        let mut loaded = 0;
        for grid in area.grids() {
            if self.ensure_grid_loaded(grid) {
                loaded += 1;
            }
        }
        loaded
    }

    /// Keep or release a grid regardless of activity.
    pub fn set_grid_unload_lock(&mut self, coord: GridCoord, locked: bool) -> bool {
        match self.grids.get_mut(coord) {
            Some(grid) => {
                grid.set_unload_explicit_lock(locked);
                true
            }
            None => false,
        }
    }

    /// Players and active objects currently in the world.
    fn anchors(&self) -> Vec<&Entity> {
        self.players
            .iter()
            .chain(self.active_objects.iter())
            .filter_map(|id| self.entities.get(id))
            .filter(|entity| entity.is_in_world())
            .collect()
    }

    /// Load grids around every anchor and keep the anchors' own grids
    /// active. Returns the cells within visibility of an anchor.
    pub(super) fn activate_around_anchors(&mut self) -> BTreeSet<CellCoord> {
        let visibility = self.config.visibility_distance;
        let anchors: Vec<_> = self
            .anchors()
            .into_iter()
            .map(|entity| (entity.placement(), entity.grid()))
            .collect();
        let mut cells = BTreeSet::new();
        for (placement, own_grid) in anchors {
            let area = CellArea::around(placement.x(), placement.y(), visibility);
            for grid in area.grids() {
                self.ensure_grid_loaded(grid);
            }
            if let Some(grid) = self.grids.get_mut(own_grid) {
                grid.activate();
            }
            cells.extend(area.cells());
        }
        cells
    }

    /// Grids with a player or active object within visibility padding.
    fn grids_near_anchors(&self) -> HashSet<GridCoord> {
        let padding = self.config.visibility_padding_cells();
        let mut near = HashSet::new();
        for entity in self.anchors() {
            near.extend(padded(entity.cell(), padding).grids());
        }
        near
    }

    fn active_objects_near_grid(&self, coord: GridCoord) -> bool {
        let area = CellArea::of_grid(coord, self.config.visibility_padding_cells());
        self.anchors().iter().any(|entity| area.contains(entity.cell()))
    }

    /// Whether a grid may be unloaded now: no live far-visible non-pet
    /// creature inside, and no player or active object within visibility.
    pub fn can_unload(&self, coord: GridCoord) -> bool {
        let Some(grid) = self.grids.get(coord) else {
            return true;
        };
        let pinned_creature = grid.cells().any(|(_, cell)| {
            cell.bucket(Bucket::WorldObjects).iter().any(|id| {
                id.kind() == EntityKind::Creature
                    && self
                        .entities
                        .get(id)
                        .is_some_and(|creature| creature.is_alive() && !creature.is_pet())
            })
        });
        !pinned_creature && !self.active_objects_near_grid(coord)
    }

    /// Run the lifecycle of every grid and unload those that expired.
    pub(super) fn update_grids(&mut self, diff: Duration) {
        let busy = self.grids_near_anchors();
        for coord in self.grids.coords() {
            let Some(grid) = self.grids.get_mut(coord) else {
                continue;
            };
            match grid.tick(diff, |g| busy.contains(&g.coord())) {
                GridTransition::UnloadDue => {
                    if !self.unload_grid(coord, false) {
                        if let Some(grid) = self.grids.get_mut(coord) {
                            grid.reset_expiry(1.0);
                        }
                    }
                }
                GridTransition::Deactivated => {
                    tracing::debug!(map = self.id, grid = ?coord, "grid idle");
                }
                _ => {}
            }
        }
    }

    /// Move creatures and game objects of a grid back to their respawn
    /// points in other loaded grids.
    fn evacuate_grid(&mut self, coord: GridCoord) {
        let Some(grid) = self.grids.get(coord) else {
            return;
        };
        let ids = grid.entities(KindMask::CREATURE | KindMask::GAME_OBJECT);
        for id in ids {
            let leaves = self
                .entities
                .get(&id)
                .is_some_and(|entity| entity.home_grid() != coord);
            if leaves {
                self.respawn_relocation(id);
            }
        }
    }

    /// Unload a grid. Without `unload_all` the grid must pass
    /// [`Map::can_unload`] and hold no unload lock.
    pub fn unload_grid(&mut self, coord: GridCoord, unload_all: bool) -> bool {
        let Some(grid) = self.grids.get(coord) else {
            return false;
        };
        if !unload_all && (grid.unload_lock() || !self.can_unload(coord)) {
            return false;
        }

        self.drain_relocations();
        if !unload_all {
            self.evacuate_grid(coord);
            self.drain_relocations();
        }

        let remaining = self
            .grids
            .get(coord)
            .map(|grid| grid.entities(KindMask::all()))
            .unwrap_or_default();
        for id in &remaining {
            self.detach_entity(*id);
        }
        self.process_remove_list();

        if unload_all {
            // Pins on this grid die with it.
            for entity in self.entities.values_mut() {
                if entity.pinned_grid() == Some(coord) {
                    entity.set_pinned_grid(None);
                }
            }
        }

        if let Some(mut grid) = self.grids.remove(coord) {
            grid.clear_cells();
            drop(grid.release_terrain());
        }
        tracing::debug!(
            map = self.id,
            instance = self.instance,
            grid = ?coord,
            removed = remaining.len(),
            "grid unloaded"
        );
        true
    }

    /// Unload everything, e.g. on shutdown.
    pub fn unload_all(&mut self) {
        let players: Vec<_> = self.players.iter().copied().collect();
        for id in players {
            self.detach_entity(id);
        }
        for coord in self.grids.coords() {
            self.unload_grid(coord, true);
        }
        self.deferred.clear();
        tracing::info!(map = self.id, instance = self.instance, "map unloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::MapConfig;
    use crate::entity::{EntityDesc, EntityFlags};
    use worldgrid_common::{EntityId, Placement};
    use worldgrid_stream::GridState;

    #[test]
    fn grid_lifecycle_restores_terrain_refcount() {
        let dir = tempfile::tempdir().unwrap();
        let coord = GridCoord::new(30, 30).unwrap();
        write_flat_tile(dir.path(), coord, 12.0);
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let tile = coord.tile();
        let before = map.terrain().ref_count(tile);

        for _ in 0..2 {
            assert!(map.ensure_grid_loaded(coord));
            assert_eq!(map.terrain().ref_count(tile), before + 1);
            assert!(map.terrain().has_tile(tile));
            let (x, y) = coord.center();
            assert_eq!(map.height(x, y), Some(12.0));
            map.add_entity(EntityDesc::new(EntityKind::GameObject, at_grid(coord)))
                .unwrap();

            assert!(map.unload_grid(coord, false));
            assert!(!map.grids().is_created(coord));
            assert_eq!(map.terrain().ref_count(tile), before);
            assert!(!map.terrain().has_tile(tile));
            assert_eq!(map.entity_count(), 0);
        }
        assert_eq!(map.grids().stats().grids_unloaded, 2);
    }

    #[test]
    fn players_nearby_block_unload() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let coord = GridCoord::new(30, 30).unwrap();
        let neighbour = GridCoord::new(31, 30).unwrap();
        map.ensure_grid_loaded(neighbour);
        map.add_entity(EntityDesc::player(at_grid(coord))).unwrap();

        assert!(!map.can_unload(coord));
        // Grid centre is far more than visibility away from the next grid.
        assert!(map.can_unload(neighbour));
    }

    #[test]
    fn far_visible_creatures_block_unload_but_pets_do_not() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let coord = GridCoord::new(20, 20).unwrap();
        let pet = map
            .add_entity(EntityDesc::new(EntityKind::Creature, at_grid(coord)).with_flags(EntityFlags::PET))
            .unwrap();
        assert!(map.can_unload(coord));

        let giant = map
            .add_entity(
                EntityDesc::new(EntityKind::Creature, at_grid(coord)).with_flags(EntityFlags::WORLD_OBJECT),
            )
            .unwrap();
        assert!(!map.can_unload(coord));
        assert!(!map.unload_grid(coord, false));

        assert!(map.unload_grid(coord, true));
        assert!(map.entity(pet).is_none());
        assert!(map.entity(giant).is_none());
    }

    #[test]
    fn dead_far_visible_creature_does_not_block_unload() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let coord = GridCoord::new(20, 20).unwrap();
        let giant = map
            .add_entity(
                EntityDesc::new(EntityKind::Creature, at_grid(coord)).with_flags(EntityFlags::WORLD_OBJECT),
            )
            .unwrap();
        assert!(!map.can_unload(coord));

        map.kill(giant).unwrap();
        assert!(!map.entity(giant).unwrap().is_alive());
        assert!(map.can_unload(coord));
        assert!(map.unload_grid(coord, false));
        assert!(map.entity(giant).is_none());
    }

    #[test]
    fn idle_grids_expire_and_unload() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let coord = GridCoord::new(10, 10).unwrap();
        map.ensure_grid_loaded(coord);

        map.update(Duration::from_millis(100));
        assert_eq!(map.grids().get(coord).unwrap().state(), GridState::Removal);
        map.update(Duration::from_millis(500));
        assert!(map.grids().is_created(coord));
        map.update(Duration::from_millis(600));
        assert!(!map.grids().is_created(coord));
    }

    #[test]
    fn player_grids_stay_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let coord = GridCoord::new(30, 30).unwrap();
        let player = map.add_entity(EntityDesc::player(at_grid(coord))).unwrap();

        for _ in 0..30 {
            map.update(Duration::from_millis(250));
        }
        assert_eq!(map.grids().get(coord).unwrap().state(), GridState::Active);

        map.remove_entity(player).unwrap();
        for _ in 0..30 {
            map.update(Duration::from_millis(250));
        }
        assert!(!map.grids().is_created(coord));
    }

    #[test]
    fn explicit_lock_keeps_grid() {
        let dir = tempfile::tempdir().unwrap();
        let config = MapConfig {
            grid_unload: false,
            ..fast_config()
        };
        let mut map = Map::new(MAP, 1, config, services(dir.path()));
        let coord = GridCoord::new(10, 10).unwrap();
        map.ensure_grid_loaded(coord);
        for _ in 0..20 {
            map.update(Duration::from_millis(500));
        }
        assert!(map.grids().is_created(coord));

        assert!(map.set_grid_unload_lock(coord, false));
        for _ in 0..20 {
            map.update(Duration::from_millis(500));
        }
        assert!(!map.grids().is_created(coord));
    }

    #[test]
    fn active_pin_keeps_home_grid_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let home = GridCoord::new(30, 30).unwrap();
        let far = GridCoord::new(40, 40).unwrap();
        let id = map
            .add_entity(EntityDesc::new(EntityKind::Creature, at_grid(home)).with_flags(EntityFlags::ACTIVE))
            .unwrap();
        map.move_entity(id, at_grid(far)).unwrap();
        for _ in 0..40 {
            map.update(Duration::from_millis(250));
        }
        assert_eq!(map.entity(id).unwrap().grid(), far);
        assert!(map.grids().is_created(home));
        assert_eq!(map.grids().get(far).unwrap().state(), GridState::Active);
    }

    #[test]
    fn evacuation_returns_wanderers_home() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let home = GridCoord::new(30, 30).unwrap();
        let away = GridCoord::new(33, 30).unwrap();
        let home_spot = at_grid(home);
        let wolf = map
            .add_entity(EntityDesc::new(EntityKind::Creature, home_spot).with_spawn(
                worldgrid_common::SpawnKey::creature(1),
                60,
            ))
            .unwrap();
        map.ensure_grid_loaded(away);
        map.move_entity(wolf, at_grid(away)).unwrap();
        map.drain_relocations();
        assert_eq!(map.entity(wolf).unwrap().grid(), away);

        assert!(map.unload_grid(away, false));
        let entity = map.entity(wolf).unwrap();
        assert_eq!(entity.grid(), home);
        assert_eq!(entity.placement(), home_spot);
        assert!(map.grids().cell(entity.cell()).unwrap().contains(wolf));
    }

    #[test]
    fn load_grids_in_range_counts_new_grids() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let corner = GridCoord::new(30, 30).unwrap();
        let first = corner.first_cell();
        // Point at a grid corner touches four grids.
        let x = (first.x as f32 - worldgrid_common::CENTER_GRID_CELL_ID as f32)
            * worldgrid_common::SIZE_OF_GRID_CELL;
        let y = (first.y as f32 - worldgrid_common::CENTER_GRID_CELL_ID as f32)
            * worldgrid_common::SIZE_OF_GRID_CELL;
        assert_eq!(map.load_grids_in_range(x + 1.0, y + 1.0, 10.0), 4);
        assert_eq!(map.load_grids_in_range(x + 1.0, y + 1.0, 10.0), 0);
    }

    #[test]
    fn unload_all_releases_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let coord = GridCoord::new(30, 30).unwrap();
        write_flat_tile(dir.path(), coord, 1.0);
        let player: EntityId = map.add_entity(EntityDesc::player(at_grid(coord))).unwrap();
        map.add_entity(
            EntityDesc::new(EntityKind::Creature, Placement::new(40.0, 40.0, 0.0, 0.0))
                .with_flags(EntityFlags::ACTIVE),
        )
        .unwrap();
        map.update(Duration::from_millis(100));

        map.unload_all();
        assert!(map.entity(player).is_none());
        assert_eq!(map.entity_count(), 0);
        assert_eq!(map.grids().stats().live_grids, 0);
        assert_eq!(map.terrain().ref_count(coord.tile()), 0);
    }
}
