use worldgrid_common::{CellCoord, EntityId, EntityKind, Placement};

use super::Map;
use crate::error::MapError;
use crate::relocation::{Enqueue, PendingMove, RELOCATABLE_KINDS, RelocationQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Applied immediately.
    Moved,
    /// Applied when the relocation queue drains at the end of the tick.
    Queued,
    /// Dropped because the queue is draining.
    Ignored,
}

impl Map {
    /// Move an entity. Moves inside one cell and player moves are applied
    /// at once; other cross-cell moves wait for the relocation drain.
    pub fn move_entity(&mut self, id: EntityId, target: Placement) -> Result<MoveOutcome, MapError> {
        let entity = self.entities.get(&id).ok_or(MapError::UnknownEntity(id))?;
        if !entity.is_in_world() {
            return Err(MapError::NotInWorld(id));
        }
        let kind = entity.kind();
        let old_cell = entity.cell();
        let new_cell = CellCoord::from_position(target.x(), target.y())?;

        if kind == EntityKind::Player {
            self.relocate_to_cell(id, target, new_cell, true);
            return Ok(MoveOutcome::Moved);
        }
        if !RelocationQueue::supports(kind) {
            return Err(MapError::UnsupportedRelocation { kind });
        }
        if new_cell == old_cell {
            if let Some(entity) = self.entities.get_mut(&id) {
                entity.set_position(target, new_cell);
            }
            self.relocation.supersede(id);
            return Ok(MoveOutcome::Moved);
        }
        Ok(match self.relocation.request(id, target) {
            Enqueue::Queued | Enqueue::Updated => MoveOutcome::Queued,
            Enqueue::Ignored => MoveOutcome::Ignored,
        })
    }

    /// Apply every queued move, kind by kind. Entities that cannot reach
    /// their target go back to their respawn point, or are removed.
    pub fn drain_relocations(&mut self) -> usize {
        self.relocation.begin_drain();
        let mut applied = 0;
        for kind in RELOCATABLE_KINDS {
            for pending in self.relocation.take(kind) {
                self.apply_move(pending);
                applied += 1;
            }
        }
        self.relocation.end_drain();
        applied
    }

    pub fn pending_relocations(&self) -> usize {
        self.relocation.len()
    }

    fn apply_move(&mut self, pending: PendingMove) {
        let PendingMove { id, target } = pending;
        let Some(entity) = self.entities.get(&id) else {
            return;
        };
        if !entity.is_in_world() {
            return;
        }
        let force_load = entity.can_force_load_grids();
        if let Ok(cell) = CellCoord::from_position(target.x(), target.y()) {
            if self.relocate_to_cell(id, target, cell, force_load) {
                return;
            }
        }
        if self.respawn_relocation(id) {
            tracing::debug!(entity = %id, "destination grid not loaded, returned to respawn point");
            return;
        }
        tracing::debug!(entity = %id, "no loaded grid to move into, removing");
        self.queue_removal(id);
    }

    /// Put an entity at `target` in `cell`. Unloaded destinations are
    /// loaded only with `force_load`.
    pub(super) fn relocate_to_cell(
        &mut self,
        id: EntityId,
        target: Placement,
        cell: CellCoord,
        force_load: bool,
    ) -> bool {
        let grid = cell.grid();
        if !self.grids.is_loaded(grid) {
            if !force_load {
                return false;
            }
            self.ensure_grid_loaded(grid);
        }
        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };
        let old_cell = entity.cell();
        let bucket = entity.bucket();
        let keeps_grid_active = entity.is_player() || entity.is_active();
        entity.set_position(target, cell);
        if old_cell != cell {
            if let Some(slot) = self.grids.cell_mut(old_cell) {
                slot.remove(id);
            }
            if let Some(slot) = self.grids.cell_mut(cell) {
                slot.insert(bucket, id);
            }
        }
        if keeps_grid_active && !old_cell.same_grid(cell) {
            if let Some(grid) = self.grids.get_mut(grid) {
                grid.activate();
            }
        }
        true
    }

    /// Send a creature or game object back to its respawn point, if that
    /// grid is loaded.
    pub(super) fn respawn_relocation(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.entities.get(&id) else {
            return false;
        };
        if !matches!(entity.kind(), EntityKind::Creature | EntityKind::GameObject) {
            return false;
        }
        let home = entity.home();
        let cell = entity.home_cell();
        if !self.grids.is_loaded(cell.grid()) {
            return false;
        }
        self.relocate_to_cell(id, home, cell, false)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::entity::{EntityDesc, EntityFlags};
    use crate::relocation::MoveState;
    use std::time::Duration;
    use worldgrid_common::{GridCoord, SpawnKey};

    fn creature_at(map: &mut Map, placement: Placement) -> EntityId {
        map.add_entity(EntityDesc::new(EntityKind::Creature, placement))
            .unwrap()
    }

    #[test]
    fn same_cell_move_applies_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let id = creature_at(&mut map, Placement::new(1.0, 1.0, 0.0, 0.0));
        let target = Placement::new(2.0, 2.0, 0.0, 1.0);
        assert_eq!(map.move_entity(id, target).unwrap(), MoveOutcome::Moved);
        assert_eq!(map.entity(id).unwrap().placement(), target);
        assert_eq!(map.pending_relocations(), 0);
    }

    #[test]
    fn cross_cell_move_waits_for_drain() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let start = Placement::new(1.0, 1.0, 0.0, 0.0);
        let id = creature_at(&mut map, start);
        let old_cell = map.entity(id).unwrap().cell();
        let target = Placement::new(150.0, 1.0, 0.0, 0.0);

        assert_eq!(map.move_entity(id, target).unwrap(), MoveOutcome::Queued);
        assert_eq!(map.move_entity(id, target).unwrap(), MoveOutcome::Queued);
        assert_eq!(map.pending_relocations(), 1);
        assert_eq!(map.entity(id).unwrap().placement(), start);
        assert!(map.grids().cell(old_cell).unwrap().contains(id));

        assert_eq!(map.drain_relocations(), 1);
        let entity = map.entity(id).unwrap();
        assert_eq!(entity.placement(), target);
        assert!(map.grids().cell(entity.cell()).unwrap().contains(id));
        assert!(!map.grids().cell(old_cell).unwrap().contains(id));
    }

    #[test]
    fn in_place_move_supersedes_queued_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let id = creature_at(&mut map, Placement::new(1.0, 1.0, 0.0, 0.0));
        map.move_entity(id, Placement::new(150.0, 1.0, 0.0, 0.0)).unwrap();
        let stay = Placement::new(3.0, 3.0, 0.0, 0.0);
        assert_eq!(map.move_entity(id, stay).unwrap(), MoveOutcome::Moved);
        assert_eq!(map.relocation.state(id), MoveState::Superseded);

        assert_eq!(map.drain_relocations(), 0);
        assert_eq!(map.entity(id).unwrap().placement(), stay);
    }

    #[test]
    fn players_move_at_once_and_load_grids() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let player = map.add_entity(EntityDesc::player(Placement::default())).unwrap();
        let far = GridCoord::new(50, 50).unwrap();
        assert_eq!(map.move_entity(player, at_grid(far)).unwrap(), MoveOutcome::Moved);
        assert_eq!(map.entity(player).unwrap().grid(), far);
        assert!(map.grids().is_loaded(far));
    }

    #[test]
    fn corpses_cannot_be_relocated() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let corpse = map
            .add_entity(EntityDesc::new(EntityKind::Corpse, Placement::default()))
            .unwrap();
        let err = map
            .move_entity(corpse, Placement::new(500.0, 0.0, 0.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, MapError::UnsupportedRelocation { kind: EntityKind::Corpse }));
    }

    #[test]
    fn blocked_move_falls_back_to_respawn_point() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let home = GridCoord::new(30, 30).unwrap();
        let spawn_at = at_grid(home);
        let id = map
            .add_entity(
                EntityDesc::new(EntityKind::Creature, spawn_at).with_spawn(SpawnKey::creature(5), 30),
            )
            .unwrap();
        // Wander a little inside the home grid, then try to leave for an unloaded grid.
        let nearby = Placement::new(spawn_at.x() + 100.0, spawn_at.y(), 0.0, 0.0);
        map.move_entity(id, nearby).unwrap();
        map.drain_relocations();
        assert_eq!(map.entity(id).unwrap().placement(), nearby);

        map.move_entity(id, at_grid(GridCoord::new(45, 45).unwrap())).unwrap();
        map.drain_relocations();
        let entity = map.entity(id).unwrap();
        assert_eq!(entity.placement(), spawn_at);
        assert!(map.grids().cell(entity.cell()).unwrap().contains(id));
        assert!(!map.grids().is_created(GridCoord::new(45, 45).unwrap()));
    }

    #[test]
    fn stranded_entities_are_removed_from_every_cell() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let home = GridCoord::new(30, 30).unwrap();
        let current = GridCoord::new(35, 30).unwrap();
        let target = GridCoord::new(40, 30).unwrap();

        let id = map
            .add_entity(EntityDesc::new(EntityKind::Creature, at_grid(home)).with_spawn(SpawnKey::creature(8), 30))
            .unwrap();
        map.ensure_grid_loaded(current);
        map.move_entity(id, at_grid(current)).unwrap();
        map.drain_relocations();
        let stale_cell = map.entity(id).unwrap().cell();
        assert!(map.unload_grid(home, true));
        assert!(!map.grids().is_loaded(home));
        assert!(map.entity(id).is_some());

        map.move_entity(id, at_grid(target)).unwrap();
        map.update(Duration::from_millis(10));

        assert!(map.entity(id).is_none());
        assert!(!map.grids().cell(stale_cell).unwrap().contains(id));
        for grid in map.grids().grids() {
            for (_, cell) in grid.cells() {
                assert!(!cell.contains(id));
            }
        }
    }

    #[test]
    fn pets_force_load_their_destination() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, fast_config(), services(dir.path()));
        let pet = map
            .add_entity(EntityDesc::new(EntityKind::Creature, Placement::default()).with_flags(EntityFlags::PET))
            .unwrap();
        let far = GridCoord::new(20, 20).unwrap();
        map.move_entity(pet, at_grid(far)).unwrap();
        map.drain_relocations();
        assert_eq!(map.entity(pet).unwrap().grid(), far);
    }
}
