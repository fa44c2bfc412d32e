use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use worldgrid_common::{CellCoord, EntityId, EntityKind, GridCoord, Placement, SpawnKey};
use worldgrid_stream::Bucket;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct EntityFlags: u16 {
        /// Stored in the world-object bucket (visible from afar).
        const WORLD_OBJECT = 1 << 0;
        /// Keeps its grid ticking and pins its respawn grid.
        const ACTIVE = 1 << 1;
        const PET = 1 << 2;
        /// Owned or controlled by a player; may pull grids in when moving.
        const PLAYER_OWNED = 1 << 3;
        /// Currently escorted by a player.
        const ESCORTED = 1 << 4;
    }
}

/// What to create. Ids are assigned by the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDesc {
    pub kind: EntityKind,
    pub placement: Placement,
    #[serde(default)]
    pub flags: EntityFlags,
    #[serde(default)]
    pub spawn: Option<SpawnOrigin>,
}

/// Link back to the persisted spawn an entity came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnOrigin {
    pub key: SpawnKey,
    /// Where the entity returns to; its grid is the respawn grid.
    pub home: Placement,
    pub respawn_delay_secs: u64,
}

impl EntityDesc {
    pub fn new(kind: EntityKind, placement: Placement) -> Self {
        Self {
            kind,
            placement,
            flags: EntityFlags::empty(),
            spawn: None,
        }
    }

    pub fn player(placement: Placement) -> Self {
        Self::new(EntityKind::Player, placement)
    }

    pub fn with_flags(mut self, flags: EntityFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_spawn(mut self, key: SpawnKey, respawn_delay_secs: u64) -> Self {
        self.spawn = Some(SpawnOrigin {
            key,
            home: self.placement,
            respawn_delay_secs,
        });
        self
    }
}

/// A live entity indexed by a map.
#[derive(Debug, Clone)]
pub struct Entity {
    id: EntityId,
    placement: Placement,
    cell: CellCoord,
    flags: EntityFlags,
    alive: bool,
    in_world: bool,
    spawn: Option<SpawnOrigin>,
    home: Placement,
    pinned_grid: Option<GridCoord>,
}

impl Entity {
    pub(crate) fn new(id: EntityId, desc: EntityDesc, cell: CellCoord) -> Self {
        let mut flags = desc.flags;
        if desc.kind == EntityKind::Player || flags.contains(EntityFlags::PET) {
            flags |= EntityFlags::WORLD_OBJECT;
        }
        let home = desc.spawn.map_or(desc.placement, |origin| origin.home);
        Self {
            id,
            placement: desc.placement,
            cell,
            flags,
            alive: true,
            in_world: true,
            spawn: desc.spawn,
            home,
            pinned_grid: None,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.id.kind()
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn cell(&self) -> CellCoord {
        self.cell
    }

    pub fn grid(&self) -> GridCoord {
        self.cell.grid()
    }

    pub fn flags(&self) -> EntityFlags {
        self.flags
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_in_world(&self) -> bool {
        self.in_world
    }

    pub fn is_player(&self) -> bool {
        self.kind() == EntityKind::Player
    }

    pub fn is_active(&self) -> bool {
        self.flags.contains(EntityFlags::ACTIVE)
    }

    pub fn is_pet(&self) -> bool {
        self.flags.contains(EntityFlags::PET)
    }

    pub fn is_escorted(&self) -> bool {
        self.flags.contains(EntityFlags::ESCORTED)
    }

    /// Active objects and player-controlled entities may load grids they walk into.
    pub fn can_force_load_grids(&self) -> bool {
        self.is_player()
            || self
                .flags
                .intersects(EntityFlags::ACTIVE | EntityFlags::PLAYER_OWNED | EntityFlags::PET)
    }

    pub fn bucket(&self) -> Bucket {
        if self.flags.contains(EntityFlags::WORLD_OBJECT) {
            Bucket::WorldObjects
        } else {
            Bucket::GridObjects
        }
    }

    pub fn spawn(&self) -> Option<&SpawnOrigin> {
        self.spawn.as_ref()
    }

    pub fn spawn_key(&self) -> Option<SpawnKey> {
        self.spawn.map(|origin| origin.key)
    }

    /// Respawn point: the spawn home, or where the entity was created.
    pub fn home(&self) -> Placement {
        self.home
    }

    pub fn home_cell(&self) -> CellCoord {
        CellCoord::from_position_clamped(self.home.x(), self.home.y())
    }

    pub fn home_grid(&self) -> GridCoord {
        self.home_cell().grid()
    }

    pub(crate) fn pinned_grid(&self) -> Option<GridCoord> {
        self.pinned_grid
    }

    pub(crate) fn set_pinned_grid(&mut self, grid: Option<GridCoord>) {
        self.pinned_grid = grid;
    }

    pub(crate) fn set_position(&mut self, placement: Placement, cell: CellCoord) {
        self.placement = placement;
        self.cell = cell;
    }

    pub(crate) fn set_alive(&mut self, alive: bool) {
        self.alive = alive;
    }

    pub(crate) fn set_in_world(&mut self, in_world: bool) {
        self.in_world = in_world;
    }

    pub(crate) fn set_flag(&mut self, flag: EntityFlags, on: bool) {
        self.flags.set(flag, on);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell() -> CellCoord {
        CellCoord::from_position(0.0, 0.0).unwrap()
    }

    #[test]
    fn players_and_pets_are_world_objects() {
        let player = Entity::new(
            EntityId::new(EntityKind::Player, 1),
            EntityDesc::player(Placement::default()),
            cell(),
        );
        assert_eq!(player.bucket(), Bucket::WorldObjects);
        assert!(player.can_force_load_grids());

        let pet = Entity::new(
            EntityId::new(EntityKind::Creature, 1),
            EntityDesc::new(EntityKind::Creature, Placement::default()).with_flags(EntityFlags::PET),
            cell(),
        );
        assert_eq!(pet.bucket(), Bucket::WorldObjects);

        let plain = Entity::new(
            EntityId::new(EntityKind::Creature, 2),
            EntityDesc::new(EntityKind::Creature, Placement::default()),
            cell(),
        );
        assert_eq!(plain.bucket(), Bucket::GridObjects);
        assert!(!plain.can_force_load_grids());
    }

    #[test]
    fn home_follows_spawn_origin() {
        let spawn_at = Placement::new(600.0, 0.0, 0.0, 0.0);
        let desc = EntityDesc::new(EntityKind::Creature, spawn_at).with_spawn(SpawnKey::creature(9), 30);
        let mut entity = Entity::new(EntityId::new(EntityKind::Creature, 1), desc, cell());
        let moved = Placement::new(-600.0, 0.0, 0.0, 0.0);
        entity.set_position(moved, CellCoord::from_position(-600.0, 0.0).unwrap());

        assert_eq!(entity.home(), spawn_at);
        assert_eq!(entity.home_grid(), GridCoord::from_position(600.0, 0.0).unwrap());
        assert_ne!(entity.grid(), entity.home_grid());
        assert_eq!(entity.spawn_key(), Some(SpawnKey::creature(9)));
    }
}
