use std::fmt;

use bitflags::bitflags;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Numeric map identifier (continent, dungeon, vehicle deck...).
pub type MapId = u32;

/// Instance number distinguishing several running copies of one map.
pub type InstanceId = u32;

/// Wall-clock game time in whole seconds since the unix epoch.
pub type UnixTime = u64;

/// Unique identifier for a live entity.
///
/// The top byte carries the [`EntityKind`], the remaining 56 bits a counter
/// handed out by [`crate::IdGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    const KIND_SHIFT: u32 = 56;

    pub fn new(kind: EntityKind, counter: u64) -> Self {
        Self(((kind as u64) << Self::KIND_SHIFT) | (counter & ((1 << Self::KIND_SHIFT) - 1)))
    }

    /// The entity kind encoded in the id.
    pub fn kind(self) -> EntityKind {
        EntityKind::from_index((self.0 >> Self::KIND_SHIFT) as usize).unwrap_or(EntityKind::Player)
    }

    /// The per-kind counter part of the id.
    pub fn counter(self) -> u64 {
        self.0 & ((1 << Self::KIND_SHIFT) - 1)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}-{}", self.kind(), self.counter())
    }
}

/// The closed set of entity kinds stored in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Player = 0,
    Creature = 1,
    GameObject = 2,
    DynamicObject = 3,
    AreaTrigger = 4,
    Corpse = 5,
    SceneObject = 6,
    Conversation = 7,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Player,
        EntityKind::Creature,
        EntityKind::GameObject,
        EntityKind::DynamicObject,
        EntityKind::AreaTrigger,
        EntityKind::Corpse,
        EntityKind::SceneObject,
        EntityKind::Conversation,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Single-bit mask selecting this kind.
    pub fn mask(self) -> KindMask {
        KindMask::from_bits_truncate(1 << self as u8)
    }

    /// Spawn type for kinds backed by persisted spawn data.
    pub fn spawn_type(self) -> Option<SpawnType> {
        match self {
            EntityKind::Creature => Some(SpawnType::Creature),
            EntityKind::GameObject => Some(SpawnType::GameObject),
            _ => None,
        }
    }
}

bitflags! {
    /// Kind filter used when visiting cell buckets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct KindMask: u8 {
        const PLAYER = 1 << 0;
        const CREATURE = 1 << 1;
        const GAME_OBJECT = 1 << 2;
        const DYNAMIC_OBJECT = 1 << 3;
        const AREA_TRIGGER = 1 << 4;
        const CORPSE = 1 << 5;
        const SCENE_OBJECT = 1 << 6;
        const CONVERSATION = 1 << 7;
    }
}

impl KindMask {
    pub fn matches(self, kind: EntityKind) -> bool {
        self.contains(kind.mask())
    }
}

/// Spawn data family. Ordering matters: it is the last tie-breaker of the
/// respawn queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpawnType {
    Creature,
    GameObject,
}

impl SpawnType {
    pub fn entity_kind(self) -> EntityKind {
        match self {
            SpawnType::Creature => EntityKind::Creature,
            SpawnType::GameObject => EntityKind::GameObject,
        }
    }
}

/// Identity of one persisted spawn point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpawnKey {
    pub kind: SpawnType,
    pub spawn_id: u64,
}

impl SpawnKey {
    pub fn creature(spawn_id: u64) -> Self {
        Self {
            kind: SpawnType::Creature,
            spawn_id,
        }
    }

    pub fn game_object(spawn_id: u64) -> Self {
        Self {
            kind: SpawnType::GameObject,
            spawn_id,
        }
    }
}

impl fmt::Display for SpawnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?},{})", self.kind, self.spawn_id)
    }
}

/// World placement: position plus facing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub position: Vec3,
    pub orientation: f32,
}

impl Placement {
    pub fn new(x: f32, y: f32, z: f32, orientation: f32) -> Self {
        Self {
            position: Vec3::new(x, y, z),
            orientation,
        }
    }

    pub fn x(&self) -> f32 {
        self.position.x
    }

    pub fn y(&self) -> f32 {
        self.position.y
    }

    pub fn z(&self) -> f32 {
        self.position.z
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: 0.0,
        }
    }
}
