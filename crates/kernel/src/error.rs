use worldgrid_common::{CoordError, EntityId, EntityKind, InstanceId, MapId, SpawnKey};

/// Errors surfaced by map operations.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error(transparent)]
    Coord(#[from] CoordError),

    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    #[error("entity {0} is not in world")]
    NotInWorld(EntityId),

    #[error("{kind:?} entities cannot be relocated")]
    UnsupportedRelocation { kind: EntityKind },

    #[error("no spawn template for {0}")]
    UnknownSpawn(SpawnKey),

    #[error("unknown spawn group {0}")]
    UnknownSpawnGroup(u32),

    #[error("spawn group {0} is a system group and cannot be toggled")]
    SystemSpawnGroup(u32),

    #[error("map {map} instance {instance} already exists")]
    DuplicateInstance { map: MapId, instance: InstanceId },

    #[error("invalid configuration in {source_name}: {message}")]
    Config {
        source_name: String,
        message: String,
    },
}
