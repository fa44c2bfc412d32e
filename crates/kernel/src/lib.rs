//! Map kernel: map instances, their entity index, relocation queue and
//! respawn scheduling, driven by a fixed per-tick order.
//!
//! # Invariants
//! - An in-world entity is indexed in exactly one cell, the one its position
//!   falls in, by the end of every tick.
//! - At most one pending respawn exists per spawn key; scheduling keeps the
//!   earlier time.
//! - Cross-cell moves of non-players are applied only by the relocation
//!   drain; requests made during the drain are dropped.
//! - Deferred callbacks run once per tick, after entity updates and
//!   relocation, before respawns.

pub mod config;
pub mod content;
pub mod entity;
pub mod error;
pub mod fleet;
pub mod map;
pub mod relocation;
pub mod respawn;
pub mod store;

pub use config::{MapConfig, RespawnConfig, RespawnMode};
pub use content::{
    ContentLoader, DEFAULT_SPAWN_GROUP, NoPools, PoolManager, RespawnLink, SpawnCatalog,
    SpawnCatalogData, SpawnGroup, SpawnGroupFlags, SpawnTemplate, SpawnTemplates, TemplateLoader,
};
pub use entity::{Entity, EntityDesc, EntityFlags, SpawnOrigin};
pub use error::MapError;
pub use fleet::MapFleet;
pub use map::{DeferredCallback, EntityDriver, Map, MapServices, MapStats, MoveOutcome};
pub use relocation::{Enqueue, MoveState, PendingMove, RelocationQueue};
pub use respawn::{
    DropReason, RespawnAction, RespawnGate, RespawnInfo, RespawnScheduler, ScheduleOutcome,
};
pub use store::{MemoryRespawnStore, RespawnStore, StoreError};

pub fn crate_info() -> &'static str {
    "worldgrid-kernel v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("kernel"));
    }
}
