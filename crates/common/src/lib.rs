//! Shared types for the worldgrid engine: map coordinates, entity identity,
//! spawn keys.
//!
//! # Invariants
//! - Grid and cell coordinates are always inside the map bounds once constructed.
//! - Entity ids are unique across every map instance sharing one `IdGenerator`.

pub mod coords;
pub mod ids;
pub mod types;

pub use coords::{
    CellArea, CellCoord, CoordError, GridCoord, TileCoord, is_valid_map_coord, CENTER_GRID_CELL_ID,
    CENTER_GRID_ID, CENTER_GRID_OFFSET, MAP_HALFSIZE, MAP_RESOLUTION, MAP_SIZE,
    MAX_NUMBER_OF_CELLS, MAX_NUMBER_OF_GRIDS, SIZE_OF_GRIDS, SIZE_OF_GRID_CELL,
    TOTAL_NUMBER_OF_CELLS_PER_MAP,
};
pub use ids::IdGenerator;
pub use types::{
    EntityId, EntityKind, InstanceId, KindMask, MapId, Placement, SpawnKey, SpawnType, UnixTime,
};
