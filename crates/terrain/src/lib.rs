//! Terrain tiles: binary decoding, height/area/liquid sampling, and the
//! reference-counted registry that shares tiles between map instances.
//!
//! # Invariants
//! - A decoded tile is immutable; every query takes `&self`.
//! - Holes hide height for every encoding.
//! - A tile stays decoded while at least one lease on it is alive.

mod builder;
mod error;
pub mod format;
mod liquid;
mod registry;
mod tile;

pub use builder::{LiquidSpec, TileBuilder};
pub use error::TileError;
pub use liquid::{
    AreaEntry, AreaTable, AreaTableData, LiquidData, LiquidQuery, LiquidStatus, LiquidTypeEntry,
    LiquidTypeMask, StaticAreaTable,
};
pub use registry::{MapCatalog, TerrainInfo, TerrainRegistry, TileLease, tile_path};
pub use tile::{
    DEFAULT_MIN_HEIGHT, FlightBounds, HeightEncoding, INVALID_HEIGHT, TerrainTile, sample_position,
};

/// Collision height used when callers have no model-specific value.
pub const DEFAULT_COLLISION_HEIGHT: f32 = 2.031_28;

pub fn crate_info() -> &'static str {
    "worldgrid-terrain v0.1.0"
}
