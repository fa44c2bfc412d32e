//! Streaming: the per-map Grid→Cell spatial index and grid lifecycle.
//!
//! # Invariants
//! - A cell is only handed to visitors once its grid's object data is loaded.
//! - An entity sits in exactly one bucket of one cell.
//! - A grid in removal never unloads while an explicit or active lock is held.

mod grid;
mod timing;

pub use grid::{
    ACTIVE_CHECK_FACTOR, Bucket, Cell, Grid, GridIndex, GridState, GridStats, GridTransition,
};
pub use timing::{ExpiryTimer, TickTimer};

pub fn crate_info() -> &'static str {
    "worldgrid-stream v0.1.0"
}
