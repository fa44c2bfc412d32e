//! Map coordinate systems.
//!
//! A map is a square of `MAX_NUMBER_OF_GRIDS` × `MAX_NUMBER_OF_GRIDS` grids,
//! each split into `MAX_NUMBER_OF_CELLS` × `MAX_NUMBER_OF_CELLS` cells. World
//! origin sits at the centre of the map. Grid and cell coordinates grow with
//! world x/y; terrain tiles are numbered the other way round (`63 - grid`).

use serde::{Deserialize, Serialize};

pub const MAX_NUMBER_OF_GRIDS: u32 = 64;
pub const SIZE_OF_GRIDS: f32 = 533.333_3;
pub const CENTER_GRID_ID: u32 = MAX_NUMBER_OF_GRIDS / 2;
pub const CENTER_GRID_OFFSET: f32 = SIZE_OF_GRIDS / 2.0;

pub const MAX_NUMBER_OF_CELLS: u32 = 8;
pub const SIZE_OF_GRID_CELL: f32 = SIZE_OF_GRIDS / MAX_NUMBER_OF_CELLS as f32;
pub const TOTAL_NUMBER_OF_CELLS_PER_MAP: u32 = MAX_NUMBER_OF_GRIDS * MAX_NUMBER_OF_CELLS;
pub const CENTER_GRID_CELL_ID: u32 = TOTAL_NUMBER_OF_CELLS_PER_MAP / 2;

pub const MAP_SIZE: f32 = SIZE_OF_GRIDS * MAX_NUMBER_OF_GRIDS as f32;
pub const MAP_HALFSIZE: f32 = MAP_SIZE / 2.0;

/// Heightfield resolution of one terrain tile (inner samples per edge).
pub const MAP_RESOLUTION: usize = 128;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordError {
    #[error("position ({x}, {y}) is outside the map")]
    OutOfBounds { x: f32, y: f32 },
    #[error("grid coordinate [{x}, {y}] is outside 0..{MAX_NUMBER_OF_GRIDS}")]
    InvalidGrid { x: u32, y: u32 },
}

/// Whether a world position lies strictly inside the playable map square.
pub fn is_valid_map_coord(x: f32, y: f32) -> bool {
    x.is_finite() && y.is_finite() && x.abs() < MAP_HALFSIZE - 0.5 && y.abs() < MAP_HALFSIZE - 0.5
}

fn scaled_index(value: f32, size: f32, center: u32) -> i64 {
    (value as f64 / size as f64 + center as f64).floor() as i64
}

/// Grid coordinate: which of the 64×64 grids a position belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: u32,
    pub y: u32,
}

impl GridCoord {
    pub fn new(x: u32, y: u32) -> Result<Self, CoordError> {
        if x >= MAX_NUMBER_OF_GRIDS || y >= MAX_NUMBER_OF_GRIDS {
            return Err(CoordError::InvalidGrid { x, y });
        }
        Ok(Self { x, y })
    }

    pub fn from_position(x: f32, y: f32) -> Result<Self, CoordError> {
        if !is_valid_map_coord(x, y) {
            return Err(CoordError::OutOfBounds { x, y });
        }
        let gx = scaled_index(x, SIZE_OF_GRIDS, CENTER_GRID_ID);
        let gy = scaled_index(y, SIZE_OF_GRIDS, CENTER_GRID_ID);
        let limit = MAX_NUMBER_OF_GRIDS as i64;
        if !(0..limit).contains(&gx) || !(0..limit).contains(&gy) {
            return Err(CoordError::OutOfBounds { x, y });
        }
        Ok(Self {
            x: gx as u32,
            y: gy as u32,
        })
    }

    /// Dense index into a 64×64 array.
    pub fn index(self) -> usize {
        (self.x * MAX_NUMBER_OF_GRIDS + self.y) as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        let x = (index / MAX_NUMBER_OF_GRIDS as usize) as u32;
        let y = (index % MAX_NUMBER_OF_GRIDS as usize) as u32;
        Self::new(x, y).ok()
    }

    /// Terrain tile number holding this grid's heightfield.
    pub fn tile(self) -> TileCoord {
        TileCoord {
            x: MAX_NUMBER_OF_GRIDS - 1 - self.x,
            y: MAX_NUMBER_OF_GRIDS - 1 - self.y,
        }
    }

    /// Lowest cell of this grid.
    pub fn first_cell(self) -> CellCoord {
        CellCoord {
            x: self.x * MAX_NUMBER_OF_CELLS,
            y: self.y * MAX_NUMBER_OF_CELLS,
        }
    }

    /// World-space centre of the grid, handy for placing test objects.
    pub fn center(self) -> (f32, f32) {
        let half = CENTER_GRID_ID as f32;
        (
            (self.x as f32 - half + 0.5) * SIZE_OF_GRIDS,
            (self.y as f32 - half + 0.5) * SIZE_OF_GRIDS,
        )
    }
}

/// Terrain tile number as used in tile file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn from_position(x: f32, y: f32) -> Result<Self, CoordError> {
        GridCoord::from_position(x, y).map(GridCoord::tile)
    }

    pub fn grid(self) -> GridCoord {
        GridCoord {
            x: MAX_NUMBER_OF_GRIDS - 1 - self.x,
            y: MAX_NUMBER_OF_GRIDS - 1 - self.y,
        }
    }

    pub fn index(self) -> usize {
        (self.x * MAX_NUMBER_OF_GRIDS + self.y) as usize
    }
}

/// Cell coordinate across the whole map (0..512 on each axis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: u32,
    pub y: u32,
}

impl CellCoord {
    pub fn new(x: u32, y: u32) -> Result<Self, CoordError> {
        if x >= TOTAL_NUMBER_OF_CELLS_PER_MAP || y >= TOTAL_NUMBER_OF_CELLS_PER_MAP {
            return Err(CoordError::InvalidGrid {
                x: x / MAX_NUMBER_OF_CELLS,
                y: y / MAX_NUMBER_OF_CELLS,
            });
        }
        Ok(Self { x, y })
    }

    pub fn from_position(x: f32, y: f32) -> Result<Self, CoordError> {
        if !is_valid_map_coord(x, y) {
            return Err(CoordError::OutOfBounds { x, y });
        }
        let (cx, cy) = Self::unclamped(x, y);
        let limit = TOTAL_NUMBER_OF_CELLS_PER_MAP as i64;
        if !(0..limit).contains(&cx) || !(0..limit).contains(&cy) {
            return Err(CoordError::OutOfBounds { x, y });
        }
        Ok(Self {
            x: cx as u32,
            y: cy as u32,
        })
    }

    fn unclamped(x: f32, y: f32) -> (i64, i64) {
        (
            scaled_index(x, SIZE_OF_GRID_CELL, CENTER_GRID_CELL_ID),
            scaled_index(y, SIZE_OF_GRID_CELL, CENTER_GRID_CELL_ID),
        )
    }

    /// Cell of a position, clamped onto the map edge.
    pub fn from_position_clamped(x: f32, y: f32) -> Self {
        let (cx, cy) = Self::unclamped(x, y);
        let max = TOTAL_NUMBER_OF_CELLS_PER_MAP as i64 - 1;
        Self {
            x: cx.clamp(0, max) as u32,
            y: cy.clamp(0, max) as u32,
        }
    }

    pub fn grid(self) -> GridCoord {
        GridCoord {
            x: self.x / MAX_NUMBER_OF_CELLS,
            y: self.y / MAX_NUMBER_OF_CELLS,
        }
    }

    /// Position of the cell inside its grid (0..8 on each axis).
    pub fn local(self) -> (u32, u32) {
        (self.x % MAX_NUMBER_OF_CELLS, self.y % MAX_NUMBER_OF_CELLS)
    }

    pub fn same_grid(self, other: CellCoord) -> bool {
        self.grid() == other.grid()
    }
}

/// Inclusive rectangle of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellArea {
    pub low: CellCoord,
    pub high: CellCoord,
}

impl CellArea {
    /// Cells touched by a square of `radius` around a position, clamped to the map.
    pub fn around(x: f32, y: f32, radius: f32) -> Self {
        if radius <= 0.0 {
            let center = CellCoord::from_position_clamped(x, y);
            return Self {
                low: center,
                high: center,
            };
        }
        Self {
            low: CellCoord::from_position_clamped(x - radius, y - radius),
            high: CellCoord::from_position_clamped(x + radius, y + radius),
        }
    }

    /// Cells of a grid padded by `padding` cells on every side, clamped to the map.
    pub fn of_grid(grid: GridCoord, padding: u32) -> Self {
        let first = grid.first_cell();
        let max = TOTAL_NUMBER_OF_CELLS_PER_MAP - 1;
        Self {
            low: CellCoord {
                x: first.x.saturating_sub(padding),
                y: first.y.saturating_sub(padding),
            },
            high: CellCoord {
                x: (first.x + MAX_NUMBER_OF_CELLS - 1 + padding).min(max),
                y: (first.y + MAX_NUMBER_OF_CELLS - 1 + padding).min(max),
            },
        }
    }

    pub fn contains(&self, cell: CellCoord) -> bool {
        (self.low.x..=self.high.x).contains(&cell.x) && (self.low.y..=self.high.y).contains(&cell.y)
    }

    pub fn cells(&self) -> impl Iterator<Item = CellCoord> + '_ {
        (self.low.x..=self.high.x)
            .flat_map(move |x| (self.low.y..=self.high.y).map(move |y| CellCoord { x, y }))
    }

    /// Distinct grids covered by this area.
    pub fn grids(&self) -> impl Iterator<Item = GridCoord> + '_ {
        let low = self.low.grid();
        let high = self.high.grid();
        (low.x..=high.x).flat_map(move |x| (low.y..=high.y).map(move |y| GridCoord { x, y }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_is_map_centre() {
        let grid = GridCoord::from_position(0.0, 0.0).unwrap();
        assert_eq!(grid, GridCoord { x: 32, y: 32 });
        let cell = CellCoord::from_position(0.0, 0.0).unwrap();
        assert_eq!(cell, CellCoord { x: 256, y: 256 });
        assert_eq!(cell.grid(), grid);
    }

    #[test]
    fn negative_positions_land_below_centre() {
        let grid = GridCoord::from_position(-10.0, -600.0).unwrap();
        assert_eq!(grid, GridCoord { x: 31, y: 30 });
    }

    #[test]
    fn tile_numbering_is_mirrored() {
        let grid = GridCoord::new(30, 30).unwrap();
        assert_eq!(grid.tile(), TileCoord { x: 33, y: 33 });
        assert_eq!(grid.tile().grid(), grid);
    }

    #[test]
    fn grid_centre_maps_back_to_grid() {
        let grid = GridCoord::new(30, 41).unwrap();
        let (x, y) = grid.center();
        assert_eq!(GridCoord::from_position(x, y).unwrap(), grid);
        assert_eq!(CellCoord::from_position(x, y).unwrap().grid(), grid);
    }

    #[test]
    fn positions_outside_map_are_rejected() {
        assert!(GridCoord::from_position(MAP_HALFSIZE, 0.0).is_err());
        assert!(CellCoord::from_position(0.0, f32::NAN).is_err());
        assert!(GridCoord::new(64, 0).is_err());
    }

    #[test]
    fn cell_area_around_point() {
        let area = CellArea::around(0.0, 0.0, SIZE_OF_GRID_CELL * 1.5);
        assert_eq!(area.low, CellCoord { x: 254, y: 254 });
        assert_eq!(area.high, CellCoord { x: 257, y: 257 });
        assert_eq!(area.cells().count(), 16);
        assert_eq!(area.grids().count(), 4);
    }

    #[test]
    fn padded_grid_area_is_clamped() {
        let area = CellArea::of_grid(GridCoord { x: 0, y: 63 }, 3);
        assert_eq!(area.low, CellCoord { x: 0, y: 501 });
        assert_eq!(area.high, CellCoord { x: 10, y: 511 });
        assert!(area.contains(CellCoord { x: 10, y: 505 }));
        assert!(!area.contains(CellCoord { x: 11, y: 505 }));
    }

    #[test]
    fn grid_index_roundtrip() {
        let grid = GridCoord::new(12, 57).unwrap();
        assert_eq!(GridCoord::from_index(grid.index()), Some(grid));
    }
}
