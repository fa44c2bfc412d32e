use std::fs;
use std::io;
use std::path::Path;

use glam::Vec3;
use worldgrid_common::{
    CENTER_GRID_ID, CENTER_GRID_OFFSET, MAP_HALFSIZE, MAP_RESOLUTION, SIZE_OF_GRIDS, TileCoord,
};

use crate::error::TileError;
use crate::format::{
    ACCEPTED_VERSIONS, AREA_FLAG_UNIFORM, AREA_MAGIC, ByteReader, CELLS_PER_TILE, FileHeader,
    HEIGHT_MAGIC, HOLES_SIZE, HeightFlags, LIQUID_MAGIC, LiquidHeaderFlags, MAP_MAGIC, V8_SIZE,
    V9_SIZE, section_bytes,
};
use crate::liquid::{
    AreaTable, LIQUID_OVERRIDE_ENTRY_LIMIT, LiquidData, LiquidQuery, LiquidStatus, LiquidTypeMask,
    OCEAN_FLOOR_TOLERANCE,
};

/// Height reported where no terrain exists (holes, missing height data).
pub const INVALID_HEIGHT: f32 = -100_000.0;
/// Flight floor used when a tile carries no bounding planes.
pub const DEFAULT_MIN_HEIGHT: f32 = -500.0;

/// Heightfield storage variant, fixed when the tile is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeightEncoding {
    Flat,
    Int8,
    Int16,
    Float,
}

#[derive(Debug, Clone)]
enum HeightSamples {
    Flat,
    Float {
        v9: Box<[f32]>,
        v8: Box<[f32]>,
    },
    Int16 {
        v9: Box<[u16]>,
        v8: Box<[u16]>,
        multiplier: f32,
    },
    Int8 {
        v9: Box<[u8]>,
        v8: Box<[u8]>,
        multiplier: f32,
    },
}

#[derive(Debug, Clone)]
struct HeightField {
    /// Flat height, and the base of quantized encodings.
    grid_height: f32,
    grid_max_height: f32,
    samples: HeightSamples,
}

#[derive(Debug, Clone)]
enum AreaField {
    Uniform(u16),
    Table(Box<[u16]>),
}

#[derive(Debug, Clone)]
struct LiquidField {
    global_entry: u16,
    global_flags: LiquidTypeMask,
    entries: Option<Box<[u16]>>,
    flags: Option<Box<[u8]>>,
    offset_x: u8,
    offset_y: u8,
    width: u8,
    height: u8,
    level: f32,
    levels: Option<Box<[f32]>>,
}

impl LiquidField {
    /// Liquid surface at a tile-local sample, `None` outside the stored window.
    fn level_at(&self, row: usize, col: usize) -> Option<f32> {
        let lx = row.checked_sub(self.offset_x as usize)?;
        let ly = col.checked_sub(self.offset_y as usize)?;
        if lx >= self.width as usize || ly >= self.height as usize {
            return None;
        }
        match &self.levels {
            Some(levels) => levels.get(lx * self.height as usize + ly).copied(),
            None => Some(self.level),
        }
    }
}

/// Minimum (and maximum) flight heights on a 3×3 grid across the tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlightBounds {
    pub max: [i16; 9],
    pub min: [i16; 9],
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Plane {
    normal: Vec3,
    distance: f32,
}

impl Plane {
    fn through(a: Vec3, b: Vec3, c: Vec3) -> Self {
        let normal = (b - a).cross(c - a).normalize_or_zero();
        Self {
            normal,
            distance: normal.dot(a),
        }
    }

    /// Height where a vertical line at (x, y) meets the plane.
    fn height_at(&self, x: f32, y: f32) -> Option<f32> {
        if self.normal.z.abs() <= f32::EPSILON {
            return None;
        }
        Some((self.distance - self.normal.x * x - self.normal.y * y) / self.normal.z)
    }
}

/// Grid-relative (x, y) of the nine flight bound samples.
const BOUND_GRID_COORDS: [(f32, f32); 9] = [
    (0.0, 0.0),
    (0.0, -266.666_66),
    (0.0, -533.333_3),
    (-266.666_66, 0.0),
    (-266.666_66, -266.666_66),
    (-266.666_66, -533.333_3),
    (-533.333_3, 0.0),
    (-533.333_3, -266.666_66),
    (-533.333_3, -533.333_3),
];

/// Bound sample triples forming the eight triangles around the centre sample.
const BOUND_PLANE_INDICES: [[usize; 3]; 8] = [
    [3, 0, 4],
    [0, 1, 4],
    [1, 2, 4],
    [2, 5, 4],
    [5, 8, 4],
    [8, 7, 4],
    [7, 6, 4],
    [6, 3, 4],
];

fn min_height_planes(min: &[i16; 9]) -> [Plane; 8] {
    let corner = |i: usize| {
        let (x, y) = BOUND_GRID_COORDS[i];
        Vec3::new(x, y, f32::from(min[i]))
    };
    BOUND_PLANE_INDICES.map(|[a, b, c]| Plane::through(corner(a), corner(b), corner(c)))
}

/// Tile-local heightfield position of a world coordinate.
#[derive(Debug, Clone, Copy)]
struct LocalSample {
    row: usize,
    col: usize,
    fx: f32,
    fy: f32,
}

impl LocalSample {
    fn of(x: f32, y: f32) -> Self {
        let lx = MAP_RESOLUTION as f32 * (CENTER_GRID_ID as f32 - x / SIZE_OF_GRIDS);
        let ly = MAP_RESOLUTION as f32 * (CENTER_GRID_ID as f32 - y / SIZE_OF_GRIDS);
        let xi = lx as i32;
        let yi = ly as i32;
        let mask = MAP_RESOLUTION as i32 - 1;
        Self {
            row: (xi & mask) as usize,
            col: (yi & mask) as usize,
            fx: lx - xi as f32,
            fy: ly - yi as f32,
        }
    }

    /// Index into 16×16 per-cell tables.
    fn cell_index(&self) -> usize {
        (self.row >> 3) * CELLS_PER_TILE + (self.col >> 3)
    }
}

/// Interpolate inside one heightfield square split into four triangles
/// around the fine centre sample.
fn interpolate<T: Copy + Into<f32>>(v9: &[T], v8: &[T], at: LocalSample) -> f32 {
    let LocalSample { row, col, fx, fy } = at;
    let h = |r: usize, c: usize| -> f32 { v9[r * V9_SIZE + c].into() };
    let center: f32 = v8[row * V8_SIZE + col].into();
    let h5 = 2.0 * center;

    let (a, b, c) = if fx + fy < 1.0 {
        if fx > fy {
            let h1 = h(row, col);
            let h2 = h(row + 1, col);
            (h2 - h1, h5 - h1 - h2, h1)
        } else {
            let h1 = h(row, col);
            let h3 = h(row, col + 1);
            (h5 - h1 - h3, h3 - h1, h1)
        }
    } else if fx > fy {
        let h2 = h(row + 1, col);
        let h4 = h(row + 1, col + 1);
        (h2 + h4 - h5, h4 - h2, h5 - h4)
    } else {
        let h3 = h(row, col + 1);
        let h4 = h(row + 1, col + 1);
        (h4 - h3, h3 + h4 - h5, h5 - h4)
    };
    a * fx + b * fy + c
}

/// World position of a tile-local heightfield coordinate.
///
/// `row` runs along world x and `col` along world y, both in sample units
/// (0..128). Fractional values address points between samples.
pub fn sample_position(tile: TileCoord, row: f32, col: f32) -> (f32, f32) {
    let res = MAP_RESOLUTION as f64;
    let along = |t: u32, v: f32| {
        ((CENTER_GRID_ID as f64 - (t as f64 * res + v as f64) / res) * SIZE_OF_GRIDS as f64) as f32
    };
    (along(tile.x, row), along(tile.y, col))
}

/// One decoded terrain tile. Immutable after loading.
#[derive(Debug, Clone)]
pub struct TerrainTile {
    version: u32,
    build: u32,
    area: AreaField,
    height: Option<HeightField>,
    flight_bounds: Option<FlightBounds>,
    min_planes: Option<[Plane; 8]>,
    liquid: Option<LiquidField>,
    holes: Option<Box<[u8]>>,
}

impl TerrainTile {
    /// Read and decode a tile file.
    pub fn load(path: &Path) -> Result<Self, TileError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(TileError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(TileError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::decode(&bytes, path)
    }

    /// Decode a tile held in memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TileError> {
        Self::decode(bytes, Path::new("<memory>"))
    }

    fn decode(bytes: &[u8], path: &Path) -> Result<Self, TileError> {
        let mut reader = ByteReader::new(bytes, path);
        let header = FileHeader::read(&mut reader)?;
        if header.magic != MAP_MAGIC || !ACCEPTED_VERSIONS.contains(&header.version) {
            return Err(TileError::VersionMismatch {
                path: path.to_path_buf(),
                magic: header.magic,
                version: header.version,
            });
        }

        let area = if header.area.is_present() {
            decode_area(section_bytes(bytes, header.area, "area", path)?, path)?
        } else {
            AreaField::Uniform(0)
        };

        let (height, flight_bounds) = if header.height.is_present() {
            let (field, bounds) =
                decode_height(section_bytes(bytes, header.height, "height", path)?, path)?;
            (Some(field), bounds)
        } else {
            (None, None)
        };

        let liquid = if header.liquid.is_present() {
            Some(decode_liquid(
                section_bytes(bytes, header.liquid, "liquid", path)?,
                path,
            )?)
        } else {
            None
        };

        let holes = if header.holes.is_present() {
            let raw = section_bytes(bytes, header.holes, "holes", path)?;
            if raw.len() != HOLES_SIZE {
                return Err(TileError::corrupt(
                    path,
                    format!("holes section is {} bytes, expected {HOLES_SIZE}", raw.len()),
                ));
            }
            Some(Box::from(raw))
        } else {
            None
        };

        Ok(Self {
            version: header.version,
            build: header.build,
            area,
            height,
            min_planes: flight_bounds.as_ref().map(|b| min_height_planes(&b.min)),
            flight_bounds,
            liquid,
            holes,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn build(&self) -> u32 {
        self.build
    }

    /// `None` when the tile has no height section.
    pub fn encoding(&self) -> Option<HeightEncoding> {
        self.height.as_ref().map(|field| match field.samples {
            HeightSamples::Flat => HeightEncoding::Flat,
            HeightSamples::Float { .. } => HeightEncoding::Float,
            HeightSamples::Int16 { .. } => HeightEncoding::Int16,
            HeightSamples::Int8 { .. } => HeightEncoding::Int8,
        })
    }

    /// Base and maximum height recorded in the height header.
    pub fn height_bounds(&self) -> Option<(f32, f32)> {
        self.height
            .as_ref()
            .map(|field| (field.grid_height, field.grid_max_height))
    }

    pub fn flight_bounds(&self) -> Option<&FlightBounds> {
        self.flight_bounds.as_ref()
    }

    pub fn has_liquid(&self) -> bool {
        self.liquid.is_some()
    }

    pub fn has_holes(&self) -> bool {
        self.holes.is_some()
    }

    /// Whether the heightfield square at (row, col) is cut out.
    pub fn is_hole(&self, row: usize, col: usize) -> bool {
        let Some(holes) = &self.holes else {
            return false;
        };
        let cell_row = row / 8;
        let cell_col = col / 8;
        let byte = (cell_row * CELLS_PER_TILE + cell_col) * 8 + row % 8;
        holes
            .get(byte)
            .is_some_and(|bits| bits & (1u8 << (col % 8)) != 0)
    }

    /// Number of cut-out heightfield squares.
    pub fn hole_count(&self) -> u32 {
        self.holes
            .as_ref()
            .map_or(0, |holes| holes.iter().map(|b| b.count_ones()).sum())
    }

    /// Terrain height at a world position. `None` over holes or when the
    /// tile carries no height data.
    pub fn height(&self, x: f32, y: f32) -> Option<f32> {
        let field = self.height.as_ref()?;
        let at = LocalSample::of(x, y);
        if self.is_hole(at.row, at.col) {
            return None;
        }
        let value = match &field.samples {
            HeightSamples::Flat => field.grid_height,
            HeightSamples::Float { v9, v8 } => interpolate(v9, v8, at),
            HeightSamples::Int16 { v9, v8, multiplier } => {
                interpolate(v9, v8, at) * multiplier + field.grid_height
            }
            HeightSamples::Int8 { v9, v8, multiplier } => {
                interpolate(v9, v8, at) * multiplier + field.grid_height
            }
        };
        Some(value)
    }

    /// Area id at a world position.
    pub fn area_id(&self, x: f32, y: f32) -> u16 {
        match &self.area {
            AreaField::Uniform(id) => *id,
            AreaField::Table(table) => {
                let cells = CELLS_PER_TILE as f32;
                let lx = (cells * (CENTER_GRID_ID as f32 - x / SIZE_OF_GRIDS)) as i32;
                let ly = (cells * (CENTER_GRID_ID as f32 - y / SIZE_OF_GRIDS)) as i32;
                let mask = CELLS_PER_TILE as i32 - 1;
                let index = (lx & mask) as usize * CELLS_PER_TILE + (ly & mask) as usize;
                table.get(index).copied().unwrap_or(0)
            }
        }
    }

    /// Lowest allowed flight height, from the tile's bounding planes.
    pub fn min_height(&self, x: f32, y: f32) -> f32 {
        let Some(planes) = &self.min_planes else {
            return DEFAULT_MIN_HEIGHT;
        };

        let grid_x = (x / SIZE_OF_GRIDS + CENTER_GRID_ID as f32).floor() as i32;
        let grid_y = (y / SIZE_OF_GRIDS + CENTER_GRID_ID as f32).floor() as i32;
        let double_x = (-(x - MAP_HALFSIZE) / CENTER_GRID_OFFSET).floor() as i32;
        let double_y = (-(y - MAP_HALFSIZE) / CENTER_GRID_OFFSET).floor() as i32;

        let gx = x - (grid_x - CENTER_GRID_ID as i32 + 1) as f32 * SIZE_OF_GRIDS;
        let gy = y - (grid_y - CENTER_GRID_ID as i32 + 1) as f32 * SIZE_OF_GRIDS;

        let quarter = if double_y & 1 != 0 {
            if double_x & 1 != 0 {
                4 + usize::from(gx <= gy)
            } else {
                2 + usize::from(-SIZE_OF_GRIDS - gx > gy)
            }
        } else if double_x & 1 != 0 {
            6 + usize::from(-SIZE_OF_GRIDS - gx <= gy)
        } else {
            usize::from(gx > gy)
        };

        planes[quarter]
            .height_at(gx, gy)
            .unwrap_or(DEFAULT_MIN_HEIGHT)
    }

    /// Liquid surface height, `None` without liquid or outside its window.
    pub fn liquid_level(&self, x: f32, y: f32) -> Option<f32> {
        let liquid = self.liquid.as_ref()?;
        let at = LocalSample::of(x, y);
        liquid.level_at(at.row, at.col)
    }

    /// Classify a point against the liquid at (x, y).
    ///
    /// Generic liquid entries are replaced by the area's override for the
    /// same sound bank, looking one level up the area chain when the area
    /// itself has none.
    pub fn liquid_status(
        &self,
        x: f32,
        y: f32,
        z: f32,
        required: Option<LiquidTypeMask>,
        collision_height: f32,
        areas: &dyn AreaTable,
    ) -> LiquidQuery {
        let Some(liquid) = &self.liquid else {
            return LiquidQuery::NO_WATER;
        };
        if liquid.global_flags.is_empty() && liquid.flags.is_none() {
            return LiquidQuery::NO_WATER;
        }

        let at = LocalSample::of(x, y);
        let cell = at.cell_index();
        let mut type_flags = match &liquid.flags {
            Some(flags) => LiquidTypeMask::from_bits_truncate(flags[cell]),
            None => liquid.global_flags,
        };
        let mut entry = u32::from(match &liquid.entries {
            Some(entries) => entries[cell],
            None => liquid.global_entry,
        });

        if let Some(liquid_type) = areas.liquid_type(entry) {
            type_flags &= LiquidTypeMask::DARK_WATER;
            let mut sound_bank = liquid_type.sound_bank;
            if entry < LIQUID_OVERRIDE_ENTRY_LIMIT {
                let replacement = self
                    .area_liquid_override(x, y, sound_bank, areas)
                    .and_then(|id| areas.liquid_type(id));
                if let Some(replacement) = replacement {
                    entry = replacement.id;
                    sound_bank = replacement.sound_bank;
                }
            }
            type_flags |= LiquidTypeMask::from_sound_bank(sound_bank);
        }

        if type_flags.is_empty() {
            return LiquidQuery::NO_WATER;
        }
        if required.is_some_and(|mask| !mask.intersects(type_flags)) {
            return LiquidQuery::NO_WATER;
        }

        let Some(level) = liquid.level_at(at.row, at.col) else {
            return LiquidQuery::NO_WATER;
        };
        let ground = self.height(x, y).unwrap_or(INVALID_HEIGHT);
        if level < ground || z < ground {
            return LiquidQuery::NO_WATER;
        }

        LiquidQuery {
            status: LiquidStatus::classify(level - z, collision_height),
            ocean_floor: z - ground <= OCEAN_FLOOR_TOLERANCE,
            data: Some(LiquidData {
                entry,
                type_flags,
                level,
                depth_level: ground,
            }),
        }
    }

    fn area_liquid_override(
        &self,
        x: f32,
        y: f32,
        sound_bank: u8,
        areas: &dyn AreaTable,
    ) -> Option<u32> {
        let area = areas.area(u32::from(self.area_id(x, y)))?;
        let mut id = area.liquid_override(sound_bank);
        if id == 0 && area.parent_area_id != 0 {
            id = areas
                .area(area.parent_area_id)
                .map_or(0, |parent| parent.liquid_override(sound_bank));
        }
        (id != 0).then_some(id)
    }
}

fn decode_area(bytes: &[u8], path: &Path) -> Result<AreaField, TileError> {
    let mut reader = ByteReader::new(bytes, path);
    reader.expect_magic(AREA_MAGIC, "area")?;
    let flags = reader.u16()?;
    let grid_area = reader.u16()?;
    if flags & AREA_FLAG_UNIFORM != 0 {
        return Ok(AreaField::Uniform(grid_area));
    }
    Ok(AreaField::Table(
        reader.u16_vec(CELLS_PER_TILE * CELLS_PER_TILE)?,
    ))
}

fn decode_height(
    bytes: &[u8],
    path: &Path,
) -> Result<(HeightField, Option<FlightBounds>), TileError> {
    let mut reader = ByteReader::new(bytes, path);
    reader.expect_magic(HEIGHT_MAGIC, "height")?;
    let flags = HeightFlags::from_bits_truncate(reader.u16()?);
    let grid_height = reader.f32()?;
    let grid_max_height = reader.f32()?;

    let v9_len = V9_SIZE * V9_SIZE;
    let v8_len = V8_SIZE * V8_SIZE;
    let samples = if flags.contains(HeightFlags::NO_HEIGHT) {
        HeightSamples::Flat
    } else if flags.contains(HeightFlags::AS_INT16) {
        HeightSamples::Int16 {
            v9: reader.u16_vec(v9_len)?,
            v8: reader.u16_vec(v8_len)?,
            multiplier: (grid_max_height - grid_height) / 65535.0,
        }
    } else if flags.contains(HeightFlags::AS_INT8) {
        HeightSamples::Int8 {
            v9: reader.u8_vec(v9_len)?,
            v8: reader.u8_vec(v8_len)?,
            multiplier: (grid_max_height - grid_height) / 255.0,
        }
    } else {
        HeightSamples::Float {
            v9: reader.f32_vec(v9_len)?,
            v8: reader.f32_vec(v8_len)?,
        }
    };

    let bounds = if flags.contains(HeightFlags::FLIGHT_BOUNDS) {
        let mut max = [0i16; 9];
        let mut min = [0i16; 9];
        for value in &mut max {
            *value = reader.i16()?;
        }
        for value in &mut min {
            *value = reader.i16()?;
        }
        Some(FlightBounds { max, min })
    } else {
        None
    };

    Ok((
        HeightField {
            grid_height,
            grid_max_height,
            samples,
        },
        bounds,
    ))
}

fn decode_liquid(bytes: &[u8], path: &Path) -> Result<LiquidField, TileError> {
    let mut reader = ByteReader::new(bytes, path);
    reader.expect_magic(LIQUID_MAGIC, "liquid")?;
    let flags = LiquidHeaderFlags::from_bits_truncate(reader.u16()?);
    let global_flags = LiquidTypeMask::from_bits_truncate(reader.u8()?);
    let global_entry = reader.u16()?;
    let offset_x = reader.u8()?;
    let offset_y = reader.u8()?;
    let width = reader.u8()?;
    let height = reader.u8()?;
    let level = reader.f32()?;

    let cells = CELLS_PER_TILE * CELLS_PER_TILE;
    let (entries, cell_flags) = if flags.contains(LiquidHeaderFlags::NO_TYPE) {
        (None, None)
    } else {
        (Some(reader.u16_vec(cells)?), Some(reader.u8_vec(cells)?))
    };
    let levels = if flags.contains(LiquidHeaderFlags::NO_HEIGHT) {
        None
    } else {
        Some(reader.f32_vec(width as usize * height as usize)?)
    };

    Ok(LiquidField {
        global_entry,
        global_flags,
        entries,
        flags: cell_flags,
        offset_x,
        offset_y,
        width,
        height,
        level,
        levels,
    })
}
