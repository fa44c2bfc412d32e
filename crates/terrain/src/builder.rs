//! Encoder for the tile format, used by tooling and tests to produce tiles
//! the loader reads back.

use std::fs;
use std::path::Path;

use crate::error::TileError;
use crate::format::{
    AREA_FLAG_UNIFORM, AREA_MAGIC, CELLS_PER_TILE, FileHeader, HEIGHT_MAGIC, HOLES_SIZE,
    HeightFlags, LIQUID_MAGIC, LiquidHeaderFlags, MAP_MAGIC, MAP_VERSION_MAGIC, Section, V8_SIZE,
    V9_SIZE,
};
use crate::liquid::LiquidTypeMask;

const CELL_COUNT: usize = CELLS_PER_TILE * CELLS_PER_TILE;

#[derive(Debug, Clone)]
enum AreaLayer {
    Uniform(u16),
    Table(Vec<u16>),
}

#[derive(Debug, Clone)]
enum HeightLayer {
    Flat(f32),
    Float {
        v9: Vec<f32>,
        v8: Vec<f32>,
    },
    Int16 {
        base: f32,
        max: f32,
        v9: Vec<u16>,
        v8: Vec<u16>,
    },
    Int8 {
        base: f32,
        max: f32,
        v9: Vec<u8>,
        v8: Vec<u8>,
    },
}

/// Liquid section contents.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidSpec {
    pub entry: u16,
    pub flags: LiquidTypeMask,
    pub level: f32,
    pub offset_x: u8,
    pub offset_y: u8,
    pub width: u8,
    pub height: u8,
    /// Per-cell (entry, flags) overrides, 16×16 row-major.
    pub cells: Option<Vec<(u16, LiquidTypeMask)>>,
    /// `width × height` surface samples.
    pub levels: Option<Vec<f32>>,
}

impl LiquidSpec {
    /// One liquid type at one level across the whole tile.
    pub fn global(entry: u16, flags: LiquidTypeMask, level: f32) -> Self {
        Self {
            entry,
            flags,
            level,
            offset_x: 0,
            offset_y: 0,
            width: V8_SIZE as u8,
            height: V8_SIZE as u8,
            cells: None,
            levels: None,
        }
    }
}

/// Builds the bytes of one terrain tile.
#[derive(Debug, Clone)]
pub struct TileBuilder {
    version: u32,
    build: u32,
    area: AreaLayer,
    height: Option<HeightLayer>,
    flight_bounds: Option<([i16; 9], [i16; 9])>,
    liquid: Option<LiquidSpec>,
    holes: Option<Vec<u8>>,
}

impl Default for TileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TileBuilder {
    pub fn new() -> Self {
        Self {
            version: MAP_VERSION_MAGIC,
            build: 0,
            area: AreaLayer::Uniform(0),
            height: None,
            flight_bounds: None,
            liquid: None,
            holes: None,
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn build(mut self, build: u32) -> Self {
        self.build = build;
        self
    }

    pub fn uniform_area(mut self, area: u16) -> Self {
        self.area = AreaLayer::Uniform(area);
        self
    }

    /// 16×16 area ids, indexed `row * 16 + col`.
    pub fn area_table(mut self, areas: Vec<u16>) -> Self {
        self.area = AreaLayer::Table(areas);
        self
    }

    pub fn flat_height(mut self, height: f32) -> Self {
        self.height = Some(HeightLayer::Flat(height));
        self
    }

    /// Float samples: 129×129 corners then 128×128 centres, row-major.
    pub fn float_heights(mut self, v9: Vec<f32>, v8: Vec<f32>) -> Self {
        self.height = Some(HeightLayer::Float { v9, v8 });
        self
    }

    /// Float samples from a function of tile-local (row, col); centre
    /// samples are taken at `+0.5` on both axes.
    pub fn float_heights_from(self, f: impl Fn(f32, f32) -> f32) -> Self {
        let mut v9 = Vec::with_capacity(V9_SIZE * V9_SIZE);
        for row in 0..V9_SIZE {
            for col in 0..V9_SIZE {
                v9.push(f(row as f32, col as f32));
            }
        }
        let mut v8 = Vec::with_capacity(V8_SIZE * V8_SIZE);
        for row in 0..V8_SIZE {
            for col in 0..V8_SIZE {
                v8.push(f(row as f32 + 0.5, col as f32 + 0.5));
            }
        }
        self.float_heights(v9, v8)
    }

    /// 16-bit quantized samples spanning `base..=max`.
    pub fn int16_heights(mut self, base: f32, max: f32, v9: Vec<u16>, v8: Vec<u16>) -> Self {
        self.height = Some(HeightLayer::Int16 { base, max, v9, v8 });
        self
    }

    /// 8-bit quantized samples spanning `base..=max`.
    pub fn int8_heights(mut self, base: f32, max: f32, v9: Vec<u8>, v8: Vec<u8>) -> Self {
        self.height = Some(HeightLayer::Int8 { base, max, v9, v8 });
        self
    }

    /// Attach 3×3 max/min flight bounds. Requires a height layer.
    pub fn flight_bounds(mut self, max: [i16; 9], min: [i16; 9]) -> Self {
        self.flight_bounds = Some((max, min));
        self
    }

    pub fn liquid(mut self, liquid: LiquidSpec) -> Self {
        self.liquid = Some(liquid);
        self
    }

    /// Cut out the heightfield square at (row, col).
    pub fn hole(mut self, row: usize, col: usize) -> Self {
        let holes = self.holes.get_or_insert_with(|| vec![0; HOLES_SIZE]);
        let byte = ((row / 8) * CELLS_PER_TILE + col / 8) * 8 + row % 8;
        if let Some(bits) = holes.get_mut(byte) {
            *bits |= 1 << (col % 8);
        }
        self
    }

    /// Encode the tile.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TileError> {
        let mut out = vec![0u8; FileHeader::SIZE];
        let mut header = FileHeader {
            magic: MAP_MAGIC,
            version: self.version,
            build: self.build,
            area: Section::default(),
            height: Section::default(),
            liquid: Section::default(),
            holes: Section::default(),
        };

        header.area = append_section(&mut out, |buf| self.encode_area(buf))?;
        if self.height.is_some() {
            header.height = append_section(&mut out, |buf| self.encode_height(buf))?;
        } else if self.flight_bounds.is_some() {
            return Err(TileError::invalid_input(
                "flight bounds need a height layer",
            ));
        }
        if let Some(liquid) = &self.liquid {
            header.liquid = append_section(&mut out, |buf| encode_liquid(liquid, buf))?;
        }
        if let Some(holes) = &self.holes {
            header.holes = append_section(&mut out, |buf| {
                buf.extend_from_slice(holes);
                Ok(())
            })?;
        }

        let mut head = Vec::with_capacity(FileHeader::SIZE);
        header.write(&mut head);
        out[..FileHeader::SIZE].copy_from_slice(&head);
        Ok(out)
    }

    /// Encode and write the tile, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<(), TileError> {
        let bytes = self.to_bytes()?;
        let io_err = |source| TileError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, bytes).map_err(io_err)
    }

    fn encode_area(&self, buf: &mut Vec<u8>) -> Result<(), TileError> {
        put_u32(buf, AREA_MAGIC);
        match &self.area {
            AreaLayer::Uniform(area) => {
                put_u16(buf, AREA_FLAG_UNIFORM);
                put_u16(buf, *area);
            }
            AreaLayer::Table(areas) => {
                check_len("area table", areas.len(), CELL_COUNT)?;
                put_u16(buf, 0);
                put_u16(buf, 0);
                areas.iter().for_each(|a| put_u16(buf, *a));
            }
        }
        Ok(())
    }

    fn encode_height(&self, buf: &mut Vec<u8>) -> Result<(), TileError> {
        let Some(layer) = &self.height else {
            return Ok(());
        };
        let v9_len = V9_SIZE * V9_SIZE;
        let v8_len = V8_SIZE * V8_SIZE;
        let mut flags = HeightFlags::empty();
        if self.flight_bounds.is_some() {
            flags |= HeightFlags::FLIGHT_BOUNDS;
        }

        let mut samples = Vec::new();
        let (base, max) = match layer {
            HeightLayer::Flat(height) => {
                flags |= HeightFlags::NO_HEIGHT;
                (*height, *height)
            }
            HeightLayer::Float { v9, v8 } => {
                check_len("v9 heights", v9.len(), v9_len)?;
                check_len("v8 heights", v8.len(), v8_len)?;
                let (lo, hi) = v9
                    .iter()
                    .chain(v8.iter())
                    .fold((f32::MAX, f32::MIN), |(lo, hi), h| (lo.min(*h), hi.max(*h)));
                v9.iter().chain(v8.iter()).for_each(|h| put_f32(&mut samples, *h));
                (lo, hi)
            }
            HeightLayer::Int16 { base, max, v9, v8 } => {
                check_len("v9 heights", v9.len(), v9_len)?;
                check_len("v8 heights", v8.len(), v8_len)?;
                flags |= HeightFlags::AS_INT16;
                v9.iter().chain(v8.iter()).for_each(|h| put_u16(&mut samples, *h));
                (*base, *max)
            }
            HeightLayer::Int8 { base, max, v9, v8 } => {
                check_len("v9 heights", v9.len(), v9_len)?;
                check_len("v8 heights", v8.len(), v8_len)?;
                flags |= HeightFlags::AS_INT8;
                samples.extend(v9.iter().chain(v8.iter()));
                (*base, *max)
            }
        };

        put_u32(buf, HEIGHT_MAGIC);
        put_u16(buf, flags.bits());
        put_f32(buf, base);
        put_f32(buf, max);
        buf.extend_from_slice(&samples);
        if let Some((max_bounds, min_bounds)) = &self.flight_bounds {
            for value in max_bounds.iter().chain(min_bounds.iter()) {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
        Ok(())
    }
}

fn encode_liquid(liquid: &LiquidSpec, buf: &mut Vec<u8>) -> Result<(), TileError> {
    let mut flags = LiquidHeaderFlags::empty();
    if liquid.cells.is_none() {
        flags |= LiquidHeaderFlags::NO_TYPE;
    }
    if liquid.levels.is_none() {
        flags |= LiquidHeaderFlags::NO_HEIGHT;
    }

    put_u32(buf, LIQUID_MAGIC);
    put_u16(buf, flags.bits());
    buf.push(liquid.flags.bits());
    put_u16(buf, liquid.entry);
    buf.extend_from_slice(&[liquid.offset_x, liquid.offset_y, liquid.width, liquid.height]);
    put_f32(buf, liquid.level);

    if let Some(cells) = &liquid.cells {
        check_len("liquid cells", cells.len(), CELL_COUNT)?;
        cells.iter().for_each(|(entry, _)| put_u16(buf, *entry));
        buf.extend(cells.iter().map(|(_, mask)| mask.bits()));
    }
    if let Some(levels) = &liquid.levels {
        let expected = liquid.width as usize * liquid.height as usize;
        check_len("liquid levels", levels.len(), expected)?;
        levels.iter().for_each(|l| put_f32(buf, *l));
    }
    Ok(())
}

fn append_section(
    out: &mut Vec<u8>,
    encode: impl FnOnce(&mut Vec<u8>) -> Result<(), TileError>,
) -> Result<Section, TileError> {
    let offset = out.len();
    encode(out)?;
    let size = out.len() - offset;
    let as_u32 = |v: usize| {
        u32::try_from(v).map_err(|_| TileError::invalid_input("tile exceeds 4 GiB"))
    };
    Ok(Section {
        offset: as_u32(offset)?,
        size: as_u32(size)?,
    })
}

fn check_len(what: &str, got: usize, expected: usize) -> Result<(), TileError> {
    if got != expected {
        return Err(TileError::invalid_input(format!(
            "{what} has {got} entries, expected {expected}"
        )));
    }
    Ok(())
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_f32(buf: &mut Vec<u8>, v: f32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
