//! On-disk layout of a terrain tile.
//!
//! ```text
//! FileHeader   44 bytes   magic, version, build, 4 × (offset, size)
//! area         8 bytes    + 16×16 u16 area ids unless uniform
//! height       14 bytes   + 129×129 and 128×128 samples (f32 / u16 / u8)
//!                         + 9 × i16 max and 9 × i16 min flight bounds
//! liquid       17 bytes   + 16×16 u16 entries + 16×16 u8 flags
//!                         + width × height f32 levels
//! holes        2048 bytes raw bitmask
//! ```
//!
//! All integers are little endian and headers are packed.

use std::path::Path;

use bitflags::bitflags;

use crate::error::TileError;

pub const MAP_MAGIC: u32 = u32::from_le_bytes(*b"MAPS");
pub const MAP_VERSION_MAGIC: u32 = 10;
/// Previous revision; identical layout, still accepted.
pub const MAP_VERSION_MAGIC_LEGACY: u32 = 9;
pub const ACCEPTED_VERSIONS: [u32; 2] = [MAP_VERSION_MAGIC, MAP_VERSION_MAGIC_LEGACY];

pub const AREA_MAGIC: u32 = u32::from_le_bytes(*b"AREA");
pub const HEIGHT_MAGIC: u32 = u32::from_le_bytes(*b"MHGT");
pub const LIQUID_MAGIC: u32 = u32::from_le_bytes(*b"MLIQ");

/// Area section flag: the whole tile uses `grid_area`.
pub const AREA_FLAG_UNIFORM: u16 = 0x0001;

/// Coarse (corner) heightfield samples per edge.
pub const V9_SIZE: usize = 129;
/// Fine (cell centre) heightfield samples per edge.
pub const V8_SIZE: usize = 128;
/// Area ids and liquid types are stored per 16×16 cell.
pub const CELLS_PER_TILE: usize = 16;
pub const HOLES_SIZE: usize = CELLS_PER_TILE * CELLS_PER_TILE * 8;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeightFlags: u16 {
        const NO_HEIGHT = 0x0001;
        const AS_INT16 = 0x0002;
        const AS_INT8 = 0x0004;
        const FLIGHT_BOUNDS = 0x0008;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LiquidHeaderFlags: u16 {
        /// No per-cell entry/flag tables, the global type applies everywhere.
        const NO_TYPE = 0x0001;
        /// No level samples, the global level applies everywhere.
        const NO_HEIGHT = 0x0002;
    }
}

/// Location of one section inside the file. A zero offset means absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Section {
    pub offset: u32,
    pub size: u32,
}

impl Section {
    pub fn is_present(&self) -> bool {
        self.offset != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub build: u32,
    pub area: Section,
    pub height: Section,
    pub liquid: Section,
    pub holes: Section,
}

impl FileHeader {
    pub const SIZE: usize = 44;

    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self, TileError> {
        let magic = reader.u32()?;
        let version = reader.u32()?;
        let build = reader.u32()?;
        let mut section = || -> Result<Section, TileError> {
            Ok(Section {
                offset: reader.u32()?,
                size: reader.u32()?,
            })
        };
        Ok(Self {
            magic,
            version,
            build,
            area: section()?,
            height: section()?,
            liquid: section()?,
            holes: section()?,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        for value in [
            self.magic,
            self.version,
            self.build,
            self.area.offset,
            self.area.size,
            self.height.offset,
            self.height.size,
            self.liquid.offset,
            self.liquid.size,
            self.holes.offset,
            self.holes.size,
        ] {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaHeader {
    pub magic: u32,
    pub flags: u16,
    pub grid_area: u16,
}

impl AreaHeader {
    pub const SIZE: usize = 8;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightHeader {
    pub magic: u32,
    pub flags: HeightFlags,
    pub grid_height: f32,
    pub grid_max_height: f32,
}

impl HeightHeader {
    pub const SIZE: usize = 14;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidHeader {
    pub magic: u32,
    pub flags: LiquidHeaderFlags,
    pub liquid_flags: u8,
    pub liquid_type: u16,
    pub offset_x: u8,
    pub offset_y: u8,
    pub width: u8,
    pub height: u8,
    pub liquid_level: f32,
}

impl LiquidHeader {
    pub const SIZE: usize = 17;
}

/// Bounds-checked little-endian cursor over a byte slice.
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
    path: &'a Path,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8], path: &'a Path) -> Self {
        Self {
            bytes,
            cursor: 0,
            path,
        }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], TileError> {
        let end = self
            .cursor
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                TileError::corrupt(
                    self.path,
                    format!(
                        "truncated: wanted {len} bytes at offset {}, {} left",
                        self.cursor,
                        self.remaining()
                    ),
                )
            })?;
        let slice = &self.bytes[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], TileError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, TileError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16, TileError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn i16(&mut self) -> Result<i16, TileError> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, TileError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn f32(&mut self) -> Result<f32, TileError> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    pub fn u16_vec(&mut self, count: usize) -> Result<Box<[u16]>, TileError> {
        (0..count).map(|_| self.u16()).collect()
    }

    pub fn f32_vec(&mut self, count: usize) -> Result<Box<[f32]>, TileError> {
        (0..count).map(|_| self.f32()).collect()
    }

    pub fn u8_vec(&mut self, count: usize) -> Result<Box<[u8]>, TileError> {
        Ok(self.take(count)?.into())
    }

    pub fn expect_magic(&mut self, expected: u32, section: &str) -> Result<u32, TileError> {
        let magic = self.u32()?;
        if magic != expected {
            return Err(TileError::corrupt(
                self.path,
                format!("{section} section has magic {magic:#010x}, expected {expected:#010x}"),
            ));
        }
        Ok(magic)
    }
}

/// Slice out one section, checking it lies inside the file.
pub fn section_bytes<'a>(
    bytes: &'a [u8],
    section: Section,
    name: &str,
    path: &Path,
) -> Result<&'a [u8], TileError> {
    let start = section.offset as usize;
    let end = start.checked_add(section.size as usize);
    match end {
        Some(end) if end <= bytes.len() && start >= FileHeader::SIZE => Ok(&bytes[start..end]),
        _ => Err(TileError::corrupt(
            path,
            format!(
                "{name} section [{start}, +{}) lies outside the {} byte file",
                section.size,
                bytes.len()
            ),
        )),
    }
}
