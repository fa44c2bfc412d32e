//! Liquid classification types and the area/liquid reference tables used to
//! resolve per-area liquid overrides.

use std::collections::HashMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Liquid families. Bits 0..=3 are indexed by a liquid type's sound bank.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct LiquidTypeMask: u8 {
        const WATER = 0x01;
        const OCEAN = 0x02;
        const MAGMA = 0x04;
        const SLIME = 0x08;
        const DARK_WATER = 0x10;
    }
}

impl LiquidTypeMask {
    pub const ALL_LIQUIDS: LiquidTypeMask = LiquidTypeMask::WATER
        .union(LiquidTypeMask::OCEAN)
        .union(LiquidTypeMask::MAGMA)
        .union(LiquidTypeMask::SLIME);

    /// Family bit for a liquid type's sound bank.
    pub fn from_sound_bank(sound_bank: u8) -> Self {
        if sound_bank < 4 {
            Self::from_bits_truncate(1 << sound_bank)
        } else {
            Self::empty()
        }
    }
}

/// Position of a point relative to the liquid surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiquidStatus {
    NoWater,
    AboveWater,
    WaterWalk,
    InWater,
    UnderWater,
}

impl LiquidStatus {
    /// Classify by `delta = liquid_level - z`.
    pub fn classify(delta: f32, collision_height: f32) -> Self {
        if delta > collision_height {
            LiquidStatus::UnderWater
        } else if delta > 0.0 {
            LiquidStatus::InWater
        } else if delta > -0.1 {
            LiquidStatus::WaterWalk
        } else {
            LiquidStatus::AboveWater
        }
    }

    pub fn is_swimming(self) -> bool {
        matches!(self, LiquidStatus::InWater | LiquidStatus::UnderWater)
    }
}

/// Resolved liquid at a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidData {
    /// Liquid type id after area overrides.
    pub entry: u32,
    pub type_flags: LiquidTypeMask,
    pub level: f32,
    /// Ground height under the liquid.
    pub depth_level: f32,
}

/// Result of [`crate::TerrainTile::liquid_status`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidQuery {
    pub status: LiquidStatus,
    /// Set when the queried point rests on the ground under the liquid.
    pub ocean_floor: bool,
    pub data: Option<LiquidData>,
}

impl LiquidQuery {
    pub const NO_WATER: LiquidQuery = LiquidQuery {
        status: LiquidStatus::NoWater,
        ocean_floor: false,
        data: None,
    };
}

/// Entries below this id are generic liquids that an area may replace with
/// its own type.
pub const LIQUID_OVERRIDE_ENTRY_LIMIT: u32 = 21;

/// Height above the ground, inside liquid, that still counts as the floor.
pub const OCEAN_FLOOR_TOLERANCE: f32 = 0.5;

/// One row of the area table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaEntry {
    pub id: u32,
    #[serde(default)]
    pub parent_area_id: u32,
    #[serde(default)]
    pub name: String,
    /// Replacement liquid type per sound bank (water, ocean, magma, slime).
    #[serde(default)]
    pub liquid_type_override: [u32; 4],
}

impl AreaEntry {
    pub fn liquid_override(&self, sound_bank: u8) -> u32 {
        self.liquid_type_override
            .get(sound_bank as usize)
            .copied()
            .unwrap_or(0)
    }
}

/// One row of the liquid type table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidTypeEntry {
    pub id: u32,
    pub sound_bank: u8,
    #[serde(default)]
    pub name: String,
}

/// Read-only area and liquid reference data.
pub trait AreaTable: Send + Sync {
    fn area(&self, id: u32) -> Option<&AreaEntry>;

    fn liquid_type(&self, id: u32) -> Option<&LiquidTypeEntry>;

    /// Top-level zone of an area (follows the parent chain).
    fn zone_of(&self, area_id: u32) -> u32 {
        let mut current = area_id;
        // Parent chains are shallow; the bound guards against cyclic data.
        for _ in 0..8 {
            match self.area(current) {
                Some(entry) if entry.parent_area_id != 0 => current = entry.parent_area_id,
                _ => return current,
            }
        }
        current
    }
}

/// Row-list form of the reference tables, as stored in data files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AreaTableData {
    #[serde(default)]
    pub areas: Vec<AreaEntry>,
    #[serde(default)]
    pub liquid_types: Vec<LiquidTypeEntry>,
}

/// In-memory [`AreaTable`], deserializable from YAML or JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "AreaTableData", into = "AreaTableData")]
pub struct StaticAreaTable {
    areas: HashMap<u32, AreaEntry>,
    liquid_types: HashMap<u32, LiquidTypeEntry>,
}

impl StaticAreaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_area(mut self, entry: AreaEntry) -> Self {
        self.areas.insert(entry.id, entry);
        self
    }

    pub fn with_liquid_type(mut self, entry: LiquidTypeEntry) -> Self {
        self.liquid_types.insert(entry.id, entry);
        self
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    /// Water, ocean, magma and slime rows with ids 1..=4.
    pub fn with_default_liquids(self) -> Self {
        [(1, 0, "Water"), (2, 1, "Ocean"), (3, 2, "Magma"), (4, 3, "Slime")]
            .into_iter()
            .fold(self, |table, (id, sound_bank, name)| {
                table.with_liquid_type(LiquidTypeEntry {
                    id,
                    sound_bank,
                    name: name.to_string(),
                })
            })
    }
}

impl From<AreaTableData> for StaticAreaTable {
    fn from(data: AreaTableData) -> Self {
        Self {
            areas: data.areas.into_iter().map(|a| (a.id, a)).collect(),
            liquid_types: data.liquid_types.into_iter().map(|l| (l.id, l)).collect(),
        }
    }
}

impl From<StaticAreaTable> for AreaTableData {
    fn from(table: StaticAreaTable) -> Self {
        let mut areas: Vec<_> = table.areas.into_values().collect();
        areas.sort_by_key(|a| a.id);
        let mut liquid_types: Vec<_> = table.liquid_types.into_values().collect();
        liquid_types.sort_by_key(|l| l.id);
        Self {
            areas,
            liquid_types,
        }
    }
}

impl AreaTable for StaticAreaTable {
    fn area(&self, id: u32) -> Option<&AreaEntry> {
        self.areas.get(&id)
    }

    fn liquid_type(&self, id: u32) -> Option<&LiquidTypeEntry> {
        self.liquid_types.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_thresholds() {
        assert_eq!(LiquidStatus::classify(5.0, 2.0), LiquidStatus::UnderWater);
        assert_eq!(LiquidStatus::classify(1.5, 2.0), LiquidStatus::InWater);
        assert_eq!(LiquidStatus::classify(2.0, 2.0), LiquidStatus::InWater);
        assert_eq!(LiquidStatus::classify(0.0, 2.0), LiquidStatus::WaterWalk);
        assert_eq!(LiquidStatus::classify(-0.05, 2.0), LiquidStatus::WaterWalk);
        assert_eq!(LiquidStatus::classify(-2.0, 2.0), LiquidStatus::AboveWater);
    }

    #[test]
    fn sound_bank_maps_to_family_bit() {
        assert_eq!(LiquidTypeMask::from_sound_bank(0), LiquidTypeMask::WATER);
        assert_eq!(LiquidTypeMask::from_sound_bank(2), LiquidTypeMask::MAGMA);
        assert!(LiquidTypeMask::from_sound_bank(9).is_empty());
    }

    #[test]
    fn zone_follows_parent_chain() {
        let table = StaticAreaTable::new()
            .with_area(AreaEntry {
                id: 10,
                parent_area_id: 0,
                name: "Zone".into(),
                liquid_type_override: [0; 4],
            })
            .with_area(AreaEntry {
                id: 11,
                parent_area_id: 10,
                name: "Subzone".into(),
                liquid_type_override: [0; 4],
            });
        assert_eq!(table.zone_of(11), 10);
        assert_eq!(table.zone_of(10), 10);
        assert_eq!(table.zone_of(99), 99);
    }

    #[test]
    fn table_deserializes_from_rows() {
        let json = r#"{
            "areas": [{"id": 5, "parent_area_id": 1, "liquid_type_override": [0, 7, 0, 0]}],
            "liquid_types": [{"id": 7, "sound_bank": 1}]
        }"#;
        let table: StaticAreaTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.area(5).map(|a| a.liquid_override(1)), Some(7));
        assert_eq!(table.liquid_type(7).map(|l| l.sound_bank), Some(1));
    }
}
