use serde::Serialize;
use worldgrid_common::{CellArea, CellCoord, EntityId, InstanceId, KindMask, MapId, UnixTime};
use worldgrid_stream::GridStats;
use worldgrid_terrain::{LiquidQuery, LiquidStatus, LiquidTypeMask, DEFAULT_COLLISION_HEIGHT};

use super::Map;

/// Point-in-time counters of one map instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapStats {
    pub map: MapId,
    pub instance: InstanceId,
    pub game_time: UnixTime,
    pub ticks: u64,
    pub entities: usize,
    pub players: usize,
    pub active_objects: usize,
    pub pending_relocations: usize,
    pub pending_respawns: usize,
    pub pending_removals: usize,
    pub integrity_violations: u64,
    pub grids: GridStats,
    pub average_tick_us: u64,
    pub max_tick_us: u64,
}

impl Map {
    pub fn height(&self, x: f32, y: f32) -> Option<f32> {
        self.terrain.height(self.id, x, y)
    }

    pub fn area_id(&self, x: f32, y: f32) -> u16 {
        self.terrain.area_id(self.id, x, y)
    }

    pub fn zone_id(&self, x: f32, y: f32) -> u32 {
        self.services.areas.zone_of(u32::from(self.area_id(x, y)))
    }

    pub fn min_height(&self, x: f32, y: f32) -> f32 {
        self.terrain.min_height(self.id, x, y)
    }

    pub fn liquid_level(&self, x: f32, y: f32) -> Option<f32> {
        self.terrain.liquid_level(self.id, x, y)
    }

    pub fn liquid_status(
        &self,
        x: f32,
        y: f32,
        z: f32,
        required: Option<LiquidTypeMask>,
        collision_height: f32,
    ) -> LiquidQuery {
        self.terrain.liquid_status(
            self.id,
            x,
            y,
            z,
            required,
            collision_height,
            &*self.services.areas,
        )
    }

    /// Whether a standard-height unit at the point would be swimming.
    pub fn is_in_water(&self, x: f32, y: f32, z: f32) -> bool {
        matches!(
            self.liquid_status(x, y, z, None, DEFAULT_COLLISION_HEIGHT).status,
            LiquidStatus::InWater | LiquidStatus::UnderWater
        )
    }

    /// Call `f` for every entity of the cell matching `mask`. Cells of grids
    /// that are not loaded are empty.
    pub fn visit_cell(&self, cell: CellCoord, mask: KindMask, f: impl FnMut(EntityId)) -> usize {
        self.grids.visit_cell(cell, mask, f)
    }

    /// Entities whose cell lies within `radius` of the point.
    pub fn entities_in_range(&self, x: f32, y: f32, radius: f32, mask: KindMask) -> Vec<EntityId> {
        self.grids.entities_in_area(&CellArea::around(x, y, radius), mask)
    }

    /// Players in the world standing in `zone`.
    pub fn zone_player_count(&self, zone: u32) -> u32 {
        let count = self
            .players
            .iter()
            .filter_map(|id| self.entities.get(id))
            .filter(|player| player.is_in_world())
            .filter(|player| {
                let at = player.placement();
                self.zone_id(at.x(), at.y()) == zone
            })
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Verify that every in-world entity sits in the cell of its position
    /// and is indexed there. Returns the number of violations found.
    pub fn check_integrity(&mut self) -> usize {
        let mut violations = 0;
        for entity in self.entities.values().filter(|e| e.is_in_world()) {
            let placement = entity.placement();
            match CellCoord::from_position(placement.x(), placement.y()) {
                Ok(cell) if cell == entity.cell() => {}
                Ok(cell) => {
                    tracing::warn!(
                        map = self.id,
                        entity = %entity.id(),
                        ?cell,
                        stored = ?entity.cell(),
                        "entity position and cell disagree"
                    );
                    violations += 1;
                }
                Err(error) => {
                    tracing::warn!(map = self.id, entity = %entity.id(), %error, "entity position off the map");
                    violations += 1;
                }
            }
            let indexed = self
                .grids
                .get(entity.grid())
                .and_then(|grid| grid.cell(entity.cell()))
                .is_some_and(|cell| cell.contains(entity.id()));
            if !indexed {
                tracing::warn!(map = self.id, entity = %entity.id(), cell = ?entity.cell(), "entity missing from its cell");
                violations += 1;
            }
        }
        self.integrity_violations += violations as u64;
        violations
    }

    pub fn stats(&self) -> MapStats {
        MapStats {
            map: self.id,
            instance: self.instance,
            game_time: self.game_time(),
            ticks: self.ticks,
            entities: self.entities.len(),
            players: self.players.len(),
            active_objects: self.active_objects.len(),
            pending_relocations: self.relocation.len(),
            pending_respawns: self.respawns.len(),
            pending_removals: self.remove_list.len(),
            integrity_violations: self.integrity_violations,
            grids: self.grids.stats(),
            average_tick_us: self.tick_timer.average().as_micros() as u64,
            max_tick_us: self.tick_timer.max().as_micros() as u64,
        }
    }
}
