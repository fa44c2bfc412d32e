use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use worldgrid_common::{SIZE_OF_GRID_CELL, SpawnType};

use crate::error::MapError;

/// How respawn delays are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RespawnMode {
    /// Templates respawn after their configured delay.
    #[default]
    Fixed,
    /// Delays of opted-in spawn groups shrink with zone population.
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RespawnConfig {
    /// How often the respawn queue is consulted.
    pub check_interval_ms: u64,
    pub mode: RespawnMode,
    pub dynamic_rate_creature: f32,
    pub dynamic_rate_gameobject: f32,
    pub dynamic_minimum_creature_secs: u64,
    pub dynamic_minimum_gameobject_secs: u64,
    /// Let escort quest givers respawn while every live copy is escorting.
    pub escort_npc_respawn: bool,
}

impl Default for RespawnConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 5_000,
            mode: RespawnMode::Fixed,
            dynamic_rate_creature: 10.0,
            dynamic_rate_gameobject: 10.0,
            dynamic_minimum_creature_secs: 10,
            dynamic_minimum_gameobject_secs: 10,
            escort_npc_respawn: false,
        }
    }
}

impl RespawnConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Respawn delay adjusted for the number of players in the spawn's zone.
    ///
    /// Only applies in [`RespawnMode::Dynamic`]; callers decide whether the
    /// template is opted in. The result never drops below the configured
    /// minimum, and delays already at or under it are left alone.
    pub fn scaled_delay(&self, kind: SpawnType, delay: u64, zone_players: u32) -> u64 {
        if self.mode != RespawnMode::Dynamic || zone_players == 0 {
            return delay;
        }
        let (rate, minimum) = match kind {
            SpawnType::Creature => (self.dynamic_rate_creature, self.dynamic_minimum_creature_secs),
            SpawnType::GameObject => (
                self.dynamic_rate_gameobject,
                self.dynamic_minimum_gameobject_secs,
            ),
        };
        let factor = rate / zone_players as f32;
        if factor >= 1.0 || delay <= minimum {
            return delay;
        }
        ((delay as f32 * factor).ceil() as u64).max(minimum)
    }
}

/// Per-map tuning, loadable from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Time an unvisited grid waits before it is unloaded.
    pub grid_expiry_ms: u64,
    /// When false every grid keeps an explicit unload lock.
    pub grid_unload: bool,
    pub visibility_distance: f32,
    /// Verify entity cells against positions at the end of every tick.
    pub integrity_check: bool,
    /// Number of tick durations kept for stats.
    pub tick_history: usize,
    pub respawn: RespawnConfig,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            grid_expiry_ms: 300_000,
            grid_unload: true,
            visibility_distance: 90.0,
            integrity_check: true,
            tick_history: 32,
            respawn: RespawnConfig::default(),
        }
    }
}

impl MapConfig {
    pub fn grid_expiry(&self) -> Duration {
        Duration::from_millis(self.grid_expiry_ms)
    }

    /// Cells added around a grid when looking for nearby players.
    pub fn visibility_padding_cells(&self) -> u32 {
        (self.visibility_distance.max(0.0) / SIZE_OF_GRID_CELL).ceil() as u32 + 1
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, MapError> {
        serde_yaml::from_str(text).map_err(|e| MapError::Config {
            source_name: "<inline>".into(),
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, MapError> {
        let text = std::fs::read_to_string(path).map_err(|e| MapError::Config {
            source_name: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_yaml::from_str(&text).map_err(|e| MapError::Config {
            source_name: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = MapConfig::from_yaml_str("grid_unload: false\nrespawn:\n  mode: dynamic\n")
            .unwrap();
        assert!(!config.grid_unload);
        assert_eq!(config.grid_expiry(), Duration::from_secs(300));
        assert_eq!(config.respawn.mode, RespawnMode::Dynamic);
        assert_eq!(config.respawn.check_interval(), Duration::from_secs(5));
    }

    #[test]
    fn bad_yaml_is_a_config_error() {
        let err = MapConfig::from_yaml_str("grid_unload: [1, 2").unwrap_err();
        assert!(matches!(err, MapError::Config { .. }));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.yaml");
        std::fs::write(&path, "visibility_distance: 200.0\n").unwrap();
        let config = MapConfig::load(&path).unwrap();
        assert_eq!(config.visibility_distance, 200.0);
        assert!(MapConfig::load(&dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn visibility_padding_rounds_up() {
        let config = MapConfig {
            visibility_distance: 90.0,
            ..MapConfig::default()
        };
        // 90 / 66.67 rounds up to 2, plus one cell of slack.
        assert_eq!(config.visibility_padding_cells(), 3);
    }

    #[test]
    fn fixed_mode_never_scales() {
        let config = RespawnConfig::default();
        assert_eq!(config.scaled_delay(SpawnType::Creature, 300, 50), 300);
    }

    #[test]
    fn dynamic_mode_scales_with_population() {
        let config = RespawnConfig {
            mode: RespawnMode::Dynamic,
            ..RespawnConfig::default()
        };
        // Rate 10 over 20 players halves the delay.
        assert_eq!(config.scaled_delay(SpawnType::Creature, 300, 20), 150);
        // Clamped to the floor.
        assert_eq!(config.scaled_delay(SpawnType::Creature, 30, 1000), 10);
        // Few players: no change.
        assert_eq!(config.scaled_delay(SpawnType::GameObject, 300, 5), 300);
        // Already under the floor.
        assert_eq!(config.scaled_delay(SpawnType::Creature, 8, 1000), 8);
        assert_eq!(config.scaled_delay(SpawnType::Creature, 300, 0), 300);
    }
}
