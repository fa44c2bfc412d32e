//! Spawn data consumed by maps: templates, spawn groups, pools and the
//! loader that turns a template into an entity description.

use std::collections::HashMap;
use std::path::Path;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use worldgrid_common::{GridCoord, MapId, Placement, SpawnKey};

use crate::entity::{EntityDesc, EntityFlags};
use crate::error::MapError;

/// Spawn group every template belongs to unless told otherwise.
pub const DEFAULT_SPAWN_GROUP: u32 = 0;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SpawnGroupFlags: u32 {
        /// Always active; cannot be toggled.
        const SYSTEM = 1 << 0;
        /// Starts inactive until explicitly spawned.
        const MANUAL_SPAWN = 1 << 1;
        /// Respawn delay shrinks with zone population.
        const DYNAMIC_SPAWN_RATE = 1 << 2;
        /// Escort quest givers; see `RespawnConfig::escort_npc_respawn`.
        const ESCORT_QUEST_NPC = 1 << 3;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnGroup {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub flags: SpawnGroupFlags,
}

impl SpawnGroup {
    pub fn new(id: u32, name: impl Into<String>, flags: SpawnGroupFlags) -> Self {
        Self {
            id,
            name: name.into(),
            flags,
        }
    }
}

/// One persisted spawn point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnTemplate {
    pub key: SpawnKey,
    /// Creature or game object template entry.
    pub entry: u32,
    pub map: MapId,
    pub placement: Placement,
    #[serde(default)]
    pub respawn_delay_secs: u64,
    #[serde(default)]
    pub group: u32,
    #[serde(default)]
    pub pool: Option<u32>,
    #[serde(default)]
    pub flags: EntityFlags,
}

impl SpawnTemplate {
    pub fn new(key: SpawnKey, entry: u32, map: MapId, placement: Placement) -> Self {
        Self {
            key,
            entry,
            map,
            placement,
            respawn_delay_secs: 0,
            group: DEFAULT_SPAWN_GROUP,
            pool: None,
            flags: EntityFlags::empty(),
        }
    }

    pub fn with_respawn_delay(mut self, secs: u64) -> Self {
        self.respawn_delay_secs = secs;
        self
    }

    pub fn in_group(mut self, group: u32) -> Self {
        self.group = group;
        self
    }

    pub fn in_pool(mut self, pool: u32) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_flags(mut self, flags: EntityFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Grid holding the spawn point, `None` when it lies off the map.
    pub fn grid(&self) -> Option<GridCoord> {
        GridCoord::from_position(self.placement.x(), self.placement.y()).ok()
    }
}

/// Read access to spawn templates and their grouping.
pub trait SpawnTemplates: Send + Sync {
    fn template(&self, key: SpawnKey) -> Option<&SpawnTemplate>;

    /// Spawns whose point lies in `grid` of `map`, in key order.
    fn spawns_in_grid(&self, map: MapId, grid: GridCoord) -> Vec<SpawnKey>;

    /// Spawn this one waits for before respawning.
    fn linked_respawn(&self, key: SpawnKey) -> Option<SpawnKey>;

    fn spawn_group(&self, id: u32) -> Option<&SpawnGroup>;

    /// Members of `group` placed on `map`.
    fn group_members(&self, map: MapId, group: u32) -> Vec<SpawnKey>;
}

/// Turns templates into entity descriptions.
pub trait ContentLoader: Send + Sync {
    /// `None` when the template cannot be materialized.
    fn materialize(&self, template: &SpawnTemplate) -> Option<EntityDesc>;
}

/// Pool membership is resolved by an external pool system.
pub trait PoolManager: Send + Sync {
    /// Whether the pool currently wants `key` spawned.
    fn is_spawned(&self, pool: u32, key: SpawnKey) -> bool;

    /// A pooled spawn came due; the pool decides what spawns next.
    fn respawn_due(&self, pool: u32, key: SpawnKey);
}

/// Pool manager for setups without pools: every member counts as spawned.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPools;

impl PoolManager for NoPools {
    fn is_spawned(&self, _pool: u32, _key: SpawnKey) -> bool {
        true
    }

    fn respawn_due(&self, pool: u32, key: SpawnKey) {
        tracing::debug!(pool, spawn = %key, "pooled respawn ignored, no pool manager");
    }
}

/// Materializes a template as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateLoader;

impl ContentLoader for TemplateLoader {
    fn materialize(&self, template: &SpawnTemplate) -> Option<EntityDesc> {
        Some(
            EntityDesc::new(template.key.kind.entity_kind(), template.placement)
                .with_flags(template.flags)
                .with_spawn(template.key, template.respawn_delay_secs),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespawnLink {
    pub spawn: SpawnKey,
    pub linked: SpawnKey,
}

/// File form of a [`SpawnCatalog`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnCatalogData {
    #[serde(default)]
    pub templates: Vec<SpawnTemplate>,
    #[serde(default)]
    pub groups: Vec<SpawnGroup>,
    #[serde(default)]
    pub links: Vec<RespawnLink>,
}

/// In-memory [`SpawnTemplates`], loadable from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SpawnCatalogData", into = "SpawnCatalogData")]
pub struct SpawnCatalog {
    templates: HashMap<SpawnKey, SpawnTemplate>,
    by_grid: HashMap<(MapId, GridCoord), Vec<SpawnKey>>,
    groups: HashMap<u32, SpawnGroup>,
    links: HashMap<SpawnKey, SpawnKey>,
}

impl Default for SpawnCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl SpawnCatalog {
    /// Empty catalog holding only the default system group.
    pub fn new() -> Self {
        let mut groups = HashMap::new();
        groups.insert(
            DEFAULT_SPAWN_GROUP,
            SpawnGroup::new(DEFAULT_SPAWN_GROUP, "Default Group", SpawnGroupFlags::SYSTEM),
        );
        Self {
            templates: HashMap::new(),
            by_grid: HashMap::new(),
            groups,
            links: HashMap::new(),
        }
    }

    pub fn with_template(mut self, template: SpawnTemplate) -> Self {
        self.insert_template(template);
        self
    }

    pub fn with_group(mut self, group: SpawnGroup) -> Self {
        self.groups.insert(group.id, group);
        self
    }

    pub fn with_link(mut self, spawn: SpawnKey, linked: SpawnKey) -> Self {
        self.links.insert(spawn, linked);
        self
    }

    fn insert_template(&mut self, template: SpawnTemplate) {
        let Some(grid) = template.grid() else {
            tracing::warn!(spawn = %template.key, "spawn point outside the map, skipped");
            return;
        };
        let key = template.key;
        let map = template.map;
        if let Some(previous) = self.templates.insert(key, template) {
            if let Some(list) = previous
                .grid()
                .and_then(|old| self.by_grid.get_mut(&(previous.map, old)))
            {
                list.retain(|k| *k != key);
            }
        }
        let list = self.by_grid.entry((map, grid)).or_default();
        if let Err(pos) = list.binary_search(&key) {
            list.insert(pos, key);
        }
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
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

impl From<SpawnCatalogData> for SpawnCatalog {
    fn from(data: SpawnCatalogData) -> Self {
        let mut catalog = Self::new();
        for group in data.groups {
            catalog.groups.insert(group.id, group);
        }
        for template in data.templates {
            catalog.insert_template(template);
        }
        for link in data.links {
            catalog.links.insert(link.spawn, link.linked);
        }
        catalog
    }
}

impl From<SpawnCatalog> for SpawnCatalogData {
    fn from(catalog: SpawnCatalog) -> Self {
        let mut templates: Vec<_> = catalog.templates.into_values().collect();
        templates.sort_by_key(|t| t.key);
        let mut groups: Vec<_> = catalog.groups.into_values().collect();
        groups.sort_by_key(|g| g.id);
        let mut links: Vec<_> = catalog
            .links
            .into_iter()
            .map(|(spawn, linked)| RespawnLink { spawn, linked })
            .collect();
        links.sort_by_key(|l| l.spawn);
        Self {
            templates,
            groups,
            links,
        }
    }
}

impl SpawnTemplates for SpawnCatalog {
    fn template(&self, key: SpawnKey) -> Option<&SpawnTemplate> {
        self.templates.get(&key)
    }

    fn spawns_in_grid(&self, map: MapId, grid: GridCoord) -> Vec<SpawnKey> {
        self.by_grid.get(&(map, grid)).cloned().unwrap_or_default()
    }

    fn linked_respawn(&self, key: SpawnKey) -> Option<SpawnKey> {
        self.links.get(&key).copied()
    }

    fn spawn_group(&self, id: u32) -> Option<&SpawnGroup> {
        self.groups.get(&id)
    }

    fn group_members(&self, map: MapId, group: u32) -> Vec<SpawnKey> {
        let mut members: Vec<SpawnKey> = self
            .templates
            .values()
            .filter(|t| t.map == map && t.group == group)
            .map(|t| t.key)
            .collect();
        members.sort();
        members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldgrid_common::{EntityKind, SpawnType};

    fn wolf(id: u64, x: f32) -> SpawnTemplate {
        SpawnTemplate::new(SpawnKey::creature(id), 299, 0, Placement::new(x, 0.0, 0.0, 0.0))
    }

    #[test]
    fn catalog_indexes_by_grid() {
        let catalog = SpawnCatalog::new()
            .with_template(wolf(2, 10.0))
            .with_template(wolf(1, 20.0))
            .with_template(wolf(3, 900.0));
        let grid = GridCoord::from_position(0.0, 0.0).unwrap();
        assert_eq!(
            catalog.spawns_in_grid(0, grid),
            vec![SpawnKey::creature(1), SpawnKey::creature(2)]
        );
        assert!(catalog.spawns_in_grid(1, grid).is_empty());
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn replacing_a_template_moves_it_between_grids() {
        let catalog = SpawnCatalog::new()
            .with_template(wolf(1, 10.0))
            .with_template(wolf(1, 900.0));
        let origin = GridCoord::from_position(0.0, 0.0).unwrap();
        let far = GridCoord::from_position(900.0, 0.0).unwrap();
        assert!(catalog.spawns_in_grid(0, origin).is_empty());
        assert_eq!(catalog.spawns_in_grid(0, far), vec![SpawnKey::creature(1)]);
    }

    #[test]
    fn off_map_templates_are_skipped() {
        let catalog = SpawnCatalog::new().with_template(wolf(1, 1.0e6));
        assert!(catalog.is_empty());
    }

    #[test]
    fn default_group_is_system() {
        let catalog = SpawnCatalog::new();
        let group = catalog.spawn_group(DEFAULT_SPAWN_GROUP).unwrap();
        assert!(group.flags.contains(SpawnGroupFlags::SYSTEM));
    }

    #[test]
    fn group_members_are_filtered_by_map() {
        let catalog = SpawnCatalog::new()
            .with_group(SpawnGroup::new(5, "event", SpawnGroupFlags::MANUAL_SPAWN))
            .with_template(wolf(1, 0.0).in_group(5))
            .with_template(wolf(2, 0.0));
        assert_eq!(catalog.group_members(0, 5), vec![SpawnKey::creature(1)]);
        assert_eq!(catalog.group_members(1, 5), Vec::<SpawnKey>::new());
    }

    #[test]
    fn loads_from_yaml() {
        let yaml = r#"
templates:
  - key: { kind: Creature, spawn_id: 7 }
    entry: 299
    map: 0
    placement: { position: [10.0, 20.0, 5.0], orientation: 0.0 }
    respawn_delay_secs: 30
groups:
  - { id: 3, name: "night", flags: MANUAL_SPAWN }
links:
  - { spawn: { kind: Creature, spawn_id: 7 }, linked: { kind: GameObject, spawn_id: 1 } }
"#;
        let catalog = SpawnCatalog::from_yaml_str(yaml).unwrap();
        let template = catalog.template(SpawnKey::creature(7)).unwrap();
        assert_eq!(template.respawn_delay_secs, 30);
        assert_eq!(template.key.kind, SpawnType::Creature);
        assert_eq!(
            catalog.linked_respawn(SpawnKey::creature(7)),
            Some(SpawnKey::game_object(1))
        );
        assert!(catalog.spawn_group(3).unwrap().flags.contains(SpawnGroupFlags::MANUAL_SPAWN));
        assert!(catalog.spawn_group(DEFAULT_SPAWN_GROUP).is_some());
    }

    #[test]
    fn template_loader_carries_spawn_origin() {
        let template = wolf(4, 10.0)
            .with_respawn_delay(45)
            .with_flags(EntityFlags::ACTIVE);
        let desc = TemplateLoader.materialize(&template).unwrap();
        assert_eq!(desc.kind, EntityKind::Creature);
        assert!(desc.flags.contains(EntityFlags::ACTIVE));
        let origin = desc.spawn.unwrap();
        assert_eq!(origin.key, SpawnKey::creature(4));
        assert_eq!(origin.respawn_delay_secs, 45);
        assert_eq!(origin.home, template.placement);
    }
}
