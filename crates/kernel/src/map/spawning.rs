use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use worldgrid_common::{EntityId, EntityKind, GridCoord, SpawnKey, SpawnType, UnixTime};
use worldgrid_stream::GridIndex;

use super::Map;
use crate::content::{SpawnGroupFlags, SpawnTemplate, SpawnTemplates};
use crate::entity::Entity;
use crate::error::MapError;
use crate::respawn::{RespawnAction, RespawnGate, RespawnInfo, RespawnScheduler, ScheduleOutcome};

/// Unknown groups are inactive; system groups always active; manual groups
/// are active only once toggled, other groups until toggled.
fn group_active(templates: &dyn SpawnTemplates, toggled: &HashSet<u32>, group: u32) -> bool {
    let Some(group) = templates.spawn_group(group) else {
        return false;
    };
    if group.flags.contains(SpawnGroupFlags::SYSTEM) {
        return true;
    }
    group.flags.contains(SpawnGroupFlags::MANUAL_SPAWN) == toggled.contains(&group.id)
}

fn escort_exempt(templates: &dyn SpawnTemplates, escort_npc_respawn: bool, template: &SpawnTemplate) -> bool {
    escort_npc_respawn
        && templates
            .spawn_group(template.group)
            .is_some_and(|g| g.flags.contains(SpawnGroupFlags::ESCORT_QUEST_NPC))
}

/// A live copy that forbids spawning another. Any game object in the world
/// blocks; creatures block while alive, unless they are being escorted and
/// `escort_exempt` holds.
fn blocking_instance(
    entities: &BTreeMap<EntityId, Entity>,
    instances: Option<&BTreeSet<EntityId>>,
    key: SpawnKey,
    escort_exempt: bool,
) -> bool {
    let Some(instances) = instances else {
        return false;
    };
    instances
        .iter()
        .filter_map(|id| entities.get(id))
        .filter(|entity| entity.is_in_world())
        .any(|entity| match key.kind {
            SpawnType::GameObject => true,
            SpawnType::Creature => entity.is_alive() && !(escort_exempt && entity.is_escorted()),
        })
}

struct MapRespawnGate<'a> {
    templates: &'a dyn SpawnTemplates,
    toggled: &'a HashSet<u32>,
    grids: &'a GridIndex,
    entities: &'a BTreeMap<EntityId, Entity>,
    spawn_instances: &'a HashMap<SpawnKey, BTreeSet<EntityId>>,
    escort_npc_respawn: bool,
}

impl RespawnGate for MapRespawnGate<'_> {
    fn has_template(&self, key: SpawnKey) -> bool {
        self.templates.template(key).is_some()
    }

    fn is_group_active(&self, key: SpawnKey) -> bool {
        self.templates
            .template(key)
            .is_some_and(|t| group_active(self.templates, self.toggled, t.group))
    }

    fn pool_of(&self, key: SpawnKey) -> Option<u32> {
        self.templates.template(key)?.pool
    }

    fn has_blocking_instance(&self, key: SpawnKey) -> bool {
        let exempt = self
            .templates
            .template(key)
            .is_some_and(|t| escort_exempt(self.templates, self.escort_npc_respawn, t));
        blocking_instance(self.entities, self.spawn_instances.get(&key), key, exempt)
    }

    fn linked_spawn(&self, key: SpawnKey) -> Option<SpawnKey> {
        self.templates.linked_respawn(key)
    }

    fn is_grid_loaded(&self, grid: GridCoord) -> bool {
        self.grids.is_loaded(grid)
    }
}

impl Map {
    /// Spawn every template of a freshly loaded grid that is free to spawn.
    pub(super) fn load_grid_objects(&mut self, coord: GridCoord) -> usize {
        let templates = Arc::clone(&self.services.templates);
        let mut spawned = 0;
        for key in templates.spawns_in_grid(self.id, coord) {
            let Some(template) = templates.template(key) else {
                continue;
            };
            if !self.should_spawn_on_grid_load(template) {
                continue;
            }
            if self.materialize(template).is_some() {
                spawned += 1;
            }
        }
        if spawned > 0 {
            tracing::debug!(map = self.id, instance = self.instance, grid = ?coord, spawned, "grid objects loaded");
        }
        spawned
    }

    fn should_spawn_on_grid_load(&self, template: &SpawnTemplate) -> bool {
        let key = template.key;
        if self.respawns.contains(key) {
            return false;
        }
        if !group_active(&*self.services.templates, &self.toggled_groups, template.group) {
            return false;
        }
        if let Some(pool) = template.pool {
            if !self.services.pools.is_spawned(pool, key) {
                return false;
            }
        }
        !self.has_blocking_instance(template)
    }

    fn has_blocking_instance(&self, template: &SpawnTemplate) -> bool {
        let exempt = escort_exempt(
            &*self.services.templates,
            self.config.respawn.escort_npc_respawn,
            template,
        );
        blocking_instance(
            &self.entities,
            self.spawn_instances.get(&template.key),
            template.key,
            exempt,
        )
    }

    fn materialize(&mut self, template: &SpawnTemplate) -> Option<EntityId> {
        let Some(desc) = self.services.loader.materialize(template) else {
            tracing::warn!(map = self.id, spawn = %template.key, "content loader refused template");
            return None;
        };
        match self.place_new_entity(desc) {
            Ok(id) => Some(id),
            Err(error) => {
                tracing::warn!(map = self.id, spawn = %template.key, %error, "failed to place spawn");
                None
            }
        }
    }

    fn persist_respawn(&self, info: &RespawnInfo) {
        if let Some(store) = &self.services.store {
            if let Err(error) = store.save(self.id, self.instance, info) {
                tracing::warn!(map = self.id, instance = self.instance, spawn = %info.key, %error, "failed to save respawn time");
            }
        }
    }

    fn forget_respawn(&self, key: SpawnKey) {
        if let Some(store) = &self.services.store {
            if let Err(error) = store.remove(self.id, self.instance, key) {
                tracing::warn!(map = self.id, instance = self.instance, spawn = %key, %error, "failed to delete respawn time");
            }
        }
    }

    pub fn respawns(&self) -> &RespawnScheduler {
        &self.respawns
    }

    pub fn respawn_time(&self, key: SpawnKey) -> Option<UnixTime> {
        self.respawns.due_time(key)
    }

    /// Queue a respawn of `key` at `due`, keeping an earlier pending time.
    pub fn schedule_respawn(&mut self, key: SpawnKey, due: UnixTime) -> Result<ScheduleOutcome, MapError> {
        let template = self
            .services
            .templates
            .template(key)
            .ok_or(MapError::UnknownSpawn(key))?;
        let grid = GridCoord::from_position(template.placement.x(), template.placement.y())?;
        let info = RespawnInfo {
            key,
            entry: template.entry,
            due,
            grid,
        };
        let outcome = self.respawns.schedule(info);
        if outcome.is_stored() {
            self.persist_respawn(&info);
        }
        Ok(outcome)
    }

    pub fn cancel_respawn(&mut self, key: SpawnKey) -> Option<RespawnInfo> {
        let info = self.respawns.cancel(key)?;
        self.forget_respawn(key);
        Some(info)
    }

    /// Kill an entity and schedule its respawn. Creatures stay as dead
    /// bodies until their respawn; other kinds leave the world. Returns the
    /// respawn time, if one was scheduled.
    pub fn kill(&mut self, id: EntityId) -> Result<Option<UnixTime>, MapError> {
        let entity = self.entities.get_mut(&id).ok_or(MapError::UnknownEntity(id))?;
        if !entity.is_in_world() {
            return Err(MapError::NotInWorld(id));
        }
        let kind = entity.kind();
        let origin = entity.spawn().copied();
        if kind == EntityKind::Creature {
            entity.set_alive(false);
        } else {
            self.queue_removal(id);
        }
        let Some(origin) = origin else {
            return Ok(None);
        };
        if !matches!(kind, EntityKind::Creature | EntityKind::GameObject) {
            return Ok(None);
        }

        let templates = Arc::clone(&self.services.templates);
        let dynamic = templates
            .template(origin.key)
            .and_then(|t| templates.spawn_group(t.group))
            .is_some_and(|g| g.flags.contains(SpawnGroupFlags::DYNAMIC_SPAWN_RATE));
        let delay = if dynamic {
            let zone = self.zone_id(origin.home.x(), origin.home.y());
            let players = self.zone_player_count(zone);
            self.config
                .respawn
                .scaled_delay(origin.key.kind, origin.respawn_delay_secs, players)
        } else {
            origin.respawn_delay_secs
        };

        let due = self.game_time().saturating_add(delay);
        match self.schedule_respawn(origin.key, due) {
            Ok(_) => Ok(self.respawns.due_time(origin.key)),
            Err(error) => {
                tracing::warn!(map = self.id, entity = %id, spawn = %origin.key, %error, "respawn not scheduled");
                Ok(None)
            }
        }
    }

    /// Handle every respawn due at `now`. Returns how many entities were
    /// created.
    pub fn process_respawns(&mut self, now: UnixTime) -> usize {
        let templates = Arc::clone(&self.services.templates);
        let gate = MapRespawnGate {
            templates: &*templates,
            toggled: &self.toggled_groups,
            grids: &self.grids,
            entities: &self.entities,
            spawn_instances: &self.spawn_instances,
            escort_npc_respawn: self.config.respawn.escort_npc_respawn,
        };
        let actions = self.respawns.drain_due(now, &gate);
        let mut created = 0;
        for action in actions {
            if self.apply_respawn(&*templates, action) {
                created += 1;
            }
        }
        created
    }

    fn apply_respawn(&mut self, templates: &dyn SpawnTemplates, action: RespawnAction) -> bool {
        match action {
            RespawnAction::Rescheduled { info } => {
                tracing::debug!(map = self.id, spawn = %info.key, due = info.due, "linked respawn pending, rescheduled");
                self.persist_respawn(&info);
                false
            }
            RespawnAction::Dropped { info, reason } => {
                tracing::debug!(map = self.id, spawn = %info.key, ?reason, "respawn dropped");
                self.forget_respawn(info.key);
                false
            }
            RespawnAction::Released { info } => {
                self.forget_respawn(info.key);
                false
            }
            RespawnAction::Delegated { info, pool } => {
                self.forget_respawn(info.key);
                self.services.pools.respawn_due(pool, info.key);
                false
            }
            RespawnAction::Materialize { info } => {
                self.forget_respawn(info.key);
                let dead: Vec<EntityId> = self
                    .spawn_instances(info.key)
                    .into_iter()
                    .filter(|id| self.entities.get(id).is_some_and(|e| !e.is_alive()))
                    .collect();
                for id in dead {
                    self.detach_entity(id);
                }
                let Some(template) = templates.template(info.key) else {
                    return false;
                };
                self.materialize(template).is_some()
            }
        }
    }

    pub fn is_spawn_group_active(&self, group: u32) -> bool {
        group_active(&*self.services.templates, &self.toggled_groups, group)
    }

    pub fn set_spawn_group_active(&mut self, group: u32, active: bool) -> Result<(), MapError> {
        let flags = self
            .services
            .templates
            .spawn_group(group)
            .ok_or(MapError::UnknownSpawnGroup(group))?
            .flags;
        if flags.contains(SpawnGroupFlags::SYSTEM) {
            return Err(MapError::SystemSpawnGroup(group));
        }
        if active == flags.contains(SpawnGroupFlags::MANUAL_SPAWN) {
            self.toggled_groups.insert(group);
        } else {
            self.toggled_groups.remove(&group);
        }
        Ok(())
    }

    /// Activate a group and spawn its members on loaded grids. Unloaded
    /// grids spawn theirs when they load. Pending respawns are kept unless
    /// `ignore_respawn`; live copies prevent a spawn unless `force`.
    pub fn spawn_group_spawn(
        &mut self,
        group: u32,
        ignore_respawn: bool,
        force: bool,
    ) -> Result<Vec<EntityId>, MapError> {
        self.set_spawn_group_active(group, true)?;
        let templates = Arc::clone(&self.services.templates);
        let mut spawned = Vec::new();
        for key in templates.group_members(self.id, group) {
            let Some(template) = templates.template(key) else {
                continue;
            };
            if ignore_respawn {
                self.cancel_respawn(key);
            } else if self.respawns.contains(key) {
                continue;
            }
            let Some(grid) = template.grid() else {
                continue;
            };
            if !self.grids.is_loaded(grid) {
                continue;
            }
            if !force && self.has_blocking_instance(template) {
                continue;
            }
            if let Some(id) = self.materialize(template) {
                spawned.push(id);
            }
        }
        tracing::info!(map = self.id, instance = self.instance, group, spawned = spawned.len(), "spawn group spawned");
        Ok(spawned)
    }

    /// Remove every live member of a group and deactivate it. Returns the
    /// number of entities removed.
    pub fn spawn_group_despawn(&mut self, group: u32, delete_respawn_times: bool) -> Result<usize, MapError> {
        self.set_spawn_group_active(group, false)?;
        let templates = Arc::clone(&self.services.templates);
        let mut removed = 0;
        for key in templates.group_members(self.id, group) {
            if delete_respawn_times {
                self.cancel_respawn(key);
            }
            for id in self.spawn_instances(key) {
                if self.entities.get(&id).is_some_and(Entity::is_in_world) {
                    self.queue_removal(id);
                    removed += 1;
                }
            }
        }
        tracing::info!(map = self.id, instance = self.instance, group, removed, "spawn group despawned");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::{MapConfig, RespawnMode};
    use crate::content::{SpawnCatalog, SpawnGroup};
    use crate::entity::EntityDesc;
    use crate::store::MemoryRespawnStore;
    use std::path::Path;
    use std::time::Duration;
    use worldgrid_common::Placement;

    const WOLF: SpawnKey = SpawnKey {
        kind: SpawnType::Creature,
        spawn_id: 1,
    };

    fn home() -> GridCoord {
        GridCoord::new(30, 30).unwrap()
    }

    fn wolf() -> SpawnTemplate {
        SpawnTemplate::new(WOLF, 299, MAP, at_grid(home())).with_respawn_delay(30)
    }

    fn map_with(dir: &Path, config: MapConfig, catalog: SpawnCatalog) -> Map {
        Map::new(MAP, 1, config, services(dir).with_templates(catalog))
    }

    fn loaded_map(dir: &Path, catalog: SpawnCatalog) -> Map {
        let mut map = map_with(dir, fast_config(), catalog);
        map.set_game_time(1_000);
        map.ensure_grid_loaded(home());
        map.set_grid_unload_lock(home(), true);
        map
    }

    #[test]
    fn grid_load_spawns_templates() {
        let dir = tempfile::tempdir().unwrap();
        let map = loaded_map(dir.path(), SpawnCatalog::new().with_template(wolf()));
        let ids = map.spawn_instances(WOLF);
        assert_eq!(ids.len(), 1);
        let wolf = map.entity(ids[0]).unwrap();
        assert_eq!(wolf.kind(), EntityKind::Creature);
        assert_eq!(wolf.grid(), home());
    }

    #[test]
    fn killed_creature_respawns_after_its_delay() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = loaded_map(dir.path(), SpawnCatalog::new().with_template(wolf()));
        let first = map.spawn_instances(WOLF)[0];

        assert_eq!(map.kill(first).unwrap(), Some(1_030));
        assert_eq!(map.respawn_time(WOLF), Some(1_030));
        assert!(!map.entity(first).unwrap().is_alive());

        map.update(Duration::from_secs(29));
        assert_eq!(map.spawn_instances(WOLF), vec![first]);
        assert_eq!(map.respawn_time(WOLF), Some(1_030));

        map.update(Duration::from_secs(1));
        let instances = map.spawn_instances(WOLF);
        assert_eq!(instances.len(), 1);
        assert_ne!(instances[0], first);
        assert!(map.entity(instances[0]).unwrap().is_alive());
        assert!(map.entity(first).is_none());
        assert_eq!(map.respawn_time(WOLF), None);
    }

    #[test]
    fn respawn_times_are_persisted_and_restored() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryRespawnStore::new());
        let services = services(dir.path())
            .with_templates(SpawnCatalog::new().with_template(wolf()))
            .with_store(store.clone());

        let mut map = Map::new(MAP, 1, fast_config(), services.clone());
        map.set_game_time(1_000);
        map.ensure_grid_loaded(home());
        let first = map.spawn_instances(WOLF)[0];
        map.kill(first).unwrap();
        assert_eq!(store.get(MAP, 1, WOLF).map(|info| info.due), Some(1_030));

        // A fresh instance of the map skips the spawn while the time is pending.
        let mut restored = Map::new(MAP, 1, fast_config(), services);
        assert_eq!(restored.respawn_time(WOLF), Some(1_030));
        restored.ensure_grid_loaded(home());
        assert!(restored.spawn_instances(WOLF).is_empty());

        assert_eq!(restored.process_respawns(1_030), 1);
        assert!(store.get(MAP, 1, WOLF).is_none());
        assert_eq!(restored.spawn_instances(WOLF).len(), 1);
    }

    #[test]
    fn respawn_for_unloaded_grid_is_released() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = map_with(dir.path(), fast_config(), SpawnCatalog::new().with_template(wolf()));
        map.schedule_respawn(WOLF, 10).unwrap();
        assert_eq!(map.process_respawns(10), 0);
        assert!(map.respawns().is_empty());
        assert!(!map.grids().is_created(home()));

        map.ensure_grid_loaded(home());
        assert_eq!(map.spawn_instances(WOLF).len(), 1);
    }

    #[test]
    fn live_instance_blocks_scheduled_respawn() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = loaded_map(dir.path(), SpawnCatalog::new().with_template(wolf()));
        map.schedule_respawn(WOLF, 1_000).unwrap();
        assert_eq!(map.process_respawns(1_000), 0);
        assert_eq!(map.spawn_instances(WOLF).len(), 1);
        assert!(map.respawns().is_empty());
    }

    #[test]
    fn escorted_quest_giver_may_respawn_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let escort_group = SpawnGroup::new(7, "escort", SpawnGroupFlags::ESCORT_QUEST_NPC);
        let catalog = SpawnCatalog::new()
            .with_group(escort_group)
            .with_template(wolf().in_group(7));
        let mut config = fast_config();
        config.respawn.escort_npc_respawn = true;
        let mut map = map_with(dir.path(), config, catalog);
        map.ensure_grid_loaded(home());
        let guide = map.spawn_instances(WOLF)[0];
        map.set_escorted(guide, true).unwrap();

        map.schedule_respawn(WOLF, 0).unwrap();
        assert_eq!(map.process_respawns(0), 1);
        assert_eq!(map.spawn_instances(WOLF).len(), 2);
    }

    #[test]
    fn dynamic_groups_shrink_delay_with_zone_population() {
        let dir = tempfile::tempdir().unwrap();
        write_flat_tile(dir.path(), home(), 0.0);
        let group = SpawnGroup::new(3, "herbs", SpawnGroupFlags::DYNAMIC_SPAWN_RATE);
        let catalog = SpawnCatalog::new()
            .with_group(group)
            .with_template(wolf().in_group(3).with_respawn_delay(300));
        let mut config = fast_config();
        config.respawn.mode = RespawnMode::Dynamic;
        let mut map = map_with(dir.path(), config, catalog);
        for _ in 0..20 {
            map.add_entity(EntityDesc::player(at_grid(home()))).unwrap();
        }
        let wolf = map.spawn_instances(WOLF)[0];
        // rate 10 over 20 players halves the delay.
        assert_eq!(map.kill(wolf).unwrap(), Some(150));
    }

    #[test]
    fn game_object_kill_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let key = SpawnKey::game_object(4);
        let chest = SpawnTemplate::new(key, 12, MAP, at_grid(home())).with_respawn_delay(60);
        let mut map = loaded_map(dir.path(), SpawnCatalog::new().with_template(chest));
        let id = map.spawn_instances(key)[0];
        assert_eq!(map.kill(id).unwrap(), Some(1_060));
        map.update(Duration::from_millis(10));
        assert!(map.entity(id).is_none());
    }

    #[test]
    fn entities_without_spawn_do_not_respawn() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = map_with(dir.path(), fast_config(), SpawnCatalog::new());
        let id = map
            .add_entity(EntityDesc::new(EntityKind::Creature, Placement::default()))
            .unwrap();
        assert_eq!(map.kill(id).unwrap(), None);
        assert!(matches!(map.kill(EntityId::new(EntityKind::Creature, 999)), Err(MapError::UnknownEntity(_))));
    }

    #[test]
    fn manual_groups_spawn_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = SpawnCatalog::new()
            .with_group(SpawnGroup::new(5, "event", SpawnGroupFlags::MANUAL_SPAWN))
            .with_template(wolf().in_group(5));
        let mut map = loaded_map(dir.path(), catalog);
        assert!(!map.is_spawn_group_active(5));
        assert!(map.spawn_instances(WOLF).is_empty());

        let spawned = map.spawn_group_spawn(5, false, false).unwrap();
        assert_eq!(spawned.len(), 1);
        assert!(map.is_spawn_group_active(5));
        assert!(map.spawn_group_spawn(5, false, false).unwrap().is_empty());

        assert_eq!(map.spawn_group_despawn(5, true).unwrap(), 1);
        assert!(!map.is_spawn_group_active(5));
        map.update(Duration::from_millis(10));
        assert!(map.spawn_instances(WOLF).is_empty());
    }

    #[test]
    fn inactive_group_drops_due_respawn() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = SpawnCatalog::new()
            .with_group(SpawnGroup::new(5, "event", SpawnGroupFlags::empty()))
            .with_template(wolf().in_group(5));
        let mut map = loaded_map(dir.path(), catalog);
        let wolf = map.spawn_instances(WOLF)[0];
        map.kill(wolf).unwrap();
        map.set_spawn_group_active(5, false).unwrap();
        assert_eq!(map.process_respawns(1_030), 0);
        assert!(map.respawns().is_empty());
    }

    #[test]
    fn system_and_unknown_groups_cannot_be_toggled() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = map_with(dir.path(), fast_config(), SpawnCatalog::new());
        assert!(matches!(map.set_spawn_group_active(0, false), Err(MapError::SystemSpawnGroup(0))));
        assert!(matches!(map.spawn_group_spawn(9, false, false), Err(MapError::UnknownSpawnGroup(9))));
        assert!(map.is_spawn_group_active(0));
    }

    #[test]
    fn unknown_spawns_cannot_be_scheduled() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Map::new(MAP, 1, MapConfig::default(), services(dir.path()));
        assert!(matches!(map.schedule_respawn(WOLF, 10), Err(MapError::UnknownSpawn(_))));
    }
}
