//! A running map instance: grids, entities, relocation and respawns.
//!
//! One map is updated by one worker at a time. Each [`Map::update`] runs:
//! grid activation around players and active objects, per-entity driving,
//! the relocation drain, deferred callbacks, due respawns, the remove-list,
//! the grid lifecycle, and finally the cell integrity check.

mod grids;
mod movement;
mod queries;
mod spawning;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use worldgrid_common::{
    CellCoord, EntityId, IdGenerator, InstanceId, KindMask, MapId, SpawnKey, UnixTime,
};
use worldgrid_stream::{ExpiryTimer, GridIndex, TickTimer};
use worldgrid_terrain::{AreaTable, StaticAreaTable, TerrainInfo, TerrainRegistry};

use crate::config::MapConfig;
use crate::content::{ContentLoader, NoPools, PoolManager, SpawnCatalog, SpawnTemplates, TemplateLoader};
use crate::entity::{Entity, EntityDesc, EntityFlags};
use crate::error::MapError;
use crate::relocation::RelocationQueue;
use crate::respawn::RespawnScheduler;
use crate::store::RespawnStore;

pub use movement::MoveOutcome;
pub use queries::MapStats;

/// Per-entity hook run for every entity in an active cell each tick.
pub trait EntityDriver: Send {
    fn update(&mut self, map: &mut Map, id: EntityId, diff: Duration);
}

impl<F> EntityDriver for F
where
    F: FnMut(&mut Map, EntityId, Duration) + Send,
{
    fn update(&mut self, map: &mut Map, id: EntityId, diff: Duration) {
        self(map, id, diff)
    }
}

/// Work applied after the current pass over the map.
pub type DeferredCallback = Box<dyn FnOnce(&mut Map) + Send>;

/// Shared collaborators handed to every map instance.
#[derive(Clone)]
pub struct MapServices {
    pub terrain: Arc<TerrainRegistry>,
    pub ids: Arc<IdGenerator>,
    pub areas: Arc<dyn AreaTable>,
    pub templates: Arc<dyn SpawnTemplates>,
    pub loader: Arc<dyn ContentLoader>,
    pub pools: Arc<dyn PoolManager>,
    pub store: Option<Arc<dyn RespawnStore>>,
}

impl MapServices {
    /// Services with an empty spawn catalog, default liquids and no pools.
    pub fn new(terrain: Arc<TerrainRegistry>) -> Self {
        Self {
            terrain,
            ids: Arc::new(IdGenerator::new()),
            areas: Arc::new(StaticAreaTable::new().with_default_liquids()),
            templates: Arc::new(SpawnCatalog::new()),
            loader: Arc::new(TemplateLoader),
            pools: Arc::new(NoPools),
            store: None,
        }
    }

    pub fn with_ids(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_areas(mut self, areas: impl AreaTable + 'static) -> Self {
        self.areas = Arc::new(areas);
        self
    }

    pub fn with_templates(mut self, templates: impl SpawnTemplates + 'static) -> Self {
        self.templates = Arc::new(templates);
        self
    }

    pub fn with_loader(mut self, loader: impl ContentLoader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn with_pools(mut self, pools: Arc<dyn PoolManager>) -> Self {
        self.pools = pools;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn RespawnStore>) -> Self {
        self.store = Some(store);
        self
    }
}

impl fmt::Debug for MapServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapServices")
            .field("data_dir", &self.terrain.data_dir())
            .field("store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

pub struct Map {
    id: MapId,
    instance: InstanceId,
    config: MapConfig,
    services: MapServices,
    terrain: Arc<TerrainInfo>,
    grids: GridIndex,
    entities: BTreeMap<EntityId, Entity>,
    players: BTreeSet<EntityId>,
    active_objects: BTreeSet<EntityId>,
    spawn_instances: HashMap<SpawnKey, BTreeSet<EntityId>>,
    relocation: RelocationQueue,
    respawns: RespawnScheduler,
    remove_list: BTreeSet<EntityId>,
    deferred: Vec<DeferredCallback>,
    driver: Option<Box<dyn EntityDriver>>,
    toggled_groups: HashSet<u32>,
    respawn_timer: ExpiryTimer,
    clock_ms: u64,
    ticks: u64,
    tick_timer: TickTimer,
    integrity_violations: u64,
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("id", &self.id)
            .field("instance", &self.instance)
            .field("entities", &self.entities.len())
            .field("grids", &self.grids.stats().live_grids)
            .finish_non_exhaustive()
    }
}

impl Map {
    /// Create an instance. Pending respawn times are read from the store;
    /// store failures are logged and the map starts with an empty schedule.
    pub fn new(id: MapId, instance: InstanceId, config: MapConfig, services: MapServices) -> Self {
        let terrain = services.terrain.load_terrain(id);
        let seed = (u64::from(id) << 32) | u64::from(instance);
        let mut respawns = RespawnScheduler::with_seed(seed);
        if let Some(store) = &services.store {
            match store.load(id, instance) {
                Ok(rows) => {
                    for info in rows {
                        if respawns.contains(info.key) {
                            tracing::warn!(map = id, instance, spawn = %info.key, "duplicate stored respawn skipped");
                            continue;
                        }
                        respawns.schedule(info);
                    }
                }
                Err(error) => {
                    tracing::warn!(map = id, instance, %error, "failed to load respawn times");
                }
            }
        }
        let respawn_timer = ExpiryTimer::new(config.respawn.check_interval());
        let tick_timer = TickTimer::new(config.tick_history);
        tracing::info!(map = id, instance, pending_respawns = respawns.len(), "map created");
        Self {
            id,
            instance,
            config,
            services,
            terrain,
            grids: GridIndex::new(),
            entities: BTreeMap::new(),
            players: BTreeSet::new(),
            active_objects: BTreeSet::new(),
            spawn_instances: HashMap::new(),
            relocation: RelocationQueue::new(),
            respawns,
            remove_list: BTreeSet::new(),
            deferred: Vec::new(),
            driver: None,
            toggled_groups: HashSet::new(),
            respawn_timer,
            clock_ms: 0,
            ticks: 0,
            tick_timer,
            integrity_violations: 0,
        }
    }

    pub fn id(&self) -> MapId {
        self.id
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn services(&self) -> &MapServices {
        &self.services
    }

    pub fn terrain(&self) -> &Arc<TerrainInfo> {
        &self.terrain
    }

    pub fn grids(&self) -> &GridIndex {
        &self.grids
    }

    /// Game time in whole seconds.
    pub fn game_time(&self) -> UnixTime {
        self.clock_ms / 1000
    }

    pub fn set_game_time(&mut self, now: UnixTime) {
        self.clock_ms = now.saturating_mul(1000);
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    pub fn set_driver(&mut self, driver: impl EntityDriver + 'static) {
        self.driver = Some(Box::new(driver));
    }

    pub fn clear_driver(&mut self) {
        self.driver = None;
    }

    /// Run `callback` once, after this tick's entity updates and relocations.
    pub fn defer(&mut self, callback: impl FnOnce(&mut Map) + Send + 'static) {
        self.deferred.push(Box::new(callback));
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn players(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.players.iter().copied()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Live instances created from `key`.
    pub fn spawn_instances(&self, key: SpawnKey) -> Vec<EntityId> {
        self.spawn_instances
            .get(&key)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Add an entity, loading its grid first.
    pub fn add_entity(&mut self, desc: EntityDesc) -> Result<EntityId, MapError> {
        let cell = CellCoord::from_position(desc.placement.x(), desc.placement.y())?;
        self.ensure_grid_loaded(cell.grid());
        self.place_new_entity(desc)
    }

    /// Take an entity out of the world; it is dropped at the end of the tick.
    pub fn remove_entity(&mut self, id: EntityId) -> Result<(), MapError> {
        if !self.entities.contains_key(&id) {
            return Err(MapError::UnknownEntity(id));
        }
        self.queue_removal(id);
        Ok(())
    }

    /// Toggle the active-object flag. Active objects keep their grid
    /// ticking and pin their respawn grid against unload.
    pub fn set_active(&mut self, id: EntityId, active: bool) -> Result<(), MapError> {
        let entity = self.entities.get_mut(&id).ok_or(MapError::UnknownEntity(id))?;
        entity.set_flag(EntityFlags::ACTIVE, active);
        if entity.is_player() {
            return Ok(());
        }
        if active {
            self.pin_active(id);
        } else {
            self.unpin_active(id);
        }
        Ok(())
    }

    pub fn set_escorted(&mut self, id: EntityId, escorted: bool) -> Result<(), MapError> {
        let entity = self.entities.get_mut(&id).ok_or(MapError::UnknownEntity(id))?;
        entity.set_flag(EntityFlags::ESCORTED, escorted);
        Ok(())
    }

    /// Advance the map by `diff`.
    pub fn update(&mut self, diff: Duration) {
        let span = tracing::debug_span!("map_update", map = self.id, instance = self.instance);
        let _guard = span.enter();
        let started = Instant::now();
        self.clock_ms = self.clock_ms.saturating_add(diff.as_millis() as u64);
        self.ticks += 1;

        let active_cells = self.activate_around_anchors();
        self.drive_entities(&active_cells, diff);
        self.drain_relocations();
        self.run_deferred();

        self.respawn_timer.update(diff);
        if self.respawn_timer.passed() {
            self.process_respawns(self.game_time());
            self.respawn_timer.reset(self.config.respawn.check_interval());
        }

        self.process_remove_list();
        self.update_grids(diff);
        if self.config.integrity_check {
            self.check_integrity();
        }
        self.tick_timer.record(started.elapsed());
    }

    fn drive_entities(&mut self, cells: &BTreeSet<CellCoord>, diff: Duration) {
        let Some(mut driver) = self.driver.take() else {
            return;
        };
        let ids: Vec<EntityId> = cells
            .iter()
            .filter_map(|cell| self.grids.cell(*cell))
            .flat_map(|cell| cell.iter(KindMask::all()))
            .collect();
        for id in ids {
            if self.entities.get(&id).is_some_and(Entity::is_in_world) {
                driver.update(self, id, diff);
            }
        }
        if self.driver.is_none() {
            self.driver = Some(driver);
        }
    }

    fn run_deferred(&mut self) {
        let pending = std::mem::take(&mut self.deferred);
        for callback in pending {
            callback(self);
        }
    }

    /// Register a new entity in its (already created) grid.
    pub(crate) fn place_new_entity(&mut self, desc: EntityDesc) -> Result<EntityId, MapError> {
        let cell = CellCoord::from_position(desc.placement.x(), desc.placement.y())?;
        self.ensure_grid_created(cell.grid());
        let id = self.services.ids.next(desc.kind);
        let entity = Entity::new(id, desc, cell);
        if let Some(slot) = self.grids.cell_mut(cell) {
            slot.insert(entity.bucket(), id);
        }
        if entity.is_player() {
            self.players.insert(id);
        }
        if let Some(key) = entity.spawn_key() {
            self.spawn_instances.entry(key).or_default().insert(id);
        }
        let pin = entity.is_active() && !entity.is_player();
        self.entities.insert(id, entity);
        if pin {
            self.pin_active(id);
        }
        tracing::trace!(entity = %id, ?cell, "entity added");
        Ok(id)
    }

    fn pin_active(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get(&id) else {
            return;
        };
        self.active_objects.insert(id);
        if entity.pinned_grid().is_some() {
            return;
        }
        let home = entity.home_grid();
        self.ensure_grid_loaded(home);
        if let Some(grid) = self.grids.get_mut(home) {
            grid.increment_unload_active_lock();
        }
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.set_pinned_grid(Some(home));
        }
    }

    fn unpin_active(&mut self, id: EntityId) {
        self.active_objects.remove(&id);
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        if let Some(grid) = entity.pinned_grid() {
            entity.set_pinned_grid(None);
            if let Some(grid) = self.grids.get_mut(grid) {
                grid.decrement_unload_active_lock();
            }
        }
    }

    /// Hide an entity from its cell and put it on the remove-list.
    pub(crate) fn queue_removal(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        entity.set_in_world(false);
        let cell = entity.cell();
        if let Some(slot) = self.grids.cell_mut(cell) {
            slot.remove(id);
        }
        self.relocation.forget(id);
        self.remove_list.insert(id);
    }

    /// Drop an entity and every index entry pointing at it.
    pub(crate) fn detach_entity(&mut self, id: EntityId) -> Option<Entity> {
        self.unpin_active(id);
        let entity = self.entities.remove(&id)?;
        if let Some(slot) = self.grids.cell_mut(entity.cell()) {
            slot.remove(id);
        }
        self.players.remove(&id);
        self.relocation.forget(id);
        self.remove_list.remove(&id);
        if let Some(key) = entity.spawn_key() {
            if let Some(ids) = self.spawn_instances.get_mut(&key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.spawn_instances.remove(&key);
                }
            }
        }
        tracing::trace!(entity = %id, "entity removed");
        Some(entity)
    }

    /// Drop every entity on the remove-list. Returns how many were dropped.
    pub fn process_remove_list(&mut self) -> usize {
        let pending = std::mem::take(&mut self.remove_list);
        let count = pending.len();
        for id in pending {
            self.detach_entity(id);
        }
        count
    }
}
