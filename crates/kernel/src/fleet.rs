//! All map instances of a process, stepped in parallel.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::time::Duration;

use rayon::prelude::*;
use worldgrid_common::{InstanceId, MapId};

use crate::config::MapConfig;
use crate::error::MapError;
use crate::map::{Map, MapServices, MapStats};

/// Owns map instances keyed by (map, instance). Each map is updated by one
/// rayon worker per tick; maps share only the services' terrain registry
/// and id generator.
#[derive(Debug)]
pub struct MapFleet {
    maps: BTreeMap<(MapId, InstanceId), Map>,
    config: MapConfig,
    services: MapServices,
}

impl MapFleet {
    pub fn new(config: MapConfig, services: MapServices) -> Self {
        Self {
            maps: BTreeMap::new(),
            config,
            services,
        }
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn services(&self) -> &MapServices {
        &self.services
    }

    /// Create an instance with the fleet's default config.
    pub fn create(&mut self, map: MapId, instance: InstanceId) -> Result<&mut Map, MapError> {
        let config = self.config.clone();
        self.create_with(map, instance, config)
    }

    pub fn create_with(
        &mut self,
        map: MapId,
        instance: InstanceId,
        config: MapConfig,
    ) -> Result<&mut Map, MapError> {
        match self.maps.entry((map, instance)) {
            Entry::Occupied(_) => Err(MapError::DuplicateInstance { map, instance }),
            Entry::Vacant(slot) => {
                Ok(slot.insert(Map::new(map, instance, config, self.services.clone())))
            }
        }
    }

    pub fn get(&self, map: MapId, instance: InstanceId) -> Option<&Map> {
        self.maps.get(&(map, instance))
    }

    pub fn get_mut(&mut self, map: MapId, instance: InstanceId) -> Option<&mut Map> {
        self.maps.get_mut(&(map, instance))
    }

    /// Unload and drop an instance.
    pub fn remove(&mut self, map: MapId, instance: InstanceId) -> Option<Map> {
        let mut removed = self.maps.remove(&(map, instance))?;
        removed.unload_all();
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn maps(&self) -> impl Iterator<Item = &Map> + '_ {
        self.maps.values()
    }

    /// Step every instance by `diff`.
    pub fn update(&mut self, diff: Duration) {
        let _span = tracing::debug_span!("fleet_update", maps = self.maps.len()).entered();
        self.maps.par_iter_mut().for_each(|(_, map)| map.update(diff));
    }

    pub fn stats(&self) -> Vec<MapStats> {
        self.maps.values().map(Map::stats).collect()
    }

    /// Unload every instance.
    pub fn shutdown(&mut self) {
        for map in self.maps.values_mut() {
            map.unload_all();
        }
        self.maps.clear();
        tracing::info!("map fleet shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityDesc;
    use std::sync::Arc;
    use worldgrid_common::Placement;
    use worldgrid_terrain::{MapCatalog, TerrainRegistry};

    fn fleet(dir: &std::path::Path) -> MapFleet {
        let registry = Arc::new(TerrainRegistry::new(dir, MapCatalog::new().with_child(0, 10)));
        MapFleet::new(MapConfig::default(), MapServices::new(registry))
    }

    #[test]
    fn duplicate_instances_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut fleet = fleet(dir.path());
        fleet.create(0, 1).unwrap();
        fleet.create(0, 2).unwrap();
        assert!(matches!(
            fleet.create(0, 1),
            Err(MapError::DuplicateInstance { map: 0, instance: 1 })
        ));
        assert_eq!(fleet.len(), 2);
    }

    #[test]
    fn instances_of_one_terrain_share_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut fleet = fleet(dir.path());
        fleet.create(0, 1).unwrap();
        fleet.create(10, 1).unwrap();
        let root = Arc::clone(fleet.get(0, 1).unwrap().terrain());
        assert!(Arc::ptr_eq(&root, fleet.get(10, 1).unwrap().terrain()));
    }

    #[test]
    fn update_steps_every_instance() {
        let dir = tempfile::tempdir().unwrap();
        let mut fleet = fleet(dir.path());
        for instance in 0..4 {
            let map = fleet.create(0, instance).unwrap();
            map.add_entity(EntityDesc::player(Placement::default())).unwrap();
        }
        fleet.update(Duration::from_millis(100));
        fleet.update(Duration::from_millis(100));
        let stats = fleet.stats();
        assert_eq!(stats.len(), 4);
        assert!(stats.iter().all(|s| s.ticks == 2 && s.players == 1));
    }

    #[test]
    fn remove_and_shutdown_unload_maps() {
        let dir = tempfile::tempdir().unwrap();
        let mut fleet = fleet(dir.path());
        fleet
            .create(0, 1)
            .unwrap()
            .add_entity(EntityDesc::player(Placement::default()))
            .unwrap();
        fleet.create(0, 2).unwrap();

        let removed = fleet.remove(0, 1).unwrap();
        assert_eq!(removed.entity_count(), 0);
        assert_eq!(removed.grids().stats().live_grids, 0);
        assert!(fleet.get(0, 1).is_none());

        fleet.shutdown();
        assert!(fleet.is_empty());
    }
}
