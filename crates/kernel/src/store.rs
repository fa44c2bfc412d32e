use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use worldgrid_common::{InstanceId, MapId, SpawnKey};

use crate::respawn::RespawnInfo;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt respawn data: {0}")]
    Corrupt(String),

    #[error("respawn store error: {0}")]
    Backend(String),
}

/// Persistence of pending respawn times per map instance.
///
/// Failures are reported to the caller; maps log them and keep running on
/// their in-memory schedule.
pub trait RespawnStore: Send + Sync {
    fn load(&self, map: MapId, instance: InstanceId) -> Result<Vec<RespawnInfo>, StoreError>;

    fn save(&self, map: MapId, instance: InstanceId, info: &RespawnInfo) -> Result<(), StoreError>;

    fn remove(&self, map: MapId, instance: InstanceId, key: SpawnKey) -> Result<(), StoreError>;
}

/// Process-local store, used by tests and tools.
#[derive(Debug, Default)]
pub struct MemoryRespawnStore {
    rows: Mutex<BTreeMap<(MapId, InstanceId, SpawnKey), RespawnInfo>>,
}

impl MemoryRespawnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, map: MapId, instance: InstanceId, key: SpawnKey) -> Option<RespawnInfo> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(map, instance, key))
            .copied()
    }

    /// Insert a row without de-duplication checks, e.g. to seed a test.
    pub fn insert(&self, map: MapId, instance: InstanceId, info: RespawnInfo) {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((map, instance, info.key), info);
    }
}

impl RespawnStore for MemoryRespawnStore {
    fn load(&self, map: MapId, instance: InstanceId) -> Result<Vec<RespawnInfo>, StoreError> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows
            .iter()
            .filter(|((m, i, _), _)| *m == map && *i == instance)
            .map(|(_, info)| *info)
            .collect())
    }

    fn save(&self, map: MapId, instance: InstanceId, info: &RespawnInfo) -> Result<(), StoreError> {
        self.insert(map, instance, *info);
        Ok(())
    }

    fn remove(&self, map: MapId, instance: InstanceId, key: SpawnKey) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(map, instance, key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldgrid_common::GridCoord;

    fn info(id: u64, due: u64) -> RespawnInfo {
        RespawnInfo {
            key: SpawnKey::creature(id),
            entry: 1,
            due,
            grid: GridCoord::new(1, 1).unwrap(),
        }
    }

    #[test]
    fn rows_are_scoped_by_instance() {
        let store = MemoryRespawnStore::new();
        store.save(0, 1, &info(1, 10)).unwrap();
        store.save(0, 2, &info(1, 20)).unwrap();
        store.save(1, 1, &info(2, 30)).unwrap();

        assert_eq!(store.load(0, 1).unwrap(), vec![info(1, 10)]);
        assert_eq!(store.load(0, 2).unwrap(), vec![info(1, 20)]);
        assert_eq!(store.len(), 3);

        store.remove(0, 1, SpawnKey::creature(1)).unwrap();
        assert!(store.load(0, 1).unwrap().is_empty());
        assert_eq!(store.get(0, 2, SpawnKey::creature(1)), Some(info(1, 20)));
    }

    #[test]
    fn save_overwrites_existing_row() {
        let store = MemoryRespawnStore::new();
        store.save(0, 0, &info(1, 10)).unwrap();
        store.save(0, 0, &info(1, 5)).unwrap();
        assert_eq!(store.load(0, 0).unwrap(), vec![info(1, 5)]);
    }
}
