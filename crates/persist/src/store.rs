//! File-backed respawn store.
//!
//! Layout inside the store directory:
//! ```text
//! respawns.meta.json       - schema version of the directory
//! respawns/
//!   0000_000001.json       - rows of map 0, instance 1
//! ```

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use worldgrid_common::{InstanceId, MapId, SpawnKey};
use worldgrid_kernel::{RespawnInfo, RespawnStore, StoreError};

use crate::atomic::{remove_if_exists, write_bytes_atomic};

pub const RESPAWN_SCHEMA_VERSION: u32 = 1;

const META_FILE: &str = "respawns.meta.json";
const ROWS_DIR: &str = "respawns";

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed for {file}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        file: String,
        expected: String,
        actual: String,
    },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("{file} holds rows of map {map} instance {instance}")]
    WrongInstance {
        file: String,
        map: MapId,
        instance: InstanceId,
    },
}

impl From<PersistError> for StoreError {
    fn from(error: PersistError) -> Self {
        match error {
            PersistError::Io(io) => StoreError::Io(io),
            other => StoreError::Corrupt(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
}

/// On-disk form of one instance's rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespawnFile {
    pub schema_version: u32,
    pub map: MapId,
    pub instance: InstanceId,
    /// SHA-256 over the JSON encoding of `rows`.
    pub sha256: String,
    pub rows: Vec<RespawnInfo>,
}

type Rows = BTreeMap<SpawnKey, RespawnInfo>;

/// [`RespawnStore`] keeping one JSON file per map instance.
///
/// Rows of an instance are cached after first use; every change rewrites
/// that instance's file.
#[derive(Debug)]
pub struct FileRespawnStore {
    root: PathBuf,
    cache: Mutex<HashMap<(MapId, InstanceId), Rows>>,
}

impl FileRespawnStore {
    /// Open or create a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(ROWS_DIR))?;

        let meta_path = root.join(META_FILE);
        if meta_path.exists() {
            let meta: StoreMeta = serde_json::from_slice(&std::fs::read(&meta_path)?)?;
            check_schema(meta.schema_version)?;
        } else {
            let meta = StoreMeta {
                schema_version: RESPAWN_SCHEMA_VERSION,
            };
            write_bytes_atomic(&meta_path, &serde_json::to_vec_pretty(&meta)?)?;
        }
        tracing::debug!(root = %root.display(), "respawn store opened");

        Ok(Self {
            root,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_path(&self, map: MapId, instance: InstanceId) -> PathBuf {
        self.root
            .join(ROWS_DIR)
            .join(format!("{map:04}_{instance:06}.json"))
    }

    /// Instances that have a file, in (map, instance) order.
    pub fn instances(&self) -> Result<Vec<(MapId, InstanceId)>, PersistError> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(self.root.join(ROWS_DIR))? {
            let name = entry?.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            let Some((map, instance)) = stem.split_once('_') else {
                continue;
            };
            if let (Ok(map), Ok(instance)) = (map.parse(), instance.parse()) {
                found.push((map, instance));
            }
        }
        found.sort_unstable();
        Ok(found)
    }

    /// Read and verify one instance's file without touching the cache.
    pub fn read_rows(&self, map: MapId, instance: InstanceId) -> Result<Vec<RespawnInfo>, PersistError> {
        let path = self.file_path(map, instance);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };
        let file: RespawnFile = serde_json::from_slice(&bytes)?;
        check_schema(file.schema_version)?;
        let name = path.display().to_string();
        if file.map != map || file.instance != instance {
            return Err(PersistError::WrongInstance {
                file: name,
                map: file.map,
                instance: file.instance,
            });
        }
        let actual = rows_hash(&file.rows)?;
        if actual != file.sha256 {
            return Err(PersistError::IntegrityMismatch {
                file: name,
                expected: file.sha256,
                actual,
            });
        }
        Ok(file.rows)
    }

    /// Verify every file in the store.
    pub fn verify_integrity(&self) -> Result<usize, PersistError> {
        let mut rows = 0;
        for (map, instance) in self.instances()? {
            rows += self.read_rows(map, instance)?.len();
        }
        Ok(rows)
    }

    fn write_rows(&self, map: MapId, instance: InstanceId, rows: &Rows) -> Result<(), PersistError> {
        let path = self.file_path(map, instance);
        if rows.is_empty() {
            remove_if_exists(&path)?;
            return Ok(());
        }
        let rows: Vec<RespawnInfo> = rows.values().copied().collect();
        let file = RespawnFile {
            schema_version: RESPAWN_SCHEMA_VERSION,
            map,
            instance,
            sha256: rows_hash(&rows)?,
            rows,
        };
        write_bytes_atomic(&path, &serde_json::to_vec_pretty(&file)?)?;
        Ok(())
    }

    fn update(
        &self,
        map: MapId,
        instance: InstanceId,
        change: impl FnOnce(&mut Rows) -> bool,
    ) -> Result<(), PersistError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let rows = match cache.entry((map, instance)) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                let loaded = self.read_rows(map, instance)?;
                slot.insert(loaded.into_iter().map(|info| (info.key, info)).collect())
            }
        };
        if change(rows) {
            self.write_rows(map, instance, rows)?;
        }
        Ok(())
    }
}

impl RespawnStore for FileRespawnStore {
    fn load(&self, map: MapId, instance: InstanceId) -> Result<Vec<RespawnInfo>, StoreError> {
        let rows = self.read_rows(map, instance)?;
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.insert(
            (map, instance),
            rows.iter().map(|info| (info.key, *info)).collect(),
        );
        Ok(rows)
    }

    fn save(&self, map: MapId, instance: InstanceId, info: &RespawnInfo) -> Result<(), StoreError> {
        let info = *info;
        self.update(map, instance, |rows| rows.insert(info.key, info) != Some(info))?;
        Ok(())
    }

    fn remove(&self, map: MapId, instance: InstanceId, key: SpawnKey) -> Result<(), StoreError> {
        self.update(map, instance, |rows| rows.remove(&key).is_some())?;
        Ok(())
    }
}

fn check_schema(version: u32) -> Result<(), PersistError> {
    if version != RESPAWN_SCHEMA_VERSION {
        return Err(PersistError::SchemaMismatch {
            file_version: version,
            expected_version: RESPAWN_SCHEMA_VERSION,
        });
    }
    Ok(())
}

fn rows_hash(rows: &[RespawnInfo]) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(&serde_json::to_vec(rows)?))
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
