use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use worldgrid_kernel::{MapConfig, MapServices, SpawnCatalog};
use worldgrid_persist::FileRespawnStore;
use worldgrid_terrain::{MapCatalog, StaticAreaTable, TerrainRegistry};

/// World setup read from YAML. Relative paths are resolved against the
/// directory of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Directory holding `maps/*.map`.
    pub data_dir: PathBuf,
    pub catalog: MapCatalog,
    pub map: MapConfig,
    /// Spawn catalog (YAML).
    pub spawns: Option<PathBuf>,
    /// Area and liquid type table (YAML).
    pub areas: Option<PathBuf>,
    /// Directory of the respawn time store.
    pub respawn_store: Option<PathBuf>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            catalog: MapCatalog::new(),
            map: MapConfig::default(),
            spawns: None,
            areas: None,
            respawn_store: None,
        }
    }
}

impl WorldConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading world config {}", path.display()))?;
        let mut config: WorldConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing world config {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.data_dir);
        for path in [&mut self.spawns, &mut self.areas, &mut self.respawn_store]
            .into_iter()
            .flatten()
        {
            resolve(path);
        }
    }

    pub fn registry(&self) -> TerrainRegistry {
        TerrainRegistry::new(&self.data_dir, self.catalog.clone())
    }

    pub fn area_table(&self) -> anyhow::Result<StaticAreaTable> {
        let Some(path) = &self.areas else {
            return Ok(StaticAreaTable::new().with_default_liquids());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading area table {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing area table {}", path.display()))
    }

    /// Services for every map of the world.
    pub fn services(&self) -> anyhow::Result<MapServices> {
        let mut services = MapServices::new(Arc::new(self.registry())).with_areas(self.area_table()?);
        if let Some(path) = &self.spawns {
            let catalog = SpawnCatalog::load(path)?;
            tracing::info!(templates = catalog.len(), path = %path.display(), "spawn catalog loaded");
            services = services.with_templates(catalog);
        }
        if let Some(path) = &self.respawn_store {
            let store = FileRespawnStore::open(path)
                .with_context(|| format!("opening respawn store {}", path.display()))?;
            services = services.with_store(Arc::new(store));
        }
        Ok(services)
    }
}
