//! Complete updates that rebuild the cache from a datasource

use crate::content::ContentCache;
use crate::update::ContentCacheUpdate;
use sos_common::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Fills an empty cache from the authoritative source
pub trait CacheFeeder: Send + Sync + fmt::Debug {
    fn update_cache(&self, cache: &mut ContentCache) -> Result<()>;
}

/// Feeder that leaves the cache empty
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyFeeder;

impl CacheFeeder for EmptyFeeder {
    fn update_cache(&self, _cache: &mut ContentCache) -> Result<()> {
        Ok(())
    }
}

/// Feeder reading a JSON-encoded [`ContentCache`] from disk
///
/// The file is read on every rebuild, so edits are picked up by the next
/// scheduled update.
#[derive(Debug, Clone)]
pub struct JsonFileFeeder {
    path: PathBuf,
}

impl JsonFileFeeder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheFeeder for JsonFileFeeder {
    fn update_cache(&self, cache: &mut ContentCache) -> Result<()> {
        let data = std::fs::read(&self.path).map_err(|e| {
            Error::datasource(format!("failed to read {}: {e}", self.path.display()))
        })?;
        let mut loaded: ContentCache = serde_json::from_slice(&data).map_err(|e| {
            Error::datasource(format!("failed to parse {}: {e}", self.path.display()))
        })?;

        // Features without explicit coordinates use the configured code
        loaded.set_default_epsg_code(cache.default_epsg_code());
        *cache = loaded;

        debug!(
            "Loaded {} offerings and {} procedures from {}",
            cache.offerings().len(),
            cache.procedures().len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Complete update asking a [`CacheFeeder`] for the full content
///
/// The feeder is queried when the update runs, not when it is submitted,
/// so callers merged into a waiting update still observe fresh content.
#[derive(Debug, Clone)]
pub struct DatasourceCacheUpdate {
    feeder: Arc<dyn CacheFeeder>,
}

impl DatasourceCacheUpdate {
    pub fn new(feeder: Arc<dyn CacheFeeder>) -> Self {
        Self { feeder }
    }
}

impl ContentCacheUpdate for DatasourceCacheUpdate {
    fn is_complete_update(&self) -> bool {
        true
    }

    fn execute(&self, cache: &mut ContentCache) -> Result<()> {
        info!("Starting update of the content cache from the datasource");
        cache.clear();
        self.feeder.update_cache(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_json_feeder_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("datasource.json");

        let mut source = ContentCache::default();
        source.add_offering("off-1");
        source.add_procedure("proc-1");
        source.link_offering_procedure("off-1", "proc-1");
        std::fs::write(&path, serde_json::to_vec(&source).unwrap()).unwrap();

        let update = DatasourceCacheUpdate::new(Arc::new(JsonFileFeeder::new(&path)));
        assert!(update.is_complete_update());

        let mut cache = ContentCache::default();
        cache.add_offering("stale");
        update.execute(&mut cache).unwrap();

        assert!(!cache.has_offering("stale"));
        assert!(cache.procedures_for_offering("off-1").contains("proc-1"));
    }

    #[test]
    fn test_json_feeder_errors_are_datasource_errors() {
        let dir = tempdir().unwrap();
        let feeder = JsonFileFeeder::new(dir.path().join("missing.json"));
        let mut cache = ContentCache::default();
        assert!(matches!(
            feeder.update_cache(&mut cache),
            Err(Error::Datasource(_))
        ));

        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            JsonFileFeeder::new(&path).update_cache(&mut cache),
            Err(Error::Datasource(_))
        ));
    }

    #[test]
    fn test_empty_feeder_clears() {
        let update = DatasourceCacheUpdate::new(Arc::new(EmptyFeeder));
        let mut cache = ContentCache::with_default_epsg_code(31467);
        cache.add_offering("off-1");
        update.execute(&mut cache).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.default_epsg_code(), 31467);
    }
}
