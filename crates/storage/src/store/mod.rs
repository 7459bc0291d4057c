#![forbid(unsafe_code)]

mod backend;
mod config;
mod dag;
mod error;
mod items;
mod locks;
mod tags;
mod versions;

pub use backend::{
    Backend, ItemRow, MemoryBackend, RichVersionRow, SqliteBackend, TagRow, TagScope, UnitOfWork,
    VersionRow, Write, WriteBatch, execute_atomically,
};
pub use config::{BackendKind, CatalogConfig};
pub use dag::VersionHistoryDagStore;
pub use error::{ErrorKind, StoreError};
pub use items::{CatalogItem, ItemEngine};
pub use locks::ItemLocks;
pub use tags::TagStore;
pub use versions::{CatalogVersion, RichVersionStore, VersionEngine};

use lc_core::IdGenerator;
use lc_core::tags::TagMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Entry point for the request layer: one backend, one id generator and the
/// per-item locks shared by every operation.
#[derive(Debug)]
pub struct Catalog {
    backend: Arc<dyn Backend>,
    ids: IdGenerator,
    locks: ItemLocks,
}

impl Catalog {
    pub fn open(config: &CatalogConfig) -> Result<Self, StoreError> {
        let backend: Arc<dyn Backend> = match config.backend {
            BackendKind::Sqlite => Arc::new(SqliteBackend::open(
                &config.storage_dir,
                Duration::from_millis(config.busy_timeout_ms),
            )?),
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
        };
        let ids = IdGenerator::new(config.machine_id, config.num_machines)
            .map_err(|err| StoreError::InvalidArgument(err.message().to_string()))?;
        let catalog = Self::new(backend, ids)?;
        info!(
            backend = config.backend.as_str(),
            machine_id = config.machine_id,
            num_machines = config.num_machines,
            "catalog opened"
        );
        Ok(catalog)
    }

    /// Wraps `backend`; `ids` is advanced past every id already persisted.
    pub fn new(backend: Arc<dyn Backend>, ids: IdGenerator) -> Result<Self, StoreError> {
        ids.resume_after(backend.max_assigned_id()?);
        Ok(Self {
            backend,
            ids,
            locks: ItemLocks::new(),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryBackend::new()),
            ids: IdGenerator::single(),
            locks: ItemLocks::new(),
        }
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    fn items(&self) -> ItemEngine<'_> {
        ItemEngine::new(self.backend.as_ref(), &self.ids)
    }

    fn versions(&self) -> VersionEngine<'_> {
        VersionEngine::new(self.backend.as_ref(), &self.ids)
    }

    fn tags(&self) -> TagStore<'_> {
        TagStore::new(self.backend.as_ref())
    }

    pub fn create_item<T: CatalogItem>(&self, item: &T) -> Result<T, StoreError> {
        self.items().create(item)
    }

    pub fn retrieve_item<T: CatalogItem>(&self, id: i64) -> Result<T, StoreError> {
        self.items().retrieve(id)
    }

    pub fn retrieve_item_by_source_key<T: CatalogItem>(
        &self,
        source_key: &str,
    ) -> Result<T, StoreError> {
        self.items().retrieve_by_source_key(source_key)
    }

    /// Creates `version` as a child of `parent_ids` (a new root when empty).
    pub fn create_version<V: CatalogVersion>(
        &self,
        version: &V,
        parent_ids: &[i64],
    ) -> Result<V, StoreError> {
        self.locks.with_shared(version.owner_id(), || {
            self.versions().create(version, parent_ids)
        })
    }

    pub fn retrieve_version<V: CatalogVersion>(&self, id: i64) -> Result<V, StoreError> {
        self.versions().retrieve(id)
    }

    /// Leaf versions of `item_id`, ascending; empty while it has no versions.
    pub fn leaves(&self, item_id: i64) -> Result<Vec<i64>, StoreError> {
        self.items().get_leaves(item_id)
    }

    /// Drops history older than `num_levels` generations behind the leaves.
    pub fn truncate(&self, item_id: i64, num_levels: i64) -> Result<(), StoreError> {
        self.locks
            .with_exclusive(item_id, || self.items().truncate(item_id, num_levels))
    }

    pub fn item_tags(&self, item_id: i64) -> Result<TagMap, StoreError> {
        self.tags().read_tags(item_id, TagScope::Item)
    }

    pub fn version_tags(&self, version_id: i64) -> Result<TagMap, StoreError> {
        self.tags().read_tags(version_id, TagScope::Version)
    }

    pub fn items_with_tag(&self, key: &str) -> Result<Vec<i64>, StoreError> {
        self.tags().find_owners(key, TagScope::Item)
    }

    pub fn versions_with_tag(&self, key: &str) -> Result<Vec<i64>, StoreError> {
        self.tags().find_owners(key, TagScope::Version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lc_core::model::{Node, NodeVersion};

    #[test]
    fn memory_config_opens_an_empty_catalog() {
        let catalog = Catalog::open(&CatalogConfig {
            backend: BackendKind::Memory,
            ..CatalogConfig::default()
        })
        .expect("open");
        assert_eq!(catalog.backend().name(), "memory");
        assert_eq!(catalog.backend().max_assigned_id().expect("max id"), 0);
    }

    #[test]
    fn item_locks_are_released_after_each_operation() {
        let catalog = Catalog::in_memory();
        let node = catalog
            .create_item(&Node {
                name: "n".to_string(),
                source_key: "n".to_string(),
                ..Node::default()
            })
            .expect("node");
        let mut parent = Vec::new();
        for _ in 0..3 {
            let version = catalog
                .create_version(
                    &NodeVersion {
                        node_id: node.item.id,
                        ..NodeVersion::default()
                    },
                    &parent,
                )
                .expect("version");
            parent = vec![version.rich.id];
        }
        catalog.truncate(node.item.id, 2).expect("truncate");
        assert_eq!(catalog.leaves(node.item.id).expect("leaves"), parent);
        assert_eq!(catalog.locks.tracked(), 0);
    }
}
