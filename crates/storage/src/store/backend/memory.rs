#![forbid(unsafe_code)]

use super::{Backend, ItemRow, RichVersionRow, TagRow, TagScope, UnitOfWork, VersionRow, Write};
use crate::store::StoreError;
use lc_core::dag::VersionSuccessor;
use lc_core::model::ItemKind;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Column-family engine held in memory.
///
/// Units of work only stage writes. `commit` takes the write lock, checks the
/// whole batch against current keys, then applies it, so readers observe a
/// batch either entirely or not at all.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

type TagKey = (TagScope, i64, String);

#[derive(Debug, Default)]
struct Tables {
    items: BTreeMap<(ItemKind, i64), ItemRow>,
    item_kinds: BTreeMap<i64, ItemKind>,
    source_keys: BTreeMap<(ItemKind, String), i64>,
    tags: BTreeMap<TagKey, TagRow>,
    tag_owners: BTreeMap<(TagScope, String), BTreeSet<i64>>,
    rich_versions: BTreeMap<i64, RichVersionRow>,
    versions: BTreeMap<(ItemKind, i64), VersionRow>,
    successors: BTreeMap<i64, VersionSuccessor>,
    successors_by_item: BTreeMap<i64, BTreeSet<i64>>,
}

#[derive(Default)]
struct Claimed {
    item_ids: BTreeSet<i64>,
    source_keys: BTreeSet<(ItemKind, String)>,
    tags: BTreeSet<TagKey>,
    rich_versions: BTreeSet<i64>,
    versions: BTreeSet<(ItemKind, i64)>,
    successors: BTreeSet<i64>,
}

fn duplicate(what: &str, key: impl std::fmt::Debug) -> StoreError {
    StoreError::InvalidArgument(format!("duplicate key: {what} {key:?}"))
}

impl Tables {
    fn check(&self, writes: &[Write]) -> Result<(), StoreError> {
        let mut claimed = Claimed::default();
        for write in writes {
            match write {
                Write::InsertItem(row) => {
                    if row.kind == ItemKind::Edge && row.endpoints.is_none() {
                        return Err(StoreError::InvalidArgument(
                            "edge row requires endpoints".to_string(),
                        ));
                    }
                    if self.item_kinds.contains_key(&row.id) || !claimed.item_ids.insert(row.id) {
                        return Err(duplicate("item", row.id));
                    }
                    let source_key = (row.kind, row.source_key.clone());
                    if self.source_keys.contains_key(&source_key)
                        || !claimed.source_keys.insert(source_key.clone())
                    {
                        return Err(duplicate("source_key", source_key));
                    }
                }
                Write::InsertTag { scope, row } => {
                    let key = (*scope, row.owner_id, row.key.clone());
                    if self.tags.contains_key(&key) || !claimed.tags.insert(key.clone()) {
                        return Err(duplicate(scope.table(), key));
                    }
                }
                Write::InsertRichVersion(row) => {
                    if self.rich_versions.contains_key(&row.id)
                        || !claimed.rich_versions.insert(row.id)
                    {
                        return Err(duplicate("rich_version", row.id));
                    }
                }
                Write::InsertVersion(row) => {
                    let key = (row.kind(), row.id());
                    if self.versions.contains_key(&key) || !claimed.versions.insert(key) {
                        return Err(duplicate("version", key));
                    }
                }
                Write::InsertSuccessor(edge) => {
                    if self.successors.contains_key(&edge.id)
                        || !claimed.successors.insert(edge.id)
                    {
                        return Err(duplicate("version_successor", edge.id));
                    }
                }
                Write::DeleteSuccessor { .. } | Write::DeleteVersion { .. } => {}
            }
        }
        Ok(())
    }

    fn apply(&mut self, write: Write) {
        match write {
            Write::InsertItem(row) => {
                self.item_kinds.insert(row.id, row.kind);
                self.source_keys
                    .insert((row.kind, row.source_key.clone()), row.id);
                self.items.insert((row.kind, row.id), row);
            }
            Write::InsertTag { scope, row } => {
                self.tag_owners
                    .entry((scope, row.key.clone()))
                    .or_default()
                    .insert(row.owner_id);
                self.tags.insert((scope, row.owner_id, row.key.clone()), row);
            }
            Write::InsertRichVersion(row) => {
                self.rich_versions.insert(row.id, row);
            }
            Write::InsertVersion(row) => {
                self.versions.insert((row.kind(), row.id()), row);
            }
            Write::InsertSuccessor(edge) => {
                self.successors_by_item
                    .entry(edge.item_id)
                    .or_default()
                    .insert(edge.id);
                self.successors.insert(edge.id, edge);
            }
            Write::DeleteSuccessor { id } => {
                if let Some(edge) = self.successors.remove(&id)
                    && let Some(ids) = self.successors_by_item.get_mut(&edge.item_id)
                {
                    ids.remove(&id);
                }
            }
            Write::DeleteVersion { kind, id } => {
                self.rich_versions.remove(&id);
                self.versions.remove(&(kind, id));
                let removed: Vec<TagKey> = self
                    .tags
                    .range((TagScope::Version, id, String::new())..)
                    .map(|(key, _)| key)
                    .take_while(|(scope, owner, _)| *scope == TagScope::Version && *owner == id)
                    .cloned()
                    .collect();
                for key in removed {
                    self.tags.remove(&key);
                    if let Some(owners) = self.tag_owners.get_mut(&(TagScope::Version, key.2)) {
                        owners.remove(&id);
                    }
                }
            }
        }
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
        Ok(Box::new(MemoryUnit {
            tables: &self.tables,
            staged: Vec::new(),
            open: true,
        }))
    }

    fn tags(&self, scope: TagScope, owner_id: i64) -> Result<Vec<TagRow>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .tags
            .range((scope, owner_id, String::new())..)
            .take_while(|((row_scope, owner, _), _)| *row_scope == scope && *owner == owner_id)
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn tag_owners(&self, scope: TagScope, key: &str) -> Result<Vec<i64>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .tag_owners
            .get(&(scope, key.to_string()))
            .map(|owners| owners.iter().copied().collect())
            .unwrap_or_default())
    }

    fn successors(&self, item_id: i64) -> Result<Vec<VersionSuccessor>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .successors_by_item
            .get(&item_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.successors.get(id).copied())
            .collect())
    }

    fn item(&self, kind: ItemKind, id: i64) -> Result<Option<ItemRow>, StoreError> {
        Ok(self.tables.read().items.get(&(kind, id)).cloned())
    }

    fn item_kind(&self, id: i64) -> Result<Option<ItemKind>, StoreError> {
        Ok(self.tables.read().item_kinds.get(&id).copied())
    }

    fn item_by_source_key(
        &self,
        kind: ItemKind,
        source_key: &str,
    ) -> Result<Option<ItemRow>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .source_keys
            .get(&(kind, source_key.to_string()))
            .and_then(|id| tables.items.get(&(kind, *id)))
            .cloned())
    }

    fn rich_version(&self, id: i64) -> Result<Option<RichVersionRow>, StoreError> {
        Ok(self.tables.read().rich_versions.get(&id).cloned())
    }

    fn version(&self, kind: ItemKind, id: i64) -> Result<Option<VersionRow>, StoreError> {
        Ok(self.tables.read().versions.get(&(kind, id)).cloned())
    }

    fn max_assigned_id(&self) -> Result<i64, StoreError> {
        let tables = self.tables.read();
        let max = [
            tables.item_kinds.keys().next_back().copied(),
            tables.rich_versions.keys().next_back().copied(),
            tables.successors.keys().next_back().copied(),
        ]
        .into_iter()
        .flatten()
        .max();
        Ok(max.unwrap_or(0))
    }
}

struct MemoryUnit<'a> {
    tables: &'a RwLock<Tables>,
    staged: Vec<Write>,
    open: bool,
}

impl UnitOfWork for MemoryUnit<'_> {
    fn apply(&mut self, write: &Write) -> Result<(), StoreError> {
        self.staged.push(write.clone());
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.open = false;
        let staged = std::mem::take(&mut self.staged);
        let mut tables = self.tables.write();
        tables.check(&staged)?;
        for write in staged {
            tables.apply(write);
        }
        Ok(())
    }

    fn abort(mut self: Box<Self>) {
        self.open = false;
        self.staged.clear();
    }
}

impl Drop for MemoryUnit<'_> {
    fn drop(&mut self) {
        if self.open && !self.staged.is_empty() {
            warn!(
                writes = self.staged.len(),
                "memory unit of work dropped without commit; discarding staged writes"
            );
        }
    }
}
