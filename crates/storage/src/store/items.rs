#![forbid(unsafe_code)]

use super::StoreError;
use super::backend::{Backend, ItemRow, TagScope, Write, WriteBatch, execute_atomically};
use super::dag::VersionHistoryDagStore;
use super::tags::TagStore;
use lc_core::dag::VersionHistoryDag;
use lc_core::model::{Edge, Item, ItemKind, LineageEdge, Node, Structure};
use lc_core::tags::TagMap;
use lc_core::{IdGenerator, ROOT_VERSION_ID};
use tracing::info;

/// A concrete item kind: its base record plus how it maps onto an item row.
pub trait CatalogItem: Clone + Sized {
    const KIND: ItemKind;

    fn item(&self) -> &Item;

    /// Same entity under `id`, tags re-owned by it.
    fn with_id(&self, id: i64) -> Self;

    fn to_row(&self) -> ItemRow;

    fn from_row(row: ItemRow, tags: TagMap) -> Result<Self, StoreError>;

    /// Ids this item points at must already exist.
    fn check_references(&self, _backend: &dyn Backend) -> Result<(), StoreError> {
        Ok(())
    }
}

fn plain_row(kind: ItemKind, item: &Item, name: &str, source_key: &str) -> ItemRow {
    ItemRow {
        id: item.id,
        kind,
        name: name.to_string(),
        source_key: source_key.to_string(),
        endpoints: None,
    }
}

impl CatalogItem for Node {
    const KIND: ItemKind = ItemKind::Node;

    fn item(&self) -> &Item {
        &self.item
    }

    fn with_id(&self, id: i64) -> Self {
        Self {
            item: self.item.assign_id(id),
            ..self.clone()
        }
    }

    fn to_row(&self) -> ItemRow {
        plain_row(Self::KIND, &self.item, &self.name, &self.source_key)
    }

    fn from_row(row: ItemRow, tags: TagMap) -> Result<Self, StoreError> {
        Ok(Self {
            item: Item { id: row.id, tags },
            name: row.name,
            source_key: row.source_key,
        })
    }
}

impl CatalogItem for Structure {
    const KIND: ItemKind = ItemKind::Structure;

    fn item(&self) -> &Item {
        &self.item
    }

    fn with_id(&self, id: i64) -> Self {
        Self {
            item: self.item.assign_id(id),
            ..self.clone()
        }
    }

    fn to_row(&self) -> ItemRow {
        plain_row(Self::KIND, &self.item, &self.name, &self.source_key)
    }

    fn from_row(row: ItemRow, tags: TagMap) -> Result<Self, StoreError> {
        Ok(Self {
            item: Item { id: row.id, tags },
            name: row.name,
            source_key: row.source_key,
        })
    }
}

impl CatalogItem for LineageEdge {
    const KIND: ItemKind = ItemKind::LineageEdge;

    fn item(&self) -> &Item {
        &self.item
    }

    fn with_id(&self, id: i64) -> Self {
        Self {
            item: self.item.assign_id(id),
            ..self.clone()
        }
    }

    fn to_row(&self) -> ItemRow {
        plain_row(Self::KIND, &self.item, &self.name, &self.source_key)
    }

    fn from_row(row: ItemRow, tags: TagMap) -> Result<Self, StoreError> {
        Ok(Self {
            item: Item { id: row.id, tags },
            name: row.name,
            source_key: row.source_key,
        })
    }
}

impl CatalogItem for Edge {
    const KIND: ItemKind = ItemKind::Edge;

    fn item(&self) -> &Item {
        &self.item
    }

    fn with_id(&self, id: i64) -> Self {
        Self {
            item: self.item.assign_id(id),
            ..self.clone()
        }
    }

    fn to_row(&self) -> ItemRow {
        ItemRow {
            endpoints: Some((self.from_node_id, self.to_node_id)),
            ..plain_row(Self::KIND, &self.item, &self.name, &self.source_key)
        }
    }

    fn from_row(row: ItemRow, tags: TagMap) -> Result<Self, StoreError> {
        let Some((from_node_id, to_node_id)) = row.endpoints else {
            return Err(StoreError::Backend(format!(
                "edge {} stored without endpoints",
                row.id
            )));
        };
        Ok(Self {
            item: Item { id: row.id, tags },
            name: row.name,
            source_key: row.source_key,
            from_node_id,
            to_node_id,
        })
    }

    fn check_references(&self, backend: &dyn Backend) -> Result<(), StoreError> {
        for node_id in [self.from_node_id, self.to_node_id] {
            require_item(backend, ItemKind::Node, node_id)?;
        }
        Ok(())
    }
}

pub(crate) fn require_item(backend: &dyn Backend, kind: ItemKind, id: i64) -> Result<(), StoreError> {
    match backend.item(kind, id)? {
        Some(_) => Ok(()),
        None => Err(StoreError::NotFound(format!("{} {id}", kind.as_str()))),
    }
}

/// Item creation and lookup, plus the history mutations every version kind
/// goes through.
pub struct ItemEngine<'a> {
    backend: &'a dyn Backend,
    ids: &'a IdGenerator,
}

impl<'a> ItemEngine<'a> {
    pub fn new(backend: &'a dyn Backend, ids: &'a IdGenerator) -> Self {
        Self { backend, ids }
    }

    fn dags(&self) -> VersionHistoryDagStore<'a> {
        VersionHistoryDagStore::new(self.backend, self.ids)
    }

    /// Persists `item` under a fresh id. Every call creates a distinct item.
    pub fn create<T: CatalogItem>(&self, item: &T) -> Result<T, StoreError> {
        item.check_references(self.backend)?;
        let created = item.with_id(self.ids.new_item_id());

        let mut batch = WriteBatch::new();
        batch.push(Write::InsertItem(created.to_row()));
        batch.merge(TagStore::new(self.backend).write_item_tags(&created.item().tags)?);
        execute_atomically(self.backend, batch)?;

        info!(
            kind = T::KIND.as_str(),
            item_id = created.item().id,
            tags = created.item().tags.len(),
            "item created"
        );
        Ok(created)
    }

    pub fn retrieve<T: CatalogItem>(&self, id: i64) -> Result<T, StoreError> {
        let row = self
            .backend
            .item(T::KIND, id)?
            .ok_or_else(|| StoreError::NotFound(format!("{} {id}", T::KIND.as_str())))?;
        self.hydrate(row)
    }

    pub fn retrieve_by_source_key<T: CatalogItem>(&self, source_key: &str) -> Result<T, StoreError> {
        let row = self
            .backend
            .item_by_source_key(T::KIND, source_key)?
            .ok_or_else(|| {
                StoreError::NotFound(format!("{} with source key {source_key:?}", T::KIND.as_str()))
            })?;
        self.hydrate(row)
    }

    fn hydrate<T: CatalogItem>(&self, row: ItemRow) -> Result<T, StoreError> {
        let tags = TagStore::new(self.backend).read_tags(row.id, TagScope::Item)?;
        T::from_row(row, tags)
    }

    /// Current leaves; an item without history has none.
    pub fn get_leaves(&self, item_id: i64) -> Result<Vec<i64>, StoreError> {
        match self.dags().load(item_id) {
            Ok(dag) => Ok(dag.leaves()),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    /// Successor edges attaching `child_version_id` under `parent_ids`.
    ///
    /// No parents means a new root. The first parent missing from the
    /// item's history fails the whole call and nothing is returned.
    pub fn update(
        &self,
        item_id: i64,
        child_version_id: i64,
        parent_ids: &[i64],
    ) -> Result<WriteBatch, StoreError> {
        let mut parents: Vec<i64> = Vec::with_capacity(parent_ids.len().max(1));
        for parent in parent_ids {
            if !parents.contains(parent) {
                parents.push(*parent);
            }
        }
        if parents.is_empty() {
            parents.push(ROOT_VERSION_ID);
        }

        let dags = self.dags();
        let mut dag = self.load_or_create(&dags, item_id)?;
        let mut batch = WriteBatch::new();
        for parent in parents {
            batch.merge(dags.add_edge(&mut dag, parent, child_version_id)?);
        }
        Ok(batch)
    }

    fn load_or_create(
        &self,
        dags: &VersionHistoryDagStore<'_>,
        item_id: i64,
    ) -> Result<VersionHistoryDag, StoreError> {
        match dags.load(item_id) {
            Ok(dag) => Ok(dag),
            Err(err) if err.is_not_found() => Ok(dags.create(item_id)),
            Err(err) => Err(err),
        }
    }

    /// Compacts the history of `item_id` to `num_levels` generations behind
    /// its leaves and persists the result in one unit of work.
    ///
    /// The item's kind is read from storage; it selects the table the removed
    /// versions' kind rows are deleted from.
    pub fn truncate(&self, item_id: i64, num_levels: i64) -> Result<(), StoreError> {
        if num_levels <= 0 {
            return Err(StoreError::InvalidArgument(format!(
                "truncation depth must be positive (got {num_levels})"
            )));
        }
        let kind = self
            .backend
            .item_kind(item_id)?
            .ok_or_else(|| StoreError::NotFound(format!("item {item_id}")))?;
        let dags = self.dags();
        let mut dag = dags.load(item_id)?;
        let before = dag.edges().len();
        let batch = dags.truncate(&mut dag, num_levels, kind)?;
        let writes = batch.len();
        execute_atomically(self.backend, batch)?;

        info!(
            kind = kind.as_str(),
            item_id,
            num_levels,
            edges_before = before,
            edges_after = dag.edges().len(),
            writes,
            "history truncated"
        );
        Ok(())
    }
}
