#![forbid(unsafe_code)]

//! Storage engines behind one unit-of-work contract.
//!
//! Components never talk to an engine directly while mutating: they return
//! [`Write`]s, callers concatenate them into a [`WriteBatch`], and
//! [`execute_atomically`] runs the batch inside one [`UnitOfWork`]. The SQLite
//! engine applies each write to an open transaction as it arrives; the memory
//! engine stages writes and applies the whole batch at commit. Either way a
//! batch becomes visible completely or not at all.

mod memory;
mod sqlite;
mod sqlite_schema;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use super::StoreError;
use lc_core::dag::VersionSuccessor;
use lc_core::model::ItemKind;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagScope {
    Item,
    Version,
}

impl TagScope {
    pub fn table(self) -> &'static str {
        match self {
            Self::Item => "item_tag",
            Self::Version => "rich_version_tag",
        }
    }

    pub(crate) fn owner_column(self) -> &'static str {
        match self {
            Self::Item => "item_id",
            Self::Version => "rich_version_id",
        }
    }
}

/// A tag as stored: value in text form, type by name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagRow {
    pub owner_id: i64,
    pub key: String,
    pub value: Option<String>,
    pub value_type: Option<String>,
}

/// The `item` row plus the kind table row. `endpoints` is set for edges only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemRow {
    pub id: i64,
    pub kind: ItemKind,
    pub name: String,
    pub source_key: String,
    pub endpoints: Option<(i64, i64)>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RichVersionRow {
    pub id: i64,
    pub structure_version_id: Option<i64>,
    pub reference: Option<String>,
    pub reference_parameters: BTreeMap<String, String>,
}

/// Kind-specific version row carrying the owning item id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionRow {
    Node {
        id: i64,
        node_id: i64,
    },
    Edge {
        id: i64,
        edge_id: i64,
        from_node_version_start_id: i64,
        from_node_version_end_id: Option<i64>,
        to_node_version_start_id: i64,
        to_node_version_end_id: Option<i64>,
    },
    Structure {
        id: i64,
        structure_id: i64,
        /// Attribute key -> stored type name.
        attributes: BTreeMap<String, String>,
    },
    LineageEdge {
        id: i64,
        lineage_edge_id: i64,
        from_rich_version_id: i64,
        to_rich_version_id: i64,
    },
}

impl VersionRow {
    pub fn id(&self) -> i64 {
        match self {
            Self::Node { id, .. }
            | Self::Edge { id, .. }
            | Self::Structure { id, .. }
            | Self::LineageEdge { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Node { .. } => ItemKind::Node,
            Self::Edge { .. } => ItemKind::Edge,
            Self::Structure { .. } => ItemKind::Structure,
            Self::LineageEdge { .. } => ItemKind::LineageEdge,
        }
    }

    pub fn item_id(&self) -> i64 {
        match self {
            Self::Node { node_id, .. } => *node_id,
            Self::Edge { edge_id, .. } => *edge_id,
            Self::Structure { structure_id, .. } => *structure_id,
            Self::LineageEdge {
                lineage_edge_id, ..
            } => *lineage_edge_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Write {
    InsertItem(ItemRow),
    InsertTag { scope: TagScope, row: TagRow },
    InsertRichVersion(RichVersionRow),
    InsertVersion(VersionRow),
    InsertSuccessor(VersionSuccessor),
    DeleteSuccessor { id: i64 },
    /// Removes the rich version, its tags and its kind row.
    DeleteVersion { kind: ItemKind, id: i64 },
}

/// Ordered writes waiting for one atomic execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) {
        self.writes.push(write);
    }

    /// Appends every write of `other`, keeping order.
    pub fn merge(&mut self, other: WriteBatch) {
        self.writes.extend(other.writes);
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Write> {
        self.writes.iter()
    }
}

impl FromIterator<Write> for WriteBatch {
    fn from_iter<T: IntoIterator<Item = Write>>(iter: T) -> Self {
        Self {
            writes: iter.into_iter().collect(),
        }
    }
}

impl Extend<Write> for WriteBatch {
    fn extend<T: IntoIterator<Item = Write>>(&mut self, iter: T) {
        self.writes.extend(iter);
    }
}

/// An open unit of work. Dropping one without `commit` discards its writes.
pub trait UnitOfWork {
    fn apply(&mut self, write: &Write) -> Result<(), StoreError>;
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
    fn abort(self: Box<Self>);
}

/// Typed reads plus unit-of-work creation, implemented by each engine.
pub trait Backend: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError>;

    fn tags(&self, scope: TagScope, owner_id: i64) -> Result<Vec<TagRow>, StoreError>;

    fn tag_owners(&self, scope: TagScope, key: &str) -> Result<Vec<i64>, StoreError>;

    fn successors(&self, item_id: i64) -> Result<Vec<VersionSuccessor>, StoreError>;

    fn item(&self, kind: ItemKind, id: i64) -> Result<Option<ItemRow>, StoreError>;

    /// Kind recorded for `id` in the shared item table.
    fn item_kind(&self, id: i64) -> Result<Option<ItemKind>, StoreError>;

    fn item_by_source_key(
        &self,
        kind: ItemKind,
        source_key: &str,
    ) -> Result<Option<ItemRow>, StoreError>;

    fn rich_version(&self, id: i64) -> Result<Option<RichVersionRow>, StoreError>;

    fn version(&self, kind: ItemKind, id: i64) -> Result<Option<VersionRow>, StoreError>;

    /// Largest id used by any persisted item, version or successor edge.
    fn max_assigned_id(&self) -> Result<i64, StoreError>;
}

/// Runs `batch` in one unit of work; on any failure the unit is aborted and
/// the first error is returned unchanged.
pub fn execute_atomically(backend: &dyn Backend, batch: WriteBatch) -> Result<(), StoreError> {
    if batch.is_empty() {
        return Ok(());
    }
    let mut unit = backend.begin()?;
    for write in batch.iter() {
        if let Err(err) = unit.apply(write) {
            unit.abort();
            debug!(backend = backend.name(), writes = batch.len(), error = %err, "batch aborted");
            return Err(err);
        }
    }
    unit.commit()?;
    debug!(backend = backend.name(), writes = batch.len(), "batch committed");
    Ok(())
}
