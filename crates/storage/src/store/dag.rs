#![forbid(unsafe_code)]

use super::StoreError;
use super::backend::{Backend, Write, WriteBatch};
use lc_core::IdGenerator;
use lc_core::dag::VersionHistoryDag;
use lc_core::model::ItemKind;
use tracing::debug;

/// Persistence for per-item version histories stored as successor edges.
pub struct VersionHistoryDagStore<'a> {
    backend: &'a dyn Backend,
    ids: &'a IdGenerator,
}

impl<'a> VersionHistoryDagStore<'a> {
    pub fn new(backend: &'a dyn Backend, ids: &'a IdGenerator) -> Self {
        Self { backend, ids }
    }

    /// History for an item that has none yet. Nothing is written until the
    /// first edge is added.
    pub fn create(&self, item_id: i64) -> VersionHistoryDag {
        VersionHistoryDag::empty(item_id)
    }

    pub fn load(&self, item_id: i64) -> Result<VersionHistoryDag, StoreError> {
        let edges = self.backend.successors(item_id)?;
        if edges.is_empty() {
            return Err(StoreError::NotFound(format!(
                "no version history for item {item_id}"
            )));
        }
        let count = edges.len();
        let dag = VersionHistoryDag::from_edges(item_id, edges)?;
        debug!(item_id, edges = count, "version history loaded");
        Ok(dag)
    }

    /// Validates `from -> to` against `dag`, records it there and returns the
    /// pending insert.
    pub fn add_edge(
        &self,
        dag: &mut VersionHistoryDag,
        from_version_id: i64,
        to_version_id: i64,
    ) -> Result<WriteBatch, StoreError> {
        let edge = dag.add_edge(self.ids.new_version_id(), from_version_id, to_version_id)?;
        Ok([Write::InsertSuccessor(edge)].into_iter().collect())
    }

    /// Compacts `dag` to the versions within `num_levels` hops of a leaf.
    ///
    /// The returned batch deletes the dropped edges and versions (rich rows,
    /// version tags and `kind` rows) and inserts a root edge for every
    /// retained version that lost all of its parents.
    pub fn truncate(
        &self,
        dag: &mut VersionHistoryDag,
        num_levels: i64,
        kind: ItemKind,
    ) -> Result<WriteBatch, StoreError> {
        let plan = dag.plan_truncation(num_levels)?;
        let mut batch = WriteBatch::new();
        if plan.is_noop() {
            return Ok(batch);
        }

        batch.extend(
            plan.removed_edges
                .iter()
                .map(|edge| Write::DeleteSuccessor { id: edge.id }),
        );
        let root_edges = dag.apply_truncation(&plan, || self.ids.new_version_id());
        batch.extend(root_edges.into_iter().map(Write::InsertSuccessor));
        batch.extend(
            plan.removed_versions
                .iter()
                .map(|id| Write::DeleteVersion { kind, id: *id }),
        );
        Ok(batch)
    }
}
