#![forbid(unsafe_code)]

use super::{DagError, VersionHistoryDag, VersionSuccessor};
use crate::ids::ROOT_VERSION_ID;
use std::collections::BTreeSet;

/// What a bounded-depth compaction keeps and what it drops.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TruncationPlan {
    /// Leaves plus every version within `num_levels` parent hops of a leaf.
    pub retained: BTreeSet<i64>,
    pub removed_versions: BTreeSet<i64>,
    /// Edges into removed versions, and edges from removed parents into retained versions.
    pub removed_edges: Vec<VersionSuccessor>,
    /// Retained versions left without any parent edge; each gets a fresh root edge.
    pub new_roots: Vec<i64>,
}

impl TruncationPlan {
    pub fn is_noop(&self) -> bool {
        self.removed_edges.is_empty() && self.new_roots.is_empty()
    }
}

impl VersionHistoryDag {
    pub fn plan_truncation(&self, num_levels: i64) -> Result<TruncationPlan, DagError> {
        if num_levels <= 0 {
            return Err(DagError::InvalidDepth(num_levels));
        }

        let mut retained: BTreeSet<i64> = self.leaves.clone();
        let mut frontier: Vec<i64> = retained.iter().copied().collect();
        for _ in 0..num_levels {
            let mut next = Vec::new();
            for version in &frontier {
                for parent in self.parents_of(*version) {
                    if retained.insert(parent) {
                        next.push(parent);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        let removed_versions: BTreeSet<i64> =
            self.members.difference(&retained).copied().collect();
        let removed_edges: Vec<VersionSuccessor> = self
            .edges
            .iter()
            .filter(|edge| {
                !retained.contains(&edge.to_version_id)
                    || (edge.from_version_id != ROOT_VERSION_ID
                        && !retained.contains(&edge.from_version_id))
            })
            .copied()
            .collect();

        let removed_ids: BTreeSet<i64> = removed_edges.iter().map(|edge| edge.id).collect();
        let new_roots = retained
            .iter()
            .copied()
            .filter(|version| {
                !self
                    .edges
                    .iter()
                    .any(|edge| edge.to_version_id == *version && !removed_ids.contains(&edge.id))
            })
            .collect();

        Ok(TruncationPlan {
            retained,
            removed_versions,
            removed_edges,
            new_roots,
        })
    }

    /// Applies `plan` in memory and returns the root edges created for
    /// `plan.new_roots`, ids drawn from `next_edge_id`.
    pub fn apply_truncation(
        &mut self,
        plan: &TruncationPlan,
        mut next_edge_id: impl FnMut() -> i64,
    ) -> Vec<VersionSuccessor> {
        let removed_ids: BTreeSet<i64> = plan.removed_edges.iter().map(|edge| edge.id).collect();
        let root_edges: Vec<VersionSuccessor> = plan
            .new_roots
            .iter()
            .map(|version| VersionSuccessor {
                id: next_edge_id(),
                item_id: self.item_id,
                from_version_id: ROOT_VERSION_ID,
                to_version_id: *version,
            })
            .collect();

        let mut rebuilt = Self::empty(self.item_id);
        for edge in self
            .edges
            .iter()
            .filter(|edge| !removed_ids.contains(&edge.id))
            .chain(root_edges.iter())
        {
            rebuilt.record(*edge);
        }
        rebuilt.leaves = rebuilt
            .members
            .difference(&rebuilt.with_children)
            .copied()
            .collect();
        *self = rebuilt;
        root_edges
    }
}
