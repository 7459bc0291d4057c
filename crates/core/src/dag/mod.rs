#![forbid(unsafe_code)]

mod truncate;

pub use truncate::TruncationPlan;

use crate::ids::ROOT_VERSION_ID;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// One direct parent→child step in an item's history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionSuccessor {
    pub id: i64,
    pub item_id: i64,
    pub from_version_id: i64,
    pub to_version_id: i64,
}

impl VersionSuccessor {
    pub fn is_root(&self) -> bool {
        self.from_version_id == ROOT_VERSION_ID
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DagError {
    InvalidParent { parent: i64, item: i64 },
    RootAsChild { item: i64 },
    Cycle { from: i64, to: i64 },
    ForeignEdge { edge_item: i64, item: i64 },
    DanglingParent { parent: i64, item: i64 },
    InvalidDepth(i64),
}

impl DagError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::InvalidParent { .. } => "parent is not a version of the item",
            Self::RootAsChild { .. } => "the root sentinel cannot be a child version",
            Self::Cycle { .. } => "edge would close a cycle in the version history",
            Self::ForeignEdge { .. } => "successor edge belongs to a different item",
            Self::DanglingParent { .. } => "successor edge points at a parent that is not in the history",
            Self::InvalidDepth(_) => "truncation depth must be positive",
        }
    }
}

/// The version history of one item, rebuilt from its successor edges.
///
/// `members` are all versions (every `to_version_id`), `parents` maps a version
/// to its direct parents, and `leaves` are members with no recorded child.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionHistoryDag {
    item_id: i64,
    edges: Vec<VersionSuccessor>,
    members: BTreeSet<i64>,
    parents: BTreeMap<i64, BTreeSet<i64>>,
    with_children: BTreeSet<i64>,
    leaves: BTreeSet<i64>,
}

impl VersionHistoryDag {
    pub fn empty(item_id: i64) -> Self {
        Self {
            item_id,
            edges: Vec::new(),
            members: BTreeSet::new(),
            parents: BTreeMap::new(),
            with_children: BTreeSet::new(),
            leaves: BTreeSet::new(),
        }
    }

    /// Rebuilds a dag from persisted edges in any order, checking that every
    /// parent is a member and that the edges form no cycle.
    pub fn from_edges(
        item_id: i64,
        edges: impl IntoIterator<Item = VersionSuccessor>,
    ) -> Result<Self, DagError> {
        let mut dag = Self::empty(item_id);
        for edge in edges {
            if edge.item_id != item_id {
                return Err(DagError::ForeignEdge {
                    edge_item: edge.item_id,
                    item: item_id,
                });
            }
            if edge.to_version_id == ROOT_VERSION_ID {
                return Err(DagError::RootAsChild { item: item_id });
            }
            dag.record(edge);
        }
        if let Some(parent) = dag
            .with_children
            .iter()
            .find(|parent| !dag.members.contains(*parent))
        {
            return Err(DagError::DanglingParent {
                parent: *parent,
                item: item_id,
            });
        }
        dag.ensure_acyclic()?;
        dag.leaves = dag.members.difference(&dag.with_children).copied().collect();
        Ok(dag)
    }

    pub fn item_id(&self) -> i64 {
        self.item_id
    }

    pub fn edges(&self) -> &[VersionSuccessor] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn versions(&self) -> impl Iterator<Item = i64> + '_ {
        self.members.iter().copied()
    }

    /// Versions with no recorded child, ascending.
    pub fn leaves(&self) -> Vec<i64> {
        self.leaves.iter().copied().collect()
    }

    pub fn contains_version(&self, version_id: i64) -> bool {
        version_id == ROOT_VERSION_ID || self.members.contains(&version_id)
    }

    /// Direct parents of `version_id`, excluding the root sentinel.
    pub fn parents_of(&self, version_id: i64) -> impl Iterator<Item = i64> + '_ {
        self.parents
            .get(&version_id)
            .into_iter()
            .flatten()
            .copied()
            .filter(|parent| *parent != ROOT_VERSION_ID)
    }

    /// Validates and records `from -> to`. The returned edge carries `edge_id`
    /// and still has to be persisted by the caller.
    pub fn add_edge(
        &mut self,
        edge_id: i64,
        from_version_id: i64,
        to_version_id: i64,
    ) -> Result<VersionSuccessor, DagError> {
        if !self.contains_version(from_version_id) {
            return Err(DagError::InvalidParent {
                parent: from_version_id,
                item: self.item_id,
            });
        }
        if to_version_id == ROOT_VERSION_ID {
            return Err(DagError::RootAsChild { item: self.item_id });
        }
        if from_version_id == to_version_id || self.is_ancestor(to_version_id, from_version_id) {
            return Err(DagError::Cycle {
                from: from_version_id,
                to: to_version_id,
            });
        }

        let edge = VersionSuccessor {
            id: edge_id,
            item_id: self.item_id,
            from_version_id,
            to_version_id,
        };
        self.record(edge);
        if from_version_id != ROOT_VERSION_ID {
            self.leaves.remove(&from_version_id);
        }
        if !self.with_children.contains(&to_version_id) {
            self.leaves.insert(to_version_id);
        }
        Ok(edge)
    }

    fn record(&mut self, edge: VersionSuccessor) {
        self.members.insert(edge.to_version_id);
        self.parents
            .entry(edge.to_version_id)
            .or_default()
            .insert(edge.from_version_id);
        if edge.from_version_id != ROOT_VERSION_ID {
            self.with_children.insert(edge.from_version_id);
        }
        self.edges.push(edge);
    }

    /// True when `ancestor` is reachable from `version_id` by walking parent edges.
    fn is_ancestor(&self, ancestor: i64, version_id: i64) -> bool {
        if !self.members.contains(&ancestor) {
            return false;
        }
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([version_id]);
        while let Some(current) = queue.pop_front() {
            for parent in self.parents_of(current) {
                if parent == ancestor {
                    return true;
                }
                if seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        false
    }

    // Kahn's algorithm over non-root edges.
    fn ensure_acyclic(&self) -> Result<(), DagError> {
        let mut in_degree: BTreeMap<i64, usize> = self
            .members
            .iter()
            .map(|version| (*version, self.parents_of(*version).count()))
            .collect();
        let mut children: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for (child, parents) in &self.parents {
            for parent in parents.iter().filter(|p| **p != ROOT_VERSION_ID) {
                children.entry(*parent).or_default().push(*child);
            }
        }

        let mut ready: VecDeque<i64> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(version, _)| *version)
            .collect();
        let mut visited = 0usize;
        while let Some(version) = ready.pop_front() {
            visited += 1;
            for child in children.get(&version).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(*child);
                    }
                }
            }
        }

        if visited == self.members.len() {
            return Ok(());
        }
        let stuck = in_degree
            .iter()
            .find(|(_, degree)| **degree > 0)
            .map(|(version, _)| *version)
            .unwrap_or(ROOT_VERSION_ID);
        let from = self.parents_of(stuck).next().unwrap_or(ROOT_VERSION_ID);
        Err(DagError::Cycle { from, to: stuck })
    }
}

#[cfg(test)]
mod tests;
