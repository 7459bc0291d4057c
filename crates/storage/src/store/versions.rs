#![forbid(unsafe_code)]

use super::StoreError;
use super::backend::{
    Backend, RichVersionRow, TagScope, VersionRow, Write, WriteBatch, execute_atomically,
};
use super::items::{ItemEngine, require_item};
use super::tags::TagStore;
use lc_core::IdGenerator;
use lc_core::model::{
    EdgeVersion, ItemKind, LineageEdgeVersion, NodeVersion, RichVersion, StructureVersion,
};
use lc_core::tags::ValueType;
use std::collections::BTreeMap;
use tracing::info;

/// A concrete version kind: the shared rich payload plus a kind row that
/// names the owning item.
pub trait CatalogVersion: Clone + Sized {
    /// Kind of the owning item.
    const KIND: ItemKind;

    fn rich(&self) -> &RichVersion;

    fn owner_id(&self) -> i64;

    fn with_id(&self, id: i64) -> Self;

    fn to_row(&self) -> VersionRow;

    fn from_parts(rich: RichVersion, row: VersionRow) -> Result<Self, StoreError>;

    fn check_references(&self, _backend: &dyn Backend) -> Result<(), StoreError> {
        Ok(())
    }
}

fn row_mismatch(kind: ItemKind, row: &VersionRow) -> StoreError {
    StoreError::Backend(format!(
        "{} version {} read back as a {} row",
        kind.as_str(),
        row.id(),
        row.kind().as_str()
    ))
}

impl CatalogVersion for NodeVersion {
    const KIND: ItemKind = ItemKind::Node;

    fn rich(&self) -> &RichVersion {
        &self.rich
    }

    fn owner_id(&self) -> i64 {
        self.node_id
    }

    fn with_id(&self, id: i64) -> Self {
        Self {
            rich: self.rich.assign_id(id),
            node_id: self.node_id,
        }
    }

    fn to_row(&self) -> VersionRow {
        VersionRow::Node {
            id: self.rich.id,
            node_id: self.node_id,
        }
    }

    fn from_parts(rich: RichVersion, row: VersionRow) -> Result<Self, StoreError> {
        match row {
            VersionRow::Node { node_id, .. } => Ok(Self { rich, node_id }),
            other => Err(row_mismatch(Self::KIND, &other)),
        }
    }
}

impl CatalogVersion for EdgeVersion {
    const KIND: ItemKind = ItemKind::Edge;

    fn rich(&self) -> &RichVersion {
        &self.rich
    }

    fn owner_id(&self) -> i64 {
        self.edge_id
    }

    fn with_id(&self, id: i64) -> Self {
        Self {
            rich: self.rich.assign_id(id),
            ..self.clone()
        }
    }

    fn to_row(&self) -> VersionRow {
        VersionRow::Edge {
            id: self.rich.id,
            edge_id: self.edge_id,
            from_node_version_start_id: self.from_node_version_start_id,
            from_node_version_end_id: self.from_node_version_end_id,
            to_node_version_start_id: self.to_node_version_start_id,
            to_node_version_end_id: self.to_node_version_end_id,
        }
    }

    fn from_parts(rich: RichVersion, row: VersionRow) -> Result<Self, StoreError> {
        match row {
            VersionRow::Edge {
                edge_id,
                from_node_version_start_id,
                from_node_version_end_id,
                to_node_version_start_id,
                to_node_version_end_id,
                ..
            } => Ok(Self {
                rich,
                edge_id,
                from_node_version_start_id,
                from_node_version_end_id,
                to_node_version_start_id,
                to_node_version_end_id,
            }),
            other => Err(row_mismatch(Self::KIND, &other)),
        }
    }

    fn check_references(&self, backend: &dyn Backend) -> Result<(), StoreError> {
        let node_versions = [
            Some(self.from_node_version_start_id),
            self.from_node_version_end_id,
            Some(self.to_node_version_start_id),
            self.to_node_version_end_id,
        ];
        for id in node_versions.into_iter().flatten() {
            if backend.version(ItemKind::Node, id)?.is_none() {
                return Err(StoreError::NotFound(format!("node version {id}")));
            }
        }
        Ok(())
    }
}

impl CatalogVersion for StructureVersion {
    const KIND: ItemKind = ItemKind::Structure;

    fn rich(&self) -> &RichVersion {
        &self.rich
    }

    fn owner_id(&self) -> i64 {
        self.structure_id
    }

    fn with_id(&self, id: i64) -> Self {
        Self {
            rich: self.rich.assign_id(id),
            ..self.clone()
        }
    }

    fn to_row(&self) -> VersionRow {
        VersionRow::Structure {
            id: self.rich.id,
            structure_id: self.structure_id,
            attributes: self
                .attributes
                .iter()
                .map(|(key, ty)| (key.clone(), ty.as_str().to_string()))
                .collect(),
        }
    }

    fn from_parts(rich: RichVersion, row: VersionRow) -> Result<Self, StoreError> {
        match row {
            VersionRow::Structure {
                structure_id,
                attributes,
                ..
            } => Ok(Self {
                rich,
                structure_id,
                attributes: decode_attributes(&attributes)?,
            }),
            other => Err(row_mismatch(Self::KIND, &other)),
        }
    }
}

impl CatalogVersion for LineageEdgeVersion {
    const KIND: ItemKind = ItemKind::LineageEdge;

    fn rich(&self) -> &RichVersion {
        &self.rich
    }

    fn owner_id(&self) -> i64 {
        self.lineage_edge_id
    }

    fn with_id(&self, id: i64) -> Self {
        Self {
            rich: self.rich.assign_id(id),
            ..self.clone()
        }
    }

    fn to_row(&self) -> VersionRow {
        VersionRow::LineageEdge {
            id: self.rich.id,
            lineage_edge_id: self.lineage_edge_id,
            from_rich_version_id: self.from_rich_version_id,
            to_rich_version_id: self.to_rich_version_id,
        }
    }

    fn from_parts(rich: RichVersion, row: VersionRow) -> Result<Self, StoreError> {
        match row {
            VersionRow::LineageEdge {
                lineage_edge_id,
                from_rich_version_id,
                to_rich_version_id,
                ..
            } => Ok(Self {
                rich,
                lineage_edge_id,
                from_rich_version_id,
                to_rich_version_id,
            }),
            other => Err(row_mismatch(Self::KIND, &other)),
        }
    }

    fn check_references(&self, backend: &dyn Backend) -> Result<(), StoreError> {
        for id in [self.from_rich_version_id, self.to_rich_version_id] {
            if backend.rich_version(id)?.is_none() {
                return Err(StoreError::NotFound(format!("rich version {id}")));
            }
        }
        Ok(())
    }
}

fn decode_attributes(
    raw: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, ValueType>, StoreError> {
    raw.iter()
        .map(|(key, ty)| Ok((key.clone(), ValueType::parse(ty)?)))
        .collect()
}

/// The base payload every version kind shares.
pub struct RichVersionStore<'a> {
    backend: &'a dyn Backend,
}

impl<'a> RichVersionStore<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self { backend }
    }

    pub fn write(&self, rich: &RichVersion) -> Result<WriteBatch, StoreError> {
        let mut batch = WriteBatch::new();
        batch.push(Write::InsertRichVersion(RichVersionRow {
            id: rich.id,
            structure_version_id: rich.structure_version_id,
            reference: rich.reference.clone(),
            reference_parameters: rich.reference_parameters.clone(),
        }));
        batch.merge(TagStore::new(self.backend).write_version_tags(&rich.tags)?);
        Ok(batch)
    }

    pub fn retrieve(&self, id: i64) -> Result<RichVersion, StoreError> {
        let row = self
            .backend
            .rich_version(id)?
            .ok_or_else(|| StoreError::NotFound(format!("rich version {id}")))?;
        Ok(RichVersion {
            id: row.id,
            tags: TagStore::new(self.backend).read_tags(id, TagScope::Version)?,
            structure_version_id: row.structure_version_id,
            reference: row.reference,
            reference_parameters: row.reference_parameters,
        })
    }

    /// A version naming a structure version must carry every attribute of
    /// that structure as a tag of the declared type.
    pub fn check_structure(&self, rich: &RichVersion) -> Result<(), StoreError> {
        let Some(structure_version_id) = rich.structure_version_id else {
            return Ok(());
        };
        let row = self
            .backend
            .version(ItemKind::Structure, structure_version_id)?
            .ok_or_else(|| {
                StoreError::NotFound(format!("structure version {structure_version_id}"))
            })?;
        let attributes = match row {
            VersionRow::Structure { attributes, .. } => attributes,
            other => return Err(row_mismatch(ItemKind::Structure, &other)),
        };
        let structure = StructureVersion {
            attributes: decode_attributes(&attributes)?,
            ..StructureVersion::default()
        };
        structure.check_conformance(&rich.tags)?;
        Ok(())
    }
}

/// Creation and lookup of immutable versions of any kind.
pub struct VersionEngine<'a> {
    backend: &'a dyn Backend,
    ids: &'a IdGenerator,
}

impl<'a> VersionEngine<'a> {
    pub fn new(backend: &'a dyn Backend, ids: &'a IdGenerator) -> Self {
        Self { backend, ids }
    }

    /// Persists `version` under a fresh id as a child of `parent_ids` in its
    /// owner's history. Lineage edges, the rich row, the kind row and the
    /// version tags commit together or not at all.
    pub fn create<V: CatalogVersion>(
        &self,
        version: &V,
        parent_ids: &[i64],
    ) -> Result<V, StoreError> {
        let owner_id = version.owner_id();
        require_item(self.backend, V::KIND, owner_id)?;
        version.check_references(self.backend)?;
        let rich_store = RichVersionStore::new(self.backend);
        rich_store.check_structure(version.rich())?;

        let created = version.with_id(self.ids.new_version_id());
        let id = created.rich().id;

        let mut batch = ItemEngine::new(self.backend, self.ids).update(owner_id, id, parent_ids)?;
        batch.push(Write::InsertVersion(created.to_row()));
        batch.merge(rich_store.write(created.rich())?);
        execute_atomically(self.backend, batch)?;

        info!(
            kind = V::KIND.as_str(),
            version_id = id,
            item_id = owner_id,
            parents = parent_ids.len(),
            "version created"
        );
        Ok(created)
    }

    pub fn retrieve<V: CatalogVersion>(&self, id: i64) -> Result<V, StoreError> {
        let rich = RichVersionStore::new(self.backend).retrieve(id)?;
        let row = self
            .backend
            .version(V::KIND, id)?
            .ok_or_else(|| StoreError::NotFound(format!("{} version {id}", V::KIND.as_str())))?;
        V::from_parts(rich, row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ErrorKind;
    use crate::store::backend::MemoryBackend;
    use lc_core::model::{Node, Structure};
    use lc_core::tags::{Tag, TagMap, TagValue};

    struct Fixture {
        backend: MemoryBackend,
        ids: IdGenerator,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                backend: MemoryBackend::new(),
                ids: IdGenerator::single(),
            }
        }

        fn items(&self) -> ItemEngine<'_> {
            ItemEngine::new(&self.backend, &self.ids)
        }

        fn versions(&self) -> VersionEngine<'_> {
            VersionEngine::new(&self.backend, &self.ids)
        }

        fn node(&self, source_key: &str) -> i64 {
            let node = Node {
                name: source_key.to_string(),
                source_key: source_key.to_string(),
                ..Node::default()
            };
            self.items().create(&node).expect("create node").item.id
        }
    }

    fn node_version(node_id: i64) -> NodeVersion {
        let mut tags = TagMap::new();
        tags.insert("rows".to_string(), Tag::new(0, "rows", TagValue::Long(12)));
        NodeVersion {
            rich: RichVersion {
                tags,
                reference: Some("warehouse.orders".to_string()),
                reference_parameters: BTreeMap::from([(
                    "snapshot".to_string(),
                    "2026-10-01".to_string(),
                )]),
                ..RichVersion::default()
            },
            node_id,
        }
    }

    #[test]
    fn created_version_reads_back_equal() {
        let fx = Fixture::new();
        let node_id = fx.node("orders");
        let created = fx
            .versions()
            .create(&node_version(node_id), &[])
            .expect("create version");
        assert_eq!(created.rich.tags["rows"].owner_id, created.rich.id);

        let first: NodeVersion = fx.versions().retrieve(created.rich.id).expect("retrieve");
        let second: NodeVersion = fx.versions().retrieve(created.rich.id).expect("retrieve");
        assert_eq!(first, created);
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_owner_is_not_found() {
        let fx = Fixture::new();
        let err = fx.versions().create(&node_version(404), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn invalid_parent_persists_nothing() {
        let fx = Fixture::new();
        let node_id = fx.node("orders");
        let err = fx
            .versions()
            .create(&node_version(node_id), &[9_000])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParent);
        assert!(fx.items().get_leaves(node_id).expect("leaves").is_empty());
        assert!(fx.backend.tag_owners(TagScope::Version, "rows").unwrap().is_empty());
    }

    #[test]
    fn kind_mismatch_on_retrieve_is_not_found() {
        let fx = Fixture::new();
        let node_id = fx.node("orders");
        let created = fx
            .versions()
            .create(&node_version(node_id), &[])
            .expect("create version");
        let err = fx
            .versions()
            .retrieve::<StructureVersion>(created.rich.id)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn structure_conformance_is_enforced() {
        let fx = Fixture::new();
        let structure_id = fx
            .items()
            .create(&Structure {
                name: "orders schema".to_string(),
                source_key: "orders-schema".to_string(),
                ..Structure::default()
            })
            .expect("create structure")
            .item
            .id;
        let structure_version = fx
            .versions()
            .create(
                &StructureVersion {
                    structure_id,
                    attributes: BTreeMap::from([("rows".to_string(), ValueType::Long)]),
                    ..StructureVersion::default()
                },
                &[],
            )
            .expect("create structure version");
        let node_id = fx.node("orders");

        let mut conforming = node_version(node_id);
        conforming.rich.structure_version_id = Some(structure_version.rich.id);
        fx.versions()
            .create(&conforming, &[])
            .expect("conforming version");

        let mut missing = conforming.clone();
        missing.rich.tags.clear();
        let err = fx.versions().create(&missing, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let mut dangling = conforming;
        dangling.rich.structure_version_id = Some(77_777);
        let err = fx.versions().create(&dangling, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let loaded: StructureVersion = fx
            .versions()
            .retrieve(structure_version.rich.id)
            .expect("retrieve structure version");
        assert_eq!(loaded.attributes["rows"], ValueType::Long);
    }

    #[test]
    fn lineage_edge_versions_require_existing_endpoints() {
        let fx = Fixture::new();
        let node_id = fx.node("orders");
        let upstream = fx
            .versions()
            .create(&node_version(node_id), &[])
            .expect("upstream");
        let lineage_edge_id = fx
            .items()
            .create(&lc_core::model::LineageEdge {
                name: "etl".to_string(),
                source_key: "etl".to_string(),
                ..Default::default()
            })
            .expect("lineage edge")
            .item
            .id;

        let version = LineageEdgeVersion {
            lineage_edge_id,
            from_rich_version_id: upstream.rich.id,
            to_rich_version_id: 55_555,
            ..LineageEdgeVersion::default()
        };
        let err = fx.versions().create(&version, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let downstream = fx
            .versions()
            .create(&node_version(node_id), &[upstream.rich.id])
            .expect("downstream");
        let created = fx
            .versions()
            .create(
                &LineageEdgeVersion {
                    to_rich_version_id: downstream.rich.id,
                    ..version
                },
                &[],
            )
            .expect("lineage edge version");
        let loaded: LineageEdgeVersion = fx.versions().retrieve(created.rich.id).expect("retrieve");
        assert_eq!(loaded, created);
    }
}
