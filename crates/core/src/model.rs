#![forbid(unsafe_code)]

use crate::tags::{TagError, TagMap, ValueType, rekey_tags};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKind {
    Node,
    Edge,
    Structure,
    LineageEdge,
}

impl ItemKind {
    pub const ALL: [ItemKind; 4] = [
        ItemKind::Node,
        ItemKind::Edge,
        ItemKind::Structure,
        ItemKind::LineageEdge,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Edge => "edge",
            Self::Structure => "structure",
            Self::LineageEdge => "lineage_edge",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

/// Identity and tags shared by every versioned entity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Item {
    pub id: i64,
    pub tags: TagMap,
}

impl Item {
    pub fn with_tags(tags: TagMap) -> Self {
        Self { id: 0, tags }
    }

    /// Same item under `id`, tags re-owned by it.
    pub fn assign_id(&self, id: i64) -> Self {
        Self {
            id,
            tags: rekey_tags(&self.tags, id),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Node {
    pub item: Item,
    pub name: String,
    pub source_key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Edge {
    pub item: Item,
    pub name: String,
    pub source_key: String,
    pub from_node_id: i64,
    pub to_node_id: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Structure {
    pub item: Item,
    pub name: String,
    pub source_key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineageEdge {
    pub item: Item,
    pub name: String,
    pub source_key: String,
}

/// Payload common to all version kinds. Immutable once created.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RichVersion {
    pub id: i64,
    pub tags: TagMap,
    pub structure_version_id: Option<i64>,
    pub reference: Option<String>,
    pub reference_parameters: BTreeMap<String, String>,
}

impl RichVersion {
    /// Copy of this payload under `id`, with every tag re-owned by the new id.
    pub fn assign_id(&self, id: i64) -> Self {
        Self {
            id,
            tags: rekey_tags(&self.tags, id),
            structure_version_id: self.structure_version_id,
            reference: self.reference.clone(),
            reference_parameters: self.reference_parameters.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeVersion {
    pub rich: RichVersion,
    pub node_id: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EdgeVersion {
    pub rich: RichVersion,
    pub edge_id: i64,
    pub from_node_version_start_id: i64,
    pub from_node_version_end_id: Option<i64>,
    pub to_node_version_start_id: i64,
    pub to_node_version_end_id: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StructureVersion {
    pub rich: RichVersion,
    pub structure_id: i64,
    pub attributes: BTreeMap<String, ValueType>,
}

impl StructureVersion {
    /// Every attribute must appear among `tags` with a value of the declared type.
    pub fn check_conformance(&self, tags: &TagMap) -> Result<(), TagError> {
        for (key, expected) in &self.attributes {
            let Some(tag) = tags.get(key) else {
                return Err(TagError::MissingAttribute(key.clone()));
            };
            let actual = tag.value_type();
            if actual != Some(*expected) {
                return Err(TagError::TypeMismatch {
                    key: key.clone(),
                    expected: Some(*expected),
                    actual,
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineageEdgeVersion {
    pub rich: RichVersion,
    pub lineage_edge_id: i64,
    pub from_rich_version_id: i64,
    pub to_rich_version_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::{Tag, TagValue};

    #[test]
    fn assign_id_rekeys_version_tags() {
        let mut tags = TagMap::new();
        tags.insert("owner".to_string(), Tag::new(0, "owner", TagValue::String("ops".into())));
        let rich = RichVersion {
            tags,
            reference: Some("s3://bucket/key".to_string()),
            ..RichVersion::default()
        };
        let assigned = rich.assign_id(17);
        assert_eq!(assigned.id, 17);
        assert_eq!(assigned.tags["owner"].owner_id, 17);
        assert_eq!(assigned.reference, rich.reference);
    }

    #[test]
    fn structure_conformance_checks_keys_and_types() {
        let structure = StructureVersion {
            attributes: BTreeMap::from([("rows".to_string(), ValueType::Long)]),
            ..StructureVersion::default()
        };
        let mut tags = TagMap::new();
        assert_eq!(
            structure.check_conformance(&tags).unwrap_err(),
            TagError::MissingAttribute("rows".to_string())
        );
        tags.insert("rows".to_string(), Tag::new(1, "rows", TagValue::Integer(3)));
        assert!(matches!(
            structure.check_conformance(&tags),
            Err(TagError::TypeMismatch { .. })
        ));
        tags.insert("rows".to_string(), Tag::new(1, "rows", TagValue::Long(3)));
        assert!(structure.check_conformance(&tags).is_ok());
    }

    #[test]
    fn item_kind_names_round_trip() {
        for kind in ItemKind::ALL {
            assert_eq!(ItemKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ItemKind::parse("graph"), None);
    }
}
