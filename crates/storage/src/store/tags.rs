#![forbid(unsafe_code)]

use super::StoreError;
use super::backend::{Backend, TagRow, TagScope, Write, WriteBatch};
use lc_core::tags::{Tag, TagMap, TagValue, ValueType};

/// Typed key/value annotations of items and versions.
pub struct TagStore<'a> {
    backend: &'a dyn Backend,
}

impl<'a> TagStore<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self { backend }
    }

    pub fn write_item_tags(&self, tags: &TagMap) -> Result<WriteBatch, StoreError> {
        write_tags(TagScope::Item, tags)
    }

    pub fn write_version_tags(&self, tags: &TagMap) -> Result<WriteBatch, StoreError> {
        write_tags(TagScope::Version, tags)
    }

    /// All tags of `owner_id`; an owner without tags yields an empty map.
    pub fn read_tags(&self, owner_id: i64, scope: TagScope) -> Result<TagMap, StoreError> {
        self.backend
            .tags(scope, owner_id)?
            .into_iter()
            .map(|row| decode_tag(row).map(|tag| (tag.key.clone(), tag)))
            .collect()
    }

    pub fn find_owners(&self, key: &str, scope: TagScope) -> Result<Vec<i64>, StoreError> {
        self.backend.tag_owners(scope, key)
    }
}

fn write_tags(scope: TagScope, tags: &TagMap) -> Result<WriteBatch, StoreError> {
    let mut batch = WriteBatch::new();
    for tag in tags.values() {
        tag.validate()?;
        batch.push(Write::InsertTag {
            scope,
            row: encode_tag(tag),
        });
    }
    Ok(batch)
}

pub(crate) fn encode_tag(tag: &Tag) -> TagRow {
    TagRow {
        owner_id: tag.owner_id,
        key: tag.key.clone(),
        value: tag.value.as_ref().map(TagValue::encode),
        value_type: tag.value_type().map(|ty| ty.as_str().to_string()),
    }
}

pub(crate) fn decode_tag(row: TagRow) -> Result<Tag, StoreError> {
    let value_type = row.value_type.as_deref().map(ValueType::parse).transpose()?;
    match (value_type, row.value) {
        (Some(ty), Some(raw)) => Ok(Tag::new(row.owner_id, row.key, TagValue::decode(ty, &raw)?)),
        (None, None) => Ok(Tag::marker(row.owner_id, row.key)),
        _ => Err(StoreError::InvalidArgument(format!(
            "stored tag {:?} of owner {} has a value without a type or a type without a value",
            row.key, row.owner_id
        ))),
    }
}
