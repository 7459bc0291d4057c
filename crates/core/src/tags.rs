#![forbid(unsafe_code)]

use std::collections::BTreeMap;

/// Tags keyed by tag key; each tag also records its owner.
pub type TagMap = BTreeMap<String, Tag>;

/// Closed set of tag value types. The stored form is the upper-case name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    String,
    Integer,
    Long,
    Boolean,
}

impl ValueType {
    pub const ALL: [ValueType; 4] = [
        ValueType::String,
        ValueType::Integer,
        ValueType::Long,
        ValueType::Boolean,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Integer => "INTEGER",
            Self::Long => "LONG",
            Self::Boolean => "BOOLEAN",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, TagError> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| TagError::UnknownType(raw.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagValue {
    String(String),
    Integer(i32),
    Long(i64),
    Boolean(bool),
}

impl TagValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::Integer(_) => ValueType::Integer,
            Self::Long(_) => ValueType::Long,
            Self::Boolean(_) => ValueType::Boolean,
        }
    }

    /// Text form persisted next to the type name.
    pub fn encode(&self) -> String {
        match self {
            Self::String(value) => value.clone(),
            Self::Integer(value) => value.to_string(),
            Self::Long(value) => value.to_string(),
            Self::Boolean(value) => value.to_string(),
        }
    }

    /// Exact inverse of [`TagValue::encode`] for the given type.
    pub fn decode(value_type: ValueType, raw: &str) -> Result<Self, TagError> {
        let malformed = || TagError::Malformed {
            value_type,
            raw: raw.to_string(),
        };
        match value_type {
            ValueType::String => Ok(Self::String(raw.to_string())),
            ValueType::Integer => raw.parse().map(Self::Integer).map_err(|_| malformed()),
            ValueType::Long => raw.parse().map(Self::Long).map_err(|_| malformed()),
            ValueType::Boolean => match raw {
                "true" => Ok(Self::Boolean(true)),
                "false" => Ok(Self::Boolean(false)),
                _ => Err(malformed()),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub owner_id: i64,
    pub key: String,
    pub value: Option<TagValue>,
}

impl Tag {
    pub fn new(owner_id: i64, key: impl Into<String>, value: TagValue) -> Self {
        Self {
            owner_id,
            key: key.into(),
            value: Some(value),
        }
    }

    /// A key-only tag.
    pub fn marker(owner_id: i64, key: impl Into<String>) -> Self {
        Self {
            owner_id,
            key: key.into(),
            value: None,
        }
    }

    pub fn value_type(&self) -> Option<ValueType> {
        self.value.as_ref().map(TagValue::value_type)
    }

    pub fn with_owner(&self, owner_id: i64) -> Self {
        Self {
            owner_id,
            key: self.key.clone(),
            value: self.value.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), TagError> {
        if self.key.trim().is_empty() {
            return Err(TagError::EmptyKey);
        }
        if self.key.chars().any(|c| c.is_control()) {
            return Err(TagError::ContainsControl);
        }
        Ok(())
    }
}

/// Copies every tag onto `owner_id`; the map keys are taken from the tags.
pub fn rekey_tags(tags: &TagMap, owner_id: i64) -> TagMap {
    tags.values()
        .map(|tag| (tag.key.clone(), tag.with_owner(owner_id)))
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagError {
    EmptyKey,
    ContainsControl,
    UnknownType(String),
    Malformed {
        value_type: ValueType,
        raw: String,
    },
    TypeMismatch {
        key: String,
        expected: Option<ValueType>,
        actual: Option<ValueType>,
    },
    MissingAttribute(String),
}

impl TagError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::EmptyKey => "tag key must not be empty",
            Self::ContainsControl => "tag key contains control characters",
            Self::UnknownType(_) => "unknown tag value type",
            Self::Malformed { .. } => "stored tag value does not match its type",
            Self::TypeMismatch { .. } => "tag value does not match its declared type",
            Self::MissingAttribute(_) => "tag required by the structure version is missing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_value_kind_survives_encoding() {
        let values = [
            TagValue::String("a b|c".to_string()),
            TagValue::Integer(i32::MIN),
            TagValue::Long(i64::MAX),
            TagValue::Boolean(false),
        ];
        for value in values {
            let raw = value.encode();
            let ty = ValueType::parse(value.value_type().as_str()).unwrap();
            assert_eq!(TagValue::decode(ty, &raw).unwrap(), value);
        }
    }

    #[test]
    fn unknown_type_names_are_rejected() {
        assert_eq!(
            ValueType::parse("FLOAT").unwrap_err(),
            TagError::UnknownType("FLOAT".to_string())
        );
        assert_eq!(ValueType::parse("long").unwrap(), ValueType::Long);
    }

    #[test]
    fn malformed_stored_values_fail_to_decode() {
        assert!(matches!(
            TagValue::decode(ValueType::Integer, "12x"),
            Err(TagError::Malformed { .. })
        ));
        assert!(matches!(
            TagValue::decode(ValueType::Integer, &i64::MAX.to_string()),
            Err(TagError::Malformed { .. })
        ));
        assert!(matches!(
            TagValue::decode(ValueType::Boolean, "TRUE"),
            Err(TagError::Malformed { .. })
        ));
    }

    #[test]
    fn keys_are_validated() {
        assert_eq!(Tag::marker(1, " ").validate(), Err(TagError::EmptyKey));
        assert_eq!(Tag::marker(1, "a\tb").validate(), Err(TagError::ContainsControl));
        assert!(Tag::marker(1, "pii").validate().is_ok());
    }

    #[test]
    fn rekey_copies_tags_onto_new_owner() {
        let mut tags = TagMap::new();
        tags.insert("a".to_string(), Tag::new(5, "a", TagValue::Integer(1)));
        tags.insert("b".to_string(), Tag::marker(5, "b"));
        let rekeyed = rekey_tags(&tags, 9);
        assert!(rekeyed.values().all(|tag| tag.owner_id == 9));
        assert!(tags.values().all(|tag| tag.owner_id == 5));
        assert_eq!(rekeyed["a"].value, Some(TagValue::Integer(1)));
    }
}
