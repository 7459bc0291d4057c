#![forbid(unsafe_code)]

use lc_core::dag::DagError;
use lc_core::tags::TagError;
use thiserror::Error;

/// Error kinds visible to callers; transport status mapping is keyed on these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidParent,
    InvalidArgument,
    UnknownType,
    Storage,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("parent {parent} is not in item {item}")]
    InvalidParent { parent: i64, item: i64 },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unknown tag value type: {0}")]
    UnknownType(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("backend: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidParent { .. } => ErrorKind::InvalidParent,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::UnknownType(_) => ErrorKind::UnknownType,
            Self::Io(_) | Self::Sql(_) | Self::Json(_) | Self::Backend(_) => ErrorKind::Storage,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<DagError> for StoreError {
    fn from(value: DagError) -> Self {
        match value {
            DagError::InvalidParent { parent, item } => Self::InvalidParent { parent, item },
            DagError::Cycle { from, to } => {
                Self::InvalidArgument(format!("{} (from={from}, to={to})", value.message()))
            }
            DagError::InvalidDepth(depth) => {
                Self::InvalidArgument(format!("{} (got {depth})", value.message()))
            }
            DagError::RootAsChild { .. } => Self::InvalidArgument(value.message().to_string()),
            // Persisted edges that cannot form a dag mean the stored history is corrupt.
            DagError::ForeignEdge { .. } | DagError::DanglingParent { .. } => {
                Self::Backend(format!("{value:?}: {}", value.message()))
            }
        }
    }
}

impl From<TagError> for StoreError {
    fn from(value: TagError) -> Self {
        match value {
            TagError::UnknownType(raw) => Self::UnknownType(raw),
            TagError::MissingAttribute(ref key) => {
                Self::InvalidArgument(format!("{}: {key}", value.message()))
            }
            TagError::TypeMismatch { ref key, .. } => {
                Self::InvalidArgument(format!("{}: {key}", value.message()))
            }
            TagError::Malformed { value_type, ref raw } => Self::InvalidArgument(format!(
                "{} ({}: {raw:?})",
                value.message(),
                value_type.as_str()
            )),
            TagError::EmptyKey | TagError::ContainsControl => {
                Self::InvalidArgument(value.message().to_string())
            }
        }
    }
}

pub(crate) fn map_insert_conflict(err: rusqlite::Error) -> StoreError {
    if is_constraint_violation(&err) {
        return StoreError::InvalidArgument(format!("duplicate key: {err}"));
    }
    StoreError::Sql(err)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == rusqlite::ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}
