#![forbid(unsafe_code)]

use super::StoreError;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_STORAGE_DIR: &str = ".lineage_catalog";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    #[default]
    Sqlite,
    Memory,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// How a catalog process opens its storage and partitions the id space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogConfig {
    pub backend: BackendKind,
    pub storage_dir: PathBuf,
    pub busy_timeout_ms: u64,
    pub machine_id: u16,
    pub num_machines: u16,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            machine_id: 0,
            num_machines: 1,
        }
    }
}

impl CatalogConfig {
    /// Defaults overridden by `LC_BACKEND`, `LC_STORAGE_DIR`,
    /// `LC_BUSY_TIMEOUT_MS`, `LC_MACHINE_ID` and `LC_NUM_MACHINES`.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`CatalogConfig::from_env`] with variables read from `lookup`.
    /// Values are trimmed here, and blank ones count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(raw) = var("LC_BACKEND") {
            config.backend = BackendKind::parse(&raw).ok_or_else(|| {
                StoreError::InvalidArgument(format!(
                    "LC_BACKEND must be sqlite or memory (got {raw:?})"
                ))
            })?;
        }
        if let Some(raw) = var("LC_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(raw);
        }
        if let Some(raw) = var("LC_BUSY_TIMEOUT_MS") {
            config.busy_timeout_ms = parse_number("LC_BUSY_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = var("LC_MACHINE_ID") {
            config.machine_id = parse_number("LC_MACHINE_ID", &raw)?;
        }
        if let Some(raw) = var("LC_NUM_MACHINES") {
            config.num_machines = parse_number("LC_NUM_MACHINES", &raw)?;
        }
        Ok(config)
    }
}

fn parse_number<T: FromStr>(name: &str, raw: &str) -> Result<T, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::InvalidArgument(format!("{name} must be a number (got {raw:?})")))
}
