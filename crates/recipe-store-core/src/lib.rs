use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

mod shutdown;
mod store;

pub use shutdown::{spawn_dump_on_shutdown, ShutdownSignal};
pub use store::RecordStore;

/// File name the service dumps to when no explicit path is configured.
pub const DEFAULT_DUMP_FILE: &str = "recipes.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("store is empty")]
    EmptyStore,
    #[error("page {page} with limit {limit} is out of range for {total} records")]
    PageOutOfRange { page: usize, limit: usize, total: usize },
    #[error("page limit must be at least 1")]
    InvalidLimit,
    #[error("dump file {path} is corrupt: {reason}")]
    PersistenceCorrupt { path: PathBuf, reason: String },
    #[error("dump file {path} could not be accessed: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Ingredient {
    pub amount: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    #[serde(rename = "user_id")]
    pub author_id: String,
    pub name: String,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    pub temperature: i64,
}

/// Generates a fresh record identifier.
#[must_use]
pub fn new_record_id() -> String {
    Ulid::new().to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Name,
}

impl SortKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "name" => Some(Self::Name),
            _ => None,
        }
    }
}

impl Display for SortKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
