//! Error type shared by the engine, registry and backends.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by xkl-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("could not access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse configuration registry {path}: {source}")]
    Registry {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },

    #[error("{path}: root element is <{found}>, expected <xkbConfigRegistry>")]
    RegistryRoot { path: PathBuf, found: String },

    #[error("no configuration registry found for rules '{0}'")]
    RegistryNotFound(String),

    #[error("configuration registry is not loaded")]
    RegistryNotLoaded,

    #[error("could not get the property {0}")]
    PropertyMissing(String),

    #[error("wrong property format: {0}")]
    PropertyFormat(String),

    #[error("could not compile keymap: {0}")]
    Keymap(String),

    #[error("{layouts} layouts but {variants} variants")]
    LengthMismatch { layouts: usize, variants: usize },

    #[error("{requested} layouts requested, the server supports at most {max}")]
    TooManyGroups { requested: usize, max: usize },

    #[error("configuration has no layouts")]
    NoLayouts,

    #[error("name '{name}' does not fit into {capacity} bytes")]
    NameTooLong { name: String, capacity: usize },

    #[error("group {group} is out of range ({count} groups)")]
    GroupOutOfRange { group: usize, count: usize },

    #[error("indicator {index} is out of range ({count} indicators)")]
    IndicatorOutOfRange { index: usize, count: usize },

    #[error("server state: {0}")]
    State(#[from] serde_json::Error),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl Error {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// True when a configuration registry could not be found or parsed.
    pub fn is_registry_load(&self) -> bool {
        matches!(
            self,
            Error::Registry { .. } | Error::RegistryRoot { .. } | Error::RegistryNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
