//! Error types for kvsnap.
//!
//! Every fallible operation returns [`Result<T>`]. Failures from suspension
//! points propagate unchanged to the nearest awaiting caller; nothing here is
//! retried.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// An underlying open/read/write request failed
    #[error("request failed: {0}")]
    Request(String),

    /// A schema upgrade was invoked for a version absent from the step mapping
    #[error("no upgrade step defined for version {version}")]
    MissingVersionDefinition { version: u32 },

    /// A record write during restore failed; the whole restore was rolled back
    #[error("restore of '{db}' failed: {source}")]
    RestoreFailed {
        db: String,
        #[source]
        source: Box<Error>,
    },

    /// Opening with a version lower than the stored one
    #[error("requested version {requested} is lower than current version {current}")]
    Version { requested: u32, current: u32 },

    #[error("database '{0}' not found")]
    DatabaseNotFound(String),

    #[error("object store '{0}' not found")]
    StoreNotFound(String),

    #[error("index '{index}' not found on object store '{store}'")]
    IndexNotFound { store: String, index: String },

    #[error("snapshot {0} not found")]
    SnapshotNotFound(u64),

    /// Invalid key, key path or key range
    #[error("data error: {0}")]
    Data(String),

    /// Duplicate primary key on add, or duplicate key in a unique index
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("write attempted in a read-only transaction")]
    ReadOnly,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("config error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Request(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
