use thiserror::Error;

/// The kind of entity a `NotFound`/`AlreadyExists` error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Index,
    Field,
    Sorter,
    Record,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Index => "index",
            EntityKind::Field => "field",
            EntityKind::Sorter => "sorter",
            EntityKind::Record => "record",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} not found: {key}")]
    NotFound { kind: EntityKind, key: String },

    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: EntityKind, key: String },

    /// A mutating admin call was attempted while a job is already running for the index.
    #[error("index '{0}' is busy: a job is already running")]
    Busy(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    /// A caller-supplied update transform returned the abort sentinel.
    #[error("update aborted by caller")]
    Aborted,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl Error {
    pub fn not_found(kind: EntityKind, key: impl Into<String>) -> Self {
        Error::NotFound { kind, key: key.into() }
    }

    pub fn already_exists(kind: EntityKind, key: impl Into<String>) -> Self {
        Error::AlreadyExists { kind, key: key.into() }
    }
}

/// Wraps the concrete failures that can surface from the underlying store
/// or index engine, per the `Storage` error kind.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Storage(err.into())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Storage(err.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
