use thiserror::Error;

/// Crate-wide error type covering document-store, view-engine and store-transport failures.
#[derive(Error, Debug)]
pub enum ViewBaseError {
    #[error("document {0} already exists")]
    DuplicateDocument(String),
    #[error("a `_rev` was supplied on insert, but insert only accepts new documents")]
    UnexpectedRev,
    #[error("revision conflict updating document {0}")]
    RevisionConflict(String),
    #[error("view `{0}` is not defined")]
    UndefinedView(String),
    #[error("invalid group level: {0}")]
    InvalidGroupLevel(String),
    #[error("query shape not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("database is closed")]
    ClosedDatabase,
    #[error("store error: {0}")]
    Store(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ViewBaseError>;
