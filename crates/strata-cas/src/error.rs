use std::path::PathBuf;

/// Errors produced by the object store, the action cache, and the trie
/// substrate beneath them.
#[derive(Debug, thiserror::Error)]
pub enum CasError {
    #[error("failed to determine home directory for default cas path")]
    MissingHomeDir,

    #[error("object {id} is not known to this store")]
    NotFound { id: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "action cache poisoned for key {key}: existing value {existing} conflicts with new value {new}"
    )]
    Poisoned {
        key: String,
        existing: String,
        new: String,
    },

    #[error("action cache value {value} for key {key} does not resolve in the paired object store")]
    Dangling { key: String, value: String },

    #[error("corrupt table {path}: {reason}")]
    Corruption { path: PathBuf, reason: String },

    #[error("object reference is scoped to store {ref_store}, not store {this_store}")]
    ConfigMismatch { ref_store: u64, this_store: u64 },

    #[error("table {path} is full: allocation of {requested} bytes exceeds the {max_bytes} byte cap")]
    TableFull {
        path: PathBuf,
        requested: u64,
        max_bytes: u64,
    },

    #[error("invalid cas id {text:?}: {reason}")]
    InvalidId { text: String, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, CasError>;
