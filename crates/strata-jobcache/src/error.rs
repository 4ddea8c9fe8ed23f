/// Errors produced by the compile-job cache controller and its output
/// plumbing.
#[derive(Debug, thiserror::Error)]
pub enum JobCacheError {
    #[error(transparent)]
    Cas(#[from] strata_cas::CasError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("result tree for key {key} has no usable {entry} entry")]
    MalformedResultTree { key: String, entry: &'static str },

    #[error("dependency object is malformed: {reason}")]
    MalformedDependencies { reason: &'static str },

    #[error("serialized diagnostics are malformed: {reason}")]
    MalformedDiagnostics { reason: &'static str },
}

pub type Result<T> = std::result::Result<T, JobCacheError>;
