//! Compile-job result caching over the content-addressed store.
//!
//! Given a canonicalized compiler invocation this crate derives a stable
//! action key, replays a previously cached result tree on a hit, and on a
//! miss runs the frontend with its outputs intercepted, folds them into a
//! `{outputs, stderr}` tree, and binds the key to it. Failed compiles are
//! never cached.

mod controller;
mod deps;
mod diags;
mod error;
mod invocation;
mod output;
mod util;

pub use controller::{
    CacheOutcome, CompileContext, CompileJobCache, CompileOutcome, Compiler, JobCacheConfig,
    JobSummary, Remark,
};
pub use deps::{replay_dependencies, DepScanMode, DependencyCollector};
pub use diags::{decode as decode_serialized_diagnostics, encode as encode_serialized_diagnostics};
pub use error::{JobCacheError, Result};
pub use invocation::{derive_action_key, CompileInvocation};
pub use output::{
    CapturingOutputBackend, MirroringOutputBackend, OnDiskOutputBackend, OutputBackend,
    OutputFile, OutputKind, KIND_NAME_DEPENDENCIES, KIND_NAME_MAIN, KIND_NAME_SERIAL_DIAGS,
};
pub use util::atomic_write;
