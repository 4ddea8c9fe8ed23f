//! Content-addressed storage for compile-job caching.
//!
//! This crate implements the storage half of the compile-job cache:
//! - immutable objects `(refs, data)` keyed by the BLAKE3 digest of their
//!   canonical encoding, with in-memory and on-disk backends
//! - the action cache binding action keys to result objects, with
//!   insert-or-verify poisoning detection
//! - the memory-mapped hash-indexed trie both on-disk tables are built on
//! - hierarchical (name → object) trees for grouping named outputs
//! - the trait a remote cache plugin is adapted into

mod action_cache;
mod backend;
mod config;
mod error;
mod id;
mod object;
mod store;
mod tree;
mod trie;

pub use action_cache::{ActionCache, ActionKey, InMemoryActionCache, OnDiskActionCache};
pub use backend::{
    get_map_blocking, Lookup, MapEntry, MapLookupCallback, RemoteActionCache, RemoteCacheBackend,
};
pub use config::{CasConfig, DEFAULT_MAX_TABLE_SIZE};
pub use error::{CasError, Result};
pub use id::{digest_bytes, object_digest, CasId, Digest, HashScheme, DIGEST_LEN};
pub use object::{ObjectHandle, ObjectProxy, ObjectRef, StoreId};
pub use store::disk::OnDiskObjectStore;
pub use store::mem::InMemoryObjectStore;
pub use store::{for_each_ref, ObjectStore, StoreStats};
pub use tree::{TreeBuilder, TreeReader};
