//! The object store API and its two interchangeable backends.

pub(crate) mod disk;
pub(crate) mod mem;

use crate::error::Result;
use crate::id::CasId;
use crate::object::{ObjectHandle, ObjectProxy, ObjectRef, StoreId};

/// Diagnostic counters for one store instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of distinct objects held.
    pub objects: u64,
    /// Bytes of storage attributed to object content and index records.
    pub bytes: u64,
}

/// A deduplicating store of immutable objects keyed by the digest of their
/// content and outgoing references.
///
/// `store` is idempotent: racing stores of identical `(refs, data)` collapse
/// onto one object, and `store` followed by `get_reference` on the same id
/// always returns `Some`. Objects are never mutated or individually deleted;
/// the store is a set, not a log.
pub trait ObjectStore: Send + Sync {
    /// Identity of this store instance; refs are scoped to it.
    fn store_id(&self) -> StoreId;

    /// Store `(refs, data)`, returning a ref to the (possibly pre-existing)
    /// object. Every ref must have been minted by this store.
    fn store(&self, refs: &[ObjectRef], data: &[u8]) -> Result<ObjectRef>;

    /// Materialize an object's content. May perform I/O.
    fn load(&self, reference: ObjectRef) -> Result<ObjectHandle>;

    /// Look up an id without loading. `Ok(None)` means the object is unknown
    /// to this store.
    fn get_reference(&self, id: &CasId) -> Result<Option<ObjectRef>>;

    /// The externalized identity of a stored object.
    fn get_id(&self, reference: ObjectRef) -> Result<CasId>;

    /// Integrity check: re-hash the object's canonical encoding and compare
    /// with its id.
    fn validate(&self, id: &CasId) -> Result<()>;

    fn stats(&self) -> StoreStats;

    fn contains(&self, id: &CasId) -> Result<bool> {
        Ok(self.get_reference(id)?.is_some())
    }

    /// Parse the textual id form accepted at system boundaries.
    fn parse_id(&self, text: &str) -> Result<CasId> {
        CasId::parse(text)
    }

    /// The textual id form emitted at system boundaries (lower-case hex).
    fn print_id(&self, id: &CasId) -> String {
        id.to_string()
    }

    /// Store then load in one step.
    fn create_proxy(&self, refs: &[ObjectRef], data: &[u8]) -> Result<ObjectProxy> {
        let reference = self.store(refs, data)?;
        let handle = self.load(reference)?;
        Ok(ObjectProxy::new(reference, handle))
    }
}

/// Visit every outgoing reference of a loaded object.
pub fn for_each_ref(
    handle: &ObjectHandle,
    mut callback: impl FnMut(ObjectRef) -> Result<()>,
) -> Result<()> {
    for reference in handle.refs() {
        callback(reference)?;
    }
    Ok(())
}
