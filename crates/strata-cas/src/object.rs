use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{CasError, Result};
use crate::id::{CasId, Digest};

/// Identity of one store instance within this process.
///
/// Refs carry the id of the store that minted them so cross-store use is
/// detected instead of silently resolving to an unrelated object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StoreId(u64);

impl StoreId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) const fn raw(self) -> u64 {
        self.0
    }
}

/// A compact handle naming one object within one store instance.
///
/// Obtaining an `ObjectRef` is proof the object is addressable, though its
/// content may not yet be loaded. The index is meaningful only to the store
/// that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    store: StoreId,
    index: u64,
}

impl ObjectRef {
    pub(crate) const fn new(store: StoreId, index: u64) -> Self {
        Self { store, index }
    }

    pub const fn store_id(&self) -> StoreId {
        self.store
    }

    pub(crate) const fn index(&self) -> u64 {
        self.index
    }

    /// Reject a ref minted by a different store.
    pub(crate) fn check_store(&self, this_store: StoreId) -> Result<()> {
        if self.store == this_store {
            Ok(())
        } else {
            Err(CasError::ConfigMismatch {
                ref_store: self.store.raw(),
                this_store: this_store.raw(),
            })
        }
    }
}

/// A loaded view of one object: its data plus resolved refs.
///
/// Handles are cheap to clone; the underlying buffers are shared.
#[derive(Clone, Debug)]
pub struct ObjectHandle {
    store: StoreId,
    digest: Digest,
    data: Arc<[u8]>,
    refs: Arc<[ObjectRef]>,
}

impl ObjectHandle {
    pub(crate) fn new(
        store: StoreId,
        digest: Digest,
        data: Arc<[u8]>,
        refs: Arc<[ObjectRef]>,
    ) -> Self {
        Self {
            store,
            digest,
            data,
            refs,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn num_refs(&self) -> usize {
        self.refs.len()
    }

    pub fn ref_at(&self, index: usize) -> Option<ObjectRef> {
        self.refs.get(index).copied()
    }

    pub fn refs(&self) -> impl ExactSizeIterator<Item = ObjectRef> + '_ {
        self.refs.iter().copied()
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn id(&self) -> CasId {
        CasId::blake3(self.digest)
    }

    pub(crate) const fn store_id(&self) -> StoreId {
        self.store
    }
}

/// A stored object together with its loaded content.
///
/// Produced by `create_proxy` (store + load in one step).
#[derive(Clone, Debug)]
pub struct ObjectProxy {
    reference: ObjectRef,
    handle: ObjectHandle,
}

impl ObjectProxy {
    pub(crate) fn new(reference: ObjectRef, handle: ObjectHandle) -> Self {
        Self { reference, handle }
    }

    pub fn reference(&self) -> ObjectRef {
        self.reference
    }

    pub fn handle(&self) -> &ObjectHandle {
        &self.handle
    }

    pub fn id(&self) -> CasId {
        self.handle.id()
    }

    pub fn data(&self) -> &[u8] {
        self.handle.data()
    }
}
