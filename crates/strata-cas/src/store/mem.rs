//! In-memory object store backend.
//!
//! The index is the heap trie keyed by object digest; payloads are indices
//! into an append-only arena of shared cells, so loaded handles borrow
//! nothing and clone cheaply.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{CasError, Result};
use crate::id::{object_digest, CasId, Digest};
use crate::object::{ObjectHandle, ObjectRef, StoreId};
use crate::store::{ObjectStore, StoreStats};
use crate::trie::mem::MemTrie;
use crate::trie::{read_recover, write_recover};

struct Cell {
    digest: Digest,
    data: Arc<[u8]>,
    refs: Arc<[ObjectRef]>,
}

pub struct InMemoryObjectStore {
    id: StoreId,
    trie: MemTrie<u64>,
    arena: RwLock<Vec<Arc<Cell>>>,
    data_bytes: AtomicU64,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            id: StoreId::next(),
            trie: MemTrie::new(),
            arena: RwLock::new(Vec::new()),
            data_bytes: AtomicU64::new(0),
        }
    }

    fn cell(&self, reference: ObjectRef) -> Result<Arc<Cell>> {
        reference.check_store(self.id)?;
        let arena = read_recover(&self.arena, "InMemoryObjectStore.cell");
        arena
            .get(reference.index() as usize)
            .cloned()
            .ok_or_else(|| CasError::NotFound {
                id: format!("object #{}", reference.index()),
            })
    }

    fn ref_digests(&self, refs: &[ObjectRef]) -> Result<Vec<Digest>> {
        refs.iter()
            .map(|&r| Ok(self.cell(r)?.digest))
            .collect()
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn store_id(&self) -> StoreId {
        self.id
    }

    fn store(&self, refs: &[ObjectRef], data: &[u8]) -> Result<ObjectRef> {
        let ref_digests = self.ref_digests(refs)?;
        let digest = object_digest(&ref_digests, data);

        let (leaf, inserted) = self.trie.insert_lazy(digest.as_bytes(), || {
            let cell = Arc::new(Cell {
                digest,
                data: Arc::from(data),
                refs: Arc::from(refs),
            });
            let mut arena = write_recover(&self.arena, "InMemoryObjectStore.store");
            arena.push(cell);
            (arena.len() - 1) as u64
        });
        if inserted {
            self.data_bytes
                .fetch_add(data.len() as u64, Ordering::Relaxed);
        }
        Ok(ObjectRef::new(self.id, leaf.payload))
    }

    fn load(&self, reference: ObjectRef) -> Result<ObjectHandle> {
        let cell = self.cell(reference)?;
        Ok(ObjectHandle::new(
            self.id,
            cell.digest,
            Arc::clone(&cell.data),
            Arc::clone(&cell.refs),
        ))
    }

    fn get_reference(&self, id: &CasId) -> Result<Option<ObjectRef>> {
        Ok(self
            .trie
            .find(id.digest().as_bytes())
            .map(|leaf| ObjectRef::new(self.id, leaf.payload)))
    }

    fn get_id(&self, reference: ObjectRef) -> Result<CasId> {
        Ok(CasId::blake3(self.cell(reference)?.digest))
    }

    fn validate(&self, id: &CasId) -> Result<()> {
        let reference = self
            .get_reference(id)?
            .ok_or_else(|| CasError::NotFound { id: id.to_string() })?;
        let cell = self.cell(reference)?;
        let ref_digests = self.ref_digests(&cell.refs)?;
        let recomputed = object_digest(&ref_digests, &cell.data);
        if recomputed != cell.digest {
            return Err(CasError::Corruption {
                path: std::path::PathBuf::from("<memory>"),
                reason: format!("object {id} re-hashes to blake3:{recomputed}"),
            });
        }
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        let objects = {
            let arena = read_recover(&self.arena, "InMemoryObjectStore.stats");
            arena.len() as u64
        };
        StoreStats {
            objects,
            bytes: self.data_bytes.load(Ordering::Relaxed),
        }
    }
}
