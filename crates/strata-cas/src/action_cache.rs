//! The action cache: a key→value map binding action keys to the result
//! objects a prior run produced.
//!
//! `put` is insert-or-verify. Re-inserting the same value is idempotent;
//! inserting a different value for an existing key fails with a poisoning
//! error, which is the detector for non-determinism in whatever produced the
//! key. `get` fails with a dangling-value error when the stored value names
//! an object the paired store cannot resolve (the cache and store have
//! drifted, e.g. the store was wiped while the cache file persisted).

use std::fmt;
use std::sync::Arc;

use crate::config::CasConfig;
use crate::error::{CasError, Result};
use crate::id::{CasId, Digest, DIGEST_LEN};
use crate::object::ObjectRef;
use crate::store::ObjectStore;
use crate::trie::disk::{DiskTrie, DiskTrieConfig};
use crate::trie::mem::MemTrie;

pub(crate) const ACTIONS_TABLE_FILE: &str = "v1.actions";
const ACTIONS_TABLE_NAME: &str = "strata.actioncache[BLAKE3->BLAKE3]";

/// The digest of a canonicalized action (e.g. a compile invocation).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionKey(Digest);

impl ActionKey {
    pub const fn from_digest(digest: Digest) -> Self {
        Self(digest)
    }

    pub const fn digest(&self) -> &Digest {
        &self.0
    }
}

impl From<&CasId> for ActionKey {
    fn from(id: &CasId) -> Self {
        Self(*id.digest())
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionKey({})", self.0)
    }
}

/// Key→value map from action keys to objects in a paired store.
pub trait ActionCache: Send + Sync {
    /// The previously stored value for `key`, or `None` if absent.
    fn get(&self, key: &ActionKey) -> Result<Option<ObjectRef>>;

    /// Insert-or-verify `key → value`.
    fn put(&self, key: &ActionKey, value: ObjectRef) -> Result<()>;
}

/// Resolve a stored value digest against the paired store, mapping an
/// unresolvable value to the dangling error.
fn resolve_value(
    store: &dyn ObjectStore,
    key: &ActionKey,
    value: &Digest,
) -> Result<ObjectRef> {
    store
        .get_reference(&CasId::blake3(*value))?
        .ok_or_else(|| CasError::Dangling {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Shared insert-or-verify conclusion for an existing entry.
fn verify_existing(
    store: &dyn ObjectStore,
    key: &ActionKey,
    existing: &Digest,
    new: &Digest,
) -> Result<()> {
    // An unresolvable existing value is reported as dangling even when the
    // new value differs; the caller cannot fix a poisoned entry it cannot
    // even load.
    resolve_value(store, key, existing)?;
    if existing == new {
        return Ok(());
    }
    tracing::error!(
        target = "strata.cas",
        %key,
        existing = %existing,
        new = %new,
        "action cache poisoned"
    );
    Err(CasError::Poisoned {
        key: key.to_string(),
        existing: existing.to_string(),
        new: new.to_string(),
    })
}

pub struct InMemoryActionCache {
    store: Arc<dyn ObjectStore>,
    trie: MemTrie<Digest>,
}

impl InMemoryActionCache {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            trie: MemTrie::new(),
        }
    }
}

impl ActionCache for InMemoryActionCache {
    fn get(&self, key: &ActionKey) -> Result<Option<ObjectRef>> {
        match self.trie.find(key.digest().as_bytes()) {
            Some(leaf) => Ok(Some(resolve_value(&*self.store, key, &leaf.payload)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &ActionKey, value: ObjectRef) -> Result<()> {
        let new = *self.store.get_id(value)?.digest();
        let (leaf, inserted) = self.trie.insert_lazy(key.digest().as_bytes(), || new);
        if inserted {
            return Ok(());
        }
        verify_existing(&*self.store, key, &leaf.payload, &new)
    }
}

/// On-disk action cache over the shared trie substrate, paired with an
/// object store that resolves its values.
///
/// The paired store and the cache file are configured independently, so the
/// dangling detection matters here: a cache file can outlive the store it
/// was written against.
pub struct OnDiskActionCache {
    store: Arc<dyn ObjectStore>,
    trie: DiskTrie,
}

impl OnDiskActionCache {
    pub fn open(store: Arc<dyn ObjectStore>, config: &CasConfig) -> Result<Self> {
        let root = config.resolve_root()?;
        let trie = DiskTrie::open(
            &root.join(ACTIONS_TABLE_FILE),
            &DiskTrieConfig {
                table_name: ACTIONS_TABLE_NAME,
                payload_len: DIGEST_LEN as u32,
                max_file_size: config.max_table_size,
            },
        )?;
        tracing::debug!(
            target = "strata.cas",
            root = %root.display(),
            entries = trie.entry_count(),
            "opened on-disk action cache"
        );
        Ok(Self { store, trie })
    }

    fn payload_digest(&self, leaf_off: u64) -> Result<Digest> {
        Digest::from_slice(self.trie.payload(leaf_off)?).ok_or_else(|| CasError::Corruption {
            path: self.trie.path().to_path_buf(),
            reason: "action value has the wrong digest length".to_string(),
        })
    }
}

impl ActionCache for OnDiskActionCache {
    fn get(&self, key: &ActionKey) -> Result<Option<ObjectRef>> {
        match self.trie.find(key.digest().as_bytes())? {
            Some(leaf_off) => {
                let value = self.payload_digest(leaf_off)?;
                Ok(Some(resolve_value(&*self.store, key, &value)?))
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &ActionKey, value: ObjectRef) -> Result<()> {
        let new = *self.store.get_id(value)?.digest();
        let (leaf_off, inserted) = self.trie.insert_lazy(key.digest().as_bytes(), |payload| {
            payload.copy_from_slice(new.as_bytes());
            Ok(())
        })?;
        if inserted {
            return Ok(());
        }
        let existing = self.payload_digest(leaf_off)?;
        verify_existing(&*self.store, key, &existing, &new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::InMemoryObjectStore;

    #[test]
    fn put_then_get() -> Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let cache = InMemoryActionCache::new(Arc::clone(&store));

        let proxy = store.create_proxy(&[], b"1")?;
        let key = ActionKey::from(&proxy.id());
        cache.put(&key, proxy.reference())?;
        assert_eq!(cache.get(&key)?, Some(proxy.reference()));
        Ok(())
    }

    #[test]
    fn rewrite_with_same_value_is_idempotent() -> Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let cache = InMemoryActionCache::new(Arc::clone(&store));

        let p1 = store.create_proxy(&[], b"1")?;
        let p2 = store.create_proxy(&[], b"2")?;
        let key = ActionKey::from(&p1.id());

        cache.put(&key, p1.reference())?;
        let err = cache.put(&key, p2.reference()).expect_err("poisoned");
        assert!(matches!(err, CasError::Poisoned { .. }));
        cache.put(&key, p1.reference())?;
        Ok(())
    }
}
