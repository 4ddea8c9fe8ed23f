//! The pluggable remote-backend seam.
//!
//! A loaded plugin (the dynamic-library loading itself lives outside this
//! crate) is adapted into [`RemoteCacheBackend`]. The trait mirrors the
//! documented function table: object store and digest print/parse, scalar
//! action-cache get/put, and a map variant whose lookup is asynchronous and
//! completed through a callback. [`RemoteActionCache`] then turns any such
//! backend into an [`ActionCache`] with the same insert-or-verify and
//! dangling semantics as the local backends.

use std::sync::mpsc;
use std::sync::Arc;

use crate::action_cache::{ActionCache, ActionKey};
use crate::error::{CasError, Result};
use crate::id::CasId;
use crate::object::ObjectRef;
use crate::store::ObjectStore;

/// Outcome of a remote lookup that distinguishes "absent" from "failed".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }
}

/// One entry of a map-valued action result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapEntry {
    pub name: String,
    pub value: CasId,
}

/// Callback completing an asynchronous map lookup.
pub type MapLookupCallback = Box<dyn FnOnce(Result<Lookup<Vec<MapEntry>>>) + Send + 'static>;

/// Contract a remote cache plugin is adapted into.
///
/// Every method may perform network I/O. There are no timeouts here; callers
/// impose them externally.
pub trait RemoteCacheBackend: Send + Sync {
    /// Store `(refs, data)` remotely, returning its id.
    fn store_object(&self, refs: &[CasId], data: &[u8]) -> Result<CasId>;

    /// Load the `(refs, data)` of a remote object.
    fn load_object(&self, id: &CasId) -> Result<Lookup<(Vec<CasId>, Vec<u8>)>>;

    fn get_value(&self, key: &ActionKey) -> Result<Lookup<CasId>>;

    fn put_value(&self, key: &ActionKey, value: &CasId) -> Result<()>;

    fn get_map(&self, key: &ActionKey) -> Result<Lookup<Vec<MapEntry>>>;

    fn put_map(&self, key: &ActionKey, entries: &[MapEntry]) -> Result<()>;

    /// Asynchronous map lookup; `on_complete` is invoked exactly once.
    ///
    /// The default implementation completes synchronously, which is the
    /// correct behavior for backends without a native async surface.
    fn get_map_async(&self, key: &ActionKey, on_complete: MapLookupCallback) {
        on_complete(self.get_map(key));
    }

    /// Print a digest the way the remote side expects it.
    fn print_digest(&self, id: &CasId) -> String {
        id.to_string()
    }

    /// Parse a digest printed by the remote side.
    fn parse_digest(&self, text: &str) -> Result<CasId> {
        CasId::parse(text)
    }
}

/// Block on a backend's asynchronous map lookup.
pub fn get_map_blocking(
    backend: &dyn RemoteCacheBackend,
    key: &ActionKey,
) -> Result<Lookup<Vec<MapEntry>>> {
    let (sender, receiver) = mpsc::channel();
    backend.get_map_async(
        key,
        Box::new(move |result| {
            // The receiver can only be gone if the caller was dropped
            // mid-wait; losing the result is then harmless.
            let _ = sender.send(result);
        }),
    );
    receiver.recv().map_err(|_| {
        CasError::Io(std::io::Error::other(
            "remote backend dropped its completion callback",
        ))
    })?
}

/// An [`ActionCache`] view over a remote backend, paired with the local
/// store used to resolve values into refs.
pub struct RemoteActionCache {
    backend: Arc<dyn RemoteCacheBackend>,
    store: Arc<dyn ObjectStore>,
}

impl RemoteActionCache {
    pub fn new(backend: Arc<dyn RemoteCacheBackend>, store: Arc<dyn ObjectStore>) -> Self {
        Self { backend, store }
    }
}

impl ActionCache for RemoteActionCache {
    fn get(&self, key: &ActionKey) -> Result<Option<ObjectRef>> {
        match self.backend.get_value(key)? {
            Lookup::NotFound => Ok(None),
            Lookup::Found(value) => self
                .store
                .get_reference(&value)?
                .map(Some)
                .ok_or_else(|| CasError::Dangling {
                    key: key.to_string(),
                    value: value.digest().to_string(),
                }),
        }
    }

    fn put(&self, key: &ActionKey, value: ObjectRef) -> Result<()> {
        let new = self.store.get_id(value)?;
        // The remote side has no insert-or-verify primitive, so the
        // poisoning check happens host-side before the write.
        match self.backend.get_value(key)? {
            Lookup::NotFound => self.backend.put_value(key, &new),
            Lookup::Found(existing) if existing == new => Ok(()),
            Lookup::Found(existing) => Err(CasError::Poisoned {
                key: key.to_string(),
                existing: existing.digest().to_string(),
                new: new.digest().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::InMemoryObjectStore;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBackend {
        values: Mutex<HashMap<[u8; 32], CasId>>,
        maps: Mutex<HashMap<[u8; 32], Vec<MapEntry>>>,
    }

    impl RemoteCacheBackend for FakeBackend {
        fn store_object(&self, _refs: &[CasId], _data: &[u8]) -> Result<CasId> {
            unimplemented!("not exercised")
        }

        fn load_object(&self, _id: &CasId) -> Result<Lookup<(Vec<CasId>, Vec<u8>)>> {
            Ok(Lookup::NotFound)
        }

        fn get_value(&self, key: &ActionKey) -> Result<Lookup<CasId>> {
            let values = self.values.lock().expect("fake lock");
            Ok(values
                .get(key.digest().as_bytes())
                .copied()
                .map_or(Lookup::NotFound, Lookup::Found))
        }

        fn put_value(&self, key: &ActionKey, value: &CasId) -> Result<()> {
            let mut values = self.values.lock().expect("fake lock");
            values.insert(*key.digest().as_bytes(), *value);
            Ok(())
        }

        fn get_map(&self, key: &ActionKey) -> Result<Lookup<Vec<MapEntry>>> {
            let maps = self.maps.lock().expect("fake lock");
            Ok(maps
                .get(key.digest().as_bytes())
                .cloned()
                .map_or(Lookup::NotFound, Lookup::Found))
        }

        fn put_map(&self, key: &ActionKey, entries: &[MapEntry]) -> Result<()> {
            let mut maps = self.maps.lock().expect("fake lock");
            maps.insert(*key.digest().as_bytes(), entries.to_vec());
            Ok(())
        }
    }

    #[test]
    fn remote_cache_mirrors_local_semantics() -> Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let backend = Arc::new(FakeBackend::default());
        let cache = RemoteActionCache::new(backend, Arc::clone(&store));

        let p1 = store.create_proxy(&[], b"1")?;
        let p2 = store.create_proxy(&[], b"2")?;
        let key = ActionKey::from(&p1.id());

        assert_eq!(cache.get(&key)?, None);
        cache.put(&key, p1.reference())?;
        assert_eq!(cache.get(&key)?, Some(p1.reference()));
        assert!(matches!(
            cache.put(&key, p2.reference()),
            Err(CasError::Poisoned { .. })
        ));
        Ok(())
    }

    #[test]
    fn blocking_adapter_completes_the_map_lookup() -> Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let backend = FakeBackend::default();

        let p1 = store.create_proxy(&[], b"1")?;
        let key = ActionKey::from(&p1.id());
        assert_eq!(get_map_blocking(&backend, &key)?, Lookup::NotFound);

        let entries = vec![MapEntry {
            name: "<output>".to_string(),
            value: p1.id(),
        }];
        backend.put_map(&key, &entries)?;
        assert_eq!(get_map_blocking(&backend, &key)?, Lookup::Found(entries));
        Ok(())
    }
}
