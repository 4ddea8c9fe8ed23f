//! On-disk object store backend.
//!
//! Two files under the store root:
//! - `v1.objects`: hash-indexed trie keyed by object digest; each payload is
//!   a fixed record `{data_offset, data_len, refs_offset, refs_count}`.
//! - `v1.leaves`: append-only side file holding the packed 32-byte ref
//!   digests followed by the raw data bytes of each object.
//!
//! Side-file appends happen inside the trie's insert constructor, so they are
//! serialized by the same allocation lock and an object record never points
//! at a partially written region.

use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fs2::FileExt as _;

use crate::config::CasConfig;
use crate::error::{CasError, Result};
use crate::id::{object_digest, CasId, Digest, DIGEST_LEN};
use crate::object::{ObjectHandle, ObjectRef, StoreId};
use crate::store::{ObjectStore, StoreStats};
use crate::trie::disk::{DiskTrie, DiskTrieConfig};
use crate::trie::lock_recover;

pub(crate) const OBJECTS_TABLE_FILE: &str = "v1.objects";
pub(crate) const LEAVES_FILE: &str = "v1.leaves";
const OBJECTS_TABLE_NAME: &str = "strata.objects[BLAKE3]";
const LEAVES_MAGIC: [u8; 8] = *b"STRALEAF";

/// Fixed trie payload: four little-endian u64 fields.
const RECORD_LEN: u32 = 32;

struct Record {
    data_offset: u64,
    data_len: u64,
    refs_offset: u64,
    refs_count: u64,
}

impl Record {
    fn write_to(&self, payload: &mut [u8]) -> Result<()> {
        let mut cursor = Cursor::new(payload);
        cursor.write_u64::<LittleEndian>(self.data_offset)?;
        cursor.write_u64::<LittleEndian>(self.data_len)?;
        cursor.write_u64::<LittleEndian>(self.refs_offset)?;
        cursor.write_u64::<LittleEndian>(self.refs_count)?;
        Ok(())
    }

    fn read_from(mut payload: &[u8]) -> Result<Self> {
        Ok(Self {
            data_offset: payload.read_u64::<LittleEndian>()?,
            data_len: payload.read_u64::<LittleEndian>()?,
            refs_offset: payload.read_u64::<LittleEndian>()?,
            refs_count: payload.read_u64::<LittleEndian>()?,
        })
    }
}

pub struct OnDiskObjectStore {
    id: StoreId,
    trie: DiskTrie,
    leaves: Mutex<File>,
    leaves_path: PathBuf,
}

impl OnDiskObjectStore {
    /// Open (creating if needed) the store rooted at the config's directory.
    pub fn open(config: &CasConfig) -> Result<Self> {
        let root = config.resolve_root()?;
        std::fs::create_dir_all(&root)?;

        let trie = DiskTrie::open(
            &root.join(OBJECTS_TABLE_FILE),
            &DiskTrieConfig {
                table_name: OBJECTS_TABLE_NAME,
                payload_len: RECORD_LEN,
                max_file_size: config.max_table_size,
            },
        )?;

        let leaves_path = root.join(LEAVES_FILE);
        let leaves = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&leaves_path)?;
        leaves.lock_exclusive()?;
        let init_result = init_leaves(&leaves, &leaves_path);
        if let Err(err) = fs2::FileExt::unlock(&leaves) {
            tracing::debug!(
                target = "strata.cas",
                path = %leaves_path.display(),
                error = %err,
                "failed to release leaves init lock (released on close)"
            );
        }
        init_result?;

        tracing::debug!(
            target = "strata.cas",
            root = %root.display(),
            objects = trie.entry_count(),
            "opened on-disk object store"
        );

        Ok(Self {
            id: StoreId::next(),
            trie,
            leaves: Mutex::new(leaves),
            leaves_path,
        })
    }

    fn record(&self, leaf_off: u64) -> Result<Record> {
        Record::read_from(self.trie.payload(leaf_off)?)
    }

    fn leaf_digest(&self, leaf_off: u64) -> Result<Digest> {
        Ok(Digest::from_bytes(*self.trie.leaf_key(leaf_off)?))
    }

    fn read_leaves(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut leaves = lock_recover(&self.leaves, "OnDiskObjectStore.read_leaves");
        leaves.seek(SeekFrom::Start(offset))?;
        let mut bytes = vec![0_u8; len];
        leaves.read_exact(&mut bytes).map_err(|err| {
            CasError::Corruption {
                path: self.leaves_path.clone(),
                reason: format!("short read at {offset}+{len}: {err}"),
            }
        })?;
        Ok(bytes)
    }

    fn ref_digests(&self, refs: &[ObjectRef]) -> Result<Vec<Digest>> {
        refs.iter()
            .map(|&r| {
                r.check_store(self.id)?;
                self.leaf_digest(r.index())
            })
            .collect()
    }
}

fn init_leaves(leaves: &File, path: &Path) -> Result<()> {
    let len = leaves.metadata()?.len();
    if len == 0 {
        let mut file = leaves;
        file.write_all(&LEAVES_MAGIC)?;
        file.sync_all()?;
    } else if len < LEAVES_MAGIC.len() as u64 {
        return Err(CasError::Corruption {
            path: path.to_path_buf(),
            reason: "leaves file is shorter than its magic".to_string(),
        });
    } else {
        let mut magic = [0_u8; 8];
        let mut file = leaves;
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut magic)?;
        if magic != LEAVES_MAGIC {
            return Err(CasError::Corruption {
                path: path.to_path_buf(),
                reason: "bad leaves magic".to_string(),
            });
        }
    }
    Ok(())
}

impl ObjectStore for OnDiskObjectStore {
    fn store_id(&self) -> StoreId {
        self.id
    }

    fn store(&self, refs: &[ObjectRef], data: &[u8]) -> Result<ObjectRef> {
        let ref_digests = self.ref_digests(refs)?;
        let digest = object_digest(&ref_digests, data);

        let (leaf_off, _inserted) = self.trie.insert_lazy(digest.as_bytes(), |payload| {
            // Runs under the table allocation lock, so the append below is
            // serialized against every other writer of this store.
            let mut leaves = lock_recover(&self.leaves, "OnDiskObjectStore.store");
            let refs_offset = leaves.seek(SeekFrom::End(0))?;
            for ref_digest in &ref_digests {
                leaves.write_all(ref_digest.as_bytes())?;
            }
            leaves.write_all(data)?;

            Record {
                data_offset: refs_offset + (ref_digests.len() * DIGEST_LEN) as u64,
                data_len: data.len() as u64,
                refs_offset,
                refs_count: ref_digests.len() as u64,
            }
            .write_to(payload)
        })?;
        Ok(ObjectRef::new(self.id, leaf_off))
    }

    fn load(&self, reference: ObjectRef) -> Result<ObjectHandle> {
        reference.check_store(self.id)?;
        let digest = self.leaf_digest(reference.index())?;
        let record = self.record(reference.index())?;

        let packed_refs = self.read_leaves(
            record.refs_offset,
            record.refs_count as usize * DIGEST_LEN,
        )?;
        let mut refs = Vec::with_capacity(record.refs_count as usize);
        for chunk in packed_refs.chunks_exact(DIGEST_LEN) {
            let ref_digest = Digest::from_slice(chunk).ok_or_else(|| CasError::Corruption {
                path: self.leaves_path.clone(),
                reason: "truncated ref digest".to_string(),
            })?;
            // A store never dangles; a missing referenced object means the
            // index and side file disagree.
            let leaf_off = self.trie.find(ref_digest.as_bytes())?.ok_or_else(|| {
                CasError::Corruption {
                    path: self.leaves_path.clone(),
                    reason: format!("object references unknown blake3:{ref_digest}"),
                }
            })?;
            refs.push(ObjectRef::new(self.id, leaf_off));
        }

        let data = self.read_leaves(record.data_offset, record.data_len as usize)?;
        Ok(ObjectHandle::new(
            self.id,
            digest,
            data.into(),
            refs.into(),
        ))
    }

    fn get_reference(&self, id: &CasId) -> Result<Option<ObjectRef>> {
        Ok(self
            .trie
            .find(id.digest().as_bytes())?
            .map(|leaf_off| ObjectRef::new(self.id, leaf_off)))
    }

    fn get_id(&self, reference: ObjectRef) -> Result<CasId> {
        reference.check_store(self.id)?;
        Ok(CasId::blake3(self.leaf_digest(reference.index())?))
    }

    fn validate(&self, id: &CasId) -> Result<()> {
        let reference = self
            .get_reference(id)?
            .ok_or_else(|| CasError::NotFound { id: id.to_string() })?;
        let handle = self.load(reference)?;
        let ref_digests: Vec<Digest> = handle
            .refs()
            .map(|r| self.leaf_digest(r.index()))
            .collect::<Result<_>>()?;
        let recomputed = object_digest(&ref_digests, handle.data());
        if recomputed != *handle.digest() {
            return Err(CasError::Corruption {
                path: self.trie.path().to_path_buf(),
                reason: format!("object {id} re-hashes to blake3:{recomputed}"),
            });
        }
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        let leaves_bytes = {
            let leaves = lock_recover(&self.leaves, "OnDiskObjectStore.stats");
            leaves.metadata().map(|meta| meta.len()).unwrap_or(0)
        };
        StoreStats {
            objects: self.trie.entry_count(),
            bytes: self.trie.allocated_bytes() + leaves_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(root: &Path) -> Result<OnDiskObjectStore> {
        OnDiskObjectStore::open(&CasConfig {
            max_table_size: 4 * 1024 * 1024,
            ..CasConfig::with_root(root)
        })
    }

    #[test]
    fn round_trips_across_reopen() -> Result<()> {
        let tmp = tempfile::tempdir()?;

        let stored_id = {
            let store = open_store(tmp.path())?;
            let leaf = store.store(&[], b"leaf bytes")?;
            let root = store.store(&[leaf], b"root bytes")?;
            store.get_id(root)?
        };

        let store = open_store(tmp.path())?;
        let root = store
            .get_reference(&stored_id)?
            .expect("object survives reopen");
        let handle = store.load(root)?;
        assert_eq!(handle.data(), b"root bytes");
        assert_eq!(handle.num_refs(), 1);

        let leaf = store.load(handle.ref_at(0).expect("one ref"))?;
        assert_eq!(leaf.data(), b"leaf bytes");
        store.validate(&stored_id)?;
        Ok(())
    }

    #[test]
    fn store_is_idempotent_on_disk() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = open_store(tmp.path())?;

        let a = store.store(&[], b"same")?;
        let b = store.store(&[], b"same")?;
        assert_eq!(a, b);
        assert_eq!(store.stats().objects, 1);
        Ok(())
    }

    #[test]
    fn two_instances_share_one_root() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let first = open_store(tmp.path())?;
        let second = open_store(tmp.path())?;

        let id = first.create_proxy(&[], b"shared")?.id();
        // Same file, distinct store instances: the object is visible but the
        // refs are scoped per instance.
        let reference = second
            .get_reference(&id)?
            .expect("object visible through the shared file");
        assert_eq!(second.load(reference)?.data(), b"shared");

        let foreign = first.get_reference(&id)?.expect("present in first");
        assert!(matches!(
            second.load(foreign),
            Err(CasError::ConfigMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn empty_object_is_storable() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = open_store(tmp.path())?;
        let proxy = store.create_proxy(&[], b"")?;
        assert_eq!(proxy.data(), b"");
        store.validate(&proxy.id())?;
        Ok(())
    }
}
