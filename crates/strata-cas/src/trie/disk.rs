//! Memory-mapped, append-only variant of the hash-indexed trie.
//!
//! One file per table, named `v1.<table>`. The file starts with a fixed
//! header describing the format, followed by 64-slot interior nodes and
//! leaves (full key + fixed-size payload). Slots are 64-bit little-endian
//! file offsets with a tag in the low bits, so the file is
//! position-independent and can be mapped by any number of readers.
//!
//! Readers never take a lock: a slot is either still empty, or holds a fully
//! initialized leaf/subtree published by a release-ordered store. All
//! allocation (and therefore all slot publication) happens under an advisory
//! file lock on a sibling `.lock` file, paired with an in-process mutex
//! because the advisory lock only excludes other processes.
//!
//! The file is extended to its maximum size at creation and mapped once.
//! The pages are sparse until allocated, the mapping never moves, and the
//! allocation high-watermark in the header tracks the logical size.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use fs2::FileExt as _;
use memmap2::MmapMut;

use crate::error::{CasError, Result};
use crate::trie::{lock_recover, slot_index, FANOUT, KEY_LEN, MAX_LEVELS};

const MAGIC: [u8; 8] = *b"STRATRIE";
const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: u64 = 128;
const NODE_LEN: u64 = (FANOUT * 8) as u64;

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 8;
const OFF_KEY_BITS: usize = 12;
const OFF_PAYLOAD_LEN: usize = 16;
const OFF_ROOT: usize = 24;
const OFF_HIGH_WATERMARK: usize = 32;
const OFF_HASH_SCHEME: usize = 40;
const HASH_SCHEME_LEN: usize = 16;
const OFF_TABLE_NAME: usize = 56;
const TABLE_NAME_LEN: usize = 64;
const OFF_ENTRY_COUNT: usize = 120;

const TAG_MASK: u64 = 0b111;
const TAG_EMPTY: u64 = 0;
const TAG_LEAF: u64 = 1;
const TAG_CHILD: u64 = 2;

pub(crate) struct DiskTrieConfig {
    /// Self-describing table name recorded in the header, e.g.
    /// `strata.actioncache[BLAKE3->BLAKE3]`.
    pub table_name: &'static str,
    pub payload_len: u32,
    pub max_file_size: u64,
}

#[derive(Debug)]
pub(crate) struct DiskTrie {
    path: PathBuf,
    lock_path: PathBuf,
    map: MmapMut,
    payload_len: u64,
    leaf_len: u64,
    // In-process half of the allocation lock; see the module docs.
    alloc: Mutex<()>,
}

impl DiskTrie {
    pub(crate) fn open(path: &Path, config: &DiskTrieConfig) -> Result<Self> {
        debug_assert!(config.table_name.len() < TABLE_NAME_LEN);
        debug_assert_eq!(u64::from(config.payload_len) % 8, 0);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let lock_path = lock_path_for(path);

        // Hold the allocation lock across creation so a second process opening
        // the same table either initializes it or sees a complete header.
        let lock_file = open_lock_file(&lock_path)?;
        lock_file.lock_exclusive()?;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let fresh = len == 0;
        if fresh {
            let min_len = HEADER_LEN + NODE_LEN;
            if config.max_file_size < min_len {
                return Err(CasError::TableFull {
                    path: path.to_path_buf(),
                    requested: min_len,
                    max_bytes: config.max_file_size,
                });
            }
            file.set_len(config.max_file_size)?;
        } else if len < HEADER_LEN + NODE_LEN {
            return Err(CasError::Corruption {
                path: path.to_path_buf(),
                reason: format!("file is {len} bytes, smaller than an empty table"),
            });
        }

        // SAFETY: the mapping is backed by a regular file we keep open for the
        // lifetime of the trie; concurrent mutation is confined to the atomic
        // slot protocol described in the module docs.
        let map = unsafe { MmapMut::map_mut(&file)? };
        let trie = Self {
            path: path.to_path_buf(),
            lock_path,
            map,
            payload_len: u64::from(config.payload_len),
            leaf_len: KEY_LEN as u64 + round_up8(u64::from(config.payload_len)),
            alloc: Mutex::new(()),
        };

        if fresh {
            trie.init_header(config);
            trie.map.flush()?;
        } else {
            trie.validate_header(config)?;
        }
        Ok(trie)
    }

    fn init_header(&self, config: &DiskTrieConfig) {
        self.write_bytes(OFF_VERSION as u64, &FORMAT_VERSION.to_le_bytes());
        self.write_bytes(OFF_KEY_BITS as u64, &((KEY_LEN * 8) as u32).to_le_bytes());
        self.write_bytes(OFF_PAYLOAD_LEN as u64, &config.payload_len.to_le_bytes());
        self.write_bytes(OFF_ROOT as u64, &HEADER_LEN.to_le_bytes());
        self.write_bytes(
            OFF_HIGH_WATERMARK as u64,
            &(HEADER_LEN + NODE_LEN).to_le_bytes(),
        );
        let mut scheme = [0_u8; HASH_SCHEME_LEN];
        scheme[..6].copy_from_slice(b"blake3");
        self.write_bytes(OFF_HASH_SCHEME as u64, &scheme);
        let mut name = [0_u8; TABLE_NAME_LEN];
        name[..config.table_name.len()].copy_from_slice(config.table_name.as_bytes());
        self.write_bytes(OFF_TABLE_NAME as u64, &name);
        // The magic is written last: a mapped file without it is treated as
        // uninitialized rather than corrupt.
        self.write_bytes(OFF_MAGIC as u64, &MAGIC);
    }

    fn validate_header(&self, config: &DiskTrieConfig) -> Result<()> {
        let corrupt = |reason: String| CasError::Corruption {
            path: self.path.clone(),
            reason,
        };

        if self.header_bytes(OFF_MAGIC, MAGIC.len()) != MAGIC {
            return Err(corrupt("bad magic".to_string()));
        }
        let version = self.header_u32(OFF_VERSION);
        if version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {version}, expected {FORMAT_VERSION}"
            )));
        }
        let key_bits = self.header_u32(OFF_KEY_BITS);
        if key_bits as usize != KEY_LEN * 8 {
            return Err(corrupt(format!("key width {key_bits} bits, expected 256")));
        }
        let payload_len = self.header_u32(OFF_PAYLOAD_LEN);
        if payload_len != config.payload_len {
            return Err(corrupt(format!(
                "payload size {payload_len}, expected {}",
                config.payload_len
            )));
        }
        let name = self.header_bytes(OFF_TABLE_NAME, TABLE_NAME_LEN);
        let name_end = name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TABLE_NAME_LEN);
        if &name[..name_end] != config.table_name.as_bytes() {
            return Err(corrupt(format!(
                "table name {:?}, expected {:?}",
                String::from_utf8_lossy(&name[..name_end]),
                config.table_name
            )));
        }
        let scheme = self.header_bytes(OFF_HASH_SCHEME, HASH_SCHEME_LEN);
        if &scheme[..6] != b"blake3" {
            return Err(corrupt("unknown hash scheme in header".to_string()));
        }

        let root = self.root_offset();
        let hw = self.high_watermark();
        if root != HEADER_LEN || hw < HEADER_LEN + NODE_LEN || hw > self.map.len() as u64 {
            return Err(corrupt(format!(
                "implausible root/high-watermark ({root}/{hw})"
            )));
        }
        Ok(())
    }

    /// Read-only lookup. Returns the offset of the matching leaf, if any.
    pub(crate) fn find(&self, key: &[u8; KEY_LEN]) -> Result<Option<u64>> {
        let mut node_off = self.root_offset();
        for level in 0..MAX_LEVELS {
            let slot = self.load_slot(node_off + 8 * slot_index(key, level) as u64)?;
            match slot & TAG_MASK {
                TAG_EMPTY if slot == 0 => return Ok(None),
                TAG_LEAF => {
                    let leaf_off = slot & !TAG_MASK;
                    return if self.leaf_key(leaf_off)? == key {
                        Ok(Some(leaf_off))
                    } else {
                        Ok(None)
                    };
                }
                TAG_CHILD => node_off = slot & !TAG_MASK,
                tag => {
                    return Err(CasError::Corruption {
                        path: self.path.clone(),
                        reason: format!("impossible slot tag {tag} at level {level}"),
                    });
                }
            }
        }
        Err(CasError::Corruption {
            path: self.path.clone(),
            reason: "trie walk exceeded the maximum depth".to_string(),
        })
    }

    /// Insert-or-return-existing.
    ///
    /// `init` runs exactly once, only when this call inserts the key, and
    /// fills the zeroed payload in place before the leaf is published. If
    /// `init` fails the leaf is abandoned unpublished; the table stays
    /// strictly additive. Returns the leaf offset and whether this call
    /// inserted it.
    pub(crate) fn insert_lazy(
        &self,
        key: &[u8; KEY_LEN],
        init: impl FnOnce(&mut [u8]) -> Result<()>,
    ) -> Result<(u64, bool)> {
        // Lock-free fast path for the common already-present case.
        if let Some(leaf_off) = self.find(key)? {
            return Ok((leaf_off, false));
        }

        let _guard = lock_recover(&self.alloc, "DiskTrie.insert_lazy");
        let lock_file = open_lock_file(&self.lock_path)?;
        lock_file.lock_exclusive()?;
        let result = self.insert_locked(key, init);
        if let Err(err) = fs2::FileExt::unlock(&lock_file) {
            tracing::debug!(
                target = "strata.cas",
                path = %self.lock_path.display(),
                error = %err,
                "failed to release table allocation lock (released on close)"
            );
        }
        result
    }

    fn insert_locked(
        &self,
        key: &[u8; KEY_LEN],
        init: impl FnOnce(&mut [u8]) -> Result<()>,
    ) -> Result<(u64, bool)> {
        // Re-walk under the lock; another process may have raced us here.
        let mut node_off = self.root_offset();
        for level in 0..MAX_LEVELS {
            let slot_off = node_off + 8 * slot_index(key, level) as u64;
            let slot = self.load_slot(slot_off)?;
            match slot & TAG_MASK {
                TAG_EMPTY if slot == 0 => {
                    let leaf_off = self.alloc_leaf(key, init)?;
                    self.publish_slot(slot_off, slot, leaf_off | TAG_LEAF)?;
                    self.bump_entry_count();
                    return Ok((leaf_off, true));
                }
                TAG_LEAF => {
                    let existing_off = slot & !TAG_MASK;
                    if self.leaf_key(existing_off)? == key {
                        return Ok((existing_off, false));
                    }
                    let leaf_off = self.alloc_leaf(key, init)?;
                    let subtree = self.build_chain(existing_off, leaf_off, level + 1)?;
                    self.publish_slot(slot_off, slot, subtree | TAG_CHILD)?;
                    self.bump_entry_count();
                    return Ok((leaf_off, true));
                }
                TAG_CHILD => node_off = slot & !TAG_MASK,
                tag => {
                    return Err(CasError::Corruption {
                        path: self.path.clone(),
                        reason: format!("impossible slot tag {tag} at level {level}"),
                    });
                }
            }
        }
        Err(CasError::Corruption {
            path: self.path.clone(),
            reason: "trie walk exceeded the maximum depth".to_string(),
        })
    }

    /// Build the interior chain separating two leaves whose keys agree on all
    /// slices above `level`. Every node is fully written before the caller
    /// publishes the chain's top into a reachable slot.
    fn build_chain(&self, a_off: u64, b_off: u64, level: usize) -> Result<u64> {
        let a_key = *self.leaf_key(a_off)?;
        let b_key = *self.leaf_key(b_off)?;

        let mut divergence = level;
        while slot_index(&a_key, divergence) == slot_index(&b_key, divergence) {
            divergence += 1;
            if divergence >= MAX_LEVELS {
                return Err(CasError::Corruption {
                    path: self.path.clone(),
                    reason: "attempted to split two leaves with identical keys".to_string(),
                });
            }
        }

        let mut node_offs = Vec::with_capacity(divergence - level + 1);
        for _ in level..=divergence {
            node_offs.push(self.alloc(NODE_LEN)?);
        }

        let bottom = node_offs[node_offs.len() - 1];
        self.store_slot(
            bottom + 8 * slot_index(&a_key, divergence) as u64,
            a_off | TAG_LEAF,
        )?;
        self.store_slot(
            bottom + 8 * slot_index(&b_key, divergence) as u64,
            b_off | TAG_LEAF,
        )?;
        for (i, &node_off) in node_offs[..node_offs.len() - 1].iter().enumerate() {
            self.store_slot(
                node_off + 8 * slot_index(&a_key, level + i) as u64,
                node_offs[i + 1] | TAG_CHILD,
            )?;
        }
        Ok(node_offs[0])
    }

    fn alloc_leaf(
        &self,
        key: &[u8; KEY_LEN],
        init: impl FnOnce(&mut [u8]) -> Result<()>,
    ) -> Result<u64> {
        let leaf_off = self.alloc(self.leaf_len)?;
        self.write_bytes(leaf_off, key);
        // Freshly allocated regions come from untouched sparse pages, so the
        // payload handed to `init` is zeroed.
        let payload_off = (leaf_off + KEY_LEN as u64) as usize;
        let payload_len = self.payload_len as usize;
        // SAFETY: in bounds (checked by alloc) and unreachable by readers
        // until the leaf is published.
        let payload = unsafe {
            std::slice::from_raw_parts_mut(
                self.map.as_ptr().cast_mut().add(payload_off),
                payload_len,
            )
        };
        init(payload)?;
        Ok(leaf_off)
    }

    /// Bump the high-watermark. Caller holds the allocation lock.
    fn alloc(&self, len: u64) -> Result<u64> {
        let off = round_up8(self.high_watermark());
        let end = off.saturating_add(len);
        if end > self.map.len() as u64 {
            return Err(CasError::TableFull {
                path: self.path.clone(),
                requested: len,
                max_bytes: self.map.len() as u64,
            });
        }
        self.atomic_unchecked(OFF_HIGH_WATERMARK)
            .store(end.to_le(), Ordering::Release);
        Ok(off)
    }

    fn bump_entry_count(&self) {
        // Monotonic counter for diagnostics; ordering piggybacks on the
        // publishing store.
        let count = u64::from_le(
            self.atomic_unchecked(OFF_ENTRY_COUNT)
                .load(Ordering::Acquire),
        );
        self.atomic_unchecked(OFF_ENTRY_COUNT)
            .store((count + 1).to_le(), Ordering::Release);
    }

    pub(crate) fn entry_count(&self) -> u64 {
        u64::from_le(
            self.atomic_unchecked(OFF_ENTRY_COUNT)
                .load(Ordering::Acquire),
        )
    }

    pub(crate) fn allocated_bytes(&self) -> u64 {
        self.high_watermark()
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn leaf_key(&self, leaf_off: u64) -> Result<&[u8; KEY_LEN]> {
        let bytes = self.checked_range(leaf_off, KEY_LEN as u64)?;
        // Length is checked above; the conversion cannot fail.
        Ok(bytes.try_into().map_err(|_| CasError::Corruption {
            path: self.path.clone(),
            reason: "leaf key out of bounds".to_string(),
        })?)
    }

    pub(crate) fn payload(&self, leaf_off: u64) -> Result<&[u8]> {
        self.checked_range(leaf_off + KEY_LEN as u64, self.payload_len)
    }

    fn checked_range(&self, off: u64, len: u64) -> Result<&[u8]> {
        let end = off.saturating_add(len);
        if off < HEADER_LEN || end > self.map.len() as u64 {
            return Err(CasError::Corruption {
                path: self.path.clone(),
                reason: format!("offset range {off}..{end} escapes the mapped file"),
            });
        }
        Ok(&self.map[off as usize..end as usize])
    }

    fn root_offset(&self) -> u64 {
        u64::from_le_bytes(
            self.header_bytes(OFF_ROOT, 8)
                .try_into()
                .unwrap_or([0; 8]),
        )
    }

    fn high_watermark(&self) -> u64 {
        u64::from_le(
            self.atomic_unchecked(OFF_HIGH_WATERMARK)
                .load(Ordering::Acquire),
        )
    }

    fn header_bytes(&self, off: usize, len: usize) -> &[u8] {
        &self.map[off..off + len]
    }

    fn header_u32(&self, off: usize) -> u32 {
        u32::from_le_bytes(self.header_bytes(off, 4).try_into().unwrap_or([0; 4]))
    }

    fn load_slot(&self, off: u64) -> Result<u64> {
        Ok(u64::from_le(self.atomic(off)?.load(Ordering::Acquire)))
    }

    /// Plain release store into a slot nothing else can reach yet.
    fn store_slot(&self, off: u64, value: u64) -> Result<()> {
        self.atomic(off)?.store(value.to_le(), Ordering::Release);
        Ok(())
    }

    /// Publish a slot the rest of the world can see. The compare-exchange can
    /// only fail if another writer ignored the allocation lock, which we
    /// treat as corruption rather than retry.
    fn publish_slot(&self, off: u64, old: u64, new: u64) -> Result<()> {
        let swapped = self.atomic(off)?.compare_exchange(
            old.to_le(),
            new.to_le(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if swapped.is_err() {
            return Err(CasError::Corruption {
                path: self.path.clone(),
                reason: format!("slot at {off} changed under the allocation lock"),
            });
        }
        Ok(())
    }

    fn atomic(&self, off: u64) -> Result<&AtomicU64> {
        if off % 8 != 0 || off.saturating_add(8) > self.map.len() as u64 {
            return Err(CasError::Corruption {
                path: self.path.clone(),
                reason: format!("misaligned or out-of-bounds slot offset {off}"),
            });
        }
        Ok(self.atomic_unchecked(off as usize))
    }

    fn atomic_unchecked(&self, off: usize) -> &AtomicU64 {
        // SAFETY: `off` is 8-aligned and in bounds (header offsets are
        // constants; slot offsets go through `atomic`), and AtomicU64 may
        // alias the mapped bytes because every concurrent access to these
        // words is atomic.
        unsafe { &*self.map.as_ptr().add(off).cast::<AtomicU64>() }
    }

    fn write_bytes(&self, off: u64, bytes: &[u8]) {
        debug_assert!(off as usize + bytes.len() <= self.map.len());
        // SAFETY: callers only write regions that are not yet reachable from
        // any published slot (or the header during single-owner init).
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.map.as_ptr().cast_mut().add(off as usize),
                bytes.len(),
            );
        }
    }
}

fn round_up8(value: u64) -> u64 {
    (value + 7) & !7
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DiskTrieConfig {
        DiskTrieConfig {
            table_name: "strata.test[BLAKE3->BLAKE3]",
            payload_len: 16,
            max_file_size: 4 * 1024 * 1024,
        }
    }

    fn key(fill: u8) -> [u8; KEY_LEN] {
        [fill; KEY_LEN]
    }

    #[test]
    fn insert_find_and_reopen() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("v1.test");

        {
            let trie = DiskTrie::open(&path, &config())?;
            let (off, inserted) = trie.insert_lazy(&key(7), |payload| {
                payload.copy_from_slice(&[7; 16]);
                Ok(())
            })?;
            assert!(inserted);
            assert_eq!(trie.payload(off)?, &[7; 16]);
            assert_eq!(trie.entry_count(), 1);
        }

        let trie = DiskTrie::open(&path, &config())?;
        let off = trie.find(&key(7))?.expect("key survives reopen");
        assert_eq!(trie.payload(off)?, &[7; 16]);
        assert!(trie.find(&key(8))?.is_none());
        Ok(())
    }

    #[test]
    fn losing_insert_returns_winner_payload() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let trie = DiskTrie::open(&tmp.path().join("v1.test"), &config())?;

        let (first, inserted) = trie.insert_lazy(&key(1), |payload| {
            payload.copy_from_slice(&[1; 16]);
            Ok(())
        })?;
        assert!(inserted);

        let (second, inserted) = trie.insert_lazy(&key(1), |_| {
            panic!("constructor must not run for an existing key");
        })?;
        assert!(!inserted);
        assert_eq!(first, second);
        assert_eq!(trie.payload(second)?, &[1; 16]);
        Ok(())
    }

    #[test]
    fn shared_prefixes_split() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let trie = DiskTrie::open(&tmp.path().join("v1.test"), &config())?;

        // Diverge only in the last byte so the walk has to build a deep chain.
        let mut a = key(0xCD);
        let mut b = key(0xCD);
        a[KEY_LEN - 1] = 0;
        b[KEY_LEN - 1] = 1;

        trie.insert_lazy(&a, |payload| {
            payload.copy_from_slice(&[0xA; 16]);
            Ok(())
        })?;
        trie.insert_lazy(&b, |payload| {
            payload.copy_from_slice(&[0xB; 16]);
            Ok(())
        })?;

        assert_eq!(trie.payload(trie.find(&a)?.expect("a present"))?, &[0xA; 16]);
        assert_eq!(trie.payload(trie.find(&b)?.expect("b present"))?, &[0xB; 16]);
        Ok(())
    }

    #[test]
    fn racing_inserts_run_constructor_once() -> Result<()> {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::{Arc, Barrier};

        let tmp = tempfile::tempdir()?;
        let trie = Arc::new(DiskTrie::open(&tmp.path().join("v1.test"), &config())?);
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(32));

        let threads: Vec<_> = (0..32)
            .map(|_| {
                let trie = Arc::clone(&trie);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || -> Result<Vec<u8>> {
                    barrier.wait();
                    let (off, _) = trie.insert_lazy(&key(9), |payload| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        payload.copy_from_slice(&[0xEE; 16]);
                        Ok(())
                    })?;
                    Ok(trie.payload(off)?.to_vec())
                })
            })
            .collect();

        for thread in threads {
            assert_eq!(thread.join().expect("no panics")?, vec![0xEE; 16]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(trie.entry_count(), 1);
        Ok(())
    }

    #[test]
    fn failed_constructor_leaves_table_unchanged() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let trie = DiskTrie::open(&tmp.path().join("v1.test"), &config())?;

        let err = trie
            .insert_lazy(&key(3), |_| {
                Err(CasError::Io(io::Error::other("constructor failed")))
            })
            .expect_err("constructor error propagates");
        assert!(matches!(err, CasError::Io(_)));
        assert!(trie.find(&key(3))?.is_none());
        assert_eq!(trie.entry_count(), 0);
        Ok(())
    }

    #[test]
    fn tiny_table_reports_full() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let tiny = DiskTrieConfig {
            max_file_size: HEADER_LEN + NODE_LEN,
            ..config()
        };
        let trie = DiskTrie::open(&tmp.path().join("v1.test"), &tiny)?;

        let err = trie
            .insert_lazy(&key(5), |_| Ok(()))
            .expect_err("no room for a leaf");
        assert!(matches!(err, CasError::TableFull { .. }));
        Ok(())
    }

    #[test]
    fn mismatched_config_is_corruption() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("v1.test");
        drop(DiskTrie::open(&path, &config())?);

        let other = DiskTrieConfig {
            payload_len: 32,
            ..config()
        };
        let err = DiskTrie::open(&path, &other).expect_err("payload size mismatch");
        assert!(matches!(err, CasError::Corruption { .. }));
        Ok(())
    }
}
