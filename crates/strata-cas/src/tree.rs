//! Hierarchical (name → object) trees.
//!
//! A tree is an ordinary object: the entry names are packed into the data
//! with length framing, and the children are the refs in the same order.
//! Entries are sorted by name, so equal trees are equal objects.

use crate::error::{CasError, Result};
use crate::object::{ObjectHandle, ObjectProxy, ObjectRef};
use crate::store::ObjectStore;

pub struct TreeBuilder {
    entries: Vec<(String, ObjectRef)>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a named entry. Pushing a name twice keeps the later ref.
    pub fn push(&mut self, name: impl Into<String>, reference: ObjectRef) -> &mut Self {
        self.entries.push((name.into(), reference));
        self
    }

    pub fn build(mut self, store: &dyn ObjectStore) -> Result<ObjectProxy> {
        // Stable sort + keep-last dedup, so later pushes win.
        self.entries.sort_by(|a, b| a.0.cmp(&b.0));
        let mut deduped: Vec<(String, ObjectRef)> = Vec::with_capacity(self.entries.len());
        for entry in self.entries {
            match deduped.last_mut() {
                Some(last) if last.0 == entry.0 => last.1 = entry.1,
                _ => deduped.push(entry),
            }
        }

        let mut data = Vec::new();
        data.extend_from_slice(&(deduped.len() as u64).to_le_bytes());
        for (name, _) in &deduped {
            data.extend_from_slice(&(name.len() as u64).to_le_bytes());
            data.extend_from_slice(name.as_bytes());
        }
        let refs: Vec<ObjectRef> = deduped.into_iter().map(|(_, r)| r).collect();
        store.create_proxy(&refs, &data)
    }
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TreeReader {
    handle: ObjectHandle,
    names: Vec<String>,
}

impl TreeReader {
    pub fn open(store: &dyn ObjectStore, reference: ObjectRef) -> Result<Self> {
        Self::from_handle(store.load(reference)?)
    }

    pub fn from_handle(handle: ObjectHandle) -> Result<Self> {
        let malformed = |reason: &str| CasError::Corruption {
            path: std::path::PathBuf::from("<tree object>"),
            reason: format!("{reason} in tree {}", handle.id()),
        };

        let data = handle.data();
        let mut cursor = 0_usize;
        let count = read_u64(data, &mut cursor).ok_or_else(|| malformed("missing entry count"))?;
        if count as usize != handle.num_refs() {
            return Err(malformed("entry count does not match ref count"));
        }

        let mut names: Vec<String> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len =
                read_u64(data, &mut cursor).ok_or_else(|| malformed("missing name length"))?;
            let end = cursor
                .checked_add(len as usize)
                .filter(|&end| end <= data.len())
                .ok_or_else(|| malformed("name length escapes the data"))?;
            let name = std::str::from_utf8(&data[cursor..end])
                .map_err(|_| malformed("entry name is not utf-8"))?;
            if let Some(previous) = names.last() {
                if previous.as_str() >= name {
                    return Err(malformed("entry names are not strictly sorted"));
                }
            }
            names.push(name.to_string());
            cursor = end;
        }
        if cursor != data.len() {
            return Err(malformed("trailing bytes after the last entry"));
        }

        Ok(Self { handle, names })
    }

    pub fn lookup(&self, name: &str) -> Option<ObjectRef> {
        let index = self.names.binary_search_by(|n| n.as_str().cmp(name)).ok()?;
        self.handle.ref_at(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ObjectRef)> + '_ {
        self.names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| Some((name.as_str(), self.handle.ref_at(i)?)))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn handle(&self) -> &ObjectHandle {
        &self.handle
    }
}

fn read_u64(data: &[u8], cursor: &mut usize) -> Option<u64> {
    let end = cursor.checked_add(8)?;
    let bytes = data.get(*cursor..end)?;
    *cursor = end;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}
