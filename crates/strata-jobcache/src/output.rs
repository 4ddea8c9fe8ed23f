//! Output interception: the virtual filesystem sink a cached compile writes
//! through.
//!
//! Three implementations compose into the miss path: the capturing backend
//! folds kept files into CAS objects, the on-disk backend streams them to
//! their real paths with atomic writes, and the mirroring combinator tees a
//! write to both so a cache-miss run still produces its outputs live.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;

use strata_cas::{ObjectProxy, ObjectRef, ObjectStore};

use crate::error::Result;
use crate::util::atomic_write;

/// How an output file relates to the invocation.
///
/// The three symbolic kinds are recorded in result trees under their
/// placeholder names, so replay can substitute whatever concrete path the
/// *next* invocation asks for. Everything else keeps its literal path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    /// The main compiler output (object file, module, ...).
    Main,
    /// Serialized diagnostics.
    SerialDiags,
    /// The dependency file.
    Dependencies,
    /// Any auxiliary output addressed by its literal path.
    Other,
}

pub const KIND_NAME_MAIN: &str = "<output>";
pub const KIND_NAME_SERIAL_DIAGS: &str = "<serial-diags>";
pub const KIND_NAME_DEPENDENCIES: &str = "<dependencies>";

impl OutputKind {
    /// The placeholder recorded instead of a concrete path, when one exists.
    pub fn symbolic_name(self) -> Option<&'static str> {
        match self {
            Self::Main => Some(KIND_NAME_MAIN),
            Self::SerialDiags => Some(KIND_NAME_SERIAL_DIAGS),
            Self::Dependencies => Some(KIND_NAME_DEPENDENCIES),
            Self::Other => None,
        }
    }
}

/// One in-flight output file. Writes buffer until the producer decides the
/// file's fate: `keep` finalizes it, `discard` drops it without a trace.
pub trait OutputFile {
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
    fn keep(self: Box<Self>) -> Result<()>;
    fn discard(self: Box<Self>);
}

/// A sink for the output files a compile job emits.
pub trait OutputBackend {
    fn create_file(&self, path: &Path, kind: OutputKind)
        -> Result<Box<dyn OutputFile + '_>>;
}

/// Captures kept outputs as CAS objects.
///
/// Each kept file contributes two refs to the accumulating list: its name
/// object (symbolic kind name or literal path) and its bytes object.
/// `into_proxy` finalizes the interleaved `[name, bytes, ...]` list as one
/// object.
pub struct CapturingOutputBackend {
    store: Arc<dyn ObjectStore>,
    captured: Mutex<Vec<ObjectRef>>,
}

impl CapturingOutputBackend {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            captured: Mutex::new(Vec::new()),
        }
    }

    /// Record a named entry directly, bypassing the file interface. Used for
    /// results the controller produces itself (serialized diagnostics, the
    /// dependency object).
    pub fn capture_ref(&self, name: &str, bytes: ObjectRef) -> Result<()> {
        let name_ref = self.store.store(&[], name.as_bytes())?;
        let mut captured = lock_captured(&self.captured);
        captured.push(name_ref);
        captured.push(bytes);
        Ok(())
    }

    /// Finalize the captured entries as one object.
    pub fn into_proxy(self) -> Result<ObjectProxy> {
        let captured = self.captured.into_inner().unwrap_or_else(|err| {
            tracing::error!(
                target = "strata.jobcache",
                "captured output list poisoned; finalizing recovered state"
            );
            err.into_inner()
        });
        Ok(self.store.create_proxy(&captured, b"")?)
    }

    fn entry_name(path: &Path, kind: OutputKind) -> String {
        match kind.symbolic_name() {
            Some(symbolic) => symbolic.to_string(),
            None => path.to_string_lossy().into_owned(),
        }
    }
}

fn lock_captured(captured: &Mutex<Vec<ObjectRef>>) -> std::sync::MutexGuard<'_, Vec<ObjectRef>> {
    captured.lock().unwrap_or_else(|err| {
        tracing::error!(
            target = "strata.jobcache",
            "captured output list poisoned; continuing with recovered guard"
        );
        err.into_inner()
    })
}

struct CapturingFile<'a> {
    backend: &'a CapturingOutputBackend,
    name: String,
    buffer: Vec<u8>,
}

impl OutputFile for CapturingFile<'_> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn keep(self: Box<Self>) -> Result<()> {
        let bytes_ref = self.backend.store.store(&[], &self.buffer)?;
        self.backend.capture_ref(&self.name, bytes_ref)
    }

    fn discard(self: Box<Self>) {}
}

impl OutputBackend for CapturingOutputBackend {
    fn create_file(
        &self,
        path: &Path,
        kind: OutputKind,
    ) -> Result<Box<dyn OutputFile + '_>> {
        Ok(Box::new(CapturingFile {
            backend: self,
            name: Self::entry_name(path, kind),
            buffer: Vec::new(),
        }))
    }
}

/// Writes kept outputs to their real paths.
#[derive(Debug, Default)]
pub struct OnDiskOutputBackend;

impl OnDiskOutputBackend {
    pub fn new() -> Self {
        Self
    }
}

struct OnDiskFile {
    path: PathBuf,
    buffer: Vec<u8>,
}

impl OutputFile for OnDiskFile {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn keep(self: Box<Self>) -> Result<()> {
        atomic_write(&self.path, &self.buffer)
    }

    fn discard(self: Box<Self>) {}
}

impl OutputBackend for OnDiskOutputBackend {
    fn create_file(
        &self,
        path: &Path,
        _kind: OutputKind,
    ) -> Result<Box<dyn OutputFile + '_>> {
        Ok(Box::new(OnDiskFile {
            path: path.to_path_buf(),
            buffer: Vec::new(),
        }))
    }
}

/// Multiplexes every file over two backends.
pub struct MirroringOutputBackend<'a> {
    first: &'a dyn OutputBackend,
    second: &'a dyn OutputBackend,
}

impl<'a> MirroringOutputBackend<'a> {
    pub fn new(first: &'a dyn OutputBackend, second: &'a dyn OutputBackend) -> Self {
        Self { first, second }
    }
}

struct MirroredFile<'a> {
    first: Box<dyn OutputFile + 'a>,
    second: Box<dyn OutputFile + 'a>,
}

impl OutputFile for MirroredFile<'_> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.first.write(bytes)?;
        self.second.write(bytes)
    }

    fn keep(self: Box<Self>) -> Result<()> {
        self.first.keep()?;
        self.second.keep()
    }

    fn discard(self: Box<Self>) {
        self.first.discard();
        self.second.discard();
    }
}

impl OutputBackend for MirroringOutputBackend<'_> {
    fn create_file(
        &self,
        path: &Path,
        kind: OutputKind,
    ) -> Result<Box<dyn OutputFile + '_>> {
        Ok(Box::new(MirroredFile {
            first: self.first.create_file(path, kind)?,
            second: self.second.create_file(path, kind)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_cas::InMemoryObjectStore;

    fn store() -> Arc<dyn ObjectStore> {
        Arc::new(InMemoryObjectStore::new())
    }

    #[test]
    fn kept_files_become_interleaved_entries() -> Result<()> {
        let store = store();
        let backend = CapturingOutputBackend::new(Arc::clone(&store));

        let mut file = backend.create_file(Path::new("a.o"), OutputKind::Main)?;
        file.write(b"object ")?;
        file.write(b"code")?;
        file.keep()?;

        let mut aux = backend.create_file(Path::new("notes.txt"), OutputKind::Other)?;
        aux.write(b"aux")?;
        aux.keep()?;

        let proxy = backend.into_proxy()?;
        let handle = proxy.handle();
        assert_eq!(handle.num_refs(), 4);

        let name0 = store.load(handle.ref_at(0).expect("name 0"))?;
        assert_eq!(name0.data(), KIND_NAME_MAIN.as_bytes());
        let bytes0 = store.load(handle.ref_at(1).expect("bytes 0"))?;
        assert_eq!(bytes0.data(), b"object code");

        let name1 = store.load(handle.ref_at(2).expect("name 1"))?;
        assert_eq!(name1.data(), b"notes.txt");
        Ok(())
    }

    #[test]
    fn discarded_files_leave_no_entries() -> Result<()> {
        let store = store();
        let backend = CapturingOutputBackend::new(Arc::clone(&store));

        let mut file = backend.create_file(Path::new("a.o"), OutputKind::Main)?;
        file.write(b"aborted")?;
        file.discard();

        let proxy = backend.into_proxy()?;
        assert_eq!(proxy.handle().num_refs(), 0);
        Ok(())
    }

    #[test]
    fn mirroring_captures_and_writes_to_disk() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = store();
        let capture = CapturingOutputBackend::new(Arc::clone(&store));
        let disk = OnDiskOutputBackend::new();
        let mirror = MirroringOutputBackend::new(&capture, &disk);

        let out_path = tmp.path().join("out.o");
        let mut file = mirror.create_file(&out_path, OutputKind::Main)?;
        file.write(b"mirrored bytes")?;
        file.keep()?;
        drop(mirror);

        assert_eq!(std::fs::read(&out_path)?, b"mirrored bytes");
        let proxy = capture.into_proxy()?;
        assert_eq!(proxy.handle().num_refs(), 2);
        Ok(())
    }
}
