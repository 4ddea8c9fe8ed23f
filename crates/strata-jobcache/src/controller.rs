//! The compile-job cache controller: key derivation, lookup, capture,
//! finalize, and replay.
//!
//! The controller owns the store and cache built from a frozen
//! configuration; nothing downstream of it can observe cas paths, so they
//! cannot leak into diagnostics or outputs. Lookup errors are consumed and
//! degrade to a miss. Finalize-side storage errors are fatal: a result
//! recorded as cached must actually be loadable by the next run.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use strata_cas::{
    ActionCache, ActionKey, CasConfig, InMemoryActionCache, InMemoryObjectStore,
    ObjectHandle, ObjectRef, ObjectStore, OnDiskActionCache, OnDiskObjectStore, TreeBuilder,
    TreeReader,
};

use crate::deps::{replay_dependencies, DependencyCollector};
use crate::diags;
use crate::error::{JobCacheError, Result};
use crate::invocation::{derive_action_key, CompileInvocation};
use crate::output::{
    CapturingOutputBackend, MirroringOutputBackend, OnDiskOutputBackend, OutputBackend,
    KIND_NAME_DEPENDENCIES, KIND_NAME_MAIN, KIND_NAME_SERIAL_DIAGS,
};
use crate::util::atomic_write;

/// Configuration for a compile-job cache instance.
///
/// Consumed by [`CompileJobCache::with_config`]; the controller keeps only
/// the opened store and cache, never the paths.
#[derive(Clone, Debug, Default)]
pub struct JobCacheConfig {
    pub cas: CasConfig,
}

impl JobCacheConfig {
    pub fn from_env() -> Self {
        Self {
            cas: CasConfig::from_env(),
        }
    }
}

/// Remarks surfaced to the user, mirroring compiler `-R` remark streams.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Remark {
    CacheHit { key: ActionKey },
    CacheMiss { key: ActionKey },
}

/// Did the compiler run, and was its result cached?
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Outputs replayed from a prior run; the frontend never ran.
    Hit,
    /// The frontend ran. `cached` is false when the compile failed (failed
    /// compiles are never cached).
    Miss { cached: bool },
    /// Caching was not requested for this job.
    Uncached,
}

#[derive(Clone, Debug)]
pub struct JobSummary {
    pub key: Option<ActionKey>,
    pub outcome: CacheOutcome,
}

/// Result of one frontend run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompileOutcome {
    Success,
    Failure,
}

/// Everything the compiler frontend gets to touch while running under the
/// cache: an output sink, a diagnostics stream, the dependency collector,
/// and its own (frozen) invocation. Deliberately nothing else.
pub struct CompileContext<'a> {
    outputs: &'a dyn OutputBackend,
    stderr: &'a mut dyn io::Write,
    deps: &'a mut DependencyCollector,
    invocation: &'a CompileInvocation,
}

impl CompileContext<'_> {
    pub fn outputs(&self) -> &dyn OutputBackend {
        self.outputs
    }

    pub fn stderr(&mut self) -> &mut dyn io::Write {
        &mut *self.stderr
    }

    pub fn dependencies(&mut self) -> &mut DependencyCollector {
        self.deps
    }

    pub fn invocation(&self) -> &CompileInvocation {
        self.invocation
    }
}

/// The seam to the external compiler frontend.
pub trait Compiler {
    /// Run the frontend for `ctx.invocation()`, writing outputs through
    /// `ctx.outputs()`. An `Err` is an infrastructure failure; a normal
    /// failed compile is `Ok(CompileOutcome::Failure)`. Neither is cached.
    fn run(&mut self, ctx: &mut CompileContext<'_>) -> Result<CompileOutcome>;
}

type RemarkHandler = Box<dyn Fn(&Remark) + Send + Sync>;

pub struct CompileJobCache {
    store: Arc<dyn ObjectStore>,
    cache: Arc<dyn ActionCache>,
    remark_handler: Option<RemarkHandler>,
    stderr_sink: Mutex<Box<dyn io::Write + Send>>,
}

impl CompileJobCache {
    pub fn new(store: Arc<dyn ObjectStore>, cache: Arc<dyn ActionCache>) -> Self {
        Self {
            store,
            cache,
            remark_handler: None,
            stderr_sink: Mutex::new(Box::new(io::stderr())),
        }
    }

    /// Fully in-memory instance, mostly for embedders and tests.
    pub fn in_memory() -> Self {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let cache = Arc::new(InMemoryActionCache::new(Arc::clone(&store)));
        Self::new(store, cache)
    }

    /// Build the on-disk store and action cache from `config`, consuming it.
    pub fn with_config(config: JobCacheConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = Arc::new(OnDiskObjectStore::open(&config.cas)?);
        let cache = Arc::new(OnDiskActionCache::open(Arc::clone(&store), &config.cas)?);
        Ok(Self::new(store, cache))
    }

    pub fn with_remark_handler(mut self, handler: RemarkHandler) -> Self {
        self.remark_handler = Some(handler);
        self
    }

    /// Redirect replayed/captured stderr; defaults to the process stderr.
    pub fn with_stderr_sink(mut self, sink: Box<dyn io::Write + Send>) -> Self {
        self.stderr_sink = Mutex::new(sink);
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Drive one compile job through the cache.
    pub fn run_job(
        &self,
        invocation: &CompileInvocation,
        compiler: &mut dyn Compiler,
    ) -> Result<JobSummary> {
        if !invocation.cache_compile_job {
            return self.run_uncached(invocation, compiler);
        }

        let key = derive_action_key(invocation)?;
        match self.cache.get(&key) {
            Ok(Some(root)) => {
                self.remark(Remark::CacheHit { key });
                self.replay(&key, root, invocation, true)?;
                return Ok(JobSummary {
                    key: Some(key),
                    outcome: CacheOutcome::Hit,
                });
            }
            Ok(None) => {}
            Err(err) => {
                // A broken cache should slow the build down, not break it.
                tracing::warn!(
                    target = "strata.jobcache",
                    %key,
                    error = %err,
                    "action cache lookup failed; treating as a miss"
                );
            }
        }
        self.remark(Remark::CacheMiss { key });

        // The frontend sees an invocation with timestamp embedding forced
        // off; a wall-clock in the output would defeat the whole key scheme.
        let mut frozen = invocation.clone();
        frozen.embed_timestamps = false;

        let capture = CapturingOutputBackend::new(Arc::clone(&self.store));
        let mut deps = DependencyCollector::new();
        let mut stderr_buf = Vec::new();

        let outcome = {
            let disk = OnDiskOutputBackend::new();
            let mirror = MirroringOutputBackend::new(&capture, &disk);
            let mut sink = self.lock_stderr();
            let mut tee = TeeWriter {
                buffer: &mut stderr_buf,
                live: &mut **sink,
            };
            let mut ctx = CompileContext {
                outputs: &mirror,
                stderr: &mut tee,
                deps: &mut deps,
                invocation: &frozen,
            };
            compiler.run(&mut ctx)?
        };

        if outcome == CompileOutcome::Failure {
            tracing::debug!(
                target = "strata.jobcache",
                %key,
                "compile failed; result not cached"
            );
            return Ok(JobSummary {
                key: Some(key),
                outcome: CacheOutcome::Miss { cached: false },
            });
        }

        // Serialized diagnostics are produced unconditionally so the key
        // stays independent of whether the user asked for them.
        let diag_ref = self.store.store(&[], &diags::encode(&stderr_buf))?;
        capture.capture_ref(KIND_NAME_SERIAL_DIAGS, diag_ref)?;

        let deps_ref = deps.into_object(&*self.store)?;
        capture.capture_ref(KIND_NAME_DEPENDENCIES, deps_ref)?;

        let outputs = capture.into_proxy()?;
        let stderr_ref = self.store.store(&[], &stderr_buf)?;
        let mut builder = TreeBuilder::new();
        builder.push("outputs", outputs.reference());
        builder.push("stderr", stderr_ref);
        let root = builder.build(&*self.store)?;

        self.cache.put(&key, root.reference())?;
        // Replaying from the just-stored tree leaves the on-disk state
        // byte-identical to what a later hit will produce.
        self.replay(&key, root.reference(), invocation, false)?;

        Ok(JobSummary {
            key: Some(key),
            outcome: CacheOutcome::Miss { cached: true },
        })
    }

    fn run_uncached(
        &self,
        invocation: &CompileInvocation,
        compiler: &mut dyn Compiler,
    ) -> Result<JobSummary> {
        let mut deps = DependencyCollector::new();
        let mut stderr_buf = Vec::new();

        let outcome = {
            let disk = OnDiskOutputBackend::new();
            let mut sink = self.lock_stderr();
            let mut tee = TeeWriter {
                buffer: &mut stderr_buf,
                live: &mut **sink,
            };
            let mut ctx = CompileContext {
                outputs: &disk,
                stderr: &mut tee,
                deps: &mut deps,
                invocation,
            };
            compiler.run(&mut ctx)?
        };

        if outcome == CompileOutcome::Success {
            if let Some(path) = requested_path(&invocation.dependencies_file) {
                let fallback = output_path_text(invocation);
                atomic_write(&path, deps.render_text(&fallback).as_bytes())?;
            }
            if let Some(path) = requested_path(&invocation.serial_diags_file) {
                atomic_write(&path, &stderr_buf)?;
            }
        }

        Ok(JobSummary {
            key: None,
            outcome: CacheOutcome::Uncached,
        })
    }

    /// Write a cached result tree out for `invocation`. On a hit the stored
    /// stderr is printed; after a fresh compile it already went to the live
    /// stream.
    fn replay(
        &self,
        key: &ActionKey,
        root: ObjectRef,
        invocation: &CompileInvocation,
        print_stderr: bool,
    ) -> Result<()> {
        let malformed = |entry: &'static str| JobCacheError::MalformedResultTree {
            key: key.to_string(),
            entry,
        };

        let tree = TreeReader::open(&*self.store, root)?;
        let stderr_ref = tree.lookup("stderr").ok_or_else(|| malformed("stderr"))?;
        if print_stderr {
            let stderr = self.store.load(stderr_ref)?;
            if !stderr.data().is_empty() {
                let mut sink = self.lock_stderr();
                sink.write_all(stderr.data())?;
                sink.flush()?;
            }
        }

        let outputs_ref = tree.lookup("outputs").ok_or_else(|| malformed("outputs"))?;
        let outputs = self.store.load(outputs_ref)?;
        if outputs.num_refs() % 2 != 0 {
            return Err(malformed("outputs"));
        }

        for pair in 0..outputs.num_refs() / 2 {
            let name_ref = outputs.ref_at(2 * pair).ok_or_else(|| malformed("outputs"))?;
            let bytes_ref = outputs
                .ref_at(2 * pair + 1)
                .ok_or_else(|| malformed("outputs"))?;
            let name_handle = self.store.load(name_ref)?;
            let name = entry_name(&name_handle).ok_or_else(|| malformed("outputs"))?;

            let resolved = match name {
                KIND_NAME_MAIN => invocation.output_file.clone(),
                KIND_NAME_SERIAL_DIAGS => invocation.serial_diags_file.clone(),
                KIND_NAME_DEPENDENCIES => invocation.dependencies_file.clone(),
                literal => Some(PathBuf::from(literal)),
            };
            // An empty resolved path means this output wasn't requested by
            // the current invocation.
            let Some(path) = resolved.filter(|p| !p.as_os_str().is_empty()) else {
                continue;
            };

            if name == KIND_NAME_DEPENDENCIES {
                let fallback = output_path_text(invocation);
                let text = replay_dependencies(&*self.store, bytes_ref, &fallback)?;
                atomic_write(&path, text.as_bytes())?;
            } else if name == KIND_NAME_SERIAL_DIAGS {
                // The stored entry is the container form; the user's file
                // gets the plain diagnostic bytes.
                let bytes = self.store.load(bytes_ref)?;
                atomic_write(&path, diags::decode(bytes.data())?)?;
            } else {
                let bytes = self.store.load(bytes_ref)?;
                atomic_write(&path, bytes.data())?;
            }
        }
        Ok(())
    }

    fn remark(&self, remark: Remark) {
        match &remark {
            Remark::CacheHit { key } => {
                tracing::debug!(target = "strata.jobcache", %key, "compile job cache hit");
            }
            Remark::CacheMiss { key } => {
                tracing::debug!(target = "strata.jobcache", %key, "compile job cache miss");
            }
        }
        if let Some(handler) = &self.remark_handler {
            handler(&remark);
        }
    }

    fn lock_stderr(&self) -> MutexGuard<'_, Box<dyn io::Write + Send>> {
        self.stderr_sink.lock().unwrap_or_else(|err| {
            tracing::error!(
                target = "strata.jobcache",
                "stderr sink poisoned; continuing with recovered guard"
            );
            err.into_inner()
        })
    }
}

fn requested_path(path: &Option<PathBuf>) -> Option<PathBuf> {
    path.clone().filter(|p| !p.as_os_str().is_empty())
}

fn output_path_text(invocation: &CompileInvocation) -> String {
    invocation
        .output_file
        .as_deref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn entry_name(handle: &ObjectHandle) -> Option<&str> {
    std::str::from_utf8(handle.data()).ok()
}

/// Appends to an in-memory capture while passing through to the live stream.
struct TeeWriter<'a> {
    buffer: &'a mut Vec<u8>,
    live: &'a mut dyn io::Write,
}

impl io::Write for TeeWriter<'_> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(bytes);
        self.live.write_all(bytes)?;
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.live.flush()
    }
}
