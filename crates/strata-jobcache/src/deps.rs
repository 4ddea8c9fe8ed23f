//! Dependency output: the collector that folds discovered dependencies into
//! one CAS object, and the replay codec that reinflates it into the textual
//! make-style file written to the user's dependency path.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strata_cas::{ObjectRef, ObjectStore};

use crate::error::{JobCacheError, Result};
use crate::util::{bincode_deserialize, bincode_serialize};

/// How the external dependency scanner should report its results.
///
/// Selection is environment-driven and only surfaced here; the scanner
/// itself lives outside this crate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DepScanMode {
    /// Plain textual dependencies.
    #[default]
    Full,
    /// Dependencies as a full CAS filesystem tree.
    FullTree,
    /// Dependencies as an include tree.
    FullIncludeTree,
}

impl DepScanMode {
    pub fn from_env() -> Self {
        if env_flag("CLANG_CACHE_USE_INCLUDE_TREE") {
            Self::FullIncludeTree
        } else if env_flag("CLANG_CACHE_USE_CASFS_DEPSCAN") {
            Self::FullTree
        } else {
            Self::Full
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var_os(name).is_some_and(|value| !value.is_empty())
}

const DEPS_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct CanonicalDeps {
    format: u32,
    target: String,
    prerequisites: Vec<String>,
}

/// Accumulates the dependency outputs of one compile job.
#[derive(Debug, Default)]
pub struct DependencyCollector {
    target: Option<String>,
    prerequisites: Vec<String>,
}

impl DependencyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the rule target explicitly (a `-MT`-style override).
    ///
    /// When unset, the recorded object carries no target and replay falls
    /// back to the invocation's current output path; a concrete path baked
    /// in here would go stale the moment a replayed invocation renames its
    /// output.
    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = Some(target.into());
    }

    /// Record one discovered prerequisite. Duplicates are dropped;
    /// first-seen order is preserved.
    pub fn add_dependency(&mut self, path: impl Into<PathBuf>) {
        let path = path.into().to_string_lossy().into_owned();
        if !self.prerequisites.contains(&path) {
            self.prerequisites.push(path);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_none() && self.prerequisites.is_empty()
    }

    /// Fold the collected dependencies into one CAS object. The object's
    /// structure is private to this codec; [`replay_dependencies`] is its
    /// only reader.
    pub fn into_object(self, store: &dyn ObjectStore) -> Result<ObjectRef> {
        let canonical = CanonicalDeps {
            format: DEPS_FORMAT_VERSION,
            target: self.target.unwrap_or_default(),
            prerequisites: self.prerequisites,
        };
        Ok(store.store(&[], &bincode_serialize(&canonical)?)?)
    }

    /// Render directly to text, for uncached runs that bypass the store.
    pub fn render_text(&self, fallback_target: &str) -> String {
        render(
            self.target.as_deref().unwrap_or(""),
            &self.prerequisites,
            fallback_target,
        )
    }
}

/// Reinflate a dependency object into the textual form written to the
/// user's dependency-file path. `fallback_target` (usually the invocation's
/// current output path) names the rule when the object recorded no explicit
/// target.
pub fn replay_dependencies(
    store: &dyn ObjectStore,
    reference: ObjectRef,
    fallback_target: &str,
) -> Result<String> {
    let handle = store.load(reference)?;
    let canonical: CanonicalDeps = bincode_deserialize(handle.data())?;
    if canonical.format != DEPS_FORMAT_VERSION {
        return Err(JobCacheError::MalformedDependencies {
            reason: "unsupported dependency format version",
        });
    }
    Ok(render(
        &canonical.target,
        &canonical.prerequisites,
        fallback_target,
    ))
}

fn render(target: &str, prerequisites: &[String], fallback_target: &str) -> String {
    let target = if target.is_empty() {
        fallback_target
    } else {
        target
    };
    let mut text = String::new();
    text.push_str(&escape(target));
    text.push(':');
    for prerequisite in prerequisites {
        text.push_str(" \\\n  ");
        text.push_str(&escape(prerequisite));
    }
    text.push('\n');
    text
}

/// Escape a path for a make rule: spaces and `#` are backslash-escaped,
/// `$` doubles.
fn escape(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            ' ' => escaped.push_str("\\ "),
            '#' => escaped.push_str("\\#"),
            '$' => escaped.push_str("$$"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_cas::InMemoryObjectStore;

    #[test]
    fn collector_round_trips_through_the_codec() -> Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());

        let mut collector = DependencyCollector::new();
        collector.set_target("out/main.o");
        collector.add_dependency("src/main.c");
        collector.add_dependency("include/util.h");
        collector.add_dependency("src/main.c");

        let reference = collector.into_object(&*store)?;
        let text = replay_dependencies(&*store, reference, "ignored.o")?;
        assert_eq!(text, "out/main.o: \\\n  src/main.c \\\n  include/util.h\n");
        Ok(())
    }

    #[test]
    fn unset_target_falls_back_to_the_current_output() -> Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());

        let mut collector = DependencyCollector::new();
        collector.add_dependency("src/lib.c");

        let reference = collector.into_object(&*store)?;
        assert_eq!(
            replay_dependencies(&*store, reference, "build/lib.o")?,
            "build/lib.o: \\\n  src/lib.c\n"
        );
        // The same object replays against a different output path.
        assert_eq!(
            replay_dependencies(&*store, reference, "other/lib.o")?,
            "other/lib.o: \\\n  src/lib.c\n"
        );
        Ok(())
    }

    #[test]
    fn paths_with_make_metacharacters_are_escaped() -> Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());

        let mut collector = DependencyCollector::new();
        collector.set_target("dir with space/a.o");
        collector.add_dependency("inc/$weird#name.h");

        let reference = collector.into_object(&*store)?;
        let text = replay_dependencies(&*store, reference, "")?;
        assert_eq!(
            text,
            "dir\\ with\\ space/a.o: \\\n  inc/$$weird\\#name.h\n"
        );
        Ok(())
    }

    #[test]
    fn empty_collector_renders_a_bare_rule() -> Result<()> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let collector = DependencyCollector::new();
        assert!(collector.is_empty());

        let reference = collector.into_object(&*store)?;
        assert_eq!(replay_dependencies(&*store, reference, "")?, ":\n");
        Ok(())
    }
}
