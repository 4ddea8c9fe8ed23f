//! The compile invocation model and the canonicalization that turns one
//! into an action key.
//!
//! The key must identify what a compile *means*, not where it happens to put
//! its results: every path-valued field that only names a location is
//! stripped before hashing, and inputs enter the key by content digest so a
//! rename without an edit still hits.

use std::path::{Path, PathBuf};

use serde::Serialize;
use strata_cas::{digest_bytes, ActionKey};

use crate::error::Result;
use crate::util::bincode_serialize;

/// Bumped whenever the canonical encoding changes; keeps keys produced by
/// incompatible versions from colliding.
const CANONICAL_FORMAT_VERSION: u32 = 1;

/// One canonicalized compile job as handed over by the outer entry point.
///
/// `frontend_args` is the already-parsed semantic argument list. The output
/// paths are carried separately precisely so the key derivation can ignore
/// them.
#[derive(Clone, Debug)]
pub struct CompileInvocation {
    /// Whether this job asked to be cached at all.
    pub cache_compile_job: bool,
    /// Semantic frontend arguments (no output/diagnostic/dependency paths).
    pub frontend_args: Vec<String>,
    /// Source inputs, in command-line order.
    pub inputs: Vec<PathBuf>,
    /// Where the main output goes. `None` or empty means not requested.
    pub output_file: Option<PathBuf>,
    /// Where serialized diagnostics go, when requested.
    pub serial_diags_file: Option<PathBuf>,
    /// Where the dependency file goes, when requested.
    pub dependencies_file: Option<PathBuf>,
    /// Whether the frontend may embed wall-clock timestamps in outputs.
    /// Forced off for cached runs; a timestamp would make identical compiles
    /// produce distinct bytes.
    pub embed_timestamps: bool,
}

impl CompileInvocation {
    pub fn new(frontend_args: Vec<String>, inputs: Vec<PathBuf>) -> Self {
        Self {
            cache_compile_job: true,
            frontend_args,
            inputs,
            output_file: None,
            serial_diags_file: None,
            dependencies_file: None,
            embed_timestamps: false,
        }
    }

    pub fn with_output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    pub fn with_serial_diags_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.serial_diags_file = Some(path.into());
        self
    }

    pub fn with_dependencies_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.dependencies_file = Some(path.into());
        self
    }
}

/// The location-free form of an invocation that actually gets hashed.
#[derive(Serialize)]
struct CanonicalInvocation<'a> {
    format: u32,
    frontend_args: &'a [String],
    /// Content digests of the inputs, in invocation order. Input *paths* are
    /// deliberately absent.
    input_digests: Vec<[u8; 32]>,
}

/// Canonicalize and hash an invocation into its action key.
///
/// Reads every input file; an unreadable input is an error rather than a
/// silently different key.
pub fn derive_action_key(invocation: &CompileInvocation) -> Result<ActionKey> {
    let input_digests = invocation
        .inputs
        .iter()
        .map(|path| Ok(*digest_file(path)?.as_bytes()))
        .collect::<Result<Vec<_>>>()?;

    let canonical = CanonicalInvocation {
        format: CANONICAL_FORMAT_VERSION,
        frontend_args: &invocation.frontend_args,
        input_digests,
    };
    let bytes = bincode_serialize(&canonical)?;
    Ok(ActionKey::from_digest(digest_bytes(&bytes)))
}

fn digest_file(path: &Path) -> Result<strata_cas::Digest> {
    let bytes = std::fs::read(path)?;
    Ok(digest_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(tmp: &Path, args: &[&str]) -> Result<CompileInvocation> {
        let input = tmp.join("main.c");
        if !input.exists() {
            std::fs::write(&input, b"int main(void) { return 0; }\n")?;
        }
        Ok(
            CompileInvocation::new(args.iter().map(|s| s.to_string()).collect(), vec![input])
                .with_output_file(tmp.join("main.o")),
        )
    }

    #[test]
    fn key_is_stable_across_calls() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let inv = invocation(tmp.path(), &["-O2"])?;
        assert_eq!(derive_action_key(&inv)?, derive_action_key(&inv)?);
        Ok(())
    }

    #[test]
    fn output_paths_do_not_affect_the_key() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let a = invocation(tmp.path(), &["-O2"])?;
        let b = a
            .clone()
            .with_output_file(tmp.path().join("elsewhere.o"))
            .with_serial_diags_file(tmp.path().join("diags.bin"))
            .with_dependencies_file(tmp.path().join("main.d"));
        assert_eq!(derive_action_key(&a)?, derive_action_key(&b)?);
        Ok(())
    }

    #[test]
    fn semantic_args_and_input_content_change_the_key() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let base = invocation(tmp.path(), &["-O2"])?;
        let base_key = derive_action_key(&base)?;

        let other_args = invocation(tmp.path(), &["-O0"])?;
        assert_ne!(base_key, derive_action_key(&other_args)?);

        std::fs::write(&base.inputs[0], b"int main(void) { return 1; }\n")?;
        assert_ne!(base_key, derive_action_key(&base)?);
        Ok(())
    }

    #[test]
    fn input_rename_preserves_the_key() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let inv = invocation(tmp.path(), &["-O2"])?;
        let key = derive_action_key(&inv)?;

        let renamed = tmp.path().join("moved.c");
        std::fs::copy(&inv.inputs[0], &renamed)?;
        let mut moved = inv.clone();
        moved.inputs = vec![renamed];
        assert_eq!(key, derive_action_key(&moved)?);
        Ok(())
    }
}
