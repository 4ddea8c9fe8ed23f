use std::io::{self, Write as _};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use strata_cas::CasConfig;
use strata_jobcache::{
    CacheOutcome, CompileContext, CompileInvocation, CompileJobCache, CompileOutcome, Compiler,
    JobCacheConfig, OutputBackend as _, OutputFile as _, OutputKind, Remark, Result,
};

/// A stand-in frontend: derives its "object code" from the source bytes,
/// emits one warning, and reports the input as a dependency.
#[derive(Default)]
struct FakeCompiler {
    runs: usize,
    fail: bool,
}

impl Compiler for FakeCompiler {
    fn run(&mut self, ctx: &mut CompileContext<'_>) -> Result<CompileOutcome> {
        self.runs += 1;
        if self.fail {
            writeln!(ctx.stderr(), "error: synthetic failure")?;
            return Ok(CompileOutcome::Failure);
        }

        let source = std::fs::read(&ctx.invocation().inputs[0])?;
        if let Some(out) = ctx.invocation().output_file.clone() {
            let mut file = ctx.outputs().create_file(&out, OutputKind::Main)?;
            file.write(b"OBJ:")?;
            file.write(&source)?;
            file.keep()?;
        }

        writeln!(ctx.stderr(), "warning: fake diagnostic")?;
        let input = ctx.invocation().inputs[0].clone();
        ctx.dependencies().add_dependency(input);
        Ok(CompileOutcome::Success)
    }
}

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    fn contents(&self) -> Vec<u8> {
        self.0.lock().expect("sink lock").clone()
    }
}

impl io::Write for SharedSink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("sink lock").extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Harness {
    controller: CompileJobCache,
    remarks: Arc<Mutex<Vec<Remark>>>,
    sink: SharedSink,
}

fn harness(controller: CompileJobCache) -> Harness {
    let remarks: Arc<Mutex<Vec<Remark>>> = Arc::default();
    let sink = SharedSink::default();
    let handler_remarks = Arc::clone(&remarks);
    let controller = controller
        .with_remark_handler(Box::new(move |remark| {
            handler_remarks.lock().expect("remark lock").push(remark.clone());
        }))
        .with_stderr_sink(Box::new(sink.clone()));
    Harness {
        controller,
        remarks,
        sink,
    }
}

fn invocation(dir: &std::path::Path) -> Result<CompileInvocation> {
    let input = dir.join("main.c");
    if !input.exists() {
        std::fs::write(&input, b"int main(void) { return 0; }\n")?;
    }
    Ok(
        CompileInvocation::new(vec!["-O2".to_string()], vec![input])
            .with_output_file(dir.join("main.o"))
            .with_serial_diags_file(dir.join("main.dia"))
            .with_dependencies_file(dir.join("main.d")),
    )
}

fn read_outputs(invocation: &CompileInvocation) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let read = |path: &Option<PathBuf>| -> Result<Vec<u8>> {
        Ok(std::fs::read(path.as_deref().expect("path set"))?)
    };
    Ok((
        read(&invocation.output_file)?,
        read(&invocation.serial_diags_file)?,
        read(&invocation.dependencies_file)?,
    ))
}

#[test]
fn second_identical_run_hits_without_running_the_frontend() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let h = harness(CompileJobCache::in_memory());
    let inv = invocation(tmp.path())?;
    let mut compiler = FakeCompiler::default();

    let first = h.controller.run_job(&inv, &mut compiler)?;
    assert_eq!(first.outcome, CacheOutcome::Miss { cached: true });
    assert_eq!(compiler.runs, 1);
    let first_outputs = read_outputs(&inv)?;
    assert_eq!(first_outputs.0, b"OBJ:int main(void) { return 0; }\n");
    // The diagnostics file carries the plain diagnostic bytes, not an
    // internal container format.
    assert_eq!(first_outputs.1, b"warning: fake diagnostic\n");
    assert!(String::from_utf8_lossy(&first_outputs.2).contains("main.c"));

    let second = h.controller.run_job(&inv, &mut compiler)?;
    assert_eq!(second.outcome, CacheOutcome::Hit);
    assert_eq!(second.key, first.key);
    // The frontend did not run again.
    assert_eq!(compiler.runs, 1);
    assert_eq!(read_outputs(&inv)?, first_outputs);

    let remarks = h.remarks.lock().expect("remark lock");
    assert!(matches!(remarks[0], Remark::CacheMiss { .. }));
    assert!(matches!(remarks[1], Remark::CacheHit { .. }));

    // The warning reached stderr on the live run and again on replay.
    let stderr = String::from_utf8_lossy(&h.sink.contents()).into_owned();
    assert_eq!(stderr.matches("warning: fake diagnostic").count(), 2);
    Ok(())
}

#[test]
fn mutating_a_semantic_input_misses() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let h = harness(CompileJobCache::in_memory());
    let inv = invocation(tmp.path())?;
    let mut compiler = FakeCompiler::default();

    let first = h.controller.run_job(&inv, &mut compiler)?;
    std::fs::write(&inv.inputs[0], b"int main(void) { return 1; }\n")?;
    let second = h.controller.run_job(&inv, &mut compiler)?;

    assert_ne!(first.key, second.key);
    assert_eq!(second.outcome, CacheOutcome::Miss { cached: true });
    assert_eq!(compiler.runs, 2);
    Ok(())
}

#[test]
fn mutating_only_output_paths_still_hits() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let h = harness(CompileJobCache::in_memory());
    let inv = invocation(tmp.path())?;
    let mut compiler = FakeCompiler::default();

    h.controller.run_job(&inv, &mut compiler)?;

    let moved = inv
        .clone()
        .with_output_file(tmp.path().join("elsewhere.o"))
        .with_serial_diags_file(tmp.path().join("elsewhere.dia"))
        .with_dependencies_file(tmp.path().join("elsewhere.d"));
    let second = h.controller.run_job(&moved, &mut compiler)?;

    assert_eq!(second.outcome, CacheOutcome::Hit);
    assert_eq!(compiler.runs, 1);
    assert_eq!(
        std::fs::read(tmp.path().join("elsewhere.o"))?,
        std::fs::read(tmp.path().join("main.o"))?
    );
    // The replayed dependency file names the new output as its target.
    let deps = String::from_utf8(std::fs::read(tmp.path().join("elsewhere.d"))?)
        .expect("deps are utf-8");
    assert!(deps.contains("elsewhere.o:"), "unexpected deps: {deps}");
    Ok(())
}

#[test]
fn outputs_not_requested_are_skipped_on_replay() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let h = harness(CompileJobCache::in_memory());
    let inv = invocation(tmp.path())?;
    let mut compiler = FakeCompiler::default();

    h.controller.run_job(&inv, &mut compiler)?;

    let mut trimmed = inv.clone();
    trimmed.output_file = Some(tmp.path().join("only.o"));
    trimmed.serial_diags_file = None;
    trimmed.dependencies_file = None;
    let second = h.controller.run_job(&trimmed, &mut compiler)?;

    assert_eq!(second.outcome, CacheOutcome::Hit);
    assert!(tmp.path().join("only.o").exists());
    assert!(!tmp.path().join("only.dia").exists());
    Ok(())
}

#[test]
fn failed_compiles_are_not_cached() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let h = harness(CompileJobCache::in_memory());
    let inv = invocation(tmp.path())?;

    let mut failing = FakeCompiler {
        fail: true,
        ..FakeCompiler::default()
    };
    let first = h.controller.run_job(&inv, &mut failing)?;
    assert_eq!(first.outcome, CacheOutcome::Miss { cached: false });

    // A later successful compile with the same key is a miss, not a
    // poisoned hit on the failure.
    let mut working = FakeCompiler::default();
    let second = h.controller.run_job(&inv, &mut working)?;
    assert_eq!(second.outcome, CacheOutcome::Miss { cached: true });
    assert_eq!(working.runs, 1);

    let third = h.controller.run_job(&inv, &mut working)?;
    assert_eq!(third.outcome, CacheOutcome::Hit);
    assert_eq!(working.runs, 1);
    Ok(())
}

#[test]
fn on_disk_cache_hits_across_controller_instances() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let cas_root = tmp.path().join("cas");
    let config = || JobCacheConfig {
        cas: CasConfig {
            max_table_size: 16 * 1024 * 1024,
            ..CasConfig::with_root(&cas_root)
        },
    };

    let inv = invocation(tmp.path())?;
    let mut compiler = FakeCompiler::default();

    let first = harness(CompileJobCache::with_config(config())?);
    let summary = first.controller.run_job(&inv, &mut compiler)?;
    assert_eq!(summary.outcome, CacheOutcome::Miss { cached: true });
    let produced = read_outputs(&inv)?;

    // A fresh controller over the same cas root, as a second process would
    // build it.
    let second = harness(CompileJobCache::with_config(config())?);
    let summary = second.controller.run_job(&inv, &mut compiler)?;
    assert_eq!(summary.outcome, CacheOutcome::Hit);
    assert_eq!(compiler.runs, 1);
    assert_eq!(read_outputs(&inv)?, produced);
    Ok(())
}

#[test]
fn uncached_jobs_bypass_the_cache_entirely() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let h = harness(CompileJobCache::in_memory());
    let mut inv = invocation(tmp.path())?;
    inv.cache_compile_job = false;
    let mut compiler = FakeCompiler::default();

    let first = h.controller.run_job(&inv, &mut compiler)?;
    assert_eq!(first.outcome, CacheOutcome::Uncached);
    assert!(first.key.is_none());
    assert_eq!(
        std::fs::read(tmp.path().join("main.dia"))?,
        b"warning: fake diagnostic\n"
    );

    let second = h.controller.run_job(&inv, &mut compiler)?;
    assert_eq!(second.outcome, CacheOutcome::Uncached);
    assert_eq!(compiler.runs, 2);
    assert!(h.remarks.lock().expect("remark lock").is_empty());
    Ok(())
}
