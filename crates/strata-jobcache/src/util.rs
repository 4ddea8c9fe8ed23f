use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Hard upper bound for any bincode-encoded payload we will attempt to
/// deserialize from a cached object.
///
/// Corruption should degrade to an error, not an out-of-memory crash; this
/// cap keeps a corrupted length prefix from requesting an enormous
/// allocation.
pub(crate) const BINCODE_PAYLOAD_LIMIT_BYTES: usize = 16 * 1024 * 1024;

pub(crate) fn bincode_options() -> impl bincode::Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

pub(crate) fn bincode_serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode_options().serialize(value)?)
}

pub(crate) fn bincode_deserialize<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    Ok(bincode_options()
        .with_limit(BINCODE_PAYLOAD_LIMIT_BYTES as u64)
        .deserialize(bytes)?)
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `bytes` to `path` atomically: unique temp file in the destination
/// directory, then rename over the target.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Err(io::Error::other("path has no parent").into());
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    fs::create_dir_all(parent)?;

    let (tmp_path, mut file) = open_unique_tmp_file(path, parent)?;
    let write_result = (|| -> io::Result<()> {
        file.write_all(bytes)?;
        file.sync_all()
    })();
    if let Err(err) = write_result {
        drop(file);
        remove_tmp_best_effort(&tmp_path);
        return Err(err.into());
    }
    drop(file);

    match fs::rename(&tmp_path, path) {
        Ok(()) => {
            sync_dir_best_effort(parent);
            Ok(())
        }
        Err(err) => {
            remove_tmp_best_effort(&tmp_path);
            Err(err.into())
        }
    }
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

fn remove_tmp_best_effort(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            tracing::debug!(
                target = "strata.jobcache",
                path = %path.display(),
                error = %err,
                "failed to remove temporary output file"
            );
        }
    }
}

fn sync_dir_best_effort(dir: &Path) {
    #[cfg(unix)]
    {
        static SYNC_DIR_ERROR_LOGGED: OnceLock<()> = OnceLock::new();
        match fs::File::open(dir).and_then(|dir| dir.sync_all()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                if SYNC_DIR_ERROR_LOGGED.set(()).is_ok() {
                    tracing::debug!(
                        target = "strata.jobcache",
                        dir = %dir.display(),
                        error = %err,
                        "failed to sync output directory (best effort)"
                    );
                }
            }
        }
    }

    #[cfg(not(unix))]
    let _ = dir;
}
