use std::path::PathBuf;

use crate::error::{CasError, Result};

/// Default cap on every on-disk table file.
///
/// Tables are created sparse at their cap and filled by the allocation
/// high-watermark, so the cap costs address space rather than disk.
pub const DEFAULT_MAX_TABLE_SIZE: u64 = 1 << 30;

/// Configuration for the on-disk store and action cache.
#[derive(Clone, Debug)]
pub struct CasConfig {
    /// Override the cas root directory.
    pub root_override: Option<PathBuf>,
    /// Hard size cap per table file; reaching it makes inserts fail with
    /// `TableFull`.
    pub max_table_size: u64,
}

impl CasConfig {
    pub fn from_env() -> Self {
        Self {
            root_override: std::env::var_os("STRATA_CAS_DIR").map(PathBuf::from),
            ..Self::default()
        }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root_override: Some(root.into()),
            ..Self::default()
        }
    }

    /// Resolve the directory holding the `v1.*` table files.
    pub fn resolve_root(&self) -> Result<PathBuf> {
        match &self.root_override {
            Some(root) => Ok(root.clone()),
            None => {
                let home = std::env::var_os("HOME")
                    .or_else(|| std::env::var_os("USERPROFILE"))
                    .map(PathBuf::from)
                    .ok_or(CasError::MissingHomeDir)?;
                Ok(home.join(".strata").join("cas"))
            }
        }
    }
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            root_override: None,
            max_table_size: DEFAULT_MAX_TABLE_SIZE,
        }
    }
}
