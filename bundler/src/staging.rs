//! Durable staging directory for generated modules.
//!
//! The host framework may run file transforms in several worker processes,
//! so an in-memory registry cannot see a whole build. Every generated
//! module is written to the staging directory immediately at transform
//! time; the bundle step rescans the directory instead of trusting any
//! process-local state.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BundleError;

/// Staging directory name under the project build output.
pub const STAGING_DIR: &str = ".sandbox-temp";
/// Entry module re-exporting every staged module.
pub const ENTRY_FILE: &str = "_sandbox_entry.ts";
/// Extension for staged modules; the entry file is excluded by not
/// carrying it.
const MODULE_EXT: &str = ".mjs";

/// Handle on one project's staging directory.
#[derive(Debug, Clone)]
pub struct Staging {
    dir: PathBuf,
}

impl Staging {
    /// Staging area under the given build output directory.
    #[must_use]
    pub fn new(out_dir: &Path) -> Self {
        Self {
            dir: out_dir.join(STAGING_DIR),
        }
    }

    /// The staging directory path.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic staged file name for a project-relative source path:
    /// separators become underscores and the module extension is appended
    /// (`app/api/x.ts` → `app_api_x.ts.mjs`).
    #[must_use]
    pub fn module_file_name(source_rel_path: &str) -> String {
        let mut name: String = source_rel_path
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        name.push_str(MODULE_EXT);
        name
    }

    /// Write one generated module into the staging area.
    ///
    /// # Errors
    ///
    /// Propagates filesystem failures.
    pub fn register(&self, source_rel_path: &str, content: &str) -> Result<PathBuf, BundleError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::module_file_name(source_rel_path));
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Read every staged module, sorted by file name for determinism.
    ///
    /// # Errors
    ///
    /// Propagates filesystem failures. A missing staging directory reads
    /// as empty.
    pub fn scan(&self) -> Result<Vec<(String, String)>, BundleError> {
        let mut modules = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(modules),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(MODULE_EXT) {
                continue;
            }
            let content = fs::read_to_string(entry.path())?;
            modules.push((name, content));
        }
        modules.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(modules)
    }
}
