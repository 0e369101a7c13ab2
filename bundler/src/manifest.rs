//! Bundle manifest, published beside the bundle artefact.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::BundleError;

/// Description of the currently published bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleManifest {
    /// 16-hex-character content digest over all generated modules in
    /// canonical order.
    pub hash: String,
    /// File name of the bundle artefact, `bundle-<hash>.js`.
    pub bundle_file: String,
    /// RFC 3339 timestamp of the publish.
    pub generated_at: String,
    /// Staged module file names that contributed, sorted.
    pub sandbox_files: Vec<String>,
}

impl BundleManifest {
    /// Load a manifest if one exists.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures other than absence, and malformed JSON.
    pub fn load(path: &Path) -> Result<Option<Self>, BundleError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Write the manifest as pretty JSON.
    ///
    /// # Errors
    ///
    /// Propagates filesystem failures.
    pub fn save(&self, path: &Path) -> Result<(), BundleError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
