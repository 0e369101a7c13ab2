//! File-level loader hook.
//!
//! The host framework registers [`Loader::transform_file`] in its
//! transform pipeline, ahead of its own compilation. Each transformed file
//! has its generated module written to the staging area immediately, so
//! worker processes contribute to the same build; the framework then runs
//! the project bundler once per build.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use outpost_bundler::{BundleError, Staging};
use outpost_transform::{transform_source, TransformError, TransformOptions};

/// Loader failures.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Staging(#[from] BundleError),
}

/// The framework-facing transform hook.
#[derive(Debug, Clone)]
pub struct Loader {
    options: TransformOptions,
    staging: Staging,
}

impl Loader {
    /// A loader for one project: sources are resolved against
    /// `project_root`, artefacts land under `out_dir`.
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>, out_dir: &Path) -> Self {
        Self {
            options: TransformOptions {
                project_root: project_root.into(),
            },
            staging: Staging::new(out_dir),
        }
    }

    /// Transform one source file, staging its generated module if the
    /// directive was present. Returns the (possibly rewritten) source.
    ///
    /// # Errors
    ///
    /// Transform refusals and staging I/O failures. Parse failures are not
    /// errors: the source comes back unchanged.
    pub fn transform_file(&self, path: &Path, source: &str) -> Result<String, LoaderError> {
        let output = transform_source(path, source, &self.options)?;
        if let Some(generated) = &output.generated {
            let staged = self
                .staging
                .register(&generated.source_rel_path, &generated.content)?;
            debug!(
                source = %path.display(),
                staged = %staged.display(),
                "staged generated sandbox module"
            );
        }
        Ok(output.code)
    }

    /// The staging area this loader writes into.
    #[must_use]
    pub fn staging(&self) -> &Staging {
        &self.staging
    }
}
