//! Bundler errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from staging, digesting and bundling.
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("bundler I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest is not valid JSON: {0}")]
    Manifest(#[from] serde_json::Error),

    /// The external bundler binary could not be located.
    #[error("esbuild binary not found at {0}; set OUTPOST_ESBUILD or add it to PATH")]
    BundlerNotFound(PathBuf),

    /// The external bundler exited non-zero.
    #[error("bundler exited with code {code}: {stderr}")]
    BundlerFailed {
        /// Exit code from the process.
        code: i32,
        /// Standard error output.
        stderr: String,
    },
}
