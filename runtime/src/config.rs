//! Sandbox runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::provisioner::CreateOptions;

/// Configuration for a sandbox definition.
///
/// Hosts usually deserialize this from their own config layer and pass it
/// to the factory.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxConfig {
    /// Project build output directory: bundle artefacts are read from
    /// `static/sandbox/` and install state lives in `.sandbox-state/`
    /// under it.
    pub out_dir: PathBuf,
    /// Development mode re-reads the bundle on every call so hot reload
    /// propagates; production caches it.
    pub dev: bool,
    pub vcpus: u32,
    pub memory_mb: u32,
    /// Per-command timeout in milliseconds, when the provider supports
    /// one.
    pub command_timeout_ms: Option<u64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            dev: false,
            vcpus: 1,
            memory_mb: 512,
            command_timeout_ms: None,
        }
    }
}

impl SandboxConfig {
    /// Configuration rooted at a build output directory.
    #[must_use]
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            ..Self::default()
        }
    }

    /// Provisioning options derived from the resource fields.
    #[must_use]
    pub fn create_options(&self) -> CreateOptions {
        CreateOptions {
            vcpus: self.vcpus,
            memory_mb: self.memory_mb,
            command_timeout: self.command_timeout_ms.map(Duration::from_millis),
        }
    }
}
