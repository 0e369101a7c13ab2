//! Persistent install-state store.
//!
//! Maps session key → the bundle digest last installed into that session's
//! VM, so a freshly started host process can decide whether to re-upload.
//! The store is pluggable: the filesystem implementation under the build
//! output is the development default, and production may substitute an
//! external key-value store. Writes are last-writer-wins; there is no
//! cross-process locking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SandboxError;

/// Directory name under the build output for the filesystem store.
pub const STATE_DIR: &str = ".sandbox-state";

/// Session-keyed record of the last installed bundle digest.
#[async_trait]
pub trait InstallStateStore: Send + Sync {
    /// The digest last installed for `key`, if any.
    async fn get_installed_hash(&self, key: &str) -> Result<Option<String>, SandboxError>;

    /// Record `hash` as installed for `key`.
    async fn set_installed_hash(&self, key: &str, hash: &str) -> Result<(), SandboxError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallRecord {
    bundle_hash: String,
    updated_at: String,
}

/// Filesystem store: one JSON file per session key under
/// `<out>/.sandbox-state/`.
#[derive(Debug, Clone)]
pub struct FsInstallStateStore {
    dir: PathBuf,
}

impl FsInstallStateStore {
    /// Store rooted under a build output directory.
    #[must_use]
    pub fn new(out_dir: &Path) -> Self {
        Self {
            dir: out_dir.join(STATE_DIR),
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        // Keys are opaque caller strings; flatten anything that is not
        // filename-safe.
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl InstallStateStore for FsInstallStateStore {
    async fn get_installed_hash(&self, key: &str) -> Result<Option<String>, SandboxError> {
        match tokio::fs::read_to_string(self.key_path(key)).await {
            Ok(content) => {
                let record: InstallRecord = serde_json::from_str(&content)?;
                Ok(Some(record.bundle_hash))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set_installed_hash(&self, key: &str, hash: &str) -> Result<(), SandboxError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let record = InstallRecord {
            bundle_hash: hash.to_string(),
            updated_at: chrono::Utc::now().to_rfc3339(),
        };
        tokio::fs::write(self.key_path(key), serde_json::to_string_pretty(&record)?).await?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral hosts.
#[derive(Debug, Default)]
pub struct MemoryInstallStateStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryInstallStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstallStateStore for MemoryInstallStateStore {
    async fn get_installed_hash(&self, key: &str) -> Result<Option<String>, SandboxError> {
        Ok(self
            .map
            .lock()
            .map_err(|_| SandboxError::Store("poisoned".into()))?
            .get(key)
            .cloned())
    }

    async fn set_installed_hash(&self, key: &str, hash: &str) -> Result<(), SandboxError> {
        self.map
            .lock()
            .map_err(|_| SandboxError::Store("poisoned".into()))?
            .insert(key.to_string(), hash.to_string());
        Ok(())
    }
}
