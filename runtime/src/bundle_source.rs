//! Access to the published bundle artefact.
//!
//! Reads `static/sandbox/manifest.json` and the bundle it names from the
//! build output. Production caches the artefact for the process lifetime;
//! development re-reads on every call so hot reload propagates. The read is
//! synchronous: the bundle is small and infrequently consulted.

use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use outpost_bundler::{BundleManifest, BUNDLE_DIR, MANIFEST_FILE};

use crate::error::SandboxError;

/// The bundle as currently published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleArtifact {
    /// 16-hex content digest from the manifest.
    pub hash: String,
    pub content: String,
}

/// Reader over the published bundle with the dev/production cache policy.
#[derive(Debug)]
pub struct BundleSource {
    out_dir: PathBuf,
    dev: bool,
    cache: RwLock<Option<BundleArtifact>>,
}

impl BundleSource {
    #[must_use]
    pub fn new(out_dir: PathBuf, dev: bool) -> Self {
        Self {
            out_dir,
            dev,
            cache: RwLock::new(None),
        }
    }

    /// Load the current bundle.
    ///
    /// # Errors
    ///
    /// [`SandboxError::MissingBundle`] when no manifest or bundle file is
    /// published, which usually means the build ran without the loader
    /// hook.
    pub fn load(&self) -> Result<BundleArtifact, SandboxError> {
        if !self.dev {
            if let Some(cached) = self
                .cache
                .read()
                .ok()
                .and_then(|guard| guard.clone())
            {
                return Ok(cached);
            }
        }

        let dir = self.out_dir.join(BUNDLE_DIR);
        let manifest = BundleManifest::load(&dir.join(MANIFEST_FILE))
            .map_err(|err| SandboxError::Store(err.to_string()))?
            .ok_or_else(|| SandboxError::MissingBundle {
                out_dir: self.out_dir.clone(),
            })?;
        let content = match fs::read_to_string(dir.join(&manifest.bundle_file)) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SandboxError::MissingBundle {
                    out_dir: self.out_dir.clone(),
                })
            }
            Err(err) => return Err(err.into()),
        };

        let artifact = BundleArtifact {
            hash: manifest.hash,
            content,
        };
        if !self.dev {
            if let Ok(mut guard) = self.cache.write() {
                *guard = Some(artifact.clone());
            }
        }
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn publish(tmp: &TempDir, hash: &str, content: &str) {
        let dir = tmp.path().join(BUNDLE_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let bundle_file = format!("bundle-{hash}.js");
        std::fs::write(dir.join(&bundle_file), content).unwrap();
        let manifest = BundleManifest {
            hash: hash.to_string(),
            bundle_file,
            generated_at: "2026-01-01T00:00:00+00:00".into(),
            sandbox_files: vec![],
        };
        manifest.save(&dir.join(MANIFEST_FILE)).unwrap();
    }

    #[test]
    fn test_missing_bundle_names_the_hook() {
        let tmp = TempDir::new().unwrap();
        let source = BundleSource::new(tmp.path().to_path_buf(), false);
        let err = source.load().unwrap_err();
        assert!(err.to_string().contains("loader hook"));
    }

    #[test]
    fn test_load_reads_manifest_and_bundle() {
        let tmp = TempDir::new().unwrap();
        publish(&tmp, "aaaaaaaaaaaaaaaa", "export const x = 1;\n");
        let source = BundleSource::new(tmp.path().to_path_buf(), false);
        let artifact = source.load().unwrap();
        assert_eq!(artifact.hash, "aaaaaaaaaaaaaaaa");
        assert!(artifact.content.contains("export const x"));
    }

    #[test]
    fn test_production_caches_first_read() {
        let tmp = TempDir::new().unwrap();
        publish(&tmp, "aaaaaaaaaaaaaaaa", "one");
        let source = BundleSource::new(tmp.path().to_path_buf(), false);
        assert_eq!(source.load().unwrap().content, "one");

        publish(&tmp, "bbbbbbbbbbbbbbbb", "two");
        // Still the cached artefact in production mode.
        assert_eq!(source.load().unwrap().content, "one");
    }

    #[test]
    fn test_dev_rereads_every_call() {
        let tmp = TempDir::new().unwrap();
        publish(&tmp, "aaaaaaaaaaaaaaaa", "one");
        let source = BundleSource::new(tmp.path().to_path_buf(), true);
        assert_eq!(source.load().unwrap().content, "one");

        publish(&tmp, "bbbbbbbbbbbbbbbb", "two");
        assert_eq!(source.load().unwrap().hash, "bbbbbbbbbbbbbbbb");
        assert_eq!(source.load().unwrap().content, "two");
    }
}
