//! Session pool: session key → live VM binding.
//!
//! The pool is process-wide (a `OnceLock` global, the moral equivalent of
//! parking it on the task runtime's global namespace) so a hot-reloaded
//! sandbox definition finds its sessions again. The orchestrator
//! exclusively owns the bindings; insertion happens only after successful
//! provisioning.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;

use crate::provisioner::SandboxVm;

/// Live association between a session key and a VM.
#[derive(Clone)]
pub struct SessionBinding {
    pub vm: Arc<dyn SandboxVm>,
    pub sudo: bool,
}

impl fmt::Debug for SessionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBinding")
            .field("vm", &self.vm.id())
            .field("sudo", &self.sudo)
            .finish()
    }
}

/// Mapping from session key to binding.
#[derive(Default)]
pub struct SessionPool {
    inner: Mutex<HashMap<String, SessionBinding>>,
}

impl SessionPool {
    /// A fresh, private pool (tests and embedded uses).
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide pool shared by all sandbox definitions.
    pub fn global() -> Arc<Self> {
        static POOL: OnceLock<Arc<SessionPool>> = OnceLock::new();
        POOL.get_or_init(SessionPool::new).clone()
    }

    pub async fn get(&self, key: &str) -> Option<SessionBinding> {
        self.inner.lock().await.get(key).cloned()
    }

    /// Insert a binding; returns the displaced one when the key was
    /// already bound (the caller stops the duplicate VM).
    pub async fn insert(&self, key: String, binding: SessionBinding) -> Option<SessionBinding> {
        self.inner.lock().await.insert(key, binding)
    }

    pub async fn remove(&self, key: &str) -> Option<SessionBinding> {
        self.inner.lock().await.remove(key)
    }

    /// Take every binding, leaving the pool empty.
    pub async fn drain(&self) -> Vec<(String, SessionBinding)> {
        self.inner.lock().await.drain().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
