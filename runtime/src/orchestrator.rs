//! Sandbox pool orchestration.
//!
//! Owns the session pool, the per-VM ready-check, command execution and
//! reply parsing. `run` binds a call context for its callback so nested
//! sandbox calls land on the same VM; a sandbox call with no ambient
//! context gets an ephemeral VM that is stopped again on the way out.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};

use outpost_bundler::{BUNDLE_VM_PATH, RUNNER_SOURCE, RUNNER_VM_PATH};

use crate::bundle_source::BundleSource;
use crate::config::SandboxConfig;
use crate::context::{self, with_call_context, CallContext};
use crate::error::SandboxError;
use crate::pool::{SessionBinding, SessionPool};
use crate::protocol::{parse_reply, SandboxInvocation};
use crate::provisioner::{CommandSpec, SandboxProvisioner, SandboxVm, VmFile};
use crate::store::InstallStateStore;

/// Normalised `run` target: session key plus privilege flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub key: String,
    /// Defaults to true; commands in the VM run privileged unless the
    /// caller opts out.
    pub sudo: bool,
}

impl RunOptions {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            sudo: true,
        }
    }

    #[must_use]
    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }
}

impl From<&str> for RunOptions {
    fn from(key: &str) -> Self {
        RunOptions::new(key)
    }
}

impl From<String> for RunOptions {
    fn from(key: String) -> Self {
        RunOptions::new(key)
    }
}

/// Host-side handle to one transformed sandbox function.
///
/// The build-time transform replaces each annotated function with a stub
/// that forwards through [`Sandbox::run_sandbox_fn`]; a `SandboxStub` is
/// the same forwarder as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxStub {
    pub fn_id: String,
}

impl SandboxStub {
    #[must_use]
    pub fn new(fn_id: impl Into<String>) -> Self {
        Self {
            fn_id: fn_id.into(),
        }
    }
}

/// A sandbox definition: pool, installer and call dispatch.
pub struct Sandbox {
    config: SandboxConfig,
    provisioner: Arc<dyn SandboxProvisioner>,
    store: Arc<dyn InstallStateStore>,
    bundle: BundleSource,
    pool: Arc<SessionPool>,
    /// VMs that already carry the runner. In-process only: losing this on
    /// restart merely re-writes a fixed blob.
    runner_installed: Mutex<HashSet<String>>,
}

/// Factory: a configuration record in, an opaque definition out.
#[must_use]
pub fn create_sandbox(
    config: SandboxConfig,
    provisioner: Arc<dyn SandboxProvisioner>,
    store: Arc<dyn InstallStateStore>,
) -> Sandbox {
    Sandbox::new(config, provisioner, store)
}

impl Sandbox {
    /// Definition backed by the process-wide session pool.
    #[must_use]
    pub fn new(
        config: SandboxConfig,
        provisioner: Arc<dyn SandboxProvisioner>,
        store: Arc<dyn InstallStateStore>,
    ) -> Self {
        Self::with_pool(config, provisioner, store, SessionPool::global())
    }

    /// Definition with a private pool (tests, embedded hosts).
    #[must_use]
    pub fn with_pool(
        config: SandboxConfig,
        provisioner: Arc<dyn SandboxProvisioner>,
        store: Arc<dyn InstallStateStore>,
        pool: Arc<SessionPool>,
    ) -> Self {
        let bundle = BundleSource::new(config.out_dir.clone(), config.dev);
        Self {
            config,
            provisioner,
            store,
            bundle,
            pool,
            runner_installed: Mutex::new(HashSet::new()),
        }
    }

    /// Run `f` against the session's VM, with the call context bound so
    /// nested sandbox calls reuse it.
    ///
    /// # Errors
    ///
    /// Provisioning, install and callback failures surface as-is.
    pub async fn run_with<T, F, Fut>(
        &self,
        options: impl Into<RunOptions>,
        f: F,
    ) -> Result<T, SandboxError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, SandboxError>>,
    {
        let options = options.into();
        let binding = self.session(&options).await?;
        self.ensure_ready(binding.vm.as_ref(), Some(&options.key))
            .await?;
        let ctx = CallContext {
            vm: binding.vm,
            sudo: options.sudo,
        };
        with_call_context(ctx, f()).await
    }

    /// Run one transformed function in the session's VM.
    ///
    /// # Errors
    ///
    /// See [`Sandbox::run_with`]; function failures arrive as
    /// [`SandboxError::Remote`].
    pub async fn run(
        &self,
        options: impl Into<RunOptions>,
        stub: &SandboxStub,
        args: Vec<Value>,
    ) -> Result<Value, SandboxError> {
        let invocation = SandboxInvocation::new(stub.fn_id.clone(), args);
        self.run_with(options, || self.run_sandbox_fn(invocation))
            .await
    }

    /// Entry point used by generated stubs.
    ///
    /// With an active call context the invocation dispatches to that VM;
    /// otherwise an ephemeral VM is provisioned and stopped again in a
    /// guaranteed-release path.
    ///
    /// # Errors
    ///
    /// Provisioning, install, execution and reply failures surface as-is.
    pub async fn run_sandbox_fn(
        &self,
        invocation: SandboxInvocation,
    ) -> Result<Value, SandboxError> {
        if let Some(ctx) = context::current() {
            return self.execute(ctx.vm.as_ref(), ctx.sudo, &invocation).await;
        }

        debug!(fn_id = %invocation.fn_id, "no call context; provisioning ephemeral VM");
        let vm = self
            .provisioner
            .create(&self.config.create_options())
            .await?;
        let result = async {
            self.ensure_ready(vm.as_ref(), None).await?;
            self.execute(vm.as_ref(), true, &invocation).await
        }
        .await;
        if let Err(err) = vm.stop().await {
            warn!(vm = vm.id(), error = %err, "failed to stop ephemeral VM");
        }
        result
    }

    /// Stop and forget the session bound to `key`. Unknown keys are a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Propagates the VM stop failure.
    pub async fn stop(&self, key: &str) -> Result<(), SandboxError> {
        match self.pool.remove(key).await {
            Some(binding) => {
                debug!(%key, vm = binding.vm.id(), "stopping session VM");
                binding.vm.stop().await
            }
            None => {
                debug!(%key, "stop: no session for key");
                Ok(())
            }
        }
    }

    /// Stop every pooled session, concurrently.
    ///
    /// # Errors
    ///
    /// Attempts every VM; the first stop failure is returned.
    pub async fn stop_all(&self) -> Result<(), SandboxError> {
        let stops = self.pool.drain().await.into_iter().map(|(key, binding)| async move {
            binding.vm.stop().await.map_err(|err| {
                warn!(%key, error = %err, "failed to stop session VM");
                err
            })
        });
        let mut first_error = None;
        for result in futures::future::join_all(stops).await {
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of live session bindings.
    pub async fn size(&self) -> usize {
        self.pool.len().await
    }

    /// Look up or provision the session binding for `options.key`.
    async fn session(&self, options: &RunOptions) -> Result<SessionBinding, SandboxError> {
        if let Some(existing) = self.pool.get(&options.key).await {
            return Ok(existing);
        }

        // Provision first, insert after: a failed create leaves no entry.
        let vm = self
            .provisioner
            .create(&self.config.create_options())
            .await?;
        debug!(key = %options.key, vm = vm.id(), "provisioned session VM");
        let binding = SessionBinding {
            vm,
            sudo: options.sudo,
        };
        if let Some(previous) = self
            .pool
            .insert(options.key.clone(), binding.clone())
            .await
        {
            // Concurrent first use of one key: the later insertion takes
            // precedence and the earlier duplicate is stopped.
            warn!(key = %options.key, "duplicate VM for session key; stopping the earlier one");
            if let Err(err) = previous.vm.stop().await {
                warn!(error = %err, "failed to stop duplicate VM");
            }
        }
        Ok(binding)
    }

    /// Make sure the VM carries the runner and the current bundle.
    ///
    /// Queues the runner write (first use of this VM in this process) and
    /// the bundle write (persisted digest differs from current), issues a
    /// single batch, then updates in-memory and persistent state. The
    /// store write follows the batch so a crash over-installs on recovery
    /// rather than skipping a needed install.
    async fn ensure_ready(
        &self,
        vm: &dyn SandboxVm,
        key: Option<&str>,
    ) -> Result<(), SandboxError> {
        let bundle = self.bundle.load()?;

        let runner_needed = !self
            .runner_installed
            .lock()
            .map_err(|_| SandboxError::Store("runner-install state poisoned".into()))?
            .contains(vm.id());
        let installed = match key {
            Some(key) => self.store.get_installed_hash(key).await?,
            None => None,
        };
        let bundle_needed = installed.as_deref() != Some(bundle.hash.as_str());

        let mut files = Vec::new();
        if runner_needed {
            files.push(VmFile {
                path: RUNNER_VM_PATH.to_string(),
                content: RUNNER_SOURCE.to_string(),
            });
        }
        if bundle_needed {
            files.push(VmFile {
                path: BUNDLE_VM_PATH.to_string(),
                content: bundle.content.clone(),
            });
        }
        if files.is_empty() {
            return Ok(());
        }

        vm.write_files(&files).await?;
        debug!(
            vm = vm.id(),
            runner = runner_needed,
            bundle = bundle_needed,
            hash = %bundle.hash,
            "installed sandbox files"
        );

        if runner_needed {
            self.runner_installed
                .lock()
                .map_err(|_| SandboxError::Store("runner-install state poisoned".into()))?
                .insert(vm.id().to_string());
        }
        if bundle_needed {
            if let Some(key) = key {
                self.store.set_installed_hash(key, &bundle.hash).await?;
            }
        }
        Ok(())
    }

    /// Invoke the runner in a VM and interpret its reply.
    async fn execute(
        &self,
        vm: &dyn SandboxVm,
        sudo: bool,
        invocation: &SandboxInvocation,
    ) -> Result<Value, SandboxError> {
        let payload = serde_json::to_string(&invocation.payload())?;
        let output = vm
            .run_command(CommandSpec {
                program: "node".to_string(),
                args: vec![
                    RUNNER_VM_PATH.to_string(),
                    invocation.fn_id.clone(),
                    payload,
                ],
                sudo,
            })
            .await?;
        parse_reply(&output)
    }
}
