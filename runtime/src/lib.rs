//! Sandbox runtime: VM pool, orchestrator and call protocol.
//!
//! Pools sandbox VMs by caller-supplied session key, installs the fixed
//! runner script and the current bundle into each VM on first use and on
//! bundle change, serialises calls through a small JSON protocol, and
//! propagates a task-local call context so nested sandbox calls inside a
//! `run` reuse the same VM.
//!
//! # Modules
//!
//! - [`orchestrator`] - The sandbox definition: `run`, `stop`, `stop_all`
//! - [`provisioner`] - Seam to the external sandbox API
//! - [`protocol`] - Payload/reply wire shapes and reply parsing
//! - [`context`] - Task-local call context
//! - [`pool`] - Process-wide session pool
//! - [`store`] - Persistent install-state store
//! - [`bundle_source`] - Published-bundle access with dev/prod caching
//! - [`testing`] - Recording in-memory fake of the provisioner API

pub mod bundle_source;
pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod protocol;
pub mod provisioner;
pub mod store;
pub mod testing;

pub use bundle_source::{BundleArtifact, BundleSource};
pub use config::SandboxConfig;
pub use context::{current as current_call_context, with_call_context, CallContext};
pub use error::SandboxError;
pub use orchestrator::{create_sandbox, RunOptions, Sandbox, SandboxStub};
pub use pool::{SessionBinding, SessionPool};
pub use protocol::{parse_reply, SandboxInvocation, TransportPayload, TransportReply};
pub use provisioner::{
    CommandOutput, CommandSpec, CreateOptions, SandboxProvisioner, SandboxVm, VmFile,
};
pub use store::{FsInstallStateStore, InstallStateStore, MemoryInstallStateStore, STATE_DIR};
