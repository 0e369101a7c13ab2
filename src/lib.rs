//! Directive-driven remote-sandbox execution.
//!
//! A leading `"use sandbox"` string literal inside an async function makes
//! that function's body execute in an isolated remote VM. This crate ties
//! the pieces together:
//!
//! - [`syntax`] - Span-preserving parser and scope tracker
//! - [`transform`] - Directive detection, stubs, generated modules
//! - [`bundler`] - Staging, content-addressed bundle, runner template
//! - [`runtime`] - VM pool, orchestrator, call context, install state
//! - [`loader`] - File-level hook for the host framework's transform
//!   pipeline
//!
//! # Build-time flow
//!
//! source → parse → collect annotated functions → (stubbed source,
//! generated module) → staging → bundle + manifest.
//!
//! # Call-time flow
//!
//! stub → orchestrator → session VM (runner + bundle installed) → runner
//! prints one JSON reply line → result or reconstructed error.

pub use outpost_bundler as bundler;
pub use outpost_runtime as runtime;
pub use outpost_syntax as syntax;
pub use outpost_transform as transform;

pub mod loader;

/// Convenient imports for hosts embedding the sandbox runtime.
pub mod prelude {
    pub use crate::loader::{Loader, LoaderError};
    pub use outpost_bundler::{ConcatBundler, EsbuildBundler, ProjectBundler};
    pub use outpost_runtime::{
        create_sandbox, CallContext, RunOptions, Sandbox, SandboxConfig, SandboxError,
        SandboxInvocation, SandboxProvisioner, SandboxStub, SandboxVm,
    };
    pub use outpost_transform::{transform_source, TransformOptions};
}
