//! Orchestrator errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the sandbox runtime.
///
/// There are no automatic retries and no quiet fallback to local
/// execution; every failure reaches the caller.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// No published bundle under the build output. Almost always means the
    /// build ran without the loader hook.
    #[error(
        "sandbox bundle not found under {out_dir}: check that the outpost loader hook is \
         installed in the framework config and re-run the build"
    )]
    MissingBundle { out_dir: PathBuf },

    /// VM provisioning failed; no pool entry was created.
    #[error("failed to provision sandbox VM: {0}")]
    Provision(String),

    /// A VM-side file write or command invocation failed.
    #[error("sandbox VM operation failed: {0}")]
    Vm(String),

    /// The sandboxed function threw; message and stack come from the VM.
    #[error("{message}")]
    Remote {
        message: String,
        stack: Option<String>,
    },

    /// Neither stdout nor stderr ended in a parsable reply line.
    #[error(
        "sandbox reply was not valid JSON\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}"
    )]
    MalformedReply { stdout: String, stderr: String },

    /// Arguments or results that are not JSON-representable fail at the
    /// point of encoding.
    #[error("sandbox payload was not JSON-serialisable: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sandbox I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Install-state store failure.
    #[error("install-state store failure: {0}")]
    Store(String),
}
