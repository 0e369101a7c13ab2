//! Task-local call context.
//!
//! The context identifies the VM (and privilege flag) a `run` is executing
//! against, bound for the dynamic extent of the awaited callback. Nested
//! annotated calls consult it and reuse the same VM without threading a
//! session key through every call site. Concurrent `run`s with distinct
//! keys never observe each other's contexts; a process-global would break
//! exactly that.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::provisioner::SandboxVm;

/// The value propagated through async activations of a `run`.
#[derive(Clone)]
pub struct CallContext {
    pub vm: Arc<dyn SandboxVm>,
    pub sudo: bool,
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("vm", &self.vm.id())
            .field("sudo", &self.sudo)
            .finish()
    }
}

tokio::task_local! {
    static CURRENT_CALL: CallContext;
}

/// The active call context, if control is nested inside a `run`.
#[must_use]
pub fn current() -> Option<CallContext> {
    CURRENT_CALL.try_with(Clone::clone).ok()
}

/// Run `future` with `context` bound for its dynamic extent.
pub async fn with_call_context<F: Future>(context: CallContext, future: F) -> F::Output {
    CURRENT_CALL.scope(context, future).await
}
