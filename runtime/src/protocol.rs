//! The JSON call protocol between host and VM.
//!
//! One request per call, shipped on the runner's command line; one reply,
//! read from the final non-empty output line. Values that are not
//! JSON-representable fail at the point of encoding; there is no
//! structured cloning.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::SandboxError;
use crate::provisioner::CommandOutput;

/// Host→VM request payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportPayload {
    pub args: Vec<Value>,
    /// Present iff the target function captures closure variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closure_vars: Option<Map<String, Value>>,
}

/// One call into the sandbox, as produced by a generated stub.
#[derive(Debug, Clone)]
pub struct SandboxInvocation {
    pub fn_id: String,
    pub args: Vec<Value>,
    pub closure_vars: Option<Map<String, Value>>,
}

impl SandboxInvocation {
    #[must_use]
    pub fn new(fn_id: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            fn_id: fn_id.into(),
            args,
            closure_vars: None,
        }
    }

    /// Attach captured closure values.
    #[must_use]
    pub fn with_closure(mut self, closure_vars: Map<String, Value>) -> Self {
        self.closure_vars = Some(closure_vars);
        self
    }

    #[must_use]
    pub fn payload(&self) -> TransportPayload {
        TransportPayload {
            args: self.args.clone(),
            closure_vars: self.closure_vars.clone(),
        }
    }
}

/// VM→host reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportReply {
    Result(Value),
    Error {
        message: String,
        stack: Option<String>,
    },
}

impl TransportReply {
    /// Parse one output line as a reply, if it is one.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line.trim()).ok()?;
        let object = value.as_object()?;
        if let Some(error) = object.get("__error") {
            let message = error.as_str().unwrap_or_default().to_string();
            let stack = object
                .get("__stack")
                .and_then(Value::as_str)
                .map(str::to_string);
            return Some(TransportReply::Error { message, stack });
        }
        if object.contains_key("__result") {
            return Some(TransportReply::Result(object["__result"].clone()));
        }
        None
    }
}

/// Interpret a runner invocation's captured output.
///
/// The final non-empty stdout line is parsed first; a failing runner
/// reports on stderr instead, so that is consulted next. Anything else is
/// a malformed reply carrying both streams verbatim.
///
/// # Errors
///
/// [`SandboxError::Remote`] for a reported function failure,
/// [`SandboxError::MalformedReply`] when no reply line parses.
pub fn parse_reply(output: &CommandOutput) -> Result<Value, SandboxError> {
    for stream in [&output.stdout, &output.stderr] {
        let Some(line) = stream.lines().rev().find(|l| !l.trim().is_empty()) else {
            continue;
        };
        match TransportReply::parse_line(line) {
            Some(TransportReply::Result(value)) => return Ok(value),
            Some(TransportReply::Error { message, stack }) => {
                return Err(SandboxError::Remote { message, stack });
            }
            None => {}
        }
    }
    Err(SandboxError::MalformedReply {
        stdout: output.stdout.clone(),
        stderr: output.stderr.clone(),
    })
}
