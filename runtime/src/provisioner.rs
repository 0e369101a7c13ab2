//! The seam to the external sandbox provisioning API.
//!
//! The upstream provider is assumed to expose `create`, `writeFiles`,
//! `runCommand` and `stop`; these traits mirror that surface so the
//! orchestrator never depends on a concrete provider. The orchestrator
//! exclusively owns VM handles obtained here; nothing else may stop one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::SandboxError;

/// One file to write into a VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmFile {
    /// Absolute path inside the VM.
    pub path: String,
    pub content: String,
}

/// A command invocation inside a VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub sudo: bool,
}

/// Captured output of a VM command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Resource sizing and timeouts for provisioning, taken from the sandbox
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateOptions {
    pub vcpus: u32,
    pub memory_mb: u32,
    /// Per-command timeout, when the provider supports one.
    #[serde(with = "optional_millis")]
    pub command_timeout: Option<Duration>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            vcpus: 1,
            memory_mb: 512,
            command_timeout: None,
        }
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

/// A live sandbox VM handle.
#[async_trait]
pub trait SandboxVm: Send + Sync {
    /// Stable identifier for this VM instance.
    fn id(&self) -> &str;

    /// Write a batch of files into the VM.
    async fn write_files(&self, files: &[VmFile]) -> Result<(), SandboxError>;

    /// Run a command to completion and capture its output.
    async fn run_command(&self, command: CommandSpec) -> Result<CommandOutput, SandboxError>;

    /// Stop the VM and release its resources.
    async fn stop(&self) -> Result<(), SandboxError>;
}

/// Creates sandbox VMs.
#[async_trait]
pub trait SandboxProvisioner: Send + Sync {
    /// Provision (or reattach to) a VM.
    async fn create(&self, options: &CreateOptions) -> Result<Arc<dyn SandboxVm>, SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_options_deserialize() {
        let options: CreateOptions =
            serde_json::from_str(r#"{"vcpus": 2, "memoryMb": 1024, "commandTimeout": 30000}"#)
                .unwrap();
        assert_eq!(options.vcpus, 2);
        assert_eq!(options.memory_mb, 1024);
        assert_eq!(options.command_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_create_options_defaults() {
        let options: CreateOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, CreateOptions::default());
    }
}
