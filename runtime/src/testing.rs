//! In-memory fake of the sandbox provisioning API.
//!
//! `FakeProvisioner` hands out `FakeVm`s that emulate the runner protocol
//! against a registry of Rust handlers keyed by function id, and record
//! every file write and command so tests can assert install ordering and
//! session reuse.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use outpost_bundler::{BUNDLE_VM_PATH, RUNNER_VM_PATH};

use crate::error::SandboxError;
use crate::provisioner::{
    CommandOutput, CommandSpec, CreateOptions, SandboxProvisioner, SandboxVm, VmFile,
};

/// Handler standing in for one bundled sandbox function.
pub type FakeHandler =
    Arc<dyn Fn(&[Value], Option<&Map<String, Value>>) -> Result<Value, String> + Send + Sync>;

type FunctionRegistry = Arc<Mutex<HashMap<String, FakeHandler>>>;

/// Recording provisioner; every created VM shares the function registry.
#[derive(Default)]
pub struct FakeProvisioner {
    functions: FunctionRegistry,
    vms: Mutex<Vec<Arc<FakeVm>>>,
    created: AtomicUsize,
    fail_next: AtomicBool,
}

impl FakeProvisioner {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a handler for one function id.
    pub fn register<F>(&self, fn_id: &str, handler: F)
    where
        F: Fn(&[Value], Option<&Map<String, Value>>) -> Result<Value, String>
            + Send
            + Sync
            + 'static,
    {
        self.functions
            .lock()
            .expect("registry lock")
            .insert(fn_id.to_string(), Arc::new(handler));
    }

    /// Number of VMs provisioned so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Snapshot of every VM handed out.
    #[must_use]
    pub fn vms(&self) -> Vec<Arc<FakeVm>> {
        self.vms.lock().expect("vm list lock").clone()
    }

    /// Make the next `create` fail.
    pub fn fail_next_create(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SandboxProvisioner for FakeProvisioner {
    async fn create(&self, _options: &CreateOptions) -> Result<Arc<dyn SandboxVm>, SandboxError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SandboxError::Provision("injected create failure".into()));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let vm = Arc::new(FakeVm::new(format!("vm-{n}"), self.functions.clone()));
        self.vms.lock().expect("vm list lock").push(vm.clone());
        Ok(vm)
    }
}

/// Fake VM: a filesystem map plus a runner-protocol emulator.
pub struct FakeVm {
    id: String,
    functions: FunctionRegistry,
    files: Mutex<HashMap<String, String>>,
    write_batches: Mutex<Vec<Vec<String>>>,
    commands: Mutex<Vec<CommandSpec>>,
    stopped: AtomicBool,
}

impl FakeVm {
    fn new(id: String, functions: FunctionRegistry) -> Self {
        Self {
            id,
            functions,
            files: Mutex::new(HashMap::new()),
            write_batches: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Content of a file previously written into the VM.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().expect("files lock").get(path).cloned()
    }

    /// Paths of each `write_files` batch, in order.
    #[must_use]
    pub fn write_batches(&self) -> Vec<Vec<String>> {
        self.write_batches.lock().expect("batch lock").clone()
    }

    /// Every command run in this VM, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().expect("commands lock").clone()
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn reply_error(message: &str) -> CommandOutput {
        let stack = format!("Error: {message}\n    at main ({RUNNER_VM_PATH}:1:1)");
        CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: format!(
                "{}\n",
                json!({ "__error": message, "__stack": stack })
            ),
        }
    }
}

#[async_trait]
impl SandboxVm for FakeVm {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_files(&self, files: &[VmFile]) -> Result<(), SandboxError> {
        if self.is_stopped() {
            return Err(SandboxError::Vm(format!("{} is stopped", self.id)));
        }
        self.write_batches
            .lock()
            .expect("batch lock")
            .push(files.iter().map(|f| f.path.clone()).collect());
        let mut map = self.files.lock().expect("files lock");
        for file in files {
            map.insert(file.path.clone(), file.content.clone());
        }
        Ok(())
    }

    async fn run_command(&self, command: CommandSpec) -> Result<CommandOutput, SandboxError> {
        if self.is_stopped() {
            return Err(SandboxError::Vm(format!("{} is stopped", self.id)));
        }
        self.commands.lock().expect("commands lock").push(command.clone());

        if command.program != "node" || command.args.first().map(String::as_str) != Some(RUNNER_VM_PATH)
        {
            return Ok(CommandOutput {
                exit_code: 127,
                stdout: String::new(),
                stderr: format!("{}: command not found\n", command.program),
            });
        }
        if self.file(RUNNER_VM_PATH).is_none() {
            return Ok(CommandOutput {
                exit_code: 127,
                stdout: String::new(),
                stderr: format!("node: {RUNNER_VM_PATH}: no such file\n"),
            });
        }
        if self.file(BUNDLE_VM_PATH).is_none() {
            return Ok(Self::reply_error(&format!(
                "Cannot find module '{BUNDLE_VM_PATH}'"
            )));
        }

        let fn_id = command.args.get(1).cloned().unwrap_or_default();
        let payload: Value = command
            .args
            .get(2)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| json!({ "args": [] }));
        let args: Vec<Value> = payload
            .get("args")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let closure_vars = payload
            .get("closureVars")
            .and_then(Value::as_object)
            .cloned();

        let handler = self
            .functions
            .lock()
            .expect("registry lock")
            .get(&fn_id)
            .cloned();
        let Some(handler) = handler else {
            let mut available: Vec<String> = self
                .functions
                .lock()
                .expect("registry lock")
                .keys()
                .cloned()
                .collect();
            available.sort();
            return Ok(Self::reply_error(&format!(
                "unknown sandbox function \"{fn_id}\"; available: {}",
                available.join(", ")
            )));
        };

        match handler(&args, closure_vars.as_ref()) {
            Ok(value) => Ok(CommandOutput {
                exit_code: 0,
                stdout: format!("{}\n", json!({ "__result": value })),
                stderr: String::new(),
            }),
            Err(message) => Ok(Self::reply_error(&message)),
        }
    }

    async fn stop(&self) -> Result<(), SandboxError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}
