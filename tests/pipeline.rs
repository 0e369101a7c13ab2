//! Whole-pipeline test: transform → stage → bundle → install → dispatch,
//! with the fake provisioner standing in for the external sandbox API.

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use outpost::bundler::{BUNDLE_VM_PATH, ConcatBundler, ProjectBundler};
use outpost::loader::Loader;
use outpost::runtime::testing::FakeProvisioner;
use outpost::runtime::{
    MemoryInstallStateStore, Sandbox, SandboxConfig, SandboxInvocation, SandboxStub, SessionPool,
};

const READ_FILE_SRC: &str =
    "export async function readFile(path) { \"use sandbox\"; return path.length; }\n";

const CLOSURE_SRC: &str = "async function outer(prefix) { async function inner(x) { \"use sandbox\"; return prefix + x; } return inner(\"y\"); }\nexport { outer };\n";

fn fn_id_in(code: &str) -> String {
    let start = code.find("fnId: \"").expect("stub call present") + 7;
    let end = code[start..].find('"').unwrap() + start;
    code[start..end].to_string()
}

struct Pipeline {
    tmp: TempDir,
    provisioner: Arc<FakeProvisioner>,
    sandbox: Sandbox,
    read_file_id: String,
    inner_id: String,
}

fn build() -> Pipeline {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path().join("project");
    let out = project.join(".build");
    std::fs::create_dir_all(&project).unwrap();

    let loader = Loader::new(&project, &out);
    let read_code = loader
        .transform_file(&project.join("app/api/files.ts"), READ_FILE_SRC)
        .unwrap();
    let closure_code = loader
        .transform_file(&project.join("app/api/nested.ts"), CLOSURE_SRC)
        .unwrap();

    let report = ProjectBundler::new(&out, ConcatBundler).bundle().unwrap();
    assert!(report.written);
    assert_eq!(report.module_count, 2);

    let read_file_id = fn_id_in(&read_code);
    let inner_id = fn_id_in(&closure_code);

    let provisioner = FakeProvisioner::new();
    provisioner.register(&read_file_id, |args, _| {
        Ok(json!(args[0].as_str().unwrap_or_default().len()))
    });
    provisioner.register(&inner_id, |args, closure| {
        let prefix = closure
            .and_then(|c| c.get("prefix"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(json!(format!("{prefix}{}", args[0].as_str().unwrap_or_default())))
    });

    let sandbox = Sandbox::with_pool(
        SandboxConfig::new(&out),
        provisioner.clone(),
        Arc::new(MemoryInstallStateStore::new()),
        SessionPool::new(),
    );

    Pipeline {
        tmp,
        provisioner,
        sandbox,
        read_file_id,
        inner_id,
    }
}

#[tokio::test]
async fn test_top_level_round_trip_through_the_whole_pipeline() {
    let p = build();

    let result = p
        .sandbox
        .run("s1", &SandboxStub::new(&p.read_file_id), vec![json!("abcde")])
        .await
        .unwrap();
    assert_eq!(result, json!(5));

    // The installed bundle really carries the extracted body.
    let vm = &p.provisioner.vms()[0];
    let bundle = vm.file(BUNDLE_VM_PATH).unwrap();
    assert!(bundle.contains(&p.read_file_id));
    assert!(bundle.contains("return path.length;"));
    assert!(!bundle.contains("use sandbox"));
}

#[tokio::test]
async fn test_closure_capture_through_the_whole_pipeline() {
    let p = build();

    let mut closure = serde_json::Map::new();
    closure.insert("prefix".into(), json!("p-"));
    let invocation =
        SandboxInvocation::new(p.inner_id.clone(), vec![json!("y")]).with_closure(closure);

    let sandbox = &p.sandbox;
    let result = sandbox
        .run_with("s1", || sandbox.run_sandbox_fn(invocation))
        .await
        .unwrap();
    assert_eq!(result, json!("p-y"));

    let bundle = p.provisioner.vms()[0].file(BUNDLE_VM_PATH).unwrap();
    assert!(bundle.contains("__closure"));
    assert!(bundle.contains("const { prefix } = __closure;"));
}

#[tokio::test]
async fn test_retransform_and_rebundle_are_idempotent() {
    let p = build();
    let project = p.tmp.path().join("project");
    let out = project.join(".build");

    // Feeding transformed output back through the loader changes nothing.
    let loader = Loader::new(&project, &out);
    let once = loader
        .transform_file(&project.join("app/api/files.ts"), READ_FILE_SRC)
        .unwrap();
    let twice = loader
        .transform_file(&project.join("app/api/files.ts"), &once)
        .unwrap();
    assert_eq!(once, twice);

    // Re-bundling without changes rewrites nothing.
    let report = ProjectBundler::new(&out, ConcatBundler).bundle().unwrap();
    assert!(!report.written);
}

#[tokio::test]
async fn test_ids_stable_across_body_edits_at_pipeline_level() {
    let p = build();
    let project = p.tmp.path().join("project");
    let out = project.join(".build");
    let loader = Loader::new(&project, &out);

    let edited = "export async function readFile(path) { \"use sandbox\"; return 7; }\n";
    let edited_code = loader
        .transform_file(&project.join("app/api/files.ts"), edited)
        .unwrap();
    assert_eq!(fn_id_in(&edited_code), p.read_file_id);

    // The bundle digest, by contrast, tracks the edit.
    let report = ProjectBundler::new(&out, ConcatBundler).bundle().unwrap();
    assert!(report.written);
}
