//! The fixed runner script installed into every sandbox VM.
//!
//! The runner is invariant across builds; only the bundle beside it
//! changes. It reads a function id and a JSON payload from the command
//! line, dispatches into the bundle, and reports the outcome as a single
//! JSON line.

/// Path the runner is installed at inside a VM.
pub const RUNNER_VM_PATH: &str = "/sandbox/runner.mjs";
/// Path the bundle is installed at inside a VM; the runner imports it from
/// here.
pub const BUNDLE_VM_PATH: &str = "/sandbox/bundle.mjs";

/// Runner module source.
///
/// Invocation: `node /sandbox/runner.mjs <fnId> <payloadJson>` where the
/// payload encodes `{ args: unknown[], closureVars?: object }`. When
/// `closureVars` is present it is prepended to the argument list, matching
/// the generated modules' convention. Success writes `{"__result": …}` to
/// stdout and exits 0; failure writes `{"__error": …, "__stack": …}` to
/// stderr and exits 1.
pub const RUNNER_SOURCE: &str = r#"// Sandbox runner. Installed once per VM; only the bundle changes.
const [fnId, payloadJson] = process.argv.slice(2);

function fail(error) {
  const message = error instanceof Error ? error.message : String(error);
  const stack = error instanceof Error ? error.stack : undefined;
  process.stderr.write(JSON.stringify({ __error: message, __stack: stack }) + "\n");
  process.exit(1);
}

async function main() {
  if (!fnId) {
    throw new Error("usage: node runner.mjs <fnId> <payloadJson>");
  }
  const payload = payloadJson ? JSON.parse(payloadJson) : { args: [] };
  const bundle = await import("/sandbox/bundle.mjs");
  const fn = bundle[fnId];
  if (typeof fn !== "function") {
    const available = Object.keys(bundle).sort().join(", ");
    throw new Error(`unknown sandbox function "${fnId}"; available: ${available}`);
  }
  const args = payload.closureVars
    ? [payload.closureVars, ...(payload.args ?? [])]
    : payload.args ?? [];
  const value = await fn(...args);
  process.stdout.write(
    JSON.stringify({ __result: value === undefined ? null : value }) + "\n"
  );
}

main().catch(fail);
"#;
