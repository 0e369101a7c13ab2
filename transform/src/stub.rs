//! In-place stub generation.
//!
//! Replaces each annotated function with a forwarder that ships its
//! arguments to the runtime entry point. Top-level functions keep their
//! declaration and only lose their body, so name, arity, async-ness and
//! exportedness survive verbatim. Nested functions are rewritten to arrow
//! expressions with the same signature.

use outpost_syntax::{FunctionKind, Span};

use crate::collector::SandboxFnRecord;
use crate::{RUNTIME_ENTRY, RUNTIME_PACKAGE};

/// The import line prepended to every transformed source.
#[must_use]
pub fn runtime_import_line() -> String {
    format!("import {{ {RUNTIME_ENTRY} }} from \"{RUNTIME_PACKAGE}\";\n")
}

/// The forwarded call a stub body performs.
fn call_expression(record: &SandboxFnRecord) -> String {
    let args = record.arg_expressions().join(", ");
    let mut call = format!(
        "{RUNTIME_ENTRY}({{ fnId: \"{}\", args: [{args}]",
        record.fn_id
    );
    if !record.closure_vars.is_empty() {
        call.push_str(&format!(
            ", closureVars: {{ {} }}",
            record.closure_vars.join(", ")
        ));
    }
    call.push_str(" })");
    call
}

/// Splice stub replacements for `records` into `source`.
///
/// When spans nest (an annotated function containing another), the
/// outermost replacement wins; the inner body ships to the bundle as-is.
#[must_use]
pub fn apply_stubs(source: &str, records: &[SandboxFnRecord]) -> String {
    let mut edits: Vec<(Span, String)> = records
        .iter()
        .map(|record| {
            if record.nested {
                let arrow = format!(
                    "async ({}) => {}",
                    record.params_text.trim(),
                    call_expression(record)
                );
                match record.kind {
                    FunctionKind::Declaration => (
                        record.span,
                        format!("const {} = {arrow};", record.original_name),
                    ),
                    FunctionKind::Expression | FunctionKind::Arrow => (record.span, arrow),
                }
            } else {
                (
                    record.body_span,
                    format!(" return {}; ", call_expression(record)),
                )
            }
        })
        .collect();

    edits.sort_by_key(|(span, _)| span.start);
    let mut kept: Vec<(Span, String)> = Vec::new();
    for (span, text) in edits {
        if kept
            .last()
            .is_some_and(|(prev, _)| span.start < prev.end)
        {
            continue;
        }
        kept.push((span, text));
    }

    let mut out = source.to_string();
    for (span, text) in kept.iter().rev() {
        out.replace_range(span.start..span.end, text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::collect;
    use outpost_syntax::parse_module;

    fn stub(source: &str) -> String {
        let module = parse_module(source).unwrap();
        let records = collect(&module, source, "app/x.ts").unwrap();
        apply_stubs(source, &records)
    }

    #[test]
    fn test_top_level_stub_preserves_signature() {
        let src = "export async function readFile(path) { \"use sandbox\"; return path.length; }";
        let out = stub(src);
        assert!(out.starts_with("export async function readFile(path) {"));
        assert!(out.contains("return __runSandboxFn({ fnId: \"readFile_"));
        assert!(out.contains("args: [path]"));
        assert!(!out.contains("use sandbox"));
        assert!(!out.contains("closureVars"));
    }

    #[test]
    fn test_zero_param_stub() {
        let src = "export async function ping() { \"use sandbox\"; return \"pong\"; }";
        let out = stub(src);
        assert!(out.contains("args: []"));
    }

    #[test]
    fn test_destructured_params_forwarded() {
        let src = "export async function f({ a, b = 1 }, ...rest) { \"use sandbox\"; return a; }";
        let out = stub(src);
        assert!(out.contains("export async function f({ a, b = 1 }, ...rest) {"));
        assert!(out.contains("args: [{a, b}, ...rest]"));
    }

    #[test]
    fn test_nested_declaration_becomes_arrow() {
        let src = "async function outer(prefix) { async function inner(x) { \"use sandbox\"; return prefix + x; } return inner(\"y\"); }";
        let out = stub(src);
        assert!(out.contains("const inner = async (x) => __runSandboxFn({ fnId: \"outer$inner_"));
        assert!(out.contains("closureVars: { prefix }"));
        // The outer function itself is untouched.
        assert!(out.starts_with("async function outer(prefix) {"));
        assert!(out.contains("return inner(\"y\");"));
    }

    #[test]
    fn test_nested_var_arrow_initializer_replaced() {
        let src = "async function outer(p) { const inner = async (x) => { \"use sandbox\"; return p + x; }; return inner(1); }";
        let out = stub(src);
        assert!(out.contains("const inner = async (x) => __runSandboxFn({"));
        assert!(out.contains("closureVars: { p }"));
    }

    #[test]
    fn test_annotated_outer_swallows_nested_edit() {
        // When an annotated function contains another annotated function,
        // the outer body replacement wins; the inner definition ships to
        // the bundle untouched.
        let src = "export async function outer(a) { \"use sandbox\"; async function inner() { \"use sandbox\"; return a; } return inner(); }";
        let out = stub(src);
        assert!(out.starts_with("export async function outer(a) { return __runSandboxFn({"));
        assert!(!out.contains("const inner ="));
    }

    #[test]
    fn test_untouched_functions_survive() {
        let src = "async function plain(a) { return a; }\nexport async function boxed() { \"use sandbox\"; return 1; }\n";
        let out = stub(src);
        assert!(out.contains("async function plain(a) { return a; }"));
        assert!(out.contains("return __runSandboxFn({ fnId: \"boxed_"));
    }
}
