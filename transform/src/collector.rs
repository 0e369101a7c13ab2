//! Collects annotated functions and their closure captures.
//!
//! Walks the parsed module depth-first with the scope chain, recording one
//! [`SandboxFnRecord`] per async function whose body leads with the
//! directive. Nested functions additionally get their free variables
//! resolved against the enclosing scopes.

use std::collections::BTreeSet;

use outpost_syntax::{
    ErrorSpan, ExportKind, FunctionKind, FunctionNode, Module, Param, ScopeChain, Span,
};
use tracing::warn;

use crate::builtins::is_global;
use crate::error::TransformError;
use crate::ids::fn_id;

/// One annotated function found during transformation.
///
/// Lives for the duration of a single file transform; consumed by the stub
/// and module generators.
#[derive(Debug, Clone)]
pub struct SandboxFnRecord {
    /// Stable identifier, derived from path and scope path only.
    pub fn_id: String,
    pub original_name: String,
    /// Enclosing function names, innermost last; the function's own name is
    /// the final element.
    pub scope_path: Vec<String>,
    pub params: Vec<Param>,
    /// Verbatim text between the parameter parentheses.
    pub params_text: String,
    /// Free variables captured from enclosing function scopes, sorted.
    /// Always empty for top-level functions.
    pub closure_vars: Vec<String>,
    /// Body text with the directive statement removed.
    pub body_source: String,
    /// Replacement span for nested rewrites (whole definition or
    /// initializer expression).
    pub span: Span,
    /// Interior of the body braces, for top-level stubbing.
    pub body_span: Span,
    pub kind: FunctionKind,
    pub export: ExportKind,
    /// Whether the function sits inside another function.
    pub nested: bool,
}

impl SandboxFnRecord {
    /// Forwarding expressions for the original parameters, in order.
    #[must_use]
    pub fn arg_expressions(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.forward.as_str()).collect()
    }
}

/// Collect every annotated function in `module`.
///
/// `rel_path` is the project-relative source path used for id derivation.
///
/// # Errors
///
/// Returns [`TransformError::AnonymousDefaultExport`] when an anonymous
/// `export default` function carries the directive.
pub fn collect(
    module: &Module,
    source: &str,
    rel_path: &str,
) -> Result<Vec<SandboxFnRecord>, TransformError> {
    let mut records = Vec::new();
    // The capture chain is rooted at module scope, minus import bindings:
    // imports resolve inside the generated module by re-import, while other
    // top-level bindings (`const`, sibling functions, classes) only reach
    // the VM as closure captures.
    let root = ScopeChain::root(&module.top_level_bindings);
    for function in &module.functions {
        walk(function, source, rel_path, &root, &[], 0, &mut records)?;
    }
    Ok(records)
}

fn walk(
    node: &FunctionNode,
    source: &str,
    rel_path: &str,
    scope: &ScopeChain<'_>,
    names_above: &[String],
    depth: usize,
    records: &mut Vec<SandboxFnRecord>,
) -> Result<(), TransformError> {
    if node.is_annotated() {
        record(node, source, rel_path, scope, names_above, depth, records)?;
    }

    let child = scope.child(&node.declared);
    let mut names = names_above.to_vec();
    if let Some(name) = &node.name {
        names.push(name.clone());
    }
    for nested in &node.nested {
        walk(nested, source, rel_path, &child, &names, depth + 1, records)?;
    }
    Ok(())
}

fn record(
    node: &FunctionNode,
    source: &str,
    rel_path: &str,
    scope: &ScopeChain<'_>,
    names_above: &[String],
    depth: usize,
    records: &mut Vec<SandboxFnRecord>,
) -> Result<(), TransformError> {
    let Some(name) = node.name.clone() else {
        if node.export == ExportKind::Default {
            return Err(TransformError::AnonymousDefaultExport {
                span: ErrorSpan::from_range(node.span.start, node.span.end, source),
            });
        }
        warn!("ignoring anonymous sandbox function (not bound to a name)");
        return Ok(());
    };

    if !node.is_async {
        warn!(function = %name, "ignoring \"use sandbox\" in a non-async function");
        return Ok(());
    }

    let mut scope_path = names_above.to_vec();
    scope_path.push(name.clone());

    let nested = depth > 0;
    let closure_vars = if nested {
        collect_closure_vars(node, scope)
    } else {
        Vec::new()
    };

    records.push(SandboxFnRecord {
        fn_id: fn_id(rel_path, &scope_path),
        original_name: name,
        scope_path,
        params: node.params.clone(),
        params_text: node.params_text.clone(),
        closure_vars,
        body_source: body_without_directive(node, source),
        span: node.span,
        body_span: node.body_span,
        kind: node.kind,
        export: node.export,
        nested,
    });
    Ok(())
}

/// Free-variable analysis for a nested annotated function.
///
/// A referenced identifier is captured when it is (a) referenced anywhere in
/// the body, nested definitions included, (b) not declared anywhere within
/// the function, (c) not an ambient global, and (d) declared in some
/// enclosing scope — enclosing function scopes or module scope. Import
/// bindings are the one module-scope exception (the generated module
/// re-imports them). `this`, computed member access and reflective lookups
/// are opaque and never captured. The result is sorted for determinism.
fn collect_closure_vars(node: &FunctionNode, scope: &ScopeChain<'_>) -> Vec<String> {
    let locals: BTreeSet<String> = node
        .declared_recursive()
        .into_iter()
        .chain(node.name.clone())
        .collect();

    let referenced: BTreeSet<String> = node.references_recursive().into_iter().collect();

    referenced
        .into_iter()
        .filter(|name| !locals.contains(name))
        .filter(|name| !is_global(name))
        .filter(|name| scope.declares(name))
        .collect()
}

/// Body interior with the directive statement cut out.
fn body_without_directive(node: &FunctionNode, source: &str) -> String {
    let body = node.body_span;
    match node.directive {
        Some(directive) => {
            let mut out = String::with_capacity(body.len());
            out.push_str(&source[body.start..directive.start]);
            out.push_str(&source[directive.end..body.end]);
            out
        }
        None => source[body.start..body.end].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_syntax::parse_module;

    fn collect_src(source: &str) -> Vec<SandboxFnRecord> {
        let module = parse_module(source).unwrap();
        collect(&module, source, "app/api/x.ts").unwrap()
    }

    #[test]
    fn test_top_level_record() {
        let src = "export async function readFile(path) { \"use sandbox\"; return path.length; }";
        let records = collect_src(src);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.original_name, "readFile");
        assert_eq!(r.scope_path, vec!["readFile"]);
        assert!(r.fn_id.starts_with("readFile_"));
        assert!(!r.nested);
        assert!(r.closure_vars.is_empty());
        assert!(r.body_source.contains("return path.length;"));
        assert!(!r.body_source.contains("use sandbox"));
    }

    #[test]
    fn test_closure_capture() {
        let src = "async function outer(prefix) { async function inner(x) { \"use sandbox\"; return prefix + x; } return inner(\"y\"); }";
        let records = collect_src(src);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.original_name, "inner");
        assert_eq!(r.scope_path, vec!["outer", "inner"]);
        assert!(r.fn_id.starts_with("outer$inner_"));
        assert!(r.nested);
        assert_eq!(r.closure_vars, vec!["prefix"]);
    }

    #[test]
    fn test_shadowed_name_is_not_captured() {
        let src = "async function outer(value) { async function inner() { \"use sandbox\"; const value = 1; return value; } return inner(); }";
        let records = collect_src(src);
        assert!(records[0].closure_vars.is_empty());
    }

    #[test]
    fn test_globals_are_not_captured() {
        let src = "async function outer(extra) { async function inner() { \"use sandbox\"; return JSON.stringify({ extra }) + String(process.pid); } return inner(); }";
        let records = collect_src(src);
        assert_eq!(records[0].closure_vars, vec!["extra"]);
    }

    #[test]
    fn test_module_scope_names_are_not_captured() {
        // Imports resolve inside the generated module itself, never through
        // the closure object.
        let src = "import { helper } from \"./helper\";\nasync function outer(p) { async function inner() { \"use sandbox\"; return helper(p); } return inner(); }";
        let records = collect_src(src);
        assert_eq!(records[0].closure_vars, vec!["p"]);
    }

    #[test]
    fn test_top_level_bindings_are_captured() {
        // A module-scope `const` is an enclosing-scope binding like any
        // other; without the capture the bundle would throw a
        // ReferenceError at call time.
        let src = "const limit = 10;\nasync function outer(p) { async function inner() { \"use sandbox\"; return limit + p; } return inner(); }";
        let records = collect_src(src);
        assert_eq!(records[0].closure_vars, vec!["limit", "p"]);
    }

    #[test]
    fn test_closure_vars_sorted() {
        let src = "async function outer(zeta, alpha, mid) { async function inner() { \"use sandbox\"; return zeta + mid + alpha; } return inner(); }";
        let records = collect_src(src);
        assert_eq!(records[0].closure_vars, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_sync_directive_is_ignored() {
        let src = "function f() { \"use sandbox\"; return 1; }";
        assert!(collect_src(src).is_empty());
    }

    #[test]
    fn test_anonymous_default_export_fails_loudly() {
        let src = "export default async () => { \"use sandbox\"; return 1; }";
        let module = parse_module(src).unwrap();
        let err = collect(&module, src, "app/x.ts").unwrap_err();
        assert!(matches!(err, TransformError::AnonymousDefaultExport { .. }));
    }

    #[test]
    fn test_multiple_nested_annotated() {
        let src = "async function outer(a) { async function one() { \"use sandbox\"; return a; } async function two() { \"use sandbox\"; return a * 2; } return one() + two(); }";
        let records = collect_src(src);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].original_name, "one");
        assert_eq!(records[1].original_name, "two");
        assert_eq!(records[0].closure_vars, vec!["a"]);
        assert_eq!(records[1].closure_vars, vec!["a"]);
    }

    #[test]
    fn test_id_stable_across_body_edit() {
        let before = "export async function foo(a) { \"use sandbox\"; return a; }";
        let after = "export async function foo(a) { \"use sandbox\"; return 7; }";
        let id_before = collect_src(before)[0].fn_id.clone();
        let id_after = collect_src(after)[0].fn_id.clone();
        assert_eq!(id_before, id_after);
    }
}
