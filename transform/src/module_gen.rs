//! Generated per-file sandbox modules.
//!
//! Each source file with at least one annotated function gets a companion
//! module exporting the extracted bodies under their stable ids. The
//! source's runtime imports are re-emitted with three-way filtering:
//! type-only imports are dropped, host-only orchestrator imports are
//! dropped, and the shell helper is rewritten to its runtime-free subpath
//! so the bundle never pulls host-side provisioning code into the VM.

use std::fmt::Write as _;

use outpost_syntax::{ImportDecl, ImportSpecifier, Module};

use crate::collector::SandboxFnRecord;
use crate::{RUNTIME_PACKAGE, SHELL_HELPER, SHELL_SUBPATH};

/// Render the generated module for one transformed source file.
#[must_use]
pub fn generate_module(
    module: &Module,
    source: &str,
    rel_path: &str,
    records: &[SandboxFnRecord],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// Sandbox functions extracted from {rel_path}.");
    let _ = writeln!(out, "// Generated on every build; do not edit.");

    for import in &module.imports {
        if let Some(line) = filter_import(import, source) {
            let _ = writeln!(out, "{line}");
        }
    }
    out.push('\n');

    for record in records {
        out.push_str(&render_function(record));
        out.push('\n');
    }
    out
}

/// Categorise one source import for the sandbox bundle: drop, rewrite to
/// the shell subpath, or pass through.
fn filter_import(decl: &ImportDecl, source: &str) -> Option<String> {
    if decl.type_only {
        return None;
    }
    if decl.source == RUNTIME_PACKAGE {
        // Host-only symbols are elided; only the shell helper survives, on
        // a subpath that resolves inside the VM.
        let wants_shell = decl.specifiers.iter().any(
            |s| matches!(s, ImportSpecifier::Named { imported, .. } if imported == SHELL_HELPER),
        );
        return wants_shell
            .then(|| format!("import {{ {SHELL_HELPER} }} from \"{SHELL_SUBPATH}\";"));
    }

    // Side-effect imports pass through verbatim.
    if decl.specifiers.is_empty() {
        return Some(decl.span.text(source).to_string());
    }

    let kept: Vec<&ImportSpecifier> = decl
        .specifiers
        .iter()
        .filter(|s| !s.is_type_only())
        .collect();
    if kept.is_empty() {
        return None;
    }
    if kept.len() == decl.specifiers.len() {
        return Some(decl.span.text(source).to_string());
    }
    Some(render_import(&kept, &decl.source))
}

/// Re-render an import declaration from its surviving specifiers.
fn render_import(specs: &[&ImportSpecifier], source: &str) -> String {
    let mut clauses: Vec<String> = Vec::new();
    let mut named: Vec<String> = Vec::new();

    for spec in specs {
        match spec {
            ImportSpecifier::Default { local } => clauses.push(local.clone()),
            ImportSpecifier::Namespace { local } => clauses.push(format!("* as {local}")),
            ImportSpecifier::Named {
                imported, local, ..
            } => {
                if imported == local {
                    named.push(local.clone());
                } else {
                    named.push(format!("{imported} as {local}"));
                }
            }
        }
    }
    if !named.is_empty() {
        clauses.push(format!("{{ {} }}", named.join(", ")));
    }
    format!("import {} from \"{source}\";", clauses.join(", "))
}

/// Render one extracted function as an export named by its id.
///
/// Functions with captures take a `__closure` object as their first
/// parameter and destructure it on the first line, matching the runner's
/// convention of prepending the closure object to the argument list.
fn render_function(record: &SandboxFnRecord) -> String {
    let params = record.params_text.trim();
    let mut out = String::new();
    if record.closure_vars.is_empty() {
        let _ = write!(out, "export async function {}({params}) {{", record.fn_id);
        out.push_str(&record.body_source);
        out.push_str("}\n");
    } else {
        let sep = if params.is_empty() { "" } else { ", " };
        let _ = writeln!(
            out,
            "export async function {}(__closure{sep}{params}) {{",
            record.fn_id
        );
        let _ = write!(
            out,
            "  const {{ {} }} = __closure;",
            record.closure_vars.join(", ")
        );
        out.push_str(&record.body_source);
        out.push_str("}\n");
    }
    out
}
