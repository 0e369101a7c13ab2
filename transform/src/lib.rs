//! Directive-aware source transformer.
//!
//! Rewrites each async function whose body leads with `"use sandbox"` into
//! a stub that forwards its call to the sandbox runtime, and extracts the
//! original body into a generated companion module keyed by a stable
//! function id. Sources without the directive come back byte-identical;
//! sources that fail to parse are skipped with a diagnostic rather than
//! half-transformed.
//!
//! # Modules
//!
//! - [`collector`] - Annotated-function records and closure detection
//! - [`stub`] - In-place stub splicing
//! - [`module_gen`] - Generated per-file module rendering
//! - [`ids`] - Stable path-derived function identifiers
//! - [`builtins`] - Ambient globals excluded from capture

use std::path::Path;

use tracing::warn;

pub mod builtins;
pub mod collector;
pub mod error;
pub mod ids;
pub mod module_gen;
pub mod stub;

pub use collector::{collect, SandboxFnRecord};
pub use error::TransformError;

/// The host package that transformed sources import the runtime entry from.
pub const RUNTIME_PACKAGE: &str = "@outpost/runtime";
/// Runtime-free subpath carrying only the shell template helper.
pub const SHELL_SUBPATH: &str = "@outpost/runtime/shell";
/// The internal entry point generated stubs call.
pub const RUNTIME_ENTRY: &str = "__runSandboxFn";
/// The shell template helper symbol.
pub const SHELL_HELPER: &str = "$";

/// Transform configuration supplied by the host build.
#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// Project root; source paths are made relative to it for id
    /// derivation.
    pub project_root: std::path::PathBuf,
}

/// A generated companion module, ready for the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedModule {
    /// Project-relative path of the originating source file.
    pub source_rel_path: String,
    pub content: String,
}

/// Result of transforming one source file.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    /// The (possibly rewritten) source text.
    pub code: String,
    /// Present iff the source contained at least one annotated function.
    pub generated: Option<GeneratedModule>,
}

impl TransformOutput {
    fn unchanged(source: &str) -> Self {
        Self {
            code: source.to_string(),
            generated: None,
        }
    }

    /// Whether the transform rewrote anything.
    #[must_use]
    pub fn is_transformed(&self) -> bool {
        self.generated.is_some()
    }
}

/// Transform one source file.
///
/// Returns the stubbed source plus the generated companion module. A file
/// with no directive, an already-transformed file, and a file that fails to
/// parse all come back byte-identical (the parse failure is logged).
///
/// # Errors
///
/// Returns [`TransformError`] for inputs the transform refuses outright,
/// currently only an anonymous default-exported sandbox function.
pub fn transform_source(
    path: &Path,
    source: &str,
    options: &TransformOptions,
) -> Result<TransformOutput, TransformError> {
    // Fast paths: nothing to do, or our own output fed back in.
    if !source.contains(outpost_syntax::DIRECTIVE) {
        return Ok(TransformOutput::unchanged(source));
    }
    if source.contains(RUNTIME_ENTRY) {
        return Ok(TransformOutput::unchanged(source));
    }

    let module = match outpost_syntax::parse_module(source) {
        Ok(module) => module,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "skipping file: parse failed");
            return Ok(TransformOutput::unchanged(source));
        }
    };

    let rel_path = relative_path(path, options);
    let records = collect(&module, source, &rel_path)?;
    if records.is_empty() {
        return Ok(TransformOutput::unchanged(source));
    }

    let mut code = stub::runtime_import_line();
    code.push_str(&stub::apply_stubs(source, &records));

    let content = module_gen::generate_module(&module, source, &rel_path, &records);

    Ok(TransformOutput {
        code,
        generated: Some(GeneratedModule {
            source_rel_path: rel_path,
            content,
        }),
    })
}

fn relative_path(path: &Path, options: &TransformOptions) -> String {
    let rel = path
        .strip_prefix(&options.project_root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned();
    ids::normalize_rel_path(&rel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn options() -> TransformOptions {
        TransformOptions {
            project_root: PathBuf::from("/project"),
        }
    }

    fn transform(source: &str) -> TransformOutput {
        transform_source(Path::new("/project/app/api/x.ts"), source, &options()).unwrap()
    }

    #[test]
    fn test_no_directive_is_byte_identical() {
        let src = "export async function f(a) { return a; }\nconst x = 1;\n";
        let out = transform(src);
        assert_eq!(out.code, src);
        assert!(out.generated.is_none());
    }

    #[test]
    fn test_already_transformed_is_byte_identical() {
        let src = "import { __runSandboxFn } from \"@outpost/runtime\";\nexport async function f(a) { return __runSandboxFn({ fnId: \"f_12ab34cd\", args: [a] }); }\n// mentions \"use sandbox\" in a comment\n";
        let out = transform(src);
        assert_eq!(out.code, src);
        assert!(out.generated.is_none());
    }

    #[test]
    fn test_transform_prepends_runtime_import() {
        let src = "export async function f() { \"use sandbox\"; return 1; }";
        let out = transform(src);
        assert!(out
            .code
            .starts_with("import { __runSandboxFn } from \"@outpost/runtime\";\n"));
        let generated = out.generated.unwrap();
        assert_eq!(generated.source_rel_path, "app/api/x.ts");
        assert!(generated.content.contains("export async function f_"));
    }

    #[test]
    fn test_parse_failure_returns_original() {
        let src = "export async function broken( { \"use sandbox\";";
        let out = transform(src);
        assert_eq!(out.code, src);
        assert!(out.generated.is_none());
    }

    #[test]
    fn test_directive_in_sync_function_untouched() {
        let src = "function f() { \"use sandbox\"; return 1; }";
        let out = transform(src);
        assert_eq!(out.code, src);
        assert!(out.generated.is_none());
    }

    #[test]
    fn test_rel_path_feeds_ids() {
        let src = "export async function foo(a) { \"use sandbox\"; return a; }";
        let here = transform(src);
        let elsewhere = transform_source(
            Path::new("/project/app/api/y.ts"),
            src,
            &options(),
        )
        .unwrap();
        let id_here = extract_id(&here.code);
        let id_there = extract_id(&elsewhere.code);
        assert_ne!(id_here, id_there);
    }

    fn extract_id(code: &str) -> String {
        let start = code.find("fnId: \"").unwrap() + 7;
        let end = code[start..].find('"').unwrap() + start;
        code[start..end].to_string()
    }
}
