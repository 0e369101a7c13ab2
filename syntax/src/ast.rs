//! Module AST for the sandbox transform.
//!
//! This is deliberately not a general-purpose JavaScript AST: it records the
//! shapes the transform needs (imports, function definitions, scopes,
//! identifier references) and keeps byte spans into the original source so
//! the transformer can splice replacements without disturbing anything else.

use serde::{Deserialize, Serialize};

/// A half-open byte range into the original source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// The source text this span covers.
    #[must_use]
    pub fn text<'s>(&self, source: &'s str) -> &'s str {
        &source[self.start..self.end]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// One import declaration in the source module.
#[derive(Debug, Clone)]
pub struct ImportDecl {
    /// Full statement span, including the trailing semicolon when present.
    pub span: Span,
    /// The module specifier (the quoted string, unquoted).
    pub source: String,
    /// `import type … from …`.
    pub type_only: bool,
    /// Bound specifiers; empty for side-effect imports.
    pub specifiers: Vec<ImportSpecifier>,
}

impl ImportDecl {
    /// Names this import binds in module scope.
    pub fn local_names(&self) -> impl Iterator<Item = &str> {
        self.specifiers.iter().map(ImportSpecifier::local)
    }
}

/// A single bound name within an import declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSpecifier {
    /// `import local from "m"`.
    Default { local: String },
    /// `import * as local from "m"`.
    Namespace { local: String },
    /// `import { imported as local } from "m"`; `type_only` for inline
    /// `type` specifiers.
    Named {
        imported: String,
        local: String,
        type_only: bool,
    },
}

impl ImportSpecifier {
    #[must_use]
    pub fn local(&self) -> &str {
        match self {
            ImportSpecifier::Default { local }
            | ImportSpecifier::Namespace { local }
            | ImportSpecifier::Named { local, .. } => local,
        }
    }

    #[must_use]
    pub fn is_type_only(&self) -> bool {
        matches!(self, ImportSpecifier::Named { type_only: true, .. })
    }
}

/// How a function is defined in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// `function name(…) {…}` (possibly async), statement position.
    Declaration,
    /// `const name = function (…) {…}` (possibly async, possibly named).
    Expression,
    /// `const name = (…) => {…}` or a default-exported arrow.
    Arrow,
}

/// Export status of a top-level function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    None,
    Named,
    Default,
}

/// One formal parameter, kept verbatim plus a forwarding expression.
#[derive(Debug, Clone)]
pub struct Param {
    /// Verbatim source text of the parameter, annotations and defaults
    /// included.
    pub text: String,
    /// An expression that reproduces the bound value at a call site: the
    /// plain name for identifier parameters, a reconstructed pattern
    /// expression (defaults stripped) for destructured ones, `...name` for
    /// rest parameters.
    pub forward: String,
    /// Names this parameter binds.
    pub bound_names: Vec<String>,
}

/// A function definition, with nested definitions recorded recursively.
#[derive(Debug, Clone)]
pub struct FunctionNode {
    pub kind: FunctionKind,
    /// `None` only for anonymous function/arrow expressions (including an
    /// anonymous default export).
    pub name: Option<String>,
    pub is_async: bool,
    pub export: ExportKind,
    /// Replacement span: the whole definition for declarations, the
    /// initializer expression for variable-bound functions.
    pub span: Span,
    /// Verbatim text between the parameter parentheses.
    pub params_text: String,
    pub params: Vec<Param>,
    /// Interior of the body braces.
    pub body_span: Span,
    /// Span of the leading `"use sandbox"` directive statement, when present
    /// (string literal plus trailing semicolon).
    pub directive: Option<Span>,
    /// Names declared directly in this function's scope: parameters, local
    /// `var`/`let`/`const` bindings, nested function names, catch bindings.
    pub declared: Vec<String>,
    /// Identifier references appearing directly in this body, excluding the
    /// interiors of nested function definitions.
    pub references: Vec<String>,
    pub nested: Vec<FunctionNode>,
}

impl FunctionNode {
    /// Whether this function's body leads with the sandbox directive.
    #[must_use]
    pub fn is_annotated(&self) -> bool {
        self.directive.is_some()
    }

    /// All identifier references in this body, nested definitions included.
    #[must_use]
    pub fn references_recursive(&self) -> Vec<String> {
        let mut out = self.references.clone();
        for nested in &self.nested {
            out.extend(nested.references_recursive());
        }
        out
    }

    /// All names declared anywhere within this function, nested parameter
    /// and local declarations included.
    #[must_use]
    pub fn declared_recursive(&self) -> Vec<String> {
        let mut out = self.declared.clone();
        for nested in &self.nested {
            out.extend(nested.declared_recursive());
        }
        out
    }
}

/// A parsed source module.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub imports: Vec<ImportDecl>,
    /// Top-level function definitions (each carrying its nested tree).
    pub functions: Vec<FunctionNode>,
    /// Names declared in module scope: import bindings, top-level variables
    /// and function names.
    pub declared: Vec<String>,
    /// Module-scope names declared by the module itself (`const`/`let`/
    /// `var`/`function`/`class`), import bindings excluded. These form the
    /// outermost capturable scope: imports resolve by re-import instead.
    pub top_level_bindings: Vec<String>,
}

