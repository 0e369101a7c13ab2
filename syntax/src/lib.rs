//! Span-preserving parser for JavaScript/TypeScript modules.
//!
//! The sandbox transform needs to find annotated functions, understand
//! their lexical scopes, and splice replacement text back into the original
//! source. This crate provides exactly that: a lexer with byte spans, a
//! structural module parser that recognises imports and every function form
//! the directive can attach to, and an immutable scope chain for closure
//! analysis. Everything the transform does not need is skipped with
//! balanced-delimiter scanning, so arbitrary application code parses
//! without being understood.
//!
//! # Modules
//!
//! - [`lexer`] - Tokenizer with template-literal structure and spans
//! - [`ast`] - Module/function/import shapes with source spans
//! - [`parser`] - Structural parser and directive detection
//! - [`scope`] - Immutable cactus stack of lexical scopes
//! - [`error`] - Parse errors with caret diagnostics

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod scope;

pub use ast::{
    ExportKind, FunctionKind, FunctionNode, ImportDecl, ImportSpecifier, Module, Param, Span,
};
pub use error::{ErrorSpan, ParseError};
pub use parser::{parse_module, DIRECTIVE};
pub use scope::ScopeChain;
