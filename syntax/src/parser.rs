//! Structural parser for source modules.
//!
//! This is not a full JavaScript parser. It recognises exactly the shapes
//! the sandbox transform needs — import declarations, function definitions
//! in all the forms the directive can attach to, lexical declarations, and
//! identifier references — and skips everything else with balanced-delimiter
//! scanning. Spans always point into the original text, so callers can
//! splice replacements and leave the rest of the file byte-identical.
//!
//! # Module structure
//!
//! - imports: `parse_import` handles default/named/namespace/type-only forms
//! - functions: declarations, variable-bound expressions and arrows,
//!   default exports; nested definitions are parsed recursively
//! - scopes: each function body is scanned with a fresh context that
//!   records declared names and identifier references

use crate::ast::{
    ExportKind, FunctionKind, FunctionNode, ImportDecl, ImportSpecifier, Module, Param, Span,
};
use crate::error::{ErrorSpan, ParseError};
use crate::lexer::{string_value, tokenize, Token, TokenKind};

/// The sandbox directive literal.
pub const DIRECTIVE: &str = "use sandbox";

/// Reserved and contextual words that are never identifier references.
const KEYWORDS: &[&str] = &[
    "abstract", "any", "as", "asserts", "async", "await", "boolean", "break", "case", "catch",
    "class", "const", "continue", "debugger", "declare", "default", "delete", "do", "else",
    "enum", "export", "extends", "false", "finally", "for", "from", "function", "if",
    "implements", "import", "in", "infer", "instanceof", "interface", "is", "keyof", "let",
    "namespace", "never", "new", "null", "number", "object", "of", "package", "private",
    "protected", "public", "readonly", "return", "satisfies", "static", "string", "super",
    "switch", "symbol", "this", "throw", "true", "try", "type", "typeof", "undefined",
    "unknown", "var", "void", "while", "with", "yield",
];

/// Parse a source module.
///
/// # Errors
///
/// Returns a [`ParseError`] on lex failures or unbalanced delimiters. Per
/// the transform-skip policy, callers treat any error as "leave this file
/// alone".
pub fn parse_module(source: &str) -> Result<Module, ParseError> {
    let toks = tokenize(source)?;
    let parser = Parser { src: source, toks };
    parser.parse()
}

/// Scan context for one lexical scope.
#[derive(Default)]
struct ScanCtx {
    collect_refs: bool,
    declared: Vec<String>,
    references: Vec<String>,
    nested: Vec<FunctionNode>,
}

impl ScanCtx {
    fn scope(collect_refs: bool) -> Self {
        Self {
            collect_refs,
            ..Self::default()
        }
    }
}

/// Where an arrow's parameters live.
#[derive(Clone, Copy)]
enum ArrowParams {
    /// `(a, b) => …`: index of the opening paren.
    Parens(usize),
    /// `a => …`: index of the single identifier.
    Single(usize),
}

struct Parser<'s> {
    src: &'s str,
    toks: Vec<Token>,
}

impl<'s> Parser<'s> {
    // ------------------------------------------------------------------
    // Token access
    // ------------------------------------------------------------------

    fn kind(&self, i: usize) -> Option<TokenKind> {
        self.toks.get(i).map(|t| t.kind)
    }

    fn text(&self, i: usize) -> &'s str {
        self.toks.get(i).map_or("", |t| t.text(self.src))
    }

    fn is_word(&self, i: usize, word: &str) -> bool {
        self.kind(i) == Some(TokenKind::Ident) && self.text(i) == word
    }

    fn offset(&self, i: usize) -> usize {
        self.toks
            .get(i)
            .map_or(self.src.len(), |t| t.span.start)
    }

    fn err(&self, i: usize, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            span: ErrorSpan::from_offset(self.offset(i), self.src),
            message: message.into(),
        }
    }

    /// Find the matching closer for the opener at `open`. Template
    /// interpolations tokenize as distinct kinds, so same-kind counting is
    /// exact.
    fn matching(&self, open: usize) -> Result<usize, ParseError> {
        let open_kind = self.kind(open).ok_or_else(|| self.err(open, "expected opener"))?;
        let close_kind = match open_kind {
            TokenKind::LParen => TokenKind::RParen,
            TokenKind::LBrace => TokenKind::RBrace,
            TokenKind::LBracket => TokenKind::RBracket,
            TokenKind::TemplateStart => TokenKind::TemplateEnd,
            TokenKind::ExprStart => TokenKind::ExprEnd,
            other => {
                return Err(self.err(open, format!("token {other:?} is not an opener")));
            }
        };
        let mut depth = 0i32;
        let mut j = open;
        while j < self.toks.len() {
            let k = self.kind(j);
            if k == Some(open_kind) {
                depth += 1;
            } else if k == Some(close_kind) {
                depth -= 1;
                if depth == 0 {
                    return Ok(j);
                }
            }
            j += 1;
        }
        Err(ParseError::Unbalanced {
            span: ErrorSpan::from_offset(self.offset(open), self.src),
            message: format!("no matching {close_kind:?}"),
        })
    }

    fn depth_delta(kind: TokenKind) -> i32 {
        match kind {
            TokenKind::LParen
            | TokenKind::LBrace
            | TokenKind::LBracket
            | TokenKind::TemplateStart
            | TokenKind::ExprStart => 1,
            TokenKind::RParen
            | TokenKind::RBrace
            | TokenKind::RBracket
            | TokenKind::TemplateEnd
            | TokenKind::ExprEnd => -1,
            _ => 0,
        }
    }

    /// Whether the token at `i` continues the expression on the previous
    /// line (no automatic statement break before it).
    fn is_continuation(&self, i: usize) -> bool {
        match self.kind(i) {
            Some(
                TokenKind::Op
                | TokenKind::Assign
                | TokenKind::Arrow
                | TokenKind::Dot
                | TokenKind::OptionalDot
                | TokenKind::Comma
                | TokenKind::Colon
                | TokenKind::Ellipsis
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::TemplateStart,
            ) => true,
            Some(TokenKind::Ident) => matches!(self.text(i), "instanceof" | "in" | "as"),
            _ => false,
        }
    }

    fn at_statement_break(&self, i: usize, lo: usize) -> bool {
        i > lo
            && self.toks[i].newline_before
            && !self.is_continuation(i)
            && !self.is_continuation(i - 1)
    }

    /// Skip one statement, consuming a trailing semicolon when present.
    fn skip_statement(&self, lo: usize, hi: usize) -> usize {
        let mut depth = 0i32;
        let mut j = lo;
        while j < hi {
            let k = self.kind(j).unwrap_or(TokenKind::Semi);
            if depth == 0 {
                if k == TokenKind::Semi {
                    return j + 1;
                }
                if self.at_statement_break(j, lo) {
                    return j;
                }
            }
            let delta = Self::depth_delta(k);
            if depth + delta < 0 {
                return j;
            }
            depth += delta;
            j += 1;
        }
        hi
    }

    /// Index just past one expression: stops before a top-level comma or
    /// semicolon, a closing delimiter of the enclosing group, or a
    /// statement break.
    fn expression_end(&self, lo: usize, hi: usize) -> usize {
        let mut depth = 0i32;
        let mut j = lo;
        while j < hi {
            let k = self.kind(j).unwrap_or(TokenKind::Semi);
            if depth == 0 {
                if matches!(k, TokenKind::Semi | TokenKind::Comma) {
                    return j;
                }
                if self.at_statement_break(j, lo) {
                    return j;
                }
            }
            let delta = Self::depth_delta(k);
            if depth + delta < 0 {
                return j;
            }
            depth += delta;
            j += 1;
        }
        hi
    }

    // ------------------------------------------------------------------
    // Module level
    // ------------------------------------------------------------------

    fn parse(&self) -> Result<Module, ParseError> {
        let hi = self.toks.len();
        let mut module = Module::default();
        let mut ctx = ScanCtx::scope(false);
        let mut i = 0;
        while i < hi {
            match self.kind(i) {
                Some(TokenKind::Semi) => i += 1,
                Some(TokenKind::Ident) => match self.text(i) {
                    "import"
                        if !matches!(
                            self.kind(i + 1),
                            Some(TokenKind::LParen | TokenKind::Dot)
                        ) =>
                    {
                        let (decl, next) = self.parse_import(i)?;
                        module.imports.push(decl);
                        i = next;
                    }
                    "export" => i = self.parse_export(i, &mut ctx)?,
                    "async" if self.is_word(i + 1, "function") => {
                        i = self.parse_function_statement(i, ExportKind::None, &mut ctx)?;
                    }
                    "function" => {
                        i = self.parse_function_statement(i, ExportKind::None, &mut ctx)?;
                    }
                    "const" | "let" | "var" => {
                        i = self.parse_var_statement(i, ExportKind::None, &mut ctx)?;
                    }
                    "class" => {
                        if self.kind(i + 1) == Some(TokenKind::Ident) {
                            ctx.declared.push(self.text(i + 1).to_string());
                        }
                        i = self.skip_statement(i, hi);
                    }
                    _ => i = self.skip_statement(i, hi),
                },
                _ => i = self.skip_statement(i, hi),
            }
        }

        module.top_level_bindings = ctx.declared.clone();
        for import in &module.imports {
            for name in import.local_names() {
                ctx.declared.push(name.to_string());
            }
        }
        module.declared = ctx.declared;
        module.functions = ctx.nested;
        Ok(module)
    }

    fn parse_export(&self, i: usize, ctx: &mut ScanCtx) -> Result<usize, ParseError> {
        let j = i + 1;
        match self.text(j) {
            "default" => {
                let k = j + 1;
                if (self.is_word(k, "async") && self.is_word(k + 1, "function"))
                    || self.is_word(k, "function")
                {
                    self.parse_function_statement(k, ExportKind::Default, ctx)
                } else if let Some(next) =
                    self.try_function_value(k, None, ExportKind::Default, ctx)?
                {
                    Ok(next)
                } else {
                    Ok(self.skip_statement(i, self.toks.len()))
                }
            }
            "async" if self.is_word(j + 1, "function") => {
                self.parse_function_statement(j, ExportKind::Named, ctx)
            }
            "function" => self.parse_function_statement(j, ExportKind::Named, ctx),
            "const" | "let" | "var" => self.parse_var_statement(j, ExportKind::Named, ctx),
            "class" => {
                if self.kind(j + 1) == Some(TokenKind::Ident) {
                    ctx.declared.push(self.text(j + 1).to_string());
                }
                Ok(self.skip_statement(i, self.toks.len()))
            }
            _ => Ok(self.skip_statement(i, self.toks.len())),
        }
    }

    fn parse_import(&self, i: usize) -> Result<(ImportDecl, usize), ParseError> {
        let start = self.offset(i);
        let mut j = i + 1;
        let mut type_only = false;
        let mut specifiers = Vec::new();

        // Side-effect import: `import "m";`
        if self.kind(j) == Some(TokenKind::Str) {
            let source = string_value(self.text(j));
            j += 1;
            let end = self.finish_import_span(&mut j);
            return Ok((
                ImportDecl {
                    span: Span::new(start, end),
                    source,
                    type_only: false,
                    specifiers,
                },
                j,
            ));
        }

        if self.is_word(j, "type") && !self.is_word(j + 1, "from") {
            type_only = true;
            j += 1;
        }

        if self.kind(j) == Some(TokenKind::Ident) && !self.is_word(j, "from") {
            specifiers.push(ImportSpecifier::Default {
                local: self.text(j).to_string(),
            });
            j += 1;
            if self.kind(j) == Some(TokenKind::Comma) {
                j += 1;
            }
        }

        if self.kind(j) == Some(TokenKind::Op) && self.text(j) == "*" {
            if !self.is_word(j + 1, "as") || self.kind(j + 2) != Some(TokenKind::Ident) {
                return Err(self.err(j, "expected `* as name` in import"));
            }
            specifiers.push(ImportSpecifier::Namespace {
                local: self.text(j + 2).to_string(),
            });
            j += 3;
        } else if self.kind(j) == Some(TokenKind::LBrace) {
            let close = self.matching(j)?;
            let mut k = j + 1;
            while k < close {
                if self.kind(k) == Some(TokenKind::Comma) {
                    k += 1;
                    continue;
                }
                let mut spec_type_only = false;
                if self.is_word(k, "type")
                    && k + 1 < close
                    && self.kind(k + 1) == Some(TokenKind::Ident)
                    && !self.is_word(k + 1, "as")
                {
                    spec_type_only = true;
                    k += 1;
                }
                if self.kind(k) != Some(TokenKind::Ident) {
                    return Err(self.err(k, "expected import specifier name"));
                }
                let imported = self.text(k).to_string();
                k += 1;
                let mut local = imported.clone();
                if self.is_word(k, "as") && self.kind(k + 1) == Some(TokenKind::Ident) {
                    local = self.text(k + 1).to_string();
                    k += 2;
                }
                specifiers.push(ImportSpecifier::Named {
                    imported,
                    local,
                    type_only: spec_type_only,
                });
            }
            j = close + 1;
        }

        if !self.is_word(j, "from") {
            return Err(self.err(j, "expected `from` in import declaration"));
        }
        j += 1;
        if self.kind(j) != Some(TokenKind::Str) {
            return Err(self.err(j, "expected module specifier string"));
        }
        let source = string_value(self.text(j));
        j += 1;
        let end = self.finish_import_span(&mut j);

        Ok((
            ImportDecl {
                span: Span::new(start, end),
                source,
                type_only,
                specifiers,
            },
            j,
        ))
    }

    /// Consume an optional trailing semicolon; returns the end offset of
    /// the declaration.
    fn finish_import_span(&self, j: &mut usize) -> usize {
        if self.kind(*j) == Some(TokenKind::Semi) {
            *j += 1;
        }
        self.toks
            .get(*j - 1)
            .map_or(self.src.len(), |t| t.span.end)
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    /// Parse `function`/`async function` in statement position.
    fn parse_function_statement(
        &self,
        i: usize,
        export: ExportKind,
        ctx: &mut ScanCtx,
    ) -> Result<usize, ParseError> {
        self.parse_function_common(i, FunctionKind::Declaration, None, true, export, ctx)
    }

    /// Shared parser for `function` forms. `name_override` wins over the
    /// syntactic name when `use_syntactic_name` is false (variable-bound
    /// expressions take the binding's name).
    fn parse_function_common(
        &self,
        i: usize,
        kind: FunctionKind,
        name_override: Option<String>,
        use_syntactic_name: bool,
        export: ExportKind,
        ctx: &mut ScanCtx,
    ) -> Result<usize, ParseError> {
        let start = i;
        let is_async = self.is_word(i, "async");
        let mut j = if is_async { i + 1 } else { i };
        debug_assert!(self.is_word(j, "function"));
        j += 1;
        if self.kind(j) == Some(TokenKind::Op) && self.text(j) == "*" {
            j += 1;
        }
        let syntactic_name = if self.kind(j) == Some(TokenKind::Ident) {
            let name = self.text(j).to_string();
            j += 1;
            Some(name)
        } else {
            None
        };

        let name = if use_syntactic_name {
            syntactic_name.clone()
        } else {
            name_override
        };
        // A named function expression binds its own name inside the body.
        let self_binding = if kind == FunctionKind::Expression {
            syntactic_name
        } else {
            None
        };

        let (node, next) =
            self.parse_function_tail(start, j, kind, name, is_async, export, self_binding)?;
        if kind == FunctionKind::Declaration {
            if let Some(n) = &node.name {
                ctx.declared.push(n.clone());
            }
        }
        ctx.nested.push(node);
        Ok(next)
    }

    /// Parse parameters, optional return annotation and block body starting
    /// at the opening paren.
    #[allow(clippy::too_many_arguments)]
    fn parse_function_tail(
        &self,
        start: usize,
        lparen: usize,
        kind: FunctionKind,
        name: Option<String>,
        is_async: bool,
        export: ExportKind,
        self_binding: Option<String>,
    ) -> Result<(FunctionNode, usize), ParseError> {
        if self.kind(lparen) != Some(TokenKind::LParen) {
            return Err(self.err(lparen, "expected parameter list"));
        }
        let rparen = self.matching(lparen)?;
        let params = self.parse_params(lparen + 1, rparen)?;
        let params_text = self.src[self.toks[lparen].span.end..self.toks[rparen].span.start]
            .to_string();

        let mut j = rparen + 1;
        if self.kind(j) == Some(TokenKind::Colon) {
            j = self.skip_return_annotation(j + 1)?;
        }
        if self.kind(j) != Some(TokenKind::LBrace) {
            return Err(self.err(j, "expected function body"));
        }
        let rbrace = self.matching(j)?;

        self.finish_function_node(
            start,
            j,
            rbrace,
            kind,
            name,
            is_async,
            export,
            params,
            params_text,
            self_binding,
        )
        .map(|node| (node, rbrace + 1))
    }

    /// Build a function node from a parsed body window, scanning the body
    /// for declarations, references and nested definitions.
    #[allow(clippy::too_many_arguments)]
    fn finish_function_node(
        &self,
        start: usize,
        lbrace: usize,
        rbrace: usize,
        kind: FunctionKind,
        name: Option<String>,
        is_async: bool,
        export: ExportKind,
        params: Vec<Param>,
        params_text: String,
        self_binding: Option<String>,
    ) -> Result<FunctionNode, ParseError> {
        let body_span = Span::new(self.toks[lbrace].span.end, self.toks[rbrace].span.start);
        let directive = self.detect_directive(lbrace + 1, rbrace);

        let mut body_ctx = ScanCtx::scope(true);
        for param in &params {
            body_ctx.declared.extend(param.bound_names.iter().cloned());
        }
        body_ctx.declared.extend(self_binding);
        self.scan_range(lbrace + 1, rbrace, &mut body_ctx)?;

        Ok(FunctionNode {
            kind,
            name,
            is_async,
            export,
            span: Span::new(self.toks[start].span.start, self.toks[rbrace].span.end),
            params_text,
            params,
            body_span,
            directive,
            declared: body_ctx.declared,
            references: body_ctx.references,
            nested: body_ctx.nested,
        })
    }

    /// Detect a leading `"use sandbox"` directive in a body window.
    fn detect_directive(&self, lo: usize, hi: usize) -> Option<Span> {
        if lo >= hi || self.kind(lo) != Some(TokenKind::Str) {
            return None;
        }
        if string_value(self.text(lo)) != DIRECTIVE {
            return None;
        }
        let str_span = self.toks[lo].span;
        if lo + 1 >= hi {
            return Some(str_span);
        }
        if self.kind(lo + 1) == Some(TokenKind::Semi) {
            return Some(Span::new(str_span.start, self.toks[lo + 1].span.end));
        }
        if self.toks[lo + 1].newline_before {
            return Some(str_span);
        }
        None
    }

    /// Skip a return-type annotation; returns the index of the body brace.
    fn skip_return_annotation(&self, i: usize) -> Result<usize, ParseError> {
        let mut j = i;
        // An object type directly after the colon: `(): { a: string } {`.
        if self.kind(j) == Some(TokenKind::LBrace) {
            j = self.matching(j)? + 1;
        }
        let mut depth = 0i32;
        let mut angle = 0i32;
        while j < self.toks.len() {
            match self.kind(j) {
                Some(TokenKind::LBrace) if depth == 0 && angle == 0 => return Ok(j),
                Some(TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace) => depth += 1,
                Some(TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace) => depth -= 1,
                Some(TokenKind::Op) => match self.text(j) {
                    "<" => angle += 1,
                    ">" => angle = (angle - 1).max(0),
                    ">>" => angle = (angle - 2).max(0),
                    _ => {}
                },
                None => break,
                _ => {}
            }
            j += 1;
        }
        Err(self.err(i, "expected function body after return annotation"))
    }

    // ------------------------------------------------------------------
    // Arrows and function values
    // ------------------------------------------------------------------

    /// If the paren group at `lparen` is an arrow parameter list, return
    /// the index of the `=>` token.
    fn arrow_after(&self, lparen: usize) -> Result<Option<usize>, ParseError> {
        let rparen = self.matching(lparen)?;
        let mut j = rparen + 1;
        if self.kind(j) == Some(TokenKind::Arrow) {
            return Ok(Some(j));
        }
        if self.kind(j) != Some(TokenKind::Colon) {
            return Ok(None);
        }
        // Possible arrow return annotation: `(x): T => …`.
        j += 1;
        let mut depth = 0i32;
        let mut angle = 0i32;
        while j < self.toks.len() {
            match self.kind(j) {
                Some(TokenKind::Arrow) if depth == 0 && angle == 0 => return Ok(Some(j)),
                Some(TokenKind::Semi | TokenKind::Comma) if depth == 0 && angle == 0 => {
                    return Ok(None)
                }
                Some(k) => {
                    let delta = Self::depth_delta(k);
                    if depth + delta < 0 {
                        return Ok(None);
                    }
                    depth += delta;
                    if k == TokenKind::Op {
                        match self.text(j) {
                            "<" => angle += 1,
                            ">" => angle = (angle - 1).max(0),
                            ">>" => angle = (angle - 2).max(0),
                            _ => {}
                        }
                    }
                }
                None => return Ok(None),
            }
            j += 1;
        }
        Ok(None)
    }

    /// Try to parse an arrow function starting at `i` (at `async`, an
    /// opening paren, or a single identifier parameter). Returns the next
    /// index when an arrow was recognised.
    fn try_arrow(
        &self,
        i: usize,
        name: Option<String>,
        export: ExportKind,
        ctx: &mut ScanCtx,
    ) -> Result<Option<usize>, ParseError> {
        let (is_async, p) = if self.is_word(i, "async") {
            (true, i + 1)
        } else {
            (false, i)
        };
        let (params, arrow_idx) = match self.kind(p) {
            Some(TokenKind::LParen) => match self.arrow_after(p)? {
                Some(a) => (ArrowParams::Parens(p), a),
                None => return Ok(None),
            },
            Some(TokenKind::Ident) if self.kind(p + 1) == Some(TokenKind::Arrow) => {
                (ArrowParams::Single(p), p + 1)
            }
            _ => return Ok(None),
        };
        self.finish_arrow(i, params, arrow_idx, is_async, name, export, ctx)
            .map(Some)
    }

    /// Complete an arrow at a known `=>`. Block bodies become full function
    /// nodes; expression bodies contribute no scope, so their parameters
    /// are skipped and scanning resumes at the body expression.
    #[allow(clippy::too_many_arguments)]
    fn finish_arrow(
        &self,
        start: usize,
        params: ArrowParams,
        arrow_idx: usize,
        is_async: bool,
        name: Option<String>,
        export: ExportKind,
        ctx: &mut ScanCtx,
    ) -> Result<usize, ParseError> {
        if self.kind(arrow_idx + 1) != Some(TokenKind::LBrace) {
            return Ok(arrow_idx + 1);
        }
        let lbrace = arrow_idx + 1;
        let rbrace = self.matching(lbrace)?;

        let (parsed, params_text) = match params {
            ArrowParams::Parens(lparen) => {
                let rparen = self.matching(lparen)?;
                (
                    self.parse_params(lparen + 1, rparen)?,
                    self.src[self.toks[lparen].span.end..self.toks[rparen].span.start]
                        .to_string(),
                )
            }
            ArrowParams::Single(idx) => {
                let pname = self.text(idx).to_string();
                (
                    vec![Param {
                        text: pname.clone(),
                        forward: pname.clone(),
                        bound_names: vec![pname.clone()],
                    }],
                    pname,
                )
            }
        };

        let node = self.finish_function_node(
            start,
            lbrace,
            rbrace,
            FunctionKind::Arrow,
            name,
            is_async,
            export,
            parsed,
            params_text,
            None,
        )?;
        ctx.nested.push(node);
        Ok(rbrace + 1)
    }

    /// Try to parse a function-valued initializer at `i`. Returns the index
    /// to continue scanning from when a function form was recognised.
    fn try_function_value(
        &self,
        i: usize,
        name: Option<String>,
        export: ExportKind,
        ctx: &mut ScanCtx,
    ) -> Result<Option<usize>, ParseError> {
        if (self.is_word(i, "async") && self.is_word(i + 1, "function"))
            || self.is_word(i, "function")
        {
            return self
                .parse_function_common(i, FunctionKind::Expression, name, false, export, ctx)
                .map(Some);
        }
        self.try_arrow(i, name, export, ctx)
    }

    // ------------------------------------------------------------------
    // Statements and declarations
    // ------------------------------------------------------------------

    /// Parse a `const`/`let`/`var` statement, registering bindings and
    /// parsing function-valued initializers.
    fn parse_var_statement(
        &self,
        i: usize,
        export: ExportKind,
        ctx: &mut ScanCtx,
    ) -> Result<usize, ParseError> {
        let hi = self.toks.len();
        let mut j = i + 1;
        loop {
            let simple_name;
            match self.kind(j) {
                Some(TokenKind::Ident) => {
                    let name = self.text(j).to_string();
                    simple_name = Some(name.clone());
                    ctx.declared.push(name);
                    j += 1;
                }
                Some(TokenKind::LBrace | TokenKind::LBracket) => {
                    let close = self.matching(j)?;
                    let names = self.pattern_names(j, close + 1);
                    ctx.declared.extend(names);
                    simple_name = None;
                    j = close + 1;
                }
                _ => return Ok(self.skip_statement(j, hi)),
            }

            if self.kind(j) == Some(TokenKind::Op) && self.text(j) == "!" {
                j += 1;
            }
            if self.kind(j) == Some(TokenKind::Colon) {
                j = self.skip_declarator_annotation(j + 1, hi);
            }
            if self.kind(j) == Some(TokenKind::Assign) {
                j += 1;
                if let Some(next) = self.try_function_value(j, simple_name, export, ctx)? {
                    j = self.scan_expression(next, hi, ctx)?;
                } else {
                    j = self.scan_expression(j, hi, ctx)?;
                }
            }

            if self.kind(j) == Some(TokenKind::Comma) {
                j += 1;
                continue;
            }
            break;
        }
        if self.kind(j) == Some(TokenKind::Semi) {
            j += 1;
        }
        Ok(j)
    }

    /// Skip a declarator type annotation. Stops before `=`, a top-level
    /// comma, a semicolon or a statement break.
    fn skip_declarator_annotation(&self, lo: usize, hi: usize) -> usize {
        let mut depth = 0i32;
        let mut angle = 0i32;
        let mut j = lo;
        while j < hi {
            let k = self.kind(j).unwrap_or(TokenKind::Semi);
            if depth == 0 && angle == 0 {
                if matches!(k, TokenKind::Assign | TokenKind::Comma | TokenKind::Semi) {
                    return j;
                }
                if self.at_statement_break(j, lo) {
                    return j;
                }
            }
            let delta = Self::depth_delta(k);
            if depth + delta < 0 {
                return j;
            }
            depth += delta;
            if k == TokenKind::Op {
                match self.text(j) {
                    "<" => angle += 1,
                    ">" => angle = (angle - 1).max(0),
                    ">>" => angle = (angle - 2).max(0),
                    _ => {}
                }
            }
            j += 1;
        }
        hi
    }

    /// Scan one expression for references and nested functions; returns
    /// the index just past it.
    fn scan_expression(
        &self,
        lo: usize,
        hi: usize,
        ctx: &mut ScanCtx,
    ) -> Result<usize, ParseError> {
        let end = self.expression_end(lo, hi);
        self.scan_range(lo, end, ctx)?;
        Ok(end)
    }

    /// Scan a token window, collecting declarations, references and nested
    /// function definitions into `ctx`.
    fn scan_range(&self, lo: usize, hi: usize, ctx: &mut ScanCtx) -> Result<(), ParseError> {
        let mut i = lo;
        while i < hi {
            match self.kind(i) {
                Some(TokenKind::Ident) => {
                    let text = self.text(i);
                    match text {
                        "function" => {
                            let kind = if self.statement_position(i, lo) {
                                FunctionKind::Declaration
                            } else {
                                FunctionKind::Expression
                            };
                            let use_syntactic = kind == FunctionKind::Declaration;
                            i = self.parse_function_common(
                                i,
                                kind,
                                None,
                                use_syntactic,
                                ExportKind::None,
                                ctx,
                            )?;
                        }
                        "async" if self.is_word(i + 1, "function") => {
                            let kind = if self.statement_position(i, lo) {
                                FunctionKind::Declaration
                            } else {
                                FunctionKind::Expression
                            };
                            let use_syntactic = kind == FunctionKind::Declaration;
                            i = self.parse_function_common(
                                i,
                                kind,
                                None,
                                use_syntactic,
                                ExportKind::None,
                                ctx,
                            )?;
                        }
                        "async" => match self.try_arrow(i, None, ExportKind::None, ctx)? {
                            Some(next) => i = next,
                            None => i += 1,
                        },
                        "const" | "let" | "var" => {
                            i = self.parse_var_statement(i, ExportKind::None, ctx)?;
                        }
                        "catch" if self.kind(i + 1) == Some(TokenKind::LParen) => {
                            let rparen = self.matching(i + 1)?;
                            let names = self.pattern_names(i + 2, rparen);
                            ctx.declared.extend(names);
                            i = rparen + 1;
                        }
                        "class" => {
                            if self.kind(i + 1) == Some(TokenKind::Ident) {
                                ctx.declared.push(self.text(i + 1).to_string());
                                i += 2;
                            } else {
                                i += 1;
                            }
                        }
                        _ if KEYWORDS.contains(&text) => i += 1,
                        _ => {
                            if self.kind(i + 1) == Some(TokenKind::Arrow) {
                                match self.try_arrow(i, None, ExportKind::None, ctx)? {
                                    Some(next) => i = next,
                                    None => i += 1,
                                }
                            } else {
                                let prev = if i > 0 { self.kind(i - 1) } else { None };
                                let is_property =
                                    matches!(prev, Some(TokenKind::Dot | TokenKind::OptionalDot));
                                let is_object_key = self.kind(i + 1) == Some(TokenKind::Colon)
                                    && matches!(
                                        prev,
                                        Some(TokenKind::LBrace | TokenKind::Comma)
                                    );
                                if ctx.collect_refs && !is_property && !is_object_key {
                                    ctx.references.push(text.to_string());
                                }
                                i += 1;
                            }
                        }
                    }
                }
                Some(TokenKind::LParen) => {
                    if self.arrow_after(i)?.is_some() {
                        match self.try_arrow(i, None, ExportKind::None, ctx)? {
                            Some(next) => i = next,
                            None => i += 1,
                        }
                    } else {
                        i += 1;
                    }
                }
                Some(TokenKind::Dot | TokenKind::OptionalDot) => {
                    // Consume the property name so keyword-named properties
                    // don't reach the identifier arms.
                    i += if self.kind(i + 1) == Some(TokenKind::Ident) {
                        2
                    } else {
                        1
                    };
                }
                _ => i += 1,
            }
        }
        Ok(())
    }

    /// Whether the token at `i` begins a statement (as opposed to sitting
    /// inside an expression).
    fn statement_position(&self, i: usize, lo: usize) -> bool {
        if i == lo {
            return true;
        }
        match self.kind(i - 1) {
            Some(TokenKind::Semi | TokenKind::LBrace | TokenKind::RBrace) => true,
            _ => self.toks[i].newline_before && !self.is_continuation(i - 1),
        }
    }

    // ------------------------------------------------------------------
    // Parameters and binding patterns
    // ------------------------------------------------------------------

    /// Parse a parameter list window (between the parens).
    fn parse_params(&self, lo: usize, hi: usize) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        for (s, e) in self.split_top_level_commas(lo, hi) {
            if s >= e {
                continue;
            }
            let rest = self.kind(s) == Some(TokenKind::Ellipsis);
            let ps = if rest { s + 1 } else { s };

            // Top-level annotation / default boundaries.
            let mut colon = None;
            let mut assign = None;
            let mut depth = 0i32;
            let mut angle = 0i32;
            for j in ps..e {
                match self.kind(j) {
                    Some(TokenKind::Colon)
                        if depth == 0 && angle == 0 && colon.is_none() && assign.is_none() =>
                    {
                        colon = Some(j);
                    }
                    Some(TokenKind::Assign) if depth == 0 && angle == 0 && assign.is_none() => {
                        assign = Some(j);
                    }
                    Some(k) => {
                        depth += Self::depth_delta(k);
                        if k == TokenKind::Op {
                            match self.text(j) {
                                "<" => angle += 1,
                                ">" => angle = (angle - 1).max(0),
                                ">>" => angle = (angle - 2).max(0),
                                _ => {}
                            }
                        }
                    }
                    None => {}
                }
            }

            let mut pat_end = colon.or(assign).unwrap_or(e);
            // TS optional marker: `x?: T`.
            if pat_end > ps
                && self.kind(pat_end - 1) == Some(TokenKind::Op)
                && self.text(pat_end - 1) == "?"
            {
                pat_end -= 1;
            }

            let bound_names = self.pattern_names(ps, pat_end);
            let forward_core =
                if pat_end - ps == 1 && self.kind(ps) == Some(TokenKind::Ident) {
                    self.text(ps).to_string()
                } else {
                    self.pattern_expression(ps, pat_end)
                };
            let forward = if rest {
                format!("...{forward_core}")
            } else {
                forward_core
            };
            let text = self.src[self.toks[s].span.start..self.toks[e - 1].span.end].to_string();

            params.push(Param {
                text,
                forward,
                bound_names,
            });
        }
        Ok(params)
    }

    /// Split a window at top-level commas (delimiter- and angle-aware).
    fn split_top_level_commas(&self, lo: usize, hi: usize) -> Vec<(usize, usize)> {
        let mut pieces = Vec::new();
        let mut depth = 0i32;
        let mut angle = 0i32;
        let mut start = lo;
        for j in lo..hi {
            match self.kind(j) {
                Some(TokenKind::Comma) if depth == 0 && angle == 0 => {
                    pieces.push((start, j));
                    start = j + 1;
                }
                Some(k) => {
                    depth += Self::depth_delta(k);
                    if k == TokenKind::Op {
                        match self.text(j) {
                            "<" => angle += 1,
                            ">" => angle = (angle - 1).max(0),
                            ">>" => angle = (angle - 2).max(0),
                            _ => {}
                        }
                    }
                }
                None => {}
            }
        }
        pieces.push((start, hi));
        pieces
    }

    /// Names bound by a binding pattern window.
    fn pattern_names(&self, lo: usize, hi: usize) -> Vec<String> {
        let mut names = Vec::new();
        let mut i = lo;
        while i < hi {
            match self.kind(i) {
                Some(TokenKind::Assign) => i = self.skip_default(i + 1, hi),
                Some(TokenKind::Ident) => {
                    let text = self.text(i);
                    // `key:` introduces the nested binding that follows.
                    if self.kind(i + 1) != Some(TokenKind::Colon)
                        && !KEYWORDS.contains(&text)
                    {
                        names.push(text.to_string());
                    }
                    i += 1;
                }
                _ => i += 1,
            }
        }
        names
    }

    /// Skip a default-value expression inside a pattern: stops at a comma
    /// at the same depth or the enclosing closer.
    fn skip_default(&self, lo: usize, hi: usize) -> usize {
        let mut depth = 0i32;
        let mut j = lo;
        while j < hi {
            let k = self.kind(j).unwrap_or(TokenKind::Comma);
            if depth == 0 && k == TokenKind::Comma {
                return j;
            }
            let delta = Self::depth_delta(k);
            if depth + delta < 0 {
                return j;
            }
            depth += delta;
            j += 1;
        }
        hi
    }

    /// Reconstruct a pattern window as an expression: verbatim text with
    /// default values removed (`{a = 1, b: c}` → `{a, b: c}`).
    fn pattern_expression(&self, lo: usize, hi: usize) -> String {
        let mut out = String::new();
        let mut i = lo;
        while i < hi {
            if self.kind(i) == Some(TokenKind::Assign) {
                i = self.skip_default(i + 1, hi);
                continue;
            }
            let text = self.text(i);
            let needs_space = out
                .chars()
                .last()
                .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
                && text
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$');
            if needs_space {
                out.push(' ');
            }
            out.push_str(text);
            if matches!(self.kind(i), Some(TokenKind::Comma | TokenKind::Colon)) {
                out.push(' ');
            }
            i += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Module {
        parse_module(source).expect("parse failed")
    }

    fn only_fn(module: &Module) -> &FunctionNode {
        assert_eq!(module.functions.len(), 1, "expected exactly one function");
        &module.functions[0]
    }

    #[test]
    fn test_parse_async_function_declaration() {
        let m = parse("export async function readFile(path) { \"use sandbox\"; return path.length; }");
        let f = only_fn(&m);
        assert_eq!(f.name.as_deref(), Some("readFile"));
        assert!(f.is_async);
        assert_eq!(f.export, ExportKind::Named);
        assert_eq!(f.kind, FunctionKind::Declaration);
        assert!(f.is_annotated());
        assert_eq!(f.params.len(), 1);
        assert_eq!(f.params[0].forward, "path");
    }

    #[test]
    fn test_directive_requires_first_statement() {
        let m = parse("async function f() { const x = 1; \"use sandbox\"; }");
        assert!(!only_fn(&m).is_annotated());
    }

    #[test]
    fn test_directive_single_quotes() {
        let m = parse("async function f() { 'use sandbox'\n return 1; }");
        assert!(only_fn(&m).is_annotated());
    }

    #[test]
    fn test_default_export_function() {
        let m = parse("export default async function main(a, b) { \"use sandbox\"; return a + b; }");
        let f = only_fn(&m);
        assert_eq!(f.export, ExportKind::Default);
        assert_eq!(f.name.as_deref(), Some("main"));
    }

    #[test]
    fn test_anonymous_default_export_arrow() {
        let m = parse("export default async () => { \"use sandbox\"; return 1; }");
        let f = only_fn(&m);
        assert_eq!(f.export, ExportKind::Default);
        assert!(f.name.is_none());
        assert!(f.is_annotated());
    }

    #[test]
    fn test_var_bound_arrow() {
        let m = parse("const greet = async (name) => { \"use sandbox\"; return `hi ${name}`; };");
        let f = only_fn(&m);
        assert_eq!(f.name.as_deref(), Some("greet"));
        assert_eq!(f.kind, FunctionKind::Arrow);
        assert!(f.is_annotated());
        assert!(m.declared.contains(&"greet".to_string()));
    }

    #[test]
    fn test_var_bound_function_expression() {
        let m = parse("const g = async function inner(x) { return x; };");
        let f = only_fn(&m);
        assert_eq!(f.name.as_deref(), Some("g"));
        assert_eq!(f.kind, FunctionKind::Expression);
        // The inner name is visible inside the body only.
        assert!(f.declared.contains(&"inner".to_string()));
    }

    #[test]
    fn test_nested_function_collected() {
        let m = parse(
            "async function outer(prefix) { async function inner(x) { \"use sandbox\"; return prefix + x; } return inner(\"y\"); }",
        );
        let outer = only_fn(&m);
        assert_eq!(outer.nested.len(), 1);
        let inner = &outer.nested[0];
        assert_eq!(inner.name.as_deref(), Some("inner"));
        assert!(inner.is_annotated());
        assert!(outer.declared.contains(&"inner".to_string()));
        assert!(outer.declared.contains(&"prefix".to_string()));
        assert!(inner.references.contains(&"prefix".to_string()));
    }

    #[test]
    fn test_references_exclude_properties_and_keys() {
        let m = parse("async function f(a) { return { key: a, other: b.c }; }");
        let f = only_fn(&m);
        assert!(f.references.contains(&"a".to_string()));
        assert!(f.references.contains(&"b".to_string()));
        assert!(!f.references.contains(&"key".to_string()));
        assert!(!f.references.contains(&"other".to_string()));
        assert!(!f.references.contains(&"c".to_string()));
    }

    #[test]
    fn test_shorthand_object_is_reference() {
        let m = parse("async function f() { return { shorthand }; }");
        assert!(only_fn(&m)
            .references
            .contains(&"shorthand".to_string()));
    }

    #[test]
    fn test_local_declarations_recorded() {
        let m = parse("async function f() { const a = 1; let { b, c: d } = obj; var [e] = arr; }");
        let f = only_fn(&m);
        for name in ["a", "b", "d", "e"] {
            assert!(f.declared.contains(&name.to_string()), "missing {name}");
        }
        assert!(!f.declared.contains(&"c".to_string()));
    }

    #[test]
    fn test_expression_arrow_contributes_no_scope() {
        let m = parse("async function f(xs) { return xs.map(x => x + offset); }");
        let f = only_fn(&m);
        assert!(f.nested.is_empty());
        assert!(f.references.contains(&"offset".to_string()));
    }

    #[test]
    fn test_block_arrow_callback_creates_scope() {
        let m = parse("async function f(xs) { return xs.map((x) => { return x * scale; }); }");
        let f = only_fn(&m);
        assert_eq!(f.nested.len(), 1);
        let cb = &f.nested[0];
        assert!(cb.name.is_none());
        assert!(cb.declared.contains(&"x".to_string()));
        assert!(cb.references.contains(&"scale".to_string()));
    }

    #[test]
    fn test_imports_parsed() {
        let m = parse(
            "import fs from \"node:fs\";\nimport { join, type Sep } from \"path\";\nimport type { Opts } from \"./opts\";\nimport * as os from \"os\";\nimport \"./side-effect\";\n",
        );
        assert_eq!(m.imports.len(), 5);
        assert_eq!(m.imports[0].source, "node:fs");
        assert_eq!(
            m.imports[0].specifiers,
            vec![ImportSpecifier::Default {
                local: "fs".into()
            }]
        );
        assert!(m.imports[1]
            .specifiers
            .iter()
            .any(|s| matches!(s, ImportSpecifier::Named { local, type_only: true, .. } if local == "Sep")));
        assert!(m.imports[2].type_only);
        assert!(matches!(
            m.imports[3].specifiers[0],
            ImportSpecifier::Namespace { .. }
        ));
        assert!(m.imports[4].specifiers.is_empty());
        assert!(m.declared.contains(&"join".to_string()));
    }

    #[test]
    fn test_destructured_params() {
        let m = parse("async function f({ a, b = 1, c: d }, [e, f2], rest = 9) { return a; }");
        let f = only_fn(&m);
        assert_eq!(f.params.len(), 3);
        assert_eq!(f.params[0].text, "{ a, b = 1, c: d }");
        assert_eq!(f.params[0].forward, "{a, b, c: d}");
        assert_eq!(f.params[0].bound_names, vec!["a", "b", "d"]);
        assert_eq!(f.params[1].forward, "[e, f2]");
        assert_eq!(f.params[2].forward, "rest");
        assert_eq!(f.params[2].text, "rest = 9");
    }

    #[test]
    fn test_rest_param() {
        let m = parse("async function f(a, ...rest) { return rest; }");
        let f = only_fn(&m);
        assert_eq!(f.params[1].forward, "...rest");
        assert_eq!(f.params[1].bound_names, vec!["rest"]);
    }

    #[test]
    fn test_typescript_annotations() {
        let m = parse(
            "async function f(path: string, opts?: { deep: boolean }): Promise<number> { return path.length; }",
        );
        let f = only_fn(&m);
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[0].forward, "path");
        assert_eq!(f.params[0].text, "path: string");
        assert_eq!(f.params[1].forward, "opts");
        assert!(f.references.contains(&"path".to_string()) || f.declared.contains(&"path".to_string()));
    }

    #[test]
    fn test_generic_type_annotation_with_comma() {
        let m = parse("async function f(m: Map<string, number>, x) { return x; }");
        let f = only_fn(&m);
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[0].forward, "m");
        assert_eq!(f.params[1].forward, "x");
    }

    #[test]
    fn test_no_functions_in_plain_module() {
        let m = parse("const a = 1;\nconsole.log(a);\n");
        assert!(m.functions.is_empty());
        assert!(m.declared.contains(&"a".to_string()));
    }

    #[test]
    fn test_top_level_bindings_exclude_imports() {
        let m = parse(
            "import { join } from \"path\";\nconst limit = 10;\nexport class Task {}\nfunction helper() { return 1; }\n",
        );
        for name in ["limit", "Task", "helper"] {
            assert!(
                m.top_level_bindings.contains(&name.to_string()),
                "missing {name}"
            );
        }
        assert!(!m.top_level_bindings.contains(&"join".to_string()));
        // `declared` still carries everything, imports included.
        assert!(m.declared.contains(&"join".to_string()));
        assert!(m.declared.contains(&"limit".to_string()));
    }

    #[test]
    fn test_template_interpolation_references() {
        let m = parse("async function f(name) { return `hello ${title} ${name}`; }");
        let f = only_fn(&m);
        assert!(f.references.contains(&"title".to_string()));
        assert!(f.references.contains(&"name".to_string()));
    }

    #[test]
    fn test_catch_binding_is_declared() {
        let m = parse("async function f() { try { go(); } catch (err) { return err; } }");
        let f = only_fn(&m);
        assert!(f.declared.contains(&"err".to_string()));
    }

    #[test]
    fn test_body_span_and_directive_span() {
        let src = "async function f() { \"use sandbox\"; return 1; }";
        let m = parse(src);
        let f = only_fn(&m);
        let body = f.body_span.text(src);
        assert!(body.contains("use sandbox"));
        let directive = f.directive.unwrap().text(src);
        assert_eq!(directive, "\"use sandbox\";");
    }
}
