//! Tokenizer for JavaScript/TypeScript module source.
//!
//! Produces a flat token stream with byte spans. Template literals are
//! tokenized structurally: the literal text pieces become `TemplateChunk`
//! tokens and the interpolation expressions are tokenized normally between
//! `ExprStart`/`ExprEnd` markers, so brace balancing in the parser is never
//! confused by `${…}`. The `/` ambiguity (regex versus division) is resolved
//! with the usual previous-token heuristic.

use crate::ast::Span;
use crate::error::{ErrorSpan, ParseError};

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword; the parser classifies by text.
    Ident,
    /// String literal, quotes included in the span.
    Str,
    /// Numeric literal.
    Num,
    /// Regular expression literal, flags included.
    Regex,
    /// Literal text piece of a template literal (backticks excluded).
    TemplateChunk,
    /// Opening backtick of a template literal.
    TemplateStart,
    /// Closing backtick of a template literal.
    TemplateEnd,
    /// `${` opening an interpolation.
    ExprStart,
    /// `}` closing an interpolation.
    ExprEnd,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,
    /// `?.`
    OptionalDot,
    /// `=>`
    Arrow,
    /// Single `=` only; compound assignment and comparison lex as `Op`.
    Assign,
    /// `...`
    Ellipsis,
    /// Any other operator or punctuator.
    Op,
}

/// One token with its byte span.
#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// Whether a line terminator occurred between the previous token and
    /// this one.
    pub newline_before: bool,
}

impl Token {
    /// Source text of this token.
    #[must_use]
    pub fn text<'s>(&self, source: &'s str) -> &'s str {
        self.span.text(source)
    }
}

/// Decode the value of a string-literal token (outer quotes removed, no
/// escape processing beyond `\"`, `\'` and `\\`).
#[must_use]
pub fn string_value(token_text: &str) -> String {
    let inner = &token_text[1..token_text.len().saturating_sub(1)];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Multi-character punctuators, longest first so greedy matching works.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>",
];

/// Keywords after which a `/` starts a regex rather than division.
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "case", "do", "else",
    "yield", "await", "throw",
];

struct Lexer<'s> {
    src: &'s str,
    bytes: &'s [u8],
    pos: usize,
    tokens: Vec<Token>,
    newline_pending: bool,
    /// One entry per template literal currently inside an interpolation;
    /// the value is the brace nesting depth within that interpolation.
    template_stack: Vec<u32>,
}

/// Tokenize a whole module source.
///
/// # Errors
///
/// Returns a [`ParseError::Lex`] for unterminated strings, templates,
/// comments or regular expressions.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer {
        src: source,
        bytes: source.as_bytes(),
        pos: 0,
        tokens: Vec::new(),
        newline_pending: false,
        template_stack: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl<'s> Lexer<'s> {
    fn run(&mut self) -> Result<(), ParseError> {
        while self.pos < self.bytes.len() {
            self.skip_trivia()?;
            if self.pos >= self.bytes.len() {
                break;
            }
            self.lex_token()?;
        }
        Ok(())
    }

    fn error(&self, at: usize, message: impl Into<String>) -> ParseError {
        ParseError::Lex {
            span: ErrorSpan::from_offset(at, self.src),
            message: message.into(),
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize, end: usize) {
        self.tokens.push(Token {
            kind,
            span: Span::new(start, end),
            newline_before: self.newline_pending,
        });
        self.newline_pending = false;
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek(0) {
                Some(b'\n') => {
                    self.newline_pending = true;
                    self.pos += 1;
                }
                Some(c) if c.is_ascii_whitespace() => self.pos += 1,
                Some(b'/') if self.peek(1) == Some(b'/') => {
                    while let Some(c) = self.peek(0) {
                        if c == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek(1) == Some(b'*') => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        match self.peek(0) {
                            Some(b'*') if self.peek(1) == Some(b'/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(b'\n') => {
                                self.newline_pending = true;
                                self.pos += 1;
                            }
                            Some(_) => self.pos += 1,
                            None => return Err(self.error(start, "unterminated block comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_token(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let c = self.bytes[self.pos];

        match c {
            b'"' | b'\'' => self.lex_string(c),
            b'`' => {
                self.push(TokenKind::TemplateStart, start, start + 1);
                self.pos += 1;
                self.lex_template_text()
            }
            b'{' => {
                if let Some(depth) = self.template_stack.last_mut() {
                    *depth += 1;
                }
                self.push(TokenKind::LBrace, start, start + 1);
                self.pos += 1;
                Ok(())
            }
            b'}' => {
                match self.template_stack.last_mut() {
                    Some(0) => {
                        self.template_stack.pop();
                        self.push(TokenKind::ExprEnd, start, start + 1);
                        self.pos += 1;
                        self.lex_template_text()
                    }
                    Some(depth) => {
                        *depth -= 1;
                        self.push(TokenKind::RBrace, start, start + 1);
                        self.pos += 1;
                        Ok(())
                    }
                    None => {
                        self.push(TokenKind::RBrace, start, start + 1);
                        self.pos += 1;
                        Ok(())
                    }
                }
            }
            b'/' if self.regex_allowed() => self.lex_regex(),
            _ if c == b'_' || c == b'$' || c.is_ascii_alphabetic() || c >= 0x80 => {
                self.lex_ident()
            }
            _ if c.is_ascii_digit() => {
                self.lex_number();
                Ok(())
            }
            b'.' if self.peek(1).is_some_and(|d| d.is_ascii_digit()) => {
                self.lex_number();
                Ok(())
            }
            _ => {
                self.lex_punct();
                Ok(())
            }
        }
    }

    fn lex_string(&mut self, quote: u8) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek(0) {
                Some(b'\\') => self.pos += 2,
                Some(c) if c == quote => {
                    self.pos += 1;
                    self.push(TokenKind::Str, start, self.pos);
                    return Ok(());
                }
                Some(b'\n') | None => return Err(self.error(start, "unterminated string literal")),
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Consume template literal text up to the closing backtick or the next
    /// `${` interpolation.
    fn lex_template_text(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        loop {
            match self.peek(0) {
                Some(b'\\') => self.pos += 2,
                Some(b'`') => {
                    if self.pos > start {
                        self.push(TokenKind::TemplateChunk, start, self.pos);
                    }
                    self.push(TokenKind::TemplateEnd, self.pos, self.pos + 1);
                    self.pos += 1;
                    return Ok(());
                }
                Some(b'$') if self.peek(1) == Some(b'{') => {
                    if self.pos > start {
                        self.push(TokenKind::TemplateChunk, start, self.pos);
                    }
                    self.push(TokenKind::ExprStart, self.pos, self.pos + 2);
                    self.pos += 2;
                    self.template_stack.push(0);
                    return Ok(());
                }
                Some(b'\n') => {
                    self.newline_pending = true;
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
                None => return Err(self.error(start, "unterminated template literal")),
            }
        }
    }

    fn lex_ident(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let rest = &self.src[self.pos..];
        let mut len = 0;
        for ch in rest.chars() {
            if ch == '_' || ch == '$' || ch.is_alphanumeric() {
                len += ch.len_utf8();
            } else {
                // Lone non-identifier character (symbols outside ASCII):
                // consume it whole so spans stay on char boundaries.
                if len == 0 {
                    len = ch.len_utf8();
                }
                break;
            }
        }
        self.pos += len.max(1);
        self.push(TokenKind::Ident, start, self.pos);
        Ok(())
    }

    fn lex_number(&mut self) {
        let start = self.pos;
        // Loose scan: digits, radix prefixes, separators, exponents, bigint
        // suffix. Exact numeric grammar is irrelevant to the transform.
        while let Some(c) = self.peek(0) {
            let ch = c as char;
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.pos += 1;
            } else if ch == '.' && self.peek(1).is_some_and(|d| d.is_ascii_digit()) {
                self.pos += 1;
            } else if (ch == '+' || ch == '-')
                && matches!(self.bytes.get(self.pos - 1), Some(b'e' | b'E'))
            {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.push(TokenKind::Num, start, self.pos);
    }

    fn lex_regex(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut in_class = false;
        loop {
            match self.peek(0) {
                Some(b'\\') => self.pos += 2,
                Some(b'[') => {
                    in_class = true;
                    self.pos += 1;
                }
                Some(b']') => {
                    in_class = false;
                    self.pos += 1;
                }
                Some(b'/') if !in_class => {
                    self.pos += 1;
                    while self.peek(0).is_some_and(|c| c.is_ascii_alphabetic()) {
                        self.pos += 1;
                    }
                    self.push(TokenKind::Regex, start, self.pos);
                    return Ok(());
                }
                Some(b'\n') | None => {
                    return Err(self.error(start, "unterminated regular expression"))
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn lex_punct(&mut self) {
        let start = self.pos;
        let rest = &self.src[self.pos..];
        for punct in PUNCTUATORS {
            if rest.starts_with(punct) {
                // `?.` followed by a digit is a ternary, not optional
                // chaining; nothing in the transform cares, so keep greedy.
                let kind = match *punct {
                    "=>" => TokenKind::Arrow,
                    "..." => TokenKind::Ellipsis,
                    "?." => TokenKind::OptionalDot,
                    _ => TokenKind::Op,
                };
                self.pos += punct.len();
                self.push(kind, start, self.pos);
                return;
            }
        }

        let kind = match self.bytes[self.pos] {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semi,
            b':' => TokenKind::Colon,
            b'.' => TokenKind::Dot,
            b'=' => TokenKind::Assign,
            _ => TokenKind::Op,
        };
        self.pos += 1;
        self.push(kind, start, self.pos);
    }

    /// Whether a `/` at the current position starts a regex literal.
    fn regex_allowed(&self) -> bool {
        match self.tokens.last() {
            None => true,
            Some(prev) => match prev.kind {
                TokenKind::Ident => {
                    REGEX_PRECEDING_KEYWORDS.contains(&prev.text(self.src))
                }
                TokenKind::Num
                | TokenKind::Str
                | TokenKind::Regex
                | TokenKind::TemplateEnd
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace => false,
                _ => true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().iter().map(|t| t.kind).collect()
    }

    fn texts(source: &str) -> Vec<String> {
        tokenize(source)
            .unwrap()
            .iter()
            .map(|t| t.text(source).to_string())
            .collect()
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            kinds("const a = 1;"),
            vec![
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Assign,
                TokenKind::Num,
                TokenKind::Semi
            ]
        );
    }

    #[test]
    fn test_arrow_and_ellipsis() {
        assert_eq!(
            kinds("(...xs) => xs"),
            vec![
                TokenKind::LParen,
                TokenKind::Ellipsis,
                TokenKind::Ident,
                TokenKind::RParen,
                TokenKind::Arrow,
                TokenKind::Ident
            ]
        );
    }

    #[test]
    fn test_string_value_unescapes() {
        let toks = tokenize(r#"x = "a\"b""#).unwrap();
        let s = toks.last().unwrap();
        assert_eq!(s.kind, TokenKind::Str);
        assert_eq!(string_value(s.text(r#"x = "a\"b""#)), "a\"b");
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("a // line\n/* block */ b"),
            vec![TokenKind::Ident, TokenKind::Ident]
        );
    }

    #[test]
    fn test_newline_before_flag() {
        let toks = tokenize("a\nb").unwrap();
        assert!(!toks[0].newline_before);
        assert!(toks[1].newline_before);
    }

    #[test]
    fn test_template_interpolation_keeps_braces_balanced() {
        let src = "`a ${ {x: 1}.x } b`";
        let ks = kinds(src);
        assert_eq!(ks[0], TokenKind::TemplateStart);
        assert!(ks.contains(&TokenKind::ExprStart));
        assert!(ks.contains(&TokenKind::ExprEnd));
        assert_eq!(*ks.last().unwrap(), TokenKind::TemplateEnd);
        let lbraces = ks.iter().filter(|k| **k == TokenKind::LBrace).count();
        let rbraces = ks.iter().filter(|k| **k == TokenKind::RBrace).count();
        assert_eq!(lbraces, rbraces);
    }

    #[test]
    fn test_nested_template() {
        let src = "`x${`y${z}`}w`";
        let toks = tokenize(src).unwrap();
        let starts = toks
            .iter()
            .filter(|t| t.kind == TokenKind::TemplateStart)
            .count();
        let ends = toks
            .iter()
            .filter(|t| t.kind == TokenKind::TemplateEnd)
            .count();
        assert_eq!(starts, 2);
        assert_eq!(ends, 2);
    }

    #[test]
    fn test_regex_vs_division() {
        // After an identifier, `/` is division.
        assert!(!kinds("a / b").contains(&TokenKind::Regex));
        // After `return`, it is a regex.
        assert!(kinds("return /ab+c/i").contains(&TokenKind::Regex));
        // At expression start it is a regex.
        assert_eq!(kinds("/ab[/]c/g")[0], TokenKind::Regex);
    }

    #[test]
    fn test_optional_chaining() {
        assert_eq!(
            kinds("a?.b"),
            vec![TokenKind::Ident, TokenKind::OptionalDot, TokenKind::Ident]
        );
    }

    #[test]
    fn test_unterminated_string_errors() {
        assert!(tokenize("const a = \"oops").is_err());
    }

    #[test]
    fn test_punctuator_texts() {
        assert_eq!(texts("a === b"), vec!["a", "===", "b"]);
        assert_eq!(texts("x ??= y"), vec!["x", "??=", "y"]);
    }
}
