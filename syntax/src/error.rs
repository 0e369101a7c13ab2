//! Error types for source parsing.
//!
//! Structured errors with span information so transform diagnostics can
//! point at the offending line.

use thiserror::Error;

/// Span information for error reporting.
#[derive(Debug, Clone)]
pub struct ErrorSpan {
    pub line: usize,
    pub column: usize,
    pub line_end: usize,
    pub column_end: usize,
    pub snippet: String,
}

impl ErrorSpan {
    /// Create an `ErrorSpan` from a byte offset into the input.
    #[must_use]
    pub fn from_offset(offset: usize, input: &str) -> Self {
        let clamped = offset.min(input.len());
        let mut line = 1;
        let mut line_start = 0;
        for (idx, ch) in input.char_indices() {
            if idx >= clamped {
                break;
            }
            if ch == '\n' {
                line += 1;
                line_start = idx + 1;
            }
        }
        let column = input[line_start..clamped].chars().count() + 1;
        let snippet = input.lines().nth(line - 1).unwrap_or("").to_string();
        Self {
            line,
            column,
            line_end: line,
            column_end: column + 1,
            snippet,
        }
    }

    /// Create an `ErrorSpan` from a byte range into the input.
    #[must_use]
    pub fn from_range(start: usize, end: usize, input: &str) -> Self {
        let mut span = Self::from_offset(start, input);
        let end_span = Self::from_offset(end, input);
        if end_span.line == span.line {
            span.column_end = end_span.column;
        }
        span.line_end = end_span.line;
        span
    }

    /// Render the error rustc-style: location line, gutter, source line,
    /// caret marker.
    #[must_use]
    pub fn format_error(&self, message: &str) -> String {
        let gutter = self.line.to_string();
        let pad = " ".repeat(gutter.len());
        format!(
            "\n{message}\n{pad}--> input:{}:{}\n{pad} |\n{gutter} | {}\n{pad} | {}\n",
            self.line,
            self.column,
            self.snippet,
            self.marker(),
        )
    }

    /// The `^^^` marker aligned under the offending columns.
    fn marker(&self) -> String {
        let lead = " ".repeat(self.column.saturating_sub(1));
        let width = if self.line == self.line_end {
            self.column_end.saturating_sub(self.column)
        } else {
            self.snippet
                .len()
                .saturating_sub(self.column.saturating_sub(1))
        };
        format!("{lead}{}", "^".repeat(width.max(1)))
    }
}

/// Parse errors raised while scanning or structuring a source module.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{}", .span.format_error(&format!("Lex error: {}", .message)))]
    Lex { span: ErrorSpan, message: String },

    #[error("{}", .span.format_error(&format!("Syntax error: {}", .message)))]
    Syntax { span: ErrorSpan, message: String },

    #[error("{}", .span.format_error(&format!("Unbalanced delimiter: {}", .message)))]
    Unbalanced { span: ErrorSpan, message: String },
}

impl ParseError {
    pub(crate) fn syntax(offset: usize, input: &str, message: impl Into<String>) -> Self {
        ParseError::Syntax {
            span: ErrorSpan::from_offset(offset, input),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_span_from_offset() {
        let input = "const a = 1;\nconst b = 2;\n";
        let span = ErrorSpan::from_offset(19, input);
        assert_eq!(span.line, 2);
        assert_eq!(span.column, 7);
        assert_eq!(span.snippet, "const b = 2;");
    }

    #[test]
    fn test_format_error_underlines_column() {
        let input = "let x = ;\n";
        let span = ErrorSpan::from_offset(8, input);
        let rendered = span.format_error("Syntax error: unexpected token");
        assert!(rendered.contains("let x = ;"));
        assert!(rendered.contains('^'));
        assert!(rendered.contains("input:1:9"));
    }
}
