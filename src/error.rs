//! Error types for template compilation and rendering

use ariadne::{Color, Label, Report, ReportKind, Source};
use std::fmt;
use thiserror::Error;

/// Errors produced while compiling or rendering a template.
#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    /// Malformed template source (parse-time)
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    /// The loader could not resolve a template name
    #[error("template not found: {0}")]
    NotFound(String),

    /// The loader failed to read a template's backing source
    #[error("failed to read template '{name}': {message}")]
    Io { name: String, message: String },

    /// A template extends itself, directly or through other templates
    #[error("circular extends chain: {0}")]
    CircularExtends(String),

    /// A render-time failure (bad loop arity, unresolvable template name)
    #[error("{0}")]
    Render(String),
}

/// A template syntax error with optional source location.
///
/// Parsers attach the line number of the offending token; compilation
/// enriches the error with the text of that source line.
#[derive(Debug, Clone)]
pub struct SyntaxError {
    pub message: String,
    pub line: Option<usize>,
    pub source_line: Option<String>,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            source_line: None,
        }
    }

    /// Attach a line number, unless one is already recorded.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    /// Format the error with source context using ariadne
    pub fn format(&self, source: &str, filename: &str) -> String {
        let span = match self.line {
            Some(line) => line_span(source, line),
            None => 0..source.len().min(1),
        };
        let mut buf = Vec::new();
        Report::build(ReportKind::Error, filename, span.start)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, span))
                    .with_message(&self.message)
                    .with_color(Color::Red),
            )
            .finish()
            .write((filename, Source::from(source)), &mut buf)
            .unwrap();
        String::from_utf8(buf).unwrap()
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(line) = self.line {
            write!(f, " (line {}", line)?;
            if let Some(source) = self.source_line.as_deref().filter(|s| !s.is_empty()) {
                write!(f, ": {}", source)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for SyntaxError {}

/// Byte range of a 1-based source line, for error labels.
fn line_span(source: &str, line: usize) -> std::ops::Range<usize> {
    let mut start = 0;
    for (number, text) in source.split_inclusive('\n').enumerate() {
        if number + 1 == line {
            let trimmed = text.trim_end_matches(['\n', '\r']);
            return start..start + trimmed.len().max(1);
        }
        start += text.len();
    }
    0..source.len().min(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display() {
        let err = SyntaxError::new("unknown tag '{% frob %}'").at_line(3);
        assert_eq!(err.to_string(), "unknown tag '{% frob %}' (line 3)");
    }

    #[test]
    fn test_syntax_error_display_with_source_line() {
        let mut err = SyntaxError::new("bad expression").at_line(2);
        err.source_line = Some("{{ broken | }}".to_string());
        assert_eq!(err.to_string(), "bad expression (line 2: {{ broken | }})");
    }

    #[test]
    fn test_at_line_keeps_first_line() {
        let err = SyntaxError::new("oops").at_line(4).at_line(9);
        assert_eq!(err.line, Some(4));
    }

    #[test]
    fn test_line_span_points_at_line() {
        let source = "first\nsecond\nthird";
        assert_eq!(line_span(source, 2), 6..12);
    }

    #[test]
    fn test_format_names_file() {
        let source = "hello\n{% bogus %}\n";
        let err = SyntaxError::new("unknown tag").at_line(2);
        let report = err.format(source, "page.html");
        assert!(report.contains("page.html"));
        assert!(report.contains("unknown tag"));
    }
}
