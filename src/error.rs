use crate::generate::GenerateResult;
use crate::parser::tokenizer::{Position, Span};
use std::fmt;
use thiserror::Error;

/// Kind of parse error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnexpectedToken,
    UnclosedBlock,
    InvalidSyntax,
    InvalidIndex,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnexpectedToken => "Unexpected token",
            ErrorKind::UnclosedBlock => "Unclosed block",
            ErrorKind::InvalidSyntax => "Invalid syntax",
            ErrorKind::InvalidIndex => "Invalid index",
        }
    }
}

/// Syntax error raised by the tree builder. The offending statement is
/// skipped and parsing resumes at the next statement boundary.
#[derive(Debug, Clone, Error)]
#[error("{message} (line {}, column {})", .span.start.line + 1, .span.start.col + 1)]
pub struct ParseError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub related_span: Option<Span>,
    pub related_label: Option<String>,
    pub help: Option<String>,
}

impl ParseError {
    /// Create a new parse error
    pub fn new(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
            related_span: None,
            related_label: None,
            help: None,
        }
    }

    /// Add a related span with a label (e.g., "opened here")
    pub fn with_related(mut self, span: Span) -> Self {
        self.related_span = Some(span);
        self
    }

    /// Set the label for the related span
    pub fn with_related_label(mut self, label: impl Into<String>) -> Self {
        self.related_label = Some(label.into());
        self
    }

    /// Add help text
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// 1-based line number
    pub fn line(&self) -> usize {
        self.span.start.line + 1
    }

    /// 1-based column number
    pub fn column(&self) -> usize {
        self.span.start.col + 1
    }

    pub fn render(&self, source: &str, filename: &str) -> String {
        self.report().render(source, filename, false)
    }

    pub fn render_color(&self, source: &str, filename: &str) -> String {
        self.report().render(source, filename, true)
    }

    fn report(&self) -> Report<'_> {
        Report {
            message: &self.message,
            span: self.span,
            related_span: self.related_span,
            related_label: self.related_label.as_deref(),
            help: self.help.as_deref(),
        }
    }
}

/// Unterminated region found by the boundary scanner. Scanning of the
/// document stops: there is no safe guess for where the region ends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("unterminated {region} region opened at line {}, column {}", .opened.line + 1, .opened.col + 1)]
    Unbalanced { region: &'static str, opened: Position },
}

impl ScanError {
    pub fn span(&self) -> Span {
        match self {
            ScanError::Unbalanced { opened, .. } => Span::point(*opened),
        }
    }

    pub fn render(&self, source: &str, filename: &str, color: bool) -> String {
        let message = self.to_string();
        Report {
            message: &message,
            span: self.span(),
            related_span: None,
            related_label: None,
            help: Some("every `{` inside a style or script region needs a matching `}`"),
        }
        .render(source, filename, color)
    }
}

/// Malformed script-extension block
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("{block} block has no receiver; write `{{{{selector}}}} -> {block} {{ ... }}`")]
    MissingReceiver { block: &'static str },
    #[error("{block} block is missing its `{field}` entry")]
    MissingField { block: &'static str, field: &'static str },
    #[error("unbalanced braces in {block} block")]
    Unbalanced { block: &'static str },
}

/// Kind of generation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateErrorKind {
    UnresolvedReference,
    ConstraintViolation,
    MissingTarget,
    CircularReference,
}

impl GenerateErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerateErrorKind::UnresolvedReference => "Unresolved reference",
            GenerateErrorKind::ConstraintViolation => "Constraint violation",
            GenerateErrorKind::MissingTarget => "Missing specialization target",
            GenerateErrorKind::CircularReference => "Circular reference",
        }
    }
}

/// Error raised while resolving references or applying specializations.
/// Aborts the subtree that raised it; siblings still generate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {message}", .kind.as_str())]
pub struct GenerateError {
    pub kind: GenerateErrorKind,
    pub message: String,
    pub span: Span,
}

impl GenerateError {
    pub fn new(kind: GenerateErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self { kind, message: message.into(), span }
    }

    pub fn unresolved(what: &str, name: &str, span: Span) -> Self {
        Self::new(
            GenerateErrorKind::UnresolvedReference,
            format!("{} '{}' is not defined in this scope", what, name),
            span,
        )
    }

    pub fn render(&self, source: &str, filename: &str, color: bool) -> String {
        let message = self.to_string();
        Report {
            message: &message,
            span: self.span,
            related_span: None,
            related_label: None,
            help: None,
        }
        .render(source, filename, color)
    }
}

/// Generation failed for at least one node. `partial` holds everything the
/// rest of the document produced.
#[derive(Debug, Clone)]
pub struct GenerateFailure {
    pub errors: Vec<GenerateError>,
    pub partial: GenerateResult,
}

impl fmt::Display for GenerateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.first() {
            Some(first) if self.errors.len() > 1 => {
                write!(f, "{} (and {} more)", first, self.errors.len() - 1)
            }
            Some(first) => write!(f, "{}", first),
            None => write!(f, "generation failed"),
        }
    }
}

impl std::error::Error for GenerateFailure {}

/// Error during compilation (scanning, parsing or generation)
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("{} syntax error(s): {}", .0.len(), first_message(.0))]
    Syntax(Vec<ParseError>),
    #[error(transparent)]
    Generate(Box<GenerateFailure>),
    /// A script-extension span that could not be compiled; `span` covers it in the source
    #[error("{error}")]
    Script { error: ScriptError, span: Span },
}

fn first_message(errors: &[ParseError]) -> String {
    errors.first().map(|e| e.to_string()).unwrap_or_default()
}

impl From<GenerateFailure> for CompileError {
    fn from(failure: GenerateFailure) -> Self {
        CompileError::Generate(Box::new(failure))
    }
}

impl CompileError {
    /// Render the error with source context (no color)
    pub fn render(&self, source: &str, filename: &str) -> String {
        self.render_inner(source, filename, false)
    }

    /// Render the error with ANSI color codes
    pub fn render_color(&self, source: &str, filename: &str) -> String {
        self.render_inner(source, filename, true)
    }

    fn render_inner(&self, source: &str, filename: &str, color: bool) -> String {
        match self {
            CompileError::Scan(err) => err.render(source, filename, color),
            CompileError::Syntax(errors) => errors
                .iter()
                .map(|e| e.report().render(source, filename, color))
                .collect(),
            CompileError::Generate(failure) => failure
                .errors
                .iter()
                .map(|e| e.render(source, filename, color))
                .collect(),
            CompileError::Script { error, span } => {
                let message = error.to_string();
                Report { message: &message, span: *span, related_span: None, related_label: None, help: None }
                    .render(source, filename, color)
            }
        }
    }
}

/// Borrowed view of a diagnostic, shared by every error type's renderer
struct Report<'a> {
    message: &'a str,
    span: Span,
    related_span: Option<Span>,
    related_label: Option<&'a str>,
    help: Option<&'a str>,
}

impl Report<'_> {
    fn render(&self, source: &str, filename: &str, color: bool) -> String {
        let red = if color { "\x1b[1;31m" } else { "" };
        let dim = if color { "\x1b[2m" } else { "" };
        let cyan = if color { "\x1b[1;38;5;73m" } else { "" };
        let reset = if color { "\x1b[0m" } else { "" };

        let mut output = String::new();
        output.push('\n');

        // Point the location at the related span when there is one: that is where the fix goes
        let loc_span = self.related_span.as_ref().unwrap_or(&self.span);
        output.push_str(&format!(
            " {}file:{} {}:{}:{}\n",
            dim,
            reset,
            filename,
            loc_span.start.line + 1,
            loc_span.start.col + 1
        ));
        output.push_str(&format!("{}error:{} {}\n", red, reset, self.message));

        if let Some(snippet) = snippet(source, &self.span, red, dim, reset, None) {
            output.push_str(&snippet);
        }

        if let Some(related) = &self.related_span {
            let label = self.related_label.unwrap_or("opened here");
            if let Some(snippet) = snippet(source, related, dim, dim, reset, Some(label)) {
                output.push_str(&snippet);
            }
        }

        if let Some(help) = self.help {
            output.push('\n');
            for (i, help_line) in help.lines().enumerate() {
                if i == 0 {
                    output.push_str(&format!(" {}help:{} {}\n", cyan, reset, help_line));
                } else {
                    output.push_str(&format!("       {}\n", help_line));
                }
            }
        }

        output.push('\n');
        output
    }
}

/// One source line with a caret underline beneath the span
fn snippet(
    source: &str,
    span: &Span,
    caret_color: &str,
    dim: &str,
    reset: &str,
    label: Option<&str>,
) -> Option<String> {
    let source_line = source.lines().nth(span.start.line)?;
    let line_number = span.start.line + 1;
    let width = format!("{}", line_number).len().max(2);

    let underline_start = span.start.col;
    let underline_len = if span.end.line == span.start.line {
        span.end.col.saturating_sub(span.start.col).max(1)
    } else {
        source_line.chars().count().saturating_sub(underline_start).max(1)
    };

    let mut out = String::new();
    out.push_str(&format!("{}{:>width$} |{}\n", dim, "", reset, width = width));
    out.push_str(&format!("{}{:>width$} |{} {}\n", dim, line_number, reset, source_line, width = width));
    out.push_str(&format!(
        "{}{:>width$} |{} {}{}{}{}{}\n",
        dim,
        "",
        reset,
        " ".repeat(underline_start),
        caret_color,
        "^".repeat(underline_len),
        label.map(|l| format!(" {}", l)).unwrap_or_default(),
        reset,
        width = width
    ));
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::positions::position_at;

    fn span(source: &str, start: usize, end: usize) -> Span {
        Span::new(position_at(source, start), position_at(source, end))
    }

    #[test]
    fn test_parse_error_display_is_one_based() {
        let source = "div {\n  id main;\n}";
        let err = ParseError::new(ErrorKind::UnexpectedToken, "Expected ':'", span(source, 11, 15));
        assert_eq!(err.to_string(), "Expected ':' (line 2, column 6)");
        assert_eq!(err.line(), 2);
        assert_eq!(err.column(), 6);
    }

    #[test]
    fn test_render_points_at_span() {
        let source = "div {\n  id main;\n}";
        let err = ParseError::new(ErrorKind::UnexpectedToken, "Expected ':'", span(source, 11, 15))
            .with_help("Attributes are written `name: value;`");
        let rendered = err.render(source, "page.chtl");
        assert!(rendered.contains("page.chtl:2:6"));
        assert!(rendered.contains("  id main;"));
        assert!(rendered.contains("^^^^"));
        assert!(rendered.contains("help: Attributes are written"));
    }

    #[test]
    fn test_related_span_label() {
        let source = "div {\n  span {\n";
        let err = ParseError::new(ErrorKind::UnclosedBlock, "Block is never closed", span(source, 15, 15))
            .with_related(span(source, 4, 5))
            .with_related_label("block opened here");
        let rendered = err.render(source, "page.chtl");
        assert!(rendered.contains("block opened here"));
        assert!(rendered.contains("page.chtl:1:5"));
    }

    #[test]
    fn test_generate_failure_display() {
        let failure = GenerateFailure {
            errors: vec![
                GenerateError::unresolved("style group", "Missing", Span::default()),
                GenerateError::unresolved("element", "Gone", Span::default()),
            ],
            partial: GenerateResult::default(),
        };
        assert_eq!(
            failure.to_string(),
            "Unresolved reference: style group 'Missing' is not defined in this scope (and 1 more)"
        );
    }

    #[test]
    fn test_scan_error_message() {
        let err = ScanError::Unbalanced {
            region: "style",
            opened: Position { byte: 4, line: 2, col: 3 },
        };
        assert_eq!(err.to_string(), "unterminated style region opened at line 3, column 4");
    }
}
