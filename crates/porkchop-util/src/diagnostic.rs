//! Compile-time diagnostics.
//!
//! A [`Diagnostic`] is one error plus any number of notes, each optionally
//! pointing at a source segment. Diagnostics are raised through `Result`
//! and rendered once at the top level; there is no recovery.
//!
//! Rendering draws the offending lines with a gutter and underlines the
//! segment with `^~~~` markers whose layout accounts for the display width
//! of Unicode code points.

use std::fmt;

use crate::unicode::display_width;
use crate::{Segment, Source};

/// What stage of the pipeline rejected the program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    /// Malformed tokens, stray bytes, unbalanced brackets.
    Lexical,
    /// The token stream does not form an expression.
    Syntactic,
    /// A type rule was violated.
    SemanticType,
    /// A name could not be resolved, or was declared but never defined.
    SemanticResolution,
    /// A compile-time constant could not be evaluated.
    ConstantEval,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Lexical => write!(f, "lexical"),
            Category::Syntactic => write!(f, "syntactic"),
            Category::SemanticType => write!(f, "type"),
            Category::SemanticResolution => write!(f, "resolution"),
            Category::ConstantEval => write!(f, "constant"),
        }
    }
}

/// Severity of a single message within a diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Error,
    Note,
}

/// One line of a diagnostic: a message and an optional source pointer.
#[derive(Clone, Debug)]
pub struct ErrorMessage {
    pub kind: MessageKind,
    pub text: String,
    pub segment: Option<Segment>,
}

impl ErrorMessage {
    pub fn error(text: impl Into<String>, segment: Segment) -> Self {
        Self {
            kind: MessageKind::Error,
            text: text.into(),
            segment: Some(segment),
        }
    }

    pub fn note(text: impl Into<String>, segment: Segment) -> Self {
        Self {
            kind: MessageKind::Note,
            text: text.into(),
            segment: Some(segment),
        }
    }

    pub fn plain_note(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Note,
            text: text.into(),
            segment: None,
        }
    }
}

/// A structured compile-time diagnostic.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub category: Category,
    pub messages: Vec<ErrorMessage>,
}

impl Diagnostic {
    /// A diagnostic with a single error message pointing at `segment`.
    pub fn error(category: Category, text: impl Into<String>, segment: Segment) -> Self {
        Self {
            category,
            messages: vec![ErrorMessage::error(text, segment)],
        }
    }

    /// Appends a follow-up message.
    pub fn with(mut self, message: ErrorMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// The primary message text.
    pub fn primary(&self) -> &str {
        self.messages
            .first()
            .map(|m| m.text.as_str())
            .unwrap_or("unknown error")
    }

    /// Renders the diagnostic against `source` with snippets and carets.
    pub fn render(&self, source: &Source) -> String {
        let mut out = String::new();
        for message in &self.messages {
            let label = match message.kind {
                MessageKind::Error => "error",
                MessageKind::Note => "note",
            };
            out.push_str(label);
            out.push_str(": ");
            out.push_str(&message.text);
            if let Some(segment) = message.segment {
                out.push_str(&format!(
                    " at line {} column {} to ",
                    segment.line1 + 1,
                    segment.column1 + 1
                ));
                if segment.is_multiline() {
                    out.push_str(&format!("line {} column ", segment.line2 + 1));
                }
                out.push_str(&format!("{}", segment.column2 + 1));
                out.push('\n');
                render_snippet(&mut out, source, segment);
            } else {
                out.push('\n');
            }
        }
        out
    }
}

fn digits10(mut num: usize) -> usize {
    let mut digits = 1;
    while num >= 10 {
        num /= 10;
        digits += 1;
    }
    digits
}

fn render_snippet(out: &mut String, source: &Source, segment: Segment) {
    let digits = digits10(segment.line2 + 1);
    let last = segment.line2.min(source.line_count().saturating_sub(1));
    for line in segment.line1..=last {
        let code = source.line(line);
        let line_no = (line + 1).to_string();
        out.push_str("   ");
        out.push_str(&line_no);
        out.push_str(&" ".repeat(digits - line_no.len() + 1));
        out.push_str(" | ");
        out.push_str(code);
        out.push_str("\n   ");
        out.push_str(&" ".repeat(digits + 1));
        out.push_str(" | ");
        let column1 = if line == segment.line1 {
            segment.column1.min(code.len())
        } else {
            code.len() - code.trim_start_matches(' ').len()
        };
        let column2 = if line == segment.line2 {
            segment.column2.min(code.len())
        } else {
            code.len()
        };
        let width1 = display_width(&code[..column1]);
        let width2 = display_width(&code[column1..column2.max(column1)]);
        out.push_str(&" ".repeat(width1));
        if line == segment.line1 {
            out.push('^');
            if width2 > 1 {
                out.push_str(&"~".repeat(width2 - 1));
            }
        } else {
            out.push_str(&"~".repeat(width2));
        }
        out.push('\n');
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.category, self.primary())
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary() {
        let diag = Diagnostic::error(Category::Lexical, "stray '\\'", Segment::point(0, 3, 1));
        assert_eq!(diag.primary(), "stray '\\'");
        assert_eq!(diag.to_string(), "lexical error: stray '\\'");
    }

    #[test]
    fn test_render_caret() {
        let source = Source::new("let x = 42");
        let diag = Diagnostic::error(
            Category::SemanticType,
            "type mismatch",
            Segment::point(0, 8, 2),
        );
        let rendered = diag.render(&source);
        assert!(rendered.contains("error: type mismatch at line 1 column 9 to 11"));
        assert!(rendered.contains("   1  | let x = 42"));
        assert!(rendered.contains("|         ^~"));
    }

    #[test]
    fn test_render_wide_chars() {
        let source = Source::new("let 宽 = 1");
        // the identifier occupies 3 bytes but 2 display columns
        let diag = Diagnostic::error(
            Category::SemanticResolution,
            "unable to resolve",
            Segment::point(0, 4, 3),
        );
        let rendered = diag.render(&source);
        let caret_line = rendered.lines().last().unwrap();
        assert!(caret_line.ends_with("    ^~"));
    }

    #[test]
    fn test_notes() {
        let source = Source::new("a\nb");
        let diag = Diagnostic::error(Category::SemanticType, "bad", Segment::point(0, 0, 1))
            .with(ErrorMessage::note("declared here", Segment::point(1, 0, 1)))
            .with(ErrorMessage::plain_note("no segment"));
        let rendered = diag.render(&source);
        assert!(rendered.contains("note: declared here"));
        assert!(rendered.contains("note: no segment\n"));
    }
}
