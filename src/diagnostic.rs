//! Rich diagnostic rendering in the style of a compiler error: a source
//! snippet, a caret underline, and optional notes/help.
//!
//! Unlike the sibling sandbox's diagnostics (which only ever underline a
//! single Python source line, since a call expression can't itself span
//! lines), this dialect's list literals routinely cross line boundaries —
//! `to … end` bodies, multi-line `[ … ]` literals, and the span an
//! unterminated list error attaches to the opening `[` out to end of
//! input all do. The renderer below therefore tracks bracket depth while
//! walking the source and knows how to underline a span that starts and
//! ends on different lines.

use std::fmt;

use crate::error::Error;
use crate::sourcemap::Span;

/// A label attached to a span with a message.
#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

impl Label {
    pub fn primary(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            is_primary: true,
        }
    }

    pub fn secondary(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            is_primary: false,
        }
    }
}

/// A rendered diagnostic for one `Error`.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub source: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub help: Vec<String>,
}

/// Where a byte offset lands: its line/column, plus how many `[` are
/// still open at that point (0 at the top level).
struct Located {
    line: usize,
    col: usize,
    bracket_depth: usize,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: String::new(),
            labels: Vec::new(),
            notes: Vec::new(),
            help: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(Label::primary(span, message));
        self
    }

    pub fn with_secondary_label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(Label::secondary(span, message));
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help.push(help.into());
        self
    }

    /// Builds the diagnostic a host should show for `err`, given the
    /// source text `err`'s span (if any) was taken from.
    pub fn from_error(err: &Error, source: &str) -> Diagnostic {
        let message = err.to_string();
        let diag = Diagnostic::new(message).with_source(source);
        match err.span() {
            Some(span) => diag.with_label(span, "here"),
            None => diag,
        }
    }

    /// Walks the source up to `offset`, tracking line/column and net
    /// bracket nesting as it goes.
    fn locate(&self, offset: usize) -> Located {
        let mut line = 1;
        let mut col = 1;
        let mut depth: i64 = 0;
        for (i, ch) in self.source.char_indices() {
            if i >= offset {
                break;
            }
            if ch == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
            match ch {
                '[' => depth += 1,
                ']' => depth = (depth - 1).max(0),
                _ => {}
            }
        }
        Located {
            line,
            col,
            bracket_depth: depth.max(0) as usize,
        }
    }

    fn get_line(&self, line_num: usize) -> &str {
        self.source.lines().nth(line_num - 1).unwrap_or("")
    }

    fn line_number_width(&self) -> usize {
        let max_line = self.source.lines().count();
        max_line.to_string().len().max(1)
    }

    /// Renders one label's underline(s), handling the multi-line case by
    /// underlining to the end of the opening line, eliding any lines in
    /// between, then underlining the closing line up to its end column.
    fn render_label(&self, f: &mut fmt::Formatter<'_>, label: &Label, width: usize) -> fmt::Result {
        let start = self.locate(label.span.start);
        let end = self.locate(label.span.end);
        let underline_char = if label.is_primary { '^' } else { '-' };

        if start.line == end.line {
            let underline_start = start.col.saturating_sub(1);
            let underline_len = end.col.saturating_sub(start.col).max(1);
            write!(f, "{:width$} | ", "", width = width)?;
            write!(f, "{:underline_start$}", "")?;
            for _ in 0..underline_len {
                write!(f, "{}", underline_char)?;
            }
        } else {
            let first_len = self.get_line(start.line).chars().count();
            let underline_start = start.col.saturating_sub(1);
            let underline_len = first_len.saturating_sub(underline_start).max(1);
            write!(f, "{:width$} | ", "", width = width)?;
            write!(f, "{:underline_start$}", "")?;
            for _ in 0..underline_len {
                write!(f, "{}", underline_char)?;
            }
            writeln!(f)?;
            if end.line > start.line + 1 {
                writeln!(f, "{:width$} | ...", "", width = width)?;
            }
            writeln!(f, "{:width$} | {}", end.line, self.get_line(end.line), width = width)?;
            let closing_len = end.col.saturating_sub(1).max(1);
            write!(f, "{:width$} | ", "", width = width)?;
            for _ in 0..closing_len {
                write!(f, "{}", underline_char)?;
            }
        }

        if !label.message.is_empty() {
            write!(f, " {}", label.message)?;
        }
        if start.bracket_depth > 0 {
            write!(f, " ({} list level(s) still open here)", start.bracket_depth)?;
        }
        writeln!(f)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.message)?;

        if self.source.is_empty() || self.labels.is_empty() {
            for note in &self.notes {
                writeln!(f, "  = note: {}", note)?;
            }
            for help in &self.help {
                writeln!(f, "  = help: {}", help)?;
            }
            return Ok(());
        }

        let width = self.line_number_width();
        let mut labels_by_line: std::collections::BTreeMap<usize, Vec<&Label>> =
            std::collections::BTreeMap::new();
        for label in &self.labels {
            let start = self.locate(label.span.start);
            labels_by_line.entry(start.line).or_default().push(label);
        }

        writeln!(f, "{:width$} |", "", width = width)?;
        for (&line_num, labels) in &labels_by_line {
            writeln!(f, "{:width$} | {}", line_num, self.get_line(line_num), width = width)?;
            for label in labels {
                self.render_label(f, label, width)?;
            }
        }
        writeln!(f, "{:width$} |", "", width = width)?;

        for note in &self.notes {
            writeln!(f, "  = note: {}", note)?;
        }
        for help in &self.help {
            writeln!(f, "  = help: {}", help)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_caret_under_span() {
        let diag = Diagnostic::new("unbound variable 'n'")
            .with_source("print :n")
            .with_label(Span::new(6, 8), "not bound in this scope");
        let rendered = diag.to_string();
        assert!(rendered.contains("error: unbound variable 'n'"));
        assert!(rendered.contains("print :n"));
        assert!(rendered.contains("^^"));
        assert!(rendered.contains("not bound in this scope"));
    }

    #[test]
    fn from_error_without_span_has_no_labels() {
        let diag = Diagnostic::from_error(&Error::AlreadyRunning, "");
        assert!(diag.labels.is_empty());
    }

    #[test]
    fn multiline_span_underlines_open_and_close_lines() {
        let source = "make \"x [\na b\nc d";
        let diag = Diagnostic::new("syntax error: unterminated list: missing ']'")
            .with_source(source)
            .with_label(Span::new(8, source.len()), "list opened here is never closed");
        let rendered = diag.to_string();
        assert!(rendered.contains("make \"x ["));
        assert!(rendered.contains("c d"));
        assert!(rendered.contains("list opened here is never closed"));
    }

    #[test]
    fn label_inside_nested_list_reports_bracket_depth() {
        let source = "print [a [b c";
        let diag = Diagnostic::new("syntax error")
            .with_source(source)
            .with_label(Span::new(9, 10), "here");
        let rendered = diag.to_string();
        assert!(rendered.contains("list level(s) still open here"));
    }
}
