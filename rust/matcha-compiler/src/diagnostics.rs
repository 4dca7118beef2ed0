//! Error rendering with source snippets for terminal and plain output.

use crate::compiler::analyzer::AnalyzeError;
use crate::compiler::parser::ParseError;
use crate::compiler::scanner::ScanError;
use crate::compiler::tokens::SourceLocation;
use crate::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A rendered diagnostic with source context.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub col: Option<u32>,
    pub source_line: Option<String>,
    pub underline: Option<String>,
}

impl Diagnostic {
    /// Render without colors (for tests and non-tty output).
    pub fn render_plain(&self) -> String {
        let mut out = String::new();

        let severity_label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        out.push_str(&format!("{}: {}\n", severity_label, self.message));

        if let (Some(file), Some(line), Some(col)) = (&self.file, self.line, self.col) {
            out.push_str(&format!("  --> {}:{}:{}\n", file, line, col));
        }

        if let (Some(line_num), Some(line_text), Some(underline)) =
            (self.line, &self.source_line, &self.underline)
        {
            out.push_str("   |\n");
            out.push_str(&format!("{:>3} | {}\n", line_num, line_text));
            out.push_str(&format!("   | {}\n", underline));
        }

        out
    }

    /// Render with ANSI colors for terminal display.
    pub fn render_ansi(&self) -> String {
        let mut out = String::new();

        let label = match self.severity {
            Severity::Error => red(&bold("error")),
            Severity::Warning => yellow(&bold("warning")),
        };
        out.push_str(&format!("{}: {}\n", label, self.message));

        if let (Some(file), Some(line), Some(col)) = (&self.file, self.line, self.col) {
            out.push_str(&gray(&format!("  --> {}:{}:{}\n", file, line, col)));
        }

        if let (Some(line_num), Some(line_text), Some(underline)) =
            (self.line, &self.source_line, &self.underline)
        {
            let line_str = line_num.to_string();
            out.push_str(&format!("  {} | {}\n", gray(&line_str), line_text));
            let spaces = " ".repeat(line_str.len());
            out.push_str(&format!("  {} | {}\n", spaces, red(underline)));
        }

        out
    }
}

/// Converts a compile error into a diagnostic, attaching a source snippet
/// when the error's location falls inside `source`.
pub fn diagnose(error: &CompileError, source: &str) -> Diagnostic {
    let location = error_location(error);
    let (file, line, col) = match location {
        Some(location) => (
            Some(location.short_file_name.clone()),
            Some(location.line_number),
            Some(location.column_number),
        ),
        None => (None, None, None),
    };

    let source_line = line.and_then(|l| get_source_line(source, l));
    let underline = match (&source_line, location) {
        (Some(_), Some(location)) => Some(make_underline(location.column_number as usize, 1)),
        _ => None,
    };

    Diagnostic {
        severity: Severity::Error,
        message: error.to_string(),
        file,
        line,
        col,
        source_line,
        underline,
    }
}

fn error_location(error: &CompileError) -> Option<&SourceLocation> {
    match error {
        CompileError::Scan(e) => scan_error_location(e),
        CompileError::Parse(e) => parse_error_location(e),
        CompileError::Analyze(e) => Some(analyze_error_location(e)),
        CompileError::Emit(_) => None,
        CompileError::Keys(_) => None,
        CompileError::Ops(_) => None,
    }
}

fn scan_error_location(error: &ScanError) -> Option<&SourceLocation> {
    match error {
        ScanError::UnexpectedChar { location, .. }
        | ScanError::UnterminatedString { location }
        | ScanError::EndOfFile { location } => Some(location),
    }
}

fn parse_error_location(error: &ParseError) -> Option<&SourceLocation> {
    match error {
        ParseError::Scan(e) => scan_error_location(e),
        ParseError::UnexpectedToken { location, .. }
        | ParseError::UnexpectedInput { location, .. }
        | ParseError::UnexpectedEof { location }
        | ParseError::InvalidStringLiteral { location, .. }
        | ParseError::InvalidTransformLiteral { location, .. }
        | ParseError::InvalidStringTemplate { location, .. }
        | ParseError::InvalidLabelPosition { location, .. }
        | ParseError::UnknownKey { location, .. }
        | ParseError::ImportFailure { location, .. } => Some(location),
    }
}

fn analyze_error_location(error: &AnalyzeError) -> &SourceLocation {
    match error {
        AnalyzeError::DuplicateBundleName { location, .. }
        | AnalyzeError::DuplicateUnitName { location, .. }
        | AnalyzeError::DuplicateCaseValue { location, .. }
        | AnalyzeError::MissingReturnStatement { location }
        | AnalyzeError::DuplicateLabelName { location, .. }
        | AnalyzeError::UndefinedLabel { location, .. }
        | AnalyzeError::UnknownTestOp { location, .. }
        | AnalyzeError::InsufficientTestOpValues { location, .. }
        | AnalyzeError::TooManyTestOpValues { location, .. }
        | AnalyzeError::UnreachableReturnStatement { location } => location,
    }
}

fn get_source_line(source: &str, line: u32) -> Option<String> {
    source
        .lines()
        .nth((line as usize).saturating_sub(1))
        .map(|s| s.to_string())
}

fn make_underline(col: usize, len: usize) -> String {
    format!("{}{}", " ".repeat(col.saturating_sub(1)), "^".repeat(len.max(1)))
}

// ANSI color helpers
fn red(s: &str) -> String {
    format!("\x1b[31m{}\x1b[0m", s)
}

fn yellow(s: &str) -> String {
    format!("\x1b[33m{}\x1b[0m", s)
}

fn bold(s: &str) -> String {
    format!("\x1b[1m{}\x1b[0m", s)
}

fn gray(s: &str) -> String {
    format!("\x1b[90m{}\x1b[0m", s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_source_line() {
        let source = "line 1\nline 2\nline 3\n";
        assert_eq!(get_source_line(source, 1), Some("line 1".to_string()));
        assert_eq!(get_source_line(source, 3), Some("line 3".to_string()));
        assert_eq!(get_source_line(source, 4), None);
    }

    #[test]
    fn test_make_underline() {
        assert_eq!(make_underline(1, 3), "^^^");
        assert_eq!(make_underline(5, 2), "    ^^");
    }

    #[test]
    fn test_render_plain_with_snippet() {
        let diag = Diagnostic {
            severity: Severity::Error,
            message: "unknown key \"Nope\"".to_string(),
            file: Some("demo.mtc".to_string()),
            line: Some(2),
            col: Some(9),
            source_line: Some("    if test(\"Nope\", \"eq\", \"x\") {".to_string()),
            underline: Some("        ^".to_string()),
        };
        let output = diag.render_plain();
        assert!(output.contains("error: unknown key"));
        assert!(output.contains("--> demo.mtc:2:9"));
        assert!(output.contains("^"));
    }

    #[test]
    fn test_diagnose_attaches_location() {
        let source = "component demo\nbundle b {\n";
        let error = CompileError::Analyze(AnalyzeError::MissingReturnStatement {
            location: SourceLocation {
                file_name: "demo.mtc".to_string(),
                short_file_name: "demo.mtc".to_string(),
                file_offset: 15,
                line_number: 2,
                column_number: 1,
            },
        });
        let diag = diagnose(&error, source);
        assert_eq!(diag.line, Some(2));
        assert_eq!(diag.source_line.as_deref(), Some("bundle b {"));
        assert!(diag.render_ansi().contains("\x1b["));
    }
}
