//! Diagnostic accumulation and reporting
//!
//! Passes report into an [`ErrorCollector`] and keep going; the driver
//! inspects the collector once a whole phase has been attempted. Internal
//! diagnostics mark defects of an earlier phase and are kept distinct
//! from user errors.

use codespan_reporting::diagnostic::{Diagnostic as CsDiagnostic, Severity as CsSeverity};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tarn_ast::Span;

use crate::error::CompileError;

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    /// A compiler defect surfaced by a later phase
    Internal,
}

impl Severity {
    fn as_codespan(self) -> CsSeverity {
        match self {
            Severity::Warning => CsSeverity::Warning,
            Severity::Error | Severity::Internal => CsSeverity::Error,
        }
    }
}

/// A single reported problem, positioned in a source unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub unit: String,
    pub line: u32,
    pub column: u32,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error | Severity::Internal)
    }

    fn render_message(&self) -> String {
        if self.line == 0 {
            format!("{}: {}", self.unit, self.message)
        } else {
            format!("{}:{}:{}: {}", self.unit, self.line, self.column, self.message)
        }
    }
}

/// Accumulates diagnostics across passes, grouped by source unit
#[derive(Debug, Default)]
pub struct ErrorCollector {
    diagnostics: Vec<Diagnostic>,
    by_unit: FxHashMap<String, Vec<usize>>,
    current_unit: String,
}

impl ErrorCollector {
    pub fn new() -> Self {
        ErrorCollector::default()
    }

    /// Set the unit subsequent reports are attributed to
    pub fn set_unit(&mut self, unit: impl Into<String>) {
        self.current_unit = unit.into();
    }

    pub fn report(&mut self, severity: Severity, span: Span, message: impl Into<String>) {
        let diag = Diagnostic {
            severity,
            message: message.into(),
            unit: self.current_unit.clone(),
            line: span.line,
            column: span.column,
        };
        self.by_unit
            .entry(diag.unit.clone())
            .or_default()
            .push(self.diagnostics.len());
        self.diagnostics.push(diag);
    }

    pub fn error(&mut self, span: Span, message: impl Into<String>) {
        self.report(Severity::Error, span, message);
    }

    pub fn warning(&mut self, span: Span, message: impl Into<String>) {
        self.report(Severity::Warning, span, message);
    }

    pub fn internal(&mut self, span: Span, message: impl Into<String>) {
        self.report(Severity::Internal, span, message);
    }

    /// Fold a [`CompileError`] into the collector, preserving the
    /// user/internal distinction
    pub fn report_error(&mut self, span: Span, error: &CompileError) {
        let severity = if error.is_internal() {
            Severity::Internal
        } else {
            Severity::Error
        };
        self.report(severity, span, error.to_string());
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Diagnostics attributed to one unit, for inspection after a failed
    /// compile
    pub fn for_unit(&self, unit: &str) -> Vec<&Diagnostic> {
        self.by_unit
            .get(unit)
            .map(|indices| indices.iter().map(|&i| &self.diagnostics[i]).collect())
            .unwrap_or_default()
    }

    /// Render all diagnostics to the terminal
    pub fn emit(&self) -> Result<(), codespan_reporting::files::Error> {
        let writer = StandardStream::stderr(ColorChoice::Auto);
        let config = term::Config::default();
        let files: SimpleFiles<String, String> = SimpleFiles::new();
        for diag in &self.diagnostics {
            let cs = CsDiagnostic::new(diag.severity.as_codespan())
                .with_message(diag.render_message());
            term::emit(&mut writer.lock(), &config, &files, &cs)?;
        }
        Ok(())
    }

    /// JSON export for tooling
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_and_query() {
        let mut collector = ErrorCollector::new();
        collector.set_unit("a.tarn");
        collector.error(Span::new(3, 5), "bad thing");
        collector.set_unit("b.tarn");
        collector.warning(Span::new(1, 1), "iffy thing");

        assert!(collector.has_errors());
        assert_eq!(collector.error_count(), 1);
        assert_eq!(collector.for_unit("a.tarn").len(), 1);
        assert_eq!(collector.for_unit("b.tarn").len(), 1);
        assert!(collector.for_unit("c.tarn").is_empty());
    }

    #[test]
    fn test_internal_counts_as_error() {
        let mut collector = ErrorCollector::new();
        collector.set_unit("a.tarn");
        collector.internal(Span::synthetic(), "phase defect");
        assert!(collector.has_errors());
    }

    #[test]
    fn test_json_export() {
        let mut collector = ErrorCollector::new();
        collector.set_unit("a.tarn");
        collector.error(Span::new(2, 4), "oops");
        let json = collector.to_json().unwrap();
        assert!(json.contains("\"line\": 2"));
        assert!(json.contains("oops"));
    }
}
