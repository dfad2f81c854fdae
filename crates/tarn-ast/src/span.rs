//! Source positions

use serde::{Deserialize, Serialize};

/// A source position attached to statements for diagnostics.
///
/// Line and column are 1-based; (0, 0) marks synthetic code with no
/// source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Span { line, column }
    }

    /// Span for compiler-synthesized code
    pub fn synthetic() -> Self {
        Span { line: 0, column: 0 }
    }

    pub fn is_synthetic(&self) -> bool {
        self.line == 0 && self.column == 0
    }
}
