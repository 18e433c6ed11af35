use std::fmt;

/// A source position (1-based line/column) attached to AST nodes and
/// carried onto the IR statements lowered from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loc {
    pub line: u32,
    pub col: u32,
}

impl Loc {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub loc: Option<Loc>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match self.loc {
            Some(loc) => write!(f, "{}: {}: {}", loc, tag, self.message),
            None => write!(f, "{}: {}", tag, self.message),
        }
    }
}

/// Append-only sink for diagnostics. Passes report everything they find and
/// consult `error_occurred` once at the end, so the user sees every problem
/// in a single run.
#[derive(Debug, Default)]
pub struct ErrorSink {
    diags: Vec<Diagnostic>,
    errors: usize,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, loc: Option<Loc>, message: impl Into<String>) {
        self.errors += 1;
        self.diags.push(Diagnostic {
            severity: Severity::Error,
            loc,
            message: message.into(),
        });
    }

    pub fn warn(&mut self, loc: Option<Loc>, message: impl Into<String>) {
        self.diags.push(Diagnostic {
            severity: Severity::Warning,
            loc,
            message: message.into(),
        });
    }

    pub fn error_occurred(&self) -> bool {
        self.errors > 0
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags
    }

    pub fn messages(&self) -> Vec<String> {
        self.diags.iter().map(|d| d.to_string()).collect()
    }
}
