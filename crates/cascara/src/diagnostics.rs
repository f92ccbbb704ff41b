use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

/// Source location carried by every node and diagnostic. `line` restarts at 1
/// on a page break (form feed) while `total_line` keeps counting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub filename: String,
    pub line: u32,
    pub total_line: u32,
}

impl Position {
    pub fn new(filename: &str) -> Self {
        Position {
            filename: filename.to_string(),
            line: 1,
            total_line: 1,
        }
    }

    pub fn next_line(&mut self) {
        self.line += 1;
        self.total_line += 1;
    }

    pub fn next_page(&mut self) {
        self.line = 1;
        self.total_line += 1;
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub filename: String,
    pub line: u32,
}

/// Accumulates diagnostics for a whole run. Passes keep going after
/// error-level reports; only the caller decides whether the run failed.
#[derive(Debug, Default)]
pub struct ErrorSink {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
    warning_count: usize,
}

/// Snapshot of the sink used by speculative compilations (selector
/// validation probes) that must be able to discard what they reported.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    len: usize,
    error_count: usize,
    warning_count: usize,
}

impl ErrorSink {
    pub fn report(&mut self, severity: Severity, pos: &Position, message: &str) {
        match severity {
            Severity::Error | Severity::Fatal => self.error_count += 1,
            Severity::Warning => self.warning_count += 1,
            _ => {}
        }
        self.diagnostics.push(Diagnostic {
            severity,
            message: message.to_string(),
            filename: pos.filename.clone(),
            line: pos.line,
        });
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            len: self.diagnostics.len(),
            error_count: self.error_count,
            warning_count: self.warning_count,
        }
    }

    pub fn error_happened_since(&self, checkpoint: Checkpoint) -> bool {
        self.error_count > checkpoint.error_count
    }

    /// Drops everything reported after the checkpoint, counters included.
    pub fn rollback_to(&mut self, checkpoint: Checkpoint) {
        self.diagnostics.truncate(checkpoint.len);
        self.error_count = checkpoint.error_count;
        self.warning_count = checkpoint.warning_count;
    }
}

/// Shared per-run state: the diagnostic sink and the numeric output
/// precision. Cloned `Rc` handles are held by the lexer, compiler and
/// assembler so nested compilations report into the same sink.
#[derive(Debug)]
pub struct Session {
    sink: RefCell<ErrorSink>,
    precision: Cell<usize>,
}

pub type SessionRef = Rc<Session>;

impl Session {
    pub fn new() -> SessionRef {
        Rc::new(Session {
            sink: RefCell::new(ErrorSink::default()),
            precision: Cell::new(3),
        })
    }

    pub fn report(&self, severity: Severity, pos: &Position, message: &str) {
        self.sink.borrow_mut().report(severity, pos, message);
    }

    pub fn debug(&self, pos: &Position, message: &str) {
        self.report(Severity::Debug, pos, message);
    }

    pub fn info(&self, pos: &Position, message: &str) {
        self.report(Severity::Info, pos, message);
    }

    pub fn warning(&self, pos: &Position, message: &str) {
        self.report(Severity::Warning, pos, message);
    }

    pub fn error(&self, pos: &Position, message: &str) {
        self.report(Severity::Error, pos, message);
    }

    pub fn error_count(&self) -> usize {
        self.sink.borrow().error_count()
    }

    pub fn warning_count(&self) -> usize {
        self.sink.borrow().warning_count()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.sink.borrow().diagnostics().to_vec()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.sink.borrow().checkpoint()
    }

    pub fn error_happened_since(&self, checkpoint: Checkpoint) -> bool {
        self.sink.borrow().error_happened_since(checkpoint)
    }

    pub fn rollback_to(&self, checkpoint: Checkpoint) {
        self.sink.borrow_mut().rollback_to(checkpoint);
    }

    pub fn precision(&self) -> usize {
        self.precision.get()
    }

    pub fn set_precision(&self, precision: usize) {
        self.precision.set(precision);
    }
}

/// Restores the previous precision when dropped.
pub struct PrecisionGuard {
    session: SessionRef,
    saved: usize,
}

impl PrecisionGuard {
    pub fn new(session: &SessionRef, precision: usize) -> Self {
        let saved = session.precision();
        session.set_precision(precision);
        PrecisionGuard {
            session: Rc::clone(session),
            saved,
        }
    }
}

impl Drop for PrecisionGuard {
    fn drop(&mut self) {
        self.session.set_precision(self.saved);
    }
}

pub fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let mut output = String::new();
    for (index, diagnostic) in diagnostics.iter().enumerate() {
        if index > 0 {
            output.push('\n');
        }
        output.push_str(&render_diagnostic(diagnostic));
    }
    output
}

pub fn render_diagnostic(diagnostic: &Diagnostic) -> String {
    format!(
        "{}:{}: {}: {}",
        diagnostic.filename, diagnostic.line, diagnostic.severity, diagnostic.message
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_advances_on_lines_and_pages() {
        let mut pos = Position::new("test.scss");
        pos.next_line();
        pos.next_line();
        assert_eq!(pos.line, 3);
        assert_eq!(pos.total_line, 3);
        pos.next_page();
        assert_eq!(pos.line, 1);
        assert_eq!(pos.total_line, 4);
        pos.next_line();
        assert_eq!(pos.line, 2);
        assert_eq!(pos.total_line, 5);
    }

    #[test]
    fn severities_are_ordered() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
    }

    #[test]
    fn sink_counts_errors_and_warnings() {
        let session = Session::new();
        let pos = Position::new("test.scss");
        session.info(&pos, "just saying");
        session.warning(&pos, "watch out");
        session.error(&pos, "broken");
        assert_eq!(session.error_count(), 1);
        assert_eq!(session.warning_count(), 1);
        assert_eq!(session.diagnostics().len(), 3);
    }

    #[test]
    fn checkpoint_rollback_discards_speculative_reports() {
        let session = Session::new();
        let pos = Position::new("test.scss");
        session.error(&pos, "real");
        let checkpoint = session.checkpoint();
        session.error(&pos, "speculative");
        assert!(session.error_happened_since(checkpoint));
        session.rollback_to(checkpoint);
        assert!(!session.error_happened_since(checkpoint));
        assert_eq!(session.error_count(), 1);
        assert_eq!(session.diagnostics().len(), 1);
        assert_eq!(session.diagnostics()[0].message, "real");
    }

    #[test]
    fn precision_guard_restores_on_drop() {
        let session = Session::new();
        assert_eq!(session.precision(), 3);
        {
            let _guard = PrecisionGuard::new(&session, 10);
            assert_eq!(session.precision(), 10);
        }
        assert_eq!(session.precision(), 3);
    }

    #[test]
    fn diagnostics_render_with_position_prefix() {
        let session = Session::new();
        let mut pos = Position::new("style.scss");
        pos.next_line();
        session.warning(&pos, "unexpected thing");
        let rendered = render_diagnostics(&session.diagnostics());
        assert_eq!(rendered, "style.scss:2: warning: unexpected thing");
    }
}
