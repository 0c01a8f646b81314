//! Diagnostic sink shared by the stages of one pipeline.
//!
//! Every non-fatal problem met while decoding, reconciling or exporting is
//! recorded here as a [`LogEntry`] instead of stopping the stream. A
//! [`Diagnostics`] handle is cheap to clone and all clones append to the same
//! list, so an [`AttributeStream`](crate::import::AttributeStream) and the
//! [`ReconcileImport`](crate::import::ReconcileImport) built on top of it
//! report into one log the caller can query during or after iteration.
//!
//! Entries are mirrored to the [`log`] facade under the `nestcsv` target.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

const LOG_TARGET: &str = "nestcsv";

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// The CSV source could not be tokenized; decoding stopped.
    MalformedInput,
    /// A header is not a declared, importable column.
    UnknownColumn,
    /// A record has no such field, or rejected the value.
    UnknownField,
    /// No persisted entity matches the row's primary key.
    NotFound,
    /// The store failed a batched lookup; the import stopped.
    StoreFailure,
    /// An encoded row could not be serialized.
    WriteFailure,
}

/// A single diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub kind: DiagnosticKind,
    /// Source row, counting the header as row 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    /// Field or column the entry is scoped to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl LogEntry {
    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self { level: LogLevel::Warning, kind, row: None, field: None, message: message.into() }
    }

    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self { level: LogLevel::Error, kind, row: None, field: None, message: message.into() }
    }

    pub fn with_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(row) => write!(f, "[row {}] {}", row, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Handle to one pipeline's diagnostic log.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Rc<RefCell<Vec<LogEntry>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry and forward it to the `log` facade.
    pub fn log(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Info => log::info!(target: LOG_TARGET, "{}", entry),
            LogLevel::Warning => log::warn!(target: LOG_TARGET, "{}", entry),
            LogLevel::Error => log::error!(target: LOG_TARGET, "{}", entry),
        }
        self.entries.borrow_mut().push(entry);
    }

    /// Snapshot of every entry recorded so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.borrow().iter().any(|e| e.level == LogLevel::Error)
    }

    /// Number of entries of the given kind.
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.entries.borrow().iter().filter(|e| e.kind == kind).count()
    }

    /// The log as text, one entry per line.
    pub fn render(&self) -> String {
        self.entries
            .borrow()
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_entries() {
        let log = Diagnostics::new();
        let other = log.clone();

        other.log(LogEntry::warning(DiagnosticKind::UnknownColumn, "ignoring unknown column setting"));

        assert_eq!(log.len(), 1);
        assert_eq!(log.count(DiagnosticKind::UnknownColumn), 1);
        assert!(!log.has_errors());
    }

    #[test]
    fn test_render_prefixes_row() {
        let log = Diagnostics::new();
        log.log(
            LogEntry::error(DiagnosticKind::NotFound, "record not found with primary key: \"234\"")
                .with_row(2),
        );
        log.log(LogEntry::warning(DiagnosticKind::UnknownColumn, "ignoring unknown column bax"));

        assert_eq!(
            log.render(),
            "[row 2] record not found with primary key: \"234\"\nignoring unknown column bax"
        );
        assert!(log.has_errors());
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let entry = LogEntry::warning(DiagnosticKind::UnknownField, "unknown field 'x'")
            .with_row(3)
            .with_field("x");
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["level"], "warning");
        assert_eq!(json["kind"], "unknown_field");
        assert_eq!(json["row"], 3);
        assert_eq!(json["field"], "x");
    }

    #[test]
    fn test_clear() {
        let log = Diagnostics::new();
        log.log(LogEntry::warning(DiagnosticKind::UnknownColumn, "x"));
        log.clear();
        assert!(log.is_empty());
    }
}
