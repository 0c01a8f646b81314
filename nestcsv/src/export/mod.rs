//! CSV export: records to header plus one line per record.
//!
//! [`Export`] is lazy like the import side. Its first item is the header
//! line; each following item is one encoded record, newline included, so
//! the items can be concatenated or written out as they come.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::codec::{encode_row, header_row, write_line};
use crate::diagnostics::{DiagnosticKind, Diagnostics, LogEntry};
use crate::error::CsvResult;
use crate::schema::Schema;
use crate::store::Record;

/// How records are laid out on export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportOptions {
    /// Label has-one columns in the header and write them after the scalars.
    ///
    /// Off by default: the header lists scalar fields only and has-one
    /// cells trail the has-many pairs unlabeled.
    pub has_one_headers: bool,
}

/// Lazy sequence of CSV lines for a schema and a set of records.
pub struct Export<'a, I> {
    schema: &'a Schema,
    records: I,
    options: ExportOptions,
    diagnostics: Diagnostics,
    header_done: bool,
    /// Row number of the last line produced; the header is row 1
    row: usize,
    finished: bool,
}

impl<'a, I> Export<'a, I>
where
    I: Iterator,
    I::Item: Record,
{
    pub fn new(schema: &'a Schema, records: I, options: ExportOptions) -> Self {
        Self {
            schema,
            records,
            options,
            diagnostics: Diagnostics::new(),
            header_done: false,
            row: 0,
            finished: false,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Write every remaining line to `writer`.
    pub fn write_to<W: Write>(mut self, writer: &mut W) -> CsvResult<()> {
        for line in self.by_ref() {
            writer.write_all(line.as_bytes())?;
        }
        writer.flush()?;
        Ok(())
    }

    fn line(&mut self, cells: &[String]) -> Option<String> {
        match write_line(cells, b',') {
            Ok(line) => Some(line),
            Err(e) => {
                self.diagnostics.log(
                    LogEntry::error(DiagnosticKind::WriteFailure, e.to_string()).with_row(self.row),
                );
                self.finished = true;
                None
            }
        }
    }
}

impl<'a, I> Iterator for Export<'a, I>
where
    I: Iterator,
    I::Item: Record,
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }

        if !self.header_done {
            self.header_done = true;
            self.row = 1;
            let header = header_row(self.schema, &self.options);
            return self.line(&header);
        }

        let Some(record) = self.records.next() else {
            self.finished = true;
            return None;
        };
        self.row += 1;

        let encoded = encode_row(self.schema, &record, &self.options);
        for err in &encoded.errors {
            self.diagnostics.log(
                LogEntry::error(DiagnosticKind::UnknownField, err.to_string())
                    .with_row(self.row)
                    .with_field(err.field()),
            );
        }
        self.line(&encoded.cells)
    }
}

impl<'a, I> std::iter::FusedIterator for Export<'a, I>
where
    I: Iterator,
    I::Item: Record,
{
}
