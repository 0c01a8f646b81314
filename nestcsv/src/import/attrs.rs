//! Lazy decoding of a CSV source into attribute rows.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use csv::StringRecord;

use crate::codec::RowDecoder;
use crate::diagnostics::{DiagnosticKind, Diagnostics, LogEntry};
use crate::error::{CsvError, CsvResult};
use crate::models::{is_blank, AttributeRow};
use crate::parser::{self, SourceOptions};
use crate::schema::Schema;

/// A single-pass iterator of [`AttributeRow`]s, one per data row.
///
/// The header is read and checked on the first pull. Unknown and
/// export-only columns are reported once and then ignored. A tokenizer
/// failure is logged as [`DiagnosticKind::MalformedInput`] and ends the
/// stream; rows yielded before it stay valid.
pub struct AttributeStream<'a, R: Read> {
    schema: &'a Schema,
    reader: csv::Reader<R>,
    decoder: Option<RowDecoder<'a>>,
    record: StringRecord,
    diagnostics: Diagnostics,
    /// Row number of the last record read; the header is row 1
    row: usize,
    finished: bool,
}

impl<'a, R: Read> AttributeStream<'a, R> {
    /// Decode from an already configured tokenizer.
    pub fn new(schema: &'a Schema, reader: csv::Reader<R>) -> Self {
        Self {
            schema,
            reader,
            decoder: None,
            record: StringRecord::new(),
            diagnostics: Diagnostics::new(),
            row: 1,
            finished: false,
        }
    }

    /// Decode comma-separated UTF-8 text from any reader.
    pub fn from_reader(schema: &'a Schema, reader: R) -> Self {
        Self::new(schema, parser::csv_reader(reader, b','))
    }

    /// Report into an existing sink instead of a fresh one.
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Row number of the most recently decoded row.
    pub fn row(&self) -> usize {
        self.row
    }

    fn fail(&mut self, err: CsvError) {
        self.diagnostics.log(
            LogEntry::error(DiagnosticKind::MalformedInput, err.to_string()).with_row(self.row + 1),
        );
        self.finished = true;
    }

    fn read_header(&mut self) -> bool {
        let headers = match self.reader.headers() {
            Ok(headers) => headers.clone(),
            Err(e) => {
                self.fail(e.into());
                return false;
            }
        };

        for header in headers.iter().filter(|h| !is_blank(h)) {
            if self.schema.is_known_column(header) {
                continue;
            }
            let message = if self.schema.is_export_only(header) {
                format!("ignoring export-only column {header}")
            } else {
                format!("ignoring unknown column {header}")
            };
            self.diagnostics.log(
                LogEntry::warning(DiagnosticKind::UnknownColumn, message)
                    .with_row(1)
                    .with_field(header),
            );
        }

        self.decoder = Some(RowDecoder::new(self.schema, &headers));
        true
    }
}

impl<'a> AttributeStream<'a, File> {
    /// Decode a comma-separated UTF-8 file.
    pub fn from_path<P: AsRef<Path>>(schema: &'a Schema, path: P) -> CsvResult<Self> {
        Ok(Self::new(schema, parser::open_path(path, b',')?))
    }
}

impl<'a> AttributeStream<'a, Cursor<Vec<u8>>> {
    /// Decode raw bytes, detecting encoding and delimiter as `options` asks.
    pub fn from_bytes(schema: &'a Schema, bytes: &[u8], options: &SourceOptions) -> CsvResult<Self> {
        Ok(Self::new(schema, parser::reader_from_bytes(bytes, options)?))
    }
}

impl<'a, R: Read> Iterator for AttributeStream<'a, R> {
    type Item = AttributeRow;

    fn next(&mut self) -> Option<AttributeRow> {
        if self.finished {
            return None;
        }
        if self.decoder.is_none() && !self.read_header() {
            return None;
        }

        match self.reader.read_record(&mut self.record) {
            Ok(true) => {
                self.row += 1;
                let decoder = self.decoder.as_ref()?;
                Some(decoder.decode(&self.record))
            }
            Ok(false) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.fail(e.into());
                None
            }
        }
    }
}

impl<'a, R: Read> std::iter::FusedIterator for AttributeStream<'a, R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;
    use serde_json::{json, Value};
    use std::io::Write;

    fn books() -> Schema {
        SchemaBuilder::new()
            .fields(["id", "name", "author"])
            .has_many("reviews", |r| r.fields(["tomatoes", "publication"]))
            .has_one("publisher", |p| p.fields(["id", "name"]))
            .build()
            .unwrap()
    }

    fn collect(stream: AttributeStream<'_, &[u8]>) -> Vec<Value> {
        stream.map(Value::Object).collect()
    }

    #[test]
    fn test_one_row_per_record() {
        let schema = books();
        let csv = "id,name,author\n1,Big Fiction,Sneed\n,Natty,Sneed\n2,Wee Little NonFiction,Sneed\n";
        let rows = collect(AttributeStream::from_reader(&schema, csv.as_bytes()));
        assert_eq!(
            rows,
            vec![
                json!({ "id": "1", "name": "Big Fiction", "author": "Sneed" }),
                json!({ "name": "Natty", "author": "Sneed" }),
                json!({ "id": "2", "name": "Wee Little NonFiction", "author": "Sneed" }),
            ]
        );
    }

    #[test]
    fn test_header_only_source_is_empty() {
        let schema = books();
        let mut stream = AttributeStream::from_reader(&schema, "id,name,author\n".as_bytes());
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
        assert!(stream.diagnostics().is_empty());
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let schema = books();
        let csv = "id,name\n1,Big Fiction\n\n2,Small Fiction\n";
        let rows = collect(AttributeStream::from_reader(&schema, csv.as_bytes()));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_extension_pairs_and_has_one() {
        let schema = books();
        let csv = "id,name,publisher_name\n1,Big Fiction,Dan Blam,review_0_tomatoes,99,review_0_publication,Post\n";
        let rows = collect(AttributeStream::from_reader(&schema, csv.as_bytes()));
        assert_eq!(
            rows,
            vec![json!({
                "id": "1",
                "name": "Big Fiction",
                "publisher": { "name": "Dan Blam" },
                "reviews": [{ "tomatoes": "99", "publication": "Post" }]
            })]
        );
    }

    #[test]
    fn test_unknown_columns_are_reported_once() {
        let schema = SchemaBuilder::new()
            .field("id")
            .export_only(["name"])
            .has_one("publisher", |p| p.field("name"))
            .build()
            .unwrap();
        let csv = "id,name,setting,publisher_name\n22,Big Fiction,Chicago,Post\n23,Small Fiction,Boston,Daily\n";
        let stream = AttributeStream::from_reader(&schema, csv.as_bytes());
        let diagnostics = stream.diagnostics().clone();
        let rows = collect(stream);

        assert_eq!(rows[0], json!({ "id": "22", "publisher": { "name": "Post" } }));
        assert_eq!(rows[1], json!({ "id": "23", "publisher": { "name": "Daily" } }));

        let messages: Vec<_> = diagnostics.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(
            messages,
            vec!["ignoring export-only column name", "ignoring unknown column setting"]
        );
        assert_eq!(diagnostics.count(DiagnosticKind::UnknownColumn), 2);
        assert!(!diagnostics.has_errors());
    }

    #[test]
    fn test_malformed_input_ends_stream() {
        let schema = books();
        let mut bytes = b"id,name\n1,Big Fiction\n2,".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        bytes.extend_from_slice(b"3,Never Read\n");

        let mut stream = AttributeStream::from_reader(&schema, bytes.as_slice());
        assert_eq!(Value::Object(stream.next().unwrap()), json!({ "id": "1", "name": "Big Fiction" }));
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());

        let entries = stream.diagnostics().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, DiagnosticKind::MalformedInput);
        assert!(entries[0].message.starts_with("csv is malformed"));
    }

    #[test]
    fn test_row_numbers_start_after_header() {
        let schema = books();
        let mut stream = AttributeStream::from_reader(&schema, "id\n1\n2\n".as_bytes());
        assert_eq!(stream.row(), 1);
        stream.next();
        assert_eq!(stream.row(), 2);
        stream.next();
        assert_eq!(stream.row(), 3);
    }

    #[test]
    fn test_shared_diagnostics() {
        let schema = books();
        let sink = Diagnostics::new();
        let stream = AttributeStream::from_reader(&schema, "id,bogus\n1,2\n".as_bytes())
            .with_diagnostics(sink.clone());
        assert_eq!(stream.count(), 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,name,author").unwrap();
        writeln!(file, "1,Big Fiction,Sneed").unwrap();
        file.flush().unwrap();

        let schema = books();
        let rows: Vec<_> = AttributeStream::from_path(&schema, file.path())
            .unwrap()
            .map(Value::Object)
            .collect();
        assert_eq!(rows, vec![json!({ "id": "1", "name": "Big Fiction", "author": "Sneed" })]);
    }

    #[test]
    fn test_from_missing_path() {
        let schema = books();
        let err = AttributeStream::from_path(&schema, "/definitely/not/here.csv").err().unwrap();
        assert!(matches!(err, CsvError::Io(_)));
    }

    #[test]
    fn test_from_bytes_detects_delimiter() {
        let schema = books();
        let bytes = "id;name;author\n1;Big Fiction;Sneed\n".as_bytes();
        let rows: Vec<_> = AttributeStream::from_bytes(&schema, bytes, &SourceOptions::auto())
            .unwrap()
            .map(Value::Object)
            .collect();
        assert_eq!(rows, vec![json!({ "id": "1", "name": "Big Fiction", "author": "Sneed" })]);
    }
}
