//! [`Record`] → CSV cells.
//!
//! The encoder mirrors the decoder: scalar fields first (in schema order),
//! then one `(key, value)` pair per importable has-many child field, then
//! has-one cells. Export-only child fields stay out of the row. Fields a record cannot provide are written as blank cells and
//! reported as [`FieldError::Unknown`], so a row always keeps its shape.

use crate::error::{CsvError, CsvResult, FieldError};
use crate::export::ExportOptions;
use crate::models::cell_text;
use crate::schema::{Association, Schema, DESTROY_FIELD};
use crate::store::Record;

/// Cells for one record plus the reads that failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedRow {
    pub cells: Vec<String>,
    pub errors: Vec<FieldError>,
}

impl EncodedRow {
    fn push(&mut self, cell: String) {
        self.cells.push(cell);
    }

    fn blank(&mut self) {
        self.cells.push(String::new());
    }

    fn fail(&mut self, scope: String) {
        self.errors.push(FieldError::Unknown { field: scope });
        self.blank();
    }
}

/// Header cells for `schema`.
pub fn header_row(schema: &Schema, options: &ExportOptions) -> Vec<String> {
    let mut header = schema.fields().to_vec();
    if options.has_one_headers {
        for assoc in schema.has_one() {
            for field in assoc.schema().importable_fields() {
                header.push(format!("{}_{}", assoc.name(), field));
            }
        }
    }
    header
}

/// Encode one record.
pub fn encode_row(schema: &Schema, record: &dyn Record, options: &ExportOptions) -> EncodedRow {
    let mut row = EncodedRow::default();

    for field in schema.fields() {
        encode_field(&mut row, record, field, field.clone());
    }

    if options.has_one_headers {
        encode_has_one(&mut row, schema, record);
        encode_has_many(&mut row, schema, record);
    } else {
        encode_has_many(&mut row, schema, record);
        encode_has_one(&mut row, schema, record);
    }

    row
}

fn encode_field(row: &mut EncodedRow, record: &dyn Record, field: &str, scope: String) {
    match record.read(field) {
        Some(value) => row.push(cell_text(&value)),
        // a record without a destroy flag simply isn't being destroyed
        None if field == DESTROY_FIELD => row.blank(),
        None => row.fail(scope),
    }
}

fn encode_has_many(row: &mut EncodedRow, schema: &Schema, record: &dyn Record) {
    for assoc in schema.has_many() {
        let Some(children) = record.has_many(assoc.name()) else {
            row.errors.push(FieldError::unknown(assoc.name()));
            continue;
        };
        let singular = assoc.singular();
        for (i, child) in children.iter().enumerate() {
            for field in assoc.schema().importable_fields() {
                row.push(format!("{singular}_{i}_{field}"));
                encode_field(row, *child, field, scoped(assoc, field));
            }
        }
    }
}

fn encode_has_one(row: &mut EncodedRow, schema: &Schema, record: &dyn Record) {
    for assoc in schema.has_one() {
        let fields: Vec<&str> = assoc.schema().importable_fields().collect();
        match record.has_one(assoc.name()) {
            Some(Some(child)) => {
                for field in fields {
                    encode_field(row, child, field, scoped(assoc, field));
                }
            }
            Some(None) => fields.iter().for_each(|_| row.blank()),
            None => {
                row.errors.push(FieldError::unknown(assoc.name()));
                fields.iter().for_each(|_| row.blank());
            }
        }
    }
}

fn scoped(assoc: &Association, field: &str) -> String {
    format!("{}_{}", assoc.name(), field)
}

/// Serialize cells as one CSV line, newline included.
pub fn write_line(cells: &[String], delimiter: u8) -> CsvResult<String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(cells)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| CsvError::Write(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| CsvError::Write(e.to_string()))
}
