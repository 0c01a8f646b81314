//! CSV row → [`AttributeRow`].
//!
//! A row has two regions. The first `H` cells line up with the header, where
//! `H` is the number of non-blank header cells: scalar fields and has-one
//! columns (`publisher_name`) are looked up there by header name. Everything
//! from position `H` on is the extension region, a run of
//! `(key, value)` cell pairs encoding has-many children:
//!
//! ```text
//! id | review_0_tomatoes | 99 | review_0_publication | Post
//! ^H=1 └──── key ──────┘ └val┘
//! ```
//!
//! Pairs start at `H`, `H + 2`, `H + 4`, ... A key that does not match
//! `word_digits_word`, names an undeclared association, names an
//! undeclared or export-only child field, or carries an index above
//! [`MAX_CHILD_INDEX`] is skipped.

use csv::StringRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::models::{is_blank, AttributeRow};
use crate::schema::Schema;

/// Highest has-many index accepted; keys beyond it are skipped.
pub const MAX_CHILD_INDEX: usize = 9_999;

/// `{association}_{index}_{field}`
static KEY_CELL: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9_]+)_([0-9]+)_([A-Za-z0-9_]+)$").ok());

/// A parsed extension-region key cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionKey<'a> {
    pub association: &'a str,
    pub index: usize,
    pub field: &'a str,
}

/// Split a key cell into association prefix, index and field.
pub fn parse_key(cell: &str) -> Option<ExtensionKey<'_>> {
    let caps = KEY_CELL.as_ref()?.captures(cell)?;
    let association = caps.get(1)?.as_str();
    let index = caps.get(2)?.as_str().parse().ok()?;
    let field = caps.get(3)?.as_str();
    Some(ExtensionKey { association, index, field })
}

/// Decodes data rows that share one header.
#[derive(Debug)]
pub struct RowDecoder<'a> {
    schema: &'a Schema,
    columns: HashMap<String, usize>,
    extension_start: usize,
}

impl<'a> RowDecoder<'a> {
    pub fn new(schema: &'a Schema, headers: &StringRecord) -> Self {
        let mut columns = HashMap::new();
        let mut extension_start = 0;
        for (i, header) in headers.iter().enumerate() {
            if is_blank(header) {
                continue;
            }
            extension_start += 1;
            columns.entry(header.to_string()).or_insert(i);
        }
        Self {
            schema,
            columns,
            extension_start,
        }
    }

    /// Where has-many pairs begin.
    pub fn extension_start(&self) -> usize {
        self.extension_start
    }

    fn cell<'r>(&self, record: &'r StringRecord, header: &str) -> Option<&'r str> {
        let idx = *self.columns.get(header)?;
        record.get(idx).filter(|c| !is_blank(c))
    }

    pub fn decode(&self, record: &StringRecord) -> AttributeRow {
        let mut attrs = AttributeRow::new();

        for field in self.schema.importable_fields() {
            if let Some(cell) = self.cell(record, field) {
                attrs.insert(field.to_string(), Value::String(cell.to_string()));
            }
        }

        for assoc in self.schema.has_one() {
            let mut child = Map::new();
            for field in assoc.schema().importable_fields() {
                let header = format!("{}_{}", assoc.name(), field);
                if let Some(cell) = self.cell(record, &header) {
                    child.insert(field.to_string(), Value::String(cell.to_string()));
                }
            }
            if !child.is_empty() {
                attrs.insert(assoc.name().to_string(), Value::Object(child));
            }
        }

        self.decode_extension(record, &mut attrs);
        attrs
    }

    fn decode_extension(&self, record: &StringRecord, attrs: &mut AttributeRow) {
        let mut i = self.extension_start;
        while i < record.len() {
            let key_cell = record.get(i).unwrap_or_default();
            let value_cell = record.get(i + 1);
            i += 2;

            let Some(key) = parse_key(key_cell) else { continue };
            if key.index > MAX_CHILD_INDEX {
                continue;
            }
            let Some(assoc) = self.schema.find_has_many_by_key(key.association) else {
                continue;
            };
            if !assoc.schema().is_importable(key.field) {
                continue;
            }

            let value = match value_cell {
                Some(cell) if !is_blank(cell) => Value::String(cell.to_string()),
                _ => Value::Null,
            };

            let slot = attrs
                .entry(assoc.name().to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(children) = slot {
                let Some(len) = key.index.checked_add(1) else { continue };
                if children.len() < len {
                    children.resize_with(len, || Value::Object(Map::new()));
                }
                if let Some(Value::Object(child)) = children.get_mut(key.index) {
                    child.insert(key.field.to_string(), value);
                }
            }
        }
    }
}

/// Decode a single row against its header.
pub fn decode_row(schema: &Schema, headers: &StringRecord, record: &StringRecord) -> AttributeRow {
    RowDecoder::new(schema, headers).decode(record)
}
