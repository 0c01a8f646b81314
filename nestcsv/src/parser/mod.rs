//! CSV source setup: tokenizer configuration plus encoding and delimiter detection.
//!
//! Quoting, escaping and line splitting are left to the `csv` crate. This
//! module only decides how the tokenizer is configured and, for raw bytes
//! of unknown origin, which encoding and delimiter to use.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CsvError, CsvResult};

/// Delimiters tried by [`detect_delimiter`], in order of preference.
const CANDIDATE_DELIMITERS: [char; 4] = [',', ';', '\t', '|'];

/// Lines sampled by [`detect_delimiter`].
const DETECTION_LINES: usize = 5;

/// How to read a CSV source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SourceOptions {
    /// Field delimiter; detected from the content when `None`
    pub delimiter: Option<u8>,

    /// Sniff the byte encoding before tokenizing
    pub detect_encoding: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            delimiter: Some(b','),
            detect_encoding: false,
        }
    }
}

impl SourceOptions {
    /// Detect both encoding and delimiter.
    pub fn auto() -> Self {
        Self {
            delimiter: None,
            detect_encoding: true,
        }
    }
}

/// Build the tokenizer used by every import.
///
/// Rows are flexible because has-many pairs make data rows wider than the
/// header. Cells are not trimmed.
pub fn csv_reader<R: Read>(reader: R, delimiter: u8) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(reader)
}

/// Open a file as a tokenizer with a known delimiter.
pub fn open_path<P: AsRef<Path>>(path: P, delimiter: u8) -> CsvResult<csv::Reader<File>> {
    let file = File::open(path.as_ref())?;
    Ok(csv_reader(file, delimiter))
}

/// Prepare in-memory bytes according to `options`.
pub fn reader_from_bytes(bytes: &[u8], options: &SourceOptions) -> CsvResult<csv::Reader<Cursor<Vec<u8>>>> {
    let content = if options.detect_encoding {
        let encoding = detect_encoding(bytes);
        decode_content(bytes, &encoding)?.into_bytes()
    } else {
        bytes.to_vec()
    };

    let delimiter = match options.delimiter {
        Some(d) => d,
        None => detect_delimiter(&String::from_utf8_lossy(&content)) as u8,
    };
    Ok(csv_reader(Cursor::new(content), delimiter))
}

/// Detect the encoding of raw bytes using chardet.
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    match charset.to_lowercase().as_str() {
        "" | "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to text in the given encoding.
///
/// UTF-8 input must be valid: invalid sequences are a malformed source, not
/// something to paper over.
pub fn decode_content(bytes: &[u8], encoding: &str) -> CsvResult<String> {
    match encoding.to_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" => String::from_utf8(bytes.to_vec())
            .map_err(|e| CsvError::Encoding(e.to_string())),
        "iso-8859-1" | "latin-1" | "latin1" => Ok(encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned()),
        other => match encoding_rs::Encoding::for_label(other.as_bytes()) {
            Some(enc) => Ok(enc.decode(bytes).0.into_owned()),
            None => Err(CsvError::Encoding(format!("unsupported encoding '{}'", other))),
        },
    }
}

/// Pick the delimiter occurring most often in the first lines.
///
/// Falls back to `,` when no candidate occurs at all (single-column files).
pub fn detect_delimiter(content: &str) -> char {
    let sample: Vec<&str> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(DETECTION_LINES)
        .collect();

    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &CANDIDATE_DELIMITERS {
        let count: usize = sample.iter().map(|l| l.matches(sep).count()).sum();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}
