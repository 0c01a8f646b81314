//! The row-level CSV ⇄ attributes mapping.
//!
//! - [`decode`] - one tokenized row to a nested [`AttributeRow`](crate::models::AttributeRow)
//! - [`encode`] - one [`Record`](crate::store::Record) to CSV cells

pub mod decode;
pub mod encode;

pub use decode::{decode_row, parse_key, ExtensionKey, RowDecoder};
pub use encode::{encode_row, header_row, write_line, EncodedRow};
