//! CSV import: decoding to attribute rows, then reconciling them with a store.
//!
//! - [`AttributeStream`] - lazy CSV → [`AttributeRow`](crate::models::AttributeRow) iterator
//! - [`ReconcileImport`] - batched create/update/destroy resolution

pub mod attrs;
pub mod reconcile;

pub use attrs::AttributeStream;
pub use reconcile::{ImportOptions, ReconcileImport};
