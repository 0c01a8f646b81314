//! # nestcsv - Nested records in flat CSV
//!
//! nestcsv maps a root entity with one level of has-many and has-one
//! associations onto plain CSV rows and back, and turns imported rows into
//! create / update / destroy operations against a store in bounded batches.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐     ┌─────────────────┐     ┌─────────────────┐     ┌──────────┐
//! │ CSV text │────▶│ AttributeStream │────▶│ ReconcileImport │────▶│ Resolved │
//! │  (Read)  │     │ (decode rows)   │     │ (batch lookup)  │     │ entities │
//! └──────────┘     └─────────────────┘     └─────────────────┘     └──────────┘
//!
//! ┌──────────┐     ┌─────────────────┐     ┌──────────┐
//! │ Records  │────▶│     Export      │────▶│ CSV text │
//! └──────────┘     │ (encode rows)   │     └──────────┘
//!                  └─────────────────┘
//! ```
//!
//! Has-many children live after the header-aligned cells as
//! `(key, value)` pairs such as `review_0_tomatoes,99`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nestcsv::{AttributeStream, ImportOptions, ReconcileImport, SchemaBuilder};
//!
//! let schema = SchemaBuilder::new()
//!     .fields(["id", "name", "author", "_destroy"])
//!     .has_many("reviews", |r| r.fields(["id", "tomatoes", "publication"]))
//!     .build()?;
//!
//! let stream = AttributeStream::from_path(&schema, "books.csv")?;
//! let import = ReconcileImport::from_csv(&schema, &store, stream, ImportOptions::default());
//! let log = import.diagnostics().clone();
//! for resolved in import {
//!     // save or destroy resolved.into_entity()
//! }
//! println!("{}", log.render());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types
//! - [`diagnostics`] - Per-pipeline diagnostic log
//! - [`schema`] - Field and association configuration
//! - [`models`] - Attribute rows and resolution outcomes
//! - [`parser`] - CSV source setup with encoding/delimiter detection
//! - [`codec`] - Row-level decode and encode
//! - [`store`] - Store, entity and record contracts plus an in-memory store
//! - [`import`] - Attribute stream and batched reconciliation
//! - [`export`] - Lazy CSV export

// Core modules
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod schema;

// CSV plumbing
pub mod codec;
pub mod parser;

// Persistence contracts
pub mod store;

// Pipelines
pub mod export;
pub mod import;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{CsvError, FieldError, SchemaError, StoreError};

// =============================================================================
// Re-exports - Diagnostics
// =============================================================================

pub use diagnostics::{DiagnosticKind, Diagnostics, LogEntry, LogLevel};

// =============================================================================
// Re-exports - Schema
// =============================================================================

pub use schema::{Association, Schema, SchemaBuilder};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{AttributeRow, Resolved};

// =============================================================================
// Re-exports - Store contracts
// =============================================================================

pub use store::{Entity, MemoryEntity, MemoryStore, Record, Store, TableDef};

// =============================================================================
// Re-exports - Pipelines
// =============================================================================

pub use export::{Export, ExportOptions};
pub use import::{AttributeStream, ImportOptions, ReconcileImport};
pub use parser::SourceOptions;
