//! Field configuration for one entity type and its associations.
//!
//! A [`Schema`] lists the scalar columns of the root entity (in CSV order),
//! which of them are export-only, the primary key used to match import rows
//! to persisted entities, and one level of has-many / has-one associations.
//!
//! Schemas are plain values: build one with [`SchemaBuilder`], derive a
//! variant with [`Schema::extend`] (which starts from a deep copy), or load
//! one from JSON with [`Schema::from_json`].
//!
//! ```rust,ignore
//! use nestcsv::SchemaBuilder;
//!
//! let books = SchemaBuilder::new()
//!     .fields(["id", "name", "author", "_destroy"])
//!     .has_many("reviews", |r| r.fields(["id", "tomatoes", "publication"]))
//!     .has_one("publisher", |p| p.fields(["id", "name"]))
//!     .build()?;
//! ```

pub mod builder;
pub mod inflect;

use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};

pub use builder::SchemaBuilder;

/// Name of the control field that requests destruction of a record.
pub const DESTROY_FIELD: &str = "_destroy";

fn default_primary_key() -> String {
    "id".to_string()
}

/// Declarative CSV mapping for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Scalar fields in column order
    #[serde(default)]
    pub(crate) fields: Vec<String>,

    /// Fields written on export but never read on import
    #[serde(default)]
    pub(crate) export_only_fields: Vec<String>,

    /// Field used to match import rows to persisted entities
    #[serde(default = "default_primary_key")]
    pub(crate) primary_key: String,

    #[serde(default)]
    pub(crate) has_many: Vec<Association>,

    #[serde(default)]
    pub(crate) has_one: Vec<Association>,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            export_only_fields: Vec::new(),
            primary_key: default_primary_key(),
            has_many: Vec::new(),
            has_one: Vec::new(),
        }
    }
}

/// A named child schema hanging off the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub(crate) name: String,

    /// Singular form used in extension-region keys; derived when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) singular: Option<String>,

    pub(crate) schema: Schema,
}

impl Association {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key prefix for has-many cells (`review` for `reviews`).
    pub fn singular(&self) -> String {
        self.singular
            .clone()
            .unwrap_or_else(|| inflect::singularize(&self.name))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Whether an extension-region key prefix names this association.
    ///
    /// Both the singular form and the declared (plural) name are accepted.
    pub fn matches_key(&self, prefix: &str) -> bool {
        prefix == self.name || prefix == self.singular()
    }
}

impl Schema {
    /// Start an empty root schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Derive a new schema from a deep copy of this one.
    ///
    /// `self` is left untouched whatever the closure adds.
    pub fn extend<F>(&self, define: F) -> SchemaResult<Schema>
    where
        F: FnOnce(SchemaBuilder) -> SchemaBuilder,
    {
        define(SchemaBuilder::from_schema(self.clone())).build()
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn export_only_fields(&self) -> &[String] {
        &self.export_only_fields
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn has_many(&self) -> &[Association] {
        &self.has_many
    }

    pub fn has_one(&self) -> &[Association] {
        &self.has_one
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }

    pub fn is_export_only(&self, name: &str) -> bool {
        self.export_only_fields.iter().any(|f| f == name)
    }

    /// Declared fields that are read on import.
    pub fn importable_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(String::as_str)
            .filter(move |f| !self.is_export_only(f))
    }

    pub fn is_importable(&self, name: &str) -> bool {
        self.has_field(name) && !self.is_export_only(name)
    }

    /// Whether the root declares `_destroy`.
    pub fn accepts_destroy(&self) -> bool {
        self.has_field(DESTROY_FIELD)
    }

    pub fn has_many_named(&self, name: &str) -> Option<&Association> {
        self.has_many.iter().find(|a| a.name == name)
    }

    pub fn has_one_named(&self, name: &str) -> Option<&Association> {
        self.has_one.iter().find(|a| a.name == name)
    }

    /// Resolve the association an extension-region key prefix refers to.
    pub fn find_has_many_by_key(&self, prefix: &str) -> Option<&Association> {
        self.has_many.iter().find(|a| a.matches_key(prefix))
    }

    /// Whether a header names an importable has-one column (`publisher_name`).
    pub fn is_has_one_column(&self, header: &str) -> bool {
        self.has_one.iter().any(|assoc| {
            header
                .strip_prefix(assoc.name.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
                .is_some_and(|field| assoc.schema.is_importable(field))
        })
    }

    /// Whether a header is read by the decoder.
    pub fn is_known_column(&self, header: &str) -> bool {
        self.is_importable(header) || self.is_has_one_column(header)
    }

    /// Names to eager-load when looking up persisted entities.
    pub fn association_names(&self) -> impl Iterator<Item = &str> {
        self.has_many.iter().map(|a| a.name.as_str())
    }

    /// Check the invariants a builder enforces, for schemas loaded from JSON.
    pub fn validate(&self) -> SchemaResult<()> {
        self.validate_fields()?;
        for assoc in self.has_many.iter().chain(self.has_one.iter()) {
            if let Some(nested) = assoc
                .schema
                .has_many
                .first()
                .or_else(|| assoc.schema.has_one.first())
            {
                return Err(SchemaError::NestedAssociation {
                    association: format!("{}.{}", assoc.name, nested.name),
                });
            }
            assoc.schema.validate_fields()?;
        }

        let mut names: Vec<&str> = self
            .has_many
            .iter()
            .chain(self.has_one.iter())
            .map(|a| a.name.as_str())
            .collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(SchemaError::InvalidSchema(format!(
                "association '{}' is declared twice",
                pair[0]
            )));
        }
        Ok(())
    }

    fn validate_fields(&self) -> SchemaResult<()> {
        for (i, field) in self.fields.iter().enumerate() {
            if field.is_empty() {
                return Err(SchemaError::InvalidSchema("empty field name".into()));
            }
            if self.fields[..i].contains(field) {
                return Err(SchemaError::InvalidSchema(format!(
                    "field '{}' is declared twice",
                    field
                )));
            }
        }
        if let Some(orphan) = self
            .export_only_fields
            .iter()
            .find(|f| !self.has_field(f))
        {
            return Err(SchemaError::InvalidSchema(format!(
                "export-only field '{}' is not a declared field",
                orphan
            )));
        }
        Ok(())
    }

    /// Parse and validate a schema from JSON.
    pub fn from_json(json: &str) -> SchemaResult<Self> {
        let schema: Schema = serde_json::from_str(json)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> SchemaResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
