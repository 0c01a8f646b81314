//! Additive builder for [`Schema`] values.
//!
//! Every call unions into what is already declared, so a builder started
//! from an existing schema (see [`Schema::extend`]) merges rather than
//! replaces. Association closures receive a child builder; declaring an
//! association on that child is recorded as
//! [`SchemaError::NestedAssociation`] and reported by [`SchemaBuilder::build`].

use super::{Association, Schema};
use crate::error::{SchemaError, SchemaResult};

#[derive(Debug, Clone, Copy)]
enum Kind {
    Many,
    One,
}

/// Builds a [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    schema: Schema,
    root: bool,
    error: Option<SchemaError>,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::from_schema(Schema::default())
    }

    /// Continue building on top of an existing schema.
    pub fn from_schema(schema: Schema) -> Self {
        Self {
            schema,
            root: true,
            error: None,
        }
    }

    fn child(schema: Schema) -> Self {
        Self {
            schema,
            root: false,
            error: None,
        }
    }

    /// Add one field.
    pub fn field(self, name: impl Into<String>) -> Self {
        self.add_fields([name], false)
    }

    /// Add several fields in order.
    pub fn fields<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_fields(names, false)
    }

    /// Add fields that are written on export but ignored on import.
    pub fn export_only<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_fields(names, true)
    }

    /// Union `names` into the field list, keeping first-seen order.
    pub fn add_fields<I, S>(mut self, names: I, export_only: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if export_only && !self.schema.export_only_fields.contains(&name) {
                self.schema.export_only_fields.push(name.clone());
            }
            if !self.schema.fields.contains(&name) {
                self.schema.fields.push(name);
            }
        }
        self
    }

    /// Use `name` as the primary key; it is also registered as a field.
    pub fn primary_key(self, name: impl Into<String>) -> Self {
        let name = name.into();
        let mut builder = self.field(name.clone());
        builder.schema.primary_key = name;
        builder
    }

    /// Declare (or extend) a one-to-many association.
    pub fn has_many<F>(self, name: impl Into<String>, define: F) -> Self
    where
        F: FnOnce(SchemaBuilder) -> SchemaBuilder,
    {
        self.define(Kind::Many, name.into(), None, define)
    }

    /// Declare a one-to-many association whose singular form is irregular.
    pub fn has_many_as<F>(self, name: impl Into<String>, singular: impl Into<String>, define: F) -> Self
    where
        F: FnOnce(SchemaBuilder) -> SchemaBuilder,
    {
        self.define(Kind::Many, name.into(), Some(singular.into()), define)
    }

    /// Declare (or extend) a one-to-one association.
    pub fn has_one<F>(self, name: impl Into<String>, define: F) -> Self
    where
        F: FnOnce(SchemaBuilder) -> SchemaBuilder,
    {
        self.define(Kind::One, name.into(), None, define)
    }

    /// Alias of [`has_one`](Self::has_one).
    pub fn belongs_to<F>(self, name: impl Into<String>, define: F) -> Self
    where
        F: FnOnce(SchemaBuilder) -> SchemaBuilder,
    {
        self.has_one(name, define)
    }

    fn define<F>(mut self, kind: Kind, name: String, singular: Option<String>, define: F) -> Self
    where
        F: FnOnce(SchemaBuilder) -> SchemaBuilder,
    {
        if self.error.is_some() {
            return self;
        }
        if !self.root {
            self.error = Some(SchemaError::NestedAssociation { association: name });
            return self;
        }

        let list = match kind {
            Kind::Many => &mut self.schema.has_many,
            Kind::One => &mut self.schema.has_one,
        };
        let position = list.iter().position(|a| a.name == name);
        let existing = position.map(|i| std::mem::take(&mut list[i].schema));

        let child = define(SchemaBuilder::child(existing.unwrap_or_default()));
        if let Some(err) = child.error {
            self.error = Some(err);
            return self;
        }

        match position {
            Some(i) => {
                list[i].schema = child.schema;
                if singular.is_some() {
                    list[i].singular = singular;
                }
            }
            None => list.push(Association {
                name,
                singular,
                schema: child.schema,
            }),
        }
        self
    }

    /// Finish, reporting the first definition error.
    pub fn build(self) -> SchemaResult<Schema> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.schema),
        }
    }
}
