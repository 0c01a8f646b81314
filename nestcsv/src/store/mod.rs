//! Capability contracts between the pipelines and the caller's data.
//!
//! - [`Record`] - read side, used by the export pipeline
//! - [`Entity`] - write side, used by the import pipeline
//! - [`Store`] - batched lookup and construction of entities
//!
//! The pipelines never persist anything: they hand resolved entities back
//! and the caller saves or destroys them. [`memory::MemoryStore`] is a
//! complete in-memory implementation used by the tests and as a reference
//! for real backends.

pub mod memory;

use serde_json::Value;
use std::collections::HashMap;

use crate::error::{FieldResult, StoreResult};

pub use memory::{MemoryEntity, MemoryStore, TableDef};

/// Something the encoder can read fields and associations from.
pub trait Record {
    /// Value of a scalar property, `None` when the record has no such property.
    fn read(&self, field: &str) -> Option<Value>;

    /// Children of a has-many association, `None` when there is no such association.
    fn has_many(&self, name: &str) -> Option<Vec<&dyn Record>>;

    /// The single child of a has-one association.
    ///
    /// `None` when there is no such association, `Some(None)` when it is empty.
    fn has_one(&self, name: &str) -> Option<Option<&dyn Record>>;
}

/// An entity the import pipeline assigns attributes onto.
pub trait Entity {
    /// Assign one attribute, rejecting names the entity does not know.
    fn try_set(&mut self, field: &str, value: Value) -> FieldResult<()>;

    /// Flag the entity for deletion when the caller persists it.
    fn mark_for_destruction(&mut self);

    fn is_new(&self) -> bool;

    fn is_dirty(&self) -> bool;

    fn is_marked_for_destruction(&self) -> bool;
}

/// The external persistent store.
pub trait Store {
    type Entity: Entity + Clone;

    /// Fetch every entity whose `primary_key` value is in `keys`, keyed by that value.
    ///
    /// `eager_load` names associations that should be loaded along with them.
    fn find_many(
        &self,
        primary_key: &str,
        keys: &[String],
        eager_load: &[String],
    ) -> StoreResult<HashMap<String, Self::Entity>>;

    /// A blank, unsaved entity.
    fn new_entity(&self) -> Self::Entity;
}

impl<T: Record + ?Sized> Record for &T {
    fn read(&self, field: &str) -> Option<Value> {
        (**self).read(field)
    }

    fn has_many(&self, name: &str) -> Option<Vec<&dyn Record>> {
        (**self).has_many(name)
    }

    fn has_one(&self, name: &str) -> Option<Option<&dyn Record>> {
        (**self).has_one(name)
    }
}

// JSON documents can be exported directly: objects are records, arrays of
// objects are has-many children and a nested object is a has-one child.
impl Record for Value {
    fn read(&self, field: &str) -> Option<Value> {
        self.as_object()?.get(field).cloned()
    }

    fn has_many(&self, name: &str) -> Option<Vec<&dyn Record>> {
        match self.as_object()?.get(name)? {
            Value::Array(items) => Some(items.iter().map(|v| v as &dyn Record).collect()),
            Value::Null => Some(Vec::new()),
            _ => None,
        }
    }

    fn has_one(&self, name: &str) -> Option<Option<&dyn Record>> {
        match self.as_object()?.get(name)? {
            Value::Null => Some(None),
            child @ Value::Object(_) => Some(Some(child as &dyn Record)),
            _ => None,
        }
    }
}
