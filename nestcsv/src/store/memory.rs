//! In-memory store implementing the [`Store`], [`Entity`] and [`Record`] contracts.
//!
//! Tables are declared with a [`TableDef`]: scalar columns plus one level of
//! has-many / has-one child tables. Entities track their persisted values,
//! so `is_dirty` reflects assignments that actually change something.
//! Values are compared by their CSV text, which means assigning `"99"` to a
//! column holding `99` is not a change.
//!
//! Nested writes follow the `{assoc}_attributes` convention produced by the
//! import pipeline: has-many children are matched by `id`, children without
//! an `id` are built, and a truthy `_destroy` marks an existing child.

use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;

use super::{Entity, Record, Store};
use crate::error::{FieldError, FieldResult, StoreError, StoreResult};
use crate::models::{cell_text, is_truthy, key_text};
use crate::schema::DESTROY_FIELD;

const ID: &str = "id";
const NESTED_SUFFIX: &str = "_attributes";

// =============================================================================
// Table definitions
// =============================================================================

/// Columns and associations of one in-memory table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableDef {
    columns: Vec<String>,
    has_many: Vec<(String, Arc<TableDef>)>,
    has_one: Vec<(String, Arc<TableDef>)>,
}

impl TableDef {
    /// A table with the given columns; an `id` column is always present.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if !columns.iter().any(|c| c == ID) {
            columns.insert(0, ID.to_string());
        }
        Self {
            columns,
            has_many: Vec::new(),
            has_one: Vec::new(),
        }
    }

    pub fn with_has_many(mut self, name: impl Into<String>, child: TableDef) -> Self {
        self.has_many.push((name.into(), Arc::new(child)));
        self
    }

    pub fn with_has_one(mut self, name: impl Into<String>, child: TableDef) -> Self {
        self.has_one.push((name.into(), Arc::new(child)));
        self
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    fn many_def(&self, name: &str) -> Option<&Arc<TableDef>> {
        self.has_many.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    fn one_def(&self, name: &str) -> Option<&Arc<TableDef>> {
        self.has_one.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }
}

// =============================================================================
// Entities
// =============================================================================

/// A row of a [`MemoryStore`] table, persisted or not.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntity {
    def: Arc<TableDef>,
    values: Map<String, Value>,
    persisted: Map<String, Value>,
    new_record: bool,
    destroy: bool,
    many: Vec<(String, Vec<MemoryEntity>)>,
    one: Vec<(String, Option<Box<MemoryEntity>>)>,
}

impl MemoryEntity {
    fn blank(def: Arc<TableDef>) -> Self {
        let many = def.has_many.iter().map(|(n, _)| (n.clone(), Vec::new())).collect();
        let one = def.has_one.iter().map(|(n, _)| (n.clone(), None)).collect();
        Self {
            def,
            values: Map::new(),
            persisted: Map::new(),
            new_record: true,
            destroy: false,
            many,
            one,
        }
    }

    /// Current value of a column.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Current value of a column as CSV text.
    pub fn text(&self, field: &str) -> String {
        self.values.get(field).map(cell_text).unwrap_or_default()
    }

    pub fn children(&self, assoc: &str) -> &[MemoryEntity] {
        self.many
            .iter()
            .find(|(n, _)| n == assoc)
            .map(|(_, c)| c.as_slice())
            .unwrap_or(&[])
    }

    pub fn child(&self, assoc: &str) -> Option<&MemoryEntity> {
        self.one
            .iter()
            .find(|(n, _)| n == assoc)
            .and_then(|(_, c)| c.as_deref())
    }

    /// Columns whose value differs from the persisted one.
    pub fn changed_fields(&self) -> Vec<String> {
        self.def
            .columns
            .iter()
            .filter(|c| self.values.get(*c) != self.persisted.get(*c))
            .cloned()
            .collect()
    }

    fn set_column(&mut self, field: &str, value: Value) {
        let current = self.values.get(field).map(cell_text).unwrap_or_default();
        if current != cell_text(&value) {
            self.values.insert(field.to_string(), value);
        }
    }

    /// Assign plain attributes and nested writes from a JSON object.
    fn assign_object(&mut self, attrs: &Map<String, Value>) -> FieldResult<()> {
        let mut first_error = None;
        for (field, value) in attrs {
            if field == DESTROY_FIELD {
                continue;
            }
            if let Err(err) = self.try_set(field, value.clone()) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn write_many(&mut self, assoc: &str, def: Arc<TableDef>, value: Value) -> FieldResult<()> {
        let items = match value {
            Value::Array(items) => items,
            Value::Null => return Ok(()),
            _ => {
                return Err(FieldError::InvalidValue {
                    field: format!("{}{}", assoc, NESTED_SUFFIX),
                    message: "expected an array of attribute objects".into(),
                })
            }
        };

        let Some(slot) = self.many.iter().position(|(n, _)| n == assoc) else {
            return Err(FieldError::unknown(assoc));
        };

        let mut first_error = None;
        for item in items {
            let Value::Object(attrs) = item else { continue };
            if attrs.is_empty() {
                continue;
            }
            let destroy = attrs.get(DESTROY_FIELD).is_some_and(is_truthy);
            let children = &mut self.many[slot].1;

            let result = match key_text(&attrs, ID) {
                Some(id) => match children.iter_mut().find(|c| c.text(ID) == id) {
                    Some(child) if destroy => {
                        child.mark_for_destruction();
                        Ok(())
                    }
                    Some(child) => child.assign_object(&attrs),
                    None => Err(FieldError::InvalidValue {
                        field: format!("{}{}", assoc, NESTED_SUFFIX),
                        message: format!("no {} child with id {}", assoc, id),
                    }),
                },
                None if destroy => Ok(()),
                None => {
                    let mut child = MemoryEntity::blank(Arc::clone(&def));
                    let result = child.assign_object(&attrs);
                    children.push(child);
                    result
                }
            };
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn write_one(&mut self, assoc: &str, def: Arc<TableDef>, value: Value) -> FieldResult<()> {
        let attrs = match value {
            Value::Object(attrs) => attrs,
            Value::Null => return Ok(()),
            _ => {
                return Err(FieldError::InvalidValue {
                    field: format!("{}{}", assoc, NESTED_SUFFIX),
                    message: "expected an attribute object".into(),
                })
            }
        };
        let Some(slot) = self.one.iter().position(|(n, _)| n == assoc) else {
            return Err(FieldError::unknown(assoc));
        };

        let destroy = attrs.get(DESTROY_FIELD).is_some_and(is_truthy);
        let current = &mut self.one[slot].1;
        let same_child = match (current.as_deref(), key_text(&attrs, ID)) {
            (Some(child), Some(id)) => child.text(ID) == id,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if same_child {
            if let Some(child) = current.as_deref_mut() {
                if destroy {
                    child.mark_for_destruction();
                    return Ok(());
                }
                return child.assign_object(&attrs);
            }
        }
        if destroy {
            return Ok(());
        }
        let mut child = MemoryEntity::blank(def);
        let result = child.assign_object(&attrs);
        *current = Some(Box::new(child));
        result
    }

    /// Mark as persisted, assigning ids and dropping destroyed children.
    fn persist(&mut self, ids: &Cell<u64>) {
        if self.values.get(ID).map_or(true, Value::is_null) {
            let id = ids.get() + 1;
            ids.set(id);
            self.values.insert(ID.to_string(), Value::from(id));
        }
        for (_, children) in &mut self.many {
            children.retain(|c| !c.destroy);
            for child in children.iter_mut() {
                child.persist(ids);
            }
        }
        for (_, child) in &mut self.one {
            if child.as_ref().is_some_and(|c| c.destroy) {
                *child = None;
            }
            if let Some(child) = child.as_deref_mut() {
                child.persist(ids);
            }
        }
        self.persisted = self.values.clone();
        self.new_record = false;
    }
}

impl Entity for MemoryEntity {
    fn try_set(&mut self, field: &str, value: Value) -> FieldResult<()> {
        if self.def.has_column(field) {
            self.set_column(field, value);
            return Ok(());
        }
        if let Some(assoc) = field.strip_suffix(NESTED_SUFFIX) {
            if let Some(def) = self.def.many_def(assoc).cloned() {
                return self.write_many(assoc, def, value);
            }
            if let Some(def) = self.def.one_def(assoc).cloned() {
                return self.write_one(assoc, def, value);
            }
        }
        Err(FieldError::unknown(field))
    }

    fn mark_for_destruction(&mut self) {
        self.destroy = true;
    }

    fn is_new(&self) -> bool {
        self.new_record
    }

    fn is_dirty(&self) -> bool {
        if self.values != self.persisted {
            return true;
        }
        let child_dirty = |c: &MemoryEntity| c.new_record || c.destroy || c.is_dirty();
        self.many.iter().flat_map(|(_, c)| c.iter()).any(child_dirty)
            || self.one.iter().filter_map(|(_, c)| c.as_deref()).any(child_dirty)
    }

    fn is_marked_for_destruction(&self) -> bool {
        self.destroy
    }
}

impl Record for MemoryEntity {
    fn read(&self, field: &str) -> Option<Value> {
        if field == DESTROY_FIELD {
            return Some(Value::Bool(self.destroy));
        }
        if !self.def.has_column(field) {
            return None;
        }
        Some(self.values.get(field).cloned().unwrap_or(Value::Null))
    }

    fn has_many(&self, name: &str) -> Option<Vec<&dyn Record>> {
        let (_, children) = self.many.iter().find(|(n, _)| n == name)?;
        Some(children.iter().map(|c| c as &dyn Record).collect())
    }

    fn has_one(&self, name: &str) -> Option<Option<&dyn Record>> {
        let (_, child) = self.one.iter().find(|(n, _)| n == name)?;
        Some(child.as_deref().map(|c| c as &dyn Record))
    }
}

// =============================================================================
// Store
// =============================================================================

/// A single in-memory table.
#[derive(Debug)]
pub struct MemoryStore {
    def: Arc<TableDef>,
    rows: RefCell<Vec<MemoryEntity>>,
    next_id: Cell<u64>,
    lookups: Cell<usize>,
    last_eager_load: RefCell<Vec<String>>,
}

impl MemoryStore {
    pub fn new(def: TableDef) -> Self {
        Self {
            def: Arc::new(def),
            rows: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            lookups: Cell::new(0),
            last_eager_load: RefCell::new(Vec::new()),
        }
    }

    /// Persist a row described as JSON, children included.
    pub fn insert(&self, seed: Value) -> FieldResult<MemoryEntity> {
        let entity = seed_entity(&self.def, seed)?;
        if let Some(id) = entity.get(ID).and_then(Value::as_u64) {
            self.next_id.set(self.next_id.get().max(id));
        }
        Ok(self.persist_row(entity))
    }

    /// Persist an entity yielded by an import.
    ///
    /// Entities marked for destruction are deleted and `None` is returned;
    /// otherwise the saved state is returned.
    pub fn save(&self, entity: MemoryEntity) -> Option<MemoryEntity> {
        if entity.destroy {
            if !entity.is_new() {
                let id = entity.text(ID);
                self.rows.borrow_mut().retain(|r| r.text(ID) != id);
            }
            return None;
        }
        Some(self.persist_row(entity))
    }

    fn persist_row(&self, mut entity: MemoryEntity) -> MemoryEntity {
        let mut rows = self.rows.borrow_mut();
        let existing = match entity.is_new() {
            true => None,
            false => {
                let id = entity.text(ID);
                rows.iter().position(|r| r.text(ID) == id)
            }
        };

        entity.persist(&self.next_id);
        match existing {
            Some(i) => rows[i] = entity.clone(),
            None => rows.push(entity.clone()),
        }
        entity
    }

    /// Persisted row whose `field` renders as `key`.
    pub fn find_by(&self, field: &str, key: &str) -> Option<MemoryEntity> {
        self.rows.borrow().iter().find(|r| r.text(field) == key).cloned()
    }

    /// Every persisted row in insertion order.
    pub fn all(&self) -> Vec<MemoryEntity> {
        self.rows.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.borrow().is_empty()
    }

    /// Number of `find_many` calls served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.get()
    }

    /// Associations requested by the most recent `find_many`.
    pub fn last_eager_load(&self) -> Vec<String> {
        self.last_eager_load.borrow().clone()
    }
}

/// Build an unsaved entity, children included, from a JSON seed.
fn seed_entity(def: &Arc<TableDef>, seed: Value) -> FieldResult<MemoryEntity> {
    let Value::Object(attrs) = seed else {
        return Err(FieldError::InvalidValue {
            field: ID.into(),
            message: "seed must be a JSON object".into(),
        });
    };

    let mut entity = MemoryEntity::blank(Arc::clone(def));
    for (field, value) in attrs {
        if def.has_column(&field) {
            entity.set_column(&field, value);
        } else if let Some(child_def) = def.many_def(&field) {
            let items = match value {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            let children = items
                .into_iter()
                .map(|item| seed_entity(child_def, item))
                .collect::<FieldResult<Vec<_>>>()?;
            if let Some((_, slot)) = entity.many.iter_mut().find(|(n, _)| *n == field) {
                *slot = children;
            }
        } else if let Some(child_def) = def.one_def(&field) {
            let child = match value {
                Value::Null => None,
                value => Some(Box::new(seed_entity(child_def, value)?)),
            };
            if let Some((_, slot)) = entity.one.iter_mut().find(|(n, _)| *n == field) {
                *slot = child;
            }
        } else {
            return Err(FieldError::unknown(field));
        }
    }
    Ok(entity)
}

impl Store for MemoryStore {
    type Entity = MemoryEntity;

    fn find_many(
        &self,
        primary_key: &str,
        keys: &[String],
        eager_load: &[String],
    ) -> StoreResult<HashMap<String, MemoryEntity>> {
        if !self.def.has_column(primary_key) {
            return Err(StoreError::Lookup(format!("unknown column '{}'", primary_key)));
        }
        self.lookups.set(self.lookups.get() + 1);
        *self.last_eager_load.borrow_mut() = eager_load.to_vec();

        Ok(self
            .rows
            .borrow()
            .iter()
            .filter_map(|row| {
                let key = key_text(&row.values, primary_key)?;
                keys.contains(&key).then(|| (key, row.clone()))
            })
            .collect())
    }

    fn new_entity(&self) -> MemoryEntity {
        MemoryEntity::blank(Arc::clone(&self.def))
    }
}
