//! Batched reconciliation of attribute rows against a [`Store`].
//!
//! ```text
//!   rows ──► Fill (≤ batch_size) ──► Resolve (one find_many) ──► Yield ──► caller
//!              ▲                                                  │
//!              └──────────────── buffer drained ◄─────────────────┘
//! ```
//!
//! Each pulled batch is resolved in full before its first entity is handed
//! out, so stopping iteration never leaves a batch half applied. Nothing is
//! persisted here: the caller saves or destroys what it receives.

use std::collections::{HashMap, VecDeque};
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::diagnostics::{DiagnosticKind, Diagnostics, LogEntry};
use crate::import::AttributeStream;
use crate::models::{is_truthy, key_text, AttributeRow, Resolved};
use crate::schema::{Schema, DESTROY_FIELD};
use crate::store::{Entity, Store};

/// Tuning for [`ReconcileImport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportOptions {
    /// Rows resolved per store lookup
    pub batch_size: usize,

    /// Extra associations to eager-load on top of the has-many ones
    pub includes: Vec<String>,

    /// Appended to association names for nested writes
    pub nested_suffix: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            batch_size: 20,
            includes: Vec::new(),
            nested_suffix: "_attributes".to_string(),
        }
    }
}

impl ImportOptions {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_includes<I, S>(mut self, includes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.includes.extend(includes.into_iter().map(Into::into));
        self
    }

    /// Batch size actually used; never zero.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

/// Lazy sequence of [`Resolved`] entities, one per input row.
pub struct ReconcileImport<'a, I, S: Store> {
    schema: &'a Schema,
    store: &'a S,
    rows: I,
    options: ImportOptions,
    eager_load: Vec<String>,
    diagnostics: Diagnostics,
    buffer: VecDeque<Resolved<S::Entity>>,
    /// Row number given to the next input row; the header is row 1
    next_row: usize,
    exhausted: bool,
}

impl<'a, I, S> ReconcileImport<'a, I, S>
where
    I: Iterator<Item = AttributeRow>,
    S: Store,
{
    /// Reconcile rows from any source of attribute rows.
    pub fn from_attrs(schema: &'a Schema, store: &'a S, rows: I, options: ImportOptions) -> Self {
        let mut eager_load: Vec<String> = schema.association_names().map(String::from).collect();
        for include in &options.includes {
            if !eager_load.contains(include) {
                eager_load.push(include.clone());
            }
        }

        Self {
            schema,
            store,
            rows,
            options,
            eager_load,
            diagnostics: Diagnostics::new(),
            buffer: VecDeque::new(),
            next_row: 2,
            exhausted: false,
        }
    }

    /// Report into an existing sink instead of a fresh one.
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Associations passed to every store lookup.
    pub fn eager_load(&self) -> &[String] {
        &self.eager_load
    }

    fn fill(&mut self) -> Vec<(usize, AttributeRow)> {
        let size = self.options.effective_batch_size();
        let mut batch = Vec::with_capacity(size);
        while batch.len() < size {
            match self.rows.next() {
                Some(attrs) => {
                    batch.push((self.next_row, attrs));
                    self.next_row += 1;
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        batch
    }

    fn resolve(&mut self, batch: Vec<(usize, AttributeRow)>) {
        let primary_key = self.schema.primary_key();

        let mut keys: Vec<String> = Vec::new();
        for (_, attrs) in &batch {
            if let Some(key) = key_text(attrs, primary_key) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }

        let found = if keys.is_empty() {
            HashMap::new()
        } else {
            match self.store.find_many(primary_key, &keys, &self.eager_load) {
                Ok(found) => found,
                Err(e) => {
                    let first_row = batch.first().map(|(row, _)| *row).unwrap_or(self.next_row);
                    self.diagnostics.log(
                        LogEntry::error(DiagnosticKind::StoreFailure, e.to_string()).with_row(first_row),
                    );
                    self.exhausted = true;
                    return;
                }
            }
        };

        log::debug!(
            target: "nestcsv",
            "resolved batch of {} rows ({} keys, {} found)",
            batch.len(),
            keys.len(),
            found.len()
        );

        for (row, attrs) in batch {
            let resolved = self.resolve_row(row, attrs, &found);
            self.buffer.push_back(resolved);
        }
    }

    fn resolve_row(
        &self,
        row: usize,
        mut attrs: AttributeRow,
        found: &HashMap<String, S::Entity>,
    ) -> Resolved<S::Entity> {
        let primary_key = self.schema.primary_key();

        let (mut entity, existing) = match key_text(&attrs, primary_key) {
            Some(key) => match found.get(&key) {
                Some(entity) => (entity.clone(), true),
                None => {
                    self.diagnostics.log(
                        LogEntry::error(
                            DiagnosticKind::NotFound,
                            format!("record not found with primary key: {:?}", key),
                        )
                        .with_row(row)
                        .with_field(primary_key),
                    );
                    return Resolved::NotFound { row, key };
                }
            },
            None => (self.store.new_entity(), false),
        };

        let destroy = attrs.remove(DESTROY_FIELD);
        if self.schema.accepts_destroy() && destroy.as_ref().is_some_and(is_truthy) {
            entity.mark_for_destruction();
            return Resolved::Destroy(entity);
        }

        for (field, value) in self.nested_writes(attrs) {
            if let Err(e) = entity.try_set(&field, value) {
                self.diagnostics.log(
                    LogEntry::error(DiagnosticKind::UnknownField, e.to_string())
                        .with_row(row)
                        .with_field(e.field()),
                );
            }
        }

        if existing {
            Resolved::Update(entity)
        } else {
            Resolved::Create(entity)
        }
    }

    /// Rename association keys to the store's nested-write form.
    fn nested_writes(&self, attrs: AttributeRow) -> AttributeRow {
        attrs
            .into_iter()
            .map(|(key, value)| {
                let nested = self.schema.has_many_named(&key).is_some()
                    || self.schema.has_one_named(&key).is_some();
                if nested {
                    (format!("{}{}", key, self.options.nested_suffix), value)
                } else {
                    (key, value)
                }
            })
            .collect()
    }
}

impl<'a, R, S> ReconcileImport<'a, AttributeStream<'a, R>, S>
where
    R: Read,
    S: Store,
{
    /// Reconcile a CSV attribute stream, sharing its diagnostics.
    pub fn from_csv(schema: &'a Schema, store: &'a S, stream: AttributeStream<'a, R>, options: ImportOptions) -> Self {
        let diagnostics = stream.diagnostics().clone();
        Self::from_attrs(schema, store, stream, options).with_diagnostics(diagnostics)
    }
}

impl<'a, I, S> Iterator for ReconcileImport<'a, I, S>
where
    I: Iterator<Item = AttributeRow>,
    S: Store,
{
    type Item = Resolved<S::Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(resolved) = self.buffer.pop_front() {
                return Some(resolved);
            }
            if self.exhausted {
                return None;
            }
            let batch = self.fill();
            if batch.is_empty() {
                return None;
            }
            self.resolve(batch);
        }
    }
}

impl<'a, I, S> std::iter::FusedIterator for ReconcileImport<'a, I, S>
where
    I: Iterator<Item = AttributeRow>,
    S: Store,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;
    use crate::store::{MemoryEntity, MemoryStore, TableDef};
    use serde_json::{json, Value};

    fn schema() -> Schema {
        SchemaBuilder::new()
            .fields(["id", "name", "author", "_destroy"])
            .has_many("reviews", |r| r.fields(["id", "tomatoes", "publication"]))
            .build()
            .unwrap()
    }

    fn store() -> MemoryStore {
        MemoryStore::new(
            TableDef::new(["name", "author"])
                .with_has_many("reviews", TableDef::new(["tomatoes", "publication"])),
        )
    }

    fn seeded() -> MemoryStore {
        let store = store();
        store.insert(json!({ "id": 1, "name": "Big Fiction", "author": "Sneed" })).unwrap();
        store.insert(json!({ "id": 2, "name": "Wee Little Fiction", "author": "Sneed" })).unwrap();
        store.insert(json!({ "id": 3, "name": "Doomed", "author": "Nobody" })).unwrap();
        store
    }

    fn import<'a>(
        schema: &'a Schema,
        store: &'a MemoryStore,
        csv: &'a str,
        options: ImportOptions,
    ) -> ReconcileImport<'a, AttributeStream<'a, &'a [u8]>, MemoryStore> {
        let stream = AttributeStream::from_reader(schema, csv.as_bytes());
        ReconcileImport::from_csv(schema, store, stream, options)
    }

    fn rows(values: Vec<Value>) -> impl Iterator<Item = AttributeRow> {
        values.into_iter().filter_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
    }

    /// (outcome, id, name, new, dirty, destroy)
    fn summarize(resolved: &Resolved<MemoryEntity>) -> (&'static str, String, String, bool, bool, bool) {
        let outcome = match resolved {
            Resolved::Update(_) => "update",
            Resolved::Create(_) => "create",
            Resolved::Destroy(_) => "destroy",
            Resolved::NotFound { .. } => "not_found",
        };
        match resolved.entity() {
            Some(e) => (
                outcome,
                e.text("id"),
                e.text("name"),
                e.is_new(),
                e.is_dirty(),
                e.is_marked_for_destruction(),
            ),
            None => (outcome, String::new(), String::new(), false, false, false),
        }
    }

    const MIXED: &str = "id,name,author,_destroy\n\
                         ,Natty,Sneed\n\
                         1,Big Fiction,Sneed\n\
                         2,Wee Little NonFiction,Sneed\n\
                         3,,,true\n";

    #[test]
    fn test_create_update_destroy() {
        let schema = schema();
        let store = seeded();
        let results: Vec<_> = import(&schema, &store, MIXED, ImportOptions::default()).collect();

        let summary: Vec<_> = results.iter().map(summarize).collect();
        assert_eq!(
            summary,
            vec![
                ("create", String::new(), "Natty".to_string(), true, true, false),
                ("update", "1".to_string(), "Big Fiction".to_string(), false, false, false),
                ("update", "2".to_string(), "Wee Little NonFiction".to_string(), false, true, false),
                ("destroy", "3".to_string(), "Doomed".to_string(), false, false, true),
            ]
        );
        assert_eq!(store.lookups(), 1);
    }

    #[test]
    fn test_batch_size_does_not_change_results() {
        let schema = schema();
        let mut outputs = Vec::new();

        for (batch_size, lookups) in [(2, 2), (4, 1), (6, 1)] {
            let store = seeded();
            let options = ImportOptions::default().with_batch_size(batch_size);
            let summary: Vec<_> = import(&schema, &store, MIXED, options)
                .map(|r| summarize(&r))
                .collect();
            assert_eq!(store.lookups(), lookups, "batch size {batch_size}");
            outputs.push(summary);
        }

        assert_eq!(outputs[0].len(), 4);
        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[1], outputs[2]);
    }

    #[test]
    fn test_zero_batch_size_means_one() {
        let schema = schema();
        let store = seeded();
        let options = ImportOptions::default().with_batch_size(0);
        let count = import(&schema, &store, "id,name\n1,A\n2,B\n3,C\n", options).count();
        assert_eq!(count, 3);
        assert_eq!(store.lookups(), 3);
    }

    #[test]
    fn test_not_found_keeps_position() {
        let schema = schema();
        let store = seeded();
        let mut pipeline = import(&schema, &store, "id,name\n234,Ghost\n1,Big Fiction\n", ImportOptions::default());

        assert_eq!(pipeline.next(), Some(Resolved::NotFound { row: 2, key: "234".into() }));
        assert!(matches!(pipeline.next(), Some(Resolved::Update(_))));
        assert!(pipeline.next().is_none());

        let diagnostics = pipeline.diagnostics();
        assert_eq!(diagnostics.count(DiagnosticKind::NotFound), 1);
        assert_eq!(diagnostics.render(), "[row 2] record not found with primary key: \"234\"");
    }

    #[test]
    fn test_destroy_assigns_nothing() {
        let schema = schema();
        let store = seeded();
        let results: Vec<_> =
            import(&schema, &store, "id,name,_destroy\n1,Renamed,1\n", ImportOptions::default()).collect();

        let Some(Resolved::Destroy(book)) = results.first() else {
            panic!("expected a destroy, got {:?}", results);
        };
        assert!(book.is_marked_for_destruction());
        assert_eq!(book.text("name"), "Big Fiction");
        assert!(book.changed_fields().is_empty());
    }

    #[test]
    fn test_destroy_new_row() {
        let schema = schema();
        let store = seeded();
        let results: Vec<_> =
            import(&schema, &store, "id,name,_destroy\n,Stillborn,on\n", ImportOptions::default()).collect();
        let Some(Resolved::Destroy(book)) = results.first() else {
            panic!("expected a destroy");
        };
        assert!(book.is_new());
        assert_eq!(book.text("name"), "");
    }

    #[test]
    fn test_falsy_destroy_is_not_assigned() {
        let schema = schema();
        let store = seeded();
        let mut pipeline = import(&schema, &store, "id,name,_destroy\n,Natty,false\n", ImportOptions::default());
        assert!(matches!(pipeline.next(), Some(Resolved::Create(_))));
        assert!(pipeline.diagnostics().is_empty());
    }

    #[test]
    fn test_tokens_outside_true_values_do_not_destroy() {
        let schema = schema();
        let store = seeded();
        let results: Vec<_> =
            import(&schema, &store, "id,name,_destroy\n,Natty,yes\n,Plain,True\n", ImportOptions::default()).collect();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, Resolved::Create(_))), "{:?}", results);
    }

    #[test]
    fn test_undeclared_destroy_is_ignored() {
        let schema = SchemaBuilder::new().field("name").build().unwrap();
        let store = store();
        let input = rows(vec![json!({ "name": "Natty", "_destroy": "true" })]);
        let results: Vec<_> = ReconcileImport::from_attrs(&schema, &store, input, ImportOptions::default()).collect();

        let Some(Resolved::Create(book)) = results.first() else {
            panic!("expected a create");
        };
        assert!(!book.is_marked_for_destruction());
        assert_eq!(book.text("name"), "Natty");
    }

    #[test]
    fn test_unknown_attribute_is_logged_and_skipped() {
        let schema = SchemaBuilder::new().fields(["id", "name", "whats_this"]).build().unwrap();
        let store = seeded();
        let mut pipeline = import(&schema, &store, "id,name,whats_this\n,Natty,huh\n", ImportOptions::default());

        let Some(Resolved::Create(book)) = pipeline.next() else {
            panic!("expected a create");
        };
        assert_eq!(book.text("name"), "Natty");

        let entries = pipeline.diagnostics().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, DiagnosticKind::UnknownField);
        assert_eq!(entries[0].row, Some(2));
        assert_eq!(entries[0].field.as_deref(), Some("whats_this"));
    }

    #[test]
    fn test_nested_has_many_write() {
        let schema = schema();
        let store = store();
        store
            .insert(json!({
                "id": 1,
                "name": "Big Fiction",
                "reviews": [{ "id": 5, "tomatoes": 99, "publication": "Post" }]
            }))
            .unwrap();

        let csv = "id,name\n1,Big Fiction,review_0_id,5,review_0_tomatoes,80,review_1_tomatoes,15\n";
        let results: Vec<_> = import(&schema, &store, csv, ImportOptions::default()).collect();

        let Some(Resolved::Update(book)) = results.first() else {
            panic!("expected an update");
        };
        let reviews = book.children("reviews");
        assert_eq!(reviews.len(), 2);
        assert_eq!(reviews[0].text("tomatoes"), "80");
        assert_eq!(reviews[0].text("publication"), "Post");
        assert!(reviews[1].is_new());
        assert!(book.is_dirty());
        assert_eq!(store.last_eager_load(), vec!["reviews"]);
    }

    #[test]
    fn test_custom_nested_suffix() {
        let schema = schema();
        let store = seeded();
        let options = ImportOptions {
            nested_suffix: "_rows".to_string(),
            ..ImportOptions::default()
        };
        let csv = "id,name\n1,Big Fiction,review_0_tomatoes,80\n";
        let mut pipeline = import(&schema, &store, csv, options);
        assert!(matches!(pipeline.next(), Some(Resolved::Update(_))));
        assert_eq!(pipeline.diagnostics().entries()[0].field.as_deref(), Some("reviews_rows"));
    }

    #[test]
    fn test_includes_are_eager_loaded() {
        let schema = schema();
        let store = seeded();
        let options = ImportOptions::default().with_includes(["publisher", "reviews"]);
        let pipeline = import(&schema, &store, "id\n1\n", options);
        assert_eq!(pipeline.eager_load(), ["reviews", "publisher"]);
        assert_eq!(pipeline.count(), 1);
        assert_eq!(store.last_eager_load(), vec!["reviews", "publisher"]);
    }

    #[test]
    fn test_duplicate_keys_get_separate_entities() {
        let schema = schema();
        let store = seeded();
        let results: Vec<_> =
            import(&schema, &store, "id,name\n1,First\n1,Second\n", ImportOptions::default()).collect();

        let names: Vec<_> = results
            .iter()
            .filter_map(|r| r.entity())
            .map(|e| e.text("name"))
            .collect();
        assert_eq!(names, vec!["First", "Second"]);
        assert_eq!(store.lookups(), 1);
    }

    #[test]
    fn test_rows_without_keys_skip_lookup() {
        let schema = schema();
        let store = seeded();
        let count = import(&schema, &store, "id,name\n,A\n,B\n", ImportOptions::default()).count();
        assert_eq!(count, 2);
        assert_eq!(store.lookups(), 0);
    }

    #[test]
    fn test_store_failure_stops_import() {
        let schema = SchemaBuilder::new().primary_key("isbn").field("name").build().unwrap();
        let store = store();
        let input = rows(vec![
            json!({ "name": "A" }),
            json!({ "isbn": "9", "name": "B" }),
            json!({ "name": "C" }),
        ]);
        let options = ImportOptions::default().with_batch_size(1);
        let mut pipeline = ReconcileImport::from_attrs(&schema, &store, input, options);

        assert!(matches!(pipeline.next(), Some(Resolved::Create(_))));
        assert!(pipeline.next().is_none());
        assert!(pipeline.next().is_none());

        let entries = pipeline.diagnostics().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, DiagnosticKind::StoreFailure);
        assert_eq!(entries[0].row, Some(3));
    }

    #[test]
    fn test_diagnostics_shared_with_stream() {
        let schema = schema();
        let store = seeded();
        let pipeline = import(&schema, &store, "id,bogus\n234,x\n", ImportOptions::default());
        let diagnostics = pipeline.diagnostics().clone();
        assert_eq!(pipeline.count(), 1);
        assert_eq!(diagnostics.count(DiagnosticKind::UnknownColumn), 1);
        assert_eq!(diagnostics.count(DiagnosticKind::NotFound), 1);
    }

    #[test]
    fn test_options_from_json() {
        let options: ImportOptions = serde_json::from_str(r#"{ "batchSize": 5 }"#).unwrap();
        assert_eq!(options.batch_size, 5);
        assert!(options.includes.is_empty());
        assert_eq!(options.nested_suffix, "_attributes");
    }
}
