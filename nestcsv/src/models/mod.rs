//! Data passed between the pipeline stages.
//!
//! - [`AttributeRow`] - One decoded CSV row as a nested JSON object
//! - [`Resolved`] - What the import pipeline yields for one row
//!
//! Attribute rows keep column order (`serde_json` is built with
//! `preserve_order`). Values are `String` for present cells, `Null` for a
//! present-but-blank has-many cell, an array of objects for has-many
//! associations (gaps are empty objects) and an object for has-one.

use serde_json::{Map, Value};

/// Decoded, pre-persistence representation of one CSV row.
pub type AttributeRow = Map<String, Value>;

/// Tokens accepted as "true" for the `_destroy` control field.
pub const TRUE_VALUES: &[&str] = &["true", "TRUE", "t", "T", "1", "on", "ON"];

/// Whether a cell counts as empty.
pub fn is_blank(cell: &str) -> bool {
    cell.trim().is_empty()
}

/// Whether a decoded value is a recognised truthy token.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => TRUE_VALUES.contains(&s.as_str()),
        _ => false,
    }
}

/// Render a value as CSV cell text.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Lookup key held in `field`, accepting numbers as well as text.
pub fn key_text(row: &AttributeRow, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::String(s) if !is_blank(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// Import Results
// =============================================================================

/// Outcome of reconciling one import row.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<E> {
    /// A persisted entity with the row's attributes assigned.
    Update(E),
    /// A new entity built from a row without a primary key.
    Create(E),
    /// An entity (new or persisted) marked for destruction, nothing assigned.
    Destroy(E),
    /// The row named a primary key with no persisted entity.
    NotFound {
        /// Source row, counting the header as row 1
        row: usize,
        key: String,
    },
}

impl<E> Resolved<E> {
    pub fn entity(&self) -> Option<&E> {
        match self {
            Resolved::Update(e) | Resolved::Create(e) | Resolved::Destroy(e) => Some(e),
            Resolved::NotFound { .. } => None,
        }
    }

    pub fn entity_mut(&mut self) -> Option<&mut E> {
        match self {
            Resolved::Update(e) | Resolved::Create(e) | Resolved::Destroy(e) => Some(e),
            Resolved::NotFound { .. } => None,
        }
    }

    pub fn into_entity(self) -> Option<E> {
        match self {
            Resolved::Update(e) | Resolved::Create(e) | Resolved::Destroy(e) => Some(e),
            Resolved::NotFound { .. } => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Resolved::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthy_tokens() {
        for token in TRUE_VALUES {
            assert!(is_truthy(&json!(token)), "{token}");
        }
        for token in ["false", "0", "", "no", "nope", "True", "yes", " true "] {
            assert!(!is_truthy(&json!(token)), "{token}");
        }
        assert!(is_truthy(&json!(true)));
        assert!(!is_truthy(&Value::Null));
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&json!(99)), "99");
        assert_eq!(cell_text(&json!("Post")), "Post");
        assert_eq!(cell_text(&json!(false)), "false");
        assert_eq!(cell_text(&Value::Null), "");
    }

    #[test]
    fn test_key_text() {
        let row = json!({ "id": 4, "name": " Big ", "blank": "" });
        let row = row.as_object().unwrap();
        assert_eq!(key_text(row, "id").as_deref(), Some("4"));
        assert_eq!(key_text(row, "name").as_deref(), Some("Big"));
        assert_eq!(key_text(row, "blank"), None);
    }

    #[test]
    fn test_resolved_accessors() {
        let found: Resolved<u32> = Resolved::Update(7);
        assert_eq!(found.entity(), Some(&7));
        let missing: Resolved<u32> = Resolved::NotFound { row: 2, key: "234".into() };
        assert!(missing.is_not_found());
        assert_eq!(missing.into_entity(), None);
    }
}
