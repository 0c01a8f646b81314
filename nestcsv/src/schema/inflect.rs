//! Suffix-based singularization of association names.
//!
//! Has-many cells in the extension region are keyed by the singular
//! association name (`review_0_tomatoes` for `reviews`). Encode and decode
//! both go through [`Association::singular`](super::Association::singular),
//! which uses [`singularize`] unless the schema declares the singular form
//! explicitly, so irregular words only need to be spelled out once.

/// `reviews` → `review`, `categories` → `category`.
pub fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{}y", stem);
        }
    }
    if word.ends_with("ss") {
        return word.to_string();
    }
    match word.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => word.to_string(),
    }
}
