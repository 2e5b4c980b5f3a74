//! Wildcard name matching and attribute filtering.
//!
//! Patterns support `*` (everything), exact match, `prefix*` and `*suffix`.
//! Infix wildcards and regular expressions are deliberately unsupported;
//! clients relying on the query surface get stable, simple semantics.

use serde_json::Value;

use crate::error::LcResult;
use crate::model::EntityType;
use crate::store::ObjectStore;

/// Simple wildcard match (`*`, exact, `prefix*`, `*suffix`).
pub fn matches(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if pattern == value {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        if !prefix.is_empty() && value.starts_with(prefix) {
            return true;
        }
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        if !suffix.is_empty() && value.ends_with(suffix) {
            return true;
        }
    }
    false
}

/// Stringify a JSON field value the way the query surface compares it.
fn field_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Filter a name listing by a name pattern and optional attribute patterns.
///
/// Name matching needs no file access. Each attribute filter re-opens and
/// parses the candidate record and keeps it only when the named field exists
/// and matches its pattern.
pub async fn filter_names(
    store: &ObjectStore,
    entity: EntityType,
    name_pattern: &str,
    attr_filters: &[(String, String)],
) -> LcResult<Vec<String>> {
    let mut matched: Vec<String> = store
        .list(entity)
        .await?
        .into_iter()
        .filter(|name| matches(name_pattern, name))
        .collect();

    if attr_filters.is_empty() {
        return Ok(matched);
    }

    let mut kept = Vec::new();
    for name in matched.drain(..) {
        let record = match store.load_value(entity, &name).await {
            Ok(record) => record,
            // A record removed between listing and filtering just drops out.
            Err(_) => continue,
        };
        let keep = attr_filters.iter().all(|(field, pattern)| {
            record
                .get(field)
                .map(|v| matches(pattern, &field_as_string(v)))
                .unwrap_or(false)
        });
        if keep {
            kept.push(name);
        }
    }
    Ok(kept)
}
