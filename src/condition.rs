//! Default tombstone-aware condition and the field-level merge policy.

use serde_json::{json, Map, Value};

/// The default condition for a schema with `metadata.deleted`: the
/// `$or` triple from spec.md §3. For a schema without it, the empty
/// condition (`{}`).
pub fn default_condition(has_metadata_deleted: bool) -> Value {
    if !has_metadata_deleted {
        return json!({});
    }
    json!({
        "$or": [
            { "metadata": { "$eq": null } },
            { "metadata.deleted": { "$eq": null } },
            { "metadata.deleted": { "$exists": false } },
        ]
    })
}

/// Merge a user-supplied condition into the default condition:
/// field-level union where user keys overwrite same-named default
/// keys, and the default's `$or` is preserved unless the user supplies
/// their own `$or`.
pub fn merge(default: &Value, user: &Value) -> Value {
    let default_map = default.as_object().cloned().unwrap_or_default();
    let user_map = user.as_object().cloned().unwrap_or_default();

    let mut merged: Map<String, Value> = default_map;
    for (key, value) in user_map {
        merged.insert(key, value);
    }
    Value::Object(merged)
}
