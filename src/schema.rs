//! Schema Introspector — a schema's only effect on the core is its
//! `name` and whether `fields.metadata.deleted` is present.

use serde_json::{Map, Value};
use std::sync::Arc;

/// Field map shape: `serde_json::Map` mirrors the loosely-typed field
/// definitions a schema carries (only presence/absence of keys matters
/// to this crate).
pub type FieldMap = Map<String, Value>;

/// Placeholder type references passed to a schema's functional `fields`
/// form when it is evaluated once at construction time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeRefs;

/// A schema's `fields` is either a literal map or a function of
/// `TypeRefs` evaluated once during construction.
pub enum FieldSpec {
    Map(FieldMap),
    Fn(Arc<dyn Fn(&TypeRefs) -> FieldMap + Send + Sync>),
}

impl std::fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldSpec::Map(m) => f.debug_tuple("Map").field(m).finish(),
            FieldSpec::Fn(_) => f.write_str("Fn(..)"),
        }
    }
}

impl Clone for FieldSpec {
    fn clone(&self) -> Self {
        match self {
            FieldSpec::Map(m) => FieldSpec::Map(m.clone()),
            FieldSpec::Fn(f) => FieldSpec::Fn(f.clone()),
        }
    }
}

/// A schema: `{ name, fields: FieldMap | (TypeRefs) -> FieldMap }`.
#[derive(Debug, Clone)]
pub struct Schema {
    pub name: String,
    pub fields: FieldSpec,
}

impl Schema {
    pub fn new(name: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            name: name.into(),
            fields: FieldSpec::Map(fields),
        }
    }

    pub fn with_fn(
        name: impl Into<String>,
        fields_fn: impl Fn(&TypeRefs) -> FieldMap + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            fields: FieldSpec::Fn(Arc::new(fields_fn)),
        }
    }

    /// Evaluate `fields` once, calling the functional form with
    /// placeholder type references if needed.
    pub fn resolve_fields(&self) -> FieldMap {
        match &self.fields {
            FieldSpec::Map(m) => m.clone(),
            FieldSpec::Fn(f) => f(&TypeRefs),
        }
    }

    /// Whether `fields.metadata.deleted` is present — enables the
    /// tombstone-aware default condition and allows `delete`/`deleteById`.
    pub fn has_metadata_deleted(&self) -> bool {
        let fields = self.resolve_fields();
        fields
            .get("metadata")
            .and_then(Value::as_object)
            .map(|metadata| metadata.contains_key("deleted"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map_from(value: Value) -> FieldMap {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn detects_metadata_deleted_field() {
        let schema = Schema::new(
            "Schema",
            map_from(json!({"metadata": {"deleted": "date"}})),
        );
        assert!(schema.has_metadata_deleted());
    }

    #[test]
    fn absent_metadata_means_no_tombstone_policy() {
        let schema = Schema::new("Schema", map_from(json!({})));
        assert!(!schema.has_metadata_deleted());
    }

    #[test]
    fn functional_fields_are_evaluated_with_placeholder_refs() {
        let schema = Schema::with_fn("Schema", |_refs: &TypeRefs| {
            map_from(json!({"metadata": {"deleted": "date"}}))
        });
        assert!(schema.has_metadata_deleted());
    }
}
