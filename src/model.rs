//! The storage backend contract consumed by Store, produced by the
//! caller's `buildModel(schema)` equivalent. Query dialect and
//! persistence are entirely the implementor's concern (spec.md §1).

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// The data model a Store dispatches decoded requests to.
#[async_trait]
pub trait Model: Send + Sync + 'static {
    async fn count(&self, conditions: Value) -> Result<i64>;

    /// `object` may be a scalar JSON object or an array of objects;
    /// implementors must handle both (spec.md §4.5/§6).
    async fn create(&self, object: Value, projection: Value) -> Result<Value>;

    async fn find(&self, conditions: Value, projection: Value, options: Value) -> Result<Vec<Value>>;

    /// `options` always carries `multi: true`, forced by the Store
    /// (spec.md §4.5/§9) — callers cannot override it through the wire
    /// payload.
    async fn update(&self, conditions: Value, object: Value, options: Value) -> Result<Value>;
}
