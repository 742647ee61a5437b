//! Provider Core — typed CRUD methods over the Request/Batch Executors,
//! default-condition merge, and metadata stamping.

pub mod events;
pub mod stream;

use crate::condition;
use crate::envelope::{CountRequest, CreateRequest, FindRequest, UpdateRequest};
use crate::error::{PubSubError, Result};
use crate::executor::{self, BatchOptions, RequestOptions};
use crate::schema::Schema;
use crate::subject::{self, SubjectOptions, Subjects};
use crate::transport::Transport;
use serde_json::{json, Value};
use std::sync::Arc;

pub use events::EventBridge;
pub use stream::{StreamDuplex, StreamOptions};

/// Construction/per-call options: timeout, default batch size, and
/// subject derivation overrides.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub timeout_ms: u64,
    pub batch_size: usize,
    pub subject_options: SubjectOptions,
    pub no_ack_stream: bool,
    pub high_water_mark: Option<usize>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            batch_size: 100,
            subject_options: SubjectOptions::default(),
            no_ack_stream: false,
            high_water_mark: None,
        }
    }
}

impl ProviderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_subject_options(mut self, subject_options: SubjectOptions) -> Self {
        self.subject_options = subject_options;
        self
    }

    pub fn with_no_ack_stream(mut self, no_ack_stream: bool) -> Self {
        self.no_ack_stream = no_ack_stream;
        self
    }

    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = Some(high_water_mark);
        self
    }
}

/// Typed CRUD client for a schema: translates calls into request/reply
/// traffic, applies the tombstone-aware default condition, and exposes
/// the Event Bridge/Stream Duplex built on the same subjects.
pub struct Provider<T: Transport> {
    transport: Arc<T>,
    schema: Schema,
    subjects: Subjects,
    options: ProviderOptions,
    has_metadata: bool,
    default_conditions: Value,
    events: Arc<EventBridge<T>>,
}

impl<T: Transport> Provider<T> {
    /// Validates `schema`/`transport`, evaluates `fields` once, and
    /// computes `hasMetadata`/default conditions per spec.md §3/§4.6.
    pub fn new(schema: Schema, transport: Arc<T>, options: ProviderOptions) -> Result<Self> {
        if schema.name.trim().is_empty() {
            return Err(PubSubError::argument("schema name must not be empty"));
        }
        let subjects = subject::build(&schema.name, &options.subject_options);
        let has_metadata = schema.has_metadata_deleted();
        let default_conditions = condition::default_condition(has_metadata);
        let events = Arc::new(EventBridge::new(transport.clone(), subjects.clone()));

        Ok(Self {
            transport,
            schema,
            subjects,
            options,
            has_metadata,
            default_conditions,
            events,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn subjects(&self) -> &Subjects {
        &self.subjects
    }

    pub fn has_metadata(&self) -> bool {
        self.has_metadata
    }

    pub fn events(&self) -> Arc<EventBridge<T>> {
        self.events.clone()
    }

    pub fn stream(&self) -> StreamDuplex<T> {
        StreamDuplex::new(
            self.transport.clone(),
            self.subjects.clone(),
            self.events.clone(),
            StreamOptions::from(&self.options),
        )
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions {
            no_ack: false,
            timeout_ms: self.options.timeout_ms,
        }
    }

    fn merged(&self, conditions: Value) -> Value {
        condition::merge(&self.default_conditions, &conditions)
    }

    pub async fn count(&self, conditions: Value) -> Result<i64> {
        let merged = self.merged(conditions);
        let reply = executor::exec(
            self.transport.as_ref(),
            &self.subjects.count.base,
            self.request_options(),
            CountRequest { conditions: merged },
        )
        .await?;
        Ok(reply.as_i64().unwrap_or(0))
    }

    pub async fn count_all(&self) -> Result<i64> {
        self.count(json!({})).await
    }

    pub async fn create(&self, object: Value, projection: Value) -> Result<Value> {
        if object.is_null() {
            return Err(PubSubError::argument("create requires a non-null object"));
        }
        executor::exec(
            self.transport.as_ref(),
            &self.subjects.create.base,
            self.request_options(),
            CreateRequest { object, projection },
        )
        .await
    }

    pub async fn find(&self, conditions: Value, projection: Value, options: BatchOptions) -> Result<Vec<Value>> {
        let merged = self.merged(conditions);
        self.find_with_conditions(merged, projection, options).await
    }

    /// Shared page-fetch loop behind [`Provider::find`] and
    /// [`Provider::delete`]'s post-tombstone re-fetch. Takes the exact
    /// conditions to send over the wire, with no default-condition
    /// merge applied — callers that want the tombstone-exclusion filter
    /// go through `find`, which merges before calling this.
    async fn find_with_conditions(
        &self,
        conditions: Value,
        projection: Value,
        options: BatchOptions,
    ) -> Result<Vec<Value>> {
        let batch_size = self.options.batch_size;
        let transport = self.transport.clone();
        let subject = self.subjects.find.base.clone();
        let request_options = self.request_options();
        let projection = projection.clone();

        executor::batch_exec(
            move |limit, skip| {
                let transport = transport.clone();
                let subject = subject.clone();
                let request_options = request_options;
                let conditions = conditions.clone();
                let projection = projection.clone();
                async move {
                    let reply = executor::exec(
                        transport.as_ref(),
                        &subject,
                        request_options,
                        FindRequest {
                            conditions,
                            projection,
                            options: Some(json!({"limit": limit, "skip": skip})),
                        },
                    )
                    .await?;
                    match reply {
                        Value::Array(items) => Ok(items),
                        Value::Null => Ok(Vec::new()),
                        other => Ok(vec![other]),
                    }
                }
            },
            batch_size,
            options,
        )
        .await
    }

    pub async fn find_all(&self, projection: Value, options: BatchOptions) -> Result<Vec<Value>> {
        self.find(json!({}), projection, options).await
    }

    /// `limit = 1`; empty or multi-document replies both resolve `null`
    /// rather than erroring (spec.md §9 Open Question, resolved in
    /// DESIGN.md).
    pub async fn find_by_id(&self, id: Value, projection: Value) -> Result<Option<Value>> {
        if id.is_null() {
            return Err(PubSubError::argument("findById requires a non-null id"));
        }
        let merged = self.merged(json!({"_id": id}));
        let reply = executor::exec(
            self.transport.as_ref(),
            &self.subjects.find.base,
            self.request_options(),
            FindRequest {
                conditions: merged,
                projection,
                options: Some(json!({"limit": 1})),
            },
        )
        .await?;
        Ok(Self::single_or_null(reply))
    }

    /// Fails if the schema has no `metadata.deleted` field. Stamps
    /// `metadata.deleted`/`metadata.updated` via `$currentDate`, then
    /// returns the documents now marked deleted.
    ///
    /// The re-fetch uses `conditions` as given, with no tombstone-
    /// exclusion default merged in — `find`'s default would filter out
    /// the very documents this just tombstoned.
    pub async fn delete(&self, conditions: Value, projection: Value) -> Result<Vec<Value>> {
        if !self.has_metadata {
            return Err(PubSubError::argument(
                "delete requires a schema with a metadata.deleted field",
            ));
        }
        let merged = self.merged(conditions.clone());
        executor::exec(
            self.transport.as_ref(),
            &self.subjects.update.base,
            self.request_options(),
            UpdateRequest {
                conditions: merged,
                object: json!({"$currentDate": {"metadata.deleted": true, "metadata.updated": true}}),
                projection: projection.clone(),
                options: None,
            },
        )
        .await?;

        self.find_with_conditions(conditions, projection, BatchOptions::default())
            .await
    }

    pub async fn delete_by_id(&self, id: Value, projection: Value) -> Result<Option<Value>> {
        if id.is_null() {
            return Err(PubSubError::argument("deleteById requires a non-null id"));
        }
        let deleted = self.delete(json!({"_id": id}), projection).await?;
        Ok(Self::single_or_null(Value::Array(deleted)))
    }

    pub async fn update_by_id(&self, id: Value, object: Value, projection: Value) -> Result<Option<Value>> {
        if id.is_null() {
            return Err(PubSubError::argument("updateById requires a non-null id"));
        }
        if object.is_null() {
            return Err(PubSubError::argument("updateById requires a non-null object"));
        }
        let merged = self.merged(json!({"_id": id.clone()}));
        let object = if self.has_metadata {
            Self::merge_current_date(object, json!({"metadata.updated": true}))
        } else {
            object
        };
        executor::exec(
            self.transport.as_ref(),
            &self.subjects.update.base,
            self.request_options(),
            UpdateRequest {
                conditions: merged,
                object,
                projection: projection.clone(),
                options: None,
            },
        )
        .await?;

        self.find_by_id(id, projection).await
    }

    fn merge_current_date(object: Value, current_date: Value) -> Value {
        let mut map = object.as_object().cloned().unwrap_or_default();
        let existing = map
            .remove("$currentDate")
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        let mut merged_current_date = existing;
        if let Some(extra) = current_date.as_object() {
            for (k, v) in extra {
                merged_current_date.insert(k.clone(), v.clone());
            }
        }
        map.insert("$currentDate".to_string(), Value::Object(merged_current_date));
        Value::Object(map)
    }

    /// Resolves `null` for zero or more-than-one documents, the single
    /// element otherwise (spec.md §4.6 "single element or null" reducer).
    fn single_or_null(reply: Value) -> Option<Value> {
        match reply {
            Value::Array(mut items) if items.len() == 1 => Some(items.remove(0)),
            _ => None,
        }
    }
}
