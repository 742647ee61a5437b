//! Store Dispatcher — subscribes CRUD subjects, decodes requests,
//! dispatches to a `Model`, and publishes the wrapped reply.

use crate::envelope::{wrap_error, wrap_result};
use crate::error::{PubSubError, Result};
use crate::model::Model;
use crate::schema::Schema;
use crate::subject::{self, SubjectOptions, Subjects};
use crate::transport::{HandlerFn, SubscriptionId, Transport};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::error;

/// The four dispatch error events a Store can broadcast, carrying the
/// method name and the error that occurred.
#[derive(Debug, Clone)]
pub struct DispatchError {
    pub method: &'static str,
    pub error: PubSubError,
}

/// Construction options for a `Store`: subject derivation overrides and
/// the capacity of its dispatch-error broadcast channel.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub subject_options: SubjectOptions,
    pub error_channel_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            subject_options: SubjectOptions::default(),
            error_channel_capacity: 256,
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the subject prefixes/suffix used to derive the four CRUD subjects.
    pub fn with_subject_options(mut self, subject_options: SubjectOptions) -> Self {
        self.subject_options = subject_options;
        self
    }

    /// Set the dispatch-error broadcast channel's capacity.
    pub fn with_error_channel_capacity(mut self, capacity: usize) -> Self {
        self.error_channel_capacity = capacity;
        self
    }
}

/// Subscribes the four CRUD subjects for a schema and dispatches
/// decoded requests to a `Model`.
pub struct Store<T: Transport, M: Model> {
    schema: Schema,
    transport: Arc<T>,
    model: Arc<M>,
    subjects: Subjects,
    subscriptions: Vec<SubscriptionId>,
    error_tx: broadcast::Sender<DispatchError>,
}

impl<T: Transport, M: Model> Store<T, M> {
    /// Build the Model once from the schema (`buildModel(schema)`), and
    /// validate the schema/transport are usable.
    pub fn new<F>(schema: Schema, transport: Arc<T>, build_model: F) -> Self
    where
        F: FnOnce(&Schema) -> M,
    {
        Self::with_options(schema, transport, build_model, StoreOptions::default())
    }

    /// Build with custom `StoreOptions` (subject prefixes/suffix, error
    /// channel capacity).
    pub fn with_options<F>(
        schema: Schema,
        transport: Arc<T>,
        build_model: F,
        options: StoreOptions,
    ) -> Self
    where
        F: FnOnce(&Schema) -> M,
    {
        let model = Arc::new(build_model(&schema));
        let subjects = subject::build(&schema.name, &options.subject_options);
        let (error_tx, _) = broadcast::channel(options.error_channel_capacity);
        Self {
            schema,
            transport,
            model,
            subjects,
            subscriptions: Vec::new(),
            error_tx,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn subjects(&self) -> &Subjects {
        &self.subjects
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<DispatchError> {
        self.error_tx.subscribe()
    }

    pub fn is_open(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Subscribe both subjects of each of the four groups. Fails if
    /// already open.
    pub async fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Err(PubSubError::argument("store is already open"));
        }

        let count_base = self.subjects.count.base.clone();
        let create_base = self.subjects.create.base.clone();
        let find_base = self.subjects.find.base.clone();
        let update_base = self.subjects.update.base.clone();

        let mut ids = Vec::new();
        for (base, wildcard, handler) in [
            (
                count_base.clone(),
                self.subjects.count.wildcard.clone(),
                self.count_handler(),
            ),
            (
                create_base.clone(),
                self.subjects.create.wildcard.clone(),
                self.create_handler(),
            ),
            (
                find_base.clone(),
                self.subjects.find.wildcard.clone(),
                self.find_handler(),
            ),
            (
                update_base.clone(),
                self.subjects.update.wildcard.clone(),
                self.update_handler(),
            ),
        ] {
            ids.push(self.transport.subscribe(&base, handler.clone()).await);
            ids.push(self.transport.subscribe(&wildcard, handler).await);
        }

        self.subscriptions = ids;
        Ok(())
    }

    /// Unsubscribe every recorded id and clear the list. Fails if not
    /// open.
    pub async fn close(&mut self) -> Result<()> {
        if !self.is_open() {
            return Err(PubSubError::argument("store is not open"));
        }
        for sid in self.subscriptions.drain(..) {
            self.transport.unsubscribe(sid).await;
        }
        Ok(())
    }

    fn count_handler(&self) -> HandlerFn {
        let model = self.model.clone();
        let transport = self.transport.clone();
        let error_tx = self.error_tx.clone();
        Arc::new(move |bytes, reply_to| {
            let model = model.clone();
            let transport = transport.clone();
            let error_tx = error_tx.clone();
            Box::pin(async move {
                dispatch(bytes, reply_to, transport, error_tx, "count", move |payload| {
                    let model = model.clone();
                    async move {
                        let conditions = payload
                            .get("conditions")
                            .cloned()
                            .unwrap_or_else(|| Value::Object(Default::default()));
                        let count = model.count(conditions).await?;
                        Ok(Value::from(count))
                    }
                })
                .await;
            })
        })
    }

    fn create_handler(&self) -> HandlerFn {
        let model = self.model.clone();
        let transport = self.transport.clone();
        let error_tx = self.error_tx.clone();
        Arc::new(move |bytes, reply_to| {
            let model = model.clone();
            let transport = transport.clone();
            let error_tx = error_tx.clone();
            Box::pin(async move {
                dispatch(bytes, reply_to, transport, error_tx, "create", move |payload| {
                    let model = model.clone();
                    async move {
                        let object = payload.get("object").cloned().unwrap_or(Value::Null);
                        let projection = payload.get("projection").cloned().unwrap_or(Value::Null);
                        model.create(object, projection).await
                    }
                })
                .await;
            })
        })
    }

    fn find_handler(&self) -> HandlerFn {
        let model = self.model.clone();
        let transport = self.transport.clone();
        let error_tx = self.error_tx.clone();
        Arc::new(move |bytes, reply_to| {
            let model = model.clone();
            let transport = transport.clone();
            let error_tx = error_tx.clone();
            Box::pin(async move {
                dispatch(bytes, reply_to, transport, error_tx, "find", move |payload| {
                    let model = model.clone();
                    async move {
                        let conditions = payload
                            .get("conditions")
                            .cloned()
                            .unwrap_or_else(|| Value::Object(Default::default()));
                        let projection = payload.get("projection").cloned().unwrap_or(Value::Null);
                        let options = payload.get("options").cloned().unwrap_or(Value::Null);
                        let found = model.find(conditions, projection, options).await?;
                        Ok(Value::Array(found))
                    }
                })
                .await;
            })
        })
    }

    fn update_handler(&self) -> HandlerFn {
        let model = self.model.clone();
        let transport = self.transport.clone();
        let error_tx = self.error_tx.clone();
        Arc::new(move |bytes, reply_to| {
            let model = model.clone();
            let transport = transport.clone();
            let error_tx = error_tx.clone();
            Box::pin(async move {
                dispatch(bytes, reply_to, transport, error_tx, "update", move |payload| {
                    let model = model.clone();
                    async move {
                        let conditions = payload.get("conditions").cloned().unwrap_or(Value::Null);
                        let object = payload.get("object").cloned().unwrap_or(Value::Null);
                        let projection = payload.get("projection").cloned().unwrap_or(Value::Null);
                        // multi:true is forced by the Store; callers cannot
                        // override it through the wire payload.
                        let options = serde_json::json!({"select": projection, "multi": true});
                        model.update(conditions, object, options).await
                    }
                })
                .await;
            })
        })
    }
}

/// Shared per-request handler body: parse JSON, invoke `call`, publish
/// the wrapped reply (if a reply subject was supplied), and broadcast a
/// dispatch error on failure.
async fn dispatch<T, C, Fut>(
    bytes: Vec<u8>,
    reply_to: Option<String>,
    transport: Arc<T>,
    error_tx: broadcast::Sender<DispatchError>,
    method: &'static str,
    call: C,
) where
    T: Transport,
    C: FnOnce(Value) -> Fut,
    Fut: std::future::Future<Output = Result<Value>>,
{
    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => {
            let err = PubSubError::decode(e.to_string());
            error!(%method, error = %err, "failed to decode request payload");
            let _ = error_tx.send(DispatchError { method, error: err.clone() });
            if let Some(reply_subject) = reply_to {
                transport.publish(&reply_subject, wrap_error(&err)).await;
            }
            return;
        }
    };

    match call(payload).await {
        Ok(result) => {
            if let Some(reply_subject) = reply_to {
                transport.publish(&reply_subject, wrap_result(result)).await;
            }
        }
        Err(err) => {
            error!(%method, error = %err, "model call failed");
            let _ = error_tx.send(DispatchError { method, error: err.clone() });
            if let Some(reply_subject) = reply_to {
                transport.publish(&reply_subject, wrap_error(&err)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryModel, InMemoryTransport};
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new("Schema", serde_json::Map::new())
    }

    #[tokio::test]
    async fn open_then_close_empties_subscription_list() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut store = Store::new(schema(), transport, |_s| InMemoryModel::new());

        store.open().await.unwrap();
        assert!(store.is_open());

        store.close().await.unwrap();
        assert!(!store.is_open());
    }

    #[tokio::test]
    async fn double_open_fails() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut store = Store::new(schema(), transport, |_s| InMemoryModel::new());
        store.open().await.unwrap();
        assert!(store.open().await.is_err());
    }

    #[tokio::test]
    async fn close_without_open_fails() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut store = Store::new(schema(), transport, |_s| InMemoryModel::new());
        assert!(store.close().await.is_err());
    }

    #[tokio::test]
    async fn count_dispatch_publishes_wrapped_result() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut store = Store::new(schema(), transport.clone(), |_s| InMemoryModel::new());
        store.open().await.unwrap();

        let rx = transport
            .request("count.schema", br#"{"object":{"a":1,"b":2}}"#.to_vec())
            .await;
        let reply = rx.await.unwrap();
        let parsed: Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(parsed, json!({"result": 0}));
    }

    #[tokio::test]
    async fn create_dispatch_round_trips_through_model() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut store = Store::new(schema(), transport.clone(), |_s| InMemoryModel::new());
        store.open().await.unwrap();

        let rx = transport
            .request(
                "create.schema",
                br#"{"object":{"a":1},"projection":{"b":1}}"#.to_vec(),
            )
            .await;
        let reply = rx.await.unwrap();
        let parsed: Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(parsed["result"]["a"], json!(1));
    }

    #[tokio::test]
    async fn decode_failure_publishes_error_envelope_and_emits_event() {
        crate::init_test_tracing();
        let transport = Arc::new(InMemoryTransport::new());
        let mut store = Store::new(schema(), transport.clone(), |_s| InMemoryModel::new());
        store.open().await.unwrap();
        let mut errors = store.subscribe_errors();

        let rx = transport.request("find.schema", b"not json".to_vec()).await;
        let reply = rx.await.unwrap();
        let parsed: Value = serde_json::from_slice(&reply).unwrap();
        assert!(parsed.get("error").is_some());

        let dispatch_error = errors.recv().await.unwrap();
        assert_eq!(dispatch_error.method, "find");
    }

    #[tokio::test]
    async fn no_reply_subject_skips_publish() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut store = Store::new(schema(), transport.clone(), |_s| InMemoryModel::new());
        store.open().await.unwrap();

        // Fire-and-forget: publish carries no reply-to, handled without panic.
        transport
            .publish("create.schema", br#"{"object":{"a":1}}"#.to_vec())
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
