//! Stream Duplex — the Provider as an object-mode duplex stream.
//!
//! Readable side: a `Stream<Item = Value>` fed by the Event Bridge's
//! `create` registration, paired with a separate `stream-error`
//! broadcast so malformed deliveries never terminate the stream itself
//! (spec.md §4.8). Writable side: `send`/`send_batch`, switching
//! between request-executor-backed and fire-and-forget publish modes
//! depending on `no_ack_stream`.

use crate::envelope::CreateRequest;
use crate::error::{PubSubError, Result};
use crate::executor::{self, RequestOptions};
use crate::provider::events::{BusEvent, EventBridge};
use crate::provider::ProviderOptions;
use crate::subject::Subjects;
use crate::transport::Transport;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

/// Construction options for a `StreamDuplex`: ack mode, readable
/// backpressure, and the per-chunk request timeout.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub no_ack_stream: bool,
    pub high_water_mark: Option<usize>,
    pub timeout_ms: u64,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            no_ack_stream: false,
            high_water_mark: None,
            timeout_ms: 5_000,
        }
    }
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_no_ack_stream(mut self, no_ack_stream: bool) -> Self {
        self.no_ack_stream = no_ack_stream;
        self
    }

    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = Some(high_water_mark);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

impl From<&ProviderOptions> for StreamOptions {
    fn from(options: &ProviderOptions) -> Self {
        Self {
            no_ack_stream: options.no_ack_stream,
            high_water_mark: options.high_water_mark,
            timeout_ms: options.timeout_ms,
        }
    }
}

/// The object-mode duplex built on top of a Provider's subjects.
pub struct StreamDuplex<T: Transport> {
    transport: Arc<T>,
    subjects: Subjects,
    events: Arc<EventBridge<T>>,
    options: StreamOptions,
    stream_errors: broadcast::Sender<PubSubError>,
}

impl<T: Transport> StreamDuplex<T> {
    pub fn new(
        transport: Arc<T>,
        subjects: Subjects,
        events: Arc<EventBridge<T>>,
        options: StreamOptions,
    ) -> Self {
        let (stream_errors, _) = broadcast::channel(256);
        Self {
            transport,
            subjects,
            events,
            options,
            stream_errors,
        }
    }

    /// Subscribe to `stream-error` notifications: decode failures and
    /// missing-`object` deliveries that never tear down the readable
    /// side (spec.md §4.8).
    pub fn subscribe_stream_errors(&self) -> broadcast::Receiver<PubSubError> {
        self.stream_errors.subscribe()
    }

    /// The readable half: subscribes to the `create` event through the
    /// Event Bridge, pushing each decoded `object` (or each element, if
    /// `object` is an array) onto the returned stream. `high_water_mark`
    /// (if set) bounds the internal channel, giving the producer
    /// backpressure instead of unbounded buffering.
    pub async fn readable(&self) -> ReceiverStream<Value> {
        let capacity = self.options.high_water_mark.unwrap_or(1024).max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let stream_errors = self.stream_errors.clone();

        let listener = {
            let tx = tx.clone();
            let stream_errors = stream_errors.clone();
            Arc::new(move |result: Result<Value>| {
                let tx = tx.clone();
                let stream_errors = stream_errors.clone();
                match result {
                    Err(err) => {
                        let _ = stream_errors.send(err);
                    }
                    Ok(message) => {
                        let Some(object) = message.get("object").cloned() else {
                            let _ = stream_errors
                                .send(PubSubError::stream("create message is missing `object`"));
                            return;
                        };
                        tokio::spawn(async move {
                            match object {
                                Value::Array(items) => {
                                    for item in items {
                                        let _ = tx.send(item).await;
                                    }
                                }
                                other => {
                                    let _ = tx.send(other).await;
                                }
                            }
                        });
                    }
                }
            })
        };

        self.events.on(Some(BusEvent::Create), listener).await;
        ReceiverStream::new(rx)
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions {
            no_ack: self.options.no_ack_stream,
            timeout_ms: self.options.timeout_ms,
        }
    }

    /// The writable half for a single chunk: a create request with
    /// projection `{id:1}`.
    ///
    /// - `noAckStream = false`: goes through the normal request
    ///   executor; a failure is reported via `stream-error` rather than
    ///   propagated, so the pipeline is never torn down.
    /// - `noAckStream = true`: published without reply; returns as soon
    ///   as publish completes.
    pub async fn send(&self, object: Value) {
        let payload = CreateRequest {
            object,
            projection: json!({"id": 1}),
        };
        let result = executor::exec(
            self.transport.as_ref(),
            &self.subjects.create.base,
            self.request_options(),
            payload,
        )
        .await;
        if let Err(err) = result {
            let _ = self.stream_errors.send(err);
        }
    }

    /// `_writev` equivalent: a batched write of coalesced chunks.
    /// Under `noAckStream = true` this is a single publish carrying the
    /// whole batch as an array payload (spec.md §4.8/§8 scenario 6);
    /// otherwise each chunk still goes through `send` independently.
    pub async fn send_batch(&self, objects: Vec<Value>) {
        if !self.options.no_ack_stream {
            for object in objects {
                self.send(object).await;
            }
            return;
        }
        if objects.is_empty() {
            return;
        }
        let payload = CreateRequest {
            object: Value::Array(objects),
            projection: json!({"id": 1}),
        };
        executor::exec(
            self.transport.as_ref(),
            &self.subjects.create.base,
            self.request_options(),
            payload,
        )
        .await
        .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Provider, ProviderOptions};
    use crate::schema::Schema;
    use crate::store::Store;
    use crate::testing::{InMemoryModel, InMemoryTransport};
    use tokio_stream::StreamExt;

    async fn setup(
        no_ack_stream: bool,
    ) -> (
        Store<InMemoryTransport, InMemoryModel>,
        Provider<InMemoryTransport>,
        Arc<InMemoryTransport>,
    ) {
        let transport = Arc::new(InMemoryTransport::new());
        let schema = Schema::new("Widget", serde_json::Map::new());
        let mut store = Store::new(schema.clone(), transport.clone(), |_s| InMemoryModel::new());
        store.open().await.unwrap();

        let options = ProviderOptions {
            no_ack_stream,
            ..ProviderOptions::default()
        };
        let provider = Provider::new(schema, transport.clone(), options).unwrap();
        (store, provider, transport)
    }

    #[tokio::test]
    async fn send_with_ack_goes_through_request_executor() {
        let (_store, provider, _transport) = setup(false).await;
        let stream = provider.stream();
        stream.send(json!({"name": "widget-1"})).await;

        let found = provider.count_all().await.unwrap();
        assert_eq!(found, 1);
    }

    #[tokio::test]
    async fn send_batch_with_no_ack_stream_is_a_single_publish() {
        let (_store, provider, _transport) = setup(true).await;
        let stream = provider.stream();

        stream
            .send_batch(vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})])
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(provider.count_all().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn readable_side_receives_pushed_objects() {
        let (_store, provider, _transport) = setup(false).await;
        let stream = provider.stream();
        let mut readable = stream.readable().await;

        provider.create(json!({"name": "widget-1"}), Value::Null).await.unwrap();

        let first = tokio::time::timeout(std::time::Duration::from_millis(200), readable.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first["name"], json!("widget-1"));
    }

    #[tokio::test]
    async fn readable_side_reports_missing_object_as_stream_error() {
        let (_store, provider, transport) = setup(false).await;
        let stream = provider.stream();
        let mut errors = stream.subscribe_stream_errors();
        let _readable = stream.readable().await;

        // A malformed producer publishes a create message with no
        // `object` field directly on the create subject.
        transport
            .publish("create.widget", serde_json::to_vec(&json!({"nope": true})).unwrap())
            .await;

        let err = tokio::time::timeout(std::time::Duration::from_millis(200), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, PubSubError::Stream(_)));
    }
}
