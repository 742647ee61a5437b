//! In-memory `Transport`/`Model` reference implementations for tests.
//!
//! Not a production bus or database: `InMemoryTransport` loops
//! `publish`/`request` straight back to whatever is `subscribe`d in the
//! same process, and `InMemoryModel` keeps documents in a `Vec` behind
//! a lock. Gated behind the `testing` feature (always on for the
//! crate's own `#[cfg(test)]` builds) so downstream crates can pull
//! them into their own integration tests without shipping them in a
//! normal build.

use crate::error::{PubSubError, Result};
use crate::model::Model;
use crate::transport::{HandlerFn, SubscriptionId, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};

fn subject_matches(pattern: &str, subject: &str) -> bool {
    if pattern == subject {
        return true;
    }
    if let Some(base) = pattern.strip_suffix(".>") {
        return subject == base || subject.starts_with(&format!("{base}."));
    }
    false
}

struct Inner {
    subscriptions: RwLock<HashMap<u64, (String, HandlerFn)>>,
    reply_waiters: RwLock<HashMap<String, oneshot::Sender<Vec<u8>>>>,
    next_id: AtomicU64,
}

/// An in-process `Transport`: `subscribe`d handlers are invoked
/// directly from `publish`/`request`, no network hop involved.
#[derive(Clone)]
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscriptions: RwLock::new(HashMap::new()),
                reply_waiters: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    async fn deliver(&self, subject: &str, message: Vec<u8>, reply_to: Option<String>) {
        let matching: Vec<HandlerFn> = {
            let subs = self.inner.subscriptions.read().await;
            subs.values()
                .filter(|(pattern, _)| subject_matches(pattern, subject))
                .map(|(_, handler)| handler.clone())
                .collect()
        };
        for handler in matching {
            let fut = handler(message.clone(), reply_to.clone());
            tokio::spawn(fut);
        }
    }

    /// Convenience for Request Executor tests: subscribe a responder
    /// that decodes the inbound payload, computes a reply envelope
    /// (`{"result": ...}` or `{"error": {"message": ...}}`), and
    /// publishes it back to the reply subject when one was given.
    pub async fn handle<F>(&self, subject: &str, responder: F)
    where
        F: Fn(Value, Option<String>) -> Value + Send + Sync + 'static,
    {
        let responder = Arc::new(responder);
        let transport = self.clone();
        let handler: HandlerFn = Arc::new(move |bytes, reply_to| {
            let responder = responder.clone();
            let transport = transport.clone();
            Box::pin(async move {
                let parsed: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
                let response = responder(parsed, reply_to.clone());
                if let Some(reply_subject) = reply_to {
                    let bytes = serde_json::to_vec(&response).unwrap_or_default();
                    transport.publish(&reply_subject, bytes).await;
                }
            })
        });
        self.subscribe(subject, handler).await;
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn subscribe(&self, subject: &str, handler: HandlerFn) -> SubscriptionId {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscriptions
            .write()
            .await
            .insert(id, (subject.to_string(), handler));
        SubscriptionId(id.to_string())
    }

    async fn unsubscribe(&self, sid: SubscriptionId) {
        if let Ok(id) = sid.0.parse::<u64>() {
            self.inner.subscriptions.write().await.remove(&id);
        }
    }

    async fn publish(&self, subject: &str, message: Vec<u8>) {
        let waiter = self.inner.reply_waiters.write().await.remove(subject);
        if let Some(tx) = waiter {
            let _ = tx.send(message);
            return;
        }
        self.deliver(subject, message, None).await;
    }

    async fn request(&self, subject: &str, message: Vec<u8>) -> oneshot::Receiver<Vec<u8>> {
        let reply_subject = format!("_INBOX.{}", uuid::Uuid::new_v4());
        let (tx, rx) = oneshot::channel();
        self.inner
            .reply_waiters
            .write()
            .await
            .insert(reply_subject.clone(), tx);
        self.deliver(subject, message, Some(reply_subject)).await;
        rx
    }
}

/// An in-memory `Model` backed by a `Vec<Value>` of documents.
/// Understands `_id` equality and `metadata.deleted` tombstoning well
/// enough to exercise the Store dispatcher and Provider default
/// conditions, but implements no real query dialect.
pub struct InMemoryModel {
    documents: RwLock<Vec<Value>>,
    next_id: AtomicU64,
}

impl InMemoryModel {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn matches(conditions: &Value, doc: &Value) -> bool {
        let Some(map) = conditions.as_object() else {
            return true;
        };
        if map.is_empty() {
            return true;
        }
        for (key, expected) in map {
            if key == "$or" {
                let Some(branches) = expected.as_array() else {
                    return false;
                };
                if !branches.iter().any(|branch| Self::matches(branch, doc)) {
                    return false;
                }
                continue;
            }
            if !Self::field_matches(doc, key, expected) {
                return false;
            }
        }
        true
    }

    fn field_matches(doc: &Value, dotted_key: &str, expected: &Value) -> bool {
        let actual = Self::get_dotted(doc, dotted_key);
        if let Some(obj) = expected.as_object() {
            if let Some(eq) = obj.get("$eq") {
                return actual == Some(eq) || (actual.is_none() && eq.is_null());
            }
            if let Some(exists) = obj.get("$exists") {
                let present = actual.is_some();
                return present == exists.as_bool().unwrap_or(true);
            }
        }
        actual == Some(expected)
    }

    fn get_dotted<'a>(doc: &'a Value, dotted_key: &str) -> Option<&'a Value> {
        let mut current = doc;
        for part in dotted_key.split('.') {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Applies `$currentDate` stamps and any other top-level keys as
    /// plain field assignments — good enough to exercise the Provider's
    /// metadata stamping without implementing a real query dialect
    /// (spec.md §1 Non-goal).
    fn apply_update(doc: &mut Value, object: &Value) {
        let Some(obj_map) = object.as_object() else {
            return;
        };
        if let Some(fields) = obj_map.get("$currentDate").and_then(Value::as_object) {
            for dotted_key in fields.keys() {
                Self::set_dotted(doc, dotted_key, Value::Bool(true));
            }
        }
        if let Some(doc_map) = doc.as_object_mut() {
            for (key, value) in obj_map {
                if key == "$currentDate" {
                    continue;
                }
                doc_map.insert(key.clone(), value.clone());
            }
        }
    }

    fn set_dotted(doc: &mut Value, dotted_key: &str, leaf: Value) {
        let parts: Vec<&str> = dotted_key.split('.').collect();
        let mut current = doc;
        for part in &parts[..parts.len() - 1] {
            if !current.is_object() {
                *current = Value::Object(Default::default());
            }
            let map = current.as_object_mut().unwrap();
            current = map
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
        }
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        current
            .as_object_mut()
            .unwrap()
            .insert(parts[parts.len() - 1].to_string(), leaf);
    }
}

impl Default for InMemoryModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Model for InMemoryModel {
    async fn count(&self, conditions: Value) -> Result<i64> {
        let docs = self.documents.read().await;
        Ok(docs.iter().filter(|d| Self::matches(&conditions, d)).count() as i64)
    }

    async fn create(&self, object: Value, _projection: Value) -> Result<Value> {
        let mut docs = self.documents.write().await;
        let insert_one = |docs: &mut Vec<Value>, next_id: &AtomicU64, mut obj: Value| -> Value {
            let id = next_id.fetch_add(1, Ordering::SeqCst);
            if let Some(map) = obj.as_object_mut() {
                map.entry("_id").or_insert(Value::from(id));
            }
            docs.push(obj.clone());
            obj
        };

        if let Some(array) = object.as_array() {
            let created: Vec<Value> = array
                .iter()
                .cloned()
                .map(|obj| insert_one(&mut docs, &self.next_id, obj))
                .collect();
            Ok(Value::Array(created))
        } else {
            Ok(insert_one(&mut docs, &self.next_id, object))
        }
    }

    async fn find(&self, conditions: Value, _projection: Value, options: Value) -> Result<Vec<Value>> {
        let docs = self.documents.read().await;
        let mut matched: Vec<Value> = docs
            .iter()
            .filter(|d| Self::matches(&conditions, d))
            .cloned()
            .collect();

        let skip = options
            .get("skip")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        let limit = options.get("limit").and_then(Value::as_u64).map(|v| v as usize);

        if skip > 0 {
            matched = matched.into_iter().skip(skip).collect();
        }
        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn update(&self, conditions: Value, object: Value, _options: Value) -> Result<Value> {
        let mut docs = self.documents.write().await;
        let mut updated = 0i64;
        for doc in docs.iter_mut() {
            if Self::matches(&conditions, doc) {
                Self::apply_update(doc, &object);
                updated += 1;
            }
        }
        Ok(Value::from(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_model_roundtrips_create_find_update() {
        let model = InMemoryModel::new();
        model
            .create(serde_json::json!({"a": 1}), Value::Null)
            .await
            .unwrap();

        let found = model
            .find(serde_json::json!({"a": 1}), Value::Null, Value::Null)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        model
            .update(
                serde_json::json!({"a": 1}),
                serde_json::json!({"$currentDate": {"metadata.deleted": true}}),
                Value::Null,
            )
            .await
            .unwrap();

        let deleted = model
            .find(
                serde_json::json!({"metadata.deleted": {"$exists": true}}),
                Value::Null,
                Value::Null,
            )
            .await
            .unwrap();
        assert_eq!(deleted.len(), 1);
    }

    #[tokio::test]
    async fn in_memory_transport_request_reply_round_trip() {
        let transport = InMemoryTransport::new();
        transport
            .handle("ping", |_msg, _reply| serde_json::json!({"result": "pong"}))
            .await;

        let rx = transport
            .request("ping", b"{}".to_vec())
            .await;
        let reply = rx.await.unwrap();
        let parsed: Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(parsed["result"], "pong");
    }
}
