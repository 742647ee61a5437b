//! Event Bridge — maps bus `create`/`update` traffic onto local
//! listener registrations, keyed by an opaque handle so registrations
//! can be torn down precisely.

use crate::error::{PubSubError, Result};
use crate::subject::{SubjectGroup, Subjects};
use crate::transport::{HandlerFn, SubscriptionId, Transport};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// The two broadcast events the bus re-publishes per schema (spec.md
/// §4.7). Any other event name is a local-only listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusEvent {
    Create,
    Update,
}

/// A listener invoked with `Ok(parsed_object)` on successful decode or
/// `Err(PubSubError::Decode)` on parse failure — the Rust collapse of
/// spec.md's `(err, query)` callback pair (DESIGN.md Open Question #3).
pub type Listener = Arc<dyn Fn(Result<Value>) + Send + Sync>;

/// Opaque handle returned by `on`/`once`, passed back to `remove_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    event: Option<BusEvent>,
    subscription_ids: Vec<SubscriptionId>,
}

/// Subscribes the `create`/`update` subjects once per Provider and fans
/// decoded payloads out to registered local listeners.
pub struct EventBridge<T: Transport> {
    transport: Arc<T>,
    subjects: Subjects,
    listeners: RwLock<HashMap<ListenerId, (Listener, Registration)>>,
    next_id: AtomicU64,
}

impl<T: Transport> EventBridge<T> {
    pub fn new(transport: Arc<T>, subjects: Subjects) -> Self {
        Self {
            transport,
            subjects,
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn group_for(&self, event: BusEvent) -> &SubjectGroup {
        match event {
            BusEvent::Create => &self.subjects.create,
            BusEvent::Update => &self.subjects.update,
        }
    }

    /// Register a persistent listener on `create`/`update`, allocating
    /// subscriptions on both subjects in that group. `None` registers a
    /// local-only listener with no bus interaction.
    pub async fn on(self: &Arc<Self>, event: Option<BusEvent>, listener: Listener) -> ListenerId {
        self.register(event, listener, false).await
    }

    /// Like `on`, but the listener fires at most once, unsubscribing
    /// itself afterward.
    pub async fn once(self: &Arc<Self>, event: Option<BusEvent>, listener: Listener) -> ListenerId {
        self.register(event, listener, true).await
    }

    /// `prependListener` has no re-ordering effect on the bus (spec.md
    /// §4.7); aliased to `on`.
    pub async fn prepend_listener(self: &Arc<Self>, event: Option<BusEvent>, listener: Listener) -> ListenerId {
        self.on(event, listener).await
    }

    /// `prependOnceListener`, aliased to `once`.
    pub async fn prepend_once_listener(self: &Arc<Self>, event: Option<BusEvent>, listener: Listener) -> ListenerId {
        self.once(event, listener).await
    }

    async fn register(self: &Arc<Self>, event: Option<BusEvent>, listener: Listener, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));

        let fire: Listener = if once {
            let bridge = self.clone();
            let inner = listener.clone();
            let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
            Arc::new(move |result| {
                if fired.swap(true, Ordering::SeqCst) {
                    return;
                }
                inner(result);
                let bridge = bridge.clone();
                tokio::spawn(async move { bridge.remove_listener(id).await });
            })
        } else {
            listener
        };

        let subscription_ids = if let Some(event) = event {
            self.subscribe_group(event, fire.clone()).await
        } else {
            Vec::new()
        };
        self.listeners.write().await.insert(
            id,
            (
                fire,
                Registration {
                    event,
                    subscription_ids,
                },
            ),
        );
        id
    }

    /// Unsubscribe exactly the IDs allocated for this registration.
    pub async fn remove_listener(&self, id: ListenerId) {
        if let Some((_, registration)) = self.listeners.write().await.remove(&id) {
            for sid in registration.subscription_ids {
                self.transport.unsubscribe(sid).await;
            }
        }
    }

    /// Remove every listener registered for `event`, or every listener
    /// at all if `event` is `None`.
    pub async fn remove_all_listeners(&self, event: Option<BusEvent>) {
        let mut listeners = self.listeners.write().await;
        let ids: Vec<ListenerId> = listeners
            .iter()
            .filter(|(_, (_, reg))| event.is_none() || reg.event == event)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some((_, registration)) = listeners.remove(&id) {
                for sid in registration.subscription_ids {
                    self.transport.unsubscribe(sid).await;
                }
            }
        }
    }

    async fn subscribe_group(&self, event: BusEvent, listener: Listener) -> Vec<SubscriptionId> {
        let group = self.group_for(event).clone();
        let mut ids = Vec::new();
        for subject in [group.base.clone(), group.wildcard.clone()] {
            let handler = Self::make_handler(listener.clone());
            ids.push(self.transport.subscribe(&subject, handler).await);
        }
        ids
    }

    // A publish-with-reply-to is an ordinary publish on the base subject;
    // the Store's own subscription is just one of possibly many. The
    // Event Bridge listens on the same subjects and sees the same raw
    // request payload (e.g. `{object, projection}` for `create`) the
    // Store dispatches from — there is no separate notification channel.
    fn make_handler(listener: Listener) -> HandlerFn {
        Arc::new(move |bytes, _reply_to| {
            let listener = listener.clone();
            Box::pin(async move {
                match serde_json::from_slice::<Value>(&bytes) {
                    Ok(value) => listener(Ok(value)),
                    Err(e) => listener(Err(PubSubError::decode(e.to_string()))),
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryTransport;
    use serde_json::json;
    use std::sync::Mutex;

    fn subjects() -> Subjects {
        crate::subject::build("widget", &crate::subject::SubjectOptions::default())
    }

    #[tokio::test]
    async fn on_create_receives_decoded_payload() {
        let transport = Arc::new(InMemoryTransport::new());
        let bridge = Arc::new(EventBridge::new(transport.clone(), subjects()));

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        bridge
            .on(
                Some(BusEvent::Create),
                Arc::new(move |result| {
                    received_clone.lock().unwrap().push(result);
                }),
            )
            .await;

        transport
            .publish(
                "create.widget",
                serde_json::to_vec(&json!({"object": {"name": "widget-1"}})).unwrap(),
            )
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].as_ref().unwrap()["object"]["name"], json!("widget-1"));
    }

    #[tokio::test]
    async fn decode_failure_invokes_listener_with_err() {
        crate::init_test_tracing();
        let transport = Arc::new(InMemoryTransport::new());
        let bridge = Arc::new(EventBridge::new(transport.clone(), subjects()));

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        bridge
            .on(
                Some(BusEvent::Update),
                Arc::new(move |result| {
                    received_clone.lock().unwrap().push(result.is_err());
                }),
            )
            .await;

        transport.publish("update.widget", b"not json".to_vec()).await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(received.lock().unwrap().as_slice(), &[true]);
    }

    #[tokio::test]
    async fn remove_listener_stops_further_delivery() {
        let transport = Arc::new(InMemoryTransport::new());
        let bridge = Arc::new(EventBridge::new(transport.clone(), subjects()));

        let count = Arc::new(Mutex::new(0));
        let count_clone = count.clone();
        let id = bridge
            .on(
                Some(BusEvent::Create),
                Arc::new(move |_result| {
                    *count_clone.lock().unwrap() += 1;
                }),
            )
            .await;

        bridge.remove_listener(id).await;

        transport
            .publish("create.widget", serde_json::to_vec(&json!({"object": {}})).unwrap())
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn once_listener_fires_at_most_once() {
        let transport = Arc::new(InMemoryTransport::new());
        let bridge = Arc::new(EventBridge::new(transport.clone(), subjects()));

        let count = Arc::new(Mutex::new(0));
        let count_clone = count.clone();
        bridge
            .once(
                Some(BusEvent::Create),
                Arc::new(move |_result| {
                    *count_clone.lock().unwrap() += 1;
                }),
            )
            .await;

        for _ in 0..3 {
            transport
                .publish("create.widget", serde_json::to_vec(&json!({"object": {}})).unwrap())
                .await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn local_only_listener_has_no_bus_subscription() {
        let transport = Arc::new(InMemoryTransport::new());
        let bridge = Arc::new(EventBridge::new(transport.clone(), subjects()));

        let id = bridge.on(None, Arc::new(|_result| {})).await;
        let listeners = bridge.listeners.read().await;
        assert!(listeners.get(&id).unwrap().1.subscription_ids.is_empty());
    }
}
