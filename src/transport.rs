//! The bus driver contract consumed by Store and Provider.
//!
//! Only `subscribe`/`unsubscribe`/`publish`/`request` are assumed;
//! the wire protocol, delivery guarantees, and connection lifecycle are
//! the implementor's concern (spec.md §1's "out of scope" bus driver).

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// A subject a single reply should be published to.
pub type ReplySubject = String;

/// `handler(message, reply_to?)`, invoked once per inbound message on a
/// subscribed subject.
pub type HandlerFn = Arc<dyn Fn(Vec<u8>, Option<ReplySubject>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Opaque handle a `Transport` returns from `subscribe`, passed back to
/// `unsubscribe`. Never inspected by this crate beyond bookkeeping.
#[derive(Debug, Clone)]
pub struct SubscriptionId(pub String);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The message bus contract.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Subscribe `handler` to `subject`, returning an opaque id used to
    /// unsubscribe later.
    async fn subscribe(&self, subject: &str, handler: HandlerFn) -> SubscriptionId;

    /// Unsubscribe a previously returned id. Errors are swallowed by
    /// the bus driver's own contract (spec.md §7).
    async fn unsubscribe(&self, sid: SubscriptionId);

    /// Fire-and-forget publish; no reply is expected.
    async fn publish(&self, subject: &str, message: Vec<u8>);

    /// Request with a single expected reply (`{max:1}` semantics).
    /// Resolves with the first reply payload, or `None` if the
    /// transport gives up waiting on its own (most implementations
    /// instead rely on the caller's timeout and never resolve `None`).
    async fn request(&self, subject: &str, message: Vec<u8>) -> tokio::sync::oneshot::Receiver<Vec<u8>>;
}
