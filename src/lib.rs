//! Schema-aware pub/sub CRUD protocol layer.
//!
//! A [`Provider`] translates typed CRUD calls into request/reply
//! traffic over a [`Transport`], applying a tombstone-aware default
//! filter derived from a [`Schema`]. A [`Store`] is the peer on the
//! other side: it subscribes the same subjects, decodes requests, and
//! dispatches them to a [`Model`]. Both share subjects built by
//! [`subject::build`] and exchange the `{result}`/`{error}` envelope
//! defined in [`envelope`].

pub mod condition;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod model;
pub mod provider;
pub mod schema;
pub mod store;
pub mod subject;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use envelope::{CountRequest, CreateRequest, Envelope, FindRequest, UpdateRequest};
pub use error::{PubSubError, Result};
pub use executor::{BatchOptions, RequestOptions};
pub use model::Model;
pub use provider::events::{BusEvent, EventBridge, Listener, ListenerId};
pub use provider::stream::{StreamDuplex, StreamOptions};
pub use provider::{Provider, ProviderOptions};
pub use schema::{FieldMap, Schema, TypeRefs};
pub use store::{DispatchError, Store, StoreOptions};
pub use subject::{Prefixes, SubjectGroup, SubjectOptions, Subjects};
pub use transport::{HandlerFn, SubscriptionId, Transport};

/// Installs a `tracing-subscriber` fmt layer for test output, once per
/// process. Tests call this instead of relying on a global subscriber
/// the library itself has no business installing.
#[cfg(test)]
pub(crate) fn init_test_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}
