//! Envelope Codec — encode requests, decode the `{result}`/`{error}` reply.

use crate::error::{PubSubError, Result};
use serde::Serialize;
use serde_json::Value;

/// A decoded response envelope: exactly one of `result`/`error`.
#[derive(Debug, Clone)]
pub enum Envelope {
    Result(Value),
    Error { message: String },
}

/// Wire shape of a response envelope. Both fields are optional on the
/// wire; exactly one must be present, enforced in `Envelope::try_from`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct WireEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<WireError>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct WireError {
    message: String,
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = PubSubError;

    fn try_from(wire: WireEnvelope) -> Result<Self> {
        match (wire.result, wire.error) {
            (Some(result), None) => Ok(Envelope::Result(result)),
            (None, Some(err)) => Ok(Envelope::Error {
                message: err.message,
            }),
            (None, None) => Err(PubSubError::decode(
                "envelope has neither result nor error",
            )),
            (Some(_), Some(_)) => Err(PubSubError::decode(
                "envelope has both result and error",
            )),
        }
    }
}

/// Wire shape of a `count` request: spec.md §6 `{conditions}`.
#[derive(Debug, Clone, Serialize)]
pub struct CountRequest {
    pub conditions: Value,
}

/// Wire shape of a `create` request: spec.md §6 `{object, projection}`.
/// `object` may be a scalar JSON object or an array.
#[derive(Debug, Clone, Serialize)]
pub struct CreateRequest {
    pub object: Value,
    pub projection: Value,
}

/// Wire shape of a `find` request: spec.md §6 `{conditions, projection, options?}`.
#[derive(Debug, Clone, Serialize)]
pub struct FindRequest {
    pub conditions: Value,
    pub projection: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// Wire shape of an `update` request: spec.md §6 `{conditions, object, projection, options?}`.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateRequest {
    pub conditions: Value,
    pub object: Value,
    pub projection: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// Serialize a request payload to its wire bytes. `T` is one of the
/// typed `*Request` structs above, so serde's derive emits fields in
/// the struct's declared order, matching the wire payload shapes in
/// spec.md §6 — `serde_json::Value`'s own `Map` is `BTreeMap`-backed
/// (this crate does not enable the `preserve_order` feature) and would
/// serialize its keys alphabetically instead.
pub fn encode_request<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(payload).map_err(PubSubError::from)
}

/// Parse a reply's bytes into its envelope, then demux to a `Result`:
/// `{error}` becomes `Err(PubSubError::Remote)`, `{result}` becomes `Ok`.
pub fn decode_response(bytes: &[u8]) -> Result<Value> {
    let wire: WireEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| PubSubError::decode(e.to_string()))?;
    match Envelope::try_from(wire)? {
        Envelope::Result(v) => Ok(v),
        Envelope::Error { message } => Err(PubSubError::remote(message)),
    }
}

/// Wrap a successful value as `{result: v}`.
pub fn wrap_result(value: Value) -> Vec<u8> {
    let wire = WireEnvelope {
        result: Some(value),
        error: None,
    };
    serde_json::to_vec(&wire).expect("envelope serialization cannot fail")
}

/// Wrap an error as `{error: {message}}`. Only the message survives.
pub fn wrap_error(err: &PubSubError) -> Vec<u8> {
    let wire = WireEnvelope {
        result: None,
        error: Some(WireError {
            message: err.message(),
        }),
    };
    serde_json::to_vec(&wire).expect("envelope serialization cannot fail")
}
