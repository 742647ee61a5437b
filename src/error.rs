//! Error taxonomy for the protocol engine.
//!
//! Mirrors the five failure categories a Provider/Store pair can hit:
//! arguments rejected locally, inbound JSON that won't parse, a request
//! that outran its timeout, a remote `{error:{message}}` envelope, and
//! stream-side decode/create failures that must never tear down the
//! duplex.

use serde_json::Value;
use thiserror::Error;

/// Error produced anywhere in the dispatch/protocol engine.
#[derive(Debug, Error, Clone)]
pub enum PubSubError {
    /// A required argument was missing or invalid; rejected before any
    /// bus call was made.
    #[error("{0}")]
    Argument(String),

    /// Inbound JSON failed to parse.
    #[error("decode error: {0}")]
    Decode(String),

    /// A request timed out waiting for a reply.
    #[error("query timeout after {timeout_ms}ms")]
    Timeout {
        timeout_ms: u64,
        /// The original query, kept for diagnostics.
        query: Value,
    },

    /// The peer returned `{error:{message}}`.
    #[error("{message}")]
    Remote { message: String },

    /// A stream-side error: Readable decode failure, missing `object`,
    /// or a Writable create failure. Never terminates the duplex.
    #[error("{0}")]
    Stream(String),
}

impl PubSubError {
    pub fn argument(msg: impl Into<String>) -> Self {
        PubSubError::Argument(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        PubSubError::Decode(msg.into())
    }

    pub fn remote(message: impl Into<String>) -> Self {
        PubSubError::Remote {
            message: message.into(),
        }
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        PubSubError::Stream(msg.into())
    }

    /// The bare message, as carried in a wire error envelope.
    pub fn message(&self) -> String {
        match self {
            PubSubError::Argument(m) => m.clone(),
            PubSubError::Decode(m) => m.clone(),
            PubSubError::Timeout { timeout_ms, .. } => format!("query timeout after {timeout_ms}ms"),
            PubSubError::Remote { message } => message.clone(),
            PubSubError::Stream(m) => m.clone(),
        }
    }
}

impl From<serde_json::Error> for PubSubError {
    fn from(err: serde_json::Error) -> Self {
        PubSubError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PubSubError>;
