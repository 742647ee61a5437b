//! Request Executor (single-shot, timed) and Batch Executor (paginated).

use crate::envelope::{decode_response, encode_request};
use crate::error::{PubSubError, Result};
use crate::transport::Transport;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Per-call request options: `{noAck, timeout}`.
#[derive(Debug, Clone, Copy)]
pub struct RequestOptions {
    pub no_ack: bool,
    pub timeout_ms: u64,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            no_ack: false,
            timeout_ms: 5_000,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_no_ack(mut self, no_ack: bool) -> Self {
        self.no_ack = no_ack;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Serialize `query`, send it over `transport` on `subject`, and
/// resolve with the demuxed result.
///
/// - `no_ack`: publishes and resolves immediately; no timer, no reply
///   parsing.
/// - otherwise: requests with a single expected reply, racing a timer
///   that fails with `"query timeout after {timeout}ms"` if no reply
///   arrives first. The timer is implicitly dropped (cancelled) on the
///   first reply, since it wraps the reply future directly.
pub async fn exec<T, Q>(
    transport: &T,
    subject: &str,
    opts: RequestOptions,
    query: Q,
) -> Result<Value>
where
    T: Transport,
    Q: Serialize,
{
    let query_value = serde_json::to_value(&query).map_err(PubSubError::from)?;
    let bytes = encode_request(&query)?;

    if opts.no_ack {
        transport.publish(subject, bytes).await;
        return Ok(Value::Null);
    }

    let reply_rx = transport.request(subject, bytes).await;
    let timeout = Duration::from_millis(opts.timeout_ms);

    match tokio::time::timeout(timeout, reply_rx).await {
        Ok(Ok(reply_bytes)) => decode_response(&reply_bytes),
        Ok(Err(_canceled)) => Err(PubSubError::Decode(
            "transport dropped the reply channel without a reply".to_string(),
        )),
        Err(_elapsed) => Err(PubSubError::Timeout {
            timeout_ms: opts.timeout_ms,
            query: query_value,
        }),
    }
}

/// Batch options: `{limit}`, defaulting to `batch_size`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    pub limit: Option<usize>,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Accumulate pages from `page_fn(limit, skip)` until `limit` items
/// have been requested or a page shorter than `batch_size` is seen.
pub async fn batch_exec<F, Fut>(
    page_fn: F,
    batch_size: usize,
    options: BatchOptions,
) -> Result<Vec<Value>>
where
    F: Fn(usize, usize) -> Fut,
    Fut: Future<Output = Result<Vec<Value>>>,
{
    let limit = options.limit.unwrap_or(batch_size);
    let mut left = limit as i64;
    let mut iter = 0usize;
    let mut results = Vec::new();

    loop {
        let page_limit = std::cmp::min(left.max(0) as usize, batch_size);
        let page_skip = batch_size * iter;

        let page = page_fn(page_limit, page_skip).await?;
        let page_len = page.len();
        results.extend(page);

        left -= batch_size as i64;
        iter += 1;

        if left <= 0 || page_len < batch_size {
            break;
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryTransport;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn round_trip_resolves_to_echoed_result() {
        let transport = InMemoryTransport::new();
        transport
            .handle("echo", |_msg, _reply| json!({"result": {"v": 42}}))
            .await;

        let value = exec(
            &transport,
            "echo",
            RequestOptions::default(),
            json!({"a": 1}),
        )
        .await
        .unwrap();

        assert_eq!(value, json!({"v": 42}));
    }

    #[tokio::test]
    async fn round_trip_rejects_with_remote_error() {
        let transport = InMemoryTransport::new();
        transport
            .handle("echo", |_msg, _reply| json!({"error": {"message": "boom"}}))
            .await;

        let err = exec(&transport, "echo", RequestOptions::default(), json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.message(), "boom");
    }

    #[tokio::test]
    async fn timeout_after_configured_duration() {
        let transport = InMemoryTransport::new();
        // No handler registered: request never replies.
        let opts = RequestOptions {
            no_ack: false,
            timeout_ms: 10,
        };

        let err = exec(&transport, "never.replies", opts, json!({"a": 1}))
            .await
            .unwrap_err();

        match err {
            PubSubError::Timeout { timeout_ms, query } => {
                assert_eq!(timeout_ms, 10);
                assert_eq!(query, json!({"a": 1}));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_ack_resolves_immediately_without_reply() {
        let transport = InMemoryTransport::new();
        let opts = RequestOptions {
            no_ack: true,
            timeout_ms: 5_000,
        };

        let value = exec(&transport, "fire.and.forget", opts, json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn batch_exec_terminates_on_short_read_and_caps_at_limit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pages: Vec<Vec<Value>> = vec![
            vec![json!(1), json!(2)],
            vec![json!(3), json!(4)],
            vec![json!(5)],
        ];
        let pages = Arc::new(pages);

        let calls_clone = calls.clone();
        let pages_clone = pages.clone();
        let page_fn = move |_limit: usize, _skip: usize| {
            let calls = calls_clone.clone();
            let pages = pages_clone.clone();
            async move {
                let i = calls.fetch_add(1, Ordering::SeqCst);
                Ok(pages.get(i).cloned().unwrap_or_default())
            }
        };

        let result = batch_exec(
            page_fn,
            2,
            BatchOptions { limit: Some(5) },
        )
        .await
        .unwrap();

        assert_eq!(result, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn batch_exec_empty_first_page_is_a_single_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let page_fn = move |_limit: usize, _skip: usize| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            }
        };

        let result = batch_exec(page_fn, 10, BatchOptions::default())
            .await
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
