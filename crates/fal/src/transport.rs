//! Transport seam between the generation client and the provider.
//!
//! The client owns retry and normalization; a transport only moves one
//! request to the provider and one JSON payload back. Tests substitute a
//! scripted transport here.

use async_trait::async_trait;
use serde_json::Value;

/// Callback receiving provider log lines in order.
pub type LogSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Raw payload returned by one successful transport call.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    /// Provider-assigned request id, when the protocol has one.
    pub request_id: Option<String>,
    pub payload: Value,
}

impl TransportResponse {
    pub fn new(payload: Value) -> Self {
        Self {
            request_id: None,
            payload,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Errors from a single transport call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// The provider answered with a non-2xx status.
    #[error("Upstream returned status {status}: {detail}")]
    Status {
        status: u16,
        /// The body's `detail` message, or the raw body text.
        detail: String,
    },

    /// The request never produced a response (DNS, TLS, connect, timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// A response arrived but could not be decoded.
    #[error("Malformed upstream response: {0}")]
    Decode(String),

    /// The request was accepted but did not finish in time.
    #[error("Timed out: {0}")]
    Timeout(String),
}

/// Submits one generation request and waits for its payload.
#[async_trait]
pub trait GenerationTransport: Send + Sync {
    /// Run `input` against the provider model `endpoint`.
    ///
    /// Progress log lines are passed to `on_log` as they arrive.
    async fn run(
        &self,
        endpoint: &str,
        input: &Value,
        credential: &str,
        on_log: LogSink<'_>,
    ) -> Result<TransportResponse, TransportError>;
}
