//! HTTP transport for the fal.ai queue API.
//!
//! A generation is three steps against `queue.fal.run`:
//!
//! 1. `POST /{endpoint}` queues the input and returns a `request_id` with
//!    its status and response URLs.
//! 2. `GET {status_url}?logs=1` is polled until the status reaches
//!    `COMPLETED`. Each poll returns the full log list so far; only lines
//!    not yet seen are forwarded.
//! 3. `GET {response_url}` returns the model output.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::transport::{GenerationTransport, LogSink, TransportError, TransportResponse};

/// Default queue base URL.
pub const DEFAULT_QUEUE_URL: &str = "https://queue.fal.run";

/// Status reported once the output is ready to fetch.
const STATUS_COMPLETED: &str = "COMPLETED";

/// Status reported while the request waits for a worker.
const STATUS_IN_QUEUE: &str = "IN_QUEUE";

/// Connection settings for [`FalQueueTransport`].
#[derive(Debug, Clone)]
pub struct FalQueueConfig {
    /// Base URL, e.g. `https://queue.fal.run`.
    pub queue_url: String,
    /// Wait between status polls.
    pub poll_interval: Duration,
    /// Per-HTTP-request timeout.
    pub request_timeout: Duration,
    /// Longest wait for a queued request to complete.
    pub poll_timeout: Duration,
}

impl Default for FalQueueConfig {
    fn default() -> Self {
        Self {
            queue_url: DEFAULT_QUEUE_URL.to_string(),
            poll_interval: Duration::from_millis(500),
            request_timeout: Duration::from_secs(120),
            poll_timeout: Duration::from_secs(600),
        }
    }
}

/// Response of the queue submit call.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    request_id: String,
    #[serde(default)]
    status_url: Option<String>,
    #[serde(default)]
    response_url: Option<String>,
}

/// Response of a status poll.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    queue_position: Option<u64>,
    #[serde(default)]
    logs: Option<Vec<LogEntry>>,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    message: String,
}

/// [`GenerationTransport`] backed by the fal queue REST API.
pub struct FalQueueTransport {
    client: reqwest::Client,
    config: FalQueueConfig,
}

impl FalQueueTransport {
    /// Create a transport with its own HTTP client.
    pub fn new(config: FalQueueConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Create a transport reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: FalQueueConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &FalQueueConfig {
        &self.config
    }

    async fn submit(
        &self,
        endpoint: &str,
        input: &Value,
        credential: &str,
    ) -> Result<SubmitResponse, TransportError> {
        let url = format!("{}/{}", self.config.queue_url.trim_end_matches('/'), endpoint);
        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, auth_header(credential))
            .json(input)
            .send()
            .await
            .map_err(network_error)?;
        parse_response(response).await
    }

    async fn poll_until_complete(
        &self,
        status_url: &str,
        credential: &str,
        request_id: &str,
        on_log: LogSink<'_>,
    ) -> Result<(), TransportError> {
        let deadline = tokio::time::Instant::now() + self.config.poll_timeout;
        let mut seen_logs = 0usize;
        loop {
            let response = self
                .client
                .get(status_url)
                .query(&[("logs", "1")])
                .header(reqwest::header::AUTHORIZATION, auth_header(credential))
                .send()
                .await
                .map_err(network_error)?;
            let status: StatusResponse = parse_response(response).await?;

            if let Some(logs) = &status.logs {
                for entry in logs.iter().skip(seen_logs) {
                    on_log(&entry.message);
                }
                seen_logs = seen_logs.max(logs.len());
            }

            match status.status.as_str() {
                STATUS_COMPLETED => return Ok(()),
                STATUS_IN_QUEUE => {
                    tracing::debug!(request_id, queue_position = status.queue_position, "Waiting in fal queue");
                }
                other => {
                    tracing::trace!(request_id, status = other, "Polled fal request");
                }
            }

            if tokio::time::Instant::now() + self.config.poll_interval > deadline {
                tracing::warn!(request_id, status = %status.status, "Gave up waiting for fal request");
                return Err(TransportError::Timeout(format!(
                    "request {request_id} still {} after {}s",
                    status.status,
                    self.config.poll_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn fetch_result(&self, response_url: &str, credential: &str) -> Result<Value, TransportError> {
        let response = self
            .client
            .get(response_url)
            .header(reqwest::header::AUTHORIZATION, auth_header(credential))
            .send()
            .await
            .map_err(network_error)?;
        parse_response(response).await
    }
}

#[async_trait]
impl GenerationTransport for FalQueueTransport {
    async fn run(
        &self,
        endpoint: &str,
        input: &Value,
        credential: &str,
        on_log: LogSink<'_>,
    ) -> Result<TransportResponse, TransportError> {
        let submitted = self.submit(endpoint, input, credential).await?;
        let request_id = submitted.request_id;

        tracing::info!(endpoint, request_id = %request_id, "Queued fal request");

        let base = requests_base(&self.config.queue_url, endpoint, &request_id);
        let status_url = submitted
            .status_url
            .unwrap_or_else(|| format!("{base}/status"));
        let response_url = submitted.response_url.unwrap_or(base);

        self.poll_until_complete(&status_url, credential, &request_id, on_log)
            .await?;
        let payload = self.fetch_result(&response_url, credential).await?;

        Ok(TransportResponse::new(payload).with_request_id(request_id))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn auth_header(credential: &str) -> String {
    format!("Key {credential}")
}

/// The app id is the first two path segments of an endpoint:
/// `fal-ai/flux-pro/v1.1-ultra` is served by the `fal-ai/flux-pro` app.
fn app_id(endpoint: &str) -> String {
    endpoint.split('/').take(2).collect::<Vec<_>>().join("/")
}

/// Fallback URL of a queued request when the submit response omits it.
fn requests_base(queue_url: &str, endpoint: &str, request_id: &str) -> String {
    format!(
        "{}/{}/requests/{}",
        queue_url.trim_end_matches('/'),
        app_id(endpoint),
        request_id
    )
}

fn network_error(err: reqwest::Error) -> TransportError {
    TransportError::Network(err.to_string())
}

/// Pull a readable message out of an error body.
///
/// fal answers `{"detail": "..."}` for most errors and
/// `{"detail": [{"msg": "..."}]}` for input validation errors.
fn error_detail(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    match json.get("detail") {
        Some(Value::String(detail)) => detail.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("msg").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("; "),
        _ => body.trim().to_string(),
    }
}

/// Ensure a success status, then decode the JSON body.
async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, TransportError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(TransportError::Status {
            status: status.as_u16(),
            detail: error_detail(&body),
        });
    }
    response.json::<T>().await.map_err(|e| {
        if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_id_keeps_two_segments() {
        assert_eq!(app_id("fal-ai/flux-pro/v1.1-ultra/redux"), "fal-ai/flux-pro");
        assert_eq!(app_id("fal-ai/flux-lora"), "fal-ai/flux-lora");
    }

    #[test]
    fn fallback_urls_use_app_id() {
        assert_eq!(
            requests_base("https://queue.fal.run/", "fal-ai/flux/dev", "abc"),
            "https://queue.fal.run/fal-ai/flux/requests/abc"
        );
    }

    #[test]
    fn detail_string_is_extracted() {
        assert_eq!(error_detail(r#"{"detail": "Exhausted balance"}"#), "Exhausted balance");
    }

    #[test]
    fn validation_details_are_joined() {
        let body = r#"{"detail": [{"msg": "field required"}, {"msg": "bad size"}]}"#;
        assert_eq!(error_detail(body), "field required; bad size");
    }

    #[test]
    fn plain_text_body_is_kept() {
        assert_eq!(error_detail(" Bad Gateway \n"), "Bad Gateway");
    }

    #[test]
    fn status_response_tolerates_missing_fields() {
        let status: StatusResponse = serde_json::from_str(r#"{"status": "IN_PROGRESS"}"#).unwrap();
        assert_eq!(status.status, "IN_PROGRESS");
        assert!(status.logs.is_none());
    }

    /// Serve `body` as a 200 JSON response to every connection.
    async fn serve_forever(body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}")
    }

    fn local_transport(base: &str) -> FalQueueTransport {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        FalQueueTransport::with_client(
            client,
            FalQueueConfig {
                queue_url: base.to_string(),
                poll_interval: Duration::from_millis(10),
                request_timeout: Duration::from_secs(5),
                poll_timeout: Duration::from_millis(50),
            },
        )
    }

    #[tokio::test]
    async fn poll_gives_up_after_deadline() {
        let base = serve_forever(r#"{"status": "IN_QUEUE", "queue_position": 3}"#).await;
        let transport = local_transport(&base);

        let no_logs = |_: &str| {};
        let err = transport
            .poll_until_complete(&format!("{base}/status"), "key", "req-1", &no_logs)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Timeout(ref m) if m.contains("IN_QUEUE")));
    }

    #[tokio::test]
    async fn completed_status_ends_polling() {
        let base = serve_forever(r#"{"status": "COMPLETED"}"#).await;
        let transport = local_transport(&base);

        let no_logs = |_: &str| {};
        transport
            .poll_until_complete(&format!("{base}/status"), "key", "req-1", &no_logs)
            .await
            .unwrap();
    }

    #[test]
    fn default_config_points_at_public_queue() {
        let config = FalQueueConfig::default();
        assert_eq!(config.queue_url, DEFAULT_QUEUE_URL);
        assert!(FalQueueTransport::new(config).is_ok());
    }
}
